//! file: cli/src/logger.rs
//! description: `log` backend for the command line.
//!
//! Records go to stderr so generated code written to stdout stays clean.
//!
use console::Style;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let style = match record.level() {
            Level::Error => Style::new().red().bold(),
            Level::Warn => Style::new().yellow().bold(),
            Level::Info => Style::new().cyan(),
            Level::Debug => Style::new().blue(),
            Level::Trace => Style::new().dim(),
        };
        let target = Style::new().dim().apply_to(record.target());
        eprintln!("{} {} {}", style.apply_to(format!("[{:<5}]", record.level())), target, record.args());
    }

    fn flush(&self) {}
}

/// Level for `-v` repeated `verbosity` times. Deferred diagnostics are
/// logged at `warn`, so they only show up once `-v` is given.
pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Off;
    }
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: u8, quiet: bool) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level_for(verbosity, quiet));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_verbosity() {
        assert_eq!(level_for(3, true), LevelFilter::Off);
        assert_eq!(level_for(0, false), LevelFilter::Error);
        assert_eq!(level_for(2, false), LevelFilter::Info);
        assert_eq!(level_for(9, false), LevelFilter::Trace);
    }
}
