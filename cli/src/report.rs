//! file: cli/src/report.rs
//! description: build reports for the command line.
//!
//! Collects the per-file outcome of a build and renders it three ways: a
//! diagnostics table on stderr, a progress bar while several files compile,
//! and a JSON document for tooling.
//!
use std::path::PathBuf;

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use pyzig_core::error::{Level, PyzigErrorExt};
use pyzig_core::location::{Location, Span};
use pyzig_core::{Diagnostic, LoweredModule};

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source: String,
    /// Where the generated text went; `None` for stdout or a failed file.
    pub output: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub closures: usize,
    pub error: Option<String>,
}

impl FileReport {
    pub fn lowered(source: &str, module: &LoweredModule, output: Option<String>) -> Self {
        FileReport {
            source: source.to_string(),
            output,
            diagnostics: module.diagnostics.clone(),
            closures: module.closures.len(),
            error: None,
        }
    }

    pub fn failed(source: &str, error: &dyn PyzigErrorExt) -> Self {
        FileReport {
            source: source.to_string(),
            output: None,
            diagnostics: Vec::new(),
            closures: 0,
            error: Some(error.message()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub files: Vec<FileReport>,
}

impl BuildReport {
    pub fn push(&mut self, file: FileReport) {
        self.files.push(file);
    }

    pub fn diagnostic_count(&self) -> usize {
        self.files.iter().map(|f| f.diagnostics.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One row per deferred diagnostic, or `None` when there are none.
    pub fn diagnostics_table(&self) -> Option<Table> {
        if self.diagnostic_count() == 0 {
            return None;
        }
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["File", "Location", "Construct", "Message"]);
        for file in &self.files {
            for diag in &file.diagnostics {
                let location = diag
                    .location
                    .as_ref()
                    .map(|l| format!("{}:{}", l.line, l.column))
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(vec![
                    Cell::new(&file.source),
                    Cell::new(location),
                    Cell::new(&diag.construct).fg(Color::Yellow),
                    Cell::new(&diag.message),
                ]);
            }
        }
        Some(table)
    }

    pub fn print_summary(&self) {
        let style = if self.failed_count() > 0 {
            Style::new().red().bold()
        } else if self.diagnostic_count() > 0 {
            Style::new().yellow().bold()
        } else {
            Style::new().green().bold()
        };
        eprintln!(
            "{}",
            style.apply_to(format!(
                "{} file(s) lowered, {} failed, {} deferred diagnostic(s)",
                self.files.len() - self.failed_count(),
                self.failed_count(),
                self.diagnostic_count()
            ))
        );
    }
}

/// A bar on stderr when there is more than one file to compile.
pub fn progress_bar(len: usize, quiet: bool) -> ProgressBar {
    if quiet || len < 2 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:30.cyan/blue}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Styled rendering of any fatal error.
pub fn print_error(error: &dyn PyzigErrorExt) {
    let sev = match error.level() {
        Level::Critical => Style::new().on_red().white().bold(),
        Level::Error => Style::new().red().bold(),
        Level::Warning => Style::new().yellow().bold(),
        Level::Info => Style::new().blue().bold(),
    };
    eprintln!("{} {}", sev.apply_to(format!("[{}]", error.level())), Style::new().bold().apply_to(error.message()));
    if let Some(loc) = error.location() {
        eprintln!(" --> {}", loc);
    }
    eprintln!("{}", Style::new().dim().apply_to(format!("    ({})", error.issuer())));
}

/// Failure to write generated text or a report.
#[derive(Debug, Clone)]
pub struct OutputError {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot write {}: {}", self.path.display(), self.reason)
    }
}

impl std::error::Error for OutputError {}

impl PyzigErrorExt for OutputError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.to_string()
    }

    fn issuer(&self) -> String {
        "pyzig.cli.output".to_string()
    }

    fn span(&self) -> Option<Span> {
        None
    }

    fn location(&self) -> Option<Location> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(construct: &str) -> Diagnostic {
        Diagnostic::new(construct, format!("{} is not supported", construct), Some(Location::new("m.py".into(), 3, 4)))
    }

    #[test]
    fn counts_and_table_rows() {
        let mut report = BuildReport::default();
        report.push(FileReport {
            source: "a.json".into(),
            output: None,
            diagnostics: vec![diag("enumerate"), diag("Set")],
            closures: 0,
            error: None,
        });
        report.push(FileReport {
            source: "b.json".into(),
            output: None,
            diagnostics: Vec::new(),
            closures: 0,
            error: Some("bad json".into()),
        });
        assert_eq!(report.diagnostic_count(), 2);
        assert_eq!(report.failed_count(), 1);
        let table = report.diagnostics_table().unwrap().to_string();
        assert!(table.contains("enumerate"));
        assert!(table.contains("3:4"));
    }

    #[test]
    fn json_report_lists_files() {
        let mut report = BuildReport::default();
        report.push(FileReport {
            source: "a.json".into(),
            output: Some("a.zig".into()),
            diagnostics: vec![diag("enumerate")],
            closures: 1,
            error: None,
        });
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["files"][0]["source"], "a.json");
        assert_eq!(value["files"][0]["diagnostics"][0]["construct"], "enumerate");
        assert_eq!(value["files"][0]["diagnostics"][0]["location"]["line"], 3);
        assert!(BuildReport::default().diagnostics_table().is_none());
    }
}
