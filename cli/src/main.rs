mod disassembler;
mod logger;
mod report;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{debug, info};

use pyzig_core::error::boxed;
use pyzig_core::script::MissingSourceError;
use pyzig_core::{
    LoweringConfig, PyzigErrorExt, RegistryManifest, Script, StaticRegistry, compile_eval_source, compile_script,
    deserialize, discover_sources, evaluate,
};
use report::{BuildReport, FileReport, OutputError, print_error, progress_bar};

type CliResult<T> = Result<T, Box<dyn PyzigErrorExt>>;

fn main() {
    let cli = Command::new("pyzig")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Lower Python module ASTs to Zig source");

    let cli = setup_cli(cli);
    let matches = cli.get_matches();

    let verbosity = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");
    if let Err(e) = logger::init(verbosity, quiet) {
        eprintln!("cannot install logger: {}", e);
    }

    std::process::exit(dispatch_commands(&matches));
}

/// Sets up the CLI with subcommands and arguments.
fn setup_cli(cli: Command) -> Command {
    cli.arg(
        Arg::new("verbose")
            .help("Increase log output (repeat for more)")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .global(true),
    )
    .arg(
        Arg::new("quiet")
            .help("Silence logs, progress and the diagnostics table")
            .short('q')
            .long("quiet")
            .action(ArgAction::SetTrue)
            .global(true),
    )
    .subcommand(
        Command::new("build")
            .about("Lower one or more module AST files (JSON) to Zig")
            .arg(
                Arg::new("inputs")
                    .help("AST files or glob patterns")
                    .required(true)
                    .num_args(1..)
                    .value_parser(clap::value_parser!(String)),
            )
            .arg(
                Arg::new("output")
                    .help("Output file, or output directory when several inputs are given")
                    .short('o')
                    .long("output")
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_name("PATH"),
            )
            .arg(
                Arg::new("config")
                    .help("Lowering configuration (JSON)")
                    .short('c')
                    .long("config")
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_name("FILE"),
            )
            .arg(
                Arg::new("registry")
                    .help("Import registry manifest merged over the built-in one")
                    .short('r')
                    .long("registry")
                    .action(ArgAction::Append)
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_name("FILE"),
            )
            .arg(
                Arg::new("report")
                    .help("Write a JSON build report")
                    .long("report")
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_name("FILE"),
            )
            .arg(
                Arg::new("no-main")
                    .help("Do not emit the `main` entry point")
                    .long("no-main")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("strict")
                    .help("Exit with status 2 when any deferred diagnostic was produced")
                    .long("strict")
                    .action(ArgAction::SetTrue),
            ),
    )
    .subcommand(
        Command::new("eval")
            .about("Compile and evaluate an expression in the bytecode subset")
            .arg(
                Arg::new("expression")
                    .help("The expression source")
                    .required(true)
                    .index(1),
            )
            .arg(
                Arg::new("emit")
                    .help("Write the serialized program to a file")
                    .short('e')
                    .long("emit")
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_name("FILE"),
            )
            .arg(
                Arg::new("disasm")
                    .help("Print the program listing before the result")
                    .short('d')
                    .long("disasm")
                    .action(ArgAction::SetTrue),
            ),
    )
    .subcommand(
        Command::new("disasm")
            .about("Disassemble a serialized bytecode program")
            .arg(
                Arg::new("file")
                    .help("The program file")
                    .required(true)
                    .index(1)
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("run")
                    .help("Also evaluate the program")
                    .long("run")
                    .action(ArgAction::SetTrue),
            ),
    )
}

/// Dispatches the command based on the parsed arguments and returns the
/// process exit status.
fn dispatch_commands(matches: &ArgMatches) -> i32 {
    let quiet = matches.get_flag("quiet");
    let outcome = match matches.subcommand() {
        Some(("build", sub_m)) => run_build(sub_m, quiet),
        Some(("eval", sub_m)) => run_eval(sub_m),
        Some(("disasm", sub_m)) => run_disasm(sub_m),
        _ => {
            eprintln!("No valid subcommand was used. Use --help for more information.");
            Ok(2)
        }
    };
    match outcome {
        Ok(code) => code,
        Err(e) => {
            print_error(e.as_ref());
            1
        }
    }
}

// ------- build -------

fn run_build(sub_m: &ArgMatches, quiet: bool) -> CliResult<i32> {
    let mut config = match sub_m.get_one::<PathBuf>("config") {
        Some(path) => LoweringConfig::load_from_file(path).map_err(boxed)?,
        None => LoweringConfig::default(),
    };
    if sub_m.get_flag("no-main") {
        config.emit_entry_point = false;
    }
    let registry = load_registry(sub_m)?;

    let patterns: Vec<&String> = sub_m.get_many::<String>("inputs").into_iter().flatten().collect();
    let inputs = resolve_inputs(&patterns)?;
    let output = sub_m.get_one::<PathBuf>("output");
    let into_dir = inputs.len() > 1 || output.is_some_and(|p| p.is_dir());
    info!("building {} file(s)", inputs.len());

    let bar = progress_bar(inputs.len(), quiet);
    let mut report = BuildReport::default();
    for path in &inputs {
        let source = path.display().to_string();
        bar.set_message(source.clone());
        let lowered = Script::new(path.clone()).and_then(|script| compile_script(&script, &config, &registry));
        match lowered {
            Ok(module) => {
                let target = match output {
                    Some(out) if into_dir => Some(out.join(format!("{}.zig", module_stem(path)))),
                    Some(out) => Some(out.clone()),
                    None if into_dir => Some(path.with_extension("zig")),
                    None => None,
                };
                match &target {
                    Some(target) => write_text(target, &module.text)?,
                    None => print!("{}", module.text),
                }
                debug!("{} -> {:?}", source, target);
                report.push(FileReport::lowered(&source, &module, target.map(|t| t.display().to_string())));
            }
            Err(e) => {
                bar.suspend(|| print_error(e.as_ref()));
                report.push(FileReport::failed(&source, e.as_ref()));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if !quiet {
        if let Some(table) = report.diagnostics_table() {
            eprintln!("{}", table);
        }
        report.print_summary();
    }
    if let Some(path) = sub_m.get_one::<PathBuf>("report") {
        let json = report
            .to_json()
            .map_err(|e| boxed(OutputError { path: path.clone(), reason: e.to_string() }))?;
        write_text(path, &json)?;
    }

    if report.failed_count() > 0 {
        Ok(1)
    } else if sub_m.get_flag("strict") && report.diagnostic_count() > 0 {
        Ok(2)
    } else {
        Ok(0)
    }
}

fn load_registry(sub_m: &ArgMatches) -> CliResult<StaticRegistry> {
    let mut overlays = Vec::new();
    for path in sub_m.get_many::<PathBuf>("registry").into_iter().flatten() {
        overlays.push(RegistryManifest::load_from_file(path).map_err(boxed)?);
    }
    if overlays.is_empty() {
        StaticRegistry::builtin().map_err(boxed)
    } else {
        StaticRegistry::with_overlays(overlays).map_err(boxed)
    }
}

/// Plain paths are taken as given; anything with glob metacharacters is
/// expanded and must match at least one file.
fn resolve_inputs(patterns: &[&String]) -> CliResult<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for pattern in patterns {
        if pattern.contains(['*', '?', '[']) {
            let found = discover_sources(pattern)?;
            if found.is_empty() {
                return Err(boxed(MissingSourceError {
                    path: PathBuf::from(pattern.as_str()),
                    reason: "pattern matched no files".to_string(),
                }));
            }
            inputs.extend(found);
        } else {
            inputs.push(PathBuf::from(pattern.as_str()));
        }
    }
    inputs.dedup();
    Ok(inputs)
}

fn module_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "module".to_string())
}

fn write_text(path: &Path, text: &str) -> CliResult<()> {
    let fail = |e: std::io::Error| boxed(OutputError { path: path.to_path_buf(), reason: e.to_string() });
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(fail)?;
    }
    fs::write(path, text).map_err(fail)
}

// ------- eval / disasm -------

fn run_eval(sub_m: &ArgMatches) -> CliResult<i32> {
    let Some(source) = sub_m.get_one::<String>("expression") else {
        return Ok(2);
    };
    let bytes = compile_eval_source(source, "<eval>")?;
    if let Some(path) = sub_m.get_one::<PathBuf>("emit") {
        fs::write(path, &bytes).map_err(|e| boxed(OutputError { path: path.clone(), reason: e.to_string() }))?;
    }
    if sub_m.get_flag("disasm") {
        print!("{}", disassembler::disassemble(&bytes).map_err(boxed)?);
    }
    let program = deserialize(&bytes).map_err(boxed)?;
    let value = evaluate(&program).map_err(boxed)?;
    println!("{}", value);
    Ok(0)
}

fn run_disasm(sub_m: &ArgMatches) -> CliResult<i32> {
    let Some(path) = sub_m.get_one::<PathBuf>("file") else {
        return Ok(2);
    };
    let bytes = fs::read(path).map_err(|e| {
        boxed(MissingSourceError { path: path.clone(), reason: e.to_string() })
    })?;
    print!("{}", disassembler::disassemble(&bytes).map_err(boxed)?);
    if sub_m.get_flag("run") {
        let program = deserialize(&bytes).map_err(boxed)?;
        println!("Result: {}", evaluate(&program).map_err(boxed)?);
    }
    Ok(0)
}
