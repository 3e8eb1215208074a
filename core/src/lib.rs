pub mod analyzers;
pub mod ast;
pub mod bytecode;
pub mod config;
pub mod error;
pub mod location;
pub mod lower;
pub mod registry;
pub mod script;

pub use ast::{Module, parse_module_json};
pub use bytecode::{BytecodeConstant, BytecodeProgram, compile_expr, deserialize, evaluate, serialize};
pub use config::LoweringConfig;
pub use error::{Level, PyzigErrorExt};
pub use location::{Location, Span};
pub use lower::{Diagnostic, LoweredModule, LoweringError, lower_module};
pub use registry::{RegistryManifest, StaticRegistry};
pub use script::{Script, discover_sources};

use error::boxed;

pub fn generate_error_report(error: &dyn PyzigErrorExt) -> String {
    let level = error.level();
    let location = match error.location() {
        Some(loc) => loc.to_string(),
        None => "unknown location".to_string(),
    };
    let message = error.message();

    format!("PYZIG | {} | {} | {}", level, location, message)
}

/// Lower an already decoded module.
pub fn compile_module(
    module: &Module,
    config: &LoweringConfig,
    registry: &StaticRegistry,
) -> Result<LoweredModule, Box<dyn PyzigErrorExt>> {
    config.validate().map_err(boxed)?;
    lower_module(module, config, registry, registry).map_err(boxed)
}

/// Decode and lower the module AST held by `script`. Diagnostics carry the
/// script's name unless the configuration names the source explicitly.
pub fn compile_script(
    script: &Script,
    config: &LoweringConfig,
    registry: &StaticRegistry,
) -> Result<LoweredModule, Box<dyn PyzigErrorExt>> {
    let module = ast::generate_ast_from_source(script)?;
    let config = if config.source_name == LoweringConfig::default().source_name {
        config.clone().with_source_name(&script.name)
    } else {
        config.clone()
    };
    compile_module(&module, &config, registry)
}

/// Compile an `eval` source string to its serialized bytecode envelope.
pub fn compile_eval_source(source: &str, file: &str) -> Result<Vec<u8>, Box<dyn PyzigErrorExt>> {
    let expr = ast::parse_eval_source(source, file).map_err(boxed)?;
    let program = compile_expr(&expr).map_err(boxed)?;
    Ok(serialize(&program))
}
