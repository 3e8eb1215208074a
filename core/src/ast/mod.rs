pub mod build;
pub mod err;
pub mod kind;
pub mod node;
pub mod rules;

pub use crate::error::PyzigErrorExt;
pub use err::{AstLoadError, SyntaxError};
pub use kind::{BinOperator, BoolOperator, CmpOperator, UnaryOperator};
pub use node::{
    Alias, Arg, Comprehension, Constant, ExceptHandler, Expr, ExprKind, Keyword, Module, Stmt,
    StmtKind, WithItem,
};
pub use rules::{EvalParser, Rule, parse_eval_source};

use crate::script::Script;

/// Decode a module AST from its JSON text.
pub fn parse_module_json(text: &str, file: &str) -> Result<Module, AstLoadError> {
    serde_json::from_str::<Module>(text).map_err(|e| AstLoadError::from_json(file, &e))
}

/// Decode the module held by `script`.
pub fn generate_ast_from_source(script: &Script) -> Result<Module, Box<dyn PyzigErrorExt>> {
    let module = parse_module_json(&script.content, &script.name).map_err(crate::error::boxed)?;
    log::debug!("loaded {} top-level statements from {}", module.body.len(), script.name);
    Ok(module)
}
