//! file: core/src/lower/diagnostics.rs
//! description: deferred diagnostics.
//!
//! An unsupported construct does not stop lowering. It is replaced by a
//! target construct that fails when the generated file is compiled, and a
//! `Diagnostic` value is recorded so the driver can report it up front.
//!
use serde::Serialize;

use super::strings::escape;
use crate::error::{Level, PyzigErrorExt};
use crate::location::{Location, Span};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Short name of the offending construct (`enumerate`, `Set`, ...).
    pub construct: String,
    pub message: String,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn new(construct: &str, message: String, location: Option<Location>) -> Self {
        Diagnostic { construct: construct.to_string(), message, location }
    }

    fn text(&self) -> String {
        match &self.location {
            Some(loc) => format!("pyzig: {} (at {})", self.message, loc),
            None => format!("pyzig: {}", self.message),
        }
    }

    /// Expression form, valid wherever a value is expected.
    pub fn expression(&self) -> String {
        format!("@compileError(\"{}\")", escape(&self.text()))
    }

    /// Statement form inside a function body.
    pub fn statement(&self) -> String {
        format!("{};", self.expression())
    }

    /// Top-level form for module-scope constructs.
    pub fn top_level(&self) -> String {
        format!("comptime {{\n    {};\n}}", self.expression())
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

impl PyzigErrorExt for Diagnostic {
    fn level(&self) -> Level {
        Level::Warning
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        format!("pyzig.lower.{}", self.construct)
    }

    fn span(&self) -> Option<Span> {
        None
    }

    fn location(&self) -> Option<Location> {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms_embed_escaped_message() {
        let d = Diagnostic::new("eval", "eval of \"x\" is not supported".into(), None);
        assert_eq!(d.expression(), "@compileError(\"pyzig: eval of \\\"x\\\" is not supported\")");
        assert!(d.top_level().starts_with("comptime {"));
        assert!(d.statement().ends_with(");"));
    }
}
