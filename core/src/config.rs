//! file: core/src/config.rs
//! description: per-session lowering options, loadable from JSON.
//!
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Level, PyzigErrorExt};
use crate::location::{Location, Span};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringConfig {
    /// Identifier of the allocator parameter threaded through every
    /// generated function.
    pub allocator: String,
    /// Name the runtime helper module is imported under.
    pub runtime_import: String,
    /// Path passed to `@import` for the runtime module.
    pub runtime_path: String,
    /// One level of indentation in the generated text.
    pub indent: String,
    /// Nesting depth past which lowering fails with a resource error.
    pub max_nesting_depth: usize,
    /// Emit `pub fn main` holding the module's top-level statements.
    pub emit_entry_point: bool,
    /// Source name reported in diagnostics.
    pub source_name: String,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        LoweringConfig {
            allocator: "allocator".to_string(),
            runtime_import: "runtime".to_string(),
            runtime_path: "runtime.zig".to_string(),
            indent: "    ".to_string(),
            max_nesting_depth: 256,
            emit_entry_point: true,
            source_name: "<module>".to_string(),
        }
    }
}

impl LoweringConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("cannot read config {}: {}", path.display(), e),
            location: None,
        })?;
        let cfg: LoweringConfig = serde_json::from_str(&text).map_err(|e| ConfigError {
            message: format!("invalid config {}: {}", path.display(), e),
            location: Some(Location::new(path.display().to_string(), e.line(), e.column())),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.allocator) {
            return Err(ConfigError::msg(format!("allocator '{}' is not an identifier", self.allocator)));
        }
        if !is_identifier(&self.runtime_import) {
            return Err(ConfigError::msg(format!(
                "runtime_import '{}' is not an identifier",
                self.runtime_import
            )));
        }
        if self.max_nesting_depth == 0 {
            return Err(ConfigError::msg("max_nesting_depth must be positive".into()));
        }
        if self.indent.chars().any(|c| c != ' ' && c != '\t') {
            return Err(ConfigError::msg("indent may only contain spaces or tabs".into()));
        }
        Ok(())
    }

    pub fn with_source_name(mut self, name: &str) -> Self {
        self.source_name = name.to_string();
        self
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub location: Option<Location>,
}

impl ConfigError {
    pub fn msg(message: String) -> Self {
        ConfigError { message, location: None }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl PyzigErrorExt for ConfigError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        "pyzig.config".to_string()
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
    fn partial_json_keeps_defaults() {
        let cfg: LoweringConfig = serde_json::from_str(r#"{"allocator": "alloc"}"#).unwrap();
        assert_eq!(cfg.allocator, "alloc");
        assert_eq!(cfg.runtime_import, "runtime");
        assert!(cfg.emit_entry_point);
    }

    #[test]
    fn rejects_non_identifier_allocator() {
        let cfg = LoweringConfig { allocator: "my alloc".into(), ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
