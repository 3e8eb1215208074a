//! file: core/src/registry/manifest.rs
//! description: JSON manifest describing importable library modules.
//!
//! A manifest lists modules by their source-level name. Each module may
//! carry shim symbols (templated target text for one library symbol) and
//! foreign-function mappings (a direct call into a C symbol with a declared
//! conversion per argument).
//!
//! Shim templates substitute `{0}`, `{1}`, ... with the lowered arguments,
//! `{args}` with all of them comma separated, `{allocator}` with the session
//! allocator and `{runtime}` with the runtime import name.
//!
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Level, PyzigErrorExt};
use crate::location::{Location, Span};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShimSpec {
    pub symbol: String,
    pub template: String,
    /// Type name of the produced value (`int`, `str`, `list[float]`, ...).
    #[serde(default)]
    pub returns: Option<String>,
    /// Exact argument count; `None` accepts any.
    #[serde(default)]
    pub arity: Option<usize>,
    /// Module attribute rather than a function (`math.pi`).
    #[serde(default)]
    pub constant: bool,
    /// The produced value is heap memory the caller must free.
    #[serde(default)]
    pub owned: bool,
    /// The produced expression can fail and needs error propagation.
    #[serde(default)]
    pub fallible: bool,
}

/// How one argument is converted before a foreign call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ArgStrategy {
    /// Pass the lowered argument through unchanged.
    Direct,
    /// Extract a field path from the argument (`.ptr`, `.items.ptr`).
    FieldPath { path: String },
    /// Wrap the argument with a template containing `{arg}`.
    Custom { template: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMapping {
    pub symbol: String,
    /// Target-side callee, e.g. `c.abs`.
    pub native_name: String,
    #[serde(default)]
    pub args: Vec<ArgStrategy>,
    #[serde(default)]
    pub returns: Option<String>,
}

impl FunctionMapping {
    /// Strategy for argument `index`; arguments past the declared list pass
    /// through directly.
    pub fn strategy(&self, index: usize) -> &ArgStrategy {
        self.args.get(index).unwrap_or(&ArgStrategy::Direct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    /// Extra target import line needed when the module is used.
    #[serde(default)]
    pub zig_import: Option<String>,
    /// C headers pulled in through `@cImport` for foreign mappings.
    #[serde(default)]
    pub c_headers: Vec<String>,
    #[serde(default)]
    pub shims: Vec<ShimSpec>,
    #[serde(default)]
    pub functions: Vec<FunctionMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryManifest {
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl RegistryManifest {
    pub fn from_json(text: &str, origin: &str) -> Result<Self, RegistryError> {
        let manifest: RegistryManifest = serde_json::from_str(text).map_err(|e| RegistryError {
            message: format!("invalid registry manifest: {}", e),
            location: Some(Location::new(origin.to_string(), e.line(), e.column())),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RegistryError {
            message: format!("cannot read registry manifest {}: {}", path.display(), e),
            location: None,
        })?;
        Self::from_json(&text, &path.display().to_string())
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut seen_modules = HashSet::new();
        for module in &self.modules {
            if module.name.trim().is_empty() {
                return Err(RegistryError::msg("module name is empty".into()));
            }
            if !seen_modules.insert(module.name.as_str()) {
                return Err(RegistryError::msg(format!("duplicate module '{}'", module.name)));
            }
            let mut seen = HashSet::new();
            for shim in &module.shims {
                if !seen.insert(shim.symbol.as_str()) {
                    return Err(RegistryError::msg(format!(
                        "duplicate symbol '{}.{}'",
                        module.name, shim.symbol
                    )));
                }
            }
            for func in &module.functions {
                if !seen.insert(func.symbol.as_str()) {
                    return Err(RegistryError::msg(format!(
                        "duplicate symbol '{}.{}'",
                        module.name, func.symbol
                    )));
                }
                if func.native_name.trim().is_empty() {
                    return Err(RegistryError::msg(format!(
                        "'{}.{}' has no native name",
                        module.name, func.symbol
                    )));
                }
            }
        }
        Ok(())
    }

    /// Overlay `other` on top of this manifest: modules with the same name
    /// are merged symbol by symbol, `other` winning on conflicts.
    pub fn merge(&mut self, other: RegistryManifest) {
        for incoming in other.modules {
            match self.modules.iter_mut().find(|m| m.name == incoming.name) {
                Some(existing) => {
                    if incoming.zig_import.is_some() {
                        existing.zig_import = incoming.zig_import;
                    }
                    for header in incoming.c_headers {
                        if !existing.c_headers.contains(&header) {
                            existing.c_headers.push(header);
                        }
                    }
                    for shim in incoming.shims {
                        existing.shims.retain(|s| s.symbol != shim.symbol);
                        existing.functions.retain(|f| f.symbol != shim.symbol);
                        existing.shims.push(shim);
                    }
                    for func in incoming.functions {
                        existing.shims.retain(|s| s.symbol != func.symbol);
                        existing.functions.retain(|f| f.symbol != func.symbol);
                        existing.functions.push(func);
                    }
                }
                None => self.modules.push(incoming),
            }
        }
    }
}

pub struct RegistryError {
    message: String,
    location: Option<Location>,
}

impl RegistryError {
    pub fn msg(message: String) -> Self {
        RegistryError { message, location: None }
    }
}

impl fmt::Debug for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistryError: {}", self.message)
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} (at {})", self.message, loc),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RegistryError {}

impl PyzigErrorExt for RegistryError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        "pyzig.registry".to_string()
    }

    fn span(&self) -> Option<Span> {
        None
    }

    fn location(&self) -> Option<Location> {
        self.location.clone()
    }
}
