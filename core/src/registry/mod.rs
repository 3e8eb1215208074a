//! file: core/src/registry/mod.rs
//! description: import registry and stdlib shim catalog.
//!
//! The lowering engine consults two external collaborators when it meets a
//! module-qualified name: the `ImportRegistry` (which modules exist, and
//! which symbols map straight onto foreign functions) and the `ShimCatalog`
//! (templated target text for one library symbol). `StaticRegistry`
//! implements both from a `RegistryManifest`; the default manifest is
//! embedded in the crate and user manifests are merged over it.
//!
pub mod manifest;

use std::collections::HashMap;

use log::debug;

use crate::analyzers::InferredType;
pub use manifest::{ArgStrategy, FunctionMapping, ModuleSpec, RegistryError, RegistryManifest, ShimSpec};

const DEFAULT_MANIFEST: &str = include_str!("default_registry.json");

/// What the registry knows about an importable module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInfo {
    pub name: String,
    pub zig_import: Option<String>,
    pub c_headers: Vec<String>,
    shims: HashMap<String, ShimSpec>,
}

impl ModuleInfo {
    pub fn shim(&self, symbol: &str) -> Option<&ShimSpec> {
        self.shims.get(symbol)
    }

    pub fn is_foreign(&self) -> bool {
        !self.c_headers.is_empty()
    }
}

/// Environment substituted into shim templates.
#[derive(Debug, Clone, Copy)]
pub struct ShimEnv<'a> {
    pub allocator: &'a str,
    pub runtime: &'a str,
}

pub trait ImportRegistry {
    fn lookup(&self, module: &str) -> Option<&ModuleInfo>;
    fn should_map_function(&self, qualified: &str) -> Option<&FunctionMapping>;

    /// Result types of qualified library names, fed to type inference.
    fn result_types(&self) -> HashMap<String, InferredType> {
        HashMap::new()
    }
}

pub trait ShimCatalog {
    /// Target text for `module.symbol` applied to already-lowered
    /// arguments, or `None` when the symbol is unknown or the argument
    /// count does not fit.
    fn emit(&self, module: &str, symbol: &str, args: &[String], env: ShimEnv<'_>) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    modules: HashMap<String, ModuleInfo>,
    functions: HashMap<String, FunctionMapping>,
}

impl StaticRegistry {
    pub fn from_manifest(manifest: &RegistryManifest) -> Self {
        let mut registry = StaticRegistry::default();
        for spec in &manifest.modules {
            let shims = spec.shims.iter().map(|s| (s.symbol.clone(), s.clone())).collect();
            for func in &spec.functions {
                registry.functions.insert(format!("{}.{}", spec.name, func.symbol), func.clone());
            }
            registry.modules.insert(
                spec.name.clone(),
                ModuleInfo {
                    name: spec.name.clone(),
                    zig_import: spec.zig_import.clone(),
                    c_headers: spec.c_headers.clone(),
                    shims,
                },
            );
        }
        debug!(
            "registry: {} modules, {} foreign functions",
            registry.modules.len(),
            registry.functions.len()
        );
        registry
    }

    /// The embedded default manifest.
    pub fn builtin() -> Result<Self, RegistryError> {
        let manifest = RegistryManifest::from_json(DEFAULT_MANIFEST, "default_registry.json")?;
        Ok(Self::from_manifest(&manifest))
    }

    /// The embedded manifest with each of `overlays` merged over it in order.
    pub fn with_overlays(overlays: Vec<RegistryManifest>) -> Result<Self, RegistryError> {
        let mut manifest = RegistryManifest::from_json(DEFAULT_MANIFEST, "default_registry.json")?;
        for overlay in overlays {
            manifest.merge(overlay);
        }
        manifest.validate()?;
        Ok(Self::from_manifest(&manifest))
    }

    /// Result type of every qualified library symbol, for type inference.
    pub fn return_types(&self) -> HashMap<String, InferredType> {
        let mut out = HashMap::new();
        for module in self.modules.values() {
            for (symbol, shim) in &module.shims {
                let ty = shim.returns.as_deref().map(InferredType::from_type_name).unwrap_or(InferredType::Unknown);
                out.insert(format!("{}.{}", module.name, symbol), ty);
            }
        }
        for (qualified, func) in &self.functions {
            let ty = func.returns.as_deref().map(InferredType::from_type_name).unwrap_or(InferredType::Unknown);
            out.insert(qualified.clone(), ty);
        }
        out
    }

    /// Split `a.b.c` into the longest registered module prefix and the
    /// remaining symbol.
    pub fn split_qualified<'q>(&self, qualified: &'q str) -> Option<(&'q str, &'q str)> {
        let mut cut = qualified.len();
        while let Some(pos) = qualified[..cut].rfind('.') {
            let (module, symbol) = (&qualified[..pos], &qualified[pos + 1..]);
            if self.modules.contains_key(module) {
                return Some((module, symbol));
            }
            cut = pos;
        }
        None
    }
}

impl ImportRegistry for StaticRegistry {
    fn lookup(&self, module: &str) -> Option<&ModuleInfo> {
        self.modules.get(module)
    }

    fn should_map_function(&self, qualified: &str) -> Option<&FunctionMapping> {
        self.functions.get(qualified)
    }

    fn result_types(&self) -> HashMap<String, InferredType> {
        self.return_types()
    }
}

impl ShimCatalog for StaticRegistry {
    fn emit(&self, module: &str, symbol: &str, args: &[String], env: ShimEnv<'_>) -> Option<String> {
        let shim = self.modules.get(module)?.shim(symbol)?;
        if shim.arity.is_some_and(|n| n != args.len()) {
            return None;
        }
        Some(render_template(&shim.template, args, env))
    }
}

pub fn render_template(template: &str, args: &[String], env: ShimEnv<'_>) -> String {
    let mut out = template
        .replace("{allocator}", env.allocator)
        .replace("{runtime}", env.runtime)
        .replace("{args}", &args.join(", "));
    // highest index first so `{1}` never clobbers part of `{10}`
    for (i, arg) in args.iter().enumerate().rev() {
        out = out.replace(&format!("{{{}}}", i), arg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> ShimEnv<'static> {
        ShimEnv { allocator: "allocator", runtime: "runtime" }
    }

    #[test]
    fn builtin_manifest_loads() {
        let reg = StaticRegistry::builtin().unwrap();
        assert!(reg.lookup("math").is_some());
        assert!(reg.should_map_function("libc.abs").is_some());
        assert_eq!(reg.return_types().get("math.sqrt"), Some(&InferredType::Float));
    }

    #[test]
    fn shim_templates_substitute_arguments() {
        let reg = StaticRegistry::builtin().unwrap();
        let text = reg.emit("math", "pow", &["x".to_string(), "2.0".to_string()], env());
        assert_eq!(text.as_deref(), Some("std.math.pow(f64, x, 2.0)"));
        assert_eq!(reg.emit("math", "pow", &["x".to_string()], env()), None);
        let q = reg.emit("queue", "Queue", &[], env());
        assert_eq!(q.as_deref(), Some("runtime.Queue.init(allocator)"));
    }

    #[test]
    fn longest_module_prefix_wins() {
        let reg = StaticRegistry::builtin().unwrap();
        assert_eq!(reg.split_qualified("math.sqrt"), Some(("math", "sqrt")));
        assert_eq!(reg.split_qualified("nope.sqrt"), None);
    }
}
