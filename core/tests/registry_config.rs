use std::io::Write;

use pyzig_core::ast::build::*;
use pyzig_core::registry::{ImportRegistry, ShimCatalog, ShimEnv};
use pyzig_core::{LoweringConfig, PyzigErrorExt, RegistryManifest, StaticRegistry, compile_module};

const OVERLAY: &str = r#"{
  "modules": [
    {
      "name": "math",
      "shims": [{ "symbol": "sqrt", "template": "std.math.sqrt({0})", "returns": "float", "arity": 1 }]
    },
    {
      "name": "stats",
      "zig_import": "stats.zig",
      "shims": [{ "symbol": "mean", "template": "{runtime}.mean({allocator}, {0})", "returns": "float" }]
    }
  ]
}"#;

fn env() -> ShimEnv<'static> {
    ShimEnv { allocator: "allocator", runtime: "runtime" }
}

fn root_module() -> pyzig_core::Module {
    module(vec![
        import("math", None),
        def_returning(
            "root",
            vec![typed_arg("x", "float")],
            name("float"),
            vec![ret(Some(method(name("math"), "sqrt", vec![name("x")])))],
        ),
    ])
}

fn write_temp(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write temp file");
    file
}

#[test]
fn builtin_shims_drive_library_calls() {
    let registry = StaticRegistry::builtin().expect("builtin registry");
    let out = match compile_module(&root_module(), &LoweringConfig::default(), &registry) {
        Ok(out) => out,
        Err(e) => panic!("lowering failed: {}", e.message()),
    };
    assert!(out.text.contains("return @sqrt(@as(f64, x));"));
    assert!(out.diagnostics.is_empty());
}

#[test]
fn overlays_replace_and_add_symbols() {
    let overlay = RegistryManifest::from_json(OVERLAY, "overlay.json").expect("overlay parses");
    let registry = StaticRegistry::with_overlays(vec![overlay]).expect("overlay merges");

    let stats = registry.lookup("stats").expect("stats module");
    assert_eq!(stats.zig_import.as_deref(), Some("stats.zig"));
    assert_eq!(
        registry.emit("stats", "mean", &["xs".to_string()], env()).as_deref(),
        Some("runtime.mean(allocator, xs)")
    );
    // untouched builtin modules survive the merge
    assert!(registry.lookup("random").is_some());

    let out = match compile_module(&root_module(), &LoweringConfig::default(), &registry) {
        Ok(out) => out,
        Err(e) => panic!("lowering failed: {}", e.message()),
    };
    assert!(out.text.contains("return std.math.sqrt(x);"));
}

#[test]
fn manifest_loads_from_disk_and_rejects_bad_input() {
    let file = write_temp(OVERLAY);
    let manifest = RegistryManifest::load_from_file(file.path()).expect("manifest loads");
    assert_eq!(manifest.modules.len(), 2);

    let err = RegistryManifest::from_json("{\"modules\": [", "broken.json").unwrap_err();
    assert!(err.location().is_some_and(|l| l.file == "broken.json"));

    let dup = r#"{"modules": [{"name": "m"}, {"name": "m"}]}"#;
    let err = RegistryManifest::from_json(dup, "dup.json").unwrap_err();
    assert!(err.message().contains("duplicate module 'm'"));

    let nameless = r#"{"modules": [{"name": "m", "functions": [{"symbol": "f", "native_name": " "}]}]}"#;
    assert!(RegistryManifest::from_json(nameless, "nameless.json").is_err());

    assert!(RegistryManifest::load_from_file("/definitely/not/here.json").is_err());
}

#[test]
fn config_file_overrides_only_the_given_fields() {
    let file = write_temp(r#"{"allocator": "alloc", "indent": "\t", "emit_entry_point": false}"#);
    let config = match LoweringConfig::load_from_file(file.path()) {
        Ok(config) => config,
        Err(e) => panic!("config failed: {}", e.message()),
    };
    assert_eq!(config.allocator, "alloc");
    assert_eq!(config.indent, "\t");
    assert!(!config.emit_entry_point);
    assert_eq!(config.runtime_import, "runtime");
    assert_eq!(config.max_nesting_depth, 256);

    let registry = StaticRegistry::builtin().expect("builtin registry");
    let out = match compile_module(&root_module(), &config, &registry) {
        Ok(out) => out,
        Err(e) => panic!("lowering failed: {}", e.message()),
    };
    assert!(out.text.contains("fn root(alloc: std.mem.Allocator, x: f64) anyerror!f64 {\n\t_ = alloc;"));
    assert!(!out.text.contains("pub fn main"));
}

#[test]
fn invalid_config_files_are_rejected() {
    let zero_depth = write_temp(r#"{"max_nesting_depth": 0}"#);
    assert!(LoweringConfig::load_from_file(zero_depth.path()).is_err());

    let bad_json = write_temp("{ allocator: ");
    let err = match LoweringConfig::load_from_file(bad_json.path()) {
        Ok(_) => panic!("config should be rejected"),
        Err(e) => e,
    };
    assert!(err.location().is_some());

    assert!(LoweringConfig::load_from_file("/definitely/not/here.json").is_err());
}
