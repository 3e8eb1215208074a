use pyzig_core::ast::BinOperator;
use pyzig_core::ast::build::*;
use pyzig_core::error::Level;
use pyzig_core::{LoweringConfig, PyzigErrorExt, Script, StaticRegistry, compile_module, compile_script};

const ENUMERATE_AST: &str = r#"{
  "body": [
    {
      "type": "Assign",
      "targets": [{"type": "Name", "id": "pairs"}],
      "value": {
        "type": "Call",
        "func": {"type": "Name", "id": "enumerate"},
        "args": [{"type": "List", "elts": [{"type": "Constant", "value": 1}]}]
      },
      "location": {"line": 4, "column": 8}
    }
  ]
}"#;

fn registry() -> StaticRegistry {
    StaticRegistry::builtin().expect("builtin registry")
}

#[test]
fn rejected_builtin_is_deferred_with_location() {
    let script = Script::from_text("pairs.json", ENUMERATE_AST.to_string());
    let out = match compile_script(&script, &LoweringConfig::default(), &registry()) {
        Ok(out) => out,
        Err(e) => panic!("lowering failed: {}", e.message()),
    };
    assert_eq!(out.diagnostics.len(), 1);
    let diag = &out.diagnostics[0];
    assert_eq!(diag.construct, "Call");
    assert_eq!(diag.message, "enumerate() is only supported as a for-loop iterable");
    let loc = diag.location.as_ref().expect("location");
    assert_eq!(loc.file, "pairs.json");
    assert_eq!(loc.line, 4);
    // the construct stays in the output and fails the native build
    assert!(out.text.contains("@compileError(\"pyzig: enumerate() is only supported as a for-loop iterable"));
}

#[test]
fn set_literal_and_lowering_continues() {
    let m = module(vec![def(
        "f",
        vec![],
        vec![assign("s", set(vec![int(1), int(2)])), print(vec![int(3)])],
    )]);
    let out = match compile_module(&m, &LoweringConfig::default(), &registry()) {
        Ok(out) => out,
        Err(e) => panic!("lowering failed: {}", e.message()),
    };
    assert!(out.diagnostics.iter().any(|d| d.construct == "Set"));
    assert!(out.text.contains("@compileError(\"pyzig: set values are not supported"));
    // statements after the offending one are still lowered
    assert!(out.text.contains(".{ 3 }"));
}

#[test]
fn diagnostics_accumulate_in_source_order() {
    let m = module(vec![def(
        "f",
        vec![],
        vec![
            expr_stmt(set(vec![int(1)])),
            expr_stmt(call_name("enumerate", vec![list(vec![int(1)])])),
        ],
    )]);
    let out = match compile_module(&m, &LoweringConfig::default(), &registry()) {
        Ok(out) => out,
        Err(e) => panic!("lowering failed: {}", e.message()),
    };
    let constructs: Vec<&str> = out.diagnostics.iter().map(|d| d.construct.as_str()).collect();
    assert_eq!(constructs, vec!["Set", "Call"]);
}

#[test]
fn nesting_past_the_limit_is_fatal() {
    let mut deep = int(0);
    for i in 1..10 {
        deep = binop(deep, BinOperator::Add, int(i));
    }
    let m = module(vec![def("f", vec![], vec![ret(Some(deep))])]);
    let config = LoweringConfig { max_nesting_depth: 4, ..LoweringConfig::default() };
    let err = match compile_module(&m, &config, &registry()) {
        Ok(_) => panic!("lowering should fail"),
        Err(e) => e,
    };
    assert_eq!(err.message(), "nesting deeper than 4 levels");
    assert_eq!(err.level(), Level::Critical);

    // the same module is fine under the default limit
    assert!(compile_module(&m, &LoweringConfig::default(), &registry()).is_ok());
}

#[test]
fn invalid_configuration_is_rejected_before_lowering() {
    let m = module(vec![]);
    let config = LoweringConfig { allocator: "not an ident".to_string(), ..LoweringConfig::default() };
    let err = match compile_module(&m, &config, &registry()) {
        Ok(_) => panic!("config should be rejected"),
        Err(e) => e,
    };
    assert!(err.message().contains("allocator"));
}

#[test]
fn malformed_ast_is_a_load_error() {
    let script = Script::from_text("bad.json", r#"{"body": [{"type": "NotANode"}]}"#.to_string());
    let err = match compile_script(&script, &LoweringConfig::default(), &registry()) {
        Ok(_) => panic!("decoding should fail"),
        Err(e) => e,
    };
    assert!(err.location().is_some_and(|l| l.file == "bad.json"));
}
