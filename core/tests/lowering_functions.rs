use pyzig_core::ast::BinOperator;
use pyzig_core::ast::build::*;
use pyzig_core::{LoweredModule, LoweringConfig, Module, PyzigErrorExt, StaticRegistry, compile_module};

fn lower(m: &Module) -> LoweredModule {
    lower_with(m, &LoweringConfig::default())
}

fn lower_with(m: &Module, config: &LoweringConfig) -> LoweredModule {
    let registry = StaticRegistry::builtin().expect("builtin registry");
    match compile_module(m, config, &registry) {
        Ok(lowered) => lowered,
        Err(e) => panic!("lowering failed: {}", e.message()),
    }
}

fn add_function() -> pyzig_core::ast::Stmt {
    def_returning(
        "add",
        vec![typed_arg("a", "int"), typed_arg("b", "int")],
        name("int"),
        vec![ret(Some(binop(name("a"), BinOperator::Add, name("b"))))],
    )
}

#[test]
fn module_starts_with_std_and_runtime_imports() {
    let out = lower(&module(vec![]));
    let mut lines = out.text.lines();
    assert_eq!(lines.next(), Some("const std = @import(\"std\");"));
    assert_eq!(lines.next(), Some("const runtime = @import(\"runtime.zig\");"));
    assert!(out.diagnostics.is_empty());
    assert!(out.closures.is_empty());
}

#[test]
fn typed_function_gets_allocator_and_native_types() {
    let out = lower(&module(vec![add_function()]));
    assert!(out.text.contains("fn add(allocator: std.mem.Allocator, a: i64, b: i64) anyerror!i64 {"));
    assert!(out.text.contains("_ = allocator;"));
    assert!(out.text.contains("return (a + b);"));
}

#[test]
fn top_level_statements_run_inside_main() {
    let out = lower(&module(vec![
        add_function(),
        assign("total", call_name("add", vec![int(2), int(3)])),
        print(vec![name("total")]),
    ]));
    assert!(out.text.contains("pub fn main() !void {"));
    assert!(out.text.contains("var gpa = std.heap.GeneralPurposeAllocator(.{}){};"));
    assert!(out.text.contains("const allocator = gpa.allocator();"));
    assert!(out.text.contains("try add(allocator, 2, 3)"));
    assert!(out.text.contains("print(\"{d}\\n\", .{ total })"));
    // definitions come before the entry point
    let def_at = out.text.find("fn add(").unwrap();
    let main_at = out.text.find("pub fn main()").unwrap();
    assert!(def_at < main_at);
}

#[test]
fn literal_module_assignments_become_constants() {
    let out = lower(&module(vec![assign("LIMIT", int(10))]));
    assert!(out.text.contains("const LIMIT: i64 = 10;"));
}

#[test]
fn entry_point_can_be_disabled() {
    let config = LoweringConfig { emit_entry_point: false, ..LoweringConfig::default() };
    let out = lower_with(&module(vec![add_function(), print(vec![int(1)])]), &config);
    assert!(out.text.contains("fn add("));
    assert!(!out.text.contains("pub fn main()"));
}

#[test]
fn user_main_is_renamed() {
    let out = lower(&module(vec![def("main", vec![], vec![print(vec![int(1)])])]));
    assert!(out.text.contains("fn py_main(allocator: std.mem.Allocator) anyerror!void {"));
    assert!(out.text.contains("pub fn main() !void {"));
}

#[test]
fn string_concatenation_allocates() {
    let config = LoweringConfig { emit_entry_point: false, ..LoweringConfig::default() };
    let out = lower_with(&module(vec![def_returning(
        "greet",
        vec![typed_arg("who", "str")],
        name("str"),
        vec![ret(Some(binop(string("hi "), BinOperator::Add, name("who"))))],
    )]), &config);
    assert!(out.text.contains("anyerror![]const u8 {"));
    assert!(out.text.contains("who: []const u8"));
    assert!(out.text.contains("try std.mem.concat(allocator, u8, &.{"));
    assert!(!out.text.contains("_ = allocator;"));
}

#[test]
fn configured_allocator_name_is_used_everywhere() {
    let config = LoweringConfig { allocator: "gpa_alloc".to_string(), ..LoweringConfig::default() };
    let out = lower_with(&module(vec![add_function()]), &config);
    assert!(out.text.contains("fn add(gpa_alloc: std.mem.Allocator, a: i64, b: i64)"));
    assert!(out.text.contains("_ = gpa_alloc;"));
}

#[test]
fn returned_nested_function_is_hoisted_as_closure() {
    let out = lower(&module(vec![def(
        "make_adder",
        vec![typed_arg("n", "int")],
        vec![
            def_returning(
                "add",
                vec![typed_arg("x", "int")],
                name("int"),
                vec![ret(Some(binop(name("x"), BinOperator::Add, name("n"))))],
            ),
            ret(Some(name("add"))),
        ],
    )]));
    assert_eq!(out.closures.len(), 1);
    let record = &out.closures[0];
    assert_eq!(record.synthesized_name, "__Closure_make_adder_add");
    assert_eq!(record.captured_vars, vec!["n".to_string()]);
    assert!(out.text.contains("const __Closure_make_adder_add = struct {"));
    assert!(out.text.contains("anyerror!__Closure_make_adder_add {"));
}

#[test]
fn local_list_shadows_imported_module_name() {
    let out = lower(&module(vec![
        import("math", None),
        def_returning(
            "collect",
            vec![],
            name("int"),
            vec![
                assign("math", list(vec![int(1), int(2)])),
                expr_stmt(method(name("math"), "append", vec![int(3)])),
                ret(Some(call_name("len", vec![name("math")]))),
            ],
        ),
    ]));
    // the call goes to the list, not the library shim
    assert!(out.text.contains("try math.append(3);"));
    assert!(!out.text.contains("@sqrt"));
    assert!(out.diagnostics.is_empty());
}
