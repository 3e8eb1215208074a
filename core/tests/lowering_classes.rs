use pyzig_core::ast::build::*;
use pyzig_core::ast::{BinOperator, Stmt, StmtKind};
use pyzig_core::{LoweredModule, LoweringConfig, Module, PyzigErrorExt, StaticRegistry, compile_module};

fn lower(m: &Module) -> LoweredModule {
    let registry = StaticRegistry::builtin().expect("builtin registry");
    match compile_module(m, &LoweringConfig::default(), &registry) {
        Ok(lowered) => lowered,
        Err(e) => panic!("lowering failed: {}", e.message()),
    }
}

fn self_attr(field: &str) -> pyzig_core::ast::Expr {
    attr(name("self"), field)
}

/// class Counter:
///     def __init__(self, start: int): self.count = start
///     def bump(self): self.count += 1; return self.count
fn counter_class() -> Stmt {
    class(
        "Counter",
        &[],
        vec![
            def(
                "__init__",
                vec![typed_arg("self", "Counter"), typed_arg("start", "int")],
                vec![assign_to(self_attr("count"), name("start"))],
            ),
            def(
                "bump",
                args(&["self"]),
                vec![
                    Stmt::new(
                        StmtKind::AugAssign { target: self_attr("count"), op: BinOperator::Add, value: int(1) },
                        None,
                    ),
                    ret(Some(self_attr("count"))),
                ],
            ),
        ],
    )
}

#[test]
fn class_becomes_struct_with_fields_and_lifecycle() {
    let out = lower(&module(vec![counter_class()]));
    assert!(out.text.contains("const Counter = struct {"));
    assert!(out.text.contains("count: i64 = 0,"));
    assert!(out.text.contains("pub fn init(allocator: std.mem.Allocator, start: i64) anyerror!*Counter {"));
    assert!(out.text.contains("const self = try allocator.create(Counter);"));
    assert!(out.text.contains("try self.__init__(allocator, start);"));
    assert!(out.text.contains("pub fn deinit(self: *Counter, allocator: std.mem.Allocator) void {"));
    assert!(out.text.contains("allocator.destroy(self);"));
}

#[test]
fn methods_take_the_receiver_first() {
    let out = lower(&module(vec![counter_class()]));
    assert!(out.text.contains("pub fn bump(self: *Counter, allocator: std.mem.Allocator) anyerror!i64 {"));
    assert!(out.text.contains("self.count += 1;"));
    assert!(out.text.contains("return self.count;"));
}

#[test]
fn constructed_instance_is_released_at_scope_exit() {
    let out = lower(&module(vec![
        counter_class(),
        assign("c", call_name("Counter", vec![int(5)])),
        expr_stmt(method(name("c"), "bump", vec![])),
        print(vec![attr(name("c"), "count")]),
    ]));
    assert!(out.text.contains("try Counter.init(allocator, 5)"));
    assert!(out.text.contains("defer c.deinit(allocator);"));
    assert!(out.text.contains("try c.bump(allocator)"));
}

#[test]
fn overridden_methods_stay_reachable_through_super() {
    let base = class(
        "Base",
        &[],
        vec![
            def_returning("describe", args(&["self"]), name("str"), vec![ret(Some(string("base")))]),
            def_returning("hello", args(&["self"]), name("int"), vec![ret(Some(int(1)))]),
        ],
    );
    let child = class(
        "Child",
        &["Base"],
        vec![def_returning(
            "describe",
            args(&["self"]),
            name("str"),
            vec![ret(Some(binop(
                string("child "),
                BinOperator::Add,
                method(call_name("super", vec![]), "describe", vec![]),
            )))],
        )],
    );
    let out = lower(&module(vec![base, child]));
    assert!(out.text.contains("const Child = struct {"));
    assert!(out.text.contains("pub fn Base_describe(self: *Child, allocator: std.mem.Allocator)"));
    assert!(out.text.contains("self.Base_describe(allocator)"));
    // inherited without override keeps its own name
    assert!(out.text.contains("pub fn hello(self: *Child, allocator: std.mem.Allocator) anyerror!i64 {"));
    assert!(out.diagnostics.is_empty());
}

#[test]
fn multiple_bases_are_reported() {
    let out = lower(&module(vec![
        class("A", &[], vec![pass()]),
        class("B", &[], vec![pass()]),
        class("C", &["A", "B"], vec![pass()]),
    ]));
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].construct, "ClassDef");
    assert!(out.diagnostics[0].message.contains("more than one base class"));
}
