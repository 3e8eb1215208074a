use pyzig_core::ast::build::*;
use pyzig_core::ast::{BinOperator, CmpOperator};
use pyzig_core::{LoweredModule, LoweringConfig, Module, PyzigErrorExt, StaticRegistry, compile_module};

fn lower(m: &Module) -> LoweredModule {
    let config = LoweringConfig { emit_entry_point: false, ..LoweringConfig::default() };
    let registry = StaticRegistry::builtin().expect("builtin registry");
    match compile_module(m, &config, &registry) {
        Ok(lowered) => lowered,
        Err(e) => panic!("lowering failed: {}", e.message()),
    }
}

#[test]
fn while_loop_with_mutated_local() {
    let out = lower(&module(vec![def_returning(
        "countdown",
        vec![typed_arg("n", "int")],
        name("int"),
        vec![
            assign("i", name("n")),
            while_(
                compare(name("i"), CmpOperator::Gt, int(0)),
                vec![aug_assign("i", BinOperator::Sub, int(1))],
            ),
            ret(Some(name("i"))),
        ],
    )]));
    assert!(out.text.contains("var i"));
    assert!(out.text.contains("while ("));
    assert!(out.text.contains("i -= 1;"));
    assert!(out.text.contains("return i;"));
    assert!(out.diagnostics.is_empty());
}

#[test]
fn if_else_branches() {
    let out = lower(&module(vec![def_returning(
        "sign",
        vec![typed_arg("x", "int")],
        name("int"),
        vec![if_(
            compare(name("x"), CmpOperator::Lt, int(0)),
            vec![ret(Some(int(-1)))],
            vec![ret(Some(int(1)))],
        )],
    )]));
    assert!(out.text.contains("if ("));
    assert!(out.text.contains("} else {"));
    assert!(out.text.contains("return 1;"));
    // both branches return, nothing falls off the end
    assert!(!out.text.contains("unreachable;"));
}

#[test]
fn try_except_becomes_labeled_block_and_error_switch() {
    let out = lower(&module(vec![def_returning(
        "safe_div",
        vec![typed_arg("a", "int"), typed_arg("b", "int")],
        name("int"),
        vec![
            try_(
                vec![
                    if_(
                        compare(name("b"), CmpOperator::Eq, int(0)),
                        vec![raise(Some(call_name("ValueError", vec![string("zero")])))],
                        vec![],
                    ),
                    ret(Some(binop(name("a"), BinOperator::FloorDiv, name("b")))),
                ],
                vec![handler(Some("ValueError"), None, vec![ret(Some(int(0)))])],
                vec![],
            ),
            ret(Some(int(-1))),
        ],
    )]));
    assert!(out.text.contains(": anyerror!void = __try_"));
    assert!(out.text.contains("break :__try_"));
    assert!(out.text.contains(" error.ValueError;"));
    assert!(out.text.contains("error.ValueError, error.InvalidCharacter, error.Overflow =>"));
    assert!(out.text.contains("else |__err_"));
    assert!(out.text.contains("else => return __err_"));
    assert!(out.diagnostics.is_empty());
}

#[test]
fn raise_outside_try_returns_the_error() {
    let out = lower(&module(vec![def(
        "fail",
        vec![],
        vec![raise(Some(call_name("KeyError", vec![string("k")])))],
    )]));
    assert!(out.text.contains("return error.KeyError;"));
}

#[test]
fn assert_returns_assertion_error() {
    let out = lower(&module(vec![def(
        "check",
        vec![typed_arg("x", "int")],
        vec![assert_(compare(name("x"), CmpOperator::Gt, int(0)))],
    )]));
    assert!(out.text.contains("if (!("));
    assert!(out.text.contains("return error.AssertionError;"));
}

#[test]
fn main_guard_is_flattened_into_the_entry_point() {
    let registry = StaticRegistry::builtin().expect("builtin registry");
    let m = module(vec![if_(
        compare(name("__name__"), CmpOperator::Eq, string("__main__")),
        vec![print(vec![int(7)])],
        vec![],
    )]);
    let out = match compile_module(&m, &LoweringConfig::default(), &registry) {
        Ok(lowered) => lowered,
        Err(e) => panic!("lowering failed: {}", e.message()),
    };
    assert!(out.text.contains("pub fn main() !void {"));
    assert!(!out.text.contains("__name__"));
    assert!(out.text.contains("print(\"{d}\\n\", .{ 7 })"));
}

#[test]
fn range_loop_becomes_counting_while() {
    let out = lower(&module(vec![def_returning(
        "total",
        vec![typed_arg("n", "int")],
        name("int"),
        vec![
            assign("s", int(0)),
            for_(name("i"), range(vec![name("n")]), vec![aug_assign("s", BinOperator::Add, name("i"))]),
            ret(Some(name("s"))),
        ],
    )]));
    assert!(out.text.contains("const __bound_"));
    assert!(out.text.contains(" < __bound_"));
    assert!(out.text.contains(" += 1) {"));
    assert!(out.text.contains("return s;"));
    assert!(out.diagnostics.is_empty());
}

#[test]
fn range_bound_is_read_once_even_when_the_body_changes_it() {
    let out = lower(&module(vec![def_returning(
        "shrink",
        vec![typed_arg("n", "int")],
        name("int"),
        vec![
            assign("total", int(0)),
            for_(
                name("i"),
                range(vec![name("n")]),
                vec![aug_assign("n", BinOperator::Sub, int(1)), aug_assign("total", BinOperator::Add, int(1))],
            ),
            ret(Some(name("total"))),
        ],
    )]));
    assert!(out.text.contains("const __bound_"));
    assert!(out.text.contains("while (i < __bound_"));
    assert!(!out.text.contains("while (i < n)"));
    assert!(out.text.contains("n -= 1;"));
}

#[test]
fn literal_range_bounds_stay_inline() {
    let out = lower(&module(vec![def_returning(
        "ten",
        vec![],
        name("int"),
        vec![
            assign("s", int(0)),
            for_(name("i"), range(vec![int(2), int(10)]), vec![aug_assign("s", BinOperator::Add, name("i"))]),
            ret(Some(name("s"))),
        ],
    )]));
    assert!(out.text.contains("var i: i64 = 2;"));
    assert!(out.text.contains("while (i < 10) : (i += 1) {"));
    assert!(!out.text.contains("__bound_"));
}
