use pyzig_core::ast::build::*;
use pyzig_core::ast::{BinOperator, CmpOperator, Expr, ExprKind};
use pyzig_core::{LoweredModule, LoweringConfig, Module, PyzigErrorExt, StaticRegistry, compile_module};

fn lower(m: &Module) -> LoweredModule {
    let config = LoweringConfig { emit_entry_point: false, ..LoweringConfig::default() };
    let registry = StaticRegistry::builtin().expect("builtin registry");
    match compile_module(m, &config, &registry) {
        Ok(lowered) => lowered,
        Err(e) => panic!("lowering failed: {}", e.message()),
    }
}

fn formatted_with(value: Expr, spec: &str) -> Expr {
    let mut e = formatted(value);
    if let ExprKind::FormattedValue { format_spec, .. } = &mut e.kind {
        *format_spec = Some(spec.to_string());
    }
    e
}

#[test]
fn list_comprehension_over_range() {
    let out = lower(&module(vec![def(
        "doubles",
        vec![],
        vec![ret(Some(list_comp(
            binop(name("x"), BinOperator::Mult, int(2)),
            vec![comp(name("x"), range(vec![int(5)]), vec![])],
        )))],
    )]));
    assert!(out.text.contains("std.ArrayList(i64).init(allocator);"));
    assert!(out.text.contains("while (x < 5) : (x += 1) {"));
    assert!(out.text.contains(".append((x * 2));"));
    assert!(out.text.contains(".toOwnedSlice()"));
    assert!(out.diagnostics.is_empty());
}

#[test]
fn filtered_comprehension_skips_rejected_elements() {
    let even = compare(binop(name("x"), BinOperator::Mod, int(2)), CmpOperator::Eq, int(0));
    let out = lower(&module(vec![def(
        "evens",
        vec![],
        vec![ret(Some(list_comp(name("x"), vec![comp(name("x"), range(vec![int(10)]), vec![even])])))],
    )]));
    assert!(out.text.contains("while (x < 10) : (x += 1) {"));
    assert!(out.text.contains("if (!((@mod(x, 2) == 0))) continue;"));
    assert!(out.text.contains(".append(x);"));
    assert!(out.diagnostics.is_empty());
}

#[test]
fn membership_of_a_primitive_boxes_and_releases_it() {
    let out = lower(&module(vec![def_returning(
        "has",
        vec![typed_arg("v", "int")],
        name("bool"),
        vec![
            assign("xs", list(vec![int(1), int(2), int(3)])),
            ret(Some(compare(name("v"), CmpOperator::In, name("xs")))),
        ],
    )]));
    assert!(out.text.contains("const __boxed = try runtime.box(allocator, v);"));
    assert!(out.text.contains("defer __boxed.deinit(allocator);"));
    assert!(out.text.contains("runtime.contains(__boxed, xs)"));
}

#[test]
fn fstring_placeholders_follow_value_types() {
    let out = lower(&module(vec![def_returning(
        "describe",
        vec![typed_arg("who", "str"), typed_arg("n", "int"), typed_arg("ok", "bool"), typed_arg("r", "float")],
        name("str"),
        vec![ret(Some(fstring(vec![
            formatted(name("who")),
            string(" has "),
            formatted(name("n")),
            string(" ok="),
            formatted(name("ok")),
            string(" r="),
            formatted_with(name("r"), ".2f"),
        ])))],
    )]));
    assert!(out.text.contains(
        "std.fmt.allocPrint(allocator, \"{s} has {d} ok={s} r={d:.2}\", .{ who, n, (if (ok) \"True\" else \"False\"), r })"
    ));
}

#[test]
fn ternary_conditions_test_truthiness_by_type() {
    let out = lower(&module(vec![
        def_returning(
            "from_int",
            vec![typed_arg("n", "int")],
            name("int"),
            vec![ret(Some(if_exp(name("n"), int(1), int(2))))],
        ),
        def_returning(
            "from_str",
            vec![typed_arg("s", "str")],
            name("int"),
            vec![ret(Some(if_exp(name("s"), int(1), int(2))))],
        ),
        def_returning(
            "from_float",
            vec![typed_arg("f", "float")],
            name("int"),
            vec![ret(Some(if_exp(name("f"), int(1), int(2))))],
        ),
    ]));
    assert!(out.text.contains("(if ((n != 0)) 1 else 2)"));
    assert!(out.text.contains("(if ((s.len > 0)) 1 else 2)"));
    assert!(out.text.contains("(if ((f != 0.0)) 1 else 2)"));
}

#[test]
fn immediately_invoked_lambda_is_hoisted_and_called() {
    let out = lower(&module(vec![def_returning(
        "six",
        vec![],
        name("int"),
        vec![ret(Some(call(lambda(&["x"], binop(name("x"), BinOperator::Add, int(1))), vec![int(5)])))],
    )]));
    assert_eq!(out.closures.len(), 1);
    let lambda_name = out.closures[0].synthesized_name.clone();
    assert!(lambda_name.starts_with("__lambda_"));
    assert!(out.closures[0].captured_vars.is_empty());
    assert!(out.text.contains(&format!("fn {}(allocator: std.mem.Allocator, x: i64) anyerror!i64 {{", lambda_name)));
    assert!(out.text.contains("return (x + 1);"));
    assert!(out.text.contains(&format!("try {}(allocator, 5)", lambda_name)));
}

#[test]
fn tuple_indices_must_be_literals() {
    let out = lower(&module(vec![def_returning(
        "pick",
        vec![typed_arg("i", "int")],
        name("int"),
        vec![
            assign("t", tuple(vec![int(1), int(2), int(3)])),
            assign("last", subscript(name("t"), int(-1))),
            ret(Some(subscript(name("t"), name("i")))),
        ],
    )]));
    assert!(out.text.contains("t[2]"));
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].construct, "Subscript");
    assert_eq!(out.diagnostics[0].message, "tuple index must be an integer literal");
}

#[test]
fn integer_addition_never_concatenates() {
    let out = lower(&module(vec![def_returning(
        "bump",
        vec![typed_arg("n", "int"), typed_arg("flag", "bool")],
        name("int"),
        vec![
            assign("total", binop(name("n"), BinOperator::Add, int(1))),
            ret(Some(binop(name("total"), BinOperator::Add, name("flag")))),
        ],
    )]));
    assert!(out.text.contains("(n + 1)"));
    assert!(out.text.contains("(total + @as(i64, @intFromBool(flag)))"));
    assert!(!out.text.contains("concat"));
}

#[test]
fn chained_comparison_evaluates_middle_operand_once() {
    let out = lower(&module(vec![
        def_returning("tick", vec![], name("int"), vec![ret(Some(int(3)))]),
        def_returning(
            "in_window",
            vec![],
            name("bool"),
            vec![ret(Some(compare_chain(int(0), vec![CmpOperator::Lt, CmpOperator::Lt], vec![call_name("tick", vec![]), int(10)])))],
        ),
    ]));
    assert_eq!(out.text.matches("tick(allocator)").count(), 1);
    assert!(out.text.contains("const __mid_"));
    assert!(out.text.contains("= try tick(allocator);"));
    assert!(out.text.contains(" false;"));
}

#[test]
fn chained_comparison_over_names_stays_inline() {
    let out = lower(&module(vec![def_returning(
        "between",
        vec![typed_arg("a", "int"), typed_arg("b", "int"), typed_arg("c", "int")],
        name("bool"),
        vec![ret(Some(compare_chain(name("a"), vec![CmpOperator::Lt, CmpOperator::LtE], vec![name("b"), name("c")])))],
    )]));
    assert!(out.text.contains("return ((a < b) and (b <= c));"));
}
