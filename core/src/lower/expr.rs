//! file: core/src/lower/expr.rs
//! description: expression lowering.
//!
//! Every function here returns a `Lowered` and never writes statements;
//! statements that an expression needs (temporaries, accumulators) are
//! folded into labeled block expressions.
//!
use log::trace;

use super::context::Session;
use super::err::LoweringError;
use super::ownership::{Lowered, Release};
use super::strings::{escape_format, ident, quoted};
use super::types::{elem_type, placeholder, value_type, zig_type};
use super::writer::block_expr;
use crate::analyzers::infer::binop_type;
use crate::analyzers::{InferredType, ValueRepr};
use crate::ast::{BinOperator, BoolOperator, CmpOperator, Constant, Expr, ExprKind, UnaryOperator};
use crate::location::Location;

/// Implicit conversion applied to an argument or assigned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coercion {
    Keep,
    IntToFloat,
    BoolToInt,
    /// Growable list passed where a slice is expected.
    Items,
}

impl Coercion {
    pub fn between(from: &Lowered, to: &InferredType) -> Coercion {
        match (&from.ty, to) {
            (InferredType::Int, InferredType::Float) => Coercion::IntToFloat,
            (InferredType::Bool, InferredType::Int) => Coercion::BoolToInt,
            (InferredType::List(_), _) if from.is_growable() => Coercion::Items,
            _ => Coercion::Keep,
        }
    }

    pub fn apply(&self, code: &str) -> String {
        match self {
            Coercion::Keep => code.to_string(),
            Coercion::IntToFloat => format!("@as(f64, @floatFromInt({}))", code),
            Coercion::BoolToInt => format!("@as(i64, @intFromBool({}))", code),
            Coercion::Items => format!("{}.items", code),
        }
    }
}

pub(crate) fn coerce_all(codes: &[String], coercions: &[Coercion]) -> Vec<String> {
    codes
        .iter()
        .enumerate()
        .map(|(i, c)| coercions.get(i).copied().unwrap_or(Coercion::Keep).apply(c))
        .collect()
}

/// `code` as an `f64`.
pub(crate) fn as_float(code: &str, ty: &InferredType) -> String {
    match ty {
        InferredType::Int => format!("@as(f64, @floatFromInt({}))", code),
        InferredType::Bool => format!("@as(f64, @floatFromInt(@intFromBool({})))", code),
        _ => code.to_string(),
    }
}

/// `code` as an `i64`.
pub(crate) fn as_int(code: &str, ty: &InferredType) -> String {
    match ty {
        InferredType::Bool => format!("@as(i64, @intFromBool({}))", code),
        _ => code.to_string(),
    }
}

/// Slice view of a list value.
pub(crate) fn view(code: &str, growable: bool) -> String {
    if growable { format!("{}.items", code) } else { code.to_string() }
}

/// `usize` length of a sized value.
pub(crate) fn length_of(code: &str, ty: &InferredType, repr: &ValueRepr, rt: &str) -> String {
    match (ty, repr) {
        (_, ValueRepr::Growable) => format!("{}.items.len", code),
        (InferredType::Dict(..), _) | (_, ValueRepr::Map) => format!("{}.count()", code),
        (InferredType::String, _) | (InferredType::List(_), _) => format!("{}.len", code),
        (InferredType::Tuple(items), _) => items.len().to_string(),
        _ => format!("{}.len({})", rt, code),
    }
}

/// Equality test between two lowered values.
pub(crate) fn equality(a: &str, ta: &InferredType, b: &str, tb: &InferredType, rt: &str) -> String {
    use InferredType::*;
    match (ta, tb) {
        (String, String) => format!("std.mem.eql(u8, {}, {})", a, b),
        (Optional(_), None) => format!("({} == null)", a),
        (None, Optional(_)) => format!("({} == null)", b),
        (List(e), List(_)) if !e.is_unknown() => format!("std.mem.eql({}, {}, {})", value_type(e, rt), a, b),
        (Unknown, _) | (_, Unknown) => format!("{}.equal({}, {})", rt, a, b),
        (Float, _) | (_, Float) => format!("({} == {})", as_float(a, ta), as_float(b, tb)),
        _ => format!("({} == {})", a, b),
    }
}

/// Test of a `std.math.Order` value for an ordering operator.
fn order_test(order: &str, op: CmpOperator) -> String {
    match op {
        CmpOperator::Lt => format!("({} == .lt)", order),
        CmpOperator::LtE => format!("({} != .gt)", order),
        CmpOperator::Gt => format!("({} == .gt)", order),
        _ => format!("({} != .lt)", order),
    }
}

fn runtime_op(op: BinOperator) -> &'static str {
    match op {
        BinOperator::Add => "add",
        BinOperator::Sub => "sub",
        BinOperator::Mult => "mul",
        BinOperator::Div => "div",
        BinOperator::FloorDiv => "floordiv",
        BinOperator::Mod => "mod",
        BinOperator::Pow => "pow",
        BinOperator::LShift => "lshift",
        BinOperator::RShift => "rshift",
        BinOperator::BitOr => "bitor",
        BinOperator::BitXor => "bitxor",
        BinOperator::BitAnd => "bitand",
        BinOperator::MatMult => "matmul",
    }
}

/// Zig placeholder for one f-string field.
fn format_field(spec: Option<&str>, ty: &InferredType) -> String {
    let Some(spec) = spec.filter(|s| !s.is_empty()) else {
        return placeholder(ty).to_string();
    };
    let mut chars: Vec<char> = spec.chars().filter(|c| *c != ',' && *c != '_').collect();
    let kind = match chars.last() {
        Some(c) if c.is_ascii_alphabetic() => chars.pop(),
        _ => None,
    };
    let specifier = match (kind, ty) {
        (Some('x'), _) => "x",
        (Some('X'), _) => "X",
        (Some('b'), _) => "b",
        (Some('e'), _) => "e",
        (_, InferredType::String) => "s",
        (_, InferredType::Int) | (_, InferredType::Float) => "d",
        _ => "any",
    };
    let mut fill = String::new();
    let mut align = String::new();
    let rest: String = chars.iter().collect();
    let mut rest = rest.as_str();
    let align_at = |s: &str, i: usize| s.chars().nth(i).filter(|c| matches!(c, '<' | '>' | '^'));
    if let Some(a) = align_at(rest, 1) {
        fill = rest.chars().next().map(String::from).unwrap_or_default();
        align = a.to_string();
        rest = &rest[fill.len() + 1..];
    } else if let Some(a) = align_at(rest, 0) {
        align = a.to_string();
        rest = &rest[1..];
    } else if rest.starts_with('0') && rest.len() > 1 {
        fill = "0".to_string();
        align = ">".to_string();
        rest = &rest[1..];
    }
    let (width, precision) = match rest.split_once('.') {
        Some((w, p)) => (w.to_string(), format!(".{}", p)),
        None => (rest.to_string(), String::new()),
    };
    if align.is_empty() && !width.is_empty() {
        align = if *ty == InferredType::String { "<" } else { ">" }.to_string();
    }
    if fill.is_empty() && align.is_empty() && width.is_empty() && precision.is_empty() {
        format!("{{{}}}", specifier)
    } else {
        format!("{{{}:{}{}{}{}}}", specifier, fill, align, width, precision)
    }
}

impl<'a> Session<'a> {
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<Lowered, LoweringError> {
        self.descend(&expr.location, |s| s.lower_expr_kind(expr))
    }

    fn lower_expr_kind(&mut self, expr: &Expr) -> Result<Lowered, LoweringError> {
        trace!("lowering {}", expr.kind_name());
        match &expr.kind {
            ExprKind::Constant { value } => Ok(lower_constant(value)),
            ExprKind::Name { id } => Ok(self.lower_name(id)),
            ExprKind::BinOp { left, op, right } => self.lower_binop(left, *op, right, &expr.location),
            ExprKind::UnaryOp { op, operand } => self.lower_unary(*op, operand),
            ExprKind::BoolOp { op, values } => self.lower_boolop(*op, values),
            ExprKind::Compare { left, ops, comparators } => self.lower_compare(left, ops, comparators),
            ExprKind::Call { .. } => self.lower_call(expr),
            ExprKind::IfExp { test, body, orelse } => self.lower_ifexp(test, body, orelse),
            ExprKind::List { elts } => self.lower_list_literal(elts, &InferredType::Unknown, false),
            ExprKind::Tuple { elts } => self.lower_tuple(elts),
            ExprKind::Dict { keys, values } => self.lower_dict_literal(keys, values, &InferredType::Unknown, &expr.location),
            ExprKind::Set { .. } | ExprKind::SetComp { .. } => {
                Ok(self.diag_value("Set", "set values are not supported".into(), &expr.location))
            }
            ExprKind::Subscript { value, slice } => self.lower_subscript(value, slice, &expr.location),
            ExprKind::Slice { .. } => {
                Ok(self.diag_value("Slice", "slice outside a subscript".into(), &expr.location))
            }
            ExprKind::Attribute { value, attr } => self.lower_attribute(expr, value, attr),
            ExprKind::JoinedStr { values } => self.lower_fstring(values),
            ExprKind::FormattedValue { .. } => self.lower_fstring(std::slice::from_ref(expr)),
            ExprKind::Lambda { args, body } => self.lower_lambda(args, body, None, &expr.location),
            ExprKind::ListComp { elt, generators } | ExprKind::GeneratorExp { elt, generators } => {
                self.lower_list_comp(expr, elt, generators)
            }
            ExprKind::DictComp { key, value, generators } => self.lower_dict_comp(expr, key, value, generators),
            ExprKind::Await { value } => {
                let inner = self.lower_expr(value)?;
                let code = format!("{}.scheduler.wait({})", self.rt(), inner.code);
                Ok(Lowered { code, ..inner })
            }
            ExprKind::Yield { .. } => {
                Ok(self.diag_value("Yield", "yield used as a value".into(), &expr.location))
            }
            ExprKind::Starred { .. } => {
                Ok(self.diag_value("Starred", "starred expressions are not supported".into(), &expr.location))
            }
        }
    }

    // ------- Names -------

    fn lower_name(&mut self, id: &str) -> Lowered {
        if let Some(binding) = self.scopes.lookup(id).cloned() {
            let code = binding.alias.clone().unwrap_or_else(|| ident(id));
            let ty = if binding.ty.is_unknown() { self.table_type(id) } else { binding.ty.clone() };
            return Lowered::new(code, ty).with_repr(binding.repr);
        }
        match id {
            "True" => return Lowered::new("true".into(), InferredType::Bool),
            "False" => return Lowered::new("false".into(), InferredType::Bool),
            "None" => return Lowered::new("null".into(), InferredType::None),
            "__name__" => return Lowered::new(quoted("__main__"), InferredType::String),
            _ => {}
        }
        let key = self.scope_key();
        if let Some(sig) = self.types.resolve_function(&key, id) {
            let name = self.function_spelling(id);
            return Lowered::new(format!("&{}", name), InferredType::Callable(Box::new(sig.returns.clone())))
                .with_repr(ValueRepr::FnPointer(name));
        }
        Lowered::new(ident(id), self.table_type(id))
    }

    /// Emitted name of a module-level function.
    pub(crate) fn function_spelling(&self, name: &str) -> String {
        if name == "main" { "py_main".to_string() } else { ident(name) }
    }

    // ------- Operators -------

    fn lower_binop(
        &mut self,
        left: &Expr,
        op: BinOperator,
        right: &Expr,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        use InferredType as T;
        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;
        let (lt, rt_ty) = (l.ty.clone(), r.ty.clone());
        let result = binop_type(op, &lt, &rt_ty);
        let alloc = self.alloc();
        let rt = self.rt();
        let g = self.guarder();

        if lt.is_unknown() || rt_ty.is_unknown() {
            let name = runtime_op(op);
            let code = self.with_temps(vec![l, r], |c| g.wrap(&format!("{}.binary({}, .{}, {}, {})", rt, alloc, name, c[0], c[1])));
            return Ok(Lowered::new(code, T::Unknown));
        }

        match (op, &lt, &rt_ty) {
            (BinOperator::Add, T::String, T::String) => {
                let code = self.with_temps(vec![l, r], |c| {
                    g.wrap(&format!("std.mem.concat({}, u8, &.{{ {}, {} }})", alloc, c[0], c[1]))
                });
                Ok(Lowered::new(code, T::String).owned(Release::Free))
            }
            (BinOperator::Add, T::List(_), T::List(_)) => {
                let elem = elem_type(&result, rt);
                let (lg, rg) = (l.is_growable(), r.is_growable());
                let code = self.with_temps(vec![l, r], |c| {
                    g.wrap(&format!("std.mem.concat({}, {}, &.{{ {}, {} }})", alloc, elem, view(&c[0], lg), view(&c[1], rg)))
                });
                Ok(Lowered::new(code, result).owned(Release::Free))
            }
            (BinOperator::Mult, T::String, T::Int) | (BinOperator::Mult, T::Int, T::String) => {
                let swap = lt == T::Int;
                let code = self.with_temps(vec![l, r], |c| {
                    let (s, n) = if swap { (&c[1], &c[0]) } else { (&c[0], &c[1]) };
                    g.wrap(&format!("{}.repeat(u8, {}, {}, {})", rt, alloc, s, n))
                });
                Ok(Lowered::new(code, T::String).owned(Release::Free))
            }
            (BinOperator::Mult, T::List(_), T::Int) | (BinOperator::Mult, T::Int, T::List(_)) => {
                let swap = lt == T::Int;
                let elem = elem_type(&result, rt);
                let growable = if swap { r.is_growable() } else { l.is_growable() };
                let code = self.with_temps(vec![l, r], |c| {
                    let (s, n) = if swap { (&c[1], &c[0]) } else { (&c[0], &c[1]) };
                    g.wrap(&format!("{}.repeat({}, {}, {}, {})", rt, elem, alloc, view(s, growable), n))
                });
                Ok(Lowered::new(code, result).owned(Release::Free))
            }
            (BinOperator::Mod, T::String, _) => Ok(self.diag_value(
                "BinOp",
                "printf-style string formatting is not supported; use an f-string".into(),
                location,
            )),
            (BinOperator::MatMult, _, _) => {
                Ok(self.diag_value("BinOp", "the @ operator is not supported".into(), location))
            }
            _ if !(lt.is_numeric() || lt == T::Bool) || !(rt_ty.is_numeric() || rt_ty == T::Bool) => Ok(self.diag_value(
                "BinOp",
                format!("operator {} is not supported between {} and {}", op.symbol(), lt, rt_ty),
                location,
            )),
            _ => Ok(Lowered::new(numeric_binop(op, &l, &r, &result, rt, &g), result)),
        }
    }

    fn lower_unary(&mut self, op: UnaryOperator, operand: &Expr) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(operand)?;
        let ty = value.ty.clone();
        let lowered = match op {
            UnaryOperator::Not => {
                let test = self.truth(value);
                Lowered::new(format!("!{}", test), InferredType::Bool)
            }
            UnaryOperator::USub => match ty {
                InferredType::Bool => Lowered::new(format!("-{}", as_int(&value.code, &ty)), InferredType::Int),
                InferredType::Unknown => {
                    Lowered::new(format!("{}.negate({})", self.rt(), value.code), InferredType::Unknown)
                }
                _ => Lowered::new(format!("-{}", value.code), ty),
            },
            UnaryOperator::UAdd => value,
            UnaryOperator::Invert => {
                Lowered::new(format!("~{}", as_int(&value.code, &ty)), InferredType::Int)
            }
        };
        Ok(lowered)
    }

    fn lower_boolop(&mut self, op: BoolOperator, values: &[Expr]) -> Result<Lowered, LoweringError> {
        let mut parts = Vec::with_capacity(values.len());
        for v in values {
            parts.push(self.lower_expr(v)?);
        }
        let first_ty = parts.first().map(|p| p.ty.clone()).unwrap_or(InferredType::Bool);
        let value_form = first_ty != InferredType::Bool
            && !first_ty.is_unknown()
            && parts.iter().all(|p| p.ty == first_ty && !p.is_owned())
            && values.iter().all(|v| matches!(v.kind, ExprKind::Name { .. } | ExprKind::Constant { .. } | ExprKind::Attribute { .. }));

        if value_form {
            // `a or b` yields an operand, not a bool
            let mut iter = parts.into_iter().rev();
            let Some(last) = iter.next() else {
                return Ok(Lowered::new("false".into(), InferredType::Bool));
            };
            let mut code = last.code;
            for part in iter {
                let test = self.truth(part.clone());
                code = match op {
                    BoolOperator::Or => format!("(if ({}) {} else {})", test, part.code, code),
                    BoolOperator::And => format!("(if (!{}) {} else {})", test, part.code, code),
                };
            }
            return Ok(Lowered::new(code, first_ty));
        }

        let joiner = match op {
            BoolOperator::And => " and ",
            BoolOperator::Or => " or ",
        };
        let tests: Vec<String> = parts.into_iter().map(|p| self.truth(p)).collect();
        Ok(Lowered::new(format!("({})", tests.join(joiner)), InferredType::Bool))
    }

    /// Truth test of a value, following the source language's truthiness.
    pub(crate) fn truth(&mut self, value: Lowered) -> String {
        let rt = self.rt();
        let (ty, repr) = (value.ty.clone(), value.repr.clone());
        let test = move |code: &str| -> String {
            match (&ty, &repr) {
                (InferredType::Bool, _) => code.to_string(),
                (InferredType::Int, _) => format!("({} != 0)", code),
                (InferredType::Float, _) => format!("({} != 0.0)", code),
                (_, ValueRepr::Growable) => format!("({}.items.len > 0)", code),
                (InferredType::String, _) | (InferredType::List(_), _) => format!("({}.len > 0)", code),
                (InferredType::Dict(..), _) => format!("({}.count() > 0)", code),
                (InferredType::Optional(_), _) => format!("({} != null)", code),
                (InferredType::None, _) => "false".to_string(),
                (InferredType::Tuple(items), _) => (!items.is_empty()).to_string(),
                (InferredType::Instance(_), _) | (InferredType::Callable(_), _) | (InferredType::Queue, _) => {
                    "true".to_string()
                }
                (InferredType::Unknown, _) => format!("{}.truthy({})", rt, code),
            }
        };
        if value.is_owned() {
            self.with_temps(vec![value], |c| test(&c[0]))
        } else {
            test(&value.code)
        }
    }

    // ------- Comparisons -------

    fn lower_compare(&mut self, left: &Expr, ops: &[CmpOperator], comparators: &[Expr]) -> Result<Lowered, LoweringError> {
        let mut operands = vec![self.lower_expr(left)?];
        for c in comparators {
            operands.push(self.lower_expr(c)?);
        }
        let last = operands.len() - 1;
        let inline = comparators[..last.saturating_sub(1)]
            .iter()
            .all(|c| matches!(c.kind, ExprKind::Name { .. } | ExprKind::Constant { .. }));
        if inline {
            let mut tests = Vec::with_capacity(ops.len());
            for (i, op) in ops.iter().enumerate() {
                let (l, r) = (operands[i].clone(), operands[i + 1].clone());
                tests.push(self.compare_pair(l, *op, r));
            }
            let code = if tests.len() == 1 { tests.remove(0) } else { format!("({})", tests.join(" and ")) };
            return Ok(Lowered::new(code, InferredType::Bool));
        }

        // Middle operands are evaluated once: each is bound right before its
        // first comparison and the chain stops at the first false link.
        let alloc = self.alloc();
        let label = self.fresh("__chain");
        let mut stmts = Vec::new();
        let mut result = String::new();
        for (i, op) in ops.iter().enumerate() {
            let right = i + 1;
            if right < last && !matches!(comparators[i].kind, ExprKind::Name { .. } | ExprKind::Constant { .. }) {
                let part = operands[right].clone();
                let tmp = self.fresh("__mid");
                let keyword = match &part.owned {
                    Some(release) if release.needs_var(&part.repr) || part.is_growable() => "var",
                    _ => "const",
                };
                stmts.push(format!("{} {} = {};", keyword, tmp, part.code));
                if let Some(release) = &part.owned {
                    stmts.push(format!("defer {}", release.statement(&tmp, alloc)));
                }
                operands[right] = Lowered { code: tmp, owned: None, ..part };
            }
            let test = self.compare_pair(operands[i].clone(), *op, operands[right].clone());
            if right == last {
                result = test;
            } else {
                stmts.push(format!("if (!({})) break :{} false;", test, label));
            }
        }
        Ok(Lowered::new(block_expr(&label, &stmts, &result, self.unit()), InferredType::Bool))
    }

    fn compare_pair(&mut self, l: Lowered, op: CmpOperator, r: Lowered) -> String {
        use InferredType as T;
        let rt = self.rt();
        let (lt, rty) = (l.ty.clone(), r.ty.clone());
        let (lg, rg) = (l.is_growable(), r.is_growable());
        match op {
            CmpOperator::In | CmpOperator::NotIn => {
                let test = self.contains(l, r);
                if op == CmpOperator::NotIn { format!("!{}", test) } else { test }
            }
            CmpOperator::Is | CmpOperator::IsNot => {
                let negate = op == CmpOperator::IsNot;
                let test = self.with_temps(vec![l, r], |c| match (&lt, &rty) {
                    (T::Optional(_), T::None) => format!("({} == null)", c[0]),
                    (T::None, T::Optional(_)) => format!("({} == null)", c[1]),
                    (T::Unknown, T::None) => format!("{}.isNone({})", rt, c[0]),
                    (_, T::None) => format!("(@TypeOf({}) == @TypeOf(null))", c[0]),
                    _ => format!("({} == {})", c[0], c[1]),
                });
                if negate { format!("!{}", test) } else { test }
            }
            CmpOperator::Eq | CmpOperator::NotEq => {
                let negate = op == CmpOperator::NotEq;
                let test = self.with_temps(vec![l, r], |c| equality(&view(&c[0], lg), &lt, &view(&c[1], rg), &rty, rt));
                if negate { format!("!{}", test) } else { test }
            }
            _ => self.with_temps(vec![l, r], |c| match (&lt, &rty) {
                (T::String, T::String) => order_test(&format!("std.mem.order(u8, {}, {})", c[0], c[1]), op),
                (T::Unknown, _) | (_, T::Unknown) => order_test(&format!("{}.compare({}, {})", rt, c[0], c[1]), op),
                (T::Float, _) | (_, T::Float) => {
                    format!("({} {} {})", as_float(&c[0], &lt), op.symbol(), as_float(&c[1], &rty))
                }
                _ => format!("({} {} {})", as_int(&c[0], &lt), op.symbol(), as_int(&c[1], &rty)),
            }),
        }
    }

    /// Membership test `item in container`.
    fn contains(&mut self, item: Lowered, container: Lowered) -> String {
        use InferredType as T;
        let rt = self.rt();
        let alloc = self.alloc();
        let unit = self.unit();
        let g = self.guarder();
        let (it, ct) = (item.ty.clone(), container.ty.clone());
        let growable = container.is_growable();
        match &ct {
            T::String => self.with_temps(vec![item, container], |c| format!("(std.mem.indexOf(u8, {}, {}) != null)", c[1], c[0])),
            T::Dict(..) => self.with_temps(vec![item, container], |c| format!("{}.contains({})", c[1], c[0])),
            _ if matches!(it, T::Int | T::Float | T::Bool | T::String) => {
                // primitives are boxed for the lookup and released right after
                let label = self.fresh("__in");
                self.with_temps(vec![item, container], |c| {
                    let stmts = vec![
                        format!("const __boxed = {};", g.wrap(&format!("{}.box({}, {})", rt, alloc, c[0]))),
                        format!("defer __boxed.deinit({});", alloc),
                    ];
                    block_expr(&label, &stmts, &format!("{}.contains(__boxed, {})", rt, view(&c[1], growable)), unit)
                })
            }
            _ => self.with_temps(vec![item, container], |c| format!("{}.contains({}, {})", rt, c[0], view(&c[1], growable))),
        }
    }

    fn lower_ifexp(&mut self, test: &Expr, body: &Expr, orelse: &Expr) -> Result<Lowered, LoweringError> {
        let cond = self.lower_expr(test)?;
        let cond = self.truth(cond);
        let mut then = self.lower_expr(body)?;
        let mut other = self.lower_expr(orelse)?;
        let ty = match (&then.ty, &other.ty) {
            (InferredType::Int, InferredType::Float) => {
                then.code = as_float(&then.code, &InferredType::Int);
                InferredType::Float
            }
            (InferredType::Float, InferredType::Int) => {
                other.code = as_float(&other.code, &InferredType::Int);
                InferredType::Float
            }
            (t, InferredType::None) | (InferredType::None, t) if *t != InferredType::None => {
                InferredType::Optional(Box::new(t.clone()))
            }
            (t, _) => t.clone(),
        };
        // both arms must agree on ownership
        if then.ty == InferredType::String && then.is_owned() != other.is_owned() {
            if !then.is_owned() {
                then = self.dupe_string(then);
            } else {
                other = self.dupe_string(other);
            }
        }
        let owned = then.owned.filter(|_| other.is_owned());
        Ok(Lowered { code: format!("(if ({}) {} else {})", cond, then.code, other.code), ty, repr: then.repr, owned })
    }

    /// An owned copy of a borrowed string.
    pub(crate) fn dupe_string(&self, value: Lowered) -> Lowered {
        if value.is_owned() {
            return value;
        }
        let code = self.guard(&format!("{}.dupe(u8, {})", self.alloc(), value.code));
        Lowered::new(code, InferredType::String).owned(Release::Free)
    }

    // ------- Literals -------

    /// Value of an assignment right-hand side. List and dict literals take
    /// their element types from `hint` (the binding's table type); a list
    /// bound to a grown name is built growable.
    pub(crate) fn lower_value(
        &mut self,
        expr: &Expr,
        hint: &InferredType,
        grown: bool,
        bind_name: Option<&str>,
    ) -> Result<Lowered, LoweringError> {
        match &expr.kind {
            ExprKind::List { elts } => self.lower_list_literal(elts, hint, grown),
            ExprKind::Dict { keys, values } => self.lower_dict_literal(keys, values, hint, &expr.location),
            ExprKind::Lambda { args, body } => self.lower_lambda(args, body, bind_name, &expr.location),
            _ => self.lower_expr(expr),
        }
    }

    pub(crate) fn lower_list_literal(
        &mut self,
        elts: &[Expr],
        hint: &InferredType,
        growable: bool,
    ) -> Result<Lowered, LoweringError> {
        let mut items = Vec::with_capacity(elts.len());
        for e in elts {
            items.push(self.lower_expr(e)?);
        }
        let mut elem = hint.element();
        if elem.is_unknown() || elem.is_partial() {
            elem = items.iter().fold(InferredType::Unknown, |acc, i| match (&acc, &i.ty) {
                (InferredType::Int, InferredType::Float) => InferredType::Float,
                (InferredType::Float, _) => InferredType::Float,
                _ => acc.refine(&i.ty),
            });
        }
        let rt = self.rt();
        let elem_text = value_type(&elem, rt);
        let codes: Vec<String> = items
            .iter()
            .map(|i| match (&i.ty, &elem) {
                (InferredType::Int, InferredType::Float) => as_float(&i.code, &i.ty),
                _ => i.code.clone(),
            })
            .collect();
        let ty = InferredType::list_of(elem);

        if growable {
            let init = format!("std.ArrayList({}).init({})", elem_text, self.alloc());
            if codes.is_empty() {
                return Ok(Lowered::new(init, ty).with_repr(ValueRepr::Growable).owned(Release::Deinit));
            }
            let label = self.fresh("__list");
            let stmts = vec![
                format!("var __items = {};", init),
                "errdefer __items.deinit();".to_string(),
                format!("{};", self.guard(&format!("__items.appendSlice(&[_]{}{{ {} }})", elem_text, codes.join(", ")))),
            ];
            let code = block_expr(&label, &stmts, "__items", self.unit());
            return Ok(Lowered::new(code, ty).with_repr(ValueRepr::Growable).owned(Release::Deinit));
        }
        if codes.is_empty() {
            return Ok(Lowered::new(format!("&[_]{}{{}}", elem_text), ty));
        }
        Ok(Lowered::new(format!("&[_]{}{{ {} }}", elem_text, codes.join(", ")), ty))
    }

    fn lower_tuple(&mut self, elts: &[Expr]) -> Result<Lowered, LoweringError> {
        let mut codes = Vec::with_capacity(elts.len());
        let mut types = Vec::with_capacity(elts.len());
        for e in elts {
            let item = self.lower_expr(e)?;
            codes.push(item.code);
            types.push(item.ty);
        }
        if codes.is_empty() {
            return Ok(Lowered::new(".{}".into(), InferredType::Tuple(types)));
        }
        Ok(Lowered::new(format!(".{{ {} }}", codes.join(", ")), InferredType::Tuple(types)))
    }

    pub(crate) fn lower_dict_literal(
        &mut self,
        keys: &[Option<Expr>],
        values: &[Expr],
        hint: &InferredType,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        if keys.iter().any(Option::is_none) {
            return Ok(self.diag_value("Dict", "dict unpacking with ** is not supported".into(), location));
        }
        let mut pairs = Vec::with_capacity(keys.len());
        for (k, v) in keys.iter().flatten().zip(values) {
            pairs.push((self.lower_expr(k)?, self.lower_expr(v)?));
        }
        let (mut key_ty, mut val_ty) = match hint {
            InferredType::Dict(k, v) => ((**k).clone(), (**v).clone()),
            _ => (InferredType::Unknown, InferredType::Unknown),
        };
        if let Some((k, v)) = pairs.first() {
            key_ty = key_ty.refine(&k.ty);
            val_ty = val_ty.refine(&v.ty);
        }
        let ty = InferredType::dict_of(key_ty, val_ty);
        let map_type = zig_type(&ty, &ValueRepr::Map, self.rt());
        let init = format!("{}.init({})", map_type, self.alloc());
        if pairs.is_empty() {
            return Ok(Lowered::new(init, ty).owned(Release::Deinit));
        }
        let label = self.fresh("__dict");
        let mut stmts = vec![format!("var __map = {};", init), "errdefer __map.deinit();".to_string()];
        for (k, v) in pairs {
            stmts.push(format!("{};", self.guard(&format!("__map.put({}, {})", k.code, v.code))));
        }
        let code = block_expr(&label, &stmts, "__map", self.unit());
        Ok(Lowered::new(code, ty).owned(Release::Deinit))
    }

    // ------- Subscripts -------

    fn lower_subscript(&mut self, value: &Expr, slice: &Expr, location: &Option<Location>) -> Result<Lowered, LoweringError> {
        if let ExprKind::Slice { lower, upper, step } = &slice.kind {
            return self.lower_slicing(value, lower.as_deref(), upper.as_deref(), step.as_deref(), location);
        }
        let container = self.lower_expr(value)?;
        let literal = slice.as_int_literal();
        let index = self.lower_expr(slice)?;
        let rt = self.rt();
        let g = self.guarder();
        let growable = container.is_growable();
        let cty = container.ty.clone();
        match &cty {
            InferredType::List(elem) => {
                let elem = (**elem).clone();
                let code = self.with_temps(vec![container, index], |c| {
                    let items = view(&c[0], growable);
                    match literal {
                        Some(i) if i >= 0 => format!("{}[{}]", items, i),
                        Some(i) => format!("{}[{}.len - {}]", items, items, -i),
                        None => format!("{}[{}.index({}.len, {})]", items, rt, items, c[1]),
                    }
                });
                Ok(Lowered::new(code, elem))
            }
            InferredType::String => {
                let code = self.with_temps(vec![container, index], |c| match literal {
                    Some(i) if i >= 0 => format!("{}[{}..][0..1]", c[0], i),
                    Some(i) => format!("{}[{}.len - {}..][0..1]", c[0], c[0], -i),
                    None => format!("{}[{}.index({}.len, {})..][0..1]", c[0], rt, c[0], c[1]),
                });
                Ok(Lowered::new(code, InferredType::String))
            }
            InferredType::Dict(_, v) => {
                let v = (**v).clone();
                let code = self.with_temps(vec![container, index], |c| {
                    format!("({}.get({}) orelse {})", c[0], c[1], g.fail_expr("error.KeyError"))
                });
                Ok(Lowered::new(code, v))
            }
            InferredType::Tuple(items) => {
                let Some(i) = literal else {
                    return Ok(self.diag_value("Subscript", "tuple index must be an integer literal".into(), location));
                };
                let pos = if i < 0 { items.len() as i64 + i } else { i };
                match usize::try_from(pos).ok().and_then(|p| items.get(p).map(|t| (p, t.clone()))) {
                    Some((p, ty)) => Ok(Lowered::new(format!("{}[{}]", container.code, p), ty)),
                    None => Ok(self.diag_value("Subscript", format!("tuple index {} out of range", i), location)),
                }
            }
            InferredType::Instance(class) => {
                let has_getitem = self.types.classes().resolve_method(class, "__getitem__").is_some();
                if !has_getitem {
                    return Ok(self.diag_value("Subscript", format!("{} does not define __getitem__", class), location));
                }
                let ret = self
                    .types
                    .classes()
                    .resolve_method(class, "__getitem__")
                    .and_then(|(owner, _)| self.types.signature(&format!("{}.__getitem__", owner.name)))
                    .map(|s| s.returns.clone())
                    .unwrap_or(InferredType::Unknown);
                let alloc = self.alloc();
                let code = self.with_temps(vec![container, index], |c| g.wrap(&format!("{}.__getitem__({}, {})", c[0], alloc, c[1])));
                Ok(Lowered::new(code, ret))
            }
            _ => {
                let code = self.with_temps(vec![container, index], |c| g.wrap(&format!("{}.getItem({}, {})", rt, c[0], c[1])));
                Ok(Lowered::new(code, InferredType::Unknown))
            }
        }
    }

    fn lower_slicing(
        &mut self,
        value: &Expr,
        lower: Option<&Expr>,
        upper: Option<&Expr>,
        step: Option<&Expr>,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let container = self.lower_expr(value)?;
        if !matches!(container.ty, InferredType::List(_) | InferredType::String) {
            return Ok(self.diag_value("Slice", format!("slicing a {} value", container.ty), location));
        }
        if step.is_some() {
            return Ok(self.diag_value("Slice", "slices with a step are not supported".into(), location));
        }
        let rt = self.rt();
        let growable = container.is_growable();
        let ty = container.ty.clone();
        let lo = match lower {
            Some(e) => Some((e.as_int_literal(), self.lower_expr(e)?.code)),
            None => None,
        };
        let hi = match upper {
            Some(e) => Some((e.as_int_literal(), self.lower_expr(e)?.code)),
            None => None,
        };
        let bound = |items: &str, b: &Option<(Option<i64>, String)>, default: &str| -> String {
            match b {
                None => default.to_string(),
                Some((Some(i), _)) if *i >= 0 => format!("@min({}, {}.len)", i, items),
                Some((Some(i), _)) => format!("{}.len -| {}", items, -i),
                Some((None, code)) => format!("{}.clampIndex({}.len, {})", rt, items, code),
            }
        };
        let code = self.with_temps(vec![container], |c| {
            let items = view(&c[0], growable);
            let start = bound(&items, &lo, "0");
            let end = bound(&items, &hi, &format!("{}.len", items));
            if hi.is_none() {
                format!("{}[{}..]", items, start)
            } else {
                format!("{}[{}..{}]", items, start, end)
            }
        });
        Ok(Lowered::new(code, ty))
    }

    // ------- Attributes -------

    fn lower_attribute(&mut self, whole: &Expr, value: &Expr, attr: &str) -> Result<Lowered, LoweringError> {
        let key = self.scope_key();
        let shadowed = value.as_name().is_some_and(|n| self.scopes.is_declared(n));
        if !shadowed {
            if let Some(qualified) = self.types.qualify(whole, &key, &self.locals) {
                return Ok(self.lower_library_constant(&qualified, &whole.location));
            }
        }
        let receiver = self.lower_expr(value)?;
        match receiver.ty.clone() {
            InferredType::Instance(class) => {
                let classes = self.types.classes();
                if let Some((owner, method)) = classes.resolve_method(&class, attr) {
                    if method.is_property {
                        let ret = self
                            .types
                            .signature(&format!("{}.{}", owner.name, attr))
                            .map(|s| s.returns.clone())
                            .unwrap_or(InferredType::Unknown);
                        let code = format!("({})", self.guard(&format!("{}.{}({})", receiver.code, ident(attr), self.alloc())));
                        return Ok(Lowered::new(code, ret));
                    }
                }
                let ty = self.types.field_type(&class, attr);
                let repr = self.field_repr(&class, attr).unwrap_or_else(|| super::types::default_repr(&ty));
                Ok(Lowered::new(format!("{}.{}", receiver.code, ident(attr)), ty).with_repr(repr))
            }
            InferredType::Queue if attr == "maxsize" => {
                Ok(Lowered::new(format!("{}.maxsize", receiver.code), InferredType::Int))
            }
            _ => Ok(Lowered::new(format!("{}.{}", receiver.code, ident(attr)), InferredType::Unknown)),
        }
    }

    /// Representation recorded for a class field, searching base classes.
    pub(crate) fn field_repr(&self, class: &str, field: &str) -> Option<ValueRepr> {
        self.types
            .classes()
            .chain(class)
            .iter()
            .find_map(|c| self.field_reprs.get(&format!("{}.{}", c.name, field)).cloned())
    }

    /// A module attribute used as a value (`math.pi`).
    fn lower_library_constant(&mut self, qualified: &str, location: &Option<Location>) -> Lowered {
        let Some((module, symbol)) = self.split_module(qualified) else {
            let root = qualified.split('.').next().unwrap_or(qualified).to_string();
            return self.diag_value("Attribute", format!("module '{}' is not available", root), location);
        };
        let spec = self.imports.lookup(&module).and_then(|m| m.shim(&symbol)).cloned();
        match spec {
            Some(spec) if spec.constant => {
                let env = self.shim_env();
                match self.shims.emit(&module, &symbol, &[], env) {
                    Some(code) => {
                        self.used_modules.insert(module);
                        let ty = spec.returns.as_deref().map(InferredType::from_type_name).unwrap_or(InferredType::Unknown);
                        Lowered::new(code, ty)
                    }
                    None => self.diag_value("Attribute", format!("{} has no lowering", qualified), location),
                }
            }
            Some(_) => self.diag_value(
                "Attribute",
                format!("{} is a function and cannot be used as a value", qualified),
                location,
            ),
            None => self.diag_value("Attribute", format!("{} is not available", qualified), location),
        }
    }

    /// Split a qualified name at its longest registered module prefix.
    pub(crate) fn split_module(&self, qualified: &str) -> Option<(String, String)> {
        let mut cut = qualified.len();
        while let Some(pos) = qualified[..cut].rfind('.') {
            let module = &qualified[..pos];
            if self.imports.lookup(module).is_some() {
                return Some((module.to_string(), qualified[pos + 1..].to_string()));
            }
            cut = pos;
        }
        None
    }

    // ------- Strings -------

    /// Format string and arguments for a sequence of f-string parts.
    pub(crate) fn format_parts(&mut self, values: &[Expr]) -> Result<(String, Vec<Lowered>), LoweringError> {
        let mut fmt = String::new();
        let mut args = Vec::new();
        for part in values {
            match &part.kind {
                ExprKind::Constant { value: Constant::Str(s) } => fmt.push_str(&escape_format(s)),
                ExprKind::FormattedValue { value, format_spec } => {
                    let (field, arg) = self.format_arg(value, format_spec.as_deref())?;
                    fmt.push_str(&field);
                    args.push(arg);
                }
                _ => {
                    let (field, arg) = self.format_arg(part, None)?;
                    fmt.push_str(&field);
                    args.push(arg);
                }
            }
        }
        Ok((fmt, args))
    }

    /// Placeholder and argument for one interpolated value.
    pub(crate) fn format_arg(&mut self, value: &Expr, spec: Option<&str>) -> Result<(String, Lowered), LoweringError> {
        let arg = self.lower_expr(value)?;
        Ok(self.format_lowered(arg, spec))
    }

    pub(crate) fn format_lowered(&mut self, arg: Lowered, spec: Option<&str>) -> (String, Lowered) {
        match arg.ty {
            InferredType::Bool => {
                let code = format!("(if ({}) \"True\" else \"False\")", arg.code);
                ("{s}".to_string(), Lowered::new(code, InferredType::String))
            }
            InferredType::None => ("{s}".to_string(), Lowered::new("\"None\"".into(), InferredType::String)),
            InferredType::List(_) if arg.is_growable() => {
                let code = format!("{}.items", arg.code);
                ("{any}".to_string(), Lowered { code, ..arg })
            }
            InferredType::Instance(_) | InferredType::Unknown if spec.is_none() => {
                let code = format!("{}.show({})", self.rt(), arg.code);
                ("{}".to_string(), Lowered { code, ..arg })
            }
            _ => (format_field(spec, &arg.ty), arg),
        }
    }

    fn lower_fstring(&mut self, values: &[Expr]) -> Result<Lowered, LoweringError> {
        let literal: Option<String> = values.iter().map(|v| v.as_str_literal()).collect::<Option<Vec<_>>>().map(|p| p.concat());
        if let Some(text) = literal {
            return Ok(Lowered::new(quoted(&text), InferredType::String));
        }
        let (fmt, args) = self.format_parts(values)?;
        let alloc = self.alloc();
        let g = self.guarder();
        let code = self.with_temps(args, |c| {
            g.wrap(&format!("std.fmt.allocPrint({}, \"{}\", .{{ {} }})", alloc, fmt, c.join(", ")))
        });
        Ok(Lowered::new(code, InferredType::String).owned(Release::Free))
    }
}

fn lower_constant(value: &Constant) -> Lowered {
    match value {
        Constant::Bool(b) => Lowered::new(b.to_string(), InferredType::Bool),
        Constant::Int(i) => Lowered::new(i.to_string(), InferredType::Int),
        Constant::Float(f) => {
            let code = if f.is_nan() {
                "std.math.nan(f64)".to_string()
            } else if f.is_infinite() {
                if *f > 0.0 { "std.math.inf(f64)".to_string() } else { "-std.math.inf(f64)".to_string() }
            } else {
                format!("{:?}", f)
            };
            Lowered::new(code, InferredType::Float)
        }
        Constant::Str(s) => Lowered::new(quoted(s), InferredType::String),
        Constant::None => Lowered::new("null".into(), InferredType::None),
    }
}

/// Arithmetic and bitwise operators over numeric operands.
fn numeric_binop(
    op: BinOperator,
    l: &Lowered,
    r: &Lowered,
    result: &InferredType,
    rt: &str,
    g: &super::context::Guard,
) -> String {
    let float = *result == InferredType::Float;
    let (a, b) = if float || op == BinOperator::Div {
        (as_float(&l.code, &l.ty), as_float(&r.code, &r.ty))
    } else {
        (as_int(&l.code, &l.ty), as_int(&r.code, &r.ty))
    };
    match op {
        BinOperator::Div => format!("({} / {})", a, b),
        BinOperator::FloorDiv if float => format!("@floor({} / {})", a, b),
        BinOperator::FloorDiv => g.wrap(&format!("{}.floorDiv({}, {})", rt, a, b)),
        BinOperator::Mod => format!("@mod({}, {})", a, b),
        BinOperator::Pow if float => format!("std.math.pow(f64, {}, {})", a, b),
        BinOperator::Pow => g.wrap(&format!("{}.powInt({}, {})", rt, a, b)),
        BinOperator::LShift | BinOperator::RShift => format!("({} {} @as(u6, @intCast({})))", a, op.symbol(), b),
        _ => format!("({} {} {})", a, op.symbol(), b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_specs_translate() {
        assert_eq!(format_field(Some(".2f"), &InferredType::Float), "{d:.2}");
        assert_eq!(format_field(Some("05d"), &InferredType::Int), "{d:0>5}");
        assert_eq!(format_field(Some(">8"), &InferredType::String), "{s:>8}");
        assert_eq!(format_field(Some("10"), &InferredType::String), "{s:<10}");
        assert_eq!(format_field(Some("x"), &InferredType::Int), "{x}");
        assert_eq!(format_field(None, &InferredType::Int), "{d}");
    }

    #[test]
    fn mixed_numeric_operands_widen() {
        let g = super::super::context::Guard::default();
        let l = Lowered::new("a".into(), InferredType::Int);
        let r = Lowered::new("b".into(), InferredType::Float);
        let code = numeric_binop(BinOperator::Add, &l, &r, &InferredType::Float, "runtime", &g);
        assert_eq!(code, "(@as(f64, @floatFromInt(a)) + b)");
        let code = numeric_binop(BinOperator::FloorDiv, &l, &l, &InferredType::Int, "runtime", &g);
        assert_eq!(code, "try runtime.floorDiv(a, a)");
    }

    #[test]
    fn string_equality_uses_mem_eql() {
        let s = InferredType::String;
        assert_eq!(equality("a", &s, "b", &s, "rt"), "std.mem.eql(u8, a, b)");
        let opt = InferredType::Optional(Box::new(InferredType::Int));
        assert_eq!(equality("x", &opt, "null", &InferredType::None, "rt"), "(x == null)");
    }
}
