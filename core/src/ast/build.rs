//! file: core/src/ast/build.rs
//! description: terse constructors for building module ASTs in code.
//!
//! Embedders that already hold a parsed tree and the test-suite use these
//! instead of spelling out JSON. Nodes carry no location.
//!
use super::kind::{BinOperator, BoolOperator, CmpOperator, UnaryOperator};
use super::node::{
    Alias, Arg, Comprehension, Constant, ExceptHandler, Expr, ExprKind, Keyword, Module, Stmt,
    StmtKind,
};

fn e(kind: ExprKind) -> Expr {
    Expr::new(kind, None)
}

fn s(kind: StmtKind) -> Stmt {
    Stmt::new(kind, None)
}

pub fn module(body: Vec<Stmt>) -> Module {
    Module { body }
}

pub fn int(v: i64) -> Expr {
    e(ExprKind::Constant { value: Constant::Int(v) })
}

pub fn float(v: f64) -> Expr {
    e(ExprKind::Constant { value: Constant::Float(v) })
}

pub fn string(v: &str) -> Expr {
    e(ExprKind::Constant { value: Constant::Str(v.to_string()) })
}

pub fn boolean(v: bool) -> Expr {
    e(ExprKind::Constant { value: Constant::Bool(v) })
}

pub fn none() -> Expr {
    e(ExprKind::Constant { value: Constant::None })
}

pub fn name(id: &str) -> Expr {
    e(ExprKind::Name { id: id.to_string() })
}

pub fn binop(left: Expr, op: BinOperator, right: Expr) -> Expr {
    e(ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) })
}

pub fn unary(op: UnaryOperator, operand: Expr) -> Expr {
    e(ExprKind::UnaryOp { op, operand: Box::new(operand) })
}

pub fn boolop(op: BoolOperator, values: Vec<Expr>) -> Expr {
    e(ExprKind::BoolOp { op, values })
}

pub fn compare(left: Expr, op: CmpOperator, right: Expr) -> Expr {
    e(ExprKind::Compare { left: Box::new(left), ops: vec![op], comparators: vec![right] })
}

/// `left op0 c0 op1 c1 ...`; `ops` and `comparators` pair up.
pub fn compare_chain(left: Expr, ops: Vec<CmpOperator>, comparators: Vec<Expr>) -> Expr {
    e(ExprKind::Compare { left: Box::new(left), ops, comparators })
}

pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
    e(ExprKind::Call { func: Box::new(func), args, keywords: Vec::new() })
}

pub fn call_kw(func: Expr, args: Vec<Expr>, keywords: Vec<(&str, Expr)>) -> Expr {
    let keywords = keywords
        .into_iter()
        .map(|(k, v)| Keyword { arg: Some(k.to_string()), value: v })
        .collect();
    e(ExprKind::Call { func: Box::new(func), args, keywords })
}

/// `name(args...)`
pub fn call_name(func: &str, args: Vec<Expr>) -> Expr {
    call(name(func), args)
}

pub fn attr(value: Expr, attr: &str) -> Expr {
    e(ExprKind::Attribute { value: Box::new(value), attr: attr.to_string() })
}

/// `receiver.method(args...)`
pub fn method(receiver: Expr, method: &str, args: Vec<Expr>) -> Expr {
    call(attr(receiver, method), args)
}

pub fn if_exp(test: Expr, body: Expr, orelse: Expr) -> Expr {
    e(ExprKind::IfExp { test: Box::new(test), body: Box::new(body), orelse: Box::new(orelse) })
}

pub fn list(elts: Vec<Expr>) -> Expr {
    e(ExprKind::List { elts })
}

pub fn tuple(elts: Vec<Expr>) -> Expr {
    e(ExprKind::Tuple { elts })
}

pub fn set(elts: Vec<Expr>) -> Expr {
    e(ExprKind::Set { elts })
}

pub fn dict(pairs: Vec<(Expr, Expr)>) -> Expr {
    let (keys, values): (Vec<_>, Vec<_>) = pairs.into_iter().map(|(k, v)| (Some(k), v)).unzip();
    e(ExprKind::Dict { keys, values })
}

pub fn subscript(value: Expr, index: Expr) -> Expr {
    e(ExprKind::Subscript { value: Box::new(value), slice: Box::new(index) })
}

pub fn slice(lower: Option<Expr>, upper: Option<Expr>) -> Expr {
    e(ExprKind::Slice { lower: lower.map(Box::new), upper: upper.map(Box::new), step: None })
}

pub fn fstring(values: Vec<Expr>) -> Expr {
    e(ExprKind::JoinedStr { values })
}

pub fn formatted(value: Expr) -> Expr {
    e(ExprKind::FormattedValue { value: Box::new(value), format_spec: None })
}

pub fn lambda(params: &[&str], body: Expr) -> Expr {
    e(ExprKind::Lambda { args: args(params), body: Box::new(body) })
}

pub fn comp(target: Expr, iter: Expr, ifs: Vec<Expr>) -> Comprehension {
    Comprehension { target, iter, ifs }
}

pub fn list_comp(elt: Expr, generators: Vec<Comprehension>) -> Expr {
    e(ExprKind::ListComp { elt: Box::new(elt), generators })
}

pub fn dict_comp(key: Expr, value: Expr, generators: Vec<Comprehension>) -> Expr {
    e(ExprKind::DictComp { key: Box::new(key), value: Box::new(value), generators })
}

pub fn await_(value: Expr) -> Expr {
    e(ExprKind::Await { value: Box::new(value) })
}

pub fn yield_(value: Option<Expr>) -> Expr {
    e(ExprKind::Yield { value: value.map(Box::new) })
}

pub fn args(params: &[&str]) -> Vec<Arg> {
    params.iter().map(|p| Arg { arg: p.to_string(), annotation: None }).collect()
}

/// A parameter with a type annotation given as a bare name (`x: int`).
pub fn typed_arg(param: &str, annotation: &str) -> Arg {
    Arg { arg: param.to_string(), annotation: Some(name(annotation)) }
}

pub fn expr_stmt(value: Expr) -> Stmt {
    s(StmtKind::Expr { value })
}

pub fn assign(target: &str, value: Expr) -> Stmt {
    s(StmtKind::Assign { targets: vec![name(target)], value })
}

pub fn assign_to(target: Expr, value: Expr) -> Stmt {
    s(StmtKind::Assign { targets: vec![target], value })
}

pub fn ann_assign(target: &str, annotation: Expr, value: Option<Expr>) -> Stmt {
    s(StmtKind::AnnAssign { target: name(target), annotation, value })
}

pub fn aug_assign(target: &str, op: BinOperator, value: Expr) -> Stmt {
    s(StmtKind::AugAssign { target: name(target), op, value })
}

pub fn ret(value: Option<Expr>) -> Stmt {
    s(StmtKind::Return { value })
}

pub fn if_(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    s(StmtKind::If { test, body, orelse })
}

pub fn while_(test: Expr, body: Vec<Stmt>) -> Stmt {
    s(StmtKind::While { test, body, orelse: Vec::new() })
}

pub fn for_(target: Expr, iter: Expr, body: Vec<Stmt>) -> Stmt {
    s(StmtKind::For { target, iter, body, orelse: Vec::new() })
}

pub fn def(fn_name: &str, params: Vec<Arg>, body: Vec<Stmt>) -> Stmt {
    s(StmtKind::FunctionDef {
        name: fn_name.to_string(),
        args: params,
        body,
        returns: None,
        decorator_list: Vec::new(),
        is_async: false,
    })
}

pub fn def_returning(fn_name: &str, params: Vec<Arg>, returns: Expr, body: Vec<Stmt>) -> Stmt {
    s(StmtKind::FunctionDef {
        name: fn_name.to_string(),
        args: params,
        body,
        returns: Some(returns),
        decorator_list: Vec::new(),
        is_async: false,
    })
}

pub fn async_def(fn_name: &str, params: Vec<Arg>, body: Vec<Stmt>) -> Stmt {
    s(StmtKind::FunctionDef {
        name: fn_name.to_string(),
        args: params,
        body,
        returns: None,
        decorator_list: Vec::new(),
        is_async: true,
    })
}

pub fn class(class_name: &str, bases: &[&str], body: Vec<Stmt>) -> Stmt {
    s(StmtKind::ClassDef {
        name: class_name.to_string(),
        bases: bases.iter().map(|b| name(b)).collect(),
        body,
    })
}

pub fn raise(exc: Option<Expr>) -> Stmt {
    s(StmtKind::Raise { exc })
}

pub fn try_(body: Vec<Stmt>, handlers: Vec<ExceptHandler>, finalbody: Vec<Stmt>) -> Stmt {
    s(StmtKind::Try { body, handlers, orelse: Vec::new(), finalbody })
}

pub fn handler(exc_type: Option<&str>, bound: Option<&str>, body: Vec<Stmt>) -> ExceptHandler {
    ExceptHandler {
        exc_type: exc_type.map(name),
        name: bound.map(|b| b.to_string()),
        body,
    }
}

pub fn import(module_name: &str, asname: Option<&str>) -> Stmt {
    s(StmtKind::Import {
        names: vec![Alias { name: module_name.to_string(), asname: asname.map(|a| a.to_string()) }],
    })
}

pub fn import_from(module_name: &str, names: &[&str]) -> Stmt {
    s(StmtKind::ImportFrom {
        module: Some(module_name.to_string()),
        names: names.iter().map(|n| Alias { name: n.to_string(), asname: None }).collect(),
    })
}

pub fn pass() -> Stmt {
    s(StmtKind::Pass)
}

pub fn brk() -> Stmt {
    s(StmtKind::Break)
}

pub fn cont() -> Stmt {
    s(StmtKind::Continue)
}

pub fn assert_(test: Expr) -> Stmt {
    s(StmtKind::Assert { test, msg: None })
}

pub fn print(args: Vec<Expr>) -> Stmt {
    expr_stmt(call_name("print", args))
}

/// `range(stop)` / `range(start, stop)` call expression.
pub fn range(bounds: Vec<Expr>) -> Expr {
    call_name("range", bounds)
}
