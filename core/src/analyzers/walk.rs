//! file: core/src/analyzers/walk.rs
//! description: read-only traversal helpers over the module AST.
//!
//! Statement walkers stop at nested `def`/`class` bodies; those are their
//! own scopes and are visited separately by the analyzers.
//!
use crate::ast::{Expr, ExprKind, Stmt, StmtKind};

/// Direct child expressions of `expr`, in source order.
pub fn child_exprs(expr: &Expr) -> Vec<&Expr> {
    let mut out: Vec<&Expr> = Vec::new();
    match &expr.kind {
        ExprKind::Constant { .. } | ExprKind::Name { .. } => {}
        ExprKind::BinOp { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        ExprKind::UnaryOp { operand, .. } => out.push(operand),
        ExprKind::BoolOp { values, .. } => out.extend(values.iter()),
        ExprKind::Compare { left, comparators, .. } => {
            out.push(left);
            out.extend(comparators.iter());
        }
        ExprKind::Call { func, args, keywords } => {
            out.push(func);
            out.extend(args.iter());
            out.extend(keywords.iter().map(|k| &k.value));
        }
        ExprKind::IfExp { test, body, orelse } => {
            out.push(test);
            out.push(body);
            out.push(orelse);
        }
        ExprKind::List { elts } | ExprKind::Tuple { elts } | ExprKind::Set { elts } => out.extend(elts.iter()),
        ExprKind::Dict { keys, values } => {
            for (k, v) in keys.iter().zip(values.iter()) {
                if let Some(k) = k {
                    out.push(k);
                }
                out.push(v);
            }
        }
        ExprKind::Subscript { value, slice } => {
            out.push(value);
            out.push(slice);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                out.push(part);
            }
        }
        ExprKind::Attribute { value, .. } => out.push(value),
        ExprKind::JoinedStr { values } => out.extend(values.iter()),
        ExprKind::FormattedValue { value, .. } => out.push(value),
        ExprKind::Lambda { body, .. } => out.push(body),
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            for g in generators {
                out.push(&g.iter);
                out.push(&g.target);
                out.extend(g.ifs.iter());
            }
            out.push(elt);
        }
        ExprKind::DictComp { key, value, generators } => {
            for g in generators {
                out.push(&g.iter);
                out.push(&g.target);
                out.extend(g.ifs.iter());
            }
            out.push(key);
            out.push(value);
        }
        ExprKind::Await { value } | ExprKind::Starred { value } => out.push(value),
        ExprKind::Yield { value } => {
            if let Some(v) = value {
                out.push(v);
            }
        }
    }
    out
}

/// Visit `expr` and every expression below it, pre-order.
pub fn visit_expr<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    f(expr);
    for child in child_exprs(expr) {
        visit_expr(child, f);
    }
}

/// Expressions that belong directly to `stmt` (not to nested blocks).
pub fn stmt_exprs(stmt: &Stmt) -> Vec<&Expr> {
    let mut out: Vec<&Expr> = Vec::new();
    match &stmt.kind {
        StmtKind::FunctionDef { .. } | StmtKind::ClassDef { .. } => {}
        StmtKind::Return { value } => out.extend(value.iter()),
        StmtKind::Delete { targets } => out.extend(targets.iter()),
        StmtKind::Assign { targets, value } => {
            out.extend(targets.iter());
            out.push(value);
        }
        StmtKind::AnnAssign { target, value, .. } => {
            out.push(target);
            out.extend(value.iter());
        }
        StmtKind::AugAssign { target, value, .. } => {
            out.push(target);
            out.push(value);
        }
        StmtKind::For { target, iter, .. } => {
            out.push(target);
            out.push(iter);
        }
        StmtKind::While { test, .. } | StmtKind::If { test, .. } => out.push(test),
        StmtKind::With { items, .. } => {
            for item in items {
                out.push(&item.context_expr);
                out.extend(item.optional_vars.iter());
            }
        }
        StmtKind::Raise { exc } => out.extend(exc.iter()),
        StmtKind::Try { handlers, .. } => {
            for h in handlers {
                out.extend(h.exc_type.iter());
            }
        }
        StmtKind::Assert { test, msg } => {
            out.push(test);
            out.extend(msg.iter());
        }
        StmtKind::Expr { value } => out.push(value),
        StmtKind::Import { .. }
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global { .. }
        | StmtKind::Nonlocal { .. }
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
    out
}

/// Nested statement blocks of `stmt`, excluding `def`/`class` bodies.
pub fn child_blocks(stmt: &Stmt) -> Vec<&[Stmt]> {
    match &stmt.kind {
        StmtKind::For { body, orelse, .. }
        | StmtKind::While { body, orelse, .. }
        | StmtKind::If { body, orelse, .. } => vec![body.as_slice(), orelse.as_slice()],
        StmtKind::With { body, .. } => vec![body.as_slice()],
        StmtKind::Try { body, handlers, orelse, finalbody } => {
            let mut blocks = vec![body.as_slice()];
            blocks.extend(handlers.iter().map(|h| h.body.as_slice()));
            blocks.push(orelse.as_slice());
            blocks.push(finalbody.as_slice());
            blocks
        }
        _ => Vec::new(),
    }
}

/// Visit every statement of `body` and of its nested blocks, pre-order.
pub fn visit_stmts<'a>(body: &'a [Stmt], f: &mut dyn FnMut(&'a Stmt)) {
    for stmt in body {
        f(stmt);
        for block in child_blocks(stmt) {
            visit_stmts(block, f);
        }
    }
}

/// Visit every expression reachable from `body` without entering nested
/// function or class bodies.
pub fn visit_body_exprs<'a>(body: &'a [Stmt], f: &mut dyn FnMut(&'a Expr)) {
    visit_stmts(body, &mut |stmt| {
        for expr in stmt_exprs(stmt) {
            visit_expr(expr, f);
        }
    });
}

/// Whether `body` contains a `yield` outside nested definitions.
pub fn contains_yield(body: &[Stmt]) -> bool {
    let mut found = false;
    visit_body_exprs(body, &mut |e| {
        if matches!(e.kind, ExprKind::Yield { .. }) {
            found = true;
        }
    });
    found
}

/// Names bound by an assignment target (`x`, `a, b`, `[a, b]`).
pub fn target_names(target: &Expr) -> Vec<&str> {
    match &target.kind {
        ExprKind::Name { id } => vec![id.as_str()],
        ExprKind::Tuple { elts } | ExprKind::List { elts } => elts.iter().flat_map(target_names).collect(),
        ExprKind::Starred { value } => target_names(value),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn yield_inside_nested_def_is_not_counted() {
        let body = vec![def("inner", args(&[]), vec![expr_stmt(yield_(Some(int(1))))])];
        assert!(!contains_yield(&body));
        let body = vec![for_(name("x"), name("xs"), vec![expr_stmt(yield_(Some(name("x"))))])];
        assert!(contains_yield(&body));
    }

    #[test]
    fn tuple_targets_flatten() {
        let t = tuple(vec![name("a"), tuple(vec![name("b"), name("c")])]);
        assert_eq!(target_names(&t), vec!["a", "b", "c"]);
    }
}
