//! file: core/src/analyzers/prepass.rs
//! description: per-scope binding facts computed before lowering.
//!
//! Lowering emits declarations as it walks statements in order, but the
//! target language wants to know up front whether a binding is `var` or
//! `const`, whether it must be declared before the block that first assigns
//! it, and whether its value leaves the scope (which suppresses a scoped
//! release). This pass answers those questions once per function scope,
//! keyed the same way as the type tables (`f`, `C.m`, `outer.inner`).
//!
use std::collections::{HashMap, HashSet};

use log::debug;

use super::infer::MODULE_SCOPE;
use super::walk;
use crate::ast::{Expr, ExprKind, Module, Stmt, StmtKind};

/// Methods that mutate their receiver in place.
pub const MUTATING_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "clear", "sort", "reverse", "update", "setdefault",
    "popitem", "put", "put_nowait", "get_nowait", "add", "discard",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFacts {
    /// Names that must bind with `var`.
    pub mutated: HashSet<String>,
    /// Names whose value leaves the scope.
    pub escaping: HashSet<String>,
    /// Names first assigned inside a nested block but used outside it.
    pub hoisted: Vec<String>,
    /// Every name read somewhere in the scope, nested definitions included.
    pub reads: HashSet<String>,
    /// Nested function name -> names it captures from this scope chain.
    pub captures: HashMap<String, Vec<String>>,
    /// Names declared `global` or `nonlocal`.
    pub globals: HashSet<String>,
    /// Names changed in place (mutating method receivers, subscript
    /// stores, deletions); list values bound to them must be growable.
    pub grown: HashSet<String>,
    /// Names a nested function rebinds through `nonlocal`; captured by
    /// pointer instead of by value.
    pub shared: HashSet<String>,
}

impl ScopeFacts {
    pub fn is_mutated(&self, name: &str) -> bool {
        self.mutated.contains(name)
    }

    pub fn escapes(&self, name: &str) -> bool {
        self.escaping.contains(name)
    }

    pub fn is_read(&self, name: &str) -> bool {
        self.reads.contains(name)
    }

    pub fn is_grown(&self, name: &str) -> bool {
        self.grown.contains(name)
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.shared.contains(name)
    }
}

/// Identifiers bound to closure values (nested functions and capturing
/// lambdas) for the whole module; called through `name.call(...)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClosureVarSet(HashSet<String>);

/// Identifiers bound to non-capturing lambdas; called through a function
/// pointer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LambdaVarSet(HashSet<String>);

macro_rules! name_set {
    ($set:ident) => {
        impl $set {
            pub fn insert(&mut self, name: &str) {
                self.0.insert(name.to_string());
            }

            pub fn remove(&mut self, name: &str) {
                self.0.remove(name);
            }

            pub fn contains(&self, name: &str) -> bool {
                self.0.contains(name)
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }
    };
}

name_set!(ClosureVarSet);
name_set!(LambdaVarSet);

#[derive(Debug, Clone, Default)]
pub struct ModuleFacts {
    scopes: HashMap<String, ScopeFacts>,
    /// Module-level names bound once to a literal; emitted as top-level
    /// constants so functions can read them.
    pub constants: Vec<String>,
    empty: ScopeFacts,
}

impl ModuleFacts {
    pub fn analyze(module: &Module) -> Self {
        let mut facts = ModuleFacts::default();
        let module_facts = scope_facts(&module.body, &[]);
        facts.constants = module_constants(&module.body, &module_facts);
        facts.scopes.insert(MODULE_SCOPE.to_string(), module_facts);
        facts.collect(&module.body, None);
        debug!(
            "prepass: {} scopes, {} module constants",
            facts.scopes.len(),
            facts.constants.len()
        );
        facts
    }

    pub fn scope(&self, key: &str) -> &ScopeFacts {
        self.scopes.get(key).unwrap_or(&self.empty)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.iter().any(|c| c == name)
    }

    fn collect(&mut self, body: &[Stmt], prefix: Option<&str>) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::FunctionDef { name, args, body: fn_body, .. } => {
                    let key = match prefix {
                        Some(p) => format!("{}.{}", p, name),
                        None => name.clone(),
                    };
                    let params: Vec<&str> = args.iter().map(|a| a.arg.as_str()).collect();
                    let mut facts = scope_facts(fn_body, &params);

                    // what each nested def needs from this scope
                    let mut local: HashSet<String> = params.iter().map(|p| p.to_string()).collect();
                    local.extend(assigned_names(fn_body));
                    for inner in fn_body.iter().flat_map(nested_defs) {
                        if let StmtKind::FunctionDef { name: inner_name, args: inner_args, body: inner_body, .. } = &inner.kind {
                            let mut captured = free_names(inner_body, inner_args.iter().map(|a| a.arg.as_str()))
                                .into_iter()
                                .filter(|n| local.contains(n) && n != inner_name)
                                .collect::<Vec<_>>();
                            // `nonlocal` names are assigned inside but still belong to this scope
                            for stmt in inner_body {
                                if let StmtKind::Nonlocal { names } = &stmt.kind {
                                    for name in names.iter().filter(|n| local.contains(*n)) {
                                        if !captured.contains(name) {
                                            captured.push(name.clone());
                                        }
                                        facts.shared.insert(name.clone());
                                        facts.mutated.insert(name.clone());
                                    }
                                }
                            }
                            captured.sort();
                            for name in &captured {
                                facts.escaping.insert(name.clone());
                            }
                            facts.captures.insert(inner_name.clone(), captured);
                        }
                    }
                    self.scopes.insert(key.clone(), facts);
                    self.collect(fn_body, Some(&key));
                }
                StmtKind::ClassDef { name, body: class_body, .. } if prefix.is_none() => {
                    self.collect(class_body, Some(name));
                }
                _ => {
                    for block in walk::child_blocks(stmt) {
                        self.collect(block, prefix);
                    }
                }
            }
        }
    }
}

/// Function definitions directly inside `stmt` (through nested blocks, not
/// through other definitions).
fn nested_defs(stmt: &Stmt) -> Vec<&Stmt> {
    match &stmt.kind {
        StmtKind::FunctionDef { .. } => vec![stmt],
        _ => walk::child_blocks(stmt).into_iter().flatten().flat_map(nested_defs).collect(),
    }
}

fn scope_facts(body: &[Stmt], params: &[&str]) -> ScopeFacts {
    let mut facts = ScopeFacts::default();
    let mut assign_counts: HashMap<String, usize> = params.iter().map(|p| (p.to_string(), 1)).collect();

    walk::visit_stmts(body, &mut |stmt| match &stmt.kind {
        StmtKind::Assign { targets, value } => {
            for target in targets {
                match &target.kind {
                    ExprKind::Subscript { value: container, .. } => {
                        if let Some(root) = root_name(container) {
                            facts.mutated.insert(root.to_string());
                            facts.grown.insert(root.to_string());
                        }
                        mark_escaping(value, &mut facts.escaping);
                    }
                    ExprKind::Attribute { .. } => mark_escaping(value, &mut facts.escaping),
                    _ => {
                        for name in walk::target_names(target) {
                            *assign_counts.entry(name.to_string()).or_default() += 1;
                        }
                    }
                }
            }
            // `y = x` aliases x
            if let ExprKind::Name { id } = &value.kind {
                facts.escaping.insert(id.clone());
            }
            if let ExprKind::List { elts } | ExprKind::Tuple { elts } | ExprKind::Dict { values: elts, .. } = &value.kind {
                for e in elts {
                    mark_escaping(e, &mut facts.escaping);
                }
            }
        }
        StmtKind::AnnAssign { target, value: Some(_), .. } | StmtKind::For { target, .. } => {
            for name in walk::target_names(target) {
                *assign_counts.entry(name.to_string()).or_default() += 1;
            }
        }
        StmtKind::AugAssign { target, .. } => {
            if let Some(root) = root_name(target) {
                facts.mutated.insert(root.to_string());
            }
        }
        StmtKind::Delete { targets } => {
            for t in targets {
                if let Some(root) = root_name(t) {
                    facts.mutated.insert(root.to_string());
                    facts.grown.insert(root.to_string());
                }
            }
        }
        StmtKind::Return { value: Some(v) } => mark_escaping(v, &mut facts.escaping),
        StmtKind::Global { names } | StmtKind::Nonlocal { names } => {
            facts.globals.extend(names.iter().cloned());
        }
        _ => {}
    });

    for (name, count) in assign_counts {
        if count > 1 {
            facts.mutated.insert(name);
        }
    }

    walk::visit_body_exprs(body, &mut |expr| match &expr.kind {
        ExprKind::Call { func, args, .. } => {
            if let ExprKind::Attribute { value, attr } = &func.kind {
                if MUTATING_METHODS.contains(&attr.as_str()) {
                    if let Some(root) = root_name(value) {
                        facts.mutated.insert(root.to_string());
                        facts.grown.insert(root.to_string());
                    }
                }
                if matches!(attr.as_str(), "append" | "insert" | "extend" | "put" | "put_nowait" | "setdefault") {
                    for a in args {
                        mark_escaping(a, &mut facts.escaping);
                    }
                }
            }
            // constructor arguments are stored in the new instance
            if func.as_name().is_some_and(|n| n.starts_with(|c: char| c.is_ascii_uppercase())) {
                for a in args {
                    mark_escaping(a, &mut facts.escaping);
                }
            }
        }
        ExprKind::Yield { value: Some(v) } => mark_escaping(v, &mut facts.escaping),
        ExprKind::Lambda { args, body } => {
            let params: HashSet<&str> = args.iter().map(|a| a.arg.as_str()).collect();
            walk::visit_expr(body, &mut |e| {
                if let Some(n) = e.as_name() {
                    if !params.contains(n) {
                        facts.escaping.insert(n.to_string());
                    }
                }
            });
        }
        _ => {}
    });

    facts.reads = read_names(body);
    facts.hoisted = hoisted_names(body);
    for name in &facts.hoisted {
        facts.mutated.insert(name.clone());
    }
    facts
}

fn mark_escaping(expr: &Expr, out: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Name { id } => {
            out.insert(id.clone());
        }
        ExprKind::List { elts } | ExprKind::Tuple { elts } | ExprKind::Set { elts } => {
            for e in elts {
                mark_escaping(e, out);
            }
        }
        ExprKind::Dict { values, .. } => {
            for v in values {
                mark_escaping(v, out);
            }
        }
        ExprKind::IfExp { body, orelse, .. } => {
            mark_escaping(body, out);
            mark_escaping(orelse, out);
        }
        _ => {}
    }
}

/// Root variable of `x`, `x[i]`, `x.attr`, `x[i][j]`.
pub fn root_name(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Name { id } => Some(id),
        ExprKind::Subscript { value, .. } | ExprKind::Attribute { value, .. } => root_name(value),
        _ => None,
    }
}

/// Names assigned anywhere in `body` (not entering nested definitions).
pub fn assigned_names(body: &[Stmt]) -> HashSet<String> {
    let mut out = HashSet::new();
    walk::visit_stmts(body, &mut |stmt| match &stmt.kind {
        StmtKind::Assign { targets, .. } => {
            for t in targets {
                out.extend(walk::target_names(t).into_iter().map(str::to_string));
            }
        }
        StmtKind::AnnAssign { target, .. } | StmtKind::AugAssign { target, .. } | StmtKind::For { target, .. } => {
            out.extend(walk::target_names(target).into_iter().map(str::to_string));
        }
        StmtKind::With { items, .. } => {
            for item in items {
                if let Some(v) = &item.optional_vars {
                    out.extend(walk::target_names(v).into_iter().map(str::to_string));
                }
            }
        }
        StmtKind::FunctionDef { name, .. } => {
            out.insert(name.clone());
        }
        StmtKind::Try { handlers, .. } => {
            out.extend(handlers.iter().filter_map(|h| h.name.clone()));
        }
        _ => {}
    });
    out
}

/// Every identifier read in `body`, including inside nested definitions.
pub fn read_names(body: &[Stmt]) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_reads(body, &mut out);
    out
}

fn collect_reads(body: &[Stmt], out: &mut HashSet<String>) {
    walk::visit_stmts(body, &mut |stmt| {
        let direct_targets: Vec<&Expr> = match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().filter(|t| t.as_name().is_some()).collect(),
            StmtKind::AnnAssign { target, .. } | StmtKind::For { target, .. } => vec![target],
            _ => Vec::new(),
        };
        for expr in walk::stmt_exprs(stmt) {
            if direct_targets.iter().any(|t| std::ptr::eq(*t, expr)) && expr.as_name().is_some() {
                continue;
            }
            walk::visit_expr(expr, &mut |e| {
                if let Some(n) = e.as_name() {
                    out.insert(n.to_string());
                }
            });
        }
        if let StmtKind::FunctionDef { body: inner, .. } = &stmt.kind {
            collect_reads(inner, out);
        }
    });
}

/// Names read in `body` that are neither parameters nor assigned locally.
pub fn free_names<'a>(body: &[Stmt], params: impl Iterator<Item = &'a str>) -> Vec<String> {
    let bound: HashSet<String> = params.map(str::to_string).chain(assigned_names(body)).collect();
    let mut out: Vec<String> = read_names(body).into_iter().filter(|n| !bound.contains(n)).collect();
    out.sort();
    out
}

/// Names first assigned inside a nested block of `body` and referenced
/// outside that block. Loop targets and handler names stay block-local.
fn hoisted_names(body: &[Stmt]) -> Vec<String> {
    let mut first: HashMap<String, Vec<usize>> = HashMap::new();
    let mut uses: Vec<(String, Vec<usize>)> = Vec::new();
    let mut order: Vec<String> = Vec::new();
    scan_paths(body, &mut Vec::new(), &mut first, &mut uses, &mut order);

    let mut out = Vec::new();
    for name in order {
        let Some(path) = first.get(&name) else { continue };
        if path.is_empty() {
            continue;
        }
        let outside = uses.iter().any(|(n, p)| *n == name && !p.starts_with(path));
        if outside && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn scan_paths(
    body: &[Stmt],
    path: &mut Vec<usize>,
    first: &mut HashMap<String, Vec<usize>>,
    uses: &mut Vec<(String, Vec<usize>)>,
    order: &mut Vec<String>,
) {
    for (i, stmt) in body.iter().enumerate() {
        let assigned: Vec<&str> = match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().flat_map(walk::target_names).collect(),
            StmtKind::AnnAssign { target, .. } | StmtKind::AugAssign { target, .. } => walk::target_names(target),
            _ => Vec::new(),
        };
        for name in assigned {
            if !first.contains_key(name) {
                first.insert(name.to_string(), path.clone());
                order.push(name.to_string());
            }
            uses.push((name.to_string(), path.clone()));
        }
        for expr in walk::stmt_exprs(stmt) {
            walk::visit_expr(expr, &mut |e| {
                if let Some(n) = e.as_name() {
                    uses.push((n.to_string(), path.clone()));
                }
            });
        }
        if let StmtKind::FunctionDef { body: inner, .. } = &stmt.kind {
            for name in read_names(inner) {
                uses.push((name, path.clone()));
            }
        }
        for (b, block) in walk::child_blocks(stmt).into_iter().enumerate() {
            path.push(i * 64 + b);
            scan_paths(block, path, first, uses, order);
            path.pop();
        }
    }
}

fn module_constants(body: &[Stmt], facts: &ScopeFacts) -> Vec<String> {
    let mut out = Vec::new();
    for stmt in body {
        let (target, value) = match &stmt.kind {
            StmtKind::Assign { targets, value } if targets.len() == 1 => (&targets[0], value),
            StmtKind::AnnAssign { target, value: Some(value), .. } => (target, value),
            _ => continue,
        };
        let Some(name) = target.as_name() else { continue };
        let literal = matches!(value.kind, ExprKind::Constant { .. })
            || matches!(&value.kind, ExprKind::UnaryOp { operand, .. } if matches!(operand.kind, ExprKind::Constant { .. }));
        if literal && !value.is_none_literal() && !facts.is_mutated(name) && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOperator;
    use crate::ast::build::*;

    #[test]
    fn reassigned_and_appended_names_are_mutated() {
        let body = vec![
            assign("total", int(0)),
            aug_assign("total", BinOperator::Add, int(1)),
            assign("xs", list(vec![])),
            expr_stmt(method(name("xs"), "append", vec![name("total")])),
            assign("k", int(3)),
        ];
        let facts = scope_facts(&body, &[]);
        assert!(facts.is_mutated("total"));
        assert!(facts.is_mutated("xs"));
        assert!(!facts.is_mutated("k"));
        assert!(facts.escapes("total"));
    }

    #[test]
    fn returned_names_escape() {
        let body = vec![assign("out", list(vec![])), ret(Some(name("out")))];
        let facts = scope_facts(&body, &[]);
        assert!(facts.escapes("out"));
    }

    #[test]
    fn branch_assignment_used_after_is_hoisted() {
        let body = vec![
            if_(name("flag"), vec![assign("label", string("yes"))], vec![assign("label", string("no"))]),
            print(vec![name("label")]),
        ];
        let facts = scope_facts(&body, &["flag"]);
        assert_eq!(facts.hoisted, vec!["label".to_string()]);
    }

    #[test]
    fn nested_def_captures_outer_locals() {
        let m = module(vec![def(
            "outer",
            args(&["base"]),
            vec![
                def("inner", args(&["x"]), vec![ret(Some(binop(name("x"), BinOperator::Add, name("base"))))]),
                ret(Some(call_name("inner", vec![int(1)]))),
            ],
        )]);
        let facts = ModuleFacts::analyze(&m);
        assert_eq!(facts.scope("outer").captures.get("inner"), Some(&vec!["base".to_string()]));
    }

    #[test]
    fn literal_module_assignments_become_constants() {
        let m = module(vec![assign("LIMIT", int(10)), assign("items", list(vec![int(1)]))]);
        let facts = ModuleFacts::analyze(&m);
        assert!(facts.is_constant("LIMIT"));
        assert!(!facts.is_constant("items"));
    }
}
