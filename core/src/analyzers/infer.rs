//! file: core/src/analyzers/infer.rs
//! description: flow-insensitive static type inference.
//!
//! `TypeInferrer` precomputes, for every scope of the module (the module
//! body, each function, each method, each nested function), a table of
//! variable types, plus function signatures and class field types.
//! Variable types are "last assignment wins": a later assignment overwrites
//! an earlier one regardless of control flow. An observation that is
//! entirely `Unknown` never erases what is already known, and a partial
//! type (`list[?]` from `[]`) is completed by later evidence such as
//! `xs.append(1)`.
//!
//! Inference is total: any node shape it does not understand is `Unknown`.
//!
use std::collections::HashMap;

use log::{debug, trace};

use super::classes::ClassRegistry;
use super::kind::InferredType;
use super::walk;
use crate::ast::{
    BinOperator, Constant, Expr, ExprKind, Module, Stmt, StmtKind, UnaryOperator,
};

/// Key of the module-level scope.
pub const MODULE_SCOPE: &str = "<module>";

const PASSES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    /// Qualified key: `f`, `Class.method`, `outer.inner`.
    pub key: String,
    pub name: String,
    /// Parameters in order, `self` excluded.
    pub params: Vec<(String, InferredType)>,
    pub annotated: Vec<bool>,
    pub returns: InferredType,
    pub annotated_return: bool,
    pub is_generator: bool,
    pub is_async: bool,
    pub class: Option<String>,
    pub is_static: bool,
}

impl FunctionSig {
    pub fn param_type(&self, index: usize) -> InferredType {
        self.params.get(index).map(|(_, t)| t.clone()).unwrap_or(InferredType::Unknown)
    }
}

#[derive(Debug, Clone)]
pub struct TypeInferrer {
    classes: ClassRegistry,
    functions: HashMap<String, FunctionSig>,
    vars: HashMap<String, HashMap<String, InferredType>>,
    fields: HashMap<String, HashMap<String, InferredType>>,
    imports: HashMap<String, String>,
    external: HashMap<String, InferredType>,
    lambda_args: HashMap<String, HashMap<String, Vec<InferredType>>>,
}

#[derive(Default)]
struct ScopeScan {
    returns: Vec<InferredType>,
    yields: Vec<InferredType>,
}

impl TypeInferrer {
    /// `external` maps qualified library names (`math.sqrt`) to the type of
    /// their result.
    pub fn new(classes: ClassRegistry, external: HashMap<String, InferredType>) -> Self {
        let mut fields: HashMap<String, HashMap<String, InferredType>> = HashMap::new();
        for class in classes.iter() {
            let table = fields.entry(class.name.clone()).or_default();
            for field in classes.all_fields(&class.name) {
                table.insert(field.name, field.ty);
            }
        }
        TypeInferrer {
            classes,
            functions: HashMap::new(),
            vars: HashMap::new(),
            fields,
            imports: HashMap::new(),
            external,
            lambda_args: HashMap::new(),
        }
    }

    /// Build the complete set of tables for `module`.
    pub fn analyze(module: &Module, classes: ClassRegistry, external: HashMap<String, InferredType>) -> Self {
        let mut inferrer = TypeInferrer::new(classes, external);
        let mut scopes: Vec<(String, &[Stmt])> = vec![(MODULE_SCOPE.to_string(), module.body.as_slice())];
        inferrer.register(&module.body, None, None, &mut scopes);

        for pass in 0..PASSES {
            for (key, body) in &scopes {
                inferrer.scan_scope(key, body);
            }
            trace!("type inference pass {} complete", pass + 1);
        }
        debug!(
            "inferred {} scopes, {} functions, {} classes",
            inferrer.vars.len(),
            inferrer.functions.len(),
            inferrer.fields.len()
        );
        inferrer
    }

    // ------- Registration -------

    fn register<'m>(
        &mut self,
        body: &'m [Stmt],
        prefix: Option<&str>,
        class: Option<&str>,
        scopes: &mut Vec<(String, &'m [Stmt])>,
    ) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::FunctionDef { name, args, body: fn_body, returns, decorator_list, is_async } => {
                    let key = match prefix {
                        Some(p) => format!("{}.{}", p, name),
                        None => name.clone(),
                    };
                    let is_static = decorator_list.iter().any(|d| d.as_name() == Some("staticmethod"));
                    let skip_self = class.is_some() && !is_static;
                    let params: Vec<(String, InferredType)> = args
                        .iter()
                        .skip(usize::from(skip_self))
                        .map(|a| {
                            let ty = a.annotation.as_ref().map(InferredType::from_annotation).unwrap_or(InferredType::Unknown);
                            (a.arg.clone(), ty)
                        })
                        .collect();
                    let annotated = args.iter().skip(usize::from(skip_self)).map(|a| a.annotation.is_some()).collect();
                    let is_generator = walk::contains_yield(fn_body);
                    let declared = returns.as_ref().map(InferredType::from_annotation);
                    let sig = FunctionSig {
                        key: key.clone(),
                        name: name.clone(),
                        params,
                        annotated,
                        returns: match (&declared, is_generator) {
                            (Some(t), _) => t.clone(),
                            (None, true) => InferredType::list_of(InferredType::Unknown),
                            (None, false) => InferredType::None,
                        },
                        annotated_return: declared.is_some(),
                        is_generator,
                        is_async: *is_async,
                        class: class.map(str::to_string),
                        is_static,
                    };
                    self.functions.insert(key.clone(), sig);
                    scopes.push((key.clone(), fn_body.as_slice()));
                    self.register(fn_body, Some(&key), None, scopes);
                }
                StmtKind::ClassDef { name, body: class_body, .. } if prefix.is_none() => {
                    self.register(class_body, Some(name), Some(name), scopes);
                }
                StmtKind::Import { names } => {
                    for alias in names {
                        let bound = alias.bound_name().to_string();
                        let target = if alias.asname.is_some() { alias.name.clone() } else { bound.clone() };
                        self.imports.insert(bound, target);
                    }
                }
                StmtKind::ImportFrom { module: Some(m), names } => {
                    for alias in names {
                        self.imports.insert(alias.bound_name().to_string(), format!("{}.{}", m, alias.name));
                    }
                }
                _ => {
                    for block in walk::child_blocks(stmt) {
                        self.register(block, prefix, class, scopes);
                    }
                }
            }
        }
    }

    // ------- Scanning -------

    fn scan_scope(&mut self, key: &str, body: &[Stmt]) {
        if let Some(sig) = self.functions.get(key).cloned() {
            let table = self.vars.entry(key.to_string()).or_default();
            for (param, ty) in &sig.params {
                table.insert(param.clone(), ty.clone());
            }
            if let (Some(class), false) = (&sig.class, sig.is_static) {
                table.insert("self".to_string(), InferredType::Instance(class.clone()));
            }
        }

        let mut scan = ScopeScan::default();
        self.scan_block(key, body, &mut scan);

        if let Some(sig) = self.functions.get_mut(key) {
            if !sig.annotated_return {
                if sig.is_generator {
                    let elem = scan.yields.iter().fold(InferredType::Unknown, |acc, t| acc.refine(t));
                    sig.returns = InferredType::list_of(elem);
                } else if !scan.returns.is_empty() {
                    // a bare `return` next to valued returns does not decide the type
                    let valued = scan.returns.iter().filter(|t| **t != InferredType::None);
                    let folded = valued.fold(InferredType::Unknown, |acc, t| acc.refine(t));
                    sig.returns = if scan.returns.iter().all(|t| *t == InferredType::None) {
                        InferredType::None
                    } else {
                        folded
                    };
                }
            }
        }
    }

    fn scan_block(&mut self, scope: &str, body: &[Stmt], scan: &mut ScopeScan) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Assign { targets, value } => {
                    let ty = self.infer_expr(value, scope);
                    for target in targets {
                        self.assign_target(scope, target, &ty, value);
                    }
                }
                StmtKind::AnnAssign { target, annotation, value } => {
                    let declared = InferredType::from_annotation(annotation);
                    let ty = match (&declared, value) {
                        (InferredType::Unknown, Some(v)) => self.infer_expr(v, scope),
                        _ => declared,
                    };
                    if let Some(name) = target.as_name() {
                        self.vars.entry(scope.to_string()).or_default().insert(name.to_string(), ty);
                    } else if let Some(v) = value {
                        self.assign_target(scope, target, &ty, v);
                    }
                }
                StmtKind::AugAssign { target, op, value } => {
                    if let Some(name) = target.as_name() {
                        let combined = Expr::new(
                            ExprKind::BinOp { left: Box::new(target.clone()), op: *op, right: Box::new(value.clone()) },
                            None,
                        );
                        let ty = self.infer_expr(&combined, scope);
                        self.set_var(scope, name, ty);
                    }
                }
                StmtKind::For { target, iter, .. } => {
                    let elem = self.iter_element(iter, scope, &[]);
                    for (name, ty) in self.bind_target(target, &elem) {
                        self.set_var(scope, &name, ty);
                    }
                }
                StmtKind::With { items, .. } => {
                    for item in items {
                        if let Some(target) = &item.optional_vars {
                            let ty = self.infer_expr(&item.context_expr, scope);
                            for (name, t) in self.bind_target(target, &ty) {
                                self.set_var(scope, &name, t);
                            }
                        }
                    }
                }
                StmtKind::Try { handlers, .. } => {
                    for handler in handlers {
                        if let Some(name) = &handler.name {
                            self.set_var(scope, name, InferredType::String);
                        }
                    }
                }
                StmtKind::Return { value } => {
                    let ty = match value {
                        Some(v) => self.infer_expr(v, scope),
                        None => InferredType::None,
                    };
                    scan.returns.push(ty);
                }
                StmtKind::FunctionDef { name, .. } if scope != MODULE_SCOPE => {
                    let key = format!("{}.{}", scope, name);
                    let ret = self.functions.get(&key).map(|s| s.returns.clone()).unwrap_or(InferredType::Unknown);
                    self.vars
                        .entry(scope.to_string())
                        .or_default()
                        .insert(name.clone(), InferredType::Callable(Box::new(ret)));
                }
                _ => {}
            }

            for expr in walk::stmt_exprs(stmt) {
                self.observe(scope, expr, scan);
            }
            if !matches!(stmt.kind, StmtKind::FunctionDef { .. } | StmtKind::ClassDef { .. }) {
                for block in walk::child_blocks(stmt) {
                    self.scan_block(scope, block, scan);
                }
            }
        }
    }

    fn assign_target(&mut self, scope: &str, target: &Expr, ty: &InferredType, value: &Expr) {
        match &target.kind {
            ExprKind::Name { id } => self.set_var(scope, id, ty.clone()),
            ExprKind::Tuple { elts } | ExprKind::List { elts } => {
                let parts: Vec<InferredType> = match (&value.kind, ty) {
                    (ExprKind::Tuple { elts: values }, _) | (ExprKind::List { elts: values }, _)
                        if values.len() == elts.len() =>
                    {
                        values.iter().map(|v| self.infer_expr(v, scope)).collect()
                    }
                    (_, InferredType::Tuple(items)) => items.clone(),
                    (_, other) => vec![other.element(); elts.len()],
                };
                for (elt, part) in elts.iter().zip(parts.iter()) {
                    if let Some(name) = elt.as_name() {
                        self.set_var(scope, name, part.clone());
                    }
                }
            }
            ExprKind::Subscript { value: container, slice } => {
                if let Some(name) = container.as_name() {
                    let current = self.lookup_var(scope, name).cloned().unwrap_or(InferredType::Unknown);
                    let observed = match current {
                        InferredType::Dict(..) => InferredType::dict_of(self.infer_expr(slice, scope), ty.clone()),
                        InferredType::List(_) => InferredType::list_of(ty.clone()),
                        _ => return,
                    };
                    self.set_var(scope, name, observed);
                }
            }
            ExprKind::Attribute { value: owner, attr } => {
                if owner.as_name() == Some("self") {
                    if let Some(class) = self.functions.get(scope).and_then(|s| s.class.clone()) {
                        let table = self.fields.entry(class).or_default();
                        let refined = table.get(attr).map(|t| t.refine(ty)).unwrap_or_else(|| ty.clone());
                        table.insert(attr.clone(), refined);
                    }
                }
            }
            _ => {}
        }
    }

    fn set_var(&mut self, scope: &str, name: &str, ty: InferredType) {
        let table = self.vars.entry(scope.to_string()).or_default();
        let next = match table.get(name) {
            Some(prev) => prev.refine(&ty),
            None => ty,
        };
        table.insert(name.to_string(), next);
    }

    /// Record evidence found inside one expression tree: argument types of
    /// calls to user functions and lambdas, element types for empty
    /// containers, yielded values.
    fn observe(&mut self, scope: &str, expr: &Expr, scan: &mut ScopeScan) {
        let mut calls: Vec<&Expr> = Vec::new();
        walk::visit_expr(expr, &mut |e| match &e.kind {
            ExprKind::Call { .. } => calls.push(e),
            ExprKind::Yield { .. } => calls.push(e),
            _ => {}
        });

        for call in calls {
            let (func, args, keywords) = match &call.kind {
                ExprKind::Call { func, args, keywords } => (func, args, keywords),
                ExprKind::Yield { value } => {
                    let ty = value.as_ref().map(|v| self.infer_expr(v, scope)).unwrap_or(InferredType::None);
                    scan.yields.push(ty);
                    continue;
                }
                _ => continue,
            };
            let arg_types: Vec<InferredType> = args.iter().map(|a| self.infer_expr(a, scope)).collect();

            match &func.kind {
                ExprKind::Name { id } => {
                    if let Some(InferredType::Callable(_)) = self.lookup_var(scope, id) {
                        if self.resolve_function(scope, id).is_none() {
                            self.lambda_args
                                .entry(scope.to_string())
                                .or_default()
                                .insert(id.clone(), arg_types);
                            continue;
                        }
                    }
                    let key = if self.lookup_var(scope, id).is_some() && self.resolve_function(scope, id).is_none() {
                        None
                    } else if let Some(sig) = self.resolve_function(scope, id) {
                        Some(sig.key.clone())
                    } else if self.classes.contains(id) {
                        self.classes
                            .resolve_method(id, "__init__")
                            .map(|(owner, _)| format!("{}.__init__", owner.name))
                    } else {
                        None
                    };
                    if let Some(key) = key {
                        self.hint_params(&key, &arg_types, keywords, scope);
                    }
                }
                ExprKind::Attribute { value, attr } => {
                    let receiver = self.infer_expr(value, scope);
                    match &receiver {
                        InferredType::Instance(class) => {
                            if let Some((owner, _)) = self.classes.resolve_method(class, attr) {
                                let key = format!("{}.{}", owner.name, attr);
                                self.hint_params(&key, &arg_types, keywords, scope);
                            }
                        }
                        InferredType::List(_) | InferredType::Unknown => {
                            let Some(name) = value.as_name() else { continue };
                            let elem = match (attr.as_str(), arg_types.as_slice()) {
                                ("append", [t]) => t.clone(),
                                ("insert", [_, t]) => t.clone(),
                                ("extend", [t]) => t.element(),
                                _ => continue,
                            };
                            if matches!(receiver, InferredType::List(_)) {
                                self.set_var(scope, name, InferredType::list_of(elem));
                            }
                        }
                        InferredType::Dict(..) => {
                            let Some(name) = value.as_name() else { continue };
                            if let ("setdefault", [k, v]) = (attr.as_str(), arg_types.as_slice()) {
                                self.set_var(scope, name, InferredType::dict_of(k.clone(), v.clone()));
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    fn hint_params(&mut self, key: &str, arg_types: &[InferredType], keywords: &[crate::ast::Keyword], scope: &str) {
        let keyword_types: Vec<(String, InferredType)> = keywords
            .iter()
            .filter_map(|k| k.arg.as_ref().map(|a| (a.clone(), self.infer_expr(&k.value, scope))))
            .collect();
        if let Some(sig) = self.functions.get_mut(key) {
            for (i, ty) in arg_types.iter().enumerate() {
                if let (Some((_, slot)), Some(false)) = (sig.params.get_mut(i), sig.annotated.get(i).copied()) {
                    *slot = slot.refine(ty);
                }
            }
            for (kw, ty) in keyword_types {
                if let Some(idx) = sig.params.iter().position(|(n, _)| *n == kw) {
                    if !sig.annotated.get(idx).copied().unwrap_or(true) {
                        let slot = &mut sig.params[idx].1;
                        *slot = slot.refine(&ty);
                    }
                }
            }
        }
    }

    // ------- Queries -------

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn signature(&self, key: &str) -> Option<&FunctionSig> {
        self.functions.get(key)
    }

    /// Resolve a bare function name as seen from `scope`: nested functions
    /// of the enclosing function chain first, then module-level functions.
    /// Methods are never visible as bare names.
    pub fn resolve_function(&self, scope: &str, name: &str) -> Option<&FunctionSig> {
        for prefix in self.scope_chain(scope) {
            if prefix == MODULE_SCOPE {
                continue;
            }
            if let Some(sig) = self.functions.get(&format!("{}.{}", prefix, name)) {
                return Some(sig);
            }
        }
        self.functions.get(name).filter(|sig| sig.class.is_none())
    }

    /// Whether `name` names a module-level (non-method) function.
    pub fn is_module_function(&self, name: &str) -> bool {
        self.functions.get(name).is_some_and(|s| s.class.is_none())
    }

    /// `scope`, then its enclosing function scopes, then the module scope.
    fn scope_chain(&self, scope: &str) -> Vec<String> {
        let mut out = Vec::new();
        if scope != MODULE_SCOPE {
            let parts: Vec<&str> = scope.split('.').collect();
            for end in (1..=parts.len()).rev() {
                let prefix = parts[..end].join(".");
                if self.classes.contains(&prefix) {
                    break;
                }
                out.push(prefix);
            }
        }
        out.push(MODULE_SCOPE.to_string());
        out
    }

    pub fn lookup_var(&self, scope: &str, name: &str) -> Option<&InferredType> {
        for key in self.scope_chain(scope) {
            if let Some(ty) = self.vars.get(&key).and_then(|t| t.get(name)) {
                return Some(ty);
            }
        }
        None
    }

    /// Variable type in exactly `scope`, without falling back outward.
    pub fn local_var(&self, scope: &str, name: &str) -> Option<&InferredType> {
        self.vars.get(scope).and_then(|t| t.get(name))
    }

    pub fn field_type(&self, class: &str, field: &str) -> InferredType {
        for info in self.classes.chain(class) {
            if let Some(ty) = self.fields.get(&info.name).and_then(|t| t.get(field)) {
                return ty.clone();
            }
        }
        InferredType::Unknown
    }

    pub fn import_target(&self, alias: &str) -> Option<&str> {
        self.imports.get(alias).map(String::as_str)
    }

    /// Argument types observed at call sites of a lambda bound to `var`.
    pub fn lambda_arg_types(&self, scope: &str, var: &str) -> Option<&Vec<InferredType>> {
        self.lambda_args.get(scope).and_then(|t| t.get(var))
    }

    pub fn external_return(&self, qualified: &str) -> InferredType {
        self.external.get(qualified).cloned().unwrap_or(InferredType::Unknown)
    }

    pub fn infer_expr(&self, expr: &Expr, scope: &str) -> InferredType {
        self.infer_with(expr, scope, &[])
    }

    /// Infer with extra innermost bindings (comprehension targets, lambda
    /// parameters) layered over the scope's table.
    pub fn infer_with(&self, expr: &Expr, scope: &str, locals: &[(String, InferredType)]) -> InferredType {
        match &expr.kind {
            ExprKind::Constant { value } => constant_type(value),
            ExprKind::Name { id } => self.name_type(id, scope, locals),
            ExprKind::BinOp { left, op, right } => {
                let l = self.infer_with(left, scope, locals);
                let r = self.infer_with(right, scope, locals);
                binop_type(*op, &l, &r)
            }
            ExprKind::UnaryOp { op, operand } => match op {
                UnaryOperator::Not => InferredType::Bool,
                UnaryOperator::Invert => InferredType::Int,
                UnaryOperator::USub | UnaryOperator::UAdd => match self.infer_with(operand, scope, locals) {
                    InferredType::Bool => InferredType::Int,
                    other => other,
                },
            },
            ExprKind::BoolOp { .. } | ExprKind::Compare { .. } => InferredType::Bool,
            ExprKind::IfExp { body, orelse, .. } => {
                let a = self.infer_with(body, scope, locals);
                let b = self.infer_with(orelse, scope, locals);
                match (&a, &b) {
                    (_, InferredType::None) if a != InferredType::None => InferredType::Optional(Box::new(a)),
                    (InferredType::None, _) if b != InferredType::None => InferredType::Optional(Box::new(b)),
                    (InferredType::Int, InferredType::Float) | (InferredType::Float, InferredType::Int) => {
                        InferredType::Float
                    }
                    _ => a,
                }
            }
            ExprKind::List { elts } => InferredType::list_of(
                elts.first().map(|e| self.infer_with(e, scope, locals)).unwrap_or(InferredType::Unknown),
            ),
            ExprKind::Tuple { elts } => {
                InferredType::Tuple(elts.iter().map(|e| self.infer_with(e, scope, locals)).collect())
            }
            ExprKind::Dict { keys, values } => {
                let key = keys
                    .first()
                    .and_then(|k| k.as_ref())
                    .map(|k| self.infer_with(k, scope, locals))
                    .unwrap_or(InferredType::Unknown);
                let value = values.first().map(|v| self.infer_with(v, scope, locals)).unwrap_or(InferredType::Unknown);
                InferredType::dict_of(key, value)
            }
            ExprKind::Set { .. } | ExprKind::SetComp { .. } => InferredType::Unknown,
            ExprKind::Subscript { value, slice } => {
                let container = self.infer_with(value, scope, locals);
                if matches!(slice.kind, ExprKind::Slice { .. }) {
                    return match container {
                        InferredType::List(_) | InferredType::String => container,
                        _ => InferredType::Unknown,
                    };
                }
                match container {
                    InferredType::List(e) => *e,
                    InferredType::String => InferredType::String,
                    InferredType::Dict(_, v) => *v,
                    InferredType::Tuple(items) => match slice.as_int_literal() {
                        Some(i) => {
                            let idx = if i < 0 { items.len() as i64 + i } else { i };
                            usize::try_from(idx)
                                .ok()
                                .and_then(|i| items.get(i).cloned())
                                .unwrap_or(InferredType::Unknown)
                        }
                        None => InferredType::Unknown,
                    },
                    _ => InferredType::Unknown,
                }
            }
            ExprKind::Attribute { value, attr } => {
                if let Some(q) = self.qualify(expr, scope, locals) {
                    return self.external_return(&q);
                }
                match self.infer_with(value, scope, locals) {
                    InferredType::Instance(class) => {
                        match self.classes.resolve_method(&class, attr) {
                            Some((owner, m)) if m.is_property => self
                                .signature(&format!("{}.{}", owner.name, attr))
                                .map(|s| s.returns.clone())
                                .unwrap_or(InferredType::Unknown),
                            _ => self.field_type(&class, attr),
                        }
                    }
                    _ => InferredType::Unknown,
                }
            }
            ExprKind::JoinedStr { .. } | ExprKind::FormattedValue { .. } => InferredType::String,
            ExprKind::Lambda { args, body } => {
                let mut inner = locals.to_vec();
                inner.extend(args.iter().map(|a| (a.arg.clone(), InferredType::Unknown)));
                InferredType::Callable(Box::new(self.infer_with(body, scope, &inner)))
            }
            ExprKind::ListComp { elt, generators } | ExprKind::GeneratorExp { elt, generators } => {
                let inner = self.comprehension_locals(generators, scope, locals);
                InferredType::list_of(self.infer_with(elt, scope, &inner))
            }
            ExprKind::DictComp { key, value, generators } => {
                let inner = self.comprehension_locals(generators, scope, locals);
                InferredType::dict_of(self.infer_with(key, scope, &inner), self.infer_with(value, scope, &inner))
            }
            ExprKind::Await { value } => self.infer_with(value, scope, locals),
            ExprKind::Call { func, args, .. } => self.infer_call(func, args, scope, locals),
            ExprKind::Slice { .. } | ExprKind::Yield { .. } | ExprKind::Starred { .. } => InferredType::Unknown,
        }
    }

    fn name_type(&self, id: &str, scope: &str, locals: &[(String, InferredType)]) -> InferredType {
        if let Some((_, ty)) = locals.iter().rev().find(|(n, _)| n == id) {
            return ty.clone();
        }
        if id == "__name__" {
            return InferredType::String;
        }
        if let Some(ty) = self.lookup_var(scope, id) {
            return ty.clone();
        }
        if let Some(sig) = self.resolve_function(scope, id) {
            return InferredType::Callable(Box::new(sig.returns.clone()));
        }
        if let Some(q) = self.imports.get(id) {
            return self.external_return(q);
        }
        InferredType::Unknown
    }

    fn comprehension_locals(
        &self,
        generators: &[crate::ast::Comprehension],
        scope: &str,
        locals: &[(String, InferredType)],
    ) -> Vec<(String, InferredType)> {
        let mut inner = locals.to_vec();
        for g in generators {
            let elem = self.iter_element(&g.iter, scope, &inner);
            inner.extend(self.bind_target(&g.target, &elem));
        }
        inner
    }

    /// Type of one element produced by iterating `iter` in a `for` or a
    /// comprehension clause.
    pub fn iter_element(&self, iter: &Expr, scope: &str, locals: &[(String, InferredType)]) -> InferredType {
        if let ExprKind::Call { func, args, .. } = &iter.kind {
            let shadowed = |n: &str| locals.iter().any(|(l, _)| l == n) || self.lookup_var(scope, n).is_some();
            match &func.kind {
                ExprKind::Name { id } if !shadowed(id.as_str()) => match id.as_str() {
                    "range" => return InferredType::Int,
                    "enumerate" => {
                        let inner = args.first().map(|a| self.iter_element(a, scope, locals)).unwrap_or(InferredType::Unknown);
                        return InferredType::Tuple(vec![InferredType::Int, inner]);
                    }
                    "zip" => {
                        return InferredType::Tuple(args.iter().map(|a| self.iter_element(a, scope, locals)).collect());
                    }
                    "reversed" | "sorted" => {
                        return args.first().map(|a| self.iter_element(a, scope, locals)).unwrap_or(InferredType::Unknown);
                    }
                    _ => {}
                },
                ExprKind::Attribute { value, attr } => {
                    if let InferredType::Dict(k, v) = self.infer_with(value, scope, locals) {
                        match attr.as_str() {
                            "items" => return InferredType::Tuple(vec![*k, *v]),
                            "keys" => return *k,
                            "values" => return *v,
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        self.infer_with(iter, scope, locals).element()
    }

    /// Destructure `ty` over an assignment/loop target.
    pub fn bind_target(&self, target: &Expr, ty: &InferredType) -> Vec<(String, InferredType)> {
        match &target.kind {
            ExprKind::Name { id } => vec![(id.clone(), ty.clone())],
            ExprKind::Tuple { elts } | ExprKind::List { elts } => {
                let mut out = Vec::new();
                for (i, elt) in elts.iter().enumerate() {
                    let part = match ty {
                        InferredType::Tuple(items) => items.get(i).cloned().unwrap_or(InferredType::Unknown),
                        InferredType::List(e) => (**e).clone(),
                        _ => InferredType::Unknown,
                    };
                    out.extend(self.bind_target(elt, &part));
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Qualified library name of a module-rooted expression (`math.sqrt`,
    /// `np.linalg.norm` with `import numpy as np`, or a `from`-imported
    /// bare name). `None` when the root name is shadowed by a variable.
    pub fn qualify(&self, expr: &Expr, scope: &str, locals: &[(String, InferredType)]) -> Option<String> {
        let shadowed = |n: &str| locals.iter().any(|(l, _)| l == n) || self.lookup_var(scope, n).is_some();
        match &expr.kind {
            ExprKind::Name { id } if !shadowed(id.as_str()) => {
                self.imports.get(id).filter(|q| q.contains('.')).cloned()
            }
            ExprKind::Attribute { value, attr } => {
                let mut parts = vec![attr.as_str()];
                let mut cursor: &Expr = value;
                loop {
                    match &cursor.kind {
                        ExprKind::Attribute { value, attr } => {
                            parts.push(attr);
                            cursor = value;
                        }
                        ExprKind::Name { id } => {
                            if shadowed(id.as_str()) {
                                return None;
                            }
                            let root = self.imports.get(id.as_str())?;
                            parts.reverse();
                            return Some(format!("{}.{}", root, parts.join(".")));
                        }
                        _ => return None,
                    }
                }
            }
            _ => None,
        }
    }

    fn infer_call(&self, func: &Expr, args: &[Expr], scope: &str, locals: &[(String, InferredType)]) -> InferredType {
        if let Some(q) = self.qualify(func, scope, locals) {
            return self.external_return(&q);
        }
        let arg_type = |i: usize| args.get(i).map(|a| self.infer_with(a, scope, locals)).unwrap_or(InferredType::Unknown);
        match &func.kind {
            ExprKind::Lambda { args: params, body } => {
                let mut inner = locals.to_vec();
                for (i, p) in params.iter().enumerate() {
                    inner.push((p.arg.clone(), arg_type(i)));
                }
                self.infer_with(body, scope, &inner)
            }
            ExprKind::Name { id } => {
                if let Some((_, ty)) = locals.iter().rev().find(|(n, _)| n == id) {
                    return match ty {
                        InferredType::Callable(ret) => (**ret).clone(),
                        _ => InferredType::Unknown,
                    };
                }
                if let Some(sig) = self.resolve_function(scope, id) {
                    return sig.returns.clone();
                }
                if let Some(ty) = self.lookup_var(scope, id) {
                    return match ty {
                        InferredType::Callable(ret) => (**ret).clone(),
                        _ => InferredType::Unknown,
                    };
                }
                if self.classes.contains(id) {
                    return InferredType::Instance(id.clone());
                }
                if let Some(ty) = builtin_return(id, args, &arg_type, |a| self.iter_element(a, scope, locals)) {
                    return ty;
                }
                if id.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                    return InferredType::Instance(id.clone());
                }
                InferredType::Unknown
            }
            ExprKind::Attribute { value, attr } => {
                if let ExprKind::Call { func: inner, .. } = &value.kind {
                    if inner.as_name() == Some("super") {
                        let class = self.functions.get(scope).and_then(|s| s.class.clone());
                        let base = class.as_deref().and_then(|c| self.classes.get(c)).and_then(|c| c.base.clone());
                        return base
                            .and_then(|b| self.classes.resolve_method(&b, attr).map(|(o, _)| format!("{}.{}", o.name, attr)))
                            .and_then(|key| self.signature(&key).map(|s| s.returns.clone()))
                            .unwrap_or(InferredType::Unknown);
                    }
                }
                let receiver = self.infer_with(value, scope, locals);
                if let InferredType::Instance(class) = &receiver {
                    return self
                        .classes
                        .resolve_method(class, attr)
                        .and_then(|(owner, _)| self.signature(&format!("{}.{}", owner.name, attr)))
                        .map(|s| s.returns.clone())
                        .unwrap_or(InferredType::Unknown);
                }
                method_return(&receiver, attr, args.len()).unwrap_or(InferredType::Unknown)
            }
            _ => InferredType::Unknown,
        }
    }
}

/// Type of a literal, or of a container literal built only from literals.
/// Used where no scope table exists yet (class field discovery).
pub fn literal_type(expr: &Expr) -> InferredType {
    match &expr.kind {
        ExprKind::Constant { value } => constant_type(value),
        ExprKind::UnaryOp { op: UnaryOperator::USub, operand } => literal_type(operand),
        ExprKind::List { elts } => {
            InferredType::list_of(elts.first().map(literal_type).unwrap_or(InferredType::Unknown))
        }
        ExprKind::Tuple { elts } => InferredType::Tuple(elts.iter().map(literal_type).collect()),
        ExprKind::Dict { keys, values } => InferredType::dict_of(
            keys.first().and_then(|k| k.as_ref()).map(literal_type).unwrap_or(InferredType::Unknown),
            values.first().map(literal_type).unwrap_or(InferredType::Unknown),
        ),
        ExprKind::JoinedStr { .. } => InferredType::String,
        _ => InferredType::Unknown,
    }
}

fn constant_type(value: &Constant) -> InferredType {
    match value {
        Constant::Bool(_) => InferredType::Bool,
        Constant::Int(_) => InferredType::Int,
        Constant::Float(_) => InferredType::Float,
        Constant::Str(_) => InferredType::String,
        Constant::None => InferredType::None,
    }
}

/// Result type of a binary operator over two operand types.
pub fn binop_type(op: BinOperator, l: &InferredType, r: &InferredType) -> InferredType {
    use InferredType::*;
    let numeric = |t: &InferredType| match t {
        Bool => Int,
        other => other.clone(),
    };
    let (ln, rn) = (numeric(l), numeric(r));
    match op {
        BinOperator::Add => match (l, r) {
            (String, String) => String,
            (List(a), List(b)) => InferredType::list_of(a.refine(b)),
            _ => arith(&ln, &rn),
        },
        BinOperator::Mult => match (l, r) {
            (String, Int) | (Int, String) => String,
            (List(e), Int) | (Int, List(e)) => List(e.clone()),
            _ => arith(&ln, &rn),
        },
        BinOperator::Div => {
            if ln.is_numeric() && rn.is_numeric() {
                Float
            } else {
                Unknown
            }
        }
        BinOperator::Mod if *l == String => String,
        BinOperator::Sub | BinOperator::FloorDiv | BinOperator::Mod | BinOperator::Pow => arith(&ln, &rn),
        BinOperator::LShift | BinOperator::RShift | BinOperator::BitOr | BinOperator::BitXor | BinOperator::BitAnd => {
            match (&ln, &rn) {
                (Int, Int) => Int,
                _ => Unknown,
            }
        }
        BinOperator::MatMult => Unknown,
    }
}

fn arith(l: &InferredType, r: &InferredType) -> InferredType {
    use InferredType::*;
    match (l, r) {
        (Int, Int) => Int,
        (Float, Float) | (Int, Float) | (Float, Int) => Float,
        _ => Unknown,
    }
}

/// Result type of a reserved built-in, `None` when `name` is not one.
fn builtin_return(
    name: &str,
    args: &[Expr],
    arg_type: &dyn Fn(usize) -> InferredType,
    element_of: impl Fn(&Expr) -> InferredType,
) -> Option<InferredType> {
    use InferredType::*;
    let first_elem = || args.first().map(&element_of).unwrap_or(Unknown);
    let ty = match name {
        "len" | "ord" | "int" | "hash" | "id" => Int,
        "str" | "repr" | "chr" | "input" | "type" | "hex" | "bin" | "oct" | "ascii" => String,
        "float" => Float,
        "bool" | "isinstance" | "hasattr" | "callable" | "any" | "all" | "issubclass" => Bool,
        "abs" => match arg_type(0) {
            Bool => Int,
            other => other,
        },
        "round" => {
            if args.len() > 1 {
                Float
            } else {
                Int
            }
        }
        "sum" => match first_elem() {
            Unknown | Bool => Int,
            other => other,
        },
        "min" | "max" => {
            if args.len() == 1 {
                first_elem()
            } else {
                args.iter()
                    .enumerate()
                    .map(|(i, _)| arg_type(i))
                    .reduce(|a, b| arith(&a, &b))
                    .unwrap_or(Unknown)
            }
        }
        "sorted" | "reversed" | "list" => InferredType::list_of(first_elem()),
        "range" => InferredType::list_of(Int),
        "enumerate" => InferredType::list_of(Tuple(vec![Int, first_elem()])),
        "zip" => InferredType::list_of(Tuple(args.iter().map(&element_of).collect())),
        "dict" => InferredType::dict_of(String, Unknown),
        "tuple" => Tuple(Vec::new()),
        "print" | "setattr" | "exec" => None,
        "eval" | "getattr" | "compile" | "__import__" | "map" | "filter" | "iter" | "next" | "set" => Unknown,
        _ => return Option::None,
    };
    Some(ty)
}

/// Result type of a container/string/dict/queue method call, `None` when
/// the method is not known for that receiver type. An `Unknown` receiver
/// only resolves methods whose result type does not depend on the receiver.
pub fn method_return(receiver: &InferredType, method: &str, argc: usize) -> Option<InferredType> {
    use InferredType::*;
    let string_method = |m: &str| -> Option<InferredType> {
        Some(match m {
            "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "join" | "title" | "capitalize"
            | "format" | "swapcase" | "center" | "ljust" | "rjust" | "zfill" => String,
            "split" | "splitlines" | "rsplit" => InferredType::list_of(String),
            "startswith" | "endswith" | "isdigit" | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower" => Bool,
            "find" | "rfind" | "index" | "count" => Int,
            _ => return Option::None,
        })
    };
    match receiver {
        String => string_method(method),
        List(e) => Some(match method {
            "pop" => (**e).clone(),
            "index" | "count" => Int,
            "copy" => receiver.clone(),
            "append" | "extend" | "insert" | "remove" | "clear" | "sort" | "reverse" => None,
            _ => return Option::None,
        }),
        Dict(k, v) => Some(match method {
            "get" if argc >= 2 => (**v).clone(),
            "get" => Optional(v.clone()),
            "keys" => List(k.clone()),
            "values" => List(v.clone()),
            "items" => InferredType::list_of(Tuple(vec![(**k).clone(), (**v).clone()])),
            "pop" | "setdefault" => (**v).clone(),
            "copy" => receiver.clone(),
            "update" | "clear" => None,
            _ => return Option::None,
        }),
        Queue => Some(match method {
            "get" | "get_nowait" => Unknown,
            "empty" | "full" => Bool,
            "qsize" => Int,
            "put" | "put_nowait" | "task_done" => None,
            _ => return Option::None,
        }),
        Unknown => match method {
            "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "title" | "capitalize" | "startswith"
            | "endswith" | "isdigit" | "isalpha" | "splitlines" => string_method(method),
            "keys" | "values" | "items" => Some(InferredType::list_of(Unknown)),
            _ => Option::None,
        },
        _ => Option::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    fn analyze(body: Vec<Stmt>) -> TypeInferrer {
        let m = module(body);
        let classes = ClassRegistry::build(&m);
        TypeInferrer::analyze(&m, classes, HashMap::new())
    }

    #[test]
    fn last_assignment_wins() {
        let t = analyze(vec![assign("x", int(1)), assign("x", string("a"))]);
        assert_eq!(t.local_var(MODULE_SCOPE, "x"), Some(&InferredType::String));
    }

    #[test]
    fn empty_list_resolved_by_append() {
        let t = analyze(vec![
            assign("xs", list(vec![])),
            expr_stmt(method(name("xs"), "append", vec![float(1.5)])),
        ]);
        assert_eq!(t.local_var(MODULE_SCOPE, "xs"), Some(&InferredType::list_of(InferredType::Float)));
    }

    #[test]
    fn unannotated_params_take_call_site_types() {
        let t = analyze(vec![
            def("double", args(&["n"]), vec![ret(Some(binop(name("n"), BinOperator::Mult, int(2))))]),
            assign("y", call_name("double", vec![int(4)])),
        ]);
        let sig = t.signature("double").unwrap();
        assert_eq!(sig.params[0].1, InferredType::Int);
        assert_eq!(sig.returns, InferredType::Int);
        assert_eq!(t.local_var(MODULE_SCOPE, "y"), Some(&InferredType::Int));
    }

    #[test]
    fn generator_returns_list_of_yields() {
        let t = analyze(vec![def(
            "count",
            vec![typed_arg("n", "int")],
            vec![for_(name("i"), range(vec![name("n")]), vec![expr_stmt(yield_(Some(name("i"))))])],
        )]);
        let sig = t.signature("count").unwrap();
        assert!(sig.is_generator);
        assert_eq!(sig.returns, InferredType::list_of(InferredType::Int));
    }

    #[test]
    fn unsupported_shapes_are_unknown() {
        let t = analyze(vec![]);
        let e = binop(name("a"), BinOperator::MatMult, name("b"));
        assert_eq!(t.infer_expr(&e, MODULE_SCOPE), InferredType::Unknown);
    }

    #[test]
    fn comprehension_element_uses_target_type() {
        let t = analyze(vec![]);
        let e = list_comp(
            binop(name("x"), BinOperator::Mult, int(2)),
            vec![comp(name("x"), range(vec![int(5)]), vec![])],
        );
        assert_eq!(t.infer_expr(&e, MODULE_SCOPE), InferredType::list_of(InferredType::Int));
    }
}
