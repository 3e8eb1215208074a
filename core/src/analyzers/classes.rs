//! file: core/src/analyzers/classes.rs
//! description: pre-pass table of the module's class definitions.
//!
//! Built once from the module body before lowering starts and read-only
//! afterwards. Lowering consults it for constructor signatures, field
//! layout, method resolution and single inheritance.
//!
use std::collections::{HashMap, HashSet};

use log::debug;

use super::infer::literal_type;
use super::kind::InferredType;
use crate::ast::{Arg, Expr, ExprKind, Module, Stmt, StmtKind};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: InferredType,
    /// Class-level default (`count: int = 0`).
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    /// Parameters after `self`.
    pub params: Vec<Arg>,
    pub body: Vec<Stmt>,
    pub returns: Option<Expr>,
    pub is_static: bool,
    pub is_property: bool,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    /// Fields declared by this class only, in first-seen order.
    pub fields: Vec<FieldInfo>,
    /// Methods defined by this class only, in source order.
    pub methods: Vec<MethodInfo>,
}

impl ClassInfo {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Constructor parameters (those of `__init__` after `self`).
    pub fn own_init_params(&self) -> Option<&[Arg]> {
        self.method("__init__").map(|m| m.params.as_slice())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassInfo>,
    order: Vec<String>,
}

impl ClassRegistry {
    /// Collect every top-level class of `module`.
    pub fn build(module: &Module) -> Self {
        let mut registry = ClassRegistry::default();
        for stmt in &module.body {
            if let StmtKind::ClassDef { name, bases, body } = &stmt.kind {
                let info = collect_class(name, bases, body);
                debug!(
                    "registered class {} (base: {:?}, {} fields, {} methods)",
                    info.name,
                    info.base,
                    info.fields.len(),
                    info.methods.len()
                );
                registry.order.push(name.clone());
                registry.classes.insert(name.clone(), info);
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Classes in source order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.order.iter().filter_map(|n| self.classes.get(n))
    }

    /// `name` followed by its ancestors that are known to the registry.
    /// Cyclic hierarchies stop at the first repeat.
    pub fn chain(&self, name: &str) -> Vec<&ClassInfo> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.classes.get(name);
        while let Some(info) = current {
            if !seen.insert(info.name.clone()) {
                break;
            }
            out.push(info);
            current = info.base.as_deref().and_then(|b| self.classes.get(b));
        }
        out
    }

    /// Flattened field layout: base fields first, then the class's own.
    pub fn all_fields(&self, name: &str) -> Vec<FieldInfo> {
        let mut out: Vec<FieldInfo> = Vec::new();
        for info in self.chain(name).into_iter().rev() {
            for field in &info.fields {
                match out.iter_mut().find(|f| f.name == field.name) {
                    Some(existing) => {
                        if existing.ty.is_unknown() {
                            existing.ty = field.ty.clone();
                        }
                        if field.default.is_some() {
                            existing.default = field.default.clone();
                        }
                    }
                    None => out.push(field.clone()),
                }
            }
        }
        out
    }

    /// Find `method` on `class` or its nearest ancestor; returns the
    /// defining class with the method.
    pub fn resolve_method(&self, class: &str, method: &str) -> Option<(&ClassInfo, &MethodInfo)> {
        self.chain(class)
            .into_iter()
            .find_map(|info| info.method(method).map(|m| (info, m)))
    }

    /// Constructor parameters, inherited when the class has no `__init__`.
    pub fn init_params(&self, class: &str) -> Vec<Arg> {
        self.resolve_method(class, "__init__")
            .map(|(_, m)| m.params.clone())
            .unwrap_or_default()
    }

    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        self.chain(class).iter().any(|c| c.name == ancestor)
    }
}

fn collect_class(name: &str, bases: &[Expr], body: &[Stmt]) -> ClassInfo {
    let base = bases.iter().find_map(|b| match &b.kind {
        ExprKind::Name { id } if id != "object" && id != "Exception" => Some(id.clone()),
        _ => None,
    });

    let mut info = ClassInfo { name: name.to_string(), base, fields: Vec::new(), methods: Vec::new() };

    for stmt in body {
        match &stmt.kind {
            StmtKind::AnnAssign { target, annotation, value } => {
                if let Some(field) = target.as_name() {
                    push_field(&mut info.fields, field, InferredType::from_annotation(annotation), value.clone());
                }
            }
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    if let Some(field) = target.as_name() {
                        push_field(&mut info.fields, field, literal_type(value), Some(value.clone()));
                    }
                }
            }
            StmtKind::FunctionDef { name, args, body, returns, decorator_list, is_async } => {
                let decorated = |d: &str| decorator_list.iter().any(|e| e.as_name() == Some(d));
                let is_static = decorated("staticmethod");
                let params = if is_static { args.clone() } else { args.iter().skip(1).cloned().collect() };
                info.methods.push(MethodInfo {
                    name: name.clone(),
                    params,
                    body: body.clone(),
                    returns: returns.clone(),
                    is_static,
                    is_property: decorated("property"),
                    is_async: *is_async,
                });
            }
            _ => {}
        }
    }

    // `self.x = ...` inside methods, `__init__` first so its types win
    let mut ordered: Vec<&MethodInfo> = info.methods.iter().filter(|m| m.name == "__init__").collect();
    ordered.extend(info.methods.iter().filter(|m| m.name != "__init__"));
    let mut discovered = Vec::new();
    for method in ordered {
        let params: HashMap<&str, InferredType> = method
            .params
            .iter()
            .map(|a| {
                let ty = a.annotation.as_ref().map(InferredType::from_annotation).unwrap_or(InferredType::Unknown);
                (a.arg.as_str(), ty)
            })
            .collect();
        collect_self_fields(&method.body, &params, &mut discovered);
    }
    for (field, ty) in discovered {
        push_field(&mut info.fields, &field, ty, None);
    }
    info
}

fn push_field(fields: &mut Vec<FieldInfo>, name: &str, ty: InferredType, default: Option<Expr>) {
    match fields.iter_mut().find(|f| f.name == name) {
        Some(existing) => {
            if existing.ty.is_unknown() {
                existing.ty = ty;
            }
            if existing.default.is_none() {
                existing.default = default;
            }
        }
        None => fields.push(FieldInfo { name: name.to_string(), ty, default }),
    }
}

fn collect_self_fields(body: &[Stmt], params: &HashMap<&str, InferredType>, out: &mut Vec<(String, InferredType)>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    if let Some(field) = self_attr(target) {
                        out.push((field.to_string(), value_type(value, params)));
                    }
                }
            }
            StmtKind::AnnAssign { target, annotation, .. } => {
                if let Some(field) = self_attr(target) {
                    out.push((field.to_string(), InferredType::from_annotation(annotation)));
                }
            }
            StmtKind::If { body, orelse, .. }
            | StmtKind::For { body, orelse, .. }
            | StmtKind::While { body, orelse, .. } => {
                collect_self_fields(body, params, out);
                collect_self_fields(orelse, params, out);
            }
            StmtKind::With { body, .. } => collect_self_fields(body, params, out),
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                collect_self_fields(body, params, out);
                for h in handlers {
                    collect_self_fields(&h.body, params, out);
                }
                collect_self_fields(orelse, params, out);
                collect_self_fields(finalbody, params, out);
            }
            _ => {}
        }
    }
}

fn self_attr(target: &Expr) -> Option<&str> {
    match &target.kind {
        ExprKind::Attribute { value, attr } if value.as_name() == Some("self") => Some(attr),
        _ => None,
    }
}

fn value_type(value: &Expr, params: &HashMap<&str, InferredType>) -> InferredType {
    match value.as_name().and_then(|n| params.get(n)) {
        Some(ty) => ty.clone(),
        None => literal_type(value),
    }
}
