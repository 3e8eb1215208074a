//! file: core/src/lower/objects.rs
//! description: class lowering.
//!
//! A class becomes a struct. Base fields are flattened in first, inherited
//! methods are lowered again against the derived struct, and every base
//! method a nearer class overrides is also kept under `<Base>_<method>` so
//! `super().method()` has something to call.
//!
use std::collections::HashMap;

use log::debug;

use super::context::Session;
use super::err::LoweringError;
use super::function::FunctionSpec;
use super::strings::ident;
use super::types::{default_repr, elem_type, value_type, zero_value, zig_type};
use super::writer::CodeWriter;
use crate::analyzers::prepass::MUTATING_METHODS;
use crate::analyzers::{Binding, ClassInfo, ClassRegistry, InferredType, MethodInfo, ValueRepr, walk};
use crate::ast::{Expr, ExprKind, StmtKind};

/// Name a base-class method is kept under in derived structs.
pub(crate) fn mangled(owner: &str, method: &str) -> String {
    format!("{}_{}", owner, method)
}

/// `self.<field>` -> field name.
fn self_field(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Attribute { value, attr } if value.as_name() == Some("self") => Some(attr),
        _ => None,
    }
}

/// Fields whose lists grow in place somewhere in a method, keyed
/// `Class.field` by the class whose method grows them.
pub(crate) fn grown_fields(classes: &ClassRegistry) -> HashMap<String, ValueRepr> {
    let mut out = HashMap::new();
    for class in classes.iter() {
        for method in &class.methods {
            let mut mark = |field: &str| {
                out.insert(format!("{}.{}", class.name, field), ValueRepr::Growable);
            };
            walk::visit_stmts(&method.body, &mut |stmt| match &stmt.kind {
                StmtKind::Assign { targets, .. } => {
                    for t in targets {
                        if let ExprKind::Subscript { value, .. } = &t.kind {
                            if let Some(f) = self_field(value) {
                                mark(f);
                            }
                        }
                    }
                }
                StmtKind::AugAssign { target, .. } => {
                    if let Some(f) = self_field(target) {
                        mark(f);
                    }
                }
                StmtKind::Delete { targets } => {
                    for t in targets {
                        if let ExprKind::Subscript { value, .. } = &t.kind {
                            if let Some(f) = self_field(value) {
                                mark(f);
                            }
                        }
                    }
                }
                _ => {}
            });
            walk::visit_body_exprs(&method.body, &mut |expr| {
                if let ExprKind::Call { func, .. } = &expr.kind {
                    if let ExprKind::Attribute { value, attr } = &func.kind {
                        if MUTATING_METHODS.contains(&attr.as_str()) {
                            if let Some(f) = self_field(value) {
                                mark(f);
                            }
                        }
                    }
                }
            });
        }
    }
    out.retain(|key, _| {
        let (class, field) = key.split_once('.').unwrap_or((key.as_str(), ""));
        classes.all_fields(class).iter().any(|f| f.name == field)
    });
    out
}

impl<'a> Session<'a> {
    /// The struct declaration of `class`.
    pub(crate) fn lower_class(&mut self, class: &ClassInfo) -> Result<String, LoweringError> {
        let classes = self.types.classes();
        let rt = self.rt();
        let alloc = self.alloc();
        let unit = self.unit();
        let name = ident(&class.name);

        let mut w = CodeWriter::new(unit);
        w.open(&format!("const {} = struct", name));

        // ------- Fields -------
        let fields = classes.all_fields(&class.name);
        let mut late_init = Vec::new();
        let mut cleanup = Vec::new();
        for field in &fields {
            let ty = self.types.field_type(&class.name, &field.name);
            let repr = self.field_repr(&class.name, &field.name).unwrap_or_else(|| default_repr(&ty));
            let spelled = ident(&field.name);
            let default = match repr {
                ValueRepr::Growable => {
                    late_init.push(format!("self.{} = std.ArrayList({}).init({});", spelled, elem_type(&ty, rt), alloc));
                    cleanup.push(format!("self.{}.deinit();", spelled));
                    "undefined".to_string()
                }
                ValueRepr::Map => {
                    late_init.push(format!("self.{} = {}.init({});", spelled, zig_type(&ty, &repr, rt), alloc));
                    cleanup.push(format!("self.{}.deinit();", spelled));
                    "undefined".to_string()
                }
                _ => self.field_default(field.default.as_ref(), &ty)?,
            };
            w.line(&format!("{}: {} = {},", spelled, zig_type(&ty, &repr, rt), default));
        }
        if !fields.is_empty() {
            w.blank();
        }

        // ------- Construction -------
        let init = classes.resolve_method(&class.name, "__init__");
        let init_sig = init.and_then(|(owner, _)| self.types.signature(&format!("{}.__init__", owner.name)));
        let init_params: Vec<(String, String)> = classes
            .init_params(&class.name)
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let ty = init_sig.map(|s| s.param_type(i)).unwrap_or(InferredType::Unknown);
                let text = match ty {
                    InferredType::Callable(_) => "anytype".to_string(),
                    _ => value_type(&ty, rt),
                };
                (ident(&a.arg), text)
            })
            .collect();
        let mut header = vec![format!("{}: std.mem.Allocator", alloc)];
        header.extend(init_params.iter().map(|(n, t)| format!("{}: {}", n, t)));
        w.open(&format!("pub fn init({}) anyerror!*{}", header.join(", "), name));
        w.line(&format!("const self = try {}.create({});", alloc, name));
        w.line("self.* = .{};");
        for line in &late_init {
            w.line(line);
        }
        if init.is_some() {
            w.line(&format!("errdefer self.deinit({});", alloc));
            let mut call = vec![alloc.to_string()];
            call.extend(init_params.iter().map(|(n, _)| n.clone()));
            w.line(&format!("try self.__init__({});", call.join(", ")));
        } else {
            for (n, _) in &init_params {
                w.line(&format!("_ = {};", n));
            }
        }
        w.line("return self;");
        w.close("");
        w.blank();

        w.open(&format!("pub fn deinit(self: *{}, {}: std.mem.Allocator) void", name, alloc));
        for line in &cleanup {
            w.line(line);
        }
        w.line(&format!("{}.destroy(self);", alloc));
        w.close("");

        // ------- Methods -------
        let chain = classes.chain(&class.name);
        let mut emitted: Vec<String> = Vec::new();
        for owner in &chain {
            for method in &owner.methods {
                let nearest = classes.resolve_method(&class.name, &method.name).map(|(c, _)| c.name.clone());
                let emitted_name = if nearest.as_deref() == Some(owner.name.as_str()) {
                    ident(&method.name)
                } else {
                    mangled(&owner.name, &method.name)
                };
                if emitted.contains(&emitted_name) {
                    continue;
                }
                emitted.push(emitted_name.clone());
                w.blank();
                let text = self.lower_method(class, owner, method, emitted_name)?;
                w.line(&text);
            }
        }
        w.close(";");
        debug!("lowered class {} ({} fields, {} methods)", class.name, fields.len(), emitted.len());
        Ok(w.finish())
    }

    fn lower_method(
        &mut self,
        class: &ClassInfo,
        owner: &ClassInfo,
        method: &MethodInfo,
        emitted_name: String,
    ) -> Result<String, LoweringError> {
        let key = format!("{}.{}", owner.name, method.name);
        let (receiver, presets) = if method.is_static {
            (None, Vec::new())
        } else {
            let instance = Binding::new(InferredType::Instance(class.name.clone()), ValueRepr::Plain);
            (Some(("self".to_string(), format!("*{}", ident(&class.name)))), vec![("self".to_string(), instance)])
        };
        self.lower_function(FunctionSpec {
            key,
            emitted_name,
            args: &method.params,
            body: &method.body,
            receiver,
            is_pub: true,
            presets,
        })
    }

    /// Field default: a class-level literal, else the type's zero value.
    fn field_default(&mut self, default: Option<&Expr>, ty: &InferredType) -> Result<String, LoweringError> {
        let literal = default.filter(|d| {
            matches!(d.kind, ExprKind::Constant { .. })
                || matches!(&d.kind, ExprKind::UnaryOp { operand, .. } if matches!(operand.kind, ExprKind::Constant { .. }))
        });
        match literal {
            Some(expr) if expr.is_none_literal() => Ok("null".to_string()),
            Some(expr) => {
                let value = self.lower_expr(expr)?;
                Ok(match (&value.ty, ty) {
                    (InferredType::Int, InferredType::Float) => super::expr::as_float(&value.code, &value.ty),
                    _ => value.code,
                })
            }
            None => Ok(zero_value(ty).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn appended_self_fields_are_growable() {
        let m = module(vec![class(
            "Stack",
            &[],
            vec![
                def("__init__", args(&["self"]), vec![assign_to(attr(name("self"), "items"), list(vec![]))]),
                def("push", args(&["self", "x"]), vec![expr_stmt(method(attr(name("self"), "items"), "append", vec![name("x")]))]),
            ],
        )]);
        let classes = ClassRegistry::build(&m);
        let grown = grown_fields(&classes);
        assert_eq!(grown.get("Stack.items"), Some(&ValueRepr::Growable));
        assert_eq!(grown.len(), 1);
    }

    #[test]
    fn mangled_names_join_owner_and_method() {
        assert_eq!(mangled("Base", "describe"), "Base_describe");
    }
}
