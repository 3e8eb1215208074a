//! file: core/src/lower/stmt.rs
//! description: statement lowering.
//!
//! Statements are written into a `CodeWriter`; every construct that opens
//! a block runs its body through `lower_block`, which pairs the scope push
//! with its pop on every exit path.
//!
use std::collections::HashSet;

use lazy_static::lazy_static;
use log::{debug, trace};

use super::context::Session;
use super::err::LoweringError;
use super::expr::{Coercion, as_float, view};
use super::function::terminates;
use super::ownership::{Lowered, Release, plan_binding};
use super::types::{annotatable, default_repr, elem_type, zig_type};
use super::writer::{CodeWriter, block_expr};
use crate::analyzers::{Binding, InferredType, ValueRepr};
use crate::ast::{BinOperator, CmpOperator, ExceptHandler, Expr, ExprKind, Stmt, StmtKind, WithItem};
use crate::location::Location;

lazy_static! {
    /// Native errors that stand for a source exception class.
    static ref ERROR_ALIASES: Vec<(&'static str, &'static [&'static str])> = vec![
        ("ValueError", &["ValueError", "InvalidCharacter", "Overflow"]),
        ("ZeroDivisionError", &["ZeroDivisionError", "DivisionByZero"]),
        ("ArithmeticError", &["ArithmeticError", "DivisionByZero", "Overflow"]),
        ("LookupError", &["LookupError", "IndexError", "KeyError"]),
        ("MemoryError", &["MemoryError", "OutOfMemory"]),
    ];

    /// Handler types that catch everything.
    static ref CATCH_ALL: HashSet<&'static str> = ["Exception", "BaseException"].into_iter().collect();
}

/// Native error names a handler for `class` matches.
fn error_names(class: &str) -> Vec<String> {
    match ERROR_ALIASES.iter().find(|(name, _)| *name == class) {
        Some((_, names)) => names.iter().map(|n| n.to_string()).collect(),
        None => vec![class.to_string()],
    }
}

/// Exception classes named by a handler; empty for a bare `except:`.
fn handler_classes(handler: &ExceptHandler) -> Vec<&str> {
    match handler.exc_type.as_ref().map(|e| &e.kind) {
        Some(ExprKind::Name { id }) => vec![id.as_str()],
        Some(ExprKind::Tuple { elts }) => elts.iter().filter_map(|e| e.as_name()).collect(),
        Some(ExprKind::Attribute { attr, .. }) => vec![attr.as_str()],
        _ => Vec::new(),
    }
}

/// `if __name__ == "__main__":`
fn is_main_guard(test: &Expr) -> bool {
    let ExprKind::Compare { left, ops, comparators } = &test.kind else {
        return false;
    };
    if ops.as_slice() != [CmpOperator::Eq] || comparators.len() != 1 {
        return false;
    }
    let (a, b) = (left.as_ref(), &comparators[0]);
    (a.as_name() == Some("__name__") && b.as_str_literal() == Some("__main__"))
        || (b.as_name() == Some("__name__") && a.as_str_literal() == Some("__main__"))
}

/// Class a `raise` names (`raise E`, `raise E(...)`, `raise mod.E(...)`).
fn raised_class(exc: &Expr) -> Option<&str> {
    let callee = match &exc.kind {
        ExprKind::Call { func, .. } => func.as_ref(),
        _ => exc,
    };
    match &callee.kind {
        ExprKind::Name { id } => Some(id),
        ExprKind::Attribute { attr, .. } => Some(attr),
        _ => None,
    }
}

/// Operators with a compound-assignment form for numeric targets.
fn compound_operator(op: BinOperator) -> Option<&'static str> {
    match op {
        BinOperator::Add => Some("+="),
        BinOperator::Sub => Some("-="),
        BinOperator::Mult => Some("*="),
        BinOperator::BitOr => Some("|="),
        BinOperator::BitAnd => Some("&="),
        BinOperator::BitXor => Some("^="),
        _ => None,
    }
}

impl<'a> Session<'a> {
    pub(crate) fn lower_stmts(&mut self, body: &[Stmt], w: &mut CodeWriter) -> Result<(), LoweringError> {
        for stmt in body {
            self.descend(&stmt.location, |s| s.lower_stmt(stmt, w))?;
        }
        Ok(())
    }

    /// `body` in a lexical scope of its own. The caller writes the braces.
    pub(crate) fn lower_block(&mut self, body: &[Stmt], w: &mut CodeWriter) -> Result<(), LoweringError> {
        let saved = self.locals.len();
        let out = self.scoped(|s| s.lower_stmts(body, w));
        self.locals.truncate(saved);
        out
    }

    fn lower_stmt(&mut self, stmt: &Stmt, w: &mut CodeWriter) -> Result<(), LoweringError> {
        trace!("lowering {}", stmt.kind_name());
        let location = &stmt.location;
        match &stmt.kind {
            StmtKind::FunctionDef { name, args, body, .. } => {
                // module-level definitions are emitted on their own
                if self.frame().is_main {
                    return Ok(());
                }
                let text = self.lower_nested_def(name, args, body)?;
                if !text.is_empty() {
                    w.line(&text);
                }
            }
            StmtKind::ClassDef { name, .. } => {
                if !self.frame().is_main {
                    let diag = self.defer_diag("ClassDef", format!("class {} defined inside a function", name), location);
                    w.line(&format!("{};", diag));
                }
            }
            StmtKind::Return { value } => self.lower_return(value.as_ref(), w)?,
            StmtKind::Delete { targets } => {
                for t in targets {
                    self.lower_delete(t, w)?;
                }
            }
            StmtKind::Assign { targets, value } => {
                let Some((first, rest)) = targets.split_first() else {
                    return Ok(());
                };
                self.lower_assign(first, value, None, w)?;
                // `a = b = v` rebinds the rest from the first target
                for target in rest {
                    self.lower_assign(target, first, None, w)?;
                }
            }
            StmtKind::AnnAssign { target, annotation, value } => {
                if let Some(value) = value {
                    let declared = InferredType::from_annotation(annotation);
                    self.lower_assign(target, value, Some(declared), w)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.lower_aug_assign(stmt, target, *op, value, w)?,
            StmtKind::For { target, iter, body, orelse } => self.lower_for(target, iter, body, orelse, w)?,
            StmtKind::While { test, body, orelse } => {
                let cond = self.lower_expr(test)?;
                let cond = self.truth(cond);
                w.open(&format!("while ({})", cond));
                self.lower_block(body, w)?;
                if !orelse.is_empty() {
                    w.reopen("else");
                    self.lower_block(orelse, w)?;
                }
                w.close("");
            }
            StmtKind::If { test, body, orelse } => {
                if self.frame().is_main && is_main_guard(test) {
                    return self.lower_stmts(body, w);
                }
                let cond = self.lower_expr(test)?;
                let cond = self.truth(cond);
                w.open(&format!("if ({})", cond));
                self.lower_block(body, w)?;
                if !orelse.is_empty() {
                    w.reopen("else");
                    self.lower_block(orelse, w)?;
                }
                w.close("");
            }
            StmtKind::With { items, body } => self.lower_with(items, body, w)?,
            StmtKind::Raise { exc } => self.lower_raise(exc.as_ref(), location, w),
            StmtKind::Try { body, handlers, orelse, finalbody } => self.lower_try(body, handlers, orelse, finalbody, w)?,
            StmtKind::Assert { test, .. } => {
                let cond = self.lower_expr(test)?;
                let cond = self.truth(cond);
                w.line(&format!("if (!({})) {}", cond, self.fail("error.AssertionError")));
            }
            StmtKind::Import { .. } | StmtKind::ImportFrom { .. } => {}
            StmtKind::Global { .. } | StmtKind::Nonlocal { .. } | StmtKind::Pass => {}
            StmtKind::Break => w.line("break;"),
            StmtKind::Continue => w.line("continue;"),
            StmtKind::Expr { value } => self.lower_expr_stmt(value, w)?,
        }
        Ok(())
    }

    // ------- Expression statements -------

    fn lower_expr_stmt(&mut self, value: &Expr, w: &mut CodeWriter) -> Result<(), LoweringError> {
        match &value.kind {
            // docstrings and bare literals
            ExprKind::Constant { .. } | ExprKind::Name { .. } => Ok(()),
            ExprKind::Yield { value: yielded } => {
                if !self.frame().generator {
                    let diag = self.defer_diag("Yield", "yield outside a generator".into(), &value.location);
                    w.line(&format!("{};", diag));
                    return Ok(());
                }
                let Some(yielded) = yielded else {
                    return Ok(());
                };
                let elem = self.frame().returns.element();
                let item = self.lower_expr(yielded)?;
                let code = match (&item.ty, &elem) {
                    (InferredType::Int, InferredType::Float) => as_float(&item.code, &item.ty),
                    _ if item.is_growable() => self.guard(&format!("{}.toOwnedSlice()", item.code)),
                    _ => item.code,
                };
                w.line(&format!("{};", self.guard(&format!("__gen_out.append({})", code))));
                Ok(())
            }
            _ => {
                let lowered = self.lower_expr(value)?;
                w.line(&self.discard(lowered));
                Ok(())
            }
        }
    }

    /// Statement evaluating `value` for its effect only.
    fn discard(&mut self, value: Lowered) -> String {
        let alloc = self.alloc();
        match value.owned {
            Some(Release::Free) => format!("{}.free({});", alloc, value.code),
            Some(Release::DeinitWithAllocator) => format!("{}.deinit({});", value.code, alloc),
            Some(Release::Deinit) => {
                let tmp = self.fresh("__drop");
                format!("{{\n    var {} = {};\n    {}.deinit();\n}}", tmp, value.code, tmp)
            }
            None if value.ty == InferredType::None => format!("{};", value.code),
            None => format!("_ = {};", value.code),
        }
    }

    // ------- Assignment -------

    /// `target = value`; `declared` is an annotation's type.
    fn lower_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        declared: Option<InferredType>,
        w: &mut CodeWriter,
    ) -> Result<(), LoweringError> {
        match &target.kind {
            ExprKind::Name { id } => {
                if self.frame().is_main
                    && self.facts.is_constant(id)
                    && self.scopes.lookup_depth(id) == Some(0)
                    && self.scopes.lookup(id).is_some_and(|b| !b.mutable)
                {
                    // emitted as a top-level constant
                    return Ok(());
                }
                let existing = self.assignable(id);
                let hint = match (&declared, &existing) {
                    (Some(t), _) => t.clone(),
                    (None, Some(b)) if !b.ty.is_unknown() => b.ty.clone(),
                    _ => self.table_type(id),
                };
                let grown = match &existing {
                    Some(b) => b.repr == ValueRepr::Growable,
                    None => self.scope_facts().is_grown(id) && matches!(hint, InferredType::List(_)),
                };
                let lowered = self.lower_value(value, &hint, grown, Some(id))?;
                match existing {
                    Some(binding) => self.reassign(id, binding, lowered, w),
                    None => self.bind_new(id, lowered, &hint, grown, w),
                }
                Ok(())
            }
            ExprKind::Tuple { elts } | ExprKind::List { elts } => self.lower_unpack(elts, value, w),
            ExprKind::Subscript { value: container, slice } => {
                let item = self.lower_expr(value)?;
                self.store_item(container, slice, item, &target.location, w)
            }
            ExprKind::Attribute { value: object, attr } => {
                let receiver = self.lower_expr(object)?;
                let (field_ty, repr) = match &receiver.ty {
                    InferredType::Instance(class) => {
                        let ty = self.types.field_type(class, attr);
                        let repr = self.field_repr(class, attr).unwrap_or_else(|| default_repr(&ty));
                        (ty, repr)
                    }
                    _ => (InferredType::Unknown, ValueRepr::Plain),
                };
                let mut item = self.lower_value(value, &field_ty, repr == ValueRepr::Growable, None)?;
                if repr == ValueRepr::Growable {
                    item = self.into_growable(item);
                }
                let code = numeric_coercion(&item, &field_ty).apply(&item.code);
                let field = super::strings::ident(attr);
                match receiver.ty {
                    InferredType::Instance(_) => w.line(&format!("{}.{} = {};", receiver.code, field, code)),
                    _ => {
                        let line = self.guard(&format!("{}.setAttr({}, \"{}\", {})", self.rt(), receiver.code, attr, code));
                        w.line(&format!("{};", line));
                    }
                }
                Ok(())
            }
            _ => {
                let diag = self.defer_diag("Assign", format!("cannot assign to {}", target.kind_name()), &target.location);
                w.line(&format!("{};", diag));
                Ok(())
            }
        }
    }

    /// The binding an assignment to `name` updates, if any. A module
    /// constant assigned inside a function is a new local instead.
    fn assignable(&self, name: &str) -> Option<Binding> {
        let binding = self.scopes.lookup(name)?;
        let depth = self.scopes.lookup_depth(name);
        let module_level = depth == Some(0) && !self.frame().is_main;
        if module_level && !self.scope_facts().globals.contains(name) {
            return None;
        }
        Some(binding.clone())
    }

    /// Declare `name` with its first value.
    fn bind_new(&mut self, name: &str, value: Lowered, hint: &InferredType, grown: bool, w: &mut CodeWriter) {
        let facts = self.scope_facts();
        let mut value = value;
        if grown {
            value = self.into_growable(value);
        }
        let coercion = numeric_coercion(&value, hint);
        let code = coercion.apply(&value.code);
        let ty = match coercion {
            Coercion::IntToFloat => InferredType::Float,
            Coercion::BoolToInt => InferredType::Int,
            _ if value.ty.is_unknown() || value.ty.is_partial() => hint.clone(),
            _ => value.ty.clone(),
        };
        let escapes = facts.escapes(name);
        let plan = plan_binding(&value, facts.is_mutated(name), escapes);
        let (spelled, alias) = self.local_name(name);

        let annotation = if annotatable(&ty, &value.repr) && !matches!(value.repr, ValueRepr::Closure(_) | ValueRepr::FnPointer(_)) {
            format!(": {}", zig_type(&ty, &value.repr, self.rt()))
        } else {
            String::new()
        };
        w.line(&format!("{} {}{} = {};", plan.keyword(), spelled, annotation, code));
        if let Some(release) = plan.release {
            w.line(&format!("defer {}", release.statement(&spelled, self.alloc())));
        } else if value.is_owned() {
            self.frame_mut().owned.insert(name.to_string());
        }
        if !facts.is_read(name) && plan.release.is_none() && !plan.mutable {
            w.line(&format!("_ = {};", spelled));
        }
        let mut binding = Binding::new(ty, value.repr.clone()).mutable(plan.mutable).released(plan.release.is_some());
        binding.alias = alias;
        debug!("bound {} ({}, {})", name, binding.ty, plan.keyword());
        self.declare(name, binding);
    }

    /// Assign a new value to an existing binding.
    fn reassign(&mut self, name: &str, binding: Binding, value: Lowered, w: &mut CodeWriter) {
        let spelled = self.spelling(name);
        let alloc = self.alloc();
        let mut value = value;
        if binding.repr == ValueRepr::Growable {
            value = self.into_growable(value);
        }
        let code = numeric_coercion(&value, &binding.ty).apply(&value.code);
        if !binding.released {
            w.line(&format!("{} = {};", spelled, code));
            return;
        }
        // the scoped release frees whatever the name holds at exit, so the
        // new value must be owned and the old one is given back here
        let value = match (&binding.ty, value.is_owned()) {
            (InferredType::String, false) => self.dupe_string(Lowered { code, ..value }),
            (InferredType::List(_), false) if binding.repr != ValueRepr::Growable => {
                let elem = elem_type(&binding.ty, self.rt());
                let copy = self.guard(&format!("{}.dupe({}, {})", alloc, elem, code));
                Lowered::new(copy, binding.ty.clone()).owned(Release::Free)
            }
            _ => Lowered { code, ..value },
        };
        let release = Release::for_value(&binding.ty, &binding.repr).unwrap_or(Release::Free);
        let next = self.fresh("__next");
        w.open("");
        w.line(&format!("const {} = {};", next, value.code));
        w.line(&release.statement(&spelled, alloc));
        w.line(&format!("{} = {};", spelled, next));
        w.close("");
    }

    /// A list value in growable form.
    fn into_growable(&mut self, value: Lowered) -> Lowered {
        if value.is_growable() || !matches!(value.ty, InferredType::List(_)) {
            return value;
        }
        let ty = value.ty.clone();
        let elem = elem_type(&ty, self.rt());
        let alloc = self.alloc();
        let unit = self.unit();
        let label = self.fresh("__grow");
        let list = self.fresh("__grown");
        let g = self.guarder();
        let code = self.with_temps(vec![value], |c| {
            let stmts = vec![
                format!("var {} = std.ArrayList({}).init({});", list, elem, alloc),
                format!("errdefer {}.deinit();", list),
                format!("{};", g.wrap(&format!("{}.appendSlice({})", list, c[0]))),
            ];
            block_expr(&label, &stmts, &list, unit)
        });
        Lowered::new(code, ty).with_repr(ValueRepr::Growable).owned(Release::Deinit)
    }

    /// `a, b = value`
    fn lower_unpack(&mut self, targets: &[Expr], value: &Expr, w: &mut CodeWriter) -> Result<(), LoweringError> {
        let rt = self.rt();
        let mut parts: Vec<(String, InferredType)> = Vec::with_capacity(targets.len());
        match &value.kind {
            ExprKind::Tuple { elts } | ExprKind::List { elts } if elts.len() == targets.len() => {
                // every right-hand side is read before any target is written
                for e in elts {
                    let item = self.lower_expr(e)?;
                    let tmp = self.fresh("__t");
                    w.line(&format!("const {} = {};", tmp, item.code));
                    parts.push((tmp, item.ty));
                }
            }
            _ => {
                let whole = self.lower_expr(value)?;
                let tmp = self.fresh("__t");
                w.line(&format!("const {} = {};", tmp, whole.code));
                if let Some(release) = whole.owned {
                    w.line(&format!("defer {}", release.statement(&tmp, self.alloc())));
                }
                for i in 0..targets.len() {
                    let part = match &whole.ty {
                        InferredType::Tuple(items) => {
                            (format!("{}[{}]", tmp, i), items.get(i).cloned().unwrap_or(InferredType::Unknown))
                        }
                        InferredType::List(e) => (format!("{}[{}]", view(&tmp, whole.is_growable()), i), (**e).clone()),
                        _ => (self.guard(&format!("{}.getItem({}, {})", rt, tmp, i)), InferredType::Unknown),
                    };
                    parts.push(part);
                }
            }
        }
        for (target, (code, ty)) in targets.iter().zip(parts) {
            let item = Lowered::new(code, ty);
            match &target.kind {
                ExprKind::Name { id } => match self.assignable(id) {
                    Some(binding) => self.reassign(id, binding, item, w),
                    None => {
                        let hint = self.table_type(id);
                        self.bind_new(id, item, &hint, false, w);
                    }
                },
                ExprKind::Subscript { value: container, slice } => {
                    self.store_item(container, slice, item, &target.location, w)?;
                }
                ExprKind::Attribute { value: object, attr } => {
                    let receiver = self.lower_expr(object)?;
                    w.line(&format!("{}.{} = {};", receiver.code, super::strings::ident(attr), item.code));
                }
                _ => {
                    let diag = self.defer_diag("Assign", "nested unpacking targets are not supported".into(), &target.location);
                    w.line(&format!("{};", diag));
                }
            }
        }
        Ok(())
    }

    /// `container[index] = item`
    fn store_item(
        &mut self,
        container: &Expr,
        index: &Expr,
        item: Lowered,
        location: &Option<Location>,
        w: &mut CodeWriter,
    ) -> Result<(), LoweringError> {
        let target = self.lower_expr(container)?;
        let key = self.lower_expr(index)?;
        let rt = self.rt();
        match &target.ty {
            InferredType::Dict(_, slot) => {
                let code = numeric_coercion(&item, slot).apply(&item.code);
                w.line(&format!("{};", self.guard(&format!("{}.put({}, {})", target.code, key.code, code))));
            }
            InferredType::List(elem) if target.is_growable() => {
                let code = numeric_coercion(&item, elem).apply(&item.code);
                let slot = match index.as_int_literal() {
                    Some(i) if i >= 0 => i.to_string(),
                    _ => format!("{}.index({}.items.len, {})", rt, target.code, key.code),
                };
                w.line(&format!("{}.items[{}] = {};", target.code, slot, code));
            }
            InferredType::List(_) => {
                let diag = self.defer_diag("Subscript", "item assignment on a list that is never grown".into(), location);
                w.line(&format!("{};", diag));
            }
            InferredType::Instance(class) => {
                if self.types.classes().resolve_method(class, "__setitem__").is_none() {
                    let diag = self.defer_diag("Subscript", format!("{} does not define __setitem__", class), location);
                    w.line(&format!("{};", diag));
                    return Ok(());
                }
                let call = format!("{}.__setitem__({}, {}, {})", target.code, self.alloc(), key.code, item.code);
                w.line(&format!("{};", self.guard(&call)));
            }
            _ => {
                let call = format!("{}.setItem({}, {}, {})", rt, target.code, key.code, item.code);
                w.line(&format!("{};", self.guard(&call)));
            }
        }
        Ok(())
    }

    fn lower_aug_assign(
        &mut self,
        stmt: &Stmt,
        target: &Expr,
        op: BinOperator,
        value: &Expr,
        w: &mut CodeWriter,
    ) -> Result<(), LoweringError> {
        let current = self.infer(target);
        let operand = self.infer(value);
        if let (Some(symbol), true) = (compound_operator(op), current.is_numeric() && operand.is_numeric()) {
            let widened = current == InferredType::Int && operand == InferredType::Float;
            if !widened && target.as_name().is_none_or(|n| self.assignable(n).is_some()) {
                let place = self.lower_expr(target)?;
                let rhs = self.lower_expr(value)?;
                let code = numeric_coercion(&rhs, &current).apply(&rhs.code);
                w.line(&format!("{} {} {};", place.code, symbol, code));
                return Ok(());
            }
        }
        if let (InferredType::List(_), BinOperator::Add) = (&current, op) {
            let place = self.lower_expr(target)?;
            if place.is_growable() {
                let rhs = self.lower_expr(value)?;
                let growable = rhs.is_growable();
                let g = self.guarder();
                let code = self.with_temps(vec![rhs], |c| g.wrap(&format!("{}.appendSlice({})", place.code, view(&c[0], growable))));
                w.line(&format!("{};", code));
                return Ok(());
            }
        }
        // `x op= v` as `x = x op v`
        let combined = Expr::new(
            ExprKind::BinOp { left: Box::new(target.clone()), op, right: Box::new(value.clone()) },
            stmt.location.clone(),
        );
        self.lower_assign(target, &combined, None, w)
    }

    fn lower_delete(&mut self, target: &Expr, w: &mut CodeWriter) -> Result<(), LoweringError> {
        match &target.kind {
            ExprKind::Subscript { value, slice } => {
                let container = self.lower_expr(value)?;
                let key = self.lower_expr(slice)?;
                match &container.ty {
                    InferredType::Dict(..) => w.line(&format!("_ = {}.remove({});", container.code, key.code)),
                    InferredType::List(_) if container.is_growable() => w.line(&format!(
                        "_ = {}.orderedRemove({}.index({}.items.len, {}));",
                        container.code,
                        self.rt(),
                        container.code,
                        key.code
                    )),
                    _ => {
                        let diag = self.defer_diag("Delete", format!("del on a {} value", container.ty), &target.location);
                        w.line(&format!("{};", diag));
                    }
                }
            }
            // names simply go out of use
            ExprKind::Name { .. } => {}
            _ => {
                let diag = self.defer_diag("Delete", format!("del of {}", target.kind_name()), &target.location);
                w.line(&format!("{};", diag));
            }
        }
        Ok(())
    }

    // ------- Loops -------

    fn lower_for(
        &mut self,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        w: &mut CodeWriter,
    ) -> Result<(), LoweringError> {
        let facts = self.scope_facts();
        let saved = self.locals.len();
        let out = self.scoped(|s| {
            let plan = s.plan_loop(target, iter, &facts.reads, true)?;
            let wrapped = !plan.prelude.is_empty();
            if wrapped {
                w.open("");
                for line in &plan.prelude {
                    w.line(line);
                }
            }
            w.open(&plan.header);
            for line in &plan.body_prefix {
                w.line(line);
            }
            s.lower_block(body, w)?;
            if !orelse.is_empty() {
                w.reopen("else");
                s.lower_block(orelse, w)?;
            }
            w.close("");
            if wrapped {
                w.close("");
            }
            Ok(())
        });
        self.locals.truncate(saved);
        out
    }

    // ------- Context managers -------

    fn lower_with(&mut self, items: &[WithItem], body: &[Stmt], w: &mut CodeWriter) -> Result<(), LoweringError> {
        w.open("");
        let out = self.scoped(|s| {
            for item in items {
                let ctx = s.lower_expr(&item.context_expr)?;
                let ctx_ty = ctx.ty.clone();
                let holder = s.fresh("__ctx");
                w.line(&format!("const {} = {};", holder, ctx.code));
                if let Some(release) = ctx.owned {
                    w.line(&format!("defer {}", release.statement(&holder, s.alloc())));
                }
                let entered = match &ctx_ty {
                    InferredType::Instance(class) => {
                        let classes = s.types.classes();
                        let enter = classes.resolve_method(class, "__enter__").is_some();
                        if classes.resolve_method(class, "__exit__").is_some() {
                            w.line(&format!("defer {}.__exit__({}) catch {{}};", holder, s.alloc()));
                        }
                        if enter {
                            let ret = s
                                .types
                                .signature(&format!("{}.__enter__", class))
                                .map(|sig| sig.returns.clone())
                                .unwrap_or(InferredType::Instance(class.clone()));
                            Lowered::new(s.guard(&format!("{}.__enter__({})", holder, s.alloc())), ret)
                        } else {
                            Lowered::new(holder.clone(), ctx_ty.clone())
                        }
                    }
                    _ => {
                        w.line(&format!("defer {}.close({});", s.rt(), holder));
                        Lowered::new(holder.clone(), ctx_ty.clone())
                    }
                };
                match item.optional_vars.as_ref().and_then(|v| v.as_name()) {
                    Some(name) => {
                        let hint = entered.ty.clone();
                        s.bind_new(name, entered, &hint, false, w);
                    }
                    None => w.line(&format!("_ = {};", entered.code)),
                }
            }
            s.lower_stmts(body, w)
        });
        w.close("");
        out
    }

    // ------- Exceptions -------

    fn lower_raise(&mut self, exc: Option<&Expr>, location: &Option<Location>, w: &mut CodeWriter) {
        let Some(exc) = exc else {
            let current = self.frame().current_error.clone().unwrap_or_else(|| "error.RuntimeError".to_string());
            w.line(&self.fail(&current));
            return;
        };
        match raised_class(exc) {
            Some(class) => {
                debug!("raise {} lowered to error.{}", class, class);
                w.line(&self.fail(&format!("error.{}", class)));
            }
            None => {
                let diag = self.defer_diag("Raise", "raise of a computed exception value".into(), location);
                w.line(&format!("{};", diag));
            }
        }
    }

    fn lower_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        w: &mut CodeWriter,
    ) -> Result<(), LoweringError> {
        let unit = self.unit();
        let label = self.fresh("__try");
        let outcome = self.fresh("__outcome");
        let err = self.fresh("__err");

        // cleanup that cannot fail runs as a block-scoped defer
        let mut cleanup = CodeWriter::new(unit);
        self.lower_block(finalbody, &mut cleanup)?;
        let cleanup = cleanup.finish();
        let deferred = !finalbody.is_empty()
            && !["try ", "return", "break :"].iter().any(|k| cleanup.contains(k));
        let catch_all = handlers.iter().any(|h| {
            let classes = handler_classes(h);
            classes.is_empty() || classes.iter().any(|c| CATCH_ALL.contains(c))
        });
        let pending = (!finalbody.is_empty() && !deferred && !catch_all).then(|| self.fresh("__pending"));

        w.open("");
        if deferred {
            w.open("defer");
            w.line(cleanup.trim_end());
            w.close("");
        }
        if let Some(p) = &pending {
            w.line(&format!("var {}: ?anyerror = null;", p));
        }

        w.open(&format!("const {}: anyerror!void = {}:", outcome, label));
        self.frame_mut().try_labels.push(label.clone());
        let lowered = self.lower_block(body, w);
        self.frame_mut().try_labels.pop();
        lowered?;
        if !terminates(body) {
            w.line(&format!("break :{} {{}};", label));
        }
        w.close(";");

        w.open(&format!("if ({}) |_|", outcome));
        self.lower_block(orelse, w)?;
        w.reopen(&format!("else |{}| switch ({})", err, err));
        let mut seen: HashSet<String> = HashSet::new();
        let mut fallback: Option<&ExceptHandler> = None;
        for handler in handlers {
            let classes = handler_classes(handler);
            if classes.is_empty() || classes.iter().any(|c| CATCH_ALL.contains(c)) {
                fallback.get_or_insert(handler);
                continue;
            }
            let names: Vec<String> = classes
                .iter()
                .flat_map(|c| error_names(c))
                .filter(|n| seen.insert(n.clone()))
                .map(|n| format!("error.{}", n))
                .collect();
            if names.is_empty() {
                continue;
            }
            w.open(&format!("{} =>", names.join(", ")));
            self.lower_handler(handler, &err, w)?;
            w.close(",");
        }
        match (fallback, &pending) {
            (Some(handler), _) => {
                w.open("else =>");
                self.lower_handler(handler, &err, w)?;
                w.close(",");
            }
            (None, Some(p)) => w.line(&format!("else => {} = {},", p, err)),
            (None, None) => w.line(&format!("else => {},", self.guarder().fail_expr(&err))),
        }
        w.close("");

        if !finalbody.is_empty() && !deferred {
            w.line(cleanup.trim_end());
        }
        if let Some(p) = &pending {
            w.line(&format!("if ({}) |__e| {}", p, self.fail("__e")));
        }
        w.close("");
        Ok(())
    }

    fn lower_handler(&mut self, handler: &ExceptHandler, err: &str, w: &mut CodeWriter) -> Result<(), LoweringError> {
        let saved = self.frame().current_error.clone();
        self.frame_mut().current_error = Some(err.to_string());
        let out = self.scoped(|s| {
            if let Some(name) = &handler.name {
                if s.scope_facts().is_read(name) {
                    let (spelled, alias) = s.local_name(name);
                    w.line(&format!("const {} = @errorName({});", spelled, err));
                    let mut binding = Binding::new(InferredType::String, ValueRepr::Plain);
                    binding.alias = alias;
                    s.declare(name, binding);
                }
            }
            s.lower_stmts(&handler.body, w)
        });
        self.frame_mut().current_error = saved;
        out
    }
}

/// Widening applied when a value is stored into a slot of type `slot`.
fn numeric_coercion(value: &Lowered, slot: &InferredType) -> Coercion {
    match (&value.ty, slot) {
        (InferredType::Int, InferredType::Float) => Coercion::IntToFloat,
        (InferredType::Bool, InferredType::Int) => Coercion::BoolToInt,
        _ => Coercion::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn main_guard_is_recognized_both_ways() {
        assert!(is_main_guard(&compare(name("__name__"), CmpOperator::Eq, string("__main__"))));
        assert!(is_main_guard(&compare(string("__main__"), CmpOperator::Eq, name("__name__"))));
        assert!(!is_main_guard(&compare(name("__name__"), CmpOperator::NotEq, string("__main__"))));
    }

    #[test]
    fn handler_classes_expand_to_native_errors() {
        assert_eq!(error_names("ValueError"), vec!["ValueError", "InvalidCharacter", "Overflow"]);
        assert_eq!(error_names("KeyError"), vec!["KeyError"]);
        let h = handler(Some("ZeroDivisionError"), None, vec![pass()]);
        assert_eq!(handler_classes(&h), vec!["ZeroDivisionError"]);
        assert!(handler_classes(&handler(None, None, vec![])).is_empty());
    }

    #[test]
    fn early_exits_in_nested_blocks_restore_scope_depth() {
        use crate::analyzers::{ClassRegistry, ModuleFacts, TypeInferrer};
        use crate::config::LoweringConfig;
        use crate::lower::context::Frame;
        use crate::registry::StaticRegistry;

        let body = vec![
            assign("n", int(10)),
            while_(
                compare(name("n"), CmpOperator::Gt, int(0)),
                vec![
                    aug_assign("n", BinOperator::Sub, int(1)),
                    if_(compare(name("n"), CmpOperator::Eq, int(7)), vec![assign("skipped", int(1)), cont()], vec![]),
                    if_(
                        compare(name("n"), CmpOperator::Eq, int(5)),
                        vec![if_(compare(name("n"), CmpOperator::Gt, int(4)), vec![brk()], vec![ret(Some(name("n")))])],
                        vec![],
                    ),
                ],
            ),
            ret(Some(name("n"))),
        ];
        let m = module(vec![def_returning("countdown", vec![], name("int"), body.clone())]);
        let registry = StaticRegistry::builtin().expect("builtin registry");
        let types = TypeInferrer::analyze(&m, ClassRegistry::build(&m), registry.return_types());
        let facts = ModuleFacts::analyze(&m);
        let config = LoweringConfig::default();
        let mut session = Session::new(&config, &registry, &registry, &types, &facts);
        let outer = session.scopes.depth();

        let frame = Frame { key: "countdown".into(), returns: InferredType::Int, ..Frame::default() };
        let ((before, after, leaked), _) = session
            .in_frame(frame, |s| {
                let before = s.scopes.depth();
                let mut w = CodeWriter::new("    ");
                s.lower_stmts(&body, &mut w)?;
                Ok((before, s.scopes.depth(), s.scopes.is_declared("skipped")))
            })
            .expect("body lowers");
        assert_eq!(before, after);
        assert!(!leaked);
        assert_eq!(session.scopes.depth(), outer);
    }

    #[test]
    fn raised_classes_are_read_through_calls() {
        assert_eq!(raised_class(&call_name("ValueError", vec![string("bad")])), Some("ValueError"));
        assert_eq!(raised_class(&name("KeyError")), Some("KeyError"));
        assert_eq!(raised_class(&int(1)), None);
    }
}
