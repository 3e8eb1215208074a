//! file: core/src/lower/closure.rs
//! description: lambdas, nested functions, comprehensions and loop plans.
//!
//! Anything callable that is not a module-level function is hoisted into a
//! `ClosureRecord`: a plain function when it captures nothing, otherwise a
//! struct holding the captured values with a `call` method. Comprehensions
//! stay inline as accumulation loops inside a labeled block.
//!
//! `LoopPlan` is shared by `for` statements and comprehension clauses; it
//! picks a counting loop for `range`, index loops for `enumerate`/`zip`/
//! `reversed`, hash map iterators for dicts, and `runtime.iterate` when
//! the iterable has no known type.
//!
use std::collections::{HashMap, HashSet};

use log::debug;

use super::context::{ClosureRecord, Frame, Session};
use super::err::LoweringError;
use super::expr::{as_int, length_of, view};
use super::ownership::Lowered;
use super::strings::ident;
use super::types::{default_repr, value_type, zig_type};
use super::writer::{CodeWriter, block_expr};
use crate::analyzers::{Binding, InferredType, ModuleFacts, ValueRepr, walk};
use crate::ast::{Arg, Comprehension, Expr, ExprKind, Module, Stmt, StmtKind};
use crate::location::Location;

/// Name of the struct synthesized for nested function `inner` of `outer`.
pub(crate) fn closure_struct_name(outer_key: &str, inner: &str) -> String {
    format!("__Closure_{}_{}", outer_key.replace('.', "_"), inner)
}

/// Function key -> closure struct for every function that returns one of
/// its nested functions. Computed up front so call sites lowered before
/// the definition already know the result type.
pub(crate) fn closure_returns(module: &Module) -> HashMap<String, String> {
    let mut out = HashMap::new();
    collect_closure_returns(&module.body, None, &mut out);
    out
}

fn collect_closure_returns(body: &[Stmt], prefix: Option<&str>, out: &mut HashMap<String, String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::FunctionDef { name, body: fn_body, .. } => {
                let key = match prefix {
                    Some(p) => format!("{}.{}", p, name),
                    None => name.clone(),
                };
                let mut inner: HashSet<&str> = HashSet::new();
                walk::visit_stmts(fn_body, &mut |s| {
                    if let StmtKind::FunctionDef { name, .. } = &s.kind {
                        inner.insert(name.as_str());
                    }
                });
                walk::visit_stmts(fn_body, &mut |s| {
                    if let StmtKind::Return { value: Some(v) } = &s.kind {
                        if let Some(returned) = v.as_name().filter(|n| inner.contains(n)) {
                            out.insert(key.clone(), closure_struct_name(&key, returned));
                        }
                    }
                });
                collect_closure_returns(fn_body, Some(&key), out);
            }
            StmtKind::ClassDef { name, body: class_body, .. } if prefix.is_none() => {
                collect_closure_returns(class_body, Some(name), out);
            }
            _ => {
                for block in walk::child_blocks(stmt) {
                    collect_closure_returns(block, prefix, out);
                }
            }
        }
    }
}

/// Names an expression reads, for deciding which loop targets to bind.
fn expr_reads(exprs: &[&Expr]) -> HashSet<String> {
    let mut out = HashSet::new();
    for e in exprs {
        walk::visit_expr(e, &mut |n| {
            if let Some(name) = n.as_name() {
                out.insert(name.to_string());
            }
        });
    }
    out
}

/// Whether `name` appears in `text` as a whole identifier.
pub(crate) fn mentions(text: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut start = 0;
    while let Some(pos) = text[start..].find(name) {
        let at = start + pos;
        let before = text[..at].chars().next_back();
        let after = text[at + name.len()..].chars().next();
        if !before.is_some_and(is_ident) && !after.is_some_and(is_ident) {
            return true;
        }
        start = at + name.len();
    }
    false
}

/// Statements around a loop: `prelude` runs once before `header`, and
/// `body_prefix` binds the targets at the top of every iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct LoopPlan {
    pub prelude: Vec<String>,
    pub header: String,
    pub body_prefix: Vec<String>,
}

impl<'a> Session<'a> {
    // ------- Lambdas -------

    pub(crate) fn lower_lambda(
        &mut self,
        args: &[Arg],
        body: &Expr,
        bind_name: Option<&str>,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let params = bind_name
            .and_then(|n| self.types.lambda_arg_types(&self.scope_key(), n))
            .cloned()
            .unwrap_or_default();
        self.lower_lambda_typed(args, body, bind_name, params, location)
    }

    /// Synthesize a lambda whose parameters take the types in `params`
    /// (annotation or `Unknown` past its end).
    pub(crate) fn lower_lambda_typed(
        &mut self,
        args: &[Arg],
        body: &Expr,
        bind_name: Option<&str>,
        params: Vec<InferredType>,
        _location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let key = self.scope_key();
        let rt = self.rt();
        let alloc = self.alloc();
        let unit = self.unit();

        let param_names: HashSet<&str> = args.iter().map(|a| a.arg.as_str()).collect();
        let mut captured: Vec<String> = Vec::new();
        walk::visit_expr(body, &mut |e| {
            if let Some(n) = e.as_name() {
                if !param_names.contains(n) && !captured.iter().any(|c| c == n) {
                    captured.push(n.to_string());
                }
            }
        });
        // module-level bindings live in the outermost scope and stay visible
        captured.retain(|n| self.scopes.lookup_depth(n).is_some_and(|d| d > 0));
        let captures: Vec<(String, Binding, String)> = captured
            .iter()
            .filter_map(|c| self.scopes.lookup(c).cloned().map(|b| (c.clone(), b, self.spelling(c))))
            .collect();

        let typed: Vec<(String, InferredType)> = args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let annotated = a.annotation.as_ref().map(InferredType::from_annotation);
                let ty = params.get(i).cloned().filter(|t| !t.is_unknown()).or(annotated).unwrap_or(InferredType::Unknown);
                (a.arg.clone(), ty)
            })
            .collect();

        let id = self.next_id();
        let frame = Frame { key, ..Frame::default() };
        let ((ret, result), frame) = self.in_frame(frame, |s| {
            for (name, binding, _) in &captures {
                let alias = format!("__env.{}", ident(name));
                s.declare(name, Binding { alias: Some(alias), released: false, mutable: false, ..binding.clone() });
            }
            for (name, ty) in &typed {
                s.declare(name, Binding::new(ty.clone(), default_repr(ty)));
                s.locals.push((name.clone(), ty.clone()));
            }
            let ret = s.infer(body);
            s.frame_mut().returns = ret.clone();
            let value = s.lower_expr(body)?;
            let ret = if ret.is_unknown() { value.ty.clone() } else { ret };
            s.frame_mut().returns = ret.clone();
            let code = s.hand_over(value, body)?;
            Ok((ret, code))
        })?;

        let ret_text = match (&ret, &frame.returned_closure) {
            (InferredType::Callable(_), Some(name)) => name.clone(),
            _ => zig_type(&ret, &default_repr(&ret), rt),
        };
        let mut lines = Vec::new();
        if !mentions(&result, alloc) {
            lines.push(format!("_ = {};", alloc));
        }
        for (name, _) in &typed {
            if !mentions(&result, &ident(name)) {
                lines.push(format!("_ = {};", ident(name)));
            }
        }
        lines.push(format!("return {};", result));
        let param_list: Vec<String> = std::iter::once(format!("{}: std.mem.Allocator", alloc))
            .chain(typed.iter().map(|(n, t)| format!("{}: {}", ident(n), value_type(t, rt))))
            .collect();

        let callable = Lowered::new(String::new(), InferredType::Callable(Box::new(ret)));
        if captures.is_empty() {
            let name = format!("__lambda_{}", id);
            let mut w = CodeWriter::new(unit);
            w.open(&format!("fn {}({}) anyerror!{}", name, param_list.join(", "), ret_text));
            for l in &lines {
                w.line(l);
            }
            w.close("");
            self.hoist(id, &name, Vec::new(), w.finish());
            debug!("lambda {} hoisted as {}", bind_name.unwrap_or("<anonymous>"), name);
            return Ok(Lowered { code: format!("&{}", name), repr: ValueRepr::FnPointer(name), ..callable });
        }

        let name = format!("__Lambda_{}", id);
        let mut w = CodeWriter::new(unit);
        w.open(&format!("const {} = struct", name));
        for (c, b, _) in &captures {
            w.line(&format!("{}: {},", ident(c), zig_type(&b.ty, &b.repr, rt)));
        }
        w.blank();
        let mut params_with_env = vec!["__env: @This()".to_string()];
        params_with_env.extend(param_list);
        w.open(&format!("pub fn call({}) anyerror!{}", params_with_env.join(", "), ret_text));
        for l in &lines {
            w.line(l);
        }
        w.close("");
        w.close(";");
        let names: Vec<String> = captures.iter().map(|(c, _, _)| c.clone()).collect();
        self.hoist(id, &name, names, w.finish());
        let inits: Vec<String> = captures.iter().map(|(c, _, spelled)| format!(".{} = {}", ident(c), spelled)).collect();
        debug!("lambda {} captures {} names", name, captures.len());
        Ok(Lowered {
            code: format!("{}{{ {} }}", name, inits.join(", ")),
            repr: ValueRepr::Closure(name),
            ..callable
        })
    }

    /// `(lambda x: ...)(arg)`: the synthesized function is called in place.
    pub(crate) fn lower_immediate_lambda(
        &mut self,
        func: &Expr,
        args: &[Expr],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let ExprKind::Lambda { args: params, body } = &func.kind else {
            return Ok(self.diag_value("Call", "not a lambda".into(), location));
        };
        if params.len() != args.len() {
            return Ok(self.diag_value(
                "Call",
                format!("lambda takes {} arguments, {} given", params.len(), args.len()),
                location,
            ));
        }
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.lower_expr(a)?);
        }
        let types = values.iter().map(|v| v.ty.clone()).collect();
        let callee = self.lower_lambda_typed(params, body, None, types, location)?;
        let ret = match &callee.ty {
            InferredType::Callable(r) => (**r).clone(),
            _ => InferredType::Unknown,
        };
        let target = match &callee.repr {
            ValueRepr::FnPointer(name) => name.clone(),
            _ => format!("({}).call", callee.code),
        };
        let alloc = self.alloc();
        let g = self.guarder();
        let code = self.with_temps(values, |c| {
            let mut all = vec![alloc.to_string()];
            all.extend(c.iter().cloned());
            g.wrap(&format!("{}({})", target, all.join(", ")))
        });
        Ok(self.call_result(code, &ret, None))
    }

    fn hoist(&mut self, id: usize, name: &str, captured_vars: Vec<String>, body_text: String) {
        self.closures.push(ClosureRecord { id, synthesized_name: name.to_string(), captured_vars, body_text });
    }

    // ------- Nested functions -------

    /// A `def` inside a function: hoisted closure struct plus the local
    /// binding that instantiates it.
    pub(crate) fn lower_nested_def(&mut self, name: &str, args: &[Arg], body: &[Stmt]) -> Result<String, LoweringError> {
        let outer_key = self.scope_key();
        let key = format!("{}.{}", outer_key, name);
        let struct_name = closure_struct_name(&outer_key, name);
        let facts = self.scope_facts();
        let module_facts: &'a ModuleFacts = self.facts;
        let inner_facts = module_facts.scope(&key);
        let rt = self.rt();
        let unit = self.unit();
        let captured = facts.captures.get(name).cloned().unwrap_or_default();
        let ret = self.types.signature(&key).map(|s| s.returns.clone()).unwrap_or(InferredType::None);

        let mut fields = Vec::new();
        let mut inits = Vec::new();
        let mut presets = Vec::new();
        for c in &captured {
            let binding = match self.scopes.lookup(c) {
                Some(b) => b.clone(),
                None => {
                    let ty = self.table_type(c);
                    Binding::new(ty.clone(), default_repr(&ty))
                }
            };
            let ty_text = zig_type(&binding.ty, &binding.repr, rt);
            let spelled = self.spelling(c);
            let field = ident(c);
            if facts.is_shared(c) || inner_facts.is_grown(c) {
                let pointer = if binding.mutable { "*" } else { "*const " };
                fields.push(format!("{}: {}{},", field, pointer, ty_text));
                inits.push(format!(".{} = &{}", field, spelled));
                let alias = format!("__env.{}.*", field);
                presets.push((c.clone(), Binding { alias: Some(alias), released: false, ..binding }));
            } else {
                fields.push(format!("{}: {},", field, ty_text));
                inits.push(format!(".{} = {}", field, spelled));
                let alias = format!("__env.{}", field);
                presets.push((c.clone(), Binding { alias: Some(alias), released: false, mutable: false, ..binding }));
            }
        }
        // the function's own name inside its body is the environment itself
        presets.push((
            name.to_string(),
            Binding::new(InferredType::Callable(Box::new(ret.clone())), ValueRepr::Closure(struct_name.clone()))
                .aliased("__env".to_string()),
        ));

        let spec = super::function::FunctionSpec {
            key: key.clone(),
            emitted_name: "call".to_string(),
            args,
            body,
            receiver: Some(("__env".to_string(), "@This()".to_string())),
            is_pub: true,
            presets,
        };
        let method = self.lower_function(spec)?;

        let mut w = CodeWriter::new(unit);
        w.open(&format!("const {} = struct", struct_name));
        for f in &fields {
            w.line(f);
        }
        if !fields.is_empty() {
            w.blank();
        }
        w.line(&method);
        w.close(";");
        let id = self.next_id();
        self.hoist(id, &struct_name, captured.clone(), w.finish());
        debug!("nested function {} captures {:?}", key, captured);

        self.declare(name, Binding::new(InferredType::Callable(Box::new(ret)), ValueRepr::Closure(struct_name.clone())));
        if !facts.is_read(name) {
            return Ok(String::new());
        }
        Ok(format!("const {} = {}{{ {} }};", ident(name), struct_name, inits.join(", ")))
    }

    // ------- Comprehensions -------

    pub(crate) fn lower_list_comp(
        &mut self,
        whole: &Expr,
        elt: &Expr,
        generators: &[Comprehension],
    ) -> Result<Lowered, LoweringError> {
        let ty = self.infer(whole);
        let elem = match ty.element() {
            InferredType::Unknown => InferredType::Unknown,
            e => e,
        };
        let elem_text = value_type(&elem, self.rt());
        let alloc = self.alloc();
        let unit = self.unit();
        let g = self.guarder();
        let label = self.fresh("__comp");
        let acc = self.fresh("__acc");
        let reads = comprehension_reads(generators, &[elt]);

        let saved = self.locals.len();
        let body = self.scoped(|s| {
            let mut w = CodeWriter::new(unit);
            w.line(&format!("var {} = std.ArrayList({}).init({});", acc, elem_text, alloc));
            w.line(&format!("errdefer {}.deinit();", acc));
            let depth = s.open_generators(generators, &reads, &mut w)?;
            let value = s.lower_expr(elt)?;
            let code = match (&value.ty, &elem) {
                (InferredType::Int, InferredType::Float) => super::expr::as_float(&value.code, &value.ty),
                _ if value.is_growable() => s.guarder().wrap(&format!("{}.toOwnedSlice()", value.code)),
                _ => value.code,
            };
            w.line(&format!("{};", s.guard(&format!("{}.append({})", acc, code))));
            for _ in 0..depth {
                w.close("");
            }
            Ok(w.finish())
        });
        self.locals.truncate(saved);
        let body = body?;
        let code = block_expr(&label, &[body], &g.wrap(&format!("{}.toOwnedSlice()", acc)), unit);
        Ok(Lowered::new(code, InferredType::list_of(elem)).owned_value())
    }

    pub(crate) fn lower_dict_comp(
        &mut self,
        whole: &Expr,
        key: &Expr,
        value: &Expr,
        generators: &[Comprehension],
    ) -> Result<Lowered, LoweringError> {
        let ty = self.infer(whole);
        let map_type = zig_type(&ty, &ValueRepr::Map, self.rt());
        let alloc = self.alloc();
        let unit = self.unit();
        let label = self.fresh("__comp");
        let acc = self.fresh("__acc");
        let reads = comprehension_reads(generators, &[key, value]);

        let saved = self.locals.len();
        let body = self.scoped(|s| {
            let mut w = CodeWriter::new(unit);
            w.line(&format!("var {} = {}.init({});", acc, map_type, alloc));
            w.line(&format!("errdefer {}.deinit();", acc));
            let depth = s.open_generators(generators, &reads, &mut w)?;
            let k = s.lower_expr(key)?;
            let v = s.lower_expr(value)?;
            let v_code = match (&v.ty, &ty) {
                (InferredType::Int, InferredType::Dict(_, slot)) if **slot == InferredType::Float => {
                    super::expr::as_float(&v.code, &v.ty)
                }
                _ => v.code,
            };
            w.line(&format!("{};", s.guard(&format!("{}.put({}, {})", acc, k.code, v_code))));
            for _ in 0..depth {
                w.close("");
            }
            Ok(w.finish())
        });
        self.locals.truncate(saved);
        let body = body?;
        let code = block_expr(&label, &[body], &acc, unit);
        Ok(Lowered::new(code, ty).with_repr(ValueRepr::Map).owned_value())
    }

    /// Open one loop per clause, filters first thing in each body.
    /// Returns how many blocks the caller must close.
    fn open_generators(
        &mut self,
        generators: &[Comprehension],
        reads: &HashSet<String>,
        w: &mut CodeWriter,
    ) -> Result<usize, LoweringError> {
        let mut depth = 0;
        for clause in generators {
            let plan = self.plan_loop(&clause.target, &clause.iter, reads, false)?;
            for p in &plan.prelude {
                w.line(p);
            }
            w.open(&plan.header);
            for p in &plan.body_prefix {
                w.line(p);
            }
            for cond in &clause.ifs {
                let test = self.lower_expr(cond)?;
                let test = self.truth(test);
                w.line(&format!("if (!({})) continue;", test));
            }
            depth += 1;
        }
        Ok(depth)
    }

    // ------- Loop plans -------

    /// Plan a loop binding `target` to each element of `iter`. With
    /// `assign_existing`, a target that is already declared is assigned
    /// (a `for` statement rebinding a function variable); otherwise it is
    /// bound under a fresh alias.
    pub(crate) fn plan_loop(
        &mut self,
        target: &Expr,
        iter: &Expr,
        reads: &HashSet<String>,
        assign_existing: bool,
    ) -> Result<LoopPlan, LoweringError> {
        if let ExprKind::Call { func, args, keywords } = &iter.kind {
            let builtin = func.as_name().filter(|n| {
                !self.scopes.is_declared(n) && self.types.resolve_function(&self.scope_key(), n).is_none()
            });
            if keywords.is_empty() {
                match (builtin, args.as_slice()) {
                    (Some("range"), [_] | [_, _] | [_, _, _]) if target.as_name().is_some() => {
                        return self.plan_range(target, args, reads, assign_existing);
                    }
                    (Some("enumerate"), [seq] | [seq, _]) => {
                        if let ExprKind::Tuple { elts } | ExprKind::List { elts } = &target.kind {
                            if elts.len() == 2 {
                                return self.plan_enumerate(&elts[0], &elts[1], seq, args.get(1), reads, assign_existing);
                            }
                        }
                    }
                    (Some("zip"), seqs) if seqs.len() >= 2 => {
                        if let ExprKind::Tuple { elts } | ExprKind::List { elts } = &target.kind {
                            if elts.len() == seqs.len() {
                                return self.plan_zip(elts, seqs, reads, assign_existing);
                            }
                        }
                    }
                    (Some("reversed"), [seq]) => return self.plan_reversed(target, seq, reads, assign_existing),
                    _ => {}
                }
            }
            if let ExprKind::Attribute { value, attr } = &func.kind {
                if args.is_empty() && matches!(attr.as_str(), "items" | "keys" | "values") {
                    if matches!(self.infer(value), InferredType::Dict(..)) {
                        return self.plan_dict(target, value, attr, reads, assign_existing);
                    }
                }
            }
        }
        if matches!(self.infer(iter), InferredType::Dict(..)) {
            return self.plan_dict(target, iter, "keys", reads, assign_existing);
        }
        let source = self.lower_expr(iter)?;
        match &source.ty {
            InferredType::List(_) | InferredType::String => {
                let mut plan = LoopPlan::default();
                let (seq, ty, growable) = self.loop_source(source, &mut plan.prelude);
                self.plan_sequence(plan, target, None, &seq, &ty, growable, reads, assign_existing)
            }
            _ => {
                let mut plan = LoopPlan::default();
                let it = self.fresh("__it");
                plan.prelude.push(format!("var {} = {}.iterate({});", it, self.rt(), source.code));
                let cap = self.capture(target, &InferredType::Unknown, reads, assign_existing, &mut plan.body_prefix);
                plan.header = format!("while ({}.next()) |{}|", it, cap);
                Ok(plan)
            }
        }
    }

    /// Bind an owned iterable to a temporary released after the loop.
    fn loop_source(&mut self, source: Lowered, prelude: &mut Vec<String>) -> (String, InferredType, bool) {
        let growable = source.is_growable();
        let ty = source.ty.clone();
        match source.owned {
            Some(release) => {
                let tmp = self.fresh("__seq");
                let keyword = if release.needs_var(&source.repr) || growable { "var" } else { "const" };
                prelude.push(format!("{} {} = {};", keyword, tmp, source.code));
                prelude.push(format!("defer {}", release.statement(&tmp, self.alloc())));
                (tmp, ty, growable)
            }
            None => (source.code, ty, growable),
        }
    }

    /// Capture name for a loop element: the target itself when it is a
    /// fresh name, `_` when nothing reads it, else a temporary destructured
    /// into `prefix`.
    fn capture(
        &mut self,
        target: &Expr,
        ty: &InferredType,
        reads: &HashSet<String>,
        assign_existing: bool,
        prefix: &mut Vec<String>,
    ) -> String {
        let names = walk::target_names(target);
        if names.iter().all(|n| !reads.contains(*n)) {
            return "_".to_string();
        }
        if let Some(name) = target.as_name() {
            if !self.scopes.is_declared(name) {
                self.bind_loop_name(name, ty);
                return ident(name);
            }
        }
        let tmp = self.fresh("__e");
        self.bind_element(target, &tmp, ty, reads, assign_existing, prefix);
        tmp
    }

    fn bind_loop_name(&mut self, name: &str, ty: &InferredType) {
        self.declare(name, Binding::new(ty.clone(), default_repr(ty)));
        self.locals.push((name.to_string(), ty.clone()));
    }

    /// Destructure `value` (of type `ty`) over `target` into `out`.
    fn bind_element(
        &mut self,
        target: &Expr,
        value: &str,
        ty: &InferredType,
        reads: &HashSet<String>,
        assign_existing: bool,
        out: &mut Vec<String>,
    ) {
        match &target.kind {
            ExprKind::Name { id } => {
                if !reads.contains(id) {
                    return;
                }
                if assign_existing && self.scopes.is_declared(id) {
                    out.push(format!("{} = {};", self.spelling(id), value));
                    self.locals.push((id.clone(), ty.clone()));
                    return;
                }
                let (spelled, alias) = self.local_name(id);
                out.push(format!("const {} = {};", spelled, value));
                let mut binding = Binding::new(ty.clone(), default_repr(ty));
                binding.alias = alias;
                self.declare(id, binding);
                self.locals.push((id.clone(), ty.clone()));
            }
            ExprKind::Tuple { elts } | ExprKind::List { elts } => {
                let rt = self.rt();
                for (i, elt) in elts.iter().enumerate() {
                    let (part, part_ty) = match ty {
                        InferredType::Tuple(items) => {
                            (format!("{}[{}]", value, i), items.get(i).cloned().unwrap_or(InferredType::Unknown))
                        }
                        InferredType::List(e) => (format!("{}[{}]", value, i), (**e).clone()),
                        _ => (self.guard(&format!("{}.getItem({}, {})", rt, value, i)), InferredType::Unknown),
                    };
                    self.bind_element(elt, &part, &part_ty, reads, assign_existing, out);
                }
            }
            _ => {}
        }
    }

    fn plan_range(
        &mut self,
        target: &Expr,
        args: &[Expr],
        reads: &HashSet<String>,
        assign_existing: bool,
    ) -> Result<LoopPlan, LoweringError> {
        let mut plan = LoopPlan::default();
        let mut bounds = Vec::with_capacity(args.len());
        for a in args {
            let v = self.lower_expr(a)?;
            let code = as_int(&v.code, &v.ty);
            // range() reads its bounds once; only literals may stay inline
            if a.as_int_literal().is_some() {
                bounds.push(code);
            } else {
                let tmp = self.fresh("__bound");
                plan.prelude.push(format!("const {}: i64 = {};", tmp, code));
                bounds.push(tmp);
            }
        }
        let (start, stop, step) = match bounds.as_slice() {
            [stop] => ("0".to_string(), stop.clone(), "1".to_string()),
            [start, stop] => (start.clone(), stop.clone(), "1".to_string()),
            [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
            _ => return Ok(plan),
        };
        let step_literal = args.get(2).and_then(Expr::as_int_literal);
        let counter = self.counter_for(target, reads, assign_existing, &mut plan);
        plan.prelude.push(format!("var {}: i64 = {};", counter, start));
        let cond = match step_literal {
            Some(s) if s < 0 => format!("{} > {}", counter, stop),
            Some(_) => format!("{} < {}", counter, stop),
            None if args.len() < 3 => format!("{} < {}", counter, stop),
            None => format!("if ({} > 0) {} < {} else {} > {}", step, counter, stop, counter, stop),
        };
        plan.header = format!("while ({}) : ({} += {})", cond, counter, step);
        Ok(plan)
    }

    /// Counter variable driving a counting loop over `target`.
    fn counter_for(&mut self, target: &Expr, reads: &HashSet<String>, assign_existing: bool, plan: &mut LoopPlan) -> String {
        let name = target.as_name().unwrap_or("_");
        if !self.scopes.is_declared(name) && name != "_" {
            self.bind_loop_name(name, &InferredType::Int);
            return ident(name);
        }
        let counter = self.fresh("__i");
        self.bind_element(target, &counter, &InferredType::Int, reads, assign_existing, &mut plan.body_prefix);
        counter
    }

    fn plan_enumerate(
        &mut self,
        index_target: &Expr,
        elem_target: &Expr,
        seq: &Expr,
        start: Option<&Expr>,
        reads: &HashSet<String>,
        assign_existing: bool,
    ) -> Result<LoopPlan, LoweringError> {
        let source = self.lower_expr(seq)?;
        let offset = match start {
            Some(s) => {
                let v = self.lower_expr(s)?;
                Some(as_int(&v.code, &v.ty))
            }
            None => None,
        };
        let mut plan = LoopPlan::default();
        if !matches!(source.ty, InferredType::List(_) | InferredType::String) {
            let diag = self.defer_diag("For", format!("enumerate() over a {} value", source.ty), &seq.location);
            plan.prelude.push(format!("_ = {};", diag));
            plan.header = "while (false)".to_string();
            return Ok(plan);
        }
        let (seq_code, ty, growable) = self.loop_source(source, &mut plan.prelude);
        self.plan_sequence(plan, elem_target, Some((index_target, offset)), &seq_code, &ty, growable, reads, assign_existing)
    }

    /// Element loop over a list or string, optionally binding the index.
    #[allow(clippy::too_many_arguments)]
    fn plan_sequence(
        &mut self,
        mut plan: LoopPlan,
        target: &Expr,
        index: Option<(&Expr, Option<String>)>,
        seq: &str,
        ty: &InferredType,
        growable: bool,
        reads: &HashSet<String>,
        assign_existing: bool,
    ) -> Result<LoopPlan, LoweringError> {
        let index_read = index.as_ref().is_some_and(|(t, _)| walk::target_names(t).iter().any(|n| reads.contains(*n)));
        let k = self.fresh("__k");
        if *ty == InferredType::String {
            plan.header = format!("for (0..{}.len) |{}|", seq, k);
            let ch = format!("{}[{}..][0..1]", seq, k);
            self.bind_element(target, &ch, &InferredType::String, reads, assign_existing, &mut plan.body_prefix);
        } else {
            let elem = ty.element();
            let cap = self.capture(target, &elem, reads, assign_existing, &mut plan.body_prefix);
            let items = view(seq, growable);
            plan.header = if index_read {
                format!("for ({}, 0..) |{}, {}|", items, cap, k)
            } else {
                format!("for ({}) |{}|", items, cap)
            };
        }
        if let (Some((index_target, offset)), true) = (index, index_read) {
            let base = format!("@as(i64, @intCast({}))", k);
            let value = match offset {
                Some(o) => format!("{} + {}", base, o),
                None => base,
            };
            self.bind_element(index_target, &value, &InferredType::Int, reads, assign_existing, &mut plan.body_prefix);
        } else if *ty == InferredType::String && !mentions(&plan.body_prefix.join("\n"), &k) {
            plan.header = format!("for (0..{}.len) |_|", seq);
        }
        Ok(plan)
    }

    fn plan_zip(
        &mut self,
        targets: &[Expr],
        seqs: &[Expr],
        reads: &HashSet<String>,
        assign_existing: bool,
    ) -> Result<LoopPlan, LoweringError> {
        let mut plan = LoopPlan::default();
        let rt = self.rt();
        let mut sources = Vec::with_capacity(seqs.len());
        for s in seqs {
            let value = self.lower_expr(s)?;
            if !matches!(value.ty, InferredType::List(_) | InferredType::String) {
                let diag = self.defer_diag("For", format!("zip() over a {} value", value.ty), &s.location);
                plan.prelude.push(format!("_ = {};", diag));
                plan.header = "while (false)".to_string();
                return Ok(plan);
            }
            sources.push(self.loop_source(value, &mut plan.prelude));
        }
        let k = self.fresh("__k");
        let lengths: Vec<String> = sources
            .iter()
            .map(|(code, ty, growable)| {
                let repr = if *growable { ValueRepr::Growable } else { default_repr(ty) };
                length_of(code, ty, &repr, rt)
            })
            .collect();
        plan.header = format!("for (0..@min({})) |{}|", lengths.join(", "), k);
        for (target, (code, ty, growable)) in targets.iter().zip(sources.iter()) {
            let (item, item_ty) = match ty {
                InferredType::String => (format!("{}[{}..][0..1]", code, k), InferredType::String),
                _ => (format!("{}[{}]", view(code, *growable), k), ty.element()),
            };
            self.bind_element(target, &item, &item_ty, reads, assign_existing, &mut plan.body_prefix);
        }
        if !mentions(&plan.body_prefix.join("\n"), &k) {
            plan.header = format!("for (0..@min({})) |_|", lengths.join(", "));
        }
        Ok(plan)
    }

    fn plan_reversed(
        &mut self,
        target: &Expr,
        seq: &Expr,
        reads: &HashSet<String>,
        assign_existing: bool,
    ) -> Result<LoopPlan, LoweringError> {
        if let ExprKind::Call { func, args, .. } = &seq.kind {
            if func.as_name() == Some("range") && (1..=2).contains(&args.len()) && target.as_name().is_some() {
                let mut plan = LoopPlan::default();
                let mut bounds = Vec::new();
                for a in args {
                    let v = self.lower_expr(a)?;
                    bounds.push(as_int(&v.code, &v.ty));
                }
                let (start, stop) = match bounds.as_slice() {
                    [stop] => ("0".to_string(), stop.clone()),
                    [start, stop] => (start.clone(), stop.clone()),
                    _ => return Ok(plan),
                };
                let counter = self.counter_for(target, reads, assign_existing, &mut plan);
                plan.prelude.push(format!("var {}: i64 = {} - 1;", counter, stop));
                plan.header = format!("while ({} >= {}) : ({} -= 1)", counter, start, counter);
                return Ok(plan);
            }
        }
        let source = self.lower_expr(seq)?;
        let mut plan = LoopPlan::default();
        if !matches!(source.ty, InferredType::List(_) | InferredType::String) {
            let diag = self.defer_diag("For", format!("reversed() over a {} value", source.ty), &seq.location);
            plan.prelude.push(format!("_ = {};", diag));
            plan.header = "while (false)".to_string();
            return Ok(plan);
        }
        let (code, ty, growable) = self.loop_source(source, &mut plan.prelude);
        let repr = if growable { ValueRepr::Growable } else { default_repr(&ty) };
        let k = self.fresh("__k");
        plan.prelude.push(format!("var {}: usize = {};", k, length_of(&code, &ty, &repr, self.rt())));
        plan.header = format!("while ({} > 0)", k);
        plan.body_prefix.push(format!("{} -= 1;", k));
        let (item, item_ty) = match &ty {
            InferredType::String => (format!("{}[{}..][0..1]", code, k), InferredType::String),
            _ => (format!("{}[{}]", view(&code, growable), k), ty.element()),
        };
        self.bind_element(target, &item, &item_ty, reads, assign_existing, &mut plan.body_prefix);
        Ok(plan)
    }

    fn plan_dict(
        &mut self,
        target: &Expr,
        dict: &Expr,
        view_name: &str,
        reads: &HashSet<String>,
        assign_existing: bool,
    ) -> Result<LoopPlan, LoweringError> {
        let source = self.lower_expr(dict)?;
        let (key_ty, val_ty) = match &source.ty {
            InferredType::Dict(k, v) => ((**k).clone(), (**v).clone()),
            _ => (InferredType::Unknown, InferredType::Unknown),
        };
        let mut plan = LoopPlan::default();
        let (map, _, _) = self.loop_source(source, &mut plan.prelude);
        let it = self.fresh("__it");
        let entry = self.fresh("__entry");
        let (iterator, value, ty) = match view_name {
            "items" => (
                "iterator",
                format!(".{{ {}.key_ptr.*, {}.value_ptr.* }}", entry, entry),
                InferredType::Tuple(vec![key_ty, val_ty]),
            ),
            "values" => ("valueIterator", format!("{}.*", entry), val_ty),
            _ => ("keyIterator", format!("{}.*", entry), key_ty),
        };
        plan.prelude.push(format!("var {} = {}.{}();", it, map, iterator));
        match (&target.kind, view_name) {
            (ExprKind::Tuple { elts }, "items") if elts.len() == 2 => {
                let InferredType::Tuple(parts) = &ty else { return Ok(plan) };
                let key_value = format!("{}.key_ptr.*", entry);
                let val_value = format!("{}.value_ptr.*", entry);
                self.bind_element(&elts[0], &key_value, &parts[0], reads, assign_existing, &mut plan.body_prefix);
                self.bind_element(&elts[1], &val_value, &parts[1], reads, assign_existing, &mut plan.body_prefix);
            }
            _ => self.bind_element(target, &value, &ty, reads, assign_existing, &mut plan.body_prefix),
        }
        let cap = if plan.body_prefix.is_empty() { "_".to_string() } else { entry };
        plan.header = format!("while ({}.next()) |{}|", it, cap);
        Ok(plan)
    }
}

/// Names read by a comprehension's projected values, filters and
/// iterables.
fn comprehension_reads(generators: &[Comprehension], values: &[&Expr]) -> HashSet<String> {
    let mut exprs: Vec<&Expr> = values.to_vec();
    for g in generators {
        exprs.push(&g.iter);
        exprs.extend(g.ifs.iter());
    }
    expr_reads(&exprs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn identifier_mentions_respect_boundaries() {
        assert!(mentions("return allocator;", "allocator"));
        assert!(!mentions("return my_allocator;", "allocator"));
        assert!(!mentions("x1 + 2", "x"));
        assert!(mentions("(x + 1)", "x"));
    }

    #[test]
    fn returned_nested_functions_are_recorded() {
        let m = module(vec![def(
            "make_adder",
            args(&["n"]),
            vec![
                def("add", args(&["x"]), vec![ret(Some(binop(name("x"), crate::ast::BinOperator::Add, name("n"))))]),
                ret(Some(name("add"))),
            ],
        )]);
        let returns = closure_returns(&m);
        assert_eq!(returns.get("make_adder"), Some(&"__Closure_make_adder_add".to_string()));
    }
}
