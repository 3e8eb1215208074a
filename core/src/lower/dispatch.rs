//! file: core/src/lower/dispatch.rs
//! description: call-site classification and the generic call paths.
//!
//! A call is classified once into a `CallRoute`; the first matching rule
//! wins. Library names come before methods, methods before built-ins,
//! built-ins before closure variables, and so on down to a plain direct
//! call. A name declared in the current scope always shadows a library
//! module or built-in of the same name.
//!
use log::trace;

use super::context::Session;
use super::err::LoweringError;
use super::expr::{Coercion, coerce_all};
use super::methods::{ReceiverKind, supports};
use super::ownership::{Lowered, Release};
use super::strings::ident;
use crate::analyzers::{FunctionSig, InferredType, ValueRepr};
use crate::ast::{Expr, ExprKind, Keyword};
use crate::location::Location;
use crate::registry::ArgStrategy;

#[derive(Debug, Clone, PartialEq)]
pub enum CallRoute {
    /// `(lambda x: ...)(arg)`
    ImmediateLambda,
    /// Registry function mapped straight onto a foreign symbol.
    Foreign { qualified: String },
    /// Registry shim template.
    Shim { module: String, symbol: String },
    /// Module-rooted name the registry has no lowering for.
    UnknownModule { qualified: String },
    /// `super().m(...)`
    SuperMethod { method: String },
    /// Method of a user class on an instance receiver.
    InstanceMethod { class: String, method: String },
    /// `Class.m(...)` on a static method.
    StaticMethod { class: String, method: String },
    /// Built-in method of a string, list, dict or queue receiver.
    ContainerMethod { kind: ReceiverKind, method: String },
    /// Method on a receiver of unknown type, passed through as written.
    GenericMethod { method: String },
    Builtin { name: String },
    /// Variable holding a closure struct.
    ClosureVar { name: String },
    /// Variable holding a function pointer.
    LambdaVar { name: String },
    Constructor { class: String },
    /// User function resolved by name.
    Direct { name: String, key: Option<String> },
    Unsupported { construct: String, message: String },
}

impl<'a> Session<'a> {
    pub(crate) fn classify_call(&self, func: &Expr, arg_count: usize) -> CallRoute {
        let key = self.scope_key();
        if matches!(func.kind, ExprKind::Lambda { .. }) {
            return CallRoute::ImmediateLambda;
        }

        let root_declared = crate::analyzers::prepass::root_name(func).is_some_and(|n| self.scopes.is_declared(n));
        if !root_declared {
            if let Some(qualified) = self.types.qualify(func, &key, &self.locals) {
                if self.imports.should_map_function(&qualified).is_some() {
                    return CallRoute::Foreign { qualified };
                }
                return match self.split_module(&qualified) {
                    Some((module, symbol)) => {
                        if self.imports.lookup(&module).and_then(|m| m.shim(&symbol)).is_some() {
                            CallRoute::Shim { module, symbol }
                        } else {
                            CallRoute::UnknownModule { qualified }
                        }
                    }
                    None => CallRoute::UnknownModule { qualified },
                };
            }
        }

        match &func.kind {
            ExprKind::Attribute { value, attr } => self.classify_method(value, attr, arg_count),
            ExprKind::Name { id } => self.classify_name(id, &key),
            other => CallRoute::Unsupported {
                construct: "Call".into(),
                message: format!("calling a {} expression is not supported", kind_label(other)),
            },
        }
    }

    fn classify_method(&self, receiver: &Expr, method: &str, arg_count: usize) -> CallRoute {
        let classes = self.types.classes();
        if let ExprKind::Call { func, .. } = &receiver.kind {
            if func.as_name() == Some("super") {
                return CallRoute::SuperMethod { method: method.to_string() };
            }
        }
        if let Some(class) = receiver.as_name().filter(|n| !self.scopes.is_declared(n) && classes.contains(n)) {
            return CallRoute::StaticMethod { class: class.to_string(), method: method.to_string() };
        }
        let ty = self.infer(receiver);
        match &ty {
            InferredType::Instance(class) if classes.contains(class) => match classes.resolve_method(class, method) {
                Some(_) => CallRoute::InstanceMethod { class: class.clone(), method: method.to_string() },
                None => CallRoute::Unsupported {
                    construct: "Call".into(),
                    message: format!("{} has no method {}", class, method),
                },
            },
            _ => match ReceiverKind::of(&ty) {
                // a bare dict.get() has no key to look up
                Some(ReceiverKind::Dict) if method == "get" && arg_count == 0 => {
                    CallRoute::GenericMethod { method: method.to_string() }
                }
                Some(kind) => {
                    if supports(kind, method) {
                        CallRoute::ContainerMethod { kind, method: method.to_string() }
                    } else {
                        CallRoute::Unsupported {
                            construct: "Call".into(),
                            message: format!("{}.{} is not supported", ty, method),
                        }
                    }
                }
                None => CallRoute::GenericMethod { method: method.to_string() },
            },
        }
    }

    fn classify_name(&self, id: &str, key: &str) -> CallRoute {
        if let Some(binding) = self.scopes.lookup(id) {
            if matches!(binding.repr, ValueRepr::Closure(_)) || self.closure_vars.contains(id) {
                return CallRoute::ClosureVar { name: id.to_string() };
            }
            if self.lambda_vars.contains(id) || matches!(binding.ty, InferredType::Callable(_) | InferredType::Unknown) {
                return CallRoute::LambdaVar { name: id.to_string() };
            }
            return CallRoute::Unsupported {
                construct: "Call".into(),
                message: format!("'{}' holds a {} value and cannot be called", id, binding.ty),
            };
        }
        let user_fn = self.types.resolve_function(key, id);
        if user_fn.is_none() && super::builtins::is_builtin(id) {
            return CallRoute::Builtin { name: id.to_string() };
        }
        if let Some(sig) = user_fn {
            return CallRoute::Direct { name: id.to_string(), key: Some(sig.key.clone()) };
        }
        if self.types.classes().contains(id) || id.starts_with(|c: char| c.is_ascii_uppercase()) {
            return CallRoute::Constructor { class: id.to_string() };
        }
        CallRoute::Direct { name: id.to_string(), key: None }
    }

    pub(crate) fn lower_call(&mut self, call: &Expr) -> Result<Lowered, LoweringError> {
        let ExprKind::Call { func, args, keywords } = &call.kind else {
            return Ok(self.diag_value("Call", "not a call".into(), &call.location));
        };
        let route = self.classify_call(func, args.len());
        trace!("call route {:?}", route);
        let location = &call.location;
        match route {
            CallRoute::ImmediateLambda => self.lower_immediate_lambda(func, args, location),
            CallRoute::Foreign { qualified } => self.lower_foreign_call(&qualified, args),
            CallRoute::Shim { module, symbol } => self.lower_shim_call(&module, &symbol, args, location),
            CallRoute::UnknownModule { qualified } => {
                Ok(self.diag_value("Call", format!("{} has no lowering", qualified), location))
            }
            CallRoute::SuperMethod { method } => self.lower_super_call(&method, args, keywords, location),
            CallRoute::InstanceMethod { class, method } => {
                let ExprKind::Attribute { value, .. } = &func.kind else {
                    return Ok(self.diag_value("Call", "malformed method call".into(), location));
                };
                self.lower_instance_call(value, &class, &method, args, keywords, location)
            }
            CallRoute::StaticMethod { class, method } => self.lower_static_call(&class, &method, args, keywords, location),
            CallRoute::ContainerMethod { kind, method } => {
                let ExprKind::Attribute { value, .. } = &func.kind else {
                    return Ok(self.diag_value("Call", "malformed method call".into(), location));
                };
                self.lower_container_method(kind, value, &method, args, keywords, location)
            }
            CallRoute::GenericMethod { method } => {
                let ExprKind::Attribute { value, .. } = &func.kind else {
                    return Ok(self.diag_value("Call", "malformed method call".into(), location));
                };
                self.lower_generic_method(value, &method, args)
            }
            CallRoute::Builtin { name } => self.lower_builtin(&name, args, keywords, location),
            CallRoute::ClosureVar { name } => self.lower_closure_var_call(&name, args),
            CallRoute::LambdaVar { name } => self.lower_lambda_var_call(&name, args),
            CallRoute::Constructor { class } => self.lower_constructor(&class, args, keywords, location),
            CallRoute::Direct { name, key } => self.lower_direct_call(&name, key.as_deref(), args, keywords, location),
            CallRoute::Unsupported { construct, message } => Ok(self.diag_value(&construct, message, location)),
        }
    }

    // ------- Arguments -------

    /// Lower call arguments against a signature: keywords are placed by
    /// parameter name and each value is coerced to its parameter type.
    pub(crate) fn call_args(
        &mut self,
        args: &[Expr],
        keywords: &[Keyword],
        sig: Option<&FunctionSig>,
        location: &Option<Location>,
    ) -> Result<(Vec<Lowered>, Vec<Coercion>), LoweringError> {
        let mut slots: Vec<Option<&Expr>> = args.iter().map(Some).collect();
        if let Some(sig) = sig {
            while slots.len() < sig.params.len() && !keywords.is_empty() {
                slots.push(None);
            }
            for kw in keywords {
                let position = kw.arg.as_deref().and_then(|n| sig.params.iter().position(|(p, _)| p == n));
                match position {
                    Some(i) if i < slots.len() => slots[i] = Some(&kw.value),
                    _ => {
                        let name = kw.arg.clone().unwrap_or_else(|| "**".into());
                        let diag = self.diag_value("Call", format!("unknown keyword argument '{}'", name), location);
                        return Ok((vec![diag], vec![Coercion::Keep]));
                    }
                }
            }
        } else if !keywords.is_empty() {
            let diag = self.diag_value("Call", "keyword arguments need a known signature".into(), location);
            return Ok((vec![diag], vec![Coercion::Keep]));
        }

        let mut parts = Vec::with_capacity(slots.len());
        let mut coercions = Vec::with_capacity(slots.len());
        for (i, slot) in slots.into_iter().enumerate() {
            let Some(expr) = slot else {
                parts.push(self.diag_value("Call", format!("missing argument {}", i + 1), location));
                coercions.push(Coercion::Keep);
                continue;
            };
            let target = sig.map(|s| s.param_type(i)).unwrap_or(InferredType::Unknown);
            let value = match (&expr.kind, &target) {
                (ExprKind::List { elts }, InferredType::List(_)) => self.lower_list_literal(elts, &target, false)?,
                _ => self.lower_expr(expr)?,
            };
            coercions.push(Coercion::between(&value, &target));
            parts.push(value);
        }
        Ok((parts, coercions))
    }

    /// Lowered result of calling a user function returning `ret`.
    pub(crate) fn call_result(&self, code: String, ret: &InferredType, key: Option<&str>) -> Lowered {
        match ret {
            InferredType::String | InferredType::List(_) => Lowered::new(code, ret.clone()).owned(Release::Free),
            InferredType::Dict(..) => Lowered::new(code, ret.clone()).owned(Release::Deinit),
            InferredType::Callable(_) => {
                let repr = key
                    .and_then(|k| self.closure_returns.get(k))
                    .map(|s| ValueRepr::Closure(s.clone()))
                    .unwrap_or_default();
                Lowered::new(code, ret.clone()).with_repr(repr)
            }
            _ => Lowered::new(code, ret.clone()),
        }
    }

    /// `callee(allocator, args...)` with error propagation.
    fn emit_user_call(
        &mut self,
        callee: impl FnOnce(&[String]) -> String,
        parts: Vec<Lowered>,
        coercions: Vec<Coercion>,
    ) -> String {
        let alloc = self.alloc();
        let g = self.guarder();
        self.with_temps(parts, |c| {
            let mut all = vec![alloc.to_string()];
            all.extend(coerce_all(c, &coercions));
            g.wrap(&format!("{}({})", callee(c), all.join(", ")))
        })
    }

    // ------- User functions -------

    fn lower_direct_call(
        &mut self,
        name: &str,
        key: Option<&str>,
        args: &[Expr],
        keywords: &[Keyword],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let sig = key.and_then(|k| self.types.signature(k)).cloned();
        let (parts, coercions) = self.call_args(args, keywords, sig.as_ref(), location)?;
        let spelled = self.function_spelling(name);
        let code = self.emit_user_call(|_| spelled, parts, coercions);
        let ret = sig.as_ref().map(|s| s.returns.clone()).unwrap_or(InferredType::Unknown);
        Ok(self.call_result(code, &ret, key))
    }

    fn lower_constructor(
        &mut self,
        class: &str,
        args: &[Expr],
        keywords: &[Keyword],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        if !self.types.classes().contains(class) {
            let message = if class.ends_with("Error") || class.ends_with("Exception") {
                format!("exception {} used as a value outside raise", class)
            } else {
                format!("unknown class {}", class)
            };
            return Ok(self.diag_value("Call", message, location));
        }
        let init_key = self
            .types
            .classes()
            .resolve_method(class, "__init__")
            .map(|(owner, _)| format!("{}.__init__", owner.name));
        let sig = init_key.as_deref().and_then(|k| self.types.signature(k)).cloned();
        let (parts, coercions) = self.call_args(args, keywords, sig.as_ref(), location)?;
        let callee = format!("{}.init", class);
        let code = self.emit_user_call(|_| callee, parts, coercions);
        Ok(Lowered::new(code, InferredType::Instance(class.to_string())).owned(Release::DeinitWithAllocator))
    }

    fn method_sig(&self, class: &str, method: &str) -> Option<FunctionSig> {
        self.types
            .classes()
            .resolve_method(class, method)
            .and_then(|(owner, _)| self.types.signature(&format!("{}.{}", owner.name, method)))
            .cloned()
    }

    fn lower_instance_call(
        &mut self,
        receiver: &Expr,
        class: &str,
        method: &str,
        args: &[Expr],
        keywords: &[Keyword],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let sig = self.method_sig(class, method);
        if sig.as_ref().is_some_and(|s| s.is_static) {
            return self.lower_static_call(class, method, args, keywords, location);
        }
        let recv = self.lower_expr(receiver)?;
        let (mut parts, mut coercions) = self.call_args(args, keywords, sig.as_ref(), location)?;
        // receiver rides along as part 0 so an owned receiver gets a temporary
        parts.insert(0, recv);
        coercions.insert(0, Coercion::Keep);
        let alloc = self.alloc();
        let g = self.guarder();
        let name = ident(method);
        let code = self.with_temps(parts, |c| {
            let mut all = vec![alloc.to_string()];
            all.extend(coerce_all(&c[1..], &coercions[1..]));
            g.wrap(&format!("{}.{}({})", c[0], name, all.join(", ")))
        });
        let ret = sig.as_ref().map(|s| s.returns.clone()).unwrap_or(InferredType::Unknown);
        let key = sig.as_ref().map(|s| s.key.clone());
        Ok(self.call_result(code, &ret, key.as_deref()))
    }

    fn lower_static_call(
        &mut self,
        class: &str,
        method: &str,
        args: &[Expr],
        keywords: &[Keyword],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let Some(sig) = self.method_sig(class, method) else {
            return Ok(self.diag_value("Call", format!("{} has no method {}", class, method), location));
        };
        if !sig.is_static {
            return Ok(self.diag_value("Call", format!("{}.{} needs an instance", class, method), location));
        }
        let owner = sig.class.clone().unwrap_or_else(|| class.to_string());
        let (parts, coercions) = self.call_args(args, keywords, Some(&sig), location)?;
        let callee = format!("{}.{}", owner, ident(method));
        let code = self.emit_user_call(|_| callee, parts, coercions);
        Ok(self.call_result(code, &sig.returns, Some(&sig.key)))
    }

    fn lower_super_call(
        &mut self,
        method: &str,
        args: &[Expr],
        keywords: &[Keyword],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let classes = self.types.classes();
        let defining = self.types.signature(&self.scope_key()).and_then(|s| s.class.clone());
        let base = defining.as_deref().and_then(|c| classes.get(c)).and_then(|c| c.base.clone());
        let Some((owner, _)) = base.as_deref().and_then(|b| classes.resolve_method(b, method)) else {
            return Ok(self.diag_value("Call", format!("super() has no method {}", method), location));
        };
        let owner = owner.name.clone();
        let sig = self.types.signature(&format!("{}.{}", owner, method)).cloned();
        let (parts, coercions) = self.call_args(args, keywords, sig.as_ref(), location)?;
        let callee = format!("self.{}", super::objects::mangled(&owner, method));
        let code = self.emit_user_call(|_| callee, parts, coercions);
        let ret = sig.as_ref().map(|s| s.returns.clone()).unwrap_or(InferredType::Unknown);
        Ok(self.call_result(code, &ret, None))
    }

    fn lower_closure_var_call(&mut self, name: &str, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let binding = self.scopes.lookup(name).cloned();
        let ret = match binding.as_ref().map(|b| &b.ty) {
            Some(InferredType::Callable(r)) => (**r).clone(),
            _ => InferredType::Unknown,
        };
        let params = self.closure_param_types(name);
        let (parts, coercions) = self.positional(args, &params)?;
        let spelled = self.spelling(name);
        let code = self.emit_user_call(|_| format!("{}.call", spelled), parts, coercions);
        Ok(self.call_result(code, &ret, None))
    }

    fn lower_lambda_var_call(&mut self, name: &str, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let binding = self.scopes.lookup(name).cloned();
        let ret = match binding.as_ref().map(|b| &b.ty) {
            Some(InferredType::Callable(r)) => (**r).clone(),
            _ => InferredType::Unknown,
        };
        let params = self.closure_param_types(name);
        let (parts, coercions) = self.positional(args, &params)?;
        let spelled = self.spelling(name);
        let code = self.emit_user_call(|_| spelled, parts, coercions);
        Ok(self.call_result(code, &ret, None))
    }

    /// Parameter types of a callable variable: the nested function's
    /// signature, or the types lambdas were synthesized with.
    fn closure_param_types(&self, name: &str) -> Vec<InferredType> {
        let key = format!("{}.{}", self.scope_key(), name);
        if let Some(sig) = self.types.signature(&key) {
            return sig.params.iter().map(|(_, t)| t.clone()).collect();
        }
        self.types.lambda_arg_types(&self.scope_key(), name).cloned().unwrap_or_default()
    }

    /// Positional arguments coerced to `params`.
    pub(crate) fn positional(
        &mut self,
        args: &[Expr],
        params: &[InferredType],
    ) -> Result<(Vec<Lowered>, Vec<Coercion>), LoweringError> {
        let mut parts = Vec::with_capacity(args.len());
        let mut coercions = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            let value = self.lower_expr(a)?;
            let target = params.get(i).cloned().unwrap_or(InferredType::Unknown);
            coercions.push(Coercion::between(&value, &target));
            parts.push(value);
        }
        Ok((parts, coercions))
    }

    pub(crate) fn lower_generic_method(&mut self, receiver: &Expr, method: &str, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let recv = self.lower_expr(receiver)?;
        let mut parts = vec![recv];
        for a in args {
            parts.push(self.lower_expr(a)?);
        }
        let name = ident(method);
        let code = self.with_temps(parts, |c| format!("{}.{}({})", c[0], name, c[1..].join(", ")));
        Ok(Lowered::new(code, InferredType::Unknown))
    }

    // ------- Library calls -------

    fn lower_foreign_call(&mut self, qualified: &str, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let Some(mapping) = self.imports.should_map_function(qualified).cloned() else {
            return Ok(Lowered::new(ident(qualified), InferredType::Unknown));
        };
        if let Some((module, _)) = self.split_module(qualified) {
            self.used_modules.insert(module);
        }
        let mut parts = Vec::with_capacity(args.len());
        for a in args {
            let value = self.lower_expr(a)?;
            let value = if value.is_growable() { Lowered { code: format!("{}.items", value.code), ..value } } else { value };
            parts.push(value);
        }
        let strategies: Vec<ArgStrategy> = (0..parts.len()).map(|i| mapping.strategy(i).clone()).collect();
        let ret = mapping.returns.as_deref().map(InferredType::from_type_name).unwrap_or(InferredType::Unknown);
        let native = mapping.native_name.clone();
        let ret_for_code = ret.clone();
        let code = self.with_temps(parts, |c| {
            let converted: Vec<String> = c
                .iter()
                .zip(&strategies)
                .map(|(code, strategy)| match strategy {
                    ArgStrategy::Direct => code.clone(),
                    ArgStrategy::FieldPath { path } => format!("{}.{}", code, path.trim_start_matches('.')),
                    ArgStrategy::Custom { template } => template.replace("{arg}", code),
                })
                .collect();
            let call = format!("{}({})", native, converted.join(", "));
            match ret_for_code {
                InferredType::Int => format!("@as(i64, @intCast({}))", call),
                InferredType::Float => format!("@as(f64, {})", call),
                _ => call,
            }
        });
        Ok(Lowered::new(code, ret))
    }

    fn lower_shim_call(
        &mut self,
        module: &str,
        symbol: &str,
        args: &[Expr],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let Some(spec) = self.imports.lookup(module).and_then(|m| m.shim(symbol)).cloned() else {
            return Ok(self.diag_value("Call", format!("{}.{} has no lowering", module, symbol), location));
        };
        if spec.constant {
            return Ok(self.diag_value("Call", format!("{}.{} is not callable", module, symbol), location));
        }
        let mut parts = Vec::with_capacity(args.len());
        for a in args {
            let value = self.lower_expr(a)?;
            let value = if value.is_growable() { Lowered { code: format!("{}.items", value.code), ..value } } else { value };
            parts.push(value);
        }
        let env = self.shim_env();
        let shims = self.shims;
        let g = self.guarder();
        let mut rendered = None;
        let code = self.with_temps(parts, |c| {
            let text = shims.emit(module, symbol, c, env);
            rendered = text.clone();
            match text {
                Some(t) if spec.fallible => g.wrap(&t),
                Some(t) => t,
                None => String::new(),
            }
        });
        if rendered.is_none() {
            return Ok(self.diag_value(
                "Call",
                format!("{}.{} does not take {} arguments", module, symbol, args.len()),
                location,
            ));
        }
        self.used_modules.insert(module.to_string());
        let ty = spec.returns.as_deref().map(InferredType::from_type_name).unwrap_or(InferredType::Unknown);
        let lowered = Lowered::new(code, ty);
        Ok(if spec.owned { lowered.owned_value() } else { lowered })
    }
}

fn kind_label(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Call { .. } => "call result",
        ExprKind::Subscript { .. } => "subscript",
        ExprKind::Attribute { .. } => "attribute",
        _ => "computed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{Binding, ClassRegistry, ModuleFacts, TypeInferrer};
    use crate::ast::build::*;
    use crate::config::LoweringConfig;
    use crate::registry::StaticRegistry;

    fn route_of(body: Vec<crate::ast::Stmt>, call: Expr) -> CallRoute {
        let m = module(body);
        let registry = StaticRegistry::builtin().expect("builtin registry");
        let types = TypeInferrer::analyze(&m, ClassRegistry::build(&m), registry.return_types());
        let facts = ModuleFacts::analyze(&m);
        let config = LoweringConfig::default();
        let session = Session::new(&config, &registry, &registry, &types, &facts);
        let ExprKind::Call { func, args, .. } = &call.kind else { panic!("not a call") };
        session.classify_call(func, args.len())
    }

    #[test]
    fn builtins_and_user_functions() {
        let body = vec![def("area", args(&["r"]), vec![ret(Some(name("r")))])];
        assert_eq!(
            route_of(body.clone(), call_name("len", vec![name("xs")])),
            CallRoute::Builtin { name: "len".into() }
        );
        assert_eq!(
            route_of(body, call_name("area", vec![int(2)])),
            CallRoute::Direct { name: "area".into(), key: Some("area".into()) }
        );
    }

    #[test]
    fn library_names_route_to_shims() {
        let body = vec![import("math", None)];
        let route = route_of(body, call(attr(name("math"), "sqrt"), vec![float(2.0)]));
        assert_eq!(route, CallRoute::Shim { module: "math".into(), symbol: "sqrt".into() });
    }

    #[test]
    fn local_variables_route_by_what_they_hold() {
        let m = module(Vec::new());
        let registry = StaticRegistry::builtin().expect("builtin registry");
        let types = TypeInferrer::analyze(&m, ClassRegistry::build(&m), registry.return_types());
        let facts = ModuleFacts::analyze(&m);
        let config = LoweringConfig::default();
        let mut session = Session::new(&config, &registry, &registry, &types, &facts);
        let square = InferredType::Callable(Box::new(InferredType::Int));
        session.declare("square", Binding::new(square, ValueRepr::FnPointer("__lambda_0".into())));
        session.declare("count", Binding::new(InferredType::Int, ValueRepr::Plain));

        assert!(session.lambda_vars.contains("square"));
        let ExprKind::Call { func, .. } = &call_name("square", vec![int(3)]).kind else { panic!("not a call") };
        assert_eq!(session.classify_call(func, 1), CallRoute::LambdaVar { name: "square".into() });
        let ExprKind::Call { func, .. } = &call_name("count", vec![]).kind else { panic!("not a call") };
        assert!(matches!(session.classify_call(func, 0), CallRoute::Unsupported { .. }));

        // rebinding to a plain value drops the name from the lambda set
        session.declare("square", Binding::new(InferredType::Int, ValueRepr::Plain));
        assert!(!session.lambda_vars.contains("square"));
    }

    #[test]
    fn dict_get_without_a_key_is_a_generic_method() {
        let body = vec![assign("ages", dict(vec![(string("ann"), int(3))]))];
        let route = route_of(body.clone(), method(name("ages"), "get", vec![]));
        assert_eq!(route, CallRoute::GenericMethod { method: "get".into() });
        let route = route_of(body, method(name("ages"), "get", vec![string("ann")]));
        assert_eq!(route, CallRoute::ContainerMethod { kind: ReceiverKind::Dict, method: "get".into() });
    }

    #[test]
    fn unknown_capitalized_names_are_constructors() {
        let route = route_of(Vec::new(), call_name("Widget", vec![]));
        assert_eq!(route, CallRoute::Constructor { class: "Widget".into() });
    }
}
