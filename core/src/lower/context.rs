//! file: core/src/lower/context.rs
//! description: the per-compilation lowering session.
//!
//! Everything one compilation needs lives on `Session`: the read-only
//! analysis results, the scope stack, the closure/lambda variable sets,
//! the hoisted closure records and the deferred diagnostics. A session is
//! created by `lower_module`, threaded by `&mut` through every lowering
//! function and consumed when the output is assembled.
//!
use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, warn};

use super::diagnostics::Diagnostic;
use super::err::LoweringError;
use super::ownership::Lowered;
use super::writer::block_expr;
use crate::analyzers::{
    Binding, ClosureVarSet, InferredType, LambdaVarSet, MODULE_SCOPE, ModuleFacts, ScopeFacts, ScopeStack,
    TypeInferrer, ValueRepr,
};
use crate::ast::Expr;
use crate::config::LoweringConfig;
use crate::location::Location;
use crate::registry::{ImportRegistry, ShimCatalog, ShimEnv};

/// A synthesized definition hoisted ahead of its first use: a lambda
/// function, a closure struct, or a lambda struct with captures.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosureRecord {
    pub id: usize,
    pub synthesized_name: String,
    pub captured_vars: Vec<String>,
    pub body_text: String,
}

/// State of the function currently being lowered.
#[derive(Debug, Clone, Default)]
pub(crate) struct Frame {
    /// Scope key of the type tables (`f`, `C.m`, `outer.inner`).
    pub key: String,
    pub returns: InferredType,
    pub generator: bool,
    /// Labels of the enclosing `try` bodies, innermost last.
    pub try_labels: Vec<String>,
    /// Error captured by the innermost enclosing handler.
    pub current_error: Option<String>,
    /// Closure struct returned by this function, if any.
    pub returned_closure: Option<String>,
    /// Names holding owned values that no scoped release covers; they
    /// are handed over as they are when returned.
    pub owned: HashSet<String>,
    pub is_main: bool,
}

/// Error routing of the current position, detached from the session so
/// it can be used inside `with_temps` builders.
#[derive(Debug, Clone, Default)]
pub(crate) struct Guard(Option<String>);

impl Guard {
    pub fn wrap(&self, code: &str) -> String {
        match &self.0 {
            Some(label) => format!("({} catch |__err| break :{} __err)", code, label),
            None => format!("try {}", code),
        }
    }

    /// `return err` / `break :label err`, usable as an expression.
    pub fn fail_expr(&self, error_value: &str) -> String {
        match &self.0 {
            Some(label) => format!("break :{} {}", label, error_value),
            None => format!("return {}", error_value),
        }
    }
}

pub struct Session<'a> {
    pub(crate) config: &'a LoweringConfig,
    pub(crate) imports: &'a dyn ImportRegistry,
    pub(crate) shims: &'a dyn ShimCatalog,
    pub(crate) types: &'a TypeInferrer,
    pub(crate) facts: &'a ModuleFacts,
    pub(crate) scopes: ScopeStack,
    pub(crate) closure_vars: ClosureVarSet,
    pub(crate) lambda_vars: LambdaVarSet,
    /// Comprehension targets and lambda parameters, for type inference.
    pub(crate) locals: Vec<(String, InferredType)>,
    pub(crate) closures: Vec<ClosureRecord>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    /// Registry modules referenced by the generated code.
    pub(crate) used_modules: BTreeSet<String>,
    /// Representation of class fields that differ from the default
    /// (growable lists, maps), keyed by `Class.field`.
    pub(crate) field_reprs: HashMap<String, ValueRepr>,
    /// Function key -> closure struct its result is an instance of.
    pub(crate) closure_returns: HashMap<String, String>,
    root: Frame,
    frames: Vec<Frame>,
    counter: usize,
    depth: usize,
}

impl<'a> Session<'a> {
    pub fn new(
        config: &'a LoweringConfig,
        imports: &'a dyn ImportRegistry,
        shims: &'a dyn ShimCatalog,
        types: &'a TypeInferrer,
        facts: &'a ModuleFacts,
    ) -> Self {
        Session {
            config,
            imports,
            shims,
            types,
            facts,
            scopes: ScopeStack::new(),
            closure_vars: ClosureVarSet::default(),
            lambda_vars: LambdaVarSet::default(),
            locals: Vec::new(),
            closures: Vec::new(),
            diagnostics: Vec::new(),
            used_modules: BTreeSet::new(),
            field_reprs: HashMap::new(),
            closure_returns: HashMap::new(),
            root: Frame { key: MODULE_SCOPE.to_string(), is_main: true, ..Frame::default() },
            frames: Vec::new(),
            counter: 0,
            depth: 0,
        }
    }

    // ------- Configuration -------

    pub(crate) fn alloc(&self) -> &'a str {
        &self.config.allocator
    }

    pub(crate) fn rt(&self) -> &'a str {
        &self.config.runtime_import
    }

    pub(crate) fn unit(&self) -> &'a str {
        &self.config.indent
    }

    pub(crate) fn shim_env(&self) -> ShimEnv<'a> {
        ShimEnv { allocator: self.alloc(), runtime: self.rt() }
    }

    /// Attach the configured source name to a node location.
    pub(crate) fn loc(&self, location: &Option<Location>) -> Option<Location> {
        location.as_ref().map(|l| l.in_file(&self.config.source_name))
    }

    /// Unique name with the given prefix (`__comp_3`).
    pub(crate) fn fresh(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}_{}", prefix, self.counter)
    }

    pub(crate) fn next_id(&mut self) -> usize {
        self.counter += 1;
        self.counter
    }

    // ------- Frames -------

    /// The innermost function frame; the module body outside any
    /// function runs in the root frame.
    pub(crate) fn frame(&self) -> &Frame {
        self.frames.last().unwrap_or(&self.root)
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    /// Run `f` as the body of a new function. Bindings and inference
    /// locals of the enclosing function are not visible inside; only the
    /// root scope (module globals) is.
    pub(crate) fn in_frame<T>(
        &mut self,
        frame: Frame,
        f: impl FnOnce(&mut Self) -> Result<T, LoweringError>,
    ) -> Result<(T, Frame), LoweringError> {
        debug!("lowering function scope {}", frame.key);
        self.frames.push(frame);
        let isolated = self.scopes.root_only();
        let saved_scopes = std::mem::replace(&mut self.scopes, isolated);
        let saved_locals = std::mem::take(&mut self.locals);
        let out = self.scoped(f);
        self.locals = saved_locals;
        self.scopes = saved_scopes;
        let frame = self.frames.pop().unwrap_or_default();
        out.map(|v| (v, frame))
    }

    pub(crate) fn scope_key(&self) -> String {
        self.frame().key.clone()
    }

    pub(crate) fn scope_facts(&self) -> &'a ScopeFacts {
        let facts: &'a ModuleFacts = self.facts;
        facts.scope(&self.frame().key)
    }

    // ------- Scopes -------

    /// Run `f` inside a fresh lexical scope. The scope is popped on every
    /// exit path, errors included.
    pub(crate) fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, LoweringError>) -> Result<T, LoweringError> {
        self.scopes.push_scope();
        let out = f(self);
        self.scopes.pop_scope();
        out
    }

    /// Guard one level of recursion against the configured depth limit.
    pub(crate) fn descend<T>(
        &mut self,
        location: &Option<Location>,
        f: impl FnOnce(&mut Self) -> Result<T, LoweringError>,
    ) -> Result<T, LoweringError> {
        if self.depth >= self.config.max_nesting_depth {
            return Err(LoweringError::resource(
                format!("nesting deeper than {} levels", self.config.max_nesting_depth),
                self.loc(location),
            ));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    pub(crate) fn declare(&mut self, name: &str, binding: Binding) {
        if matches!(binding.repr, ValueRepr::Closure(_)) {
            self.closure_vars.insert(name);
            self.lambda_vars.remove(name);
        } else if matches!(binding.repr, ValueRepr::FnPointer(_)) {
            self.lambda_vars.insert(name);
            self.closure_vars.remove(name);
        } else {
            self.lambda_vars.remove(name);
        }
        self.scopes.declare_var(name, binding);
    }

    /// Spelling for a new local: the source name, or a fresh alias when
    /// the name is already visible (the target forbids shadowing).
    pub(crate) fn local_name(&mut self, name: &str) -> (String, Option<String>) {
        if self.scopes.is_declared(name) || self.types.is_module_function(name) {
            let alias = self.fresh(&format!("__{}", name));
            return (alias.clone(), Some(alias));
        }
        (super::strings::ident(name), None)
    }

    /// Target spelling of a declared name.
    pub(crate) fn spelling(&self, name: &str) -> String {
        match self.scopes.lookup(name).and_then(|b| b.alias.clone()) {
            Some(alias) => alias,
            None => super::strings::ident(name),
        }
    }

    // ------- Types -------

    pub(crate) fn infer(&self, expr: &Expr) -> InferredType {
        let types: &'a TypeInferrer = self.types;
        let key = self.frame().key.clone();
        if let Some(name) = expr.as_name() {
            if let Some(b) = self.scopes.lookup(name) {
                if !b.ty.is_unknown() {
                    return b.ty.clone();
                }
            }
        }
        types.infer_with(expr, &key, &self.locals)
    }

    /// Final table type of a variable in the current function.
    pub(crate) fn table_type(&self, name: &str) -> InferredType {
        let types: &'a TypeInferrer = self.types;
        if let Some((_, ty)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return ty.clone();
        }
        types.lookup_var(&self.frame().key, name).cloned().unwrap_or(InferredType::Unknown)
    }

    // ------- Error routing -------

    pub(crate) fn guarder(&self) -> Guard {
        Guard(self.frame().try_labels.last().cloned())
    }

    /// Propagate a failure of `code`: `try code` normally, or a break to
    /// the innermost `try` body label.
    pub(crate) fn guard(&self, code: &str) -> String {
        self.guarder().wrap(code)
    }

    /// Statement raising `error_value`.
    pub(crate) fn fail(&self, error_value: &str) -> String {
        format!("{};", self.guarder().fail_expr(error_value))
    }

    // ------- Diagnostics -------

    /// Record a deferred diagnostic and return its expression form.
    pub(crate) fn defer_diag(&mut self, construct: &str, message: String, location: &Option<Location>) -> String {
        let diag = Diagnostic::new(construct, message, self.loc(location));
        warn!("deferred diagnostic: {}", diag);
        let text = diag.expression();
        self.diagnostics.push(diag);
        text
    }

    /// Deferred diagnostic as a lowered value of unknown type.
    pub(crate) fn diag_value(&mut self, construct: &str, message: String, location: &Option<Location>) -> Lowered {
        Lowered::new(self.defer_diag(construct, message, location), InferredType::Unknown)
    }

    // ------- Temporaries -------

    /// Build an expression over `parts`. Owned parts are bound to
    /// temporaries released when the surrounding labeled block exits, so
    /// the built expression must not return memory borrowed from them.
    pub(crate) fn with_temps(&mut self, parts: Vec<Lowered>, build: impl FnOnce(&[String]) -> String) -> String {
        let alloc = self.alloc();
        let mut stmts = Vec::new();
        let mut codes = Vec::with_capacity(parts.len());
        for part in parts {
            match part.owned {
                Some(release) => {
                    let tmp = self.fresh("__tmp");
                    let keyword = if release.needs_var(&part.repr) || part.is_growable() { "var" } else { "const" };
                    stmts.push(format!("{} {} = {};", keyword, tmp, part.code));
                    stmts.push(format!("defer {}", release.statement(&tmp, alloc)));
                    codes.push(tmp);
                }
                None => codes.push(part.code),
            }
        }
        let body = build(&codes);
        if stmts.is_empty() {
            return body;
        }
        let label = self.fresh("__blk");
        block_expr(&label, &stmts, &body, self.unit())
    }
}
