//! file: core/src/lower/mod.rs
//! description: the type-directed lowering engine.
//!
//! `lower_module` runs the analyzers over a module AST and walks its
//! top-level definitions, producing the target text together with the
//! deferred diagnostics and the hoisted closure records. The only fatal
//! failure is a `LoweringError`; every unsupported construct is left in the
//! output as a diagnostic that fails the downstream native build.
//!
pub mod builtins;
pub mod closure;
pub mod context;
pub mod diagnostics;
pub mod dispatch;
pub mod err;
pub mod expr;
pub mod function;
pub mod methods;
pub mod objects;
pub mod ownership;
pub mod stmt;
pub mod strings;
pub mod types;
pub mod writer;

use std::collections::{BTreeSet, HashSet};

use log::{debug, info};

pub use context::{ClosureRecord, Session};
pub use diagnostics::Diagnostic;
pub use err::{LoweringError, LoweringErrorKind};

use crate::analyzers::prepass::{assigned_names, free_names};
use crate::analyzers::{Binding, ClassRegistry, InferredType, MODULE_SCOPE, ModuleFacts, TypeInferrer, ValueRepr};
use crate::ast::{Module, Stmt, StmtKind};
use crate::config::LoweringConfig;
use crate::registry::{ImportRegistry, ShimCatalog};
use function::FunctionSpec;
use strings::ident;
use types::{annotatable, default_repr, zero_value, zig_type};
use writer::CodeWriter;

/// Result of lowering one module.
#[derive(Debug, Clone)]
pub struct LoweredModule {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
    pub closures: Vec<ClosureRecord>,
}

impl LoweredModule {
    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Lower `module` to target text.
pub fn lower_module(
    module: &Module,
    config: &LoweringConfig,
    imports: &dyn ImportRegistry,
    shims: &dyn ShimCatalog,
) -> Result<LoweredModule, LoweringError> {
    let classes = ClassRegistry::build(module);
    let types = TypeInferrer::analyze(module, classes, imports.result_types());
    let facts = ModuleFacts::analyze(module);
    let mut session = Session::new(config, imports, shims, &types, &facts);
    session.field_reprs = objects::grown_fields(types.classes());
    session.closure_returns = closure::closure_returns(module);

    let globals = shared_globals(module, &facts);
    let mut prelude = CodeWriter::new(&config.indent);
    session.declare_module_names(module, &globals, &mut prelude)?;

    let mut top_diags: Vec<String> = Vec::new();
    let mut definitions: Vec<String> = Vec::new();
    for stmt in &module.body {
        match &stmt.kind {
            StmtKind::FunctionDef { name, args, body, .. } => {
                let text = session.descend(&stmt.location, |s| {
                    s.lower_function(FunctionSpec {
                        key: name.clone(),
                        emitted_name: s.function_spelling(name),
                        args,
                        body,
                        receiver: None,
                        is_pub: false,
                        presets: Vec::new(),
                    })
                })?;
                definitions.push(text);
            }
            StmtKind::ClassDef { name, bases, .. } => {
                if bases.len() > 1 {
                    let diag = Diagnostic::new(
                        "ClassDef",
                        format!("class {} has more than one base class", name),
                        session.loc(&stmt.location),
                    );
                    top_diags.push(diag.top_level());
                    session.diagnostics.push(diag);
                }
                let Some(info) = types.classes().get(name) else {
                    continue;
                };
                let text = session.descend(&stmt.location, |s| s.lower_class(info))?;
                definitions.push(text);
            }
            _ => {}
        }
    }

    let entry = if config.emit_entry_point { Some(session.lower_entry_point(&module.body)?) } else { None };

    // ------- Assembly -------
    let mut out = CodeWriter::new(&config.indent);
    out.line("const std = @import(\"std\");");
    out.line(&format!("const {} = @import(\"{}\");", config.runtime_import, config.runtime_path));
    let mut headers: BTreeSet<String> = BTreeSet::new();
    for name in &session.used_modules {
        if let Some(info) = imports.lookup(name) {
            if let Some(path) = &info.zig_import {
                out.line(&format!("const {} = @import(\"{}\");", ident(&name.replace('.', "_")), path));
            }
            headers.extend(info.c_headers.iter().cloned());
        }
    }
    if !headers.is_empty() {
        out.open("const c = @cImport(");
        for h in &headers {
            out.line(&format!("@cInclude(\"{}\");", h));
        }
        out.close(");");
    }
    for diag in &top_diags {
        out.blank();
        out.line(diag);
    }
    for record in &session.closures {
        out.blank();
        out.line(record.body_text.trim_end());
    }
    if !prelude.is_empty() {
        out.blank();
        out.append(&prelude);
    }
    for text in &definitions {
        out.blank();
        out.line(text.trim_end());
    }
    if let Some(entry) = entry {
        out.blank();
        out.line(entry.trim_end());
    }

    info!(
        "lowered {}: {} definitions, {} closures, {} deferred diagnostics",
        config.source_name,
        definitions.len(),
        session.closures.len(),
        session.diagnostics.len()
    );
    Ok(LoweredModule { text: out.finish(), diagnostics: session.diagnostics, closures: session.closures })
}

/// Module-level names functions reach: declared `global` somewhere, or
/// read by a function body without being bound there.
fn shared_globals(module: &Module, facts: &ModuleFacts) -> Vec<String> {
    let module_names = assigned_names(&module.body);
    let mut out: BTreeSet<String> = BTreeSet::new();
    collect_globals(&module.body, &module_names, &mut out);
    let declared = global_statement_names(&module.body);
    out.into_iter().filter(|n| !facts.is_constant(n) || declared.contains(n)).collect()
}

fn collect_globals(body: &[Stmt], module_names: &HashSet<String>, out: &mut BTreeSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::FunctionDef { args, body: fn_body, .. } => {
                for name in free_names(fn_body, args.iter().map(|a| a.arg.as_str())) {
                    if module_names.contains(&name) {
                        out.insert(name);
                    }
                }
                out.extend(global_statement_names(fn_body));
                collect_globals(fn_body, module_names, out);
            }
            StmtKind::ClassDef { body: class_body, .. } => collect_globals(class_body, module_names, out),
            _ => {
                for block in crate::analyzers::walk::child_blocks(stmt) {
                    collect_globals(block, module_names, out);
                }
            }
        }
    }
}

/// Names of every `global` statement, at any depth.
fn global_statement_names(body: &[Stmt]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for stmt in body {
        match &stmt.kind {
            StmtKind::Global { names } => out.extend(names.iter().cloned()),
            StmtKind::FunctionDef { body: inner, .. } | StmtKind::ClassDef { body: inner, .. } => {
                out.extend(global_statement_names(inner));
            }
            _ => {
                for block in crate::analyzers::walk::child_blocks(stmt) {
                    out.extend(global_statement_names(block));
                }
            }
        }
    }
    out
}

impl<'a> Session<'a> {
    /// Top-level constants and shared globals, declared in the root scope.
    fn declare_module_names(&mut self, module: &Module, globals: &[String], w: &mut CodeWriter) -> Result<(), LoweringError> {
        let rt = self.rt();
        for stmt in &module.body {
            let (target, value) = match &stmt.kind {
                StmtKind::Assign { targets, value } if targets.len() == 1 => (&targets[0], value),
                StmtKind::AnnAssign { target, value: Some(value), .. } => (target, value),
                _ => continue,
            };
            let Some(name) = target.as_name() else { continue };
            if !self.facts.is_constant(name) || globals.iter().any(|g| g == name) || self.scopes.is_declared(name) {
                continue;
            }
            let lowered = self.lower_expr(value)?;
            let annotation =
                if annotatable(&lowered.ty, &lowered.repr) { format!(": {}", zig_type(&lowered.ty, &lowered.repr, rt)) } else { String::new() };
            w.line(&format!("const {}{} = {};", ident(name), annotation, lowered.code));
            self.declare(name, Binding::new(lowered.ty, ValueRepr::Plain));
        }
        let module_facts = self.facts.scope(MODULE_SCOPE);
        for name in globals {
            let ty = self.types.lookup_var(MODULE_SCOPE, name).cloned().unwrap_or(InferredType::Unknown);
            let repr = if matches!(ty, InferredType::List(_)) && module_facts.is_grown(name) {
                ValueRepr::Growable
            } else {
                default_repr(&ty)
            };
            let init = match repr {
                ValueRepr::Plain | ValueRepr::Slice => zero_value(&ty),
                _ => "undefined",
            };
            w.line(&format!("var {}: {} = {};", ident(name), zig_type(&ty, &repr, rt), init));
            debug!("module global {} ({})", name, ty);
            self.declare(name, Binding::new(ty, repr).mutable(true));
        }
        Ok(())
    }

    /// `pub fn main` holding the module's executable statements.
    fn lower_entry_point(&mut self, body: &[Stmt]) -> Result<String, LoweringError> {
        let alloc = self.alloc();
        let mut inner = CodeWriter::new(self.unit());
        self.scoped(|s| s.lower_stmts(body, &mut inner))?;
        let text = inner.finish();

        let mut w = CodeWriter::new(self.unit());
        w.open("pub fn main() !void");
        w.line("var gpa = std.heap.GeneralPurposeAllocator(.{}){};");
        w.line("defer _ = gpa.deinit();");
        w.line(&format!("const {} = gpa.allocator();", alloc));
        if !closure::mentions(&text, alloc) {
            w.line(&format!("_ = {};", alloc));
        }
        if !text.trim().is_empty() {
            w.line(text.trim_end());
        }
        w.close("");
        Ok(w.finish())
    }
}
