//! file: core/src/lower/function.rs
//! description: function bodies, parameters and return hand-over.
//!
//! Every user function, method and nested function goes through
//! `lower_function`. The header is written last: the return type of a
//! function that hands back one of its closures is only known once the
//! body has been lowered.
//!
use log::debug;

use super::closure::mentions;
use super::context::{Frame, Session};
use super::err::LoweringError;
use super::expr::as_float;
use super::ownership::Lowered;
use super::types::{default_repr, elem_type, value_type, zero_value, zig_type};
use super::writer::CodeWriter;
use crate::analyzers::{Binding, InferredType, ModuleFacts, TypeInferrer, ValueRepr};
use crate::ast::{Arg, Constant, Expr, ExprKind, Stmt, StmtKind};

/// What `lower_function` needs to emit one function.
pub(crate) struct FunctionSpec<'s> {
    /// Scope key of the type tables.
    pub key: String,
    pub emitted_name: String,
    /// Parameters, `self` excluded.
    pub args: &'s [Arg],
    pub body: &'s [Stmt],
    /// Leading receiver parameter (`self: *C`, `__env: @This()`).
    pub receiver: Option<(String, String)>,
    pub is_pub: bool,
    /// Bindings visible in the body before any parameter.
    pub presets: Vec<(String, Binding)>,
}

/// Whether control cannot fall off the end of `body`.
pub(crate) fn terminates(body: &[Stmt]) -> bool {
    match body.last().map(|s| &s.kind) {
        Some(StmtKind::Return { .. }) | Some(StmtKind::Raise { .. }) => true,
        Some(StmtKind::If { body, orelse, .. }) => terminates(body) && terminates(orelse),
        Some(StmtKind::While { test, body, .. }) => always_true(test) && !breaks_out(body),
        _ => false,
    }
}

fn always_true(test: &Expr) -> bool {
    match &test.kind {
        ExprKind::Constant { value: Constant::Bool(b) } => *b,
        ExprKind::Constant { value: Constant::Int(i) } => *i != 0,
        _ => false,
    }
}

/// A `break` that leaves this loop body (not one of a nested loop).
fn breaks_out(body: &[Stmt]) -> bool {
    body.iter().any(|s| match &s.kind {
        StmtKind::Break => true,
        StmtKind::For { .. } | StmtKind::While { .. } | StmtKind::FunctionDef { .. } | StmtKind::ClassDef { .. } => false,
        _ => crate::analyzers::walk::child_blocks(s).into_iter().any(breaks_out),
    })
}

impl<'a> Session<'a> {
    pub(crate) fn lower_function(&mut self, spec: FunctionSpec<'_>) -> Result<String, LoweringError> {
        let types: &'a TypeInferrer = self.types;
        let module_facts: &'a ModuleFacts = self.facts;
        let facts = module_facts.scope(&spec.key);
        let sig = types.signature(&spec.key);
        let rt = self.rt();
        let alloc = self.alloc();
        let unit = self.unit();

        let returns = sig.map(|s| s.returns.clone()).unwrap_or(InferredType::None);
        let generator = sig.is_some_and(|s| s.is_generator);
        let params: Vec<(String, InferredType)> = spec
            .args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let ty = match sig {
                    Some(s) => s.param_type(i),
                    None => a.annotation.as_ref().map(InferredType::from_annotation).unwrap_or(InferredType::Unknown),
                };
                (a.arg.clone(), ty)
            })
            .collect();

        let frame = Frame {
            key: spec.key.clone(),
            returns: returns.clone(),
            generator,
            ..Frame::default()
        };
        let ((param_texts, body_text), frame) = self.in_frame(frame, |s| {
            let mut w = CodeWriter::new(unit);
            for (name, binding) in &spec.presets {
                s.declare(name, binding.clone());
            }

            let mut param_texts = Vec::with_capacity(params.len());
            for (name, ty) in &params {
                let (spelled, alias) = s.local_name(name);
                let ty_text = match ty {
                    InferredType::Callable(_) => "anytype".to_string(),
                    _ => value_type(ty, rt),
                };
                let mut binding = Binding::new(ty.clone(), default_repr(ty));
                binding.alias = alias;
                if !facts.is_read(name) && !facts.is_mutated(name) {
                    param_texts.push(format!("{}: {}", spelled, ty_text));
                    w.line(&format!("_ = {};", spelled));
                } else if matches!(ty, InferredType::List(_)) && facts.is_grown(name) {
                    // the caller's slice is copied into a list this body can grow
                    let raw = format!("__p_{}", spelled.trim_start_matches('@'));
                    param_texts.push(format!("{}: {}", raw, ty_text));
                    w.line(&format!("var {} = std.ArrayList({}).init({});", spelled, elem_type(ty, rt), alloc));
                    let escapes = facts.escapes(name);
                    if escapes {
                        w.line(&format!("errdefer {}.deinit();", spelled));
                        s.frame_mut().owned.insert(name.clone());
                    } else {
                        w.line(&format!("defer {}.deinit();", spelled));
                    }
                    w.line(&format!("{};", s.guard(&format!("{}.appendSlice({})", spelled, raw))));
                    binding = Binding { repr: ValueRepr::Growable, ..binding }.mutable(true).released(!escapes);
                } else if facts.is_mutated(name) {
                    let raw = format!("__p_{}", spelled.trim_start_matches('@'));
                    param_texts.push(format!("{}: {}", raw, ty_text));
                    w.line(&format!("var {} = {};", spelled, raw));
                    binding = binding.mutable(true);
                } else {
                    param_texts.push(format!("{}: {}", spelled, ty_text));
                }
                s.declare(name, binding);
            }

            for name in &facts.hoisted {
                if s.scopes.is_declared_in_current_scope(name) {
                    continue;
                }
                let ty = types.local_var(&spec.key, name).cloned().unwrap_or(InferredType::Unknown);
                let repr = if matches!(ty, InferredType::List(_)) && facts.is_grown(name) {
                    ValueRepr::Growable
                } else {
                    default_repr(&ty)
                };
                let (spelled, alias) = s.local_name(name);
                let init = if repr == ValueRepr::Plain || repr == ValueRepr::Slice { zero_value(&ty) } else { "undefined" };
                w.line(&format!("var {}: {} = {};", spelled, zig_type(&ty, &repr, rt), init));
                let mut binding = Binding::new(ty, repr).mutable(true);
                binding.alias = alias;
                s.declare(name, binding);
            }

            if generator {
                let elem = returns.element();
                w.line(&format!("var __gen_out = std.ArrayList({}).init({});", value_type(&elem, rt), alloc));
                w.line("errdefer __gen_out.deinit();");
            }

            s.lower_stmts(spec.body, &mut w)?;

            if !terminates(spec.body) {
                if generator {
                    w.line(&format!("return {};", s.guard("__gen_out.toOwnedSlice()")));
                } else {
                    match &returns {
                        InferredType::None => {}
                        InferredType::Optional(_) => w.line("return null;"),
                        InferredType::Unknown => w.line(&format!("return {}.none;", rt)),
                        _ => w.line("unreachable;"),
                    }
                }
            }
            Ok((param_texts, w.finish()))
        })?;

        let ret_text = match (&returns, &frame.returned_closure) {
            (_, Some(closure)) => closure.clone(),
            (InferredType::None, _) => "void".to_string(),
            (ty, _) => zig_type(ty, &default_repr(ty), rt),
        };
        let mut all_params = Vec::with_capacity(param_texts.len() + 2);
        if let Some((name, ty)) = &spec.receiver {
            all_params.push(format!("{}: {}", name, ty));
        }
        all_params.push(format!("{}: std.mem.Allocator", alloc));
        all_params.extend(param_texts);

        let visibility = if spec.is_pub { "pub " } else { "" };
        let mut out = CodeWriter::new(unit);
        out.open(&format!("{}fn {}({}) anyerror!{}", visibility, spec.emitted_name, all_params.join(", "), ret_text));
        if let Some((name, _)) = &spec.receiver {
            if !mentions(&body_text, name) {
                out.line(&format!("_ = {};", name));
            }
        }
        if !mentions(&body_text, alloc) {
            out.line(&format!("_ = {};", alloc));
        }
        out.line(body_text.trim_end());
        out.close("");
        debug!("lowered function {} as {}", spec.key, spec.emitted_name);
        Ok(out.finish())
    }

    /// `return [value];` in the current frame.
    pub(crate) fn lower_return(&mut self, value: Option<&Expr>, w: &mut CodeWriter) -> Result<(), LoweringError> {
        let frame = self.frame();
        if frame.is_main {
            w.line("return;");
            return Ok(());
        }
        if frame.generator {
            let text = format!("return {};", self.guard("__gen_out.toOwnedSlice()"));
            w.line(&text);
            return Ok(());
        }
        let returns = frame.returns.clone();
        let value = value.filter(|v| !v.is_none_literal());
        let Some(value) = value else {
            match returns {
                InferredType::Optional(_) => w.line("return null;"),
                InferredType::Unknown => w.line(&format!("return {}.none;", self.rt())),
                _ => w.line("return;"),
            }
            return Ok(());
        };
        let lowered = self.lower_value(value, &returns, false, None)?;
        if returns == InferredType::None {
            // a void call in return position still runs
            w.line(&format!("_ = {};", lowered.code));
            w.line("return;");
            return Ok(());
        }
        let code = self.hand_over(lowered, value)?;
        w.line(&format!("return {};", code));
        Ok(())
    }

    /// Text of `value` as the current function's result. Results are
    /// always caller-owned: borrowed strings, slices and maps are copied
    /// and growable lists give up their buffer.
    pub(crate) fn hand_over(&mut self, value: Lowered, source: &Expr) -> Result<String, LoweringError> {
        if let ValueRepr::Closure(name) = &value.repr {
            self.frame_mut().returned_closure = Some(name.clone());
            return Ok(value.code);
        }
        let target = match &self.frame().returns {
            InferredType::Optional(inner) => (**inner).clone(),
            other => other.clone(),
        };
        let held = source.as_name().is_some_and(|n| self.frame().owned.contains(n));
        let alloc = self.alloc();
        let g = self.guarder();
        let code = match (&target, &value.ty) {
            (_, InferredType::None) => "null".to_string(),
            (InferredType::Float, InferredType::Int) | (InferredType::Float, InferredType::Bool) => {
                as_float(&value.code, &value.ty)
            }
            (InferredType::Unknown, t) if !t.is_unknown() => format!("{}.toValue({})", self.rt(), value.code),
            (_, InferredType::String) if value.is_owned() || held => value.code,
            (_, InferredType::String) => g.wrap(&format!("{}.dupe(u8, {})", alloc, value.code)),
            (_, InferredType::List(_)) if value.is_growable() && (value.is_owned() || held) => {
                g.wrap(&format!("{}.toOwnedSlice()", value.code))
            }
            (_, InferredType::List(_)) if value.is_growable() => {
                g.wrap(&format!("{}.dupe({}, {}.items)", alloc, elem_type(&value.ty, self.rt()), value.code))
            }
            (_, InferredType::List(_)) if value.is_owned() || held => value.code,
            (_, InferredType::List(_)) => {
                g.wrap(&format!("{}.dupe({}, {})", alloc, elem_type(&value.ty, self.rt()), value.code))
            }
            (_, InferredType::Dict(..)) if value.is_owned() || held => value.code,
            (_, InferredType::Dict(..)) => g.wrap(&format!("{}.clone()", value.code)),
            _ => value.code,
        };
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[test]
    fn termination_follows_both_branches() {
        assert!(terminates(&[ret(None)]));
        assert!(terminates(&[if_(name("c"), vec![ret(None)], vec![raise(None)])]));
        assert!(!terminates(&[if_(name("c"), vec![ret(None)], vec![])]));
        assert!(!terminates(&[pass()]));
    }

    #[test]
    fn infinite_loops_terminate_unless_broken() {
        assert!(terminates(&[while_(boolean(true), vec![pass()])]));
        assert!(!terminates(&[while_(boolean(true), vec![if_(name("c"), vec![brk()], vec![])])]));
        let inner_break = while_(boolean(true), vec![while_(name("c"), vec![brk()])]);
        assert!(terminates(&[inner_break]));
    }
}
