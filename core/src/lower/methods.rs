//! file: core/src/lower/methods.rs
//! description: built-in methods of strings, lists, dicts and queues.
//!
//! Receivers are classified by their inferred type; only methods listed
//! in the per-kind tables are routed here, everything else on a typed
//! receiver becomes a deferred diagnostic in `dispatch`. List mutation
//! needs a growable receiver: a name is growable when the prepass saw it
//! grow, so a mutation on a slice binding is reported instead of emitted.
//!
use std::collections::HashSet;

use lazy_static::lazy_static;
use log::trace;

use super::builtins::{bool_literal, literal_keyword, sort_comparator};
use super::context::Session;
use super::err::LoweringError;
use super::expr::{Coercion, as_int, view};
use super::ownership::{Lowered, Release};
use super::types::value_type;
use super::writer::block_expr;
use crate::analyzers::infer::method_return;
use crate::analyzers::{InferredType, ValueRepr};
use crate::ast::{Expr, Keyword};
use crate::location::Location;

/// Receiver families with built-in methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    Str,
    List,
    Dict,
    Queue,
}

impl ReceiverKind {
    pub fn of(ty: &InferredType) -> Option<Self> {
        match ty {
            InferredType::String => Some(ReceiverKind::Str),
            InferredType::List(_) => Some(ReceiverKind::List),
            InferredType::Dict(..) => Some(ReceiverKind::Dict),
            InferredType::Queue => Some(ReceiverKind::Queue),
            _ => None,
        }
    }
}

lazy_static! {
    static ref STR_METHODS: HashSet<&'static str> = [
        "upper", "lower", "strip", "lstrip", "rstrip", "replace", "split", "rsplit", "splitlines", "join",
        "startswith", "endswith", "find", "rfind", "index", "count", "isdigit", "isalpha", "isalnum", "isspace",
        "isupper", "islower", "title", "capitalize", "swapcase", "center", "ljust", "rjust", "zfill",
    ]
    .into_iter()
    .collect();
    static ref LIST_METHODS: HashSet<&'static str> =
        ["append", "extend", "insert", "pop", "remove", "clear", "sort", "reverse", "index", "count", "copy"]
            .into_iter()
            .collect();
    static ref DICT_METHODS: HashSet<&'static str> =
        ["get", "keys", "values", "items", "pop", "setdefault", "update", "clear", "copy"].into_iter().collect();
    static ref QUEUE_METHODS: HashSet<&'static str> =
        ["put", "put_nowait", "get", "get_nowait", "empty", "full", "qsize", "task_done"].into_iter().collect();
}

/// Whether `method` has a lowering for receivers of `kind`.
pub fn supports(kind: ReceiverKind, method: &str) -> bool {
    match kind {
        ReceiverKind::Str => STR_METHODS.contains(method),
        ReceiverKind::List => LIST_METHODS.contains(method),
        ReceiverKind::Dict => DICT_METHODS.contains(method),
        ReceiverKind::Queue => QUEUE_METHODS.contains(method),
    }
}

/// Characters `strip()` removes when called without an argument.
const WHITESPACE: &str = "\" \\t\\r\\n\"";

impl<'a> Session<'a> {
    pub(crate) fn lower_container_method(
        &mut self,
        kind: ReceiverKind,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        keywords: &[Keyword],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        trace!("{:?} method {}", kind, method);
        let sorting = kind == ReceiverKind::List && method == "sort";
        if !keywords.is_empty() && !sorting {
            return Ok(self.diag_value("Call", format!("{}() does not take keyword arguments", method), location));
        }
        let recv = self.lower_expr(receiver)?;
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.lower_expr(a)?);
        }
        let ret = method_return(&recv.ty, method, args.len()).unwrap_or(InferredType::Unknown);
        match kind {
            ReceiverKind::Str => self.lower_str_method(recv, method, values, ret, location),
            ReceiverKind::List => self.lower_list_method(recv, method, values, keywords, ret, location),
            ReceiverKind::Dict => self.lower_dict_method(recv, method, values, ret, location),
            ReceiverKind::Queue => self.lower_queue_method(recv, method, values, ret, location),
        }
    }

    fn method_arity(
        &mut self,
        method: &str,
        values: &[Lowered],
        min: usize,
        max: usize,
        location: &Option<Location>,
    ) -> Option<Lowered> {
        if values.len() < min || values.len() > max {
            let expected = if min == max { min.to_string() } else { format!("{} to {}", min, max) };
            return Some(self.diag_value(
                "Call",
                format!("{}() takes {} arguments, {} given", method, expected, values.len()),
                location,
            ));
        }
        None
    }

    // ------- Strings -------

    fn lower_str_method(
        &mut self,
        recv: Lowered,
        method: &str,
        values: Vec<Lowered>,
        ret: InferredType,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let alloc = self.alloc();
        let rt = self.rt();
        let g = self.guarder();
        let (min, max) = match method {
            "replace" => (2, 2),
            "startswith" | "endswith" | "find" | "rfind" | "index" | "count" => (1, 1),
            "join" | "zfill" => (1, 1),
            "center" | "ljust" | "rjust" => (1, 2),
            "strip" | "lstrip" | "rstrip" | "split" | "rsplit" => (0, 1),
            _ => (0, 0),
        };
        if let Some(diag) = self.method_arity(method, &values, min, max, location) {
            return Ok(diag);
        }
        let mut parts = vec![recv];
        parts.extend(values);
        match method {
            "upper" | "lower" => {
                let helper = if method == "upper" { "allocUpperString" } else { "allocLowerString" };
                let code = self.with_temps(parts, |c| g.wrap(&format!("std.ascii.{}({}, {})", helper, alloc, c[0])));
                Ok(Lowered::new(code, ret).owned(Release::Free))
            }
            "strip" | "lstrip" | "rstrip" => {
                let trim = match method {
                    "strip" => "trim",
                    "lstrip" => "trimLeft",
                    _ => "trimRight",
                };
                let owned = parts[0].is_owned();
                let code = self.with_temps(parts, |c| {
                    let chars = c.get(1).cloned().unwrap_or_else(|| WHITESPACE.to_string());
                    let trimmed = format!("std.mem.{}(u8, {}, {})", trim, c[0], chars);
                    // the receiver temporary is released at the block end
                    if owned { g.wrap(&format!("{}.dupe(u8, {})", alloc, trimmed)) } else { trimmed }
                });
                let value = Lowered::new(code, ret);
                Ok(if owned { value.owned(Release::Free) } else { value })
            }
            "replace" => {
                let code = self.with_temps(parts, |c| {
                    g.wrap(&format!("std.mem.replaceOwned(u8, {}, {}, {}, {})", alloc, c[0], c[1], c[2]))
                });
                Ok(Lowered::new(code, ret).owned(Release::Free))
            }
            "split" | "rsplit" => {
                // pieces borrow from the receiver, so an owned receiver is
                // kept alive instead of bound to a temporary
                let recv = parts.remove(0);
                let rest = parts;
                let code = self.with_temps(rest, |c| match c.first() {
                    Some(sep) => g.wrap(&format!("{}.split({}, {}, {})", rt, alloc, recv.code, sep)),
                    None => g.wrap(&format!("{}.splitWhitespace({}, {})", rt, alloc, recv.code)),
                });
                Ok(Lowered::new(code, ret).owned(Release::Free))
            }
            "splitlines" => {
                let code = g.wrap(&format!("{}.splitLines({}, {})", rt, alloc, parts[0].code));
                Ok(Lowered::new(code, ret).owned(Release::Free))
            }
            "join" => {
                let growable = parts[1].is_growable();
                if !matches!(parts[1].ty, InferredType::List(_) | InferredType::Unknown) {
                    return Ok(self.diag_value("Call", format!("join() of a {} value", parts[1].ty), location));
                }
                let code = self.with_temps(parts, |c| {
                    g.wrap(&format!("std.mem.join({}, {}, {})", alloc, c[0], view(&c[1], growable)))
                });
                Ok(Lowered::new(code, ret).owned(Release::Free))
            }
            "startswith" | "endswith" => {
                let test = if method == "startswith" { "startsWith" } else { "endsWith" };
                let code = self.with_temps(parts, |c| format!("std.mem.{}(u8, {}, {})", test, c[0], c[1]));
                Ok(Lowered::new(code, ret))
            }
            "find" | "rfind" => {
                let code = self.with_temps(parts, |c| format!("{}.{}({}, {})", rt, method, c[0], c[1]));
                Ok(Lowered::new(code, ret))
            }
            "index" => {
                let code = self.with_temps(parts, |c| {
                    format!(
                        "@as(i64, @intCast(std.mem.indexOf(u8, {}, {}) orelse {}))",
                        c[0],
                        c[1],
                        g.fail_expr("error.ValueError")
                    )
                });
                Ok(Lowered::new(code, ret))
            }
            "count" => {
                let code = self.with_temps(parts, |c| format!("@as(i64, @intCast(std.mem.count(u8, {}, {})))", c[0], c[1]));
                Ok(Lowered::new(code, ret))
            }
            "isdigit" | "isalpha" | "isalnum" | "isspace" => {
                let class = match method {
                    "isdigit" => "isDigit",
                    "isalpha" => "isAlphabetic",
                    "isalnum" => "isAlphanumeric",
                    _ => "isWhitespace",
                };
                let label = self.fresh("__chars");
                let unit = self.unit();
                let code = self.with_temps(parts, |c| {
                    let stmts = vec![
                        format!("if ({}.len == 0) break :{} false;", c[0], label),
                        format!("for ({}) |__c| {{", c[0]),
                        format!("{}if (!std.ascii.{}(__c)) break :{} false;", unit, class, label),
                        "}".to_string(),
                    ];
                    block_expr(&label, &stmts, "true", unit)
                });
                Ok(Lowered::new(code, ret))
            }
            "isupper" | "islower" => {
                let helper = if method == "isupper" { "isUpper" } else { "isLower" };
                let code = self.with_temps(parts, |c| format!("{}.{}({})", rt, helper, c[0]));
                Ok(Lowered::new(code, ret))
            }
            _ => {
                // title, capitalize, swapcase and the padding family
                let helper = match method {
                    "title" => "title",
                    "capitalize" => "capitalize",
                    "swapcase" => "swapCase",
                    "center" => "center",
                    "ljust" => "ljust",
                    "rjust" => "rjust",
                    _ => "zfill",
                };
                let padded = matches!(method, "center" | "ljust" | "rjust");
                let code = self.with_temps(parts, |c| {
                    let mut all = vec![alloc.to_string(), c[0].clone()];
                    all.extend(c[1..].iter().cloned());
                    if padded && c.len() == 2 {
                        all.push("' '".to_string());
                    } else if padded {
                        all[3] = format!("{}[0]", c[2]);
                    }
                    g.wrap(&format!("{}.{}({})", rt, helper, all.join(", ")))
                });
                Ok(Lowered::new(code, ret).owned(Release::Free))
            }
        }
    }

    // ------- Lists -------

    fn lower_list_method(
        &mut self,
        recv: Lowered,
        method: &str,
        values: Vec<Lowered>,
        keywords: &[Keyword],
        ret: InferredType,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let alloc = self.alloc();
        let rt = self.rt();
        let g = self.guarder();
        let elem = recv.ty.element();
        let elem_text = value_type(&elem, rt);
        let growable = recv.is_growable();
        let (min, max) = match method {
            "append" | "extend" | "remove" | "index" | "count" => (1, 1),
            "insert" => (2, 2),
            "pop" => (0, 1),
            _ => (0, 0),
        };
        if let Some(diag) = self.method_arity(method, &values, min, max, location) {
            return Ok(diag);
        }
        let mutating = matches!(method, "append" | "extend" | "insert" | "pop" | "remove" | "clear" | "sort" | "reverse");
        if mutating && !growable {
            return Ok(self.diag_value(
                "Call",
                format!("{}() on a list that is never grown in place", method),
                location,
            ));
        }
        let items = view(&recv.code, growable);
        let list = recv.code.clone();
        match method {
            "append" => {
                let value = coerce_to(&values[0], &elem);
                let code = self.with_temps(values, |c| g.wrap(&format!("{}.append({})", list, value.apply(&c[0]))));
                Ok(Lowered::new(code, ret))
            }
            "extend" => {
                let other_growable = values[0].is_growable();
                let code = self.with_temps(values, |c| {
                    g.wrap(&format!("{}.appendSlice({})", list, view(&c[0], other_growable)))
                });
                Ok(Lowered::new(code, ret))
            }
            "insert" => {
                let value = coerce_to(&values[1], &elem);
                let code = self.with_temps(values, |c| {
                    g.wrap(&format!(
                        "{}.insert({}.insertIndex({}.items.len, {}), {})",
                        list,
                        rt,
                        list,
                        as_int(&c[0], &InferredType::Int),
                        value.apply(&c[1])
                    ))
                });
                Ok(Lowered::new(code, ret))
            }
            "pop" => {
                let code = match values.first() {
                    None => format!("({}.pop() orelse {})", list, g.fail_expr("error.IndexError")),
                    Some(_) => self.with_temps(values, |c| {
                        format!("{}.orderedRemove({}.index({}.items.len, {}))", list, rt, list, c[0])
                    }),
                };
                Ok(Lowered::new(code, ret))
            }
            "remove" => {
                let code = self.with_temps(values, |c| {
                    g.wrap(&format!("{}.removeValue({}, &{}, {})", rt, elem_text, list, c[0]))
                });
                Ok(Lowered::new(code, ret))
            }
            "clear" => Ok(Lowered::new(format!("{}.clearRetainingCapacity()", list), ret)),
            "sort" => {
                let mut reverse = false;
                if let Some(r) = literal_keyword(keywords, "reverse") {
                    match bool_literal(r) {
                        Some(b) => reverse = b,
                        None => return Ok(self.diag_value("Call", "sort() reverse= must be a literal bool".into(), location)),
                    }
                }
                if keywords.iter().any(|k| !matches!(k.arg.as_deref(), Some("reverse") | Some("key"))) {
                    return Ok(self.diag_value("Call", "sort() accepts only key= and reverse=".into(), location));
                }
                let code = match literal_keyword(keywords, "key") {
                    Some(k) => {
                        let key = self.lower_key_function(k, &elem)?;
                        g.wrap(&format!("{}.sortByKey({}, {}, {}, {}, {})", rt, elem_text, alloc, items, key.code, reverse))
                    }
                    None => format!("std.mem.sort({}, {}, {{}}, {})", elem_text, items, sort_comparator(&elem, reverse, rt)),
                };
                Ok(Lowered::new(code, ret))
            }
            "reverse" => Ok(Lowered::new(format!("std.mem.reverse({}, {})", elem_text, items), ret)),
            "index" => {
                let code = self.with_temps(values, |c| {
                    format!(
                        "@as(i64, @intCast({}.indexOf({}, {}, {}) orelse {}))",
                        rt,
                        elem_text,
                        items,
                        c[0],
                        g.fail_expr("error.ValueError")
                    )
                });
                Ok(Lowered::new(code, ret))
            }
            "count" => {
                let code = self.with_temps(values, |c| match &elem {
                    InferredType::Int | InferredType::Float | InferredType::Bool => {
                        format!("@as(i64, @intCast(std.mem.count({}, {}, &.{{{}}})))", elem_text, items, c[0])
                    }
                    _ => format!("{}.count({}, {}, {})", rt, elem_text, items, c[0]),
                });
                Ok(Lowered::new(code, ret))
            }
            _ => {
                // copy
                let code = g.wrap(&format!("{}.dupe({}, {})", alloc, elem_text, items));
                Ok(Lowered::new(code, InferredType::list_of(elem)).owned(Release::Free))
            }
        }
    }

    // ------- Dicts -------

    fn lower_dict_method(
        &mut self,
        recv: Lowered,
        method: &str,
        values: Vec<Lowered>,
        ret: InferredType,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let alloc = self.alloc();
        let rt = self.rt();
        let g = self.guarder();
        let (key_ty, val_ty) = match &recv.ty {
            InferredType::Dict(k, v) => ((**k).clone(), (**v).clone()),
            _ => (InferredType::Unknown, InferredType::Unknown),
        };
        let (min, max) = match method {
            "get" | "pop" => (1, 2),
            "setdefault" => (2, 2),
            "update" => (1, 1),
            _ => (0, 0),
        };
        if let Some(diag) = self.method_arity(method, &values, min, max, location) {
            return Ok(diag);
        }
        let map = recv.code.clone();
        let key_text = value_type(&key_ty, rt);
        let val_text = value_type(&val_ty, rt);
        match method {
            "get" => {
                let default = values.get(1).map(|d| coerce_to(d, &val_ty));
                let code = self.with_temps(values, |c| match &default {
                    Some(coercion) => format!("({}.get({}) orelse {})", map, c[0], coercion.apply(&c[1])),
                    None => format!("{}.get({})", map, c[0]),
                });
                Ok(Lowered::new(code, ret))
            }
            "keys" | "values" | "items" => {
                let helper = match method {
                    "keys" => format!("collectKeys({}", key_text),
                    "values" => format!("collectValues({}", val_text),
                    _ => format!("collectItems({}, {}", key_text, val_text),
                };
                let code = g.wrap(&format!("{}.{}, {}, &{})", rt, helper, alloc, map));
                Ok(Lowered::new(code, ret).owned(Release::Free))
            }
            "pop" => {
                let default = values.get(1).map(|d| coerce_to(d, &val_ty));
                let code = self.with_temps(values, |c| match &default {
                    Some(coercion) => format!(
                        "(if ({}.fetchRemove({})) |__kv| __kv.value else {})",
                        map,
                        c[0],
                        coercion.apply(&c[1])
                    ),
                    None => format!("({}.fetchRemove({}) orelse {}).value", map, c[0], g.fail_expr("error.KeyError")),
                });
                Ok(Lowered::new(code, ret))
            }
            "setdefault" => {
                let value = coerce_to(&values[1], &val_ty);
                let code = self.with_temps(values, |c| {
                    format!("({}).value_ptr.*", g.wrap(&format!("{}.getOrPutValue({}, {})", map, c[0], value.apply(&c[1]))))
                });
                Ok(Lowered::new(code, ret))
            }
            "update" => {
                let code = self.with_temps(values, |c| g.wrap(&format!("{}.updateMap(&{}, &{})", rt, map, c[0])));
                Ok(Lowered::new(code, ret))
            }
            "clear" => Ok(Lowered::new(format!("{}.clearRetainingCapacity()", map), ret)),
            _ => {
                // copy
                let code = g.wrap(&format!("{}.clone()", map));
                Ok(Lowered::new(code, recv.ty.clone()).with_repr(ValueRepr::Map).owned(Release::Deinit))
            }
        }
    }

    // ------- Queues -------

    fn lower_queue_method(
        &mut self,
        recv: Lowered,
        method: &str,
        values: Vec<Lowered>,
        ret: InferredType,
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let rt = self.rt();
        let g = self.guarder();
        let max = if matches!(method, "put" | "put_nowait") { 1 } else { 0 };
        if let Some(diag) = self.method_arity(method, &values, max, max, location) {
            return Ok(diag);
        }
        let queue = recv.code.clone();
        let code = match method {
            "put" | "put_nowait" => {
                let blocking = method == "put";
                let call = if blocking { "put" } else { "putNowait" };
                self.with_temps(values, |c| g.wrap(&format!("{}.{}({}.toValue({}))", queue, call, rt, c[0])))
            }
            "get" => g.wrap(&format!("{}.get()", queue)),
            "get_nowait" => g.wrap(&format!("{}.getNowait()", queue)),
            "empty" => format!("{}.empty()", queue),
            "full" => format!("{}.full()", queue),
            "qsize" => format!("@as(i64, @intCast({}.size()))", queue),
            _ => format!("{}.taskDone()", queue),
        };
        Ok(Lowered::new(code, ret))
    }
}

/// Coercion of an argument into a container slot of type `slot`.
fn coerce_to(value: &Lowered, slot: &InferredType) -> Coercion {
    match (&value.ty, slot) {
        (InferredType::Int, InferredType::Float) => Coercion::IntToFloat,
        _ => Coercion::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receivers_classify_by_type() {
        assert_eq!(ReceiverKind::of(&InferredType::String), Some(ReceiverKind::Str));
        assert_eq!(ReceiverKind::of(&InferredType::list_of(InferredType::Int)), Some(ReceiverKind::List));
        assert_eq!(ReceiverKind::of(&InferredType::Queue), Some(ReceiverKind::Queue));
        assert_eq!(ReceiverKind::of(&InferredType::Int), None);
    }

    #[test]
    fn method_tables_are_per_kind() {
        assert!(supports(ReceiverKind::Str, "split"));
        assert!(supports(ReceiverKind::List, "append"));
        assert!(!supports(ReceiverKind::Str, "append"));
        assert!(supports(ReceiverKind::Dict, "setdefault"));
        assert!(!supports(ReceiverKind::Dict, "append"));
        assert!(supports(ReceiverKind::Queue, "task_done"));
    }
}
