//! file: core/src/lower/builtins.rs
//! description: lowering of calls to built-in functions.
//!
use std::collections::HashMap;

use lazy_static::lazy_static;
use log::{debug, trace};

use super::context::Session;
use super::err::LoweringError;
use super::expr::{as_float, length_of, view};
use super::ownership::{Lowered, Release};
use super::strings::{escape_format, ident, quoted};
use super::types::{python_type_name, value_type};
use super::writer::block_expr;
use crate::analyzers::{InferredType, ValueRepr};
use crate::ast::{BinOperator, Constant, Expr, ExprKind, Keyword, parse_eval_source};
use crate::bytecode::{compile_expr, serialize};
use crate::location::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Print,
    Len,
    Str,
    Repr,
    Int,
    Float,
    Bool,
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Range,
    List,
    Dict,
    IsInstance,
    HasAttr,
    GetAttr,
    SetAttr,
    Input,
    Ord,
    Chr,
    Type,
    Any,
    All,
    Round,
    Pow,
    /// hex/bin/oct
    Radix(&'static str),
    /// eval/exec/compile
    Eval(&'static str),
    /// Recognized names lowered to a deferred diagnostic.
    Rejected(&'static str),
}

lazy_static! {
    static ref BUILTINS: HashMap<&'static str, Builtin> = {
        let mut m = HashMap::new();
        m.insert("print", Builtin::Print);
        m.insert("len", Builtin::Len);
        m.insert("str", Builtin::Str);
        m.insert("repr", Builtin::Repr);
        m.insert("int", Builtin::Int);
        m.insert("float", Builtin::Float);
        m.insert("bool", Builtin::Bool);
        m.insert("abs", Builtin::Abs);
        m.insert("min", Builtin::Min);
        m.insert("max", Builtin::Max);
        m.insert("sum", Builtin::Sum);
        m.insert("sorted", Builtin::Sorted);
        m.insert("reversed", Builtin::Reversed);
        m.insert("range", Builtin::Range);
        m.insert("list", Builtin::List);
        m.insert("dict", Builtin::Dict);
        m.insert("isinstance", Builtin::IsInstance);
        m.insert("hasattr", Builtin::HasAttr);
        m.insert("getattr", Builtin::GetAttr);
        m.insert("setattr", Builtin::SetAttr);
        m.insert("input", Builtin::Input);
        m.insert("ord", Builtin::Ord);
        m.insert("chr", Builtin::Chr);
        m.insert("type", Builtin::Type);
        m.insert("any", Builtin::Any);
        m.insert("all", Builtin::All);
        m.insert("round", Builtin::Round);
        m.insert("pow", Builtin::Pow);
        m.insert("hex", Builtin::Radix("hex"));
        m.insert("bin", Builtin::Radix("bin"));
        m.insert("oct", Builtin::Radix("oct"));
        m.insert("eval", Builtin::Eval("eval"));
        m.insert("exec", Builtin::Eval("exec"));
        m.insert("compile", Builtin::Eval("compile"));
        m.insert("enumerate", Builtin::Rejected("enumerate() is only supported as a for-loop iterable"));
        m.insert("zip", Builtin::Rejected("zip() is only supported as a for-loop iterable"));
        m.insert("map", Builtin::Rejected("map() is not supported; use a list comprehension"));
        m.insert("filter", Builtin::Rejected("filter() is not supported; use a list comprehension with a condition"));
        m.insert("iter", Builtin::Rejected("iterator objects are not supported"));
        m.insert("next", Builtin::Rejected("iterator objects are not supported"));
        m.insert("__import__", Builtin::Rejected("dynamic module import is not supported"));
        m.insert("open", Builtin::Rejected("file objects are not supported"));
        m.insert("set", Builtin::Rejected("set values are not supported"));
        m.insert("frozenset", Builtin::Rejected("set values are not supported"));
        m.insert("globals", Builtin::Rejected("runtime reflection is not supported"));
        m.insert("locals", Builtin::Rejected("runtime reflection is not supported"));
        m.insert("vars", Builtin::Rejected("runtime reflection is not supported"));
        m.insert("super", Builtin::Rejected("super() is only supported as a method call receiver"));
        m
    };
}

/// Whether `name` is handled by the built-in table.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains_key(name)
}

/// Parsed `sep=`/`end=` style keyword: literal strings and bools only.
pub(crate) fn literal_keyword<'k>(keywords: &'k [Keyword], name: &str) -> Option<&'k Expr> {
    keywords.iter().find(|k| k.arg.as_deref() == Some(name)).map(|k| &k.value)
}

pub(crate) fn bool_literal(expr: &Expr) -> Option<bool> {
    match &expr.kind {
        ExprKind::Constant { value: Constant::Bool(b) } => Some(*b),
        ExprKind::Name { id } if id == "True" => Some(true),
        ExprKind::Name { id } if id == "False" => Some(false),
        _ => None,
    }
}

/// Comparator argument of `std.mem.sort` for elements of type `elem`.
pub(crate) fn sort_comparator(elem: &InferredType, reverse: bool, rt: &str) -> String {
    let elem_text = value_type(elem, rt);
    match (elem, reverse) {
        (InferredType::Int | InferredType::Float, false) => format!("comptime std.sort.asc({})", elem_text),
        (InferredType::Int | InferredType::Float, true) => format!("comptime std.sort.desc({})", elem_text),
        (InferredType::String, false) => format!("{}.lessThanStr", rt),
        (InferredType::String, true) => format!("{}.greaterThanStr", rt),
        (_, false) => format!("{}.lessThan({})", rt, elem_text),
        (_, true) => format!("{}.greaterThan({})", rt, elem_text),
    }
}

/// Whether a value of type `ty` is an instance of the named type.
/// `None` when only the runtime can tell.
fn type_matches(ty: &InferredType, type_name: &str, is_subclass: impl Fn(&str, &str) -> bool) -> Option<bool> {
    let matched = match (ty, type_name) {
        (InferredType::Unknown, _) | (InferredType::Optional(_), _) => return None,
        (InferredType::Int, "int") | (InferredType::Bool, "int") | (InferredType::Bool, "bool") => true,
        (InferredType::Float, "float") | (InferredType::String, "str") => true,
        (InferredType::List(_), "list") | (InferredType::Dict(..), "dict") | (InferredType::Tuple(_), "tuple") => true,
        (_, "object") => true,
        (InferredType::Instance(class), other) => is_subclass(class, other),
        _ => false,
    };
    Some(matched)
}

impl<'a> Session<'a> {
    pub(crate) fn lower_builtin(
        &mut self,
        name: &str,
        args: &[Expr],
        keywords: &[Keyword],
        location: &Option<Location>,
    ) -> Result<Lowered, LoweringError> {
        let Some(builtin) = BUILTINS.get(name).copied() else {
            return Ok(self.diag_value("Call", format!("{}() is not a built-in", name), location));
        };
        trace!("built-in {:?}", builtin);
        if !keywords.is_empty() && !matches!(builtin, Builtin::Print | Builtin::Sorted | Builtin::Dict | Builtin::Min | Builtin::Max) {
            return Ok(self.diag_value("Call", format!("{}() does not take keyword arguments here", name), location));
        }
        match builtin {
            Builtin::Print => self.lower_print(args, keywords, location),
            Builtin::Len => self.with_arity(name, args, 1, 1, location, |s| s.lower_len(&args[0], location)),
            Builtin::Str => match args.first() {
                None => Ok(Lowered::new(quoted(""), InferredType::String)),
                Some(arg) => self.lower_str(arg, false),
            },
            Builtin::Repr => self.with_arity(name, args, 1, 1, location, |s| s.lower_str(&args[0], true)),
            Builtin::Int => self.lower_int(args, location),
            Builtin::Float => match args.first() {
                None => Ok(Lowered::new("0.0".into(), InferredType::Float)),
                Some(arg) => self.lower_float(arg),
            },
            Builtin::Bool => match args.first() {
                None => Ok(Lowered::new("false".into(), InferredType::Bool)),
                Some(arg) => {
                    let value = self.lower_expr(arg)?;
                    Ok(Lowered::new(self.truth(value), InferredType::Bool))
                }
            },
            Builtin::Abs => self.with_arity(name, args, 1, 1, location, |s| s.lower_abs(&args[0])),
            Builtin::Min | Builtin::Max => {
                if !keywords.is_empty() {
                    return Ok(self.diag_value("Call", format!("{}() with key= or default= is not supported", name), location));
                }
                self.lower_min_max(name, args, location)
            }
            Builtin::Sum => self.with_arity(name, args, 1, 2, location, |s| s.lower_sum(args)),
            Builtin::Sorted => self.with_arity(name, args, 1, 1, location, |s| s.lower_sorted(&args[0], keywords, location)),
            Builtin::Reversed => self.with_arity(name, args, 1, 1, location, |s| s.lower_reversed(&args[0], location)),
            Builtin::Range => self.with_arity(name, args, 1, 3, location, |s| s.lower_range_value(args)),
            Builtin::List => self.lower_list_call(args, location),
            Builtin::Dict => self.lower_dict_call(args, keywords, location),
            Builtin::IsInstance => self.with_arity(name, args, 2, 2, location, |s| s.lower_isinstance(&args[0], &args[1], location)),
            Builtin::HasAttr => self.with_arity(name, args, 2, 2, location, |s| s.lower_hasattr(&args[0], &args[1], location)),
            Builtin::GetAttr => self.with_arity(name, args, 2, 3, location, |s| s.lower_getattr(args, location)),
            Builtin::SetAttr => self.with_arity(name, args, 3, 3, location, |s| s.lower_setattr(args, location)),
            Builtin::Input => self.with_arity(name, args, 0, 1, location, |s| s.lower_input(args)),
            Builtin::Ord => self.with_arity(name, args, 1, 1, location, |s| {
                let value = s.lower_expr(&args[0])?;
                let code = s.with_temps(vec![value], |c| format!("@as(i64, {}[0])", c[0]));
                Ok(Lowered::new(code, InferredType::Int))
            }),
            Builtin::Chr => self.with_arity(name, args, 1, 1, location, |s| {
                let value = s.lower_expr(&args[0])?;
                let code = s.guard(&format!("std.fmt.allocPrint({}, \"{{u}}\", .{{@as(u21, @intCast({}))}})", s.alloc(), value.code));
                Ok(Lowered::new(code, InferredType::String).owned(Release::Free))
            }),
            Builtin::Type => self.with_arity(name, args, 1, 1, location, |s| {
                let ty = s.infer(&args[0]);
                Ok(Lowered::new(quoted(&python_type_name(&ty)), InferredType::String))
            }),
            Builtin::Any | Builtin::All => self.with_arity(name, args, 1, 1, location, |s| s.lower_any_all(builtin == Builtin::Any, &args[0], location)),
            Builtin::Round => self.with_arity(name, args, 1, 2, location, |s| s.lower_round(args)),
            Builtin::Pow => self.with_arity(name, args, 2, 2, location, |s| {
                let synthesized = Expr::new(
                    ExprKind::BinOp { left: Box::new(args[0].clone()), op: BinOperator::Pow, right: Box::new(args[1].clone()) },
                    location.clone(),
                );
                s.lower_expr(&synthesized)
            }),
            Builtin::Radix(which) => self.with_arity(name, args, 1, 1, location, |s| {
                let value = s.lower_expr(&args[0])?;
                let code = s.guard(&format!("{}.{}({}, {})", s.rt(), which, s.alloc(), value.code));
                Ok(Lowered::new(code, InferredType::String).owned(Release::Free))
            }),
            Builtin::Eval(which) => self.lower_eval(which, args, location),
            Builtin::Rejected(message) => Ok(self.diag_value("Call", message.to_string(), location)),
        }
    }

    fn with_arity(
        &mut self,
        name: &str,
        args: &[Expr],
        min: usize,
        max: usize,
        location: &Option<Location>,
        f: impl FnOnce(&mut Self) -> Result<Lowered, LoweringError>,
    ) -> Result<Lowered, LoweringError> {
        if args.len() < min || args.len() > max {
            let expected = if min == max { min.to_string() } else { format!("{} to {}", min, max) };
            return Ok(self.diag_value(
                "Call",
                format!("{}() takes {} arguments, {} given", name, expected, args.len()),
                location,
            ));
        }
        f(self)
    }

    // ------- Output -------

    fn lower_print(&mut self, args: &[Expr], keywords: &[Keyword], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let mut sep = " ".to_string();
        let mut end = "\n".to_string();
        for kw in keywords {
            match kw.arg.as_deref() {
                Some("sep") | Some("end") => match kw.value.as_str_literal() {
                    Some(text) if kw.arg.as_deref() == Some("sep") => sep = text.to_string(),
                    Some(text) => end = text.to_string(),
                    None => {
                        return Ok(self.diag_value("Call", "print() separators must be string literals".into(), location));
                    }
                },
                Some("flush") => {}
                other => {
                    let name = other.unwrap_or("**");
                    return Ok(self.diag_value("Call", format!("print() keyword '{}' is not supported", name), location));
                }
            }
        }

        let mut fmt = String::new();
        let mut parts = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                fmt.push_str(&escape_format(&sep));
            }
            match &arg.kind {
                ExprKind::Constant { value: Constant::Str(s) } => fmt.push_str(&escape_format(s)),
                ExprKind::JoinedStr { values } => {
                    let (inner, values) = self.format_parts(values)?;
                    fmt.push_str(&inner);
                    parts.extend(values);
                }
                _ => {
                    let (field, value) = self.format_arg(arg, None)?;
                    fmt.push_str(&field);
                    parts.push(value);
                }
            }
        }
        fmt.push_str(&escape_format(&end));

        let g = self.guarder();
        let code = self.with_temps(parts, |c| {
            let tuple = if c.is_empty() { ".{}".to_string() } else { format!(".{{ {} }}", c.join(", ")) };
            g.wrap(&format!("std.io.getStdOut().writer().print(\"{}\", {})", fmt, tuple))
        });
        Ok(Lowered::new(code, InferredType::None))
    }

    // ------- Conversions -------

    fn lower_len(&mut self, arg: &Expr, location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(arg)?;
        if let InferredType::Instance(class) = &value.ty {
            if self.types.classes().resolve_method(class, "__len__").is_none() {
                return Ok(self.diag_value("Call", format!("{} does not define __len__", class), location));
            }
            let alloc = self.alloc();
            let g = self.guarder();
            let code = self.with_temps(vec![value], |c| g.wrap(&format!("{}.__len__({})", c[0], alloc)));
            return Ok(Lowered::new(code, InferredType::Int));
        }
        if matches!(value.ty, InferredType::Int | InferredType::Float | InferredType::Bool | InferredType::None) {
            return Ok(self.diag_value("Call", format!("object of type {} has no len()", value.ty), location));
        }
        let rt = self.rt();
        let (ty, repr) = (value.ty.clone(), value.repr.clone());
        let code = self.with_temps(vec![value], |c| format!("@as(i64, @intCast({}))", length_of(&c[0], &ty, &repr, rt)));
        Ok(Lowered::new(code, InferredType::Int))
    }

    /// `str(x)` and, with `quote`, `repr(x)`.
    fn lower_str(&mut self, arg: &Expr, quote: bool) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(arg)?;
        let alloc = self.alloc();
        let rt = self.rt();
        let g = self.guarder();
        let owned_string = |code: String| Lowered::new(code, InferredType::String).owned(Release::Free);
        match value.ty.clone() {
            InferredType::String if !quote => Ok(value),
            InferredType::String => {
                let code = self.with_temps(vec![value], |c| g.wrap(&format!("std.fmt.allocPrint({}, \"'{{s}}'\", .{{{}}})", alloc, c[0])));
                Ok(owned_string(code))
            }
            InferredType::Int | InferredType::Float => {
                let code = g.wrap(&format!("std.fmt.allocPrint({}, \"{{d}}\", .{{{}}})", alloc, value.code));
                Ok(owned_string(code))
            }
            InferredType::Bool => Ok(Lowered::new(format!("(if ({}) \"True\" else \"False\")", value.code), InferredType::String)),
            InferredType::None => Ok(Lowered::new(quoted("None"), InferredType::String)),
            InferredType::Instance(class) => {
                let hook = if quote { "__repr__" } else { "__str__" };
                let found = self
                    .types
                    .classes()
                    .resolve_method(&class, hook)
                    .or_else(|| self.types.classes().resolve_method(&class, "__repr__"))
                    .map(|(_, m)| m.name.clone());
                let code = match found {
                    Some(method) => self.with_temps(vec![value], |c| g.wrap(&format!("{}.{}({})", c[0], method, alloc))),
                    None => g.wrap(&format!("std.fmt.allocPrint({}, \"<{} object>\", .{{}})", alloc, class)),
                };
                Ok(owned_string(code))
            }
            _ => {
                let func = if quote { "repr" } else { "str" };
                let growable = value.is_growable();
                let code = self.with_temps(vec![value], |c| g.wrap(&format!("{}.{}({}, {})", rt, func, alloc, view(&c[0], growable))));
                Ok(owned_string(code))
            }
        }
    }

    fn lower_int(&mut self, args: &[Expr], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let Some(arg) = args.first() else {
            return Ok(Lowered::new("0".into(), InferredType::Int));
        };
        let base = match args.get(1) {
            None => 10,
            Some(b) => match b.as_int_literal() {
                Some(v) if (2..=36).contains(&v) || v == 0 => v,
                _ => return Ok(self.diag_value("Call", "int() base must be an integer literal".into(), location)),
            },
        };
        let value = self.lower_expr(arg)?;
        let g = self.guarder();
        let rt = self.rt();
        let code = match value.ty.clone() {
            InferredType::Int => value.code,
            InferredType::Bool => format!("@as(i64, @intFromBool({}))", value.code),
            InferredType::Float => format!("@as(i64, @intFromFloat(@trunc({})))", value.code),
            InferredType::String => self.with_temps(vec![value], |c| {
                g.wrap(&format!("std.fmt.parseInt(i64, std.mem.trim(u8, {}, \" \\t\\r\\n\"), {})", c[0], base))
            }),
            _ => self.with_temps(vec![value], |c| g.wrap(&format!("{}.toInt({})", rt, c[0]))),
        };
        Ok(Lowered::new(code, InferredType::Int))
    }

    fn lower_float(&mut self, arg: &Expr) -> Result<Lowered, LoweringError> {
        if let Some(text) = arg.as_str_literal() {
            let code = match text.trim().to_ascii_lowercase().as_str() {
                "inf" | "+inf" | "infinity" => Some("std.math.inf(f64)".to_string()),
                "-inf" | "-infinity" => Some("-std.math.inf(f64)".to_string()),
                "nan" => Some("std.math.nan(f64)".to_string()),
                _ => None,
            };
            if let Some(code) = code {
                return Ok(Lowered::new(code, InferredType::Float));
            }
        }
        let value = self.lower_expr(arg)?;
        let g = self.guarder();
        let rt = self.rt();
        let code = match value.ty.clone() {
            InferredType::Float => value.code,
            ty @ (InferredType::Int | InferredType::Bool) => as_float(&value.code, &ty),
            InferredType::String => self.with_temps(vec![value], |c| {
                g.wrap(&format!("std.fmt.parseFloat(f64, std.mem.trim(u8, {}, \" \\t\\r\\n\"))", c[0]))
            }),
            _ => self.with_temps(vec![value], |c| g.wrap(&format!("{}.toFloat({})", rt, c[0]))),
        };
        Ok(Lowered::new(code, InferredType::Float))
    }

    fn lower_abs(&mut self, arg: &Expr) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(arg)?;
        let lowered = match value.ty {
            InferredType::Int => Lowered::new(format!("@as(i64, @intCast(@abs({})))", value.code), InferredType::Int),
            InferredType::Bool => Lowered::new(format!("@as(i64, @intFromBool({}))", value.code), InferredType::Int),
            InferredType::Float => Lowered::new(format!("@abs({})", value.code), InferredType::Float),
            _ => Lowered::new(format!("{}.abs({})", self.rt(), value.code), InferredType::Unknown),
        };
        Ok(lowered)
    }

    fn lower_round(&mut self, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(&args[0])?;
        let rt = self.rt();
        let ty = value.ty.clone();
        match (args.get(1), &ty) {
            (None, InferredType::Int) => Ok(value),
            (None, InferredType::Float) => Ok(Lowered::new(format!("{}.roundHalfEven({})", rt, value.code), InferredType::Int)),
            (Some(digits), InferredType::Float | InferredType::Int) => {
                let digits = self.lower_expr(digits)?;
                let code = format!("{}.roundTo({}, {})", rt, as_float(&value.code, &value.ty), digits.code);
                Ok(Lowered::new(code, InferredType::Float))
            }
            _ => Ok(Lowered::new(format!("{}.round({})", rt, value.code), InferredType::Unknown)),
        }
    }

    // ------- Aggregates -------

    fn lower_min_max(&mut self, name: &str, args: &[Expr], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let is_min = name == "min";
        if args.is_empty() {
            return Ok(self.diag_value("Call", format!("{}() expects at least one argument", name), location));
        }
        if args.len() == 1 {
            let value = self.lower_expr(&args[0])?;
            let elem = value.ty.element();
            if !matches!(value.ty, InferredType::List(_)) || !elem.is_numeric() || elem == InferredType::Bool {
                return Ok(self.diag_value("Call", format!("{}() of a {} value is not supported", name, value.ty), location));
            }
            let elem_text = value_type(&elem, self.rt());
            let g = self.guarder();
            let growable = value.is_growable();
            let code = self.with_temps(vec![value], |c| {
                let items = view(&c[0], growable);
                format!(
                    "(if ({}.len == 0) {} else std.mem.{}({}, {}))",
                    items,
                    g.fail_expr("error.ValueError"),
                    name,
                    elem_text,
                    items
                )
            });
            return Ok(Lowered::new(code, elem));
        }

        let mut parts = Vec::with_capacity(args.len());
        for a in args {
            parts.push(self.lower_expr(a)?);
        }
        if parts.iter().all(|p| p.ty == InferredType::String) && parts.len() == 2 {
            let wanted = if is_min { ".lt" } else { ".gt" };
            let code = self.with_temps(parts, |c| {
                format!("(if (std.mem.order(u8, {1}, {0}) == {2}) {1} else {0})", c[0], c[1], wanted)
            });
            return Ok(Lowered::new(code, InferredType::String));
        }
        if !parts.iter().all(|p| p.ty.is_numeric()) {
            return Ok(self.diag_value("Call", format!("{}() of mixed or non-numeric values is not supported", name), location));
        }
        let float = parts.iter().any(|p| p.ty == InferredType::Float);
        let ty = if float { InferredType::Float } else { InferredType::Int };
        let codes: Vec<String> = parts
            .iter()
            .map(|p| if float { as_float(&p.code, &p.ty) } else { super::expr::as_int(&p.code, &p.ty) })
            .collect();
        let builtin = if is_min { "@min" } else { "@max" };
        Ok(Lowered::new(format!("{}({})", builtin, codes.join(", ")), ty))
    }

    fn lower_sum(&mut self, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(&args[0])?;
        let elem = value.ty.element();
        let start = match args.get(1) {
            Some(s) => Some(self.lower_expr(s)?),
            None => None,
        };
        if !matches!(value.ty, InferredType::List(_)) || !elem.is_numeric() {
            let rt = self.rt();
            let g = self.guarder();
            let code = self.with_temps(vec![value], |c| g.wrap(&format!("{}.sum({})", rt, c[0])));
            return Ok(Lowered::new(code, InferredType::Unknown));
        }
        let float = elem == InferredType::Float || start.as_ref().is_some_and(|s| s.ty == InferredType::Float);
        let total_ty = if float { InferredType::Float } else { InferredType::Int };
        let init = match &start {
            Some(s) if float => as_float(&s.code, &s.ty),
            Some(s) => s.code.clone(),
            None if float => "0.0".to_string(),
            None => "0".to_string(),
        };
        let item = match (&elem, float) {
            (InferredType::Bool, _) => "@as(i64, @intFromBool(__v))".to_string(),
            (InferredType::Int, true) => "@as(f64, @floatFromInt(__v))".to_string(),
            _ => "__v".to_string(),
        };
        let label = self.fresh("__sum");
        let unit = self.unit();
        let total_text = value_type(&total_ty, self.rt());
        let growable = value.is_growable();
        let code = self.with_temps(vec![value], |c| {
            let stmts = vec![
                format!("var __total: {} = {};", total_text, init),
                format!("for ({}) |__v| __total += {};", view(&c[0], growable), item),
            ];
            block_expr(&label, &stmts, "__total", unit)
        });
        Ok(Lowered::new(code, total_ty))
    }

    fn lower_sorted(&mut self, arg: &Expr, keywords: &[Keyword], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let mut reverse = false;
        if let Some(r) = literal_keyword(keywords, "reverse") {
            match bool_literal(r) {
                Some(b) => reverse = b,
                None => return Ok(self.diag_value("Call", "sorted() reverse= must be a literal bool".into(), location)),
            }
        }
        if keywords.iter().any(|k| !matches!(k.arg.as_deref(), Some("reverse") | Some("key"))) {
            return Ok(self.diag_value("Call", "sorted() accepts only key= and reverse=".into(), location));
        }
        let value = self.lower_expr(arg)?;
        let InferredType::List(elem) = value.ty.clone() else {
            return Ok(self.diag_value("Call", format!("sorted() of a {} value is not supported", value.ty), location));
        };
        let elem = *elem;
        let rt = self.rt();
        let alloc = self.alloc();
        let elem_text = value_type(&elem, rt);
        let key = match literal_keyword(keywords, "key") {
            Some(k) => Some(self.lower_key_function(k, &elem)?),
            None => None,
        };
        let g = self.guarder();
        let sort = match key {
            Some(key) => g.wrap(&format!("{}.sortByKey({}, {}, __out, {}, {})", rt, elem_text, alloc, key.code, reverse)),
            None => format!("std.mem.sort({}, __out, {{}}, {})", elem_text, sort_comparator(&elem, reverse, rt)),
        };
        let label = self.fresh("__sorted");
        let unit = self.unit();
        let growable = value.is_growable();
        let code = self.with_temps(vec![value], |c| {
            let stmts = vec![
                format!("const __out = {};", g.wrap(&format!("{}.dupe({}, {})", alloc, elem_text, view(&c[0], growable)))),
                format!("errdefer {}.free(__out);", alloc),
                format!("{};", sort),
            ];
            block_expr(&label, &stmts, "__out", unit)
        });
        Ok(Lowered::new(code, InferredType::list_of(elem)).owned(Release::Free))
    }

    /// A `key=` argument: a lambda typed by the element, or a function.
    pub(crate) fn lower_key_function(&mut self, key: &Expr, elem: &InferredType) -> Result<Lowered, LoweringError> {
        match &key.kind {
            ExprKind::Lambda { args, body } => self.lower_lambda_typed(args, body, None, vec![elem.clone()], &key.location),
            _ => self.lower_expr(key),
        }
    }

    fn lower_reversed(&mut self, arg: &Expr, location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(arg)?;
        let elem = match &value.ty {
            InferredType::List(e) => (**e).clone(),
            InferredType::String => InferredType::String,
            other => return Ok(self.diag_value("Call", format!("reversed() of a {} value is not supported", other), location)),
        };
        let alloc = self.alloc();
        let is_string = value.ty == InferredType::String;
        let elem_text = if is_string { "u8".to_string() } else { value_type(&elem, self.rt()) };
        let g = self.guarder();
        let label = self.fresh("__reversed");
        let unit = self.unit();
        let growable = value.is_growable();
        let ty = value.ty.clone();
        let code = self.with_temps(vec![value], |c| {
            let stmts = vec![
                format!("const __out = {};", g.wrap(&format!("{}.dupe({}, {})", alloc, elem_text, view(&c[0], growable)))),
                format!("std.mem.reverse({}, __out);", elem_text),
            ];
            block_expr(&label, &stmts, "__out", unit)
        });
        Ok(Lowered::new(code, ty).owned(Release::Free))
    }

    /// `range(...)` used as a value rather than a loop iterable.
    pub(crate) fn lower_range_value(&mut self, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let mut bounds = Vec::with_capacity(3);
        for a in args {
            let v = self.lower_expr(a)?;
            bounds.push(super::expr::as_int(&v.code, &v.ty));
        }
        let (start, stop, step) = match bounds.as_slice() {
            [stop] => ("0".to_string(), stop.clone(), "1".to_string()),
            [start, stop] => (start.clone(), stop.clone(), "1".to_string()),
            [start, stop, step, ..] => (start.clone(), stop.clone(), step.clone()),
            [] => ("0".to_string(), "0".to_string(), "1".to_string()),
        };
        let code = self.guard(&format!("{}.range({}, {}, {}, {})", self.rt(), self.alloc(), start, stop, step));
        Ok(Lowered::new(code, InferredType::list_of(InferredType::Int)).owned(Release::Free))
    }

    fn lower_list_call(&mut self, args: &[Expr], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let Some(arg) = args.first() else {
            return self.lower_list_literal(&[], &InferredType::Unknown, false);
        };
        if args.len() > 1 {
            return Ok(self.diag_value("Call", "list() takes at most 1 argument".into(), location));
        }
        if let ExprKind::Call { func, args: inner, .. } = &arg.kind {
            if func.as_name() == Some("range") && !self.scopes.is_declared("range") {
                return self.lower_range_value(inner);
            }
        }
        if matches!(arg.kind, ExprKind::ListComp { .. } | ExprKind::GeneratorExp { .. }) {
            return self.lower_expr(arg);
        }
        let value = self.lower_expr(arg)?;
        let alloc = self.alloc();
        let rt = self.rt();
        let g = self.guarder();
        match value.ty.clone() {
            InferredType::List(elem) => {
                let elem_text = value_type(&elem, rt);
                let growable = value.is_growable();
                let code = self.with_temps(vec![value], |c| g.wrap(&format!("{}.dupe({}, {})", alloc, elem_text, view(&c[0], growable))));
                Ok(Lowered::new(code, InferredType::List(elem)).owned(Release::Free))
            }
            InferredType::String => {
                let code = self.with_temps(vec![value], |c| g.wrap(&format!("{}.chars({}, {})", rt, alloc, c[0])));
                Ok(Lowered::new(code, InferredType::list_of(InferredType::String)).owned(Release::Free))
            }
            InferredType::Dict(key, _) => {
                let key_text = value_type(&key, rt);
                let code = self.with_temps(vec![value], |c| {
                    g.wrap(&format!("{}.collectKeys({}, {}, &{})", rt, key_text, alloc, c[0]))
                });
                Ok(Lowered::new(code, InferredType::List(key)).owned(Release::Free))
            }
            other => Ok(self.diag_value("Call", format!("list() of a {} value is not supported", other), location)),
        }
    }

    fn lower_dict_call(&mut self, args: &[Expr], keywords: &[Keyword], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        if args.is_empty() {
            let keys: Vec<Option<Expr>> = keywords
                .iter()
                .map(|k| k.arg.as_ref().map(|a| Expr::new(ExprKind::Constant { value: Constant::Str(a.clone()) }, None)))
                .collect();
            let values: Vec<Expr> = keywords.iter().map(|k| k.value.clone()).collect();
            return self.lower_dict_literal(&keys, &values, &InferredType::Unknown, location);
        }
        if args.len() > 1 || !keywords.is_empty() {
            return Ok(self.diag_value("Call", "dict() with several sources is not supported".into(), location));
        }
        let value = self.lower_expr(&args[0])?;
        if !matches!(value.ty, InferredType::Dict(..)) {
            return Ok(self.diag_value("Call", format!("dict() of a {} value is not supported", value.ty), location));
        }
        let ty = value.ty.clone();
        let code = self.guard(&format!("{}.clone()", value.code));
        Ok(Lowered::new(code, ty).with_repr(ValueRepr::Map).owned(Release::Deinit))
    }

    fn lower_any_all(&mut self, any: bool, arg: &Expr, location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let value = self.lower_expr(arg)?;
        let InferredType::List(elem) = value.ty.clone() else {
            let func = if any { "any" } else { "all" };
            if value.ty.is_unknown() {
                let code = format!("{}.{}({})", self.rt(), func, value.code);
                return Ok(Lowered::new(code, InferredType::Bool));
            }
            return Ok(self.diag_value("Call", format!("{}() of a {} value is not supported", func, value.ty), location));
        };
        let test = self.truth(Lowered::new("__v".into(), (*elem).clone()));
        let label = self.fresh(if any { "__any" } else { "__all" });
        let unit = self.unit();
        let growable = value.is_growable();
        let code = self.with_temps(vec![value], |c| {
            let (cond, hit, miss) = if any { (test.clone(), "true", "false") } else { (format!("!{}", test), "false", "true") };
            let stmts = vec![format!(
                "for ({}) |__v| {{\n{}if ({}) break :{} {};\n}}",
                view(&c[0], growable),
                unit,
                cond,
                label,
                hit
            )];
            block_expr(&label, &stmts, miss, unit)
        });
        Ok(Lowered::new(code, InferredType::Bool))
    }

    // ------- Introspection -------

    fn lower_isinstance(&mut self, obj: &Expr, types: &Expr, location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let names: Vec<String> = match &types.kind {
            ExprKind::Name { id } => vec![id.clone()],
            ExprKind::Tuple { elts } => match elts.iter().map(|e| e.as_name().map(str::to_string)).collect::<Option<Vec<_>>>() {
                Some(n) => n,
                None => return Ok(self.diag_value("Call", "isinstance() needs type names".into(), location)),
            },
            _ => return Ok(self.diag_value("Call", "isinstance() needs type names".into(), location)),
        };
        let ty = self.infer(obj);
        let classes = self.types.classes();
        let results: Vec<Option<bool>> =
            names.iter().map(|n| type_matches(&ty, n, |c, a| classes.is_subclass(c, a))).collect();
        if results.iter().any(|r| *r == Some(true)) {
            return Ok(Lowered::new("true".into(), InferredType::Bool));
        }
        if results.iter().all(Option::is_some) {
            return Ok(Lowered::new("false".into(), InferredType::Bool));
        }
        let value = self.lower_expr(obj)?;
        let rt = self.rt();
        let checks: Vec<String> = names.iter().map(|n| format!("{}.isInstance({}, {})", rt, value.code, quoted(n))).collect();
        Ok(Lowered::new(format!("({})", checks.join(" or ")), InferredType::Bool))
    }

    fn attribute_name(&mut self, arg: &Expr, func: &str, location: &Option<Location>) -> Result<String, Lowered> {
        match arg.as_str_literal() {
            Some(name) => Ok(name.to_string()),
            None => Err(self.diag_value("Call", format!("{}() needs a string literal attribute name", func), location)),
        }
    }

    fn lower_hasattr(&mut self, obj: &Expr, attr: &Expr, location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let name = match self.attribute_name(attr, "hasattr", location) {
            Ok(n) => n,
            Err(diag) => return Ok(diag),
        };
        match self.infer(obj) {
            InferredType::Instance(class) => {
                let classes = self.types.classes();
                let found = classes.all_fields(&class).iter().any(|f| f.name == name)
                    || classes.resolve_method(&class, &name).is_some();
                Ok(Lowered::new(found.to_string(), InferredType::Bool))
            }
            InferredType::Unknown => {
                let value = self.lower_expr(obj)?;
                Ok(Lowered::new(format!("{}.hasAttr({}, {})", self.rt(), value.code, quoted(&name)), InferredType::Bool))
            }
            _ => Ok(Lowered::new("false".into(), InferredType::Bool)),
        }
    }

    fn lower_getattr(&mut self, args: &[Expr], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let name = match self.attribute_name(&args[1], "getattr", location) {
            Ok(n) => n,
            Err(diag) => return Ok(diag),
        };
        if let InferredType::Instance(class) = self.infer(&args[0]) {
            let classes = self.types.classes();
            let exists = classes.all_fields(&class).iter().any(|f| f.name == name);
            if !exists {
                return match args.get(2) {
                    Some(default) => self.lower_expr(default),
                    None => Ok(self.diag_value("Call", format!("{} has no attribute {}", class, name), location)),
                };
            }
        }
        let attribute = Expr::new(ExprKind::Attribute { value: Box::new(args[0].clone()), attr: name }, location.clone());
        self.lower_expr(&attribute)
    }

    fn lower_setattr(&mut self, args: &[Expr], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let name = match self.attribute_name(&args[1], "setattr", location) {
            Ok(n) => n,
            Err(diag) => return Ok(diag),
        };
        let InferredType::Instance(class) = self.infer(&args[0]) else {
            return Ok(self.diag_value("Call", "setattr() needs a class instance".into(), location));
        };
        let field_ty = self.types.field_type(&class, &name);
        if field_ty.is_unknown() {
            return Ok(self.diag_value("Call", format!("{} has no attribute {}", class, name), location));
        }
        let target = self.lower_expr(&args[0])?;
        let value = self.lower_expr(&args[2])?;
        let coerced = super::expr::Coercion::between(&value, &field_ty).apply(&value.code);
        debug!("setattr on {}.{}", class, name);
        Ok(Lowered::new(format!("{}.{} = {}", target.code, ident(&name), coerced), InferredType::None))
    }

    fn lower_input(&mut self, args: &[Expr]) -> Result<Lowered, LoweringError> {
        let prompt = match args.first() {
            Some(p) => self.lower_expr(p)?,
            None => Lowered::new(quoted(""), InferredType::String),
        };
        let rt = self.rt();
        let alloc = self.alloc();
        let g = self.guarder();
        let code = self.with_temps(vec![prompt], |c| g.wrap(&format!("{}.input({}, {})", rt, alloc, c[0])));
        Ok(Lowered::new(code, InferredType::String).owned(Release::Free))
    }

    // ------- eval/exec/compile -------

    /// A literal source in the bytecode subset is compiled now and
    /// embedded as a byte array for the runtime evaluator.
    fn lower_eval(&mut self, which: &str, args: &[Expr], location: &Option<Location>) -> Result<Lowered, LoweringError> {
        let Some(source) = args.first().and_then(|a| a.as_str_literal()) else {
            return Ok(self.diag_value(
                "Call",
                format!("{}() is only supported on a string literal", which),
                location,
            ));
        };
        let file = format!("<{}>", which);
        let expr = match parse_eval_source(source.trim(), &file) {
            Ok(expr) => expr,
            Err(e) => return Ok(self.diag_value("Call", format!("{}() source rejected: {}", which, e), location)),
        };
        let program = match compile_expr(&expr) {
            Ok(program) => program,
            Err(e) => return Ok(self.diag_value("Call", format!("{}() source rejected: {}", which, e), location)),
        };
        let bytes = serialize(&program);
        let literal = format!(
            "&[_]u8{{ {} }}",
            bytes.iter().map(|b| format!("0x{:02x}", b)).collect::<Vec<_>>().join(", ")
        );
        debug!("embedded {} bytes of bytecode for {}()", bytes.len(), which);
        match which {
            "compile" => Ok(Lowered::new(format!("@as([]const u8, {})", literal), InferredType::Unknown)),
            "exec" => {
                let code = self.guard(&format!("{}.execBytecode({}, {})", self.rt(), self.alloc(), literal));
                Ok(Lowered::new(code, InferredType::None))
            }
            _ => {
                let code = self.guard(&format!("{}.evalBytecode({}, {})", self.rt(), self.alloc(), literal));
                Ok(Lowered::new(code, InferredType::Unknown))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isinstance_folds_known_types() {
        let never = |_: &str, _: &str| false;
        assert_eq!(type_matches(&InferredType::Bool, "int", never), Some(true));
        assert_eq!(type_matches(&InferredType::String, "int", never), Some(false));
        assert_eq!(type_matches(&InferredType::Unknown, "int", never), None);
        let ancestors = |c: &str, a: &str| c == "Dog" && a == "Animal";
        assert_eq!(type_matches(&InferredType::Instance("Dog".into()), "Animal", ancestors), Some(true));
    }

    #[test]
    fn table_knows_rejected_names() {
        assert!(is_builtin("enumerate"));
        assert!(is_builtin("eval"));
        assert!(!is_builtin("frobnicate"));
    }
}
