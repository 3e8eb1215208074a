//! file: core/src/lower/types.rs
//! description: mapping from inferred types to target type text.
//!
use crate::analyzers::{InferredType, ValueRepr};

/// Target type of a value with the given representation. `rt` is the
/// runtime import name.
pub fn zig_type(ty: &InferredType, repr: &ValueRepr, rt: &str) -> String {
    match ty {
        InferredType::Int => "i64".to_string(),
        InferredType::Float => "f64".to_string(),
        InferredType::Bool => "bool".to_string(),
        InferredType::String => "[]const u8".to_string(),
        InferredType::List(elem) => {
            let elem = value_type(elem, rt);
            if *repr == ValueRepr::Growable {
                format!("std.ArrayList({})", elem)
            } else {
                format!("[]const {}", elem)
            }
        }
        InferredType::Dict(key, value) => match **key {
            InferredType::String | InferredType::Unknown => format!("std.StringHashMap({})", value_type(value, rt)),
            _ => format!("std.AutoHashMap({}, {})", value_type(key, rt), value_type(value, rt)),
        },
        InferredType::Tuple(items) => {
            let parts: Vec<String> = items.iter().map(|t| value_type(t, rt)).collect();
            format!("struct {{ {} }}", parts.join(", "))
        }
        InferredType::Optional(inner) => format!("?{}", value_type(inner, rt)),
        InferredType::Instance(class) => format!("*{}", class),
        InferredType::Queue => format!("*{}.Queue", rt),
        InferredType::Callable(_) => match repr {
            ValueRepr::Closure(name) => name.clone(),
            ValueRepr::FnPointer(name) => format!("*const @TypeOf({})", name),
            _ => format!("{}.Value", rt),
        },
        InferredType::None => "void".to_string(),
        InferredType::Unknown => format!("{}.Value", rt),
    }
}

/// Type of a value in its default representation (lists as slices).
pub fn value_type(ty: &InferredType, rt: &str) -> String {
    zig_type(ty, &default_repr(ty), rt)
}

pub fn default_repr(ty: &InferredType) -> ValueRepr {
    match ty {
        InferredType::Dict(..) => ValueRepr::Map,
        InferredType::List(_) => ValueRepr::Slice,
        _ => ValueRepr::Plain,
    }
}

/// Element type text of a list type, `runtime.Value` when unknown.
pub fn elem_type(ty: &InferredType, rt: &str) -> String {
    value_type(&ty.element(), rt)
}

/// Whether a binding of this type can carry an explicit annotation.
/// Types spelled only through inference (closures, tuples, maps, growable
/// lists) are declared without one.
pub fn annotatable(ty: &InferredType, repr: &ValueRepr) -> bool {
    match ty {
        InferredType::Int | InferredType::Float | InferredType::Bool | InferredType::String => true,
        InferredType::List(e) => *repr != ValueRepr::Growable && !e.is_partial(),
        InferredType::Optional(inner) => annotatable(inner, &ValueRepr::Plain),
        InferredType::Instance(_) | InferredType::Queue => true,
        _ => false,
    }
}

/// Zero value used for hoisted declarations and struct field defaults.
pub fn zero_value(ty: &InferredType) -> &'static str {
    match ty {
        InferredType::Int => "0",
        InferredType::Float => "0.0",
        InferredType::Bool => "false",
        InferredType::String => "\"\"",
        InferredType::Optional(_) => "null",
        InferredType::List(_) => "&.{}",
        _ => "undefined",
    }
}

/// `std.fmt` placeholder for a value of this type.
pub fn placeholder(ty: &InferredType) -> &'static str {
    match ty {
        InferredType::Int | InferredType::Float => "{d}",
        InferredType::String => "{s}",
        InferredType::Bool => "{}",
        InferredType::Optional(_) => "{?}",
        _ => "{any}",
    }
}

/// Text `type(x)` evaluates to.
pub fn python_type_name(ty: &InferredType) -> String {
    let name = match ty {
        InferredType::Int => "int".to_string(),
        InferredType::Float => "float".to_string(),
        InferredType::Bool => "bool".to_string(),
        InferredType::String => "str".to_string(),
        InferredType::List(_) => "list".to_string(),
        InferredType::Dict(..) => "dict".to_string(),
        InferredType::Tuple(_) => "tuple".to_string(),
        InferredType::Instance(c) => format!("__main__.{}", c),
        InferredType::None => "NoneType".to_string(),
        InferredType::Callable(_) => "function".to_string(),
        InferredType::Queue => "Queue".to_string(),
        InferredType::Optional(_) | InferredType::Unknown => "object".to_string(),
    };
    format!("<class '{}'>", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containers_map_to_std_types() {
        let list = InferredType::list_of(InferredType::Int);
        assert_eq!(zig_type(&list, &ValueRepr::Growable, "runtime"), "std.ArrayList(i64)");
        assert_eq!(value_type(&list, "runtime"), "[]const i64");
        let dict = InferredType::dict_of(InferredType::String, InferredType::Float);
        assert_eq!(value_type(&dict, "runtime"), "std.StringHashMap(f64)");
        let by_int = InferredType::dict_of(InferredType::Int, InferredType::Bool);
        assert_eq!(value_type(&by_int, "runtime"), "std.AutoHashMap(i64, bool)");
        assert_eq!(value_type(&InferredType::Unknown, "rt"), "rt.Value");
    }
}
