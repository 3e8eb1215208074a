use std::fmt;

use crate::ast::{Expr, ExprKind};

/// Static type attached to an expression or binding.
///
/// `Unknown` is the safe fallback: lowering of an `Unknown` value always
/// goes through the generic runtime forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum InferredType {
    Int,
    Float,
    Bool,
    String,
    List(Box<InferredType>),
    /// Key, value.
    Dict(Box<InferredType>, Box<InferredType>),
    Tuple(Vec<InferredType>),
    Optional(Box<InferredType>),
    /// Pointer to an instance of a user class.
    Instance(String),
    /// Runtime queue handle (`asyncio.Queue`, `queue.Queue`).
    Queue,
    /// A lambda or closure value; carries the return type.
    Callable(Box<InferredType>),
    None,
    #[default]
    Unknown,
}

impl InferredType {
    pub fn list_of(elem: InferredType) -> Self {
        InferredType::List(Box::new(elem))
    }

    pub fn dict_of(key: InferredType, value: InferredType) -> Self {
        InferredType::Dict(Box::new(key), Box::new(value))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, InferredType::Unknown)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, InferredType::Int | InferredType::Float | InferredType::Bool)
    }

    /// Element type produced when iterating a value of this type.
    pub fn element(&self) -> InferredType {
        match self {
            InferredType::List(e) => (**e).clone(),
            InferredType::Dict(k, _) => (**k).clone(),
            InferredType::String => InferredType::String,
            InferredType::Tuple(items) => items.first().cloned().unwrap_or(InferredType::Unknown),
            _ => InferredType::Unknown,
        }
    }

    /// Whether the type still contains an unresolved part, e.g. the element
    /// of an empty list literal.
    pub fn is_partial(&self) -> bool {
        match self {
            InferredType::Unknown => true,
            InferredType::List(e) | InferredType::Optional(e) => e.is_partial(),
            InferredType::Dict(k, v) => k.is_partial() || v.is_partial(),
            _ => false,
        }
    }

    /// Combine a previously known type with a new observation. A fully
    /// unknown observation never erases information; otherwise the newer
    /// observation wins.
    pub fn refine(&self, newer: &InferredType) -> InferredType {
        match (self, newer) {
            (_, InferredType::Unknown) => self.clone(),
            (InferredType::List(a), InferredType::List(b)) if b.is_partial() => {
                InferredType::list_of(a.refine(b))
            }
            (InferredType::Dict(ak, av), InferredType::Dict(bk, bv)) if newer.is_partial() => {
                InferredType::dict_of(ak.refine(bk), av.refine(bv))
            }
            _ => newer.clone(),
        }
    }

    /// Type named by an annotation expression (`int`, `list[str]`,
    /// `Optional[float]`, `Point`, ...).
    pub fn from_annotation(expr: &Expr) -> InferredType {
        match &expr.kind {
            ExprKind::Name { id } => InferredType::from_type_name(id),
            ExprKind::Constant { .. } if expr.is_none_literal() => InferredType::None,
            ExprKind::Constant { .. } => match expr.as_str_literal() {
                // forward reference written as a string
                Some(name) => InferredType::from_type_name(name),
                None => InferredType::Unknown,
            },
            ExprKind::Attribute { attr, .. } => InferredType::from_type_name(attr),
            ExprKind::Subscript { value, slice } => {
                let head = match &value.kind {
                    ExprKind::Name { id } => id.as_str(),
                    ExprKind::Attribute { attr, .. } => attr.as_str(),
                    _ => return InferredType::Unknown,
                };
                let params: Vec<InferredType> = match &slice.kind {
                    ExprKind::Tuple { elts } => elts.iter().map(InferredType::from_annotation).collect(),
                    _ => vec![InferredType::from_annotation(slice)],
                };
                let first = params.first().cloned().unwrap_or(InferredType::Unknown);
                match head {
                    "list" | "List" | "Sequence" | "Iterable" | "Iterator" | "Generator" => {
                        InferredType::list_of(first)
                    }
                    "dict" | "Dict" | "Mapping" => {
                        let value = params.get(1).cloned().unwrap_or(InferredType::Unknown);
                        InferredType::dict_of(first, value)
                    }
                    "tuple" | "Tuple" => InferredType::Tuple(params),
                    "Optional" => InferredType::Optional(Box::new(first)),
                    "Queue" => InferredType::Queue,
                    _ => InferredType::Unknown,
                }
            }
            _ => InferredType::Unknown,
        }
    }

    /// Type named by a plain identifier, also used for registry manifests.
    pub fn from_type_name(name: &str) -> InferredType {
        match name {
            "int" => InferredType::Int,
            "float" => InferredType::Float,
            "bool" => InferredType::Bool,
            "str" => InferredType::String,
            "None" | "none" => InferredType::None,
            "list" | "List" => InferredType::list_of(InferredType::Unknown),
            "dict" | "Dict" => InferredType::dict_of(InferredType::String, InferredType::Unknown),
            "queue" | "Queue" => InferredType::Queue,
            "list[int]" => InferredType::list_of(InferredType::Int),
            "list[float]" => InferredType::list_of(InferredType::Float),
            "list[str]" => InferredType::list_of(InferredType::String),
            n if n.chars().next().is_some_and(|c| c.is_ascii_uppercase()) => {
                InferredType::Instance(n.to_string())
            }
            _ => InferredType::Unknown,
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferredType::Int => write!(f, "int"),
            InferredType::Float => write!(f, "float"),
            InferredType::Bool => write!(f, "bool"),
            InferredType::String => write!(f, "str"),
            InferredType::List(e) => write!(f, "list[{}]", e),
            InferredType::Dict(k, v) => write!(f, "dict[{}, {}]", k, v),
            InferredType::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                write!(f, "tuple[{}]", parts.join(", "))
            }
            InferredType::Optional(t) => write!(f, "Optional[{}]", t),
            InferredType::Instance(name) => write!(f, "{}", name),
            InferredType::Queue => write!(f, "Queue"),
            InferredType::Callable(ret) => write!(f, "Callable[..., {}]", ret),
            InferredType::None => write!(f, "None"),
            InferredType::Unknown => write!(f, "?"),
        }
    }
}

/// How a value is physically represented in the generated code. Two values
/// of the same `InferredType` can differ here, e.g. a list is either a
/// growable `std.ArrayList` or a plain slice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueRepr {
    #[default]
    Plain,
    /// `std.ArrayList(T)`; elements live in `.items`.
    Growable,
    /// `[]const T` or a pointer to a fixed array literal.
    Slice,
    /// A hash map (`std.StringHashMap` / `std.AutoHashMap`).
    Map,
    /// Synthesized closure struct with a `call` method.
    Closure(String),
    /// Pointer to a synthesized top-level function.
    FnPointer(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::{name, subscript, tuple};

    #[test]
    fn defaults_are_the_untyped_forms() {
        assert_eq!(InferredType::default(), InferredType::Unknown);
        assert_eq!(ValueRepr::default(), ValueRepr::Plain);
    }

    #[test]
    fn annotation_generics() {
        let ann = subscript(name("dict"), tuple(vec![name("str"), name("int")]));
        assert_eq!(
            InferredType::from_annotation(&ann),
            InferredType::dict_of(InferredType::String, InferredType::Int)
        );
        let ann = subscript(name("list"), name("float"));
        assert_eq!(InferredType::from_annotation(&ann), InferredType::list_of(InferredType::Float));
    }

    #[test]
    fn refine_fills_unknown_element() {
        let empty = InferredType::list_of(InferredType::Unknown);
        let ints = InferredType::list_of(InferredType::Int);
        assert_eq!(empty.refine(&ints), ints);
        assert_eq!(ints.refine(&empty), ints);
        assert_eq!(ints.refine(&InferredType::Unknown), ints);
        assert_eq!(ints.refine(&InferredType::String), InferredType::String);
    }
}
