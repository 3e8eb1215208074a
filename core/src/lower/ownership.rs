//! file: core/src/lower/ownership.rs
//! description: owned values and the per-binding release decision.
//!
//! Ownership flows from the construct that produced a value: allocating
//! string operations, comprehensions, growable and map literals,
//! constructors and user-function results are owned; names, literals and
//! borrowed views are not. A binding that receives an owned value gets a
//! scoped release unless the name escapes its scope.
//!
use crate::analyzers::{InferredType, ValueRepr};

/// How an owned value is given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// `x.deinit();` (array lists, hash maps, queues)
    Deinit,
    /// `x.deinit(allocator);` (class instances)
    DeinitWithAllocator,
    /// `allocator.free(x);` (strings and slices)
    Free,
}

impl Release {
    pub fn statement(&self, target: &str, allocator: &str) -> String {
        match self {
            Release::Deinit => format!("{}.deinit();", target),
            Release::DeinitWithAllocator => format!("{}.deinit({});", target, allocator),
            Release::Free => format!("{}.free({});", allocator, target),
        }
    }

    /// `deinit` on hash maps takes a mutable pointer.
    pub fn needs_var(&self, repr: &ValueRepr) -> bool {
        matches!(self, Release::Deinit) && *repr == ValueRepr::Map
    }

    /// Release that fits a freshly produced owned value of this shape.
    pub fn for_value(ty: &InferredType, repr: &ValueRepr) -> Option<Release> {
        match (ty, repr) {
            (_, ValueRepr::Growable) | (_, ValueRepr::Map) => Some(Release::Deinit),
            (InferredType::Queue, _) => Some(Release::Deinit),
            (InferredType::Instance(_), _) => Some(Release::DeinitWithAllocator),
            (InferredType::String, _) | (InferredType::List(_), _) => Some(Release::Free),
            _ => None,
        }
    }
}

/// One lowered expression: its text plus what lowering knows about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Lowered {
    pub code: String,
    pub ty: InferredType,
    pub repr: ValueRepr,
    /// Set when the expression yields memory its consumer must release.
    pub owned: Option<Release>,
}

impl Lowered {
    pub fn new(code: String, ty: InferredType) -> Self {
        let repr = super::types::default_repr(&ty);
        Lowered { code, ty, repr, owned: None }
    }

    pub fn with_repr(mut self, repr: ValueRepr) -> Self {
        self.repr = repr;
        self
    }

    pub fn owned(mut self, release: Release) -> Self {
        self.owned = Some(release);
        self
    }

    /// Owned with the release its shape calls for.
    pub fn owned_value(self) -> Self {
        let release = Release::for_value(&self.ty, &self.repr);
        Lowered { owned: release, ..self }
    }

    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    pub fn is_growable(&self) -> bool {
        self.repr == ValueRepr::Growable
    }
}

/// Declaration keyword and cleanup for a new binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingPlan {
    pub mutable: bool,
    pub release: Option<Release>,
}

impl BindingPlan {
    pub fn keyword(&self) -> &'static str {
        if self.mutable { "var" } else { "const" }
    }
}

/// Decide how a new binding of `value` is declared.
///
/// `reassigned`: the name is rebound or changed in place later.
/// `escapes`: the value leaves the scope (returned, yielded, stored
/// elsewhere, captured), so the scope must not release it.
pub fn plan_binding(value: &Lowered, reassigned: bool, escapes: bool) -> BindingPlan {
    let release = if escapes { None } else { value.owned };
    let mutable = reassigned || release.is_some_and(|r| r.needs_var(&value.repr)) || value.repr == ValueRepr::Map;
    BindingPlan { mutable, release }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_strings_are_freed_unless_escaping() {
        let value = Lowered::new("try f(allocator)".into(), InferredType::String).owned_value();
        let plan = plan_binding(&value, false, false);
        assert_eq!(plan.keyword(), "const");
        assert_eq!(plan.release, Some(Release::Free));
        assert_eq!(plan_binding(&value, false, true).release, None);
    }

    #[test]
    fn borrowed_values_need_no_cleanup() {
        let value = Lowered::new("\"hi\"".into(), InferredType::String);
        assert_eq!(plan_binding(&value, false, false).release, None);
    }

    #[test]
    fn maps_bind_mutably() {
        let map = InferredType::dict_of(InferredType::String, InferredType::Int);
        let value = Lowered::new("m".into(), map).owned_value();
        let plan = plan_binding(&value, false, false);
        assert_eq!(plan.keyword(), "var");
        assert_eq!(plan.release, Some(Release::Deinit));
        assert_eq!(Release::Free.statement("s", "allocator"), "allocator.free(s);");
    }
}
