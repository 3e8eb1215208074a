use std::collections::HashMap;

use super::kind::{InferredType, ValueRepr};

/// What the lowering engine remembers about a declared name.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub ty: InferredType,
    pub repr: ValueRepr,
    /// Declared with `var`.
    pub mutable: bool,
    /// A scoped release was emitted for this binding.
    pub released: bool,
    /// Target-side spelling when it differs from the source name
    /// (renamed to avoid shadowing, or reached through a closure env).
    pub alias: Option<String>,
}

impl Binding {
    pub fn new(ty: InferredType, repr: ValueRepr) -> Self {
        Binding { ty, repr, mutable: false, released: false, alias: None }
    }

    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn released(mut self, released: bool) -> Self {
        self.released = released;
        self
    }

    pub fn aliased(mut self, alias: String) -> Self {
        self.alias = Some(alias);
        self
    }
}

// A single lexical scope: name -> binding
type Scope = HashMap<String, Binding>;

/// Stack of lexical scopes, innermost last.
///
/// Push/pop must stay paired; `Session::scoped` in the lowering engine is
/// the only caller and pops on every exit path.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack { scopes: vec![HashMap::new()] }
    }

    /// ------- Scope Helpers -------

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Discards every binding of the innermost scope. The outermost scope
    /// is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// A fresh stack holding only the outermost scope's bindings.
    pub fn root_only(&self) -> ScopeStack {
        ScopeStack { scopes: vec![self.scopes.first().cloned().unwrap_or_default()] }
    }

    /// Run `f` inside a fresh scope.
    pub fn with_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.push_scope();
        let out = f(self);
        self.pop_scope();
        out
    }

    /// ------- Binding Helpers -------

    /// Inserts into the innermost scope only.
    pub fn declare_var(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    /// Searches innermost to outermost.
    pub fn is_declared(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn is_declared_in_current_scope(&self, name: &str) -> bool {
        self.scopes.last().is_some_and(|s| s.contains_key(name))
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Index of the scope holding the visible binding of `name`; 0 is
    /// the outermost scope.
    pub fn lookup_depth(&self, name: &str) -> Option<usize> {
        self.scopes.iter().rposition(|scope| scope.contains_key(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name))
    }

    /// Every visible name, innermost binding first; used to compute closure
    /// captures.
    pub fn visible_names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for scope in self.scopes.iter().rev() {
            for name in scope.keys() {
                if !seen.contains(name) {
                    seen.push(name.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> Binding {
        Binding::new(InferredType::Int, ValueRepr::Plain)
    }

    #[test]
    fn inner_scope_shadows_and_pops() {
        let mut table = ScopeStack::new();
        table.declare_var("x", int());
        table.push_scope();
        table.declare_var("x", Binding::new(InferredType::String, ValueRepr::Plain));
        assert_eq!(table.lookup("x").map(|b| b.ty.clone()), Some(InferredType::String));
        table.pop_scope();
        assert_eq!(table.lookup("x").map(|b| b.ty.clone()), Some(InferredType::Int));
    }

    #[test]
    fn declare_only_touches_innermost() {
        let mut table = ScopeStack::new();
        table.with_scope(|t| {
            t.declare_var("tmp", int());
            assert!(t.is_declared("tmp"));
        });
        assert!(!table.is_declared("tmp"));
        assert_eq!(table.depth(), 1);
    }

    #[test]
    fn root_scope_survives_extra_pop() {
        let mut table = ScopeStack::new();
        table.pop_scope();
        table.declare_var("x", int());
        assert!(table.is_declared_in_current_scope("x"));
    }
}
