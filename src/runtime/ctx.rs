use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::air::rod::AvmRod;
use crate::runtime::reference::Reference;
use crate::sloc::Sloc;

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

/// Compile-time scope: records which names are visible in each frame so
/// lowering can resolve a name to a static depth. Chains to a parent by
/// shared reference; a function root predeclares `__this`, `__func`,
/// `__varg` and each declared parameter.
pub struct AnalyticScope<'p> {
    names: RefCell<HashSet<Rc<str>>>,
    parent: Option<&'p AnalyticScope<'p>>,
}

impl<'p> AnalyticScope<'p> {
    pub fn new_plain(parent: &'p AnalyticScope<'p>) -> Self {
        Self {
            names: RefCell::new(HashSet::new()),
            parent: Some(parent),
        }
    }

    pub fn new_function(parent: Option<&'p AnalyticScope<'p>>, params: &[Rc<str>]) -> Self {
        let this = Self {
            names: RefCell::new(HashSet::new()),
            parent,
        };
        for param in params {
            // `...` is not a named parameter.
            if param.as_bytes().first().copied().map_or(false, is_name_start) {
                this.insert(param.clone());
            }
        }
        this.insert(Rc::from("__this"));
        this.insert(Rc::from("__func"));
        this.insert(Rc::from("__varg"));
        this
    }

    /// Create or overwrite a placeholder for a declared name.
    pub fn insert(&self, name: Rc<str>) {
        self.names.borrow_mut().insert(name);
    }

    /// Look the name up in this frame only; the caller walks the chain.
    pub fn contains(&self, name: &str) -> bool {
        self.names.borrow().contains(name)
    }

    pub fn parent(&self) -> Option<&'p AnalyticScope<'p>> {
        self.parent
    }
}

/// Runtime scope: named references, plus the deferred expressions
/// registered while the scope was active. Deferred expressions run LIFO
/// on both normal and exceptional exits.
pub struct Scope {
    named: HashMap<Rc<str>, Reference>,
    defers: Vec<(Sloc, AvmRod)>,
    parent: Option<Rc<RefCell<Scope>>>,
}

impl Scope {
    pub fn new_root() -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Self {
            named: HashMap::new(),
            defers: Vec::new(),
            parent: None,
        }))
    }

    pub fn new_child(parent: Rc<RefCell<Scope>>) -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Self {
            named: HashMap::new(),
            defers: Vec::new(),
            parent: Some(parent),
        }))
    }

    pub fn parent(&self) -> Option<Rc<RefCell<Scope>>> {
        self.parent.clone()
    }

    pub fn get(&self, name: &str) -> Option<Reference> {
        self.named.get(name).cloned()
    }

    /// Create or overwrite a named reference, returning nothing; use
    /// `get` to read it back. Inserting a default reference leaves the
    /// name in the "declared but uninitialized" state.
    pub fn insert(&mut self, name: Rc<str>, re: Reference) {
        self.named.insert(name, re);
    }

    pub fn insert_invalid(&mut self, name: Rc<str>) {
        self.named.insert(name, Reference::default());
    }

    pub fn push_defer(&mut self, sloc: Sloc, rod: AvmRod) {
        self.defers.push((sloc, rod));
    }

    pub fn take_defers(&mut self) -> Vec<(Sloc, AvmRod)> {
        std::mem::take(&mut self.defers)
    }

    /// Walk `depth` parents from `scope`.
    pub fn walk(scope: &Rc<RefCell<Scope>>, depth: u32) -> Option<Rc<RefCell<Scope>>> {
        let mut cur = scope.clone();
        for _ in 0..depth {
            let parent = cur.borrow().parent()?;
            cur = parent;
        }
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_analytic_function_root_predeclares() {
        let params: Vec<Rc<str>> = vec![Rc::from("a"), Rc::from("...")];
        let ctx = AnalyticScope::new_function(None, &params);
        assert!(ctx.contains("a"));
        assert!(!ctx.contains("..."));
        assert!(ctx.contains("__this"));
        assert!(ctx.contains("__func"));
        assert!(ctx.contains("__varg"));
    }

    #[test]
    fn test_analytic_lookup_is_frame_local() {
        let root = AnalyticScope::new_function(None, &[]);
        root.insert(Rc::from("x"));
        let child = AnalyticScope::new_plain(&root);
        assert!(!child.contains("x"));
        assert!(child.parent().map_or(false, |p| p.contains("x")));
    }

    #[test]
    fn test_scope_walk() {
        let root = Scope::new_root();
        root.borrow_mut().insert(
            Rc::from("x"),
            Reference::new_temporary(Value::Int(1)),
        );
        let mid = Scope::new_child(root.clone());
        let leaf = Scope::new_child(mid);

        let found = Scope::walk(&leaf, 2).expect("chain has two parents");
        assert!(found.borrow().get("x").is_some());
        assert!(Scope::walk(&leaf, 3).is_none());
    }

    #[test]
    fn test_invalid_insertion() {
        let root = Scope::new_root();
        root.borrow_mut().insert_invalid(Rc::from("later"));
        let re = root.borrow().get("later").expect("name must exist");
        assert!(re.is_invalid());
    }
}
