use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::runtime::error::RuntimeError;
use crate::runtime::hooks::HooksRef;
use crate::runtime::loader::ModuleLoader;
use crate::runtime::reference::{Reference, VarRef, Variable};
use crate::sloc::Sloc;

/// Nested calls deeper than this raise an error instead of exhausting
/// the native stack.
pub const MAX_CALL_DEPTH: u32 = 300;

/// Per-invocation global state: named global references, the hook
/// registry, the module loader, the call-depth sentry and the PRNG
/// behind the `[?]` subscript.
pub struct GlobalContext {
    named: RefCell<HashMap<Rc<str>, Reference>>,
    hooks: RefCell<Option<HooksRef>>,
    loader: ModuleLoader,
    call_depth: Rc<Cell<u32>>,
    prng: Cell<u64>,
}

impl Default for GlobalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalContext {
    pub fn new() -> Self {
        Self {
            named: RefCell::new(HashMap::new()),
            hooks: RefCell::new(None),
            loader: ModuleLoader::new(),
            call_depth: Rc::new(Cell::new(0)),
            prng: Cell::new(0x9E3779B97F4A7C15),
        }
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    // ─── Named globals ─────────────────────────────────────────────

    pub fn get_named_reference_opt(&self, name: &str) -> Option<Reference> {
        self.named.borrow().get(name).cloned()
    }

    pub fn insert_named_reference(&self, name: Rc<str>, re: Reference) {
        self.named.borrow_mut().insert(name, re);
    }

    pub fn erase_named_reference(&self, name: &str) -> bool {
        self.named.borrow_mut().remove(name).is_some()
    }

    /// The variable behind a global name, allocating one as needed.
    pub fn open_variable(&self, name: Rc<str>) -> VarRef {
        if let Some(re) = self.get_named_reference_opt(&name) {
            if let Some(var) = re.variable_opt() {
                return var;
            }
        }
        let var = Variable::new_uninitialized();
        var.borrow_mut().initialize(crate::value::Value::Null);
        self.insert_named_reference(name, Reference::new_variable(var.clone()));
        var
    }

    // ─── Hooks ─────────────────────────────────────────────────────

    pub fn set_hooks(&self, hooks: HooksRef) {
        *self.hooks.borrow_mut() = Some(hooks);
    }

    pub fn hooks(&self) -> Option<HooksRef> {
        self.hooks.borrow().clone()
    }

    // ─── Recursion sentry ──────────────────────────────────────────

    pub fn enter_call(&self, sloc: &Sloc) -> Result<CallDepthGuard, RuntimeError> {
        let depth = self.call_depth.get() + 1;
        if depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::format(
                sloc.clone(),
                "too many levels of nested function calls".to_string(),
            ));
        }
        self.call_depth.set(depth);
        Ok(CallDepthGuard {
            depth: self.call_depth.clone(),
        })
    }

    // ─── PRNG ──────────────────────────────────────────────────────

    /// Advance the engine and return 32 fresh bits; used by the `[?]`
    /// subscript.
    pub fn random_bump(&self) -> u32 {
        let mut x = self.prng.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.prng.set(x);
        (x >> 32) as u32
    }
}

pub struct CallDepthGuard {
    depth: Rc<Cell<u32>>,
}

impl Drop for CallDepthGuard {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_global_get_put_erase() {
        let global = GlobalContext::new();
        assert!(global.get_named_reference_opt("g").is_none());

        let var = global.open_variable(Rc::from("g"));
        var.borrow_mut().initialize(Value::Int(7));
        let re = global.get_named_reference_opt("g").expect("present");
        assert_eq!(re.dereference_readonly().unwrap().as_int(), Some(7));

        assert!(global.erase_named_reference("g"));
        assert!(!global.erase_named_reference("g"));
    }

    #[test]
    fn test_open_variable_is_idempotent() {
        let global = GlobalContext::new();
        let a = global.open_variable(Rc::from("g"));
        let b = global.open_variable(Rc::from("g"));
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_call_depth_cap() {
        let global = GlobalContext::new();
        let mut guards = Vec::new();
        for _ in 0..MAX_CALL_DEPTH {
            guards.push(global.enter_call(&Sloc::dummy()).unwrap());
        }
        assert!(global.enter_call(&Sloc::dummy()).is_err());
        guards.clear();
        assert!(global.enter_call(&Sloc::dummy()).is_ok());
    }

    #[test]
    fn test_random_bump_varies() {
        let global = GlobalContext::new();
        let a = global.random_bump();
        let b = global.random_bump();
        assert_ne!(a, b);
    }
}
