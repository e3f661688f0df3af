use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::runtime::error::RuntimeError;
use crate::runtime::function::FunctionRef;
use crate::sloc::Sloc;
use crate::value::{Object, Value};

/// A refcounted mutable cell. Variables start uninitialized; the
/// initializer seals immutability.
#[derive(Debug)]
pub struct Variable {
    value: Value,
    initialized: bool,
    immutable: bool,
}

pub type VarRef = Rc<RefCell<Variable>>;

impl Variable {
    pub fn new_uninitialized() -> VarRef {
        Rc::new(RefCell::new(Self {
            value: Value::Null,
            initialized: false,
            immutable: false,
        }))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn initialize(&mut self, value: Value) {
        self.value = value;
        self.initialized = true;
    }

    pub fn set_immutable(&mut self, immutable: bool) {
        self.immutable = immutable;
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }
}

/// Collects distinct variables reachable from captured state, for the
/// benefit of a tracing collector.
#[derive(Default)]
pub struct VariableSet {
    seen: HashSet<usize>,
    vars: Vec<VarRef>,
}

impl VariableSet {
    pub fn insert(&mut self, var: &VarRef) -> bool {
        let key = Rc::as_ptr(var) as usize;
        if !self.seen.insert(key) {
            return false;
        }
        self.vars.push(var.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn vars(&self) -> &[VarRef] {
        &self.vars
    }
}

pub fn collect_value_variables(value: &Value, out: &mut VariableSet) {
    match value {
        Value::Arr(arr) => {
            for elem in arr.iter() {
                collect_value_variables(elem, out);
            }
        }
        Value::Obj(obj) => {
            for (_, elem) in obj.iter() {
                collect_value_variables(elem, out);
            }
        }
        Value::Fun(fun) => fun.collect_variables(out),
        _ => {}
    }
}

/// One step of a subscript chain, walked on read and write.
#[derive(Clone, Debug)]
pub enum Subscript {
    ArrayIndex(i64),
    ArrayHead,
    ArrayTail,
    ArrayRandom(u32),
    ObjectKey(Rc<str>),
}

/// A function call deferred by proper tail call handling. The caller's
/// frame has been released; the outer driver materializes this marker.
pub struct PendingTailCall {
    pub sloc: Sloc,
    pub ptc: crate::air::PtcAware,
    pub target: FunctionRef,
    pub self_ref: Reference,
    pub args: Vec<Reference>,
}

#[derive(Clone, Default)]
pub enum RefRoot {
    /// A declared but not yet initialized name.
    #[default]
    Invalid,
    /// The result of a function that returned nothing.
    Void,
    Temporary(Value),
    Variable(VarRef),
    TailCall(Rc<RefCell<Option<PendingTailCall>>>),
}

/// The runtime's universal value handle: void, a temporary, a variable,
/// or a pending proper tail call, plus a subscript chain.
#[derive(Clone, Default)]
pub struct Reference {
    root: RefRoot,
    subscripts: Vec<Subscript>,
}

impl Reference {
    pub fn new_void() -> Self {
        Self {
            root: RefRoot::Void,
            subscripts: Vec::new(),
        }
    }

    pub fn new_temporary(value: Value) -> Self {
        Self {
            root: RefRoot::Temporary(value),
            subscripts: Vec::new(),
        }
    }

    pub fn new_variable(var: VarRef) -> Self {
        Self {
            root: RefRoot::Variable(var),
            subscripts: Vec::new(),
        }
    }

    pub fn new_tail_call(pending: PendingTailCall) -> Self {
        Self {
            root: RefRoot::TailCall(Rc::new(RefCell::new(Some(pending)))),
            subscripts: Vec::new(),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.root, RefRoot::Invalid)
    }

    pub fn is_void(&self) -> bool {
        matches!(self.root, RefRoot::Void)
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.root, RefRoot::Temporary(_))
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.root, RefRoot::Variable(_))
    }

    pub fn is_tail_call(&self) -> bool {
        matches!(self.root, RefRoot::TailCall(_))
    }

    /// The variable cell behind this reference, ignoring subscripts.
    pub fn variable_opt(&self) -> Option<VarRef> {
        match &self.root {
            RefRoot::Variable(var) => Some(var.clone()),
            _ => None,
        }
    }

    pub fn take_pending_call(&mut self) -> Option<PendingTailCall> {
        match &self.root {
            RefRoot::TailCall(cell) => cell.borrow_mut().take(),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.root = RefRoot::Void;
        self.subscripts.clear();
    }

    pub fn set_temporary(&mut self, value: Value) {
        self.root = RefRoot::Temporary(value);
        self.subscripts.clear();
    }

    pub fn set_variable(&mut self, var: VarRef) {
        self.root = RefRoot::Variable(var);
        self.subscripts.clear();
    }

    pub fn push_subscript(&mut self, sub: Subscript) {
        self.subscripts.push(sub);
    }

    /// Drop the final subscript. A reference without subscripts decays
    /// to void; this yields the `this` binding for plain calls.
    pub fn pop_subscript(&mut self) {
        if self.subscripts.pop().is_none() {
            self.clear();
        }
    }

    pub fn subscript_count(&self) -> usize {
        self.subscripts.len()
    }

    // ─── Dereference ───────────────────────────────────────────────

    /// Read through the reference without modifying anything.
    pub fn dereference_readonly(&self) -> Result<Value, RuntimeError> {
        match &self.root {
            RefRoot::Invalid => Err(self.error_uninitialized()),
            RefRoot::Void => Err(RuntimeError::format(
                Sloc::dummy(),
                "void reference not dereferenceable".to_string(),
            )),
            RefRoot::TailCall(_) => Err(RuntimeError::format(
                Sloc::dummy(),
                "tail call not materialized".to_string(),
            )),
            RefRoot::Temporary(value) => read_walk(value, &self.subscripts),
            RefRoot::Variable(var) => {
                let cell = var.borrow();
                if !cell.is_initialized() {
                    return Err(self.error_uninitialized());
                }
                read_walk(cell.value(), &self.subscripts)
            }
        }
    }

    /// Read the value and convert this reference to a temporary of it.
    pub fn dereference_copy(&mut self) -> Result<Value, RuntimeError> {
        let value = self.dereference_readonly()?;
        self.set_temporary(value.clone());
        Ok(value)
    }

    /// Modify the referenced slot in place. Only variables may be
    /// modified; intermediate nulls vivify into containers.
    pub fn modify<R>(
        &mut self,
        f: impl FnOnce(&mut Value) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        match &self.root {
            RefRoot::Variable(var) => {
                let var = var.clone();
                let mut cell = var.borrow_mut();
                if !cell.is_initialized() {
                    return Err(self.error_uninitialized());
                }
                if cell.is_immutable() {
                    return Err(RuntimeError::format(
                        Sloc::dummy(),
                        "immutable variable not modifiable".to_string(),
                    ));
                }
                let slot = walk_mut(cell.value_mut(), &self.subscripts)?;
                f(slot)
            }
            RefRoot::Temporary(_) => Err(RuntimeError::format(
                Sloc::dummy(),
                "temporary value not modifiable".to_string(),
            )),
            RefRoot::Invalid => Err(self.error_uninitialized()),
            _ => Err(RuntimeError::format(
                Sloc::dummy(),
                "void reference not modifiable".to_string(),
            )),
        }
    }

    /// Assign through the reference.
    pub fn write(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.modify(|slot| {
            *slot = value;
            Ok(())
        })
    }

    /// Remove the element designated by the final subscript and return
    /// its old value.
    pub fn unset(&mut self) -> Result<Value, RuntimeError> {
        let (last, parents) = match self.subscripts.split_last() {
            Some(split) => split,
            None => {
                return Err(RuntimeError::format(
                    Sloc::dummy(),
                    "only elements of arrays and objects may be unset".to_string(),
                ))
            }
        };
        let last = last.clone();
        let parents = parents.to_vec();

        match &self.root {
            RefRoot::Variable(var) => {
                let var = var.clone();
                let mut cell = var.borrow_mut();
                if !cell.is_initialized() {
                    return Err(self.error_uninitialized());
                }
                if cell.is_immutable() {
                    return Err(RuntimeError::format(
                        Sloc::dummy(),
                        "immutable variable not modifiable".to_string(),
                    ));
                }
                let slot = walk_mut(cell.value_mut(), &parents)?;
                unset_in(slot, &last)
            }
            RefRoot::Temporary(_) => Err(RuntimeError::format(
                Sloc::dummy(),
                "temporary value not modifiable".to_string(),
            )),
            RefRoot::Invalid => Err(self.error_uninitialized()),
            _ => Err(RuntimeError::format(
                Sloc::dummy(),
                "void reference not modifiable".to_string(),
            )),
        }
    }

    pub fn collect_variables(&self, out: &mut VariableSet) {
        match &self.root {
            RefRoot::Variable(var) => {
                if out.insert(var) {
                    collect_value_variables(var.borrow().value(), out);
                }
            }
            RefRoot::Temporary(value) => collect_value_variables(value, out),
            RefRoot::TailCall(cell) => {
                if let Some(pending) = cell.borrow().as_ref() {
                    pending.self_ref.collect_variables(out);
                    for arg in &pending.args {
                        arg.collect_variables(out);
                    }
                }
            }
            _ => {}
        }
    }

    fn error_uninitialized(&self) -> RuntimeError {
        RuntimeError::format(
            Sloc::dummy(),
            "initialization of variable or reference bypassed".to_string(),
        )
    }
}

impl PartialEq for Reference {
    /// Identity comparison: variables and pending calls compare by
    /// pointer, temporaries structurally.
    fn eq(&self, other: &Self) -> bool {
        let roots = match (&self.root, &other.root) {
            (RefRoot::Invalid, RefRoot::Invalid) => true,
            (RefRoot::Void, RefRoot::Void) => true,
            (RefRoot::Temporary(a), RefRoot::Temporary(b)) => a.eq_structural(b),
            (RefRoot::Variable(a), RefRoot::Variable(b)) => Rc::ptr_eq(a, b),
            (RefRoot::TailCall(a), RefRoot::TailCall(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        roots
            && self.subscripts.len() == other.subscripts.len()
            && self
                .subscripts
                .iter()
                .zip(other.subscripts.iter())
                .all(|(a, b)| match (a, b) {
                    (Subscript::ArrayIndex(x), Subscript::ArrayIndex(y)) => x == y,
                    (Subscript::ArrayHead, Subscript::ArrayHead) => true,
                    (Subscript::ArrayTail, Subscript::ArrayTail) => true,
                    (Subscript::ArrayRandom(x), Subscript::ArrayRandom(y)) => x == y,
                    (Subscript::ObjectKey(x), Subscript::ObjectKey(y)) => x == y,
                    _ => false,
                })
    }
}

impl std::fmt::Debug for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.root {
            RefRoot::Invalid => write!(f, "Reference(invalid)")?,
            RefRoot::Void => write!(f, "Reference(void)")?,
            RefRoot::Temporary(value) => write!(f, "Reference(temporary {:?})", value)?,
            RefRoot::Variable(_) => write!(f, "Reference(variable)")?,
            RefRoot::TailCall(_) => write!(f, "Reference(tail-call)")?,
        }
        if !self.subscripts.is_empty() {
            write!(f, "{:?}", self.subscripts)?;
        }
        Ok(())
    }
}

// ─── Subscript walks ───────────────────────────────────────────────

fn read_walk(value: &Value, subs: &[Subscript]) -> Result<Value, RuntimeError> {
    let mut cur = value.clone();
    for sub in subs {
        cur = read_one(&cur, sub)?;
    }
    Ok(cur)
}

fn read_one(value: &Value, sub: &Subscript) -> Result<Value, RuntimeError> {
    match (value, sub) {
        // Reading through null yields null, like a missing element.
        (Value::Null, _) => Ok(Value::Null),

        (Value::Arr(arr), Subscript::ArrayIndex(idx)) => {
            let mut i = *idx;
            if i < 0 {
                i += arr.len() as i64;
            }
            if i < 0 || i >= arr.len() as i64 {
                return Ok(Value::Null);
            }
            Ok(arr[i as usize].clone())
        }
        (Value::Arr(arr), Subscript::ArrayHead) => {
            Ok(arr.first().cloned().unwrap_or(Value::Null))
        }
        (Value::Arr(arr), Subscript::ArrayTail) => {
            Ok(arr.last().cloned().unwrap_or(Value::Null))
        }
        (Value::Arr(arr), Subscript::ArrayRandom(seed)) => {
            if arr.is_empty() {
                return Ok(Value::Null);
            }
            Ok(arr[*seed as usize % arr.len()].clone())
        }
        (Value::Obj(obj), Subscript::ObjectKey(key)) => {
            Ok(obj.get(key).cloned().unwrap_or(Value::Null))
        }

        (other, Subscript::ObjectKey(key)) => Err(RuntimeError::format(
            Sloc::dummy(),
            format!(
                "string subscript `{}` inapplicable (value `{:?}`)",
                key, other
            ),
        )),
        (other, _) => Err(RuntimeError::format(
            Sloc::dummy(),
            format!("subscript inapplicable (value `{:?}`)", other),
        )),
    }
}

/// Walk a subscript chain for writing, creating containers out of nulls
/// along the way.
fn walk_mut<'a>(
    mut cur: &'a mut Value,
    subs: &[Subscript],
) -> Result<&'a mut Value, RuntimeError> {
    for sub in subs {
        cur = step_mut(cur, sub)?;
    }
    Ok(cur)
}

fn step_mut<'a>(value: &'a mut Value, sub: &Subscript) -> Result<&'a mut Value, RuntimeError> {
    // Null vivifies into the container kind the subscript wants.
    if value.is_null() {
        *value = match sub {
            Subscript::ObjectKey(_) => Value::Obj(Rc::new(Object::new())),
            _ => Value::Arr(Rc::new(Vec::new())),
        };
    }

    match (value, sub) {
        (Value::Arr(arr), Subscript::ArrayIndex(idx)) => {
            let arr = Rc::make_mut(arr);
            let mut i = *idx;
            if i < 0 {
                i += arr.len() as i64;
            }
            if i < 0 {
                return Err(RuntimeError::format(
                    Sloc::dummy(),
                    format!("array index `{}` out of range", idx),
                ));
            }
            // Writing past the end extends the array with nulls.
            if i >= arr.len() as i64 {
                arr.resize(i as usize + 1, Value::Null);
            }
            Ok(&mut arr[i as usize])
        }
        (Value::Arr(arr), Subscript::ArrayHead) => {
            let arr = Rc::make_mut(arr);
            arr.insert(0, Value::Null);
            Ok(&mut arr[0])
        }
        (Value::Arr(arr), Subscript::ArrayTail) => {
            let arr = Rc::make_mut(arr);
            arr.push(Value::Null);
            let last = arr.len() - 1;
            Ok(&mut arr[last])
        }
        (Value::Arr(arr), Subscript::ArrayRandom(seed)) => {
            let arr = Rc::make_mut(arr);
            if arr.is_empty() {
                return Err(RuntimeError::format(
                    Sloc::dummy(),
                    "random subscript into an empty array".to_string(),
                ));
            }
            let i = *seed as usize % arr.len();
            Ok(&mut arr[i])
        }
        (Value::Obj(obj), Subscript::ObjectKey(key)) => {
            let obj = Rc::make_mut(obj);
            Ok(obj.entry(key.clone()).or_insert(Value::Null))
        }

        (other, _) => Err(RuntimeError::format(
            Sloc::dummy(),
            format!("subscript inapplicable (value `{:?}`)", other),
        )),
    }
}

fn unset_in(value: &mut Value, sub: &Subscript) -> Result<Value, RuntimeError> {
    match (value, sub) {
        (Value::Null, _) => Ok(Value::Null),

        (Value::Arr(arr), Subscript::ArrayIndex(idx)) => {
            let arr = Rc::make_mut(arr);
            let mut i = *idx;
            if i < 0 {
                i += arr.len() as i64;
            }
            if i < 0 || i >= arr.len() as i64 {
                return Ok(Value::Null);
            }
            Ok(arr.remove(i as usize))
        }
        (Value::Arr(arr), Subscript::ArrayHead) => {
            let arr = Rc::make_mut(arr);
            if arr.is_empty() {
                return Ok(Value::Null);
            }
            Ok(arr.remove(0))
        }
        (Value::Arr(arr), Subscript::ArrayTail) => {
            let arr = Rc::make_mut(arr);
            Ok(arr.pop().unwrap_or(Value::Null))
        }
        (Value::Arr(arr), Subscript::ArrayRandom(seed)) => {
            let arr = Rc::make_mut(arr);
            if arr.is_empty() {
                return Ok(Value::Null);
            }
            let i = *seed as usize % arr.len();
            Ok(arr.remove(i))
        }
        (Value::Obj(obj), Subscript::ObjectKey(key)) => {
            let obj = Rc::make_mut(obj);
            Ok(obj.shift_remove(key).unwrap_or(Value::Null))
        }

        (other, _) => Err(RuntimeError::format(
            Sloc::dummy(),
            format!("subscript inapplicable (value `{:?}`)", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized_var(value: Value) -> VarRef {
        let var = Variable::new_uninitialized();
        var.borrow_mut().initialize(value);
        var
    }

    #[test]
    fn test_uninitialized_variable_read_fails() {
        let var = Variable::new_uninitialized();
        let r = Reference::new_variable(var);
        assert!(r.dereference_readonly().is_err());
    }

    #[test]
    fn test_negative_index_wraps() {
        let var = initialized_var(Value::Arr(Rc::new(vec![
            Value::Int(10),
            Value::Int(20),
            Value::Int(30),
        ])));
        let mut r = Reference::new_variable(var);
        r.push_subscript(Subscript::ArrayIndex(-1));
        assert_eq!(r.dereference_readonly().unwrap().as_int(), Some(30));
    }

    #[test]
    fn test_out_of_range_read_is_null() {
        let var = initialized_var(Value::Arr(Rc::new(vec![Value::Int(1)])));
        let mut r = Reference::new_variable(var);
        r.push_subscript(Subscript::ArrayIndex(7));
        assert!(r.dereference_readonly().unwrap().is_null());
    }

    #[test]
    fn test_write_extends_array() {
        let var = initialized_var(Value::Arr(Rc::new(vec![Value::Int(1)])));
        let mut r = Reference::new_variable(var.clone());
        r.push_subscript(Subscript::ArrayIndex(3));
        r.write(Value::Int(9)).unwrap();
        let value = var.borrow().value().clone();
        let arr = value.as_arr().unwrap();
        assert_eq!(arr.len(), 4);
        assert!(arr[1].is_null());
        assert_eq!(arr[3].as_int(), Some(9));
    }

    #[test]
    fn test_null_vivifies_on_write() {
        let var = initialized_var(Value::Null);
        let mut r = Reference::new_variable(var.clone());
        r.push_subscript(Subscript::ObjectKey(Rc::from("a")));
        r.push_subscript(Subscript::ObjectKey(Rc::from("b")));
        r.write(Value::Int(5)).unwrap();
        let value = var.borrow().value().clone();
        let text = value.to_string();
        assert_eq!(text, "{ \"a\" = { \"b\" = 5 } }");
    }

    #[test]
    fn test_temporary_not_modifiable() {
        let mut r = Reference::new_temporary(Value::Int(1));
        assert!(r.write(Value::Int(2)).is_err());
    }

    #[test]
    fn test_immutable_not_modifiable() {
        let var = initialized_var(Value::Int(1));
        var.borrow_mut().set_immutable(true);
        let mut r = Reference::new_variable(var);
        assert!(r.write(Value::Int(2)).is_err());
    }

    #[test]
    fn test_tail_write_appends() {
        let var = initialized_var(Value::Arr(Rc::new(vec![Value::Int(1)])));
        let mut r = Reference::new_variable(var.clone());
        r.push_subscript(Subscript::ArrayTail);
        r.write(Value::Int(2)).unwrap();
        let value = var.borrow().value().clone();
        assert_eq!(value.to_string(), "[ 1, 2 ]");
    }

    #[test]
    fn test_unset_removes_key() {
        let mut obj = Object::new();
        obj.insert(Rc::from("k"), Value::Int(3));
        let var = initialized_var(Value::Obj(Rc::new(obj)));
        let mut r = Reference::new_variable(var.clone());
        r.push_subscript(Subscript::ObjectKey(Rc::from("k")));
        let old = r.unset().unwrap();
        assert_eq!(old.as_int(), Some(3));
        let value = var.borrow().value().clone();
        assert_eq!(value.to_string(), "{ }");
    }

    #[test]
    fn test_pop_subscript_decays_to_void() {
        let mut r = Reference::new_temporary(Value::Int(1));
        r.pop_subscript();
        assert!(r.is_void());
    }

    #[test]
    fn test_collect_variables_dedups() {
        let var = initialized_var(Value::Int(1));
        let r1 = Reference::new_variable(var.clone());
        let r2 = Reference::new_variable(var);
        let mut set = VariableSet::default();
        r1.collect_variables(&mut set);
        r2.collect_variables(&mut set);
        assert_eq!(set.len(), 1);
    }
}
