use std::rc::Rc;

use crate::sloc::Sloc;
use crate::value::Value;

/// Optional callbacks fired synchronously at well-defined points. Hosts
/// install an implementation on the global context for tracing,
/// profiling, or cooperative cancellation (raise from `on_trap`).
///
/// Callbacks must not block the interpreter for long.
pub trait Hooks {
    /// A variable or reference has been declared.
    fn on_declare(&self, _sloc: &Sloc, _name: &str) {}

    /// A function is about to be invoked.
    fn on_call(&self, _sloc: &Sloc, _callee: &str) {}

    /// A `return` statement is being executed. `tail_call` is set when
    /// the return transfers control via a proper tail call.
    fn on_return(&self, _sloc: &Sloc, _tail_call: bool) {}

    /// A value is about to be thrown.
    fn on_throw(&self, _sloc: &Sloc, _value: &Value) {}

    /// A single-step trap, emitted before every sub-expression when
    /// `verbose_single_step_traps` is on.
    fn on_trap(&self, _sloc: &Sloc) {}
}

pub type HooksRef = Rc<dyn Hooks>;

/// The default hook set: every callback is a no-op.
pub struct NoHooks;

impl Hooks for NoHooks {}
