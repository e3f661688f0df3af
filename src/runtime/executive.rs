//! The stack machine: executes sealed rods against an executive state.
//! Each record handler reads its immediate operands from the header,
//! loads its out-of-line parameter block, and either advances naturally
//! or yields a non-`Next` status.

use std::cell::RefCell;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::air::codegen::FunctionBuilder;
use crate::air::rod::{solidify_nodes, AvmRod, Record, Sparam};
use crate::air::{rebind_nodes, AirStatus, Bi32Type, BindChain, PtcAware};
use crate::ast::{SwitchClauseType, Xop};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::runtime::ctx::Scope;
use crate::runtime::error::RuntimeError;
use crate::runtime::function::{finish_call, FunctionRef};
use crate::runtime::global::GlobalContext;
use crate::runtime::ops;
use crate::runtime::reference::{PendingTailCall, Reference, Subscript, Variable};
use crate::sloc::Sloc;
use crate::token_queue::TokenQueue;
use crate::value::{Object, Value};

type HResult = Result<AirStatus, RuntimeError>;

/// Per-invocation execution state: the reference stack, the alternative
/// stack used to stage call arguments, the scope chain and the global
/// context.
pub struct Executive {
    pub stack: Vec<Reference>,
    pub alt_stack: Vec<Reference>,
    pub scope: Rc<RefCell<Scope>>,
    pub global: Rc<GlobalContext>,
}

impl Executive {
    pub fn new(global: Rc<GlobalContext>) -> Self {
        Self {
            stack: Vec::new(),
            alt_stack: Vec::new(),
            scope: Scope::new_root(),
            global,
        }
    }

    pub fn top(&self, k: usize) -> &Reference {
        &self.stack[self.stack.len() - 1 - k]
    }

    pub fn top_mut(&mut self, k: usize) -> &mut Reference {
        let at = self.stack.len() - 1 - k;
        &mut self.stack[at]
    }

    pub fn swap_stacks(&mut self) {
        std::mem::swap(&mut self.stack, &mut self.alt_stack);
    }

    fn push_scope(&mut self) {
        self.scope = Scope::new_child(self.scope.clone());
    }

    /// Run the current scope's deferred expressions LIFO, then step out
    /// to the parent. A `Return` status carries its result on the stack
    /// top, which is bumped out of the way while the defers execute. An
    /// error from a defer propagates after the remaining defers have
    /// still run.
    fn pop_scope_normal(&mut self, status: AirStatus) -> Result<(), RuntimeError> {
        let saved = if status == AirStatus::Return {
            self.stack.pop()
        } else {
            None
        };
        let result = self.run_defers(None);
        if let Some(re) = saved {
            self.stack.push(re);
        }
        let parent = self.scope.borrow().parent();
        if let Some(parent) = parent {
            self.scope = parent;
        }
        result
    }

    /// Run deferred expressions LIFO while an error is propagating;
    /// nested errors are absorbed so the original continues.
    fn pop_scope_exceptional(&mut self, err: RuntimeError) -> RuntimeError {
        let err = match self.run_defers(Some(err)) {
            Ok(()) => unreachable!("exceptional exit must keep its error"),
            Err(err) => err,
        };
        let parent = self.scope.borrow().parent();
        if let Some(parent) = parent {
            self.scope = parent;
        }
        err
    }

    /// Function-root variants: the scope is dropped rather than stepped
    /// out of.
    pub fn pop_function_scope_normal(&mut self) -> Result<(), RuntimeError> {
        self.run_defers(None)
    }

    pub fn pop_function_scope_exceptional(&mut self, err: RuntimeError) -> RuntimeError {
        match self.run_defers(Some(err)) {
            Ok(()) => unreachable!("exceptional exit must keep its error"),
            Err(err) => err,
        }
    }

    fn run_defers(&mut self, current: Option<RuntimeError>) -> Result<(), RuntimeError> {
        let defers = self.scope.borrow_mut().take_defers();
        let mut result = match current {
            Some(err) => Err(err),
            None => Ok(()),
        };

        for (sloc, rod) in defers.into_iter().rev() {
            match rod.execute(self) {
                Ok(_) => {}
                Err(nested) => match &mut result {
                    Ok(()) => {
                        let mut nested = nested;
                        nested.push_frame_defer(sloc, Value::Null);
                        result = Err(nested);
                    }
                    Err(err) => err.absorb_nested(nested),
                },
            }
        }
        result
    }
}

/// Execute a rod on a fresh child scope, forwarding the status verbatim.
pub fn execute_block(ex: &mut Executive, rod: &AvmRod) -> HResult {
    ex.push_scope();
    match rod.execute(ex) {
        Ok(status) => {
            ex.pop_scope_normal(status)?;
            Ok(status)
        }
        Err(err) => Err(ex.pop_scope_exceptional(err)),
    }
}

/// Evaluate a short-circuit subexpression over the condition on the top
/// of the stack. An empty rod leaves the condition as the result; with
/// `assign` the result is written through the condition reference.
fn evaluate_subexpression(ex: &mut Executive, assign: bool, rod: &AvmRod) -> HResult {
    if rod.is_empty() {
        return Ok(AirStatus::Next);
    }

    if assign {
        let status = rod.execute(ex)?;
        debug_assert_eq!(status, AirStatus::Next);

        // The result really has to be copied, in case a reference into
        // the left operand itself came back.
        let rhs = ex.top_mut(0).dereference_copy()?;
        ex.stack.pop();
        ex.top_mut(0).write(rhs)?;
        return Ok(AirStatus::Next);
    }

    // Discard the condition, which is overwritten anyway. The status is
    // forwarded because a proper tail call may yield `Return`.
    ex.stack.pop();
    rod.execute(ex)
}

fn get_target_function(re: &Reference, sloc: &Sloc) -> Result<FunctionRef, RuntimeError> {
    let value = re.dereference_readonly().map_err(|e| {
        RuntimeError::format(sloc.clone(), e.value().to_string())
    })?;
    if value.is_null() {
        return Err(RuntimeError::format(
            sloc.clone(),
            "target function not found".to_string(),
        ));
    }
    match value.as_fun() {
        Some(fun) => Ok(fun.clone()),
        None => Err(RuntimeError::format(
            sloc.clone(),
            format!("non-function value not invocable (target `{:?}`)", value),
        )),
    }
}

/// Invoke `target` with the self reference on the stack top and the
/// arguments staged on the alternative stack. A tail-aware call records
/// a pending marker instead and unwinds with `Return`.
fn do_invoke_partial(ex: &mut Executive, sloc: &Sloc, ptc: PtcAware, target: FunctionRef) -> HResult {
    let args = std::mem::take(&mut ex.alt_stack);
    let mut self_ref = match ex.stack.pop() {
        Some(re) => re,
        None => Reference::new_void(),
    };

    if ptc == PtcAware::None {
        if let Some(hooks) = ex.global.hooks() {
            hooks.on_call(sloc, target.describe());
        }
        target.invoke(ex, &mut self_ref, args)?;
        finish_call(ex, &mut self_ref)?;
        ex.stack.push(self_ref);
        return Ok(AirStatus::Next);
    }

    // Record a pending proper tail call; the caller's outer loop will
    // materialize it after this frame unwinds.
    ex.stack.push(Reference::new_tail_call(PendingTailCall {
        sloc: sloc.clone(),
        ptc,
        target,
        self_ref,
        args,
    }));
    Ok(AirStatus::Return)
}

// ─── Handlers: stack control ───────────────────────────────────────

pub fn h_clear_stack(ex: &mut Executive, _rec: &Record) -> HResult {
    ex.stack.clear();
    Ok(AirStatus::Next)
}

pub fn h_alt_clear_stack(ex: &mut Executive, _rec: &Record) -> HResult {
    ex.swap_stacks();
    ex.stack.clear();
    Ok(AirStatus::Next)
}

// ─── Handlers: declarations ────────────────────────────────────────

pub fn h_declare_variable(ex: &mut Executive, rec: &Record) -> HResult {
    let name = match rec.sparam() {
        Sparam::Name { name } => name.clone(),
        _ => unreachable!(),
    };

    // Inject the uninitialized variable, and keep a second reference on
    // the stack to get back once the initializer finishes.
    let var = Variable::new_uninitialized();
    ex.scope
        .borrow_mut()
        .insert(name.clone(), Reference::new_variable(var.clone()));
    if let Some(hooks) = ex.global.hooks() {
        hooks.on_declare(&rec.sloc(), &name);
    }
    ex.stack.push(Reference::new_variable(var));
    Ok(AirStatus::Next)
}

pub fn h_initialize_variable(ex: &mut Executive, rec: &Record) -> HResult {
    let immutable = rec.uparam.b0();

    let val = ex.top(0).dereference_readonly().map_err(|e| {
        RuntimeError::format(rec.sloc(), e.value().to_string())
    })?;
    let var = ex.top(1).variable_opt();
    match var {
        Some(var) => {
            let mut cell = var.borrow_mut();
            cell.initialize(val);
            cell.set_immutable(immutable);
        }
        None => unreachable!("initializer without a declared variable"),
    }
    ex.stack.pop();
    ex.stack.pop();
    Ok(AirStatus::Next)
}

pub fn h_define_null_variable(ex: &mut Executive, rec: &Record) -> HResult {
    let immutable = rec.uparam.b0();
    let name = match rec.sparam() {
        Sparam::Name { name } => name.clone(),
        _ => unreachable!(),
    };

    let var = Variable::new_uninitialized();
    var.borrow_mut().initialize(Value::Null);
    var.borrow_mut().set_immutable(immutable);
    ex.scope
        .borrow_mut()
        .insert(name.clone(), Reference::new_variable(var));
    if let Some(hooks) = ex.global.hooks() {
        hooks.on_declare(&rec.sloc(), &name);
    }
    Ok(AirStatus::Next)
}

pub fn h_declare_reference(ex: &mut Executive, rec: &Record) -> HResult {
    let name = match rec.sparam() {
        Sparam::Name { name } => name.clone(),
        _ => unreachable!(),
    };
    ex.scope.borrow_mut().insert(name, Reference::new_void());
    Ok(AirStatus::Next)
}

pub fn h_initialize_reference(ex: &mut Executive, rec: &Record) -> HResult {
    let name = match rec.sparam() {
        Sparam::Name { name } => name.clone(),
        _ => unreachable!(),
    };
    let re = match ex.stack.pop() {
        Some(re) => re,
        None => Reference::new_void(),
    };
    ex.scope.borrow_mut().insert(name, re);
    Ok(AirStatus::Next)
}

pub fn h_define_function(ex: &mut Executive, rec: &Record) -> HResult {
    let (opts, func, params, code_body) = match rec.sparam() {
        Sparam::DefineFunction {
            opts,
            func,
            params,
            code_body,
        } => (opts, func, params, code_body),
        _ => unreachable!(),
    };

    // Instantiate: capture the surrounding scope by rebinding local
    // references, then solidify.
    let chain = BindChain::for_function(&ex.scope);
    let mut builder = FunctionBuilder::new(*opts);
    builder.rebind(&chain, params.clone(), code_body)?;

    let fun = builder.create_function(rec.sloc(), func);
    ex.stack
        .push(Reference::new_temporary(Value::Fun(fun)));
    Ok(AirStatus::Next)
}

// ─── Handlers: control flow ────────────────────────────────────────

pub fn h_execute_block(ex: &mut Executive, rec: &Record) -> HResult {
    let body = match rec.sparam() {
        Sparam::Block { body } => body,
        _ => unreachable!(),
    };
    // The block may contain control statements, so the status is
    // forwarded verbatim.
    execute_block(ex, body)
}

pub fn h_if_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let negative = rec.uparam.b0();
    let (rod_true, rod_false) = match rec.sparam() {
        Sparam::TwoRods { first, second } => (first, second),
        _ => unreachable!(),
    };

    let test = ex.top(0).dereference_readonly()?.test();
    if test != negative {
        execute_block(ex, rod_true)
    } else {
        execute_block(ex, rod_false)
    }
}

pub fn h_switch_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let clauses = match rec.sparam() {
        Sparam::Switch { clauses } => clauses,
        _ => unreachable!(),
    };

    // The control expression is evaluated exactly once.
    let cond = ex.top(0).dereference_readonly()?;
    let mut target: Option<usize> = None;

    for (k, clause) in clauses.iter().enumerate() {
        match clause.ctype {
            SwitchClauseType::Default => {
                // Matches unconditionally, but a later matching clause
                // still takes precedence.
                target = Some(k);
            }
            SwitchClauseType::Case => {
                let status = clause.rod_labels.execute(ex)?;
                debug_assert_eq!(status, AirStatus::Next);

                let label = ex.top(0).dereference_readonly()?;
                if cond.compare_partial(&label) == crate::value::Compare::Equal {
                    target = Some(k);
                    break;
                }
            }
            SwitchClauseType::Each => {
                let status = clause.rod_labels.execute(ex)?;
                debug_assert_eq!(status, AirStatus::Next);

                // The control must lie within the interval, honoring the
                // recorded open/closed endpoints.
                let lower = ex.top(1).dereference_readonly()?;
                let upper = ex.top(0).dereference_readonly()?;
                let cmp_lo = cond.compare_partial(&lower);
                let cmp_up = cond.compare_partial(&upper);
                let ok_lo = cmp_lo == crate::value::Compare::Greater
                    || (clause.lower_closed && cmp_lo == crate::value::Compare::Equal);
                let ok_up = cmp_up == crate::value::Compare::Less
                    || (clause.upper_closed && cmp_up == crate::value::Compare::Equal);
                if ok_lo && ok_up {
                    target = Some(k);
                    break;
                }
            }
        }
    }

    let target = match target {
        Some(target) => target,
        None => return Ok(AirStatus::Next),
    };

    // Enter the body at the matching clause and fall through from there.
    ex.push_scope();
    let result = (|| -> HResult {
        for (i, clause) in clauses.iter().enumerate() {
            if i < target {
                // Names declared in bypassed clauses still dominate the
                // same reads, but trip the bypassed-initializer error.
                let mut scope = ex.scope.borrow_mut();
                for name in &clause.names_added {
                    scope.insert_invalid(name.clone());
                }
            } else {
                let status = clause.rod_body.execute(ex)?;
                if status != AirStatus::Next {
                    if matches!(status, AirStatus::BreakUnspec | AirStatus::BreakSwitch) {
                        return Ok(AirStatus::Next);
                    }
                    return Ok(status);
                }
            }
        }
        Ok(AirStatus::Next)
    })();

    match result {
        Ok(status) => {
            ex.pop_scope_normal(status)?;
            Ok(status)
        }
        Err(err) => Err(ex.pop_scope_exceptional(err)),
    }
}

pub fn h_do_while_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let negative = rec.uparam.b0();
    let (rod_body, rod_cond) = match rec.sparam() {
        Sparam::TwoRods { first, second } => (first, second),
        _ => unreachable!(),
    };

    loop {
        let status = execute_block(ex, rod_body)?;
        match status {
            AirStatus::Next | AirStatus::ContinueUnspec | AirStatus::ContinueWhile => {}
            AirStatus::BreakUnspec | AirStatus::BreakWhile => break,
            other => return Ok(other),
        }

        let status = rod_cond.execute(ex)?;
        debug_assert_eq!(status, AirStatus::Next);
        if ex.top(0).dereference_readonly()?.test() == negative {
            break;
        }
    }
    Ok(AirStatus::Next)
}

pub fn h_while_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let negative = rec.uparam.b0();
    let (rod_cond, rod_body) = match rec.sparam() {
        Sparam::TwoRods { first, second } => (first, second),
        _ => unreachable!(),
    };

    loop {
        let status = rod_cond.execute(ex)?;
        debug_assert_eq!(status, AirStatus::Next);
        if ex.top(0).dereference_readonly()?.test() == negative {
            break;
        }

        let status = execute_block(ex, rod_body)?;
        match status {
            AirStatus::Next | AirStatus::ContinueUnspec | AirStatus::ContinueWhile => {}
            AirStatus::BreakUnspec | AirStatus::BreakWhile => break,
            other => return Ok(other),
        }
    }
    Ok(AirStatus::Next)
}

pub fn h_for_each_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let (name_key, name_mapped, sloc_init, rod_init, rod_body) = match rec.sparam() {
        Sparam::ForEach {
            name_key,
            name_mapped,
            sloc_init,
            rod_init,
            rod_body,
        } => (name_key, name_mapped, sloc_init, rod_init, rod_body),
        _ => unreachable!(),
    };

    // The key and mapped references outlast every iteration, so they
    // live in an outer scope of their own.
    ex.push_scope();
    let result = (|| -> HResult {
        let key_var = Variable::new_uninitialized();
        {
            let mut scope = ex.scope.borrow_mut();
            if let Some(key) = name_key {
                scope.insert(key.clone(), Reference::new_variable(key_var.clone()));
            }
            scope.insert_invalid(name_mapped.clone());
        }

        // Evaluate the range initializer once; it does not change
        // across iterations.
        let status = rod_init.execute(ex)?;
        debug_assert_eq!(status, AirStatus::Next);

        let base = match ex.stack.pop() {
            Some(re) => re,
            None => Reference::new_void(),
        };
        let range = base.dereference_readonly()?;

        match range {
            Value::Arr(arr) => {
                for i in 0..arr.len() {
                    {
                        let mut key = key_var.borrow_mut();
                        key.initialize(Value::Int(i as i64));
                        key.set_immutable(true);
                    }

                    // Each iteration re-pushes a fresh subscript on the
                    // mapped reference.
                    let mut mapped = base.clone();
                    mapped.push_subscript(Subscript::ArrayIndex(i as i64));
                    ex.scope
                        .borrow_mut()
                        .insert(name_mapped.clone(), mapped);

                    let status = execute_block(ex, rod_body)?;
                    match status {
                        AirStatus::Next
                        | AirStatus::ContinueUnspec
                        | AirStatus::ContinueFor => {}
                        AirStatus::BreakUnspec | AirStatus::BreakFor => break,
                        other => return Ok(other),
                    }
                }
            }
            Value::Obj(obj) => {
                // Keys iterate in insertion order.
                let keys: Vec<Rc<str>> = obj.keys().cloned().collect();
                for key in keys {
                    {
                        let mut cell = key_var.borrow_mut();
                        cell.initialize(Value::Str(key.clone()));
                        cell.set_immutable(true);
                    }

                    let mut mapped = base.clone();
                    mapped.push_subscript(Subscript::ObjectKey(key));
                    ex.scope
                        .borrow_mut()
                        .insert(name_mapped.clone(), mapped);

                    let status = execute_block(ex, rod_body)?;
                    match status {
                        AirStatus::Next
                        | AirStatus::ContinueUnspec
                        | AirStatus::ContinueFor => {}
                        AirStatus::BreakUnspec | AirStatus::BreakFor => break,
                        other => return Ok(other),
                    }
                }
            }
            Value::Null => {
                // A null range iterates zero times.
            }
            other => {
                return Err(RuntimeError::format(
                    sloc_init.clone(),
                    format!("range value not iterable (value `{:?}`)", other),
                ))
            }
        }
        Ok(AirStatus::Next)
    })();

    match result {
        Ok(status) => {
            ex.pop_scope_normal(status)?;
            Ok(status)
        }
        Err(err) => Err(ex.pop_scope_exceptional(err)),
    }
}

pub fn h_for_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let (rod_init, rod_cond, rod_step, rod_body) = match rec.sparam() {
        Sparam::For {
            rod_init,
            rod_cond,
            rod_step,
            rod_body,
        } => (rod_init, rod_cond, rod_step, rod_body),
        _ => unreachable!(),
    };

    // Names declared in the initializer outlast every iteration.
    ex.push_scope();
    let result = (|| -> HResult {
        let status = rod_init.execute(ex)?;
        debug_assert_eq!(status, AirStatus::Next);

        loop {
            // An empty condition is always true, making the loop
            // infinite.
            let status = rod_cond.execute(ex)?;
            debug_assert_eq!(status, AirStatus::Next);
            if !ex.stack.is_empty() && !ex.top(0).dereference_readonly()?.test() {
                break;
            }

            let status = execute_block(ex, rod_body)?;
            match status {
                AirStatus::Next | AirStatus::ContinueUnspec | AirStatus::ContinueFor => {}
                AirStatus::BreakUnspec | AirStatus::BreakFor => break,
                other => return Ok(other),
            }

            let status = rod_step.execute(ex)?;
            debug_assert_eq!(status, AirStatus::Next);
        }
        Ok(AirStatus::Next)
    })();

    match result {
        Ok(status) => {
            ex.pop_scope_normal(status)?;
            Ok(status)
        }
        Err(err) => Err(ex.pop_scope_exceptional(err)),
    }
}

pub fn h_try_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let (rod_try, sloc_catch, name_except, rod_catch) = match rec.sparam() {
        Sparam::Try {
            rod_try,
            sloc_catch,
            name_except,
            rod_catch,
        } => (rod_try, sloc_catch, name_except, rod_catch),
        _ => unreachable!(),
    };

    match execute_block(ex, rod_try) {
        Ok(status) => {
            if status == AirStatus::Return {
                // Materialize a pending tail call inside the `try`, so
                // its exceptions are caught here.
                let mut re = match ex.stack.pop() {
                    Some(re) => re,
                    None => Reference::new_void(),
                };
                finish_call(ex, &mut re)?;
                ex.stack.push(re);
            }
            Ok(status)
        }
        Err(mut except) => {
            // One more frame for the exit of the `try` clause.
            except.push_frame_try(rec.sloc());

            ex.push_scope();
            {
                let mut backtrace = Vec::new();
                for frame in except.frames() {
                    let mut entry = Object::new();
                    entry.insert(Rc::from("frame"), Value::from(frame.ftype.describe()));
                    entry.insert(Rc::from("file"), Value::Str(frame.sloc.file.clone()));
                    entry.insert(Rc::from("line"), Value::Int(frame.sloc.line as i64));
                    entry.insert(Rc::from("column"), Value::Int(frame.sloc.column as i64));
                    entry.insert(Rc::from("value"), frame.value.clone());
                    backtrace.push(Value::Obj(Rc::new(entry)));
                }

                let mut scope = ex.scope.borrow_mut();
                scope.insert(
                    Rc::from("__backtrace"),
                    Reference::new_temporary(Value::Arr(Rc::new(backtrace))),
                );
                scope.insert(
                    name_except.clone(),
                    Reference::new_temporary(except.value().clone()),
                );
            }

            match rod_catch.execute(ex) {
                Ok(status) => {
                    ex.pop_scope_normal(status)?;
                    Ok(status)
                }
                Err(nested) => {
                    let mut nested = ex.pop_scope_exceptional(nested);
                    nested.push_frame_catch(sloc_catch.clone(), except.value().clone());
                    Err(nested)
                }
            }
        }
    }
}

pub fn h_throw_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let val = ex.top_mut(0).dereference_copy().map_err(|e| {
        RuntimeError::format(rec.sloc(), e.value().to_string())
    })?;
    if val.is_null() {
        return Err(RuntimeError::format(
            rec.sloc(),
            "`null` not throwable".to_string(),
        ));
    }
    ex.stack.pop();

    if let Some(hooks) = ex.global.hooks() {
        hooks.on_throw(&rec.sloc(), &val);
    }
    Err(RuntimeError::new_throw(val, rec.sloc()))
}

pub fn h_return_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let by_ref = rec.uparam.b0();
    let is_void = rec.uparam.b1();

    if !is_void && !ex.stack.is_empty() && !ex.top(0).is_void() && !ex.top(0).is_tail_call() {
        // Ensure the result is dereferenceable; a by-value result also
        // converts to a temporary.
        if by_ref {
            ex.top(0).dereference_readonly().map_err(|e| {
                RuntimeError::format(rec.sloc(), e.value().to_string())
            })?;
        } else {
            ex.top_mut(0).dereference_copy().map_err(|e| {
                RuntimeError::format(rec.sloc(), e.value().to_string())
            })?;
        }
    }

    if let Some(hooks) = ex.global.hooks() {
        hooks.on_return(&rec.sloc(), false);
    }
    Ok(if is_void {
        AirStatus::ReturnVoid
    } else {
        AirStatus::Return
    })
}

pub fn h_return_statement_bi32(ex: &mut Executive, rec: &Record) -> HResult {
    let vtype = Bi32Type::from_u8(rec.uparam.u0());
    let irhs = rec.uparam.i4567();

    let value = match vtype {
        Bi32Type::Null => Value::Null,
        Bi32Type::Bool => Value::Bool(irhs != 0),
        Bi32Type::Int => Value::Int(irhs as i64),
    };
    ex.stack.push(Reference::new_temporary(value));

    if let Some(hooks) = ex.global.hooks() {
        hooks.on_return(&rec.sloc(), false);
    }
    Ok(AirStatus::Return)
}

pub fn h_simple_status(_ex: &mut Executive, rec: &Record) -> HResult {
    Ok(AirStatus::from_u8(rec.uparam.u0()))
}

pub fn h_assert_statement(ex: &mut Executive, rec: &Record) -> HResult {
    let msg = match rec.sparam() {
        Sparam::AssertMsg { msg } => msg,
        _ => unreachable!(),
    };

    // This check cannot be disabled.
    let tval = ex.top(0).dereference_readonly()?;
    if !tval.test() {
        return Err(RuntimeError::new_assert(rec.sloc(), msg.clone()));
    }
    Ok(AirStatus::Next)
}

pub fn h_defer_expression(ex: &mut Executive, rec: &Record) -> HResult {
    let code_body = match rec.sparam() {
        Sparam::DeferBody { code_body } => code_body,
        _ => unreachable!(),
    };

    // Capture local references now; the expression itself stays
    // unevaluated until scope exit.
    let mut bound = code_body.clone();
    rebind_nodes(&mut bound, &BindChain::for_defer(&ex.scope))?;
    let rod = solidify_nodes(&bound);
    ex.scope.borrow_mut().push_defer(rec.sloc(), rod);
    Ok(AirStatus::Next)
}

pub fn h_single_step_trap(ex: &mut Executive, rec: &Record) -> HResult {
    if let Some(hooks) = ex.global.hooks() {
        hooks.on_trap(&rec.sloc());
    }
    Ok(AirStatus::Next)
}

// ─── Handlers: references ──────────────────────────────────────────

pub fn h_push_global_reference(ex: &mut Executive, rec: &Record) -> HResult {
    let name = match rec.sparam() {
        Sparam::Name { name } => name,
        _ => unreachable!(),
    };

    let re = ex.global.get_named_reference_opt(name).ok_or_else(|| {
        RuntimeError::format(rec.sloc(), format!("undeclared identifier `{}`", name))
    })?;
    if re.is_invalid() {
        return Err(RuntimeError::format(
            rec.sloc(),
            format!("global reference `{}` is uninitialized", name),
        ));
    }
    ex.stack.push(re);
    Ok(AirStatus::Next)
}

pub fn h_push_local_reference(ex: &mut Executive, rec: &Record) -> HResult {
    let depth = rec.uparam.u23() as u32;
    let name = match rec.sparam() {
        Sparam::Name { name } => name,
        _ => unreachable!(),
    };

    let scope = Scope::walk(&ex.scope, depth).ok_or_else(|| {
        RuntimeError::format(rec.sloc(), format!("undeclared identifier `{}`", name))
    })?;
    let found = scope.borrow().get(name);
    let re = found.ok_or_else(|| {
        RuntimeError::format(rec.sloc(), format!("undeclared identifier `{}`", name))
    })?;
    if re.is_invalid() {
        return Err(RuntimeError::format(
            rec.sloc(),
            format!("initialization of `{}` was bypassed", name),
        ));
    }
    ex.stack.push(re);
    Ok(AirStatus::Next)
}

pub fn h_push_bound_reference(ex: &mut Executive, rec: &Record) -> HResult {
    let bref = match rec.sparam() {
        Sparam::BoundRef { bref } => bref.clone(),
        _ => unreachable!(),
    };
    ex.stack.push(bref);
    Ok(AirStatus::Next)
}

pub fn h_member_access(ex: &mut Executive, rec: &Record) -> HResult {
    let key = match rec.sparam() {
        Sparam::Name { name } => name.clone(),
        _ => unreachable!(),
    };
    ex.top_mut(0).push_subscript(Subscript::ObjectKey(key));
    ex.top(0).dereference_readonly().map_err(|e| {
        RuntimeError::format(rec.sloc(), e.value().to_string())
    })?;
    Ok(AirStatus::Next)
}

// ─── Handlers: construction ────────────────────────────────────────

pub fn h_push_constant(ex: &mut Executive, rec: &Record) -> HResult {
    let value = match rec.sparam() {
        Sparam::Constant { value } => value.clone(),
        _ => unreachable!(),
    };
    ex.stack.push(Reference::new_temporary(value));
    Ok(AirStatus::Next)
}

pub fn h_push_unnamed_array(ex: &mut Executive, rec: &Record) -> HResult {
    let nelems = rec.uparam.u4567() as usize;

    // Pop elements and fill them from right to left.
    let mut arr = vec![Value::Null; nelems];
    for slot in arr.iter_mut().rev() {
        *slot = ex.top(0).dereference_readonly()?;
        ex.stack.pop();
    }
    ex.stack
        .push(Reference::new_temporary(Value::Arr(Rc::new(arr))));
    Ok(AirStatus::Next)
}

pub fn h_push_unnamed_object(ex: &mut Executive, rec: &Record) -> HResult {
    let keys = match rec.sparam() {
        Sparam::Keys { keys } => keys,
        _ => unreachable!(),
    };

    // Values sit on the stack in key order; collect them right to left,
    // then insert left to right so iteration follows the source order.
    let mut values = vec![Value::Null; keys.len()];
    for slot in values.iter_mut().rev() {
        *slot = ex.top(0).dereference_readonly()?;
        ex.stack.pop();
    }

    let mut obj = Object::new();
    for (key, value) in keys.iter().zip(values) {
        obj.insert(key.clone(), value);
    }
    ex.stack
        .push(Reference::new_temporary(Value::Obj(Rc::new(obj))));
    Ok(AirStatus::Next)
}

// ─── Handlers: structured binding ──────────────────────────────────

pub fn h_unpack_array(ex: &mut Executive, rec: &Record) -> HResult {
    let immutable = rec.uparam.b0();
    let nelems = rec.uparam.u4567() as usize;

    let init = ex.top(0).dereference_readonly()?;
    ex.stack.pop();
    let elems = match &init {
        Value::Arr(arr) => Some(arr.clone()),
        Value::Null => None,
        other => {
            return Err(RuntimeError::format(
                rec.sloc(),
                format!("initializer was not an array (value was `{:?}`)", other),
            ))
        }
    };

    // Pop variables from right to left.
    for i in (0..nelems).rev() {
        let var = ex.top(0).variable_opt();
        ex.stack.pop();
        match var {
            Some(var) => {
                let value = elems
                    .as_ref()
                    .and_then(|arr| arr.get(i).cloned())
                    .unwrap_or(Value::Null);
                let mut cell = var.borrow_mut();
                cell.initialize(value);
                cell.set_immutable(immutable);
            }
            None => unreachable!("structured binding without a declared variable"),
        }
    }
    Ok(AirStatus::Next)
}

pub fn h_unpack_object(ex: &mut Executive, rec: &Record) -> HResult {
    let immutable = rec.uparam.b0();
    let keys = match rec.sparam() {
        Sparam::Keys { keys } => keys,
        _ => unreachable!(),
    };

    let init = ex.top(0).dereference_readonly()?;
    ex.stack.pop();
    let entries = match &init {
        Value::Obj(obj) => Some(obj.clone()),
        Value::Null => None,
        other => {
            return Err(RuntimeError::format(
                rec.sloc(),
                format!("initializer was not an object (value was `{:?}`)", other),
            ))
        }
    };

    for key in keys.iter().rev() {
        let var = ex.top(0).variable_opt();
        ex.stack.pop();
        match var {
            Some(var) => {
                let value = entries
                    .as_ref()
                    .and_then(|obj| obj.get(key).cloned())
                    .unwrap_or(Value::Null);
                let mut cell = var.borrow_mut();
                cell.initialize(value);
                cell.set_immutable(immutable);
            }
            None => unreachable!("structured binding without a declared variable"),
        }
    }
    Ok(AirStatus::Next)
}

// ─── Handlers: evaluation ──────────────────────────────────────────

pub fn h_apply_operator(ex: &mut Executive, rec: &Record) -> HResult {
    let assign = rec.uparam.b0();
    let xop = Xop::from_u8(rec.uparam.u1());
    ops::apply(ex, &rec.sloc(), xop, assign, None)?;
    Ok(AirStatus::Next)
}

pub fn h_apply_operator_bi32(ex: &mut Executive, rec: &Record) -> HResult {
    let assign = rec.uparam.b0();
    let xop = Xop::from_u8(rec.uparam.u1());
    let irhs = rec.uparam.i4567() as i64;
    ops::apply(ex, &rec.sloc(), xop, assign, Some(Value::Int(irhs)))?;
    Ok(AirStatus::Next)
}

pub fn h_branch_expression(ex: &mut Executive, rec: &Record) -> HResult {
    let assign = rec.uparam.b0();
    let (rod_true, rod_false) = match rec.sparam() {
        Sparam::TwoRods { first, second } => (first, second),
        _ => unreachable!(),
    };

    if ex.top(0).dereference_readonly()?.test() {
        evaluate_subexpression(ex, assign, rod_true)
    } else {
        evaluate_subexpression(ex, assign, rod_false)
    }
}

pub fn h_coalesce_expression(ex: &mut Executive, rec: &Record) -> HResult {
    let assign = rec.uparam.b0();
    let rod_null = match rec.sparam() {
        Sparam::Block { body } => body,
        _ => unreachable!(),
    };

    if ex.top(0).dereference_readonly()?.is_null() {
        evaluate_subexpression(ex, assign, rod_null)
    } else {
        Ok(AirStatus::Next)
    }
}

pub fn h_catch_expression(ex: &mut Executive, rec: &Record) -> HResult {
    let body = match rec.sparam() {
        Sparam::Block { body } => body,
        _ => unreachable!(),
    };

    // Save the current partial expression while the operand evaluates.
    let saved = std::mem::take(&mut ex.stack);

    let exval = match body.execute(ex) {
        Ok(_) => Value::Null,
        Err(except) => except.value().clone(),
    };

    ex.stack = saved;
    ex.stack.push(Reference::new_temporary(exval));
    Ok(AirStatus::Next)
}

// ─── Handlers: checks ──────────────────────────────────────────────

pub fn h_check_argument(ex: &mut Executive, rec: &Record) -> HResult {
    let by_ref = rec.uparam.b0();

    // The argument must be dereferenceable; a by-value argument also
    // converts to a temporary.
    if by_ref {
        ex.top(0).dereference_readonly().map_err(|e| {
            RuntimeError::format(rec.sloc(), e.value().to_string())
        })?;
    } else {
        ex.top_mut(0).dereference_copy().map_err(|e| {
            RuntimeError::format(rec.sloc(), e.value().to_string())
        })?;
    }
    Ok(AirStatus::Next)
}

pub fn h_check_null(ex: &mut Executive, rec: &Record) -> HResult {
    let negative = rec.uparam.b0();
    let value = ex.top(0).dereference_readonly()?;
    ex.top_mut(0)
        .set_temporary(Value::Bool(value.is_null() != negative));
    Ok(AirStatus::Next)
}

// ─── Handlers: calls ───────────────────────────────────────────────

pub fn h_function_call(ex: &mut Executive, rec: &Record) -> HResult {
    let ptc = PtcAware::from_u8(rec.uparam.u0());
    let nargs = rec.uparam.u4567() as usize;
    let sloc = rec.sloc();

    // Collect arguments from left to right.
    ex.alt_stack.clear();
    let split_at = ex.stack.len() - nargs;
    let args = ex.stack.split_off(split_at);
    ex.alt_stack = args;

    let target = get_target_function(ex.top(0), &sloc)?;
    ex.top_mut(0).pop_subscript();
    do_invoke_partial(ex, &sloc, ptc, target)
}

pub fn h_alt_function_call(ex: &mut Executive, rec: &Record) -> HResult {
    let ptc = PtcAware::from_u8(rec.uparam.u0());
    let sloc = rec.sloc();

    // The argument frame is already staged on the alternative stack.
    ex.swap_stacks();

    let target = get_target_function(ex.top(0), &sloc)?;
    ex.top_mut(0).pop_subscript();
    do_invoke_partial(ex, &sloc, ptc, target)
}

pub fn h_variadic_call(ex: &mut Executive, rec: &Record) -> HResult {
    let ptc = PtcAware::from_u8(rec.uparam.u0());
    let sloc = rec.sloc();

    let generator_value = ex.top(0).dereference_readonly()?;
    match generator_value {
        Value::Null => {
            // No arguments for the target function.
            ex.alt_stack.clear();
            ex.stack.pop();
        }

        Value::Arr(arr) => {
            // Each element becomes one temporary argument, left to
            // right.
            ex.alt_stack.clear();
            for val in arr.iter() {
                ex.alt_stack.push(Reference::new_temporary(val.clone()));
            }
            ex.stack.pop();
        }

        Value::Fun(generator) => {
            // Query the generator once with no arguments for the count.
            ex.top_mut(0).pop_subscript();
            let gself = match ex.stack.pop() {
                Some(re) => re,
                None => Reference::new_void(),
            };

            let mut probe = gself.clone();
            if let Some(hooks) = ex.global.hooks() {
                hooks.on_call(&sloc, generator.describe());
            }
            generator.invoke(ex, &mut probe, Vec::new())?;
            finish_call(ex, &mut probe)?;
            let count_value = probe.dereference_readonly()?;

            let count = count_value.as_int().filter(|n| (0..=i32::MAX as i64).contains(n));
            let count = count.ok_or_else(|| {
                RuntimeError::format(
                    sloc.clone(),
                    format!("invalid number of variadic arguments (value `{:?}`)", count_value),
                )
            })? as usize;

            // Then query it once per index, in ascending order.
            let mut collected = Vec::with_capacity(count);
            for k in 0..count {
                let mut out = gself.clone();
                generator.invoke(
                    ex,
                    &mut out,
                    vec![Reference::new_temporary(Value::Int(k as i64))],
                )?;
                finish_call(ex, &mut out)?;
                out.dereference_readonly()?;
                collected.push(out);
            }
            ex.alt_stack = collected;
        }

        other => {
            return Err(RuntimeError::format(
                sloc,
                format!("invalid variadic argument generator (value `{:?}`)", other),
            ))
        }
    }

    let target = get_target_function(ex.top(0), &sloc)?;
    ex.top_mut(0).pop_subscript();
    do_invoke_partial(ex, &sloc, ptc, target)
}

pub fn h_import_call(ex: &mut Executive, rec: &Record) -> HResult {
    let nargs = rec.uparam.u4567() as usize;
    let opts = match rec.sparam() {
        Sparam::ImportOpts { opts } => *opts,
        _ => unreachable!(),
    };
    let sloc = rec.sloc();

    // Collect the trailing arguments; the first argument is the path.
    ex.alt_stack.clear();
    let split_at = ex.stack.len() - (nargs - 1);
    let args = ex.stack.split_off(split_at);
    ex.alt_stack = args;

    let path_val = ex.top(0).dereference_readonly()?;
    let path_str = path_val.as_str().ok_or_else(|| {
        RuntimeError::format(
            sloc.clone(),
            format!("path was not a string (value `{:?}`)", path_val),
        )
    })?;
    if path_str.is_empty() {
        return Err(RuntimeError::format(sloc.clone(), "path was empty".to_string()));
    }

    // A relative path is relative to the caller's file.
    let mut path = PathBuf::from(&**path_str);
    if path.is_relative() {
        if let Some(dir) = Path::new(&*sloc.file).parent() {
            path = dir.join(path);
        }
    }

    let stream = ex.global.loader().open(&path, &sloc)?;
    let abs_path: Rc<str> = Rc::from(stream.path().to_string_lossy().as_ref());
    debug!("importing module '{}'", abs_path);

    // Run the full front end on the module contents, as a variadic
    // function.
    let compiled = (|| -> Result<FunctionRef, crate::diagnostic::CompilerError> {
        let mut cursor = Cursor::new(stream.contents().as_bytes().to_vec());
        let tokens = Lexer::new(opts).tokenize(abs_path.clone(), 1, &mut cursor)?;
        let mut tq = TokenQueue::new(tokens);
        let stmts = Parser::new(&mut tq).parse_document()?;

        let mut builder = FunctionBuilder::new(opts);
        builder.reload(None, vec![Rc::from("...")], ex.global.as_ref(), &stmts)?;
        Ok(builder.create_function(Sloc::new(abs_path.clone(), 0, 0), "[file scope]"))
    })();

    let target = compiled
        .map_err(|cerr| RuntimeError::format(sloc.clone(), cerr.to_string()))?;

    // Invoke without `this`.
    ex.top_mut(0).clear();
    let status = do_invoke_partial(ex, &sloc, PtcAware::None, target);
    drop(stream);
    status
}
