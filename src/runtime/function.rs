use std::rc::Rc;

use crate::air::rod::{solidify_nodes, AvmRod};
use crate::air::{AirNode, AirStatus, PtcAware};
use crate::runtime::ctx::Scope;
use crate::runtime::error::RuntimeError;
use crate::runtime::executive::Executive;
use crate::runtime::reference::{PendingTailCall, Reference, VariableSet};
use crate::sloc::Sloc;
use crate::value::Value;

/// A callable value. The interpreter invokes script functions and host
/// bindings through this one seam; the result is stored into `self_ref`.
pub trait AbstractFunction {
    fn describe(&self) -> &str;

    fn invoke(
        &self,
        ex: &mut Executive,
        self_ref: &mut Reference,
        args: Vec<Reference>,
    ) -> Result<(), RuntimeError>;

    fn collect_variables(&self, _out: &mut VariableSet) {}
}

pub type FunctionRef = Rc<dyn AbstractFunction>;

/// A function instantiated from compiled AIR: parameters plus a sealed
/// body rod.
pub struct InstantiatedFunction {
    sloc: Sloc,
    func: String,
    params: Vec<Rc<str>>,
    body: AvmRod,
}

impl InstantiatedFunction {
    pub fn new(sloc: Sloc, func: String, params: Vec<Rc<str>>, code: &[AirNode]) -> Self {
        Self {
            sloc,
            func,
            params,
            body: solidify_nodes(code),
        }
    }

    pub fn sloc(&self) -> &Sloc {
        &self.sloc
    }
}

impl AbstractFunction for InstantiatedFunction {
    fn describe(&self) -> &str {
        &self.func
    }

    fn invoke(
        &self,
        ex: &mut Executive,
        self_ref: &mut Reference,
        mut args: Vec<Reference>,
    ) -> Result<(), RuntimeError> {
        let _depth = ex.global.enter_call(&self.sloc)?;

        // Each invocation gets fresh stacks and a fresh function-root
        // scope; the caller's state is restored on the way out.
        let saved_stack = std::mem::take(&mut ex.stack);
        let saved_alt = std::mem::take(&mut ex.alt_stack);
        let saved_scope = std::mem::replace(&mut ex.scope, Scope::new_root());

        {
            let mut scope = ex.scope.borrow_mut();

            let named: Vec<&Rc<str>> = self
                .params
                .iter()
                .filter(|p| &***p != "...")
                .collect();
            let nnamed = named.len();
            let extras = if args.len() > nnamed {
                args.split_off(nnamed)
            } else {
                Vec::new()
            };

            for (i, param) in named.into_iter().enumerate() {
                let bound = args
                    .get_mut(i)
                    .map(std::mem::take)
                    .unwrap_or_else(|| Reference::new_temporary(Value::Null));
                scope.insert(param.clone(), bound);
            }

            scope.insert(Rc::from("__this"), self_ref.clone());
            scope.insert(
                Rc::from("__func"),
                Reference::new_temporary(Value::from(self.func.as_str())),
            );
            scope.insert(
                Rc::from("__varg"),
                Reference::new_temporary(Value::Fun(Rc::new(VariadicArguer::new(
                    self.sloc.clone(),
                    self.func.clone(),
                    extras,
                )))),
            );
        }

        let outcome = self.body.execute(ex);

        let result = match outcome {
            Ok(status) => {
                // Take the result off the stack before the deferred
                // expressions get a chance to clobber it.
                let popped = match status {
                    AirStatus::Return => ex.stack.pop(),
                    _ => None,
                };
                match ex.pop_function_scope_normal() {
                    Ok(()) => Ok(popped.unwrap_or_else(Reference::new_void)),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(ex.pop_function_scope_exceptional(err)),
        };

        ex.stack = saved_stack;
        ex.alt_stack = saved_alt;
        ex.scope = saved_scope;

        match result {
            Ok(re) => {
                *self_ref = re;
                Ok(())
            }
            Err(mut err) => {
                err.push_frame_func(self.sloc.clone(), &self.func);
                Err(err)
            }
        }
    }

    fn collect_variables(&self, out: &mut VariableSet) {
        self.body.collect_variables(out);
    }
}

/// The function bound to `__varg`: queried with no arguments it yields
/// the count of extra arguments; with one integer index it yields that
/// argument. This is also the protocol variadic generators follow.
pub struct VariadicArguer {
    sloc: Sloc,
    func: String,
    vargs: Vec<Reference>,
}

impl VariadicArguer {
    pub fn new(sloc: Sloc, func: String, vargs: Vec<Reference>) -> Self {
        Self { sloc, func, vargs }
    }
}

impl AbstractFunction for VariadicArguer {
    fn describe(&self) -> &str {
        &self.func
    }

    fn invoke(
        &self,
        _ex: &mut Executive,
        self_ref: &mut Reference,
        args: Vec<Reference>,
    ) -> Result<(), RuntimeError> {
        if args.is_empty() {
            *self_ref = Reference::new_temporary(Value::Int(self.vargs.len() as i64));
            return Ok(());
        }

        let index = args[0].dereference_readonly()?;
        let index = index.as_int().ok_or_else(|| {
            RuntimeError::format(
                self.sloc.clone(),
                format!("variadic argument index not an integer (value `{:?}`)", index),
            )
        })?;

        match usize::try_from(index).ok().and_then(|i| self.vargs.get(i)) {
            Some(arg) => *self_ref = arg.clone(),
            None => *self_ref = Reference::new_temporary(Value::Null),
        }
        Ok(())
    }

    fn collect_variables(&self, out: &mut VariableSet) {
        for arg in &self.vargs {
            arg.collect_variables(out);
        }
    }
}

/// Materialize pending tail calls held by `re`, invoking each target in
/// a loop so call depth stays bounded, then apply the strictest result
/// conversion recorded along the chain.
pub fn finish_call(ex: &mut Executive, re: &mut Reference) -> Result<(), RuntimeError> {
    let mut saw_void = false;
    let mut saw_by_val = false;
    let mut materialized = false;

    while let Some(pending) = re.take_pending_call() {
        materialized = true;
        match pending.ptc {
            PtcAware::Void => saw_void = true,
            PtcAware::ByVal => saw_by_val = true,
            _ => {}
        }

        let PendingTailCall {
            sloc,
            target,
            mut self_ref,
            args,
            ..
        } = pending;

        if let Some(hooks) = ex.global.hooks() {
            hooks.on_call(&sloc, target.describe());
        }
        target.invoke(ex, &mut self_ref, args)?;
        *re = self_ref;
    }

    if materialized {
        if saw_void {
            re.clear();
        } else if saw_by_val && !re.is_void() {
            re.dereference_copy()?;
        }
    }
    Ok(())
}
