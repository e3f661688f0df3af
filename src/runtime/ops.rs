//! Per-operator inline code for `apply-operator` records: type dispatch
//! and the overflow, saturation and modular rules of each operator.

use std::rc::Rc;

use crate::ast::Xop;
use crate::runtime::error::RuntimeError;
use crate::runtime::executive::Executive;
use crate::runtime::reference::Subscript;
use crate::sloc::Sloc;
use crate::value::{Compare, Value};

type OResult = Result<(), RuntimeError>;

fn err(sloc: &Sloc, msg: String) -> RuntimeError {
    RuntimeError::format(sloc.clone(), msg)
}

/// Apply one operator to the stack. Binary operators read their right
/// operand from `imm_rhs` when the 32-bit literal fast path supplied
/// one, and from the stack otherwise.
pub fn apply(
    ex: &mut Executive,
    sloc: &Sloc,
    xop: Xop,
    assign: bool,
    imm_rhs: Option<Value>,
) -> OResult {
    match xop {
        // ─── Unary, in place ───────────────────────────────────────
        Xop::Inc => apply_incdec(ex, sloc, assign, 1),
        Xop::Dec => apply_incdec(ex, sloc, assign, -1),

        Xop::Unset => {
            let old = ex.top_mut(0).unset().map_err(|e| relocate(e, sloc))?;
            ex.top_mut(0).set_temporary(old);
            Ok(())
        }

        Xop::Head => push_checked_subscript(ex, sloc, Subscript::ArrayHead),
        Xop::Tail => push_checked_subscript(ex, sloc, Subscript::ArrayTail),
        Xop::Random => {
            let seed = ex.global.random_bump();
            push_checked_subscript(ex, sloc, Subscript::ArrayRandom(seed))
        }

        Xop::Isvoid => {
            let is_void = ex.top(0).is_void();
            ex.top_mut(0).set_temporary(Value::Bool(is_void));
            Ok(())
        }

        Xop::Pos => {
            // No computation; with `assign` this still validates that
            // the operand is modifiable.
            if assign {
                ex.top_mut(0)
                    .modify(|_| Ok(()))
                    .map_err(|e| relocate(e, sloc))
            } else {
                ex.top_mut(0)
                    .dereference_copy()
                    .map(|_| ())
                    .map_err(|e| relocate(e, sloc))
            }
        }

        Xop::Neg => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| err(sloc, format!("integer negation overflow (operand was `{}`)", i))),
            Value::Real(r) => Ok(Value::Real(-*r)),
            other => Err(err(
                sloc,
                format!("negation not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Notb => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Bool(b) => Ok(Value::Bool(!*b)),
            Value::Int(i) => Ok(Value::Int(!*i)),
            other => Err(err(
                sloc,
                format!("bitwise NOT not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Notl => unary(ex, sloc, assign, |v, _| Ok(Value::Bool(!v.test()))),

        Xop::Countof => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Null => Ok(Value::Int(0)),
            Value::Str(s) => Ok(Value::Int(s.len() as i64)),
            Value::Arr(a) => Ok(Value::Int(a.len() as i64)),
            Value::Obj(o) => Ok(Value::Int(o.len() as i64)),
            other => Err(err(
                sloc,
                format!("`countof` not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Typeof => unary(ex, sloc, assign, |v, _| Ok(Value::from(v.type_name()))),

        Xop::Sqrt => unary_real(ex, sloc, assign, "__sqrt", f64::sqrt),

        Xop::Isnan => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(_) => Ok(Value::Bool(false)),
            Value::Real(r) => Ok(Value::Bool(r.is_nan())),
            other => Err(err(
                sloc,
                format!("`__isnan` not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Isinf => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(_) => Ok(Value::Bool(false)),
            Value::Real(r) => Ok(Value::Bool(r.is_infinite())),
            other => Err(err(
                sloc,
                format!("`__isinf` not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Abs => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| {
                err(sloc, format!("integer absolute value overflow (operand was `{}`)", i))
            }),
            Value::Real(r) => Ok(Value::Real(r.abs())),
            other => Err(err(
                sloc,
                format!("`__abs` not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Sign => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(i) => Ok(Value::Bool(*i < 0)),
            Value::Real(r) => Ok(Value::Bool(r.is_sign_negative())),
            other => Err(err(
                sloc,
                format!("`__sign` not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Round => unary_rounding(ex, sloc, assign, "__round", round_half_away),
        Xop::Floor => unary_rounding(ex, sloc, assign, "__floor", f64::floor),
        Xop::Ceil => unary_rounding(ex, sloc, assign, "__ceil", f64::ceil),
        Xop::Trunc => unary_rounding(ex, sloc, assign, "__trunc", f64::trunc),

        Xop::Iround => unary_int_rounding(ex, sloc, assign, "__iround", round_half_away),
        Xop::Ifloor => unary_int_rounding(ex, sloc, assign, "__ifloor", f64::floor),
        Xop::Iceil => unary_int_rounding(ex, sloc, assign, "__iceil", f64::ceil),
        Xop::Itrunc => unary_int_rounding(ex, sloc, assign, "__itrunc", f64::trunc),

        Xop::Lzcnt => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(i) => Ok(Value::Int(i.leading_zeros() as i64)),
            other => Err(err(
                sloc,
                format!("`__lzcnt` not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Tzcnt => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(i) => Ok(Value::Int(i.trailing_zeros() as i64)),
            other => Err(err(
                sloc,
                format!("`__tzcnt` not applicable (operand was `{:?}`)", other),
            )),
        }),

        Xop::Popcnt => unary(ex, sloc, assign, |v, sloc| match v {
            Value::Int(i) => Ok(Value::Int(i.count_ones() as i64)),
            other => Err(err(
                sloc,
                format!("`__popcnt` not applicable (operand was `{:?}`)", other),
            )),
        }),

        // ─── Assignment and subscripts ─────────────────────────────
        Xop::Assign => {
            let rhs = match imm_rhs {
                Some(v) => v,
                None => {
                    let v = ex
                        .top_mut(0)
                        .dereference_copy()
                        .map_err(|e| relocate(e, sloc))?;
                    ex.stack.pop();
                    v
                }
            };
            ex.top_mut(0).write(rhs).map_err(|e| relocate(e, sloc))
        }

        Xop::Index => {
            let rhs = match imm_rhs {
                Some(v) => v,
                None => {
                    let v = ex
                        .top_mut(0)
                        .dereference_copy()
                        .map_err(|e| relocate(e, sloc))?;
                    ex.stack.pop();
                    v
                }
            };
            match rhs {
                Value::Int(i) => push_checked_subscript(ex, sloc, Subscript::ArrayIndex(i)),
                Value::Str(s) => push_checked_subscript(ex, sloc, Subscript::ObjectKey(s)),
                other => Err(err(
                    sloc,
                    format!("subscript value not valid (operand was `{:?}`)", other),
                )),
            }
        }

        // ─── Comparisons ───────────────────────────────────────────
        Xop::CmpEq => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, _| {
            let cmp = lhs.compare_partial(rhs);
            *lhs = Value::Bool(cmp == Compare::Equal);
            Ok(())
        }),

        Xop::CmpNe => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, _| {
            let cmp = lhs.compare_partial(rhs);
            *lhs = Value::Bool(cmp != Compare::Equal);
            Ok(())
        }),

        Xop::CmpUn => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, _| {
            let cmp = lhs.compare_partial(rhs);
            *lhs = Value::Bool(cmp == Compare::Unordered);
            Ok(())
        }),

        Xop::CmpLt => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            *lhs = Value::Bool(compare_total(lhs, rhs, sloc)? == Compare::Less);
            Ok(())
        }),

        Xop::CmpGt => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            *lhs = Value::Bool(compare_total(lhs, rhs, sloc)? == Compare::Greater);
            Ok(())
        }),

        Xop::CmpLte => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            *lhs = Value::Bool(compare_total(lhs, rhs, sloc)? != Compare::Greater);
            Ok(())
        }),

        Xop::CmpGte => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            *lhs = Value::Bool(compare_total(lhs, rhs, sloc)? != Compare::Less);
            Ok(())
        }),

        Xop::Cmp3way => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, _| {
            *lhs = match lhs.compare_partial(rhs) {
                Compare::Less => Value::Int(-1),
                Compare::Equal => Value::Int(0),
                Compare::Greater => Value::Int(1),
                Compare::Unordered => Value::from("[unordered]"),
            };
            Ok(())
        }),

        // ─── Arithmetic ────────────────────────────────────────────
        Xop::Add => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    let r = a.checked_add(*b).ok_or_else(|| {
                        err(sloc, format!("integer addition overflow (operands were `{}` and `{}`)", a, b))
                    })?;
                    *lhs = Value::Int(r);
                }
                (a, b) if a.is_real_like() && b.is_real_like() => {
                    *lhs = Value::Real(real_of(a) + real_of(b));
                }
                (Value::Bool(a), Value::Bool(b)) => *lhs = Value::Bool(*a | *b),
                (Value::Str(a), Value::Str(b)) => {
                    let mut s = a.to_string();
                    s.push_str(b);
                    *lhs = Value::Str(Rc::from(s));
                }
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("addition not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        Xop::Sub => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    let r = a.checked_sub(*b).ok_or_else(|| {
                        err(sloc, format!("integer subtraction overflow (operands were `{}` and `{}`)", a, b))
                    })?;
                    *lhs = Value::Int(r);
                }
                (a, b) if a.is_real_like() && b.is_real_like() => {
                    *lhs = Value::Real(real_of(a) - real_of(b));
                }
                (Value::Bool(a), Value::Bool(b)) => *lhs = Value::Bool(*a ^ *b),
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("subtraction not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        Xop::Mul => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    let r = a.checked_mul(*b).ok_or_else(|| {
                        err(sloc, format!("integer multiplication overflow (operands were `{}` and `{}`)", a, b))
                    })?;
                    *lhs = Value::Int(r);
                }
                (a, b) if a.is_real_like() && b.is_real_like() => {
                    *lhs = Value::Real(real_of(a) * real_of(b));
                }
                (Value::Bool(a), Value::Bool(b)) => *lhs = Value::Bool(*a & *b),
                (Value::Str(a), Value::Int(n)) => {
                    *lhs = Value::Str(duplicate_str(a, *n, sloc)?);
                }
                (Value::Int(n), Value::Str(b)) => {
                    *lhs = Value::Str(duplicate_str(b, *n, sloc)?);
                }
                (Value::Arr(a), Value::Int(n)) => {
                    *lhs = Value::Arr(Rc::new(duplicate_arr(a, *n, sloc)?));
                }
                (Value::Int(n), Value::Arr(b)) => {
                    *lhs = Value::Arr(Rc::new(duplicate_arr(b, *n, sloc)?));
                }
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("multiplication not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        Xop::Div => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        return Err(err(sloc, format!("integer division by zero (operands were `{}` and `{}`)", a, b)));
                    }
                    if *a == i64::MIN && *b == -1 {
                        return Err(err(sloc, format!("integer division overflow (operands were `{}` and `{}`)", a, b)));
                    }
                    *lhs = Value::Int(a / b);
                }
                (a, b) if a.is_real_like() && b.is_real_like() => {
                    *lhs = Value::Real(real_of(a) / real_of(b));
                }
                (Value::Str(a), Value::Str(b)) => {
                    // Path concatenation.
                    let mut s = a.to_string();
                    s.push('/');
                    s.push_str(b);
                    *lhs = Value::Str(Rc::from(s));
                }
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("division not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        Xop::Mod => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        return Err(err(sloc, format!("integer division by zero (operands were `{}` and `{}`)", a, b)));
                    }
                    if *a == i64::MIN && *b == -1 {
                        return Err(err(sloc, format!("integer division overflow (operands were `{}` and `{}`)", a, b)));
                    }
                    *lhs = Value::Int(a % b);
                }
                (a, b) if a.is_real_like() && b.is_real_like() => {
                    *lhs = Value::Real(real_of(a) % real_of(b));
                }
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("modulo not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        // ─── Bitwise ───────────────────────────────────────────────
        Xop::Andb => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Bool(a), Value::Bool(b)) => *lhs = Value::Bool(a & b),
                (Value::Int(a), Value::Int(b)) => *lhs = Value::Int(a & b),
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("bitwise AND not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        Xop::Orb => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Bool(a), Value::Bool(b)) => *lhs = Value::Bool(a | b),
                (Value::Int(a), Value::Int(b)) => *lhs = Value::Int(a | b),
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("bitwise OR not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        Xop::Xorb => binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
            match (&*lhs, rhs) {
                (Value::Bool(a), Value::Bool(b)) => *lhs = Value::Bool(a ^ b),
                (Value::Int(a), Value::Int(b)) => *lhs = Value::Int(a ^ b),
                (a, b) => {
                    return Err(err(
                        sloc,
                        format!("bitwise XOR not applicable (operands were `{:?}` and `{:?}`)", a, b),
                    ))
                }
            }
            Ok(())
        }),

        // ─── Shifts ────────────────────────────────────────────────
        Xop::Sll => shift(ex, sloc, assign, imm_rhs, ShiftKind::LogicalLeft),
        Xop::Srl => shift(ex, sloc, assign, imm_rhs, ShiftKind::LogicalRight),
        Xop::Sla => shift(ex, sloc, assign, imm_rhs, ShiftKind::ArithmeticLeft),
        Xop::Sra => shift(ex, sloc, assign, imm_rhs, ShiftKind::ArithmeticRight),

        // ─── Modular and saturating ────────────────────────────────
        Xop::Addm => modular(ex, sloc, assign, imm_rhs, "__addm", i64::wrapping_add),
        Xop::Subm => modular(ex, sloc, assign, imm_rhs, "__subm", i64::wrapping_sub),
        Xop::Mulm => modular(ex, sloc, assign, imm_rhs, "__mulm", i64::wrapping_mul),
        Xop::Adds => modular(ex, sloc, assign, imm_rhs, "__adds", i64::saturating_add),
        Xop::Subs => modular(ex, sloc, assign, imm_rhs, "__subs", i64::saturating_sub),
        Xop::Muls => modular(ex, sloc, assign, imm_rhs, "__muls", i64::saturating_mul),

        // ─── Fused multiply-add ────────────────────────────────────
        Xop::Fma => {
            let rhs = ex
                .top(0)
                .dereference_readonly()
                .map_err(|e| relocate(e, sloc))?;
            let mid = ex
                .top(1)
                .dereference_readonly()
                .map_err(|e| relocate(e, sloc))?;

            let compute = |lhs: &mut Value, sloc: &Sloc| -> OResult {
                if lhs.is_real_like() && mid.is_real_like() && rhs.is_real_like() {
                    *lhs = Value::Real(real_of(lhs).mul_add(real_of(&mid), real_of(&rhs)));
                    Ok(())
                } else {
                    Err(err(
                        sloc,
                        format!(
                            "`__fma` not applicable (operands were `{:?}`, `{:?}` and `{:?}`)",
                            lhs, mid, rhs
                        ),
                    ))
                }
            };

            if assign {
                ex.top_mut(2)
                    .modify(|lhs| compute(lhs, sloc))
                    .map_err(|e| relocate(e, sloc))?;
            } else {
                let mut lhs = ex
                    .top(2)
                    .dereference_readonly()
                    .map_err(|e| relocate(e, sloc))?;
                compute(&mut lhs, sloc)?;
                ex.top_mut(2).set_temporary(lhs);
            }
            ex.stack.pop();
            ex.stack.pop();
            Ok(())
        }
    }
}

fn relocate(e: RuntimeError, sloc: &Sloc) -> RuntimeError {
    // Reference-level errors carry no location; rebuild at the record's.
    RuntimeError::format(sloc.clone(), e.value().to_string())
}

fn real_of(v: &Value) -> f64 {
    v.as_real_like().unwrap_or(f64::NAN)
}

fn round_half_away(r: f64) -> f64 {
    r.round()
}

fn push_checked_subscript(ex: &mut Executive, sloc: &Sloc, sub: Subscript) -> OResult {
    ex.top_mut(0).push_subscript(sub);
    // Validate the new subscript eagerly, like a read would.
    ex.top(0)
        .dereference_readonly()
        .map(|_| ())
        .map_err(|e| relocate(e, sloc))
}

fn unary(
    ex: &mut Executive,
    sloc: &Sloc,
    assign: bool,
    f: impl Fn(&Value, &Sloc) -> Result<Value, RuntimeError>,
) -> OResult {
    if assign {
        ex.top_mut(0)
            .modify(|v| {
                *v = f(v, sloc)?;
                Ok(())
            })
            .map_err(|e| relocate(e, sloc))
    } else {
        let v = ex
            .top(0)
            .dereference_readonly()
            .map_err(|e| relocate(e, sloc))?;
        let result = f(&v, sloc)?;
        ex.top_mut(0).set_temporary(result);
        Ok(())
    }
}

fn unary_real(
    ex: &mut Executive,
    sloc: &Sloc,
    assign: bool,
    name: &'static str,
    f: impl Fn(f64) -> f64,
) -> OResult {
    unary(ex, sloc, assign, |v, sloc| {
        if v.is_real_like() {
            Ok(Value::Real(f(real_of(v))))
        } else {
            Err(err(
                sloc,
                format!("`{}` not applicable (operand was `{:?}`)", name, v),
            ))
        }
    })
}

/// Rounding that keeps integers intact and yields reals for reals.
fn unary_rounding(
    ex: &mut Executive,
    sloc: &Sloc,
    assign: bool,
    name: &'static str,
    f: impl Fn(f64) -> f64,
) -> OResult {
    unary(ex, sloc, assign, |v, sloc| match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Real(r) => Ok(Value::Real(f(*r))),
        other => Err(err(
            sloc,
            format!("`{}` not applicable (operand was `{:?}`)", name, other),
        )),
    })
}

/// Rounding to an integer with a range check.
fn unary_int_rounding(
    ex: &mut Executive,
    sloc: &Sloc,
    assign: bool,
    name: &'static str,
    f: impl Fn(f64) -> f64,
) -> OResult {
    unary(ex, sloc, assign, |v, sloc| match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Real(r) => {
            let rounded = f(*r);
            // i64::MAX is not exactly representable; the exclusive upper
            // bound 2^63 is.
            if rounded.is_finite() && rounded >= -(2f64.powi(63)) && rounded < 2f64.powi(63) {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(err(
                    sloc,
                    format!("`{}` result out of range (operand was `{}`)", name, r),
                ))
            }
        }
        other => Err(err(
            sloc,
            format!("`{}` not applicable (operand was `{:?}`)", name, other),
        )),
    })
}

fn apply_incdec(ex: &mut Executive, sloc: &Sloc, postfix: bool, delta: i64) -> OResult {
    let opname = if delta > 0 { "increment" } else { "decrement" };
    let old = ex
        .top_mut(0)
        .modify(|v| match v {
            Value::Int(i) => {
                let old = *i;
                *i = i.checked_add(delta).ok_or_else(|| {
                    err(sloc, format!("integer {} overflow (operand was `{}`)", opname, old))
                })?;
                Ok(Value::Int(old))
            }
            Value::Real(r) => {
                let old = *r;
                *r += delta as f64;
                Ok(Value::Real(old))
            }
            other => Err(err(
                sloc,
                format!("{} not applicable (operand was `{:?}`)", opname, other),
            )),
        })
        .map_err(|e| relocate(e, sloc))?;

    if postfix {
        ex.top_mut(0).set_temporary(old);
    }
    Ok(())
}

/// Binary operator frame: the right operand comes from the immediate or
/// the stack top; the left operand is mutated through its reference when
/// `assign` is set, and replaced by a temporary otherwise.
fn binary(
    ex: &mut Executive,
    sloc: &Sloc,
    assign: bool,
    imm_rhs: Option<Value>,
    f: impl FnOnce(&mut Value, &Value, &Sloc) -> OResult,
) -> OResult {
    let (rhs, lhs_at) = match imm_rhs {
        Some(v) => (v, 0usize),
        None => {
            let v = ex
                .top(0)
                .dereference_readonly()
                .map_err(|e| relocate(e, sloc))?;
            (v, 1)
        }
    };

    if assign {
        ex.top_mut(lhs_at)
            .modify(|lhs| f(lhs, &rhs, sloc))
            .map_err(|e| relocate(e, sloc))?;
    } else {
        let mut lhs = ex
            .top(lhs_at)
            .dereference_readonly()
            .map_err(|e| relocate(e, sloc))?;
        f(&mut lhs, &rhs, sloc)?;
        ex.top_mut(lhs_at).set_temporary(lhs);
    }

    if lhs_at == 1 {
        ex.stack.pop();
    }
    Ok(())
}

fn compare_total(lhs: &Value, rhs: &Value, sloc: &Sloc) -> Result<Compare, RuntimeError> {
    match lhs.compare_partial(rhs) {
        Compare::Unordered => Err(err(
            sloc,
            format!("values not comparable (operands were `{:?}` and `{:?}`)", lhs, rhs),
        )),
        ordered => Ok(ordered),
    }
}

fn modular(
    ex: &mut Executive,
    sloc: &Sloc,
    assign: bool,
    imm_rhs: Option<Value>,
    name: &'static str,
    f: impl Fn(i64, i64) -> i64,
) -> OResult {
    binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
        match (&*lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                *lhs = Value::Int(f(*a, *b));
                Ok(())
            }
            (a, b) => Err(err(
                sloc,
                format!("`{}` not applicable (operands were `{:?}` and `{:?}`)", name, a, b),
            )),
        }
    })
}

#[derive(Clone, Copy, PartialEq)]
enum ShiftKind {
    LogicalLeft,
    LogicalRight,
    ArithmeticLeft,
    ArithmeticRight,
}

/// Shift semantics, grouped: logical variants fix the width (integers
/// saturate to a fully-shifted zero word; strings and arrays pad or
/// truncate), arithmetic variants vary the width (left extends, right
/// shrinks; integer left shift raises on overflow).
fn shift(
    ex: &mut Executive,
    sloc: &Sloc,
    assign: bool,
    imm_rhs: Option<Value>,
    kind: ShiftKind,
) -> OResult {
    binary(ex, sloc, assign, imm_rhs, |lhs, rhs, sloc| {
        let count = match rhs {
            Value::Int(n) => *n,
            other => {
                return Err(err(
                    sloc,
                    format!("invalid shift count (operands were `{:?}` and `{:?}`)", lhs, other),
                ))
            }
        };
        if count < 0 {
            return Err(err(
                sloc,
                format!("negative shift count (operands were `{:?}` and `{}`)", lhs, count),
            ));
        }

        match lhs {
            Value::Int(val) => {
                let bits = *val as u64;
                *val = match kind {
                    ShiftKind::LogicalLeft => {
                        // A count past the width saturates to zero.
                        if count >= 64 {
                            0
                        } else {
                            (bits << count) as i64
                        }
                    }
                    ShiftKind::LogicalRight => {
                        if count >= 64 {
                            0
                        } else {
                            (bits >> count) as i64
                        }
                    }
                    ShiftKind::ArithmeticLeft => {
                        let n = count.min(63) as u32;
                        if *val != 0 && ((count != n as i64) || (*val >> (63 - n) != *val >> 63)) {
                            return Err(err(
                                sloc,
                                format!(
                                    "arithmetic left shift overflow (operands were `{}` and `{}`)",
                                    val, count
                                ),
                            ));
                        }
                        (bits << n) as i64
                    }
                    ShiftKind::ArithmeticRight => {
                        let n = count.min(63) as u32;
                        *val >> n
                    }
                };
                Ok(())
            }

            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len();
                let out: String = match kind {
                    ShiftKind::LogicalLeft => {
                        let n = (count as u64).min(len as u64) as usize;
                        chars[n..]
                            .iter()
                            .chain(std::iter::repeat(&'\0').take(n))
                            .collect()
                    }
                    ShiftKind::LogicalRight => {
                        let n = (count as u64).min(len as u64) as usize;
                        std::iter::repeat(&'\0')
                            .take(n)
                            .chain(chars[..len - n].iter())
                            .collect()
                    }
                    ShiftKind::ArithmeticLeft => {
                        let n = usize::try_from(count).map_err(|_| {
                            err(sloc, format!("shift count `{}` too large", count))
                        })?;
                        check_length(len, n, sloc)?;
                        chars
                            .iter()
                            .chain(std::iter::repeat(&'\0').take(n))
                            .collect()
                    }
                    ShiftKind::ArithmeticRight => {
                        let n = (count as u64).min(len as u64) as usize;
                        chars[..len - n].iter().collect()
                    }
                };
                *lhs = Value::Str(Rc::from(out));
                Ok(())
            }

            Value::Arr(arr) => {
                let len = arr.len();
                let mut out: Vec<Value> = arr.as_ref().clone();
                match kind {
                    ShiftKind::LogicalLeft => {
                        let n = (count as u64).min(len as u64) as usize;
                        out.drain(..n);
                        out.extend(std::iter::repeat(Value::Null).take(n));
                    }
                    ShiftKind::LogicalRight => {
                        let n = (count as u64).min(len as u64) as usize;
                        out.truncate(len - n);
                        out.splice(0..0, std::iter::repeat(Value::Null).take(n));
                    }
                    ShiftKind::ArithmeticLeft => {
                        let n = usize::try_from(count).map_err(|_| {
                            err(sloc, format!("shift count `{}` too large", count))
                        })?;
                        check_length(len, n, sloc)?;
                        out.extend(std::iter::repeat(Value::Null).take(n));
                    }
                    ShiftKind::ArithmeticRight => {
                        let n = (count as u64).min(len as u64) as usize;
                        out.truncate(len - n);
                    }
                }
                *lhs = Value::Arr(Rc::new(out));
                Ok(())
            }

            other => Err(err(
                sloc,
                format!("shift not applicable (operands were `{:?}` and `{}`)", other, count),
            )),
        }
    })
}

fn check_length(len: usize, extra: usize, sloc: &Sloc) -> OResult {
    if len.checked_add(extra).map_or(true, |t| t > isize::MAX as usize) {
        return Err(err(sloc, format!("length overflow (`{}` + `{}`)", len, extra)));
    }
    Ok(())
}

fn duplicate_str(src: &Rc<str>, count: i64, sloc: &Sloc) -> Result<Rc<str>, RuntimeError> {
    if count < 0 {
        return Err(err(
            sloc,
            format!("negative duplication count (value was `{}`)", count),
        ));
    }
    let total = (src.len() as u128).checked_mul(count as u128);
    match total {
        Some(t) if t <= isize::MAX as u128 => Ok(Rc::from(src.repeat(count as usize))),
        _ => Err(err(
            sloc,
            format!("length overflow (`{}` * `{}`)", src.len(), count),
        )),
    }
}

fn duplicate_arr(src: &Rc<Vec<Value>>, count: i64, sloc: &Sloc) -> Result<Vec<Value>, RuntimeError> {
    if count < 0 {
        return Err(err(
            sloc,
            format!("negative duplication count (value was `{}`)", count),
        ));
    }
    let total = (src.len() as u128).checked_mul(count as u128);
    match total {
        Some(t) if t <= isize::MAX as u128 => {
            let mut out = Vec::with_capacity(src.len() * count as usize);
            for _ in 0..count {
                out.extend(src.iter().cloned());
            }
            Ok(out)
        }
        _ => Err(err(
            sloc,
            format!("length overflow (`{}` * `{}`)", src.len(), count),
        )),
    }
}
