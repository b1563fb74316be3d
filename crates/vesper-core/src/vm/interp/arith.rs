//! Arithmetic, bitwise, unary, length and concatenation opcode bodies
//! (spec §4.1 "Numeric tower", "String concatenation", "Bitwise").
//!
//! Grounded on `lua_vm/execute/arithmetic_instructions.rs`'s direct-path /
//! metamethod-fallback structure and `execute/concat.rs`'s string-concat
//! handling, folded into the `Add` opcode per spec §4.3 ("Concat: handled
//! via add opcode when both operands are strings").

use crate::error::{Error, Result};
use crate::value::function::Prototype;
use crate::value::Value;
use crate::vm::interp::{call_value, location};
use crate::vm::metamethod::{self, MetaMethod};
use crate::vm::opcode::OpCode;
use crate::vm::state::State;

fn binary_metamethod(op: OpCode) -> MetaMethod {
    match op {
        OpCode::Add => MetaMethod::Add,
        OpCode::Sub => MetaMethod::Sub,
        OpCode::Mul => MetaMethod::Mul,
        OpCode::Div => MetaMethod::Div,
        OpCode::Mod => MetaMethod::Mod,
        OpCode::Pow => MetaMethod::Pow,
        OpCode::Band => MetaMethod::Band,
        OpCode::Bor => MetaMethod::Bor,
        OpCode::Bxor => MetaMethod::Bxor,
        OpCode::Shl => MetaMethod::Shl,
        OpCode::Shr => MetaMethod::Shr,
        _ => unreachable!("binary_metamethod called with a non-binary-arith opcode"),
    }
}

/// Shift amounts at or beyond the operand width clear the result, matching
/// the teacher's bitwise-shift saturation rule rather than Rust's panicking
/// shl/shr.
fn shift(a: i64, amount: i64, left: bool) -> i64 {
    if amount <= -64 || amount >= 64 {
        return 0;
    }
    let (dir_left, n) = if amount >= 0 {
        (left, amount as u32)
    } else {
        (!left, (-amount) as u32)
    };
    if dir_left {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> n) as i64
    }
}

/// Floor modulo: result takes the sign of the divisor, per spec §4.1.
fn int_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        r.wrapping_add(b)
    } else {
        r
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        f64::NAN
    } else {
        a - (a / b).floor() * b
    }
}

fn try_direct(op: OpCode, lhs: Value, rhs: Value) -> Result<Option<Value>> {
    use OpCode::*;
    match op {
        Add | Sub | Mul => match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Some(Value::Integer(match op {
                Add => a.wrapping_add(b),
                Sub => a.wrapping_sub(b),
                Mul => a.wrapping_mul(b),
                _ => unreachable!(),
            }))),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (fa, fb) = (a.as_float().unwrap(), b.as_float().unwrap());
                Ok(Some(Value::Float(match op {
                    Add => fa + fb,
                    Sub => fa - fb,
                    Mul => fa * fb,
                    _ => unreachable!(),
                })))
            }
            _ => Ok(None),
        },
        Div => match (lhs, rhs) {
            (a, b) if a.is_numeric() && b.is_numeric() => {
                Ok(Some(Value::Float(a.as_float().unwrap() / b.as_float().unwrap())))
            }
            _ => Ok(None),
        },
        Mod => match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => {
                if b == 0 {
                    Err(Error::arithmetic_error("attempt to perform 'n%0'"))
                } else {
                    Ok(Some(Value::Integer(int_mod(a, b))))
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(Some(Value::Float(float_mod(
                a.as_float().unwrap(),
                b.as_float().unwrap(),
            )))),
            _ => Ok(None),
        },
        Pow => match (lhs, rhs) {
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let r = a.as_float().unwrap().powf(b.as_float().unwrap());
                if matches!(a, Value::Integer(_)) && matches!(b, Value::Integer(_)) {
                    Ok(Some(Value::Integer(r as i64)))
                } else {
                    Ok(Some(Value::Float(r)))
                }
            }
            _ => Ok(None),
        },
        Band | Bor | Bxor | Shl | Shr => match (lhs.as_integer(), rhs.as_integer()) {
            (Some(a), Some(b)) => Ok(Some(Value::Integer(match op {
                Band => a & b,
                Bor => a | b,
                Bxor => a ^ b,
                Shl => shift(a, b, true),
                Shr => shift(a, b, false),
                _ => unreachable!(),
            }))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn concat_strings(state: &mut State, a: crate::gc::pool::StringId, b: crate::gc::pool::StringId) -> Result<Value> {
    let sa = state
        .heap
        .strings
        .get(a.index())
        .map(|s| s.as_str().to_string())
        .unwrap_or_default();
    let sb = state
        .heap
        .strings
        .get(b.index())
        .map(|s| s.as_str().to_string())
        .unwrap_or_default();
    let id = state
        .heap
        .alloc_string(crate::value::string::LuaStr::new(&(sa + &sb)))?;
    Ok(Value::String(id))
}

pub(crate) fn binary_op(
    state: &mut State,
    op: OpCode,
    lhs: Value,
    rhs: Value,
    proto: &Prototype,
    pc: usize,
) -> Result<Value> {
    if let Some(v) = try_direct(op, lhs, rhs)? {
        return Ok(v);
    }
    if op == OpCode::Add {
        if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
            return concat_strings(state, a, b);
        }
    }

    if let Some(handler) = metamethod::lookup_binary(state, lhs, rhs, binary_metamethod(op)) {
        let r = call_value(state, handler, &[lhs, rhs], 1)?;
        return Ok(r.into_iter().next().unwrap_or(Value::Nil));
    }
    if op == OpCode::Add {
        if let Some(handler) = metamethod::lookup_binary(state, lhs, rhs, MetaMethod::Concat) {
            let r = call_value(state, handler, &[lhs, rhs], 1)?;
            return Ok(r.into_iter().next().unwrap_or(Value::Nil));
        }
        if matches!(lhs, Value::String(_)) {
            return Err(Error::type_error(format!(
                "can only concatenate string with string, not with {}",
                rhs.type_name()
            ))
            .with_location(location(proto, pc)));
        }
    }
    let offender = if lhs.is_numeric() { rhs } else { lhs };
    Err(Error::type_error(format!(
        "attempt to perform arithmetic on a {} value",
        offender.type_name()
    ))
    .with_location(location(proto, pc)))
}

pub(crate) fn unary_minus(state: &mut State, v: Value, proto: &Prototype, pc: usize) -> Result<Value> {
    match v {
        Value::Integer(i) => Ok(Value::Integer(i.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => {
            if let Some(h) = metamethod::lookup(state, other, MetaMethod::Unm) {
                let r = call_value(state, h, &[other, other], 1)?;
                Ok(r.into_iter().next().unwrap_or(Value::Nil))
            } else {
                Err(Error::type_error(format!(
                    "attempt to perform arithmetic on a {} value",
                    other.type_name()
                ))
                .with_location(location(proto, pc)))
            }
        }
    }
}

pub(crate) fn bitwise_not(state: &mut State, v: Value, proto: &Prototype, pc: usize) -> Result<Value> {
    if let Some(i) = v.as_integer() {
        return Ok(Value::Integer(!i));
    }
    if let Some(h) = metamethod::lookup(state, v, MetaMethod::Bnot) {
        let r = call_value(state, h, &[v, v], 1)?;
        return Ok(r.into_iter().next().unwrap_or(Value::Nil));
    }
    Err(Error::type_error(format!(
        "attempt to perform bitwise operation on a {} value",
        v.type_name()
    ))
    .with_location(location(proto, pc)))
}

pub(crate) fn length_of(state: &mut State, v: Value, proto: &Prototype, pc: usize) -> Result<Value> {
    match v {
        Value::Table(id) => {
            if let Some(h) = metamethod::lookup(state, v, MetaMethod::Len) {
                let r = call_value(state, h, &[v], 1)?;
                return Ok(r.into_iter().next().unwrap_or(Value::Nil));
            }
            let n = state
                .heap
                .tables
                .get_mut(id.index())
                .map(|t| t.len())
                .unwrap_or(0);
            Ok(Value::Integer(n as i64))
        }
        Value::String(id) => {
            let n = state.heap.strings.get(id.index()).map(|s| s.len()).unwrap_or(0);
            Ok(Value::Integer(n as i64))
        }
        other => Err(Error::type_error(format!(
            "attempt to get length of a {} value",
            other.type_name()
        ))
        .with_location(location(proto, pc))),
    }
}
