//! Equality and ordering opcode bodies (spec §4.1 "Equality", "Ordering").
//!
//! Grounded on `lua_vm/execute/comparison_ops.rs`'s direct-path /
//! metamethod-fallback structure.

use crate::error::{Error, Result};
use crate::value::function::Prototype;
use crate::value::Value;
use crate::vm::interp::{call_value, location};
use crate::vm::metamethod::{self, MetaMethod};
use crate::vm::state::State;

fn string_bytes(state: &State, id: crate::gc::pool::StringId) -> Vec<u8> {
    state
        .heap
        .strings
        .get(id.index())
        .map(|s| s.as_str().as_bytes().to_vec())
        .unwrap_or_default()
}

/// `==` (spec §4.1 "Equality"): numeric cross-type comparison, strings by
/// byte sequence, everything else by identity unless both sides carry the
/// same `__eq` metamethod.
pub(crate) fn values_equal(state: &mut State, lhs: Value, rhs: Value) -> Result<bool> {
    if lhs.raw_equal(&rhs) {
        return Ok(true);
    }
    if let Some(h) = metamethod::lookup_eq(state, lhs, rhs) {
        let r = call_value(state, h, &[lhs, rhs], 1)?;
        return Ok(r.into_iter().next().map(|v| v.is_truthy()).unwrap_or(false));
    }
    Ok(false)
}

pub(crate) fn less_than(
    state: &mut State,
    lhs: Value,
    rhs: Value,
    proto: &Prototype,
    pc: usize,
) -> Result<bool> {
    match (lhs, rhs) {
        (a, b) if a.is_numeric() && b.is_numeric() => {
            Ok(a.as_float().unwrap() < b.as_float().unwrap())
        }
        (Value::String(a), Value::String(b)) => Ok(string_bytes(state, a) < string_bytes(state, b)),
        _ => {
            if let Some(h) = metamethod::lookup_binary(state, lhs, rhs, MetaMethod::Lt) {
                let r = call_value(state, h, &[lhs, rhs], 1)?;
                Ok(r.into_iter().next().map(|v| v.is_truthy()).unwrap_or(false))
            } else {
                Err(Error::type_error(format!(
                    "attempt to compare {} with {}",
                    lhs.type_name(),
                    rhs.type_name()
                ))
                .with_location(location(proto, pc)))
            }
        }
    }
}

pub(crate) fn less_equal(
    state: &mut State,
    lhs: Value,
    rhs: Value,
    proto: &Prototype,
    pc: usize,
) -> Result<bool> {
    match (lhs, rhs) {
        (a, b) if a.is_numeric() && b.is_numeric() => {
            Ok(a.as_float().unwrap() <= b.as_float().unwrap())
        }
        (Value::String(a), Value::String(b)) => Ok(string_bytes(state, a) <= string_bytes(state, b)),
        _ => {
            if let Some(h) = metamethod::lookup_binary(state, lhs, rhs, MetaMethod::Le) {
                let r = call_value(state, h, &[lhs, rhs], 1)?;
                Ok(r.into_iter().next().map(|v| v.is_truthy()).unwrap_or(false))
            } else {
                Err(Error::type_error(format!(
                    "attempt to compare {} with {}",
                    lhs.type_name(),
                    rhs.type_name()
                ))
                .with_location(location(proto, pc)))
            }
        }
    }
}
