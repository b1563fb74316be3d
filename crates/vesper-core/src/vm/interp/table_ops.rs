//! `GetTable`/`SetTable`/`GetField`/`SetField` opcode bodies: the
//! `__index`/`__newindex` resolution chain (spec §4.2 "Indexing").
//!
//! Grounded on `lua_vm/execute/table_instructions.rs`'s chained
//! metatable-walk, capped the way the teacher caps it against a
//! pathological `__index` cycle.

use crate::error::{Error, Result};
use crate::gc::GcRef;
use crate::value::function::Prototype;
use crate::value::Value;
use crate::vm::interp::{call_value, location};
use crate::vm::metamethod::{self, MetaMethod};
use crate::vm::state::State;

/// Bound on `__index`/`__newindex` chain length (spec §4.2): a metatable
/// graph this deep is indistinguishable from an authoring mistake.
const MAX_CHAIN_DEPTH: u32 = 100;

pub(crate) fn index_get(
    state: &mut State,
    t: Value,
    key: Value,
    proto: &Prototype,
    pc: usize,
) -> Result<Value> {
    let mut cur = t;
    for _ in 0..MAX_CHAIN_DEPTH {
        match cur {
            Value::Table(id) => {
                let raw = state
                    .heap
                    .tables
                    .get(id.index())
                    .map(|tb| tb.raw_get(&key))
                    .unwrap_or(Value::Nil);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                match metamethod::lookup(state, cur, MetaMethod::Index) {
                    None => return Ok(Value::Nil),
                    Some(handler @ Value::Table(_)) => cur = handler,
                    Some(callable) if callable.is_callable() => {
                        let r = call_value(state, callable, &[cur, key], 1)?;
                        return Ok(r.into_iter().next().unwrap_or(Value::Nil));
                    }
                    Some(_) => return Ok(Value::Nil),
                }
            }
            Value::Userdata(_) => match metamethod::lookup(state, cur, MetaMethod::Index) {
                None => {
                    return Err(Error::type_error(
                        "attempt to index a userdata value with no __index",
                    )
                    .with_location(location(proto, pc)))
                }
                Some(handler @ Value::Table(_)) => cur = handler,
                Some(callable) if callable.is_callable() => {
                    let r = call_value(state, callable, &[cur, key], 1)?;
                    return Ok(r.into_iter().next().unwrap_or(Value::Nil));
                }
                Some(_) => return Ok(Value::Nil),
            },
            Value::String(_) => {
                let Some(mt) = state.string_metatable else {
                    return Ok(Value::Nil);
                };
                let v = state
                    .heap
                    .tables
                    .get(mt.index())
                    .map(|tb| tb.raw_get(&key))
                    .unwrap_or(Value::Nil);
                return Ok(v);
            }
            other => {
                return Err(Error::type_error(format!(
                    "attempt to index a {} value",
                    other.type_name()
                ))
                .with_location(location(proto, pc)))
            }
        }
    }
    Err(Error::runtime_error("'__index' chain too long; possible loop")
        .with_location(location(proto, pc)))
}

pub(crate) fn index_set(
    state: &mut State,
    t: Value,
    key: Value,
    value: Value,
    proto: &Prototype,
    pc: usize,
) -> Result<()> {
    let mut cur = t;
    for _ in 0..MAX_CHAIN_DEPTH {
        match cur {
            Value::Table(id) => {
                let exists = state
                    .heap
                    .tables
                    .get(id.index())
                    .map(|tb| !tb.raw_get(&key).is_nil())
                    .unwrap_or(false);
                if exists {
                    return raw_set_checked(state, id, key, value, proto, pc);
                }
                match metamethod::lookup(state, cur, MetaMethod::NewIndex) {
                    None => return raw_set_checked(state, id, key, value, proto, pc),
                    Some(handler @ Value::Table(_)) => cur = handler,
                    Some(callable) if callable.is_callable() => {
                        call_value(state, callable, &[cur, key, value], 0)?;
                        return Ok(());
                    }
                    Some(_) => return Ok(()),
                }
            }
            Value::Userdata(_) => match metamethod::lookup(state, cur, MetaMethod::NewIndex) {
                None => {
                    return Err(Error::type_error(
                        "attempt to index a userdata value with no __newindex",
                    )
                    .with_location(location(proto, pc)))
                }
                Some(handler @ Value::Table(_)) => cur = handler,
                Some(callable) if callable.is_callable() => {
                    call_value(state, callable, &[cur, key, value], 0)?;
                    return Ok(());
                }
                Some(_) => return Ok(()),
            },
            other => {
                return Err(Error::type_error(format!(
                    "attempt to index a {} value",
                    other.type_name()
                ))
                .with_location(location(proto, pc)))
            }
        }
    }
    Err(Error::runtime_error("'__newindex' chain too long; possible loop")
        .with_location(location(proto, pc)))
}

fn raw_set_checked(
    state: &mut State,
    id: crate::gc::pool::TableId,
    key: Value,
    value: Value,
    proto: &Prototype,
    pc: usize,
) -> Result<()> {
    if key.is_nil() {
        return Err(Error::type_error("table index is nil").with_location(location(proto, pc)));
    }
    if let Value::Float(f) = key {
        if f.is_nan() {
            return Err(Error::type_error("table index is NaN").with_location(location(proto, pc)));
        }
    }
    state.heap.write_barrier(GcRef::Table(id), value);
    if let Some(t) = state.heap.tables.get_mut(id.index()) {
        t.raw_set(key, value);
    }
    Ok(())
}
