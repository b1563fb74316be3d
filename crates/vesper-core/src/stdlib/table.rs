//! Table library: `insert`/`remove`/`concat`/`sort` (spec §1 "Standard
//! library modules").
//!
//! Grounded on the teacher's `stdlib/table.rs` argument-checking style,
//! built directly on the embedding API's `raw_get`/`raw_set`/`table_len`
//! (spec §4.6) rather than the bytecode `GetTable`/`SetTable` opcode path.

use crate::error::{Error, Result};
use crate::gc::pool::TableId;
use crate::value::Value;
use crate::vm::interp;
use crate::vm::state::State;

pub(super) fn install(state: &mut State) -> Result<TableId> {
    let tbl = super::new_table(state)?;
    super::set_field(state, tbl, "insert", Value::CFunction(insert))?;
    super::set_field(state, tbl, "remove", Value::CFunction(remove))?;
    super::set_field(state, tbl, "concat", Value::CFunction(concat))?;
    super::set_field(state, tbl, "sort", Value::CFunction(sort))?;
    Ok(tbl)
}

fn check_table(state: &State, fname: &str) -> Result<()> {
    if matches!(state.get(0), Value::Table(_)) {
        Ok(())
    } else {
        Err(Error::type_error(format!(
            "bad argument #1 to '{}' (table expected, got {})",
            fname,
            state.get(0).type_name()
        )))
    }
}

/// `table.insert(t, v)` or `table.insert(t, pos, v)`.
fn insert(state: &mut State) -> Result<usize> {
    check_table(state, "insert")?;
    let n = state.table_len(0)?;
    let (pos, value) = if state.arg_count() >= 3 {
        let pos = state
            .to_integer(1)
            .ok_or_else(|| Error::type_error("bad argument #2 to 'insert' (number expected)"))?;
        (pos, state.get(2))
    } else {
        (n + 1, state.get(1))
    };
    if pos < 1 || pos > n + 1 {
        return Err(Error::type_error("bad argument #2 to 'insert' (position out of bounds)"));
    }
    let mut i = n;
    while i >= pos {
        let v = state.raw_get(0, Value::Integer(i))?;
        state.raw_set(0, Value::Integer(i + 1), v)?;
        i -= 1;
    }
    state.raw_set(0, Value::Integer(pos), value)?;
    Ok(0)
}

/// `table.remove(t)` or `table.remove(t, pos)`.
fn remove(state: &mut State) -> Result<usize> {
    check_table(state, "remove")?;
    let n = state.table_len(0)?;
    if n == 0 && state.arg_count() < 2 {
        state.push_nil();
        return Ok(1);
    }
    let pos = if state.arg_count() > 1 {
        state.to_integer(1).unwrap_or(n)
    } else {
        n
    };
    if pos < 1 || pos > n {
        return Err(Error::type_error("bad argument #2 to 'remove' (position out of bounds)"));
    }
    let removed = state.raw_get(0, Value::Integer(pos))?;
    let mut i = pos;
    while i < n {
        let v = state.raw_get(0, Value::Integer(i + 1))?;
        state.raw_set(0, Value::Integer(i), v)?;
        i += 1;
    }
    state.raw_set(0, Value::Integer(n), Value::Nil)?;
    state.push(removed);
    Ok(1)
}

/// `table.concat(t [, sep [, i [, j]]])`.
fn concat(state: &mut State) -> Result<usize> {
    check_table(state, "concat")?;
    let n = state.table_len(0)?;
    let sep = if state.arg_count() > 1 {
        state.to_string_value(1).unwrap_or_default()
    } else {
        String::new()
    };
    let i = if state.arg_count() > 2 { state.to_integer(2).unwrap_or(1) } else { 1 };
    let j = if state.arg_count() > 3 { state.to_integer(3).unwrap_or(n) } else { n };
    let mut out = String::new();
    let mut k = i;
    while k <= j {
        let v = state.raw_get(0, Value::Integer(k))?;
        out.push_str(&interp::tostring(state, v)?);
        if k < j {
            out.push_str(&sep);
        }
        k += 1;
    }
    state.push_string(&out)?;
    Ok(1)
}

/// Default `<` for `table.sort`'s no-comparator form: numeric and string
/// only, no metamethod dispatch (a sort comparator has no bytecode
/// location to attribute a `__lt` failure to; scripts needing metamethod
/// ordering should pass an explicit comparator).
fn default_less(a: Value, b: Value) -> Result<bool> {
    match (a, b) {
        (x, y) if x.is_numeric() && y.is_numeric() => Ok(x.as_float().unwrap() < y.as_float().unwrap()),
        _ => Err(Error::type_error(format!(
            "attempt to compare two {} values",
            a.type_name()
        ))),
    }
}

fn default_less_str(state: &State, a: Value, b: Value) -> Result<bool> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        let sx = state.heap.strings.get(x.index()).map(|s| s.as_str()).unwrap_or("");
        let sy = state.heap.strings.get(y.index()).map(|s| s.as_str()).unwrap_or("");
        return Ok(sx < sy);
    }
    default_less(a, b)
}

/// `table.sort(t [, comp])`: insertion sort, simple and stable enough for
/// the table sizes an embedded script sorts, and the natural shape for a
/// comparator that calls back into the VM per comparison.
fn sort(state: &mut State) -> Result<usize> {
    check_table(state, "sort")?;
    let n = state.table_len(0)? as usize;
    let comparator = if state.arg_count() > 1 { Some(state.get(1)) } else { None };
    let mut items = Vec::with_capacity(n);
    for i in 1..=n as i64 {
        items.push(state.raw_get(0, Value::Integer(i))?);
    }
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let less = match comparator {
                Some(f) => {
                    let r = interp::call_value(state, f, &[items[j], items[j - 1]], 1)?;
                    r.into_iter().next().map(|v| v.is_truthy()).unwrap_or(false)
                }
                None => default_less_str(state, items[j], items[j - 1])?,
            };
            if !less {
                break;
            }
            items.swap(j, j - 1);
            j -= 1;
        }
    }
    for (idx, v) in items.into_iter().enumerate() {
        state.raw_set(0, Value::Integer(idx as i64 + 1), v)?;
    }
    Ok(0)
}
