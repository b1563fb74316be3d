//! Base library: `print`, `type`, `pcall`/`error`, raw table access,
//! metatable get/set, iteration protocol, and the `import` module loader
//! (spec §6 "Module protocol").
//!
//! Grounded on the teacher's `stdlib/basic.rs` / `stdlib/basic/mod.rs`
//! (argument-checking style, one host function per script builtin).

use crate::error::{Error, ErrorKind, Result};
use crate::value::string::LuaStr;
use crate::value::Value;
use crate::vm::interp;
use crate::vm::state::State;

pub(super) fn install(state: &mut State) -> Result<()> {
    state.set_global("print", Value::CFunction(print))?;
    state.set_global("tostring", Value::CFunction(tostring))?;
    state.set_global("tonumber", Value::CFunction(tonumber))?;
    state.set_global("type", Value::CFunction(type_of))?;
    state.set_global("error", Value::CFunction(error_fn))?;
    state.set_global("assert", Value::CFunction(assert_fn))?;
    state.set_global("pcall", Value::CFunction(pcall))?;
    state.set_global("xpcall", Value::CFunction(xpcall))?;
    state.set_global("rawget", Value::CFunction(rawget))?;
    state.set_global("rawset", Value::CFunction(rawset))?;
    state.set_global("rawequal", Value::CFunction(rawequal))?;
    state.set_global("rawlen", Value::CFunction(rawlen))?;
    state.set_global("setmetatable", Value::CFunction(setmetatable))?;
    state.set_global("getmetatable", Value::CFunction(getmetatable))?;
    state.set_global("next", Value::CFunction(next_fn))?;
    state.set_global("pairs", Value::CFunction(pairs))?;
    state.set_global("ipairs", Value::CFunction(ipairs))?;
    state.set_global("select", Value::CFunction(select))?;
    state.set_global("import", Value::CFunction(import))?;
    Ok(())
}

fn arg_message(state: &mut State, idx: i64) -> Result<String> {
    match state.get(idx) {
        Value::String(id) => Ok(state
            .heap
            .strings
            .get(id.index())
            .map(|s| s.as_str().to_string())
            .unwrap_or_default()),
        other => interp::tostring(state, other),
    }
}

fn print(state: &mut State) -> Result<usize> {
    let n = state.arg_count();
    let mut out = String::new();
    for i in 0..n {
        if i > 0 {
            out.push('\t');
        }
        let v = state.get(i as i64);
        out.push_str(&interp::tostring(state, v)?);
    }
    println!("{out}");
    Ok(0)
}

fn tostring(state: &mut State) -> Result<usize> {
    let v = state.get(0);
    let s = interp::tostring(state, v)?;
    state.push_string(&s)?;
    Ok(1)
}

fn tonumber(state: &mut State) -> Result<usize> {
    match state.get(0) {
        v @ (Value::Integer(_) | Value::Float(_)) => state.push(v),
        Value::String(id) => {
            let s = state
                .heap
                .strings
                .get(id.index())
                .map(|s| s.as_str().to_string())
                .unwrap_or_default();
            let trimmed = s.trim();
            let hex = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"));
            if let Some(digits) = hex {
                if let Ok(i) = i64::from_str_radix(digits, 16) {
                    state.push_integer(i);
                    return Ok(1);
                }
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                state.push_integer(i);
            } else if let Ok(f) = trimmed.parse::<f64>() {
                state.push_float(f);
            } else {
                state.push_nil();
            }
        }
        _ => state.push_nil(),
    }
    Ok(1)
}

fn type_of(state: &mut State) -> Result<usize> {
    let v = state.get(0);
    state.push_string(v.type_name())?;
    Ok(1)
}

fn error_fn(state: &mut State) -> Result<usize> {
    let msg = arg_message(state, 0)?;
    Err(Error::new(ErrorKind::RuntimeError, msg))
}

fn assert_fn(state: &mut State) -> Result<usize> {
    if state.get(0).is_truthy() {
        return Ok(state.arg_count());
    }
    let msg = if state.arg_count() > 1 {
        arg_message(state, 1)?
    } else {
        "assertion failed!".to_string()
    };
    Err(Error::new(ErrorKind::RuntimeError, msg))
}

/// `pcall(f, args...)` (spec §4.7, §4.6 "protected-call wrapper"): the
/// call stack and value stack are restored to their pre-call state on
/// failure, and the error surfaces as `(false, message)` rather than
/// propagating.
fn pcall(state: &mut State) -> Result<usize> {
    let n = state.arg_count();
    if n == 0 {
        return Err(Error::type_error("bad argument #1 to 'pcall' (value expected)"));
    }
    let func_pos = state.top() - n;
    match interp::protected_call(state, func_pos, n - 1) {
        Ok(nresults) => {
            let results: Vec<Value> = (0..nresults).map(|i| state.get_abs(func_pos + i)).collect();
            state.set_top_abs(func_pos);
            state.push_bool(true);
            for v in results {
                state.push(v);
            }
            Ok(1 + nresults)
        }
        Err(e) => {
            state.set_top_abs(func_pos);
            state.push_bool(false);
            state.push_string(&e.to_string())?;
            Ok(2)
        }
    }
}

/// `xpcall(f, handler, args...)`: like `pcall`, but a failing call's error
/// message is passed through `handler` before being returned.
fn xpcall(state: &mut State) -> Result<usize> {
    let n = state.arg_count();
    if n < 2 {
        return Err(Error::type_error("bad argument #2 to 'xpcall' (value expected)"));
    }
    let func_pos = state.top() - n;
    let callee = state.get(0);
    let handler = state.get(1);
    let extra: Vec<Value> = (2..n).map(|i| state.get(i as i64)).collect();

    let call_pos = state.top();
    state.push(callee);
    for a in &extra {
        state.push(*a);
    }
    match interp::protected_call(state, call_pos, extra.len()) {
        Ok(nresults) => {
            let results: Vec<Value> = (0..nresults).map(|i| state.get_abs(call_pos + i)).collect();
            state.set_top_abs(func_pos);
            state.push_bool(true);
            for v in results {
                state.push(v);
            }
            Ok(1 + nresults)
        }
        Err(e) => {
            state.set_top_abs(func_pos);
            let msg = Value::String(state.heap.alloc_string(LuaStr::new(&e.to_string()))?);
            let handled = interp::call_value(state, handler, &[msg], 1)?;
            state.set_top_abs(func_pos);
            state.push_bool(false);
            let count = handled.len();
            for v in handled {
                state.push(v);
            }
            Ok(1 + count)
        }
    }
}

fn rawget(state: &mut State) -> Result<usize> {
    let key = state.get(1);
    let v = state.raw_get(0, key)?;
    state.push(v);
    Ok(1)
}

fn rawset(state: &mut State) -> Result<usize> {
    let key = state.get(1);
    let val = state.get(2);
    state.raw_set(0, key, val)?;
    let t = state.get(0);
    state.push(t);
    Ok(1)
}

fn rawequal(state: &mut State) -> Result<usize> {
    let a = state.get(0);
    let b = state.get(1);
    state.push_bool(a.raw_equal(&b));
    Ok(1)
}

fn rawlen(state: &mut State) -> Result<usize> {
    let n = state.table_len(0)?;
    state.push_integer(n);
    Ok(1)
}

fn setmetatable(state: &mut State) -> Result<usize> {
    let Value::Table(id) = state.get(0) else {
        return Err(Error::type_error("bad argument #1 to 'setmetatable' (table expected)"));
    };
    let mt = match state.get(1) {
        Value::Table(mtid) => Some(mtid),
        Value::Nil => None,
        other => {
            return Err(Error::type_error(format!(
                "bad argument #2 to 'setmetatable' (nil or table expected, got {})",
                other.type_name()
            )))
        }
    };
    state.set_table_metatable(id, mt);
    state.push(Value::Table(id));
    Ok(1)
}

fn getmetatable(state: &mut State) -> Result<usize> {
    let v = state.get(0);
    match state.metatable_of(v) {
        Some(id) => state.push(Value::Table(id)),
        None => state.push_nil(),
    }
    Ok(1)
}

fn next_fn(state: &mut State) -> Result<usize> {
    let key = if state.arg_count() > 1 { Some(state.get(1)) } else { None };
    match state.next(0, key)? {
        Some((k, v)) => {
            state.push(k);
            state.push(v);
            Ok(2)
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

/// `pairs(t)`: returns `(next, t, nil)`, the standard stateless iterator
/// triple consumed by `foreach` codegen (spec §6 "foreach with iterator
/// protocol").
fn pairs(state: &mut State) -> Result<usize> {
    let t = state.get(0);
    state.push_cfunction(next_fn);
    state.push(t);
    state.push_nil();
    Ok(3)
}

fn ipairs_iter(state: &mut State) -> Result<usize> {
    let i = state.to_integer(1).unwrap_or(0) + 1;
    let v = state.raw_get(0, Value::Integer(i))?;
    if v.is_nil() {
        state.push_nil();
        Ok(1)
    } else {
        state.push_integer(i);
        state.push(v);
        Ok(2)
    }
}

fn ipairs(state: &mut State) -> Result<usize> {
    let t = state.get(0);
    state.push_cfunction(ipairs_iter);
    state.push(t);
    state.push_integer(0);
    Ok(3)
}

fn select(state: &mut State) -> Result<usize> {
    let n = state.arg_count();
    if let Value::String(id) = state.get(0) {
        if state.heap.strings.get(id.index()).map(|s| s.as_str()) == Some("#") {
            state.push_integer((n - 1) as i64);
            return Ok(1);
        }
    }
    let idx = state
        .get(0)
        .as_integer()
        .ok_or_else(|| Error::type_error("bad argument #1 to 'select' (number expected)"))?;
    if idx < 1 {
        return Err(Error::type_error("bad argument #1 to 'select' (index out of range)"));
    }
    let start = idx as usize;
    let mut count = 0;
    for i in start..n {
        let v = state.get(i as i64);
        state.push(v);
        count += 1;
    }
    Ok(count)
}

/// `import(name)` (spec §6 "Module protocol"): cache hit returns the
/// cached exports table; a miss dispatches to the host-installed loader
/// and caches its result. Plain global function, not special syntax.
fn import(state: &mut State) -> Result<usize> {
    let name = state
        .to_string_value(0)
        .ok_or_else(|| Error::type_error("bad argument #1 to 'import' (string expected)"))?;
    if let Some(id) = state.cached_module(&name) {
        state.push(Value::Table(id));
        return Ok(1);
    }
    let Some(loader) = state.module_loader() else {
        return Err(Error::runtime_error(format!(
            "no module loader installed; cannot import '{name}'"
        )));
    };
    let name_val = Value::String(state.heap.alloc_string(LuaStr::new(&name))?);
    let results = interp::call_value(state, Value::CFunction(loader), &[name_val], 1)?;
    let Some(Value::Table(tid)) = results.into_iter().next() else {
        return Err(Error::runtime_error(format!(
            "module loader for '{name}' did not return a table"
        )));
    };
    state.cache_module(&name, tid);
    state.push(Value::Table(tid));
    Ok(1)
}
