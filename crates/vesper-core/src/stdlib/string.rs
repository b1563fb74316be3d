//! String library: length, slicing, case conversion, repetition, byte
//! conversions, plain substring search, and a minimal `%d`/`%s`/`%f`/`%x`
//! `format` (spec §1 "Standard library modules").
//!
//! Grounded on the teacher's `stdlib/string/mod.rs` argument-checking
//! style. Lua-style pattern matching (`string.find`/`match`/`gmatch`
//! against a full pattern grammar) and `string.pack`'s binary layout
//! reader are the teacher's own multi-hundred-line subsystems and fall
//! outside spec §1's "ordinary host-language functions" baseline; `find`
//! here is plain substring search only.

use crate::error::{Error, Result};
use crate::gc::pool::TableId;
use crate::value::Value;
use crate::vm::interp;
use crate::vm::state::State;

pub(super) fn install(state: &mut State) -> Result<TableId> {
    let tbl = super::new_table(state)?;
    super::set_field(state, tbl, "len", Value::CFunction(len))?;
    super::set_field(state, tbl, "sub", Value::CFunction(sub))?;
    super::set_field(state, tbl, "upper", Value::CFunction(upper))?;
    super::set_field(state, tbl, "lower", Value::CFunction(lower))?;
    super::set_field(state, tbl, "rep", Value::CFunction(rep))?;
    super::set_field(state, tbl, "reverse", Value::CFunction(reverse))?;
    super::set_field(state, tbl, "byte", Value::CFunction(byte))?;
    super::set_field(state, tbl, "char", Value::CFunction(char_fn))?;
    super::set_field(state, tbl, "find", Value::CFunction(find))?;
    super::set_field(state, tbl, "format", Value::CFunction(format))?;
    Ok(tbl)
}

fn check_str(state: &State, idx: i64, fname: &str) -> Result<String> {
    match state.get(idx) {
        Value::String(id) => Ok(state
            .heap
            .strings
            .get(id.index())
            .map(|s| s.as_str().to_string())
            .unwrap_or_default()),
        other => Err(Error::type_error(format!(
            "bad argument #{} to '{}' (string expected, got {})",
            idx + 1,
            fname,
            other.type_name()
        ))),
    }
}

/// Clamp a Lua-style 1-based, possibly-negative index to `[1, len + 1]`.
fn normalize_index(i: i64, len: usize) -> i64 {
    let i = if i < 0 { len as i64 + i + 1 } else { i };
    i.max(1)
}

fn len(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "len")?;
    state.push_integer(s.len() as i64);
    Ok(1)
}

fn sub(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "sub")?;
    let n = s.len() as i64;
    let i = normalize_index(state.to_integer(1).unwrap_or(1), s.len()).min(n + 1);
    let j = if state.arg_count() > 2 {
        let raw = state.to_integer(2).unwrap_or(-1);
        let raw = if raw < 0 { n + raw + 1 } else { raw };
        raw.min(n)
    } else {
        n
    };
    if i > j {
        state.push_string("")?;
    } else {
        let bytes = s.as_bytes();
        let slice = &bytes[(i - 1) as usize..j as usize];
        state.push_string(&String::from_utf8_lossy(slice))?;
    }
    Ok(1)
}

fn upper(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "upper")?;
    state.push_string(&s.to_uppercase())?;
    Ok(1)
}

fn lower(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "lower")?;
    state.push_string(&s.to_lowercase())?;
    Ok(1)
}

fn rep(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "rep")?;
    let n = state
        .to_integer(1)
        .ok_or_else(|| Error::type_error("bad argument #2 to 'rep' (number expected)"))?;
    let sep = if state.arg_count() > 2 {
        check_str(state, 2, "rep")?
    } else {
        String::new()
    };
    let out = if n <= 0 {
        String::new()
    } else {
        vec![s; n as usize].join(&sep)
    };
    state.push_string(&out)?;
    Ok(1)
}

fn reverse(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "reverse")?;
    let out: String = s.bytes().rev().map(|b| b as char).collect();
    state.push_string(&out)?;
    Ok(1)
}

fn byte(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "byte")?;
    let n = s.len() as i64;
    let i = normalize_index(state.to_integer(1).unwrap_or(1), s.len()).min(n);
    let j = if state.arg_count() > 2 {
        normalize_index(state.to_integer(2).unwrap_or(i), s.len()).min(n)
    } else {
        i
    };
    let bytes = s.as_bytes();
    let mut count = 0;
    let mut k = i;
    while k <= j && k >= 1 {
        state.push_integer(bytes[(k - 1) as usize] as i64);
        count += 1;
        k += 1;
    }
    Ok(count)
}

fn char_fn(state: &mut State) -> Result<usize> {
    let n = state.arg_count();
    let mut out = String::with_capacity(n);
    for i in 0..n {
        let code = state
            .to_integer(i as i64)
            .ok_or_else(|| Error::type_error(format!("bad argument #{} to 'char' (number expected)", i + 1)))?;
        out.push(code as u8 as char);
    }
    state.push_string(&out)?;
    Ok(1)
}

/// Plain substring search (no Lua pattern grammar, see module docs).
fn find(state: &mut State) -> Result<usize> {
    let s = check_str(state, 0, "find")?;
    let pat = check_str(state, 1, "find")?;
    let init = if state.arg_count() > 2 {
        normalize_index(state.to_integer(2).unwrap_or(1), s.len())
    } else {
        1
    };
    let start = ((init - 1).max(0) as usize).min(s.len());
    match s[start..].find(&pat) {
        Some(off) => {
            let from = start + off;
            state.push_integer((from + 1) as i64);
            state.push_integer((from + pat.len()) as i64);
            Ok(2)
        }
        None => {
            state.push_nil();
            Ok(1)
        }
    }
}

/// Minimal `%d`/`%i`/`%s`/`%f`/`%x`/`%%` conversions; unrecognized
/// specifiers are copied through verbatim.
fn format(state: &mut State) -> Result<usize> {
    let fmt = check_str(state, 0, "format")?;
    let mut out = String::new();
    let mut arg_idx: i64 = 1;
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('d') | Some('i') => {
                let v = state.get(arg_idx);
                let i = v.as_integer().ok_or_else(|| {
                    Error::type_error(format!("bad argument #{} to 'format' (number expected)", arg_idx + 1))
                })?;
                let mut buf = itoa::Buffer::new();
                out.push_str(buf.format(i));
                arg_idx += 1;
            }
            Some('s') => {
                let v = state.get(arg_idx);
                out.push_str(&interp::tostring(state, v)?);
                arg_idx += 1;
            }
            Some('f') => {
                let v = state.get(arg_idx);
                let f = v.as_float().ok_or_else(|| {
                    Error::type_error(format!("bad argument #{} to 'format' (number expected)", arg_idx + 1))
                })?;
                out.push_str(&format!("{f:.6}"));
                arg_idx += 1;
            }
            Some('x') => {
                let v = state.get(arg_idx);
                let i = v.as_integer().ok_or_else(|| {
                    Error::type_error(format!("bad argument #{} to 'format' (number expected)", arg_idx + 1))
                })?;
                out.push_str(&format!("{i:x}"));
                arg_idx += 1;
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    state.push_string(&out)?;
    Ok(1)
}
