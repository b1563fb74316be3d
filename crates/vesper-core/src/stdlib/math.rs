//! Math library: the standard transcendental/rounding functions plus the
//! `pi`/`huge`/`maxinteger`/`mininteger` constants (spec §1 "Standard
//! library modules").
//!
//! Grounded on the teacher's `stdlib/math.rs` argument-checking style.
//! `math.random`/`randomseed` are not carried: nothing in SPEC_FULL.md
//! needs randomness, and the `rand` dependency was already dropped (see
//! DESIGN.md "Dependency drops").

use crate::error::{Error, Result};
use crate::gc::pool::TableId;
use crate::value::Value;
use crate::vm::state::State;

pub(super) fn install(state: &mut State) -> Result<TableId> {
    let tbl = super::new_table(state)?;
    super::set_field(state, tbl, "abs", Value::CFunction(abs))?;
    super::set_field(state, tbl, "ceil", Value::CFunction(ceil))?;
    super::set_field(state, tbl, "floor", Value::CFunction(floor))?;
    super::set_field(state, tbl, "sqrt", Value::CFunction(sqrt))?;
    super::set_field(state, tbl, "sin", Value::CFunction(sin))?;
    super::set_field(state, tbl, "cos", Value::CFunction(cos))?;
    super::set_field(state, tbl, "tan", Value::CFunction(tan))?;
    super::set_field(state, tbl, "asin", Value::CFunction(asin))?;
    super::set_field(state, tbl, "acos", Value::CFunction(acos))?;
    super::set_field(state, tbl, "atan", Value::CFunction(atan))?;
    super::set_field(state, tbl, "exp", Value::CFunction(exp))?;
    super::set_field(state, tbl, "log", Value::CFunction(log))?;
    super::set_field(state, tbl, "max", Value::CFunction(max))?;
    super::set_field(state, tbl, "min", Value::CFunction(min))?;
    super::set_field(state, tbl, "fmod", Value::CFunction(fmod))?;
    super::set_field(state, tbl, "modf", Value::CFunction(modf))?;
    super::set_field(state, tbl, "tointeger", Value::CFunction(tointeger))?;
    super::set_field(state, tbl, "type", Value::CFunction(math_type))?;
    super::set_field(state, tbl, "pi", Value::Float(std::f64::consts::PI))?;
    super::set_field(state, tbl, "huge", Value::Float(f64::INFINITY))?;
    super::set_field(state, tbl, "maxinteger", Value::Integer(i64::MAX))?;
    super::set_field(state, tbl, "mininteger", Value::Integer(i64::MIN))?;
    Ok(tbl)
}

fn checknum(state: &State, idx: i64, fname: &str) -> Result<f64> {
    state.get(idx).as_float().ok_or_else(|| {
        Error::type_error(format!(
            "bad argument #{} to '{}' (number expected, got {})",
            idx + 1,
            fname,
            state.get(idx).type_name()
        ))
    })
}

fn abs(state: &mut State) -> Result<usize> {
    match state.get(0) {
        Value::Integer(i) => state.push_integer(i.wrapping_abs()),
        _ => state.push_float(checknum(state, 0, "abs")?.abs()),
    }
    Ok(1)
}

fn ceil(state: &mut State) -> Result<usize> {
    let i = match state.get(0) {
        Value::Integer(i) => i,
        _ => checknum(state, 0, "ceil")?.ceil() as i64,
    };
    state.push_integer(i);
    Ok(1)
}

fn floor(state: &mut State) -> Result<usize> {
    let i = match state.get(0) {
        Value::Integer(i) => i,
        _ => checknum(state, 0, "floor")?.floor() as i64,
    };
    state.push_integer(i);
    Ok(1)
}

macro_rules! unary_float_fn {
    ($name:ident, $method:ident, $label:literal) => {
        fn $name(state: &mut State) -> Result<usize> {
            let x = checknum(state, 0, $label)?;
            state.push_float(x.$method());
            Ok(1)
        }
    };
}

unary_float_fn!(sqrt, sqrt, "sqrt");
unary_float_fn!(sin, sin, "sin");
unary_float_fn!(cos, cos, "cos");
unary_float_fn!(tan, tan, "tan");
unary_float_fn!(asin, asin, "asin");
unary_float_fn!(acos, acos, "acos");
unary_float_fn!(exp, exp, "exp");

fn atan(state: &mut State) -> Result<usize> {
    let y = checknum(state, 0, "atan")?;
    let x = if state.arg_count() > 1 { checknum(state, 1, "atan")? } else { 1.0 };
    state.push_float(y.atan2(x));
    Ok(1)
}

fn log(state: &mut State) -> Result<usize> {
    let x = checknum(state, 0, "log")?;
    let r = if state.arg_count() > 1 {
        x.log(checknum(state, 1, "log")?)
    } else {
        x.ln()
    };
    state.push_float(r);
    Ok(1)
}

fn max(state: &mut State) -> Result<usize> {
    let n = state.arg_count();
    if n == 0 {
        return Err(Error::type_error("bad argument #1 to 'max' (value expected)"));
    }
    checknum(state, 0, "max")?;
    let mut best = state.get(0);
    for i in 1..n {
        let v = state.get(i as i64);
        if checknum(state, i as i64, "max")? > best.as_float().unwrap_or(f64::NEG_INFINITY) {
            best = v;
        }
    }
    state.push(best);
    Ok(1)
}

fn min(state: &mut State) -> Result<usize> {
    let n = state.arg_count();
    if n == 0 {
        return Err(Error::type_error("bad argument #1 to 'min' (value expected)"));
    }
    checknum(state, 0, "min")?;
    let mut best = state.get(0);
    for i in 1..n {
        let v = state.get(i as i64);
        if checknum(state, i as i64, "min")? < best.as_float().unwrap_or(f64::INFINITY) {
            best = v;
        }
    }
    state.push(best);
    Ok(1)
}

fn fmod(state: &mut State) -> Result<usize> {
    if let (Value::Integer(x), Value::Integer(y)) = (state.get(0), state.get(1)) {
        if y == 0 {
            return Err(Error::arithmetic_error("bad argument #2 to 'fmod' (zero)"));
        }
        state.push_integer(x.wrapping_rem(y));
    } else {
        let x = checknum(state, 0, "fmod")?;
        let y = checknum(state, 1, "fmod")?;
        state.push_float(x % y);
    }
    Ok(1)
}

fn modf(state: &mut State) -> Result<usize> {
    let x = checknum(state, 0, "modf")?;
    let ip = x.trunc();
    state.push_float(ip);
    state.push_float(x - ip);
    Ok(2)
}

fn tointeger(state: &mut State) -> Result<usize> {
    match state.get(0).as_integer() {
        Some(i) => state.push_integer(i),
        None => state.push_nil(),
    }
    Ok(1)
}

fn math_type(state: &mut State) -> Result<usize> {
    match state.get(0) {
        Value::Integer(_) => state.push_string("integer")?,
        Value::Float(_) => state.push_string("float")?,
        _ => state.push_nil(),
    }
    Ok(1)
}
