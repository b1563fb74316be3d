//! Process library (spec §1 "Standard library modules": `process`):
//! wall-clock time and process-relative elapsed time.
//!
//! Grounded on the teacher's `stdlib/os.rs`. Uses `chrono` for calendar
//! time (teacher's `chrono.workspace` dependency, SPEC_FULL.md §A "Time
//! source") rather than hand-rolled `SystemTime` epoch math.

use crate::error::Result;
use crate::gc::pool::TableId;
use crate::value::Value;
use crate::vm::state::State;
use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

pub(super) fn install(state: &mut State) -> Result<TableId> {
    let tbl = super::new_table(state)?;
    super::set_field(state, tbl, "clock", Value::CFunction(clock))?;
    super::set_field(state, tbl, "time", Value::CFunction(time))?;
    super::set_field(state, tbl, "date", Value::CFunction(date))?;
    Ok(tbl)
}

/// Seconds elapsed since this process's first call into the library
/// (there is no portable "CPU time used" in stable `std` alone; wall
/// time relative to process start is the teacher's own `os.clock`
/// approximation).
fn clock(state: &mut State) -> Result<usize> {
    let start = PROCESS_START.get_or_init(Instant::now);
    state.push_float(start.elapsed().as_secs_f64());
    Ok(1)
}

fn time(state: &mut State) -> Result<usize> {
    state.push_integer(chrono::Utc::now().timestamp());
    Ok(1)
}

fn date(state: &mut State) -> Result<usize> {
    let fmt = state.to_string_value(0).unwrap_or_else(|| "%c".to_string());
    let rendered = chrono::Utc::now().format(&fmt).to_string();
    state.push_string(&rendered)?;
    Ok(1)
}
