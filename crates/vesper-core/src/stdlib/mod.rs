//! Standard library: `basic`/`string`/`table`/`math`/`os` host functions,
//! registered through the embedding API rather than special-cased by the
//! interpreter (spec §1 "Standard library modules ... ordinary
//! host-language functions registered through the embedding API").
//!
//! Grounded on the teacher's `stdlib/mod.rs` module list (`basic`,
//! `string`, `table`, `math`, `os`); each submodule here mirrors one of
//! its files, trimmed to the baseline an embedding actually needs — the
//! teacher's own Lua-pattern matching engine and `string.pack` binary
//! layout reader are substantial reimplementation efforts of their own,
//! and spec §1 keeps the stdlib an external collaborator rather than
//! core-specified surface.

mod basic;
mod math;
mod os;
mod string;
mod table;

use crate::error::Result;
use crate::gc::pool::TableId;
use crate::gc::GcRef;
use crate::value::string::LuaStr;
use crate::value::table::Table;
use crate::value::Value;
use crate::vm::state::State;

/// Install every stdlib module's globals into a fresh [`State`] (spec §6;
/// called from [`crate::execute`]/[`crate::execute_with_vm`]).
pub fn open_libs(state: &mut State) -> Result<()> {
    basic::install(state)?;

    let string_tbl = string::install(state)?;
    state.set_global("string", Value::Table(string_tbl))?;
    // `("x"):upper()` etc. resolve through the string metatable's
    // `__index`, the same chain `table_ops::index_get` already walks for
    // `Value::String` (spec §4.2 "__index chain").
    let string_mt = new_table(state)?;
    set_field(state, string_mt, "__index", Value::Table(string_tbl))?;
    state.string_metatable = Some(string_mt);

    let table_tbl = table::install(state)?;
    state.set_global("table", Value::Table(table_tbl))?;

    let math_tbl = math::install(state)?;
    state.set_global("math", Value::Table(math_tbl))?;

    let os_tbl = os::install(state)?;
    state.set_global("os", Value::Table(os_tbl))?;

    Ok(())
}

/// Allocate a fresh table without touching the value stack.
pub(super) fn new_table(state: &mut State) -> Result<TableId> {
    state.heap.alloc_table(Table::new())
}

/// `table[name] = value`, interning `name` and running the write barrier
/// the way every other table-mutating opcode body does (spec §4.5 "Write
/// barrier").
pub(super) fn set_field(state: &mut State, table: TableId, name: &str, value: Value) -> Result<()> {
    let key = Value::String(state.heap.alloc_string(LuaStr::new(name))?);
    state.heap.write_barrier(GcRef::Table(table), value);
    if let Some(t) = state.heap.tables.get_mut(table.index()) {
        t.raw_set(key, value);
    }
    Ok(())
}
