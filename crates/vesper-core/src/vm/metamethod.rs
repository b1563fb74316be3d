//! Per-operator metatable method resolution (spec §4.1, §4.2 `__index`
//! chain).
//!
//! Grounded on `lua_vm/execute/metamethod.rs`'s dispatch-by-name lookup; a
//! metamethod call is structurally an ordinary call (spec §4.3 "Metamethod
//! dispatch" — no native recursion is introduced here, invocation is left
//! to `vm::interp` which already loops over `__call`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaMethod {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
    Bnot,
    Concat,
    Eq,
    Lt,
    Le,
    Len,
    Index,
    NewIndex,
    Call,
    ToString,
    Gc,
}

impl MetaMethod {
    pub fn name(self) -> &'static str {
        match self {
            MetaMethod::Add => "__add",
            MetaMethod::Sub => "__sub",
            MetaMethod::Mul => "__mul",
            MetaMethod::Div => "__div",
            MetaMethod::Mod => "__mod",
            MetaMethod::Pow => "__pow",
            MetaMethod::Unm => "__unm",
            MetaMethod::Band => "__band",
            MetaMethod::Bor => "__bor",
            MetaMethod::Bxor => "__bxor",
            MetaMethod::Shl => "__shl",
            MetaMethod::Shr => "__shr",
            MetaMethod::Bnot => "__bnot",
            MetaMethod::Concat => "__concat",
            MetaMethod::Eq => "__eq",
            MetaMethod::Lt => "__lt",
            MetaMethod::Le => "__le",
            MetaMethod::Len => "__len",
            MetaMethod::Index => "__index",
            MetaMethod::NewIndex => "__newindex",
            MetaMethod::Call => "__call",
            MetaMethod::ToString => "__tostring",
            MetaMethod::Gc => "__gc",
        }
    }
}

use crate::gc::pool::TableId;
use crate::value::Value;
use crate::vm::state::State;

/// Look up `event` on `v`'s metatable, returning `Value::NullOpt`-less
/// `None` if `v` has no metatable or the metatable has no such entry.
pub fn lookup(state: &State, v: Value, event: MetaMethod) -> Option<Value> {
    let mt: TableId = state.metatable_of(v)?;
    let table = state.heap.tables.get(mt.index())?;
    let key_str = event.name();
    // metatable keys are interned strings; compare by content since we
    // don't have the string's StringId handy here.
    for (k, val) in table.next_pairs_snapshot() {
        if let Value::String(id) = k {
            if let Some(s) = state.heap.strings.get(id.index()) {
                if s.as_str() == key_str && !val.is_nil() {
                    return Some(val);
                }
            }
        }
    }
    None
}

/// Resolve the binary-operator metamethod (spec §4.1): consult the left
/// operand's metatable, then the right's.
pub fn lookup_binary(state: &State, lhs: Value, rhs: Value, event: MetaMethod) -> Option<Value> {
    lookup(state, lhs, event).or_else(|| lookup(state, rhs, event))
}

/// `__eq` is only consulted when both operands are table-like and carry
/// the *same* `__eq` method (spec §4.1, §9 Open Question 4 — kept strict).
pub fn lookup_eq(state: &State, lhs: Value, rhs: Value) -> Option<Value> {
    if !lhs.is_table_like() || !rhs.is_table_like() {
        return None;
    }
    let a = lookup(state, lhs, MetaMethod::Eq)?;
    let b = lookup(state, rhs, MetaMethod::Eq)?;
    if a.raw_equal(&b) {
        Some(a)
    } else {
        None
    }
}
