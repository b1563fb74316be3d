//! Per-invocation call frame (spec §3 "CallFrame", §4.3 "Calls").
//!
//! Grounded on `lua_vm/lua_call_frame.rs`'s `LuaCallFrame` layout (prototype
//! pointer, cached code/constants pointers, base/top/pc, `nresults` with a
//! `MULTRET` sentinel, vararg bookkeeping, `CIST_*` status flags) —
//! Vesper keeps a prototype `Rc` instead of raw pointers since nothing here
//! needs the teacher's pointer-caching micro-optimization to be correct.

use crate::gc::pool::FunctionId;
use crate::value::function::Prototype;
use crate::value::Value;
use std::rc::Rc;

pub const MULTRET: i32 = -1;

/// Call-status flags, named after the teacher's `CIST_*` constants.
pub mod status {
    pub const IS_LUA: u8 = 1 << 0;
    pub const TAIL_CALL: u8 = 1 << 1;
    pub const PROTECTED: u8 = 1 << 2;
}

/// A single activation record. Register `R(n)` for a frame `f` is value
/// stack slot `f.base + n`.
pub struct CallFrame {
    pub function: Option<FunctionId>,
    pub proto: Option<Rc<Prototype>>,
    pub pc: usize,
    pub base: usize,
    pub top: usize,
    /// Stack index results must land at when this frame returns.
    pub call_position: usize,
    /// Number of results the caller asked for, or `MULTRET` for "all".
    pub nresults: i32,
    /// The excess arguments supplied beyond `proto.num_params` (spec §3
    /// CallFrame "count of excess varargs supplied"). Stored as an owned
    /// side-buffer rather than aliased stack slots below `base` — simpler
    /// than Lua C's negative-offset trick and just as correct, since a
    /// `Value` is `Copy` and the vector is tiny in practice.
    pub varargs: Vec<Value>,
    pub status: u8,
}

impl CallFrame {
    pub fn new_lua(
        function: FunctionId,
        proto: Rc<Prototype>,
        base: usize,
        call_position: usize,
        nresults: i32,
    ) -> Self {
        CallFrame {
            function: Some(function),
            proto: Some(proto),
            pc: 0,
            base,
            top: base,
            call_position,
            nresults,
            varargs: Vec::new(),
            status: status::IS_LUA,
        }
    }

    pub fn new_native(base: usize, call_position: usize, nresults: i32) -> Self {
        CallFrame {
            function: None,
            proto: None,
            pc: 0,
            base,
            top: base,
            call_position,
            nresults,
            varargs: Vec::new(),
            status: 0,
        }
    }

    pub fn is_lua(&self) -> bool {
        self.status & status::IS_LUA != 0
    }

    pub fn is_tail_call(&self) -> bool {
        self.status & status::TAIL_CALL != 0
    }

    pub fn set_tail_call(&mut self) {
        self.status |= status::TAIL_CALL;
    }

    pub fn is_protected(&self) -> bool {
        self.status & status::PROTECTED != 0
    }

    pub fn set_protected(&mut self) {
        self.status |= status::PROTECTED;
    }
}
