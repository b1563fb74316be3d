//! The virtual machine: call frames, upvalues, bytecode encoding, the
//! dispatch loop, metatable resolution, and the host-facing [`state::State`]
//! (spec §4.3, §4.4, §4.6).

pub mod frame;
pub mod interp;
pub mod metamethod;
pub mod opcode;
pub mod state;
pub mod upvalue;
