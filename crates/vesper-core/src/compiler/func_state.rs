//! Per-function compile-time state: locals, block scoping, register
//! allocation, upvalue bookkeeping (spec §4.4 "Upvalues", §3 "Prototype").
//!
//! Grounded on the teacher's `compiler/func_state.rs` (`FuncState`,
//! register windows via `freereg`/`nactvar`) and `BlockCnt` scope-chain
//! idea from `compiler/mod.rs` — register allocation here is simplified to
//! "every subexpression gets a fresh temporary register" rather than the
//! teacher's constant-folding/peephole reuse, appropriate for a from-scratch
//! front end where correctness matters far more than an optimal register
//! count.

use crate::error::{Error, ErrorKind, Result};
use crate::value::function::{ConstantRef, Prototype, UpvalueDesc};
use crate::vm::opcode::{self, OpCode};

pub struct LocalVar {
    pub name: String,
    pub reg: u8,
    pub is_const: bool,
}

/// One `{ ... }` lexical scope (teacher's `BlockCnt`): tracks which locals
/// it owns (for closing on exit), whether it is a loop body (so `break`/
/// `continue` are legal), and any `defer`-registered closures awaiting
/// LIFO execution on exit (spec §7 "Defer semantics").
pub struct BlockScope {
    pub base_local: usize,
    pub base_reg: u8,
    pub is_loop: bool,
    pub break_jumps: Vec<usize>,
    pub continue_jumps: Vec<usize>,
    pub defer_regs: Vec<u8>,
}

pub struct FuncState {
    pub proto: Prototype,
    pub locals: Vec<LocalVar>,
    pub blocks: Vec<BlockScope>,
    pub freereg: u8,
    pub upvalue_names: Vec<String>,
}

const MAX_REGISTERS: u8 = 250;

impl FuncState {
    pub fn new() -> Self {
        FuncState {
            proto: Prototype::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
            freereg: 0,
            upvalue_names: Vec::new(),
        }
    }

    // ---------- registers ----------

    pub fn reserve_reg(&mut self) -> Result<u8> {
        if self.freereg >= MAX_REGISTERS {
            return Err(Error::new(
                ErrorKind::SyntaxError,
                "function uses too many registers",
            ));
        }
        let r = self.freereg;
        self.freereg += 1;
        if self.freereg as u32 > self.proto.max_stack_size {
            self.proto.max_stack_size = self.freereg as u32;
        }
        Ok(r)
    }

    /// Release temporary registers down to (but not including) `target`,
    /// never releasing a register still backing an active local.
    pub fn free_to(&mut self, target: u8) {
        if target < self.freereg {
            self.freereg = target;
        }
    }

    // ---------- locals ----------

    pub fn declare_local(&mut self, name: &str, is_const: bool) -> Result<u8> {
        let reg = self.reserve_reg()?;
        self.locals.push(LocalVar {
            name: name.to_string(),
            reg,
            is_const,
        });
        Ok(reg)
    }

    pub fn find_local(&self, name: &str) -> Option<(u8, bool)> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| (l.reg, l.is_const))
    }

    // ---------- blocks ----------

    pub fn enter_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockScope {
            base_local: self.locals.len(),
            base_reg: self.freereg,
            is_loop,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            defer_regs: Vec::new(),
        });
    }

    /// Pop the innermost block, truncating locals/registers it owned.
    /// Returns the popped scope so the caller can patch its break/continue
    /// jump lists and replay its defers.
    pub fn leave_block(&mut self) -> BlockScope {
        let scope = self.blocks.pop().expect("leave_block without enter_block");
        self.locals.truncate(scope.base_local);
        self.free_to(scope.base_reg);
        scope
    }

    pub fn innermost_loop(&self) -> Option<usize> {
        self.blocks.iter().rposition(|b| b.is_loop)
    }

    /// Defer registers owned by every block from the current one down to
    /// (and including, for a full function exit, or excluding the target
    /// loop for `break`/`continue`) `down_to`, innermost-first, for LIFO
    /// replay at a scope exit (spec §7 "Defer semantics").
    pub fn pending_defers(&self, down_to: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for scope in self.blocks[down_to..].iter().rev() {
            for &r in scope.defer_regs.iter().rev() {
                out.push(r);
            }
        }
        out
    }

    // ---------- constants ----------

    pub fn add_string_constant(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.proto.string_constants.iter().position(|x| x == s) {
            return idx as u32;
        }
        let idx = self.proto.string_constants.len() as u32;
        self.proto.string_constants.push(s.to_string());
        idx
    }

    pub fn add_constant(&mut self, c: ConstantRef) -> u32 {
        if let ConstantRef::Integer(i) = c {
            if let Some(idx) = self.proto.constants.iter().position(|existing| {
                matches!(existing, ConstantRef::Integer(x) if *x == i)
            }) {
                return idx as u32;
            }
        }
        let idx = self.proto.constants.len() as u32;
        self.proto.constants.push(c);
        idx
    }

    pub fn add_string_const_ref(&mut self, s: &str) -> u32 {
        let sidx = self.add_string_constant(s);
        self.add_constant(ConstantRef::String(sidx))
    }

    // ---------- upvalues ----------

    pub fn find_upvalue(&self, name: &str) -> Option<u32> {
        self.upvalue_names.iter().position(|n| n == name).map(|i| i as u32)
    }

    pub fn add_upvalue(&mut self, name: &str, desc: UpvalueDesc) -> u32 {
        self.upvalue_names.push(name.to_string());
        self.proto.upvalue_names.push(name.to_string());
        self.proto.upvalue_descs.push(desc);
        (self.upvalue_names.len() - 1) as u32
    }

    // ---------- emission ----------

    pub fn emit(&mut self, inst: u32, line: u32, column: u32) -> usize {
        self.proto.bytecode.push(inst);
        self.proto.lines.push((line, column));
        self.proto.bytecode.len() - 1
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32, k: bool, line: u32, column: u32) -> usize {
        self.emit(opcode::encode_abc(op, a, b, c, k), line, column)
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32, line: u32, column: u32) -> usize {
        self.emit(opcode::encode_abx(op, a, bx), line, column)
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32, line: u32, column: u32) -> usize {
        self.emit(opcode::encode_asbx(op, a, sbx), line, column)
    }

    /// Emit a `Jmp` with a placeholder offset, returning its pc for later
    /// patching via [`FuncState::patch_jmp_here`]/[`FuncState::patch_jmp_to`].
    pub fn emit_jmp(&mut self, line: u32, column: u32) -> usize {
        self.emit(opcode::encode_sj(OpCode::Jmp, 0), line, column)
    }

    /// Patch a previously emitted `Jmp` at `pc` to land at the *next*
    /// instruction to be emitted (i.e. "here").
    pub fn patch_jmp_here(&mut self, pc: usize) {
        let target = self.proto.bytecode.len();
        self.patch_jmp_to(pc, target);
    }

    pub fn patch_jmp_to(&mut self, pc: usize, target: usize) {
        let sj = target as i64 - (pc as i64 + 1);
        self.proto.bytecode[pc] = opcode::encode_sj(OpCode::Jmp, sj as i32);
    }

    pub fn here(&self) -> usize {
        self.proto.bytecode.len()
    }

    /// Rewrite a previously emitted `Call`'s result-count operand (its `c`
    /// field) in place, used when a multi-value assignment discovers the
    /// trailing expression in its list is a bare call and needs more than
    /// the one result it was originally compiled to produce.
    pub fn patch_call_c(&mut self, pc: usize, new_c: u32) {
        let inst = self.proto.bytecode[pc];
        let op = opcode::get_op(inst);
        let a = opcode::get_a(inst);
        let b = opcode::get_b(inst);
        let k = opcode::get_k(inst);
        self.proto.bytecode[pc] = opcode::encode_abc(op, a, b, new_c, k);
    }

    /// Rewrite a `Call` already emitted at `pc` into a `TailCall` in place,
    /// keeping its `a`/`b` fields (callee register, argument count). Used
    /// when `return f(...)` compiles the call before discovering it is the
    /// statement's sole return expression (spec §4.3 "Tail calls": the call
    /// stack must not grow across a chain of these).
    pub fn patch_call_to_tailcall(&mut self, pc: usize) {
        let inst = self.proto.bytecode[pc];
        let a = opcode::get_a(inst);
        let b = opcode::get_b(inst);
        let k = opcode::get_k(inst);
        self.proto.bytecode[pc] = opcode::encode_abc(OpCode::TailCall, a, b, 0, k);
    }
}
