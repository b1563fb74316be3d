//! Recursive-descent parser with single-pass bytecode codegen (spec §6
//! "Source dialect", §6 "Compiler entry point").
//!
//! Grounded on the teacher's `compiler/mod.rs` `Compiler` (token cursor,
//! one register per pending subexpression, `BlockCnt` scope chain fed
//! through [`super::func_state::FuncState`]) generalized from the Lua
//! grammar the teacher targets to the C-family dialect spec §6 describes.
//! Expression parsing is precedence-climbing (Pratt) over [`TokenKind`];
//! every subexpression lands in its own fresh register rather than being
//! constant-folded, matching the simplified register-allocation strategy
//! already committed to in `func_state.rs`.

use std::rc::Rc;

use super::func_state::FuncState;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{Error, ErrorKind, Location, Result};
use crate::value::function::{ConstantRef, Prototype, UpvalueDesc};
use crate::vm::opcode::OpCode;

/// An expression that has not yet been forced to a single value: either a
/// `Call` or `Vararg` instruction whose result-count operand can still be
/// widened if this expression turns out to be the last one in a list (spec
/// §6 "Multi-value expansion").
#[derive(Clone, Copy)]
enum OpenTail {
    Call(usize),
    Vararg(usize),
}

/// An assignable location: a local/upvalue/global slot, or a table field
/// reached through an already-materialized object register.
#[derive(Clone, Copy)]
enum Target {
    Local(u8, bool),
    Upvalue(u32),
    Global(u32),
    Field(u8, u32),
    Index(u8, u8),
}

/// The result of parsing one (postfix-chained) subexpression: either an
/// assignable `Target` that hasn't been read yet, or a register already
/// holding a value, possibly still an open tail.
#[derive(Clone, Copy)]
enum Atom {
    Target(Target),
    Reg(u8, Option<OpenTail>),
}

enum NameRef {
    Local(u8, bool),
    Upvalue(u32),
    Global,
}

#[derive(Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy)]
enum OpKind {
    And,
    Or,
    Cmp(CmpOp),
    Arith(OpCode),
}

enum ReturnList {
    Fixed(u8, usize),
    Multret(u8),
    /// The whole return list is exactly one bare call (`return f(...)`),
    /// with nothing before or after it — eligible for tail-call conversion.
    /// Carries the `Call` instruction's own pc.
    TailCall(usize),
}

fn binop_info(kind: &TokenKind) -> Option<(u8, u8, OpKind)> {
    use TokenKind::*;
    Some(match kind {
        PipePipe => (1, 2, OpKind::Or),
        AmpAmp => (2, 3, OpKind::And),
        EqEq => (3, 4, OpKind::Cmp(CmpOp::Eq)),
        BangEq => (3, 4, OpKind::Cmp(CmpOp::Ne)),
        Lt => (3, 4, OpKind::Cmp(CmpOp::Lt)),
        Le => (3, 4, OpKind::Cmp(CmpOp::Le)),
        Gt => (3, 4, OpKind::Cmp(CmpOp::Gt)),
        Ge => (3, 4, OpKind::Cmp(CmpOp::Ge)),
        Pipe => (4, 5, OpKind::Arith(OpCode::Bor)),
        Caret => (5, 6, OpKind::Arith(OpCode::Bxor)),
        Amp => (6, 7, OpKind::Arith(OpCode::Band)),
        Shl => (7, 8, OpKind::Arith(OpCode::Shl)),
        Shr => (7, 8, OpKind::Arith(OpCode::Shr)),
        Plus => (8, 9, OpKind::Arith(OpCode::Add)),
        Minus => (8, 9, OpKind::Arith(OpCode::Sub)),
        Star => (9, 10, OpKind::Arith(OpCode::Mul)),
        Slash => (9, 10, OpKind::Arith(OpCode::Div)),
        Percent => (9, 10, OpKind::Arith(OpCode::Mod)),
        _ => return None,
    })
}

/// Walks the token stream once, emitting bytecode into a stack of
/// [`FuncState`]s (one per nested function literal) as it goes.
pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    chunk_name: String,
    funcs: Vec<FuncState>,
    module_mode: bool,
    exports_reg: Option<u8>,
    had_explicit_return: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(source: &'a str, chunk_name: &str) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let cur = lexer.next_token()?;
        Ok(Compiler {
            lexer,
            cur,
            chunk_name: chunk_name.to_string(),
            funcs: vec![FuncState::new()],
            module_mode: false,
            exports_reg: None,
            had_explicit_return: false,
        })
    }

    pub fn compile_chunk(mut self) -> Result<Prototype> {
        if self.check_kind(&TokenKind::Module) {
            self.advance()?;
            self.expect(TokenKind::Semicolon)?;
            self.module_mode = true;
        }
        {
            let source_name = self.chunk_name.clone();
            let module_mode = self.module_mode;
            let fs = self.cur_func();
            fs.proto.module_mode = module_mode;
            fs.proto.is_vararg = true;
            fs.proto.source_name = Some(source_name);
        }
        if self.module_mode {
            let reg = self.cur_func().reserve_reg()?;
            let (line, col) = self.pos();
            self.cur_func().emit_abc(OpCode::NewTable, reg as u32, 0, 0, false, line, col);
            self.exports_reg = Some(reg);
        }
        while !self.check_kind(&TokenKind::Eof) {
            self.statement()?;
        }
        if !self.had_explicit_return {
            let (line, col) = self.pos();
            if let Some(reg) = self.exports_reg {
                self.cur_func().emit_abc(OpCode::Return, reg as u32, 2, 0, false, line, col);
            } else {
                self.cur_func().emit_abc(OpCode::Return0, 0, 0, 0, false, line, col);
            }
        }
        Ok(self.funcs.pop().expect("chunk FuncState always present").proto)
    }

    // ---------- token stream helpers ----------

    fn cur_func(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("at least the chunk FuncState is always present")
    }

    fn pos(&self) -> (u32, u32) {
        (self.cur.line, self.cur.column)
    }

    fn check_kind(&self, k: &TokenKind) -> bool {
        &self.cur.kind == k
    }

    fn advance(&mut self) -> Result<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.cur, next))
    }

    fn expect(&mut self, k: TokenKind) -> Result<Token> {
        if self.cur.kind == k {
            self.advance()
        } else {
            Err(self.err_syntax(format!("expected {:?}, found {:?}", k, self.cur.kind)))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        if let TokenKind::Ident(name) = self.cur.kind.clone() {
            self.advance()?;
            Ok(name)
        } else {
            Err(self.err_syntax(format!("expected identifier, found {:?}", self.cur.kind)))
        }
    }

    fn err_syntax(&self, msg: impl Into<String>) -> Error {
        Error::new(ErrorKind::SyntaxError, msg).with_location(Location {
            line: self.cur.line,
            column: self.cur.column,
        })
    }

    fn err_semantic(&self, msg: impl Into<String>) -> Error {
        Error::new(ErrorKind::SemanticError, msg).with_location(Location {
            line: self.cur.line,
            column: self.cur.column,
        })
    }

    // ---------- name resolution ----------

    fn resolve_name(&mut self, name: &str) -> NameRef {
        let top = self.funcs.len() - 1;
        if let Some((reg, is_const)) = self.funcs[top].find_local(name) {
            return NameRef::Local(reg, is_const);
        }
        if let Some(idx) = self.resolve_upvalue(top, name) {
            return NameRef::Upvalue(idx);
        }
        NameRef::Global
    }

    /// Lua's standard upvalue-resolution algorithm: search the enclosing
    /// function's locals first, then recurse into *its* upvalues, building
    /// a `ParentLocal`/`ParentUpvalue` chain through every intermediate
    /// function level (spec §4.4 "Upvalues").
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u32> {
        if level == 0 {
            return None;
        }
        if let Some(idx) = self.funcs[level].find_upvalue(name) {
            return Some(idx);
        }
        let parent = level - 1;
        if let Some((reg, _)) = self.funcs[parent].find_local(name) {
            return Some(self.funcs[level].add_upvalue(name, UpvalueDesc::ParentLocal(reg as u32)));
        }
        if let Some(up) = self.resolve_upvalue(parent, name) {
            return Some(self.funcs[level].add_upvalue(name, UpvalueDesc::ParentUpvalue(up)));
        }
        None
    }

    fn name_to_target(&mut self, name: &str) -> Target {
        match self.resolve_name(name) {
            NameRef::Local(reg, is_const) => Target::Local(reg, is_const),
            NameRef::Upvalue(idx) => Target::Upvalue(idx),
            NameRef::Global => {
                let sidx = self.cur_func().add_string_constant(name);
                Target::Global(sidx)
            }
        }
    }

    fn read_target(&mut self, t: Target) -> Result<u8> {
        match t {
            Target::Local(reg, _) => Ok(reg),
            Target::Upvalue(idx) => {
                let dest = self.cur_func().reserve_reg()?;
                let (line, col) = self.pos();
                self.cur_func().emit_abc(OpCode::GetUpval, dest as u32, idx, 0, false, line, col);
                Ok(dest)
            }
            Target::Global(sidx) => {
                let dest = self.cur_func().reserve_reg()?;
                let (line, col) = self.pos();
                self.cur_func().emit_abx(OpCode::GetGlobal, dest as u32, sidx, line, col);
                Ok(dest)
            }
            Target::Field(obj, sidx) => {
                let dest = self.cur_func().reserve_reg()?;
                let (line, col) = self.pos();
                self.cur_func()
                    .emit_abc(OpCode::GetField, dest as u32, obj as u32, sidx, false, line, col);
                Ok(dest)
            }
            Target::Index(obj, key) => {
                let dest = self.cur_func().reserve_reg()?;
                let (line, col) = self.pos();
                self.cur_func()
                    .emit_abc(OpCode::GetTable, dest as u32, obj as u32, key as u32, false, line, col);
                Ok(dest)
            }
        }
    }

    fn write_target(&mut self, t: Target, value_reg: u8) -> Result<()> {
        let (line, col) = self.pos();
        match t {
            Target::Local(reg, is_const) => {
                if is_const {
                    return Err(self.err_semantic("cannot assign to a const variable"));
                }
                if reg != value_reg {
                    self.cur_func().emit_abc(OpCode::Move, reg as u32, value_reg as u32, 0, false, line, col);
                }
            }
            Target::Upvalue(idx) => {
                self.cur_func().emit_abc(OpCode::SetUpval, value_reg as u32, idx, 0, false, line, col);
            }
            Target::Global(sidx) => {
                self.cur_func().emit_abx(OpCode::SetGlobal, value_reg as u32, sidx, line, col);
            }
            Target::Field(obj, sidx) => {
                self.cur_func()
                    .emit_abc(OpCode::SetField, obj as u32, sidx, value_reg as u32, false, line, col);
            }
            Target::Index(obj, key) => {
                self.cur_func()
                    .emit_abc(OpCode::SetTable, obj as u32, key as u32, value_reg as u32, false, line, col);
            }
        }
        Ok(())
    }

    // ---------- open-tail plumbing (spec §6 "Multi-value expansion") ----------

    fn atom_to_pair(&mut self, atom: Atom) -> Result<(u8, Option<OpenTail>)> {
        match atom {
            Atom::Reg(r, open) => Ok((r, open)),
            Atom::Target(t) => Ok((self.read_target(t)?, None)),
        }
    }

    fn to_reg_forced(&mut self, atom: Atom) -> Result<u8> {
        let pair = self.atom_to_pair(atom)?;
        Ok(self.force_single(pair))
    }

    /// Collapse a pending `Call`/`Vararg` tail down to exactly one result.
    /// A no-op for anything that was never open.
    fn force_single(&mut self, pair: (u8, Option<OpenTail>)) -> u8 {
        let (reg, tail) = pair;
        if let Some(t) = tail {
            self.patch_open_concrete(t, 1);
        }
        reg
    }

    fn patch_open_concrete(&mut self, t: OpenTail, want: usize) {
        match t {
            OpenTail::Call(pc) => self.cur_func().patch_call_c(pc, (want + 1) as u32),
            OpenTail::Vararg(pc) => self.patch_vararg_b(pc, (want + 1) as u32),
        }
    }

    fn patch_open_multret(&mut self, t: OpenTail) {
        match t {
            OpenTail::Call(pc) => self.cur_func().patch_call_c(pc, 0),
            OpenTail::Vararg(pc) => self.patch_vararg_b(pc, 0),
        }
    }

    fn patch_vararg_b(&mut self, pc: usize, new_b: u32) {
        use crate::vm::opcode;
        let fs = self.cur_func();
        let inst = fs.proto.bytecode[pc];
        let op = opcode::get_op(inst);
        let a = opcode::get_a(inst);
        let c = opcode::get_c(inst);
        let k = opcode::get_k(inst);
        fs.proto.bytecode[pc] = opcode::encode_abc(op, a, new_b, c, k);
    }

    fn emit_jump_to(&mut self, target: usize) {
        let (line, col) = self.pos();
        let pc = self.cur_func().emit_jmp(line, col);
        self.cur_func().patch_jmp_to(pc, target);
    }

    // ---------- expressions ----------

    fn expr(&mut self) -> Result<u8> {
        let pair = self.expr_tail()?;
        Ok(self.force_single(pair))
    }

    /// Top of the precedence ladder: the ternary `cond ? a : b`, which sits
    /// below every binary operator.
    fn expr_tail(&mut self) -> Result<(u8, Option<OpenTail>)> {
        let cond = self.parse_binary(1)?;
        if !self.check_kind(&TokenKind::Question) {
            return Ok(cond);
        }
        self.advance()?;
        let cond_reg = self.force_single(cond);
        let (line, col) = self.pos();
        self.cur_func().emit_abc(OpCode::Test, cond_reg as u32, 0, 0, false, line, col);
        let else_jmp = self.cur_func().emit_jmp(line, col);
        let dest = self.cur_func().reserve_reg()?;
        let then_pair = self.parse_binary(1)?;
        let then_reg = self.force_single(then_pair);
        if then_reg != dest {
            let (l, c) = self.pos();
            self.cur_func().emit_abc(OpCode::Move, dest as u32, then_reg as u32, 0, false, l, c);
        }
        let (l, c) = self.pos();
        let end_jmp = self.cur_func().emit_jmp(l, c);
        self.expect(TokenKind::Colon)?;
        self.cur_func().patch_jmp_here(else_jmp);
        let else_pair = self.parse_binary(1)?;
        let else_reg = self.force_single(else_pair);
        if else_reg != dest {
            let (l, c) = self.pos();
            self.cur_func().emit_abc(OpCode::Move, dest as u32, else_reg as u32, 0, false, l, c);
        }
        self.cur_func().patch_jmp_here(end_jmp);
        Ok((dest, None))
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<(u8, Option<OpenTail>)> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((lbp, rbp, kind)) = binop_info(&self.cur.kind) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            match kind {
                OpKind::And => {
                    let lhs_reg = self.force_single(lhs);
                    let (line, col) = self.pos();
                    self.advance()?;
                    self.cur_func()
                        .emit_abc(OpCode::TestSet, lhs_reg as u32, lhs_reg as u32, 0, false, line, col);
                    let skip = self.cur_func().emit_jmp(line, col);
                    let rhs = self.parse_binary(rbp)?;
                    let rhs_reg = self.force_single(rhs);
                    if rhs_reg != lhs_reg {
                        let (l, c) = self.pos();
                        self.cur_func().emit_abc(OpCode::Move, lhs_reg as u32, rhs_reg as u32, 0, false, l, c);
                    }
                    self.cur_func().patch_jmp_here(skip);
                    lhs = (lhs_reg, None);
                }
                OpKind::Or => {
                    let lhs_reg = self.force_single(lhs);
                    let (line, col) = self.pos();
                    self.advance()?;
                    self.cur_func()
                        .emit_abc(OpCode::TestSet, lhs_reg as u32, lhs_reg as u32, 1, false, line, col);
                    let skip = self.cur_func().emit_jmp(line, col);
                    let rhs = self.parse_binary(rbp)?;
                    let rhs_reg = self.force_single(rhs);
                    if rhs_reg != lhs_reg {
                        let (l, c) = self.pos();
                        self.cur_func().emit_abc(OpCode::Move, lhs_reg as u32, rhs_reg as u32, 0, false, l, c);
                    }
                    self.cur_func().patch_jmp_here(skip);
                    lhs = (lhs_reg, None);
                }
                OpKind::Cmp(cmp) => {
                    let lhs_reg = self.force_single(lhs);
                    self.advance()?;
                    let rhs = self.parse_binary(rbp)?;
                    let rhs_reg = self.force_single(rhs);
                    let dest = self.emit_cmp(cmp, lhs_reg, rhs_reg)?;
                    lhs = (dest, None);
                }
                OpKind::Arith(op) => {
                    let lhs_reg = self.force_single(lhs);
                    self.advance()?;
                    let rhs = self.parse_binary(rbp)?;
                    let rhs_reg = self.force_single(rhs);
                    let dest = self.cur_func().reserve_reg()?;
                    let (line, col) = self.pos();
                    self.cur_func().emit_abc(op, dest as u32, lhs_reg as u32, rhs_reg as u32, false, line, col);
                    lhs = (dest, None);
                }
            }
        }
        Ok(lhs)
    }

    /// `==`/`!=`/`<`/`<=`/`>`/`>=` as value-producing expressions: the VM's
    /// comparison opcodes only ever skip-or-not-skip the following
    /// instruction, so materializing a boolean takes a `Jmp` flanked by two
    /// `LoadBool`s (spec §6 "Comparison codegen").
    fn emit_cmp(&mut self, cmp: CmpOp, lhs: u8, rhs: u8) -> Result<u8> {
        let (line, col) = self.pos();
        let (op, a, b, negate) = match cmp {
            CmpOp::Eq => (OpCode::Eq, lhs, rhs, false),
            CmpOp::Ne => (OpCode::Eq, lhs, rhs, true),
            CmpOp::Lt => (OpCode::Lt, lhs, rhs, false),
            CmpOp::Le => (OpCode::Le, lhs, rhs, false),
            CmpOp::Gt => (OpCode::Lt, rhs, lhs, false),
            CmpOp::Ge => (OpCode::Le, rhs, lhs, false),
        };
        let dest = self.cur_func().reserve_reg()?;
        self.cur_func().emit_abc(op, a as u32, b as u32, 0, true, line, col);
        let jmp_true = self.cur_func().emit_jmp(line, col);
        let (fv, tv) = if negate { (1, 0) } else { (0, 1) };
        self.cur_func().emit_abc(OpCode::LoadBool, dest as u32, fv, 0, false, line, col);
        let jmp_end = self.cur_func().emit_jmp(line, col);
        self.cur_func().patch_jmp_here(jmp_true);
        self.cur_func().emit_abc(OpCode::LoadBool, dest as u32, tv, 0, false, line, col);
        self.cur_func().patch_jmp_here(jmp_end);
        Ok(dest)
    }

    fn parse_unary(&mut self) -> Result<(u8, Option<OpenTail>)> {
        let (line, col) = self.pos();
        match self.cur.kind {
            TokenKind::Minus => {
                self.advance()?;
                let v = self.parse_unary()?;
                let r = self.force_single(v);
                let dest = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::Unm, dest as u32, r as u32, 0, false, line, col);
                Ok((dest, None))
            }
            TokenKind::Bang => {
                self.advance()?;
                let v = self.parse_unary()?;
                let r = self.force_single(v);
                let dest = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::Not, dest as u32, r as u32, 0, false, line, col);
                Ok((dest, None))
            }
            TokenKind::Tilde => {
                self.advance()?;
                let v = self.parse_unary()?;
                let r = self.force_single(v);
                let dest = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::Bnot, dest as u32, r as u32, 0, false, line, col);
                Ok((dest, None))
            }
            _ => self.parse_pow(),
        }
    }

    /// `**` binds tighter than unary and is right-associative, mirroring
    /// the one exponentiation operator spec §6 names.
    fn parse_pow(&mut self) -> Result<(u8, Option<OpenTail>)> {
        if self.check_kind(&TokenKind::Hash) {
            let (line, col) = self.pos();
            self.advance()?;
            let operand = self.parse_unary()?;
            let r = self.force_single(operand);
            let dest = self.cur_func().reserve_reg()?;
            self.cur_func().emit_abc(OpCode::Len, dest as u32, r as u32, 0, false, line, col);
            return Ok((dest, None));
        }
        let atom = self.suffixed_expr()?;
        let mut base = self.atom_to_pair(atom)?;
        if self.check_kind(&TokenKind::StarStar) {
            let (line, col) = self.pos();
            self.advance()?;
            let lhs = self.force_single(base);
            let rhs_pair = self.parse_unary()?;
            let rhs = self.force_single(rhs_pair);
            let dest = self.cur_func().reserve_reg()?;
            self.cur_func().emit_abc(OpCode::Pow, dest as u32, lhs as u32, rhs as u32, false, line, col);
            base = (dest, None);
        }
        Ok(base)
    }

    /// Primary expressions chained with `.field`, `[index]`, `:method(...)`,
    /// and `(...)` call suffixes.
    fn suffixed_expr(&mut self) -> Result<Atom> {
        let mut atom = self.primary()?;
        loop {
            match self.cur.kind {
                TokenKind::Dot => {
                    self.advance()?;
                    let name = self.expect_ident()?;
                    let obj = self.to_reg_forced(atom)?;
                    let sidx = self.cur_func().add_string_constant(&name);
                    atom = Atom::Target(Target::Field(obj, sidx));
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let obj = self.to_reg_forced(atom)?;
                    let key = self.expr()?;
                    self.expect(TokenKind::RBracket)?;
                    atom = Atom::Target(Target::Index(obj, key));
                }
                TokenKind::Colon => {
                    self.advance()?;
                    let name = self.expect_ident()?;
                    let obj = self.to_reg_forced(atom)?;
                    let sidx = self.cur_func().add_string_constant(&name);
                    let (line, col) = self.pos();
                    let func_reg = self.cur_func().reserve_reg()?;
                    self.cur_func()
                        .emit_abc(OpCode::GetField, func_reg as u32, obj as u32, sidx, false, line, col);
                    let self_reg = self.cur_func().reserve_reg()?;
                    self.cur_func().emit_abc(OpCode::Move, self_reg as u32, obj as u32, 0, false, line, col);
                    let (nargs, open) = self.parse_arglist()?;
                    let total = nargs + 1;
                    let b_field = if open.is_some() { 0 } else { (total + 1) as u32 };
                    let (line2, col2) = self.pos();
                    let call_pc = self.cur_func().emit_abc(OpCode::Call, func_reg as u32, b_field, 2, false, line2, col2);
                    atom = Atom::Reg(func_reg, Some(OpenTail::Call(call_pc)));
                }
                TokenKind::LParen => {
                    let func_reg = self.to_reg_forced(atom)?;
                    let (nargs, open) = self.parse_arglist()?;
                    let b_field = if open.is_some() { 0 } else { (nargs + 1) as u32 };
                    let (line, col) = self.pos();
                    let call_pc = self.cur_func().emit_abc(OpCode::Call, func_reg as u32, b_field, 2, false, line, col);
                    atom = Atom::Reg(func_reg, Some(OpenTail::Call(call_pc)));
                }
                _ => break,
            }
        }
        Ok(atom)
    }

    /// Parses `( arg, arg, ... )`, consuming both parens itself. The last
    /// argument is left as an open tail so a trailing call/vararg can
    /// expand (spec §6 "Multi-value expansion" in argument position).
    fn parse_arglist(&mut self) -> Result<(usize, Option<OpenTail>)> {
        self.expect(TokenKind::LParen)?;
        let mut count = 0usize;
        let mut open = None;
        if !self.check_kind(&TokenKind::RParen) {
            loop {
                let pair = self.expr_tail()?;
                if self.check_kind(&TokenKind::Comma) {
                    self.force_single(pair);
                    count += 1;
                    self.advance()?;
                } else {
                    count += 1;
                    open = pair.1;
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((count, open))
    }

    fn primary(&mut self) -> Result<Atom> {
        let (line, col) = self.pos();
        match self.cur.kind.clone() {
            TokenKind::Nil => {
                self.advance()?;
                let r = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::LoadNil, r as u32, 0, 0, false, line, col);
                Ok(Atom::Reg(r, None))
            }
            TokenKind::True => {
                self.advance()?;
                let r = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::LoadBool, r as u32, 1, 0, false, line, col);
                Ok(Atom::Reg(r, None))
            }
            TokenKind::False => {
                self.advance()?;
                let r = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::LoadBool, r as u32, 0, 0, false, line, col);
                Ok(Atom::Reg(r, None))
            }
            TokenKind::Integer(i) => {
                self.advance()?;
                let r = self.cur_func().reserve_reg()?;
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    self.cur_func().emit_asbx(OpCode::LoadInt, r as u32, i as i32, line, col);
                } else {
                    let cidx = self.cur_func().add_constant(ConstantRef::Integer(i));
                    self.cur_func().emit_abx(OpCode::LoadK, r as u32, cidx, line, col);
                }
                Ok(Atom::Reg(r, None))
            }
            TokenKind::Float(f) => {
                self.advance()?;
                let r = self.cur_func().reserve_reg()?;
                let cidx = self.cur_func().add_constant(ConstantRef::Float(f));
                self.cur_func().emit_abx(OpCode::LoadK, r as u32, cidx, line, col);
                Ok(Atom::Reg(r, None))
            }
            TokenKind::Str(s) => {
                self.advance()?;
                let r = self.cur_func().reserve_reg()?;
                let cidx = self.cur_func().add_string_const_ref(&s);
                self.cur_func().emit_abx(OpCode::LoadK, r as u32, cidx, line, col);
                Ok(Atom::Reg(r, None))
            }
            TokenKind::Ellipsis => {
                self.advance()?;
                let r = self.cur_func().reserve_reg()?;
                let pc = self.cur_func().emit_abc(OpCode::Vararg, r as u32, 2, 0, false, line, col);
                Ok(Atom::Reg(r, Some(OpenTail::Vararg(pc))))
            }
            TokenKind::Ident(name) => {
                self.advance()?;
                Ok(Atom::Target(self.name_to_target(&name)))
            }
            TokenKind::LParen => {
                self.advance()?;
                let pair = self.expr_tail()?;
                let reg = self.force_single(pair);
                self.expect(TokenKind::RParen)?;
                Ok(Atom::Reg(reg, None))
            }
            TokenKind::LBrace => {
                let r = self.table_constructor()?;
                Ok(Atom::Reg(r, None))
            }
            TokenKind::Function => {
                self.advance()?;
                let r = self.parse_function_literal(false)?;
                Ok(Atom::Reg(r, None))
            }
            other => Err(self.err_syntax(format!("unexpected token {:?} in expression", other))),
        }
    }

    fn table_constructor(&mut self) -> Result<u8> {
        let (line, col) = self.pos();
        self.expect(TokenKind::LBrace)?;
        let dest = self.cur_func().reserve_reg()?;
        self.cur_func().emit_abc(OpCode::NewTable, dest as u32, 0, 0, false, line, col);
        let mut array_index: u32 = 0;
        loop {
            if self.check_kind(&TokenKind::RBrace) {
                break;
            }
            if let TokenKind::Ident(name) = self.cur.kind.clone() {
                let save = (self.lexer.checkpoint(), self.cur.clone());
                self.advance()?;
                if self.check_kind(&TokenKind::Assign) {
                    self.advance()?;
                    let value = self.expr()?;
                    let sidx = self.cur_func().add_string_constant(&name);
                    let (l, c) = self.pos();
                    self.cur_func()
                        .emit_abc(OpCode::SetField, dest as u32, sidx, value as u32, false, l, c);
                } else {
                    self.lexer = self.lexer.fork(save.0);
                    self.cur = save.1;
                    self.array_elem(dest, &mut array_index)?;
                }
            } else if self.check_kind(&TokenKind::LBracket) {
                self.advance()?;
                let key = self.expr()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Assign)?;
                let value = self.expr()?;
                let (l, c) = self.pos();
                self.cur_func()
                    .emit_abc(OpCode::SetTable, dest as u32, key as u32, value as u32, false, l, c);
            } else {
                self.array_elem(dest, &mut array_index)?;
            }
            if self.check_kind(&TokenKind::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(dest)
    }

    fn array_elem(&mut self, table_reg: u8, idx: &mut u32) -> Result<()> {
        let value = self.expr()?;
        let (line, col) = self.pos();
        let key_reg = self.cur_func().reserve_reg()?;
        self.cur_func().emit_asbx(OpCode::LoadInt, key_reg as u32, *idx as i32, line, col);
        self.cur_func()
            .emit_abc(OpCode::SetTable, table_reg as u32, key_reg as u32, value as u32, false, line, col);
        *idx += 1;
        Ok(())
    }

    // ---------- function literals ----------

    fn parse_function_literal(&mut self, implicit_self: bool) -> Result<u8> {
        let child = self.function_body(implicit_self)?;
        let idx = self.cur_func().proto.nested.len() as u32;
        self.cur_func().proto.nested.push(child);
        let dest = self.cur_func().reserve_reg()?;
        let (line, col) = self.pos();
        self.cur_func().emit_abx(OpCode::Closure, dest as u32, idx, line, col);
        Ok(dest)
    }

    fn function_body(&mut self, implicit_self: bool) -> Result<Rc<Prototype>> {
        self.funcs.push(FuncState::new());
        if implicit_self {
            self.cur_func().declare_local("self", false)?;
        }
        self.expect(TokenKind::LParen)?;
        let mut is_vararg = false;
        if !self.check_kind(&TokenKind::RParen) {
            loop {
                if self.check_kind(&TokenKind::Ellipsis) {
                    self.advance()?;
                    is_vararg = true;
                    break;
                }
                let name = self.expect_ident()?;
                self.cur_func().declare_local(&name, false)?;
                if self.check_kind(&TokenKind::Comma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let nparams = self.cur_func().locals.len() as u8;
        self.cur_func().proto.num_params = nparams;
        self.cur_func().proto.is_vararg = is_vararg;
        self.expect(TokenKind::LBrace)?;
        self.cur_func().enter_block(false);
        while !self.check_kind(&TokenKind::RBrace) && !self.check_kind(&TokenKind::Eof) {
            self.statement()?;
        }
        self.expect(TokenKind::RBrace)?;
        self.run_block_defers();
        self.cur_func().leave_block();
        let (line, col) = self.pos();
        self.cur_func().emit_abc(OpCode::Return0, 0, 0, 0, false, line, col);
        let fs = self.funcs.pop().expect("pushed at function_body entry");
        Ok(Rc::new(fs.proto))
    }

    // ---------- statements ----------

    fn statement(&mut self) -> Result<()> {
        match self.cur.kind {
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(())
            }
            TokenKind::LBrace => self.block(),
            TokenKind::Let => self.stat_let(false),
            TokenKind::Const => self.stat_let(true),
            TokenKind::Function => self.stat_function(),
            TokenKind::If => self.stat_if(),
            TokenKind::While => self.stat_while(),
            TokenKind::For => self.stat_for(),
            TokenKind::Foreach => self.stat_foreach(),
            TokenKind::Defer => self.stat_defer(),
            TokenKind::Break => self.stat_break(),
            TokenKind::Continue => self.stat_continue(),
            TokenKind::Return => self.stat_return(),
            TokenKind::Export => self.stat_export(),
            _ => self.stat_expr(),
        }
    }

    fn block(&mut self) -> Result<()> {
        self.block_with(false)?;
        Ok(())
    }

    fn block_with(&mut self, is_loop: bool) -> Result<super::func_state::BlockScope> {
        self.expect(TokenKind::LBrace)?;
        self.cur_func().enter_block(is_loop);
        while !self.check_kind(&TokenKind::RBrace) && !self.check_kind(&TokenKind::Eof) {
            self.statement()?;
        }
        self.expect(TokenKind::RBrace)?;
        self.run_block_defers();
        Ok(self.cur_func().leave_block())
    }

    fn run_block_defers(&mut self) {
        let mut defers = self
            .cur_func()
            .blocks
            .last()
            .map(|b| b.defer_regs.clone())
            .unwrap_or_default();
        defers.reverse();
        self.replay_defers(&defers);
    }

    fn replay_defers(&mut self, defers: &[u8]) {
        let (line, col) = self.pos();
        for &r in defers {
            self.cur_func().emit_abc(OpCode::Call, r as u32, 1, 1, false, line, col);
        }
    }

    fn stat_let(&mut self, is_const: bool) -> Result<()> {
        self.advance()?;
        self.let_body(is_const, true)?;
        Ok(())
    }

    fn let_body(&mut self, is_const: bool, consume_semi: bool) -> Result<Vec<String>> {
        let mut names = Vec::new();
        loop {
            names.push(self.expect_ident()?);
            if self.check_kind(&TokenKind::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }
        let mut value_regs: Vec<u8> = Vec::new();
        if self.check_kind(&TokenKind::Assign) {
            self.advance()?;
            value_regs = self.expr_list_adjusted(names.len())?;
        }
        for (i, name) in names.iter().enumerate() {
            let reg = self.cur_func().declare_local(name, is_const)?;
            let (line, col) = self.pos();
            if let Some(&vr) = value_regs.get(i) {
                if vr != reg {
                    self.cur_func().emit_abc(OpCode::Move, reg as u32, vr as u32, 0, false, line, col);
                }
            } else {
                self.cur_func().emit_abc(OpCode::LoadNil, reg as u32, 0, 0, false, line, col);
            }
        }
        if consume_semi {
            self.expect(TokenKind::Semicolon)?;
        }
        Ok(names)
    }

    /// Evaluates an RHS expression list, expanding a trailing open call or
    /// vararg to fill out to `want` values when there aren't enough
    /// explicit expressions (spec §6 "Multi-value expansion").
    fn expr_list_adjusted(&mut self, want: usize) -> Result<Vec<u8>> {
        let mut regs: Vec<u8> = Vec::new();
        loop {
            let pair = self.expr_tail()?;
            if self.check_kind(&TokenKind::Comma) {
                regs.push(self.force_single(pair));
                self.advance()?;
            } else {
                let (reg, open) = pair;
                if let Some(tail) = open {
                    let remaining = want.saturating_sub(regs.len());
                    if remaining >= 1 {
                        self.patch_open_concrete(tail, remaining);
                        for i in 0..remaining {
                            regs.push(reg + i as u8);
                        }
                    } else {
                        self.patch_open_concrete(tail, 1);
                        regs.push(reg);
                    }
                } else {
                    regs.push(reg);
                }
                break;
            }
        }
        Ok(regs)
    }

    fn expr_list_open(&mut self) -> Result<ReturnList> {
        let mut first_reg: Option<u8> = None;
        let mut count = 0usize;
        loop {
            let pair = self.expr_tail()?;
            if first_reg.is_none() {
                first_reg = Some(pair.0);
            }
            if self.check_kind(&TokenKind::Comma) {
                self.force_single(pair);
                count += 1;
                self.advance()?;
            } else {
                count += 1;
                let (_, open) = pair;
                if let Some(tail) = open {
                    if count == 1 {
                        if let OpenTail::Call(pc) = tail {
                            return Ok(ReturnList::TailCall(pc));
                        }
                    }
                    self.patch_open_multret(tail);
                    return Ok(ReturnList::Multret(first_reg.unwrap()));
                }
                return Ok(ReturnList::Fixed(first_reg.unwrap(), count));
            }
        }
    }

    fn stat_function(&mut self) -> Result<()> {
        self.advance()?; // function
        let base_name = self.expect_ident()?;
        if self.check_kind(&TokenKind::Colon) {
            self.advance()?;
            let method_name = self.expect_ident()?;
            let target = self.name_to_target(&base_name);
            let obj_reg = self.read_target(target)?;
            let func_reg = self.parse_function_literal(true)?;
            let sidx = self.cur_func().add_string_constant(&method_name);
            let (line, col) = self.pos();
            self.cur_func()
                .emit_abc(OpCode::SetField, obj_reg as u32, sidx, func_reg as u32, false, line, col);
            Ok(())
        } else {
            self.stat_function_named(base_name)
        }
    }

    fn stat_function_named(&mut self, name: String) -> Result<()> {
        let func_reg = self.parse_function_literal(false)?;
        let target = self.name_to_target(&name);
        self.write_target(target, func_reg)
    }

    fn stat_export(&mut self) -> Result<()> {
        self.advance()?; // export
        if !self.module_mode {
            return Err(self.err_semantic("'export' is only valid in a 'module;' chunk"));
        }
        match self.cur.kind {
            TokenKind::Let | TokenKind::Const => {
                let is_const = matches!(self.cur.kind, TokenKind::Const);
                self.advance()?;
                let names = self.let_body(is_const, true)?;
                self.export_names(&names)
            }
            TokenKind::Function => {
                self.advance()?;
                let name = self.expect_ident()?;
                self.stat_function_named(name.clone())?;
                self.export_names(&[name])
            }
            _ => Err(self.err_syntax("expected 'let', 'const', or 'function' after 'export'")),
        }
    }

    fn export_names(&mut self, names: &[String]) -> Result<()> {
        let Some(exports_reg) = self.exports_reg else {
            return Ok(());
        };
        for name in names {
            let target = self.name_to_target(name);
            let val_reg = self.read_target(target)?;
            let sidx = self.cur_func().add_string_constant(name);
            let (line, col) = self.pos();
            self.cur_func()
                .emit_abc(OpCode::SetField, exports_reg as u32, sidx, val_reg as u32, false, line, col);
        }
        Ok(())
    }

    fn stat_if(&mut self) -> Result<()> {
        self.advance()?; // if
        self.expect(TokenKind::LParen)?;
        let cond = self.expr()?;
        self.expect(TokenKind::RParen)?;
        let (line, col) = self.pos();
        self.cur_func().emit_abc(OpCode::Test, cond as u32, 0, 0, false, line, col);
        let mut pending_else_jmp = self.cur_func().emit_jmp(line, col);
        self.block()?;
        let mut end_jmps = Vec::new();
        let mut done = false;
        loop {
            match self.cur.kind {
                TokenKind::Elseif => {
                    self.advance()?;
                    let (l, c) = self.pos();
                    end_jmps.push(self.cur_func().emit_jmp(l, c));
                    self.cur_func().patch_jmp_here(pending_else_jmp);
                    self.expect(TokenKind::LParen)?;
                    let cond2 = self.expr()?;
                    self.expect(TokenKind::RParen)?;
                    let (l2, c2) = self.pos();
                    self.cur_func().emit_abc(OpCode::Test, cond2 as u32, 0, 0, false, l2, c2);
                    pending_else_jmp = self.cur_func().emit_jmp(l2, c2);
                    self.block()?;
                }
                TokenKind::Else => {
                    self.advance()?;
                    let (l, c) = self.pos();
                    end_jmps.push(self.cur_func().emit_jmp(l, c));
                    self.cur_func().patch_jmp_here(pending_else_jmp);
                    self.block()?;
                    done = true;
                    break;
                }
                _ => break,
            }
        }
        if !done {
            self.cur_func().patch_jmp_here(pending_else_jmp);
        }
        for j in end_jmps {
            self.cur_func().patch_jmp_here(j);
        }
        Ok(())
    }

    fn stat_while(&mut self) -> Result<()> {
        self.advance()?; // while
        self.expect(TokenKind::LParen)?;
        let loop_start = self.cur_func().here();
        let cond = self.expr()?;
        self.expect(TokenKind::RParen)?;
        let (line, col) = self.pos();
        self.cur_func().emit_abc(OpCode::Test, cond as u32, 0, 0, false, line, col);
        let exit_jmp = self.cur_func().emit_jmp(line, col);
        let scope = self.block_with(true)?;
        self.emit_jump_to(loop_start);
        self.cur_func().patch_jmp_here(exit_jmp);
        for bj in scope.break_jumps {
            self.cur_func().patch_jmp_here(bj);
        }
        for cj in scope.continue_jumps {
            self.cur_func().patch_jmp_to(cj, loop_start);
        }
        Ok(())
    }

    /// `for (init; cond; update) { body }`: the update clause is *written*
    /// before the body but must be *compiled* after it, since it only runs
    /// once the body has finished for that iteration. We park the lexer at
    /// the update clause via [`Lexer::checkpoint`]/[`Lexer::fork`], compile
    /// the body first, then rewind and compile the update in its proper
    /// place in the bytecode stream (spec §6 "C-style for").
    fn stat_for(&mut self) -> Result<()> {
        self.advance()?; // for
        self.expect(TokenKind::LParen)?;
        self.cur_func().enter_block(true);
        if !self.check_kind(&TokenKind::Semicolon) {
            self.simple_stat_no_semi()?;
        }
        self.expect(TokenKind::Semicolon)?;
        let loop_start = self.cur_func().here();
        let mut exit_jmp = None;
        if !self.check_kind(&TokenKind::Semicolon) {
            let cond = self.expr()?;
            let (line, col) = self.pos();
            self.cur_func().emit_abc(OpCode::Test, cond as u32, 0, 0, false, line, col);
            exit_jmp = Some(self.cur_func().emit_jmp(line, col));
        }
        self.expect(TokenKind::Semicolon)?;
        let update_checkpoint = (self.lexer.checkpoint(), self.cur.clone());
        self.skip_balanced_until_rparen()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;
        self.cur_func().enter_block(false);
        while !self.check_kind(&TokenKind::RBrace) && !self.check_kind(&TokenKind::Eof) {
            self.statement()?;
        }
        self.expect(TokenKind::RBrace)?;
        self.run_block_defers();
        self.cur_func().leave_block();

        let continue_target = self.cur_func().here();
        let after_body = (self.lexer.checkpoint(), self.cur.clone());
        self.lexer = self.lexer.fork(update_checkpoint.0);
        self.cur = update_checkpoint.1;
        if !self.check_kind(&TokenKind::RParen) {
            self.simple_stat_no_semi()?;
        }
        self.lexer = self.lexer.fork(after_body.0);
        self.cur = after_body.1;

        self.emit_jump_to(loop_start);
        if let Some(ej) = exit_jmp {
            self.cur_func().patch_jmp_here(ej);
        }
        let scope = self.cur_func().leave_block();
        for bj in scope.break_jumps {
            self.cur_func().patch_jmp_here(bj);
        }
        for cj in scope.continue_jumps {
            self.cur_func().patch_jmp_to(cj, continue_target);
        }
        Ok(())
    }

    fn skip_balanced_until_rparen(&mut self) -> Result<()> {
        let mut depth = 0i32;
        loop {
            match self.cur.kind {
                TokenKind::LParen => {
                    depth += 1;
                    self.advance()?;
                }
                TokenKind::RParen => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                    self.advance()?;
                }
                TokenKind::Eof => return Err(self.err_syntax("unterminated 'for' header")),
                _ => {
                    self.advance()?;
                }
            }
        }
    }

    /// `foreach (a, b in expr) { body }`: the generic-for iterator protocol
    /// (spec §6 "Generic for") — evaluate up to 3 header values (iterator
    /// function, state, initial control), then loop calling
    /// `iterator(state, control)` until its first result is nil.
    fn stat_foreach(&mut self) -> Result<()> {
        self.advance()?; // foreach
        self.expect(TokenKind::LParen)?;
        self.cur_func().enter_block(true);
        let iter_reg = self.cur_func().declare_local("(iterator)", false)?;
        let state_reg = self.cur_func().declare_local("(state)", false)?;
        let control_reg = self.cur_func().declare_local("(control)", false)?;
        let mut names = Vec::new();
        loop {
            names.push(self.expect_ident()?);
            if self.check_kind(&TokenKind::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(TokenKind::In)?;
        let value_regs = self.expr_list_adjusted(3)?;
        for (i, reg) in [iter_reg, state_reg, control_reg].iter().enumerate() {
            let (line, col) = self.pos();
            if let Some(&vr) = value_regs.get(i) {
                if vr != *reg {
                    self.cur_func().emit_abc(OpCode::Move, *reg as u32, vr as u32, 0, false, line, col);
                }
            } else {
                self.cur_func().emit_abc(OpCode::LoadNil, *reg as u32, 0, 0, false, line, col);
            }
        }
        self.expect(TokenKind::RParen)?;

        let loop_start = self.cur_func().here();
        let (line, col) = self.pos();
        let call_func = self.cur_func().reserve_reg()?;
        self.cur_func().emit_abc(OpCode::Move, call_func as u32, iter_reg as u32, 0, false, line, col);
        let arg1 = self.cur_func().reserve_reg()?;
        self.cur_func().emit_abc(OpCode::Move, arg1 as u32, state_reg as u32, 0, false, line, col);
        let arg2 = self.cur_func().reserve_reg()?;
        self.cur_func().emit_abc(OpCode::Move, arg2 as u32, control_reg as u32, 0, false, line, col);
        let nresults = names.len() as u32;
        self.cur_func()
            .emit_abc(OpCode::Call, call_func as u32, 3, nresults + 1, false, line, col);
        let first_result = call_func;
        self.cur_func().emit_abc(OpCode::Test, first_result as u32, 0, 0, false, line, col);
        let exit_jmp = self.cur_func().emit_jmp(line, col);
        self.cur_func()
            .emit_abc(OpCode::Move, control_reg as u32, first_result as u32, 0, false, line, col);

        self.cur_func().enter_block(false);
        for (i, name) in names.iter().enumerate() {
            let reg = self.cur_func().declare_local(name, false)?;
            let (l, c) = self.pos();
            self.cur_func()
                .emit_abc(OpCode::Move, reg as u32, (first_result + i as u8) as u32, 0, false, l, c);
        }
        self.expect(TokenKind::LBrace)?;
        while !self.check_kind(&TokenKind::RBrace) && !self.check_kind(&TokenKind::Eof) {
            self.statement()?;
        }
        self.expect(TokenKind::RBrace)?;
        self.run_block_defers();
        self.cur_func().leave_block();

        self.emit_jump_to(loop_start);
        self.cur_func().patch_jmp_here(exit_jmp);
        let scope = self.cur_func().leave_block();
        for bj in scope.break_jumps {
            self.cur_func().patch_jmp_here(bj);
        }
        for cj in scope.continue_jumps {
            self.cur_func().patch_jmp_to(cj, loop_start);
        }
        Ok(())
    }

    /// `defer { ... }` compiles the block as a nested zero-argument
    /// closure, registering its register in the innermost block's defer
    /// list for LIFO replay at every scope-exit point (spec §7 "Defer
    /// semantics"). Not replayed on error propagation.
    fn stat_defer(&mut self) -> Result<()> {
        self.advance()?; // defer
        self.funcs.push(FuncState::new());
        self.cur_func().proto.num_params = 0;
        self.cur_func().proto.is_vararg = false;
        self.expect(TokenKind::LBrace)?;
        self.cur_func().enter_block(false);
        while !self.check_kind(&TokenKind::RBrace) && !self.check_kind(&TokenKind::Eof) {
            self.statement()?;
        }
        self.expect(TokenKind::RBrace)?;
        self.run_block_defers();
        self.cur_func().leave_block();
        let (line, col) = self.pos();
        self.cur_func().emit_abc(OpCode::Return0, 0, 0, 0, false, line, col);
        let fs = self.funcs.pop().expect("pushed at stat_defer entry");
        let child = Rc::new(fs.proto);

        let idx = self.cur_func().proto.nested.len() as u32;
        self.cur_func().proto.nested.push(child);
        let dest = self.cur_func().reserve_reg()?;
        self.cur_func().emit_abx(OpCode::Closure, dest as u32, idx, line, col);
        self.cur_func()
            .blocks
            .last_mut()
            .ok_or_else(|| self.err_semantic("'defer' outside any block"))?
            .defer_regs
            .push(dest);
        Ok(())
    }

    fn stat_break(&mut self) -> Result<()> {
        self.advance()?;
        let loop_idx = self
            .cur_func()
            .innermost_loop()
            .ok_or_else(|| self.err_syntax("'break' outside a loop"))?;
        let defers = self.cur_func().pending_defers(loop_idx);
        self.replay_defers(&defers);
        let (line, col) = self.pos();
        let pc = self.cur_func().emit_jmp(line, col);
        self.cur_func().blocks[loop_idx].break_jumps.push(pc);
        self.expect(TokenKind::Semicolon)?;
        Ok(())
    }

    fn stat_continue(&mut self) -> Result<()> {
        self.advance()?;
        let loop_idx = self
            .cur_func()
            .innermost_loop()
            .ok_or_else(|| self.err_syntax("'continue' outside a loop"))?;
        let defers = self.cur_func().pending_defers(loop_idx);
        self.replay_defers(&defers);
        let (line, col) = self.pos();
        let pc = self.cur_func().emit_jmp(line, col);
        self.cur_func().blocks[loop_idx].continue_jumps.push(pc);
        self.expect(TokenKind::Semicolon)?;
        Ok(())
    }

    fn stat_return(&mut self) -> Result<()> {
        self.advance()?; // return
        if self.funcs.len() == 1 {
            self.had_explicit_return = true;
        }
        let defers = self.cur_func().pending_defers(0);
        self.replay_defers(&defers);
        if self.check_kind(&TokenKind::Semicolon) {
            self.advance()?;
            let (line, col) = self.pos();
            self.cur_func().emit_abc(OpCode::Return0, 0, 0, 0, false, line, col);
            return Ok(());
        }
        let list = self.expr_list_open()?;
        self.expect(TokenKind::Semicolon)?;
        let (line, col) = self.pos();
        match list {
            ReturnList::Fixed(start, count) => {
                self.cur_func()
                    .emit_abc(OpCode::Return, start as u32, (count + 1) as u32, 0, false, line, col);
            }
            ReturnList::Multret(start) => {
                self.cur_func().emit_abc(OpCode::Return, start as u32, 0, 0, false, line, col);
            }
            ReturnList::TailCall(call_pc) => {
                self.cur_func().patch_call_to_tailcall(call_pc);
            }
        }
        Ok(())
    }

    fn stat_expr(&mut self) -> Result<()> {
        self.simple_stat_no_semi()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(())
    }

    /// Shared by ordinary expression statements and by the `for` header's
    /// init/update clauses (which consume their own `;`/`)` delimiter
    /// rather than a plain `;`).
    fn simple_stat_no_semi(&mut self) -> Result<()> {
        if self.check_kind(&TokenKind::Let) || self.check_kind(&TokenKind::Const) {
            let is_const = self.check_kind(&TokenKind::Const);
            self.advance()?;
            self.let_body(is_const, false)?;
            return Ok(());
        }
        let atom = self.suffixed_expr()?;
        match self.cur.kind {
            TokenKind::Assign => {
                self.advance()?;
                let Atom::Target(target) = atom else {
                    return Err(self.err_syntax("invalid assignment target"));
                };
                let value = self.expr()?;
                self.write_target(target, value)
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let inc = matches!(self.cur.kind, TokenKind::PlusPlus);
                self.advance()?;
                self.emit_incdec(atom, inc)
            }
            _ => match atom {
                Atom::Reg(_, Some(OpenTail::Call(pc))) => {
                    self.patch_open_concrete(OpenTail::Call(pc), 0);
                    Ok(())
                }
                Atom::Reg(_, _) => Ok(()),
                Atom::Target(_) => Err(self.err_syntax("expression statement must be a call or assignment")),
            },
        }
    }

    fn emit_incdec(&mut self, atom: Atom, inc: bool) -> Result<()> {
        let Atom::Target(target) = atom else {
            return Err(self.err_syntax("'++'/'--' target must be a variable"));
        };
        let (line, col) = self.pos();
        let op = if inc { OpCode::Inc } else { OpCode::Dec };
        match target {
            Target::Local(reg, is_const) => {
                if is_const {
                    return Err(self.err_semantic("cannot increment/decrement a const variable"));
                }
                self.cur_func().emit_abc(op, 0, 0, reg as u32, false, line, col);
                Ok(())
            }
            Target::Upvalue(idx) => {
                self.cur_func().emit_abc(op, 0, 1, idx, false, line, col);
                Ok(())
            }
            Target::Global(sidx) => {
                self.cur_func().emit_abc(op, 0, 2, sidx, false, line, col);
                Ok(())
            }
            Target::Field(obj, sidx) => {
                let val = self.read_target(Target::Field(obj, sidx))?;
                let delta = if inc { 1 } else { -1 };
                let one = self.cur_func().reserve_reg()?;
                self.cur_func().emit_asbx(OpCode::LoadInt, one as u32, delta, line, col);
                let dest = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::Add, dest as u32, val as u32, one as u32, false, line, col);
                self.write_target(Target::Field(obj, sidx), dest)
            }
            Target::Index(obj, key) => {
                let val = self.read_target(Target::Index(obj, key))?;
                let delta = if inc { 1 } else { -1 };
                let one = self.cur_func().reserve_reg()?;
                self.cur_func().emit_asbx(OpCode::LoadInt, one as u32, delta, line, col);
                let dest = self.cur_func().reserve_reg()?;
                self.cur_func().emit_abc(OpCode::Add, dest as u32, val as u32, one as u32, false, line, col);
                self.write_target(Target::Index(obj, key), dest)
            }
        }
    }
}
