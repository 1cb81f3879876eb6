//! Expression descriptors and the jump-list machinery.
//!
//! An [`ExpDesc`] is what [`super::Compiler`]'s expression parser hands back
//! instead of an AST node: enough information to either discharge the value
//! into a register on demand, or — for table/upvalue/global reads — to be
//! folded directly into whatever instruction consumes it (e.g. a `SETTABLE`
//! never needs its key materialized in a register if the key is a constant).
//!
//! Forward jumps (the `JMP` at the end of an `if` test, `and`/`or`
//! short-circuiting, `break`) are threaded through their own not-yet-patched
//! `sBx` field: a jump whose target isn't known yet stores the *next*
//! pending jump's program counter there instead, with `sBx == -1` as the
//! list terminator. [`JumpList`] is just `Option<usize>`, the head of that
//! intrusive list.

use super::Compiler;
use crate::opcode::{self, OpCode};
use crate::value::{LuaValue, StringId};

#[derive(Debug, Clone, Copy)]
pub enum RK {
    Reg(u8),
    Konst(u8),
}

impl RK {
    /// The raw 9-bit operand field this RK encodes as.
    pub fn field(self) -> u32 {
        match self {
            RK::Reg(r) => r as u32,
            RK::Konst(k) => opcode::as_k(k as u32),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ExpKind {
    Nil,
    True,
    False,
    KInt(i64),
    KNum(f64),
    KStr(StringId),
    Local(u8),
    Upval(u32),
    Global(StringId),
    Indexed { table: u8, key: RK },
    /// Already sitting in a register (a temporary or a fresh result).
    NonReloc(u8),
    /// The result of a `CALL` at `pc`, landing at `reg`; the number of
    /// results it's adjusted to deliver is still mutable until the call is
    /// discharged into a fixed arity.
    Call { pc: usize, reg: u8 },
    /// A `...` read; its instruction was emitted with placeholder operands
    /// and is only patched once the consuming context (one value vs. every
    /// value) is known.
    Vararg { pc: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct ExpDesc {
    pub kind: ExpKind,
}

impl ExpDesc {
    pub fn new(kind: ExpKind) -> Self {
        ExpDesc { kind }
    }

    pub fn is_multret(&self) -> bool {
        matches!(self.kind, ExpKind::Call { .. } | ExpKind::Vararg { .. })
    }
}

/// Head of an intrusive jump list: the pc of a `JMP` instruction, chained
/// via that instruction's own `sBx` field.
pub type JumpList = Option<usize>;

pub const NO_JUMP: JumpList = None;

impl<'src, 'gc> Compiler<'src, 'gc> {
    pub(super) fn code_mut(&mut self) -> &mut Vec<u32> {
        &mut self.funcs.last_mut().unwrap().code
    }

    fn jump_next(&self, pc: usize) -> JumpList {
        let sbx = opcode::get_sbx(self.funcs.last().unwrap().code[pc]);
        if sbx == -1 {
            None
        } else {
            Some((pc as i32 + 1 + sbx) as usize)
        }
    }

    pub(super) fn set_jump_target(&mut self, pc: usize, target: i32) {
        self.patch_sbx(pc, target as usize);
    }

    /// Rewrites the `sBx` field of the instruction at `pc` so it targets
    /// `target`, preserving whatever opcode is actually there. Unlike
    /// [`Self::set_jump_target`] (driven through the `JMP`-only jump-list
    /// protocol), this is safe to use directly on `FORPREP`/`FORLOOP`, whose
    /// placeholder operand doesn't follow the `-1`-terminated list encoding.
    pub(super) fn patch_sbx(&mut self, pc: usize, target: usize) {
        let code = self.code_mut();
        let inst = code[pc];
        let op = opcode::get_op(inst);
        let a = opcode::get_a(inst);
        let sbx = target as i32 - (pc as i32 + 1);
        code[pc] = opcode::encode_asbx(op, a, sbx);
    }

    /// Appends `l2` to the end of the `l1` chain (or returns whichever side
    /// is non-empty).
    pub fn concat_jumps(&mut self, l1: JumpList, l2: JumpList) -> JumpList {
        match (l1, l2) {
            (None, l2) => l2,
            (l1, None) => l1,
            (Some(head), Some(tail_head)) => {
                let mut pc = head;
                loop {
                    match self.jump_next(pc) {
                        Some(next) => pc = next,
                        None => break,
                    }
                }
                // The list link uses the same "target" encoding as a real
                // jump (it points at another instruction); only the
                // terminator (`sBx == -1`) is special-cased by `jump_next`.
                self.set_jump_target(pc, tail_head as i32);
                Some(head)
            }
        }
    }

    /// Patches every jump in `list` to branch to `target`.
    pub fn patch_list_to(&mut self, list: JumpList, target: usize) {
        let mut cur = list;
        while let Some(pc) = cur {
            let next = self.jump_next(pc);
            self.set_jump_target(pc, target as i32);
            cur = next;
        }
    }

    /// Patches every jump in `list` to the current end of the code array.
    pub fn patch_list_here(&mut self, list: JumpList) {
        let here = self.funcs.last().unwrap().code.len();
        self.patch_list_to(list, here);
    }

    // ---- constants ----

    pub fn add_constant(&mut self, v: LuaValue) -> u32 {
        let fs = self.funcs.last_mut().unwrap();
        if let Some(idx) = fs.constants.iter().position(|k| k.raw_equals(&v)) {
            return idx as u32;
        }
        fs.constants.push(v);
        (fs.constants.len() - 1) as u32
    }

    // ---- discharge ----

    /// Puts `e`'s value into exactly register `reg`.
    pub fn discharge_to_reg(&mut self, e: &ExpDesc, reg: u8) {
        match &e.kind {
            ExpKind::Nil => self.emit_abc(OpCode::LoadNil, reg as u32, reg as u32, 0),
            ExpKind::True => self.emit_abc(OpCode::LoadBool, reg as u32, 1, 0),
            ExpKind::False => self.emit_abc(OpCode::LoadBool, reg as u32, 0, 0),
            ExpKind::KInt(i) => {
                let k = self.add_constant(LuaValue::Integer(*i));
                self.emit_abx(OpCode::LoadK, reg as u32, k);
            }
            ExpKind::KNum(n) => {
                let k = self.add_constant(LuaValue::Number(*n));
                self.emit_abx(OpCode::LoadK, reg as u32, k);
            }
            ExpKind::KStr(s) => {
                let k = self.add_constant(LuaValue::String(*s));
                self.emit_abx(OpCode::LoadK, reg as u32, k);
            }
            ExpKind::Local(r) => {
                if *r != reg {
                    self.emit_abc(OpCode::Move, reg as u32, *r as u32, 0);
                }
            }
            ExpKind::Upval(idx) => self.emit_abc(OpCode::GetUpval, reg as u32, *idx, 0),
            ExpKind::Global(name) => {
                let k = self.add_constant(LuaValue::String(*name));
                self.emit_abx(OpCode::GetGlobal, reg as u32, k);
            }
            ExpKind::Indexed { table, key } => {
                self.emit_abc(OpCode::GetTable, reg as u32, *table as u32, key.field());
            }
            ExpKind::NonReloc(r) => {
                if *r != reg {
                    self.emit_abc(OpCode::Move, reg as u32, *r as u32, 0);
                }
            }
            ExpKind::Call { pc, reg: callreg } => {
                self.set_call_result_count(*pc, 2); // exactly one result
                if *callreg != reg {
                    self.emit_abc(OpCode::Move, reg as u32, *callreg as u32, 0);
                }
            }
            ExpKind::Vararg { pc } => {
                self.set_instr_a_b(*pc, reg as u32, 2);
            }
        }
    }

    /// Overwrites an already-emitted instruction's `A`/`B` fields in place
    /// (keeping its opcode and `C`), used to fix up a `VARARG` whose
    /// destination register and result count weren't known when it was
    /// first emitted.
    pub(super) fn set_instr_a_b(&mut self, pc: usize, a: u32, b: u32) {
        let code = self.code_mut();
        let inst = code[pc];
        let op = opcode::get_op(inst);
        let c = opcode::get_c(inst);
        code[pc] = opcode::encode_abc(op, a, b, c);
    }

    /// Discharges `e` into a freshly allocated register and returns it.
    pub fn discharge_to_any_reg(&mut self, e: &ExpDesc) -> u8 {
        // A local already sits in its own register; reading it needs no
        // fresh copy (`exp_to_next_reg` is what callers reach for when a
        // private, writable register is required instead).
        if let ExpKind::NonReloc(r) | ExpKind::Local(r) = e.kind {
            return r;
        }
        let reg = self.funcs.last_mut().unwrap().alloc_reg();
        self.discharge_to_reg(e, reg);
        reg
    }

    /// Like [`discharge_to_any_reg`](Self::discharge_to_any_reg), but always
    /// allocates the *next* free register — even when `e` already sits in
    /// some other register — so a run of these calls lands in contiguous
    /// registers. Needed wherever the VM expects an unbroken run: call
    /// arguments, table-constructor array items, return/assignment lists.
    pub fn exp_to_next_reg(&mut self, e: &ExpDesc) -> u8 {
        let reg = self.funcs.last_mut().unwrap().alloc_reg();
        self.discharge_to_reg(e, reg);
        reg
    }

    /// Discharges a multi-result expression (a call or `...`) expecting
    /// `want` results, or every result it has if `want` is `None`
    /// (`C == 0` means "up to top").
    pub fn discharge_multiret(&mut self, e: &ExpDesc, want: Option<usize>) {
        match &e.kind {
            ExpKind::Call { pc, reg } => {
                let base = *reg;
                self.set_call_result_count(*pc, want.map(|n| (n + 1) as u32).unwrap_or(0));
                self.funcs.last_mut().unwrap().free_reg = base + want.unwrap_or(1).max(1) as u8;
            }
            ExpKind::Vararg { pc } => {
                let base = self.funcs.last().unwrap().free_reg;
                self.set_instr_a_b(*pc, base as u32, want.map(|n| (n + 1) as u32).unwrap_or(0));
                self.funcs.last_mut().unwrap().free_reg = base + want.unwrap_or(1).max(1) as u8;
            }
            _ => {
                self.exp_to_next_reg(e);
            }
        }
    }

    /// Discharges `exprs` into exactly `want` contiguous registers starting
    /// at the current free-register mark, padding with `nil` or discarding
    /// extras as needed. All expressions are evaluated left to right even when
    /// some of their results are discarded.
    pub fn compile_exprlist_fixed(&mut self, exprs: &[ExpDesc], want: usize) -> u8 {
        let base = self.funcs.last().unwrap().free_reg;
        for (i, e) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && e.is_multret() {
                let remaining = want.saturating_sub(i);
                self.discharge_multiret(e, Some(remaining.max(1)));
            } else {
                self.exp_to_next_reg(e);
            }
        }
        let produced = (self.funcs.last().unwrap().free_reg - base) as usize;
        if produced < want {
            for _ in produced..want {
                let r = self.funcs.last_mut().unwrap().alloc_reg();
                self.emit_abc(OpCode::LoadNil, r as u32, r as u32, 0);
            }
        } else if produced > want {
            self.funcs.last_mut().unwrap().free_to(base + want as u8);
        }
        base
    }

    /// Discharges a call's argument list (or a `return`/multi-value list
    /// where "everything the last expression yields" is wanted): fixed
    /// expressions go to contiguous registers, a multi-result tail expands
    /// to "all of it" and the caller is told to use the `B == 0` / `C == 0`
    /// convention. Returns the field value for the consuming instruction's
    /// `B`/`C` operand (`0` means "up to top", otherwise `n + 1`).
    pub fn compile_exprlist_multiret(&mut self, exprs: &[ExpDesc]) -> u32 {
        if exprs.is_empty() {
            return 1;
        }
        for (i, e) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && e.is_multret() {
                self.discharge_multiret(e, None);
                return 0;
            }
            self.exp_to_next_reg(e);
        }
        (exprs.len() as u32) + 1
    }

    /// Converts `e` to an RK operand: a constant-pool reference when `e` is
    /// a literal that fits the 8-bit constant index, a register otherwise.
    pub fn exp_to_rk(&mut self, e: &ExpDesc) -> RK {
        let konst = match &e.kind {
            ExpKind::Nil => Some(LuaValue::Nil),
            ExpKind::True => Some(LuaValue::Boolean(true)),
            ExpKind::False => Some(LuaValue::Boolean(false)),
            ExpKind::KInt(i) => Some(LuaValue::Integer(*i)),
            ExpKind::KNum(n) => Some(LuaValue::Number(*n)),
            ExpKind::KStr(s) => Some(LuaValue::String(*s)),
            _ => None,
        };
        if let Some(v) = konst {
            let idx = self.add_constant(v);
            if idx <= opcode::MAX_INDEX_RK {
                return RK::Konst(idx as u8);
            }
        }
        if let ExpKind::Local(r) = e.kind {
            return RK::Reg(r);
        }
        if let ExpKind::NonReloc(r) = e.kind {
            return RK::Reg(r);
        }
        RK::Reg(self.discharge_to_any_reg(e))
    }

    /// Sets a `CALL`/`VARARG`'s result-count operand after the fact — used
    /// once the consuming context (assignment arity, argument position,
    /// table constructor tail) is known.
    pub fn set_call_result_count(&mut self, pc: usize, c_plus_one: u32) {
        let code = self.code_mut();
        let inst = code[pc];
        let op = opcode::get_op(inst);
        let a = opcode::get_a(inst);
        let b = opcode::get_b(inst);
        code[pc] = opcode::encode_abc(op, a, b, c_plus_one);
    }
}
