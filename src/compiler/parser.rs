//! Recursive-descent statement and expression grammar. No
//! AST is ever built: every production either emits instructions directly or
//! hands back an [`ExpDesc`] describing a not-yet-materialized value.

use super::expdesc::{ExpDesc, ExpKind, JumpList, RK};
use super::Compiler;
use crate::lexer::TokenKind;
use crate::opcode::OpCode;
use crate::value::LuaValue;
use crate::LuaResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum UnOp {
    Neg,
    Not,
    Len,
}

const UNARY_PRIORITY: u8 = 12;

fn binop_priority(op: BinOp) -> (u8, u8) {
    use BinOp::*;
    match op {
        Or => (1, 1),
        And => (2, 2),
        Lt | Gt | Le | Ge | Ne | Eq => (3, 3),
        Concat => (9, 8),
        Add | Sub => (10, 10),
        Mul | Div | Mod => (11, 11),
        Pow => (14, 13),
    }
}

impl<'src, 'gc> Compiler<'src, 'gc> {
    fn cur_binop(&self) -> Option<BinOp> {
        Some(match self.cur_kind() {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::Caret => BinOp::Pow,
            TokenKind::Concat => BinOp::Concat,
            TokenKind::Eq => BinOp::Eq,
            TokenKind::Ne => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::And => BinOp::And,
            TokenKind::Or => BinOp::Or,
            _ => return None,
        })
    }

    fn cur_unop(&self) -> Option<UnOp> {
        Some(match self.cur_kind() {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Not => UnOp::Not,
            TokenKind::Hash => UnOp::Len,
            _ => return None,
        })
    }

    fn cur_kind(&self) -> &TokenKind {
        &self.cur.kind
    }

    // ---- expressions ----

    pub(super) fn parse_expr(&mut self) -> LuaResult<ExpDesc> {
        self.parse_subexpr(0)
    }

    fn parse_subexpr(&mut self, limit: u8) -> LuaResult<ExpDesc> {
        let mut e = if let Some(op) = self.cur_unop() {
            self.advance()?;
            let operand = self.parse_subexpr(UNARY_PRIORITY)?;
            self.emit_unop(op, &operand)
        } else {
            self.parse_simple_expr()?
        };
        while let Some(op) = self.cur_binop() {
            let (left_prio, right_prio) = binop_priority(op);
            if left_prio <= limit {
                break;
            }
            self.advance()?;
            if op == BinOp::And {
                e = self.emit_and(e, right_prio)?;
                continue;
            }
            if op == BinOp::Or {
                e = self.emit_or(e, right_prio)?;
                continue;
            }
            let rhs = self.parse_subexpr(right_prio)?;
            e = self.emit_binop(op, e, rhs);
        }
        Ok(e)
    }

    fn parse_simple_expr(&mut self) -> LuaResult<ExpDesc> {
        match self.cur.kind.clone() {
            TokenKind::Int(i) => {
                self.advance()?;
                Ok(ExpDesc::new(ExpKind::KInt(i)))
            }
            TokenKind::Num(n) => {
                self.advance()?;
                Ok(ExpDesc::new(ExpKind::KNum(n)))
            }
            TokenKind::Str(s) => {
                self.advance()?;
                Ok(ExpDesc::new(ExpKind::KStr(s)))
            }
            TokenKind::Nil => {
                self.advance()?;
                Ok(ExpDesc::new(ExpKind::Nil))
            }
            TokenKind::True => {
                self.advance()?;
                Ok(ExpDesc::new(ExpKind::True))
            }
            TokenKind::False => {
                self.advance()?;
                Ok(ExpDesc::new(ExpKind::False))
            }
            TokenKind::Dots => {
                if !self.funcs.last().unwrap().is_vararg {
                    return Err(self.err("cannot use '...' outside a vararg function"));
                }
                self.advance()?;
                let pc = self.emit_abc(OpCode::Vararg, 0, 0, 0);
                Ok(ExpDesc::new(ExpKind::Vararg { pc }))
            }
            TokenKind::LBrace => self.parse_table_constructor(),
            TokenKind::Function => {
                self.advance()?;
                let proto = self.parse_function_body(false)?;
                let idx = self.push_child_proto(proto);
                let reg = self.funcs.last_mut().unwrap().alloc_reg();
                self.emit_closure(reg, idx);
                Ok(ExpDesc::new(ExpKind::NonReloc(reg)))
            }
            _ => self.parse_suffixed_expr(),
        }
    }

    /// The register right after the last active local: registers at or
    /// above this are disposable temporaries, safe to reclaim early.
    /// Registers below it belong to live locals and must never be freed
    /// just because they happen to sit at the top of the allocated range.
    fn nactvar_reg(&self) -> u8 {
        self.funcs.last().unwrap().locals.last().map(|l| l.reg + 1).unwrap_or(0)
    }

    fn emit_unop(&mut self, op: UnOp, e: &ExpDesc) -> ExpDesc {
        if let UnOp::Neg = op {
            if let ExpKind::KInt(i) = e.kind {
                return ExpDesc::new(ExpKind::KInt(i.wrapping_neg()));
            }
            if let ExpKind::KNum(n) = e.kind {
                return ExpDesc::new(ExpKind::KNum(-n));
            }
        }
        let reg = self.discharge_to_any_reg(e);
        let nactvar = self.nactvar_reg();
        let fs = self.funcs.last_mut().unwrap();
        if reg >= nactvar && reg == fs.free_reg.wrapping_sub(1) {
            fs.free_to(reg);
        }
        let dest = fs.alloc_reg();
        let op_code = match op {
            UnOp::Neg => OpCode::Unm,
            UnOp::Not => OpCode::Not,
            UnOp::Len => OpCode::Len,
        };
        self.emit_abc(op_code, dest as u32, reg as u32, 0);
        ExpDesc::new(ExpKind::NonReloc(dest))
    }

    fn emit_binop(&mut self, op: BinOp, lhs: ExpDesc, rhs: ExpDesc) -> ExpDesc {
        use BinOp::*;
        match op {
            Add | Sub | Mul | Div | Mod | Pow => {
                let l = self.exp_to_rk(&lhs);
                let r = self.exp_to_rk(&rhs);
                self.free_rk(r);
                self.free_rk(l);
                let dest = self.funcs.last_mut().unwrap().alloc_reg();
                let code = match op {
                    Add => OpCode::Add,
                    Sub => OpCode::Sub,
                    Mul => OpCode::Mul,
                    Div => OpCode::Div,
                    Mod => OpCode::Mod,
                    Pow => OpCode::Pow,
                    _ => unreachable!(),
                };
                self.emit_abc(code, dest as u32, l.field(), r.field());
                ExpDesc::new(ExpKind::NonReloc(dest))
            }
            Concat => {
                // Operands must sit in two contiguous registers for CONCAT;
                // no attempt is made to merge adjacent `..` chains into a
                // single wide-range CONCAT.
                let l = self.exp_to_next_reg(&lhs);
                let r = self.exp_to_next_reg(&rhs);
                self.funcs.last_mut().unwrap().free_to(l);
                let dest = self.funcs.last_mut().unwrap().alloc_reg();
                self.emit_abc(OpCode::Concat, dest as u32, l as u32, r as u32);
                ExpDesc::new(ExpKind::NonReloc(dest))
            }
            Eq | Ne | Lt | Le | Gt | Ge => {
                // `a > b` / `a >= b` compile as `b < a` / `b <= a`.
                let (swapped, code, want_true) = match op {
                    Eq => (false, OpCode::Eq, true),
                    Ne => (false, OpCode::Eq, false),
                    Lt => (false, OpCode::Lt, true),
                    Le => (false, OpCode::Le, true),
                    Gt => (true, OpCode::Lt, true),
                    Ge => (true, OpCode::Le, true),
                    _ => unreachable!(),
                };
                let (first, second) = if swapped { (rhs, lhs) } else { (lhs, rhs) };
                let l = self.exp_to_rk(&first);
                let r = self.exp_to_rk(&second);
                self.free_rk(r);
                self.free_rk(l);
                let a = if want_true { 1 } else { 0 };
                self.emit_abc(code, a, l.field(), r.field());
                let jump_over_true = self.emit_jump();
                let dest = self.funcs.last_mut().unwrap().alloc_reg();
                self.emit_abc(OpCode::LoadBool, dest as u32, 0, 1);
                self.patch_list_here(Some(jump_over_true));
                self.emit_abc(OpCode::LoadBool, dest as u32, 1, 0);
                ExpDesc::new(ExpKind::NonReloc(dest))
            }
            And | Or => unreachable!("handled by emit_and/emit_or"),
        }
    }

    /// Picks the register the short-circuit result lands in: a disposable
    /// temporary is reused directly, but a local must not be — the `and`/`or`
    /// result is a new value, and writing it back into the local's own
    /// register would mutate the local itself.
    fn shortcircuit_dest(&mut self, src: u8) -> u8 {
        if src >= self.nactvar_reg() {
            src
        } else {
            let dest = self.funcs.last_mut().unwrap().alloc_reg();
            self.emit_abc(OpCode::Move, dest as u32, src as u32, 0);
            dest
        }
    }

    /// `a and b`: if `a` is falsy, short-circuit with `a`'s own value;
    /// otherwise discard it and evaluate `b`. `TEST A,_,C` jumps (falls
    /// through to the following `JMP`) exactly when `isfalse(R(A)) == C`,
    /// so falsy-skips-rhs needs `C = 1`.
    fn emit_and(&mut self, lhs: ExpDesc, right_prio: u8) -> LuaResult<ExpDesc> {
        let src = self.discharge_to_any_reg(&lhs);
        let dest = self.shortcircuit_dest(src);
        self.emit_abc(OpCode::Test, dest as u32, 0, 1);
        let skip_rhs = self.emit_jump();
        self.funcs.last_mut().unwrap().free_to(dest);
        let rhs = self.parse_subexpr(right_prio)?;
        self.discharge_to_reg(&rhs, dest);
        self.patch_list_here(Some(skip_rhs));
        Ok(ExpDesc::new(ExpKind::NonReloc(dest)))
    }

    /// `a or b`: if `a` is truthy, short-circuit with `a`'s own value;
    /// otherwise discard it and evaluate `b`. Truthy-skips-rhs needs `C = 0`.
    fn emit_or(&mut self, lhs: ExpDesc, right_prio: u8) -> LuaResult<ExpDesc> {
        let src = self.discharge_to_any_reg(&lhs);
        let dest = self.shortcircuit_dest(src);
        self.emit_abc(OpCode::Test, dest as u32, 0, 0);
        let skip_rhs = self.emit_jump();
        self.funcs.last_mut().unwrap().free_to(dest);
        let rhs = self.parse_subexpr(right_prio)?;
        self.discharge_to_reg(&rhs, dest);
        self.patch_list_here(Some(skip_rhs));
        Ok(ExpDesc::new(ExpKind::NonReloc(dest)))
    }

    /// Reclaims `rk`'s register if it's a disposable temporary sitting at
    /// the top of the allocated range. A live local can coincide with
    /// `free_reg - 1` (nothing has been pushed above it yet) and must not be
    /// reclaimed just because of that — `nactvar_reg` draws the line.
    fn free_rk(&mut self, rk: RK) {
        if let RK::Reg(r) = rk {
            let nactvar = self.nactvar_reg();
            let fs = self.funcs.last_mut().unwrap();
            if r >= nactvar && r == fs.free_reg.wrapping_sub(1) {
                fs.free_to(r);
            }
        }
    }

    pub(super) fn parse_expr_list(&mut self) -> LuaResult<Vec<ExpDesc>> {
        let mut list = vec![self.parse_expr()?];
        while self.accept(&TokenKind::Comma)? {
            list.push(self.parse_expr()?);
        }
        Ok(list)
    }

    // ---- names / suffixed expressions ----

    fn resolve_name(&mut self, name: crate::value::StringId) -> ExpDesc {
        let level = self.funcs.len() - 1;
        if let Some(reg) = self.funcs[level].find_local(name) {
            return ExpDesc::new(ExpKind::Local(reg));
        }
        if let Some(idx) = self.resolve_upvalue(level, name) {
            return ExpDesc::new(ExpKind::Upval(idx));
        }
        ExpDesc::new(ExpKind::Global(name))
    }

    fn resolve_upvalue(&mut self, level: usize, name: crate::value::StringId) -> Option<u32> {
        if level == 0 {
            return None;
        }
        if let Some(idx) = self.funcs[level].find_upvalue(name) {
            return Some(idx);
        }
        let parent = level - 1;
        if let Some(reg) = self.funcs[parent].find_local(name) {
            self.funcs[parent].mark_captured(reg);
            return Some(self.funcs[level].add_upvalue(name, true, reg as u32));
        }
        if let Some(parent_upval) = self.resolve_upvalue(parent, name) {
            return Some(self.funcs[level].add_upvalue(name, false, parent_upval));
        }
        None
    }

    fn parse_primary_expr(&mut self) -> LuaResult<ExpDesc> {
        match self.cur.kind.clone() {
            TokenKind::Name(name) => {
                self.advance()?;
                Ok(self.resolve_name(name))
            }
            TokenKind::LParen => {
                self.advance()?;
                let mut e = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                if e.is_multret() {
                    let r = self.discharge_to_any_reg(&e);
                    e = ExpDesc::new(ExpKind::NonReloc(r));
                }
                Ok(e)
            }
            other => Err(self.err(format!("unexpected symbol near '{}'", other.describe()))),
        }
    }

    fn parse_suffixed_expr(&mut self) -> LuaResult<ExpDesc> {
        let mut e = self.parse_primary_expr()?;
        loop {
            match self.cur.kind.clone() {
                TokenKind::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let table = self.discharge_to_any_reg(&e);
                    let key = self.exp_to_rk(&ExpDesc::new(ExpKind::KStr(name)));
                    e = ExpDesc::new(ExpKind::Indexed { table, key });
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let key_e = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let table = self.discharge_to_any_reg(&e);
                    let key = self.exp_to_rk(&key_e);
                    e = ExpDesc::new(ExpKind::Indexed { table, key });
                }
                TokenKind::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    e = self.compile_method_call(&e, name)?;
                }
                TokenKind::LParen | TokenKind::Str(_) | TokenKind::LBrace => {
                    e = self.compile_plain_call(&e)?;
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_args(&mut self) -> LuaResult<Vec<ExpDesc>> {
        match self.cur.kind.clone() {
            TokenKind::LParen => {
                self.advance()?;
                let args = if self.check(&TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect(TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::Str(s) => {
                self.advance()?;
                Ok(vec![ExpDesc::new(ExpKind::KStr(s))])
            }
            TokenKind::LBrace => Ok(vec![self.parse_table_constructor()?]),
            other => Err(self.err(format!("function arguments expected near '{}'", other.describe()))),
        }
    }

    fn compile_plain_call(&mut self, func: &ExpDesc) -> LuaResult<ExpDesc> {
        let func_reg = self.exp_to_next_reg(func);
        let args = self.parse_args()?;
        let b = self.compile_exprlist_multiret(&args);
        let pc = self.emit_abc(OpCode::Call, func_reg as u32, b, 2);
        self.funcs.last_mut().unwrap().free_to(func_reg + 1);
        Ok(ExpDesc::new(ExpKind::Call { pc, reg: func_reg }))
    }

    fn compile_method_call(&mut self, obj: &ExpDesc, method: crate::value::StringId) -> LuaResult<ExpDesc> {
        let table_reg = self.discharge_to_any_reg(obj);
        let func_reg = self.funcs.last_mut().unwrap().alloc_reg();
        self.funcs.last_mut().unwrap().alloc_reg(); // self argument slot
        let key = self.exp_to_rk(&ExpDesc::new(ExpKind::KStr(method)));
        self.emit_abc(OpCode::Self_, func_reg as u32, table_reg as u32, key.field());
        let args = self.parse_args()?;
        let rest = self.compile_exprlist_multiret(&args);
        let b = if rest == 0 { 0 } else { rest + 1 };
        let pc = self.emit_abc(OpCode::Call, func_reg as u32, b, 2);
        self.funcs.last_mut().unwrap().free_to(func_reg + 1);
        Ok(ExpDesc::new(ExpKind::Call { pc, reg: func_reg }))
    }

    // ---- table constructors ----

    fn parse_table_constructor(&mut self) -> LuaResult<ExpDesc> {
        let table_reg = self.funcs.last_mut().unwrap().alloc_reg();
        let newtable_pc = self.emit_abc(OpCode::NewTable, table_reg as u32, 0, 0);
        self.expect(TokenKind::LBrace)?;
        let mut pending: Vec<ExpDesc> = Vec::new();
        let mut narr_total: u32 = 0;
        let mut nrec: u32 = 0;
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::LBracket) {
                self.advance()?;
                let key_e = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Assign)?;
                let val_e = self.parse_expr()?;
                let key = self.exp_to_rk(&key_e);
                let val = self.exp_to_rk(&val_e);
                self.emit_abc(OpCode::SetTable, table_reg as u32, key.field(), val.field());
                self.funcs.last_mut().unwrap().free_to(table_reg + 1);
                nrec += 1;
            } else if matches!(self.cur.kind, TokenKind::Name(_)) && self.peek_is_assign()? {
                let name = self.expect_name()?;
                self.expect(TokenKind::Assign)?;
                let val_e = self.parse_expr()?;
                let key = self.exp_to_rk(&ExpDesc::new(ExpKind::KStr(name)));
                let val = self.exp_to_rk(&val_e);
                self.emit_abc(OpCode::SetTable, table_reg as u32, key.field(), val.field());
                self.funcs.last_mut().unwrap().free_to(table_reg + 1);
                nrec += 1;
            } else {
                let val_e = self.parse_expr()?;
                pending.push(val_e);
                if pending.len() >= crate::opcode::LFIELDS_PER_FLUSH as usize {
                    self.flush_array_fields(table_reg, &mut pending, narr_total, false);
                    narr_total += crate::opcode::LFIELDS_PER_FLUSH as u32;
                }
            }
            if !self.accept(&TokenKind::Comma)? && !self.accept(&TokenKind::Semi)? {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        let final_count = pending.len() as u32;
        self.flush_array_fields(table_reg, &mut pending, narr_total, true);
        narr_total += final_count;
        self.funcs.last_mut().unwrap().free_to(table_reg + 1);
        let code = self.code_mut();
        code[newtable_pc] = crate::opcode::encode_abc(
            OpCode::NewTable,
            table_reg as u32,
            crate::opcode::int_to_fb(narr_total),
            crate::opcode::int_to_fb(nrec),
        );
        Ok(ExpDesc::new(ExpKind::NonReloc(table_reg)))
    }

    /// Discharges buffered positional fields into contiguous registers and
    /// emits a `SETLIST` batch (`SETLIST`'s `(C-1)*50+1` batching). When
    /// `is_final` and the last field is a call
    /// or `...`, it expands to every result it has rather than just one.
    fn flush_array_fields(&mut self, table_reg: u8, pending: &mut Vec<ExpDesc>, narr_so_far: u32, is_final: bool) {
        if pending.is_empty() {
            return;
        }
        let n = pending.len();
        let mut multiret = false;
        for (i, e) in pending.iter().enumerate() {
            if is_final && i + 1 == n && e.is_multret() {
                self.discharge_multiret(e, None);
                multiret = true;
            } else {
                self.exp_to_next_reg(e);
            }
        }
        let b = if multiret { 0 } else { n as u32 };
        let batch = narr_so_far / crate::opcode::LFIELDS_PER_FLUSH as u32 + 1;
        self.emit_abc(OpCode::SetList, table_reg as u32, b, batch);
        self.funcs.last_mut().unwrap().free_to(table_reg + 1);
        pending.clear();
    }

    fn peek_is_assign(&mut self) -> LuaResult<bool> {
        Ok(self.lexer.peek(self.gc)?.kind == TokenKind::Assign)
    }

    // ---- statements ----

    fn block_follows(&self) -> bool {
        matches!(
            self.cur.kind,
            TokenKind::End | TokenKind::Else | TokenKind::Elseif | TokenKind::Until | TokenKind::Eof
        )
    }

    pub(super) fn parse_block(&mut self) -> LuaResult<()> {
        while !self.block_follows() {
            if self.check(&TokenKind::Return) {
                self.parse_return_stmt()?;
                break;
            }
            self.parse_statement()?;
            let fs = self.funcs.last_mut().unwrap();
            let active_top = fs.locals.last().map(|l| l.reg + 1).unwrap_or(0);
            fs.free_to(active_top);
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> LuaResult<()> {
        match self.cur.kind.clone() {
            TokenKind::Semi => {
                self.advance()?;
                Ok(())
            }
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::While => self.parse_while_stmt(),
            TokenKind::Do => {
                self.advance()?;
                self.funcs.last_mut().unwrap().enter_block(false);
                self.parse_block()?;
                self.expect(TokenKind::End)?;
                self.leave_block();
                Ok(())
            }
            TokenKind::For => self.parse_for_stmt(),
            TokenKind::Repeat => self.parse_repeat_stmt(),
            TokenKind::Function => self.parse_function_stmt(),
            TokenKind::Local => self.parse_local_stmt(),
            TokenKind::Break => self.parse_break_stmt(),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_cond_jump(&mut self) -> LuaResult<JumpList> {
        let e = self.parse_expr()?;
        let reg = self.discharge_to_any_reg(&e);
        self.emit_abc(OpCode::Test, reg as u32, 0, 1);
        let j = self.emit_jump();
        self.funcs.last_mut().unwrap().free_to(reg);
        Ok(Some(j))
    }

    fn parse_if_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // if
        let mut escape_list: JumpList = None;
        let mut false_jump = self.parse_cond_jump()?;
        self.expect(TokenKind::Then)?;
        self.funcs.last_mut().unwrap().enter_block(false);
        self.parse_block()?;
        self.leave_block();
        while self.check(&TokenKind::Elseif) {
            let j = self.emit_jump();
            escape_list = self.concat_jumps(escape_list, Some(j));
            self.patch_list_here(false_jump);
            self.advance()?;
            false_jump = self.parse_cond_jump()?;
            self.expect(TokenKind::Then)?;
            self.funcs.last_mut().unwrap().enter_block(false);
            self.parse_block()?;
            self.leave_block();
        }
        if self.check(&TokenKind::Else) {
            let j = self.emit_jump();
            escape_list = self.concat_jumps(escape_list, Some(j));
            self.patch_list_here(false_jump);
            self.advance()?;
            self.funcs.last_mut().unwrap().enter_block(false);
            self.parse_block()?;
            self.leave_block();
        } else {
            self.patch_list_here(false_jump);
        }
        self.expect(TokenKind::End)?;
        self.patch_list_here(escape_list);
        Ok(())
    }

    fn parse_while_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // while
        let loop_start = self.here();
        let false_jump = self.parse_cond_jump()?;
        self.expect(TokenKind::Do)?;
        self.funcs.last_mut().unwrap().enter_block(true);
        self.parse_block()?;
        self.expect(TokenKind::End)?;
        let back_jump = self.emit_jump();
        self.patch_list_to(Some(back_jump), loop_start);
        let break_list = self.leave_block();
        self.patch_list_here(false_jump);
        self.patch_list_here(break_list);
        Ok(())
    }

    fn parse_repeat_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // repeat
        let loop_start = self.here();
        self.funcs.last_mut().unwrap().enter_block(true);
        self.parse_block()?;
        self.expect(TokenKind::Until)?;
        let false_jump = self.parse_cond_jump()?;
        self.patch_list_to(false_jump, loop_start);
        let break_list = self.leave_block();
        self.patch_list_here(break_list);
        Ok(())
    }

    fn parse_break_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // break
        let j = self.emit_jump();
        if self.funcs.last_mut().unwrap().innermost_loop_mut().is_none() {
            return Err(self.err("'break' outside a loop"));
        }
        let old = self.funcs.last_mut().unwrap().innermost_loop_mut().unwrap().break_list;
        let merged = self.concat_jumps(old, Some(j));
        self.funcs.last_mut().unwrap().innermost_loop_mut().unwrap().break_list = merged;
        Ok(())
    }

    fn parse_for_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // for
        let name = self.expect_name()?;
        match self.cur.kind {
            TokenKind::Assign => self.parse_numeric_for(name),
            TokenKind::Comma | TokenKind::In => self.parse_generic_for(name),
            _ => Err(self.err("'=' or 'in' expected")),
        }
    }

    fn parse_numeric_for(&mut self, name: crate::value::StringId) -> LuaResult<()> {
        self.advance()?; // '='
        let base = self.funcs.last().unwrap().free_reg;
        let e1 = self.parse_expr()?;
        self.exp_to_next_reg(&e1);
        self.expect(TokenKind::Comma)?;
        let e2 = self.parse_expr()?;
        self.exp_to_next_reg(&e2);
        if self.accept(&TokenKind::Comma)? {
            let e3 = self.parse_expr()?;
            self.exp_to_next_reg(&e3);
        } else {
            let r = self.funcs.last_mut().unwrap().alloc_reg();
            let k = self.add_constant(LuaValue::Integer(1));
            self.emit_abx(OpCode::LoadK, r as u32, k);
        }
        self.expect(TokenKind::Do)?;
        self.funcs.last_mut().unwrap().enter_block(true);
        self.declare_local(name);
        let prep_pc = self.emit_asbx(OpCode::ForPrep, base as u32, 0);
        self.parse_block()?;
        self.expect(TokenKind::End)?;
        let break_list = self.leave_block();
        let loop_pc = self.emit_asbx(OpCode::ForLoop, base as u32, 0);
        self.patch_sbx(prep_pc, loop_pc);
        self.patch_sbx(loop_pc, prep_pc + 1);
        self.patch_list_here(break_list);
        self.funcs.last_mut().unwrap().free_to(base);
        Ok(())
    }

    fn parse_generic_for(&mut self, first_name: crate::value::StringId) -> LuaResult<()> {
        let mut names = vec![first_name];
        while self.accept(&TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::In)?;
        let base = self.funcs.last().unwrap().free_reg;
        let exprs = self.parse_expr_list()?;
        self.compile_exprlist_fixed(&exprs, 3);
        self.expect(TokenKind::Do)?;
        self.funcs.last_mut().unwrap().enter_block(true);
        for n in &names {
            self.declare_local(*n);
        }
        let jmp_to_test = self.emit_jump();
        let body_start = self.here();
        self.parse_block()?;
        self.expect(TokenKind::End)?;
        let tforloop_pc = self.here();
        self.patch_list_to(Some(jmp_to_test), tforloop_pc);
        self.emit_abc(OpCode::TForLoop, base as u32, 0, names.len() as u32);
        let back_jump = self.emit_jump();
        self.patch_list_to(Some(back_jump), body_start);
        let break_list = self.leave_block();
        self.patch_list_here(break_list);
        self.funcs.last_mut().unwrap().free_to(base);
        Ok(())
    }

    fn parse_function_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // function
        let first = self.expect_name()?;
        let mut target = self.resolve_name(first);
        let mut is_method = false;
        loop {
            if self.accept(&TokenKind::Dot)? {
                let name = self.expect_name()?;
                let table = self.discharge_to_any_reg(&target);
                let key = self.exp_to_rk(&ExpDesc::new(ExpKind::KStr(name)));
                target = ExpDesc::new(ExpKind::Indexed { table, key });
            } else if self.accept(&TokenKind::Colon)? {
                let name = self.expect_name()?;
                let table = self.discharge_to_any_reg(&target);
                let key = self.exp_to_rk(&ExpDesc::new(ExpKind::KStr(name)));
                target = ExpDesc::new(ExpKind::Indexed { table, key });
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let proto = self.parse_function_body(is_method)?;
        let idx = self.push_child_proto(proto);
        let reg = self.funcs.last_mut().unwrap().alloc_reg();
        self.emit_closure(reg, idx);
        self.store_to_target(&target, reg)?;
        self.funcs.last_mut().unwrap().free_to(reg);
        Ok(())
    }

    fn parse_local_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // local
        if self.accept(&TokenKind::Function)? {
            let name = self.expect_name()?;
            let reg = self.declare_local(name);
            let proto = self.parse_function_body(false)?;
            let idx = self.push_child_proto(proto);
            self.emit_closure(reg, idx);
            return Ok(());
        }
        let mut names = vec![self.expect_name()?];
        while self.accept(&TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        let mut exprs = Vec::new();
        if self.accept(&TokenKind::Assign)? {
            exprs = self.parse_expr_list()?;
        }
        let base = self.compile_exprlist_fixed(&exprs, names.len());
        for (i, n) in names.into_iter().enumerate() {
            self.adopt_local(n, base + i as u8);
        }
        Ok(())
    }

    fn parse_return_stmt(&mut self) -> LuaResult<()> {
        self.advance()?; // return
        let exprs = if self.block_follows() || self.check(&TokenKind::Semi) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        let base = self.funcs.last().unwrap().free_reg;
        let b = self.compile_exprlist_multiret(&exprs);
        self.emit_abc(OpCode::Return, base as u32, b, 0);
        self.accept(&TokenKind::Semi)?;
        Ok(())
    }

    fn parse_expr_stmt(&mut self) -> LuaResult<()> {
        let stmt_base = self.funcs.last().unwrap().free_reg;
        let first = self.parse_suffixed_expr()?;
        if self.check(&TokenKind::Assign) || self.check(&TokenKind::Comma) {
            let mut targets = vec![self.validate_target(first)?];
            while self.accept(&TokenKind::Comma)? {
                let e = self.parse_suffixed_expr()?;
                targets.push(self.validate_target(e)?);
            }
            self.expect(TokenKind::Assign)?;
            let exprs = self.parse_expr_list()?;
            let base = self.compile_exprlist_fixed(&exprs, targets.len());
            for (i, t) in targets.iter().enumerate() {
                self.store_to_target(t, base + i as u8)?;
            }
        } else {
            match first.kind {
                ExpKind::Call { pc, .. } => self.set_call_result_count(pc, 1),
                _ => return Err(self.err("syntax error (expression used as a statement)")),
            }
        }
        self.funcs.last_mut().unwrap().free_to(stmt_base);
        Ok(())
    }

    fn validate_target(&self, e: ExpDesc) -> LuaResult<ExpDesc> {
        match e.kind {
            ExpKind::Local(_) | ExpKind::Upval(_) | ExpKind::Global(_) | ExpKind::Indexed { .. } => Ok(e),
            _ => Err(self.err("cannot assign to this expression")),
        }
    }

    fn store_to_target(&mut self, target: &ExpDesc, value_reg: u8) -> LuaResult<()> {
        match target.kind {
            ExpKind::Local(r) => {
                if r != value_reg {
                    self.emit_abc(OpCode::Move, r as u32, value_reg as u32, 0);
                }
            }
            ExpKind::Upval(idx) => {
                self.emit_abc(OpCode::SetUpval, value_reg as u32, idx, 0);
            }
            ExpKind::Global(name) => {
                let k = self.add_constant(LuaValue::String(name));
                self.emit_abx(OpCode::SetGlobal, value_reg as u32, k);
            }
            ExpKind::Indexed { table, key } => {
                self.emit_abc(OpCode::SetTable, table as u32, key.field(), value_reg as u32);
            }
            _ => return Err(self.err("cannot assign to this expression")),
        }
        Ok(())
    }

    // ---- function bodies ----

    pub(super) fn parse_function_body(&mut self, is_method: bool) -> LuaResult<crate::value::Prototype> {
        self.expect(TokenKind::LParen)?;
        let source_name = self.funcs.last().unwrap().source_name;
        let line = self.cur.line;
        self.funcs.push(super::FuncState::new(source_name, line));
        if is_method {
            let self_name = self.gc.intern_string("self");
            self.declare_local(self_name);
            self.funcs.last_mut().unwrap().num_params += 1;
        }
        let mut is_vararg = false;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.accept(&TokenKind::Dots)? {
                    is_vararg = true;
                    break;
                }
                let pname = self.expect_name()?;
                self.declare_local(pname);
                self.funcs.last_mut().unwrap().num_params += 1;
                if !self.accept(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.funcs.last_mut().unwrap().is_vararg = is_vararg;
        self.expect(TokenKind::RParen)?;
        self.parse_block()?;
        self.expect(TokenKind::End)?;
        self.emit_abc(OpCode::Return, 0, 1, 0);
        let fs = self.funcs.pop().expect("pushed function state");
        Ok(self.finish_prototype(fs))
    }
}
