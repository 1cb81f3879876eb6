//! The fetch-decode-execute loop.
//!
//! [`LuaState::exec_frame`] runs the topmost call-info's bytecode until a
//! `RETURN` (or a tail call that falls through to a native function) pops
//! that frame, at which point it returns the number of values already
//! written at that frame's `results_base`. An ordinary (non-tail) `CALL` to
//! a Lua closure recurses into `exec_frame` again through
//! [`LuaState::dispatch_call`]; `TAILCALL` to a Lua closure instead
//! reconfigures the same `CallInfo` in place and `continue`s this loop,
//! which is what keeps tail recursion in constant space.

use super::LuaState;
use crate::opcode::{fb_to_int, get_a, get_b, get_bx, get_c, get_op, get_sbx, is_k, rk_index, OpCode, LFIELDS_PER_FLUSH};
use crate::value::{Closure, LuaClosure, LuaTable, LuaValue, Prototype, UpvalueId};
use crate::LuaResult;
use std::rc::Rc;

impl LuaState {
    pub(super) fn exec_frame(&mut self) -> LuaResult<usize> {
        loop {
            let ci_index = self.call_infos.len() - 1;
            let proto = self.current_lua_proto();
            let pc = self.call_infos[ci_index].saved_pc;
            let inst = proto.code[pc];
            self.call_infos[ci_index].saved_pc = pc + 1;

            match get_op(inst) {
                OpCode::Move => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let v = self.reg(b);
                    self.set_reg(a, v);
                }
                OpCode::LoadK => {
                    let (a, bx) = (get_a(inst), get_bx(inst));
                    let v = proto.constants[bx as usize];
                    self.set_reg(a, v);
                }
                OpCode::LoadBool => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    self.set_reg(a, LuaValue::Boolean(b != 0));
                    if c != 0 {
                        self.call_infos[ci_index].saved_pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    for r in a..=b {
                        self.set_reg(r, LuaValue::nil());
                    }
                }
                OpCode::GetUpval => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let uv = self.current_upvalue(b);
                    let v = self.upvalue_get(uv);
                    self.set_reg(a, v);
                }
                OpCode::SetUpval => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let uv = self.current_upvalue(b);
                    let v = self.reg(a);
                    self.upvalue_set(uv, v);
                }
                OpCode::GetGlobal => {
                    let (a, bx) = (get_a(inst), get_bx(inst));
                    let name = match proto.constants[bx as usize] {
                        LuaValue::String(s) => s,
                        _ => unreachable!("GETGLOBAL's Bx must index a string constant"),
                    };
                    let v = self.get_global_str(name)?;
                    self.set_reg(a, v);
                }
                OpCode::SetGlobal => {
                    let (a, bx) = (get_a(inst), get_bx(inst));
                    let name = match proto.constants[bx as usize] {
                        LuaValue::String(s) => s,
                        _ => unreachable!("SETGLOBAL's Bx must index a string constant"),
                    };
                    let v = self.reg(a);
                    self.set_global_str(name, v)?;
                }
                OpCode::GetTable => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let t = self.reg(b);
                    let k = self.rk_value(&proto, c);
                    let v = self.index_get(t, k)?;
                    self.set_reg(a, v);
                }
                OpCode::SetTable => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let t = self.reg(a);
                    let k = self.rk_value(&proto, b);
                    let v = self.rk_value(&proto, c);
                    self.index_set(t, k, v)?;
                }
                OpCode::NewTable => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let narr = fb_to_int(b) as usize;
                    let nhash = fb_to_int(c) as usize;
                    let table = self.gc.alloc_table(LuaTable::with_size_hints(narr, nhash));
                    self.set_reg(a, LuaValue::Table(table));
                    self.check_gc();
                }
                OpCode::Self_ => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let obj = self.reg(b);
                    let k = self.rk_value(&proto, c);
                    self.set_reg(a + 1, obj);
                    let v = self.index_get(obj, k)?;
                    self.set_reg(a, v);
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let x = self.rk_value(&proto, b);
                    let y = self.rk_value(&proto, c);
                    let op = match get_op(inst) {
                        OpCode::Add => super::arith::ArithOp::Add,
                        OpCode::Sub => super::arith::ArithOp::Sub,
                        OpCode::Mul => super::arith::ArithOp::Mul,
                        OpCode::Div => super::arith::ArithOp::Div,
                        OpCode::Mod => super::arith::ArithOp::Mod,
                        OpCode::Pow => super::arith::ArithOp::Pow,
                        _ => unreachable!(),
                    };
                    let v = self.arith(op, x, y)?;
                    self.set_reg(a, v);
                }
                OpCode::Unm => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let x = self.reg(b);
                    let v = self.unary_minus(x)?;
                    self.set_reg(a, v);
                }
                OpCode::Not => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let x = self.reg(b);
                    self.set_reg(a, LuaValue::Boolean(!x.is_truthy()));
                }
                OpCode::Len => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let x = self.reg(b);
                    let v = self.length_of(x)?;
                    self.set_reg(a, v);
                }
                OpCode::Concat => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let mut values = Vec::with_capacity((c - b + 1) as usize);
                    for r in b..=c {
                        values.push(self.reg(r));
                    }
                    let v = self.concat_range(&values)?;
                    self.set_reg(a, v);
                    self.check_gc();
                }
                OpCode::Jmp => {
                    let sbx = get_sbx(inst);
                    self.jump(ci_index, sbx);
                }
                OpCode::Eq | OpCode::Lt | OpCode::Le => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let x = self.rk_value(&proto, b);
                    let y = self.rk_value(&proto, c);
                    let cond = match get_op(inst) {
                        OpCode::Eq => self.lua_eq(x, y)?,
                        OpCode::Lt => self.lua_lt(x, y)?,
                        OpCode::Le => self.lua_le(x, y)?,
                        _ => unreachable!(),
                    };
                    if cond != (a != 0) {
                        self.call_infos[ci_index].saved_pc += 1;
                    }
                }
                OpCode::Test => {
                    let (a, c) = (get_a(inst), get_c(inst));
                    let isfalse = !self.reg(a).is_truthy();
                    if (isfalse as u32) != c {
                        self.call_infos[ci_index].saved_pc += 1;
                    }
                }
                OpCode::TestSet => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let v = self.reg(b);
                    let isfalse = !v.is_truthy();
                    if (isfalse as u32) == c {
                        self.call_infos[ci_index].saved_pc += 1;
                    } else {
                        self.set_reg(a, v);
                    }
                }
                OpCode::Call => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let func_abs = self.reg_index(a);
                    let mut args_start = func_abs + 1;
                    let mut nargs = if b == 0 { self.top() - args_start } else { (b - 1) as usize };
                    let nresults = if c == 0 { -1 } else { (c - 1) as i32 };
                    let f0 = self.get_stack(func_abs);
                    let f = self.resolve_callable(f0, &mut args_start, &mut nargs)?;
                    self.dispatch_call(f, func_abs, args_start, nargs, nresults)?;
                }
                OpCode::TailCall => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let func_abs = self.reg_index(a);
                    let mut args_start = func_abs + 1;
                    let mut nargs = if b == 0 { self.top() - args_start } else { (b - 1) as usize };
                    let base = self.call_infos[ci_index].base;
                    let results_base = self.call_infos[ci_index].results_base;
                    let expected = self.call_infos[ci_index].expected_results;
                    let f0 = self.get_stack(func_abs);
                    let f = self.resolve_callable(f0, &mut args_start, &mut nargs)?;
                    self.close_upvalues_from(base);
                    for i in 0..nargs {
                        let v = self.get_stack(args_start + i);
                        self.set_stack(base + i, v);
                    }
                    self.set_top(base + nargs);
                    match f {
                        LuaValue::Closure(cid) if matches!(self.gc.closure(cid), Closure::Lua(_)) => {
                            let lc = match self.gc.closure(cid).clone() {
                                Closure::Lua(lc) => lc,
                                Closure::Native(_) => unreachable!(),
                            };
                            self.setup_lua_frame_in_place(ci_index, f, lc, base, nargs)?;
                            self.check_gc();
                            continue;
                        }
                        _ => {
                            let produced = self.call_native_value(f, base, nargs)?;
                            self.call_infos.pop();
                            let want = self.finish_results(results_base, base + nargs, produced, expected);
                            self.check_gc();
                            return Ok(want);
                        }
                    }
                }
                OpCode::Return => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let base = self.call_infos[ci_index].base;
                    let results_base = self.call_infos[ci_index].results_base;
                    let expected = self.call_infos[ci_index].expected_results;
                    let from = base + a as usize;
                    let n = if b == 0 { self.top() - from } else { (b - 1) as usize };
                    self.close_upvalues_from(base);
                    self.call_infos.pop();
                    let want = self.finish_results(results_base, from, n, expected);
                    return Ok(want);
                }
                OpCode::ForPrep => {
                    let (a, sbx) = (get_a(inst), get_sbx(inst));
                    let init_raw = self.reg(a);
                    let limit_raw = self.reg(a + 1);
                    let step_raw = self.reg(a + 2);
                    let init_n = self
                        .tonumber(init_raw)
                        .ok_or_else(|| self.runtime_error_str("'for' initial value must be a number"))?;
                    let limit_n = self
                        .tonumber(limit_raw)
                        .ok_or_else(|| self.runtime_error_str("'for' limit must be a number"))?;
                    let step_n = self
                        .tonumber(step_raw)
                        .ok_or_else(|| self.runtime_error_str("'for' step must be a number"))?;
                    let (init, limit, step) = for_numbers(init_n, limit_n, step_n);
                    if for_is_zero(step) {
                        return Err(self.raise_string("'for' step is zero"));
                    }
                    self.set_reg(a, for_sub(init, step));
                    self.set_reg(a + 1, limit);
                    self.set_reg(a + 2, step);
                    self.jump(ci_index, sbx);
                }
                OpCode::ForLoop => {
                    let (a, sbx) = (get_a(inst), get_sbx(inst));
                    let step = self.reg(a + 2);
                    let new_val = for_add(self.reg(a), step);
                    let limit = self.reg(a + 1);
                    let continue_loop = if for_is_negative(step) {
                        for_ge(new_val, limit)
                    } else {
                        for_le(new_val, limit)
                    };
                    self.set_reg(a, new_val);
                    if continue_loop {
                        self.set_reg(a + 3, new_val);
                        self.jump(ci_index, sbx);
                    }
                }
                OpCode::TForLoop => {
                    let (a, c) = (get_a(inst), get_c(inst));
                    let cb = a + 3;
                    let f = self.reg(a);
                    let s = self.reg(a + 1);
                    let ctrl = self.reg(a + 2);
                    self.set_reg(cb, f);
                    self.set_reg(cb + 1, s);
                    self.set_reg(cb + 2, ctrl);
                    let cb_abs = self.reg_index(cb);
                    self.set_top(cb_abs + 3);
                    let mut args_start = cb_abs + 1;
                    let mut nargs = 2usize;
                    let callee = self.resolve_callable(f, &mut args_start, &mut nargs)?;
                    self.dispatch_call(callee, cb_abs, args_start, nargs, c as i32)?;
                    let first = self.reg(cb);
                    self.set_top(self.call_infos[ci_index].top);
                    if !first.is_nil() {
                        self.set_reg(a + 2, first);
                        let sbx = get_sbx(inst);
                        self.jump(ci_index, sbx);
                    }
                }
                OpCode::SetList => {
                    let (a, b, c) = (get_a(inst), get_b(inst), get_c(inst));
                    let table_abs = self.reg_index(a);
                    let table = match self.get_stack(table_abs) {
                        LuaValue::Table(t) => t,
                        _ => unreachable!("SETLIST's target register must hold a table"),
                    };
                    let n = if b == 0 { self.top() - (table_abs + 1) } else { b as usize };
                    let start_index = (c as i64 - 1) * LFIELDS_PER_FLUSH + 1;
                    for i in 0..n {
                        let v = self.get_stack(table_abs + 1 + i);
                        self.raw_set(table, LuaValue::Integer(start_index + i as i64), v)?;
                    }
                    self.set_top(self.call_infos[ci_index].top);
                    self.check_gc();
                }
                OpCode::Close => {
                    let a = get_a(inst);
                    let level = self.reg_index(a);
                    self.close_upvalues_from(level);
                }
                OpCode::Closure => {
                    // CLOSURE A Bx is followed by one pseudo-instruction per
                    // upvalue the child prototype captures (MOVE for a
                    // stack-resident local, GETUPVAL for one chained through
                    // this function's own upvalues); consume them here
                    // instead of dispatching them as ordinary instructions.
                    let (a, bx) = (get_a(inst), get_bx(inst));
                    let child = proto.protos[bx as usize].clone();
                    let base = self.call_infos[ci_index].base;
                    let parent_upvalues = self.current_upvalues();
                    let nups = child.upvalues.len();
                    let pseudo_pc = self.call_infos[ci_index].saved_pc;
                    let mut upvalues = Vec::with_capacity(nups);
                    for i in 0..nups {
                        let pseudo = proto.code[pseudo_pc + i];
                        let id = match get_op(pseudo) {
                            OpCode::Move => self.find_or_create_upvalue(base + get_b(pseudo) as usize),
                            OpCode::GetUpval => parent_upvalues[get_b(pseudo) as usize],
                            other => unreachable!(
                                "CLOSURE must be followed by MOVE/GETUPVAL pseudo-instructions, got {other:?}"
                            ),
                        };
                        upvalues.push(id);
                    }
                    self.call_infos[ci_index].saved_pc = pseudo_pc + nups;
                    let closure = Closure::Lua(LuaClosure { proto: child, upvalues });
                    let id = self.gc.alloc_closure(closure);
                    self.set_reg(a, LuaValue::Closure(id));
                    self.check_gc();
                }
                OpCode::Vararg => {
                    let (a, b) = (get_a(inst), get_b(inst));
                    let varargs = self.call_infos[ci_index].varargs.clone();
                    let want = if b == 0 { varargs.len() } else { (b - 1) as usize };
                    for i in 0..want {
                        let v = varargs.get(i).copied().unwrap_or(LuaValue::nil());
                        self.set_reg(a + i as u32, v);
                    }
                    if b == 0 {
                        self.set_top(self.reg_index(a) + want);
                    }
                }
            }
        }
    }

    fn jump(&mut self, ci_index: usize, sbx: i32) {
        let pc = self.call_infos[ci_index].saved_pc as i32;
        self.call_infos[ci_index].saved_pc = (pc + sbx) as usize;
    }

    fn current_lua_proto(&self) -> Rc<Prototype> {
        match self.current_ci().func {
            LuaValue::Closure(cid) => match self.gc.closure(cid) {
                Closure::Lua(lc) => lc.proto.clone(),
                Closure::Native(_) => unreachable!("a Lua frame's CallInfo must hold a Lua closure"),
            },
            _ => unreachable!("a Lua frame's CallInfo must hold a closure"),
        }
    }

    fn current_upvalue(&self, idx: u32) -> UpvalueId {
        self.current_upvalues()[idx as usize]
    }

    fn current_upvalues(&self) -> Vec<UpvalueId> {
        match self.current_ci().func {
            LuaValue::Closure(cid) => match self.gc.closure(cid) {
                Closure::Lua(lc) => lc.upvalues.clone(),
                Closure::Native(_) => unreachable!("a Lua frame's CallInfo must hold a Lua closure"),
            },
            _ => unreachable!("a Lua frame's CallInfo must hold a closure"),
        }
    }

    fn rk_value(&self, proto: &Prototype, field: u32) -> LuaValue {
        if is_k(field) {
            proto.constants[rk_index(field) as usize]
        } else {
            self.reg(field)
        }
    }
}

fn for_numbers(a: LuaValue, b: LuaValue, c: LuaValue) -> (LuaValue, LuaValue, LuaValue) {
    if let (LuaValue::Integer(_), LuaValue::Integer(_), LuaValue::Integer(_)) = (a, b, c) {
        return (a, b, c);
    }
    (
        LuaValue::Number(a.as_float().unwrap()),
        LuaValue::Number(b.as_float().unwrap()),
        LuaValue::Number(c.as_float().unwrap()),
    )
}

fn for_sub(a: LuaValue, b: LuaValue) -> LuaValue {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => LuaValue::Integer(x.wrapping_sub(y)),
        _ => LuaValue::Number(a.as_float().unwrap() - b.as_float().unwrap()),
    }
}

fn for_add(a: LuaValue, b: LuaValue) -> LuaValue {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => LuaValue::Integer(x.wrapping_add(y)),
        _ => LuaValue::Number(a.as_float().unwrap() + b.as_float().unwrap()),
    }
}

fn for_is_zero(v: LuaValue) -> bool {
    match v {
        LuaValue::Integer(i) => i == 0,
        LuaValue::Number(n) => n == 0.0,
        _ => false,
    }
}

fn for_is_negative(v: LuaValue) -> bool {
    match v {
        LuaValue::Integer(i) => i < 0,
        LuaValue::Number(n) => n < 0.0,
        _ => false,
    }
}

fn for_le(a: LuaValue, b: LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x <= y,
        _ => a.as_float().unwrap() <= b.as_float().unwrap(),
    }
}

fn for_ge(a: LuaValue, b: LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x >= y,
        _ => a.as_float().unwrap() >= b.as_float().unwrap(),
    }
}
