//! Calling convention and `__call` dispatch.
//!
//! Every call site in the crate (bytecode `CALL`, `TAILCALL`, `TFORLOOP`, the
//! host-facing [`LuaState::call_value`], GC finalizers, `__index`/`__newindex`
//! handlers, metamethod fallbacks, `tostring`/`concat` coercions) bottoms out
//! in [`LuaState::dispatch_call`]. Arguments are always already sitting on the
//! value stack at `args_start..args_start+nargs`; `results_base` is the
//! absolute slot the caller wants the (possibly padded/truncated) results
//! written to once the callee finishes — for a plain [`LuaState::call_value`]
//! caller `results_base == args_start` (no function slot to preserve); for
//! bytecode `CALL`/`TAILCALL`, `results_base` is one slot below `args_start`
//! (register `A`, which held the function value).

use super::call_info::CallInfo;
use super::state::type_name;
use super::LuaState;
use crate::value::{Closure, LuaClosure, LuaValue};
use crate::LuaResult;

/// Bound on `__call` chains (a metamethod's handler that is itself not
/// callable but has its own `__call`, and so on) — the same shape as the
/// `__index` chain limit, guarding against a metatable cycle.
const MAX_CALL_CHAIN: usize = 100;

impl LuaState {
    /// Calls `f` with the `nargs` values already pushed at the stack's tail
    /// (so `stack[top-nargs..top]`), leaving exactly the requested number of
    /// results (or however many the callee produced, if `nresults < 0`)
    /// starting at that same position. This is the entry point every host
    /// and stdlib caller uses (`pcall`, `__index` handlers, `tostring`, GC
    /// finalizers, ...).
    pub fn call_value(&mut self, f: LuaValue, nargs: usize, nresults: i32) -> LuaResult<usize> {
        self.check_call_depth()?;
        let mut args_start = self.top() - nargs;
        let results_base = args_start;
        let mut nargs = nargs;
        let callee = self.resolve_callable(f, &mut args_start, &mut nargs)?;
        self.dispatch_call(callee, results_base, args_start, nargs, nresults)
    }

    fn check_call_depth(&mut self) -> LuaResult<()> {
        if self.call_infos.len() >= self.limits.max_call_depth {
            return Err(self.raise_string("stack overflow"));
        }
        Ok(())
    }

    /// Follows the `__call` chain until `f` is directly callable
    /// (`Closure`/`CFunction`), inserting each intermediate handler's
    /// receiver as a new leading argument exactly the way Lua's `luaD_precall`
    /// does. `args_start`/`nargs` are updated in place.
    pub(super) fn resolve_callable(
        &mut self,
        mut f: LuaValue,
        args_start: &mut usize,
        nargs: &mut usize,
    ) -> LuaResult<LuaValue> {
        for _ in 0..MAX_CALL_CHAIN {
            if f.is_callable() {
                return Ok(f);
            }
            let handler = self.get_metamethod(f, super::metamethods::Metamethod::Call);
            if handler.is_nil() {
                return Err(self.raise_string(format!("attempt to call a {} value", type_name(f))));
            }
            self.stack.insert(*args_start, f);
            *nargs += 1;
            f = handler;
        }
        Err(self.raise_string("'__call' chain too long; possible loop"))
    }

    /// Dispatches an already-resolved callable value and normalizes its
    /// results into `results_base`. Shared by `call_value`, bytecode `CALL`
    /// and `TFORLOOP`'s iterator invocation.
    pub(super) fn dispatch_call(
        &mut self,
        f: LuaValue,
        results_base: usize,
        args_start: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<usize> {
        let want = match f {
            LuaValue::CFunction(_) => {
                let produced = self.call_native_value(f, args_start, nargs)?;
                self.finish_results(results_base, args_start + nargs, produced, nresults)
            }
            LuaValue::Closure(cid) => match self.gc.closure(cid).clone() {
                Closure::Native(_) => {
                    let produced = self.call_native_value(f, args_start, nargs)?;
                    self.finish_results(results_base, args_start + nargs, produced, nresults)
                }
                Closure::Lua(lc) => self.call_lua(f, lc, results_base, args_start, nargs, nresults)?,
            },
            _ => unreachable!("resolve_callable always returns a Closure or CFunction"),
        };
        self.check_gc();
        Ok(want)
    }

    pub(super) fn call_native_value(&mut self, f: LuaValue, args_start: usize, nargs: usize) -> LuaResult<usize> {
        let top_before = args_start + nargs;
        self.call_infos.push(CallInfo::new_native(f, args_start, top_before, -1));
        let nf = match f {
            LuaValue::CFunction(nf) => nf,
            LuaValue::Closure(cid) => match self.gc.closure(cid) {
                Closure::Native(nc) => nc.func,
                Closure::Lua(_) => unreachable!("call_native_value only handles native callables"),
            },
            _ => unreachable!("call_native_value only handles native callables"),
        };
        let produced = nf(self, nargs)?;
        self.call_infos.pop();
        Ok(produced)
    }

    /// Pushes a fresh frame for a Lua closure and runs it to completion via
    /// [`Self::exec_frame`]; `RETURN` inside that frame writes its results
    /// straight to `results_base` and pops the frame itself, so there is
    /// nothing left to normalize here.
    fn call_lua(
        &mut self,
        f: LuaValue,
        lc: LuaClosure,
        results_base: usize,
        args_start: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<usize> {
        let proto = lc.proto.clone();
        let varargs = self.adjust_params(args_start, nargs, &proto);
        let frame_top = args_start + proto.max_stack_size as usize;
        self.check_stack_limit(frame_top)?;
        self.set_top(frame_top);
        let mut ci = CallInfo::new_lua(f, args_start, frame_top, nresults, varargs);
        ci.results_base = results_base;
        self.call_infos.push(ci);
        self.exec_frame()
    }

    /// Reconfigures the current (topmost) frame in place for a tail call:
    /// same stack window, same `results_base`/`expected_results`, a fresh
    /// prototype and register ceiling. No new [`CallInfo`] is pushed, so an
    /// unbounded tail-recursive loop runs in constant call-info/Rust-stack
    /// space.
    pub(super) fn setup_lua_frame_in_place(
        &mut self,
        ci_index: usize,
        f: LuaValue,
        lc: LuaClosure,
        base: usize,
        nargs: usize,
    ) -> LuaResult<()> {
        let proto = lc.proto.clone();
        let varargs = self.adjust_params(base, nargs, &proto);
        let frame_top = base + proto.max_stack_size as usize;
        self.check_stack_limit(frame_top)?;
        self.set_top(frame_top);
        let ci = &mut self.call_infos[ci_index];
        ci.func = f;
        ci.top = frame_top;
        ci.saved_pc = 0;
        ci.tailcalls += 1;
        ci.varargs = varargs;
        Ok(())
    }

    /// Pads missing parameters with `nil` / truncates extras into `varargs`
    /// (only kept when `proto.is_vararg`), leaving `top == base + numparams`.
    fn adjust_params(&mut self, base: usize, nargs: usize, proto: &crate::value::Prototype) -> Vec<LuaValue> {
        let numparams = proto.num_params as usize;
        let varargs = if nargs > numparams && proto.is_vararg {
            self.stack[base + numparams..base + nargs].to_vec()
        } else {
            Vec::new()
        };
        self.set_top(base + numparams);
        varargs
    }

    /// Copies (or pads with `nil`) `produced` values sitting at
    /// `first_result_abs` down into `results_base`, leaving exactly `want`
    /// values there and setting `top = results_base + want`. `want` is
    /// `produced` when `wanted < 0` (`MULTRET`), else `wanted`.
    pub(super) fn finish_results(
        &mut self,
        results_base: usize,
        first_result_abs: usize,
        produced: usize,
        wanted: i32,
    ) -> usize {
        let want = if wanted < 0 { produced } else { wanted as usize };
        for i in 0..want {
            let v = if i < produced {
                self.get_stack(first_result_abs + i)
            } else {
                LuaValue::nil()
            };
            if results_base + i != first_result_abs + i {
                self.set_stack(results_base + i, v);
            }
        }
        self.set_top(results_base + want);
        want
    }
}
