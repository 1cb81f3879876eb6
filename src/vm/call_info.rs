//! Per-call frame bookkeeping.

use crate::value::LuaValue;

/// One active invocation. `base` is the register window's first slot
/// (stack index of local register 0); `top` is this frame's stack ceiling.
/// `saved_pc` is meaningless for a native (`CFunction`) call — those run to
/// completion without re-entering the dispatch loop.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub func: LuaValue,
    pub base: usize,
    pub top: usize,
    pub saved_pc: usize,
    /// Absolute stack slot `RETURN`/a tail call's native branch writes its
    /// (padded/truncated) results to. Equal to `base` for a host-initiated
    /// [`crate::vm::LuaState::call_value`] (no function slot on the stack);
    /// one slot below `base` for a bytecode `CALL`/`TAILCALL`, where that
    /// slot held the function value itself.
    pub results_base: usize,
    /// `-1` means "however many the callee produced" (the `CALL`
    /// instruction's `C == 0` / `RETURN`'s `B == 0` conventions bottom out
    /// here); otherwise the exact count the caller is adjusting to.
    pub expected_results: i32,
    /// Incremented on every tail call that reuses this frame, purely for
    /// diagnostics/introspection.
    pub tailcalls: u32,
    /// Extra arguments beyond `numparams`, for a vararg Lua function's
    /// `VARARG` instruction to read back.
    pub varargs: Vec<LuaValue>,
    pub is_native: bool,
}

impl CallInfo {
    pub fn new_lua(func: LuaValue, base: usize, top: usize, expected_results: i32, varargs: Vec<LuaValue>) -> Self {
        CallInfo {
            func,
            base,
            top,
            saved_pc: 0,
            results_base: base,
            expected_results,
            tailcalls: 0,
            varargs,
            is_native: false,
        }
    }

    pub fn new_native(func: LuaValue, base: usize, top: usize, expected_results: i32) -> Self {
        CallInfo {
            func,
            base,
            top,
            saved_pc: 0,
            results_base: base,
            expected_results,
            tailcalls: 0,
            varargs: Vec::new(),
            is_native: true,
        }
    }
}
