//! Host-facing stack API. Every operation here is index-based rather than reference
//! based: a positive index counts up from the currently running call's
//! `base`, a negative index counts down from the stack's current top, and
//! an index at or below [`GLOBALSINDEX`] names one of a handful of
//! pseudo-slots that never actually live in the value stack.
//!
//! This crate has no distinct `_ENV` upvalue — globals are read directly by
//! the `GetGlobal`/`SetGlobal` opcodes rather than through an upvalue
//! indirection — so [`ENVIRONINDEX`] and [`GLOBALSINDEX`] both resolve to
//! the same table; there is nothing for `lua_replace(ENVIRONINDEX)` to
//! usefully do, so it is a no-op here. `NativeClosure` carries no upvalues
//! of its own, so [`upvalueindex`] only ever resolves to live data for a
//! running Lua closure; against a native function it reads back `nil`.

use crate::error::LuaError;
use crate::value::{Closure, LuaTable, LuaType, LuaValue, TableId, UserdataId};
use crate::LuaResult;

use super::state::type_name;
use super::LuaState;

pub const REGISTRYINDEX: i32 = -10000;
pub const ENVIRONINDEX: i32 = -10001;
pub const GLOBALSINDEX: i32 = -10002;

/// The pseudo-index naming a running closure's `i`-th upvalue (1-based).
pub fn upvalueindex(i: i32) -> i32 {
    GLOBALSINDEX - i
}

/// One fetched frame of `getstack`/`getinfo` — debug stubs with no
/// counterpart to the full `debug` library, just enough to name "where am
/// I" for an error handler.
#[derive(Debug, Clone)]
pub struct DebugInfo {
    pub source: String,
    pub what: &'static str,
    pub is_native: bool,
}

enum Slot {
    Stack(usize),
    Registry,
    Globals,
    Upvalue(usize),
}

impl LuaState {
    fn resolve(&self, idx: i32) -> Slot {
        if idx == REGISTRYINDEX {
            Slot::Registry
        } else if idx == ENVIRONINDEX || idx == GLOBALSINDEX {
            Slot::Globals
        } else if idx < GLOBALSINDEX {
            Slot::Upvalue((GLOBALSINDEX - idx) as usize)
        } else {
            let base = self.current_ci().base;
            let abs = if idx > 0 {
                base as i32 + idx - 1
            } else {
                self.top() as i32 + idx
            };
            Slot::Stack(abs.max(0) as usize)
        }
    }

    fn running_upvalue(&self, i: usize) -> LuaValue {
        if i == 0 {
            return LuaValue::nil();
        }
        match self.current_ci().func {
            LuaValue::Closure(cid) => match self.gc.closure(cid) {
                Closure::Lua(lc) => lc
                    .upvalues
                    .get(i - 1)
                    .map(|uv| self.upvalue_get(*uv))
                    .unwrap_or_else(LuaValue::nil),
                Closure::Native(_) => LuaValue::nil(),
            },
            _ => LuaValue::nil(),
        }
    }

    fn set_running_upvalue(&mut self, i: usize, v: LuaValue) {
        if i == 0 {
            return;
        }
        let func = self.current_ci().func;
        if let LuaValue::Closure(cid) = func {
            let uv = match self.gc.closure(cid) {
                Closure::Lua(lc) => lc.upvalues.get(i - 1).copied(),
                Closure::Native(_) => None,
            };
            if let Some(uv) = uv {
                self.upvalue_set(uv, v);
            }
        }
    }

    fn intern(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.gc.intern_string(s))
    }

    /// Reads the value at `idx` without touching the stack (`nil` past the
    /// current top, for any pseudo-index that has none).
    pub fn get_value(&self, idx: i32) -> LuaValue {
        match self.resolve(idx) {
            Slot::Stack(abs) => self.stack.get(abs).copied().unwrap_or_else(LuaValue::nil),
            Slot::Registry => LuaValue::Table(self.registry),
            Slot::Globals => LuaValue::Table(self.globals),
            Slot::Upvalue(i) => self.running_upvalue(i),
        }
    }

    /// Writes `v` at `idx`, growing the stack with `nil`s if `idx` names a
    /// slot past the current top. A no-op against the registry/globals
    /// pseudo-slots — wholesale replacement of either table has no
    /// representation in this crate's `LuaState`.
    pub fn set_value(&mut self, idx: i32, v: LuaValue) {
        match self.resolve(idx) {
            Slot::Stack(abs) => {
                if abs >= self.stack.len() {
                    self.stack.resize(abs + 1, LuaValue::nil());
                }
                self.stack[abs] = v;
            }
            Slot::Registry | Slot::Globals => {}
            Slot::Upvalue(i) => self.set_running_upvalue(i, v),
        }
    }

    /// Number of values on the current call's stack window (`top`).
    pub fn stack_top(&self) -> i32 {
        (self.top() - self.current_ci().base) as i32
    }

    /// Sets the current window's top, padding with `nil` when growing
    /// (`settop`).
    pub fn set_stack_top(&mut self, idx: i32) {
        let base = self.current_ci().base;
        let new_top = if idx >= 0 {
            base + idx as usize
        } else {
            (self.top() as i32 + idx).max(base as i32) as usize
        };
        if new_top > self.top() {
            for _ in self.top()..new_top {
                self.push(LuaValue::nil());
            }
        } else {
            self.set_top(new_top);
        }
    }

    /// Pushes a copy of the value at `idx` (`pushvalue`).
    pub fn push_index(&mut self, idx: i32) {
        let v = self.get_value(idx);
        self.push(v);
    }

    /// Removes the value at `idx`, shifting everything above it down one
    /// slot (`remove`).
    pub fn remove_index(&mut self, idx: i32) {
        if let Slot::Stack(abs) = self.resolve(idx) {
            if abs < self.stack.len() {
                self.stack.remove(abs);
            }
        }
    }

    /// Pops the top value and inserts it at `idx`, shifting the rest of the
    /// window up one slot (`insert`).
    pub fn insert_at(&mut self, idx: i32) {
        let v = self.pop();
        if let Slot::Stack(abs) = self.resolve(idx) {
            let abs = abs.min(self.stack.len());
            self.stack.insert(abs, v);
        }
    }

    /// Pops the top value and stores it at `idx` in place (`replace`).
    pub fn replace_at(&mut self, idx: i32) {
        let v = self.pop();
        self.set_value(idx, v);
    }

    /// Whether `extra` more slots can be pushed without exceeding
    /// [`super::VmLimits::max_stack_size`] (`checkstack`).
    pub fn check_stack(&mut self, extra: usize) -> bool {
        self.check_stack_limit(self.top() + extra).is_ok()
    }

    pub fn type_at(&self, idx: i32) -> LuaType {
        self.get_value(idx).lua_type()
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        self.get_value(idx).is_nil()
    }

    // -- conversions --------------------------------------------------

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.tonumber(self.get_value(idx)).and_then(|v| v.as_float())
    }

    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        let v = self.get_value(idx);
        v.as_integer().or_else(|| self.tonumber(v).and_then(|n| n.as_integer()))
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.get_value(idx).is_truthy()
    }

    /// `tolstring`: coerces via `__tostring`/number formatting, same
    /// fallback chain as the `tostring` builtin.
    pub fn to_lstring(&mut self, idx: i32) -> LuaResult<String> {
        let v = self.get_value(idx);
        self.tostring(v)
    }

    pub fn obj_len(&mut self, idx: i32) -> LuaResult<LuaValue> {
        let v = self.get_value(idx);
        self.length_of(v)
    }

    pub fn to_cfunction(&self, idx: i32) -> Option<crate::value::CFunction> {
        match self.get_value(idx) {
            LuaValue::CFunction(f) => Some(f),
            LuaValue::Closure(cid) => match self.gc.closure(cid) {
                Closure::Native(nc) => Some(nc.func),
                Closure::Lua(_) => None,
            },
            _ => None,
        }
    }

    pub fn to_userdata(&self, idx: i32) -> Option<UserdataId> {
        match self.get_value(idx) {
            LuaValue::Userdata(id) => Some(id),
            _ => None,
        }
    }

    // -- pushers --------------------------------------------------------

    pub fn push_nil(&mut self) {
        self.push(LuaValue::nil());
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.push(LuaValue::Boolean(b));
    }

    pub fn push_integer(&mut self, n: i64) {
        self.push(LuaValue::Integer(n));
    }

    pub fn push_number(&mut self, n: f64) {
        self.push(LuaValue::Number(n));
    }

    pub fn push_string(&mut self, s: &str) {
        let v = self.intern(s);
        self.push(v);
    }

    pub fn push_cfunction(&mut self, f: crate::value::CFunction) {
        self.push(LuaValue::CFunction(f));
    }

    /// Allocates a fresh table, pushes it, and returns its id
    /// (`createtable`/`newtable`).
    pub fn push_new_table(&mut self, narray: usize, nhash: usize) -> TableId {
        let id = self.gc.alloc_table(LuaTable::with_size_hints(narray, nhash));
        self.push(LuaValue::Table(id));
        id
    }

    // -- table access -----------------------------------------------------

    /// `gettable`: pops a key, indexes `t = get_value(idx)` through
    /// `__index`, pushes the result.
    pub fn get_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.get_value(idx);
        let k = self.pop();
        let v = self.index_get(t, k)?;
        self.push(v);
        Ok(())
    }

    /// `settable`: pops a value then a key, assigns into `t = get_value(idx)`
    /// through `__newindex`.
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.get_value(idx);
        let v = self.pop();
        let k = self.pop();
        self.index_set(t, k, v)
    }

    pub fn get_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let t = self.get_value(idx);
        let k = self.intern(name);
        let v = self.index_get(t, k)?;
        self.push(v);
        Ok(())
    }

    pub fn set_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let t = self.get_value(idx);
        let k = self.intern(name);
        let v = self.pop();
        self.index_set(t, k, v)
    }

    fn require_table(&mut self, v: LuaValue) -> LuaResult<TableId> {
        v.as_table()
            .ok_or_else(|| self.raise_string(format!("attempt to index a {} value", type_name(v))))
    }

    /// `rawget`: pops a key, bypasses `__index` entirely.
    pub fn raw_get_index(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.get_value(idx);
        let k = self.pop();
        let tid = self.require_table(t)?;
        let v = self.raw_get(tid, k.normalize_key());
        self.push(v);
        Ok(())
    }

    /// `rawset`: pops a value then a key, bypasses `__newindex` entirely.
    pub fn raw_set_index(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.get_value(idx);
        let v = self.pop();
        let k = self.pop();
        let tid = self.require_table(t)?;
        self.raw_set(tid, k.normalize_key(), v)
    }

    /// `getmetatable`: pushes `t`'s metatable and returns `true`, or leaves
    /// the stack untouched and returns `false` if it has none.
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        let v = self.get_value(idx);
        match self.metatable_of(v) {
            Some(mt) => {
                self.push(LuaValue::Table(mt));
                true
            }
            None => false,
        }
    }

    /// `setmetatable`: pops a table (or `nil`, to clear) and attaches it to
    /// `get_value(idx)`.
    pub fn set_metatable(&mut self, idx: i32) {
        let v = self.get_value(idx);
        let mt = self.pop();
        self.set_metatable_of(v, mt.as_table());
    }

    // -- execution --------------------------------------------------------

    /// `call`: the value at `top - nargs - 1` is the function, the `nargs`
    /// values above it are arguments; both are consumed and replaced in
    /// place by however many results `nresults` asks for (`-1` for all of
    /// them), same layout `lua_call` uses.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> LuaResult<usize> {
        let func_idx = self.top() - nargs - 1;
        let f = self.get_stack(func_idx);
        let produced = self.call_value(f, nargs, nresults)?;
        for i in 0..produced {
            let v = self.get_stack(func_idx + 1 + i);
            self.set_stack(func_idx + i, v);
        }
        self.set_top(func_idx + produced);
        Ok(produced)
    }

    /// `pcall`: like [`Self::call`], but a raised error unwinds back to the
    /// function's slot, leaves the error object there, and reports the
    /// failure as a status code instead of propagating `Err`.
    pub fn pcall(&mut self, nargs: usize, nresults: i32) -> crate::error::StatusCode {
        let func_idx = self.top() - nargs - 1;
        let call_depth = self.call_depth();
        match self.call(nargs, nresults) {
            Ok(_) => crate::error::StatusCode::Ok,
            Err(e) => {
                self.unwind_to(call_depth, func_idx);
                let payload = e.payload(&mut self.gc);
                self.push(payload);
                e.status_code()
            }
        }
    }

    /// `error`: pops the top value and raises it, same payload the
    /// `error()` builtin constructs.
    pub fn raise_top(&mut self) -> LuaError {
        let v = self.pop();
        self.raise_value(v)
    }

    /// `next`: pops a key, pushes the next key/value pair after it in
    /// `get_value(idx)`'s iteration order. Returns `false` (stack
    /// untouched beyond the popped key) once iteration is exhausted.
    pub fn next_key(&mut self, idx: i32) -> LuaResult<bool> {
        let t = self.get_value(idx);
        let k = self.pop();
        let tid = self.require_table(t)?;
        match self.gc.table(tid).next(&k.normalize_key()) {
            Some((nk, nv)) => {
                self.push(nk);
                self.push(nv);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `concat`: pops the top `n` values and pushes their concatenation,
    /// honoring `__concat` the same way the bytecode `CONCAT` instruction
    /// does.
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        let start = self.top() - n;
        let values: Vec<LuaValue> = (start..self.top()).map(|i| self.get_stack(i)).collect();
        let result = self.concat_range(&values)?;
        self.set_top(start);
        self.push(result);
        Ok(())
    }

    // -- minimal debug introspection --------------------------------------

    /// `getstack`/`getinfo`: `level` 0 is the currently running frame, 1 its
    /// caller, and so on. No line-number or upvalue-name detail — just
    /// enough for an error handler to say where it is.
    pub fn debug_frame(&self, level: usize) -> Option<DebugInfo> {
        let idx = self.call_infos.len().checked_sub(level + 1)?;
        let ci = &self.call_infos[idx];
        Some(DebugInfo {
            source: self.chunk_name.clone(),
            what: if ci.is_native { "C" } else { "Lua" },
            is_native: ci.is_native,
        })
    }
}
