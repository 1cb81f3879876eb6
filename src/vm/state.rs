//! The interpreter thread: owns the value stack, the call-info stack, the
//! open-upvalue list, and (for this single-interpreter-per-process crate)
//! the global state that would otherwise be shared between threads —
//! there being only ever one thread, the two are folded into one struct
//! rather than split the way a coroutine-capable implementation would
//! need to.

use super::call_info::CallInfo;
use super::limits::VmLimits;
use super::metamethods::{MetaNames, Metamethod};
use crate::error::LuaError;
use crate::gc::{Gc, GcParams, GcState};
use crate::value::{Closure, GcRef, LuaTable, LuaType, LuaValue, StringId, TableId, Upvalue, UpvalueId};
use crate::LuaResult;

pub struct LuaState {
    pub gc: Gc,
    pub globals: TableId,
    pub registry: TableId,
    pub(super) type_metatables: [Option<TableId>; 8],
    pub(super) meta_names: MetaNames,
    pub(super) stack: Vec<LuaValue>,
    pub(super) call_infos: Vec<CallInfo>,
    /// Open upvalues for this thread, kept sorted by descending
    /// `stack_index` so "close everything at or above L" is a prefix scan.
    pub(super) open_upvalues: Vec<UpvalueId>,
    pub limits: VmLimits,
    /// Name under which the currently-running chunk was compiled, used as a
    /// fallback when an error needs `source:line:` formatting but there is
    /// no active Lua frame (e.g. a native function called directly from the
    /// host raises before any Lua code ran).
    pub chunk_name: String,
}

impl LuaState {
    pub fn new() -> Self {
        Self::with_config(GcParams::default(), VmLimits::default())
    }

    pub fn with_config(gc_params: GcParams, limits: VmLimits) -> Self {
        let mut gc = Gc::new();
        gc.params = gc_params;
        let globals = gc.alloc_table(LuaTable::new());
        let registry = gc.alloc_table(LuaTable::new());
        LuaState {
            gc,
            globals,
            registry,
            type_metatables: Default::default(),
            meta_names: MetaNames::default(),
            stack: Vec::with_capacity(256),
            call_infos: Vec::with_capacity(64),
            open_upvalues: Vec::new(),
            limits,
            chunk_name: "?".to_string(),
        }
    }

    // ---- raw stack access ----

    pub fn top(&self) -> usize {
        self.stack.len()
    }

    pub fn set_top(&mut self, n: usize) {
        if n < self.stack.len() {
            self.stack.truncate(n);
        } else {
            self.stack.resize(n, LuaValue::Nil);
        }
    }

    pub fn push(&mut self, v: LuaValue) {
        self.stack.push(v);
    }

    pub fn pop(&mut self) -> LuaValue {
        self.stack.pop().unwrap_or(LuaValue::Nil)
    }

    pub fn get_stack(&self, idx: usize) -> LuaValue {
        self.stack.get(idx).copied().unwrap_or(LuaValue::Nil)
    }

    pub fn set_stack(&mut self, idx: usize, v: LuaValue) {
        if idx >= self.stack.len() {
            self.stack.resize(idx + 1, LuaValue::Nil);
        }
        self.stack[idx] = v;
    }

    /// Ensures at least `extra` free slots above the current top are
    /// addressable. Callers that need a hard ceiling check call
    /// [`Self::check_stack_limit`] explicitly; this just reserves capacity.
    pub fn ensure_stack(&mut self, extra: usize) {
        let want = self.stack.len() + extra;
        if want > self.stack.capacity() {
            self.stack.reserve(want.next_power_of_two() - self.stack.len());
        }
    }

    pub fn check_stack_limit(&self, want_len: usize) -> LuaResult<()> {
        if want_len > self.limits.max_stack_slots {
            return Err(self.runtime_error_str("stack overflow"));
        }
        Ok(())
    }

    // ---- call-info ----

    pub fn current_ci(&self) -> &CallInfo {
        self.call_infos.last().expect("no active call frame")
    }

    pub fn current_ci_mut(&mut self) -> &mut CallInfo {
        self.call_infos.last_mut().expect("no active call frame")
    }

    pub fn call_depth(&self) -> usize {
        self.call_infos.len()
    }

    /// Register `r` of the current frame, as an absolute stack index.
    #[inline(always)]
    pub fn reg_index(&self, r: u32) -> usize {
        self.current_ci().base + r as usize
    }

    #[inline(always)]
    pub fn reg(&self, r: u32) -> LuaValue {
        self.get_stack(self.reg_index(r))
    }

    #[inline(always)]
    pub fn set_reg(&mut self, r: u32, v: LuaValue) {
        let idx = self.reg_index(r);
        self.set_stack(idx, v);
    }

    // ---- globals ----

    pub fn get_global_str(&mut self, name: StringId) -> LuaResult<LuaValue> {
        let g = LuaValue::Table(self.globals);
        self.index_get(g, LuaValue::String(name))
    }

    pub fn set_global_str(&mut self, name: StringId, v: LuaValue) -> LuaResult<()> {
        let g = LuaValue::Table(self.globals);
        self.index_set(g, LuaValue::String(name), v)
    }

    pub fn set_global(&mut self, name: &str, v: LuaValue) -> LuaResult<()> {
        let id = self.gc.intern_string(name);
        self.set_global_str(id, v)
    }

    pub fn get_global(&mut self, name: &str) -> LuaResult<LuaValue> {
        let id = self.gc.intern_string(name);
        self.get_global_str(id)
    }

    // ---- errors ----

    /// Formats `source:line:` using the innermost Lua frame's prototype and
    /// current pc; falls back to the top-level chunk name if no Lua frame is
    /// active (e.g. a native function raising before any bytecode ran).
    pub fn error_location(&self) -> String {
        for ci in self.call_infos.iter().rev() {
            if ci.is_native {
                continue;
            }
            if let LuaValue::Closure(cid) = ci.func {
                if let Closure::Lua(lc) = self.gc.closure(cid) {
                    let source = self.gc.string(lc.proto.source_name).as_str().to_string();
                    let line = lc
                        .proto
                        .line_info
                        .get(ci.saved_pc.saturating_sub(1))
                        .copied()
                        .unwrap_or(lc.proto.line_defined);
                    return format!("{source}:{line}");
                }
            }
        }
        format!("{}:?", self.chunk_name)
    }

    /// Raises without interning a string (no `&mut Gc` available to the
    /// caller, or the stack is already too deep to risk another
    /// allocation); the payload a `pcall` site would see is `nil` rather
    /// than the message text.
    pub fn runtime_error_str(&self, msg: impl std::fmt::Display) -> LuaError {
        let full = format!("{}: {}", self.error_location(), msg);
        LuaError::Runtime {
            value: LuaValue::Nil,
            display: full,
        }
    }

    /// Raises a string-valued runtime error, the common case.
    pub fn raise_string(&mut self, msg: impl std::fmt::Display) -> LuaError {
        let full = format!("{}: {}", self.error_location(), msg);
        let sid = self.gc.intern_string(&full);
        LuaError::raised(LuaValue::String(sid), full)
    }

    /// Raises an arbitrary value, as `error(v)` does.
    pub fn raise_value(&mut self, v: LuaValue) -> LuaError {
        let display = self.tostring_basic(v);
        LuaError::raised(v, display)
    }

    // ---- GC barriers / driving ----

    pub fn barrier_table_child(&mut self, t: TableId, child: LuaValue) {
        if matches!(child, LuaValue::Nil | LuaValue::Boolean(_) | LuaValue::Integer(_) | LuaValue::Number(_)) {
            return;
        }
        self.gc.barrier_back(t);
    }

    pub fn barrier_forward_value(&mut self, parent: GcRef, child: LuaValue) {
        let child_ref = match child {
            LuaValue::String(s) => GcRef::String(s),
            LuaValue::Table(t) => GcRef::Table(t),
            LuaValue::Closure(c) => GcRef::Closure(c),
            LuaValue::Userdata(u) => GcRef::Userdata(u),
            LuaValue::Thread(t) => GcRef::Thread(t),
            _ => return,
        };
        self.gc.barrier_forward(parent, child_ref);
    }

    /// Mark-phase GC root set: the globals/registry tables, every value
    /// reachable on the stack, and every active call's closure.
    fn mark_roots(&mut self) {
        self.gc.mark_value(LuaValue::Table(self.globals));
        self.gc.mark_value(LuaValue::Table(self.registry));
        for i in 0..self.stack.len() {
            self.gc.mark_value(self.stack[i]);
        }
        for ci in &self.call_infos {
            let f = ci.func;
            self.gc.mark_value(f);
            for v in &ci.varargs {
                self.gc.mark_value(*v);
            }
        }
        for mt in self.type_metatables.iter().flatten() {
            self.gc.mark_value(LuaValue::Table(*mt));
        }
    }

    /// Runs one incremental GC step, driving the state machine forward by
    /// one bounded unit of work. Called at every allocation checkpoint:
    /// `NEWTABLE`, `CONCAT`, `CLOSURE`, `SETLIST`, and call epilogue.
    pub fn check_gc(&mut self) {
        if self.gc.should_start_cycle() {
            log::debug!("gc: beginning cycle at {} bytes", self.gc.total_bytes);
            self.gc.begin_cycle();
            self.mark_roots();
        }
        match self.gc.state {
            GcState::Pause => {}
            GcState::Propagate => {
                let budget = self.gc.step_budget();
                self.gc.propagate_step(budget);
                if self.gc.is_gray_empty() {
                    // Atomic phase: re-mark roots once more (stacks may have
                    // changed since `begin_cycle`), drain grayagain, then
                    // resolve weak tables before sweeping.
                    self.mark_roots();
                    self.gc.requeue_gray_again();
                    while !self.gc.is_gray_empty() {
                        self.gc.propagate_step(usize::MAX);
                    }
                    self.gc.resolve_weak_tables();
                    log::trace!("gc: entering sweepstring");
                    self.gc.enter_sweep_string();
                }
            }
            GcState::SweepString => {
                if self.gc.sweep_string_step(self.gc.params.sweep_step_size) {
                    log::trace!("gc: entering sweep");
                    self.gc.enter_sweep();
                }
            }
            GcState::Sweep => {
                if self.gc.sweep_step(self.gc.params.sweep_step_size) {
                    log::trace!("gc: entering finalize");
                    self.gc.enter_finalize();
                }
            }
            GcState::Finalize => {
                if let Some(id) = self.gc.next_finalizer() {
                    self.run_finalizer(id);
                } else {
                    log::debug!(
                        "gc: cycle complete, {} objects freed, {} bytes live",
                        self.gc.stats.objects_freed,
                        self.gc.total_bytes
                    );
                    self.gc.end_cycle();
                }
            }
        }
    }

    fn run_finalizer(&mut self, id: crate::value::UserdataId) {
        let gc_fn = self.get_metamethod(LuaValue::Userdata(id), Metamethod::Gc);
        if gc_fn.is_callable() {
            let save_top = self.top();
            self.push(LuaValue::Userdata(id));
            if let Err(e) = self.call_value(gc_fn, 1, 0) {
                log::warn!("error in __gc finalizer: {e}");
            }
            self.set_top(save_top);
        }
        self.gc.finish_finalizing(id);
    }

    // ---- upvalues ----

    /// Finds (or creates) the open upvalue referencing `stack_index`,
    /// keeping [`Self::open_upvalues`] sorted descending so
    /// [`Self::close_upvalues_from`] is a simple prefix walk.
    pub fn find_or_create_upvalue(&mut self, stack_index: usize) -> UpvalueId {
        let pos = self
            .open_upvalues
            .iter()
            .position(|id| matches!(self.gc.upvalue(*id), Upvalue::Open { stack_index: s } if *s == stack_index));
        if let Some(p) = pos {
            return self.open_upvalues[p];
        }
        let id = self.gc.alloc_upvalue(Upvalue::Open { stack_index });
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|other| match self.gc.upvalue(*other) {
                Upvalue::Open { stack_index: s } => *s < stack_index,
                Upvalue::Closed(_) => false,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, id);
        id
    }

    /// Closes every open upvalue at or above `level`.
    pub fn close_upvalues_from(&mut self, level: usize) {
        self.open_upvalues.retain(|id| {
            let stack_index = match self.gc.upvalue(*id) {
                Upvalue::Open { stack_index } => *stack_index,
                Upvalue::Closed(_) => return false,
            };
            if stack_index >= level {
                let value = self.get_stack(stack_index);
                *self.gc.upvalue_mut(*id) = Upvalue::Closed(value);
                false
            } else {
                true
            }
        });
    }

    pub fn upvalue_get(&self, id: UpvalueId) -> LuaValue {
        match self.gc.upvalue(id) {
            Upvalue::Open { stack_index } => self.get_stack(*stack_index),
            Upvalue::Closed(v) => *v,
        }
    }

    pub fn upvalue_set(&mut self, id: UpvalueId, v: LuaValue) {
        let stack_index = match self.gc.upvalue(id) {
            Upvalue::Open { stack_index } => Some(*stack_index),
            Upvalue::Closed(_) => None,
        };
        match stack_index {
            Some(idx) => self.set_stack(idx, v),
            None => {
                *self.gc.upvalue_mut(id) = Upvalue::Closed(v);
            }
        }
        self.gc.barrier_forward(GcRef::Upvalue(id), match v {
            LuaValue::String(s) => GcRef::String(s),
            LuaValue::Table(t) => GcRef::Table(t),
            LuaValue::Closure(c) => GcRef::Closure(c),
            LuaValue::Userdata(u) => GcRef::Userdata(u),
            LuaValue::Thread(t) => GcRef::Thread(t),
            _ => return,
        });
    }

    // ---- indexing with metamethod fallback ----

    /// `t[k]`, following a chain of `__index` tables/functions up to
    /// [`super::limits::VmLimits::max_index_chain`] hops before raising
    /// "loop in gettable".
    pub fn index_get(&mut self, mut t: LuaValue, k: LuaValue) -> LuaResult<LuaValue> {
        for _ in 0..self.limits.max_index_chain {
            if let LuaValue::Table(tid) = t {
                let raw = self.gc.table(tid).get(&k);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                let handler = self.get_metamethod(t, Metamethod::Index);
                match handler {
                    LuaValue::Nil => return Ok(LuaValue::Nil),
                    LuaValue::Closure(_) | LuaValue::CFunction(_) => {
                        return self.call_value_single(handler, &[t, k]);
                    }
                    other => {
                        t = other;
                        continue;
                    }
                }
            } else {
                let handler = self.get_metamethod(t, Metamethod::Index);
                match handler {
                    LuaValue::Nil => {
                        return Err(self.raise_string(format!("attempt to index a {} value", type_name(t))));
                    }
                    LuaValue::Closure(_) | LuaValue::CFunction(_) => {
                        return self.call_value_single(handler, &[t, k]);
                    }
                    other => {
                        t = other;
                        continue;
                    }
                }
            }
        }
        Err(self.raise_string("'__index' chain too long; possible loop"))
    }

    /// `t[k] = v`, following `__newindex` the same way.
    pub fn index_set(&mut self, mut t: LuaValue, k: LuaValue, v: LuaValue) -> LuaResult<()> {
        for _ in 0..self.limits.max_index_chain {
            if let LuaValue::Table(tid) = t {
                let exists = !self.gc.table(tid).get(&k).is_nil();
                if exists {
                    self.raw_set_checked(tid, k, v)?;
                    return Ok(());
                }
                let handler = self.get_metamethod(t, Metamethod::NewIndex);
                match handler {
                    LuaValue::Nil => {
                        self.raw_set_checked(tid, k, v)?;
                        return Ok(());
                    }
                    LuaValue::Closure(_) | LuaValue::CFunction(_) => {
                        let save = self.top();
                        self.push(t);
                        self.push(k);
                        self.push(v);
                        self.call_value(handler, 3, 0)?;
                        self.set_top(save);
                        return Ok(());
                    }
                    other => {
                        t = other;
                        continue;
                    }
                }
            } else {
                let handler = self.get_metamethod(t, Metamethod::NewIndex);
                match handler {
                    LuaValue::Nil => {
                        return Err(self.raise_string(format!("attempt to index a {} value", type_name(t))));
                    }
                    LuaValue::Closure(_) | LuaValue::CFunction(_) => {
                        let save = self.top();
                        self.push(t);
                        self.push(k);
                        self.push(v);
                        self.call_value(handler, 3, 0)?;
                        self.set_top(save);
                        return Ok(());
                    }
                    other => {
                        t = other;
                        continue;
                    }
                }
            }
        }
        Err(self.raise_string("'__newindex' chain too long; possible loop"))
    }

    fn raw_set_checked(&mut self, t: TableId, k: LuaValue, v: LuaValue) -> LuaResult<()> {
        if !k.is_valid_key() {
            return Err(self.raise_string(if k.is_nil() {
                "table index is nil"
            } else {
                "table index is NaN"
            }));
        }
        self.gc.table_mut(t).raw_set(k, v).ok();
        self.barrier_table_child(t, k);
        self.barrier_table_child(t, v);
        Ok(())
    }

    /// Public raw-set entry for the base library (`rawset`) and the VM's
    /// `SETTABLE`/`SETLIST` opcodes: no `__newindex` lookup.
    pub fn raw_set(&mut self, t: TableId, k: LuaValue, v: LuaValue) -> LuaResult<()> {
        self.raw_set_checked(t, k, v)
    }

    pub fn raw_get(&self, t: TableId, k: LuaValue) -> LuaValue {
        self.gc.table(t).get(&k)
    }

    pub(super) fn call_value_single(&mut self, f: LuaValue, args: &[LuaValue]) -> LuaResult<LuaValue> {
        let save = self.top();
        for a in args {
            self.push(*a);
        }
        let n = self.call_value(f, args.len(), 1)?;
        let result = if n > 0 { self.get_stack(self.top() - 1) } else { LuaValue::Nil };
        self.set_top(save);
        Ok(result)
    }

    /// Closes upvalues above `stack_top`, then truncates the call-info
    /// stack and value stack back to a known-good point — the unwind step
    /// `pcall`/`xpcall` perform after catching an error.
    pub fn unwind_to(&mut self, call_depth: usize, stack_top: usize) {
        self.close_upvalues_from(stack_top);
        self.call_infos.truncate(call_depth);
        self.set_top(stack_top);
    }

    // ---- length / concat / tostring / tonumber ----

    pub fn length_of(&mut self, v: LuaValue) -> LuaResult<LuaValue> {
        match v {
            LuaValue::String(s) => Ok(LuaValue::Integer(self.gc.string(s).len() as i64)),
            LuaValue::Table(t) => {
                let handler = self.get_metamethod(v, Metamethod::Len);
                if handler.is_callable() {
                    self.call_value_single(handler, &[v])
                } else {
                    Ok(LuaValue::Integer(self.gc.table(t).length()))
                }
            }
            other => {
                let handler = self.get_metamethod(other, Metamethod::Len);
                if handler.is_callable() {
                    self.call_value_single(handler, &[other])
                } else {
                    Err(self.raise_string(format!("attempt to get length of a {} value", type_name(other))))
                }
            }
        }
    }

    /// `tostring` without consulting `__tostring` — used internally for
    /// error-message rendering, where calling back into user metamethods
    /// mid-unwind would be surprising.
    pub fn tostring_basic(&self, v: LuaValue) -> String {
        match v {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(n) => format_lua_number(n),
            LuaValue::String(s) => self.gc.string(s).as_str().to_string(),
            LuaValue::Table(t) => format!("table: 0x{:08x}", t.0),
            LuaValue::Closure(c) => format!("function: 0x{:08x}", c.0),
            LuaValue::CFunction(f) => format!("function: builtin#{:p}", f as *const ()),
            LuaValue::Userdata(u) => format!("userdata: 0x{:08x}", u.0),
            LuaValue::Thread(t) => format!("thread: 0x{:08x}", t.0),
        }
    }

    /// Full `tostring`, honoring `__tostring`.
    pub fn tostring(&mut self, v: LuaValue) -> LuaResult<String> {
        let handler = self.get_metamethod(v, Metamethod::ToString);
        if handler.is_callable() {
            let result = self.call_value_single(handler, &[v])?;
            return Ok(self.tostring_basic(result));
        }
        Ok(self.tostring_basic(v))
    }

    pub fn intern_display(&mut self, s: String) -> LuaValue {
        LuaValue::String(self.gc.intern_string(&s))
    }

    /// Converts a value the way Lua's arithmetic coercion and `tonumber`
    /// do: numbers pass through, numeral strings parse.
    pub fn tonumber(&self, v: LuaValue) -> Option<LuaValue> {
        match v {
            LuaValue::Integer(_) | LuaValue::Number(_) => Some(v),
            LuaValue::String(s) => parse_lua_numeral(self.gc.string(s).as_str()),
            _ => None,
        }
    }

    /// Concatenates a run of registers left to right, materializing the
    /// whole run into one buffer and interning once. Falls back to
    /// `__concat`, right-associatively, the first time two adjacent
    /// operands aren't both string/number.
    pub fn concat_range(&mut self, values: &[LuaValue]) -> LuaResult<LuaValue> {
        if values.is_empty() {
            return Ok(self.intern_display(String::new()));
        }
        let mut acc = values[values.len() - 1];
        for &v in values[..values.len() - 1].iter().rev() {
            acc = self.concat_pair(v, acc)?;
        }
        Ok(acc)
    }

    fn concat_pair(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
        if is_concat_coercible(a) && is_concat_coercible(b) {
            let mut s = self.tostring_basic(a);
            s.push_str(&self.tostring_basic(b));
            return Ok(self.intern_display(s));
        }
        let handler = self.get_binop_metamethod(a, b, Metamethod::Concat);
        if handler.is_callable() {
            return self.call_value_single(handler, &[a, b]);
        }
        let bad = if is_concat_coercible(a) { b } else { a };
        Err(self.raise_string(format!("attempt to concatenate a {} value", type_name(bad))))
    }
}

fn is_concat_coercible(v: LuaValue) -> bool {
    matches!(v, LuaValue::String(_) | LuaValue::Integer(_) | LuaValue::Number(_))
}

pub fn type_name(v: LuaValue) -> &'static str {
    match v.lua_type() {
        LuaType::Nil => "nil",
        LuaType::Boolean => "boolean",
        LuaType::Number => "number",
        LuaType::String => "string",
        LuaType::Table => "table",
        LuaType::Function => "function",
        LuaType::Userdata => "userdata",
        LuaType::Thread => "thread",
    }
}

/// Renders a float the way Lua's `LUAI_NUMFMT` (`%.14g`) does: integral
/// values get a trailing `.0` so `tostring` never collapses `2.0` into `2`
/// (which would make it indistinguishable from an integer).
pub fn format_lua_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let mut s = format!("{n:.14e}");
    // `%.14g`-equivalent: prefer plain decimal notation unless the exponent
    // is large, then trim trailing zeros.
    let formatted = format_g(n, 14);
    s.clear();
    s.push_str(&formatted);
    if !s.contains(['.', 'e', 'n', 'i']) {
        s.push_str(".0");
    }
    s
}

fn format_g(n: f64, precision: usize) -> String {
    if n == 0.0 {
        return if n.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    let exp = n.abs().log10().floor() as i32;
    if exp < -4 || exp >= precision as i32 {
        let s = format!("{:.*e}", precision.saturating_sub(1), n);
        trim_exp_notation(&s)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let s = format!("{n:.decimals$}");
        trim_trailing_zeros(&s)
    }
}

fn trim_trailing_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    trimmed.trim_end_matches('.').to_string()
}

fn trim_exp_notation(s: &str) -> String {
    let Some((mantissa, exp)) = s.split_once('e') else {
        return s.to_string();
    };
    let mantissa = trim_trailing_zeros(mantissa);
    let exp_num: i32 = exp.parse().unwrap_or(0);
    format!("{mantissa}e{}{:02}", if exp_num >= 0 { "+" } else { "-" }, exp_num.abs())
}

/// Parses a numeral the way the lexer/`tonumber` do: decimal with optional
/// exponent, or `0x`-prefixed hex.
pub fn parse_lua_numeral(s: &str) -> Option<LuaValue> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (neg, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        let v = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(LuaValue::Integer(if neg { -v } else { v }));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(LuaValue::Integer(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Some(LuaValue::Number(f));
    }
    None
}
