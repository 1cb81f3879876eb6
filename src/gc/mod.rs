//! The incremental tri-color mark-and-sweep collector.
//!
//! States cycle `Pause -> Propagate -> SweepString -> Sweep -> Finalize ->
//! Pause`. Every collectable object lives in one of the arenas in
//! [`object_pool::Pool`] and is referred to everywhere else by a `Copy` id
//! (`TableId`, `StringId`, …) rather than a pointer, so the mark phase is a
//! graph walk over plain data instead of unsafe pointer chasing.
//!
//! Driving the state machine (deciding *when* to call [`Gc::propagate_step`]
//! etc., and supplying the GC roots — the global/registry tables and the
//! live thread stack) is the VM's job: see `crate::vm::LuaState::gc_step`.
//! This module only knows how to mark and sweep; it does not know what a
//! call stack is.

mod object_pool;

use crate::value::{
    Closure, ClosureId, GcRef, LuaStr, LuaTable, LuaValue, Prototype, StringId, TableId, ThreadId,
    Upvalue, UpvalueId, Userdata, UserdataId,
};
use ahash::AHashMap;
use object_pool::Pool;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcColor {
    White0,
    White1,
    Gray,
    Black,
}

#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    pub color: GcColor,
    /// Reserved-keyword / intrinsic strings and a couple of sentinel
    /// objects are `fixed`: never swept.
    pub fixed: bool,
    pub finalized: bool,
}

impl GcHeader {
    fn new_white(current_white: u8) -> Self {
        GcHeader {
            color: if current_white == 0 { GcColor::White0 } else { GcColor::White1 },
            fixed: false,
            finalized: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Pause,
    Propagate,
    SweepString,
    Sweep,
    Finalize,
}

impl GcState {
    /// Phases during which the black-can't-point-to-white invariant must be
    /// preserved by write barriers.
    pub fn keep_invariant(self) -> bool {
        matches!(self, GcState::Propagate)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GcParams {
    /// `gcpause`: cycle threshold as a percentage of bytes live after the
    /// previous cycle.
    pub pause_pct: i32,
    /// `gcstepmul`: scales the per-step work budget.
    pub step_mul_pct: i32,
    /// Objects processed per sweep step.
    pub sweep_step_size: usize,
}

impl Default for GcParams {
    fn default() -> Self {
        GcParams {
            pause_pct: 200,
            step_mul_pct: 200,
            sweep_step_size: 40,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct GcStats {
    pub cycles_completed: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

/// A GC object holding nothing but a marker: the only collectable `Thread`
/// this crate ever creates is the main thread (coroutines are out of
/// scope), but the value model still needs `LuaValue::Thread`
/// and a `ThreadId` to type-check `type(coroutine.running())`-shaped code.
#[derive(Debug, Default)]
pub struct ThreadMarker;

pub struct Gc {
    pub strings: Pool<LuaStr>,
    pub tables: Pool<LuaTable>,
    pub closures: Pool<Closure>,
    pub upvalues: Pool<Upvalue>,
    pub userdata: Pool<Userdata>,
    pub threads: Pool<ThreadMarker>,

    /// content-hash -> interned string id: hash of (len, content-bytes)
    /// maps to a bucket, linear walk for equality.
    string_intern: AHashMap<u64, Vec<StringId>>,

    pub state: GcState,
    pub current_white: u8,
    gray: Vec<GcRef>,
    gray_again: Vec<GcRef>,
    weak_tables: Vec<TableId>,

    string_sweep_cursor: usize,
    table_sweep_cursor: usize,
    closure_sweep_cursor: usize,
    upvalue_sweep_cursor: usize,
    userdata_sweep_cursor: usize,

    pending_finalizers: VecDeque<UserdataId>,

    pub params: GcParams,
    pub total_bytes: isize,
    pub gc_debt: isize,
    threshold: isize,
    pub stats: GcStats,
}

impl Gc {
    pub fn new() -> Self {
        let mut gc = Gc {
            strings: Pool::default(),
            tables: Pool::default(),
            closures: Pool::default(),
            upvalues: Pool::default(),
            userdata: Pool::default(),
            threads: Pool::default(),
            string_intern: AHashMap::default(),
            state: GcState::Pause,
            current_white: 0,
            gray: Vec::new(),
            gray_again: Vec::new(),
            weak_tables: Vec::new(),
            string_sweep_cursor: 0,
            table_sweep_cursor: 0,
            closure_sweep_cursor: 0,
            upvalue_sweep_cursor: 0,
            userdata_sweep_cursor: 0,
            pending_finalizers: VecDeque::new(),
            params: GcParams::default(),
            total_bytes: 0,
            gc_debt: 0,
            threshold: 1 << 16,
            stats: GcStats::default(),
        };
        // The out-of-memory message must survive even a GC run triggered
        // by the allocation that would report it.
        let oom = gc.intern_string("not enough memory");
        gc.fix_string(oom);
        gc
    }

    fn current_white_color(&self) -> GcColor {
        if self.current_white == 0 {
            GcColor::White0
        } else {
            GcColor::White1
        }
    }

    fn is_current_white(&self, color: GcColor) -> bool {
        match self.current_white {
            0 => matches!(color, GcColor::White0),
            _ => matches!(color, GcColor::White1),
        }
    }

    fn header(&self, r: GcRef) -> GcHeader {
        match r {
            GcRef::String(id) => *self.strings.header(id.0).expect("dangling string id"),
            GcRef::Table(id) => *self.tables.header(id.0).expect("dangling table id"),
            GcRef::Closure(id) => *self.closures.header(id.0).expect("dangling closure id"),
            GcRef::Upvalue(id) => *self.upvalues.header(id.0).expect("dangling upvalue id"),
            GcRef::Userdata(id) => *self.userdata.header(id.0).expect("dangling userdata id"),
            GcRef::Thread(id) => *self.threads.header(id.0).expect("dangling thread id"),
        }
    }

    fn set_color(&mut self, r: GcRef, color: GcColor) {
        let h = match r {
            GcRef::String(id) => self.strings.header_mut(id.0),
            GcRef::Table(id) => self.tables.header_mut(id.0),
            GcRef::Closure(id) => self.closures.header_mut(id.0),
            GcRef::Upvalue(id) => self.upvalues.header_mut(id.0),
            GcRef::Userdata(id) => self.userdata.header_mut(id.0),
            GcRef::Thread(id) => self.threads.header_mut(id.0),
        };
        if let Some(h) = h {
            h.color = color;
        }
    }

    pub fn is_black(&self, r: GcRef) -> bool {
        self.header(r).color == GcColor::Black
    }

    pub fn is_white(&self, r: GcRef) -> bool {
        matches!(self.header(r).color, GcColor::White0 | GcColor::White1)
    }

    fn is_dead_white(&self, r: GcRef) -> bool {
        let h = self.header(r);
        !h.fixed && self.is_white(r) && !self.is_current_white(h.color)
    }

    // ---- allocation ----

    pub fn intern_string(&mut self, s: &str) -> StringId {
        let hash = crate::value::hash_bytes(s.as_bytes());
        let mut found = None;
        if let Some(candidates) = self.string_intern.get(&hash) {
            for &id in candidates {
                if let Some(existing) = self.strings.get(id.0) {
                    if existing.as_str() == s {
                        found = Some(id);
                        break;
                    }
                }
            }
        }
        if let Some(id) = found {
            // Resurrect a dead-white string discovered alive again before
            // the sweeper reached it.
            let color = self.current_white_color();
            if let Some(h) = self.strings.header_mut(id.0) {
                h.color = color;
            }
            return id;
        }
        let id = StringId(self.strings.insert(LuaStr::new(s, hash), self.current_white));
        self.string_intern.entry(hash).or_default().push(id);
        self.total_bytes += s.len() as isize + 32;
        id
    }

    pub fn fix_string(&mut self, id: StringId) {
        if let Some(h) = self.strings.header_mut(id.0) {
            h.fixed = true;
        }
    }

    pub fn alloc_table(&mut self, table: LuaTable) -> TableId {
        self.total_bytes += 64;
        TableId(self.tables.insert(table, self.current_white))
    }

    pub fn alloc_closure(&mut self, closure: Closure) -> ClosureId {
        self.total_bytes += 48;
        ClosureId(self.closures.insert(closure, self.current_white))
    }

    pub fn alloc_upvalue(&mut self, upvalue: Upvalue) -> UpvalueId {
        self.total_bytes += 24;
        UpvalueId(self.upvalues.insert(upvalue, self.current_white))
    }

    pub fn alloc_userdata(&mut self, userdata: Userdata) -> UserdataId {
        self.total_bytes += 32;
        UserdataId(self.userdata.insert(userdata, self.current_white))
    }

    pub fn alloc_thread(&mut self) -> ThreadId {
        ThreadId(self.threads.insert(ThreadMarker, self.current_white))
    }

    // ---- accessors ----

    pub fn table(&self, id: TableId) -> &LuaTable {
        self.tables.get(id.0).expect("dangling table id")
    }
    pub fn table_mut(&mut self, id: TableId) -> &mut LuaTable {
        self.tables.get_mut(id.0).expect("dangling table id")
    }
    pub fn string(&self, id: StringId) -> &LuaStr {
        self.strings.get(id.0).expect("dangling string id")
    }
    pub fn closure(&self, id: ClosureId) -> &Closure {
        self.closures.get(id.0).expect("dangling closure id")
    }
    pub fn upvalue(&self, id: UpvalueId) -> &Upvalue {
        self.upvalues.get(id.0).expect("dangling upvalue id")
    }
    pub fn upvalue_mut(&mut self, id: UpvalueId) -> &mut Upvalue {
        self.upvalues.get_mut(id.0).expect("dangling upvalue id")
    }
    pub fn userdata(&self, id: UserdataId) -> &Userdata {
        self.userdata.get(id.0).expect("dangling userdata id")
    }
    pub fn userdata_mut(&mut self, id: UserdataId) -> &mut Userdata {
        self.userdata.get_mut(id.0).expect("dangling userdata id")
    }

    // ---- write barriers ----

    /// Call after storing `child` into `parent` whenever `parent` is *not*
    /// a table reached through `raw_set` (closures wiring an upvalue,
    /// userdata gaining a metatable, …). Table mutations should use
    /// [`Gc::barrier_back`] instead — tables are mutated far more often, so
    /// reverting them to gray and re-scanning wholesale in the next
    /// propagation is cheaper than marking one key/value pair at a time.
    pub fn barrier_forward(&mut self, parent: GcRef, child: GcRef) {
        if !self.is_black(parent) || !self.is_white(child) {
            return;
        }
        if self.state.keep_invariant() {
            self.mark_ref(child);
        } else {
            let color = self.current_white_color();
            self.set_color(parent, color);
        }
    }

    /// Back barrier for tables: when a black table is mutated, revert it
    /// to gray and push it to the grayagain list.
    pub fn barrier_back(&mut self, table: TableId) {
        let r = GcRef::Table(table);
        if self.is_black(r) {
            self.set_color(r, GcColor::Gray);
            self.gray_again.push(r);
        }
    }

    // ---- marking ----

    fn mark_ref(&mut self, r: GcRef) {
        if !self.is_white(r) {
            return;
        }
        match r {
            GcRef::String(_) => {
                // Strings have no outgoing references: go straight to black.
                self.set_color(r, GcColor::Black);
            }
            _ => {
                self.set_color(r, GcColor::Gray);
                self.gray.push(r);
            }
        }
    }

    pub fn mark_value(&mut self, v: LuaValue) {
        match v {
            LuaValue::String(id) => self.mark_ref(GcRef::String(id)),
            LuaValue::Table(id) => self.mark_ref(GcRef::Table(id)),
            LuaValue::Closure(id) => self.mark_ref(GcRef::Closure(id)),
            LuaValue::Userdata(id) => self.mark_ref(GcRef::Userdata(id)),
            LuaValue::Thread(id) => self.mark_ref(GcRef::Thread(id)),
            _ => {}
        }
    }

    fn mark_prototype_strings(&mut self, proto: &Prototype) {
        let consts = proto.constants.clone();
        for c in consts {
            self.mark_value(c);
        }
        let children: Vec<_> = proto.protos.clone();
        for child in children {
            self.mark_prototype_strings(&child);
        }
    }

    /// Pulls up to `budget` objects off the gray stack, blackens them, and
    /// marks what they reference.
    pub fn propagate_step(&mut self, budget: usize) -> usize {
        let mut work = 0;
        while work < budget {
            let Some(r) = self.gray.pop() else { break };
            self.traverse(r);
            work += 1;
        }
        work
    }

    pub fn is_gray_empty(&self) -> bool {
        self.gray.is_empty()
    }

    fn traverse(&mut self, r: GcRef) {
        self.set_color(r, GcColor::Black);
        match r {
            GcRef::Table(id) => self.traverse_table(id),
            GcRef::Closure(id) => self.traverse_closure(id),
            GcRef::Upvalue(id) => self.traverse_upvalue(id),
            GcRef::Userdata(id) => self.traverse_userdata(id),
            GcRef::Thread(_) => {
                // The VM re-marks live thread stacks explicitly every
                // atomic phase; threads are always re-grayed.
            }
            GcRef::String(_) => {}
        }
    }

    fn traverse_table(&mut self, id: TableId) {
        let table = self.tables.get(id.0).expect("dangling table id");
        let weak_keys = table.weak_keys;
        let weak_values = table.weak_values;
        let metatable = table.metatable;
        let mut entries = Vec::new();
        table.for_each(|k, v| entries.push((k, v)));

        if let Some(mt) = metatable {
            self.mark_ref(GcRef::Table(mt));
        }
        if weak_keys || weak_values {
            // Deferred to the atomic phase's weak-table pass; for now only
            // mark the non-weak side so the table stays internally
            // consistent if the cycle ends before atomic runs.
            for (k, v) in entries {
                if !weak_keys {
                    self.mark_value(k);
                }
                if !weak_values {
                    self.mark_value(v);
                }
            }
            self.weak_tables.push(id);
        } else {
            for (k, v) in entries {
                self.mark_value(k);
                self.mark_value(v);
            }
        }
    }

    fn traverse_closure(&mut self, id: ClosureId) {
        let upvalue_ids: Vec<UpvalueId>;
        let proto: Option<std::rc::Rc<Prototype>>;
        match self.closures.get(id.0).expect("dangling closure id") {
            Closure::Lua(lc) => {
                upvalue_ids = lc.upvalues.clone();
                proto = Some(lc.proto.clone());
            }
            Closure::Native(_) => {
                upvalue_ids = Vec::new();
                proto = None;
            }
        }
        for uv in upvalue_ids {
            self.mark_ref(GcRef::Upvalue(uv));
        }
        if let Some(p) = proto {
            self.mark_prototype_strings(&p);
        }
    }

    fn traverse_upvalue(&mut self, id: UpvalueId) {
        // Open upvalues are traversed via the thread's stack scan instead.
        let closed = match self.upvalues.get(id.0).expect("dangling upvalue id") {
            Upvalue::Closed(v) => Some(*v),
            Upvalue::Open { .. } => None,
        };
        if let Some(v) = closed {
            self.mark_value(v);
        }
    }

    fn traverse_userdata(&mut self, id: UserdataId) {
        let metatable = self.userdata.get(id.0).expect("dangling userdata id").metatable;
        if let Some(mt) = metatable {
            self.mark_ref(GcRef::Table(mt));
        }
    }

    /// Drains `grayagain` back into the primary gray stack (called once per
    /// atomic phase, after the VM has re-marked live roots).
    pub fn requeue_gray_again(&mut self) {
        self.gray.append(&mut self.gray_again);
    }

    /// Sweeps dead entries out of every weak table, after the atomic phase
    /// has finished propagating.
    pub fn resolve_weak_tables(&mut self) {
        let tables = std::mem::take(&mut self.weak_tables);
        for id in tables {
            let (weak_keys, weak_values, entries) = {
                let table = match self.tables.get(id.0) {
                    Some(t) => t,
                    None => continue,
                };
                let mut entries = Vec::new();
                table.for_each(|k, v| entries.push((k, v)));
                (table.weak_keys, table.weak_values, entries)
            };
            let mut doomed = Vec::new();
            for (k, v) in entries {
                let key_dead = weak_keys && is_dead_value(self, k);
                let val_dead = weak_values && is_dead_value(self, v);
                if key_dead || val_dead {
                    doomed.push(k);
                }
            }
            if let Some(table) = self.tables.get_mut(id.0) {
                for k in doomed {
                    let _ = table.raw_set(k, LuaValue::Nil);
                }
            }
        }
    }

    // ---- sweeping ----

    pub fn enter_sweep_string(&mut self) {
        self.string_sweep_cursor = 0;
        self.state = GcState::SweepString;
    }

    /// Returns `true` once the string table has been fully swept.
    pub fn sweep_string_step(&mut self, max: usize) -> bool {
        let total = self.strings.capacity_len();
        let mut processed = 0;
        while self.string_sweep_cursor < total && processed < max {
            let id = self.string_sweep_cursor as u32;
            self.string_sweep_cursor += 1;
            processed += 1;
            if !self.strings.slot_is_live(id) {
                continue;
            }
            let dead = {
                let h = self.strings.header(id).unwrap();
                !h.fixed && self.is_white(GcRef::String(StringId(id))) && !self.is_current_white(h.color)
            };
            if dead {
                if let Some(s) = self.strings.free(id) {
                    self.total_bytes -= s.len() as isize + 32;
                    self.stats.bytes_freed += s.len() + 32;
                    self.stats.objects_freed += 1;
                }
                self.remove_intern_entry(id);
            }
        }
        self.string_sweep_cursor >= total
    }

    fn remove_intern_entry(&mut self, freed_id: u32) {
        self.string_intern.retain(|_, ids| {
            ids.retain(|id| id.0 != freed_id);
            !ids.is_empty()
        });
    }

    pub fn enter_sweep(&mut self) {
        self.table_sweep_cursor = 0;
        self.closure_sweep_cursor = 0;
        self.upvalue_sweep_cursor = 0;
        self.userdata_sweep_cursor = 0;
        self.state = GcState::Sweep;
    }

    /// Sweeps up to `max` objects total across all non-string pools. Returns
    /// `true` once every pool has been fully swept.
    pub fn sweep_step(&mut self, max: usize) -> bool {
        let mut budget = max;
        budget -= self.sweep_pool_tables(budget);
        if budget == 0 {
            return false;
        }
        budget -= self.sweep_pool_closures(budget);
        if budget == 0 {
            return false;
        }
        budget -= self.sweep_pool_upvalues(budget);
        if budget == 0 {
            return false;
        }
        self.sweep_pool_userdata(budget);
        self.table_sweep_cursor >= self.tables.capacity_len()
            && self.closure_sweep_cursor >= self.closures.capacity_len()
            && self.upvalue_sweep_cursor >= self.upvalues.capacity_len()
            && self.userdata_sweep_cursor >= self.userdata.capacity_len()
    }

    fn sweep_pool_tables(&mut self, max: usize) -> usize {
        let total = self.tables.capacity_len();
        let mut done = 0;
        while self.table_sweep_cursor < total && done < max {
            let id = self.table_sweep_cursor as u32;
            self.table_sweep_cursor += 1;
            done += 1;
            if !self.tables.slot_is_live(id) {
                continue;
            }
            if self.is_dead_white(GcRef::Table(TableId(id))) {
                self.tables.free(id);
                self.total_bytes -= 64;
                self.stats.objects_freed += 1;
            } else {
                self.reset_to_current_white(GcRef::Table(TableId(id)));
            }
        }
        done
    }

    fn sweep_pool_closures(&mut self, max: usize) -> usize {
        let total = self.closures.capacity_len();
        let mut done = 0;
        while self.closure_sweep_cursor < total && done < max {
            let id = self.closure_sweep_cursor as u32;
            self.closure_sweep_cursor += 1;
            done += 1;
            if !self.closures.slot_is_live(id) {
                continue;
            }
            if self.is_dead_white(GcRef::Closure(ClosureId(id))) {
                self.closures.free(id);
                self.total_bytes -= 48;
                self.stats.objects_freed += 1;
            } else {
                self.reset_to_current_white(GcRef::Closure(ClosureId(id)));
            }
        }
        done
    }

    fn sweep_pool_upvalues(&mut self, max: usize) -> usize {
        let total = self.upvalues.capacity_len();
        let mut done = 0;
        while self.upvalue_sweep_cursor < total && done < max {
            let id = self.upvalue_sweep_cursor as u32;
            self.upvalue_sweep_cursor += 1;
            done += 1;
            if !self.upvalues.slot_is_live(id) {
                continue;
            }
            if self.is_dead_white(GcRef::Upvalue(UpvalueId(id))) {
                self.upvalues.free(id);
                self.total_bytes -= 24;
                self.stats.objects_freed += 1;
            } else {
                self.reset_to_current_white(GcRef::Upvalue(UpvalueId(id)));
            }
        }
        done
    }

    fn sweep_pool_userdata(&mut self, max: usize) -> usize {
        let total = self.userdata.capacity_len();
        let mut done = 0;
        while self.userdata_sweep_cursor < total && done < max {
            let id = self.userdata_sweep_cursor as u32;
            self.userdata_sweep_cursor += 1;
            done += 1;
            if !self.userdata.slot_is_live(id) {
                continue;
            }
            let dead = self.is_dead_white(GcRef::Userdata(UserdataId(id)));
            if dead {
                // Objects with a finalizer wait in `pending_finalizers`
                // rather than being freed immediately: userdata with a
                // `__gc` metamethod get moved to a separate ring.
                let has_mt = self.userdata.get(id).map(|u| u.metatable.is_some()).unwrap_or(false);
                let already_finalized = self.userdata.header(id).map(|h| h.finalized).unwrap_or(true);
                if has_mt && !already_finalized {
                    self.pending_finalizers.push_back(UserdataId(id));
                } else {
                    self.userdata.free(id);
                    self.total_bytes -= 32;
                    self.stats.objects_freed += 1;
                }
            } else {
                self.reset_to_current_white(GcRef::Userdata(UserdataId(id)));
            }
        }
        done
    }

    fn reset_to_current_white(&mut self, r: GcRef) {
        let color = self.current_white_color();
        self.set_color(r, color);
    }

    pub fn enter_finalize(&mut self) {
        self.state = GcState::Finalize;
    }

    /// Pops one pending finalizer target; the VM calls its `__gc` (if any)
    /// and then reports back via [`Gc::finish_finalizing`]. Returns `true`
    /// once the queue is empty.
    pub fn next_finalizer(&mut self) -> Option<UserdataId> {
        self.pending_finalizers.pop_front()
    }

    pub fn finish_finalizing(&mut self, id: UserdataId) {
        if let Some(h) = self.userdata.header_mut(id.0) {
            h.finalized = true;
        }
        self.userdata.free(id.0);
        self.total_bytes -= 32;
        self.stats.objects_freed += 1;
    }

    pub fn finalize_queue_empty(&self) -> bool {
        self.pending_finalizers.is_empty()
    }

    // ---- cycle bookkeeping ----

    pub fn begin_cycle(&mut self) {
        self.current_white = if self.current_white == 0 { 1 } else { 0 };
        self.gray.clear();
        self.gray_again.clear();
        self.state = GcState::Propagate;
    }

    pub fn end_cycle(&mut self) {
        self.threshold = self.total_bytes + (self.total_bytes * self.params.pause_pct as isize) / 100;
        self.gc_debt = 0;
        self.state = GcState::Pause;
        self.stats.cycles_completed += 1;
    }

    pub fn should_start_cycle(&self) -> bool {
        matches!(self.state, GcState::Pause) && self.total_bytes >= self.threshold
    }

    /// Bytes-of-work budget for one `step`, per spec: "work proportional to
    /// `gcstepmul * 1024/100`".
    pub fn step_budget(&self) -> usize {
        ((self.params.step_mul_pct as isize * 1024) / 100).max(1) as usize
    }
}

fn is_dead_value(gc: &Gc, v: LuaValue) -> bool {
    match v {
        LuaValue::String(id) => gc.is_dead_white(GcRef::String(id)),
        LuaValue::Table(id) => gc.is_dead_white(GcRef::Table(id)),
        LuaValue::Closure(id) => gc.is_dead_white(GcRef::Closure(id)),
        LuaValue::Userdata(id) => gc.is_dead_white(GcRef::Userdata(id)),
        LuaValue::Thread(id) => gc.is_dead_white(GcRef::Thread(id)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::LuaTable;

    #[test]
    fn string_interning_returns_same_id() {
        let mut gc = Gc::new();
        let a = gc.intern_string("hello");
        let b = gc.intern_string("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn barrier_back_regrays_black_table() {
        let mut gc = Gc::new();
        let t = gc.alloc_table(LuaTable::new());
        gc.set_color(GcRef::Table(t), GcColor::Black);
        gc.barrier_back(t);
        assert!(!gc.is_black(GcRef::Table(t)));
    }

    #[test]
    fn dead_white_objects_are_freed_on_sweep() {
        let mut gc = Gc::new();
        let t = gc.alloc_table(LuaTable::new());
        // Flip the cycle without marking `t`: it becomes the *other* white
        // and should be swept away.
        gc.begin_cycle();
        assert!(gc.is_dead_white(GcRef::Table(t)));
        gc.enter_sweep();
        while !gc.sweep_step(4) {}
        assert!(!gc.tables.slot_is_live(t.0));
    }

    #[test]
    fn fixed_strings_survive_sweeping() {
        let mut gc = Gc::new();
        let s = gc.intern_string("and");
        gc.fix_string(s);
        gc.begin_cycle();
        gc.enter_sweep_string();
        while !gc.sweep_string_step(8) {}
        assert!(gc.strings.slot_is_live(s.0));
    }
}
