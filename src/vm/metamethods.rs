//! Metamethod lookup and invocation.
//!
//! Binary-operation lookup order is always "left operand's metatable, then
//! right's". The eight metaevents consulted most often
//! (`__index`/`__newindex`/`__call`/`__len`/`__eq`/`__lt`/`__le`/`__concat`)
//! get a per-table absence bit in [`crate::value::LuaTable::flags`] so a
//! table with no metatable, or a metatable that simply lacks the event,
//! short-circuits without a hash lookup; arithmetic events are looked up
//! directly every time — only this fast set is worth flag-caching.

use crate::value::{LuaType, LuaValue, TableId};
use super::LuaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metamethod {
    Index,
    NewIndex,
    Call,
    Len,
    Eq,
    Lt,
    Le,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    ToString,
    Gc,
    Mode,
}

impl Metamethod {
    pub fn name(self) -> &'static str {
        match self {
            Metamethod::Index => "__index",
            Metamethod::NewIndex => "__newindex",
            Metamethod::Call => "__call",
            Metamethod::Len => "__len",
            Metamethod::Eq => "__eq",
            Metamethod::Lt => "__lt",
            Metamethod::Le => "__le",
            Metamethod::Concat => "__concat",
            Metamethod::Add => "__add",
            Metamethod::Sub => "__sub",
            Metamethod::Mul => "__mul",
            Metamethod::Div => "__div",
            Metamethod::Mod => "__mod",
            Metamethod::Pow => "__pow",
            Metamethod::Unm => "__unm",
            Metamethod::ToString => "__tostring",
            Metamethod::Gc => "__gc",
            Metamethod::Mode => "__mode",
        }
    }

    /// The fast set gets a cache bit in `LuaTable::flags` (an 8-bit field,
    /// one event per bit); everything else is looked up unconditionally.
    fn flag_bit(self) -> Option<u8> {
        match self {
            Metamethod::Index => Some(0),
            Metamethod::NewIndex => Some(1),
            Metamethod::Call => Some(2),
            Metamethod::Len => Some(3),
            Metamethod::Eq => Some(4),
            Metamethod::Lt => Some(5),
            Metamethod::Le => Some(6),
            Metamethod::Concat => Some(7),
            _ => None,
        }
    }
}

impl LuaState {
    /// The metatable consulted for `v`: a table or userdata's own
    /// metatable, or the shared per-basic-type metatable for everything
    /// else.
    pub fn metatable_of(&self, v: LuaValue) -> Option<TableId> {
        match v {
            LuaValue::Table(t) => self.gc.table(t).metatable,
            LuaValue::Userdata(u) => self.gc.userdata(u).metatable,
            other => self.type_metatables[type_slot(other.lua_type())],
        }
    }

    pub fn set_metatable_of(&mut self, v: LuaValue, mt: Option<TableId>) {
        match v {
            LuaValue::Table(t) => {
                self.gc.table_mut(t).metatable = mt;
                self.gc.table_mut(t).flags = 0;
                if let Some(mt_id) = mt {
                    self.barrier_table_child(t, LuaValue::Table(mt_id));
                }
            }
            LuaValue::Userdata(u) => {
                self.gc.userdata_mut(u).metatable = mt;
                if let Some(mt_id) = mt {
                    self.gc.barrier_forward(
                        crate::value::GcRef::Userdata(u),
                        crate::value::GcRef::Table(mt_id),
                    );
                }
            }
            other => self.type_metatables[type_slot(other.lua_type())] = mt,
        }
    }

    /// Looks up `event` on `v`'s metatable, honoring the fast-set absence
    /// cache on table metatables. Returns `nil` (not `Option::None`) on
    /// absence — every call site immediately tests truthiness/nilness the
    /// same way Lua's `luaT_gettmbyobj` result is used.
    pub fn get_metamethod(&mut self, v: LuaValue, event: Metamethod) -> LuaValue {
        let Some(mt) = self.metatable_of(v) else {
            return LuaValue::Nil;
        };
        if let Some(bit) = event.flag_bit() {
            let mask = 1u8 << bit;
            if self.gc.table(mt).flags & mask != 0 {
                return LuaValue::Nil;
            }
            let name = self.meta_names.interned(event, &mut self.gc);
            let found = self.gc.table(mt).get_str(name);
            if found.is_nil() {
                self.gc.table_mut(mt).flags |= mask;
            }
            found
        } else {
            let name = self.meta_names.interned(event, &mut self.gc);
            self.gc.table(mt).get_str(name)
        }
    }

    pub fn has_metamethod(&mut self, v: LuaValue, event: Metamethod) -> bool {
        !self.get_metamethod(v, event).is_nil()
    }

    /// Binary-operator metamethod lookup: try the left operand's metatable,
    /// then the right's.
    pub fn get_binop_metamethod(&mut self, a: LuaValue, b: LuaValue, event: Metamethod) -> LuaValue {
        let from_a = self.get_metamethod(a, event);
        if !from_a.is_nil() {
            return from_a;
        }
        self.get_metamethod(b, event)
    }

    /// Comparison-metamethod lookup (`__lt`/`__le`/`__eq`): if both operands
    /// share the same metatable its handler is used directly; otherwise the
    /// right operand must carry the exact same handler for the event, or
    /// there is no metamethod at all. Unlike [`Self::get_binop_metamethod`],
    /// "left has one, right doesn't" is not a match.
    pub fn get_comparison_metamethod(&mut self, a: LuaValue, b: LuaValue, event: Metamethod) -> LuaValue {
        let mt_a = self.metatable_of(a);
        let mt_b = self.metatable_of(b);
        if mt_a.is_some() && mt_a == mt_b {
            return self.get_metamethod(a, event);
        }
        let handler_a = self.get_metamethod(a, event);
        if handler_a.is_nil() {
            return LuaValue::Nil;
        }
        let handler_b = self.get_metamethod(b, event);
        if handler_a.raw_equals(&handler_b) {
            handler_a
        } else {
            LuaValue::Nil
        }
    }
}

fn type_slot(t: LuaType) -> usize {
    t as usize
}

/// Interned metamethod-name cache. Populated lazily so constructing a
/// [`LuaState`] doesn't need to eagerly intern all eighteen names before
/// the string table exists.
#[derive(Default)]
pub struct MetaNames {
    cache: [Option<crate::value::StringId>; 18],
}

impl MetaNames {
    fn slot(event: Metamethod) -> usize {
        event as usize
    }

    fn interned(&mut self, event: Metamethod, gc: &mut crate::gc::Gc) -> crate::value::StringId {
        let slot = Self::slot(event);
        if let Some(id) = self.cache[slot] {
            return id;
        }
        let id = gc.intern_string(event.name());
        gc.fix_string(id);
        self.cache[slot] = Some(id);
        id
    }
}
