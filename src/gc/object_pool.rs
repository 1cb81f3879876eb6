//! Slot-based arena storage shared by every collectable kind.
//!
//! Each `Pool<T>` owns its slots; ids are `u32` indices, recycled through a
//! free list so allocation and lookup are both O(1) and stay stable across
//! a GC sweep (a freed id is only handed back out once a new object takes
//! its slot).

use super::GcHeader;

struct Slot<T> {
    header: GcHeader,
    value: T,
}

pub struct Pool<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Pool {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Pool<T> {
    pub fn insert(&mut self, value: T, current_white: u8) -> u32 {
        let header = GcHeader::new_white(current_white);
        let slot = Some(Slot { header, value });
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = slot;
            id
        } else {
            let id = self.slots.len() as u32;
            self.slots.push(slot);
            id
        }
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize)?.as_ref().map(|s| &s.value)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(id as usize)?.as_mut().map(|s| &mut s.value)
    }

    pub fn header(&self, id: u32) -> Option<&GcHeader> {
        self.slots.get(id as usize)?.as_ref().map(|s| &s.header)
    }

    pub fn header_mut(&mut self, id: u32) -> Option<&mut GcHeader> {
        self.slots.get_mut(id as usize)?.as_mut().map(|s| &mut s.header)
    }

    /// Frees the slot at `id`, returning the value it held (the caller runs
    /// any finalization logic before discarding it).
    pub fn free(&mut self, id: u32) -> Option<T> {
        let slot = self.slots.get_mut(id as usize)?.take()?;
        self.free.push(id);
        Some(slot.value)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live ids, in arena order. Used by the sweeper, which needs a
    /// stable cursor it can resume across GC steps.
    pub fn live_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as u32))
    }

    pub fn capacity_len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_is_live(&self, id: u32) -> bool {
        matches!(self.slots.get(id as usize), Some(Some(_)))
    }
}
