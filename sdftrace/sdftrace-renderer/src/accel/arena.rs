//! Destination storage for every acceleration structure: one device buffer carved into
//! aligned regions keyed by structure id.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const ARENA_ALIGNMENT: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StructureId {
    Bottom(u32),
    Top,
}

/// Region of the arena: which buffer, byte offset, byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSlot {
    pub buffer: u32,
    pub offset: u64,
    pub size: u64,
}

impl ArenaSlot {
    /// Index of the first node, in units of `node_bytes`.
    pub fn first_element(&self, node_bytes: u64) -> u32 {
        (self.offset / node_bytes) as u32
    }
}

fn align_up(v: u64, a: u64) -> u64 {
    v.div_ceil(a) * a
}

#[derive(Debug)]
pub struct AccelArena {
    budget: u64,
    cursor: u64,
    slots: BTreeMap<StructureId, ArenaSlot>,
}

impl AccelArena {
    pub fn new(budget: u64) -> Self {
        Self { budget, cursor: 0, slots: BTreeMap::new() }
    }

    /// Reserve `size` bytes for `id`. A structure that still fits keeps its region.
    pub fn reserve(&mut self, id: StructureId, size: u64) -> Result<ArenaSlot> {
        if let Some(slot) = self.slots.get(&id) {
            if slot.size >= size {
                return Ok(*slot);
            }
        }
        let offset = align_up(self.cursor, ARENA_ALIGNMENT);
        let end = offset + align_up(size.max(1), ARENA_ALIGNMENT);
        if end > self.budget {
            return Err(Error::Allocation {
                resource: "acceleration structure arena",
                requested: end - offset,
                available: self.budget.saturating_sub(offset),
            });
        }
        let slot = ArenaSlot { buffer: 0, offset, size: end - offset };
        self.cursor = end;
        self.slots.insert(id, slot);
        Ok(slot)
    }

    pub fn slot(&self, id: StructureId) -> Option<ArenaSlot> {
        self.slots.get(&id).copied()
    }

    /// Bytes a device buffer needs to back every reserved region.
    pub fn used_bytes(&self) -> u64 {
        self.cursor
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }
}
