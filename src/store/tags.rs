//! Tag ↔ slot bijection with a LIFO free list.

use super::TAG_NONE;
use std::collections::HashMap;

/// Two mappings kept in lock-step: `tag → slot` (hash map) and `slot → tag`
/// (dense array, [`TAG_NONE`] when unassigned). Allocation pops the free
/// list; release pushes back. The engine wraps the whole struct in one
/// `RwLock`: mutations are short critical sections, lookups take the read
/// side.
pub(crate) struct TagMap {
    tag_to_slot: HashMap<u32, u32>,
    slot_to_tag: Vec<u32>,
    free: Vec<u32>,
}

impl TagMap {
    /// `allocatable` slots (0..allocatable) feed the free list; slots in
    /// `[allocatable, total)` are reserved (frozen entry points) and never
    /// handed out.
    pub fn new(allocatable: usize, total: usize) -> Self {
        debug_assert!(allocatable <= total);
        Self {
            tag_to_slot: HashMap::with_capacity(allocatable),
            slot_to_tag: vec![TAG_NONE; total],
            // reversed so pops come out in ascending slot order
            free: (0..allocatable as u32).rev().collect(),
        }
    }

    pub fn contains_tag(&self, tag: u32) -> bool {
        self.tag_to_slot.contains_key(&tag)
    }

    /// Pop a free slot and bind it to `tag`. The caller has already checked
    /// for duplicates under the same write lock.
    pub fn allocate(&mut self, tag: u32) -> Option<u32> {
        debug_assert!(!self.contains_tag(tag));
        let slot = self.free.pop()?;
        self.tag_to_slot.insert(tag, slot);
        self.slot_to_tag[slot as usize] = tag;
        Some(slot)
    }

    /// Unbind `slot` from its tag and return the slot to the free list.
    pub fn release(&mut self, slot: u32) {
        let tag = std::mem::replace(&mut self.slot_to_tag[slot as usize], TAG_NONE);
        if tag != TAG_NONE {
            self.tag_to_slot.remove(&tag);
        }
        self.free.push(slot);
    }

    pub fn slot_of(&self, tag: u32) -> Option<u32> {
        self.tag_to_slot.get(&tag).copied()
    }

    pub fn tag_of(&self, slot: u32) -> Option<u32> {
        match self.slot_to_tag.get(slot as usize) {
            Some(&t) if t != TAG_NONE => Some(t),
            _ => None,
        }
    }

    /// Number of bound tags (live + tombstoned slots).
    pub fn len(&self) -> usize {
        self.tag_to_slot.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.tag_to_slot.iter().map(|(&t, &s)| (t, s))
    }

    /// Rebuild the map from a dense `slot → tag` array (load path).
    ///
    /// Slots carrying [`TAG_NONE`] and not named in `reserved` become free;
    /// `reserved` slots (frozen entry points) are withheld from allocation.
    pub fn rebuild(slot_to_tag: Vec<u32>, reserved: &[u32]) -> Self {
        let mut tag_to_slot = HashMap::with_capacity(slot_to_tag.len());
        let mut free = Vec::new();
        for (slot, &tag) in slot_to_tag.iter().enumerate() {
            if tag != TAG_NONE {
                tag_to_slot.insert(tag, slot as u32);
            } else if !reserved.contains(&(slot as u32)) {
                free.push(slot as u32);
            }
        }
        free.reverse();
        Self { tag_to_slot, slot_to_tag, free }
    }
}
