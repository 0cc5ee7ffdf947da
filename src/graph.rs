//! Per-slot neighbor lists with bounded degree.

use parking_lot::{RwLock, RwLockWriteGuard};
use smallvec::SmallVec;

/// Adjacency list type. Inline capacity sized for typical degrees; larger R
/// spills to the heap without changing behavior.
pub(crate) type AdjList = SmallVec<[u32; 32]>;

/// One lock per slot, so mutators of disjoint slots proceed in parallel.
/// Traversals take the read side just long enough to copy the list — the
/// copy is bounded by R, and searching over a snapshot tolerates concurrent
/// edits elsewhere in the graph.
pub(crate) struct GraphStore {
    adj: Box<[RwLock<AdjList>]>,
    max_degree: usize,
}

impl GraphStore {
    pub fn new(total_slots: usize, max_degree: usize) -> Self {
        let adj = (0..total_slots).map(|_| RwLock::new(AdjList::new())).collect();
        Self { adj, max_degree }
    }

    pub fn total_slots(&self) -> usize {
        self.adj.len()
    }

    /// Snapshot-copy of `slot`'s neighbor list.
    #[inline]
    pub fn snapshot(&self, slot: u32) -> AdjList {
        self.adj[slot as usize].read().clone()
    }

    pub fn degree(&self, slot: u32) -> usize {
        self.adj[slot as usize].read().len()
    }

    /// Exclusive guard for in-place mutation of `slot`'s list.
    pub fn lock(&self, slot: u32) -> RwLockWriteGuard<'_, AdjList> {
        self.adj[slot as usize].write()
    }

    /// Replace `slot`'s list wholesale.
    pub fn set(&self, slot: u32, list: AdjList) {
        debug_assert!(list.len() <= self.max_degree);
        *self.adj[slot as usize].write() = list;
    }

    pub fn clear(&self, slot: u32) {
        self.adj[slot as usize].write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn snapshot_is_independent_copy() {
        let graph = GraphStore::new(4, 8);
        graph.set(0, smallvec![1, 2, 3]);
        let snap = graph.snapshot(0);
        graph.set(0, smallvec![3]);
        assert_eq!(snap.as_slice(), &[1, 2, 3]);
        assert_eq!(graph.snapshot(0).as_slice(), &[3]);
    }

    #[test]
    fn lock_allows_in_place_edit() {
        let graph = GraphStore::new(2, 8);
        {
            let mut guard = graph.lock(1);
            guard.push(0);
            guard.push(3);
            guard.retain(|&mut n| n != 0);
        }
        assert_eq!(graph.snapshot(1).as_slice(), &[3]);
    }

    #[test]
    fn clear_empties_list() {
        let graph = GraphStore::new(2, 8);
        graph.set(0, smallvec![1]);
        graph.clear(0);
        assert_eq!(graph.degree(0), 0);
    }
}
