//! Per-slot label sets and per-label entry points.
//!
//! Labels are opaque `u32` ids. Each labeled slot carries a small sorted set;
//! each label has a *medoid* slot used as the entry point when a search is
//! constrained to that label. A distinguished universal label matches any
//! filter.

use parking_lot::RwLock;
use smallvec::SmallVec;
use std::collections::HashMap;

pub(crate) type LabelSet = SmallVec<[u32; 4]>;

#[derive(Default)]
struct LabelInner {
    /// Sorted label ids per slot; empty for unlabeled slots.
    slot_labels: Vec<LabelSet>,
    /// label → medoid slot, the first-seen member of the label.
    medoids: HashMap<u32, u32>,
    universal: Option<u32>,
}

pub(crate) struct LabelIndex {
    inner: RwLock<LabelInner>,
}

impl LabelIndex {
    pub fn new(total_slots: usize) -> Self {
        Self {
            inner: RwLock::new(LabelInner {
                slot_labels: vec![LabelSet::new(); total_slots],
                medoids: HashMap::new(),
                universal: None,
            }),
        }
    }

    pub fn set_universal(&self, label: u32) {
        self.inner.write().universal = Some(label);
    }

    pub fn universal(&self) -> Option<u32> {
        self.inner.read().universal
    }

    /// Record `labels` for `slot`, seeding medoids for labels seen for the
    /// first time. Returns the slot's sorted label set.
    pub fn record(&self, slot: u32, labels: &[u32]) -> LabelSet {
        let mut set: LabelSet = labels.iter().copied().collect();
        set.sort_unstable();
        set.dedup();
        let mut inner = self.inner.write();
        for &l in &set {
            inner.medoids.entry(l).or_insert(slot);
        }
        inner.slot_labels[slot as usize] = set.clone();
        set
    }

    pub fn clear(&self, slot: u32) {
        self.inner.write().slot_labels[slot as usize].clear();
    }

    pub fn labels_of(&self, slot: u32) -> LabelSet {
        self.inner.read().slot_labels[slot as usize].clone()
    }

    /// Does `slot` satisfy `filter`? True when the slot carries any filter
    /// label, or carries the universal label.
    pub fn matches(&self, slot: u32, filter: &[u32]) -> bool {
        let inner = self.inner.read();
        let set = &inner.slot_labels[slot as usize];
        if let Some(u) = inner.universal {
            if set.binary_search(&u).is_ok() {
                return true;
            }
        }
        filter.iter().any(|l| set.binary_search(l).is_ok())
    }

    /// Entry points for a filtered operation: medoids of the filter labels
    /// plus the universal label's medoid when one exists.
    pub fn entry_points(&self, filter: &[u32]) -> Vec<u32> {
        let inner = self.inner.read();
        let mut entries: Vec<u32> = filter.iter().filter_map(|l| inner.medoids.get(l).copied()).collect();
        if let Some(u) = inner.universal {
            if let Some(&m) = inner.medoids.get(&u) {
                entries.push(m);
            }
        }
        entries.sort_unstable();
        entries.dedup();
        entries
    }

    /// Snapshot of every (label, medoid) pair, for persistence.
    pub fn medoid_entries(&self) -> Vec<(u32, u32)> {
        let inner = self.inner.read();
        let mut v: Vec<(u32, u32)> = inner.medoids.iter().map(|(&l, &s)| (l, s)).collect();
        v.sort_unstable();
        v
    }

    /// Restore a medoid binding at load time.
    pub fn restore_medoid(&self, label: u32, slot: u32) {
        self.inner.write().medoids.insert(label, slot);
    }
}
