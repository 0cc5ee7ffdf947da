//! Dynamic proximity-graph index over a sliding window of tagged vectors.
//!
//! The engine coordinates three concurrent mutator families over one shared
//! graph without global locks:
//!
//! - **inserts** place new points (search → prune → back-link) under the
//!   shared side of the consolidation gate,
//! - **searches** traverse edge snapshots lock-free,
//! - **lazy deletes** tombstone slots; a **consolidation** pass later takes
//!   the gate exclusively, repairs affected neighbor lists, and reclaims the
//!   tombstoned slots.
//!
//! # Lock roster and ordering
//!
//! | Lock | Shared | Exclusive |
//! |------|--------|-----------|
//! | per-slot adjacency lock | edge-snapshot read | edge mutation |
//! | tag-map lock | lookups | tag ↔ slot mutation |
//! | deletion-set lock | membership probes | `lazy_delete` insert, consolidation snapshot |
//! | consolidation gate | whole insert, lazy delete | consolidation (bounded wait) |
//!
//! Slot locks are never nested: back-linking processes neighbors one at a
//! time, acquire/release. While a slot lock is held, only the vector arena
//! and the atomic state array are touched, so no lock-order cycle exists.

mod consolidate;
mod insert;
mod persistence;
mod prune;
mod search;

pub use consolidate::{ConsolidationReport, ConsolidationStatus};
pub use insert::BatchIngestSummary;

use crate::distance::{aligned_dim, DataType, Element, Metric, MipsLift};
use crate::error::{IndexError, Result};
use crate::graph::GraphStore;
use crate::labels::LabelIndex;
use crate::params::IndexWriteParameters;
use crate::store::{SlotState, SlotStates, TagMap, VectorStore};
use parking_lot::RwLock;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashSet;

/// A scored slot on the search/prune path. Smaller distance is closer;
/// ties break on ascending slot index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub slot: u32,
    pub dist: f32,
}

#[inline]
pub(crate) fn cand_cmp(a: &Candidate, b: &Candidate) -> Ordering {
    a.dist.total_cmp(&b.dist).then(a.slot.cmp(&b.slot))
}

/// Counts describing the index at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub live_points: usize,
    pub frozen_points: usize,
    pub tombstoned_points: usize,
    pub free_slots: usize,
    pub pending_deletes: usize,
    pub capacity: usize,
    pub dim: usize,
}

/// In-memory dynamic ANN index, monomorphized over the vector element type.
///
/// All mutators take `&self`; the engine is `Sync` and is meant to be shared
/// across an external thread pool.
impl<T: Element> std::fmt::Debug for DynamicIndex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicIndex")
            .field("dim", &self.dim)
            .field("capacity", &self.capacity)
            .finish()
    }
}

pub struct DynamicIndex<T: Element = f32> {
    metric: Metric,
    /// External dimension, as callers see it.
    dim: usize,
    /// Internal padded width: dim (+1 under MIPS) rounded up to 8 lanes.
    aligned_dim: usize,
    /// Maximum number of tagged points.
    capacity: usize,
    params: IndexWriteParameters,

    vectors: VectorStore<T>,
    graph: GraphStore,
    states: SlotStates,
    tags: RwLock<TagMap>,
    labels: LabelIndex,

    /// Slots tombstoned since the last consolidation snapshot.
    delete_set: RwLock<HashSet<u32>>,
    /// Inserts hold the read side for their whole critical path;
    /// consolidation and save take the write side.
    gate: RwLock<()>,
    /// Frozen entry points, fixed once configured.
    start_points: RwLock<Vec<u32>>,

    lift: Option<MipsLift>,
}

impl<T: Element> DynamicIndex<T> {
    /// Create an empty index.
    ///
    /// `capacity` is the maximum number of tagged points; callers sizing for
    /// a sliding window typically pass `active_window + 4 * consolidate_interval`
    /// to leave headroom for inserts that overlap consolidation. Frozen entry
    /// points live in extra slots beyond `capacity`.
    pub fn new(metric: Metric, dim: usize, capacity: usize, params: IndexWriteParameters) -> Result<Self> {
        params.validate()?;
        if dim == 0 {
            return Err(IndexError::InvalidParameter("dimension must be positive".into()));
        }
        if capacity == 0 {
            return Err(IndexError::InvalidParameter("capacity must be positive".into()));
        }
        if metric == Metric::Mips && T::DATA_TYPE != DataType::Float {
            return Err(IndexError::InvalidParameter(
                "mips requires float vectors: the augmented-dimension lift does not live in integer domains".into(),
            ));
        }

        let lifted = dim + usize::from(metric == Metric::Mips);
        let padded = aligned_dim(lifted);
        let total = capacity + params.num_frozen_points as usize;

        Ok(Self {
            metric,
            dim,
            aligned_dim: padded,
            capacity,
            vectors: VectorStore::new(total, padded)?,
            graph: GraphStore::new(total, params.max_degree as usize),
            states: SlotStates::new(total),
            tags: RwLock::new(TagMap::new(capacity, total)),
            labels: LabelIndex::new(total),
            delete_set: RwLock::new(HashSet::new()),
            gate: RwLock::new(()),
            start_points: RwLock::new(Vec::new()),
            lift: (metric == Metric::Mips).then(MipsLift::new),
            params,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn params(&self) -> &IndexWriteParameters {
        &self.params
    }

    pub fn live_points(&self) -> usize {
        self.states.count(SlotState::Live)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.read().len() == 0
    }

    /// Register the universal label: slots carrying it satisfy any filter.
    pub fn set_universal_label(&self, label: u32) {
        self.labels.set_universal(label);
    }

    /// Pin explicit entry points. `data` holds `num_frozen_points` rows of
    /// `dim` elements. Must be called before any point is inserted.
    pub fn set_start_points(&self, data: &[T]) -> Result<()> {
        let frozen = self.params.num_frozen_points as usize;
        if data.len() != frozen * self.dim {
            return Err(IndexError::InvalidParameter(format!(
                "start point data must hold {} rows of {} elements",
                frozen, self.dim
            )));
        }
        let mut start = self.start_points.write();
        if !start.is_empty() {
            return Err(IndexError::InvalidParameter("start points already configured".into()));
        }
        if self.tags.read().len() > 0 {
            return Err(IndexError::InvalidParameter(
                "start points must be configured before the first insert".into(),
            ));
        }
        for i in 0..frozen {
            let slot = (self.capacity + i) as u32;
            let row = &data[i * self.dim..(i + 1) * self.dim];
            // entry points take a zero lift coordinate and do not seed the
            // lift maximum
            let stored = match &self.lift {
                Some(l) => l.lift_query(row),
                None => row.to_vec(),
            };
            self.vectors.write(slot, &stored);
            self.states.set(slot, SlotState::Frozen);
            start.push(slot);
        }
        Ok(())
    }

    /// Pin entry points sampled uniformly from the sphere of radius `norm`.
    pub fn set_start_points_random(&self, norm: f32) -> Result<()> {
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(IndexError::InvalidParameter(format!(
                "start point norm must be positive and finite, got {norm}"
            )));
        }
        let frozen = self.params.num_frozen_points as usize;
        let mut rng = rand::rng();
        let mut data = Vec::with_capacity(frozen * self.dim);
        for _ in 0..frozen {
            let gauss: Vec<f32> = (0..self.dim).map(|_| gaussian(&mut rng)).collect();
            let len = gauss.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-12);
            data.extend(gauss.iter().map(|&x| T::from_f32(x / len * norm)));
        }
        self.set_start_points(&data)
    }

    /// Tombstone the point carrying `tag`. The slot stays in neighbor lists
    /// until the next consolidation, but is never returned by searches.
    /// Deleting the same tag twice is an idempotent `Ok`.
    pub fn lazy_delete(&self, tag: u32) -> Result<()> {
        if self.params.has_labels {
            return Err(IndexError::Unsupported(
                "deleting labeled points is not supported".into(),
            ));
        }
        // the shared gate keeps consolidation from freeing (and an insert
        // from reusing) the slot between the lookup and the transition
        let _gate = self.gate.read();
        let slot = self.tags.read().slot_of(tag).ok_or(IndexError::UnknownTag(tag))?;
        if self.states.transition(slot, SlotState::Live, SlotState::Tombstoned)
            || self.states.get(slot) == SlotState::Tombstoned
        {
            self.delete_set.write().insert(slot);
            Ok(())
        } else {
            Err(IndexError::UnknownTag(tag))
        }
    }

    /// Is `tag` bound to a slot? True for live and tombstoned points; false
    /// once a deleted tag has been consolidated away.
    pub fn contains_tag(&self, tag: u32) -> bool {
        self.tags.read().contains_tag(tag)
    }

    /// Out-neighbors of the point carrying `tag`, as tags. Frozen entry
    /// points in the list are skipped (they carry no tag). Intended for
    /// diagnostics and tests.
    pub fn neighbors(&self, tag: u32) -> Option<Vec<u32>> {
        let slot = self.tags.read().slot_of(tag)?;
        let snap = self.graph.snapshot(slot);
        let tags = self.tags.read();
        Some(snap.iter().filter_map(|&u| tags.tag_of(u)).collect())
    }

    /// Current counts.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            live_points: self.states.count(SlotState::Live),
            frozen_points: self.states.count(SlotState::Frozen),
            tombstoned_points: self.states.count(SlotState::Tombstoned),
            free_slots: self.tags.read().free_slots(),
            pending_deletes: self.delete_set.read().len(),
            capacity: self.capacity,
            dim: self.dim,
        }
    }

    /// Verify the engine's structural invariants and return [`IndexStats`].
    ///
    /// Intended for quiesced checkpoints (tests, post-consolidation sweeps);
    /// running it concurrently with mutators can observe benign transient
    /// states and report them as violations.
    pub fn audit(&self) -> Result<IndexStats> {
        let total = self.graph.total_slots() as u32;
        let r = self.params.max_degree as usize;

        for s in 0..total {
            let state = self.states.get(s);
            let snap = self.graph.snapshot(s);
            if state == SlotState::Free && !snap.is_empty() {
                return Err(IndexError::InvariantViolation(format!(
                    "free slot {s} has a non-empty neighbor list"
                )));
            }
            if snap.len() > r {
                return Err(IndexError::InvariantViolation(format!(
                    "slot {s} has degree {} above the bound {r}",
                    snap.len()
                )));
            }
            for &u in &snap {
                if u >= total {
                    return Err(IndexError::InvariantViolation(format!(
                        "slot {s} points at out-of-range slot {u}"
                    )));
                }
                if self.states.get(u) == SlotState::Free {
                    return Err(IndexError::InvariantViolation(format!(
                        "slot {s} points at free slot {u}"
                    )));
                }
            }
        }

        {
            let tags = self.tags.read();
            for (tag, slot) in tags.iter() {
                if tags.tag_of(slot) != Some(tag) {
                    return Err(IndexError::InvariantViolation(format!(
                        "tag map asymmetry for tag {tag} at slot {slot}"
                    )));
                }
                let state = self.states.get(slot);
                if state != SlotState::Live && state != SlotState::Tombstoned {
                    return Err(IndexError::InvariantViolation(format!(
                        "tagged slot {slot} is in state {state:?}"
                    )));
                }
            }
            let bound = tags.len();
            let by_state =
                self.states.count(SlotState::Live) + self.states.count(SlotState::Tombstoned);
            if bound != by_state {
                return Err(IndexError::InvariantViolation(format!(
                    "{bound} bound tags but {by_state} live+tombstoned slots"
                )));
            }
        }

        {
            let deletes = self.delete_set.read();
            for &s in deletes.iter() {
                if self.states.get(s) != SlotState::Tombstoned {
                    return Err(IndexError::InvariantViolation(format!(
                        "deletion-set slot {s} is not tombstoned"
                    )));
                }
            }
            let tombstoned = self.states.count(SlotState::Tombstoned);
            if deletes.len() != tombstoned {
                return Err(IndexError::InvariantViolation(format!(
                    "{} slots in the deletion set but {tombstoned} tombstoned",
                    deletes.len()
                )));
            }
        }

        Ok(self.stats())
    }

    // ── internal helpers shared by the protocol modules ──────────────────

    /// Lift (under MIPS) a base vector; padding is applied by the arena.
    fn prepare_base(&self, x: &[T]) -> Vec<T> {
        match &self.lift {
            Some(l) => l.lift_base(x),
            None => x.to_vec(),
        }
    }

    /// Lift (under MIPS) and pad a query to the arena width.
    fn prepare_query(&self, q: &[T]) -> Vec<T> {
        let mut v = match &self.lift {
            Some(l) => l.lift_query(q),
            None => q.to_vec(),
        };
        v.resize(self.aligned_dim, T::default());
        v
    }

    #[inline]
    fn check_dim(&self, len: usize) -> Result<()> {
        if len != self.dim {
            return Err(IndexError::DimensionMismatch { vector_dim: len, index_dim: self.dim });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn slot_distance(&self, a: u32, b: u32) -> f32 {
        T::l2_squared(self.vectors.vector(a), self.vectors.vector(b))
    }
}

/// Standard normal sample via Box–Muller.
fn gaussian<R: Rng>(rng: &mut R) -> f32 {
    let u1: f32 = rng.random::<f32>().max(1e-12);
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}
