//! Consolidation: reclaim tombstoned slots and repair neighbor lists.

use super::DynamicIndex;
use crate::distance::Element;
use crate::error::{IndexError, Result};
use crate::params::IndexWriteParameters;
use crate::store::SlotState;
use rayon::prelude::*;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Outcome of a consolidation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationStatus {
    /// The snapshot was fully processed; no neighbor list contains any slot
    /// that was in it.
    Success,
    /// The gate could not be acquired within the bounded wait. Recoverable:
    /// retry after backoff.
    LockFail,
    /// A slot-count invariant failed. The engine logs the details; callers
    /// decide whether to retry or abort.
    InconsistentCount,
}

/// Report returned by [`DynamicIndex::consolidate_deletes`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationReport {
    pub status: ConsolidationStatus,
    /// Live points after the pass.
    pub active_points: usize,
    /// Maximum tagged points the index can hold.
    pub max_points: usize,
    /// Free slots after the pass.
    pub empty_slots: usize,
    /// Slots physically reclaimed by this pass.
    pub slots_released: usize,
    /// Size of the deletion snapshot this pass worked from.
    pub delete_set_size: usize,
    pub elapsed: Duration,
}

impl ConsolidationReport {
    /// Fold the embedded status into a `Result`, for callers that prefer `?`
    /// over matching: `LockFail` becomes [`IndexError::LockTimeout`] and
    /// `InconsistentCount` becomes [`IndexError::InvariantViolation`].
    pub fn into_result(self) -> Result<ConsolidationReport> {
        match self.status {
            ConsolidationStatus::Success => Ok(self),
            ConsolidationStatus::LockFail => Err(IndexError::LockTimeout(self.elapsed)),
            ConsolidationStatus::InconsistentCount => Err(IndexError::InvariantViolation(
                "consolidation slot counts disagree with the tag map".into(),
            )),
        }
    }
}

impl<T: Element> DynamicIndex<T> {
    /// Reclaim every slot tombstoned before this call and repair the
    /// neighbor lists that referenced them.
    ///
    /// Takes the consolidation gate exclusively with a bounded wait
    /// (`params.gate_timeout`): in-flight inserts finish, new inserts and
    /// lazy deletes block for the duration of the pass. Searches proceed
    /// concurrently. The sweep runs across `params.num_threads` pool workers.
    ///
    /// Never returns `Err`: the status lives inside the report, matching the
    /// retry loop callers run on `LockFail`.
    pub fn consolidate_deletes(&self, params: &IndexWriteParameters) -> ConsolidationReport {
        let start = Instant::now();

        let Some(_gate) = self.gate.try_write_for(params.gate_timeout) else {
            tracing::debug!(timeout = ?params.gate_timeout, "consolidation gate unavailable");
            return self.report(ConsolidationStatus::LockFail, 0, 0, start);
        };

        let snapshot: HashSet<u32> = std::mem::take(&mut *self.delete_set.write());
        let snapshot_size = snapshot.len();
        if snapshot.is_empty() {
            return self.report(ConsolidationStatus::Success, 0, 0, start);
        }

        for &s in &snapshot {
            if self.states.get(s) != SlotState::Tombstoned {
                tracing::error!(slot = s, state = ?self.states.get(s), "deletion snapshot holds a non-tombstoned slot");
                // put the snapshot back so a retry sees it
                self.delete_set.write().extend(snapshot.iter().copied());
                return self.report(ConsolidationStatus::InconsistentCount, 0, snapshot_size, start);
            }
        }

        // Repair pass: every surviving slot whose list touches the snapshot
        // gets its removed neighbors replaced by their own out-neighbors,
        // then re-pruned. Disjoint slots repair in parallel.
        let total = self.graph.total_slots();
        let sweep = || {
            (0..total as u32).into_par_iter().for_each(|s| {
                if snapshot.contains(&s) || self.states.get(s) == SlotState::Free {
                    return;
                }
                let current = self.graph.snapshot(s);
                if !current.iter().any(|u| snapshot.contains(u)) {
                    return;
                }
                let mut expanded: Vec<u32> = Vec::with_capacity(current.len());
                for &u in &current {
                    if snapshot.contains(&u) {
                        expanded.extend(
                            self.graph
                                .snapshot(u)
                                .iter()
                                .copied()
                                .filter(|v| !snapshot.contains(v) && *v != s),
                        );
                    } else {
                        expanded.push(u);
                    }
                }
                let repaired = self.prune_from_slots(s, expanded);
                self.graph.set(s, repaired);
            });
        };
        match rayon::ThreadPoolBuilder::new().num_threads(params.num_threads as usize).build() {
            Ok(pool) => pool.install(sweep),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to the global pool for consolidation");
                sweep();
            }
        }

        // Free the snapshot slots: unlink, unbind tags, return to the free
        // list. Done after the barrier so no list still references them.
        let mut released = 0usize;
        let mut freed_cleanly = true;
        {
            let mut tags = self.tags.write();
            for &s in &snapshot {
                self.graph.clear(s);
                self.labels.clear(s);
                if !self.states.transition(s, SlotState::Tombstoned, SlotState::Free) {
                    tracing::error!(slot = s, "tombstoned slot changed state during consolidation");
                    freed_cleanly = false;
                    break;
                }
                tags.release(s);
                released += 1;
            }
        }
        if !freed_cleanly {
            return self.report(ConsolidationStatus::InconsistentCount, released, snapshot_size, start);
        }

        let live = self.states.count(SlotState::Live);
        let bound = self.tags.read().len() - self.states.count(SlotState::Tombstoned);
        if live != bound {
            tracing::error!(live, bound, "live-point count disagrees with the tag map");
            return self.report(ConsolidationStatus::InconsistentCount, released, snapshot_size, start);
        }

        let report = self.report(ConsolidationStatus::Success, released, snapshot_size, start);
        tracing::info!(
            active_points = report.active_points,
            slots_released = report.slots_released,
            empty_slots = report.empty_slots,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "consolidation complete"
        );
        report
    }

    fn report(
        &self,
        status: ConsolidationStatus,
        released: usize,
        snapshot_size: usize,
        start: Instant,
    ) -> ConsolidationReport {
        ConsolidationReport {
            status,
            active_points: self.states.count(SlotState::Live),
            max_points: self.capacity,
            empty_slots: self.tags.read().free_slots(),
            slots_released: released,
            delete_set_size: snapshot_size,
            elapsed: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;
    use crate::params::{IndexWriteParameters, IndexWriteParametersBuilder};

    fn params() -> IndexWriteParameters {
        IndexWriteParametersBuilder::new(15, 4).build()
    }

    fn ring_index(n: u32) -> DynamicIndex<f32> {
        let idx = DynamicIndex::new(Metric::L2, 2, n as usize, params()).unwrap();
        idx.set_start_points(&[0.0, 0.0]).unwrap();
        for i in 0..n {
            let angle = i as f32 / n as f32 * std::f32::consts::TAU;
            idx.insert_point(&[angle.cos(), angle.sin()], i + 1, None).unwrap();
        }
        idx
    }

    #[test]
    fn empty_delete_set_is_a_noop() {
        let idx = ring_index(12);
        let before: Vec<Vec<u32>> = (1..=12).map(|t| idx.neighbors(t).unwrap()).collect();
        let report = idx.consolidate_deletes(&params());
        assert_eq!(report.status, ConsolidationStatus::Success);
        assert_eq!(report.slots_released, 0);
        assert_eq!(report.delete_set_size, 0);
        let after: Vec<Vec<u32>> = (1..=12).map(|t| idx.neighbors(t).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn consolidation_unlinks_and_frees_tombstones() {
        let idx = ring_index(12);
        for t in [2u32, 5, 9] {
            idx.lazy_delete(t).unwrap();
        }
        let report = idx.consolidate_deletes(&params());
        assert_eq!(report.status, ConsolidationStatus::Success);
        assert_eq!(report.slots_released, 3);
        assert_eq!(report.active_points, 9);
        assert_eq!(report.delete_set_size, 3);

        // deleted tags are gone and no list references them
        for t in [2u32, 5, 9] {
            assert!(idx.neighbors(t).is_none());
        }
        for t in [1u32, 3, 4, 6, 7, 8, 10, 11, 12] {
            let n = idx.neighbors(t).unwrap();
            assert!(n.iter().all(|&u| ![2, 5, 9].contains(&u)));
        }
        idx.audit().unwrap();
    }

    #[test]
    fn freed_tag_is_reusable_after_consolidation() {
        let idx = ring_index(6);
        idx.lazy_delete(3).unwrap();
        assert!(idx.insert_point(&[0.2, 0.2], 3, None).is_err());
        let report = idx.consolidate_deletes(&params());
        assert_eq!(report.status, ConsolidationStatus::Success);
        idx.insert_point(&[0.2, 0.2], 3, None).unwrap();
        idx.audit().unwrap();
    }

    #[test]
    fn search_recovers_after_consolidation() {
        let idx = ring_index(12);
        // delete the three points nearest the query
        idx.lazy_delete(1).unwrap();
        idx.lazy_delete(2).unwrap();
        idx.lazy_delete(12).unwrap();
        let report = idx.consolidate_deletes(&params());
        assert_eq!(report.status, ConsolidationStatus::Success);

        let hits = idx.search(&[1.0, 0.0], 3, 15, None).unwrap();
        assert_eq!(hits.len(), 3);
        for (tag, _) in hits {
            assert!(![1, 2, 12].contains(&tag));
        }
    }

    #[test]
    fn held_gate_times_out_as_lock_fail() {
        let idx = ring_index(6);
        idx.lazy_delete(2).unwrap();

        let _held = idx.gate.write();
        let quick = IndexWriteParametersBuilder::new(15, 4)
            .with_gate_timeout(std::time::Duration::from_millis(1))
            .build();
        let report = idx.consolidate_deletes(&quick);
        assert_eq!(report.status, ConsolidationStatus::LockFail);
        assert!(matches!(report.into_result(), Err(IndexError::LockTimeout(_))));
        drop(_held);

        // with the gate released the retry succeeds
        let report = idx.consolidate_deletes(&quick);
        assert_eq!(report.status, ConsolidationStatus::Success);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn consolidation_report_counts_slots() {
        let idx = ring_index(8);
        idx.lazy_delete(1).unwrap();
        let report = idx.consolidate_deletes(&params());
        assert_eq!(report.max_points, 8);
        assert_eq!(report.active_points, 7);
        assert_eq!(report.empty_slots, 1);
    }
}
