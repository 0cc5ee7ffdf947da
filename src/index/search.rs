//! GreedySearch: beam-expanded graph traversal.

use super::{cand_cmp, Candidate, DynamicIndex};
use crate::distance::Element;
use crate::error::{IndexError, Result};
use crate::store::SlotState;
use std::collections::HashSet;

/// Insert `c` into the ascending-sorted `beam`, keeping at most `cap`
/// entries; the farthest candidate is dropped on overflow.
fn push_candidate(beam: &mut Vec<Candidate>, cap: usize, c: Candidate) {
    let pos = beam.binary_search_by(|p| cand_cmp(p, &c)).unwrap_or_else(|p| p);
    if pos >= cap {
        return;
    }
    beam.insert(pos, c);
    beam.truncate(cap);
}

impl<T: Element> DynamicIndex<T> {
    /// Best-first traversal from `entries` toward `query` (already lifted
    /// and padded to the arena width).
    ///
    /// Lock-free over edges: each expansion reads a snapshot of one neighbor
    /// list and tolerates concurrent edits, because edges never point at
    /// FREE slots and published slots have immutable vector bytes. Slots
    /// observed FREE (stale snapshot) are skipped.
    ///
    /// Returns `(beam, expanded)`: the up-to-`beam_width` closest candidates
    /// found, and every candidate whose neighborhood was expanded — the
    /// candidate pool RobustPrune wants.
    pub(crate) fn greedy_search(
        &self,
        query: &[T],
        entries: &[u32],
        beam_width: usize,
    ) -> (Vec<Candidate>, Vec<Candidate>) {
        debug_assert_eq!(query.len(), self.vectors.aligned_dim());

        let mut beam: Vec<Candidate> = Vec::with_capacity(beam_width + 1);
        let mut visited: HashSet<u32> = HashSet::new();
        let mut expanded_ids: HashSet<u32> = HashSet::new();
        let mut expanded: Vec<Candidate> = Vec::new();

        for &e in entries {
            if self.states.get(e) == SlotState::Free {
                continue;
            }
            if visited.insert(e) {
                let dist = T::l2_squared(query, self.vectors.vector(e));
                push_candidate(&mut beam, beam_width, Candidate { slot: e, dist });
            }
        }

        // Tombstoned slots are expanded like any other: they stay useful as
        // transit nodes until consolidation unlinks them.
        loop {
            let Some(next) = beam.iter().find(|c| !expanded_ids.contains(&c.slot)).copied() else {
                break;
            };
            expanded_ids.insert(next.slot);
            expanded.push(next);

            for &u in &self.graph.snapshot(next.slot) {
                if self.states.get(u) == SlotState::Free {
                    continue;
                }
                if !visited.insert(u) {
                    continue;
                }
                let dist = T::l2_squared(query, self.vectors.vector(u));
                push_candidate(&mut beam, beam_width, Candidate { slot: u, dist });
            }
        }

        (beam, expanded)
    }

    /// Return the `k` nearest live points as `(tag, distance)` pairs,
    /// nearest first. Distances are squared L2 (over lifted vectors under
    /// MIPS). `l` is the beam width and must be at least `k`.
    ///
    /// With a `filter`, entry points are the filter labels' medoids (plus
    /// the universal label's, when set) and every returned point carries a
    /// filter label or the universal label. Non-matching points are still
    /// traversed as transit nodes; graph edges are not filter-aware.
    pub fn search(
        &self,
        query: &[T],
        k: usize,
        l: usize,
        filter: Option<&[u32]>,
    ) -> Result<Vec<(u32, f32)>> {
        self.check_dim(query.len())?;
        if k == 0 {
            return Err(IndexError::InvalidParameter("k must be positive".into()));
        }
        if l < k {
            return Err(IndexError::InvalidParameter(format!(
                "beam width {l} must be at least k = {k}"
            )));
        }

        let entries: Vec<u32> = match filter {
            Some(f) => self.labels.entry_points(f),
            None => self.start_points.read().clone(),
        };
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let q = self.prepare_query(query);
        let (beam, _) = self.greedy_search(&q, &entries, l);

        let tags = self.tags.read();
        let mut out = Vec::with_capacity(k);
        for c in beam {
            if out.len() == k {
                break;
            }
            if self.states.get(c.slot) != SlotState::Live {
                continue;
            }
            if let Some(f) = filter {
                if !self.labels.matches(c.slot, f) {
                    continue;
                }
            }
            if let Some(tag) = tags.tag_of(c.slot) {
                out.push((tag, c.dist));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;
    use crate::params::IndexWriteParametersBuilder;

    #[test]
    fn push_candidate_keeps_sorted_bounded() {
        let mut beam = Vec::new();
        for (slot, dist) in [(3, 0.5), (1, 0.2), (2, 0.9), (4, 0.1)] {
            push_candidate(&mut beam, 3, Candidate { slot, dist });
        }
        let order: Vec<u32> = beam.iter().map(|c| c.slot).collect();
        assert_eq!(order, vec![4, 1, 3]);
    }

    #[test]
    fn push_candidate_ties_break_on_slot() {
        let mut beam = Vec::new();
        push_candidate(&mut beam, 4, Candidate { slot: 9, dist: 1.0 });
        push_candidate(&mut beam, 4, Candidate { slot: 2, dist: 1.0 });
        let order: Vec<u32> = beam.iter().map(|c| c.slot).collect();
        assert_eq!(order, vec![2, 9]);
    }

    fn tiny_index() -> DynamicIndex<f32> {
        let params = IndexWriteParametersBuilder::new(10, 4).build();
        let index = DynamicIndex::new(Metric::L2, 2, 16, params).unwrap();
        index.set_start_points(&[0.0, 0.0]).unwrap();
        index
    }

    #[test]
    fn search_validates_arguments() {
        let index = tiny_index();
        assert!(index.search(&[0.0, 0.0, 0.0], 1, 10, None).is_err());
        assert!(index.search(&[0.0, 0.0], 0, 10, None).is_err());
        assert!(index.search(&[0.0, 0.0], 5, 3, None).is_err());
    }

    #[test]
    fn search_on_empty_index_returns_nothing() {
        let index = tiny_index();
        assert!(index.search(&[0.3, 0.3], 2, 10, None).unwrap().is_empty());
    }

    #[test]
    fn search_finds_nearest_points() {
        let index = tiny_index();
        for (tag, v) in [(1, [1.0, 0.0]), (2, [0.0, 1.0]), (3, [5.0, 5.0])] {
            index.insert_point(&v, tag, None).unwrap();
        }
        let hits = index.search(&[0.9, 0.1], 2, 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
        // distances come back ascending
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn tombstoned_points_are_never_returned() {
        let index = tiny_index();
        for (tag, v) in [(1, [1.0, 0.0]), (2, [0.0, 1.0])] {
            index.insert_point(&v, tag, None).unwrap();
        }
        index.lazy_delete(1).unwrap();
        let hits = index.search(&[1.0, 0.0], 2, 10, None).unwrap();
        assert!(hits.iter().all(|&(tag, _)| tag != 1));
    }
}
