//! Insert protocol: new-point placement.

use super::DynamicIndex;
use crate::distance::Element;
use crate::error::{IndexError, Result};
use crate::store::{SlotState, TAG_NONE};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of a batch ingest: per-item failures are counted, not propagated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchIngestSummary {
    pub inserted: usize,
    pub failed: usize,
}

impl<T: Element> DynamicIndex<T> {
    /// Insert `vector` under `tag`, optionally carrying `labels`.
    ///
    /// The point becomes discoverable from every back-linked neighbor before
    /// this returns. Runs under the shared side of the consolidation gate,
    /// so a consolidation pass never begins mid-insert.
    ///
    /// Errors: [`IndexError::DuplicateTag`] when the tag is bound to a live
    /// or tombstoned slot (a deleted tag becomes reusable only after
    /// consolidation), [`IndexError::CapacityExhausted`] when no slot is
    /// free, and argument errors for bad dimension, the reserved tag value,
    /// or labels on an unlabeled index.
    pub fn insert_point(&self, vector: &[T], tag: u32, labels: Option<&[u32]>) -> Result<()> {
        self.check_dim(vector.len())?;
        if tag == TAG_NONE {
            return Err(IndexError::InvalidParameter("tag value u32::MAX is reserved".into()));
        }
        if labels.is_some() && !self.params.has_labels {
            return Err(IndexError::InvalidParameter(
                "index was not configured for labels".into(),
            ));
        }

        let _gate = self.gate.read();

        let slot = {
            let mut tags = self.tags.write();
            if tags.contains_tag(tag) {
                return Err(IndexError::DuplicateTag(tag));
            }
            tags.allocate(tag).ok_or(IndexError::CapacityExhausted)?
        };

        // The slot is uniquely owned until the state is published below.
        let stored = self.prepare_base(vector);
        self.vectors.write(slot, &stored);
        let label_set = labels.map(|ls| self.labels.record(slot, ls));
        self.states.set(slot, SlotState::Live);

        // Labeled points enter at their labels' medoids so the filtered
        // subgraphs stay connected; everything else enters at the frozen
        // start points.
        let (entries, beam) = match &label_set {
            Some(ls) if !ls.is_empty() => {
                let mut e = self.labels.entry_points(ls);
                e.retain(|&m| m != slot);
                if e.is_empty() {
                    (self.start_points.read().clone(), self.params.filtered_beam())
                } else {
                    (e, self.params.filtered_beam())
                }
            }
            _ => (self.start_points.read().clone(), self.params.search_list_size as usize),
        };

        if entries.is_empty() {
            // No entry points configured and nothing to link against: the
            // point stands alone until the graph grows around it.
            return Ok(());
        }

        let query = self.vectors.vector(slot);
        let (_, mut pool) = self.greedy_search(query, &entries, beam);
        pool.retain(|c| c.slot != slot);

        let neighbors = self.robust_prune(slot, &mut pool);
        self.graph.set(slot, neighbors.clone());

        // Back-link one neighbor at a time, acquire/release, never nested.
        for &u in &neighbors {
            let mut adj = self.graph.lock(u);
            if adj.contains(&slot) {
                continue;
            }
            if adj.len() < self.params.max_degree as usize {
                adj.push(slot);
            } else {
                let merged: Vec<u32> = adj.iter().copied().chain(std::iter::once(slot)).collect();
                // prune touches only the vector arena and the state array,
                // so holding u's lock here cannot deadlock
                *adj = self.prune_from_slots(u, merged);
            }
        }

        Ok(())
    }

    /// Insert `tags.len()` points from a flat row-major buffer, in parallel
    /// across the pool. Per-item failures are counted and logged, not
    /// propagated.
    pub fn insert_batch(&self, data: &[T], tags: &[u32]) -> Result<BatchIngestSummary> {
        if data.len() != tags.len() * self.dim {
            return Err(IndexError::InvalidParameter(format!(
                "batch data holds {} elements, expected {} rows of {}",
                data.len(),
                tags.len(),
                self.dim
            )));
        }

        let failed = AtomicUsize::new(0);
        let run = || {
            tags.par_iter().enumerate().for_each(|(i, &tag)| {
                let row = &data[i * self.dim..(i + 1) * self.dim];
                if let Err(e) = self.insert_point(row, tag, None) {
                    tracing::warn!(tag, error = %e, "batch insert failed for one point");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            });
        };

        let threads = self.params.num_threads as usize;
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to the global pool for batch ingest");
                run();
            }
        }

        let failed = failed.load(Ordering::Relaxed);
        Ok(BatchIngestSummary { inserted: tags.len() - failed, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;
    use crate::params::IndexWriteParametersBuilder;

    fn index(cap: usize) -> DynamicIndex<f32> {
        let params = IndexWriteParametersBuilder::new(10, 4).build();
        let idx = DynamicIndex::new(Metric::L2, 2, cap, params).unwrap();
        idx.set_start_points(&[0.0, 0.0]).unwrap();
        idx
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let idx = index(4);
        idx.insert_point(&[1.0, 0.0], 7, None).unwrap();
        assert_eq!(idx.insert_point(&[0.0, 1.0], 7, None), Err(IndexError::DuplicateTag(7)));
    }

    #[test]
    fn tombstoned_tag_still_counts_as_duplicate() {
        let idx = index(4);
        idx.insert_point(&[1.0, 0.0], 7, None).unwrap();
        idx.lazy_delete(7).unwrap();
        assert_eq!(idx.insert_point(&[0.0, 1.0], 7, None), Err(IndexError::DuplicateTag(7)));
    }

    #[test]
    fn capacity_exhaustion_surfaces() {
        let idx = index(2);
        idx.insert_point(&[1.0, 0.0], 1, None).unwrap();
        idx.insert_point(&[0.0, 1.0], 2, None).unwrap();
        assert_eq!(idx.insert_point(&[1.0, 1.0], 3, None), Err(IndexError::CapacityExhausted));
    }

    #[test]
    fn reserved_tag_is_rejected() {
        let idx = index(4);
        assert!(idx.insert_point(&[1.0, 0.0], u32::MAX, None).is_err());
    }

    #[test]
    fn labels_require_labeled_index() {
        let idx = index(4);
        assert!(idx.insert_point(&[1.0, 0.0], 1, Some(&[3])).is_err());
    }

    #[test]
    fn inserted_point_is_discoverable_through_backlinks() {
        let idx = index(8);
        for (tag, v) in [(1, [1.0, 0.0]), (2, [0.9, 0.1]), (3, [0.0, 1.0])] {
            idx.insert_point(&v, tag, None).unwrap();
        }
        // every point reachable: search from the frozen entry finds all
        let hits = idx.search(&[0.5, 0.5], 3, 10, None).unwrap();
        let mut tags: Vec<u32> = hits.iter().map(|&(t, _)| t).collect();
        tags.sort_unstable();
        assert_eq!(tags, vec![1, 2, 3]);
    }

    #[test]
    fn degree_bound_holds_under_many_inserts() {
        let params = IndexWriteParametersBuilder::new(20, 4).build();
        let idx = DynamicIndex::new(Metric::L2, 2, 64, params).unwrap();
        idx.set_start_points(&[0.0, 0.0]).unwrap();
        for i in 0..64u32 {
            let angle = i as f32 * 0.1;
            idx.insert_point(&[angle.cos(), angle.sin()], i + 1, None).unwrap();
        }
        idx.audit().unwrap();
    }

    #[test]
    fn batch_counts_failures() {
        let params = IndexWriteParametersBuilder::new(10, 4).with_num_threads(2).build();
        let idx = DynamicIndex::new(Metric::L2, 2, 8, params).unwrap();
        idx.set_start_points(&[0.0, 0.0]).unwrap();
        idx.insert_point(&[0.5, 0.5], 3, None).unwrap();

        // tag 3 collides; the rest land
        let data: Vec<f32> = (0..8).map(|i| i as f32 * 0.25).collect();
        let tags = [1u32, 2, 3, 4];
        let summary = idx.insert_batch(&data, &tags).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.inserted, 3);
        assert_eq!(idx.live_points(), 4);
    }
}
