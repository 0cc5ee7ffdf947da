//! RobustPrune: diversifying neighbor selection under the α-shadow rule.

use super::{cand_cmp, Candidate, DynamicIndex};
use crate::distance::Element;
use crate::graph::AdjList;
use crate::store::SlotState;

impl<T: Element> DynamicIndex<T> {
    /// Select up to `max_degree` out-neighbors of `p` from `pool`.
    ///
    /// `pool` holds candidates scored against `p`; it may be unsorted and may
    /// contain `p` itself or duplicates. The pool is truncated to the
    /// occlusion cap before selection. Selection walks candidates nearest
    /// first; picking `c*` shadows every remaining `c'` with
    /// `α·d(c*, c') ≤ d(p, c')`. Distances are squared L2 throughout, as in
    /// the rest of the engine.
    ///
    /// With `saturate_graph`, the result is padded back up to `max_degree`
    /// with the closest non-selected candidates (shadowed ones included),
    /// ties broken on ascending slot index.
    pub(crate) fn robust_prune(&self, p: u32, pool: &mut Vec<Candidate>) -> AdjList {
        let r = self.params.max_degree as usize;
        let alpha = self.params.alpha;

        pool.retain(|c| c.slot != p);
        pool.sort_by(cand_cmp);
        // equal slots have equal distances, so duplicates are adjacent
        pool.dedup_by_key(|c| c.slot);
        pool.truncate(self.params.max_occlusion_size as usize);

        let mut result = AdjList::new();
        let mut shadowed = vec![false; pool.len()];

        for i in 0..pool.len() {
            if result.len() >= r {
                break;
            }
            if shadowed[i] {
                continue;
            }
            let chosen = pool[i];
            result.push(chosen.slot);
            for j in (i + 1)..pool.len() {
                if shadowed[j] {
                    continue;
                }
                let d_cc = self.slot_distance(chosen.slot, pool[j].slot);
                if alpha * d_cc <= pool[j].dist {
                    shadowed[j] = true;
                }
            }
        }

        if self.params.saturate_graph && result.len() < r {
            for c in pool.iter() {
                if result.len() >= r {
                    break;
                }
                if !result.contains(&c.slot) {
                    result.push(c.slot);
                }
            }
        }

        result
    }

    /// Score `candidates` against `p` and prune. Free slots and `p` itself
    /// are dropped before scoring.
    pub(crate) fn prune_from_slots<I>(&self, p: u32, candidates: I) -> AdjList
    where
        I: IntoIterator<Item = u32>,
    {
        let pv = self.vectors.vector(p);
        let mut pool: Vec<Candidate> = candidates
            .into_iter()
            .filter(|&s| s != p && self.states.get(s) != SlotState::Free)
            .map(|s| Candidate { slot: s, dist: T::l2_squared(pv, self.vectors.vector(s)) })
            .collect();
        self.robust_prune(p, &mut pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;
    use crate::params::{IndexWriteParameters, IndexWriteParametersBuilder};

    /// Index over 1-d points placed on a line; slot i sits at `positions[i]`.
    fn line_index(positions: &[f32], params: IndexWriteParameters) -> DynamicIndex<f32> {
        let index = DynamicIndex::new(Metric::L2, 1, positions.len().max(1), params).unwrap();
        index.set_start_points(&[1000.0]).unwrap();
        for (i, &x) in positions.iter().enumerate() {
            index.insert_point(&[x], i as u32, None).unwrap();
        }
        index
    }

    fn slot_of(index: &DynamicIndex<f32>, tag: u32) -> u32 {
        index.tags.read().slot_of(tag).unwrap()
    }

    #[test]
    fn alpha_shadow_drops_colinear_candidate() {
        // p at 0; candidates at 1, 2, 12. With α=1.2 (squared distances):
        // picking 1 shadows 2 (1.2·1 ≤ 4) but not 12 (1.2·121 = 145.2 > 144).
        let params = IndexWriteParametersBuilder::new(10, 8).with_alpha(1.2).build();
        let index = line_index(&[0.0, 1.0, 2.0, 12.0], params);

        let p = slot_of(&index, 0);
        let cands: Vec<u32> = [1, 2, 3].iter().map(|&t| slot_of(&index, t)).collect();
        let pruned = index.prune_from_slots(p, cands.iter().copied());

        assert!(pruned.contains(&slot_of(&index, 1)));
        assert!(!pruned.contains(&slot_of(&index, 2)));
        assert!(pruned.contains(&slot_of(&index, 3)));
    }

    #[test]
    fn degree_bound_is_respected() {
        let params = IndexWriteParametersBuilder::new(10, 2).with_alpha(1.0).build();
        let index = line_index(&[0.0, 1.0, -1.0, 2.0, -2.0, 3.0], params);
        let p = slot_of(&index, 0);
        let cands: Vec<u32> = (1..6).map(|t| slot_of(&index, t)).collect();
        let pruned = index.prune_from_slots(p, cands.iter().copied());
        assert!(pruned.len() <= 2);
    }

    #[test]
    fn pool_excludes_center_and_duplicates() {
        let params = IndexWriteParametersBuilder::new(10, 8).build();
        let index = line_index(&[0.0, 1.0], params);
        let p = slot_of(&index, 0);
        let other = slot_of(&index, 1);
        let pruned = index.prune_from_slots(p, [p, other, other, p]);
        assert_eq!(pruned.as_slice(), &[other]);
    }

    #[test]
    fn saturation_pads_with_shadowed_candidates() {
        // Without saturation the colinear chain collapses to few neighbors;
        // with it, shadowed candidates fill the list back up to R.
        let params = IndexWriteParametersBuilder::new(10, 3)
            .with_alpha(1.2)
            .with_saturate_graph(true)
            .build();
        let index = line_index(&[0.0, 1.0, 2.0, 3.0, 4.0], params);
        let p = slot_of(&index, 0);
        let cands: Vec<u32> = (1..5).map(|t| slot_of(&index, t)).collect();
        let pruned = index.prune_from_slots(p, cands.iter().copied());
        assert_eq!(pruned.len(), 3);
        // nearest shadowed candidate is re-admitted first
        assert!(pruned.contains(&slot_of(&index, 2)));
    }

    #[test]
    fn occlusion_cap_bounds_the_pool() {
        let params = IndexWriteParametersBuilder::new(10, 8)
            .with_max_occlusion_size(2)
            .with_alpha(1.0)
            .build();
        let index = line_index(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], params);
        let p = slot_of(&index, 0);
        let cands: Vec<u32> = (1..6).map(|t| slot_of(&index, t)).collect();
        let pruned = index.prune_from_slots(p, cands.iter().copied());
        // only the two closest candidates were even considered
        assert!(pruned.len() <= 2);
        assert!(pruned.contains(&slot_of(&index, 1)));
    }
}
