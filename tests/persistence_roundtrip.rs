//! Save/load fidelity.

use freshet::{DynamicIndex, IndexWriteParametersBuilder, Metric};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn random_points(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect()).collect()
}

fn build(n: usize, dim: usize) -> (DynamicIndex<f32>, Vec<Vec<f32>>) {
    let params = IndexWriteParametersBuilder::new(50, 24).with_alpha(1.2).build();
    let index = DynamicIndex::new(Metric::L2, dim, n, params).unwrap();
    index.set_start_points_random(1.0).unwrap();
    let points = random_points(n, dim, 41);
    for (j, p) in points.iter().enumerate() {
        index.insert_point(p, 1 + j as u32, None).unwrap();
    }
    (index, points)
}

/// A reloaded engine answers a fixed query set identically: bit-exact tags
/// and distances, top-10, over 100 random queries.
#[test]
fn reload_answers_queries_identically() {
    const N: usize = 1000;
    const DIM: usize = 16;
    let (index, _) = build(N, DIM);

    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("stream-index");
    index.save(&prefix, false).unwrap();
    let loaded = DynamicIndex::<f32>::load(&prefix).unwrap();

    for q in random_points(100, DIM, 1234) {
        let a = index.search(&q, 10, 50, None).unwrap();
        let b = loaded.search(&q, 10, 50, None).unwrap();
        assert_eq!(a, b);
    }
    loaded.audit().unwrap();
}

#[test]
fn compact_reload_matches_on_surviving_points() {
    const N: usize = 300;
    const DIM: usize = 8;
    let params = IndexWriteParametersBuilder::new(40, 16).build();
    let index: DynamicIndex<f32> = DynamicIndex::new(Metric::L2, DIM, N, params.clone()).unwrap();
    index.set_start_points_random(1.0).unwrap();
    let points = random_points(N, DIM, 77);
    for (j, p) in points.iter().enumerate() {
        index.insert_point(p, 1 + j as u32, None).unwrap();
    }
    for tag in 1..=50u32 {
        index.lazy_delete(tag).unwrap();
    }

    // compact save drops the tombstones without a consolidation pass
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("compacted");
    index.save(&prefix, true).unwrap();
    let loaded = DynamicIndex::<f32>::load(&prefix).unwrap();

    let stats = loaded.audit().unwrap();
    assert_eq!(stats.live_points, 250);
    assert_eq!(stats.tombstoned_points, 0);
    for tag in 1..=50u32 {
        assert!(!loaded.contains_tag(tag));
    }
    for tag in 51..=300u32 {
        assert!(loaded.contains_tag(tag));
    }

    // deleted points never resurface
    for q in random_points(20, DIM, 5150) {
        for (tag, _) in loaded.search(&q, 10, 40, None).unwrap() {
            assert!(tag > 50);
        }
    }
}

#[test]
fn mips_lift_survives_reload() {
    let params = IndexWriteParametersBuilder::new(20, 8).build();
    let index: DynamicIndex<f32> = DynamicIndex::new(Metric::Mips, 4, 32, params).unwrap();
    index.set_start_points(&[0.1, 0.1, 0.1, 0.1]).unwrap();
    index.insert_point(&[3.0, 0.0, 0.0, 0.0], 1, None).unwrap();
    index.insert_point(&[0.0, 1.0, 0.0, 0.0], 2, None).unwrap();

    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("mips");
    index.save(&prefix, false).unwrap();
    let loaded = DynamicIndex::<f32>::load(&prefix).unwrap();

    let q = [1.0, 0.0, 0.0, 0.0];
    assert_eq!(index.search(&q, 2, 10, None).unwrap(), loaded.search(&q, 2, 10, None).unwrap());

    // a post-reload insert keeps using the restored max norm
    loaded.insert_point(&[0.0, 0.0, 2.0, 0.0], 3, None).unwrap();
    loaded.audit().unwrap();
}

#[test]
fn labeled_index_round_trips_medoids() {
    let params = IndexWriteParametersBuilder::new(20, 8).with_labels(true).build();
    let index: DynamicIndex<f32> = DynamicIndex::new(Metric::L2, 4, 16, params).unwrap();
    index.set_start_points(&[0.0; 4]).unwrap();
    index.set_universal_label(0);
    index.insert_point(&[1.0, 0.0, 0.0, 0.0], 1, Some(&[1])).unwrap();
    index.insert_point(&[0.0, 1.0, 0.0, 0.0], 2, Some(&[2])).unwrap();
    index.insert_point(&[0.0, 0.0, 1.0, 0.0], 3, Some(&[0])).unwrap();

    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("labeled");
    index.save(&prefix, false).unwrap();
    let loaded = DynamicIndex::<f32>::load(&prefix).unwrap();

    let q = [0.5, 0.5, 0.5, 0.0];
    for filter in [[1u32], [2u32]] {
        assert_eq!(
            index.search(&q, 3, 20, Some(&filter)).unwrap(),
            loaded.search(&q, 3, 20, Some(&filter)).unwrap()
        );
    }
}
