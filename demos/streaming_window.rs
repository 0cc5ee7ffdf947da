//! Sliding-window walkthrough: stream points through an active window,
//! lazily deleting the trailing edge and consolidating as the window moves.
//!
//! ```bash
//! cargo run --example streaming_window --release
//! ```

use freshet::{ConsolidationStatus, DynamicIndex, IndexWriteParametersBuilder, Metric};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

const DIM: usize = 32;
const ACTIVE_WINDOW: usize = 2_000;
const CONSOLIDATE_INTERVAL: usize = 500;
const TOTAL_POINTS: usize = 6_000;

fn main() {
    let params = IndexWriteParametersBuilder::new(75, 32)
        .with_alpha(1.2)
        .with_num_threads(4)
        .build();

    let index: DynamicIndex<f32> = DynamicIndex::new(
        Metric::L2,
        DIM,
        ACTIVE_WINDOW + 4 * CONSOLIDATE_INTERVAL,
        params.clone(),
    )
    .expect("index construction");
    index.set_start_points_random(1.0).expect("start points");

    let mut rng = StdRng::seed_from_u64(42);
    let points: Vec<Vec<f32>> = (0..TOTAL_POINTS)
        .map(|_| (0..DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect())
        .collect();

    println!("streaming {TOTAL_POINTS} points through a window of {ACTIVE_WINDOW}");
    let clock = Instant::now();

    // leading window
    let (data, tags) = flatten(&points, 0..ACTIVE_WINDOW);
    index.insert_batch(&data, &tags).expect("initial ingest");
    println!("  seeded {} points in {:?}", ACTIVE_WINDOW, clock.elapsed());

    let mut start = ACTIVE_WINDOW;
    while start + CONSOLIDATE_INTERVAL <= TOTAL_POINTS {
        let (data, tags) = flatten(&points, start..start + CONSOLIDATE_INTERVAL);
        index.insert_batch(&data, &tags).expect("ingest");

        if start >= ACTIVE_WINDOW + CONSOLIDATE_INTERVAL {
            let del_start = start - ACTIVE_WINDOW - CONSOLIDATE_INTERVAL;
            let del_end = start - ACTIVE_WINDOW;
            for j in del_start..del_end {
                index.lazy_delete(1 + j as u32).expect("lazy delete");
            }
            let mut backoff = Duration::from_millis(1);
            loop {
                let report = index.consolidate_deletes(&params);
                match report.status {
                    ConsolidationStatus::Success => {
                        println!(
                            "  window [{del_end}, {}): released {} slots, {} active, {:?}",
                            start + CONSOLIDATE_INTERVAL,
                            report.slots_released,
                            report.active_points,
                            report.elapsed
                        );
                        break;
                    }
                    ConsolidationStatus::LockFail => {
                        std::thread::sleep(backoff);
                        backoff = (backoff * 2).min(Duration::from_millis(100));
                    }
                    ConsolidationStatus::InconsistentCount => {
                        eprintln!("consolidation reported inconsistent counts");
                        std::process::exit(1);
                    }
                }
            }
        }
        start += CONSOLIDATE_INTERVAL;
    }

    let stats = index.stats();
    println!(
        "done in {:?}: {} live points, {} free slots",
        clock.elapsed(),
        stats.live_points,
        stats.free_slots
    );

    // spot-check: the most recent points are findable
    let probe = TOTAL_POINTS - 10;
    let hits = index.search(&points[probe], 5, 75, None).expect("search");
    println!("query for point {} returns:", probe + 1);
    for (tag, dist) in hits {
        println!("  tag {tag:>6}  distance {dist:.4}");
    }
}

fn flatten(points: &[Vec<f32>], range: std::ops::Range<usize>) -> (Vec<f32>, Vec<u32>) {
    let mut data = Vec::with_capacity(range.len() * DIM);
    let mut tags = Vec::with_capacity(range.len());
    for j in range {
        data.extend_from_slice(&points[j]);
        tags.push(1 + j as u32);
    }
    (data, tags)
}
