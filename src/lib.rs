//! freshet: a streaming approximate-nearest-neighbor index.
//!
//! Maintains an in-memory Vamana-style proximity graph over a *sliding
//! window* of high-dimensional vectors, each carrying a user tag and
//! optional categorical labels. Points are continuously inserted on the
//! leading edge of the window; stale points on the trailing edge are lazily
//! tombstoned and later physically reclaimed by a consolidation pass that
//! repairs the graph. Searches run concurrently with inserts and deletes.
//!
//! # Architecture
//!
//! ```text
//! insert ──▶ greedy search ──▶ robust prune ──▶ back-link
//!                │                                  │
//!                ▼                                  ▼
//!          shared proximity graph  ◀── repair ── consolidate
//!                ▲                                  ▲
//!                │                                  │
//!             search                          lazy_delete
//! ```
//!
//! Three mutator families share one graph without global locks: inserts run
//! under the shared side of a consolidation gate and fine-grained per-slot
//! locks, searches traverse edge snapshots lock-free, and consolidation
//! takes the gate exclusively to reclaim tombstoned slots.
//!
//! # Example
//!
//! ```
//! use freshet::{DynamicIndex, IndexWriteParametersBuilder, Metric};
//!
//! let params = IndexWriteParametersBuilder::new(50, 16).with_alpha(1.2).build();
//! let index: DynamicIndex<f32> = DynamicIndex::new(Metric::L2, 4, 100, params.clone())?;
//! index.set_start_points_random(1.0)?;
//!
//! index.insert_point(&[1.0, 0.0, 0.0, 0.0], 1, None)?;
//! index.insert_point(&[0.0, 1.0, 0.0, 0.0], 2, None)?;
//!
//! let hits = index.search(&[0.9, 0.1, 0.0, 0.0], 1, 10, None)?;
//! assert_eq!(hits[0].0, 1);
//!
//! index.lazy_delete(1)?;
//! let report = index.consolidate_deletes(&params);
//! assert_eq!(report.slots_released, 1);
//! # Ok::<(), freshet::IndexError>(())
//! ```
//!
//! # Guarantees and non-guarantees
//!
//! - Results are approximate: close points, no optimality proof.
//! - An insert returns only after the new point is discoverable from every
//!   back-linked neighbor; a lazy delete returns only after searches stop
//!   returning the tag; consolidation returns only after no neighbor list
//!   references a reclaimed slot.
//! - Searches see a snapshot consistent with *some* serialization point
//!   between their start and end, nothing stronger.
//! - No durability beyond explicit [`DynamicIndex::save`] /
//!   [`DynamicIndex::load`].

pub mod distance;
pub mod error;
pub mod index;
pub mod params;

mod graph;
mod labels;
mod store;

pub use distance::{DataType, Element, Metric};
pub use error::{IndexError, Result};
pub use index::{
    BatchIngestSummary, ConsolidationReport, ConsolidationStatus, DynamicIndex, IndexStats,
};
pub use params::{IndexWriteParameters, IndexWriteParametersBuilder};
