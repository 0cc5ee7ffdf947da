//! Write-path parameters.
//!
//! One `IndexWriteParameters` value configures graph construction; a second,
//! independently built value typically configures consolidation (different
//! thread count, same graph shape). The builder mirrors the knobs in the
//! order a caller usually fixes them: beam width and degree first,
//! diversification after.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters governing insert and consolidate behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexWriteParameters {
    /// Build-time beam width (L). Larger values explore more of the graph per
    /// insert: better neighborhoods, slower builds.
    pub search_list_size: u32,
    /// Maximum out-degree per slot (R). Bounds memory and search latency.
    pub max_degree: u32,
    /// Prune diversification (α). 1.0 gives a sparse graph; 1.2–1.4 denser
    /// graphs with lower diameter.
    pub alpha: f32,
    /// Soft cap on the prune candidate pool (C).
    pub max_occlusion_size: u32,
    /// Pad pruned neighbor lists back up to R with the best-ranked
    /// non-selected candidates.
    pub saturate_graph: bool,
    /// Thread-pool size for the consolidation sweep. 0 means the pool
    /// default.
    pub num_threads: u32,
    /// Count of fixed entry points.
    pub num_frozen_points: u32,
    /// Beam width when a label filter is active (Lf). 0 falls back to L.
    pub filter_list_size: u32,
    /// Whether points carry label sets.
    pub has_labels: bool,
    /// Bounded wait for the consolidation gate.
    pub gate_timeout: Duration,
}

impl Default for IndexWriteParameters {
    fn default() -> Self {
        Self {
            search_list_size: 100,
            max_degree: 64,
            alpha: 1.2,
            max_occlusion_size: 500,
            saturate_graph: false,
            num_threads: 0,
            num_frozen_points: 1,
            filter_list_size: 0,
            has_labels: false,
            gate_timeout: Duration::from_millis(100),
        }
    }
}

impl IndexWriteParameters {
    /// Effective beam width for an operation touching labeled points.
    pub(crate) fn filtered_beam(&self) -> usize {
        if self.filter_list_size > 0 {
            self.filter_list_size as usize
        } else {
            self.search_list_size as usize
        }
    }

    /// Check internal consistency. Called by the engine constructor.
    pub fn validate(&self) -> Result<()> {
        if self.max_degree < 2 {
            return Err(IndexError::InvalidParameter(format!(
                "max_degree must be at least 2, got {}",
                self.max_degree
            )));
        }
        if self.search_list_size == 0 {
            return Err(IndexError::InvalidParameter(
                "search_list_size must be positive".into(),
            ));
        }
        if self.alpha < 1.0 || !self.alpha.is_finite() {
            return Err(IndexError::InvalidParameter(format!(
                "alpha must be a finite value >= 1.0, got {}",
                self.alpha
            )));
        }
        if self.max_occlusion_size == 0 {
            return Err(IndexError::InvalidParameter(
                "max_occlusion_size must be positive".into(),
            ));
        }
        if self.num_frozen_points == 0 {
            return Err(IndexError::InvalidParameter(
                "num_frozen_points must be positive: the graph needs at least one entry point"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`IndexWriteParameters`].
#[derive(Debug, Clone)]
pub struct IndexWriteParametersBuilder {
    inner: IndexWriteParameters,
}

impl IndexWriteParametersBuilder {
    /// Start from beam width `l` and max degree `r`; everything else takes
    /// its default.
    pub fn new(l: u32, r: u32) -> Self {
        Self {
            inner: IndexWriteParameters {
                search_list_size: l,
                max_degree: r,
                ..IndexWriteParameters::default()
            },
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.inner.alpha = alpha;
        self
    }

    pub fn with_max_occlusion_size(mut self, c: u32) -> Self {
        self.inner.max_occlusion_size = c;
        self
    }

    pub fn with_saturate_graph(mut self, saturate: bool) -> Self {
        self.inner.saturate_graph = saturate;
        self
    }

    pub fn with_num_threads(mut self, threads: u32) -> Self {
        self.inner.num_threads = threads;
        self
    }

    pub fn with_num_frozen_points(mut self, frozen: u32) -> Self {
        self.inner.num_frozen_points = frozen;
        self
    }

    pub fn with_filter_list_size(mut self, lf: u32) -> Self {
        self.inner.filter_list_size = lf;
        self
    }

    pub fn with_labels(mut self, has_labels: bool) -> Self {
        self.inner.has_labels = has_labels;
        self
    }

    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.inner.gate_timeout = timeout;
        self
    }

    /// Finish the builder. Validation happens in the engine constructor, not
    /// here, so a builder can describe a parameter set before the index
    /// exists.
    pub fn build(self) -> IndexWriteParameters {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let p = IndexWriteParametersBuilder::new(75, 32)
            .with_alpha(1.4)
            .with_max_occlusion_size(250)
            .with_saturate_graph(true)
            .with_num_threads(4)
            .with_num_frozen_points(2)
            .with_filter_list_size(90)
            .with_labels(true)
            .build();
        assert_eq!(p.search_list_size, 75);
        assert_eq!(p.max_degree, 32);
        assert_eq!(p.alpha, 1.4);
        assert_eq!(p.max_occlusion_size, 250);
        assert!(p.saturate_graph);
        assert_eq!(p.num_threads, 4);
        assert_eq!(p.num_frozen_points, 2);
        assert_eq!(p.filter_list_size, 90);
        assert!(p.has_labels);
    }

    #[test]
    fn validate_rejects_bad_alpha() {
        let p = IndexWriteParametersBuilder::new(50, 16).with_alpha(0.9).build();
        assert!(matches!(p.validate(), Err(IndexError::InvalidParameter(_))));
    }

    #[test]
    fn validate_rejects_zero_frozen() {
        let p = IndexWriteParametersBuilder::new(50, 16)
            .with_num_frozen_points(0)
            .build();
        assert!(p.validate().is_err());
    }

    #[test]
    fn filtered_beam_falls_back_to_l() {
        let p = IndexWriteParametersBuilder::new(64, 16).build();
        assert_eq!(p.filtered_beam(), 64);
        let p = IndexWriteParametersBuilder::new(64, 16).with_filter_list_size(48).build();
        assert_eq!(p.filtered_beam(), 48);
    }
}
