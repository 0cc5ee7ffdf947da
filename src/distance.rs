//! Distance kernel for dense vectors.
//!
//! The engine is monomorphized over the element type; one compiled kernel per
//! element type keeps the hot path free of virtual dispatch. Internally every
//! comparison is squared L2: maximum inner-product search is reduced to L2 by
//! the asymmetric lift (see [`MipsLift`]), so the kernel never branches on the
//! metric.
//!
//! ## Important nuance
//!
//! `l2_squared` returns the *squared* distance. Squared L2 preserves ordering,
//! which is all graph construction and search need, and skips the `sqrt` on
//! the hot path. Integer elements accumulate in `i32` before widening to
//! `f32` so that `i8`/`u8` kernels stay exact.

use serde::{Deserialize, Serialize};

/// Distance metric selected at index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Euclidean (L2) distance.
    L2,
    /// Maximum inner-product search, reduced to L2 by the augmented-dimension
    /// lift at ingest.
    Mips,
}

/// Element type tag carried in persisted metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Uint8,
    Float,
}

/// Vector element supported by the index.
///
/// Implementations exist for `i8`, `u8`, and `f32`. The kernel contract:
/// `l2_squared(a, b)` is finite and non-negative for equal-length slices,
/// and smaller means closer.
pub trait Element: Copy + Default + PartialEq + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Squared Euclidean distance between two equal-length slices.
    fn l2_squared(a: &[Self], b: &[Self]) -> f32;

    fn to_f32(self) -> f32;

    /// Lossy conversion used for random start points; saturates at the type's
    /// representable range.
    fn from_f32(v: f32) -> Self;

    /// Append this slice's little-endian bytes to `out`.
    fn write_le(src: &[Self], out: &mut Vec<u8>);

    /// Decode `src.len()` elements from little-endian bytes.
    fn read_le(bytes: &[u8], dst: &mut [Self]);
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::Float;

    #[inline]
    fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum()
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> f32 {
        v
    }

    fn write_le(src: &[f32], out: &mut Vec<u8>) {
        for v in src {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn read_le(bytes: &[u8], dst: &mut [f32]) {
        for (chunk, d) in bytes.chunks_exact(4).zip(dst.iter_mut()) {
            *d = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }
}

impl Element for i8 {
    const DATA_TYPE: DataType = DataType::Int8;

    #[inline]
    fn l2_squared(a: &[i8], b: &[i8]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let acc: i32 = a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| {
                let d = x as i32 - y as i32;
                d * d
            })
            .sum();
        acc as f32
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> i8 {
        v.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8
    }

    fn write_le(src: &[i8], out: &mut Vec<u8>) {
        out.extend(src.iter().map(|&v| v as u8));
    }

    fn read_le(bytes: &[u8], dst: &mut [i8]) {
        for (b, d) in bytes.iter().zip(dst.iter_mut()) {
            *d = *b as i8;
        }
    }
}

impl Element for u8 {
    const DATA_TYPE: DataType = DataType::Uint8;

    #[inline]
    fn l2_squared(a: &[u8], b: &[u8]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let acc: i32 = a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| {
                let d = x as i32 - y as i32;
                d * d
            })
            .sum();
        acc as f32
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> u8 {
        v.round().clamp(0.0, u8::MAX as f32) as u8
    }

    fn write_le(src: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(src);
    }

    fn read_le(bytes: &[u8], dst: &mut [u8]) {
        dst.copy_from_slice(&bytes[..dst.len()]);
    }
}

/// L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm<T: Element>(v: &[T]) -> f32 {
    v.iter().map(|x| x.to_f32() * x.to_f32()).sum::<f32>().sqrt()
}

/// Round a dimension up to the next multiple of 8, the padded width the
/// vector store allocates per slot.
#[inline]
#[must_use]
pub fn aligned_dim(dim: usize) -> usize {
    dim.div_ceil(8) * 8
}

/// MIPS → L2 asymmetric lift.
///
/// Base vectors are appended with a coordinate `sqrt(M² − ‖x‖²)` so that all
/// augmented norms equal the running maximum norm `M`; queries are appended
/// with 0. Under that transform, ascending L2 order of augmented vectors
/// equals descending inner-product order.
///
/// `M` is seeded by the first lifted base vector and fixed afterwards. A
/// later point whose norm exceeds `M` gets a clamped (zero) augmented
/// coordinate and a warning, which keeps the index well-formed at a small
/// rank-accuracy cost near that point.
#[derive(Debug, Default)]
pub struct MipsLift {
    max_norm: parking_lot::RwLock<f32>,
}

impl MipsLift {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current running maximum norm.
    pub fn max_norm(&self) -> f32 {
        *self.max_norm.read()
    }

    /// Restore the running maximum (used by load).
    pub fn set_max_norm(&self, m: f32) {
        *self.max_norm.write() = m;
    }

    /// Augment a base vector: returns `x` followed by the lift coordinate.
    pub fn lift_base<T: Element>(&self, x: &[T]) -> Vec<T> {
        let n = norm(x);
        let m = {
            let mut guard = self.max_norm.write();
            if *guard == 0.0 {
                *guard = n;
            }
            *guard
        };
        let slack = m * m - n * n;
        let aug = if slack >= 0.0 {
            slack.sqrt()
        } else {
            tracing::warn!(norm = n, max_norm = m, "vector norm exceeds lift maximum, clamping");
            0.0
        };
        let mut out = Vec::with_capacity(x.len() + 1);
        out.extend_from_slice(x);
        out.push(T::from_f32(aug));
        out
    }

    /// Augment a query vector with a zero coordinate.
    pub fn lift_query<T: Element>(&self, q: &[T]) -> Vec<T> {
        let mut out = Vec::with_capacity(q.len() + 1);
        out.extend_from_slice(q);
        out.push(T::default());
        out
    }
}
