//! Fixed-capacity aligned vector arena.

use crate::distance::Element;
use crate::error::{IndexError, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Flat arena of `slots × aligned_dim` elements, allocated with alignment
/// `8 · sizeof(T)` so a slot's lanes never straddle a vector register
/// boundary. Trailing pad lanes are kept zero, which makes padded distance
/// computations exact.
///
/// Concurrency contract (enforced by the engine, not the type system):
///
/// - `write` is called only by the unique owner of a FREE slot, before the
///   slot's state is published as LIVE or FROZEN.
/// - `vector` is called only for slots observed non-FREE; the bytes of a
///   non-FREE slot are immutable until consolidation frees it, so reads need
///   no lock.
pub(crate) struct VectorStore<T> {
    buf: NonNull<T>,
    layout: Layout,
    slots: usize,
    aligned_dim: usize,
}

// The arena hands out &[T] only under the contract above; raw-pointer
// storage does not restrict Send/Sync beyond T itself.
unsafe impl<T: Send> Send for VectorStore<T> {}
unsafe impl<T: Sync> Sync for VectorStore<T> {}

impl<T: Element> VectorStore<T> {
    pub fn new(slots: usize, aligned_dim: usize) -> Result<Self> {
        if slots == 0 || aligned_dim == 0 {
            return Err(IndexError::InvalidParameter(
                "vector store requires positive capacity and dimension".into(),
            ));
        }
        let len = slots
            .checked_mul(aligned_dim)
            .and_then(|n| n.checked_mul(std::mem::size_of::<T>()))
            .ok_or_else(|| IndexError::InvalidParameter("vector store size overflows".into()))?;
        let align = (8 * std::mem::size_of::<T>()).max(std::mem::align_of::<T>());
        let layout = Layout::from_size_align(len, align)
            .map_err(|e| IndexError::InvalidParameter(format!("vector store layout: {e}")))?;
        // SAFETY: layout has non-zero size (checked above); zeroed bytes are a
        // valid representation for all supported element types.
        let raw = unsafe { alloc_zeroed(layout) };
        let buf = match NonNull::new(raw.cast::<T>()) {
            Some(p) => p,
            None => std::alloc::handle_alloc_error(layout),
        };
        Ok(Self { buf, layout, slots, aligned_dim })
    }

    pub fn aligned_dim(&self) -> usize {
        self.aligned_dim
    }

    /// Store `data` into `slot`, zeroing the pad lanes.
    ///
    /// Caller must be the unique writer of `slot` (see the type-level
    /// contract).
    pub fn write(&self, slot: u32, data: &[T]) {
        debug_assert!((slot as usize) < self.slots);
        debug_assert!(data.len() <= self.aligned_dim);
        // SAFETY: slot is in bounds and uniquely owned by the caller; no
        // reader can observe it until the state is published.
        unsafe {
            let dst = self.buf.as_ptr().add(slot as usize * self.aligned_dim);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            for lane in data.len()..self.aligned_dim {
                *dst.add(lane) = T::default();
            }
        }
    }

    /// Borrow the full padded vector of `slot`.
    ///
    /// Caller must have observed `slot` as non-FREE.
    #[inline]
    pub fn vector(&self, slot: u32) -> &[T] {
        debug_assert!((slot as usize) < self.slots);
        // SAFETY: slot is in bounds; non-FREE slots are immutable (type-level
        // contract), so the shared borrow cannot race a write.
        unsafe {
            std::slice::from_raw_parts(
                self.buf.as_ptr().add(slot as usize * self.aligned_dim),
                self.aligned_dim,
            )
        }
    }
}

impl<T> Drop for VectorStore<T> {
    fn drop(&mut self) {
        // SAFETY: buf was allocated with this exact layout in `new`.
        unsafe { dealloc(self.buf.as_ptr().cast::<u8>(), self.layout) }
    }
}
