//! Staging arena for raw weight bytes.
//!
//! The arena is sized once from the builder's budget and never grows. Each
//! loadable tensor owns a 32-byte aligned slot; checkpoint payloads are copied
//! straight into their slot.

use crate::error::{Result, TesseraError};

/// Alignment of every tensor slot, in bytes.
pub const TENSOR_ALIGNMENT: usize = 32;

/// Round `n` up to the next multiple of [`TENSOR_ALIGNMENT`].
pub fn align_up(n: usize) -> usize {
    n.div_ceil(TENSOR_ALIGNMENT) * TENSOR_ALIGNMENT
}

/// Fixed-size byte arena holding undecoded tensor data.
#[derive(Debug)]
pub struct WeightArena {
    data: Vec<u8>,
}

impl WeightArena {
    /// Reserve and zero `size` bytes, failing instead of aborting on OOM.
    pub fn allocate(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| TesseraError::AllocationFailure(size))?;
        data.resize(size, 0);
        Ok(Self { data })
    }

    /// Total capacity in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only view of a slot.
    pub fn slot(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = self.bounds(offset, len)?;
        Ok(&self.data[offset..end])
    }

    /// Mutable view of a slot.
    pub fn slot_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let end = self.bounds(offset, len)?;
        Ok(&mut self.data[offset..end])
    }

    fn bounds(&self, offset: usize, len: usize) -> Result<usize> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                TesseraError::InvalidInput(format!(
                    "arena slot {offset}+{len} exceeds {} bytes",
                    self.data.len()
                ))
            })
    }
}
