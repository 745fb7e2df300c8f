//! Host staging buffer for cache reads.
//!
//! Cached F16 rows are widened into this buffer before being uploaded as
//! attention operands. The buffer belongs to one decode session and grows by
//! an explicit policy. The first successful call measures the peak number of
//! bytes staged per cached position (`mem_per_token`); later growth reserves
//! 10% above that estimate for the requested positions.

use crate::error::{Result, TesseraError};
use half::f16;
use tracing::debug;

const HEADROOM_NUM: usize = 11;
const HEADROOM_DEN: usize = 10;

/// Growable f32 staging buffer.
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    buf: Vec<f32>,
    mem_per_token: usize,
    /// Largest staging (in elements) since the last `record`.
    peak: usize,
}

impl ScratchBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Peak staged bytes per cached position, measured by the first successful call.
    pub fn mem_per_token(&self) -> usize {
        self.mem_per_token
    }

    /// Current capacity in bytes.
    pub fn capacity_bytes(&self) -> usize {
        self.buf.len() * std::mem::size_of::<f32>()
    }

    /// Make room for `n_positions` rows of `d_model` values.
    ///
    /// Starts a new call: peak usage is measured from here to `record`.
    pub fn ensure(&mut self, n_positions: usize, d_model: usize) -> Result<()> {
        self.peak = 0;
        let needed = n_positions.saturating_mul(d_model);
        if needed <= self.buf.len() {
            return Ok(());
        }
        let target = if self.mem_per_token > 0 {
            let estimate = self.mem_per_token.saturating_mul(n_positions) / std::mem::size_of::<f32>();
            estimate.max(needed).saturating_mul(HEADROOM_NUM) / HEADROOM_DEN
        } else {
            needed
        };
        self.grow(target)
    }

    /// Close a successful call over `n_positions` cached positions.
    ///
    /// The first call that staged anything fixes `mem_per_token` from its
    /// peak usage.
    pub fn record(&mut self, n_positions: usize) {
        let peak = std::mem::take(&mut self.peak);
        if self.mem_per_token == 0 && n_positions > 0 && peak > 0 {
            self.mem_per_token = (peak * std::mem::size_of::<f32>()).div_ceil(n_positions);
            debug!(mem_per_token = self.mem_per_token, peak, "measured scratch usage");
        }
    }

    /// Widen `src` into the front of the buffer and return it.
    pub fn stage(&mut self, src: &[f16]) -> Result<&[f32]> {
        if src.len() > self.buf.len() {
            self.grow(src.len())?;
        }
        self.peak = self.peak.max(src.len());
        let dst = &mut self.buf[..src.len()];
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s.to_f32();
        }
        Ok(dst)
    }

    fn grow(&mut self, target: usize) -> Result<()> {
        let bytes = target.saturating_mul(std::mem::size_of::<f32>());
        self.buf
            .try_reserve_exact(target - self.buf.len())
            .map_err(|_| TesseraError::AllocationFailure(bytes))?;
        self.buf.resize(target, 0.0);
        debug!(bytes, "grew scratch buffer");
        Ok(())
    }
}
