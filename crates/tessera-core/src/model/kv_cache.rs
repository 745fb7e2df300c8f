//! KV cache for autoregressive decoding.
//!
//! Keys and values live in two flat F16 buffers shaped
//! `[n_layers × n_ctx × d_model]`. The row for layer `l`, position `p` starts
//! at element `(l · n_ctx + p) · d_model`. Buffers are allocated once at load
//! and never shrink; a decode call writes only positions
//! `n_past..n_past + n_tokens`.

use crate::error::{Result, TesseraError};
use half::f16;

/// Fixed-capacity key/value cache.
#[derive(Debug, Clone)]
pub struct KvCache {
    keys: Vec<f16>,
    values: Vec<f16>,
    n_layers: usize,
    n_ctx: usize,
    d_model: usize,
}

impl KvCache {
    /// Allocate a zeroed cache.
    pub fn new(n_layers: usize, n_ctx: usize, d_model: usize) -> Result<Self> {
        let n_elements = n_layers
            .checked_mul(n_ctx)
            .and_then(|n| n.checked_mul(d_model))
            .ok_or(TesseraError::AllocationFailure(usize::MAX))?;
        Ok(Self {
            keys: zeroed(n_elements)?,
            values: zeroed(n_elements)?,
            n_layers,
            n_ctx,
            d_model,
        })
    }

    /// Capacity in positions.
    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    /// Number of layers.
    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    /// Row width.
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Combined size of both buffers in bytes.
    pub fn nbytes(&self) -> usize {
        (self.keys.len() + self.values.len()) * std::mem::size_of::<f16>()
    }

    /// Store `keys` and `values` (row-major, `d_model` per position) for
    /// layer `layer` starting at position `n_past`.
    pub fn write(&mut self, layer: usize, n_past: usize, keys: &[f32], values: &[f32]) -> Result<()> {
        let start = self.offset(layer, n_past, keys.len())?;
        if values.len() != keys.len() {
            return Err(TesseraError::InvalidInput(format!(
                "key/value length mismatch: {} vs {}",
                keys.len(),
                values.len()
            )));
        }
        for (dst, &src) in self.keys[start..start + keys.len()].iter_mut().zip(keys) {
            *dst = f16::from_f32(src);
        }
        for (dst, &src) in self.values[start..start + values.len()].iter_mut().zip(values) {
            *dst = f16::from_f32(src);
        }
        Ok(())
    }

    /// Cached keys of layer `layer` for positions `0..n_positions`.
    pub fn keys(&self, layer: usize, n_positions: usize) -> Result<&[f16]> {
        let len = self.prefix_len(n_positions)?;
        let start = self.offset(layer, 0, len)?;
        Ok(&self.keys[start..start + len])
    }

    /// Cached values of layer `layer` for positions `0..n_positions`.
    pub fn values(&self, layer: usize, n_positions: usize) -> Result<&[f16]> {
        let len = self.prefix_len(n_positions)?;
        let start = self.offset(layer, 0, len)?;
        Ok(&self.values[start..start + len])
    }

    /// Zero both buffers.
    pub fn clear(&mut self) {
        self.keys.fill(f16::ZERO);
        self.values.fill(f16::ZERO);
    }

    fn offset(&self, layer: usize, position: usize, len: usize) -> Result<usize> {
        if layer >= self.n_layers || len % self.d_model != 0 {
            return Err(TesseraError::InvalidInput(format!(
                "bad cache access: layer {layer}, {len} elements"
            )));
        }
        let n_positions = len / self.d_model;
        let overflow = || TesseraError::ContextOverflow {
            n_past: position,
            n_tokens: n_positions,
            n_ctx: self.n_ctx,
        };
        match position.checked_add(n_positions) {
            Some(end) if end <= self.n_ctx => {}
            _ => return Err(overflow()),
        }
        layer
            .checked_mul(self.n_ctx)
            .and_then(|row| row.checked_add(position))
            .and_then(|row| row.checked_mul(self.d_model))
            .ok_or_else(overflow)
    }

    fn prefix_len(&self, n_positions: usize) -> Result<usize> {
        match n_positions.checked_mul(self.d_model) {
            Some(len) if n_positions <= self.n_ctx => Ok(len),
            _ => Err(TesseraError::ContextOverflow {
                n_past: 0,
                n_tokens: n_positions,
                n_ctx: self.n_ctx,
            }),
        }
    }
}

fn zeroed(n: usize) -> Result<Vec<f16>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(n)
        .map_err(|_| TesseraError::AllocationFailure(n.saturating_mul(2)))?;
    buf.resize(n, f16::ZERO);
    Ok(buf)
}
