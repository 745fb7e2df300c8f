//! Bias-free layer normalization.
//!
//! # Formula
//!
//! `LayerNorm(x) = (x - mean(x)) / sqrt(var(x) + eps) * weight`
//!
//! The checkpoints carry no bias term, so only the scale is applied.

use crate::error::{Result, TesseraError};
use candle_core::{DType, Device, Tensor, D};

/// Layer normalization with a learned scale.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Scale: [hidden_size]
    weight: Tensor,
    eps: f64,
}

impl LayerNorm {
    /// Create a new layer norm with the given scale.
    pub fn new(weight: Tensor, eps: f64) -> Result<Self> {
        if weight.rank() != 1 {
            return Err(TesseraError::InvalidInput(format!(
                "layer norm weight must be 1-D, got {:?}",
                weight.dims()
            )));
        }
        Ok(Self { weight, eps })
    }

    /// Unit scale (for testing).
    pub fn ones(hidden_size: usize, eps: f64, device: &Device) -> Result<Self> {
        Self::new(Tensor::ones(hidden_size, DType::F32, device)?, eps)
    }

    /// Forward pass over `[..., hidden_size]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let rstd = (var + self.eps)?.sqrt()?.recip()?;
        Ok(centered.broadcast_mul(&rstd)?.broadcast_mul(&self.weight)?)
    }

    /// Hidden size.
    pub fn hidden_size(&self) -> usize {
        self.weight.dims()[0]
    }
}
