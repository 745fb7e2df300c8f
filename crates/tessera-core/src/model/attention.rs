//! Multi-head self-attention with ALiBi position bias.
//!
//! Scores are biased by `slope_h · j` for key position `j`, then causally
//! masked against the absolute query position `n_past + i`. There are no
//! position embeddings.
//!
//! # Slopes
//!
//! With `n' = 2^floor(log2 H)`:
//!
//! - `m0 = 2^(-max_bias / n')`, `m1 = 2^(-(max_bias / 2) / n')`
//! - head `h < n'` gets `m0^(h+1)`, the rest get `m1^(2(h - n') + 1)`

use crate::error::Result;
use candle_core::quantized::QMatMul;
use candle_core::{Device, Module, Tensor, D};

/// ALiBi slope per head.
pub fn alibi_slopes(n_heads: usize, max_bias: f32) -> Vec<f32> {
    let n_pow2 = 1usize << (usize::BITS - 1 - n_heads.max(1).leading_zeros());
    let m0 = 2f32.powf(-max_bias / n_pow2 as f32);
    let m1 = 2f32.powf(-(max_bias / 2.0) / n_pow2 as f32);
    (0..n_heads)
        .map(|h| {
            if h < n_pow2 {
                m0.powi(h as i32 + 1)
            } else {
                m1.powi(2 * (h - n_pow2) as i32 + 1)
            }
        })
        .collect()
}

/// Additive bias `[n_heads, 1, n_keys]` with `bias[h][j] = slope_h · j`.
pub fn alibi_bias(n_heads: usize, n_keys: usize, max_bias: f32, device: &Device) -> Result<Tensor> {
    let slopes = alibi_slopes(n_heads, max_bias);
    let data: Vec<f32> = slopes
        .iter()
        .flat_map(|&m| (0..n_keys).map(move |j| m * j as f32))
        .collect();
    Ok(Tensor::from_vec(data, (n_heads, 1, n_keys), device)?)
}

/// Causal mask `[n_tokens, n_past + n_tokens]`.
///
/// Query `i` sits at absolute position `n_past + i` and may attend to keys
/// `0..=n_past + i`; later keys get `-inf`.
pub fn create_causal_mask(n_past: usize, n_tokens: usize, device: &Device) -> Result<Tensor> {
    let n_keys = n_past + n_tokens;
    let mask: Vec<f32> = (0..n_tokens)
        .flat_map(|i| {
            (0..n_keys).map(move |j| if j > n_past + i { f32::NEG_INFINITY } else { 0.0 })
        })
        .collect();
    Ok(Tensor::from_vec(mask, (n_tokens, n_keys), device)?)
}

/// Fused-QKV attention projections.
#[derive(Debug, Clone)]
pub struct Attention {
    /// d -> 3d
    wqkv: QMatMul,
    /// d -> d
    out_proj: QMatMul,
    n_heads: usize,
    head_dim: usize,
    clip_qkv: Option<f32>,
}

impl Attention {
    /// Create attention from its projections.
    pub fn new(wqkv: QMatMul, out_proj: QMatMul, n_heads: usize, head_dim: usize, clip_qkv: Option<f32>) -> Self {
        Self {
            wqkv,
            out_proj,
            n_heads,
            head_dim,
            clip_qkv,
        }
    }

    /// Random weights (for testing).
    pub fn random(hidden_size: usize, n_heads: usize, device: &Device) -> Result<Self> {
        let wqkv = Tensor::randn(0.0f32, 0.02, (3 * hidden_size, hidden_size), device)?;
        let out = Tensor::randn(0.0f32, 0.02, (hidden_size, hidden_size), device)?;
        Ok(Self::new(
            QMatMul::Tensor(wqkv),
            QMatMul::Tensor(out),
            n_heads,
            hidden_size / n_heads,
            None,
        ))
    }

    /// Number of heads.
    pub fn n_heads(&self) -> usize {
        self.n_heads
    }

    /// Head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Project `[tokens, d]` to `(q, k, v)`, each `[tokens, d]`.
    pub fn project(&self, x: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let mut qkv = self.wqkv.forward(x)?;
        if let Some(clip) = self.clip_qkv {
            qkv = qkv.clamp(-clip, clip)?;
        }
        let d = self.n_heads * self.head_dim;
        let q = qkv.narrow(D::Minus1, 0, d)?.contiguous()?;
        let k = qkv.narrow(D::Minus1, d, d)?.contiguous()?;
        let v = qkv.narrow(D::Minus1, 2 * d, d)?.contiguous()?;
        Ok((q, k, v))
    }

    /// Attend `q` (`[tokens, d]`) over all cached `keys`/`values`
    /// (`[n_past + tokens, d]`) and apply the output projection.
    pub fn attend(&self, q: &Tensor, keys: &Tensor, values: &Tensor, n_past: usize, alibi_bias_max: f32) -> Result<Tensor> {
        let n_tokens = q.dim(0)?;
        let n_keys = keys.dim(0)?;
        let device = q.device();

        let q = self.split_heads(q, n_tokens)?;
        let k = self.split_heads(keys, n_keys)?;
        let v = self.split_heads(values, n_keys)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let scores = scores.broadcast_add(&alibi_bias(self.n_heads, n_keys, alibi_bias_max, device)?)?;
        let scores = scores.broadcast_add(&create_causal_mask(n_past, n_tokens, device)?)?;

        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let out = weights
            .matmul(&v)?
            .transpose(0, 1)?
            .contiguous()?
            .reshape((n_tokens, self.n_heads * self.head_dim))?;

        Ok(self.out_proj.forward(&out)?)
    }

    /// `[rows, d]` -> `[n_heads, rows, head_dim]`
    fn split_heads(&self, x: &Tensor, rows: usize) -> Result<Tensor> {
        Ok(x
            .reshape((rows, self.n_heads, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()?)
    }
}
