//! Transformer decoder block.
//!
//! A single block combining:
//! - Pre-attention layer norm (`norm_1`)
//! - Fused-QKV ALiBi attention over the KV cache
//! - Pre-MLP layer norm (`norm_2`)
//! - GELU MLP
//!
//! Both sublayers add their output back onto the residual stream.

use super::{Attention, GeluMlp, KvCache, LayerNorm, ScratchBuffer};
use crate::error::Result;
use candle_core::{Device, Tensor};

/// One decoder block and the device it runs on.
#[derive(Debug, Clone)]
pub struct TransformerLayer {
    norm_1: LayerNorm,
    attention: Attention,
    norm_2: LayerNorm,
    mlp: GeluMlp,
    layer_idx: usize,
    device: Device,
}

impl TransformerLayer {
    /// Create a new block.
    pub fn new(
        norm_1: LayerNorm,
        attention: Attention,
        norm_2: LayerNorm,
        mlp: GeluMlp,
        layer_idx: usize,
        device: Device,
    ) -> Self {
        Self {
            norm_1,
            attention,
            norm_2,
            mlp,
            layer_idx,
            device,
        }
    }

    /// Random weights (for testing).
    pub fn random(hidden_size: usize, n_heads: usize, eps: f64, layer_idx: usize, device: &Device) -> Result<Self> {
        Ok(Self::new(
            LayerNorm::ones(hidden_size, eps, device)?,
            Attention::random(hidden_size, n_heads, device)?,
            LayerNorm::ones(hidden_size, eps, device)?,
            GeluMlp::random(hidden_size, device)?,
            layer_idx,
            device.clone(),
        ))
    }

    /// Block index.
    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }

    /// Device holding this block's weights.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Attention module.
    pub fn attention(&self) -> &Attention {
        &self.attention
    }

    /// Forward pass with the KV cache.
    ///
    /// Writes this block's keys and values for positions
    /// `n_past..n_past + tokens`, then attends over `0..n_past + tokens`.
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - `[tokens, hidden_size]` on any device
    /// * `cache` - Shared cache; this block uses its own layer slot
    /// * `scratch` - Host staging for cached rows
    /// * `n_past` - Positions already cached
    /// * `alibi_bias_max` - ALiBi maximum bias
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        cache: &mut KvCache,
        scratch: &mut ScratchBuffer,
        n_past: usize,
        alibi_bias_max: f32,
    ) -> Result<Tensor> {
        let hidden_states = hidden_states.to_device(&self.device)?;
        let n_tokens = hidden_states.dim(0)?;
        let d_model = cache.d_model();

        // Pre-attention norm
        let normed = self.norm_1.forward(&hidden_states)?;
        let (q, k, v) = self.attention.project(&normed)?;

        cache.write(
            self.layer_idx,
            n_past,
            &k.flatten_all()?.to_vec1::<f32>()?,
            &v.flatten_all()?.to_vec1::<f32>()?,
        )?;
        // The write succeeded, so this fits in the context.
        let n_keys = n_past + n_tokens;

        let keys = scratch.stage(cache.keys(self.layer_idx, n_keys)?)?;
        let keys = Tensor::from_slice(keys, (n_keys, d_model), &self.device)?;
        let values = scratch.stage(cache.values(self.layer_idx, n_keys)?)?;
        let values = Tensor::from_slice(values, (n_keys, d_model), &self.device)?;

        let attn_output = self.attention.attend(&q, &keys, &values, n_past, alibi_bias_max)?;
        let hidden_states = (hidden_states + attn_output)?;

        // Pre-MLP norm
        let normed = self.norm_2.forward(&hidden_states)?;
        let mlp_output = self.mlp.forward(&normed)?;

        Ok((hidden_states + mlp_output)?)
    }
}
