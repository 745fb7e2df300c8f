//! Model configuration.

use crate::format::HyperParams;
use serde::{Deserialize, Serialize};

/// Epsilon used by every layer norm.
pub const NORM_EPS: f64 = 1e-5;

/// ALiBi maximum bias used by the Replit family.
pub const REPLIT_ALIBI_BIAS_MAX: f32 = 8.0;

/// Supported checkpoint families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// MPT: byte-packed vocabulary, QKV clamp, ALiBi bias from the header.
    Mpt,
    /// Replit: scored unigram vocabulary, fixed ALiBi bias.
    Replit,
}

/// Where the ALiBi maximum bias comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlibiBias {
    /// Read from the hyperparameter block.
    Header,
    /// Fixed per family.
    Fixed(f32),
}

/// Family-specific switches driving the shared loader and decode engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FamilyConfig {
    /// Header carries `alibi_bias_max` + `clip_qkv`, and the QKV clamp applies.
    pub has_clamp: bool,
    /// Source of the ALiBi maximum bias.
    pub alibi: AlibiBias,
    /// Vocabulary entries are UTF-8 decoded and packed one byte per code point.
    pub packs_vocab: bool,
    /// Vocabulary entries carry a unigram score.
    pub scored_vocab: bool,
}

impl ModelFamily {
    /// Switches for this family.
    pub fn config(&self) -> FamilyConfig {
        match self {
            Self::Mpt => FamilyConfig {
                has_clamp: true,
                alibi: AlibiBias::Header,
                packs_vocab: true,
                scored_vocab: false,
            },
            Self::Replit => FamilyConfig {
                has_clamp: false,
                alibi: AlibiBias::Fixed(REPLIT_ALIBI_BIAS_MAX),
                packs_vocab: false,
                scored_vocab: true,
            },
        }
    }
}

impl std::str::FromStr for ModelFamily {
    type Err = crate::TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpt" => Ok(Self::Mpt),
            "replit" => Ok(Self::Replit),
            other => Err(crate::TesseraError::Config(format!(
                "unknown model family '{other}'"
            ))),
        }
    }
}

/// Resolved configuration of a loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Checkpoint family.
    pub family: ModelFamily,
    /// Embedding width.
    pub d_model: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Number of transformer blocks.
    pub n_layers: usize,
    /// Vocabulary size.
    pub n_vocab: usize,
    /// Trained maximum sequence length.
    pub max_seq_len: usize,
    /// Effective context length (KV cache capacity).
    pub n_ctx: usize,
    /// ALiBi maximum bias.
    pub alibi_bias_max: f32,
    /// QKV clamp bound, if the family clamps and the bound is positive.
    #[serde(default)]
    pub clip_qkv: Option<f32>,
    /// Raw `ftype` header value.
    pub ftype: i32,
}

impl ModelConfig {
    /// Resolve hyperparameters for a family and effective context length.
    pub fn from_hparams(hparams: &HyperParams, family: ModelFamily, n_ctx: usize) -> Self {
        let family_config = family.config();
        let alibi_bias_max = match family_config.alibi {
            AlibiBias::Header => hparams.alibi_bias_max,
            AlibiBias::Fixed(bias) => bias,
        };
        let clip_qkv = (family_config.has_clamp && hparams.clip_qkv > 0.0).then_some(hparams.clip_qkv);

        Self {
            family,
            d_model: hparams.d_model,
            n_heads: hparams.n_heads,
            n_layers: hparams.n_layers,
            n_vocab: hparams.n_vocab,
            max_seq_len: hparams.max_seq_len,
            n_ctx,
            alibi_bias_max,
            clip_qkv,
            ftype: hparams.ftype.raw(),
        }
    }

    /// Head dimension.
    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    /// Feed-forward hidden width.
    pub fn ffn_dim(&self) -> usize {
        4 * self.d_model
    }
}
