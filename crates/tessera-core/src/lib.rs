//! # Tessera Core
//!
//! Loading and KV-cached decoding for ALiBi decoder-only transformers stored
//! in the ggml checkpoint container (MPT and Replit families).
//!
//! This crate provides:
//! - **Checkpoint container** reading and writing ([`format`])
//! - **Quantized element types** with their block geometry ([`quantization`])
//! - **Tokenizers**: greedy byte-level for MPT, Viterbi unigram for Replit
//! - **Model** declaration, loading, realization and the decode engine
//!
//! # Example
//!
//! ```ignore
//! use tessera_core::prelude::*;
//!
//! let (mut model, tokenizer) = Model::load("replit-code.bin", &LoadOptions::new(ModelFamily::Replit))?;
//! let ids = tokenizer.tokenize("def fib(n):");
//! let mut engine = DecodeEngine::new();
//! let logits = engine.evaluate(&mut model, 4, 0, &ids, LogitsMode::Last)?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod format;
pub mod model;
pub mod quantization;
pub mod tokenizer;

pub use error::{Result, TesseraError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Result, TesseraError};
    pub use crate::model::{DecodeEngine, LoadOptions, LogitsMode, Model, ModelConfig, ModelFamily};
    pub use crate::tokenizer::{TokenId, Tokenizer};
}
