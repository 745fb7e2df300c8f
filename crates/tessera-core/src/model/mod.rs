//! Model declaration, loading and inference.
//!
//! Loading runs in two phases:
//! - [`CheckpointLoader`] parses the container, declares every tensor via
//!   [`ModelBuilder`] and copies record payloads into a [`WeightArena`]
//! - [`Model::from_checkpoint`] realizes those bytes on the compute devices
//!
//! Decoding goes through [`DecodeEngine::evaluate`], which runs the blocks
//! over the model's [`KvCache`].

mod attention;
pub mod arena;
pub mod builder;
mod config;
pub mod directory;
mod kv_cache;
mod layer;
mod layer_norm;
pub mod loader;
mod mlp;
mod scratch;
mod transformer;
pub mod weights;

pub use arena::{WeightArena, TENSOR_ALIGNMENT};
pub use attention::{alibi_bias, alibi_slopes, create_causal_mask, Attention};
pub use builder::{Blueprint, LayerHandles, MemoryBudget, ModelBuilder, TENSOR_OVERHEAD};
pub use config::{AlibiBias, FamilyConfig, ModelConfig, ModelFamily, NORM_EPS, REPLIT_ALIBI_BIAS_MAX};
pub use directory::{Placement, TensorDesc, TensorDirectory, TensorId};
pub use kv_cache::KvCache;
pub use layer::TransformerLayer;
pub use layer_norm::LayerNorm;
pub use loader::{CheckpointLoader, LoadOptions, LoadedCheckpoint};
pub use mlp::GeluMlp;
pub use scratch::ScratchBuffer;
pub use transformer::{DecodeEngine, LogitsMode, Model};
