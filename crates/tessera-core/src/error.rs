//! Error types for Tessera Core.

use thiserror::Error;

/// Result type alias for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Errors that can occur while loading or evaluating a model.
#[derive(Error, Debug)]
pub enum TesseraError {
    /// I/O error (unopenable file, short read inside a payload).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The checkpoint violates the container format (bad magic, bad type code, ...).
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A tensor record names a tensor the model never declared.
    #[error("unknown tensor '{0}' in model file")]
    UnknownTensor(String),

    /// A declared tensor never appeared in the file.
    #[error("tensor '{0}' is missing from model file")]
    MissingTensor(String),

    /// Declared and file-provided geometry disagree.
    #[error("tensor '{name}' has wrong shape in model file: got {got:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Tensor name.
        name: String,
        /// Shape declared by the model builder (ggml order).
        expected: Vec<usize>,
        /// Shape found in the file (ggml order).
        got: Vec<usize>,
    },

    /// Declared and file-provided byte sizes disagree.
    #[error("tensor '{name}' has wrong size in model file: got {got}, expected {expected}")]
    SizeMismatch {
        /// Tensor name.
        name: String,
        /// Byte size of the declared tensor.
        expected: usize,
        /// Byte size implied by the record.
        got: usize,
    },

    /// A decode request does not fit in the KV cache.
    #[error("context overflow: {n_past} cached + {n_tokens} new tokens exceeds context length {n_ctx}")]
    ContextOverflow {
        /// Tokens already in the cache.
        n_past: usize,
        /// Tokens in the new batch.
        n_tokens: usize,
        /// Effective context length.
        n_ctx: usize,
    },

    /// Model or scratch memory could not be reserved.
    #[error("failed to allocate {0} bytes")]
    AllocationFailure(usize),

    /// Caller supplied an unusable argument (empty batch, out-of-range id, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl TesseraError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}
