//! Error types for the session API.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by [`crate::Engine`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// Loading or decoding failed in the core crate.
    #[error(transparent)]
    Core(#[from] tessera_core::TesseraError),

    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for [`crate::EngineConfig`].
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    /// The builder was finished without a model path.
    #[error("no model path configured")]
    MissingModelPath,
}
