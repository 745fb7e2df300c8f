//! # Tessera
//!
//! Session-level inference over ALiBi transformer checkpoints.
//!
//! Wraps [`tessera_core`] with:
//! - **Engine**: one model, its tokenizer and a cached decode session
//! - **Config**: builder methods or a JSON file
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tessera::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Engine::builder()
//!         .model_path("mpt-7b-q4_0.bin")
//!         .family(ModelFamily::Mpt)
//!         .threads(8)
//!         .build()?;
//!
//!     let logits = engine.feed("The capital of France is")?;
//!     println!("{} scores", logits.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use tessera_core::*;

mod engine;
mod error;

pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use error::EngineError;

/// Commonly used types.
pub mod prelude {
    pub use crate::engine::{Engine, EngineBuilder, EngineConfig};
    pub use crate::error::EngineError;
    pub use tessera_core::model::{LogitsMode, ModelFamily};
    pub use tessera_core::tokenizer::TokenId;
}
