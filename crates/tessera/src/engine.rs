//! High-level inference engine.
//!
//! [`Engine`] owns one loaded model, its tokenizer and a decode session, and
//! tracks how many positions are already cached so callers only pass new
//! tokens. The session sits behind a mutex; concurrent calls serialize.

use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tessera_core::model::{DecodeEngine, LoadOptions, LogitsMode, Model, ModelConfig, ModelFamily};
use tessera_core::tokenizer::{TokenId, Tokenizer};
use tracing::{debug, info};

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration for the inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the checkpoint file.
    pub model_path: PathBuf,
    /// Checkpoint family.
    pub family: ModelFamily,
    /// Context length override.
    #[serde(default)]
    pub context_length: Option<usize>,
    /// Number of trailing blocks to offload.
    #[serde(default)]
    pub gpu_layers: usize,
    /// Worker threads per evaluation.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            family: ModelFamily::Mpt,
            context_length: None,
            gpu_layers: 0,
            threads: default_threads(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Options passed to the checkpoint loader.
    pub fn load_options(&self) -> LoadOptions {
        let mut options = LoadOptions::new(self.family).with_gpu_layers(self.gpu_layers);
        if let Some(n) = self.context_length {
            options = options.with_context_length(n);
        }
        options
    }
}

/// Builder for creating an Engine.
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a new engine builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Set model path.
    pub fn model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.model_path = path.into();
        self
    }

    /// Set checkpoint family.
    pub fn family(mut self, family: ModelFamily) -> Self {
        self.config.family = family;
        self
    }

    /// Override the context length.
    pub fn context_length(mut self, n: usize) -> Self {
        self.config.context_length = Some(n);
        self
    }

    /// Offload the last `n` blocks.
    pub fn gpu_layers(mut self, n: usize) -> Self {
        self.config.gpu_layers = n;
        self
    }

    /// Set worker threads.
    pub fn threads(mut self, n: usize) -> Self {
        self.config.threads = n;
        self
    }

    /// Load the model and build the engine.
    pub fn build(self) -> Result<Engine> {
        if self.config.model_path.as_os_str().is_empty() {
            return Err(EngineError::MissingModelPath);
        }
        let (model, tokenizer) = Model::load(&self.config.model_path, &self.config.load_options())?;
        info!(path = %self.config.model_path.display(), threads = self.config.threads, "engine ready");
        Ok(Engine::from_parts(self.config, model, tokenizer))
    }
}

struct Session {
    model: Model,
    decoder: DecodeEngine,
    n_past: usize,
}

/// High-level inference engine.
pub struct Engine {
    config: EngineConfig,
    model_config: ModelConfig,
    tokenizer: Tokenizer,
    session: Mutex<Session>,
}

impl Engine {
    /// Create a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Build an engine from a JSON config file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        EngineBuilder::from_config(EngineConfig::from_file(path)?).build()
    }

    /// Wrap an already loaded model.
    pub fn from_parts(config: EngineConfig, model: Model, tokenizer: Tokenizer) -> Self {
        Self {
            config,
            model_config: model.config().clone(),
            tokenizer,
            session: Mutex::new(Session {
                model,
                decoder: DecodeEngine::new(),
                n_past: 0,
            }),
        }
    }

    /// Get engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolved model configuration.
    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    /// Get the tokenizer.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Text to token ids.
    pub fn tokenize(&self, text: &str) -> Vec<TokenId> {
        self.tokenizer.tokenize(text)
    }

    /// Token ids to text; invalid UTF-8 is replaced.
    pub fn detokenize(&self, ids: &[TokenId]) -> String {
        self.tokenizer.decode(ids)
    }

    /// Positions currently cached.
    pub fn n_past(&self) -> usize {
        self.session.lock().n_past
    }

    /// Context length.
    pub fn n_ctx(&self) -> usize {
        self.session.lock().model.n_ctx()
    }

    /// Append `ids` to the session and return the last position's logits.
    pub fn eval(&self, ids: &[TokenId]) -> Result<Vec<f32>> {
        self.eval_with(ids, LogitsMode::Last)
    }

    /// Append `ids` and return logits for the requested positions.
    ///
    /// On error the session position is unchanged.
    pub fn eval_with(&self, ids: &[TokenId], mode: LogitsMode) -> Result<Vec<f32>> {
        let mut guard = self.session.lock();
        let Session { model, decoder, n_past } = &mut *guard;
        let logits = decoder.evaluate(model, self.config.threads, *n_past, ids, mode)?;
        *n_past += ids.len();
        debug!(n_past = *n_past, "session advanced");
        Ok(logits)
    }

    /// Tokenize `prompt`, append it, and return the last position's logits.
    pub fn feed(&self, prompt: &str) -> Result<Vec<f32>> {
        self.eval(&self.tokenize(prompt))
    }

    /// Forget all cached positions.
    pub fn reset(&self) {
        let mut session = self.session.lock();
        session.model.clear_cache();
        session.n_past = 0;
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("model", &self.model_config)
            .finish()
    }
}
