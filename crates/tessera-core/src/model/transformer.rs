//! Loaded model and the decode engine.

use super::builder::Blueprint;
use super::config::{ModelConfig, NORM_EPS};
use super::directory::{Placement, TensorDesc, TensorDirectory};
use super::loader::{CheckpointLoader, LoadOptions, LoadedCheckpoint};
use super::{weights, Attention, GeluMlp, KvCache, LayerNorm, ScratchBuffer, TransformerLayer};
use crate::error::{Result, TesseraError};
use crate::tokenizer::{TokenId, Tokenizer};
use candle_core::quantized::QMatMul;
use candle_core::{Device, Module, Tensor};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Which positions' logits an evaluation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogitsMode {
    /// Only the last position: `n_vocab` scores.
    #[default]
    Last,
    /// Every position, row-major `n_tokens × n_vocab`.
    All,
}

/// A loaded ALiBi decoder with its KV cache.
///
/// Weights are immutable after load; only the cache changes during decoding.
pub struct Model {
    config: ModelConfig,
    directory: TensorDirectory,
    /// Embedding table [n_vocab, d_model].
    wte: Tensor,
    /// Output head tied to `wte`.
    lm_head: QMatMul,
    norm_f: LayerNorm,
    layers: Vec<TransformerLayer>,
    cache: KvCache,
    device: Device,
}

impl Model {
    /// Load a checkpoint file and build its tokenizer.
    pub fn load(path: impl AsRef<Path>, options: &LoadOptions) -> Result<(Self, Tokenizer)> {
        let checkpoint = CheckpointLoader::new(options.clone()).read_file(path)?;
        Self::from_checkpoint(checkpoint)
    }

    /// Load from any byte stream.
    pub fn read<R: Read>(reader: &mut R, options: &LoadOptions) -> Result<(Self, Tokenizer)> {
        let checkpoint = CheckpointLoader::new(options.clone()).read(reader)?;
        Self::from_checkpoint(checkpoint)
    }

    /// Realize a parsed checkpoint on the compute devices.
    ///
    /// The staging arena is dropped once every weight has been materialized.
    pub fn from_checkpoint(checkpoint: LoadedCheckpoint) -> Result<(Self, Tokenizer)> {
        let LoadedCheckpoint {
            config,
            tokenizer,
            blueprint,
            arena,
            ..
        } = checkpoint;
        let Blueprint {
            directory,
            wte,
            norm_f,
            layers: handles,
            n_ctx,
            ..
        } = blueprint;

        let host = Device::Cpu;
        let offload = if handles.iter().any(|l| l.offloaded) {
            let device = Device::cuda_if_available(0)?;
            if !device.is_cuda() {
                warn!("offload requested but no accelerator is available, running on host");
            }
            device
        } else {
            host.clone()
        };

        let wte_desc = directory.get(wte);
        let wte_q = std::sync::Arc::new(weights::qtensor(wte_desc, &arena, &host)?);
        let wte = wte_q.dequantize(&host)?;
        let lm_head = QMatMul::from_arc(wte_q)?;
        let norm_f = LayerNorm::new(weights::dense(directory.get(norm_f), &arena, &host)?, NORM_EPS)?;

        let mut layers = Vec::with_capacity(handles.len());
        for (i, h) in handles.iter().enumerate() {
            let device = match directory.get(h.wqkv).placement {
                Placement::Offloaded => &offload,
                Placement::Host => &host,
            };
            let attention = Attention::new(
                weights::matmul(directory.get(h.wqkv), &arena, device)?,
                weights::matmul(directory.get(h.out_proj), &arena, device)?,
                config.n_heads,
                config.head_dim(),
                config.clip_qkv,
            );
            let mlp = GeluMlp::new(
                weights::matmul(directory.get(h.up_proj), &arena, device)?,
                weights::matmul(directory.get(h.down_proj), &arena, device)?,
            );
            layers.push(TransformerLayer::new(
                LayerNorm::new(weights::dense(directory.get(h.norm_1), &arena, device)?, NORM_EPS)?,
                attention,
                LayerNorm::new(weights::dense(directory.get(h.norm_2), &arena, device)?, NORM_EPS)?,
                mlp,
                i,
                device.clone(),
            ));
        }
        drop(arena);

        let cache = KvCache::new(config.n_layers, n_ctx, config.d_model)?;
        info!(
            family = ?config.family,
            n_layers = config.n_layers,
            offloaded = handles.iter().filter(|l| l.offloaded).count(),
            cache_bytes = cache.nbytes(),
            "model ready"
        );

        Ok((
            Self {
                config,
                directory,
                wte,
                lm_head,
                norm_f,
                layers,
                cache,
                device: host,
            },
            tokenizer,
        ))
    }

    /// Resolved configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Effective context length.
    pub fn n_ctx(&self) -> usize {
        self.cache.n_ctx()
    }

    /// Vocabulary size.
    pub fn n_vocab(&self) -> usize {
        self.config.n_vocab
    }

    /// Declared geometry of a tensor, including the internal cache tensors.
    pub fn tensor_info(&self, name: &str) -> Option<&TensorDesc> {
        self.directory.find(name)
    }

    /// All declared tensors.
    pub fn tensors(&self) -> impl Iterator<Item = &TensorDesc> {
        self.directory.iter().map(|(_, desc)| desc)
    }

    /// Decoder blocks.
    pub fn layers(&self) -> &[TransformerLayer] {
        &self.layers
    }

    /// KV cache contents.
    pub fn cache(&self) -> &KvCache {
        &self.cache
    }

    /// Zero the KV cache.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn forward(&mut self, scratch: &mut ScratchBuffer, n_past: usize, ids: &[TokenId], mode: LogitsMode) -> Result<Vec<f32>> {
        let n_tokens = ids.len();
        let ids = Tensor::new(ids, &self.device)?;
        let mut hidden = self.wte.index_select(&ids, 0)?;

        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mut self.cache, scratch, n_past, self.config.alibi_bias_max)?;
        }

        let hidden = self.norm_f.forward(&hidden.to_device(&self.device)?)?;
        let hidden = match mode {
            LogitsMode::Last => hidden.narrow(0, n_tokens - 1, 1)?,
            LogitsMode::All => hidden,
        };
        Ok(self.lm_head.forward(&hidden)?.flatten_all()?.to_vec1::<f32>()?)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("config", &self.config)
            .field("tensors", &self.directory.len())
            .field("device", &self.device)
            .finish()
    }
}

/// Session state for repeated forward passes.
///
/// Owns the host scratch buffer and the worker pool; the model (and its
/// cache) is borrowed per call.
#[derive(Debug, Default)]
pub struct DecodeEngine {
    scratch: ScratchBuffer,
    pool: Option<(usize, rayon::ThreadPool)>,
}

impl DecodeEngine {
    /// Create an engine with empty scratch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes per cached position seen by the first successful call.
    pub fn mem_per_token(&self) -> usize {
        self.scratch.mem_per_token()
    }

    /// Run `ids` at positions `n_past..n_past + ids.len()` and return logits.
    ///
    /// Inputs are validated before the cache is touched: an empty batch or an
    /// out-of-range id is `InvalidInput`, and a batch that does not fit in the
    /// context is `ContextOverflow`. Positions below `n_past` are never written.
    pub fn evaluate(
        &mut self,
        model: &mut Model,
        threads: usize,
        n_past: usize,
        ids: &[TokenId],
        mode: LogitsMode,
    ) -> Result<Vec<f32>> {
        if ids.is_empty() {
            return Err(TesseraError::InvalidInput("empty token batch".into()));
        }
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= model.n_vocab()) {
            return Err(TesseraError::InvalidInput(format!(
                "token id {bad} out of range for vocabulary of {}",
                model.n_vocab()
            )));
        }
        let n_ctx = model.n_ctx();
        let n_positions = match n_past.checked_add(ids.len()) {
            Some(n) if n <= n_ctx => n,
            _ => {
                return Err(TesseraError::ContextOverflow {
                    n_past,
                    n_tokens: ids.len(),
                    n_ctx,
                })
            }
        };
        let d_model = model.config.d_model;
        self.scratch.ensure(n_positions, d_model)?;
        let threads = threads.max(1);
        self.ensure_pool(threads)?;

        let Self { scratch, pool } = self;
        let logits = match pool {
            Some((_, pool)) => pool.install(|| model.forward(scratch, n_past, ids, mode))?,
            None => model.forward(scratch, n_past, ids, mode)?,
        };

        scratch.record(n_positions);
        debug!(n_past, n_tokens = ids.len(), threads, "evaluated batch");
        Ok(logits)
    }

    fn ensure_pool(&mut self, threads: usize) -> Result<()> {
        if matches!(&self.pool, Some((n, _)) if *n == threads) {
            return Ok(());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tessera-decode-{i}"))
            .build()
            .map_err(|e| TesseraError::Config(format!("failed to build thread pool: {e}")))?;
        self.pool = Some((threads, pool));
        Ok(())
    }
}
