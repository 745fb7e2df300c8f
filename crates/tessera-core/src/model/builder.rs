//! Model builder.
//!
//! Turns hyperparameters into the full set of tensor declarations the loader
//! expects: canonical names, element types, ggml shapes, placement and arena
//! offsets. The result is a pure function of its inputs.

use super::arena::{align_up, TENSOR_ALIGNMENT};
use super::directory::{Placement, TensorDesc, TensorDirectory, TensorId};
use crate::error::{Result, TesseraError};
use crate::format::HyperParams;
use crate::quantization::GgmlType;

/// Bookkeeping bytes charged per declared tensor.
pub const TENSOR_OVERHEAD: usize = 512;

/// Handles to the six tensors of one transformer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerHandles {
    /// Pre-attention norm weight.
    pub norm_1: TensorId,
    /// Fused query/key/value projection.
    pub wqkv: TensorId,
    /// Attention output projection.
    pub out_proj: TensorId,
    /// Pre-MLP norm weight.
    pub norm_2: TensorId,
    /// MLP expansion.
    pub up_proj: TensorId,
    /// MLP contraction.
    pub down_proj: TensorId,
    /// Whether this block lives on the accelerator.
    pub offloaded: bool,
}

/// Byte budget computed before anything is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryBudget {
    /// Aligned bytes of all loadable weights.
    pub weights: usize,
    /// Bytes of the key and value cache buffers together.
    pub cache: usize,
    /// Per-tensor bookkeeping.
    pub overhead: usize,
}

impl MemoryBudget {
    /// Total bytes.
    pub fn total(&self) -> usize {
        self.weights + self.cache + self.overhead
    }
}

/// Everything the loader needs to know before reading tensor records.
#[derive(Debug, Clone)]
pub struct Blueprint {
    /// Declared tensors.
    pub directory: TensorDirectory,
    /// Token embedding (also the output head).
    pub wte: TensorId,
    /// Final norm weight.
    pub norm_f: TensorId,
    /// Per-block handles.
    pub layers: Vec<LayerHandles>,
    /// Key cache (internal).
    pub memory_k: TensorId,
    /// Value cache (internal).
    pub memory_v: TensorId,
    /// Storage type of the large matrices.
    pub weight_type: GgmlType,
    /// Effective context length.
    pub n_ctx: usize,
    /// Byte budget.
    pub budget: MemoryBudget,
}

/// Declares the tensors of an ALiBi decoder.
#[derive(Debug)]
pub struct ModelBuilder {
    hparams: HyperParams,
    n_ctx: usize,
    gpu_layers: usize,
    directory: TensorDirectory,
    next_offset: usize,
}

impl ModelBuilder {
    /// Create a builder for the given hyperparameters.
    pub fn new(hparams: HyperParams, n_ctx: usize) -> Self {
        Self {
            hparams,
            n_ctx,
            gpu_layers: 0,
            directory: TensorDirectory::new(),
            next_offset: 0,
        }
    }

    /// Offload the last `n` blocks.
    pub fn with_gpu_layers(mut self, n: usize) -> Self {
        self.gpu_layers = n;
        self
    }

    /// Whether block `layer` is offloaded.
    pub fn is_offloaded(&self, layer: usize) -> bool {
        layer >= self.hparams.n_layers.saturating_sub(self.gpu_layers)
    }

    /// Declare every tensor and compute the budget.
    ///
    /// Every size is derived with checked arithmetic; hyperparameters whose
    /// tensors cannot be addressed are rejected as `InvalidFormat`.
    pub fn declare(mut self) -> Result<Blueprint> {
        let d = self.hparams.d_model;
        let d3 = checked_mul(3, d)?;
        let d4 = checked_mul(4, d)?;
        let n_vocab = self.hparams.n_vocab;
        let wtype = self.hparams.ftype.weight_type()?;

        let wte = self.weight("transformer.wte.weight", wtype, [d, n_vocab], Placement::Host)?;
        let norm_f = self.weight("transformer.norm_f.weight", GgmlType::F32, [d, 1], Placement::Host)?;

        let mut layers = Vec::with_capacity(self.hparams.n_layers);
        for i in 0..self.hparams.n_layers {
            let offloaded = self.is_offloaded(i);
            let placement = if offloaded {
                Placement::Offloaded
            } else {
                Placement::Host
            };
            let prefix = format!("transformer.blocks.{i}");
            layers.push(LayerHandles {
                norm_1: self.weight(&format!("{prefix}.norm_1.weight"), GgmlType::F32, [d, 1], placement)?,
                wqkv: self.weight(&format!("{prefix}.attn.Wqkv.weight"), wtype, [d, d3], placement)?,
                out_proj: self.weight(&format!("{prefix}.attn.out_proj.weight"), wtype, [d, d], placement)?,
                norm_2: self.weight(&format!("{prefix}.norm_2.weight"), GgmlType::F32, [d, 1], placement)?,
                up_proj: self.weight(&format!("{prefix}.ffn.up_proj.weight"), wtype, [d, d4], placement)?,
                down_proj: self.weight(&format!("{prefix}.ffn.down_proj.weight"), wtype, [d4, d], placement)?,
                offloaded,
            });
        }

        let cache_elements = checked_mul(checked_mul(d, self.hparams.n_layers)?, self.n_ctx)?;
        let memory_k = self.internal("memory_k", cache_elements)?;
        let memory_v = self.internal("memory_v", cache_elements)?;

        let cache = checked_add(
            self.directory.get(memory_k).nbytes,
            self.directory.get(memory_v).nbytes,
        )?;
        let budget = MemoryBudget {
            weights: self.next_offset,
            cache,
            overhead: checked_mul(self.directory.len(), TENSOR_OVERHEAD)?,
        };

        Ok(Blueprint {
            directory: self.directory,
            wte,
            norm_f,
            layers,
            memory_k,
            memory_v,
            weight_type: wtype,
            n_ctx: self.n_ctx,
            budget,
        })
    }

    fn weight(&mut self, name: &str, ttype: GgmlType, ne: [usize; 2], placement: Placement) -> Result<TensorId> {
        let nbytes = ttype.nbytes(checked_mul(ne[0], ne[1])?)?;
        let offset = self.next_offset;
        checked_add(nbytes, TENSOR_ALIGNMENT - 1)?;
        self.next_offset = checked_add(offset, align_up(nbytes))?;
        self.directory.declare(TensorDesc {
            name: name.to_string(),
            ttype,
            ne,
            nbytes,
            offset,
            placement,
            loadable: true,
        })
    }

    fn internal(&mut self, name: &str, n_elements: usize) -> Result<TensorId> {
        self.directory.declare(TensorDesc {
            name: name.to_string(),
            ttype: GgmlType::F16,
            ne: [n_elements, 1],
            nbytes: GgmlType::F16.nbytes(n_elements)?,
            offset: 0,
            placement: Placement::Host,
            loadable: false,
        })
    }
}

fn checked_mul(a: usize, b: usize) -> Result<usize> {
    a.checked_mul(b)
        .ok_or_else(|| TesseraError::format(format!("tensor size {a} x {b} overflows")))
}

fn checked_add(a: usize, b: usize) -> Result<usize> {
    a.checked_add(b)
        .ok_or_else(|| TesseraError::format(format!("tensor size {a} + {b} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::FileType;
    use proptest::prelude::*;

    fn hparams(ftype: i32) -> HyperParams {
        HyperParams {
            d_model: 64,
            max_seq_len: 128,
            n_heads: 4,
            n_layers: 3,
            n_vocab: 100,
            alibi_bias_max: 8.0,
            clip_qkv: 0.0,
            ftype: FileType::from_raw(ftype).unwrap(),
        }
    }

    #[test]
    fn declares_all_tensors() {
        let bp = ModelBuilder::new(hparams(0), 128).declare().unwrap();
        // wte, norm_f, 6 per layer, two cache tensors
        assert_eq!(bp.directory.len(), 2 + 6 * 3 + 2);
        assert_eq!(bp.layers.len(), 3);
        assert_eq!(bp.directory.get(bp.wte).ne, [64, 100]);

        let wqkv = bp.directory.lookup("transformer.blocks.1.attn.Wqkv.weight").unwrap();
        assert_eq!(bp.directory.get(wqkv).ne, [64, 192]);
        let down = bp.directory.lookup("transformer.blocks.2.ffn.down_proj.weight").unwrap();
        assert_eq!(bp.directory.get(down).ne, [256, 64]);
    }

    #[test]
    fn norms_stay_f32_under_quantized_ftype() {
        let bp = ModelBuilder::new(hparams(2), 128).declare().unwrap();
        assert_eq!(bp.weight_type, GgmlType::Q4_0);
        let l = bp.layers[0];
        assert_eq!(bp.directory.get(l.norm_1).ttype, GgmlType::F32);
        assert_eq!(bp.directory.get(l.up_proj).ttype, GgmlType::Q4_0);
        assert_eq!(bp.directory.get(l.up_proj).nbytes, 64 * 256 / 32 * 18);
    }

    #[test]
    fn cache_tensors_are_internal() {
        let bp = ModelBuilder::new(hparams(0), 16).declare().unwrap();
        assert_eq!(bp.directory.lookup("memory_k"), None);
        let k = bp.directory.get(bp.memory_k);
        assert_eq!(k.ttype, GgmlType::F16);
        assert_eq!(k.n_elements(), 64 * 3 * 16);
    }

    #[test]
    fn budget_accounts_for_cache_and_overhead() {
        let bp = ModelBuilder::new(hparams(0), 16).declare().unwrap();
        assert_eq!(bp.budget.cache, 2 * 64 * 3 * 16 * 2);
        assert_eq!(bp.budget.overhead, 22 * TENSOR_OVERHEAD);
        assert_eq!(
            bp.budget.total(),
            bp.budget.weights + bp.budget.cache + bp.budget.overhead
        );
    }

    #[test]
    fn offload_takes_trailing_layers() {
        let bp = ModelBuilder::new(hparams(0), 16)
            .with_gpu_layers(2)
            .declare()
            .unwrap();
        let flags: Vec<bool> = bp.layers.iter().map(|l| l.offloaded).collect();
        assert_eq!(flags, vec![false, true, true]);
        assert_eq!(
            bp.directory.get(bp.layers[2].wqkv).placement,
            Placement::Offloaded
        );
        assert_eq!(bp.directory.get(bp.wte).placement, Placement::Host);
    }

    #[test]
    fn offload_saturates() {
        let builder = ModelBuilder::new(hparams(0), 16).with_gpu_layers(10);
        assert!((0..3).all(|i| builder.is_offloaded(i)));
        let builder = ModelBuilder::new(hparams(0), 16);
        assert!((0..3).all(|i| !builder.is_offloaded(i)));
    }

    #[test]
    fn invalid_ftype_fails_declaration() {
        assert!(ModelBuilder::new(hparams(4), 16).declare().is_err());
    }

    #[test]
    fn oversized_model_is_rejected() {
        let hp = HyperParams {
            d_model: 1 << 30,
            n_heads: 1,
            n_layers: 1,
            n_vocab: 1,
            ..hparams(0)
        };
        assert!(matches!(
            ModelBuilder::new(hp, 16).declare(),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    #[test]
    fn oversized_cache_is_rejected() {
        let hp = HyperParams {
            d_model: 4,
            n_heads: 1,
            n_layers: 1,
            n_vocab: 1,
            ..hparams(0)
        };
        assert!(matches!(
            ModelBuilder::new(hp, usize::MAX).declare(),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    proptest! {
        #[test]
        fn offsets_are_aligned_and_disjoint(
            d_heads in 1usize..8,
            n_layers in 1usize..4,
            n_vocab in 1usize..64,
        ) {
            let hp = HyperParams {
                d_model: d_heads * 4,
                n_heads: 4,
                n_layers,
                n_vocab,
                ..hparams(0)
            };
            let bp = ModelBuilder::new(hp, 8).declare().unwrap();
            let mut end = 0;
            for (_, desc) in bp.directory.iter().filter(|(_, d)| d.loadable) {
                prop_assert_eq!(desc.offset % 32, 0);
                prop_assert!(desc.offset >= end);
                end = desc.offset + desc.nbytes;
            }
            prop_assert!(end <= bp.budget.weights);
        }
    }
}
