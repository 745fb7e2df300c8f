//! Checkpoint loading.
//!
//! Reads the container front to back into a [`LoadedCheckpoint`]: parsed
//! hyperparameters, the tokenizer, the declared tensor directory and a staging
//! arena holding every tensor's raw bytes. Nothing is realized on a compute
//! device here; see [`crate::model::Model::from_checkpoint`].
//!
//! # Example
//!
//! ```ignore
//! use tessera_core::model::{CheckpointLoader, LoadOptions, ModelFamily};
//!
//! let options = LoadOptions::new(ModelFamily::Mpt).with_context_length(1024);
//! let checkpoint = CheckpointLoader::new(options).read_file("mpt-7b.bin")?;
//! println!("{} tensors", checkpoint.blueprint.directory.len());
//! ```

use super::arena::WeightArena;
use super::builder::{Blueprint, ModelBuilder};
use super::config::{ModelConfig, ModelFamily};
use crate::error::{Result, TesseraError};
use crate::format::{read_magic, read_record_header, read_vocab, HyperParams, RecordHeader};
use crate::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Caller-controlled load parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Checkpoint family.
    pub family: ModelFamily,
    /// Context length override; `None` or `0` keeps the default.
    #[serde(default)]
    pub context_length: Option<usize>,
    /// Number of trailing blocks to offload.
    #[serde(default)]
    pub gpu_layers: usize,
}

impl LoadOptions {
    /// Defaults for a family.
    pub fn new(family: ModelFamily) -> Self {
        Self {
            family,
            context_length: None,
            gpu_layers: 0,
        }
    }

    /// Override the context length.
    pub fn with_context_length(mut self, n: usize) -> Self {
        self.context_length = Some(n);
        self
    }

    /// Offload the last `n` blocks.
    pub fn with_gpu_layers(mut self, n: usize) -> Self {
        self.gpu_layers = n;
        self
    }

    /// Load from JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&contents)?;
        Ok(options)
    }
}

/// Parsed checkpoint with weights still in raw form.
#[derive(Debug)]
pub struct LoadedCheckpoint {
    /// Header block as read.
    pub hparams: HyperParams,
    /// Resolved model configuration.
    pub config: ModelConfig,
    /// Tokenizer built from the vocabulary block.
    pub tokenizer: Tokenizer,
    /// Declared tensors and budget.
    pub blueprint: Blueprint,
    /// Raw tensor bytes, one slot per loadable tensor.
    pub arena: WeightArena,
}

/// Streams a checkpoint into a [`LoadedCheckpoint`].
#[derive(Debug, Clone)]
pub struct CheckpointLoader {
    options: LoadOptions,
}

impl CheckpointLoader {
    /// Create a loader.
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    /// Open and read a checkpoint file.
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<LoadedCheckpoint> {
        let path = path.as_ref();
        info!(path = %path.display(), family = ?self.options.family, "loading checkpoint");
        let file = File::open(path)?;
        self.read(&mut BufReader::new(file))
    }

    /// Read a checkpoint from any byte stream.
    pub fn read<R: Read>(&self, reader: &mut R) -> Result<LoadedCheckpoint> {
        let family = self.options.family;

        read_magic(reader)?;
        let hparams = HyperParams::read(reader, family)?;
        let n_ctx = hparams.context_length(self.options.context_length);
        let config = ModelConfig::from_hparams(&hparams, family, n_ctx);
        info!(
            d_model = hparams.d_model,
            max_seq_len = hparams.max_seq_len,
            n_heads = hparams.n_heads,
            n_layers = hparams.n_layers,
            n_vocab = hparams.n_vocab,
            ftype = hparams.ftype.raw(),
            qnt_version = hparams.ftype.qnt_version,
            n_ctx,
            "read hyperparameters"
        );

        let entries = read_vocab(reader, hparams.n_vocab, family.config().scored_vocab)?;
        let tokenizer = Tokenizer::from_entries(entries, family)?;

        let blueprint = ModelBuilder::new(hparams, n_ctx)
            .with_gpu_layers(self.options.gpu_layers)
            .declare()?;
        info!(
            weight_type = %blueprint.weight_type,
            weights = blueprint.budget.weights,
            cache = blueprint.budget.cache,
            total = blueprint.budget.total(),
            "memory budget"
        );

        let mut arena = WeightArena::allocate(blueprint.budget.weights)?;
        let mut filled = vec![false; blueprint.directory.len()];
        let mut n_records = 0usize;

        while let Some(header) = read_record_header(reader)? {
            load_record(reader, &header, &blueprint, &mut arena, &mut filled)?;
            n_records += 1;
        }

        if let Some((_, missing)) = blueprint
            .directory
            .iter()
            .find(|(id, desc)| desc.loadable && !filled[id.index()])
        {
            return Err(TesseraError::MissingTensor(missing.name.clone()));
        }

        info!(n_records, "loaded all tensors");
        Ok(LoadedCheckpoint {
            hparams,
            config,
            tokenizer,
            blueprint,
            arena,
        })
    }
}

fn load_record<R: Read>(
    reader: &mut R,
    header: &RecordHeader,
    blueprint: &Blueprint,
    arena: &mut WeightArena,
    filled: &mut [bool],
) -> Result<()> {
    let id = blueprint
        .directory
        .lookup(&header.name)
        .ok_or_else(|| TesseraError::UnknownTensor(header.name.clone()))?;
    let desc = blueprint.directory.get(id);

    if header.n_elements() != desc.n_elements() || header.ne != desc.ne {
        return Err(TesseraError::ShapeMismatch {
            name: header.name.clone(),
            expected: desc.ne.to_vec(),
            got: header.ne.to_vec(),
        });
    }

    let nbytes = header
        .n_elements()
        .checked_mul(header.ttype.type_size())
        .map(|bytes| bytes / desc.ttype.block_size())
        .ok_or_else(|| TesseraError::format(format!("tensor '{}' size overflows", header.name)))?;
    if nbytes != desc.nbytes {
        return Err(TesseraError::SizeMismatch {
            name: header.name.clone(),
            expected: desc.nbytes,
            got: nbytes,
        });
    }

    if filled[id.index()] {
        return Err(TesseraError::format(format!(
            "duplicate record for tensor '{}'",
            header.name
        )));
    }

    reader.read_exact(arena.slot_mut(desc.offset, desc.nbytes)?)?;
    filled[id.index()] = true;

    debug!(
        name = %header.name,
        ttype = %header.ttype,
        ne = ?header.ne,
        nbytes,
        "loaded tensor"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CheckpointWriter, VocabEntry};
    use crate::quantization::{FileType, GgmlType};
    use std::io::Cursor;

    const D: usize = 8;
    const N_VOCAB: usize = 4;

    fn hparams() -> HyperParams {
        HyperParams {
            d_model: D,
            max_seq_len: 16,
            n_heads: 2,
            n_layers: 1,
            n_vocab: N_VOCAB,
            alibi_bias_max: 8.0,
            clip_qkv: 0.0,
            ftype: FileType::from_raw(0).unwrap(),
        }
    }

    fn tensors() -> Vec<(String, Vec<usize>)> {
        vec![
            ("transformer.wte.weight".into(), vec![D, N_VOCAB]),
            ("transformer.norm_f.weight".into(), vec![D]),
            ("transformer.blocks.0.norm_1.weight".into(), vec![D]),
            ("transformer.blocks.0.attn.Wqkv.weight".into(), vec![D, 3 * D]),
            ("transformer.blocks.0.attn.out_proj.weight".into(), vec![D, D]),
            ("transformer.blocks.0.norm_2.weight".into(), vec![D]),
            ("transformer.blocks.0.ffn.up_proj.weight".into(), vec![D, 4 * D]),
            ("transformer.blocks.0.ffn.down_proj.weight".into(), vec![4 * D, D]),
        ]
    }

    fn checkpoint(family: ModelFamily, edit: impl FnOnce(&mut Vec<(String, Vec<usize>)>)) -> Vec<u8> {
        let mut list = tensors();
        edit(&mut list);

        let mut w = CheckpointWriter::new(Vec::new(), family);
        w.write_header(&hparams()).unwrap();
        let vocab: Vec<VocabEntry> = ["a", "b", "c", "d"]
            .iter()
            .map(|t| VocabEntry::scored(*t, -1.0))
            .collect();
        w.write_vocab(&vocab).unwrap();
        for (name, ne) in list {
            let n: usize = ne.iter().product();
            let data: Vec<f32> = (0..n).map(|i| i as f32 * 0.01).collect();
            w.write_f32_tensor(&name, &ne, &data).unwrap();
        }
        w.finish().unwrap()
    }

    fn load(bytes: Vec<u8>, family: ModelFamily) -> Result<LoadedCheckpoint> {
        CheckpointLoader::new(LoadOptions::new(family)).read(&mut Cursor::new(bytes))
    }

    #[test]
    fn loads_complete_checkpoint() {
        for family in [ModelFamily::Mpt, ModelFamily::Replit] {
            let ckpt = load(checkpoint(family, |_| {}), family).unwrap();
            assert_eq!(ckpt.config.n_ctx, 16);
            assert_eq!(ckpt.tokenizer.vocab_size(), N_VOCAB);

            let id = ckpt.blueprint.directory.lookup("transformer.norm_f.weight").unwrap();
            let desc = ckpt.blueprint.directory.get(id);
            let bytes = ckpt.arena.slot(desc.offset, desc.nbytes).unwrap();
            let second = f32::from_le_bytes(bytes[4..8].try_into().unwrap());
            assert_eq!(second, 0.01);
        }
    }

    #[test]
    fn record_order_is_free() {
        let bytes = checkpoint(ModelFamily::Mpt, |list| list.reverse());
        assert!(load(bytes, ModelFamily::Mpt).is_ok());
    }

    #[test]
    fn context_override_is_capped() {
        let bytes = checkpoint(ModelFamily::Mpt, |_| {});
        let options = LoadOptions::new(ModelFamily::Mpt).with_context_length(4);
        let ckpt = CheckpointLoader::new(options)
            .read(&mut Cursor::new(bytes))
            .unwrap();
        assert_eq!(ckpt.config.n_ctx, 4);
        assert_eq!(ckpt.blueprint.budget.cache, 2 * D * 4 * 2);
    }

    #[test]
    fn unknown_tensor_rejected() {
        let bytes = checkpoint(ModelFamily::Mpt, |list| {
            list.push(("transformer.blocks.7.norm_1.weight".into(), vec![D]));
        });
        let err = load(bytes, ModelFamily::Mpt).unwrap_err();
        assert!(matches!(err, TesseraError::UnknownTensor(n) if n == "transformer.blocks.7.norm_1.weight"));
    }

    #[test]
    fn cache_tensors_not_loadable() {
        let bytes = checkpoint(ModelFamily::Mpt, |list| {
            list.push(("memory_k".into(), vec![D * 16]));
        });
        assert!(matches!(
            load(bytes, ModelFamily::Mpt),
            Err(TesseraError::UnknownTensor(_))
        ));
    }

    #[test]
    fn transposed_shape_rejected() {
        let bytes = checkpoint(ModelFamily::Mpt, |list| {
            list[3].1 = vec![3 * D, D];
        });
        match load(bytes, ModelFamily::Mpt).unwrap_err() {
            TesseraError::ShapeMismatch { name, expected, got } => {
                assert_eq!(name, "transformer.blocks.0.attn.Wqkv.weight");
                assert_eq!(expected, vec![D, 3 * D]);
                assert_eq!(got, vec![3 * D, D]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn element_count_mismatch_rejected() {
        let bytes = checkpoint(ModelFamily::Mpt, |list| {
            list[1].1 = vec![D + 1];
        });
        assert!(matches!(
            load(bytes, ModelFamily::Mpt),
            Err(TesseraError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn wrong_element_type_rejected() {
        let mut w = CheckpointWriter::new(Vec::new(), ModelFamily::Mpt);
        w.write_header(&hparams()).unwrap();
        w.write_vocab(&vec![VocabEntry::plain("a"); N_VOCAB]).unwrap();
        w.write_tensor("transformer.norm_f.weight", GgmlType::F16, &[D], &[0u8; 2 * D])
            .unwrap();
        let err = load(w.finish().unwrap(), ModelFamily::Mpt).unwrap_err();
        match err {
            TesseraError::SizeMismatch { expected, got, .. } => {
                assert_eq!(expected, 4 * D);
                assert_eq!(got, 2 * D);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_record_rejected() {
        let bytes = checkpoint(ModelFamily::Mpt, |list| {
            let dup = list[1].clone();
            list.push(dup);
        });
        assert!(matches!(
            load(bytes, ModelFamily::Mpt),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    #[test]
    fn missing_tensor_rejected() {
        let bytes = checkpoint(ModelFamily::Replit, |list| {
            list.remove(4);
        });
        let err = load(bytes, ModelFamily::Replit).unwrap_err();
        assert!(matches!(err, TesseraError::MissingTensor(n) if n.ends_with("out_proj.weight")));
    }

    #[test]
    fn truncated_payload_is_io_error() {
        let mut bytes = checkpoint(ModelFamily::Mpt, |_| {});
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            load(bytes, ModelFamily::Mpt),
            Err(TesseraError::Io(_))
        ));
    }

    #[test]
    fn truncated_record_header_is_format_error() {
        let mut bytes = checkpoint(ModelFamily::Mpt, |_| {});
        bytes.extend_from_slice(&[1, 0, 0]);
        assert!(matches!(
            load(bytes, ModelFamily::Mpt),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    #[test]
    fn stream_ending_inside_dims_is_format_error() {
        let mut bytes = checkpoint(ModelFamily::Mpt, |_| {});
        // rank 2, name length 1, F32, then half of the first dim
        bytes.extend_from_slice(&[2, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 8, 0]);
        assert!(matches!(
            load(bytes, ModelFamily::Mpt),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    #[test]
    fn bad_ftype_rejected() {
        let mut w = CheckpointWriter::new(Vec::new(), ModelFamily::Replit);
        w.write_header(&HyperParams {
            ftype: FileType::from_raw(4).unwrap(),
            ..hparams()
        })
        .unwrap();
        w.write_vocab(&vec![VocabEntry::scored("a", 0.0); N_VOCAB]).unwrap();
        assert!(matches!(
            load(w.finish().unwrap(), ModelFamily::Replit),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = checkpoint(ModelFamily::Mpt, |_| {});
        bytes[0] ^= 0xff;
        assert!(matches!(
            load(bytes, ModelFamily::Mpt),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let loader = CheckpointLoader::new(LoadOptions::new(ModelFamily::Mpt));
        assert!(matches!(
            loader.read_file("/nonexistent/model.bin"),
            Err(TesseraError::Io(_))
        ));
    }

    #[test]
    fn options_from_json() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"family": "replit", "context_length": 1024}}"#).unwrap();
        let options = LoadOptions::from_file(file.path()).unwrap();
        assert_eq!(
            options,
            LoadOptions::new(ModelFamily::Replit).with_context_length(1024)
        );
    }
}
