//! Magic number and hyperparameter block.

use crate::error::{Result, TesseraError};
use crate::model::ModelFamily;
use crate::quantization::FileType;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// File magic, the bytes `lmgg` read as a little-endian `u32` ("ggml").
pub const MAGIC: u32 = 0x6767_6d6c;

/// Context length used when the caller does not override it.
pub const DEFAULT_CONTEXT_LENGTH: usize = 2048;

/// Read and verify the magic number.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(TesseraError::format(format!(
            "bad magic {magic:#010x}, expected {MAGIC:#010x}"
        )));
    }
    Ok(())
}

/// Hyperparameters stored in the checkpoint header.
///
/// The field list depends on the family: only MPT carries `alibi_bias_max`
/// and `clip_qkv`; for Replit they read back as `0.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HyperParams {
    /// Embedding width.
    pub d_model: usize,
    /// Maximum sequence length the model was trained for.
    pub max_seq_len: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Number of transformer blocks.
    pub n_layers: usize,
    /// Vocabulary size.
    pub n_vocab: usize,
    /// ALiBi maximum bias (MPT only).
    pub alibi_bias_max: f32,
    /// QKV clamp bound, `0.0` disables (MPT only).
    pub clip_qkv: f32,
    /// Packed storage type.
    pub ftype: FileType,
}

impl HyperParams {
    /// Read the family's hyperparameter block.
    pub fn read<R: Read>(reader: &mut R, family: ModelFamily) -> Result<Self> {
        let d_model = read_dim(reader, "d_model")?;
        let max_seq_len = read_dim(reader, "max_seq_len")?;
        let n_heads = read_dim(reader, "n_heads")?;
        let n_layers = read_dim(reader, "n_layers")?;
        let n_vocab = read_dim(reader, "n_vocab")?;

        let (alibi_bias_max, clip_qkv) = if family.config().has_clamp {
            let alibi = reader.read_f32::<LittleEndian>()?;
            let clip = reader.read_f32::<LittleEndian>()?;
            (alibi, clip)
        } else {
            (0.0, 0.0)
        };

        let ftype = FileType::from_raw(reader.read_i32::<LittleEndian>()?)?;

        let hparams = Self {
            d_model,
            max_seq_len,
            n_heads,
            n_layers,
            n_vocab,
            alibi_bias_max,
            clip_qkv,
            ftype,
        };
        hparams.validate()?;
        Ok(hparams)
    }

    /// Write the family's hyperparameter block.
    pub fn write<W: Write>(&self, writer: &mut W, family: ModelFamily) -> Result<()> {
        for (name, value) in [
            ("d_model", self.d_model),
            ("max_seq_len", self.max_seq_len),
            ("n_heads", self.n_heads),
            ("n_layers", self.n_layers),
            ("n_vocab", self.n_vocab),
        ] {
            let value = i32::try_from(value)
                .map_err(|_| TesseraError::InvalidInput(format!("{name} does not fit in i32")))?;
            writer.write_i32::<LittleEndian>(value)?;
        }
        if family.config().has_clamp {
            writer.write_f32::<LittleEndian>(self.alibi_bias_max)?;
            writer.write_f32::<LittleEndian>(self.clip_qkv)?;
        }
        writer.write_i32::<LittleEndian>(self.ftype.raw())?;
        Ok(())
    }

    /// Effective context length for an optional caller override.
    ///
    /// The override replaces the default of [`DEFAULT_CONTEXT_LENGTH`]; the
    /// result never exceeds `max_seq_len`.
    pub fn context_length(&self, requested: Option<usize>) -> usize {
        let n_ctx = requested
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH);
        n_ctx.min(self.max_seq_len)
    }

    /// Head dimension.
    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    fn validate(&self) -> Result<()> {
        if self.d_model % self.n_heads != 0 {
            return Err(TesseraError::format(format!(
                "d_model ({}) must be divisible by n_heads ({})",
                self.d_model, self.n_heads
            )));
        }
        Ok(())
    }
}

fn read_dim<R: Read>(reader: &mut R, name: &str) -> Result<usize> {
    let value = reader.read_i32::<LittleEndian>()?;
    if value <= 0 {
        return Err(TesseraError::format(format!(
            "hyperparameter {name} must be positive, got {value}"
        )));
    }
    Ok(value as usize)
}
