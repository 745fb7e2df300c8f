//! Checkpoint writer.
//!
//! Produces the same container the loader accepts. Used for conversion
//! tooling and for building fixture checkpoints in tests and benches.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut writer = CheckpointWriter::new(Vec::new(), ModelFamily::Replit);
//! writer.write_header(&hparams)?;
//! writer.write_vocab(&entries)?;
//! writer.write_tensor("transformer.wte.weight", GgmlType::F32, &[d, n_vocab], &bytes)?;
//! let bytes = writer.finish()?;
//! ```

use super::{HyperParams, VocabEntry, MAGIC, MAX_RANK};
use crate::error::{Result, TesseraError};
use crate::model::ModelFamily;
use crate::quantization::GgmlType;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// Streaming writer for the checkpoint container.
#[derive(Debug)]
pub struct CheckpointWriter<W: Write> {
    inner: W,
    family: ModelFamily,
}

impl<W: Write> CheckpointWriter<W> {
    /// Wrap a sink.
    pub fn new(inner: W, family: ModelFamily) -> Self {
        Self { inner, family }
    }

    /// Write magic and hyperparameters.
    pub fn write_header(&mut self, hparams: &HyperParams) -> Result<()> {
        self.inner.write_u32::<LittleEndian>(MAGIC)?;
        hparams.write(&mut self.inner, self.family)
    }

    /// Write the vocabulary block. Scores are written only for scored families.
    pub fn write_vocab(&mut self, entries: &[VocabEntry]) -> Result<()> {
        let scored = self.family.config().scored_vocab;
        for entry in entries {
            entry.write(&mut self.inner, scored)?;
        }
        Ok(())
    }

    /// Write one tensor record. `ne` is in ggml order (innermost first).
    pub fn write_tensor(&mut self, name: &str, ttype: GgmlType, ne: &[usize], data: &[u8]) -> Result<()> {
        if ne.is_empty() || ne.len() > MAX_RANK {
            return Err(TesseraError::InvalidInput(format!(
                "tensor '{name}' has rank {}",
                ne.len()
            )));
        }
        self.inner.write_i32::<LittleEndian>(ne.len() as i32)?;
        self.inner.write_i32::<LittleEndian>(name.len() as i32)?;
        self.inner.write_i32::<LittleEndian>(ttype.code())?;
        for &dim in ne {
            self.inner.write_i32::<LittleEndian>(dim as i32)?;
        }
        self.inner.write_all(name.as_bytes())?;
        self.inner.write_all(data)?;
        Ok(())
    }

    /// Write an `f32` tensor.
    pub fn write_f32_tensor(&mut self, name: &str, ne: &[usize], values: &[f32]) -> Result<()> {
        self.write_tensor(name, GgmlType::F32, ne, bytemuck::cast_slice(values))
    }

    /// Flush and return the sink.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
