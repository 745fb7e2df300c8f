//! Vocabulary block.

use super::read_bytes;
use crate::error::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// One raw vocabulary entry, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct VocabEntry {
    /// Token bytes as stored.
    pub bytes: Vec<u8>,
    /// Piece score, present only for scored (unigram) vocabularies.
    pub score: Option<f32>,
}

impl VocabEntry {
    /// Entry without a score.
    pub fn plain(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            score: None,
        }
    }

    /// Entry with a unigram score.
    pub fn scored(bytes: impl Into<Vec<u8>>, score: f32) -> Self {
        Self {
            bytes: bytes.into(),
            score: Some(score),
        }
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W, scored: bool) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.bytes.len() as u32)?;
        writer.write_all(&self.bytes)?;
        if scored {
            writer.write_f32::<LittleEndian>(self.score.unwrap_or(0.0))?;
        }
        Ok(())
    }
}

/// Read `n_vocab` entries; `scored` adds a trailing `f32` per entry.
pub fn read_vocab<R: Read>(reader: &mut R, n_vocab: usize, scored: bool) -> Result<Vec<VocabEntry>> {
    let mut entries = Vec::with_capacity(n_vocab.min(1 << 20));
    for _ in 0..n_vocab {
        let len = reader.read_u32::<LittleEndian>()? as usize;
        let bytes = read_bytes(reader, len)?;
        let score = if scored {
            Some(reader.read_f32::<LittleEndian>()?)
        } else {
            None
        };
        entries.push(VocabEntry { bytes, score });
    }
    Ok(entries)
}
