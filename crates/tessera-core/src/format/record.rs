//! Tensor record headers.

use super::{read_bytes, read_until_eof};
use crate::error::{Result, TesseraError};
use crate::quantization::GgmlType;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{self, Read};

/// Highest tensor rank a record may carry.
pub const MAX_RANK: usize = 2;

/// Everything in a tensor record that precedes the element data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Tensor name.
    pub name: String,
    /// Element type of the payload.
    pub ttype: GgmlType,
    /// Dimensions in ggml order (innermost first), padded with 1 to [`MAX_RANK`].
    pub ne: [usize; MAX_RANK],
    /// Rank as written in the file.
    pub rank: usize,
}

impl RecordHeader {
    /// Total element count.
    pub fn n_elements(&self) -> usize {
        self.ne.iter().product()
    }
}

/// Read the next record header.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new record. A
/// stream ending anywhere inside the header (fixed fields, dims or name) is a
/// format error.
pub fn read_record_header<R: Read>(reader: &mut R) -> Result<Option<RecordHeader>> {
    let mut fixed = [0u8; 12];
    let filled = read_until_eof(reader, &mut fixed)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < fixed.len() {
        return Err(TesseraError::format(format!(
            "truncated tensor record header ({filled} of 12 bytes)"
        )));
    }

    let rank = LittleEndian::read_i32(&fixed[0..4]);
    let name_len = LittleEndian::read_i32(&fixed[4..8]);
    let ttype = LittleEndian::read_i32(&fixed[8..12]);

    if rank < 1 || rank as usize > MAX_RANK {
        return Err(TesseraError::format(format!("invalid tensor rank {rank}")));
    }
    if name_len < 0 {
        return Err(TesseraError::format(format!(
            "invalid tensor name length {name_len}"
        )));
    }
    let ttype = GgmlType::from_code(ttype)?;

    let rank = rank as usize;
    let mut ne = [1usize; MAX_RANK];
    let mut n_elements = 1usize;
    for slot in ne.iter_mut().take(rank) {
        let dim = reader.read_i32::<LittleEndian>().map_err(truncated)?;
        if dim < 0 {
            return Err(TesseraError::format(format!("invalid tensor dimension {dim}")));
        }
        *slot = dim as usize;
        n_elements = n_elements
            .checked_mul(*slot)
            .ok_or_else(|| TesseraError::format("tensor element count overflows"))?;
    }

    let name = String::from_utf8(read_bytes(reader, name_len as usize).map_err(truncated)?)
        .map_err(|_| TesseraError::format("tensor name is not valid UTF-8"))?;

    Ok(Some(RecordHeader {
        name,
        ttype,
        ne,
        rank,
    }))
}

fn truncated(err: io::Error) -> TesseraError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TesseraError::format("truncated tensor record header")
    } else {
        err.into()
    }
}
