//! The binary checkpoint container.
//!
//! A checkpoint is a little-endian stream laid out as:
//!
//! 1. magic (`u32`, [`MAGIC`])
//! 2. the family's hyperparameter block ([`HyperParams`])
//! 3. `n_vocab` vocabulary entries ([`VocabEntry`])
//! 4. tensor records ([`RecordHeader`] followed by raw element bytes) until
//!    end of stream
//!
//! This module only knows the wire layout. Matching records against declared
//! tensors happens in [`crate::model::loader`].

mod header;
mod record;
mod vocab;
mod writer;

pub use header::{read_magic, HyperParams, DEFAULT_CONTEXT_LENGTH, MAGIC};
pub use record::{read_record_header, RecordHeader, MAX_RANK};
pub use vocab::{read_vocab, VocabEntry};
pub use writer::CheckpointWriter;

use std::io::{self, Read};

/// Read exactly `len` bytes without trusting `len` for the allocation size.
pub(crate) fn read_bytes<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, stream ended after {}", len, buf.len()),
        ));
    }
    Ok(buf)
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes read, which is less than `buf.len()` only when
/// the stream ended.
pub(crate) fn read_until_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_bytes_exact() {
        let mut r = Cursor::new(b"abcdef".to_vec());
        assert_eq!(read_bytes(&mut r, 4).unwrap(), b"abcd");
        assert_eq!(read_bytes(&mut r, 2).unwrap(), b"ef");
    }

    #[test]
    fn read_bytes_short_stream() {
        let mut r = Cursor::new(b"abc".to_vec());
        let err = read_bytes(&mut r, 1 << 30).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn read_until_eof_reports_partial() {
        let mut r = Cursor::new(vec![1u8, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(read_until_eof(&mut r, &mut buf).unwrap(), 3);
        assert_eq!(read_until_eof(&mut r, &mut buf).unwrap(), 0);
    }
}
