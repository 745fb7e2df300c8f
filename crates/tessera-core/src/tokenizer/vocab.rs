//! Id/token tables built from the checkpoint's vocabulary block.

use crate::error::{Result, TesseraError};
use crate::format::VocabEntry;
use std::collections::HashMap;

/// Token id.
pub type TokenId = u32;

/// Bidirectional id <-> token-bytes table.
///
/// Ids are assigned in file order. When two entries carry the same bytes the
/// later id wins in the bytes -> id direction; both ids still detokenize.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    id_to_token: Vec<Vec<u8>>,
    token_to_id: HashMap<Vec<u8>, TokenId>,
    scores: Vec<f32>,
    max_token_len: usize,
}

impl Vocabulary {
    /// Build from raw entries.
    ///
    /// With `pack` set, every entry is decoded as UTF-8 and each code point is
    /// stored as a single byte (its low 8 bits). Code points above U+00FF lose
    /// information; this matches the byte-level vocabularies these checkpoints
    /// were exported with.
    pub fn from_entries(entries: Vec<VocabEntry>, pack: bool) -> Result<Self> {
        let mut vocab = Self {
            id_to_token: Vec::with_capacity(entries.len()),
            token_to_id: HashMap::with_capacity(entries.len()),
            scores: Vec::with_capacity(entries.len()),
            max_token_len: 0,
        };

        for (i, entry) in entries.into_iter().enumerate() {
            let id = TokenId::try_from(i)
                .map_err(|_| TesseraError::format("vocabulary exceeds u32 ids"))?;
            let bytes = if pack {
                pack_code_points(&entry.bytes).map_err(|_| {
                    TesseraError::format(format!("vocabulary entry {i} is not valid UTF-8"))
                })?
            } else {
                entry.bytes
            };
            vocab.max_token_len = vocab.max_token_len.max(bytes.len());
            vocab.token_to_id.insert(bytes.clone(), id);
            vocab.id_to_token.push(bytes);
            vocab.scores.push(entry.score.unwrap_or(0.0));
        }

        Ok(vocab)
    }

    /// Bytes of a token, `None` for an out-of-range id.
    pub fn token(&self, id: TokenId) -> Option<&[u8]> {
        self.id_to_token.get(id as usize).map(Vec::as_slice)
    }

    /// Id of an exact byte string.
    pub fn id(&self, bytes: &[u8]) -> Option<TokenId> {
        self.token_to_id.get(bytes).copied()
    }

    /// Stored score of a token (0.0 for unscored vocabularies).
    pub fn score(&self, id: TokenId) -> Option<f32> {
        self.scores.get(id as usize).copied()
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Longest token in bytes.
    pub fn max_token_len(&self) -> usize {
        self.max_token_len
    }

    /// Tokens in id order.
    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &[u8])> {
        self.id_to_token
            .iter()
            .enumerate()
            .map(|(i, t)| (i as TokenId, t.as_slice()))
    }
}

/// Decode UTF-8 and keep the low byte of each code point.
pub fn pack_code_points(bytes: &[u8]) -> std::result::Result<Vec<u8>, std::str::Utf8Error> {
    let text = std::str::from_utf8(bytes)?;
    Ok(text.chars().map(|c| c as u32 as u8).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_file_order() {
        let vocab = Vocabulary::from_entries(
            vec![
                VocabEntry::plain("a"),
                VocabEntry::plain("b"),
                VocabEntry::plain("ab"),
            ],
            false,
        )
        .unwrap();
        assert_eq!(vocab.id(b"a"), Some(0));
        assert_eq!(vocab.id(b"ab"), Some(2));
        assert_eq!(vocab.token(1), Some(&b"b"[..]));
        assert_eq!(vocab.token(3), None);
        assert_eq!(vocab.max_token_len(), 2);
    }

    #[test]
    fn later_duplicate_wins() {
        let vocab = Vocabulary::from_entries(
            vec![VocabEntry::plain("x"), VocabEntry::plain("x")],
            false,
        )
        .unwrap();
        assert_eq!(vocab.id(b"x"), Some(1));
        assert_eq!(vocab.token(0), Some(&b"x"[..]));
    }

    #[test]
    fn packing_keeps_low_byte_per_code_point() {
        // U+00E9 is two UTF-8 bytes, packed to the single byte 0xE9.
        assert_eq!(pack_code_points("é".as_bytes()).unwrap(), vec![0xE9]);
        // U+0120 ("Ġ", the byte-level space) wraps to 0x20.
        assert_eq!(pack_code_points("\u{120}hi".as_bytes()).unwrap(), b" hi".to_vec());
        // U+2581 is lossy: only 0x81 survives.
        assert_eq!(pack_code_points("\u{2581}".as_bytes()).unwrap(), vec![0x81]);
        assert_eq!(pack_code_points(b"plain").unwrap(), b"plain".to_vec());
    }

    #[test]
    fn packed_vocab_rejects_invalid_utf8() {
        let err = Vocabulary::from_entries(vec![VocabEntry::plain(vec![0xff, 0xfe])], true)
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidFormat(_)));
    }

    #[test]
    fn raw_vocab_keeps_multibyte_tokens() {
        let vocab = Vocabulary::from_entries(
            vec![VocabEntry::scored("\u{2581}a", -1.0)],
            false,
        )
        .unwrap();
        assert_eq!(vocab.token(0).unwrap().len(), 4);
        assert_eq!(vocab.score(0), Some(-1.0));
    }
}
