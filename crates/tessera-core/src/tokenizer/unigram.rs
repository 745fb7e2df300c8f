//! Unigram segmentation over a scored piece table.
//!
//! Spaces are rewritten to the `▁` marker, then a dynamic program over byte
//! offsets picks the segmentation with the lowest accumulated negated piece
//! score. Pieces are matched on raw bytes, so the marker (three bytes in
//! UTF-8) must be stored unpacked.

use super::vocab::{TokenId, Vocabulary};
use std::collections::HashMap;

/// Whitespace marker used by the piece table.
pub const WHITESPACE_MARKER: &str = "\u{2581}";

/// Id returned when no segmentation exists.
pub const UNK_ID: TokenId = 0;

/// Tokenizer over a scored vocabulary.
#[derive(Debug, Clone)]
pub struct UnigramTokenizer {
    vocab: Vocabulary,
    /// bytes -> (id, negated score)
    pieces: HashMap<Vec<u8>, (TokenId, f32)>,
}

impl UnigramTokenizer {
    /// Build the piece table from a scored vocabulary.
    pub fn new(vocab: Vocabulary) -> Self {
        let mut pieces = HashMap::with_capacity(vocab.len());
        for (id, bytes) in vocab.iter() {
            let score = vocab.score(id).unwrap_or(0.0);
            pieces.insert(bytes.to_vec(), (id, -score));
        }
        Self { vocab, pieces }
    }

    /// Underlying vocabulary.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Normalize spaces and segment the whole text as one word.
    pub fn tokenize(&self, text: &str) -> Vec<TokenId> {
        self.encode_word(&normalize(text)).0
    }

    /// Concatenate pieces and turn markers back into spaces.
    pub fn detokenize(&self, ids: &[TokenId]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for &id in ids {
            if let Some(piece) = self.vocab.token(id) {
                bytes.extend_from_slice(piece);
            }
        }
        replace_marker(&bytes)
    }

    /// Segment `word` into pieces.
    ///
    /// Returns the piece ids and the accumulated (negated) score of the best
    /// segmentation, or `([UNK_ID], 0.0)` when the word cannot be covered.
    /// Among equal-scoring segmentations the first one found wins.
    pub fn encode_word(&self, word: &str) -> (Vec<TokenId>, f32) {
        let word = word.as_bytes();
        let len = word.len();
        let max_piece = self.vocab.max_token_len();

        let mut best = vec![f32::NEG_INFINITY; len + 1];
        let mut starts: Vec<Option<usize>> = vec![None; len + 1];
        best[0] = 1.0;
        starts[0] = Some(0);

        for start in 0..len {
            let at_start = best[start];
            if at_start == f32::NEG_INFINITY {
                continue;
            }
            for end in start + 1..=len.min(start + max_piece) {
                let Some(&(_, piece_score)) = self.pieces.get(&word[start..end]) else {
                    continue;
                };
                let candidate = piece_score + at_start;
                if best[end] == f32::NEG_INFINITY || best[end] > candidate {
                    best[end] = candidate;
                    starts[end] = Some(start);
                }
            }
        }

        if best[len] == f32::NEG_INFINITY {
            return (vec![UNK_ID], 0.0);
        }

        let mut ids = Vec::new();
        let mut end = len;
        while end > 0 {
            let Some(start) = starts[end] else { break };
            if let Some(&(id, _)) = self.pieces.get(&word[start..end]) {
                ids.push(id);
            }
            end = start;
        }
        ids.reverse();
        (ids, best[len])
    }
}

/// Replace every space with the whitespace marker.
pub fn normalize(text: &str) -> String {
    text.replace(' ', WHITESPACE_MARKER)
}

fn replace_marker(bytes: &[u8]) -> Vec<u8> {
    let marker = WHITESPACE_MARKER.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(marker) {
            out.push(b' ');
            i += marker.len();
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}
