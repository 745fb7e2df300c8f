//! Text <-> token id conversion.
//!
//! The checkpoint family decides which tokenizer is built from the
//! vocabulary block:
//!
//! - **MPT**: packed byte vocabulary with GPT-2 word splitting and greedy
//!   longest-match ([`GptTokenizer`]).
//! - **Replit**: scored pieces segmented by a unigram dynamic program
//!   ([`UnigramTokenizer`]).

mod gpt;
mod unigram;
mod vocab;

pub use gpt::{split_words, GptTokenizer};
pub use unigram::{normalize, UnigramTokenizer, UNK_ID, WHITESPACE_MARKER};
pub use vocab::{pack_code_points, TokenId, Vocabulary};

use crate::error::Result;
use crate::format::VocabEntry;
use crate::model::ModelFamily;

/// Tokenizer for a loaded checkpoint.
#[derive(Debug, Clone)]
pub enum Tokenizer {
    /// Plain vocabulary, greedy matching.
    Gpt(GptTokenizer),
    /// Scored vocabulary, unigram segmentation.
    Unigram(UnigramTokenizer),
}

impl Tokenizer {
    /// Build the family's tokenizer from raw vocabulary entries.
    pub fn from_entries(entries: Vec<VocabEntry>, family: ModelFamily) -> Result<Self> {
        let config = family.config();
        let vocab = Vocabulary::from_entries(entries, config.packs_vocab)?;
        Ok(if config.scored_vocab {
            Self::Unigram(UnigramTokenizer::new(vocab))
        } else {
            Self::Gpt(GptTokenizer::new(vocab))
        })
    }

    /// Encode text.
    pub fn tokenize(&self, text: &str) -> Vec<TokenId> {
        match self {
            Self::Gpt(t) => t.tokenize(text),
            Self::Unigram(t) => t.tokenize(text),
        }
    }

    /// Decode ids to raw bytes. Unknown ids decode to nothing.
    pub fn detokenize(&self, ids: &[TokenId]) -> Vec<u8> {
        match self {
            Self::Gpt(t) => t.detokenize(ids),
            Self::Unigram(t) => t.detokenize(ids),
        }
    }

    /// Decode ids to text, replacing invalid UTF-8.
    pub fn decode(&self, ids: &[TokenId]) -> String {
        String::from_utf8_lossy(&self.detokenize(ids)).into_owned()
    }

    /// Vocabulary backing this tokenizer.
    pub fn vocab(&self) -> &Vocabulary {
        match self {
            Self::Gpt(t) => t.vocab(),
            Self::Unigram(t) => t.vocab(),
        }
    }

    /// Number of ids.
    pub fn vocab_size(&self) -> usize {
        self.vocab().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_selects_tokenizer() {
        let mpt = Tokenizer::from_entries(vec![VocabEntry::plain("a")], ModelFamily::Mpt).unwrap();
        assert!(matches!(mpt, Tokenizer::Gpt(_)));

        let replit =
            Tokenizer::from_entries(vec![VocabEntry::scored("a", -1.0)], ModelFamily::Replit)
                .unwrap();
        assert!(matches!(replit, Tokenizer::Unigram(_)));
        assert_eq!(replit.vocab_size(), 1);
    }

    #[test]
    fn replit_vocab_is_not_packed() {
        let tok = Tokenizer::from_entries(
            vec![VocabEntry::scored("\u{2581}x", -1.0)],
            ModelFamily::Replit,
        )
        .unwrap();
        assert_eq!(tok.tokenize(" x"), vec![0]);
        assert_eq!(tok.decode(&[0]), " x");
    }

    #[test]
    fn mpt_roundtrips_ascii() {
        let entries = ["Hello", " world", "!"].iter().map(|t| VocabEntry::plain(*t)).collect();
        let tok = Tokenizer::from_entries(entries, ModelFamily::Mpt).unwrap();
        let ids = tok.tokenize("Hello world!");
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(tok.decode(&ids), "Hello world!");
    }
}
