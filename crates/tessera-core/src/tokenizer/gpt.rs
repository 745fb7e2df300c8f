//! Greedy word tokenizer for plain vocabularies.
//!
//! Text is split with the GPT-2 pre-tokenizer rules, then every word is
//! covered left to right by the longest vocabulary entry starting at the
//! current byte.

use super::vocab::{TokenId, Vocabulary};
use tracing::debug;

const CONTRACTIONS: [&str; 7] = ["s", "t", "re", "ve", "m", "ll", "d"];

/// Tokenizer over a plain (unscored) vocabulary.
#[derive(Debug, Clone)]
pub struct GptTokenizer {
    vocab: Vocabulary,
}

impl GptTokenizer {
    /// Wrap a vocabulary.
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    /// Underlying vocabulary.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Split `text` into words and greedily match each one.
    pub fn tokenize(&self, text: &str) -> Vec<TokenId> {
        let mut ids = Vec::new();
        for word in split_words(text) {
            self.match_word(word.as_bytes(), &mut ids);
        }
        ids
    }

    /// Concatenated bytes of `ids`; unknown ids contribute nothing.
    pub fn detokenize(&self, ids: &[TokenId]) -> Vec<u8> {
        ids.iter()
            .filter_map(|&id| self.vocab.token(id))
            .flatten()
            .copied()
            .collect()
    }

    fn match_word(&self, word: &[u8], ids: &mut Vec<TokenId>) {
        let max_len = self.vocab.max_token_len();
        let mut i = 0;
        while i < word.len() {
            let longest = (i + 1..=word.len().min(i + max_len))
                .rev()
                .find_map(|j| self.vocab.id(&word[i..j]).map(|id| (id, j)));
            match longest {
                Some((id, j)) => {
                    ids.push(id);
                    i = j;
                }
                None => {
                    debug!(byte = word[i], "no vocabulary entry, skipping byte");
                    i += 1;
                }
            }
        }
    }
}

/// Split text into pre-tokenizer words.
///
/// Words are: an English contraction suffix, or an optional single leading
/// space followed by a run of letters, a run of digits or a run of other
/// non-space symbols, or a whitespace run. A whitespace run followed by a
/// word gives up its last character so the word keeps its leading space.
pub fn split_words(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let byte_at = |k: usize| chars.get(k).map_or(text.len(), |&(b, _)| b);
    let mut words = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i].1;

        if c == '\'' {
            if let Some(len) = contraction_len(&text[byte_at(i + 1)..]) {
                let end = byte_at(i + 1) + len;
                words.push(&text[byte_at(i)..end]);
                while byte_at(i) < end {
                    i += 1;
                }
                continue;
            }
        }

        let body = if c == ' ' && chars.get(i + 1).is_some_and(|&(_, n)| !n.is_whitespace()) {
            i + 1
        } else {
            i
        };
        let head = chars[body].1;

        if !head.is_whitespace() {
            let class = CharClass::of(head);
            let mut end = body + 1;
            while end < chars.len() && CharClass::of(chars[end].1) == class {
                end += 1;
            }
            words.push(&text[byte_at(i)..byte_at(end)]);
            i = end;
            continue;
        }

        let mut end = i + 1;
        while end < chars.len() && chars[end].1.is_whitespace() {
            end += 1;
        }
        if end < chars.len() && end - i > 1 {
            end -= 1;
        }
        words.push(&text[byte_at(i)..byte_at(end)]);
        i = end;
    }

    words
}

fn contraction_len(rest: &str) -> Option<usize> {
    CONTRACTIONS
        .iter()
        .filter(|s| rest.starts_with(*s))
        .map(|s| s.len())
        .max()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Letter,
    Digit,
    Symbol,
    Space,
}

impl CharClass {
    fn of(c: char) -> Self {
        if c.is_alphabetic() {
            Self::Letter
        } else if c.is_numeric() {
            Self::Digit
        } else if c.is_whitespace() {
            Self::Space
        } else {
            Self::Symbol
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::VocabEntry;

    fn tokenizer(tokens: &[&str]) -> GptTokenizer {
        let entries = tokens.iter().map(|t| VocabEntry::plain(*t)).collect();
        GptTokenizer::new(Vocabulary::from_entries(entries, true).unwrap())
    }

    #[test]
    fn splits_words_with_leading_space() {
        assert_eq!(split_words("Hello world"), vec!["Hello", " world"]);
        assert_eq!(split_words("abc123 !?"), vec!["abc", "123", " !?"]);
    }

    #[test]
    fn splits_contractions() {
        assert_eq!(split_words("I'll don't"), vec!["I", "'ll", " don", "'t"]);
        assert_eq!(split_words("it's"), vec!["it", "'s"]);
    }

    #[test]
    fn whitespace_run_leaves_last_space() {
        assert_eq!(split_words("a   b"), vec!["a", "  ", " b"]);
        assert_eq!(split_words("a\n\nb"), vec!["a", "\n", "\n", "b"]);
        assert_eq!(split_words("end  "), vec!["end", "  "]);
    }

    #[test]
    fn words_cover_the_input() {
        let text = "x = foo(1, 2);\n  return 'y's";
        assert_eq!(split_words(text).concat(), text);
    }

    #[test]
    fn greedy_longest_match() {
        let tok = tokenizer(&["h", "he", "hell", "o", " w", "orld", "w"]);
        assert_eq!(tok.tokenize("hello world"), vec![2, 3, 4, 5]);
    }

    #[test]
    fn unmatched_bytes_are_skipped() {
        let tok = tokenizer(&["a", "c"]);
        assert_eq!(tok.tokenize("abc"), vec![0, 1]);
    }

    #[test]
    fn detokenize_concatenates_and_ignores_unknown() {
        let tok = tokenizer(&["foo", " bar"]);
        assert_eq!(tok.detokenize(&[0, 1, 99]), b"foo bar".to_vec());
        assert!(tok.detokenize(&[42]).is_empty());
    }
}
