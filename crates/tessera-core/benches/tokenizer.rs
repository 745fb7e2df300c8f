//! Tokenizer throughput.
//!
//! Greedy longest-match (MPT) against the unigram Viterbi search (Replit) on
//! the same synthetic vocabulary, over inputs of growing length.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_core::format::VocabEntry;
use tessera_core::model::ModelFamily;
use tessera_core::tokenizer::{Tokenizer, WHITESPACE_MARKER};

const WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "fn", "let", "return", "self",
];

/// Single bytes plus every prefix of each word, with and without a leading space.
fn vocab(marker: &str) -> Vec<VocabEntry> {
    let mut pieces: Vec<String> = (b'a'..=b'z').map(|c| (c as char).to_string()).collect();
    pieces.push(" ".into());
    pieces.push(marker.into());
    for word in WORDS {
        for end in 2..=word.len() {
            pieces.push(word[..end].to_string());
            pieces.push(format!("{marker}{}", &word[..end]));
        }
    }
    pieces.sort();
    pieces.dedup();
    pieces
        .into_iter()
        .map(|p| {
            let score = -(p.chars().count() as f32).recip();
            VocabEntry::scored(p, score)
        })
        .collect()
}

fn text(n_words: usize) -> String {
    (0..n_words)
        .map(|i| WORDS[(i * 7) % WORDS.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_tokenize(c: &mut Criterion) {
    let gpt = Tokenizer::from_entries(vocab(" "), ModelFamily::Mpt).unwrap();
    let unigram = Tokenizer::from_entries(vocab(WHITESPACE_MARKER), ModelFamily::Replit).unwrap();

    let mut group = c.benchmark_group("tokenize");
    for n_words in [16, 256, 4096] {
        let input = text(n_words);
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::new("greedy", n_words), &input, |b, input| {
            b.iter(|| black_box(gpt.tokenize(black_box(input))))
        });
        group.bench_with_input(BenchmarkId::new("unigram", n_words), &input, |b, input| {
            b.iter(|| black_box(unigram.tokenize(black_box(input))))
        });
    }
    group.finish();
}

fn bench_detokenize(c: &mut Criterion) {
    let unigram = Tokenizer::from_entries(vocab(WHITESPACE_MARKER), ModelFamily::Replit).unwrap();
    let ids = unigram.tokenize(&text(1024));

    c.bench_function("detokenize_unigram_1024_words", |b| {
        b.iter(|| black_box(unigram.decode(black_box(&ids))))
    });
}

criterion_group!(benches, bench_tokenize, bench_detokenize);
criterion_main!(benches);
