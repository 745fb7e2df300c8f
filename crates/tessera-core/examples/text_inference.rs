//! Greedy text generation from a checkpoint file.
//!
//! Run with:
//! ```bash
//! cargo run -p tessera-core --example text_inference -- /path/to/model.bin mpt "Once upon a time"
//! ```

use std::io::{self, Write};
use std::time::Instant;
use tessera_core::prelude::*;

fn argmax(logits: &[f32]) -> TokenId {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as TokenId)
        .unwrap_or(0)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        anyhow::bail!("usage: text_inference <model.bin> [mpt|replit] [prompt]");
    };
    let family: ModelFamily = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(ModelFamily::Mpt);
    let prompt = args.get(3).map(String::as_str).unwrap_or("The meaning of life is");
    let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);

    println!("Text Inference Example");
    println!("======================\n");

    let start = Instant::now();
    let (mut model, tokenizer) = Model::load(path, &LoadOptions::new(family))?;
    let config = model.config();
    println!(
        "Loaded {:?}: {} layers, d_model {}, vocab {}, n_ctx {} ({:.2?})",
        config.family,
        config.n_layers,
        config.d_model,
        config.n_vocab,
        model.n_ctx(),
        start.elapsed()
    );

    let mut ids = tokenizer.tokenize(prompt);
    println!("Prompt: {prompt:?} -> {} tokens\n", ids.len());
    if ids.is_empty() {
        anyhow::bail!("prompt produced no tokens");
    }

    let mut engine = DecodeEngine::new();
    let mut n_past = 0;
    let max_new = 64.min(model.n_ctx().saturating_sub(ids.len()));

    print!("{prompt}");
    io::stdout().flush()?;

    let start = Instant::now();
    for _ in 0..max_new {
        let logits = engine.evaluate(&mut model, threads, n_past, &ids, LogitsMode::Last)?;
        n_past += ids.len();
        let next = argmax(&logits);
        print!("{}", tokenizer.decode(&[next]));
        io::stdout().flush()?;
        ids = vec![next];
    }
    let elapsed = start.elapsed();

    println!("\n\n{max_new} tokens in {elapsed:.2?} ({:.1} tok/s)", max_new as f64 / elapsed.as_secs_f64());
    println!("mem per token: {} bytes", engine.mem_per_token());
    Ok(())
}
