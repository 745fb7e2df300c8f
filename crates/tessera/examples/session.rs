//! Session example.
//!
//! Loads an engine from a JSON config and continues a prompt greedily,
//! feeding one token at a time.
//!
//! ```json
//! { "model_path": "/models/replit-code-v1-3b-q4_0.bin", "family": "replit", "threads": 8 }
//! ```
//!
//! Run with:
//! ```bash
//! cargo run -p tessera --example session -- engine.json "def fibonacci(n):"
//! ```

use anyhow::Result;
use std::io::{self, Write};
use tessera::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = args.get(1).map(String::as_str).unwrap_or("engine.json");
    let prompt = args.get(2).map(String::as_str).unwrap_or("def fibonacci(n):");

    let engine = Engine::from_config_file(config)?;
    println!("{:?}\n", engine);

    let mut logits = engine.feed(prompt)?;
    print!("{prompt}");
    while engine.n_past() < engine.n_ctx().min(256) {
        let next = logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as TokenId)
            .unwrap_or(0);
        print!("{}", engine.detokenize(&[next]));
        io::stdout().flush()?;
        logits = engine.eval(&[next])?;
    }
    println!();
    Ok(())
}
