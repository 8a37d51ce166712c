//! Collapses a run of number-to-word requests and prints how many downstream
//! calls were needed.
//!
//! Usage: `collapse_demo [COUNT]` (default 1000). Window settings are read from
//! `COLLAPSER_WINDOW_MS` / `COLLAPSER_MAX_BATCH_SIZE`; log level from `RUST_LOG`.

use request_collapser::words::{number_to_words, number_words_mapping};
use request_collapser::{Collapser, CollapserConfig, ContextPropagator, ExecutionScope};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let count: u64 = match std::env::args().nth(1) {
        Some(raw) => raw.parse()?,
        None => 1000,
    };

    let config = CollapserConfig::from_env("COLLAPSER", "numbers")?;
    println!(
        "Collapsing {} requests (window {:?}, max batch {:?})",
        count, config.window, config.max_batch_size
    );
    let collapser = Collapser::new(config, number_words_mapping())?;
    let propagator = ContextPropagator::new()?;

    let scope = ExecutionScope::initialize()?;
    let mut pending = Vec::with_capacity(count as usize);
    for n in 0..count {
        let c = collapser.clone();
        // each request fans out onto the runtime, carrying this scope
        pending.push((n, propagator.spawn(async move { c.submit(n)?.await })));
        if n == count / 2 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    let mut mismatches = 0;
    for (n, handle) in pending {
        let word = handle.await???;
        if word != number_to_words(n) {
            mismatches += 1;
        }
    }
    let log = scope.request_log();
    scope.shutdown();

    println!("\n=== Summary ===");
    println!("Requests:      {}", count);
    println!("Executor calls: {}", collapser.invocation_count());
    println!("Avg batch size: {:.1}", collapser.stats().average_batch_size());
    println!("Mismatches:     {}", mismatches);
    println!("Request log:    {}", log.executed_batches_as_string());

    if mismatches > 0 {
        std::process::exit(1);
    }
    Ok(())
}
