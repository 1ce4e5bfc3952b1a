//! Runs the same burst of items through every backpressure policy with a
//! consumer paced like a 60 fps render loop.
//!
//! Usage: `cargo run --example playground -- [item_count] [policy]`

use std::time::Duration;

use backflow::prelude::*;
use futures::StreamExt;

const DEFAULT_ITEM_COUNT: u64 = 10_000_000;
const FRAME: Duration = Duration::from_millis(16);
const RUN_BUDGET: Duration = Duration::from_secs(3);

async fn run_policy(item_count: u64, policy: BackpressurePolicy) -> Result<()> {
    println!("=== {} ({} items) ===", policy, item_count);

    let pipeline = Pipeline::new().frame_interval(FRAME);
    let run = pipeline.start(item_count, policy, LogConsumer::new(policy.as_str()))?;

    // Sample progress the way a UI thread would read it
    let mut stream = run.progress_stream();
    let watcher = tokio::spawn(async move {
        let mut updates = 0u64;
        while let Some(progress) = stream.next().await {
            updates += 1;
            if updates % 50 == 0 {
                println!("  progress {}", progress);
            }
        }
    });

    let outcome = match tokio::time::timeout(RUN_BUDGET, run.wait()).await {
        Ok(outcome) => outcome,
        Err(_) => {
            println!("  still running after {:?}, cancelling", RUN_BUDGET);
            pipeline.cancel(&run);
            run.wait().await
        }
    };
    drop(pipeline);
    watcher.abort();

    match outcome.summary() {
        Some(summary) => println!(
            "  {}: delivered {} of {}, dropped {}\n",
            outcome.label(),
            summary.delivered,
            summary.total,
            summary.dropped
        ),
        None => println!("  failed: {:?}\n", outcome.error()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let item_count = match args.next() {
        Some(count) => count
            .parse::<u64>()
            .map_err(|e| Error::invalid_argument(format!("item count: {}", e)))?,
        None => DEFAULT_ITEM_COUNT,
    };
    let policies = match args.next() {
        Some(policy) => vec![policy.parse::<BackpressurePolicy>()?],
        None => BackpressurePolicy::ALL.to_vec(),
    };

    for policy in policies {
        run_policy(item_count, policy).await?;
    }

    println!("Playground completed!");
    Ok(())
}
