//! # Demo: bounded_queue
//!
//! Wraps a slow callback-style worker in a [`DispatchQueue`] with capacity 3 and submits
//! ten jobs at once. At most three run at a time and they start in submission order.
//!
//! ## Flow
//! ```text
//! submit ×10 ──► [pending: FIFO] ──► 3 slots ──► worker(args, completion)
//!                        ▲                              │
//!                        └──────── slot released ◄──────┘
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=cmdvisor=debug cargo run --example bounded_queue
//! ```

use std::time::Duration;

use cmdvisor::{DispatchQueue, NamedArgs, Options, QueueConfig, Stats};
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let stats = Stats::new();
    let queue = DispatchQueue::builder("resize", QueueConfig::with_capacity(3))
        .with_stats(stats.clone())
        .wrap(|args, done| {
            let job = args.first().cloned().flatten().unwrap_or(Value::Null);
            println!("start  {job}");
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                println!("finish {job}");
                done.succeed(json!({"job": job}));
            });
        })?;

    let results: Vec<_> = (1..=10).map(|n| queue.submit(vec![Some(json!(n))])).collect();
    println!("pending={} in_flight={}", queue.pending(), queue.in_flight());

    for result in results {
        result.await?;
    }

    // The same queue, called with named arguments through the normalizer.
    let cmd = queue.command("resize", ["job"]).into_normalized()?;
    let mut named = NamedArgs::new();
    named.insert("job".into(), json!("by-name"));
    println!("{}", cmd.call(named, Options::new()).await?);

    println!("{}", serde_json::to_string_pretty(&stats.snapshot())?);
    Ok(())
}
