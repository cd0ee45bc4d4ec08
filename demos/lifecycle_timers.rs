//! # Demo: lifecycle_timers
//!
//! Registers an interval and a few timeouts on a [`LifecycleBus`], then shuts it down
//! early. Timers that had not fired yet never fire.
//!
//! ## Run
//! ```bash
//! cargo run --example lifecycle_timers
//! ```

use std::time::Duration;

use cmdvisor::{LifecycleBus, LifecycleConfig, SHUTDOWN};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bus = LifecycleBus::new(LifecycleConfig {
        stats_interval: Duration::from_millis(300),
    });

    let stats = bus.stats().clone();
    bus.register_interval(
        move || {
            stats.increment("heartbeat");
            println!("tick");
        },
        Duration::from_millis(100),
    );
    for ms in [250_u64, 500, 2_000] {
        bus.register_timeout(move || println!("timeout {ms}ms fired"), Duration::from_millis(ms));
    }
    bus.on(SHUTDOWN, |_| println!("closing connections"));

    tokio::time::sleep(Duration::from_millis(700)).await;
    println!("active timers before shutdown: {}", bus.active_timers());

    bus.shutdown();
    println!("active timers after shutdown: {}", bus.active_timers());

    // Nothing fires from here on.
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}
