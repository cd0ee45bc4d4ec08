//! Process lifecycle: shutdown notification, cancellable timers and statistics.
//!
//! - [`bus`]: [`LifecycleBus`], the explicit context object owned by the process driver
//! - [`timers`]: [`TimerRegistry`], [`TimerHandle`], [`TimerKind`]
//! - [`stats`]: [`Stats`], [`StatsSnapshot`], [`Metric`]
//! - [`config`]: [`LifecycleConfig`]
//! - [`signal`]: [`wait_for_shutdown_signal`]

pub mod bus;
pub mod config;
pub mod signal;
pub mod stats;
pub mod timers;

pub use bus::{
    HandlerFn, LifecycleBus, PROGRAM_FINAL_STATS, PROGRAM_STATS, SHUTDOWN, SubscriptionId,
};
pub use config::LifecycleConfig;
pub use signal::wait_for_shutdown_signal;
pub use stats::{Metric, Stats, StatsSnapshot};
pub use timers::{TimerHandle, TimerKind, TimerRegistry};
