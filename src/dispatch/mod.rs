//! Bounded, FIFO dispatch of callback-style workers.
//!
//! - [`config`]: [`QueueConfig`] (capacity, optional deadline)
//! - [`queue`]: [`DispatchQueue`], [`QueueBuilder`]

pub mod config;
pub mod queue;

pub use config::QueueConfig;
pub use queue::{DispatchQueue, QueueBuilder, WorkerFn};
