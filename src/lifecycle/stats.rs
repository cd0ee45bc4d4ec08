//! # Process statistics.
//!
//! [`Stats`] is a shared collection of named metrics: counters, gauges and timers.
//! The [`LifecycleBus`](crate::LifecycleBus) logs a JSON snapshot on a fixed interval and
//! once more at shutdown, but only when something has been recorded.
//!
//! ## Rules
//! - A name keeps the kind it was first recorded with; mismatched updates are ignored (logged).
//! - Snapshots are ordered by name.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

/// One metric as it appears in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Metric {
    /// Monotonic count.
    Counter {
        /// Total so far.
        count: u64,
    },
    /// Last value set.
    Gauge {
        /// Current value.
        value: i64,
    },
    /// Distribution of recorded durations, in milliseconds.
    Timer {
        /// Number of samples.
        count: u64,
        /// Sum of samples.
        total_ms: f64,
        /// Smallest sample.
        min_ms: f64,
        /// Largest sample.
        max_ms: f64,
    },
}

impl Metric {
    fn as_label(&self) -> &'static str {
        match self {
            Metric::Counter { .. } => "counter",
            Metric::Gauge { .. } => "gauge",
            Metric::Timer { .. } => "timer",
        }
    }
}

/// Point-in-time copy of every metric.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatsSnapshot {
    metrics: BTreeMap<String, Metric>,
}

impl StatsSnapshot {
    /// Metric by name.
    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Plain JSON form, as written to the log.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Cloneable handle to a shared metrics collection.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    metrics: Arc<Mutex<BTreeMap<String, Metric>>>,
}

impl Stats {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to a counter.
    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Adds `n` to a counter.
    pub fn add(&self, name: &str, n: u64) {
        self.update(name, Metric::Counter { count: n }, |metric| match metric {
            Metric::Counter { count } => {
                *count = count.saturating_add(n);
                true
            }
            _ => false,
        });
    }

    /// Sets a gauge.
    pub fn set_gauge(&self, name: &str, value: i64) {
        self.update(name, Metric::Gauge { value }, |metric| match metric {
            Metric::Gauge { value: current } => {
                *current = value;
                true
            }
            _ => false,
        });
    }

    /// Records one duration sample.
    pub fn record(&self, name: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let first = Metric::Timer {
            count: 1,
            total_ms: ms,
            min_ms: ms,
            max_ms: ms,
        };
        self.update(name, first, |metric| match metric {
            Metric::Timer {
                count,
                total_ms,
                min_ms,
                max_ms,
            } => {
                *count += 1;
                *total_ms += ms;
                *min_ms = min_ms.min(ms);
                *max_ms = max_ms.max(ms);
                true
            }
            _ => false,
        });
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    /// Copies every metric.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            metrics: self.metrics.lock().clone(),
        }
    }

    /// Drops every metric.
    pub fn clear(&self) {
        self.metrics.lock().clear();
    }

    /// Logs a snapshot under `event` if anything was recorded.
    ///
    /// Returns `true` if a snapshot was written.
    pub(crate) fn report(&self, event: &'static str) -> bool {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return false;
        }
        tracing::info!(
            target: "cmdvisor::stats",
            event,
            metrics = snapshot.len(),
            stats = %snapshot.to_json(),
            "{event}"
        );
        true
    }

    fn update(&self, name: &str, first: Metric, apply: impl FnOnce(&mut Metric) -> bool) {
        let mut metrics = self.metrics.lock();
        match metrics.get_mut(name) {
            Some(existing) => {
                if !apply(existing) {
                    tracing::warn!(
                        metric = name,
                        kind = existing.as_label(),
                        attempted = first.as_label(),
                        "metric kind mismatch; update ignored"
                    );
                }
            }
            None => {
                metrics.insert(name.to_string(), first);
            }
        }
    }
}
