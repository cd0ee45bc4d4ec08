//! # Lifecycle bus configuration.
//!
//! ## Sentinel values
//! - `stats_interval = 0s` → no periodic statistics report (the final one is still written)

use std::time::Duration;

/// Settings for a [`LifecycleBus`](crate::LifecycleBus).
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// How often a `PROGRAM_STATS` snapshot is logged.
    pub stats_interval: Duration,
}

impl LifecycleConfig {
    /// Returns the reporting interval as an `Option`.
    #[inline]
    pub fn stats_interval(&self) -> Option<Duration> {
        if self.stats_interval == Duration::ZERO {
            None
        } else {
            Some(self.stats_interval)
        }
    }
}

impl Default for LifecycleConfig {
    /// Default configuration:
    ///
    /// - `stats_interval = 10s`
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_disables_reporting() {
        assert_eq!(
            LifecycleConfig::default().stats_interval(),
            Some(Duration::from_secs(10))
        );
        let cfg = LifecycleConfig {
            stats_interval: Duration::ZERO,
        };
        assert_eq!(cfg.stats_interval(), None);
    }
}
