//! # Dispatch queue configuration.
//!
//! ## Sentinel values
//! - `deadline = 0s` → no deadline (tasks may hold their slot forever)

use std::time::Duration;

use serde_json::json;

use crate::error::CommandError;

/// Settings for one [`DispatchQueue`](crate::DispatchQueue).
///
/// ## Field semantics
/// - `capacity`: maximum number of outstanding invocations (must be ≥ 1)
/// - `deadline`: per-task limit after which the caller gets `TIMEOUT` (`0s` = none)
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum concurrent invocations.
    pub capacity: usize,

    /// Per-task deadline.
    ///
    /// On expiry the caller's completion receives `CommandError::Timeout`. The
    /// underlying work keeps running and keeps its slot until it completes.
    pub deadline: Duration,
}

impl QueueConfig {
    /// Config with the given capacity and no deadline.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Returns the deadline as an `Option`.
    #[inline]
    pub fn deadline(&self) -> Option<Duration> {
        if self.deadline == Duration::ZERO {
            None
        } else {
            Some(self.deadline)
        }
    }

    /// Checks the config before any queue state is created.
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.capacity == 0 {
            return Err(CommandError::argument(
                "the queue capacity must be an integer greater than zero",
            )
            .with_data(json!({"capacity": self.capacity})));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    /// Default configuration:
    ///
    /// - `capacity = 1` (strictly serial)
    /// - `deadline = 0s` (none)
    fn default() -> Self {
        Self {
            capacity: 1,
            deadline: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_serial_without_deadline() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.capacity, 1);
        assert_eq!(cfg.deadline(), None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let err = QueueConfig::with_capacity(0).validate().unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
        assert_eq!(err.data().unwrap()["capacity"], 0);
    }

    #[test]
    fn non_zero_deadline_is_reported() {
        let cfg = QueueConfig {
            capacity: 4,
            deadline: Duration::from_millis(250),
        };
        assert_eq!(cfg.deadline(), Some(Duration::from_millis(250)));
    }
}
