//! # Shutdown-aware timer registry.
//!
//! [`TimerRegistry`] schedules delayed and periodic callbacks on the Tokio timer and keeps a
//! removable record of the ones still active. Every timer runs under a child of the
//! registry's root [`CancellationToken`], so cancelling the root stops all of them.
//!
//! ```text
//! register_timeout(f, delay) ──► insert(id) ──► spawn ─► select { cancelled | sleep(delay) }
//!                                                             └─► remove(id) ─► f()
//! register_interval(f, period) ─► insert(id) ──► spawn ─► loop { cancelled | tick ─► f() }
//! cancel(handle) ──► remove(id) + token.cancel()
//! cancel_all()   ──► clear()    + root.cancel()
//! ```
//!
//! ## Rules
//! - A timeout fires at most once and deregisters itself when it does.
//! - Removal from the registry decides the race between firing and cancelling:
//!   whoever removes the entry first wins, so a cancelled timeout never runs.
//! - An interval's first tick is one full period after registration.
//! - A panicking callback is logged; an interval keeps ticking afterwards.
//! - Once the root is cancelled, new registrations return a handle that never fires.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;

/// Shortest interval period accepted; smaller values are rounded up.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Kind of scheduled work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Runs repeatedly.
    Interval,
    /// Runs once.
    Timeout,
}

impl TimerKind {
    /// Short label used in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TimerKind::Interval => "interval",
            TimerKind::Timeout => "timeout",
        }
    }
}

/// Opaque identifier of a registered timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    kind: TimerKind,
}

impl TimerHandle {
    /// Timer kind.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.as_label(), self.id)
    }
}

type Active = Arc<Mutex<HashMap<u64, CancellationToken>>>;

/// Registry of active timers, all bound to one root token.
pub struct TimerRegistry {
    root: CancellationToken,
    active: Active,
    next_id: AtomicU64,
}

impl TimerRegistry {
    /// Creates a registry whose timers stop when `root` is cancelled.
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs `f` once after `delay`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn register_timeout<F>(&self, f: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let Some((handle, token)) = self.reserve(TimerKind::Timeout) else {
            return self.inert(TimerKind::Timeout);
        };
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = time::sleep(delay) => {}
            }
            if active.lock().remove(&handle.id).is_none() {
                return;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                log_panic(handle, payload);
            }
        });
        handle
    }

    /// Runs `f` every `period`, starting one period from now.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn register_interval<F>(&self, mut f: F, period: Duration) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let Some((handle, token)) = self.reserve(TimerKind::Interval) else {
            return self.inert(TimerKind::Interval);
        };
        let period = period.max(MIN_PERIOD);

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if token.is_cancelled() {
                    break;
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&mut f)) {
                    log_panic(handle, payload);
                }
            }
        });
        handle
    }

    /// Cancels one timer.
    ///
    /// Returns `false` if it already fired, was already cancelled, or never ran.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        match self.active.lock().remove(&handle.id) {
            Some(token) => {
                token.cancel();
                tracing::debug!(timer = %handle, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every timer and the root; later registrations never fire.
    ///
    /// Returns how many timers were still active.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<CancellationToken> = {
            let mut active = self.active.lock();
            active.drain().map(|(_, token)| token).collect()
        };
        for token in &drained {
            token.cancel();
        }
        self.root.cancel();
        drained.len()
    }

    /// Number of timers that can still fire.
    pub fn active(&self) -> usize {
        self.active.lock().len()
    }

    fn reserve(&self, kind: TimerKind) -> Option<(TimerHandle, CancellationToken)> {
        let handle = TimerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        let token = self.root.child_token();
        let mut active = self.active.lock();
        // Checked under the lock so `cancel_all` cannot miss this entry.
        if self.root.is_cancelled() {
            return None;
        }
        active.insert(handle.id, token.clone());
        Some((handle, token))
    }

    fn inert(&self, kind: TimerKind) -> TimerHandle {
        let handle = TimerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        tracing::debug!(timer = %handle, "registry already shut down; timer will not fire");
        handle
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("active", &self.active())
            .field("cancelled", &self.root.is_cancelled())
            .finish()
    }
}

fn log_panic(handle: TimerHandle, payload: Box<dyn std::any::Any + Send>) {
    let err = CommandError::from_panic(payload);
    tracing::error!(timer = %handle, error = %err, "timer callback panicked");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + Clone + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let bump = {
            let hits = Arc::clone(&hits);
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        };
        (hits, bump)
    }

    async fn sleep_ms(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_and_deregisters() {
        let timers = TimerRegistry::default();
        let (hits, bump) = counter();

        let handle = timers.register_timeout(bump, Duration::from_millis(20));
        assert_eq!(handle.kind(), TimerKind::Timeout);
        assert_eq!(timers.active(), 1);

        sleep_ms(10).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        sleep_ms(20).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(timers.active(), 0);

        // Cancelling a fired timeout is a no-op.
        assert!(!timers.cancel(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timeout_never_fires() {
        let timers = TimerRegistry::default();
        let (hits, bump) = counter();

        let handle = timers.register_timeout(bump, Duration::from_millis(20));
        assert!(timers.cancel(handle));
        assert!(!timers.cancel(handle));
        assert_eq!(timers.active(), 0);

        sleep_ms(100).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticks_until_cancelled() {
        let timers = TimerRegistry::default();
        let (hits, bump) = counter();

        let handle = timers.register_interval(bump, Duration::from_millis(10));
        sleep_ms(35).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert!(timers.cancel(handle));
        sleep_ms(100).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_everything_and_later_registrations() {
        let timers = TimerRegistry::default();
        let (hits, bump) = counter();

        timers.register_interval(bump.clone(), Duration::from_millis(10));
        timers.register_timeout(bump.clone(), Duration::from_millis(15));
        assert_eq!(timers.cancel_all(), 2);
        assert_eq!(timers.active(), 0);

        let late = timers.register_timeout(bump, Duration::from_millis(5));
        assert_eq!(timers.active(), 0);
        assert!(!timers.cancel(late));

        sleep_ms(100).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_interval_keeps_ticking() {
        let timers = TimerRegistry::default();
        let (hits, bump) = counter();

        timers.register_interval(
            move || {
                bump();
                panic!("tick failed");
            },
            Duration::from_millis(10),
        );
        sleep_ms(25).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(timers.active(), 1);
    }

    #[test]
    fn handles_render_kind_and_id() {
        let handle = TimerHandle {
            id: 7,
            kind: TimerKind::Interval,
        };
        assert_eq!(handle.to_string(), "interval#7");
    }
}
