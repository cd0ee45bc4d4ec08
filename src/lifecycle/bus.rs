//! # Lifecycle bus.
//!
//! [`LifecycleBus`] is the process-wide context object that components use to register
//! cleanup-bound work and that the process driver uses to shut everything down.
//!
//! ## Architecture
//! ```text
//!                      ┌──────────── LifecycleBus ─────────────┐
//! on(event, f) ──────► │ subscribers (registration order)      │
//! register_interval ─► │ TimerRegistry ◄── root token          │
//! register_timeout ──► │                     │                 │
//!                      │ Stats ◄── reporter (stats_interval)   │
//!                      └───────────────────────────────────────┘
//!
//! shutdown()
//!   ├─► timers.cancel_all()          (no timer fires afterwards)
//!   ├─► "shutdown" handlers          (registration order, panics isolated)
//!   └─► PROGRAM_FINAL_STATS          (only if anything was recorded)
//! ```
//!
//! ## Rules
//! - `shutdown` happens once; later calls are logged and return `false`.
//! - Handlers run synchronously on the caller's thread, outside the subscriber lock, so a
//!   handler may call `on`, `off` or `emit` itself.
//! - A panicking handler is logged at `error`; the remaining handlers still run.
//! - Timers deregister when they fire (timeouts) or are cancelled.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;
use crate::lifecycle::config::LifecycleConfig;
use crate::lifecycle::signal::wait_for_shutdown_signal;
use crate::lifecycle::stats::Stats;
use crate::lifecycle::timers::{TimerHandle, TimerRegistry};

/// Name of the event fired once at shutdown.
pub const SHUTDOWN: &str = "shutdown";

/// Statistics event logged every `stats_interval`.
pub const PROGRAM_STATS: &str = "PROGRAM_STATS";

/// Statistics event logged at shutdown.
pub const PROGRAM_FINAL_STATS: &str = "PROGRAM_FINAL_STATS";

/// Event handler.
pub type HandlerFn = dyn Fn(&Value) + Send + Sync;

/// Identifies one `on` registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    event: String,
    handler: Arc<HandlerFn>,
}

/// Shutdown-aware publish/subscribe context with a timer registry and shared statistics.
pub struct LifecycleBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_sub: AtomicU64,
    timers: TimerRegistry,
    stats: Stats,
    token: CancellationToken,
    shut_down: AtomicBool,
}

impl LifecycleBus {
    /// Creates a bus and starts its statistics reporter.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(cfg: LifecycleConfig) -> Arc<Self> {
        let token = CancellationToken::new();
        let bus = Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            next_sub: AtomicU64::new(1),
            timers: TimerRegistry::new(token.clone()),
            stats: Stats::new(),
            token,
            shut_down: AtomicBool::new(false),
        });
        if let Some(every) = cfg.stats_interval() {
            spawn_reporter(bus.stats.clone(), bus.token.child_token(), every);
        }
        bus
    }

    /// Subscribes `handler` to `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_sub.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Subscriber {
            id,
            event: event.into(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Calls every handler subscribed to `event`; returns how many ran.
    ///
    /// Emitting [`SHUTDOWN`] performs [`shutdown`](Self::shutdown) and returns the number
    /// of shutdown handlers it ran (`0` if the bus was already shut down).
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        if event == SHUTDOWN {
            return self.shut_down_once().unwrap_or(0);
        }
        self.notify(event, payload)
    }

    /// Runs `f` every `period` until cancelled or shutdown.
    pub fn register_interval<F>(&self, f: F, period: Duration) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        self.timers.register_interval(f, period)
    }

    /// Runs `f` once after `delay` unless cancelled or shut down first.
    pub fn register_timeout<F>(&self, f: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers.register_timeout(f, delay)
    }

    /// Cancels one timer. Returns `false` if it was no longer active.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }

    /// Cancels all timers, then runs `shutdown` handlers in registration order, then logs
    /// final statistics.
    ///
    /// Returns `false` if the bus was already shut down.
    pub fn shutdown(&self) -> bool {
        self.shut_down_once().is_some()
    }

    /// Shared statistics collection.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Timers that can still fire.
    pub fn active_timers(&self) -> usize {
        self.timers.active()
    }

    /// Returns `true` once `shutdown` has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Token cancelled at shutdown, for work that is not a timer.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Shuts the bus down when the process receives a termination signal.
    ///
    /// The watcher exits on its own if the bus shuts down first.
    pub fn shutdown_on_signal(self: &Arc<Self>) -> JoinHandle<()> {
        let bus: Weak<Self> = Arc::downgrade(self);
        let stopped = self.token.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = stopped.cancelled() => {}
                res = wait_for_shutdown_signal() => match res {
                    Ok(()) => {
                        tracing::info!("termination signal received");
                        if let Some(bus) = bus.upgrade() {
                            bus.shutdown();
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to install signal handlers");
                    }
                },
            }
        })
    }

    fn shut_down_once(&self) -> Option<usize> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::warn!("shutdown requested again; ignoring");
            return None;
        }
        let timers = self.timers.cancel_all();
        self.token.cancel();
        let handlers = self.notify(SHUTDOWN, &Value::Null);
        self.stats.report(PROGRAM_FINAL_STATS);
        tracing::info!(timers, handlers, "lifecycle bus shut down");
        Some(handlers)
    }

    fn notify(&self, event: &str, payload: &Value) -> usize {
        let handlers: Vec<(SubscriptionId, Arc<HandlerFn>)> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.event == event)
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        for (id, handler) in &handlers {
            if let Err(panic_err) = panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                let err = CommandError::from_panic(panic_err);
                tracing::error!(event, subscription = id.0, error = %err, "event handler panicked");
            }
        }
        handlers.len()
    }
}

impl fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleBus")
            .field("subscribers", &self.subscribers.lock().len())
            .field("timers", &self.timers)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Logs `PROGRAM_STATS` every `every` until `stop` is cancelled.
fn spawn_reporter(stats: Stats, stop: CancellationToken, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    stats.report(PROGRAM_STATS);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn bus() -> Arc<LifecycleBus> {
        LifecycleBus::new(LifecycleConfig::default())
    }

    async fn sleep_ms(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_every_timer() {
        let bus = bus();
        let hits = Arc::new(AtomicUsize::new(0));

        for delay in [10, 20, 30] {
            let hits = Arc::clone(&hits);
            bus.register_timeout(
                move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(delay),
            );
        }
        let ticks = Arc::clone(&hits);
        bus.register_interval(
            move || {
                ticks.fetch_add(100, Ordering::SeqCst);
            },
            Duration::from_millis(50),
        );
        assert_eq!(bus.active_timers(), 4);

        assert!(bus.shutdown());
        assert_eq!(bus.active_timers(), 0);

        sleep_ms(500).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_handlers_run_in_registration_order_once() {
        let bus = bus();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["db", "cache", "http"] {
            let order = Arc::clone(&order);
            bus.on(SHUTDOWN, move |_| order.lock().push(name));
        }

        assert!(bus.shutdown());
        assert!(!bus.shutdown());
        assert_eq!(bus.emit(SHUTDOWN, &Value::Null), 0);

        assert!(bus.is_shut_down());
        assert_eq!(*order.lock(), vec!["db", "cache", "http"]);
    }

    #[tokio::test]
    async fn emitting_shutdown_is_shutdown() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        bus.on(SHUTDOWN, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(SHUTDOWN, &Value::Null), 1);
        assert!(bus.is_shut_down());
        assert!(!bus.shutdown());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_the_rest() {
        let bus = bus();
        let reached = Arc::new(AtomicBool::new(false));

        bus.on(SHUTDOWN, |_| panic!("handler failed"));
        let flag = Arc::clone(&reached);
        bus.on(SHUTDOWN, move |_| flag.store(true, Ordering::SeqCst));

        assert!(bus.shutdown());
        assert!(reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn custom_events_reach_only_their_subscribers() {
        let bus = bus();
        let got = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&got);
        let id = bus.on("reload", move |payload| sink.lock().push(payload.clone()));
        bus.on("other", |_| panic!("wrong event"));

        assert_eq!(bus.emit("reload", &json!({"path": "a.json"})), 1);
        assert!(bus.off(id));
        assert!(!bus.off(id));
        assert_eq!(bus.emit("reload", &json!(2)), 0);

        assert_eq!(*got.lock(), vec![json!({"path": "a.json"})]);
    }

    #[tokio::test]
    async fn handlers_may_subscribe_while_running() {
        let bus = bus();
        let inner = Arc::clone(&bus);
        bus.on("ping", move |_| {
            inner.on("pong", |_| {});
        });

        assert_eq!(bus.emit("ping", &Value::Null), 1);
        assert_eq!(bus.emit("pong", &Value::Null), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fired_and_cancelled_timers_deregister() {
        let bus = bus();
        bus.register_timeout(|| {}, Duration::from_millis(5));
        let interval = bus.register_interval(|| {}, Duration::from_millis(5));
        assert_eq!(bus.active_timers(), 2);

        sleep_ms(20).await;
        assert_eq!(bus.active_timers(), 1);

        assert!(bus.cancel(interval));
        assert_eq!(bus.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_registered_after_shutdown_never_fire() {
        let bus = bus();
        bus.shutdown();

        let hits = Arc::new(AtomicUsize::new(0));
        let bump = Arc::clone(&hits);
        bus.register_timeout(
            move || {
                bump.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(1),
        );

        sleep_ms(50).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.active_timers(), 0);
    }

    #[tokio::test]
    async fn token_and_signal_watcher_follow_shutdown() {
        let bus = bus();
        let token = bus.token();
        let watcher = bus.shutdown_on_signal();

        assert!(!token.is_cancelled());
        bus.shutdown();
        assert!(token.is_cancelled());
        watcher.await.unwrap();
    }

    /// Collects formatted log lines written while it is the default subscriber.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl LogCapture {
        fn install() -> (Self, tracing::subscriber::DefaultGuard) {
            let capture = Self::default();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(capture.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::INFO)
                .finish();
            let guard = tracing::subscriber::set_default(subscriber);
            (capture, guard)
        }

        fn lines_with(&self, needle: &str) -> usize {
            let out = self.0.lock();
            String::from_utf8_lossy(&out)
                .lines()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_report_only_when_metrics_exist() {
        let (logs, _guard) = LogCapture::install();
        let bus = LifecycleBus::new(LifecycleConfig {
            stats_interval: Duration::from_millis(100),
        });

        sleep_ms(150).await;
        assert_eq!(logs.lines_with(PROGRAM_STATS), 0);

        bus.stats().increment("commands.run");
        sleep_ms(200).await;
        assert_eq!(logs.lines_with(PROGRAM_STATS), 2);

        bus.shutdown();
        assert_eq!(logs.lines_with(PROGRAM_FINAL_STATS), 1);

        sleep_ms(500).await;
        assert_eq!(logs.lines_with(PROGRAM_STATS), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn final_report_written_once_at_shutdown() {
        let (logs, _guard) = LogCapture::install();

        let empty = bus();
        empty.shutdown();
        assert_eq!(logs.lines_with(PROGRAM_FINAL_STATS), 0);

        let busy = LifecycleBus::new(LifecycleConfig {
            stats_interval: Duration::ZERO,
        });
        busy.stats().increment("commands.run");
        sleep_ms(60_000).await;
        assert_eq!(logs.lines_with(PROGRAM_STATS), 0);

        assert!(busy.shutdown());
        assert!(!busy.shutdown());
        assert_eq!(logs.lines_with(PROGRAM_FINAL_STATS), 1);
        assert_eq!(busy.stats().snapshot().len(), 1);
    }
}
