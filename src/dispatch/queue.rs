//! # Bounded dispatch queue.
//!
//! [`DispatchQueue`] wraps a callback-style worker so that at most `capacity` invocations
//! have outstanding completions. Extra submissions wait in strict FIFO order.
//!
//! ## Architecture
//! ```text
//! dispatch(args, completion) ──► [unbounded mpsc] ──► dispatcher loop
//!                                   (pending)           │
//!                                                       ├─► recv next task (FIFO)
//!                                                       ├─► acquire slot (fair semaphore)
//!                                                       └─► admit:
//!                                                             worker(args, wrapped)
//!                                                                   │
//!                        wrapped.complete(outcome) ◄────────────────┘
//!                            ├─► release slot ──► dispatcher admits the next task
//!                            └─► completion.complete(outcome)   (unmodified)
//! ```
//!
//! ## State
//! ```text
//! Idle (in_flight = 0) ──► Running (0 < in_flight ≤ capacity) ──► Draining (pending > 0, in_flight = capacity)
//! ```
//!
//! ## Rules
//! - Admission order is submission order; there is no priority or fairness reordering.
//! - `in_flight ≤ capacity` at all times.
//! - Worker errors reach the caller untouched; nothing is retried or suppressed.
//! - A worker that panics, or drops its completion, gives its slot back.
//! - A worker that keeps its completion and never calls it holds its slot forever.
//!   With a deadline configured the caller is released with `TIMEOUT`, the slot is not.
//! - The dispatcher loop exits once every handle is dropped and pending tasks are drained.

use std::borrow::Cow;
use std::fmt;
use std::iter;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::command::{
    CALLBACK_PARAM, Command, Completion, Context, Deferred, Handler, Positional, Signature,
};
use crate::dispatch::config::QueueConfig;
use crate::error::CommandError;
use crate::lifecycle::Stats;

/// Callback-style worker driven by a [`DispatchQueue`].
pub type WorkerFn = dyn Fn(Positional, Completion) + Send + Sync;

/// A submission waiting for a slot. Owned by the queue until admitted.
struct QueuedTask {
    args: Positional,
    completion: Completion,
    queued_at: Instant,
}

/// Precomputed metric names for one queue.
struct MetricKeys {
    queued: String,
    admitted: String,
    completed: String,
    wait: String,
    run: String,
}

impl MetricKeys {
    fn new(name: &str) -> Self {
        Self {
            queued: format!("dispatch.{name}.queued"),
            admitted: format!("dispatch.{name}.admitted"),
            completed: format!("dispatch.{name}.completed"),
            wait: format!("dispatch.{name}.wait"),
            run: format!("dispatch.{name}.run"),
        }
    }
}

/// State shared between handles and the dispatcher loop.
struct Shared {
    name: Arc<str>,
    capacity: usize,
    deadline: Option<Duration>,
    slots: Arc<Semaphore>,
    pending: AtomicUsize,
    stats: Option<(Stats, MetricKeys)>,
}

impl Shared {
    fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }
}

/// Builder for a [`DispatchQueue`] with optional statistics.
pub struct QueueBuilder {
    name: Arc<str>,
    cfg: QueueConfig,
    stats: Option<Stats>,
}

impl QueueBuilder {
    /// Creates a builder for a queue called `name`.
    pub fn new(name: impl Into<Arc<str>>, cfg: QueueConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            stats: None,
        }
    }

    /// Records queue metrics (`dispatch.<name>.*`) into `stats`.
    pub fn with_stats(mut self, stats: Stats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Validates the config, then starts the dispatcher loop for `worker`.
    ///
    /// Nothing is created when validation fails. Must be called inside a Tokio runtime.
    pub fn wrap<F>(self, worker: F) -> Result<DispatchQueue, CommandError>
    where
        F: Fn(Positional, Completion) + Send + Sync + 'static,
    {
        self.cfg.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = self.stats.map(|s| (s, MetricKeys::new(&self.name)));
        let shared = Arc::new(Shared {
            name: self.name,
            capacity: self.cfg.capacity,
            deadline: self.cfg.deadline(),
            slots: Arc::new(Semaphore::new(self.cfg.capacity)),
            pending: AtomicUsize::new(0),
            stats,
        });

        tracing::debug!(
            queue = %shared.name,
            capacity = shared.capacity,
            deadline = ?shared.deadline,
            "dispatch queue started"
        );
        tokio::spawn(run_dispatcher(Arc::clone(&shared), Arc::new(worker), rx));

        Ok(DispatchQueue { tx, shared })
    }
}

/// Handle to a bounded, FIFO dispatch queue.
///
/// Cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    shared: Arc<Shared>,
}

impl DispatchQueue {
    /// Starts a builder.
    pub fn builder(name: impl Into<Arc<str>>, cfg: QueueConfig) -> QueueBuilder {
        QueueBuilder::new(name, cfg)
    }

    /// Wraps `worker` so at most `cfg.capacity` calls are outstanding.
    ///
    /// Fails with `ARGUMENT_ERROR` when `cfg.capacity == 0`.
    ///
    /// # Example
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use cmdvisor::{DispatchQueue, QueueConfig};
    /// use serde_json::json;
    ///
    /// let echo = DispatchQueue::wrap("echo", |args, done| {
    ///     done.succeed(args[0].clone().unwrap_or_default());
    /// }, QueueConfig::with_capacity(2))
    /// .unwrap();
    ///
    /// assert_eq!(echo.submit(vec![Some(json!("hi"))]).await.unwrap(), json!("hi"));
    /// # }
    /// ```
    pub fn wrap<F>(name: impl Into<Arc<str>>, worker: F, cfg: QueueConfig) -> Result<Self, CommandError>
    where
        F: Fn(Positional, Completion) + Send + Sync + 'static,
    {
        QueueBuilder::new(name, cfg).wrap(worker)
    }

    /// Queues one invocation; `completion` receives the worker's outcome.
    ///
    /// Fails with `ARGUMENT_ERROR` if the dispatcher loop is gone (runtime shut down).
    pub fn dispatch(&self, args: Positional, completion: Completion) -> Result<(), CommandError> {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let task = QueuedTask {
            args,
            completion,
            queued_at: Instant::now(),
        };
        if self.tx.send(task).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(CommandError::argument(format!(
                "dispatch queue {:?} is closed",
                &*self.shared.name
            )));
        }
        if let Some((stats, keys)) = &self.shared.stats {
            stats.increment(&keys.queued);
        }
        Ok(())
    }

    /// Queues one invocation and returns its result.
    pub fn submit(&self, args: Positional) -> Deferred {
        let (completion, deferred) = Deferred::channel(Arc::clone(&self.shared.name));
        match self.dispatch(args, completion) {
            Ok(()) => deferred,
            Err(err) => Deferred::ready(Err(err)),
        }
    }

    /// Exposes the queue as a callback-style [`Command`].
    ///
    /// `params` are the worker's positional names; the trailing `callback` is appended.
    pub fn command<P, S>(&self, name: impl Into<Cow<'static, str>>, params: P) -> Command
    where
        P: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        let queue = self.clone();
        let signature = Signature::new(
            params
                .into_iter()
                .map(Into::into)
                .chain(iter::once(Cow::Borrowed(CALLBACK_PARAM))),
        );
        let forward = move |_ctx: &Context, args: Positional, done: Completion| {
            let fallback = done.clone();
            if let Err(err) = queue.dispatch(args, done) {
                fallback.fail(err);
            }
        };
        let handler = Handler::Callback(Arc::new(forward));
        Command::new(name, signature, handler)
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Maximum concurrent invocations.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Invocations waiting for a slot.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Invocations admitted and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("pending", &self.pending())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Admits tasks in submission order while slots are free.
async fn run_dispatcher(
    shared: Arc<Shared>,
    worker: Arc<WorkerFn>,
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
) {
    while let Some(task) = rx.recv().await {
        let permit = match Arc::clone(&shared.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_closed) => {
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                task.completion.fail(CommandError::argument("dispatch queue slots closed"));
                break;
            }
        };
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        admit(&shared, worker.as_ref(), task, permit);
    }
    tracing::debug!(queue = %shared.name, "dispatcher stopped");
}

/// Runs one task, binding its slot to the completion it hands the worker.
fn admit(shared: &Arc<Shared>, worker: &WorkerFn, task: QueuedTask, permit: OwnedSemaphorePermit) {
    let QueuedTask {
        args,
        completion: caller,
        queued_at,
    } = task;
    let started_at = Instant::now();

    if let Some((stats, keys)) = &shared.stats {
        stats.increment(&keys.admitted);
        stats.record(&keys.wait, started_at.duration_since(queued_at));
    }
    tracing::debug!(
        queue = %shared.name,
        in_flight = shared.in_flight(),
        pending = shared.pending.load(Ordering::SeqCst),
        "task admitted"
    );

    let finished = CancellationToken::new();
    if let Some(deadline) = shared.deadline {
        spawn_watchdog(
            Arc::clone(&shared.name),
            caller.clone(),
            finished.clone(),
            deadline,
        );
    }

    // Cancels the watchdog whether the completion is called or dropped.
    let finished = finished.drop_guard();
    let on_done = Arc::clone(shared);
    let wrapped = Completion::new(Arc::clone(&shared.name), move |outcome| {
        drop(finished);
        drop(permit);
        if let Some((stats, keys)) = &on_done.stats {
            stats.increment(&keys.completed);
            stats.record(&keys.run, started_at.elapsed());
        }
        if caller.is_settled() {
            tracing::debug!(
                queue = %on_done.name,
                ok = outcome.is_ok(),
                "late completion after deadline; result dropped"
            );
            return;
        }
        tracing::debug!(queue = %on_done.name, ok = outcome.is_ok(), "task completed");
        caller.complete(outcome);
    });

    let guard = wrapped.clone();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| worker(args, wrapped))) {
        guard.fail(CommandError::from_panic(payload));
    }
}

/// Releases the caller with `TIMEOUT` if the task outlives `deadline`.
fn spawn_watchdog(
    name: Arc<str>,
    caller: Completion,
    finished: CancellationToken,
    deadline: Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = finished.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                if caller.fail(CommandError::Timeout { timeout: deadline }) {
                    tracing::warn!(
                        queue = %name,
                        ?deadline,
                        "task missed its deadline; its slot stays occupied until it completes"
                    );
                }
            }
        }
    });
}
