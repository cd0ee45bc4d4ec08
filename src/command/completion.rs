//! # Completions and deferred results.
//!
//! [`Completion`] is the callback handed to callback-style handlers and queued workers;
//! [`Deferred`] is the uniform result every invocation produces.
//!
//! ```text
//! Deferred::channel()
//!     ├─► Completion ──► handler ... complete(outcome) ──┐
//!     │                                                  │ oneshot
//!     └─► Deferred  ◄────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - A completion settles **at most once**; clones share the same slot.
//! - Later calls are ignored and logged at `warn`; the settled result never changes.
//! - Dropping every clone without calling it settles the paired [`Deferred`] with
//!   [`CommandError::Abandoned`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::command::handler::Outcome;
use crate::error::CommandError;

type SettleFn = Box<dyn FnOnce(Outcome) + Send>;

struct Inner {
    label: Arc<str>,
    settle: Mutex<Option<SettleFn>>,
}

/// Callback that accepts a single [`Outcome`].
///
/// Cheap to clone; every clone refers to the same one-shot slot.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<Inner>,
}

impl Completion {
    /// Creates a completion that runs `f` on the first call.
    pub fn new<F>(label: impl Into<Arc<str>>, f: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                settle: Mutex::new(Some(Box::new(f))),
            }),
        }
    }

    /// Settles with `outcome`.
    ///
    /// Returns `false` (and logs) if the completion was already settled.
    pub fn complete(&self, outcome: Outcome) -> bool {
        let settle = self.inner.settle.lock().take();
        match settle {
            Some(f) => {
                f(outcome);
                true
            }
            None => {
                tracing::warn!(
                    completion = %self.inner.label,
                    ok = outcome.is_ok(),
                    "completion called after it already settled; ignoring"
                );
                false
            }
        }
    }

    /// Settles with a value.
    pub fn succeed(&self, value: impl Into<Value>) -> bool {
        self.complete(Ok(value.into()))
    }

    /// Settles with an error.
    pub fn fail(&self, err: CommandError) -> bool {
        self.complete(Err(err))
    }

    /// Returns `true` once the completion has been called.
    pub fn is_settled(&self) -> bool {
        self.inner.settle.lock().is_none()
    }

    /// Label used in logs (command or queue name).
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("label", &self.inner.label)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Result of one invocation, available later.
///
/// Resolves exactly once to `Ok(value)` or `Err(error)`.
#[must_use = "a Deferred does nothing unless awaited"]
pub struct Deferred {
    inner: BoxFuture<'static, Outcome>,
}

impl Deferred {
    /// An already settled result.
    pub fn ready(outcome: Outcome) -> Self {
        Self {
            inner: future::ready(outcome).boxed(),
        }
    }

    /// Wraps a future; it runs when the `Deferred` is polled.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        Self { inner: fut.boxed() }
    }

    /// Creates a linked pair: the first call on the [`Completion`] settles the `Deferred`.
    ///
    /// # Example
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use cmdvisor::Deferred;
    ///
    /// let (done, result) = Deferred::channel("demo");
    /// done.succeed(7);
    /// assert!(!done.succeed(8)); // ignored
    /// assert_eq!(result.await.unwrap(), 7);
    /// # }
    /// ```
    pub fn channel(label: impl Into<Arc<str>>) -> (Completion, Deferred) {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let completion = Completion::new(label, move |outcome| {
            // The receiver may be gone if the caller stopped waiting.
            let _ = tx.send(outcome);
        });
        let deferred = Self::from_future(
            rx.map(|received| received.unwrap_or(Err(CommandError::Abandoned))),
        );
        (completion, deferred)
    }
}

impl Future for Deferred {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_call_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let done = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            Completion::new("t", move |outcome: Outcome| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some(outcome.map_err(|e| e.code().to_string()));
            })
        };

        assert!(!done.is_settled());
        assert!(done.succeed(1));
        assert!(!done.fail(CommandError::failed("LATE", "too late")));
        assert!(!done.clone().succeed(3));

        assert!(done.is_settled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), Some(Ok(json!(1))));
    }

    #[tokio::test]
    async fn channel_resolves_with_first_value() {
        let (done, result) = Deferred::channel("t");
        let other = done.clone();
        tokio::spawn(async move {
            other.succeed("first");
        });
        assert_eq!(result.await.unwrap(), json!("first"));
        assert!(!done.succeed("second"));
    }

    #[tokio::test]
    async fn channel_rejects_with_error() {
        let (done, result) = Deferred::channel("t");
        done.fail(CommandError::failed("E_IO", "broken pipe"));
        let err = result.await.unwrap_err();
        assert_eq!(err.code(), "E_IO");
    }

    #[tokio::test]
    async fn dropped_completion_is_abandoned() {
        let (done, result) = Deferred::channel("t");
        drop(done);
        let err = result.await.unwrap_err();
        assert!(matches!(err, CommandError::Abandoned));
    }

    #[tokio::test]
    async fn ready_and_future_variants() {
        assert_eq!(Deferred::ready(Ok(json!(5))).await.unwrap(), json!(5));

        let lazy = Deferred::from_future(async { Ok::<_, CommandError>(json!("later")) });
        assert_eq!(lazy.await.unwrap(), json!("later"));
    }
}
