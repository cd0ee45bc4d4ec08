//! # Execution normalizer.
//!
//! Turns any [`Command`] into a callable with one shape:
//! `(NamedArgs, Options) -> Deferred`.
//!
//! ## Flow
//! ```text
//! call(named, options)
//!   ├─► map_named_args(named, metadata.parameter_names)
//!   ├─► Context { args: named, options }
//!   └─► match handler
//!         ├─ Sync      ─► run now ─► Deferred::ready(result)
//!         ├─ Callback  ─► Deferred::channel() ─► handler(ctx, args, completion)
//!         │                                   └─► settles on first completion call
//!         └─ Deferred  ─► handler(ctx, args) ─► Deferred::from_future(fut)
//! ```
//!
//! ## Rules
//! - Exactly one settlement per call.
//! - Errors returned by the body are forwarded untouched.
//! - A panicking body becomes `CommandError::Panicked`; it never unwinds through this layer.
//! - Sync and callback bodies run inside `call`; deferred bodies run when the result is polled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;

use crate::command::args::{NamedArgs, Options, map_named_args};
use crate::command::completion::Deferred;
use crate::command::handler::{Command, Context, Handler};
use crate::command::signature::{CallableMetadata, inspect};
use crate::error::CommandError;

/// A command bound to its metadata, callable with named arguments.
#[derive(Clone, Debug)]
pub struct Normalized {
    command: Command,
    metadata: Arc<CallableMetadata>,
    label: Arc<str>,
}

/// Binds `command` to previously derived `metadata`.
///
/// Fails with `ARGUMENT_ERROR` if the metadata disagrees with the handler convention.
pub fn normalize(command: Command, metadata: CallableMetadata) -> Result<Normalized, CommandError> {
    if metadata.has_trailing_callback() != command.handler().takes_completion() {
        return Err(CommandError::argument(format!(
            "metadata for {:?} does not match its {} handler",
            command.name(),
            command.handler().as_label()
        )));
    }
    let label: Arc<str> = Arc::from(command.name());
    Ok(Normalized {
        command,
        metadata: Arc::new(metadata),
        label,
    })
}

impl Command {
    /// Inspects and normalizes in one step.
    pub fn into_normalized(self) -> Result<Normalized, CommandError> {
        let metadata = inspect(&self)?;
        normalize(self, metadata)
    }
}

impl Normalized {
    /// The wrapped command.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Metadata the call path maps arguments with.
    pub fn metadata(&self) -> &CallableMetadata {
        &self.metadata
    }

    /// Invokes the command and returns its uniform result.
    ///
    /// # Example
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use cmdvisor::{Command, CommandError, NamedArgs};
    /// use serde_json::{Value, json};
    ///
    /// let sum = Command::sync("sum", ["a", "b"], |_ctx, args| {
    ///     let total: i64 = args.iter().flatten().filter_map(Value::as_i64).sum();
    ///     Ok::<_, CommandError>(total)
    /// })
    /// .into_normalized()
    /// .unwrap();
    ///
    /// let mut named = NamedArgs::new();
    /// named.insert("a".into(), json!(2));
    /// named.insert("b".into(), json!(3));
    /// assert_eq!(sum.call(named, Default::default()).await.unwrap(), json!(5));
    /// # }
    /// ```
    pub fn call(&self, named: NamedArgs, options: Options) -> Deferred {
        let args = map_named_args(&named, self.metadata.parameter_names());
        let ctx = Context::new(named, options);

        tracing::debug!(
            command = %self.label,
            handler = self.command.handler().as_label(),
            "invoking command"
        );

        match self.command.handler() {
            Handler::Sync(f) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&ctx, args)))
                    .unwrap_or_else(|payload| Err(CommandError::from_panic(payload)));
                Deferred::ready(outcome)
            }
            Handler::Callback(f) => {
                let (completion, deferred) = Deferred::channel(Arc::clone(&self.label));
                let guard = completion.clone();
                if let Err(payload) =
                    panic::catch_unwind(AssertUnwindSafe(|| f(&ctx, args, completion)))
                {
                    // Only takes effect if the body had not settled before panicking.
                    guard.fail(CommandError::from_panic(payload));
                }
                deferred
            }
            Handler::Deferred(f) => {
                match panic::catch_unwind(AssertUnwindSafe(|| f(&ctx, args))) {
                    Ok(fut) => Deferred::from_future(AssertUnwindSafe(fut).catch_unwind().map(
                        |res| res.unwrap_or_else(|payload| Err(CommandError::from_panic(payload))),
                    )),
                    Err(payload) => Deferred::ready(Err(CommandError::from_panic(payload))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::completion::Completion;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn named(v: Value) -> NamedArgs {
        match v {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn int(arg: &Option<Value>) -> i64 {
        arg.as_ref().and_then(Value::as_i64).unwrap_or_default()
    }

    #[tokio::test]
    async fn sync_sum_resolves_to_return_value() {
        let sum = Command::sync("sum", ["a", "b"], |_ctx, args| {
            Ok::<_, CommandError>(int(&args[0]) + int(&args[1]))
        })
        .into_normalized()
        .unwrap();

        let out = sum.call(named(json!({"a": 2, "b": 3})), Options::new()).await;
        assert_eq!(out.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn sync_error_becomes_rejection() {
        let cmd = Command::sync("boom", ["x"], |_ctx, _args| {
            Err::<Value, _>(CommandError::failed("E_BOOM", "exploded"))
        })
        .into_normalized()
        .unwrap();

        let err = cmd.call(NamedArgs::new(), Options::new()).await.unwrap_err();
        assert_eq!(err.code(), "E_BOOM");
    }

    #[tokio::test]
    async fn sync_panic_becomes_rejection() {
        let cmd = Command::sync("panics", Vec::<&'static str>::new(), |_ctx, _args| {
            if true {
                panic!("sync body blew up");
            }
            Ok::<_, CommandError>(Value::Null)
        })
        .into_normalized()
        .unwrap();

        let err = cmd.call(NamedArgs::new(), Options::new()).await.unwrap_err();
        assert_eq!(err.code(), "PANICKED");
        assert_eq!(err.as_message(), "panicked: sync body blew up");
    }

    #[tokio::test]
    async fn context_exposes_raw_args_and_options() {
        let cmd = Command::sync("ctx", ["a"], |ctx, args| {
            Ok::<_, CommandError>(json!({
                "positional": args.len(),
                "raw": ctx.args().len(),
                "pretty": ctx.options().get("pretty").cloned().unwrap_or(Value::Null),
            }))
        })
        .into_normalized()
        .unwrap();

        let out = cmd
            .call(named(json!({"a": 1, "extra": 2})), named(json!({"pretty": true})))
            .await
            .unwrap();
        assert_eq!(out, json!({"positional": 1, "raw": 2, "pretty": true}));
    }

    #[tokio::test]
    async fn callback_settles_once_from_first_call() {
        let cmd = Command::callback("twice", ["n", "callback"], |_ctx, args, done| {
            let n = int(&args[0]);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.succeed(n * 10);
                done.succeed(n * 100);
                done.fail(CommandError::failed("LATE", "ignored"));
            });
        })
        .into_normalized()
        .unwrap();

        let out = cmd.call(named(json!({"n": 4})), Options::new()).await;
        assert_eq!(out.unwrap(), json!(40));
    }

    #[tokio::test]
    async fn callback_error_is_forwarded() {
        let cmd = Command::callback("fails", ["callback"], |_ctx, _args, done| {
            done.fail(CommandError::failed("E_REMOTE", "503"));
        })
        .into_normalized()
        .unwrap();

        let err = cmd.call(NamedArgs::new(), Options::new()).await.unwrap_err();
        assert_eq!(err.code(), "E_REMOTE");
    }

    #[tokio::test]
    async fn callback_panic_after_settling_keeps_first_result() {
        let cmd = Command::callback("settle-then-panic", ["callback"], |_ctx, _args, done| {
            done.succeed("kept");
            panic!("after settling");
        })
        .into_normalized()
        .unwrap();

        let out = cmd.call(NamedArgs::new(), Options::new()).await;
        assert_eq!(out.unwrap(), json!("kept"));
    }

    #[tokio::test]
    async fn callback_panic_before_settling_rejects() {
        let cmd = Command::callback("panics", ["callback"], |_ctx, _args, _done: Completion| {
            panic!("no settle");
        })
        .into_normalized()
        .unwrap();

        let err = cmd.call(NamedArgs::new(), Options::new()).await.unwrap_err();
        assert_eq!(err.code(), "PANICKED");
    }

    #[tokio::test]
    async fn sync_body_never_touches_completion_path() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cmd = Command::sync("count", ["callbacks"], move |_ctx, _args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CommandError>("done")
        })
        .into_normalized()
        .unwrap();

        assert!(!cmd.metadata().has_trailing_callback());
        assert_eq!(cmd.call(NamedArgs::new(), Options::new()).await.unwrap(), json!("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deferred_resolves_when_polled() {
        let cmd = Command::deferred("later", ["ms"], |_ctx, args| {
            let ms = int(&args[0]) as u64;
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, CommandError>(ms)
            }
        })
        .into_normalized()
        .unwrap();

        let out = cmd.call(named(json!({"ms": 3})), Options::new()).await;
        assert_eq!(out.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn deferred_panic_becomes_rejection() {
        let cmd = Command::deferred("panics", Vec::<&'static str>::new(), |_ctx, _args| async {
            if true {
                panic!("inside the future");
            }
            Ok::<_, CommandError>(Value::Null)
        })
        .into_normalized()
        .unwrap();

        let err = cmd.call(NamedArgs::new(), Options::new()).await.unwrap_err();
        assert_eq!(err.as_message(), "panicked: inside the future");
    }

    #[test]
    fn mismatched_metadata_is_rejected() {
        let sync = Command::sync("s", ["a"], |_ctx, _args| Ok::<_, CommandError>(Value::Null));
        let cb = Command::callback("c", ["callback"], |_ctx, _args, done| {
            done.succeed(Value::Null);
        });
        let cb_meta = inspect(&cb).unwrap();

        let err = normalize(sync, cb_meta).unwrap_err();
        assert!(err.is_argument());
    }
}
