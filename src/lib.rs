//! # cmdvisor
//!
//! **cmdvisor** is a small command-execution kernel for process-wide application runners.
//!
//! It takes a command handler and a set of named arguments, maps them onto the handler's
//! declared parameters, and turns whatever calling convention the handler uses (plain
//! return, trailing completion callback, or future) into one uniform [`Deferred`] result.
//! Handlers that must be rate-limited go through a bounded, FIFO [`DispatchQueue`].
//! A [`LifecycleBus`] owns every timer registered by the process and cancels them all at
//! shutdown.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   caller (CLI / service)
//!         │ name, NamedArgs, Options
//!         ▼
//! ┌──────────────────┐   ┌───────────────────┐   ┌────────────────────────────────┐
//! │ Program          │──►│ inspect(command)  │──►│ Normalized::call(named, opts)  │
//! │ (registry)       │   │ → CallableMetadata│   │  ├─ map_named_args → Positional│
//! └──────────────────┘   └───────────────────┘   │  └─ Sync / Callback / Deferred │
//!                                                └───────────────┬────────────────┘
//!                                                                ▼
//!                                                       Deferred (Ok | Err)
//!
//! rate-limited worker:
//!   DispatchQueue::wrap(name, worker, QueueConfig{capacity})
//!     dispatch(args, completion) ─► FIFO pending ─► ≤ capacity in flight ─► worker
//!
//! orthogonal:
//!   LifecycleBus ── register_interval / register_timeout ──► TimerRegistry
//!        └── shutdown() ─► cancel all timers ─► "shutdown" handlers ─► final stats
//! ```
//!
//! ### Calling conventions
//! ```text
//! Handler::Sync(f)      f(&ctx, args) -> Result<Value, CommandError>   settles immediately
//! Handler::Callback(f)  f(&ctx, args, completion)                      settles on first call
//! Handler::Deferred(f)  f(&ctx, args) -> impl Future<Output = Result>  settles when polled
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types                                  |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------|
//! | **Commands**      | Declared signatures, named-argument mapping, one call shape. | [`Command`], [`inspect`], [`normalize()`]  |
//! | **Completions**   | Settle-once callbacks and the uniform deferred result.       | [`Completion`], [`Deferred`]               |
//! | **Dispatch**      | Bounded concurrency with strict FIFO admission.              | [`DispatchQueue`], [`QueueConfig`]         |
//! | **Lifecycle**     | Shutdown notification, cancellable timers, statistics.       | [`LifecycleBus`], [`Stats`]                |
//! | **Programs**      | Named command sets and the top-level run.                    | [`Program`], [`ProgramInfo`]               |
//! | **Errors**        | One error type with stable codes.                            | [`CommandError`]                           |
//!
//! ## Example
//! ```rust
//! use cmdvisor::{Command, CommandError, LifecycleBus, LifecycleConfig, Program, parse_named_args};
//! use serde_json::Value;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), CommandError> {
//!     let program = Program::new("calc", "0.1.0").with_command(Command::sync(
//!         "add",
//!         ["a", "b"],
//!         |_ctx, args| {
//!             let n = |v: &Option<Value>| {
//!                 v.as_ref().and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok())
//!             };
//!             match (n(&args[0]), n(&args[1])) {
//!                 (Some(a), Some(b)) => Ok(a + b),
//!                 _ => Err(CommandError::failed("BAD_INPUT", "a and b must be integers")),
//!             }
//!         },
//!     ))?;
//!
//!     let bus = LifecycleBus::new(LifecycleConfig::default());
//!     let named = parse_named_args(["a=2", "b=3"]);
//!     let sum = program.run(&bus, "add", named, Default::default()).await?;
//!
//!     assert_eq!(sum, 5);
//!     assert!(bus.is_shut_down());
//!     Ok(())
//! }
//! ```
mod command;
mod dispatch;
mod error;
mod lifecycle;
mod program;

// ---- Public re-exports ----

pub use command::{
    CALLBACK_PARAM, CallableMetadata, CallbackFn, Command, Completion, Context, Deferred,
    DeferredFn, Handler, NamedArgs, Normalized, Options, Outcome, Positional, Signature, SyncFn,
    inspect, map_named_args, normalize, parse_named_args,
};
pub use dispatch::{DispatchQueue, QueueBuilder, QueueConfig, WorkerFn};
pub use error::{BoxError, CommandError};
pub use lifecycle::{
    HandlerFn, LifecycleBus, LifecycleConfig, Metric, PROGRAM_FINAL_STATS, PROGRAM_STATS,
    SHUTDOWN, Stats, StatsSnapshot, SubscriptionId, TimerHandle, TimerKind, TimerRegistry,
    wait_for_shutdown_signal,
};
pub use program::{CommandInfo, Program, ProgramInfo};
