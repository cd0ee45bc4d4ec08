//! # Commands and their calling conventions.
//!
//! A [`Command`] bundles a name, a declared [`Signature`] and a [`Handler`]. The handler
//! is one of three conventions:
//!
//! - [`Handler::Sync`]: returns its value (or error) directly;
//! - [`Handler::Callback`]: receives a trailing [`Completion`] and settles it later;
//! - [`Handler::Deferred`]: returns a future of its value.
//!
//! Every handler also receives the invocation [`Context`] so it can see the raw named
//! arguments and options it was called with.
//!
//! ## Example
//! ```rust
//! use cmdvisor::{Command, CommandError};
//! use serde_json::{Value, json};
//!
//! let sum = Command::sync("sum", ["a", "b"], |_ctx, args| {
//!     let total: i64 = args.iter().flatten().filter_map(Value::as_i64).sum();
//!     Ok::<_, CommandError>(json!(total))
//! });
//! assert_eq!(sum.name(), "sum");
//! assert_eq!(sum.signature().params(), ["a", "b"]);
//! ```

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::command::args::{NamedArgs, Options, Positional};
use crate::command::completion::Completion;
use crate::command::signature::Signature;
use crate::error::CommandError;

/// Value-or-error produced by one invocation.
pub type Outcome = Result<Value, CommandError>;

/// Handler that returns its result directly.
pub type SyncFn = dyn Fn(&Context, Positional) -> Outcome + Send + Sync;

/// Handler that settles a trailing completion.
pub type CallbackFn = dyn Fn(&Context, Positional, Completion) + Send + Sync;

/// Handler that returns a future of its result.
pub type DeferredFn = dyn Fn(&Context, Positional) -> BoxFuture<'static, Outcome> + Send + Sync;

/// How a command was invoked; lives for the duration of one call.
#[derive(Clone, Debug, Default)]
pub struct Context {
    args: NamedArgs,
    options: Options,
}

impl Context {
    /// Creates a context for one invocation.
    pub fn new(args: NamedArgs, options: Options) -> Self {
        Self { args, options }
    }

    /// Raw named arguments, including names the handler did not declare.
    pub fn args(&self) -> &NamedArgs {
        &self.args
    }

    /// Invocation options.
    pub fn options(&self) -> &Options {
        &self.options
    }
}

/// Calling convention of a command body.
#[derive(Clone)]
pub enum Handler {
    /// Returns its value synchronously.
    Sync(Arc<SyncFn>),
    /// Settles a trailing [`Completion`].
    Callback(Arc<CallbackFn>),
    /// Returns a future.
    Deferred(Arc<DeferredFn>),
}

impl Handler {
    /// Returns `true` for the callback convention.
    pub fn takes_completion(&self) -> bool {
        matches!(self, Handler::Callback(_))
    }

    /// Short label used in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Handler::Sync(_) => "sync",
            Handler::Callback(_) => "callback",
            Handler::Deferred(_) => "deferred",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.as_label()).finish()
    }
}

/// Named, declared unit of command logic.
#[derive(Clone, Debug)]
pub struct Command {
    name: Cow<'static, str>,
    signature: Signature,
    handler: Handler,
}

impl Command {
    /// Creates a command from an explicit signature and handler.
    pub fn new(name: impl Into<Cow<'static, str>>, signature: Signature, handler: Handler) -> Self {
        Self {
            name: name.into(),
            signature,
            handler,
        }
    }

    /// Creates a command whose handler returns its value directly.
    pub fn sync<P, S, F, R>(name: impl Into<Cow<'static, str>>, params: P, f: F) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
        F: Fn(&Context, Positional) -> Result<R, CommandError> + Send + Sync + 'static,
        R: Into<Value>,
    {
        let handler: Arc<SyncFn> = Arc::new(move |ctx: &Context, args: Positional| -> Outcome {
            f(ctx, args).map(Into::into)
        });
        Self::new(name, Signature::new(params), Handler::Sync(handler))
    }

    /// Creates a callback-style command.
    ///
    /// The declared parameters must end with `callback`.
    pub fn callback<P, S, F>(name: impl Into<Cow<'static, str>>, params: P, f: F) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
        F: Fn(&Context, Positional, Completion) + Send + Sync + 'static,
    {
        Self::new(name, Signature::new(params), Handler::Callback(Arc::new(f)))
    }

    /// Creates a command whose handler returns a future.
    pub fn deferred<P, S, F, Fut, R>(name: impl Into<Cow<'static, str>>, params: P, f: F) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
        F: Fn(&Context, Positional) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CommandError>> + Send + 'static,
        R: Into<Value>,
    {
        let handler: Arc<DeferredFn> =
            Arc::new(move |ctx: &Context, args: Positional| -> BoxFuture<'static, Outcome> {
                f(ctx, args).map(|res| res.map(Into::into)).boxed()
            });
        Self::new(name, Signature::new(params), Handler::Deferred(handler))
    }

    /// Command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter list.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Handler convention and body.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}
