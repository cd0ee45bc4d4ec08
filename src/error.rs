//! Error type shared by the command kernel.
//!
//! Every failure that crosses a [`Deferred`](crate::Deferred) or a
//! [`Completion`](crate::Completion) is a [`CommandError`]. Consumers branch on
//! [`CommandError::code`], a short stable tag:
//!
//! | code                   | raised by                                               |
//! |------------------------|---------------------------------------------------------|
//! | `ARGUMENT_ERROR`       | bad declarations, zero capacity, closed dispatch queue  |
//! | `COMMAND_NOT_FOUND`    | [`Program::call`](crate::Program::call)                 |
//! | `TIMEOUT`              | dispatch queue deadline                                 |
//! | `COMPLETION_ABANDONED` | a completion dropped without being called               |
//! | `PANICKED`             | a command body that panicked                            |
//! | anything else          | application errors built with [`CommandError::failed`]  |

use std::any::Any;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

/// Boxed cause attached to application errors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// # Errors produced by commands and by the kernel around them.
///
/// Kernel-internal violations (`Argument`) fail fast at declaration, wrap or dispatch
/// time. Everything a command body reports is forwarded untouched as `Failed`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CommandError {
    /// Invalid argument handed to the kernel (declaration, capacity, closed queue).
    #[error("[ARGUMENT_ERROR] {message}")]
    Argument {
        /// What was wrong.
        message: String,
        /// Structured context, if any.
        data: Option<Value>,
    },

    /// A program has no command under the requested name.
    #[error("[COMMAND_NOT_FOUND] the command {command:?} could not be found")]
    CommandNotFound {
        /// The requested command name.
        command: String,
    },

    /// A queued task did not complete within its deadline.
    #[error("[TIMEOUT] no completion within {timeout:?}")]
    Timeout {
        /// The configured deadline.
        timeout: Duration,
    },

    /// Every handle to a completion was dropped before it was called.
    #[error("[COMPLETION_ABANDONED] completion dropped before settling")]
    Abandoned,

    /// The command body panicked.
    #[error("[PANICKED] {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },

    /// Application error raised by a command body.
    #[error("[{code}] {message}")]
    Failed {
        /// Application-defined tag.
        code: Cow<'static, str>,
        /// Human-readable description.
        message: String,
        /// Structured context, if any.
        data: Option<Value>,
        /// Nested cause.
        #[source]
        source: Option<BoxError>,
    },
}

impl CommandError {
    /// Builds an `ARGUMENT_ERROR`.
    pub fn argument(message: impl Into<String>) -> Self {
        CommandError::Argument {
            message: message.into(),
            data: None,
        }
    }

    /// Builds an application error with the given code.
    ///
    /// # Example
    /// ```
    /// use cmdvisor::CommandError;
    ///
    /// let err = CommandError::failed("NOT_READY", "backend warming up");
    /// assert_eq!(err.code(), "NOT_READY");
    /// assert_eq!(err.to_string(), "[NOT_READY] backend warming up");
    /// ```
    pub fn failed(code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        CommandError::Failed {
            code: code.into(),
            message: message.into(),
            data: None,
            source: None,
        }
    }

    /// Converts a panic payload caught by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        CommandError::Panicked { message }
    }

    /// Attaches structured context. No-op for variants that carry no data.
    pub fn with_data(mut self, value: Value) -> Self {
        match &mut self {
            CommandError::Argument { data, .. } | CommandError::Failed { data, .. } => {
                *data = Some(value);
            }
            _ => {}
        }
        self
    }

    /// Attaches a nested cause. Only application errors keep it.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        if let CommandError::Failed { source, .. } = &mut self {
            *source = Some(cause.into());
        }
        self
    }

    /// Returns the stable code consumers branch on.
    pub fn code(&self) -> &str {
        match self {
            CommandError::Argument { .. } => "ARGUMENT_ERROR",
            CommandError::CommandNotFound { .. } => "COMMAND_NOT_FOUND",
            CommandError::Timeout { .. } => "TIMEOUT",
            CommandError::Abandoned => "COMPLETION_ABANDONED",
            CommandError::Panicked { .. } => "PANICKED",
            CommandError::Failed { code, .. } => code.as_ref(),
        }
    }

    /// Returns the structured context, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            CommandError::Argument { data, .. } | CommandError::Failed { data, .. } => {
                data.as_ref()
            }
            _ => None,
        }
    }

    /// Returns a human-readable message without the code prefix.
    pub fn as_message(&self) -> String {
        match self {
            CommandError::Argument { message, .. } => message.clone(),
            CommandError::CommandNotFound { command } => {
                format!("the command {command:?} could not be found")
            }
            CommandError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            CommandError::Abandoned => "completion dropped before settling".to_string(),
            CommandError::Panicked { message } => format!("panicked: {message}"),
            CommandError::Failed {
                message, source, ..
            } => match source {
                Some(cause) => format!("{message}: {cause}"),
                None => message.clone(),
            },
        }
    }

    /// Projects the error into `{code, data, message}` for the error channel.
    pub fn to_object(&self) -> Value {
        json!({
            "code": self.code(),
            "data": self.data().cloned().unwrap_or(Value::Null),
            "message": self.as_message(),
        })
    }

    /// Returns `true` for kernel-raised argument errors.
    pub fn is_argument(&self) -> bool {
        matches!(self, CommandError::Argument { .. })
    }
}
