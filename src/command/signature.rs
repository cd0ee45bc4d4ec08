//! # Declared parameter lists and the metadata derived from them.
//!
//! Parameter names are declared by the command author ([`Signature`]). [`inspect`] turns
//! a command's declaration into [`CallableMetadata`]:
//!
//! ```text
//! Signature ["path", "depth", "callback"]
//!     └─► CallableMetadata { parameter_names: ["path", "depth"], has_trailing_callback: true }
//! ```
//!
//! ## Rules
//! - Only the **last** name can mark the callback convention, and only if it is literally `callback`.
//! - The declaration has to agree with the handler: `Handler::Callback` needs the
//!   trailing `callback`, the other conventions must not have it.
//! - Names must be non-empty and unique.
//! - Pure and deterministic; metadata can be cached per command.

use std::borrow::Cow;
use std::collections::HashSet;

use serde_json::json;

use crate::command::handler::Command;
use crate::error::CommandError;

/// Name that marks a trailing completion parameter.
pub const CALLBACK_PARAM: &str = "callback";

/// Ordered parameter names as declared by the command author.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Cow<'static, str>>,
}

impl Signature {
    /// Creates a signature from names in declaration order.
    pub fn new<P, S>(params: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Declared names, including a trailing `callback` if present.
    pub fn params(&self) -> &[Cow<'static, str>] {
        &self.params
    }

    /// Returns `true` if the last declared name is `callback`.
    pub fn ends_with_callback(&self) -> bool {
        self.params.last().is_some_and(|p| p == CALLBACK_PARAM)
    }
}

/// Metadata derived once per command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallableMetadata {
    parameter_names: Vec<Cow<'static, str>>,
    has_trailing_callback: bool,
}

impl CallableMetadata {
    /// Parameter names in order, without the trailing `callback`.
    pub fn parameter_names(&self) -> &[Cow<'static, str>] {
        &self.parameter_names
    }

    /// Whether the command completes through a trailing callback.
    pub fn has_trailing_callback(&self) -> bool {
        self.has_trailing_callback
    }
}

impl From<&Signature> for CallableMetadata {
    fn from(sig: &Signature) -> Self {
        let has_trailing_callback = sig.ends_with_callback();
        let mut parameter_names = sig.params.clone();
        if has_trailing_callback {
            parameter_names.pop();
        }
        Self {
            parameter_names,
            has_trailing_callback,
        }
    }
}

/// Derives [`CallableMetadata`] from a command's declaration.
///
/// Fails with `ARGUMENT_ERROR` if the declaration cannot be invoked as declared.
///
/// # Example
/// ```
/// use cmdvisor::{Command, inspect};
///
/// let cmd = Command::callback("fetch", ["url", "callback"], |_ctx, _args, done| {
///     done.succeed("ok");
/// });
/// let meta = inspect(&cmd).unwrap();
/// assert_eq!(meta.parameter_names(), ["url"]);
/// assert!(meta.has_trailing_callback());
/// ```
pub fn inspect(command: &Command) -> Result<CallableMetadata, CommandError> {
    let sig = command.signature();

    let mut seen = HashSet::with_capacity(sig.params().len());
    for (index, name) in sig.params().iter().enumerate() {
        if name.is_empty() {
            return Err(CommandError::argument("parameter names must not be empty")
                .with_data(json!({"command": command.name(), "index": index})));
        }
        if !seen.insert(&**name) {
            return Err(CommandError::argument(format!("duplicate parameter name {name:?}"))
                .with_data(json!({"command": command.name(), "parameter": name})));
        }
    }

    let handler = command.handler();
    if handler.takes_completion() != sig.ends_with_callback() {
        let message = if handler.takes_completion() {
            "a callback handler must declare `callback` as its last parameter"
        } else {
            "only callback handlers may declare a trailing `callback` parameter"
        };
        return Err(CommandError::argument(message).with_data(json!({
            "command": command.name(),
            "handler": handler.as_label(),
            "params": sig.params(),
        })));
    }

    Ok(CallableMetadata::from(sig))
}
