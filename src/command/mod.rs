//! Commands: declaration, argument mapping and the uniform call path.
//!
//! ## Contents
//! - [`args`]: [`NamedArgs`], [`Positional`], [`map_named_args`], [`parse_named_args`]
//! - [`signature`]: [`Signature`], [`CallableMetadata`], [`inspect`]
//! - [`handler`]: [`Command`], [`Handler`], [`Context`]
//! - [`completion`]: [`Completion`], [`Deferred`]
//! - [`normalize`]: [`Normalized`], [`normalize()`]

pub mod args;
pub mod completion;
pub mod handler;
pub mod normalize;
pub mod signature;

pub use args::{NamedArgs, Options, Positional, map_named_args, parse_named_args};
pub use completion::{Completion, Deferred};
pub use handler::{CallbackFn, Command, Context, DeferredFn, Handler, Outcome, SyncFn};
pub use normalize::{Normalized, normalize};
pub use signature::{CALLBACK_PARAM, CallableMetadata, Signature, inspect};
