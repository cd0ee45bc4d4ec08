//! # Program registry and top-level run.
//!
//! A [`Program`] is the named set of commands a process exposes. The process driver looks a
//! command up by name, feeds it named arguments and reports the outcome.
//!
//! ## Flow
//! ```text
//! Program::run(&bus, name, named, options)
//!   ├─► call(name) ──► COMMAND_NOT_FOUND ──┐
//!   │      └─► Normalized::call ─► await   │
//!   ├─► Err ─► error!(to_object()) ◄───────┘   (never panics, never exits)
//!   └─► bus.shutdown()                         (always)
//! ```
//!
//! ## Rules
//! - Names are unique within a program; re-registering a name fails.
//! - Commands are inspected and normalized at registration, so bad declarations fail early.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::command::{Command, Deferred, NamedArgs, Normalized, Options, Outcome};
use crate::error::CommandError;
use crate::lifecycle::LifecycleBus;

/// Serializable description of a program.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgramInfo {
    /// Program name.
    pub name: String,
    /// Program version.
    pub version: String,
    /// One-line description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Registered commands, ordered by name.
    pub commands: Vec<CommandInfo>,
}

/// Serializable description of one command.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandInfo {
    /// Command name.
    pub name: String,
    /// Declared parameters, `callback` excluded.
    pub params: Vec<String>,
    /// Calling convention (`sync`, `callback` or `deferred`).
    pub convention: &'static str,
}

/// Named collection of commands.
#[derive(Debug)]
pub struct Program {
    name: String,
    version: String,
    description: Option<String>,
    commands: BTreeMap<String, Normalized>,
}

impl Program {
    /// Creates an empty program.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            commands: BTreeMap::new(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a command under its own name.
    ///
    /// Fails with `ARGUMENT_ERROR` if the declaration is invalid or the name is taken.
    pub fn register(&mut self, command: Command) -> Result<(), CommandError> {
        if self.commands.contains_key(command.name()) {
            return Err(CommandError::argument(format!(
                "a command named {:?} is already registered",
                command.name()
            )));
        }
        let normalized = command.into_normalized()?;
        let name = normalized.command().name().to_string();
        tracing::debug!(program = %self.name, command = %name, "command registered");
        self.commands.insert(name, normalized);
        Ok(())
    }

    /// Chained form of [`register`](Self::register).
    pub fn with_command(mut self, command: Command) -> Result<Self, CommandError> {
        self.register(command)?;
        Ok(self)
    }

    /// Looks a command up by name.
    pub fn get(&self, name: &str) -> Option<&Normalized> {
        self.commands.get(name)
    }

    /// Invokes a command by name.
    ///
    /// An unknown name yields a `Deferred` that fails with `COMMAND_NOT_FOUND`.
    pub fn call(&self, name: &str, named: NamedArgs, options: Options) -> Deferred {
        match self.commands.get(name) {
            Some(cmd) => cmd.call(named, options),
            None => Deferred::ready(Err(CommandError::CommandNotFound {
                command: name.to_string(),
            })),
        }
    }

    /// Runs one command to completion as the process's top-level action.
    ///
    /// Failures are logged with their `{code, data, message}` projection and returned; the
    /// bus is shut down in every case.
    pub async fn run(
        &self,
        bus: &LifecycleBus,
        name: &str,
        named: NamedArgs,
        options: Options,
    ) -> Outcome {
        let started = Instant::now();
        let outcome = self.call(name, named, options).await;

        let stats = bus.stats();
        stats.record(&format!("command.{name}.run"), started.elapsed());
        match &outcome {
            Ok(_) => stats.increment(&format!("command.{name}.ok")),
            Err(err) => {
                stats.increment(&format!("command.{name}.failed"));
                tracing::error!(
                    program = %self.name,
                    command = name,
                    error = %err.to_object(),
                    "command failed"
                );
            }
        }

        bus.shutdown();
        outcome
    }

    /// Describes the program and its commands.
    pub fn info(&self) -> ProgramInfo {
        ProgramInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            commands: self
                .commands
                .values()
                .map(|cmd| {
                    let params = cmd
                        .metadata()
                        .parameter_names()
                        .iter()
                        .map(|p| p.to_string())
                        .collect();
                    CommandInfo {
                        name: cmd.command().name().to_string(),
                        params,
                        convention: cmd.command().handler().as_label(),
                    }
                })
                .collect(),
        }
    }

    /// Program name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program version.
    pub fn version(&self) -> &str {
        &self.version
    }
}
