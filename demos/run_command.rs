//! # Demo: run_command
//!
//! Runs one command of a small program the way a CLI driver would.
//!
//! Demonstrates how to:
//! - Declare commands in all three calling conventions.
//! - Turn `name=value` words into named arguments with [`parse_named_args`].
//! - Run a command with [`Program::run`], which always shuts the [`LifecycleBus`] down.
//!
//! ## Run
//! ```bash
//! cargo run --example run_command -- greet name=ada
//! cargo run --example run_command -- sleep ms=250
//! cargo run --example run_command -- fetch url=https://example.org
//! RUST_LOG=debug cargo run --example run_command -- missing
//! ```

use std::time::Duration;

use cmdvisor::{
    Command, CommandError, LifecycleBus, LifecycleConfig, Options, Program, parse_named_args,
};
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn text(arg: &Option<Value>) -> Option<&str> {
    arg.as_ref().and_then(Value::as_str)
}

fn program() -> Result<Program, CommandError> {
    Program::new("demo", env!("CARGO_PKG_VERSION"))
        .with_description("command kernel walkthrough")
        // Plain return value.
        .with_command(Command::sync("greet", ["name"], |_ctx, args| {
            let name = text(&args[0]).unwrap_or("stranger");
            Ok::<_, CommandError>(format!("hello, {name}"))
        }))?
        // Future.
        .with_command(Command::deferred("sleep", ["ms"], |_ctx, args| {
            let ms = text(&args[0]).and_then(|s| s.parse::<u64>().ok());
            async move {
                let ms = ms.ok_or_else(|| CommandError::failed("BAD_INPUT", "ms must be a number"))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, CommandError>(json!({"slept_ms": ms}))
            }
        }))?
        // Trailing completion callback.
        .with_command(Command::callback("fetch", ["url", "callback"], |ctx, args, done| {
            let url = text(&args[0]).map(str::to_owned);
            let verbose = ctx.options().get("verbose").is_some();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                match url {
                    Some(url) => done.succeed(json!({"url": url, "status": 200, "verbose": verbose})),
                    None => done.fail(CommandError::failed("BAD_INPUT", "url is required")),
                };
            });
        }))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let program = program()?;
    let mut words = std::env::args().skip(1);
    let Some(name) = words.next() else {
        println!("{}", serde_json::to_string_pretty(&program.info())?);
        return Ok(());
    };
    let named = parse_named_args(words);

    let bus = LifecycleBus::new(LifecycleConfig::default());
    bus.shutdown_on_signal();

    match program.run(&bus, &name, named, Options::new()).await {
        Ok(value) => println!("{value}"),
        Err(err) => println!("{}", err.to_object()),
    }
    Ok(())
}
