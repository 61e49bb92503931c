//! Tracing subscriber setup.
//!
//! Logs always go to stderr: in `serve` mode stdout carries the response
//! stream, and in one-shot mode it carries the child's output.

use std::io::{self, IsTerminal};

use clap::ValueEnum;
use miette::{Result, miette};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Filter used when neither `--log-level` nor `RUST_LOG` is set.
const DEFAULT_FILTER: &str = "warn";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber.
///
/// `filter` wins over `RUST_LOG`, which wins over [`DEFAULT_FILTER`].
pub fn init(filter: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = build_filter(filter)?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| miette!("Failed to install log subscriber: {}", e))
}

fn build_filter(filter: Option<&str>) -> Result<EnvFilter> {
    match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| miette!("Invalid log filter '{}': {}", directives, e)),
        None => Ok(env_or_default(
            std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(),
        )),
    }
}

/// Filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`] when it is unset
/// or unparseable.
fn env_or_default(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
