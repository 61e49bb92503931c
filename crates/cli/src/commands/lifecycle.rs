//! Initialize and Shutdown command implementations.

use std::process::ExitCode;

use miette::{Result, miette};
use tfengine_core::{InitRequest, ShutdownRequest};
use tfengine_engine::Engine;

use super::run::StdioSink;

/// Prints the initialization message.
pub async fn initialize(engine: &Engine) -> Result<ExitCode> {
    let mut sink = StdioSink::new(tokio::io::stdout(), tokio::io::stderr());
    engine
        .initialize(InitRequest::default(), &mut sink)
        .await
        .map_err(|e| miette!("Initialize failed: {}", e))?;
    Ok(ExitCode::SUCCESS)
}

/// Prints the shutdown message.
pub async fn shutdown(engine: &Engine) -> Result<ExitCode> {
    let mut sink = StdioSink::new(tokio::io::stdout(), tokio::io::stderr());
    engine
        .shutdown(ShutdownRequest::default(), &mut sink)
        .await
        .map_err(|e| miette!("Shutdown failed: {}", e))?;
    Ok(ExitCode::SUCCESS)
}
