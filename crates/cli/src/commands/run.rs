//! One-shot run command implementation.

use std::path::PathBuf;
use std::process::ExitCode;

use miette::{Result, miette};
use tfengine_core::{
    ExecutionRequest, ResponseSink, ResponseUnit, START_FAILURE_CODE, STATUS_UNAVAILABLE_CODE,
    StreamKind, TransportFault,
};
use tfengine_engine::Engine;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::output;

/// Exit status used when the command could not be started, as shells do.
const NOT_STARTED_EXIT: u8 = 127;

/// Runs a command, copying its output to our own stdout/stderr.
pub async fn execute(
    engine: &Engine,
    command: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    quiet: bool,
) -> Result<ExitCode> {
    let mut parts = command.into_iter();
    let program = parts.next().ok_or_else(|| miette!("No command given"))?;

    let mut request = ExecutionRequest::new(program.clone()).args(parts);
    if let Some(dir) = working_dir {
        request = request.with_working_dir(dir);
    }
    for (key, value) in env {
        request = request.with_env(key, value);
    }

    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => output::warning("Interrupted, stopping command"),
            Err(_) => std::future::pending().await,
        }
    };

    let mut sink = StdioSink::new(tokio::io::stdout(), tokio::io::stderr());
    engine
        .run_until(request, &mut sink, interrupt)
        .await
        .map_err(|e| miette!("Run failed: {}", e))?;

    let code = sink.result_code().unwrap_or(STATUS_UNAVAILABLE_CODE);
    if !quiet {
        output::command_finished(&program, code);
    }

    Ok(ExitCode::from(exit_status(code)))
}

/// Parses a `KEY=VALUE` environment override.
pub fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("missing variable name in '{raw}'")),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Maps a result code onto a process exit status.
pub fn exit_status(code: i32) -> u8 {
    match code {
        START_FAILURE_CODE => NOT_STARTED_EXIT,
        0..=255 => code as u8,
        _ => 1,
    }
}

/// Sink that copies chunks to a pair of writers and remembers the result code.
pub struct StdioSink<O, E> {
    stdout: O,
    stderr: E,
    result_code: Option<i32>,
}

impl<O, E> StdioSink<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    pub fn new(stdout: O, stderr: E) -> Self {
        Self {
            stdout,
            stderr,
            result_code: None,
        }
    }

    pub fn result_code(&self) -> Option<i32> {
        self.result_code
    }

    #[cfg(test)]
    fn into_writers(self) -> (O, E) {
        (self.stdout, self.stderr)
    }
}

impl<O, E> ResponseSink for StdioSink<O, E>
where
    O: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, unit: ResponseUnit) -> std::result::Result<(), TransportFault> {
        match unit {
            ResponseUnit::Output(chunk) => match chunk.stream {
                StreamKind::Stdout => write_chunk(&mut self.stdout, &chunk.data).await,
                StreamKind::Stderr => write_chunk(&mut self.stderr, &chunk.data).await,
            },
            ResponseUnit::Result(result) => {
                self.result_code = Some(result.code);
                Ok(())
            }
        }
    }
}

async fn write_chunk<W>(writer: &mut W, data: &str) -> std::result::Result<(), TransportFault>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(data.as_bytes())
        .await
        .map_err(|e| TransportFault::new(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportFault::new(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfengine_core::{ExecutionResult, OutputChunk};

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("TF_LOG=debug"),
            Ok(("TF_LOG".to_string(), "debug".to_string()))
        );
        assert_eq!(
            parse_env_pair("EMPTY="),
            Ok(("EMPTY".to_string(), String::new()))
        );
        assert_eq!(
            parse_env_pair("A=b=c"),
            Ok(("A".to_string(), "b=c".to_string()))
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=value").is_err());
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(137), 137);
        assert_eq!(exit_status(START_FAILURE_CODE), 127);
        assert_eq!(exit_status(STATUS_UNAVAILABLE_CODE), 1);
        assert_eq!(exit_status(300), 1);
    }

    #[tokio::test]
    async fn test_stdio_sink_splits_streams() {
        let mut sink = StdioSink::new(Vec::new(), Vec::new());
        sink.send(OutputChunk::stdout("out\n").into()).await.unwrap();
        sink.send(OutputChunk::stderr("err\n").into()).await.unwrap();
        sink.send(ExecutionResult::new(2).into()).await.unwrap();

        assert_eq!(sink.result_code(), Some(2));
        let (stdout, stderr) = sink.into_writers();
        assert_eq!(stdout, b"out\n");
        assert_eq!(stderr, b"err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_into_stdio_sink() {
        let engine = Engine::default();
        let mut sink = StdioSink::new(Vec::new(), Vec::new());
        let request = ExecutionRequest::new("sh").args(["-c", "echo hi; echo no >&2; exit 5"]);

        engine.run(request, &mut sink).await.unwrap();

        assert_eq!(sink.result_code(), Some(5));
        let (stdout, stderr) = sink.into_writers();
        assert_eq!(stdout, b"hi\n");
        assert_eq!(stderr, b"no\n");
    }
}
