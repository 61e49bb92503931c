//! JSON-lines transport over stdin and stdout.
//!
//! Every input line is one request:
//!
//! ```json
//! {"id": 1, "op": "run", "command": "terraform", "args": ["plan"], "env_vars": {"TF_LOG": "info"}}
//! ```
//!
//! Every output line is one response tagged with the request id. Responses of
//! different requests may interleave. After the last response of a request a
//! `{"id": 1, "done": true}` line is written, carrying `error` if the
//! invocation itself failed.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use miette::{Result, miette};
use serde::{Deserialize, Serialize};
use tfengine_core::{
    ExecutionRequest, InitRequest, ResponseSink, ResponseUnit, ShutdownRequest, TransportFault,
    WireResponse,
};
use tfengine_engine::Engine;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const SERVE_TARGET: &str = "tfengine_cli::serve";

/// Responses buffered between invocations and the stdout writer.
const RESPONSE_BUFFER: usize = 256;

/// A request line.
#[derive(Debug, Deserialize)]
struct RequestLine {
    id: u64,

    #[serde(flatten)]
    operation: Operation,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Operation {
    Initialize(InitRequest),
    Run(ExecutionRequest),
    Shutdown(ShutdownRequest),
}

/// A response line.
#[derive(Debug, Serialize)]
struct ResponseLine {
    id: Option<u64>,

    #[serde(flatten)]
    response: WireResponse,

    done: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ResponseLine {
    fn unit(id: u64, unit: ResponseUnit) -> Self {
        Self {
            id: Some(id),
            response: unit.into(),
            done: false,
            error: None,
        }
    }

    fn done(id: u64, error: Option<String>) -> Self {
        Self {
            id: Some(id),
            response: WireResponse::default(),
            done: true,
            error,
        }
    }

    fn rejected(id: Option<u64>, error: String) -> Self {
        Self {
            id,
            response: WireResponse::default(),
            done: true,
            error: Some(error),
        }
    }
}

/// Sink that tags each unit with its request id and queues it for the writer.
struct LineSink {
    id: u64,
    tx: mpsc::Sender<ResponseLine>,
}

impl ResponseSink for LineSink {
    async fn send(&mut self, unit: ResponseUnit) -> std::result::Result<(), TransportFault> {
        self.tx
            .send(ResponseLine::unit(self.id, unit))
            .await
            .map_err(|_| TransportFault::new("response writer closed"))
    }
}

/// Serves requests from stdin until EOF or Ctrl-C.
pub async fn execute(engine: Engine) -> Result<ExitCode> {
    info!(target: SERVE_TARGET, "serving requests on stdin");

    let served = serve(Arc::new(engine), tokio::io::stdin(), tokio::io::stdout());
    tokio::select! {
        result = served => result.map_err(|e| miette!("Transport failed: {}", e))?,
        _ = tokio::signal::ctrl_c() => {
            // Dropping `served` aborts in-flight invocations and kills their children.
            info!(target: SERVE_TARGET, "interrupted, stopping");
        }
    }

    info!(target: SERVE_TARGET, "stopped serving");
    Ok(ExitCode::SUCCESS)
}

/// Reads requests from `input` and writes responses to `output`.
///
/// Requests run concurrently; a single writer owns `output`. Returns once
/// `input` is exhausted and every started invocation has finished, or as soon
/// as writing to `output` fails.
pub async fn serve<R, W>(engine: Arc<Engine>, input: R, output: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);

    let reader = async move {
        let mut lines = BufReader::new(input).lines();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => accept(&engine, &line, &tx, &mut tasks).await,
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                () = tx.closed() => {
                    warn!(target: SERVE_TARGET, "response writer gone, no longer accepting requests");
                    break;
                }
            }
        }

        drop(tx);
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        Ok::<(), io::Error>(())
    };

    let (read, write) = tokio::join!(reader, write_responses(output, rx));
    read?;
    write
}

/// Parses one request line and starts its invocation.
async fn accept(
    engine: &Arc<Engine>,
    line: &str,
    tx: &mpsc::Sender<ResponseLine>,
    tasks: &mut JoinSet<()>,
) {
    if line.trim().is_empty() {
        return;
    }

    let request: RequestLine = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            warn!(target: SERVE_TARGET, error = %err, "rejecting malformed request");
            let id = request_id(line);
            if tx
                .send(ResponseLine::rejected(id, format!("invalid request: {err}")))
                .await
                .is_err()
            {
                debug!(target: SERVE_TARGET, "response writer closed");
            }
            return;
        }
    };

    debug!(target: SERVE_TARGET, id = request.id, "accepted request");
    tasks.spawn(dispatch(engine.clone(), request, tx.clone()));
}

/// Best-effort id recovery from a line that failed to parse as a request.
fn request_id(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

async fn dispatch(engine: Arc<Engine>, request: RequestLine, tx: mpsc::Sender<ResponseLine>) {
    let id = request.id;
    let mut sink = LineSink { id, tx: tx.clone() };

    let result = match request.operation {
        Operation::Initialize(req) => engine.initialize(req, &mut sink).await,
        Operation::Run(req) => engine.run(req, &mut sink).await,
        Operation::Shutdown(req) => engine.shutdown(req, &mut sink).await,
    };

    let error = match result {
        Ok(()) => None,
        Err(err) => {
            warn!(target: SERVE_TARGET, id, error = %err, "invocation failed");
            Some(err.to_string())
        }
    };

    if tx.send(ResponseLine::done(id, error)).await.is_err() {
        debug!(target: SERVE_TARGET, id, "response writer closed before completion");
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        warn!(target: SERVE_TARGET, error = %err, "invocation task ended abnormally");
    }
}

async fn write_responses<W>(mut output: W, mut rx: mpsc::Receiver<ResponseLine>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let mut json = serde_json::to_vec(&line).map_err(io::Error::other)?;
        json.push(b'\n');
        output.write_all(&json).await?;
        output.flush().await?;
    }
    Ok(())
}
