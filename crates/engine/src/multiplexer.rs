//! Concurrent draining of a child's stdout and stderr.
//!
//! Each stream gets its own reader task. Readers push [`OutputChunk`]s into a
//! shared bounded channel, and a single consumer pulls them out with
//! [`Multiplexer::next`]. Chunks from one stream keep their write order;
//! nothing is promised about the interleaving of the two streams.

use tfengine_core::{Chunking, OutputChunk, StreamKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

const MULTIPLEXER_TARGET: &str = "tfengine_engine::multiplexer";

/// Upper bound on a single chunk. Raw reads never exceed it and longer lines
/// are split at it.
const CHUNK_LIMIT: usize = 8 * 1024;

/// Merges two output streams into one sequence of tagged chunks.
///
/// Dropping the multiplexer aborts any reader that is still running.
pub struct Multiplexer {
    rx: mpsc::Receiver<OutputChunk>,
    readers: JoinSet<()>,
}

impl Multiplexer {
    /// Starts one reader task per stream.
    pub fn spawn<O, E>(stdout: O, stderr: E, chunking: Chunking, capacity: usize) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut readers = JoinSet::new();
        readers.spawn(drain(stdout, StreamKind::Stdout, chunking, tx.clone()));
        readers.spawn(drain(stderr, StreamKind::Stderr, chunking, tx));

        Self { rx, readers }
    }

    /// Next available chunk, or `None` once both streams are exhausted.
    pub async fn next(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }

    /// Stops both readers without waiting for their streams to close.
    ///
    /// Used when a pipe may be held open by a process we no longer control.
    pub async fn abort(mut self) {
        self.rx.close();
        self.readers.shutdown().await;
    }

    /// Waits for both reader tasks to finish.
    pub async fn join(mut self) {
        self.rx.close();
        while let Some(result) = self.readers.join_next().await {
            if let Err(err) = result {
                if err.is_panic() {
                    warn!(target: MULTIPLEXER_TARGET, error = %err, "stream reader panicked");
                }
            }
        }
    }
}

async fn drain<R>(reader: R, stream: StreamKind, chunking: Chunking, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut pending = Vec::new();
    let mut chunks = 0usize;

    loop {
        buf.clear();
        buf.append(&mut pending);
        let read = match chunking {
            Chunking::Line => {
                let mut limited = (&mut reader).take(CHUNK_LIMIT as u64);
                limited.read_until(b'\n', &mut buf).await
            }
            Chunking::Raw => {
                let start = buf.len();
                buf.resize(start + CHUNK_LIMIT, 0);
                let read = reader.read(&mut buf[start..]).await;
                buf.truncate(start + *read.as_ref().unwrap_or(&0));
                read
            }
        };

        // A chunk cut at the size limit may end inside a character.
        pending = if *read.as_ref().unwrap_or(&0) > 0 {
            split_incomplete_utf8(&mut buf)
        } else {
            std::mem::take(&mut buf)
        };

        match read {
            Ok(0) => break,
            Ok(_) if buf.is_empty() => continue,
            Ok(_) => {
                let chunk = OutputChunk {
                    stream,
                    data: String::from_utf8_lossy(&buf).into_owned(),
                };
                chunks += 1;
                if tx.send(chunk).await.is_err() {
                    debug!(target: MULTIPLEXER_TARGET, %stream, "receiver gone, stopping reader");
                    return;
                }
            }
            Err(err) => {
                warn!(target: MULTIPLEXER_TARGET, %stream, error = %err, "failed to read child output");
                break;
            }
        }
    }

    // Bytes held back waiting for the rest of a character that never came.
    if !pending.is_empty() {
        let chunk = OutputChunk {
            stream,
            data: String::from_utf8_lossy(&pending).into_owned(),
        };
        chunks += 1;
        if tx.send(chunk).await.is_err() {
            return;
        }
    }

    debug!(target: MULTIPLEXER_TARGET, %stream, chunks, "stream closed");
}

/// Splits off a trailing partial UTF-8 sequence so that a chunk never cuts a
/// character in half.
fn split_incomplete_utf8(buf: &mut Vec<u8>) -> Vec<u8> {
    match std::str::from_utf8(buf) {
        Ok(_) => Vec::new(),
        Err(err) if err.error_len().is_none() => buf.split_off(err.valid_up_to()),
        Err(_) => Vec::new(),
    }
}
