//! Lifecycle handlers: Initialize, Run and Shutdown.

use std::future::{Future, pending};
use std::time::Duration;

use tfengine_core::{
    EngineConfig, ExecutionRequest, ExecutionResult, InitRequest, OutputChunk, ResponseSink,
    Result, STATUS_UNAVAILABLE_CODE, ShutdownRequest,
};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::launcher::{Launcher, RunningProcess, SpawnedProcess};
use crate::multiplexer::Multiplexer;

const ENGINE_TARGET: &str = "tfengine_engine::engine";

/// How long output is still drained after the child has been killed.
///
/// Grandchildren that inherited the pipes can keep them open after the
/// child itself is gone.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executes requests on behalf of the orchestrator.
///
/// The engine holds only configuration. Every invocation owns its own child
/// process and pipes, so concurrent calls never interact.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    launcher: Launcher,
}

/// Why a run is being stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    TimedOut(Duration),
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let launcher = Launcher::new(config.env_policy);
        Self { config, launcher }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Plugin-level initialization. Emits the fixed completion message.
    pub async fn initialize<S: ResponseSink>(
        &self,
        request: InitRequest,
        sink: &mut S,
    ) -> Result<()> {
        info!(
            target: ENGINE_TARGET,
            working_dir = ?request.working_dir,
            meta = ?request.meta,
            "initialize"
        );
        sink.send(OutputChunk::stdout(self.config.init_message()).into())
            .await?;
        Ok(())
    }

    /// Plugin-level shutdown. Emits the fixed completion message.
    pub async fn shutdown<S: ResponseSink>(
        &self,
        request: ShutdownRequest,
        sink: &mut S,
    ) -> Result<()> {
        info!(
            target: ENGINE_TARGET,
            working_dir = ?request.working_dir,
            meta = ?request.meta,
            "shutdown"
        );
        sink.send(OutputChunk::stdout(self.config.shutdown_message()).into())
            .await?;
        Ok(())
    }

    /// Runs a command, streaming its output and finishing with its result
    /// code.
    ///
    /// Only a failing sink makes this return an error. A command that cannot
    /// be started or exits non-zero is reported through `sink`.
    pub async fn run<S: ResponseSink>(&self, request: ExecutionRequest, sink: &mut S) -> Result<()> {
        self.run_until(request, sink, pending()).await
    }

    /// Like [`Engine::run`], but kills the child once `cancel` completes.
    ///
    /// Output produced before the kill is still relayed and the run still
    /// ends with a terminal result.
    pub async fn run_until<S, C>(
        &self,
        request: ExecutionRequest,
        sink: &mut S,
        cancel: C,
    ) -> Result<()>
    where
        S: ResponseSink,
        C: Future<Output = ()> + Send,
    {
        info!(
            target: ENGINE_TARGET,
            command = %request.display_command(),
            working_dir = ?request.working_dir,
            meta = ?request.meta,
            "run"
        );

        let SpawnedProcess {
            mut process,
            stdout,
            stderr,
        } = match self.launcher.start(&request) {
            Ok(spawned) => spawned,
            Err(err) => {
                warn!(target: ENGINE_TARGET, command = %request.command, error = %err, "failed to start command");
                sink.send(OutputChunk::stderr(format!("Error starting command: {err}\n")).into())
                    .await?;
                sink.send(ExecutionResult::start_failure().into()).await?;
                return Ok(());
            }
        };

        let mut mux = Multiplexer::spawn(
            stdout,
            stderr,
            self.config.chunking,
            self.config.channel_capacity,
        );

        let deadline = self.config.run_timeout();
        let stop_signal = async {
            let timeout = async {
                match deadline {
                    Some(limit) => {
                        sleep(limit).await;
                        limit
                    }
                    None => pending().await,
                }
            };
            tokio::select! {
                () = cancel => StopReason::Cancelled,
                limit = timeout => StopReason::TimedOut(limit),
            }
        };
        let grace = sleep(KILL_DRAIN_GRACE);
        tokio::pin!(stop_signal, grace);

        let mut stopping = false;
        let mut abandoned = false;
        loop {
            tokio::select! {
                chunk = mux.next() => {
                    let Some(chunk) = chunk else { break };
                    if let Err(fault) = sink.send(chunk.into()).await {
                        warn!(target: ENGINE_TARGET, error = %fault, "response delivery failed, killing child");
                        drop(mux);
                        reap(&mut process).await;
                        return Err(fault.into());
                    }
                }
                reason = &mut stop_signal, if !stopping => {
                    stopping = true;
                    self.stop_child(&mut process, reason, sink).await?;
                    grace.as_mut().reset(Instant::now() + KILL_DRAIN_GRACE);
                }
                () = &mut grace, if stopping => {
                    warn!(target: ENGINE_TARGET, "output still open after kill, abandoning readers");
                    abandoned = true;
                    break;
                }
            }
        }

        if abandoned {
            mux.abort().await;
        } else {
            mux.join().await;
        }

        let code = match process.wait().await {
            Ok(code) => code,
            Err(err) => {
                warn!(target: ENGINE_TARGET, error = %err, "failed to collect exit status");
                sink.send(OutputChunk::stderr(format!("Error waiting for command: {err}\n")).into())
                    .await?;
                STATUS_UNAVAILABLE_CODE
            }
        };

        debug!(target: ENGINE_TARGET, command = %request.command, code, "run finished");
        sink.send(ExecutionResult::new(code).into()).await?;
        Ok(())
    }

    async fn stop_child<S: ResponseSink>(
        &self,
        process: &mut RunningProcess,
        reason: StopReason,
        sink: &mut S,
    ) -> Result<()> {
        match reason {
            StopReason::Cancelled => {
                info!(target: ENGINE_TARGET, pid = process.id(), "run cancelled, killing child");
            }
            StopReason::TimedOut(limit) => {
                warn!(target: ENGINE_TARGET, pid = process.id(), ?limit, "run timed out, killing child");
                if let Err(fault) = sink
                    .send(
                        OutputChunk::stderr(format!(
                            "Command timed out after {}s\n",
                            limit.as_secs()
                        ))
                        .into(),
                    )
                    .await
                {
                    reap(process).await;
                    return Err(fault.into());
                }
            }
        }

        if let Err(err) = process.start_kill() {
            debug!(target: ENGINE_TARGET, error = %err, "kill failed, child already exited");
        }
        Ok(())
    }
}

/// Kills and reaps a child that is being abandoned.
async fn reap(process: &mut RunningProcess) {
    if let Err(err) = process.start_kill() {
        debug!(target: ENGINE_TARGET, error = %err, "kill failed, child already exited");
    }
    if let Err(err) = process.wait().await {
        warn!(target: ENGINE_TARGET, error = %err, "failed to reap child");
    }
}
