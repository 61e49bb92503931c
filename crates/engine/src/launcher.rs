//! Cross-platform subprocess launching.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tfengine_core::{EnvPolicy, ExecutionRequest, STATUS_UNAVAILABLE_CODE, StartError};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

const LAUNCHER_TARGET: &str = "tfengine_engine::launcher";

/// Starts child processes for execution requests.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    env_policy: EnvPolicy,
}

/// A freshly started child together with its output pipes.
pub struct SpawnedProcess {
    pub process: RunningProcess,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Handle to a live child process.
///
/// The child is killed if the handle is dropped before it has been reaped.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    program: PathBuf,
}

impl Launcher {
    pub fn new(env_policy: EnvPolicy) -> Self {
        Self { env_policy }
    }

    /// Spawns the command described by `request` with stdout and stderr piped.
    pub fn start(&self, request: &ExecutionRequest) -> Result<SpawnedProcess, StartError> {
        let working_dir = match &request.working_dir {
            Some(dir) if !dir.is_dir() => {
                return Err(StartError::WorkingDir { path: dir.clone() });
            }
            Some(dir) => Some(dir.as_path()),
            None => None,
        };

        let program = self.resolve_program(request, working_dir)?;

        let mut command = Command::new(&program);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        if self.env_policy == EnvPolicy::Replace {
            command.env_clear();
        }
        command.envs(&request.env_vars);

        let mut child = command.spawn().map_err(|source| StartError::Spawn {
            command: request.command.clone(),
            source,
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(StartError::Spawn {
                command: request.command.clone(),
                source: io::Error::other("output pipes were not captured"),
            });
        };

        debug!(
            target: LAUNCHER_TARGET,
            program = %program.display(),
            pid = child.id(),
            "spawned child process"
        );

        Ok(SpawnedProcess {
            process: RunningProcess { child, program },
            stdout,
            stderr,
        })
    }

    /// Resolves bare command names against the PATH the child will see.
    ///
    /// Anything containing a path separator is passed through untouched and
    /// left for the OS to resolve.
    fn resolve_program(
        &self,
        request: &ExecutionRequest,
        working_dir: Option<&Path>,
    ) -> Result<PathBuf, StartError> {
        let command = Path::new(&request.command);
        if command.components().count() > 1 {
            return Ok(command.to_path_buf());
        }

        let search_path = self.search_path(request);
        let cwd = match working_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        which::which_in(&request.command, Some(&search_path), cwd).map_err(|_| {
            StartError::NotFound {
                command: request.command.clone(),
                search_path: search_path.to_string_lossy().into_owned(),
            }
        })
    }

    fn search_path(&self, request: &ExecutionRequest) -> OsString {
        match request.env_vars.get("PATH") {
            Some(path) => OsString::from(path),
            None => std::env::var_os("PATH").unwrap_or_default(),
        }
    }
}

impl RunningProcess {
    /// OS process id, if the child has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Sends a kill signal without waiting for the child to exit.
    pub fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    /// Waits for the child to exit and returns its result code.
    pub async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        debug!(
            target: LAUNCHER_TARGET,
            program = %self.program.display(),
            ?status,
            "child process exited"
        );
        Ok(exit_code(status))
    }
}

/// Maps an exit status to a result code.
///
/// Signal deaths follow the shell convention of `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    STATUS_UNAVAILABLE_CODE
}
