//! Requests accepted by the engine's lifecycle operations.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A request to run a single command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Executable name (resolved on `PATH`) or a path to one.
    pub command: String,

    /// Arguments passed to the executable, in order.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the child. Defaults to the engine's own.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Environment overrides applied according to the configured policy.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    /// Opaque metadata forwarded by the orchestrator.
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl ExecutionRequest {
    /// Creates a request for the given command with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Appends a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Adds a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Command line rendered for logs.
    pub fn display_command(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Plugin-level initialization request.
///
/// The fields mirror what the orchestrator sends; the engine only logs them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// Plugin-level shutdown request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    #[serde(default)]
    pub meta: HashMap<String, String>,
}
