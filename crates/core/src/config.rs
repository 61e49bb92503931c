//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Tunables shared by every invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Name used in the fixed Initialize/Shutdown messages.
    pub tool_name: String,

    /// How request environment overrides combine with the inherited one.
    pub env_policy: EnvPolicy,

    /// How subprocess output is split into chunks.
    pub chunking: Chunking,

    /// Capacity of the channel between the stream readers and the sink writer.
    pub channel_capacity: usize,

    /// Deadline applied to every run. `None` means no deadline.
    pub run_timeout_secs: Option<u64>,
}

/// Environment merge policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvPolicy {
    /// Inherited environment plus overrides; overrides win on conflict.
    #[default]
    Overlay,

    /// Only the overrides are visible to the child.
    Replace,
}

/// Output chunking mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chunking {
    /// One chunk per line, newline included.
    #[default]
    Line,

    /// One chunk per read from the pipe.
    Raw,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_name: "Terraform".to_string(),
            env_policy: EnvPolicy::default(),
            chunking: Chunking::default(),
            channel_capacity: 64,
            run_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| EngineError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| EngineError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(EngineError::Config {
                message: "channel_capacity must be at least 1".to_string(),
            });
        }
        if self.run_timeout_secs == Some(0) {
            return Err(EngineError::Config {
                message: "run_timeout_secs must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_env_policy(mut self, policy: EnvPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    pub fn with_chunking(mut self, chunking: Chunking) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Text sent by Initialize.
    pub fn init_message(&self) -> String {
        format!("{} Initialization completed\n", self.tool_name)
    }

    /// Text sent by Shutdown.
    pub fn shutdown_message(&self) -> String {
        format!("{} Shutdown completed\n", self.tool_name)
    }
}
