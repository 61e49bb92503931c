//! Response units emitted by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result code reported when the subprocess could not be started.
pub const START_FAILURE_CODE: i32 = -1;

/// Result code reported when the subprocess ran but its exit status could not
/// be collected.
pub const STATUS_UNAVAILABLE_CODE: i32 = -2;

/// Origin of an output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of subprocess output tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub data: String,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            data: data.into(),
        }
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub code: i32,
}

impl ExecutionResult {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn start_failure() -> Self {
        Self::new(START_FAILURE_CODE)
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// A single message in an invocation's response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseUnit {
    Output(OutputChunk),
    Result(ExecutionResult),
}

impl ResponseUnit {
    /// Returns true for the unit that ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseUnit::Result(_))
    }

    /// Stdout text, or `""` for any other unit.
    pub fn stdout(&self) -> &str {
        match self {
            ResponseUnit::Output(chunk) if chunk.stream == StreamKind::Stdout => &chunk.data,
            _ => "",
        }
    }

    /// Stderr text, or `""` for any other unit.
    pub fn stderr(&self) -> &str {
        match self {
            ResponseUnit::Output(chunk) if chunk.stream == StreamKind::Stderr => &chunk.data,
            _ => "",
        }
    }

    /// Result code, or 0 for intermediate chunks.
    pub fn result_code(&self) -> i32 {
        match self {
            ResponseUnit::Result(result) => result.code,
            ResponseUnit::Output(_) => 0,
        }
    }
}

impl From<OutputChunk> for ResponseUnit {
    fn from(chunk: OutputChunk) -> Self {
        ResponseUnit::Output(chunk)
    }
}

impl From<ExecutionResult> for ResponseUnit {
    fn from(result: ExecutionResult) -> Self {
        ResponseUnit::Result(result)
    }
}

/// Flat boundary representation of a [`ResponseUnit`].
///
/// Exactly one field is set: `stdout` or `stderr` for output chunks,
/// `result_code` for the terminal unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i32>,
}

impl From<ResponseUnit> for WireResponse {
    fn from(unit: ResponseUnit) -> Self {
        match unit {
            ResponseUnit::Output(OutputChunk {
                stream: StreamKind::Stdout,
                data,
            }) => WireResponse {
                stdout: Some(data),
                ..Default::default()
            },
            ResponseUnit::Output(OutputChunk {
                stream: StreamKind::Stderr,
                data,
            }) => WireResponse {
                stderr: Some(data),
                ..Default::default()
            },
            ResponseUnit::Result(result) => WireResponse {
                result_code: Some(result.code),
                ..Default::default()
            },
        }
    }
}
