use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to start command `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("command `{command}` timed out after {}", fmt_timeout(.timeout))]
    Timeout { command: String, timeout: Duration },
    #[error("command `{command}` failed with exit code {}: {stderr}", fmt_code(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("could not find `{marker}` in command output:\n{raw}")]
    MissingMarker { marker: String, raw: String },
    #[error("required tool `{tool}` was not found in PATH")]
    MissingTool { tool: String },
    #[error("command `{command}` returned invalid JSON: {source}")]
    InvalidJson {
        command: String,
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CollectError {
    /// Stable class name used when the error is rendered into an output file.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Spawn { .. } => "CommandSpawnError",
            CollectError::Timeout { .. } => "CommandTimeout",
            CollectError::Failed { .. } => "CommandFailed",
            CollectError::MissingMarker { .. } => "MalformedOutput",
            CollectError::MissingTool { .. } => "MissingTool",
            CollectError::InvalidJson { .. } => "InvalidJson",
            CollectError::Write { .. } => "WriteError",
            CollectError::Serialize(_) => "SerializeError",
        }
    }

    pub fn to_payload_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

fn fmt_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

fn fmt_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (killed by signal)".to_string(),
    }
}
