//! Error types for h265batch.
//!
//! Batch-level errors are fatal and surface to the caller. Job-level errors
//! are folded into a [`crate::JobResult`] by the runner and never abort the
//! batch.

use std::path::PathBuf;
use std::time::Duration;

/// Fatal errors raised before or around the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The input directory does not exist.
    #[error("input directory does not exist: {}", .0.display())]
    InputMissing(PathBuf),

    /// The input path exists but is not a directory.
    #[error("input path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A required external tool could not be located.
    #[error("required tool not found: {tool}")]
    ToolUnavailable { tool: String },

    /// The output directory could not be created.
    #[error("creating output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker thread pool could not be built.
    #[error("building worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// An I/O error while scanning the input directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    pub fn tool_unavailable(tool: impl Into<String>) -> Self {
        Self::ToolUnavailable { tool: tool.into() }
    }
}

/// Per-job failures. These end up as `JobResult::Failed` with the message
/// as reason.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("source file disappeared: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("{reason}")]
    EncodeFailed { reason: String },
}

/// Failures of the external prober. The runner degrades these to an unknown
/// duration instead of failing the job.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("running {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Exited {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse prober output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures of the external encoder subprocess.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to start encoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("encoder exited with {}", describe_code(.code))]
    Exited { code: Option<i32> },

    #[error("encoder timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("reading encoder output: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
