//! External tool lookup.

use crate::config::ToolPaths;
use crate::encoder::{Encoder, FfmpegEncoder};
use crate::error::BatchError;
use crate::probe::{MediaInfoProber, Prober};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Availability of one external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's version output.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Resolve a configured tool to an executable path.
///
/// Bare names are searched on `PATH`; anything with a directory component
/// must point at an existing executable.
pub fn resolve_tool(tool: &Path) -> Result<PathBuf, BatchError> {
    which::which(tool)
        .map_err(|_| BatchError::tool_unavailable(tool.display().to_string()))
}

/// The encoder and prober a batch runs against.
#[derive(Clone)]
pub struct Backends {
    pub encoder: Arc<dyn Encoder>,
    pub prober: Arc<dyn Prober>,
}

impl Backends {
    pub fn new(encoder: Arc<dyn Encoder>, prober: Arc<dyn Prober>) -> Self {
        Self { encoder, prober }
    }

    /// Locate `ffmpeg` and `mediainfo` as configured.
    ///
    /// # Errors
    ///
    /// [`BatchError::ToolUnavailable`] naming the first tool that is missing.
    pub fn locate(paths: &ToolPaths) -> Result<Self, BatchError> {
        let encoder = resolve_tool(&paths.encoder)?;
        let prober = resolve_tool(&paths.prober)?;
        tracing::debug!(
            encoder = %encoder.display(),
            prober = %prober.display(),
            "resolved external tools"
        );
        Ok(Self::new(
            Arc::new(FfmpegEncoder::new(encoder)),
            Arc::new(MediaInfoProber::new(prober)),
        ))
    }
}

/// Check a tool by running it with `version_arg`.
pub fn check_tool(tool: &Path, version_arg: &str) -> ToolInfo {
    let name = tool.display().to_string();
    let Ok(path) = which::which(tool) else {
        return ToolInfo {
            name,
            available: false,
            version: None,
            path: None,
        };
    };

    let version = Command::new(&path)
        .arg(version_arg)
        .stdin(Stdio::null())
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| {
            String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        });

    ToolInfo {
        name,
        available: true,
        version,
        path: Some(path),
    }
}

/// Check the configured encoder and prober.
pub fn check_tools(paths: &ToolPaths) -> Vec<ToolInfo> {
    vec![
        check_tool(&paths.encoder, "-version"),
        check_tool(&paths.prober, "--Version"),
    ]
}
