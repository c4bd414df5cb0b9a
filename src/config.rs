use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "h265batch.toml";

fn default_extensions() -> Vec<String> {
    ["mp4", "avi", "mkv", "mov", "flv", "mpeg", "mpg", "wmv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Encoder settings used for the transcode strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub preset: String,
    pub crf: u32,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Output container extension, without the dot.
    pub container: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx265".to_string(),
            preset: "slow".to_string(),
            crf: 28,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            container: "mp4".to_string(),
        }
    }
}

/// Where to find the external tools. Bare names are looked up on `PATH`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub encoder: PathBuf,
    pub prober: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            encoder: PathBuf::from("ffmpeg"),
            prober: PathBuf::from("mediainfo"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub encode: EncodeSettings,
    pub tools: ToolPaths,
    /// Lower-case file extensions picked up from the input directory.
    pub extensions: Vec<String>,
    /// Logical cores left free for the rest of the system.
    pub reserved_cores: usize,
    /// Replace existing outputs instead of skipping them.
    pub overwrite: bool,
    /// Output directory. Defaults to an `output` directory next to the input.
    pub output_dir: Option<PathBuf>,
    pub render_interval_ms: u64,
    /// Per-job deadline for the encoder. `None` lets jobs run unbounded.
    pub job_timeout_secs: Option<u64>,
    /// Number of non-progress encoder lines kept for error reports.
    pub diagnostic_lines: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encode: EncodeSettings::default(),
            tools: ToolPaths::default(),
            extensions: default_extensions(),
            reserved_cores: 2,
            overwrite: false,
            output_dir: None,
            render_interval_ms: 500,
            job_timeout_secs: None,
            diagnostic_lines: 8,
        }
    }
}

impl AppConfig {
    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(50))
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    /// Case-insensitive check against the extension allow-list.
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, look in the user config
/// directory, then the current directory, then fall back to the built-in
/// defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::from_file(path);
    }

    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::config_dir() {
        d.push("h265batch");
        d.push(CONFIG_FILE);
        tried.push(d);
    }
    tried.push(PathBuf::from(CONFIG_FILE));

    for p in &tried {
        if p.exists() {
            tracing::debug!(path = %p.display(), "loading config");
            return AppConfig::from_file(p);
        }
    }

    Ok(AppConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            reserved_cores = 4
            [encode]
            crf = 22
            "#,
        )
        .unwrap();

        assert_eq!(cfg.reserved_cores, 4);
        assert_eq!(cfg.encode.crf, 22);
        assert_eq!(cfg.encode.video_codec, "libx265");
        assert_eq!(cfg.tools.encoder, PathBuf::from("ffmpeg"));
        assert!(!cfg.overwrite);
        assert_eq!(cfg.job_timeout(), None);
    }

    #[test]
    fn extension_match_ignores_case() {
        let cfg = AppConfig::default();
        assert!(cfg.accepts(Path::new("/in/A.MP4")));
        assert!(cfg.accepts(Path::new("/in/b.MkV")));
        assert!(!cfg.accepts(Path::new("/in/notes.txt")));
        assert!(!cfg.accepts(Path::new("/in/noext")));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(load_config(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "overwrite = true\njob_timeout_secs = 30\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert!(cfg.overwrite);
        assert_eq!(cfg.job_timeout(), Some(Duration::from_secs(30)));
    }
}
