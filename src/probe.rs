//! Media metadata probing.
//!
//! The [`Prober`] trait is the seam to the external metadata tool. The
//! shipped implementation shells out to `mediainfo --Output=JSON <file>`.

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Kind of a probed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    General,
    Video,
    Audio,
    Other,
}

/// One track as reported by the prober.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackInfo {
    pub kind: Option<TrackKind>,
    pub duration: Option<Duration>,
    pub format: Option<String>,
    pub codec_id: Option<String>,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub channels: Option<u32>,
    pub sampling_rate: Option<u32>,
}

impl TrackInfo {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_codec_id(mut self, codec_id: impl Into<String>) -> Self {
        self.codec_id = Some(codec_id.into());
        self
    }

    fn is(&self, kind: TrackKind) -> bool {
        self.kind == Some(kind)
    }

    /// Whether any of format, codec id or codec names the HEVC family.
    pub fn is_hevc(&self) -> bool {
        let format_hit = self.format.as_deref().is_some_and(|f| {
            let f = f.to_ascii_lowercase();
            f == "hevc" || f == "h.265" || f == "h265"
        });
        let codec_id_hit = self.codec_id.as_deref().is_some_and(|id| {
            let id = id.to_ascii_lowercase();
            id.starts_with("hvc1") || id.starts_with("hev1") || id.contains("mpegh/iso/hevc")
        });
        let codec_hit = self.codec.as_deref().is_some_and(|c| {
            let c = c.to_ascii_lowercase();
            c.contains("hevc") || c.contains("h265") || c.contains("x265")
        });
        format_hit || codec_id_hit || codec_hit
    }
}

/// Facts about one media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaFacts {
    pub tracks: Vec<TrackInfo>,
}

impl MediaFacts {
    pub fn new(tracks: Vec<TrackInfo>) -> Self {
        Self { tracks }
    }

    pub fn video(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.is(TrackKind::Video))
    }

    pub fn audio(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.is(TrackKind::Audio))
    }

    /// Duration of the first video track that has one, else the container's.
    pub fn duration(&self) -> Option<Duration> {
        self.tracks
            .iter()
            .filter(|t| t.is(TrackKind::Video))
            .find_map(|t| t.duration)
            .or_else(|| {
                self.tracks
                    .iter()
                    .filter(|t| t.is(TrackKind::General))
                    .find_map(|t| t.duration)
            })
            .filter(|d| !d.is_zero())
    }

    /// True when the first video track is already HEVC.
    pub fn is_hevc(&self) -> bool {
        self.video().is_some_and(TrackInfo::is_hevc)
    }

    pub fn is_media(&self) -> bool {
        self.video().is_some() || self.audio().is_some()
    }
}

/// Source of media metadata.
pub trait Prober: Send + Sync {
    fn name(&self) -> &str;

    fn probe(&self, path: &Path) -> Result<MediaFacts, ProbeError>;
}

/// A prober backed by the `mediainfo` CLI.
#[derive(Debug, Clone)]
pub struct MediaInfoProber {
    mediainfo_path: PathBuf,
}

impl MediaInfoProber {
    pub fn new(mediainfo_path: PathBuf) -> Self {
        Self { mediainfo_path }
    }
}

impl Prober for MediaInfoProber {
    fn name(&self) -> &str {
        "mediainfo"
    }

    fn probe(&self, path: &Path) -> Result<MediaFacts, ProbeError> {
        let output = Command::new(&self.mediainfo_path)
            .arg("--Output=JSON")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProbeError::Spawn {
                tool: self.mediainfo_path.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Exited {
                tool: self.mediainfo_path.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_mediainfo_json(&output.stdout)
    }
}

// mediainfo --Output=JSON structures. Numbers arrive as strings.

#[derive(Debug, Deserialize)]
struct MiOutput {
    media: Option<MiMedia>,
}

#[derive(Debug, Deserialize)]
struct MiMedia {
    #[serde(default)]
    track: Vec<MiTrack>,
}

#[derive(Debug, Deserialize)]
struct MiTrack {
    #[serde(rename = "@type")]
    track_type: String,
    #[serde(rename = "Duration")]
    duration: Option<String>,
    #[serde(rename = "Format")]
    format: Option<String>,
    #[serde(rename = "CodecID")]
    codec_id: Option<String>,
    #[serde(rename = "Format_Commercial_IfAny")]
    commercial: Option<String>,
    #[serde(rename = "Width")]
    width: Option<String>,
    #[serde(rename = "Height")]
    height: Option<String>,
    #[serde(rename = "FrameRate")]
    frame_rate: Option<String>,
    #[serde(rename = "Channels")]
    channels: Option<String>,
    #[serde(rename = "SamplingRate")]
    sampling_rate: Option<String>,
}

/// Map `mediainfo --Output=JSON` output to [`MediaFacts`].
pub fn parse_mediainfo_json(bytes: &[u8]) -> Result<MediaFacts, ProbeError> {
    let mi: MiOutput = serde_json::from_slice(bytes)?;
    let tracks = mi
        .media
        .map(|m| m.track)
        .unwrap_or_default()
        .into_iter()
        .map(|t| {
            let kind = match t.track_type.as_str() {
                "General" => TrackKind::General,
                "Video" => TrackKind::Video,
                "Audio" => TrackKind::Audio,
                _ => TrackKind::Other,
            };
            TrackInfo {
                kind: Some(kind),
                duration: t
                    .duration
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
                format: t.format,
                codec_id: t.codec_id,
                codec: t.commercial,
                width: t.width.and_then(|s| parse_numeric(&s)),
                height: t.height.and_then(|s| parse_numeric(&s)),
                frame_rate: t.frame_rate.and_then(|s| s.trim().parse().ok()),
                channels: t.channels.and_then(|s| parse_numeric(&s)),
                sampling_rate: t.sampling_rate.and_then(|s| parse_numeric(&s)),
            }
        })
        .collect();
    Ok(MediaFacts::new(tracks))
}

/// Parse the leading integer of values like `"1920"` or `"48000 Hz"`.
fn parse_numeric<T: std::str::FromStr>(s: &str) -> Option<T> {
    let digits: String = s
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
