//! External encoder invocation.
//!
//! The [`Encoder`] trait is the seam to the transcoder binary. The shipped
//! [`FfmpegEncoder`] spawns `ffmpeg`, streams its stderr line by line to the
//! caller and enforces the optional per-job deadline.

use crate::config::EncodeSettings;
use crate::error::EncodeError;
use regex::Regex;
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How a job produces its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    /// Full re-encode to the target codec.
    Transcode,
    /// Container copy of a source that is already in the target codec.
    Remux,
}

impl Strategy {
    /// Remux when the source video is already HEVC, transcode otherwise.
    pub fn for_source(already_hevc: bool) -> Self {
        if already_hevc {
            Strategy::Remux
        } else {
            Strategy::Transcode
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Transcode => f.write_str("transcode"),
            Strategy::Remux => f.write_str("remux"),
        }
    }
}

/// Everything the encoder needs for one job.
#[derive(Debug, Clone)]
pub struct EncodeRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub strategy: Strategy,
    pub settings: &'a EncodeSettings,
    pub overwrite: bool,
    pub timeout: Option<Duration>,
}

/// Runs one transcode or remux to completion.
///
/// `on_line` receives every diagnostic line in order. `Ok(())` means the
/// encoder exited successfully.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    fn encode(
        &self,
        request: &EncodeRequest<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), EncodeError>;
}

/// Build the ffmpeg argument list for a request.
pub fn encode_args(request: &EncodeRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), request.source.into()];
    match request.strategy {
        Strategy::Transcode => {
            let s = request.settings;
            let crf = s.crf.to_string();
            args.extend(
                [
                    "-c:v",
                    s.video_codec.as_str(),
                    "-preset",
                    s.preset.as_str(),
                    "-crf",
                    crf.as_str(),
                    "-c:a",
                    s.audio_codec.as_str(),
                    "-b:a",
                    s.audio_bitrate.as_str(),
                ]
                .into_iter()
                .map(OsString::from),
            );
        }
        Strategy::Remux => {
            args.push("-c".into());
            args.push("copy".into());
        }
    }
    if request.overwrite {
        args.push("-y".into());
    }
    args.push(request.destination.into());
    args
}

/// Extract the elapsed seconds from an ffmpeg `time=HH:MM:SS.ff` marker.
pub fn parse_time_marker(line: &str) -> Option<f64> {
    static TIME_MARKER: OnceLock<Regex> = OnceLock::new();
    let re = TIME_MARKER.get_or_init(|| {
        Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("time marker pattern is valid")
    });

    let caps = re.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Feed every line of `reader` to `f`.
///
/// ffmpeg rewrites its status line with carriage returns, so both `\r` and
/// `\n` end a line. Empty lines are dropped.
pub fn for_each_line<R: BufRead>(mut reader: R, mut f: impl FnMut(&str)) -> io::Result<()> {
    let mut line: Vec<u8> = Vec::new();
    let mut emit = |line: &mut Vec<u8>| {
        if !line.is_empty() {
            f(String::from_utf8_lossy(line).as_ref());
            line.clear();
        }
    };

    loop {
        let used = {
            let available = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                break;
            }
            for &b in available {
                if b == b'\n' || b == b'\r' {
                    emit(&mut line);
                } else {
                    line.push(b);
                }
            }
            available.len()
        };
        reader.consume(used);
    }
    emit(&mut line);
    Ok(())
}

/// The `ffmpeg` binary as an [`Encoder`].
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }

    pub fn path(&self) -> &Path {
        &self.ffmpeg_path
    }
}

impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn encode(
        &self,
        request: &EncodeRequest<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), EncodeError> {
        let args = encode_args(request);
        debug!(
            encoder = %self.ffmpeg_path.display(),
            args = ?args,
            "spawning encoder"
        );

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(EncodeError::Spawn)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("encoder stderr was not captured"))?;

        // Lines are read on a helper thread so the deadline can be checked
        // while the encoder is silent.
        let (tx, rx) = mpsc::channel::<String>();
        let reader = thread::spawn(move || {
            for_each_line(BufReader::new(stderr), |line| {
                let _ = tx.send(line.to_string());
            })
        });

        let deadline = request.timeout.map(|t| (t, Instant::now() + t));
        loop {
            let next = match deadline {
                Some((_, at)) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(line) => on_line(line.as_str()),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    // The reader ends once every holder of the pipe is gone.
                    let limit = deadline.map(|(t, _)| t).unwrap_or_default();
                    return Err(EncodeError::TimedOut(limit));
                }
            }
        }

        let status = child.wait()?;
        match reader.join() {
            Ok(result) => result?,
            Err(_) => return Err(io::Error::other("encoder output reader panicked").into()),
        }

        if status.success() {
            Ok(())
        } else {
            Err(EncodeError::Exited {
                code: status.code(),
            })
        }
    }
}
