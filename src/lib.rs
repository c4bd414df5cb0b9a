//! # h265batch - parallel batch conversion to H.265
//!
//! `h265batch` converts every video file of a directory to H.265 by driving
//! `ffmpeg`, running several conversions at once and showing their progress
//! in a live terminal table.
//!
//! ## Features
//!
//! - Non-recursive discovery with a case-insensitive extension allow-list
//! - Bounded worker pool sized from the logical core count
//! - Remux instead of re-encode when the source is already HEVC
//! - Per-job progress parsed from the encoder's `time=` markers
//! - Failure isolation: one broken file never stops the batch
//! - Resumable: existing outputs are skipped unless overwriting is enabled
//!
//! ## Example
//!
//! ```no_run
//! use h265batch::{AppConfig, BatchOrchestrator, ProgressMode};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = BatchOrchestrator::new(AppConfig::default())
//!     .with_progress_mode(ProgressMode::Plain)
//!     .run(Path::new("input"))?;
//! println!("{}", report.summary());
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! ## Custom backends
//!
//! The encoder and prober sit behind the [`Encoder`] and [`Prober`] traits,
//! so a batch can run against anything that produces `ffmpeg`-style
//! diagnostic lines:
//!
//! ```no_run
//! use h265batch::{AppConfig, Backends, BatchOrchestrator, FfmpegEncoder, MediaInfoProber};
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//!
//! let backends = Backends::new(
//!     Arc::new(FfmpegEncoder::new(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))),
//!     Arc::new(MediaInfoProber::new(PathBuf::from("mediainfo"))),
//! );
//! let report = BatchOrchestrator::new(AppConfig::default())
//!     .with_backends(backends)
//!     .with_workers(2)
//!     .run(Path::new("input"))
//!     .unwrap();
//! assert!(!report.has_failures());
//! ```

pub mod batch;
pub mod config;
pub mod encoder;
pub mod error;
pub mod job;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod render;
pub mod tools;

pub use batch::{plan_jobs, BatchOrchestrator, BatchReport};
pub use config::{load_config, AppConfig, EncodeSettings, ToolPaths};
pub use encoder::{parse_time_marker, EncodeRequest, Encoder, FfmpegEncoder, Strategy};
pub use error::{BatchError, EncodeError, JobError, ProbeError};
pub use job::{Job, JobReport, JobResult, JobRunner};
pub use pool::{available_workers, worker_count, WorkerPool};
pub use probe::{MediaFacts, MediaInfoProber, Prober, TrackInfo, TrackKind};
pub use progress::{JobKey, JobStatus, ProgressSink};
pub use render::{render_table, LogWriter, ProgressMode, ProgressRenderer};
pub use tools::{check_tools, resolve_tool, Backends, ToolInfo};
