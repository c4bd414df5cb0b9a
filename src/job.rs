//! One file conversion: strategy decision, encoder run, progress reporting.

use crate::config::EncodeSettings;
use crate::encoder::{parse_time_marker, EncodeRequest, Encoder, Strategy};
use crate::error::{EncodeError, JobError};
use crate::probe::{MediaFacts, Prober};
use crate::progress::{JobKey, JobStatus, ProgressSink};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum percentage advance between two progress writes for one job.
pub const PROGRESS_STEP: f64 = 0.5;

/// A single source-to-destination conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub key: JobKey,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobResult {
    Succeeded,
    /// Destination already existed and overwriting was disabled.
    Skipped,
    Failed { reason: String },
}

impl JobResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, JobResult::Failed { .. })
    }

    /// Terminal table status for this result. Error text is cut down to its
    /// last line so it fits one row.
    pub fn status(&self) -> JobStatus {
        match self {
            JobResult::Succeeded => JobStatus::Done,
            JobResult::Skipped => JobStatus::Skipped,
            JobResult::Failed { reason } => {
                let line = reason
                    .lines()
                    .rev()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or("failed");
                JobStatus::error(line)
            }
        }
    }
}

/// What happened to one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub key: JobKey,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub strategy: Option<Strategy>,
    pub result: JobResult,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn failed(job: &Job, reason: impl Into<String>) -> Self {
        Self {
            key: job.key.clone(),
            source: job.source.clone(),
            destination: job.destination.clone(),
            strategy: None,
            result: JobResult::Failed {
                reason: reason.into(),
            },
            elapsed: Duration::ZERO,
        }
    }
}

/// Converts encoder time markers into throttled, non-decreasing percentages.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_secs: Option<f64>,
    last: Option<f64>,
}

impl ProgressTracker {
    /// A tracker for a source of the given duration. With a known duration
    /// the tracker starts at 0%.
    pub fn new(total: Option<Duration>) -> Self {
        let total_secs = total.map(|d| d.as_secs_f64()).filter(|t| *t > 0.0);
        Self {
            total_secs,
            last: total_secs.map(|_| 0.0),
        }
    }

    pub fn current(&self) -> Option<f64> {
        self.last
    }

    /// Record an elapsed-time marker. Returns the percentage to publish, or
    /// `None` when the duration is unknown or progress moved less than
    /// [`PROGRESS_STEP`].
    pub fn observe(&mut self, elapsed_secs: f64) -> Option<f64> {
        let total = self.total_secs?;
        let percent = (elapsed_secs / total * 100.0).clamp(0.0, 100.0);
        match self.last {
            Some(last) if percent < last + PROGRESS_STEP => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}

/// The most recent non-progress encoder lines.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Retained lines joined with newlines, oldest first.
    pub fn joined(&self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines().collect::<Vec<_>>().join("\n"))
        }
    }
}

/// Runs jobs against an encoder and prober, publishing status to a sink.
///
/// The runner owns the sink entry of every job it runs and always leaves a
/// terminal status behind.
pub struct JobRunner<'a> {
    encoder: &'a dyn Encoder,
    prober: &'a dyn Prober,
    sink: &'a ProgressSink,
    settings: &'a EncodeSettings,
    overwrite: bool,
    timeout: Option<Duration>,
    diagnostic_lines: usize,
}

impl<'a> JobRunner<'a> {
    pub fn new(
        encoder: &'a dyn Encoder,
        prober: &'a dyn Prober,
        sink: &'a ProgressSink,
        settings: &'a EncodeSettings,
    ) -> Self {
        Self {
            encoder,
            prober,
            sink,
            settings,
            overwrite: false,
            timeout: None,
            diagnostic_lines: 8,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_diagnostic_lines(mut self, lines: usize) -> Self {
        self.diagnostic_lines = lines;
        self
    }

    pub fn run(&self, job: &Job) -> JobReport {
        let started = Instant::now();
        self.sink
            .set(&job.key, JobStatus::Running { percent: None });

        let (strategy, result) = self.execute(job);
        self.sink.set(&job.key, result.status());

        let elapsed = started.elapsed();
        match &result {
            JobResult::Succeeded => {
                info!(job = %job.key, elapsed_secs = elapsed.as_secs(), "converted")
            }
            JobResult::Skipped => info!(job = %job.key, "destination exists, skipped"),
            JobResult::Failed { reason } => warn!(job = %job.key, %reason, "conversion failed"),
        }

        JobReport {
            key: job.key.clone(),
            source: job.source.clone(),
            destination: job.destination.clone(),
            strategy,
            result,
            elapsed,
        }
    }

    fn execute(&self, job: &Job) -> (Option<Strategy>, JobResult) {
        if !job.source.is_file() {
            let err = JobError::SourceMissing(job.source.clone());
            return (None, failed(err));
        }
        if job.destination == job.source {
            let err = JobError::EncodeFailed {
                reason: "destination is the source file".to_string(),
            };
            return (None, failed(err));
        }
        if !self.overwrite && job.destination.exists() {
            return (None, JobResult::Skipped);
        }

        let facts = match self.prober.probe(&job.source) {
            Ok(facts) => Some(facts),
            Err(e) => {
                warn!(
                    job = %job.key,
                    prober = self.prober.name(),
                    error = %e,
                    "probe failed, progress percentage disabled"
                );
                None
            }
        };
        let duration = facts.as_ref().and_then(MediaFacts::duration);
        let strategy = Strategy::for_source(facts.as_ref().is_some_and(MediaFacts::is_hevc));
        debug!(
            job = %job.key,
            %strategy,
            duration_secs = ?duration.map(|d| d.as_secs_f64()),
            "starting encoder"
        );

        let mut tracker = ProgressTracker::new(duration);
        if let Some(start) = tracker.current() {
            self.sink.set(&job.key, JobStatus::running(start));
        }
        let mut tail = DiagnosticTail::new(self.diagnostic_lines);

        let request = EncodeRequest {
            source: &job.source,
            destination: &job.destination,
            strategy,
            settings: self.settings,
            overwrite: self.overwrite,
            timeout: self.timeout,
        };
        let outcome = self.encoder.encode(&request, &mut |line| match parse_time_marker(line) {
            Some(elapsed) => {
                if let Some(percent) = tracker.observe(elapsed) {
                    self.sink.set(&job.key, JobStatus::running(percent));
                }
            }
            None => tail.push(line),
        });

        let result = match outcome {
            Ok(()) => JobResult::Succeeded,
            Err(e) => failed(JobError::EncodeFailed {
                reason: failure_reason(&e, &tail),
            }),
        };
        (Some(strategy), result)
    }
}

fn failed(err: JobError) -> JobResult {
    JobResult::Failed {
        reason: err.to_string(),
    }
}

/// A nonzero exit carries no structured error, so the retained encoder
/// output is the reason. Other failures describe themselves.
fn failure_reason(err: &EncodeError, tail: &DiagnosticTail) -> String {
    match err {
        EncodeError::Exited { .. } => tail.joined().unwrap_or_else(|| err.to_string()),
        _ => err.to_string(),
    }
}
