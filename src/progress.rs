//! Shared per-job status table.
//!
//! Every worker writes the status of the job it owns; the renderer and the
//! final report read consistent, key-ordered snapshots.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of one job in the status table.
///
/// The label is what the table shows (the source file name). The ordinal is
/// the enumeration index and keeps keys unique when two sources share a
/// label. Keys order by label first, so sorted output reads alphabetically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobKey {
    label: String,
    ordinal: usize,
}

impl JobKey {
    pub fn new(label: impl Into<String>, ordinal: usize) -> Self {
        Self {
            label: label.into(),
            ordinal,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Current state of one job as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobStatus {
    /// Submitted to the pool, not started yet.
    Queued,
    /// Running. `percent` is `None` when the source duration is unknown.
    Running { percent: Option<f64> },
    Done,
    Skipped,
    Error { message: String },
}

impl JobStatus {
    pub fn running(percent: f64) -> Self {
        Self::Running {
            percent: Some(percent),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this status is a final one (`done`, `skipped`, `error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Error { .. })
    }

    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Running { percent } => *percent,
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Running { percent: Some(p) } => write!(f, "{:.1}%", p),
            Self::Running { percent: None } => f.write_str("running"),
            Self::Done => f.write_str("done"),
            Self::Skipped => f.write_str("skipped"),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Concurrent job-key → status store.
///
/// Last write wins per key. Entries are never removed, so a key seen once
/// stays visible for the rest of the batch.
#[derive(Debug, Default)]
pub struct ProgressSink {
    entries: RwLock<BTreeMap<JobKey, JobStatus>>,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &JobKey, status: JobStatus) {
        self.entries.write().insert(key.clone(), status);
    }

    pub fn get(&self, key: &JobKey) -> Option<JobStatus> {
        self.entries.read().get(key).cloned()
    }

    /// Point-in-time copy of every entry, ordered by key.
    pub fn snapshot(&self) -> Vec<(JobKey, JobStatus)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// True when every entry holds a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.entries.read().values().all(JobStatus::is_terminal)
    }
}
