//! Live status table.
//!
//! Formatting is a pure function of a sink snapshot ([`render_table`]).
//! [`ProgressRenderer`] shows those lines as an indicatif multi-bar block,
//! one bar per row, refreshed from a background thread. [`LogWriter`] keeps
//! log output from tearing that block.

use crate::progress::{JobKey, JobStatus, ProgressSink};
use clap::ValueEnum;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;

/// Width the job label column is padded to.
pub const LABEL_WIDTH: usize = 30;

/// How progress is shown while the batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "lower")]
pub enum ProgressMode {
    /// Live table when stdout is a terminal, plain otherwise.
    #[default]
    Auto,
    /// Always redraw the table in place.
    Live,
    /// Only print the final report.
    Plain,
}

impl ProgressMode {
    pub fn is_live(self, stdout_is_tty: bool) -> bool {
        match self {
            ProgressMode::Auto => stdout_is_tty,
            ProgressMode::Live => true,
            ProgressMode::Plain => false,
        }
    }
}

/// Format a snapshot as a title line followed by one row per job.
pub fn render_table(title: &str, snapshot: &[(JobKey, JobStatus)]) -> Vec<String> {
    let mut lines = Vec::with_capacity(snapshot.len() + 1);
    lines.push(title.to_string());
    for (key, status) in snapshot {
        let status = status.to_string().replace(['\r', '\n'], " ");
        lines.push(format!(
            "  {:<width$} {}",
            key.label(),
            status,
            width = LABEL_WIDTH
        ));
    }
    lines
}

fn row_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Background thread mirroring the sink into a [`MultiProgress`].
///
/// Row `i` of the block always shows line `i` of [`render_table`], so the
/// block stays sorted even when keys show up late.
pub struct ProgressRenderer {
    multi: MultiProgress,
    rows: Arc<Mutex<Vec<ProgressBar>>>,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressRenderer {
    pub fn spawn(
        sink: Arc<ProgressSink>,
        title: impl Into<String>,
        interval: Duration,
        target: ProgressDrawTarget,
    ) -> Self {
        let title = title.into();
        let multi = MultiProgress::with_draw_target(target);
        let rows = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_multi = multi.clone();
        let thread_rows = Arc::clone(&rows);
        let handle = thread::spawn(move || loop {
            let lines = render_table(&title, &sink.snapshot());
            refresh(&thread_multi, &thread_rows, &lines);
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            multi,
            rows,
            stop_tx,
            handle,
        }
    }

    /// The display the rows are drawn on.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }

    /// Lines currently shown, top to bottom.
    pub fn lines(&self) -> Vec<String> {
        self.rows.lock().iter().map(|bar| bar.message()).collect()
    }

    /// Stop refreshing and clear the block so the final report can be
    /// printed in its place. Returns the last lines shown.
    pub fn stop(self) -> Vec<String> {
        let Self {
            multi,
            rows,
            stop_tx,
            handle,
        } = self;
        let _ = stop_tx.send(());
        if handle.join().is_err() {
            debug!("progress render thread panicked");
        }
        let rows = rows.lock();
        let lines = rows.iter().map(|bar| bar.message()).collect();
        for bar in rows.iter() {
            bar.finish_and_clear();
        }
        if let Err(e) = multi.clear() {
            debug!(error = %e, "failed to clear progress block");
        }
        lines
    }
}

fn refresh(multi: &MultiProgress, rows: &Mutex<Vec<ProgressBar>>, lines: &[String]) {
    let mut rows = rows.lock();
    while rows.len() < lines.len() {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.set_style(row_style());
        rows.push(bar);
    }
    for (bar, line) in rows.iter().zip(lines) {
        if bar.message() != *line {
            bar.set_message(line.clone());
        }
    }
}

/// Log output that stays clear of a live progress block.
///
/// While a [`MultiProgress`] is attached, every write suspends it: the
/// block is cleared, the log line written, and the block redrawn below.
#[derive(Clone)]
pub struct LogWriter {
    display: Arc<Mutex<Option<MultiProgress>>>,
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LogWriter {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            display: Arc::new(Mutex::new(None)),
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    pub fn attach(&self, multi: &MultiProgress) {
        *self.display.lock() = Some(multi.clone());
    }

    pub fn detach(&self) {
        *self.display.lock() = None;
    }

    /// Run `f` with the attached block hidden, if there is one.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        let display = self.display.lock().clone();
        match display {
            Some(multi) => multi.suspend(f),
            None => f(),
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.suspend(|| {
            let mut out = self.out.lock();
            out.write_all(buf)?;
            out.flush()
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::{InMemoryTerm, TermLike};

    /// Writes into the same emulated screen the block is drawn on.
    struct ScreenWriter(InMemoryTerm);

    impl Write for ScreenWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for line in String::from_utf8_lossy(buf).lines() {
                TermLike::write_line(&self.0, line)?;
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            TermLike::flush(&self.0)
        }
    }

    #[test]
    fn table_rows_are_padded_and_ordered() {
        let snapshot = vec![
            (JobKey::new("a.mp4", 1), JobStatus::running(42.0)),
            (JobKey::new("b.mkv", 0), JobStatus::Done),
        ];
        let lines = render_table("Converting:", &snapshot);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Converting:");
        assert_eq!(lines[1], format!("  {:<30} 42.0%", "a.mp4"));
        assert_eq!(lines[2], format!("  {:<30} done", "b.mkv"));
    }

    #[test]
    fn multiline_errors_stay_on_one_row() {
        let snapshot = vec![(JobKey::new("x.avi", 0), JobStatus::error("first\nsecond"))];
        let lines = render_table("t", &snapshot);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("error: first second"));
    }

    #[test]
    fn renderer_follows_the_sink_until_stopped() {
        let sink = Arc::new(ProgressSink::new());
        let key = JobKey::new("clip.mp4", 0);
        sink.set(&key, JobStatus::Queued);

        let renderer = ProgressRenderer::spawn(
            Arc::clone(&sink),
            "Converting:",
            Duration::from_millis(5),
            ProgressDrawTarget::hidden(),
        );
        thread::sleep(Duration::from_millis(40));
        assert_eq!(renderer.lines(), render_table("Converting:", &sink.snapshot()));

        sink.set(&key, JobStatus::running(50.0));
        thread::sleep(Duration::from_millis(40));
        let last = renderer.stop();

        assert_eq!(last.len(), 2);
        assert!(last[1].ends_with("50.0%"));
    }

    #[test]
    fn late_keys_extend_the_block_in_order() {
        let sink = Arc::new(ProgressSink::new());
        sink.set(&JobKey::new("b.mkv", 1), JobStatus::Queued);

        let renderer = ProgressRenderer::spawn(
            Arc::clone(&sink),
            "t",
            Duration::from_millis(5),
            ProgressDrawTarget::hidden(),
        );
        thread::sleep(Duration::from_millis(30));
        sink.set(&JobKey::new("a.mp4", 0), JobStatus::Done);
        thread::sleep(Duration::from_millis(30));
        let last = renderer.stop();

        assert_eq!(last.len(), 3);
        assert!(last[1].contains("a.mp4"));
        assert!(last[2].contains("b.mkv"));
    }

    #[test]
    fn log_lines_print_above_a_live_block() {
        let term = InMemoryTerm::new(20, 80);
        let sink = Arc::new(ProgressSink::new());
        let a = JobKey::new("a.mp4", 0);
        let b = JobKey::new("b.mkv", 1);
        sink.set(&a, JobStatus::running(10.0));
        sink.set(&b, JobStatus::Queued);

        let renderer = ProgressRenderer::spawn(
            Arc::clone(&sink),
            "Converting:",
            Duration::from_millis(20),
            ProgressDrawTarget::term_like(Box::new(term.clone())),
        );
        let log = LogWriter::new(ScreenWriter(term.clone()));
        log.attach(renderer.multi());
        thread::sleep(Duration::from_millis(100));

        log.clone()
            .write_all(b"WARN a.mp4: conversion failed\n")
            .unwrap();
        sink.set(&a, JobStatus::error("bad input"));
        thread::sleep(Duration::from_millis(150));

        let screen = term.contents();
        log.detach();
        renderer.stop();

        assert_eq!(screen.matches("WARN a.mp4").count(), 1, "{screen}");
        assert_eq!(screen.matches("Converting:").count(), 1, "{screen}");
        assert_eq!(screen.matches("b.mkv").count(), 1, "{screen}");
        let log_row = screen.lines().position(|l| l.starts_with("WARN")).unwrap();
        let title_row = screen.lines().position(|l| l.trim_end() == "Converting:").unwrap();
        assert!(log_row < title_row, "{screen}");
    }

    #[test]
    fn detached_writer_passes_through() {
        let term = InMemoryTerm::new(5, 40);
        let log = LogWriter::new(ScreenWriter(term.clone()));
        log.clone().write_all(b"plain line\n").unwrap();
        assert_eq!(term.contents().trim(), "plain line");
    }

    #[test]
    fn progress_mode_resolution() {
        assert!(ProgressMode::Auto.is_live(true));
        assert!(!ProgressMode::Auto.is_live(false));
        assert!(ProgressMode::Live.is_live(false));
        assert!(!ProgressMode::Plain.is_live(true));
    }
}
