//! Batch orchestration: discovery, planning, parallel execution, reporting.

use crate::config::AppConfig;
use crate::error::BatchError;
use crate::job::{Job, JobReport, JobResult, JobRunner};
use crate::pool::{available_workers, WorkerPool};
use crate::progress::{JobKey, JobStatus, ProgressSink};
use crate::render::{render_table, LogWriter, ProgressMode, ProgressRenderer};
use crate::tools::Backends;
use indicatif::ProgressDrawTarget;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of a whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Worker threads used. Zero when there was nothing to do.
    pub workers: usize,
    /// One report per job, ordered by key.
    pub jobs: Vec<JobReport>,
    pub elapsed: Duration,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&JobResult) -> bool) -> usize {
        self.jobs.iter().filter(|j| pred(&j.result)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|r| matches!(r, JobResult::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, JobResult::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(JobResult::is_failure)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Process exit status for this batch: 0 when nothing failed.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} file(s): {} converted, {} skipped, {} failed in {:.1}s",
            self.jobs.len(),
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.elapsed.as_secs_f64()
        )
    }

    /// Summary line followed by the full reason of every failed job.
    pub fn footer(&self) -> Vec<String> {
        let mut lines = vec![String::new(), self.summary()];
        for job in &self.jobs {
            if let JobResult::Failed { reason } = &job.result {
                lines.push(format!("{} failed:", job.key));
                lines.extend(reason.lines().map(|l| format!("    {}", l)));
            }
        }
        lines
    }
}

/// Map sources to jobs writing into `output_dir`.
///
/// The destination is `<stem>.<container>`. Sources sharing a stem get
/// `<stem>_<ext>.<container>` instead, and any remaining clash gets the job
/// ordinal appended, so no two jobs ever target the same file.
pub fn plan_jobs(files: &[PathBuf], output_dir: &Path, container: &str) -> Vec<Job> {
    fn stem_of(path: &Path) -> OsString {
        path.file_stem().map(OsString::from).unwrap_or_default()
    }

    let mut stem_counts: HashMap<OsString, usize> = HashMap::new();
    for file in files {
        *stem_counts.entry(stem_of(file)).or_default() += 1;
    }

    let mut taken: HashSet<PathBuf> = HashSet::new();
    files
        .iter()
        .enumerate()
        .map(|(ordinal, source)| {
            let stem = stem_of(source);
            let stem = stem.to_string_lossy();
            let mut name = if stem_counts.get(&stem_of(source)).copied().unwrap_or(0) > 1 {
                let ext = source
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}_{}", stem, ext)
            } else {
                stem.into_owned()
            };
            let mut destination = output_dir.join(format!("{}.{}", name, container));
            if !taken.insert(destination.clone()) {
                name = format!("{}_{}", name, ordinal);
                destination = output_dir.join(format!("{}.{}", name, container));
                taken.insert(destination.clone());
            }

            let label = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.display().to_string());
            Job {
                key: JobKey::new(label, ordinal),
                source: source.clone(),
                destination,
            }
        })
        .collect()
}

/// Converts every supported file of one directory.
pub struct BatchOrchestrator {
    config: AppConfig,
    backends: Option<Backends>,
    progress: ProgressMode,
    workers: Option<usize>,
    log: Option<LogWriter>,
}

impl BatchOrchestrator {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backends: None,
            progress: ProgressMode::default(),
            workers: None,
            log: None,
        }
    }

    /// Use these backends instead of locating `ffmpeg` and `mediainfo`.
    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn with_progress_mode(mut self, mode: ProgressMode) -> Self {
        self.progress = mode;
        self
    }

    /// Fix the worker count instead of deriving it from the core count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Log writer to keep clear of the live table while it is drawn.
    pub fn with_log_writer(mut self, log: LogWriter) -> Self {
        self.log = Some(log);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Supported files directly inside `input`, as absolute paths sorted by
    /// path.
    pub fn discover(&self, input: &Path) -> Result<Vec<PathBuf>, BatchError> {
        Ok(self.scan(&canonical_input(input)?))
    }

    fn scan(&self, input_dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| self.config.accepts(p))
            .collect();
        files.sort();
        files
    }

    /// Configured output directory, or `output` next to the input directory.
    pub fn output_dir_for(&self, input_dir: &Path) -> PathBuf {
        if let Some(dir) = &self.config.output_dir {
            return dir.clone();
        }
        match input_dir.parent() {
            Some(parent) => parent.join("output"),
            None => input_dir.join("output"),
        }
    }

    /// Run the batch, drawing progress and the report on stdout.
    pub fn run(&self, input: &Path) -> Result<BatchReport, BatchError> {
        let stdout = io::stdout();
        let live = self
            .progress
            .is_live(stdout.is_terminal())
            .then(ProgressDrawTarget::stdout);
        self.run_to(input, stdout, live)
    }

    /// Run the batch and write the final report to `out`. With a `live`
    /// target the table is drawn there while jobs run.
    pub fn run_to<W: Write>(
        &self,
        input: &Path,
        mut out: W,
        live: Option<ProgressDrawTarget>,
    ) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let input_dir = canonical_input(input)?;
        let files = self.scan(&input_dir);
        let output_dir = self.output_dir_for(&input_dir);

        if files.is_empty() {
            info!(input = %input_dir.display(), "no supported video files found");
            writeln!(out, "No supported video files found in {}", input_dir.display())?;
            out.flush()?;
            return Ok(BatchReport {
                input_dir,
                output_dir,
                workers: 0,
                jobs: Vec::new(),
                elapsed: started.elapsed(),
            });
        }

        let backends = match &self.backends {
            Some(b) => b.clone(),
            None => Backends::locate(&self.config.tools)?,
        };
        fs::create_dir_all(&output_dir).map_err(|source| BatchError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;

        let workers = self
            .workers
            .unwrap_or_else(|| available_workers(self.config.reserved_cores));
        let pool = WorkerPool::new(workers)?;
        let jobs = plan_jobs(&files, &output_dir, &self.config.encode.container);

        let sink = Arc::new(ProgressSink::new());
        for job in &jobs {
            sink.set(&job.key, JobStatus::Queued);
        }
        info!(
            jobs = jobs.len(),
            workers = pool.workers(),
            input = %input_dir.display(),
            output = %output_dir.display(),
            "starting batch"
        );

        let title = format!(
            "Converting {} file(s) with {} worker(s):",
            jobs.len(),
            pool.workers()
        );
        let renderer = live.map(|target| {
            let renderer = ProgressRenderer::spawn(
                Arc::clone(&sink),
                title.clone(),
                self.config.render_interval(),
                target,
            );
            if let Some(log) = &self.log {
                log.attach(renderer.multi());
            }
            renderer
        });

        let runner = JobRunner::new(
            backends.encoder.as_ref(),
            backends.prober.as_ref(),
            sink.as_ref(),
            &self.config.encode,
        )
        .with_overwrite(self.config.overwrite)
        .with_timeout(self.config.job_timeout())
        .with_diagnostic_lines(self.config.diagnostic_lines);

        let outcomes = pool.run(&jobs, |job| runner.run(job));

        let mut reports: Vec<JobReport> = jobs
            .iter()
            .zip(outcomes)
            .map(|(job, outcome)| match outcome {
                Ok(report) => report,
                Err(panic) => {
                    let reason = format!("worker panicked: {}", panic);
                    warn!(job = %job.key, %reason, "job aborted");
                    sink.set(&job.key, JobStatus::error(&reason));
                    JobReport::failed(job, reason)
                }
            })
            .collect();
        debug_assert!(sink.all_terminal());
        if let Some(renderer) = renderer {
            if let Some(log) = &self.log {
                log.detach();
            }
            renderer.stop();
        }
        reports.sort_by(|a, b| a.key.cmp(&b.key));

        let report = BatchReport {
            input_dir,
            output_dir,
            workers: pool.workers(),
            jobs: reports,
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "batch finished"
        );

        let mut lines = render_table(&title, &sink.snapshot());
        lines.extend(report.footer());

        for line in &lines {
            writeln!(out, "{}", line)?;
        }
        out.flush()?;

        Ok(report)
    }
}

fn canonical_input(input: &Path) -> Result<PathBuf, BatchError> {
    if !input.exists() {
        return Err(BatchError::InputMissing(input.to_path_buf()));
    }
    if !input.is_dir() {
        return Err(BatchError::NotADirectory(input.to_path_buf()));
    }
    Ok(fs::canonicalize(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/in").join(n)).collect()
    }

    #[test]
    fn unique_stems_keep_plain_names() {
        let jobs = plan_jobs(&paths(&["a.mp4", "b.mkv"]), Path::new("/out"), "mp4");
        assert_eq!(jobs[0].destination, PathBuf::from("/out/a.mp4"));
        assert_eq!(jobs[1].destination, PathBuf::from("/out/b.mp4"));
        assert_eq!(jobs[0].key, JobKey::new("a.mp4", 0));
        assert_eq!(jobs[1].key, JobKey::new("b.mkv", 1));
    }

    #[test]
    fn shared_stems_get_extension_suffix() {
        let jobs = plan_jobs(
            &paths(&["clip.avi", "clip.mp4", "other.mov"]),
            Path::new("/out"),
            "mp4",
        );
        assert_eq!(jobs[0].destination, PathBuf::from("/out/clip_avi.mp4"));
        assert_eq!(jobs[1].destination, PathBuf::from("/out/clip_mp4.mp4"));
        assert_eq!(jobs[2].destination, PathBuf::from("/out/other.mp4"));
    }

    #[test]
    fn suffixed_name_clash_falls_back_to_ordinal() {
        let jobs = plan_jobs(
            &paths(&["clip.avi", "clip.mp4", "clip_mp4.mkv"]),
            Path::new("/out"),
            "mp4",
        );
        let destinations: HashSet<_> = jobs.iter().map(|j| j.destination.clone()).collect();
        assert_eq!(destinations.len(), 3);
        assert_eq!(jobs[2].destination, PathBuf::from("/out/clip_mp4_2.mp4"));
    }

    #[test]
    fn output_dir_defaults_next_to_input() {
        let orchestrator = BatchOrchestrator::new(AppConfig::default());
        assert_eq!(
            orchestrator.output_dir_for(Path::new("/media/input")),
            PathBuf::from("/media/output")
        );

        let mut config = AppConfig::default();
        config.output_dir = Some(PathBuf::from("/elsewhere"));
        let orchestrator = BatchOrchestrator::new(config);
        assert_eq!(
            orchestrator.output_dir_for(Path::new("/media/input")),
            PathBuf::from("/elsewhere")
        );
    }

    #[test]
    fn discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.MKV", "a.mp4", "notes.txt", "c.wmv"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.mp4")).unwrap();

        let files = BatchOrchestrator::new(AppConfig::default())
            .discover(dir.path())
            .unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.MKV", "c.wmv"]);
        assert!(files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn discover_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = BatchOrchestrator::new(AppConfig::default());

        let missing = dir.path().join("missing");
        assert!(matches!(
            orchestrator.discover(&missing),
            Err(BatchError::InputMissing(_))
        ));

        let file = dir.path().join("file.mp4");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            orchestrator.discover(&file),
            Err(BatchError::NotADirectory(_))
        ));
    }

    #[test]
    fn run_resolves_the_input_once_for_scan_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(input.join("sub")).unwrap();
        fs::write(input.join("notes.txt"), b"x").unwrap();

        let mut out = Vec::new();
        let report = BatchOrchestrator::new(AppConfig::default())
            .run_to(&input.join("sub").join(".."), &mut out, None)
            .unwrap();

        let canonical = fs::canonicalize(&input).unwrap();
        assert_eq!(report.input_dir, canonical);
        assert_eq!(report.output_dir, canonical.parent().unwrap().join("output"));
        assert!(report.is_empty());
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(&canonical.display().to_string()));
    }

    #[test]
    fn report_counts_and_exit_code() {
        let job = Job {
            key: JobKey::new("a.mp4", 0),
            source: PathBuf::from("/in/a.mp4"),
            destination: PathBuf::from("/out/a.mp4"),
        };
        let mut ok = JobReport::failed(&job, "x");
        ok.result = JobResult::Succeeded;
        let failed = JobReport::failed(&job, "Conversion failed!");

        let mut report = BatchReport {
            input_dir: PathBuf::from("/in"),
            output_dir: PathBuf::from("/out"),
            workers: 2,
            jobs: vec![ok],
            elapsed: Duration::from_secs(3),
        };
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary(), "1 file(s): 1 converted, 0 skipped, 0 failed in 3.0s");

        report.jobs.push(failed);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.exit_code(), 1);
        let footer = report.footer();
        assert!(footer.contains(&"a.mp4 failed:".to_string()));
        assert!(footer.contains(&"    Conversion failed!".to_string()));
    }
}
