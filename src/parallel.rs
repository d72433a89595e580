use crate::backend::Tiler;
use crate::error::{PrepError, Result};
use crate::tiling::{JobOutcome, TilingJob};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use rayon::prelude::*;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Flag that turns the binary into a single-job tiling worker.
pub const WORKER_FLAG: &str = "--tile-worker";

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub image: PathBuf,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl JobSummary {
    pub fn from_reports(reports: &[JobReport]) -> Self {
        reports.iter().fold(Self::default(), |mut summary, report| {
            match report.outcome {
                JobOutcome::Completed { .. } => summary.completed += 1,
                JobOutcome::Skipped { .. } => summary.skipped += 1,
                JobOutcome::Failed { .. } => summary.failed += 1,
            }
            summary
        })
    }
}

/// Pool of OS worker processes, one child per job.
#[derive(Debug, Clone)]
pub struct ProcessPool {
    program: PathBuf,
    args: Vec<String>,
    workers: Option<usize>,
    /// `RUST_LOG` filter handed to every child.
    log_filter: Option<String>,
}

impl ProcessPool {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, workers: Option<usize>) -> Self {
        Self {
            program: program.into(),
            args,
            workers,
            log_filter: None,
        }
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Re-launch the running executable in worker mode.
    pub fn current_exe(workers: Option<usize>) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, vec![WORKER_FLAG.to_string()], workers))
    }

    fn try_run_in_child(&self, job: &TilingJob) -> Result<JobOutcome> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(filter) = &self.log_filter {
            command.env("RUST_LOG", filter);
        }
        let mut child = command.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            serde_json::to_writer(&mut stdin, job)?;
            // stdin closes when dropped here
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(PrepError::Worker(format!(
                "worker for {} exited with {}",
                job.image.display(),
                output.status
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn run_in_child(&self, job: &TilingJob) -> JobOutcome {
        debug!("Dispatching {} to a worker process", job.image.display());
        self.try_run_in_child(job).unwrap_or_else(|e| {
            let reason = format!("{} (image: {})", e, job.image.display());
            error!("Tiling worker failed: {}", reason);
            JobOutcome::Failed { reason }
        })
    }

    /// Run every job in its own child process, at most `workers` at a time.
    pub fn dispatch(&self, jobs: &[TilingJob]) -> Result<Vec<JobReport>> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.workers {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| PrepError::Worker(format!("failed to build worker pool: {}", e)))?;

        info!(
            "Will tile {} images with {} workers",
            jobs.len(),
            pool.current_num_threads()
        );
        let progress = progress_bar(jobs.len());
        let reports: Vec<JobReport> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let outcome = self.run_in_child(job);
                    progress.inc(1);
                    JobReport {
                        image: job.image.clone(),
                        outcome,
                    }
                })
                .collect()
        });
        progress.finish_and_clear();
        Ok(reports)
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionMode {
    /// In order, on the calling thread.
    Sequential,
    Processes(ProcessPool),
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] Tiling: {wide_bar} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Execute tiling jobs. Individual job failures are reported, never raised.
pub fn execute(jobs: &[TilingJob], mode: &ExecutionMode, tiler: &dyn Tiler) -> Result<Vec<JobReport>> {
    let reports = match mode {
        ExecutionMode::Sequential => {
            let progress = progress_bar(jobs.len());
            let reports: Vec<JobReport> = jobs
                .iter()
                .map(|job| {
                    let outcome = job.run(tiler);
                    progress.inc(1);
                    JobReport {
                        image: job.image.clone(),
                        outcome,
                    }
                })
                .collect();
            progress.finish_and_clear();
            reports
        }
        ExecutionMode::Processes(pool) => pool.dispatch(jobs)?,
    };

    let summary = JobSummary::from_reports(&reports);
    info!(
        "Tiling jobs: {} completed, {} skipped, {} failed",
        summary.completed, summary.skipped, summary.failed
    );
    for report in &reports {
        if let JobOutcome::Skipped { reason } = &report.outcome {
            info!("Skipped {}: {}", report.image.display(), reason);
        }
    }
    Ok(reports)
}

/// Worker side of the process protocol: one JSON job in, one JSON outcome out.
pub fn serve_worker<R: Read, W: Write>(input: R, mut output: W, tiler: &dyn Tiler) -> Result<()> {
    let job: TilingJob = serde_json::from_reader(input)?;
    debug!("Worker received job for {}", job.image.display());
    let outcome = job.run(tiler);
    serde_json::to_writer(&mut output, &outcome)?;
    output.flush()?;
    Ok(())
}
