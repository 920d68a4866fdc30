//! Shard archiving
//!
//! Each non-empty shard directory becomes one zip archive built by a
//! 7z-compatible tool. Jobs run through a bounded worker pool; queued jobs
//! start as soon as a worker slot frees up.

use crate::runner::{ProcessRunner, ToolInvocation, ToolOutcome};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info};

/// Deadline for building one archive
pub const ARCHIVE_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Archive compression level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    NoCompression,
    Fastest,
    Fast,
    #[default]
    Normal,
    Maximum,
    Ultra,
}

impl Compression {
    /// 7z `-mx` level
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Compression::NoCompression => 0,
            Compression::Fastest => 1,
            Compression::Fast => 3,
            Compression::Normal => 5,
            Compression::Maximum => 7,
            Compression::Ultra => 9,
        }
    }
}

/// Build `destination` from the contents of `source_dir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub source_dir: PathBuf,
    pub destination: PathBuf,
    pub compression: Compression,
}

impl ArchiveJob {
    #[must_use]
    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Outcome of one archive job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub job: ArchiveJob,
    pub outcome: ToolOutcome,
    /// Size of the produced archive, `None` if it does not exist
    pub size: Option<u64>,
}

impl ArchiveReport {
    /// The tool exited cleanly and left an archive behind
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success() && self.size.is_some()
    }
}

#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, job: &ArchiveJob) -> ArchiveReport;
}

/// Archiver backed by a 7z-compatible executable
pub struct ToolArchiver {
    tool: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl ToolArchiver {
    pub fn new(tool: impl Into<PathBuf>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            tool: tool.into(),
            runner,
            timeout: ARCHIVE_TOOL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `a -tzip <dest> <dir>/* -mx<level> -mmt -y -r`
    #[must_use]
    pub fn args(job: &ArchiveJob) -> Vec<String> {
        vec![
            "a".to_string(),
            "-tzip".to_string(),
            job.destination.display().to_string(),
            job.source_dir.join("*").display().to_string(),
            format!("-mx{}", job.compression.level()),
            "-mmt".to_string(),
            "-y".to_string(),
            "-r".to_string(),
        ]
    }
}

#[async_trait]
impl Archiver for ToolArchiver {
    async fn archive(&self, job: &ArchiveJob) -> ArchiveReport {
        let invocation =
            ToolInvocation::new(&self.tool, self.timeout).with_args(Self::args(job));
        let outcome = self.runner.run(&invocation).await;
        let size = tokio::fs::metadata(&job.destination)
            .await
            .ok()
            .map(|m| m.len());
        ArchiveReport {
            job: job.clone(),
            outcome,
            size,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Bounded pool of archive workers
pub struct ArchiveWorkerPool {
    archiver: Arc<dyn Archiver>,
    workers: usize,
    slots: Semaphore,
    stats: Mutex<PoolStats>,
}

impl ArchiveWorkerPool {
    /// Default number of concurrent archive jobs
    pub const DEFAULT_WORKERS: usize = 1;

    /// Create a pool. Zero workers is treated as one.
    pub fn new(archiver: Arc<dyn Archiver>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            archiver,
            workers,
            slots: Semaphore::new(workers),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn stats(&self) -> PoolStats {
        self.stats.lock().await.clone()
    }

    /// Run every job and return the reports in job order.
    ///
    /// `on_complete` is called as each job finishes with the report and the
    /// number of jobs finished so far.
    pub async fn run_all<F>(&self, jobs: Vec<ArchiveJob>, mut on_complete: F) -> Vec<ArchiveReport>
    where
        F: FnMut(&ArchiveReport, usize),
    {
        let total = jobs.len();
        self.stats.lock().await.queued += total;

        let mut pending: FuturesUnordered<_> = jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| async move { (index, self.run_one(job).await) })
            .collect();

        let mut reports: Vec<Option<ArchiveReport>> = vec![None; total];
        let mut finished = 0;
        while let Some((index, report)) = pending.next().await {
            finished += 1;
            on_complete(&report, finished);
            reports[index] = Some(report);
        }
        reports.into_iter().flatten().collect()
    }

    async fn run_one(&self, job: ArchiveJob) -> ArchiveReport {
        // the semaphore is never closed
        let _permit = self.slots.acquire().await.ok();
        {
            let mut stats = self.stats.lock().await;
            stats.queued = stats.queued.saturating_sub(1);
            stats.active += 1;
        }

        info!(archive = %job.file_name(), source = %job.source_dir.display(), "creating archive");
        let report = self.archiver.archive(&job).await;

        let mut stats = self.stats.lock().await;
        stats.active -= 1;
        if report.succeeded() {
            stats.completed += 1;
        } else {
            stats.failed += 1;
            error!(
                archive = %job.file_name(),
                outcome = %report.outcome.describe(),
                "archive creation failed"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockProcessRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(name: &str) -> ArchiveJob {
        ArchiveJob {
            source_dir: PathBuf::from(format!("/wd/{name}")),
            destination: PathBuf::from(format!("/wd/s-{name}.zip")),
            compression: Compression::Fastest,
        }
    }

    #[test]
    fn args_follow_7z_conventions() {
        assert_eq!(
            ToolArchiver::args(&job("textures-1")),
            vec![
                "a",
                "-tzip",
                "/wd/s-textures-1.zip",
                "/wd/textures-1/*",
                "-mx1",
                "-mmt",
                "-y",
                "-r"
            ]
        );
    }

    #[test]
    fn compression_levels() {
        let levels: Vec<u8> = [
            Compression::NoCompression,
            Compression::Fastest,
            Compression::Fast,
            Compression::Normal,
            Compression::Maximum,
            Compression::Ultra,
        ]
        .iter()
        .map(|c| c.level())
        .collect();
        assert_eq!(levels, vec![0, 1, 3, 5, 7, 9]);
    }

    #[tokio::test]
    async fn tool_success_without_file_is_a_failure() {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|_| ToolOutcome::Success {
            stdout: String::new(),
        });
        let archiver = ToolArchiver::new("7za", Arc::new(runner));
        let report = archiver.archive(&job("models-1")).await;
        assert!(report.outcome.is_success());
        assert!(!report.succeeded());
    }

    struct CountingArchiver {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Archiver for CountingArchiver {
        async fn archive(&self, job: &ArchiveJob) -> ArchiveReport {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            ArchiveReport {
                job: job.clone(),
                outcome: ToolOutcome::Success {
                    stdout: String::new(),
                },
                size: Some(1),
            }
        }
    }

    #[tokio::test]
    async fn pool_respects_worker_limit_and_keeps_order() {
        let archiver = Arc::new(CountingArchiver {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ArchiveWorkerPool::new(archiver.clone(), 2);
        let jobs: Vec<_> = (1..=5).map(|i| job(&format!("models-{i}"))).collect();

        let mut seen = 0;
        let reports = pool.run_all(jobs.clone(), |_, done| seen = done).await;

        assert_eq!(seen, 5);
        assert!(archiver.peak.load(Ordering::SeqCst) <= 2);
        let order: Vec<_> = reports.iter().map(|r| r.job.clone()).collect();
        assert_eq!(order, jobs);
        let stats = pool.stats().await;
        assert_eq!(stats.completed, 5);
        assert_eq!((stats.queued, stats.active, stats.failed), (0, 0, 0));
    }

    #[tokio::test]
    async fn empty_job_list_is_fine() {
        let pool = ArchiveWorkerPool::new(
            Arc::new(CountingArchiver {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            0,
        );
        assert_eq!(pool.workers(), 1);
        assert!(pool.run_all(Vec::new(), |_, _| {}).await.is_empty());
    }
}
