//! Analysis job queue.
//!
//! Submitted requests are recorded as `queued`, wait for one of
//! `max_concurrent` permits, run on the blocking thread pool and end up
//! `completed` (with the report) or `error` (with the message).
//!
//! ```text
//! submit ──► queued ──► (permit) ──► analyzing ──┬──► completed
//!                                                └──► error
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info};

use crate::config::AnalysisConfig;
use crate::pipeline::AnalyzeRequest;
use crate::tsr::TsrReport;

/// Number of jobs remembered by the queue; the oldest finished jobs go first.
pub const DEFAULT_JOB_HISTORY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Analyzing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// State of one submitted analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub slide: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TsrReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bounded-concurrency queue of analysis jobs.
pub struct JobQueue {
    jobs: RwLock<LruCache<u64, Job>>,
    history: usize,
    next_id: AtomicU64,
    permits: Arc<Semaphore>,
    defaults: AnalysisConfig,
}

impl JobQueue {
    pub fn new(defaults: AnalysisConfig, max_concurrent: usize) -> Self {
        Self::with_history(defaults, max_concurrent, DEFAULT_JOB_HISTORY)
    }

    pub fn with_history(defaults: AnalysisConfig, max_concurrent: usize, history: usize) -> Self {
        Self {
            jobs: RwLock::new(LruCache::unbounded()),
            history: history.max(1),
            next_id: AtomicU64::new(1),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            defaults,
        }
    }

    pub fn defaults(&self) -> &AnalysisConfig {
        &self.defaults
    }

    /// Record the request as queued and start it in the background.
    pub async fn submit(self: &Arc<Self>, request: AnalyzeRequest) -> Job {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            slide: request.slide_name(),
            status: JobStatus::Queued,
            report: None,
            error: None,
        };
        {
            let mut jobs = self.jobs.write().await;
            jobs.put(id, job.clone());
            evict_finished(&mut jobs, self.history);
        }
        info!(job_id = id, slide = %job.slide, "Analysis queued");

        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.execute(id, request).await });
        job
    }

    async fn execute(self: Arc<Self>, id: u64, request: AnalyzeRequest) {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                self.finish(id, Err(e.to_string())).await;
                return;
            }
        };

        self.update(id, |job| job.status = JobStatus::Analyzing).await;
        info!(job_id = id, "Analysis started");

        let defaults = self.defaults.clone();
        let outcome = tokio::task::spawn_blocking(move || request.run(&defaults)).await;
        let result = match outcome {
            Ok(Ok(analysis)) => Ok(analysis.report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("analysis task failed: {}", e)),
        };
        self.finish(id, result).await;
    }

    async fn finish(&self, id: u64, result: Result<TsrReport, String>) {
        match &result {
            Ok(report) => info!(
                job_id = id,
                tsr = report.tsr,
                tsr_hotspot = report.tsr_hotspot,
                "Analysis completed"
            ),
            Err(message) => error!(job_id = id, error = %message, "Analysis failed"),
        }
        self.update(id, move |job| match result {
            Ok(report) => {
                job.status = JobStatus::Completed;
                job.report = Some(report);
            }
            Err(message) => {
                job.status = JobStatus::Error;
                job.error = Some(message);
            }
        })
        .await;
        evict_finished(&mut *self.jobs.write().await, self.history);
    }

    async fn update(&self, id: u64, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.jobs.write().await.peek_mut(&id) {
            f(job);
        }
    }

    pub async fn get(&self, id: u64) -> Option<Job> {
        self.jobs.read().await.peek(&id).cloned()
    }

    /// All remembered jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.iter().map(|(_, j)| j.clone()).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }
}

/// Drop the oldest finished jobs until at most `history` remain.
///
/// Queued and running jobs are kept even past the limit.
fn evict_finished(jobs: &mut LruCache<u64, Job>, history: usize) {
    while jobs.len() > history {
        let oldest = jobs
            .iter()
            .rev()
            .find(|(_, job)| job.status.is_finished())
            .map(|(id, _)| *id);
        match oldest {
            Some(id) => {
                jobs.pop(&id);
            }
            None => break,
        }
    }
}
