//! Ad hoc engine jobs: a list of engines run one after another over the
//! same documents, outside the S.A.M. phases.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::info;
use uuid::Uuid;

use crate::engine::{EngineDispatcher, EngineResponse};
use crate::errors::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub case_id: String,
    pub status: JobStatus,
    pub engines: Vec<String>,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub current_engine: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub responses: Vec<EngineResponse>,
}

impl JobProgress {
    fn new(case_id: &str, engines: Vec<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            case_id: case_id.to_string(),
            status: JobStatus::Pending,
            total: engines.len(),
            engines,
            completed: 0,
            succeeded: 0,
            failed: 0,
            current_engine: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            responses: Vec::new(),
        }
    }

    fn record(&mut self, response: EngineResponse) {
        self.completed += 1;
        if response.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.responses.push(response);
    }

    /// Stamp the end of the job; a cancelled job stays cancelled.
    fn finish(&mut self, duration_ms: u64) {
        if self.status != JobStatus::Cancelled {
            self.status = JobStatus::Completed;
        }
        self.current_engine = None;
        self.completed_at.get_or_insert_with(Utc::now);
        self.duration_ms = duration_ms;
    }
}

#[derive(Default)]
pub struct JobTracker {
    jobs: DashMap<String, JobProgress>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and return its id.
    pub fn create(&self, case_id: &str, engines: Vec<String>) -> String {
        let job = JobProgress::new(case_id, engines);
        let id = job.job_id.clone();
        self.jobs.insert(id.clone(), job);
        id
    }

    pub fn get(&self, job_id: &str) -> Result<JobProgress, RunError> {
        self.jobs
            .get(job_id)
            .map(|j| j.value().clone())
            .ok_or_else(|| RunError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Every tracked job, oldest first.
    pub fn list(&self) -> Vec<JobProgress> {
        let mut jobs: Vec<JobProgress> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    /// Stop a pending or running job before its next engine starts.
    pub fn cancel(&self, job_id: &str) -> Result<JobProgress, RunError> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| RunError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if job.status.is_terminal() {
            return Err(RunError::JobFinished {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }
        job.status = JobStatus::Cancelled;
        job.current_engine = None;
        job.completed_at = Some(Utc::now());
        info!(job_id, "Engine job cancelled");
        Ok(job.value().clone())
    }

    /// Drop finished jobs that ended more than `max_age` ago.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.jobs.len();
        self.jobs.retain(|_, j| {
            !(j.status.is_terminal() && j.completed_at.is_some_and(|at| at <= cutoff))
        });
        before - self.jobs.len()
    }

    /// Mark a job finished even though its task never got to do so.
    pub(crate) fn abandon(&self, job_id: &str) {
        self.update(job_id, |j| j.finish(j.duration_ms));
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut JobProgress)) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            f(job.value_mut());
        }
    }

    fn is_cancelled(&self, job_id: &str) -> bool {
        self.jobs
            .get(job_id)
            .is_some_and(|j| j.status == JobStatus::Cancelled)
    }
}

/// Run every engine of a job in order, recording progress as it goes.
pub async fn run_job(
    dispatcher: Arc<EngineDispatcher>,
    jobs: Arc<JobTracker>,
    job_id: String,
    document_ids: Vec<String>,
) -> Result<JobProgress, RunError> {
    let job = jobs.get(&job_id)?;
    let started = Instant::now();
    jobs.update(&job_id, |j| {
        if j.status == JobStatus::Pending {
            j.status = JobStatus::Running;
        }
    });

    for engine in &job.engines {
        if jobs.is_cancelled(&job_id) {
            break;
        }
        jobs.update(&job_id, |j| j.current_engine = Some(engine.clone()));
        let response = dispatcher
            .execute(engine, &job.case_id, &document_ids, Map::new())
            .await;
        jobs.update(&job_id, |j| j.record(response));
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    jobs.update(&job_id, |j| j.finish(duration_ms));
    let done = jobs.get(&job_id)?;
    info!(
        job_id = %job_id,
        status = %done.status,
        succeeded = done.succeeded,
        failed = done.failed,
        duration_ms,
        "Engine job finished"
    );
    Ok(done)
}
