//! Orchestrator facade: the run lifecycle API.
//!
//! Wires storage, the engine dispatcher, the run tracker and the S.A.M.
//! executor together. Runs execute as background tokio tasks; callers poll
//! [`Orchestrator::progress`] or await [`Orchestrator::wait`].

pub mod jobs;
pub mod views;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::{AuditTrail, AuditTrailBuilder, DEFAULT_MAX_QUOTE_CHARS};
use crate::engine::{
    DispatcherConfig, EngineDispatcher, EngineRegistry, EngineResponse, RegistryBuilder,
};
use crate::errors::RunError;
use crate::fcip_config::FcipToml;
use crate::findings::Finding;
use crate::sam::{
    AnalysisRun, PhaseEvent, PhasePlan, RunOptions, RunStatus, SamExecutor, SamPhase, machine,
};
use crate::storage::{self, Storage};
use crate::tracker::RunTracker;

pub use jobs::{JobProgress, JobStatus, JobTracker};
pub use views::{ProgressView, ResultsView};

type RunHandle = JoinHandle<Result<AnalysisRun, RunError>>;
type JobHandle = JoinHandle<()>;

/// How long a finished job stays queryable.
const JOB_RETENTION_HOURS: i64 = 24;

/// Assembles an [`Orchestrator`] from a registry and a store.
pub struct OrchestratorBuilder {
    registry: Arc<EngineRegistry>,
    store: Arc<dyn Storage>,
    plan: PhasePlan,
    dispatcher_config: DispatcherConfig,
    max_concurrent: Option<usize>,
    max_quote_chars: usize,
    event_tx: Option<mpsc::Sender<PhaseEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(registry: Arc<EngineRegistry>, store: Arc<dyn Storage>) -> Self {
        Self {
            registry,
            store,
            plan: PhasePlan::default(),
            dispatcher_config: DispatcherConfig::default(),
            max_concurrent: None,
            max_quote_chars: DEFAULT_MAX_QUOTE_CHARS,
            event_tx: None,
        }
    }

    pub fn with_plan(mut self, plan: PhasePlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher_config = config;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn with_max_quote_chars(mut self, max_quote_chars: usize) -> Self {
        self.max_quote_chars = max_quote_chars;
        self
    }

    /// Receive phase and engine events of every run.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PhaseEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build(self) -> Orchestrator {
        let dispatcher = Arc::new(
            EngineDispatcher::new(self.registry, self.store.clone())
                .with_config(self.dispatcher_config),
        );
        let tracker = Arc::new(RunTracker::new(self.store.clone()));
        let mut executor =
            SamExecutor::new(dispatcher.clone(), tracker.clone()).with_plan(Arc::new(self.plan));
        if let Some(max) = self.max_concurrent {
            executor = executor.with_max_concurrent(max);
        }
        if let Some(tx) = self.event_tx {
            executor = executor.with_event_channel(tx);
        }
        Orchestrator {
            store: self.store,
            dispatcher,
            tracker,
            executor: Arc::new(executor),
            jobs: Arc::new(JobTracker::new()),
            max_quote_chars: self.max_quote_chars,
            handles: DashMap::new(),
            job_handles: DashMap::new(),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn Storage>,
    dispatcher: Arc<EngineDispatcher>,
    tracker: Arc<RunTracker>,
    executor: Arc<SamExecutor>,
    jobs: Arc<JobTracker>,
    max_quote_chars: usize,
    handles: DashMap<String, RunHandle>,
    job_handles: DashMap<String, JobHandle>,
}

impl Orchestrator {
    pub fn builder(registry: Arc<EngineRegistry>, store: Arc<dyn Storage>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry, store)
    }

    /// Build everything a configuration describes: storage backend, engine
    /// bindings, timeouts, phase plan and audit settings.
    pub fn from_config(toml: &FcipToml) -> Result<Self> {
        let store = storage::open(&toml.storage).context("Failed to open storage")?;
        let registry = RegistryBuilder::from_config(toml).build();
        let plan = PhasePlan::from_config(&toml.phases)?;
        Ok(Self::builder(registry, store)
            .with_plan(plan)
            .with_dispatcher_config(toml.dispatcher_config())
            .with_max_concurrent(toml.dispatcher.max_concurrent_engines)
            .with_max_quote_chars(toml.audit.max_quote_chars)
            .build())
    }

    pub fn dispatcher(&self) -> &Arc<EngineDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        self.dispatcher.registry()
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// Start a full run over `document_ids`; returns the run id.
    pub async fn start(&self, case_id: &str, document_ids: Vec<String>) -> Result<String, RunError> {
        self.start_with(RunOptions::new(case_id, document_ids)).await
    }

    pub async fn start_with(&self, options: RunOptions) -> Result<String, RunError> {
        let run = self.tracker.create(options).await?;
        self.spawn(&run.id, SamPhase::Anchor);
        Ok(run.id)
    }

    fn spawn(&self, run_id: &str, from: SamPhase) {
        self.handles.retain(|_, h| !h.is_finished());
        let (executor, tracker) = (self.executor.clone(), self.tracker.clone());
        let id = run_id.to_string();
        let handle = tokio::spawn(async move {
            let result = executor.execute(&id, from).await;
            tracker.evict(&id);
            result
        });
        self.handles.insert(run_id.to_string(), handle);
    }

    pub async fn progress(&self, run_id: &str) -> Result<ProgressView, RunError> {
        let run = self.tracker.get(run_id).await?;
        Ok(ProgressView::from(&run))
    }

    /// S.A.M. records of a completed run.
    pub async fn results(&self, run_id: &str) -> Result<ResultsView, RunError> {
        let run = self.tracker.get(run_id).await?;
        if run.status != RunStatus::Completed {
            return Err(RunError::NotCompleted {
                run_id: run.id,
                status: run.status.to_string(),
            });
        }
        let outputs = self.store.load_phase_outputs(run_id).await?;
        Ok(ResultsView::from(outputs))
    }

    pub async fn cancel(&self, run_id: &str) -> Result<ProgressView, RunError> {
        let run = self.tracker.cancel(run_id).await?;
        Ok(ProgressView::from(&run))
    }

    /// Restart a failed or cancelled run at its first incomplete phase.
    pub async fn resume(&self, run_id: &str) -> Result<SamPhase, RunError> {
        if let Some(handle) = self.handles.get(run_id)
            && !handle.is_finished()
        {
            let run = self.tracker.get(run_id).await?;
            return Err(RunError::AlreadyRunning {
                run_id: run.id,
                status: run.status.to_string(),
            });
        }
        let (restart, _) = self
            .tracker
            .update(run_id, |run| {
                machine::resume(run, Utc::now()).map_err(|_| RunError::NotResumable {
                    run_id: run.id.clone(),
                    status: run.status.to_string(),
                })
            })
            .await?;
        self.tracker.reset_token(run_id);
        info!(run_id, phase = %restart, "Resuming analysis run");
        self.spawn(run_id, restart);
        Ok(restart)
    }

    /// Wait for a run's background task; returns the run's final state.
    pub async fn wait(&self, run_id: &str) -> Result<AnalysisRun, RunError> {
        if let Some((_, handle)) = self.handles.remove(run_id) {
            match handle.await {
                Ok(result) => return result,
                Err(e) => warn!(run_id, error = %e, "Run task did not complete"),
            }
        }
        self.tracker.get(run_id).await
    }

    pub async fn list_runs(&self) -> Result<Vec<AnalysisRun>, RunError> {
        self.tracker.list().await
    }

    /// Persisted findings of a run, in the order they were appended.
    pub async fn findings(&self, run_id: &str) -> Result<Vec<Finding>, RunError> {
        self.tracker.get(run_id).await?;
        Ok(self.store.list_findings(run_id).await?)
    }

    pub async fn audit_trail(&self, run_id: &str, finding_id: &str) -> Result<AuditTrail, RunError> {
        let run = self.tracker.get(run_id).await?;
        let finding = self
            .store
            .list_findings(run_id)
            .await?
            .into_iter()
            .find(|f| f.id == finding_id)
            .ok_or_else(|| RunError::FindingNotFound {
                run_id: run_id.to_string(),
                finding_id: finding_id.to_string(),
            })?;

        let mut documents = Vec::with_capacity(run.document_ids.len());
        for id in &run.document_ids {
            if let Some(doc) = self.store.get_document(&run.case_id, id).await? {
                documents.push(doc);
            }
        }
        let outputs = self.store.load_phase_outputs(run_id).await?;
        Ok(AuditTrailBuilder::new(&documents, &outputs)
            .with_max_quote_chars(self.max_quote_chars)
            .build(&finding))
    }

    /// Run a single engine outside any analysis run.
    pub async fn execute_engine(
        &self,
        engine_id: &str,
        case_id: &str,
        document_ids: &[String],
        options: Map<String, Value>,
    ) -> EngineResponse {
        self.dispatcher
            .execute(engine_id, case_id, document_ids, options)
            .await
    }

    /// Queue a list of engines to run one after another; returns the job id.
    pub fn submit_job(&self, case_id: &str, document_ids: Vec<String>, engines: Vec<String>) -> String {
        self.jobs.cleanup(chrono::Duration::hours(JOB_RETENTION_HOURS));
        self.job_handles.retain(|_, h| !h.is_finished());

        let job_id = self.jobs.create(case_id, engines);
        let (dispatcher, jobs, id) = (self.dispatcher.clone(), self.jobs.clone(), job_id.clone());
        let handle = tokio::spawn(async move {
            if let Err(e) = jobs::run_job(dispatcher, jobs, id.clone(), document_ids).await {
                warn!(job_id = %id, error = %e, "Engine job failed");
            }
        });
        self.job_handles.insert(job_id.clone(), handle);
        job_id
    }

    pub fn job_progress(&self, job_id: &str) -> Result<JobProgress, RunError> {
        self.jobs.get(job_id)
    }

    pub fn list_jobs(&self) -> Vec<JobProgress> {
        self.jobs.list()
    }

    /// Cancel a job; the engine already running finishes, no further one starts.
    pub fn cancel_job(&self, job_id: &str) -> Result<JobProgress, RunError> {
        self.jobs.cancel(job_id)
    }

    /// Wait for a job's task to end; returns the job's final progress.
    pub async fn wait_job(&self, job_id: &str) -> Result<JobProgress, RunError> {
        let job = self.jobs.get(job_id)?;
        if let Some((_, handle)) = self.job_handles.remove(job_id)
            && let Err(e) = handle.await
        {
            warn!(job_id, error = %e, "Job task did not complete");
            self.jobs.abandon(job_id);
        }
        match self.jobs.get(job_id) {
            Ok(done) => Ok(done),
            Err(_) => Ok(job),
        }
    }
}
