//! Drives one analysis run through the S.A.M. phases.
//!
//! Phases run one after another. Within a phase the configured engines run
//! concurrently (bounded by a semaphore) through the dispatcher. A phase's
//! findings and records are persisted only once every one of its engines has
//! returned; only then is its completion timestamp set and the next phase
//! allowed to start.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::machine;
use super::run::{AnalysisRun, RunStatus};
use super::types::{PhaseOutput, PhaseOutputs};
use super::SamPhase;
use crate::document::Document;
use crate::engine::{EngineDispatcher, EngineId, EngineResponse};
use crate::errors::{PhaseError, RunError};
use crate::fcip_config::PhasesSection;
use crate::findings::Finding;
use crate::tracker::RunTracker;

/// Engines allowed to run at once within a phase when not configured.
pub const DEFAULT_MAX_CONCURRENT_ENGINES: usize = 4;

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    PhaseStarted {
        run_id: String,
        phase: SamPhase,
    },
    EngineFinished {
        run_id: String,
        phase: SamPhase,
        engine_id: EngineId,
        success: bool,
        findings: usize,
        duration_ms: u64,
    },
    PhaseCompleted {
        run_id: String,
        phase: SamPhase,
        metric: usize,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
    },
}

/// One engine scheduled in a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEngine {
    pub engine: EngineId,
    pub required: bool,
}

/// Which engines run in which phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    phases: BTreeMap<SamPhase, Vec<ScheduledEngine>>,
}

impl Default for PhasePlan {
    fn default() -> Self {
        let phases = SamPhase::ALL
            .into_iter()
            .map(|p| {
                (
                    p,
                    vec![ScheduledEngine {
                        engine: p.primary_engine(),
                        required: true,
                    }],
                )
            })
            .collect();
        Self { phases }
    }
}

impl PhasePlan {
    /// Build from the `[phases]` configuration section.
    pub fn from_config(section: &PhasesSection) -> Result<Self> {
        let mut phases = BTreeMap::new();
        for phase in SamPhase::ALL {
            let mut scheduled = Vec::new();
            for entry in &section.get(phase).engines {
                let engine: EngineId = entry.id.parse().map_err(|_| {
                    anyhow::anyhow!("Unknown engine '{}' in phase '{}'", entry.id, phase)
                })?;
                scheduled.push(ScheduledEngine {
                    engine,
                    required: entry.required,
                });
            }
            phases.insert(phase, scheduled);
        }
        Ok(Self { phases })
    }

    /// Replace the engines of one phase.
    pub fn with_phase(mut self, phase: SamPhase, engines: Vec<ScheduledEngine>) -> Self {
        self.phases.insert(phase, engines);
        self
    }

    pub fn engines(&self, phase: SamPhase) -> &[ScheduledEngine] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }
}

enum PhaseOutcome {
    Completed,
    Failed,
    Cancelled,
}

pub struct SamExecutor {
    dispatcher: Arc<EngineDispatcher>,
    tracker: Arc<RunTracker>,
    plan: Arc<PhasePlan>,
    max_concurrent: usize,
    event_tx: Option<mpsc::Sender<PhaseEvent>>,
}

impl SamExecutor {
    pub fn new(dispatcher: Arc<EngineDispatcher>, tracker: Arc<RunTracker>) -> Self {
        Self {
            dispatcher,
            tracker,
            plan: Arc::new(PhasePlan::default()),
            max_concurrent: DEFAULT_MAX_CONCURRENT_ENGINES,
            event_tx: None,
        }
    }

    pub fn with_plan(mut self, plan: Arc<PhasePlan>) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PhaseEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    async fn emit_event(&self, event: PhaseEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run phases from `start` through the run's final phase.
    ///
    /// Returns the run in its final state. A run that failed or was cancelled
    /// is an `Ok` result; `Err` is reserved for tracker or storage faults.
    pub async fn execute(&self, run_id: &str, start: SamPhase) -> Result<AnalysisRun, RunError> {
        let run = self.tracker.get(run_id).await?;
        let token = self.tracker.token(run_id);

        let documents = match self.load_documents(&run).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(run_id, error = %e, "Document validation failed");
                return self.fail(run_id, start, &e).await;
            }
        };
        let mut outputs = self.tracker.store().load_phase_outputs(run_id).await?;

        for phase in SamPhase::ALL
            .into_iter()
            .filter(|p| *p >= start && *p <= run.final_phase())
        {
            if token.is_cancelled() {
                break;
            }
            match self
                .run_phase(&run, phase, &documents, &mut outputs, &token)
                .await?
            {
                PhaseOutcome::Completed => {}
                PhaseOutcome::Failed | PhaseOutcome::Cancelled => break,
            }
        }

        let current = self.tracker.get(run_id).await?;
        if current.status.is_terminal() {
            self.emit_event(PhaseEvent::RunFinished {
                run_id: run_id.to_string(),
                status: current.status,
            })
            .await;
            return Ok(current);
        }
        if token.is_cancelled() {
            return Ok(current);
        }

        let (_, finished) = self
            .tracker
            .update(run_id, |r| Ok(machine::finish(r, Utc::now())?))
            .await?;
        info!(run_id, "Analysis run completed");
        self.emit_event(PhaseEvent::RunFinished {
            run_id: run_id.to_string(),
            status: finished.status,
        })
        .await;
        Ok(finished)
    }

    /// Resolve and validate the run's documents.
    async fn load_documents(&self, run: &AnalysisRun) -> Result<Vec<Document>, PhaseError> {
        if run.document_ids.is_empty() {
            return Err(PhaseError::InvalidDocuments(
                "no documents were supplied".to_string(),
            ));
        }
        let store = self.tracker.store();
        let mut documents = Vec::with_capacity(run.document_ids.len());
        for id in &run.document_ids {
            let Some(doc) = store.get_document(&run.case_id, id).await? else {
                return Err(PhaseError::InvalidDocuments(format!(
                    "document {} not found in case {}",
                    id, run.case_id
                )));
            };
            if !doc.has_text() {
                return Err(PhaseError::InvalidDocuments(format!(
                    "document {} has no text",
                    id
                )));
            }
            documents.push(doc);
        }
        Ok(documents)
    }

    async fn run_phase(
        &self,
        run: &AnalysisRun,
        phase: SamPhase,
        documents: &[Document],
        outputs: &mut PhaseOutputs,
        token: &CancellationToken,
    ) -> Result<PhaseOutcome, RunError> {
        let run_id = run.id.as_str();
        if let Err(e) = self
            .tracker
            .update(run_id, |r| Ok(machine::begin_phase(r, phase, Utc::now())?))
            .await
        {
            if token.is_cancelled() {
                return Ok(PhaseOutcome::Cancelled);
            }
            return Err(e);
        }
        info!(run_id, %phase, "Phase started");
        self.emit_event(PhaseEvent::PhaseStarted {
            run_id: run_id.to_string(),
            phase,
        })
        .await;

        let scheduled = self.plan.engines(phase);
        let options = phase_options(run, phase, outputs);
        let semaphore = Semaphore::new(self.max_concurrent);
        let calls = scheduled.iter().map(|s| {
            let (semaphore, options) = (&semaphore, options.clone());
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                if token.is_cancelled() {
                    return None;
                }
                Some(
                    self.dispatcher
                        .execute_with_documents(s.engine, &run.case_id, documents.to_vec(), options)
                        .await,
                )
            }
        });
        let responses = join_all(calls).await;

        for (s, response) in scheduled.iter().zip(&responses) {
            if let Some(response) = response {
                self.emit_event(PhaseEvent::EngineFinished {
                    run_id: run_id.to_string(),
                    phase,
                    engine_id: s.engine,
                    success: response.success,
                    findings: response.findings().len(),
                    duration_ms: response.duration_ms,
                })
                .await;
            }
        }

        if token.is_cancelled() {
            info!(run_id, %phase, "Run cancelled; discarding phase results");
            return Ok(PhaseOutcome::Cancelled);
        }

        let mut findings: Vec<Finding> = Vec::new();
        let mut primary: Option<&EngineResponse> = None;
        for (s, response) in scheduled.iter().zip(&responses) {
            let Some(response) = response else { continue };
            if !response.success {
                let message = response
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("Engine {} failed", s.engine));
                if s.required {
                    warn!(run_id, %phase, engine = %s.engine, error = %message, "Required engine failed");
                    let err = PhaseError::RequiredEngineFailed {
                        phase: phase.to_string(),
                        engine_id: s.engine.to_string(),
                        message,
                    };
                    self.fail(run_id, phase, &err).await?;
                    return Ok(PhaseOutcome::Failed);
                }
                warn!(run_id, %phase, engine = %s.engine, error = %message, "Optional engine failed; continuing");
                continue;
            }
            if s.engine == phase.primary_engine() {
                primary = Some(response);
            }
            findings.extend(
                response
                    .findings()
                    .iter()
                    .cloned()
                    .map(|f| f.in_run(run_id, phase)),
            );
        }

        let output = match phase_output(phase, primary) {
            Ok(output) => output,
            Err(message) => {
                self.fail(run_id, phase, &PhaseError::MalformedOutput(message))
                    .await?;
                return Ok(PhaseOutcome::Failed);
            }
        };

        let store = self.tracker.store();
        let mut taken: HashSet<String> = store
            .list_findings(run_id)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();
        for finding in &mut findings {
            if !taken.insert(finding.id.clone()) {
                let fresh = Uuid::new_v4().to_string();
                warn!(run_id, %phase, finding = %finding.id, replacement = %fresh, "Finding id already used in run");
                finding.id = fresh.clone();
                taken.insert(fresh);
            }
        }

        let metric = output.metric();
        if self
            .tracker
            .commit_phase(run_id, phase, &findings, &output)
            .await?
            .is_none()
        {
            info!(run_id, %phase, "Run cancelled before commit; discarding phase results");
            return Ok(PhaseOutcome::Cancelled);
        }
        outputs.apply(output);
        info!(run_id, %phase, metric, findings = findings.len(), "Phase completed");
        self.emit_event(PhaseEvent::PhaseCompleted {
            run_id: run_id.to_string(),
            phase,
            metric,
        })
        .await;
        Ok(PhaseOutcome::Completed)
    }

    async fn fail(
        &self,
        run_id: &str,
        phase: SamPhase,
        err: &PhaseError,
    ) -> Result<AnalysisRun, RunError> {
        let message = err.to_string();
        let (_, run) = self
            .tracker
            .update(run_id, |r| Ok(machine::fail(r, phase, &message, Utc::now())?))
            .await?;
        Ok(run)
    }
}

/// Inputs a phase's engines receive from the run and earlier phases.
fn phase_options(run: &AnalysisRun, phase: SamPhase, outputs: &PhaseOutputs) -> Map<String, Value> {
    let mut options = Map::new();
    if !run.focus_claims.is_empty() {
        options.insert("focus_claims".into(), Value::from(run.focus_claims.clone()));
    }
    let mut put = |key: &str, value: serde_json::Result<Value>| {
        if let Ok(value) = value {
            options.insert(key.to_string(), value);
        }
    };
    if phase >= SamPhase::Inherit {
        put("origins", serde_json::to_value(&outputs.origins));
    }
    if phase >= SamPhase::Compound {
        put("propagations", serde_json::to_value(&outputs.propagations));
    }
    if phase >= SamPhase::Arrive {
        put("authority_markers", serde_json::to_value(&outputs.authority_markers));
    }
    options
}

fn summary_list<T: DeserializeOwned>(
    response: Option<&EngineResponse>,
    key: &str,
) -> Result<Vec<T>, String> {
    match response.and_then(|r| r.summary.get(key)) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            let engine = response.map(|r| r.engine_id.as_str()).unwrap_or("unknown");
            format!("Engine {} returned malformed {}: {}", engine, key, e)
        }),
    }
}

/// Typed records of a phase, read from its primary engine's summary keys.
fn phase_output(phase: SamPhase, primary: Option<&EngineResponse>) -> Result<PhaseOutput, String> {
    Ok(match phase {
        SamPhase::Anchor => PhaseOutput::Anchor {
            origins: summary_list(primary, "origins")?,
        },
        SamPhase::Inherit => PhaseOutput::Inherit {
            propagations: summary_list(primary, "propagations")?,
        },
        SamPhase::Compound => PhaseOutput::Compound {
            authority_markers: summary_list(primary, "authority_markers")?,
        },
        SamPhase::Arrive => PhaseOutput::Arrive {
            outcomes: summary_list(primary, "outcomes")?,
            causation_chains: summary_list(primary, "causation_chains")?,
        },
    })
}
