//! Run tracker: the single writer of [`AnalysisRun`] state.
//!
//! Each run has its own async mutex. A transition is applied to a copy of
//! the run under that lock, persisted, and only then published; a rejected
//! transition or a failed write leaves the tracked run untouched. The
//! tracker also owns the cancellation token of every run.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::RunError;
use crate::findings::Finding;
use crate::sam::{AnalysisRun, PhaseOutput, RunOptions, RunStatus, SamPhase, machine};
use crate::storage::Storage;

pub struct RunTracker {
    store: Arc<dyn Storage>,
    runs: DashMap<String, Arc<Mutex<AnalysisRun>>>,
    tokens: DashMap<String, CancellationToken>,
}

impl RunTracker {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self {
            store,
            runs: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// Create and persist a `pending` run.
    pub async fn create(&self, options: RunOptions) -> Result<AnalysisRun, RunError> {
        let run = AnalysisRun::new(options);
        self.store.save_run(&run).await?;
        self.runs
            .insert(run.id.clone(), Arc::new(Mutex::new(run.clone())));
        self.tokens.insert(run.id.clone(), CancellationToken::new());
        info!(run_id = %run.id, case_id = %run.case_id, "Analysis run created");
        Ok(run)
    }

    async fn entry(&self, run_id: &str) -> Result<Arc<Mutex<AnalysisRun>>, RunError> {
        if let Some(entry) = self.runs.get(run_id) {
            return Ok(entry.value().clone());
        }
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| RunError::NotFound {
                run_id: run_id.to_string(),
            })?;
        Ok(self
            .runs
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(run)))
            .value()
            .clone())
    }

    /// Snapshot of a run.
    pub async fn get(&self, run_id: &str) -> Result<AnalysisRun, RunError> {
        let entry = self.entry(run_id).await?;
        let run = entry.lock().await.clone();
        Ok(run)
    }

    pub async fn list(&self) -> Result<Vec<AnalysisRun>, RunError> {
        Ok(self.store.list_runs().await?)
    }

    /// Apply `f` to the run under its lock and persist the result.
    ///
    /// Returns `f`'s value and the updated run.
    pub async fn update<T, F>(&self, run_id: &str, f: F) -> Result<(T, AnalysisRun), RunError>
    where
        F: FnOnce(&mut AnalysisRun) -> Result<T, RunError>,
    {
        let entry = self.entry(run_id).await?;
        let mut guard = entry.lock().await;
        let mut next = guard.clone();
        let value = f(&mut next)?;
        self.store.save_run(&next).await?;
        *guard = next.clone();
        Ok((value, next))
    }

    /// Persist a phase's findings and records and mark the phase completed.
    ///
    /// Runs under the run's lock, so a concurrent cancel either lands before
    /// (nothing is written, `None` is returned) or after the whole commit.
    pub async fn commit_phase(
        &self,
        run_id: &str,
        phase: SamPhase,
        findings: &[Finding],
        output: &PhaseOutput,
    ) -> Result<Option<AnalysisRun>, RunError> {
        let entry = self.entry(run_id).await?;
        let mut guard = entry.lock().await;
        if guard.status != RunStatus::running(phase) {
            return Ok(None);
        }
        let mut next = guard.clone();
        machine::complete_phase(&mut next, phase, output.metric(), Utc::now())?;
        self.store.append_findings(run_id, findings).await?;
        self.store.save_phase_output(run_id, output).await?;
        self.store.save_run(&next).await?;
        *guard = next.clone();
        Ok(Some(next))
    }

    /// Drop the in-memory state of a finished run; it reloads from storage
    /// on next access.
    pub fn evict(&self, run_id: &str) {
        self.runs.remove(run_id);
        self.tokens.remove(run_id);
    }

    /// Cancellation token of a run, created on first use.
    pub fn token(&self, run_id: &str) -> CancellationToken {
        self.tokens
            .entry(run_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Replace the run's token with a fresh one, for a resumed run.
    pub fn reset_token(&self, run_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(run_id.to_string(), token.clone());
        token
    }

    /// Cancel a pending or running run and signal its executor.
    pub async fn cancel(&self, run_id: &str) -> Result<AnalysisRun, RunError> {
        let (_, run) = self
            .update(run_id, |run| {
                if run.status.is_terminal() {
                    return Err(RunError::AlreadyTerminal {
                        run_id: run.id.clone(),
                        status: run.status.to_string(),
                    });
                }
                Ok(machine::cancel(run, Utc::now())?)
            })
            .await?;
        self.token(run_id).cancel();
        info!(run_id, "Analysis run cancelled");
        Ok(run)
    }
}
