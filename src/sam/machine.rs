//! Synchronous S.A.M. state transitions.
//!
//! Every mutation of an [`AnalysisRun`] goes through one of these functions.
//! Engine invocation is the only async work in a run; these transitions are
//! applied by the run tracker while it holds the run's lock.

use chrono::{DateTime, Utc};

use super::run::{AnalysisRun, RunStatus};
use super::SamPhase;
use crate::errors::PhaseError;

/// Enter `phase`.
///
/// Allowed only when the run is not terminal, no other phase is mid-flight,
/// `phase` has not completed, and its predecessor has a completion timestamp.
pub fn begin_phase(
    run: &mut AnalysisRun,
    phase: SamPhase,
    now: DateTime<Utc>,
) -> Result<(), PhaseError> {
    let target = RunStatus::running(phase);
    if run.status.is_terminal() {
        return Err(invalid(run.status, target));
    }
    if let Some(active) = run.status.phase()
        && !run.is_phase_completed(active)
    {
        return Err(invalid(run.status, target));
    }
    if run.is_phase_completed(phase) {
        return Err(PhaseError::AlreadyCompleted {
            phase: phase.to_string(),
        });
    }
    let mut started = now;
    if let Some(predecessor) = phase.previous() {
        match run.timing(predecessor).completed_at {
            Some(done) => started = started.max(done),
            None => {
                return Err(PhaseError::PredecessorIncomplete {
                    phase: phase.to_string(),
                    predecessor: predecessor.to_string(),
                });
            }
        }
    }

    let timing = run.timing_mut(phase);
    timing.started_at = Some(started);
    timing.completed_at = None;
    run.status = target;
    run.updated_at = now;
    Ok(())
}

/// Mark the running `phase` complete and record its metric.
pub fn complete_phase(
    run: &mut AnalysisRun,
    phase: SamPhase,
    metric: usize,
    now: DateTime<Utc>,
) -> Result<(), PhaseError> {
    if run.status != RunStatus::running(phase) || run.is_phase_completed(phase) {
        return Err(PhaseError::InvalidTransition {
            from: run.status.to_string(),
            to: format!("{}_completed", phase),
        });
    }
    let timing = run.timing_mut(phase);
    let completed = timing.started_at.map_or(now, |s| s.max(now));
    timing.completed_at = Some(completed);
    run.metrics.set(phase, metric);
    run.updated_at = now;
    Ok(())
}

/// Finish the run once its final phase has completed.
pub fn finish(run: &mut AnalysisRun, now: DateTime<Utc>) -> Result<(), PhaseError> {
    let last = run.final_phase();
    if run.status.is_terminal() || !run.is_phase_completed(last) {
        return Err(invalid(run.status, RunStatus::Completed));
    }
    run.status = RunStatus::Completed;
    run.completed_at = Some(now);
    run.updated_at = now;
    Ok(())
}

/// Fail the run at `phase`. Completed phases keep their timestamps.
pub fn fail(
    run: &mut AnalysisRun,
    phase: SamPhase,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), PhaseError> {
    if run.status.is_terminal() {
        return Err(invalid(run.status, RunStatus::Failed));
    }
    run.status = RunStatus::Failed;
    run.error_phase = Some(phase);
    run.error_message = Some(message.to_string());
    run.completed_at = Some(now);
    run.updated_at = now;
    Ok(())
}

/// Cancel from pending or any running state.
pub fn cancel(run: &mut AnalysisRun, now: DateTime<Utc>) -> Result<(), PhaseError> {
    if run.status.is_terminal() {
        return Err(invalid(run.status, RunStatus::Cancelled));
    }
    run.status = RunStatus::Cancelled;
    run.completed_at = Some(now);
    run.updated_at = now;
    Ok(())
}

/// Re-open a failed or cancelled run; returns the phase to restart from.
///
/// Completed phases keep their timestamps and outputs. Error fields are cleared.
pub fn resume(run: &mut AnalysisRun, now: DateTime<Utc>) -> Result<SamPhase, PhaseError> {
    if !matches!(run.status, RunStatus::Failed | RunStatus::Cancelled) {
        return Err(invalid(run.status, RunStatus::Pending));
    }
    let restart = match run.next_pending_phase() {
        Some(phase) if phase <= run.final_phase() => phase,
        _ => return Err(invalid(run.status, RunStatus::Pending)),
    };
    run.timing_mut(restart).started_at = None;
    run.status = RunStatus::Pending;
    run.error_message = None;
    run.error_phase = None;
    run.completed_at = None;
    run.updated_at = now;
    Ok(restart)
}

fn invalid(from: RunStatus, to: RunStatus) -> PhaseError {
    PhaseError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}
