//! Analysis run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::SamPhase;

/// Overall status of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    AnchorRunning,
    InheritRunning,
    CompoundRunning,
    ArriveRunning,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AnchorRunning => "anchor_running",
            Self::InheritRunning => "inherit_running",
            Self::CompoundRunning => "compound_running",
            Self::ArriveRunning => "arrive_running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// The running status for `phase`.
    pub fn running(phase: SamPhase) -> Self {
        match phase {
            SamPhase::Anchor => Self::AnchorRunning,
            SamPhase::Inherit => Self::InheritRunning,
            SamPhase::Compound => Self::CompoundRunning,
            SamPhase::Arrive => Self::ArriveRunning,
        }
    }

    /// The phase this status is running, if any.
    pub fn phase(&self) -> Option<SamPhase> {
        match self {
            Self::AnchorRunning => Some(SamPhase::Anchor),
            Self::InheritRunning => Some(SamPhase::Inherit),
            Self::CompoundRunning => Some(SamPhase::Compound),
            Self::ArriveRunning => Some(SamPhase::Arrive),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_some()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "anchor_running" => Ok(Self::AnchorRunning),
            "inherit_running" => Ok(Self::InheritRunning),
            "compound_running" => Ok(Self::CompoundRunning),
            "arrive_running" => Ok(Self::ArriveRunning),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Start and completion timestamps for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-phase counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub false_premises_found: usize,
    pub propagation_chains_found: usize,
    pub authority_accumulations_found: usize,
    pub outcomes_linked: usize,
}

impl PhaseMetrics {
    /// Record the metric owned by `phase`.
    pub fn set(&mut self, phase: SamPhase, value: usize) {
        match phase {
            SamPhase::Anchor => self.false_premises_found = value,
            SamPhase::Inherit => self.propagation_chains_found = value,
            SamPhase::Compound => self.authority_accumulations_found = value,
            SamPhase::Arrive => self.outcomes_linked = value,
        }
    }

    pub fn get(&self, phase: SamPhase) -> usize {
        match phase {
            SamPhase::Anchor => self.false_premises_found,
            SamPhase::Inherit => self.propagation_chains_found,
            SamPhase::Compound => self.authority_accumulations_found,
            SamPhase::Arrive => self.outcomes_linked,
        }
    }
}

/// Parameters for starting a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub case_id: String,
    pub document_ids: Vec<String>,
    /// Restrict ANCHOR to these claim texts when non-empty.
    #[serde(default)]
    pub focus_claims: Vec<String>,
    /// Complete the run after this phase.
    #[serde(default)]
    pub stop_after_phase: Option<SamPhase>,
}

impl RunOptions {
    pub fn new(case_id: &str, document_ids: Vec<String>) -> Self {
        Self {
            case_id: case_id.to_string(),
            document_ids,
            focus_claims: Vec::new(),
            stop_after_phase: None,
        }
    }

    pub fn with_focus_claims(mut self, claims: Vec<String>) -> Self {
        self.focus_claims = claims;
        self
    }

    pub fn with_stop_after(mut self, phase: SamPhase) -> Self {
        self.stop_after_phase = Some(phase);
        self
    }
}

/// One S.A.M. analysis of a case's documents.
///
/// Mutated only through [`super::machine`] transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: String,
    pub case_id: String,
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub focus_claims: Vec<String>,
    #[serde(default)]
    pub stop_after_phase: Option<SamPhase>,
    pub status: RunStatus,
    /// Indexed by [`SamPhase::index`].
    pub timings: [PhaseTiming; 4],
    pub metrics: PhaseMetrics,
    pub error_message: Option<String>,
    pub error_phase: Option<SamPhase>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRun {
    pub fn new(options: RunOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            case_id: options.case_id,
            document_ids: options.document_ids,
            focus_claims: options.focus_claims,
            stop_after_phase: options.stop_after_phase,
            status: RunStatus::Pending,
            timings: [PhaseTiming::default(); 4],
            metrics: PhaseMetrics::default(),
            error_message: None,
            error_phase: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn timing(&self, phase: SamPhase) -> &PhaseTiming {
        &self.timings[phase.index()]
    }

    pub fn timing_mut(&mut self, phase: SamPhase) -> &mut PhaseTiming {
        &mut self.timings[phase.index()]
    }

    pub fn is_phase_completed(&self, phase: SamPhase) -> bool {
        self.timing(phase).completed_at.is_some()
    }

    /// Phase currently executing, derived from the status.
    pub fn current_phase(&self) -> Option<SamPhase> {
        self.status.phase()
    }

    /// First phase without a completion timestamp.
    pub fn next_pending_phase(&self) -> Option<SamPhase> {
        SamPhase::ALL
            .into_iter()
            .find(|p| !self.is_phase_completed(*p))
    }

    /// Last phase this run executes.
    pub fn final_phase(&self) -> SamPhase {
        self.stop_after_phase.unwrap_or(SamPhase::Arrive)
    }
}
