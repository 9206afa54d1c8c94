//! Client-facing progress and results shapes (camelCase JSON).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sam::{
    AnalysisRun, AuthorityMarker, CausationChain, ClaimOrigin, Outcome, PhaseOutputs,
    PropagationRecord, RunStatus, SamPhase,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub run_id: String,
    pub case_id: String,
    pub status: RunStatus,
    pub current_phase: Option<SamPhase>,
    pub anchor_started_at: Option<DateTime<Utc>>,
    pub anchor_completed_at: Option<DateTime<Utc>>,
    pub inherit_started_at: Option<DateTime<Utc>>,
    pub inherit_completed_at: Option<DateTime<Utc>>,
    pub compound_started_at: Option<DateTime<Utc>>,
    pub compound_completed_at: Option<DateTime<Utc>>,
    pub arrive_started_at: Option<DateTime<Utc>>,
    pub arrive_completed_at: Option<DateTime<Utc>>,
    pub false_premises_found: usize,
    pub propagation_chains_found: usize,
    pub authority_accumulations_found: usize,
    pub outcomes_linked: usize,
    pub error_message: Option<String>,
    pub error_phase: Option<SamPhase>,
}

impl From<&AnalysisRun> for ProgressView {
    fn from(run: &AnalysisRun) -> Self {
        let t = |phase: SamPhase| *run.timing(phase);
        Self {
            run_id: run.id.clone(),
            case_id: run.case_id.clone(),
            status: run.status,
            current_phase: run.current_phase(),
            anchor_started_at: t(SamPhase::Anchor).started_at,
            anchor_completed_at: t(SamPhase::Anchor).completed_at,
            inherit_started_at: t(SamPhase::Inherit).started_at,
            inherit_completed_at: t(SamPhase::Inherit).completed_at,
            compound_started_at: t(SamPhase::Compound).started_at,
            compound_completed_at: t(SamPhase::Compound).completed_at,
            arrive_started_at: t(SamPhase::Arrive).started_at,
            arrive_completed_at: t(SamPhase::Arrive).completed_at,
            false_premises_found: run.metrics.false_premises_found,
            propagation_chains_found: run.metrics.propagation_chains_found,
            authority_accumulations_found: run.metrics.authority_accumulations_found,
            outcomes_linked: run.metrics.outcomes_linked,
            error_message: run.error_message.clone(),
            error_phase: run.error_phase,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsView {
    pub origins: Vec<ClaimOrigin>,
    pub false_premises: Vec<ClaimOrigin>,
    pub propagations: Vec<PropagationRecord>,
    pub authority_markers: Vec<AuthorityMarker>,
    pub authority_laundering: Vec<AuthorityMarker>,
    pub outcomes: Vec<Outcome>,
    pub causation_chains: Vec<CausationChain>,
}

impl From<PhaseOutputs> for ResultsView {
    fn from(outputs: PhaseOutputs) -> Self {
        let false_premises = outputs.false_premises().into_iter().cloned().collect();
        let authority_laundering = outputs.authority_laundering().into_iter().cloned().collect();
        Self {
            origins: outputs.origins,
            false_premises,
            propagations: outputs.propagations,
            authority_markers: outputs.authority_markers,
            authority_laundering,
            outcomes: outputs.outcomes,
            causation_chains: outputs.causation_chains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::{RunOptions, machine};

    #[test]
    fn progress_uses_camel_case_keys() {
        let mut run = AnalysisRun::new(RunOptions::new("case", vec!["d".into()]));
        machine::begin_phase(&mut run, SamPhase::Anchor, Utc::now()).unwrap();
        let value = serde_json::to_value(ProgressView::from(&run)).unwrap();
        assert_eq!(value["status"], "anchor_running");
        assert_eq!(value["currentPhase"], "anchor");
        assert!(value["anchorStartedAt"].is_string());
        assert!(value["inheritStartedAt"].is_null());
        assert_eq!(value["falsePremisesFound"], 0);
    }

    #[test]
    fn empty_results_have_every_list() {
        let value = serde_json::to_value(ResultsView::from(PhaseOutputs::default())).unwrap();
        for key in [
            "origins",
            "falsePremises",
            "propagations",
            "authorityMarkers",
            "authorityLaundering",
            "outcomes",
            "causationChains",
        ] {
            assert_eq!(value[key], serde_json::json!([]), "{key}");
        }
    }
}
