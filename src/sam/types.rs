//! Records produced by each S.A.M. phase.
//!
//! Later records point back at their claim origin through `origin_id`; the
//! id is a reference into the ANCHOR output, never an embedded copy.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::SamPhase;

/// How a claim first entered the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginType {
    PrimarySource,
    ProfessionalOpinion,
    Hearsay,
    Speculation,
    Misattribution,
    Fabrication,
}

/// Why an origin is considered a false premise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FalsePremiseType {
    FactualError,
    Misattribution,
    SpeculationAsFact,
    ContextStripping,
    SelectiveQuotation,
    TemporalDistortion,
}

/// ANCHOR: where a claim originated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimOrigin {
    pub id: String,
    pub claim_id: String,
    pub claim_text: String,
    pub origin_document_id: String,
    #[serde(default)]
    pub origin_entity_id: Option<String>,
    #[serde(default)]
    pub origin_date: Option<NaiveDate>,
    #[serde(default)]
    pub origin_page: Option<u32>,
    #[serde(default)]
    pub origin_context: Option<String>,
    pub origin_type: OriginType,
    #[serde(default)]
    pub is_false_premise: bool,
    #[serde(default)]
    pub false_premise_type: Option<FalsePremiseType>,
    #[serde(default)]
    pub contradicting_evidence: Option<String>,
    #[serde(default)]
    pub contradicting_document_id: Option<String>,
    pub confidence_score: f64,
}

/// How a later document took up a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationType {
    Verbatim,
    Paraphrase,
    Citation,
    ImplicitAdoption,
    CircularReference,
    AuthorityAppeal,
}

/// How the claim changed on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    Amplification,
    Attenuation,
    CertaintyDrift,
    AttributionShift,
    ScopeExpansion,
    ScopeContraction,
}

/// INHERIT: one adoption of a claim by a later document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationRecord {
    pub id: String,
    pub origin_id: String,
    pub source_document_id: String,
    #[serde(default)]
    pub source_date: Option<NaiveDate>,
    pub target_document_id: String,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    pub propagation_type: PropagationType,
    #[serde(default)]
    pub verification_performed: bool,
    #[serde(default)]
    pub crossed_institutional_boundary: bool,
    #[serde(default)]
    pub source_institution: Option<String>,
    #[serde(default)]
    pub target_institution: Option<String>,
    #[serde(default)]
    pub mutation_detected: bool,
    #[serde(default)]
    pub mutation_type: Option<MutationType>,
    pub original_text: String,
    pub mutated_text: String,
    pub confidence: f64,
}

/// The kind of institutional authority a document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityType {
    CourtFinding,
    ExpertOpinion,
    OfficialReport,
    ProfessionalAssessment,
    PoliceConclusion,
    AgencyDetermination,
    Other,
}

impl AuthorityType {
    /// Perceived weight of an endorsement of this kind.
    pub fn weight(&self) -> f64 {
        match self {
            Self::CourtFinding => 5.0,
            Self::ExpertOpinion => 4.0,
            Self::OfficialReport | Self::AgencyDetermination | Self::ProfessionalAssessment => 3.0,
            Self::PoliceConclusion => 2.0,
            Self::Other => 1.0,
        }
    }
}

/// COMPOUND: authority a claim gained from one adopting document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityMarker {
    pub id: String,
    pub origin_id: String,
    pub authority_document_id: String,
    #[serde(default)]
    pub authority_entity_id: Option<String>,
    #[serde(default)]
    pub authority_date: Option<NaiveDate>,
    pub authority_type: AuthorityType,
    pub authority_weight: f64,
    /// Propagation through which the authority was gained.
    #[serde(default)]
    pub propagation_id: Option<String>,
    /// Unverified adoptions counted up to and including this marker.
    pub chain_length: usize,
    /// Distinct adopting institutions other than the origin's.
    pub institution_count: usize,
    pub laundering_score: f64,
    pub cumulative_authority_score: f64,
    pub is_authority_laundering: bool,
    /// Document ids from origin to this marker.
    #[serde(default)]
    pub laundering_path: Vec<String>,
    pub confidence: f64,
}

/// Severity of harm caused by an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarmLevel {
    Catastrophic,
    Severe,
    Moderate,
    Minor,
}

/// ARRIVE: a decision or outcome that explicitly relies on a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub origin_id: String,
    pub outcome_type: String,
    pub outcome_description: String,
    #[serde(default)]
    pub outcome_date: Option<NaiveDate>,
    pub outcome_document_id: String,
    pub harm_level: HarmLevel,
    /// The passage of the outcome document that references the claim.
    pub reference_text: String,
    pub but_for_analysis: String,
    pub causation_confidence: f64,
    #[serde(default)]
    pub remediation_possible: bool,
}

/// ARRIVE: the path from a claim origin to an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausationChain {
    pub id: String,
    pub outcome_id: String,
    pub origin_id: String,
    #[serde(default)]
    pub propagation_ids: Vec<String>,
    #[serde(default)]
    pub authority_marker_ids: Vec<String>,
}

/// Records produced by one phase, persisted when the phase completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseOutput {
    Anchor {
        origins: Vec<ClaimOrigin>,
    },
    Inherit {
        propagations: Vec<PropagationRecord>,
    },
    Compound {
        authority_markers: Vec<AuthorityMarker>,
    },
    Arrive {
        outcomes: Vec<Outcome>,
        causation_chains: Vec<CausationChain>,
    },
}

impl PhaseOutput {
    pub fn phase(&self) -> SamPhase {
        match self {
            Self::Anchor { .. } => SamPhase::Anchor,
            Self::Inherit { .. } => SamPhase::Inherit,
            Self::Compound { .. } => SamPhase::Compound,
            Self::Arrive { .. } => SamPhase::Arrive,
        }
    }

    /// The phase's headline metric.
    pub fn metric(&self) -> usize {
        match self {
            Self::Anchor { origins } => origins.iter().filter(|o| o.is_false_premise).count(),
            Self::Inherit { propagations } => {
                let mut chains: Vec<&str> =
                    propagations.iter().map(|p| p.origin_id.as_str()).collect();
                chains.sort_unstable();
                chains.dedup();
                chains.len()
            }
            Self::Compound { authority_markers } => authority_markers
                .iter()
                .filter(|m| m.is_authority_laundering)
                .count(),
            Self::Arrive { outcomes, .. } => outcomes.len(),
        }
    }
}

/// Accumulated records of every completed phase of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutputs {
    pub origins: Vec<ClaimOrigin>,
    pub propagations: Vec<PropagationRecord>,
    pub authority_markers: Vec<AuthorityMarker>,
    pub outcomes: Vec<Outcome>,
    pub causation_chains: Vec<CausationChain>,
}

impl PhaseOutputs {
    /// Replace the records of the output's phase.
    pub fn apply(&mut self, output: PhaseOutput) {
        match output {
            PhaseOutput::Anchor { origins } => self.origins = origins,
            PhaseOutput::Inherit { propagations } => self.propagations = propagations,
            PhaseOutput::Compound { authority_markers } => {
                self.authority_markers = authority_markers
            }
            PhaseOutput::Arrive {
                outcomes,
                causation_chains,
            } => {
                self.outcomes = outcomes;
                self.causation_chains = causation_chains;
            }
        }
    }

    pub fn origin(&self, origin_id: &str) -> Option<&ClaimOrigin> {
        self.origins.iter().find(|o| o.id == origin_id)
    }

    pub fn false_premises(&self) -> Vec<&ClaimOrigin> {
        self.origins.iter().filter(|o| o.is_false_premise).collect()
    }

    pub fn authority_laundering(&self) -> Vec<&AuthorityMarker> {
        self.authority_markers
            .iter()
            .filter(|m| m.is_authority_laundering)
            .collect()
    }

    /// Propagations of one claim, ordered by target date.
    pub fn propagations_of(&self, origin_id: &str) -> Vec<&PropagationRecord> {
        let mut found: Vec<&PropagationRecord> = self
            .propagations
            .iter()
            .filter(|p| p.origin_id == origin_id)
            .collect();
        found.sort_by_key(|p| p.target_date);
        found
    }

    pub fn markers_of(&self, origin_id: &str) -> Vec<&AuthorityMarker> {
        self.authority_markers
            .iter()
            .filter(|m| m.origin_id == origin_id)
            .collect()
    }

    pub fn outcomes_of(&self, origin_id: &str) -> Vec<&Outcome> {
        self.outcomes
            .iter()
            .filter(|o| o.origin_id == origin_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(id: &str, false_premise: bool) -> ClaimOrigin {
        ClaimOrigin {
            id: id.to_string(),
            claim_id: format!("claim-{id}"),
            claim_text: "The father was violent.".to_string(),
            origin_document_id: "doc-1".to_string(),
            origin_entity_id: None,
            origin_date: None,
            origin_page: Some(1),
            origin_context: None,
            origin_type: OriginType::Hearsay,
            is_false_premise: false_premise,
            false_premise_type: None,
            contradicting_evidence: None,
            contradicting_document_id: None,
            confidence_score: 0.7,
        }
    }

    #[test]
    fn anchor_metric_counts_false_premises() {
        let output = PhaseOutput::Anchor {
            origins: vec![origin("a", true), origin("b", false), origin("c", true)],
        };
        assert_eq!(output.metric(), 2);
        assert_eq!(output.phase(), SamPhase::Anchor);
    }

    #[test]
    fn phase_output_is_tagged_by_phase() {
        let output = PhaseOutput::Inherit {
            propagations: Vec::new(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["phase"], "inherit");
        let back: PhaseOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn apply_replaces_phase_records() {
        let mut outputs = PhaseOutputs::default();
        outputs.apply(PhaseOutput::Anchor {
            origins: vec![origin("a", true)],
        });
        outputs.apply(PhaseOutput::Anchor {
            origins: vec![origin("b", false), origin("c", true)],
        });
        assert_eq!(outputs.origins.len(), 2);
        assert_eq!(outputs.false_premises().len(), 1);
        assert!(outputs.origin("a").is_none());
    }

    #[test]
    fn authority_weights_rank_courts_highest() {
        assert!(AuthorityType::CourtFinding.weight() > AuthorityType::ExpertOpinion.weight());
        assert!(AuthorityType::PoliceConclusion.weight() > AuthorityType::Other.weight());
    }
}
