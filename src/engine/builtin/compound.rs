//! COMPOUND: authority a claim accumulates as it is adopted.
//!
//! For every adoption in date order the engine keeps two counters: `L`, the
//! unverified adoptions so far, and `I`, the distinct adopting institutions
//! other than the origin's. The laundering score is
//! `1 - exp(-(0.25 * L + 0.35 * I))`; a marker is laundering once the score
//! reaches the configured threshold.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{authority_type, headline};
use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;
use crate::sam::{AuthorityMarker, ClaimOrigin, PropagationRecord};

const CHAIN_WEIGHT: f64 = 0.25;
const INSTITUTION_WEIGHT: f64 = 0.35;

/// Laundering score for `chain_length` unverified adoptions across
/// `institutions` distinct institutions.
pub fn laundering_score(chain_length: usize, institutions: usize) -> f64 {
    1.0 - (-(CHAIN_WEIGHT * chain_length as f64 + INSTITUTION_WEIGHT * institutions as f64)).exp()
}

pub struct CompoundEngine {
    threshold: f64,
}

impl CompoundEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl AnalysisEngine for CompoundEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(1)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let origins: Vec<ClaimOrigin> = ctx.option("origins")?;
        let mut propagations: Vec<PropagationRecord> = ctx.option("propagations")?;
        let threshold = ctx
            .options
            .get("laundering_threshold")
            .and_then(Value::as_f64)
            .unwrap_or(self.threshold);
        propagations.sort_by_key(|p| p.target_date);

        let mut markers = Vec::new();
        let mut findings = Vec::new();

        for origin in &origins {
            let origin_institution = ctx
                .document(&origin.origin_document_id)
                .and_then(|d| d.institution.clone());
            let mut unverified = 0usize;
            let mut institutions: BTreeSet<String> = BTreeSet::new();
            let mut cumulative = 0.0;
            let mut path = vec![origin.origin_document_id.clone()];
            let mut origin_markers: Vec<AuthorityMarker> = Vec::new();

            for prop in propagations.iter().filter(|p| p.origin_id == origin.id) {
                if !prop.verification_performed {
                    unverified += 1;
                }
                if let Some(inst) = &prop.target_institution
                    && origin_institution
                        .as_deref()
                        .is_none_or(|o| !o.eq_ignore_ascii_case(inst))
                {
                    institutions.insert(inst.to_lowercase());
                }
                path.push(prop.target_document_id.clone());

                let authority = ctx
                    .document(&prop.target_document_id)
                    .map(authority_type)
                    .unwrap_or(crate::sam::AuthorityType::Other);
                cumulative += authority.weight();
                let score = laundering_score(unverified, institutions.len());
                origin_markers.push(AuthorityMarker {
                    id: Uuid::new_v4().to_string(),
                    origin_id: origin.id.clone(),
                    authority_document_id: prop.target_document_id.clone(),
                    authority_entity_id: prop.target_institution.clone(),
                    authority_date: prop.target_date,
                    authority_type: authority,
                    authority_weight: authority.weight(),
                    propagation_id: Some(prop.id.clone()),
                    chain_length: unverified,
                    institution_count: institutions.len(),
                    laundering_score: score,
                    cumulative_authority_score: cumulative,
                    is_authority_laundering: score >= threshold,
                    laundering_path: path.clone(),
                    confidence: prop.confidence.min(origin.confidence_score.max(0.5)),
                });
            }

            if let Some(peak) = origin_markers.iter().rfind(|m| m.is_authority_laundering) {
                let adopted: Vec<&str> = propagations
                    .iter()
                    .filter(|p| p.origin_id == origin.id)
                    .map(|p| p.mutated_text.as_str())
                    .collect();
                findings.push(json!({
                    "finding_type": "authority_laundering",
                    "title": format!("Authority laundering: {}", headline(&origin.claim_text, 70)),
                    "description": format!(
                        "Claim gained authority across {} institutions through {} unverified adoptions.",
                        peak.institution_count, peak.chain_length
                    ),
                    "severity": if origin.is_false_premise { "critical" } else { "high" },
                    "confidence": peak.confidence,
                    "document_ids": peak.laundering_path,
                    "evidence": {
                        "claim": origin.claim_text,
                        "adopted_as": adopted,
                    },
                    "origin_id": origin.id,
                    "laundering_score": peak.laundering_score,
                    "cumulative_authority_score": peak.cumulative_authority_score,
                }));
            }
            markers.extend(origin_markers);
        }

        Ok(json!({ "authority_markers": markers, "findings": findings }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::engine::EngineId;
    use crate::engine::builtin::test_support::{ctx, dated};
    use crate::sam::{AuthorityType, OriginType, PropagationType};
    use chrono::NaiveDate;

    fn origin() -> ClaimOrigin {
        ClaimOrigin {
            id: "o-1".into(),
            claim_id: "claim-1".into(),
            claim_text: "the father has been drinking heavily".into(),
            origin_document_id: "police".into(),
            origin_entity_id: None,
            origin_date: None,
            origin_page: Some(1),
            origin_context: None,
            origin_type: OriginType::Hearsay,
            is_false_premise: true,
            false_premise_type: None,
            contradicting_evidence: None,
            contradicting_document_id: None,
            confidence_score: 0.8,
        }
    }

    fn prop(target: &str, institution: &str, month: u32) -> PropagationRecord {
        PropagationRecord {
            id: format!("p-{target}"),
            origin_id: "o-1".into(),
            source_document_id: "police".into(),
            source_date: None,
            target_document_id: target.into(),
            target_date: NaiveDate::from_ymd_opt(2023, month, 1),
            propagation_type: PropagationType::ImplicitAdoption,
            verification_performed: false,
            crossed_institutional_boundary: true,
            source_institution: Some("Police".into()),
            target_institution: Some(institution.into()),
            mutation_detected: false,
            mutation_type: None,
            original_text: "the father has been drinking heavily".into(),
            mutated_text: "The father has been drinking heavily".into(),
            confidence: 0.8,
        }
    }

    fn docs() -> Vec<Document> {
        let text = "The father has been drinking heavily.";
        vec![
            dated("police", 2023, 1, 1, "Police", text),
            dated("sw", 2023, 2, 1, "Social Services", text),
            dated("expert", 2023, 3, 1, "Independent Expert", text),
            dated("court", 2023, 4, 1, "Family Court", text),
        ]
    }

    #[test]
    fn score_grows_with_chain_and_institutions() {
        assert!(laundering_score(0, 0).abs() < 1e-9);
        assert!(laundering_score(1, 1) < 0.6);
        assert!(laundering_score(2, 2) > 0.6);
        assert!(laundering_score(3, 3) > laundering_score(2, 2));
    }

    #[tokio::test]
    async fn markers_accumulate_in_date_order() {
        let mut c = ctx(EngineId::Compound, docs());
        c.options.insert("origins".into(), json!([origin()]));
        c.options.insert(
            "propagations".into(),
            json!([
                prop("court", "Family Court", 4),
                prop("sw", "Social Services", 2),
                prop("expert", "Independent Expert", 3)
            ]),
        );
        let out = CompoundEngine::new(0.6).analyze(&c).await.unwrap();
        let markers: Vec<AuthorityMarker> =
            serde_json::from_value(out["authority_markers"].clone()).unwrap();

        let docs: Vec<&str> = markers.iter().map(|m| m.authority_document_id.as_str()).collect();
        assert_eq!(docs, vec!["sw", "expert", "court"]);
        assert!(!markers[0].is_authority_laundering);
        assert!(markers[1].is_authority_laundering);
        assert_eq!(markers[2].authority_type, AuthorityType::CourtFinding);
        assert_eq!(markers[2].cumulative_authority_score, 3.0 + 4.0 + 5.0);
        assert_eq!(markers[2].laundering_path, vec!["police", "sw", "expert", "court"]);

        let findings = out["findings"].as_array().unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["severity"], json!("critical"));
    }

    #[tokio::test]
    async fn option_threshold_overrides_configured_one() {
        let mut c = ctx(EngineId::Compound, docs());
        c.options.insert("origins".into(), json!([origin()]));
        c.options
            .insert("propagations".into(), json!([prop("sw", "Social Services", 2)]));
        c.options.insert("laundering_threshold".into(), json!(0.3));
        let out = CompoundEngine::new(0.9).analyze(&c).await.unwrap();
        assert_eq!(out["authority_markers"][0]["is_authority_laundering"], json!(true));
    }
}
