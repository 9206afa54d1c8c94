//! INHERIT: follow each claim origin through later documents.

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{best_match, cites, claim_tokens, different_institutions, headline, is_hedged};
use crate::document::Document;
use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;
use crate::sam::{ClaimOrigin, MutationType, PropagationRecord, PropagationType};
use crate::text;

/// Similarity above which an unattributed adoption counts as a paraphrase.
const PARAPHRASE_MATCH: f64 = 0.8;

pub struct InheritEngine;

fn propagation_type(
    target: &Document,
    adopted_sentence: &str,
    original: &str,
    similarity: f64,
    chain: &[&Document],
) -> PropagationType {
    if adopted_sentence.to_lowercase().contains(&original.to_lowercase()) {
        PropagationType::Verbatim
    } else if chain.iter().any(|earlier| cites(target, earlier)) {
        PropagationType::Citation
    } else if similarity >= PARAPHRASE_MATCH {
        PropagationType::Paraphrase
    } else {
        PropagationType::ImplicitAdoption
    }
}

fn mutation(origin_sentence: &str, adopted_sentence: &str) -> Option<MutationType> {
    if is_hedged(origin_sentence) && !is_hedged(adopted_sentence) {
        return Some(MutationType::CertaintyDrift);
    }
    let before = text::count_cues(origin_sentence, text::INTENSIFIERS);
    let after = text::count_cues(adopted_sentence, text::INTENSIFIERS);
    match after.cmp(&before) {
        std::cmp::Ordering::Greater => Some(MutationType::Amplification),
        std::cmp::Ordering::Less => Some(MutationType::Attenuation),
        std::cmp::Ordering::Equal => None,
    }
}

#[async_trait]
impl AnalysisEngine for InheritEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(1)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let origins: Vec<ClaimOrigin> = ctx.option("origins")?;
        let documents = ctx.chronological();

        let mut propagations = Vec::new();
        let mut findings = Vec::new();

        for origin in &origins {
            let Some(start) = documents
                .iter()
                .position(|d| d.id == origin.origin_document_id)
            else {
                continue;
            };
            let origin_doc = documents[start];
            let origin_sentence = origin
                .origin_context
                .as_deref()
                .unwrap_or(&origin.claim_text);
            let tokens = claim_tokens(&origin.claim_text);
            let mut chain: Vec<&Document> = vec![origin_doc];

            for &target in &documents[start + 1..] {
                let Some((clause, similarity)) = best_match(target, &tokens) else {
                    continue;
                };
                let source = chain[chain.len() - 1];
                let adopted_sentence = clause.sentence.text;
                let verified = text::contains_any(adopted_sentence, text::VERIFICATION);
                let mutation_type = mutation(origin_sentence, adopted_sentence);
                let record = PropagationRecord {
                    id: Uuid::new_v4().to_string(),
                    origin_id: origin.id.clone(),
                    source_document_id: source.id.clone(),
                    source_date: source.date,
                    target_document_id: target.id.clone(),
                    target_date: target.date,
                    propagation_type: propagation_type(
                        target,
                        adopted_sentence,
                        &origin.claim_text,
                        similarity,
                        &chain,
                    ),
                    verification_performed: verified,
                    crossed_institutional_boundary: different_institutions(source, target),
                    source_institution: source.institution.clone(),
                    target_institution: target.institution.clone(),
                    mutation_detected: mutation_type.is_some(),
                    mutation_type,
                    original_text: origin.claim_text.clone(),
                    mutated_text: clause.text.to_string(),
                    confidence: (0.5 + similarity / 2.0).min(1.0),
                };

                if !record.verification_performed
                    && (record.mutation_detected || record.crossed_institutional_boundary)
                {
                    let severity = if record.mutation_detected { "high" } else { "medium" };
                    let mut document_ids = vec![origin_doc.id.clone(), target.id.clone()];
                    if source.id != origin_doc.id {
                        document_ids.push(source.id.clone());
                    }
                    findings.push(json!({
                        "finding_type": "unverified_propagation",
                        "title": format!("Adopted without verification: {}", headline(&origin.claim_text, 70)),
                        "description": format!(
                            "{} repeats a claim first recorded in {} without checking it.",
                            target.label(),
                            origin_doc.label()
                        ),
                        "severity": severity,
                        "confidence": record.confidence,
                        "document_ids": document_ids,
                        "evidence": {
                            "origin_statement": origin_sentence,
                            "adopted_statement": adopted_sentence,
                        },
                        "origin_id": origin.id,
                        "propagation_id": record.id,
                        "mutation_type": record.mutation_type,
                    }));
                }
                propagations.push(record);
                chain.push(target);
            }
        }

        Ok(json!({ "propagations": propagations, "findings": findings }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineId;
    use crate::engine::builtin::test_support::{ctx, dated};
    use crate::sam::OriginType;

    fn origin() -> ClaimOrigin {
        ClaimOrigin {
            id: "o-1".into(),
            claim_id: "claim-1".into(),
            claim_text: "the father may have been drinking heavily on the night of the incident".into(),
            origin_document_id: "police".into(),
            origin_entity_id: None,
            origin_date: None,
            origin_page: Some(1),
            origin_context: Some(
                "A neighbour told officers that the father may have been drinking heavily on the night of the incident."
                    .into(),
            ),
            origin_type: OriginType::Hearsay,
            is_false_premise: true,
            false_premise_type: None,
            contradicting_evidence: None,
            contradicting_document_id: None,
            confidence_score: 0.7,
        }
    }

    fn docs() -> Vec<Document> {
        vec![
            dated(
                "police",
                2023,
                1,
                10,
                "Police",
                "A neighbour told officers that the father may have been drinking heavily on the night of the incident.",
            ),
            dated(
                "sw",
                2023,
                2,
                20,
                "Social Services",
                "The father has been drinking heavily and this presents a risk.",
            ),
            dated(
                "gp",
                2023,
                3,
                1,
                "Health",
                "We verified with the GP that the father has been drinking heavily.",
            ),
        ]
    }

    async fn run() -> Vec<PropagationRecord> {
        let mut c = ctx(EngineId::Inherit, docs());
        c.options.insert("origins".into(), json!([origin()]));
        let out = InheritEngine.analyze(&c).await.unwrap();
        serde_json::from_value(out["propagations"].clone()).unwrap()
    }

    #[tokio::test]
    async fn records_each_later_adoption_from_previous_link() {
        let props = run().await;
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].source_document_id, "police");
        assert_eq!(props[0].target_document_id, "sw");
        assert_eq!(props[1].source_document_id, "sw");
        assert!(props.iter().all(|p| p.crossed_institutional_boundary));
    }

    #[tokio::test]
    async fn hedged_origin_stated_plainly_is_certainty_drift() {
        let props = run().await;
        assert_eq!(props[0].mutation_type, Some(MutationType::CertaintyDrift));
        assert!(!props[0].verification_performed);
        assert_eq!(props[0].mutated_text, "The father has been drinking heavily");
    }

    #[tokio::test]
    async fn verification_cue_is_recorded() {
        let props = run().await;
        assert!(props[1].verification_performed);
    }

    #[tokio::test]
    async fn no_origins_means_no_propagations() {
        let out = InheritEngine
            .analyze(&ctx(EngineId::Inherit, docs()))
            .await
            .unwrap();
        assert_eq!(out["propagations"], json!([]));
    }
}
