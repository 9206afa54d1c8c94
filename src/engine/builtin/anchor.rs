//! ANCHOR: trace each recurring claim to its earliest occurrence.

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{Clause, claim_match, claim_tokens, document_clauses, headline, is_hedged};
use crate::document::Document;
use crate::engine::{AnalysisEngine, EngineContext, EngineId, InputRequirements};
use crate::errors::EngineError;
use crate::sam::{ClaimOrigin, FalsePremiseType, OriginType};
use crate::text;

pub struct AnchorEngine;

/// A claim and every place it was stated, in chronological order.
struct ClaimCluster<'a> {
    origin_doc: &'a Document,
    origin: Clause<'a>,
    occurrences: Vec<(&'a Document, Clause<'a>)>,
}

impl ClaimCluster<'_> {
    fn distinct_documents(&self) -> usize {
        let mut ids: Vec<&str> = self.occurrences.iter().map(|(d, _)| d.id.as_str()).collect();
        ids.push(&self.origin_doc.id);
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

/// How the origin sentence frames its claim.
fn origin_type(sentence: &str) -> OriginType {
    if text::contains_any(sentence, text::HEARSAY) {
        OriginType::Hearsay
    } else if text::contains_any(sentence, text::HEDGES) {
        OriginType::Speculation
    } else if text::contains_any(sentence, text::OPINION) {
        OriginType::ProfessionalOpinion
    } else {
        OriginType::PrimarySource
    }
}

fn cluster<'a>(documents: &[&'a Document]) -> Vec<ClaimCluster<'a>> {
    let mut clusters: Vec<ClaimCluster<'a>> = Vec::new();
    for &doc in documents {
        for clause in document_clauses(doc) {
            match clusters
                .iter_mut()
                .find(|c| claim_match(&c.origin.tokens, &clause.tokens).is_some())
            {
                Some(existing) => existing.occurrences.push((doc, clause)),
                None => clusters.push(ClaimCluster {
                    origin_doc: doc,
                    origin: clause,
                    occurrences: Vec::new(),
                }),
            }
        }
    }
    clusters
}

/// A clause elsewhere that states the claim with the opposite polarity.
fn contradiction<'a>(
    cluster: &ClaimCluster<'a>,
    documents: &[&'a Document],
) -> Option<(&'a Document, Clause<'a>)> {
    let negated = text::contains_any(cluster.origin.text, text::NEGATIONS);
    documents.iter().copied().find_map(|doc| {
        document_clauses(doc)
            .into_iter()
            .filter(|c| c.sentence.text != cluster.origin.sentence.text)
            .find(|c| {
                claim_match(&cluster.origin.tokens, &c.tokens).is_some()
                    && text::contains_any(c.text, text::NEGATIONS) != negated
            })
            .map(|c| (doc, c))
    })
}

#[async_trait]
impl AnalysisEngine for AnchorEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(1)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let focus: Vec<String> = ctx.option("focus_claims")?;
        let focus_tokens: Vec<_> = focus.iter().map(|f| claim_tokens(f)).collect();
        let documents = ctx.chronological();

        let mut origins = Vec::new();
        let mut findings = Vec::new();

        for cluster in cluster(&documents) {
            let selected = if focus_tokens.is_empty() {
                cluster.distinct_documents() >= 2
            } else {
                focus_tokens.iter().any(|f| {
                    claim_match(f, &cluster.origin.tokens).is_some()
                        || (f.len() >= 2 && f.is_subset(&cluster.origin.tokens))
                })
            };
            if !selected {
                continue;
            }

            let origin_sentence = cluster.origin.sentence.text;
            let kind = origin_type(origin_sentence);
            let contradicted = contradiction(&cluster, &documents);
            let restated = cluster
                .occurrences
                .iter()
                .find(|(d, c)| d.id != cluster.origin_doc.id && !is_hedged(c.sentence.text));

            let (premise_type, other) = match (&contradicted, restated) {
                (Some((doc, clause)), _) => (Some(FalsePremiseType::FactualError), Some((*doc, clause))),
                (None, Some((doc, clause)))
                    if matches!(kind, OriginType::Hearsay | OriginType::Speculation) =>
                {
                    (Some(FalsePremiseType::SpeculationAsFact), Some((*doc, clause)))
                }
                _ => (None, None),
            };

            let confidence = (0.5 + 0.1 * cluster.distinct_documents() as f64).min(0.95);
            let origin = ClaimOrigin {
                id: Uuid::new_v4().to_string(),
                claim_id: format!("claim-{}", origins.len() + 1),
                claim_text: cluster.origin.text.to_string(),
                origin_document_id: cluster.origin_doc.id.clone(),
                origin_entity_id: cluster
                    .origin_doc
                    .author
                    .clone()
                    .or_else(|| cluster.origin_doc.institution.clone()),
                origin_date: cluster.origin_doc.date,
                origin_page: Some(cluster.origin.sentence.page),
                origin_context: Some(origin_sentence.to_string()),
                origin_type: kind,
                is_false_premise: premise_type.is_some(),
                false_premise_type: premise_type,
                contradicting_evidence: contradicted
                    .as_ref()
                    .map(|(_, c)| c.sentence.text.to_string()),
                contradicting_document_id: contradicted.as_ref().map(|(d, _)| d.id.clone()),
                confidence_score: confidence,
            };

            if let (Some(premise_type), Some((other_doc, other_clause))) = (premise_type, other) {
                let (severity, description, evidence_key) = match premise_type {
                    FalsePremiseType::FactualError => (
                        "critical",
                        format!(
                            "{} first states a claim that {} contradicts.",
                            cluster.origin_doc.label(),
                            other_doc.label()
                        ),
                        "contradicting_evidence",
                    ),
                    _ => (
                        "high",
                        format!(
                            "{} records the claim tentatively; {} restates it as fact.",
                            cluster.origin_doc.label(),
                            other_doc.label()
                        ),
                        "restated_as_fact",
                    ),
                };
                let mut document_ids = vec![cluster.origin_doc.id.clone()];
                if other_doc.id != cluster.origin_doc.id {
                    document_ids.push(other_doc.id.clone());
                }
                findings.push(json!({
                    "finding_type": "false_premise",
                    "title": format!("False premise: {}", headline(cluster.origin.text, 80)),
                    "description": description,
                    "severity": severity,
                    "confidence": confidence,
                    "document_ids": document_ids,
                    "evidence": {
                        "origin_statement": origin_sentence,
                        evidence_key: other_clause.sentence.text,
                    },
                    "origin_id": origin.id,
                    "claim_id": origin.claim_id,
                    "false_premise_type": premise_type,
                }));
            }
            origins.push(origin);
        }

        Ok(json!({ "origins": origins, "findings": findings }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::builtin::test_support::{ctx, dated};

    fn chain() -> Vec<Document> {
        vec![
            dated(
                "report",
                2023,
                3,
                1,
                "Agency",
                "The father has been drinking heavily. Home conditions were adequate today.",
            ),
            dated(
                "note",
                2023,
                1,
                10,
                "Police",
                "A neighbour told officers that the father may have been drinking heavily on the night of the incident.",
            ),
        ]
    }

    #[tokio::test]
    async fn earliest_document_is_the_origin() {
        let out = AnchorEngine
            .analyze(&ctx(EngineId::Anchor, chain()))
            .await
            .unwrap();
        let origins: Vec<ClaimOrigin> = serde_json::from_value(out["origins"].clone()).unwrap();
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0].origin_document_id, "note");
        assert_eq!(origins[0].origin_type, OriginType::Hearsay);
    }

    #[tokio::test]
    async fn hearsay_restated_as_fact_is_a_false_premise() {
        let out = AnchorEngine
            .analyze(&ctx(EngineId::Anchor, chain()))
            .await
            .unwrap();
        let origins: Vec<ClaimOrigin> = serde_json::from_value(out["origins"].clone()).unwrap();
        assert!(origins[0].is_false_premise);
        assert_eq!(
            origins[0].false_premise_type,
            Some(FalsePremiseType::SpeculationAsFact)
        );
        let findings = out["findings"].as_array().unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["origin_id"], json!(origins[0].id));
    }

    #[tokio::test]
    async fn negated_restatement_marks_factual_error() {
        let docs = vec![
            dated("a", 2023, 1, 1, "Police", "The child attended school every day last term."),
            dated("b", 2023, 2, 1, "School", "The child did not attend school every day last term."),
        ];
        let out = AnchorEngine.analyze(&ctx(EngineId::Anchor, docs)).await.unwrap();
        let origins: Vec<ClaimOrigin> = serde_json::from_value(out["origins"].clone()).unwrap();
        assert_eq!(origins[0].false_premise_type, Some(FalsePremiseType::FactualError));
        assert_eq!(origins[0].contradicting_document_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn focus_claims_select_single_document_claims() {
        let docs = vec![dated(
            "a",
            2023,
            1,
            1,
            "Police",
            "The mother missed three contact sessions. The weather was cold and wet.",
        )];
        let mut c = ctx(EngineId::Anchor, docs);
        c.options
            .insert("focus_claims".into(), json!(["mother missed contact sessions"]));
        let out = AnchorEngine.analyze(&c).await.unwrap();
        let origins: Vec<ClaimOrigin> = serde_json::from_value(out["origins"].clone()).unwrap();
        assert_eq!(origins.len(), 1);
        assert!(!origins[0].is_false_premise);
    }
}
