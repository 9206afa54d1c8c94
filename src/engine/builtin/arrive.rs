//! ARRIVE: link decisions and outcomes back to the claims they relied on.
//!
//! A link needs an explicit reference in the outcome document: either the
//! claim itself is stated in the same paragraph as the outcome, or the
//! outcome document cites a document that adopted the claim.

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{best_match, cites, claim_tokens, headline};
use crate::document::{Document, LocatedSentence};
use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;
use crate::sam::{
    AuthorityMarker, CausationChain, ClaimOrigin, HarmLevel, Outcome, PropagationRecord,
};
use crate::text;

/// Outcome cues grouped by the kind of decision they signal.
const OUTCOME_CUES: &[(&str, &[&str])] = &[
    (
        "child_removal",
        &["removed", "removal", "foster care", "placed in care", "care order", "custody"],
    ),
    ("criminal_sanction", &["convicted", "sentenced", "imprisonment", "charged"]),
    ("employment_sanction", &["dismissed", "suspended", "terminated"]),
    ("refusal", &["refused", "denied contact", "rejected"]),
    ("procedural_escalation", &["proceed to", "conference", "referred to", "supervision"]),
];

const CATASTROPHIC: &[&str] = &["death", "died", "permanent", "adoption", "imprisonment"];
const SEVERE: &[&str] = &[
    "removed", "removal", "foster care", "care order", "custody", "convicted", "dismissed",
];
const MODERATE: &[&str] = &["suspended", "refused", "supervision", "conference", "charged"];

pub struct ArriveEngine;

fn outcome_type(sentence: &str) -> Option<&'static str> {
    OUTCOME_CUES
        .iter()
        .find(|(_, cues)| text::contains_any(sentence, cues))
        .map(|(kind, _)| *kind)
}

fn harm_level(sentence: &str) -> HarmLevel {
    if text::contains_any(sentence, CATASTROPHIC) {
        HarmLevel::Catastrophic
    } else if text::contains_any(sentence, SEVERE) {
        HarmLevel::Severe
    } else if text::contains_any(sentence, MODERATE) {
        HarmLevel::Moderate
    } else {
        HarmLevel::Minor
    }
}

fn severity_for(harm: HarmLevel) -> &'static str {
    match harm {
        HarmLevel::Catastrophic => "critical",
        HarmLevel::Severe => "high",
        HarmLevel::Moderate => "medium",
        HarmLevel::Minor => "low",
    }
}

/// How an outcome references a claim.
enum Link<'a> {
    /// The claim is stated next to the outcome.
    Quotation(LocatedSentence<'a>),
    /// The outcome document cites an adopter of the claim.
    Citation(&'a Document),
}

fn find_link<'a>(
    outcome_doc: &'a Document,
    outcome: &LocatedSentence<'a>,
    origin: &ClaimOrigin,
    adopters: &[&'a Document],
) -> Option<Link<'a>> {
    let tokens = claim_tokens(&origin.claim_text);
    if let Some((clause, _)) = best_match(outcome_doc, &tokens)
        && clause.sentence.page == outcome.page
        && clause.sentence.paragraph == outcome.paragraph
    {
        return Some(Link::Quotation(clause.sentence));
    }
    adopters
        .iter()
        .copied()
        .find(|adopter| cites(outcome_doc, adopter))
        .map(Link::Citation)
}

#[async_trait]
impl AnalysisEngine for ArriveEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(1)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let origins: Vec<ClaimOrigin> = ctx.option("origins")?;
        let propagations: Vec<PropagationRecord> = ctx.option("propagations")?;
        let markers: Vec<AuthorityMarker> = ctx.option("authority_markers")?;

        let mut outcomes = Vec::new();
        let mut chains = Vec::new();
        let mut findings = Vec::new();

        for doc in ctx.chronological() {
            for sentence in doc.sentences() {
                let Some(kind) = outcome_type(sentence.text) else {
                    continue;
                };
                let harm = harm_level(sentence.text);

                for origin in &origins {
                    let mut adopter_ids: Vec<&str> = propagations
                        .iter()
                        .filter(|p| p.origin_id == origin.id)
                        .map(|p| p.target_document_id.as_str())
                        .collect();
                    adopter_ids.push(&origin.origin_document_id);
                    let adopters: Vec<&Document> = adopter_ids
                        .iter()
                        .filter_map(|id| ctx.document(id))
                        .filter(|d| d.id != doc.id)
                        .collect();

                    let Some(link) = find_link(doc, &sentence, origin, &adopters) else {
                        continue;
                    };
                    let (reference_text, cited_doc, confidence) = match link {
                        Link::Quotation(s) => (s.text.to_string(), None, 0.8),
                        Link::Citation(d) => (
                            d.title.clone().unwrap_or_else(|| d.id.clone()),
                            Some(d),
                            0.6,
                        ),
                    };

                    let outcome = Outcome {
                        id: Uuid::new_v4().to_string(),
                        origin_id: origin.id.clone(),
                        outcome_type: kind.to_string(),
                        outcome_description: sentence.text.to_string(),
                        outcome_date: doc.date,
                        outcome_document_id: doc.id.clone(),
                        harm_level: harm,
                        reference_text: reference_text.clone(),
                        but_for_analysis: format!(
                            "{} relies on \"{}\", first recorded in {}; without that claim the stated basis for the decision falls away.",
                            doc.label(),
                            origin.claim_text,
                            origin.origin_document_id
                        ),
                        causation_confidence: confidence,
                        remediation_possible: harm != HarmLevel::Catastrophic,
                    };

                    let before_outcome = |date: Option<chrono::NaiveDate>| match (date, doc.date) {
                        (Some(d), Some(o)) => d <= o,
                        _ => true,
                    };
                    let chain = CausationChain {
                        id: Uuid::new_v4().to_string(),
                        outcome_id: outcome.id.clone(),
                        origin_id: origin.id.clone(),
                        propagation_ids: propagations
                            .iter()
                            .filter(|p| p.origin_id == origin.id && before_outcome(p.target_date))
                            .map(|p| p.id.clone())
                            .collect(),
                        authority_marker_ids: markers
                            .iter()
                            .filter(|m| m.origin_id == origin.id && before_outcome(m.authority_date))
                            .map(|m| m.id.clone())
                            .collect(),
                    };

                    let mut document_ids = vec![doc.id.clone(), origin.origin_document_id.clone()];
                    let mut evidence = json!({
                        "outcome": sentence.text,
                        "claim": origin.origin_context.as_deref().unwrap_or(&origin.claim_text),
                    });
                    match cited_doc {
                        Some(cited) => {
                            if !document_ids.contains(&cited.id) {
                                document_ids.push(cited.id.clone());
                            }
                        }
                        None => evidence["reference"] = json!(reference_text),
                    }
                    findings.push(json!({
                        "finding_type": "causal_link",
                        "title": format!("Outcome relies on: {}", headline(&origin.claim_text, 70)),
                        "description": outcome.but_for_analysis,
                        "severity": severity_for(harm),
                        "confidence": confidence,
                        "document_ids": document_ids,
                        "evidence": evidence,
                        "origin_id": origin.id,
                        "outcome_id": outcome.id,
                        "harm_level": harm,
                    }));
                    outcomes.push(outcome);
                    chains.push(chain);
                }
            }
        }

        Ok(json!({
            "outcomes": outcomes,
            "causation_chains": chains,
            "findings": findings,
        }))
    }
}
