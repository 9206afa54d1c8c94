//! Shared language between supposedly independent sources.
//!
//! Two documents from different institutions that carry the same sentence
//! without one citing the other are reported as an independence violation.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{cites, different_institutions, headline};
use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;
use crate::text;

/// Similarity at which two sentences count as the same wording.
const SHARED_WORDING: f64 = 0.85;

/// Shortest sentence, in content words, considered distinctive.
const MIN_DISTINCT_WORDS: usize = 5;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SharedPhrase {
    phrase: String,
    document_ids: Vec<String>,
    similarity: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndependenceViolation {
    document_ids: Vec<String>,
    institutions: Vec<Option<String>>,
    shared_phrases: usize,
    reason: String,
}

pub struct CoordinationEngine;

#[async_trait]
impl AnalysisEngine for CoordinationEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(2)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let documents = ctx.chronological();
        let mut shared_language = Vec::new();
        let mut violations = Vec::new();
        let mut findings = Vec::new();

        for (i, &a) in documents.iter().enumerate() {
            let a_sentences: Vec<&str> = a
                .sentences()
                .into_iter()
                .map(|s| s.text)
                .filter(|s| text::content_tokens(s).len() >= MIN_DISTINCT_WORDS)
                .collect();
            for &b in &documents[i + 1..] {
                let b_sentences = b.sentences();
                let mut pairs = Vec::new();
                for sa in &a_sentences {
                    if let Some((sb, score)) = b_sentences
                        .iter()
                        .map(|sb| (sb.text, text::similarity(sa, sb.text)))
                        .filter(|(_, score)| *score >= SHARED_WORDING)
                        .max_by(|x, y| x.1.total_cmp(&y.1))
                    {
                        pairs.push((*sa, sb));
                        shared_language.push(SharedPhrase {
                            phrase: sa.to_string(),
                            document_ids: vec![a.id.clone(), b.id.clone()],
                            similarity: score,
                        });
                    }
                }
                if pairs.is_empty() || !different_institutions(a, b) || cites(b, a) {
                    continue;
                }

                violations.push(IndependenceViolation {
                    document_ids: vec![a.id.clone(), b.id.clone()],
                    institutions: vec![a.institution.clone(), b.institution.clone()],
                    shared_phrases: pairs.len(),
                    reason: "Shared wording across institutions without attribution".to_string(),
                });
                let (first_a, first_b) = pairs[0];
                findings.push(json!({
                    "finding_type": "independence_violation",
                    "title": format!("Shared wording: {}", headline(first_a, 70)),
                    "description": format!(
                        "{} and {} share {} passage(s) of near-identical wording; neither attributes it.",
                        a.label(),
                        b.label(),
                        pairs.len()
                    ),
                    "severity": "high",
                    "confidence": 0.75,
                    "document_ids": [a.id, b.id],
                    "evidence": {
                        "source_passage": first_a,
                        "repeated_passage": first_b,
                    },
                    "contradiction_class": "unexplained_change",
                }));
            }
        }

        Ok(json!({
            "findings": findings,
            "sharedLanguage": shared_language,
            "independenceViolations": violations,
        }))
    }
}
