//! Exculpatory statements dropped by documents that otherwise draw on the source.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{claim_match, document_clauses, headline};
use crate::document::Document;
use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;
use crate::text;

/// Cues that a statement cuts against a concern.
const EXCULPATORY: &[&str] = &[
    "no concerns", "no evidence", "no injuries", "no marks", "adequate", "appropriate",
    "unfounded", "unsubstantiated", "cooperative", "denied", "denies", "not",
];

pub struct OmissionEngine;

/// Whether `later` repeats at least one claim from `earlier`.
fn draws_on(earlier: &Document, later: &Document) -> bool {
    let theirs = document_clauses(later);
    document_clauses(earlier)
        .iter()
        .any(|a| theirs.iter().any(|b| claim_match(&a.tokens, &b.tokens).is_some()))
}

/// Whether `later` says anything about the same matter as `sentence`.
fn mentions(later: &Document, sentence: &str) -> bool {
    later
        .sentences()
        .iter()
        .any(|s| text::similarity(s.text, sentence) >= 0.5)
}

#[async_trait]
impl AnalysisEngine for OmissionEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(2)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let documents = ctx.chronological();
        let mut findings = Vec::new();

        for (i, &earlier) in documents.iter().enumerate() {
            let exculpatory: Vec<&str> = earlier
                .sentences()
                .into_iter()
                .map(|s| s.text)
                .filter(|s| text::contains_any(s, EXCULPATORY))
                .collect();
            if exculpatory.is_empty() {
                continue;
            }
            for &later in &documents[i + 1..] {
                if !draws_on(earlier, later) {
                    continue;
                }
                for sentence in exculpatory.iter().filter(|s| !mentions(later, s)) {
                    findings.push(json!({
                        "finding_type": "omission",
                        "title": format!("Omitted: {}", headline(sentence, 70)),
                        "description": format!(
                            "{} relies on {} but leaves out this statement.",
                            later.label(),
                            earlier.label()
                        ),
                        "severity": "medium",
                        "confidence": 0.6,
                        "document_ids": [earlier.id, later.id],
                        "evidence": { "omitted_statement": sentence },
                        "contradiction_class": "selective_citation",
                    }));
                }
            }
        }

        Ok(Value::Array(findings))
    }
}
