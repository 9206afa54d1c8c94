//! Statements of the same claim that disagree in polarity or modality.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{claim_match, document_clauses, headline, is_hedged};
use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;
use crate::findings::ContradictionClass;
use crate::text;

pub struct ContradictionEngine;

#[async_trait]
impl AnalysisEngine for ContradictionEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(1)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let clauses: Vec<_> = ctx
            .chronological()
            .into_iter()
            .flat_map(document_clauses)
            .collect();

        let mut seen: Vec<(&str, &str)> = Vec::new();
        let mut findings = Vec::new();

        for (i, a) in clauses.iter().enumerate() {
            for b in &clauses[i + 1..] {
                if a.sentence.text == b.sentence.text
                    || seen.contains(&(a.sentence.text, b.sentence.text))
                {
                    continue;
                }
                let Some(similarity) = claim_match(&a.tokens, &b.tokens) else {
                    continue;
                };

                let negation_differs = text::contains_any(a.text, text::NEGATIONS)
                    != text::contains_any(b.text, text::NEGATIONS);
                let modality_differs = is_hedged(a.sentence.text) != is_hedged(b.sentence.text);
                let same_document = a.sentence.document_id == b.sentence.document_id;

                let (class, severity) = if negation_differs {
                    let class = if same_document {
                        ContradictionClass::Internal
                    } else {
                        ContradictionClass::CrossDocument
                    };
                    (class, "high")
                } else if modality_differs {
                    (ContradictionClass::ModalityShift, "medium")
                } else {
                    continue;
                };
                seen.push((a.sentence.text, b.sentence.text));

                let mut document_ids = vec![a.sentence.document_id.to_string()];
                if !same_document {
                    document_ids.push(b.sentence.document_id.to_string());
                }
                findings.push(json!({
                    "finding_type": "contradiction",
                    "title": format!("Conflicting accounts: {}", headline(a.text, 70)),
                    "description": match class {
                        ContradictionClass::ModalityShift => "A tentative statement is elsewhere made without qualification.".to_string(),
                        _ => "The same matter is both affirmed and denied.".to_string(),
                    },
                    "severity": severity,
                    "confidence": (0.5 + similarity / 2.0).min(1.0),
                    "document_ids": document_ids,
                    "evidence": {
                        "statement_a": a.sentence.text,
                        "statement_b": b.sentence.text,
                    },
                    "contradiction_class": class.as_str(),
                }));
            }
        }

        Ok(Value::Array(findings))
    }
}
