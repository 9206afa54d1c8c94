//! One-sided characterisation of a subject within a document.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;
use crate::text;

const ADVERSE: &[&str] = &[
    "evasive", "hostile", "aggressive", "uncooperative", "manipulative", "minimised",
    "minimized", "chaotic", "volatile", "deceitful", "neglectful", "dismissive",
];

const FAVOURABLE: &[&str] = &[
    "cooperative", "engaged", "appropriate", "adequate", "warm", "attentive", "consistent",
    "honest", "supportive", "protective", "calm",
];

/// Fewest loaded terms before a score is meaningful.
const MIN_TERMS: usize = 2;

/// Score magnitude at which a document is reported.
const REPORT_AT: f64 = 0.5;

/// Bias score in −1.0..=1.0: negative when adverse language dominates.
pub fn bias_score(adverse: usize, favourable: usize) -> f64 {
    let total = adverse + favourable;
    if total == 0 {
        return 0.0;
    }
    (favourable as f64 - adverse as f64) / total as f64
}

pub struct BiasEngine;

#[async_trait]
impl AnalysisEngine for BiasEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(1)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let mut findings = Vec::new();

        for doc in &ctx.documents {
            let sentences = doc.sentences();
            let adverse: usize = sentences
                .iter()
                .map(|s| text::count_cues(s.text, ADVERSE))
                .sum();
            let favourable: usize = sentences
                .iter()
                .map(|s| text::count_cues(s.text, FAVOURABLE))
                .sum();
            let score = bias_score(adverse, favourable);
            if adverse + favourable < MIN_TERMS || score.abs() < REPORT_AT {
                continue;
            }

            let lexicon = if score < 0.0 { ADVERSE } else { FAVOURABLE };
            let examples: Vec<&str> = sentences
                .iter()
                .map(|s| s.text)
                .filter(|s| text::contains_any(s, lexicon))
                .take(3)
                .collect();
            let direction = if score < 0.0 { "adverse" } else { "favourable" };
            findings.push(json!({
                "finding_type": "characterisation_bias",
                "title": format!("One-sided {} language in {}", direction, doc.label()),
                "description": format!(
                    "{} adverse and {} favourable characterisations.",
                    adverse, favourable
                ),
                "severity": if score.abs() >= 0.8 { "medium" } else { "low" },
                "confidence": 0.55,
                "document_ids": [doc.id],
                "evidence": { "examples": examples },
                "bias_score": score,
            }));
        }

        Ok(Value::Array(findings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineId;
    use crate::engine::builtin::test_support::{ctx, dated};

    #[test]
    fn score_is_bounded_and_signed() {
        assert_eq!(bias_score(0, 0), 0.0);
        assert_eq!(bias_score(3, 0), -1.0);
        assert_eq!(bias_score(0, 2), 1.0);
        assert!((bias_score(2, 1) + 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn adverse_language_is_scored() {
        let docs = vec![dated(
            "a",
            2023,
            1,
            1,
            "Police",
            "The mother was evasive throughout. She minimised every concern that was raised.",
        )];
        let out = BiasEngine.analyze(&ctx(EngineId::Bias, docs)).await.unwrap();
        assert_eq!(out[0]["bias_score"], json!(-1.0));
        assert_eq!(out[0]["evidence"]["examples"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn balanced_document_is_not_reported() {
        let docs = vec![dated(
            "a",
            2023,
            1,
            1,
            "Police",
            "The mother was evasive at first. Later she was calm and cooperative with staff.",
        )];
        let out = BiasEngine.analyze(&ctx(EngineId::Bias, docs)).await.unwrap();
        assert_eq!(out, json!([]));
    }
}
