//! Date handling: references to events after a document was written, and the
//! same event given different dates in different documents.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Value, json};

use super::{claim_match, document_clauses, headline};
use crate::engine::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());

static DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{4})\b").unwrap()
});

static MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b").unwrap()
});

static SLASHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|i| i as u32 + 1)
}

/// Every calendar date written out in `text`. Day/month/year for slashed dates.
pub fn extract_dates(text: &str) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let num = |s: &str| s.parse::<u32>().ok();

    for caps in ISO_DATE.captures_iter(text) {
        if let (Ok(y), Some(m), Some(d)) = (caps[1].parse::<i32>(), num(&caps[2]), num(&caps[3]))
            && let Some(date) = NaiveDate::from_ymd_opt(y, m, d)
        {
            dates.push(date);
        }
    }
    for caps in DAY_MONTH_YEAR.captures_iter(text) {
        if let (Some(d), Some(m), Ok(y)) = (num(&caps[1]), month_number(&caps[2]), caps[3].parse())
            && let Some(date) = NaiveDate::from_ymd_opt(y, m, d)
        {
            dates.push(date);
        }
    }
    for caps in MONTH_DAY_YEAR.captures_iter(text) {
        if let (Some(m), Some(d), Ok(y)) = (month_number(&caps[1]), num(&caps[2]), caps[3].parse())
            && let Some(date) = NaiveDate::from_ymd_opt(y, m, d)
        {
            dates.push(date);
        }
    }
    for caps in SLASHED.captures_iter(text) {
        if let (Some(d), Some(m), Ok(y)) = (num(&caps[1]), num(&caps[2]), caps[3].parse())
            && let Some(date) = NaiveDate::from_ymd_opt(y, m, d)
        {
            dates.push(date);
        }
    }
    dates.sort();
    dates.dedup();
    dates
}

pub struct TemporalEngine;

#[async_trait]
impl AnalysisEngine for TemporalEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(1)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let documents = ctx.chronological();
        let mut findings = Vec::new();

        for doc in &documents {
            let Some(written) = doc.date else {
                continue;
            };
            for sentence in doc.sentences() {
                if let Some(later) = extract_dates(sentence.text).into_iter().find(|d| *d > written)
                {
                    findings.push(json!({
                        "finding_type": "anachronism",
                        "title": format!("Refers to a later date: {}", later),
                        "description": format!(
                            "{} is dated {} but refers to {}.",
                            doc.label(),
                            written,
                            later
                        ),
                        "severity": "high",
                        "confidence": 0.8,
                        "document_ids": [doc.id],
                        "evidence": { "statement": sentence.text },
                        "contradiction_class": "temporal",
                    }));
                }
            }
        }

        let clauses: Vec<_> = documents
            .iter()
            .flat_map(|d| document_clauses(d))
            .filter(|c| !extract_dates(c.sentence.text).is_empty())
            .collect();
        for (i, a) in clauses.iter().enumerate() {
            for b in &clauses[i + 1..] {
                if a.sentence.document_id == b.sentence.document_id
                    || claim_match(&a.tokens, &b.tokens).is_none()
                {
                    continue;
                }
                let dates_a = extract_dates(a.sentence.text);
                let dates_b = extract_dates(b.sentence.text);
                if dates_a.iter().any(|d| dates_b.contains(d)) {
                    continue;
                }
                findings.push(json!({
                    "finding_type": "date_conflict",
                    "title": format!("Same event, different dates: {}", headline(a.text, 60)),
                    "description": "Two documents describe the same event but date it differently.",
                    "severity": "medium",
                    "confidence": 0.65,
                    "document_ids": [a.sentence.document_id, b.sentence.document_id],
                    "evidence": {
                        "statement_a": a.sentence.text,
                        "statement_b": b.sentence.text,
                    },
                    "contradiction_class": "temporal",
                }));
            }
        }

        Ok(Value::Array(findings))
    }
}
