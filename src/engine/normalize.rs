//! Normalization of raw engine output into validated findings.
//!
//! Engines answer in one of three shapes, decoded in this priority order:
//!
//! 1. an array: every element is a finding-like object
//! 2. an object with a `findings` array: the array is decoded as in (1) and
//!    every other key becomes part of the response summary
//! 3. any other object: wrapped as a single finding
//!
//! Engine-supplied finding ids are prefixed with the engine id and made
//! unique within one output.
//!
//! Missing fields get defaults (severity `medium` for array items and `info`
//! for a wrapped object, confidence `0.5`, no document ids). Citations are
//! resolved by locating quoted evidence in the finding's documents. Findings
//! that end up without a document reference or a citation are dropped.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use super::protocol::RESERVED_KEYS;
use crate::document::{Citation, Document};
use crate::findings::{ContradictionRecord, Finding, Severity, clamp_confidence};

/// Shortest evidence string considered a quote.
const MIN_QUOTE_CHARS: usize = 8;

/// Keys consumed into typed finding fields; every other key goes to metadata.
const KNOWN_KEYS: &[&str] = &[
    "id",
    "finding_type",
    "type",
    "title",
    "description",
    "severity",
    "confidence",
    "document_ids",
    "documentIds",
    "document_id",
    "evidence",
    "metadata",
    "citations",
    "quote",
];

/// Decoded shape of an engine's raw output.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEngineOutput {
    Items(Vec<Value>),
    WithFindings {
        findings: Vec<Value>,
        summary: Map<String, Value>,
    },
    Single(Map<String, Value>),
    Empty,
}

impl RawEngineOutput {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Items(items),
            Value::Object(mut map) => match map.remove("findings") {
                Some(Value::Array(findings)) => Self::WithFindings {
                    findings,
                    summary: map,
                },
                Some(other) => {
                    map.insert("findings".to_string(), other);
                    Self::Single(map)
                }
                None => Self::Single(map),
            },
            _ => Self::Empty,
        }
    }
}

/// Result of normalizing one engine output.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub findings: Vec<Finding>,
    pub summary: Map<String, Value>,
    pub rejected: usize,
}

/// Normalize `raw` from `engine_id` against the documents it analysed.
pub fn normalize(engine_id: &str, raw: Value, documents: &[Document]) -> Normalized {
    let (items, default_severity, summary) = match RawEngineOutput::classify(raw) {
        RawEngineOutput::Items(items) => (items, Severity::Medium, Map::new()),
        RawEngineOutput::WithFindings {
            findings,
            mut summary,
        } => {
            for key in RESERVED_KEYS {
                if summary.remove(*key).is_some() {
                    warn!(engine = engine_id, key = *key, "Ignoring reserved summary key");
                }
            }
            (findings, Severity::Medium, summary)
        }
        RawEngineOutput::Single(map) => (vec![Value::Object(map)], Severity::Info, Map::new()),
        RawEngineOutput::Empty => (Vec::new(), Severity::Medium, Map::new()),
    };

    let mut normalized = Normalized {
        summary,
        ..Default::default()
    };
    let mut seen = HashSet::new();
    for item in items {
        let Some(mut finding) = finding_from_value(engine_id, item, default_severity, documents)
        else {
            normalized.rejected += 1;
            warn!(engine = engine_id, "Dropping non-object finding");
            continue;
        };
        if !seen.insert(finding.id.clone()) {
            let fresh = Uuid::new_v4().to_string();
            warn!(engine = engine_id, finding = %finding.id, replacement = %fresh, "Duplicate finding id");
            finding.id = fresh;
            seen.insert(finding.id.clone());
        }
        match finding.validate() {
            Ok(()) => normalized.findings.push(finding),
            Err(e) => {
                normalized.rejected += 1;
                warn!(engine = engine_id, finding = %finding.id, error = %e, "Dropping finding");
            }
        }
    }
    normalized
}

/// Convert one finding-like JSON object. Returns `None` for non-objects.
pub fn finding_from_value(
    engine_id: &str,
    value: Value,
    default_severity: Severity,
    documents: &[Document],
) -> Option<Finding> {
    let Value::Object(map) = value else {
        return None;
    };

    let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

    let document_ids = document_ids_of(&map);
    let severity = text("severity")
        .and_then(|s| s.parse().ok())
        .unwrap_or(default_severity);
    let confidence = map
        .get("confidence")
        .and_then(Value::as_f64)
        .map(clamp_confidence)
        .unwrap_or(0.5);
    let evidence = map.get("evidence").cloned().unwrap_or(Value::Null);

    let class = text("contradiction_class")
        .or_else(|| text("contradiction_type"))
        .or_else(|| text("class"));
    let bias = map
        .get("bias_score")
        .or_else(|| map.get("biasScore"))
        .and_then(Value::as_f64);
    let contradiction = ContradictionRecord::from_raw(class.as_deref(), bias);

    let mut metadata = match map.get("metadata") {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    };
    for (key, value) in &map {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            metadata.insert(key.clone(), value.clone());
        }
    }

    let mut finding = Finding {
        id: text("id")
            .map(|id| scoped_id(engine_id, &id))
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        engine_id: engine_id.to_string(),
        finding_type: text("finding_type")
            .or_else(|| text("type"))
            .unwrap_or_else(|| format!("{}_finding", engine_id)),
        title: text("title").unwrap_or_else(|| engine_id.to_string()),
        description: text("description").unwrap_or_default(),
        severity,
        confidence,
        document_ids,
        evidence,
        metadata: if metadata.is_empty() {
            Value::Null
        } else {
            Value::Object(metadata)
        },
        citations: Vec::new(),
        contradiction,
        phase: None,
        run_id: None,
        created_at: chrono::Utc::now(),
    };

    let cited_docs: Vec<&Document> = documents
        .iter()
        .filter(|d| finding.document_ids.contains(&d.id))
        .collect();
    finding.citations = resolve_citations(&map, &finding.evidence, &cited_docs);
    Some(finding)
}

/// Engine-supplied ids are only unique per engine; prefix them with the
/// engine id unless already prefixed.
fn scoped_id(engine_id: &str, id: &str) -> String {
    if id
        .strip_prefix(engine_id)
        .is_some_and(|rest| rest.starts_with(':'))
    {
        id.to_string()
    } else {
        format!("{}:{}", engine_id, id)
    }
}

fn document_ids_of(map: &Map<String, Value>) -> Vec<String> {
    let mut ids: Vec<String> = map
        .get("document_ids")
        .or_else(|| map.get("documentIds"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(single) = map.get("document_id").and_then(Value::as_str)
        && !ids.iter().any(|id| id == single)
    {
        ids.push(single.to_string());
    }
    ids
}

/// Citations from explicit `citations` entries and quoted evidence, each
/// re-located in the referenced documents.
fn resolve_citations(
    map: &Map<String, Value>,
    evidence: &Value,
    documents: &[&Document],
) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    let mut push = |c: Citation| {
        if !citations.contains(&c) {
            citations.push(c);
        }
    };

    if let Some(explicit) = map.get("citations").and_then(Value::as_array) {
        for entry in explicit {
            let doc_id = entry.get("document_id").and_then(Value::as_str);
            let quote = entry.get("quote").and_then(Value::as_str);
            if let (Some(doc_id), Some(quote)) = (doc_id, quote)
                && let Some(doc) = documents.iter().find(|d| d.id == doc_id)
                && let Some(c) = doc.locate(quote)
            {
                push(c);
            }
        }
    }

    let mut quotes = Vec::new();
    if let Some(q) = map.get("quote") {
        collect_quotes(q, &mut quotes);
    }
    collect_quotes(evidence, &mut quotes);
    for quote in quotes {
        for doc in documents {
            if let Some(c) = doc.locate(quote) {
                push(c);
                break;
            }
        }
    }
    citations
}

fn collect_quotes<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) if s.trim().chars().count() >= MIN_QUOTE_CHARS => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_quotes(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_quotes(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("d1", "c", "The incident took place on the 15th of March."),
            Document::new("d2", "c", "As recorded on March 17th, the incident was reported."),
        ]
    }

    #[test]
    fn classifies_the_three_shapes() {
        assert!(matches!(
            RawEngineOutput::classify(json!([{}])),
            RawEngineOutput::Items(_)
        ));
        match RawEngineOutput::classify(json!({"findings": [], "sharedLanguage": []})) {
            RawEngineOutput::WithFindings { summary, .. } => {
                assert!(summary.contains_key("sharedLanguage"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            RawEngineOutput::classify(json!({"title": "x"})),
            RawEngineOutput::Single(_)
        ));
        assert_eq!(RawEngineOutput::classify(json!(42)), RawEngineOutput::Empty);
    }

    #[test]
    fn array_items_default_to_medium_and_resolve_citations() {
        let raw = json!([{
            "title": "Date discrepancy",
            "document_ids": ["d1", "d2"],
            "evidence": {
                "doc_a_excerpt": "took place on the 15th of March",
                "doc_b_excerpt": "As recorded on March 17th"
            }
        }]);
        let out = normalize("contradiction", raw, &docs());
        assert_eq!(out.rejected, 0);
        let finding = &out.findings[0];
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.confidence, 0.5);
        assert_eq!(finding.finding_type, "contradiction_finding");
        assert_eq!(finding.citations.len(), 2);
    }

    #[test]
    fn wrapped_object_defaults_to_info() {
        let raw = json!({
            "title": "Single",
            "document_id": "d1",
            "quote": "The incident took place"
        });
        let out = normalize("temporal", raw, &docs());
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].severity, Severity::Info);
        assert_eq!(out.findings[0].title, "Single");
    }

    #[test]
    fn findings_without_document_reference_are_rejected() {
        let raw = json!({"findings": [
            {"title": "no docs", "evidence": {"q": "The incident took place"}},
            {"title": "ok", "document_ids": ["d1"], "evidence": {"q": "The incident took place"}}
        ], "note": "kept"});
        let out = normalize("omission", raw, &docs());
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.rejected, 1);
        assert_eq!(out.summary["note"], json!("kept"));
    }

    #[test]
    fn reserved_keys_are_stripped_from_summary() {
        let raw = json!({
            "findings": [],
            "success": false,
            "duration_ms": 999_999,
            "error": "engine-side note",
            "sharedLanguage": []
        });
        let out = normalize("coordination", raw, &docs());
        assert!(!out.summary.contains_key("success"));
        assert!(!out.summary.contains_key("duration_ms"));
        assert!(!out.summary.contains_key("error"));
        assert!(out.summary.contains_key("sharedLanguage"));
    }

    #[test]
    fn unresolvable_quotes_do_not_become_citations() {
        let raw = json!([{
            "title": "invented",
            "document_ids": ["d1"],
            "evidence": {"quote": "The incident never happened at all"}
        }]);
        let out = normalize("contradiction", raw, &docs());
        assert!(out.findings.is_empty());
        assert_eq!(out.rejected, 1);
    }

    #[test]
    fn explicit_citations_are_relocated() {
        let raw = json!([{
            "title": "cited",
            "document_ids": ["d2"],
            "citations": [{"document_id": "d2", "page": 40, "paragraph": 7, "quote": "the incident was reported"}]
        }]);
        let out = normalize("contradiction", raw, &docs());
        let c = &out.findings[0].citations[0];
        assert_eq!((c.page, c.paragraph), (1, 1));
    }

    #[test]
    fn contradiction_taxonomy_passes_through_untouched() {
        let raw = json!([
            {"title": "a", "document_ids": ["d1"], "quote": "The incident took place",
             "contradiction_class": "temporal", "bias_score": -0.25},
            {"title": "b", "document_ids": ["d1"], "quote": "The incident took place",
             "contradiction_class": "made_up", "bias_score": 4.0}
        ]);
        let out = normalize("contradiction", raw, &docs());
        let first = out.findings[0].contradiction.unwrap();
        assert_eq!(first.class, Some(crate::findings::ContradictionClass::Temporal));
        assert_eq!(first.bias_score, Some(-0.25));

        let second = &out.findings[1];
        assert!(second.contradiction.is_none());
        assert_eq!(second.metadata["contradiction_class"], json!("made_up"));
        assert_eq!(second.metadata["bias_score"], json!(4.0));
    }

    #[test]
    fn engine_ids_are_scoped_and_deduplicated() {
        let item = |title: &str| {
            json!({"id": "1", "title": title, "document_ids": ["d1"], "quote": "The incident took place"})
        };
        let out = normalize("bias", json!([item("a"), item("b")]), &docs());
        assert_eq!(out.findings.len(), 2);
        assert_eq!(out.findings[0].id, "bias:1");
        assert_ne!(out.findings[1].id, "bias:1");

        let already = json!([{"id": "bias:7", "document_ids": ["d1"], "quote": "The incident took place"}]);
        assert_eq!(normalize("bias", already, &docs()).findings[0].id, "bias:7");
    }

    #[test]
    fn non_object_items_are_counted_as_rejected() {
        let out = normalize("bias", json!(["just a string"]), &docs());
        assert!(out.findings.is_empty());
        assert_eq!(out.rejected, 1);
    }
}
