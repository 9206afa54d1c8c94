//! Evidentiary audit trails for findings.
//!
//! A trail is a DAG of steps from source documents to the finding they
//! support: claim origin → propagation → authority accumulation → outcome →
//! finding. Every step carries at least one citation re-located in its
//! source document.

pub mod builder;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Citation;

pub use builder::AuditTrailBuilder;

/// Default longest quote kept on a step.
pub const DEFAULT_MAX_QUOTE_CHARS: usize = 500;

/// Appended to a shortened quote.
pub const TRUNCATION_MARKER: &str = " [...truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    SourceDocument,
    ClaimOrigin,
    Propagation,
    AuthorityAccumulation,
    Outcome,
    Finding,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SourceDocument => "source_document",
            Self::ClaimOrigin => "claim_origin",
            Self::Propagation => "propagation",
            Self::AuthorityAccumulation => "authority_accumulation",
            Self::Outcome => "outcome",
            Self::Finding => "finding",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrailStep {
    pub id: String,
    pub step_type: StepType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub document_ids: Vec<String>,
    /// Records this step stands for (origin, propagation, marker or outcome ids).
    pub entity_ids: Vec<String>,
    pub engine_id: Option<String>,
    pub confidence: f64,
    /// Primary citation's quote, shortened to the configured maximum.
    pub quote: String,
    pub citations: Vec<Citation>,
    pub predecessors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrail {
    pub finding_id: String,
    pub run_id: Option<String>,
    pub steps: Vec<AuditTrailStep>,
    /// Minimum of the step confidences.
    pub confidence: f64,
    /// SHA-256 of every cited document's text, keyed by document id.
    #[serde(default)]
    pub document_fingerprints: BTreeMap<String, String>,
    pub generated_at: DateTime<Utc>,
}

impl AuditTrail {
    pub fn step(&self, id: &str) -> Option<&AuditTrailStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn steps_of(&self, step_type: StepType) -> Vec<&AuditTrailStep> {
        self.steps.iter().filter(|s| s.step_type == step_type).collect()
    }

    /// Plain-text rendering, one line per step.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "Audit trail for finding {} (confidence {:.2})\n",
            self.finding_id, self.confidence
        );
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!(
                "{:>2}. [{}] {} ({:.2})\n",
                i + 1,
                step.step_type,
                step.description,
                step.confidence
            ));
            if let Some(citation) = step.citations.first() {
                out.push_str(&format!("    \"{}\" {}\n", step.quote, citation.reference()));
            }
        }
        for (document_id, sha256) in &self.document_fingerprints {
            out.push_str(&format!("    sha256 {} {}\n", document_id, sha256));
        }
        out
    }
}

/// Shorten `quote` to at most `max_chars` characters plus [`TRUNCATION_MARKER`].
///
/// The cut never lands inside a bracketed or parenthesised reference such
/// as `[p. 12]` or `(Doc 3, p. 4)`: an unclosed opener before the cut point
/// moves the cut in front of it, or past its closer when the quote starts
/// with the reference.
pub fn truncate_quote(quote: &str, max_chars: usize) -> String {
    if quote.chars().count() <= max_chars {
        return quote.to_string();
    }
    let mut cut = quote
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(quote.len());

    let mut open: Vec<usize> = Vec::new();
    for (i, c) in quote[..cut].char_indices() {
        match c {
            '[' | '(' => open.push(i),
            ']' | ')' => {
                open.pop();
            }
            _ => {}
        }
    }
    if let Some(&outermost) = open.first() {
        if quote[..outermost].trim().is_empty() {
            // leading reference: keep it whole
            if let Some(end) = closing_index(quote, outermost) {
                cut = end;
            }
        } else {
            cut = outermost;
        }
    }
    if cut >= quote.len() {
        return quote.to_string();
    }

    format!("{}{}", quote[..cut].trim_end(), TRUNCATION_MARKER)
}

/// Byte index just past the bracket closing the one opened at `start`.
fn closing_index(quote: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in quote[start..].char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
