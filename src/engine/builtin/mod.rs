//! Deterministic lexical reference engines.
//!
//! These make the pipeline runnable end to end without an external model.
//! Each is a plain [`AnalysisEngine`] and can be replaced in the registry or
//! bound to an external process through configuration.
//!
//! Claims are compared clause by clause: a sentence is split on coordinating
//! and reporting connectives, and two clauses express the same claim when
//! their content words (less hedges, attributions and intensifiers) overlap
//! strongly enough.

mod anchor;
mod arrive;
mod bias;
mod compound;
mod contradiction;
mod coordination;
mod inherit;
mod omission;
mod temporal;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::document::{Document, LocatedSentence};
use crate::sam::AuthorityType;
use crate::text;

use super::{AnalysisEngine, EngineId};

pub use anchor::AnchorEngine;
pub use arrive::ArriveEngine;
pub use bias::BiasEngine;
pub use compound::CompoundEngine;
pub use contradiction::ContradictionEngine;
pub use coordination::CoordinationEngine;
pub use inherit::InheritEngine;
pub use omission::OmissionEngine;
pub use temporal::TemporalEngine;

/// Default laundering threshold for COMPOUND.
pub const DEFAULT_LAUNDERING_THRESHOLD: f64 = 0.6;

/// Minimum Jaccard similarity for two clauses to state the same claim.
const CLAIM_MATCH: f64 = 0.55;

/// Minimum shared content words for two clauses to state the same claim.
const CLAIM_MIN_SHARED: usize = 3;

/// Connectives a sentence is split on into claim clauses.
const CLAUSE_SEPARATORS: &[&str] = &[" and ", "; ", ", which ", " that ", ": ", ", but ", " but "];

/// Reporting verbs ignored when comparing claims.
const REPORTING: &[&str] = &[
    "reported", "stated", "noted", "said", "observed", "described", "recorded", "told",
    "informed", "according",
];

/// Tunables for the built-in engines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuiltinSettings {
    pub laundering_threshold: f64,
}

impl Default for BuiltinSettings {
    fn default() -> Self {
        Self {
            laundering_threshold: DEFAULT_LAUNDERING_THRESHOLD,
        }
    }
}

/// The built-in implementation of `id`.
pub fn engine_for(id: EngineId, settings: &BuiltinSettings) -> Arc<dyn AnalysisEngine> {
    match id {
        EngineId::Anchor => Arc::new(AnchorEngine),
        EngineId::Inherit => Arc::new(InheritEngine),
        EngineId::Compound => Arc::new(CompoundEngine::new(settings.laundering_threshold)),
        EngineId::Arrive => Arc::new(ArriveEngine),
        EngineId::Contradiction => Arc::new(ContradictionEngine),
        EngineId::Omission => Arc::new(OmissionEngine),
        EngineId::Coordination => Arc::new(CoordinationEngine),
        EngineId::Temporal => Arc::new(TemporalEngine),
        EngineId::Bias => Arc::new(BiasEngine),
    }
}

/// A clause of a located sentence.
#[derive(Debug, Clone)]
pub(crate) struct Clause<'a> {
    pub sentence: LocatedSentence<'a>,
    pub text: &'a str,
    pub tokens: BTreeSet<String>,
}

/// Split a sentence into claim clauses with at least three content words.
pub(crate) fn clauses<'a>(sentence: LocatedSentence<'a>) -> Vec<Clause<'a>> {
    let mut pieces: Vec<&'a str> = vec![sentence.text];
    for sep in CLAUSE_SEPARATORS {
        pieces = pieces
            .into_iter()
            .flat_map(|p| p.split(sep).collect::<Vec<_>>())
            .collect();
    }
    pieces
        .into_iter()
        .map(|p| p.trim().trim_end_matches(|c: char| c.is_ascii_punctuation()).trim())
        .filter_map(|p| {
            let tokens = claim_tokens(p);
            (tokens.len() >= CLAIM_MIN_SHARED).then_some(Clause {
                sentence,
                text: p,
                tokens,
            })
        })
        .collect()
}

/// Every clause of a document.
pub(crate) fn document_clauses(doc: &Document) -> Vec<Clause<'_>> {
    doc.sentences().into_iter().flat_map(clauses).collect()
}

/// Content words of a claim, less hedges, attributions and intensifiers.
pub(crate) fn claim_tokens(text: &str) -> BTreeSet<String> {
    let ignored = ignored_words();
    text::content_tokens(text)
        .into_iter()
        .filter(|t| !ignored.contains(t.as_str()))
        .collect()
}

fn ignored_words() -> BTreeSet<&'static str> {
    [
        text::HEDGES,
        text::CERTAINTY,
        text::HEARSAY,
        text::OPINION,
        text::VERIFICATION,
        text::INTENSIFIERS,
        REPORTING,
    ]
    .iter()
    .flat_map(|lexicon| lexicon.iter())
    .flat_map(|phrase| phrase.split_whitespace())
    .collect()
}

/// Similarity of two claim token sets when they state the same claim.
pub(crate) fn claim_match(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<f64> {
    let shared = a.intersection(b).count();
    if shared < CLAIM_MIN_SHARED {
        return None;
    }
    let score = shared as f64 / a.union(b).count() as f64;
    (score >= CLAIM_MATCH).then_some(score)
}

/// Best clause of `doc` stating the claim with tokens `claim`.
pub(crate) fn best_match<'a>(
    doc: &'a Document,
    claim: &BTreeSet<String>,
) -> Option<(Clause<'a>, f64)> {
    document_clauses(doc)
        .into_iter()
        .filter_map(|c| claim_match(claim, &c.tokens).map(|s| (c, s)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Whether `doc` explicitly refers to `other` by title or id.
pub(crate) fn cites(doc: &Document, other: &Document) -> bool {
    if doc.id == other.id {
        return false;
    }
    let haystack = doc.text.to_lowercase();
    let by_title = other
        .title
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty() && haystack.contains(&t.to_lowercase()));
    by_title || text::contains_any(&doc.text, &[other.id.to_lowercase().as_str()])
}

/// Whether two documents come from different institutions.
///
/// Documents without an institution are treated as independent sources.
pub(crate) fn different_institutions(a: &Document, b: &Document) -> bool {
    match (&a.institution, &b.institution) {
        (Some(x), Some(y)) => !x.eq_ignore_ascii_case(y),
        _ => true,
    }
}

/// Kind of authority a document carries, from its kind, institution and title.
pub(crate) fn authority_type(doc: &Document) -> AuthorityType {
    let descriptor = [doc.kind.as_deref(), doc.institution.as_deref(), doc.title.as_deref()]
        .iter()
        .flatten()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let has = |words: &[&str]| words.iter().any(|w| descriptor.contains(w));
    if has(&["court", "judgment", "judgement", "tribunal"]) {
        AuthorityType::CourtFinding
    } else if has(&["expert", "psycholog", "psychiatr", "forensic"]) {
        AuthorityType::ExpertOpinion
    } else if has(&["police", "constabulary"]) {
        AuthorityType::PoliceConclusion
    } else if has(&["social", "agency", "council", "services", "authority"]) {
        AuthorityType::AgencyDetermination
    } else if has(&["report"]) {
        AuthorityType::OfficialReport
    } else if has(&["assessment", "clinical", "medical", "health"]) {
        AuthorityType::ProfessionalAssessment
    } else {
        AuthorityType::Other
    }
}

/// Shorten text for a finding title.
pub(crate) fn headline(text: &str, max_chars: usize) -> String {
    let collapsed = text::collapse_whitespace(text);
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(space) => format!("{}...", &cut[..space]),
        None => format!("{}...", cut),
    }
}

/// Whether the sentence reads as tentative or second-hand.
pub(crate) fn is_hedged(sentence: &str) -> bool {
    text::contains_any(sentence, text::HEDGES) || text::contains_any(sentence, text::HEARSAY)
}
