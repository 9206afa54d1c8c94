//! Lexical helpers shared by the reference engines and the audit builder.
//!
//! Everything here works on verbatim slices of document text so that any
//! sentence handed to an engine can later be cited without rewriting it.

use std::collections::BTreeSet;

/// Words ignored when comparing claims.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "was", "were", "are", "has", "have", "had",
    "been", "from", "his", "her", "their", "they", "she", "him", "its", "not", "but", "which",
    "who", "whom", "would", "will", "there", "then", "than", "into", "onto", "upon", "also",
    "any", "all", "our", "out", "about", "after", "before", "over", "under", "such", "these",
    "those", "being", "did", "does", "each", "other", "very", "may", "might", "could", "should",
];

/// Markers of tentative or second-hand statements.
pub const HEDGES: &[&str] = &[
    "may", "might", "could", "possibly", "perhaps", "allegedly", "alleged", "suspected",
    "appears", "apparently", "seems", "likely", "unclear", "reportedly", "unconfirmed",
];

/// Markers of categorical statements.
pub const CERTAINTY: &[&str] = &[
    "clearly", "confirmed", "established", "definitely", "certainly", "proven", "undoubtedly",
    "without doubt", "is known", "it is clear", "demonstrates",
];

/// Negation markers used to spot opposing statements.
pub const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "denied", "denies", "didn't", "did not", "wasn't", "was not",
    "unfounded", "unsubstantiated", "no evidence",
];

/// Words that strengthen a statement when it is repeated.
pub const INTENSIFIERS: &[&str] = &[
    "serious", "significant", "severe", "repeated", "persistent", "grave", "extreme",
    "substantial", "ongoing", "escalating",
];

/// Markers that a statement was checked against a source.
pub const VERIFICATION: &[&str] = &[
    "verified", "corroborated", "independently", "cross-checked", "checked with",
    "confirmed with", "we reviewed", "having reviewed the original",
];

/// Markers of hearsay.
pub const HEARSAY: &[&str] = &["according to", "told", "informed", "it was said", "heard that"];

/// Markers of a professional opinion.
pub const OPINION: &[&str] = &[
    "in my opinion", "in my professional opinion", "assessment", "assessed", "i consider",
    "clinical view", "professional judgement", "professional judgment",
];

/// Split text into sentences, returning trimmed verbatim slices.
///
/// Boundaries are sentence punctuation followed by whitespace, and blank
/// lines. Fragments with fewer than three words are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let at_punct = matches!(b, b'.' | b'!' | b'?')
            && (i + 1 == bytes.len() || bytes[i + 1].is_ascii_whitespace());
        let at_blank_line = b == b'\n' && next_line_is_blank(bytes, i + 1);
        if at_punct || at_blank_line {
            push_sentence(&mut sentences, &text[start..=i]);
            start = i + 1;
        }
        i += 1;
    }
    if start < text.len() {
        push_sentence(&mut sentences, &text[start..]);
    }
    sentences
}

fn next_line_is_blank(bytes: &[u8], mut i: usize) -> bool {
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => return true,
            b' ' | b'\t' | b'\r' => i += 1,
            _ => return false,
        }
    }
    false
}

fn push_sentence<'a>(out: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if trimmed.split_whitespace().count() >= 3 {
        out.push(trimmed);
    }
}

/// Lowercased content words (three letters or more, stopwords removed).
pub fn content_tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity of the content words of two statements.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = content_tokens(a);
    let tb = content_tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    shared / union
}

/// Whether `text` contains any of `cues` as a whole word or phrase.
pub fn contains_any(text: &str, cues: &[&str]) -> bool {
    first_cue(text, cues).is_some()
}

/// First cue from `cues` found in `text` as a whole word or phrase.
pub fn first_cue<'a>(text: &str, cues: &[&'a str]) -> Option<&'a str> {
    let haystack = format!(" {} ", collapse_whitespace(&text.to_lowercase()));
    let haystack: String = haystack
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' || c == '-' { c } else { ' ' })
        .collect();
    cues.iter()
        .copied()
        .find(|cue| haystack.contains(&format!(" {} ", cue)))
}

/// Count how many of `cues` occur in `text`.
pub fn count_cues(text: &str, cues: &[&str]) -> usize {
    cues.iter().filter(|cue| contains_any(text, &[**cue])).count()
}

/// Collapse every run of whitespace to a single space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased word shingles of `size` words, in order of appearance.
pub fn shingles(text: &str, size: usize) -> Vec<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    if size == 0 || words.len() < size {
        return Vec::new();
    }
    words.windows(size).map(|w| w.join(" ")).collect()
}
