//! Case documents and citation resolution.
//!
//! Documents are consumed as opaque `{id, text, pages}` records produced by
//! an upstream ingestion step. A [`Citation`] is only ever produced by
//! finding a quote verbatim (modulo whitespace runs) in a document page; it
//! is never synthesized from engine-supplied coordinates.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

use crate::text;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").unwrap());

/// One page of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// A case document as handed over by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub case_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<Page>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Authoring institution (police, social services, court, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Free-form document kind such as "report" or "judgment".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Document {
    pub fn new(id: &str, case_id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            case_id: case_id.to_string(),
            text: text.to_string(),
            pages: Vec::new(),
            title: None,
            date: None,
            institution: None,
            author: None,
            kind: None,
        }
    }

    /// Replace the text with explicit pages, numbered from 1.
    pub fn with_pages<S: AsRef<str>>(mut self, pages: &[S]) -> Self {
        self.pages = pages
            .iter()
            .enumerate()
            .map(|(i, p)| Page {
                number: i as u32 + 1,
                text: p.as_ref().to_string(),
            })
            .collect();
        self.text = pages
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join("\n\n");
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_institution(mut self, institution: &str) -> Self {
        self.institution = Some(institution.to_string());
        self
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    /// Whether the document carries any non-blank text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty() || self.pages.iter().any(|p| !p.text.trim().is_empty())
    }

    /// Page number and text for each page. Unpaginated text is page 1.
    pub fn page_texts(&self) -> Vec<(u32, &str)> {
        if self.pages.is_empty() {
            vec![(1, self.text.as_str())]
        } else {
            self.pages
                .iter()
                .map(|p| (p.number, p.text.as_str()))
                .collect()
        }
    }

    /// Display label used in descriptions: the title, else the id.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// Hex-encoded SHA-256 of the document text. Paginated documents hash
    /// their pages in order, each followed by a form feed.
    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        if self.pages.is_empty() {
            hasher.update(self.text.as_bytes());
        } else {
            for page in &self.pages {
                hasher.update(page.text.as_bytes());
                hasher.update(b"\x0c");
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Every sentence of the document with its page and paragraph.
    pub fn sentences(&self) -> Vec<LocatedSentence<'_>> {
        let mut out = Vec::new();
        for (page, page_text) in self.page_texts() {
            for sentence in text::split_sentences(page_text) {
                let offset = sentence.as_ptr() as usize - page_text.as_ptr() as usize;
                out.push(LocatedSentence {
                    document_id: &self.id,
                    page,
                    paragraph: paragraph_at(page_text, offset),
                    text: sentence,
                });
            }
        }
        out
    }

    /// Resolve `quote` to a citation inside this document.
    ///
    /// Exact matches win; otherwise whitespace runs are treated as
    /// equivalent and the returned quote is the document's own slice.
    pub fn locate(&self, quote: &str) -> Option<Citation> {
        let quote = quote.trim();
        if quote.is_empty() {
            return None;
        }
        for (page, page_text) in self.page_texts() {
            if let Some(offset) = page_text.find(quote) {
                return Some(Citation {
                    document_id: self.id.clone(),
                    page,
                    paragraph: paragraph_at(page_text, offset),
                    quote: quote.to_string(),
                });
            }
        }
        let wanted = text::collapse_whitespace(quote);
        for (page, page_text) in self.page_texts() {
            let (normalized, offsets) = normalize_with_offsets(page_text);
            if let Some(idx) = normalized.find(&wanted) {
                let start = offsets[idx];
                let end = offsets[idx + wanted.len() - 1] + 1;
                return Some(Citation {
                    document_id: self.id.clone(),
                    page,
                    paragraph: paragraph_at(page_text, start),
                    quote: page_text[start..end].to_string(),
                });
            }
        }
        None
    }
}

/// A sentence with its location in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedSentence<'a> {
    pub document_id: &'a str,
    pub page: u32,
    pub paragraph: u32,
    pub text: &'a str,
}

/// An exact text span inside a document page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub page: u32,
    pub paragraph: u32,
    pub quote: String,
}

impl Citation {
    /// Bracketed reference such as `[doc-1, p. 3, para. 2]`.
    pub fn reference(&self) -> String {
        format!(
            "[{}, p. {}, para. {}]",
            self.document_id, self.page, self.paragraph
        )
    }

    /// Re-check this citation against the document it names.
    ///
    /// Engine-supplied coordinates are discarded; the quote is located again.
    pub fn verify(&self, document: &Document) -> Option<Citation> {
        if document.id != self.document_id {
            return None;
        }
        document.locate(&self.quote)
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" {}", self.quote, self.reference())
    }
}

/// 1-based paragraph number of the byte `offset` within `page_text`.
fn paragraph_at(page_text: &str, offset: usize) -> u32 {
    let before = PARAGRAPH_BREAK
        .find_iter(page_text)
        .filter(|m| m.end() <= offset)
        .count();
    before as u32 + 1
}

/// Collapse whitespace runs to one space, keeping the source byte offset of
/// every output byte.
fn normalize_with_offsets(source: &str) -> (String, Vec<usize>) {
    let mut normalized = String::with_capacity(source.len());
    let mut offsets = Vec::with_capacity(source.len());
    let mut in_space = false;
    for (offset, c) in source.char_indices() {
        if c.is_whitespace() {
            if !in_space && !normalized.is_empty() {
                normalized.push(' ');
                offsets.push(offset);
            }
            in_space = true;
            continue;
        }
        in_space = false;
        for k in 0..c.len_utf8() {
            offsets.push(offset + k);
        }
        normalized.push(c);
    }
    (normalized, offsets)
}
