//! Citation-backed findings produced by analysis engines.
//!
//! ## Types
//!
//! - [`Severity`]: Severity classification (critical → info)
//! - [`ContradictionClass`]: Closed taxonomy of contradiction types
//! - [`ContradictionRecord`]: Contradiction class and bias score passed through from an engine
//! - [`Finding`]: A single evidentiary finding with document references and citations
//!
//! ## Example
//!
//! ```
//! use fcip::document::Citation;
//! use fcip::findings::{Finding, Severity};
//!
//! let finding = Finding::new("omission", "material_omission", "Exculpatory sentence dropped")
//!     .with_severity(Severity::High)
//!     .with_confidence(0.8)
//!     .with_document_ids(vec!["doc-1".to_string()])
//!     .with_citation(Citation {
//!         document_id: "doc-1".to_string(),
//!         page: 1,
//!         paragraph: 2,
//!         quote: "No injuries were observed.".to_string(),
//!     });
//!
//! assert!(finding.validate().is_ok());
//! assert!(finding.severity.is_actionable());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::document::Citation;
use crate::errors::FindingError;
use crate::sam::SamPhase;

/// Severity level for findings, ordered from most to least severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

impl Severity {
    /// # Examples
    ///
    /// ```
    /// use fcip::findings::Severity;
    ///
    /// assert!(Severity::Critical.is_critical());
    /// assert!(!Severity::High.is_critical());
    /// ```
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }

    /// Critical and high findings warrant follow-up.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "info" => Ok(Self::Info),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// The eight contradiction classes recognised downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionClass {
    Internal,
    CrossDocument,
    Temporal,
    Evidentiary,
    ModalityShift,
    SelectiveCitation,
    ScopeShift,
    UnexplainedChange,
}

impl ContradictionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::CrossDocument => "cross_document",
            Self::Temporal => "temporal",
            Self::Evidentiary => "evidentiary",
            Self::ModalityShift => "modality_shift",
            Self::SelectiveCitation => "selective_citation",
            Self::ScopeShift => "scope_shift",
            Self::UnexplainedChange => "unexplained_change",
        }
    }
}

impl FromStr for ContradictionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::Internal),
            "cross_document" => Ok(Self::CrossDocument),
            "temporal" => Ok(Self::Temporal),
            "evidentiary" => Ok(Self::Evidentiary),
            "modality_shift" => Ok(Self::ModalityShift),
            "selective_citation" => Ok(Self::SelectiveCitation),
            "scope_shift" => Ok(Self::ScopeShift),
            "unexplained_change" => Ok(Self::UnexplainedChange),
            _ => Err(format!("Invalid contradiction class: {}", s)),
        }
    }
}

/// Contradiction classification and bias score exactly as an engine reported them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContradictionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ContradictionClass>,
    /// Directional bias in −1.0..=1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias_score: Option<f64>,
}

impl ContradictionRecord {
    /// Accept a class label and bias score only when both are within the taxonomy.
    ///
    /// Returns `None` when neither survives; unrecognised values stay in the
    /// raw evidence of the finding.
    pub fn from_raw(class: Option<&str>, bias_score: Option<f64>) -> Option<Self> {
        let class = class.and_then(|c| c.parse().ok());
        let bias_score = bias_score.filter(|b| (-1.0..=1.0).contains(b));
        if class.is_none() && bias_score.is_none() {
            None
        } else {
            Some(Self { class, bias_score })
        }
    }
}

/// A single engine finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub engine_id: String,
    pub finding_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub evidence: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradiction: Option<ContradictionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<SamPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(engine_id: &str, finding_type: &str, title: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            engine_id: engine_id.to_string(),
            finding_type: finding_type.to_string(),
            title: title.to_string(),
            description: String::new(),
            severity: Severity::default(),
            confidence: 0.5,
            document_ids: Vec::new(),
            evidence: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            citations: Vec::new(),
            contradiction: None,
            phase: None,
            run_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set confidence, clamped to 0.0..=1.0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_document_ids(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = document_ids;
        self
    }

    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_citation(mut self, citation: Citation) -> Self {
        if !self.document_ids.contains(&citation.document_id) {
            self.document_ids.push(citation.document_id.clone());
        }
        self.citations.push(citation);
        self
    }

    pub fn with_contradiction(mut self, record: ContradictionRecord) -> Self {
        self.contradiction = Some(record);
        self
    }

    /// Record the run and phase that produced this finding.
    pub fn in_run(mut self, run_id: &str, phase: SamPhase) -> Self {
        self.run_id = Some(run_id.to_string());
        self.phase = Some(phase);
        self
    }

    /// Look up a string value in the metadata object.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Enforce the evidentiary contract: at least one document reference and
    /// at least one citation, every citation pointing at a referenced document.
    pub fn validate(&self) -> Result<(), FindingError> {
        if self.document_ids.is_empty() {
            return Err(FindingError::MissingDocumentReference {
                finding_id: self.id.clone(),
            });
        }
        if self.citations.is_empty() {
            return Err(FindingError::MissingCitation {
                finding_id: self.id.clone(),
            });
        }
        if let Some(foreign) = self
            .citations
            .iter()
            .find(|c| !self.document_ids.contains(&c.document_id))
        {
            return Err(FindingError::ForeignCitation {
                finding_id: self.id.clone(),
                document_id: foreign.document_id.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}, confidence {:.2})",
            self.severity, self.title, self.engine_id, self.confidence
        )
    }
}

pub(crate) fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(doc: &str) -> Citation {
        Citation {
            document_id: doc.to_string(),
            page: 1,
            paragraph: 1,
            quote: "quoted text".to_string(),
        }
    }

    // =========================================
    // Severity
    // =========================================

    #[test]
    fn severity_orders_most_severe_first() {
        assert!(Severity::Critical < Severity::High);
        assert!(Severity::Low < Severity::Info);
        assert_eq!(Severity::default(), Severity::Medium);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    // =========================================
    // Contradiction taxonomy
    // =========================================

    #[test]
    fn contradiction_record_keeps_valid_values() {
        let record = ContradictionRecord::from_raw(Some("modality_shift"), Some(-0.4)).unwrap();
        assert_eq!(record.class, Some(ContradictionClass::ModalityShift));
        assert_eq!(record.bias_score, Some(-0.4));
    }

    #[test]
    fn contradiction_record_does_not_repair_unknown_values() {
        assert!(ContradictionRecord::from_raw(Some("vibes"), Some(3.0)).is_none());
        let partial = ContradictionRecord::from_raw(Some("vibes"), Some(0.9)).unwrap();
        assert_eq!(partial.class, None);
        assert_eq!(partial.bias_score, Some(0.9));
    }

    // =========================================
    // Finding validation
    // =========================================

    #[test]
    fn finding_without_documents_is_invalid() {
        let finding = Finding::new("bias", "bias_indicator", "Loaded language");
        assert!(matches!(
            finding.validate(),
            Err(FindingError::MissingDocumentReference { .. })
        ));
    }

    #[test]
    fn finding_without_citation_is_invalid() {
        let finding = Finding::new("bias", "bias_indicator", "Loaded language")
            .with_document_ids(vec!["doc-1".to_string()]);
        assert!(matches!(
            finding.validate(),
            Err(FindingError::MissingCitation { .. })
        ));
    }

    #[test]
    fn citation_adds_its_document_reference() {
        let finding = Finding::new("bias", "bias_indicator", "Loaded language").with_citation(cite("doc-9"));
        assert_eq!(finding.document_ids, vec!["doc-9".to_string()]);
        assert!(finding.validate().is_ok());
    }

    #[test]
    fn foreign_citation_is_invalid() {
        let mut finding = Finding::new("bias", "bias_indicator", "Loaded language")
            .with_document_ids(vec!["doc-1".to_string()]);
        finding.citations.push(cite("doc-2"));
        assert!(matches!(
            finding.validate(),
            Err(FindingError::ForeignCitation { .. })
        ));
    }

    #[test]
    fn confidence_is_clamped() {
        let finding = Finding::new("x", "y", "z").with_confidence(1.7);
        assert_eq!(finding.confidence, 1.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(-2.0), 0.0);
    }

    #[test]
    fn finding_deserializes_with_defaults() {
        let json = r#"{"id":"f1","engine_id":"omission","finding_type":"t","title":"T","confidence":0.7}"#;
        let finding: Finding = serde_json::from_str(json).unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.document_ids.is_empty());
        assert!(finding.phase.is_none());
    }
}
