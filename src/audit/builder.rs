//! Assembles an [`AuditTrail`] for one finding.
//!
//! The builder walks backward from the finding: when the finding names a
//! claim origin (`origin_id` in its metadata) the trail runs through that
//! origin's propagations, authority markers and outcomes; otherwise it falls
//! back to one source-document step per cited document. Steps whose text
//! cannot be located in their document are left out, and their successors
//! attach to the nearest emitted ancestor.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::{AuditTrail, AuditTrailStep, DEFAULT_MAX_QUOTE_CHARS, StepType, truncate_quote};
use crate::document::{Citation, Document};
use crate::findings::Finding;
use crate::sam::PhaseOutputs;

pub struct AuditTrailBuilder<'a> {
    documents: HashMap<&'a str, &'a Document>,
    outputs: &'a PhaseOutputs,
    max_quote_chars: usize,
}

/// Steps collected so far, indexed by document and by entity.
#[derive(Default)]
struct Trail {
    steps: Vec<AuditTrailStep>,
    by_document: HashMap<String, String>,
    by_entity: HashMap<String, String>,
}

impl Trail {
    fn push(&mut self, step: AuditTrailStep) -> String {
        let id = step.id.clone();
        for doc in &step.document_ids {
            self.by_document.insert(doc.clone(), id.clone());
        }
        for entity in &step.entity_ids {
            self.by_entity.insert(entity.clone(), id.clone());
        }
        self.steps.push(step);
        id
    }

    fn last(&self) -> Option<String> {
        self.steps.last().map(|s| s.id.clone())
    }
}

fn at_midnight(date: Option<NaiveDate>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(fallback)
}

impl<'a> AuditTrailBuilder<'a> {
    pub fn new(documents: &'a [Document], outputs: &'a PhaseOutputs) -> Self {
        Self {
            documents: documents.iter().map(|d| (d.id.as_str(), d)).collect(),
            outputs,
            max_quote_chars: DEFAULT_MAX_QUOTE_CHARS,
        }
    }

    pub fn with_max_quote_chars(mut self, max_quote_chars: usize) -> Self {
        self.max_quote_chars = max_quote_chars;
        self
    }

    /// Locate `text` in `document_id`, if that document is known.
    fn cite(&self, document_id: &str, text: &str) -> Option<Citation> {
        self.documents.get(document_id)?.locate(text)
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        step_type: StepType,
        timestamp: DateTime<Utc>,
        description: String,
        entity_ids: Vec<String>,
        engine_id: Option<&str>,
        confidence: f64,
        citations: Vec<Citation>,
        predecessors: Vec<String>,
    ) -> Option<AuditTrailStep> {
        let first = citations.first()?;
        let quote = truncate_quote(&first.quote, self.max_quote_chars);
        let mut document_ids: Vec<String> = Vec::new();
        for c in &citations {
            if !document_ids.contains(&c.document_id) {
                document_ids.push(c.document_id.clone());
            }
        }
        Some(AuditTrailStep {
            id: Uuid::new_v4().to_string(),
            step_type,
            timestamp,
            description,
            document_ids,
            entity_ids,
            engine_id: engine_id.map(str::to_string),
            confidence: confidence.clamp(0.0, 1.0),
            quote,
            citations,
            predecessors,
        })
    }

    pub fn build(&self, finding: &Finding) -> AuditTrail {
        let mut trail = Trail::default();
        let origin = finding
            .metadata_str("origin_id")
            .and_then(|id| self.outputs.origin(id));

        match origin {
            Some(origin) => self.claim_chain(finding, origin.id.as_str(), &mut trail),
            None => self.source_documents(finding, &mut trail),
        }
        self.finding_step(finding, &mut trail);

        let confidence = trail
            .steps
            .iter()
            .map(|s| s.confidence)
            .reduce(f64::min)
            .unwrap_or(0.0);
        let document_fingerprints: BTreeMap<String, String> = trail
            .steps
            .iter()
            .flat_map(|s| &s.citations)
            .filter_map(|c| self.documents.get(c.document_id.as_str()))
            .map(|doc| (doc.id.clone(), doc.sha256()))
            .collect();
        AuditTrail {
            finding_id: finding.id.clone(),
            run_id: finding.run_id.clone(),
            steps: trail.steps,
            confidence,
            document_fingerprints,
            generated_at: Utc::now(),
        }
    }

    /// origin → propagations → authority markers → outcomes.
    fn claim_chain(&self, finding: &Finding, origin_id: &str, trail: &mut Trail) {
        let outputs = self.outputs;
        let Some(origin) = outputs.origin(origin_id) else {
            return;
        };
        let origin_quote = origin
            .origin_context
            .as_deref()
            .unwrap_or(&origin.claim_text);
        let citations: Vec<Citation> = self
            .cite(&origin.origin_document_id, origin_quote)
            .or_else(|| self.cite(&origin.origin_document_id, &origin.claim_text))
            .into_iter()
            .collect();
        let description = if origin.is_false_premise {
            format!("Claim originates as a false premise: {}", origin.claim_text)
        } else {
            format!("Claim originates: {}", origin.claim_text)
        };
        if let Some(step) = self.step(
            StepType::ClaimOrigin,
            at_midnight(origin.origin_date, finding.created_at),
            description,
            vec![origin.id.clone()],
            Some("anchor"),
            origin.confidence_score,
            citations,
            Vec::new(),
        ) {
            trail.push(step);
        }

        for p in outputs.propagations_of(origin_id) {
            let predecessors: Vec<String> = trail
                .by_document
                .get(&p.source_document_id)
                .cloned()
                .or_else(|| trail.last())
                .into_iter()
                .collect();
            let verb = if p.verification_performed {
                "adopted with verification"
            } else {
                "adopted without verification"
            };
            if let Some(step) = self.step(
                StepType::Propagation,
                at_midnight(p.target_date, finding.created_at),
                format!(
                    "{} {} the claim from {}",
                    p.target_document_id, verb, p.source_document_id
                ),
                vec![p.id.clone()],
                Some("inherit"),
                p.confidence,
                self.cite(&p.target_document_id, &p.mutated_text).into_iter().collect(),
                predecessors,
            ) {
                trail.push(step);
            }
        }

        for m in outputs.markers_of(origin_id) {
            let propagation = m
                .propagation_id
                .as_deref()
                .and_then(|id| outputs.propagations.iter().find(|p| p.id == id));
            let citations: Vec<Citation> = propagation
                .and_then(|p| self.cite(&m.authority_document_id, &p.mutated_text))
                .into_iter()
                .collect();
            let predecessors: Vec<String> = m
                .propagation_id
                .as_ref()
                .and_then(|id| trail.by_entity.get(id).cloned())
                .or_else(|| trail.last())
                .into_iter()
                .collect();
            let description = format!(
                "{} adds {:?} authority (laundering score {:.2}{})",
                m.authority_document_id,
                m.authority_type,
                m.laundering_score,
                if m.is_authority_laundering {
                    ", laundered"
                } else {
                    ""
                }
            );
            if let Some(step) = self.step(
                StepType::AuthorityAccumulation,
                at_midnight(m.authority_date, finding.created_at),
                description,
                vec![m.id.clone()],
                Some("compound"),
                m.confidence,
                citations,
                predecessors,
            ) {
                trail.push(step);
            }
        }

        for o in outputs.outcomes_of(origin_id) {
            let chain = outputs.causation_chains.iter().find(|c| c.outcome_id == o.id);
            let mut predecessors: Vec<String> = chain
                .map(|c| {
                    c.authority_marker_ids
                        .iter()
                        .chain(c.propagation_ids.iter())
                        .filter_map(|id| trail.by_entity.get(id).cloned())
                        .take(1)
                        .collect()
                })
                .unwrap_or_default();
            if predecessors.is_empty() {
                predecessors.extend(trail.last());
            }
            if let Some(step) = self.step(
                StepType::Outcome,
                at_midnight(o.outcome_date, finding.created_at),
                format!("{}: {}", o.outcome_type, o.outcome_description),
                vec![o.id.clone()],
                Some("arrive"),
                o.causation_confidence,
                self.cite(&o.outcome_document_id, &o.reference_text).into_iter().collect(),
                predecessors,
            ) {
                trail.push(step);
            }
        }
    }

    /// One step per document the finding cites.
    fn source_documents(&self, finding: &Finding, trail: &mut Trail) {
        for document_id in &finding.document_ids {
            let Some(document) = self.documents.get(document_id.as_str()) else {
                continue;
            };
            let citations: Vec<Citation> = finding
                .citations
                .iter()
                .filter(|c| &c.document_id == document_id)
                .filter_map(|c| c.verify(document))
                .collect();
            if let Some(step) = self.step(
                StepType::SourceDocument,
                at_midnight(document.date, finding.created_at),
                format!("Source document {}", document.label()),
                Vec::new(),
                None,
                1.0,
                citations,
                Vec::new(),
            ) {
                trail.push(step);
            }
        }
    }

    fn finding_step(&self, finding: &Finding, trail: &mut Trail) {
        let citations: Vec<Citation> = finding
            .citations
            .iter()
            .filter_map(|c| {
                self.documents
                    .get(c.document_id.as_str())
                    .and_then(|d| c.verify(d))
            })
            .collect();
        let mut predecessors: Vec<String> = finding
            .document_ids
            .iter()
            .filter_map(|d| trail.by_document.get(d).cloned())
            .collect();
        predecessors.dedup();
        if predecessors.is_empty() {
            predecessors.extend(trail.last());
        }
        if let Some(step) = self.step(
            StepType::Finding,
            finding.created_at,
            finding.title.clone(),
            vec![finding.id.clone()],
            Some(finding.engine_id.as_str()),
            finding.confidence,
            citations,
            predecessors,
        ) {
            trail.push(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TRUNCATION_MARKER;
    use crate::sam::{
        AuthorityMarker, AuthorityType, ClaimOrigin, OriginType, PropagationRecord,
        PropagationType,
    };
    use serde_json::json;

    fn documents() -> Vec<Document> {
        vec![
            Document::new("police", "c", "A neighbour said the father may drink.")
                .with_date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()),
            Document::new("court", "c", "The father drinks heavily.")
                .with_date(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()),
        ]
    }

    fn outputs() -> PhaseOutputs {
        PhaseOutputs {
            origins: vec![ClaimOrigin {
                id: "o1".into(),
                claim_id: "c1".into(),
                claim_text: "the father may drink".into(),
                origin_document_id: "police".into(),
                origin_entity_id: None,
                origin_date: NaiveDate::from_ymd_opt(2023, 1, 1),
                origin_page: Some(1),
                origin_context: None,
                origin_type: OriginType::Hearsay,
                is_false_premise: true,
                false_premise_type: None,
                contradicting_evidence: None,
                contradicting_document_id: None,
                confidence_score: 0.9,
            }],
            propagations: vec![PropagationRecord {
                id: "p1".into(),
                origin_id: "o1".into(),
                source_document_id: "police".into(),
                source_date: None,
                target_document_id: "court".into(),
                target_date: NaiveDate::from_ymd_opt(2023, 6, 1),
                propagation_type: PropagationType::Paraphrase,
                verification_performed: false,
                crossed_institutional_boundary: true,
                source_institution: None,
                target_institution: None,
                mutation_detected: true,
                mutation_type: None,
                original_text: "the father may drink".into(),
                mutated_text: "The father drinks heavily.".into(),
                confidence: 0.7,
            }],
            authority_markers: vec![AuthorityMarker {
                id: "m1".into(),
                origin_id: "o1".into(),
                authority_document_id: "court".into(),
                authority_entity_id: None,
                authority_date: None,
                authority_type: AuthorityType::CourtFinding,
                authority_weight: 5.0,
                propagation_id: Some("p1".into()),
                chain_length: 1,
                institution_count: 1,
                laundering_score: 0.45,
                cumulative_authority_score: 5.0,
                is_authority_laundering: false,
                laundering_path: vec!["police".into(), "court".into()],
                confidence: 0.6,
            }],
            ..Default::default()
        }
    }

    fn finding(origin: Option<&str>) -> Finding {
        let docs = documents();
        let mut f = Finding::new("compound", "authority_laundering", "Court adopted hearsay")
            .with_confidence(0.8)
            .with_citation(docs[1].locate("The father drinks heavily.").unwrap());
        if let Some(origin) = origin {
            f = f.with_metadata(json!({ "origin_id": origin }));
        }
        f
    }

    #[test]
    fn claim_chain_links_origin_to_finding() {
        let docs = documents();
        let outputs = outputs();
        let trail = AuditTrailBuilder::new(&docs, &outputs).build(&finding(Some("o1")));

        let types: Vec<StepType> = trail.steps.iter().map(|s| s.step_type).collect();
        assert_eq!(
            types,
            vec![
                StepType::ClaimOrigin,
                StepType::Propagation,
                StepType::AuthorityAccumulation,
                StepType::Finding
            ]
        );
        assert!(trail.steps.iter().all(|s| !s.citations.is_empty()));
        assert_eq!(trail.steps[1].predecessors, vec![trail.steps[0].id.clone()]);
        assert_eq!(trail.steps[2].predecessors, vec![trail.steps[1].id.clone()]);
        assert_eq!(trail.confidence, 0.6);
    }

    #[test]
    fn trail_fingerprints_every_cited_document() {
        let docs = documents();
        let outputs = outputs();
        let trail = AuditTrailBuilder::new(&docs, &outputs).build(&finding(Some("o1")));
        assert_eq!(trail.document_fingerprints.len(), 2);
        assert_eq!(trail.document_fingerprints["police"], docs[0].sha256());
        assert_eq!(trail.document_fingerprints["court"], docs[1].sha256());
        assert!(trail.render_text().contains(&docs[1].sha256()));

        let fallback = AuditTrailBuilder::new(&docs, &outputs).build(&finding(None));
        assert_eq!(
            fallback.document_fingerprints.keys().collect::<Vec<_>>(),
            vec!["court"]
        );
    }

    #[test]
    fn unknown_origin_falls_back_to_source_documents() {
        let docs = documents();
        let outputs = outputs();
        let trail = AuditTrailBuilder::new(&docs, &outputs).build(&finding(None));
        assert_eq!(trail.steps.len(), 2);
        assert_eq!(trail.steps[0].step_type, StepType::SourceDocument);
        assert_eq!(trail.steps[1].predecessors, vec![trail.steps[0].id.clone()]);
        assert_eq!(trail.confidence, 0.8);
    }

    #[test]
    fn steps_without_locatable_text_are_skipped() {
        let docs = documents();
        let mut outputs = outputs();
        outputs.propagations[0].mutated_text = "Text that appears nowhere.".into();
        let trail = AuditTrailBuilder::new(&docs, &outputs).build(&finding(Some("o1")));
        assert!(trail.steps_of(StepType::Propagation).is_empty());
        assert!(trail.steps_of(StepType::AuthorityAccumulation).is_empty());
        let last = trail.steps.last().unwrap();
        assert_eq!(last.step_type, StepType::Finding);
        assert!(!last.predecessors.is_empty());
    }

    #[test]
    fn quotes_are_truncated_to_the_configured_length() {
        let docs = documents();
        let outputs = outputs();
        let trail = AuditTrailBuilder::new(&docs, &outputs)
            .with_max_quote_chars(10)
            .build(&finding(None));
        assert!(trail.steps[0].quote.ends_with(TRUNCATION_MARKER));
        assert_eq!(trail.steps[0].citations[0].quote, "The father drinks heavily.");
    }
}
