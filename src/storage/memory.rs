//! In-process storage backed by concurrent maps.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Storage, check_findings, fixtures};
use crate::document::Document;
use crate::errors::StorageError;
use crate::findings::Finding;
use crate::sam::{AnalysisRun, PhaseOutput, PhaseOutputs, SamPhase};

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Keyed by `(case_id, document_id)`.
    documents: DashMap<(String, String), Document>,
    runs: DashMap<String, AnalysisRun>,
    findings: DashMap<String, Vec<Finding>>,
    phase_outputs: DashMap<(String, SamPhase), PhaseOutput>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store preloaded with the development fixture case.
    pub fn with_fixtures() -> Self {
        let store = Self::new();
        for doc in fixtures::documents() {
            store.insert_document(doc);
        }
        store
    }

    pub fn insert_document(&self, document: Document) {
        self.documents
            .insert((document.case_id.clone(), document.id.clone()), document);
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn put_document(&self, document: Document) -> Result<(), StorageError> {
        self.insert_document(document);
        Ok(())
    }

    async fn get_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self
            .documents
            .get(&(case_id.to_string(), document_id.to_string()))
            .map(|d| d.value().clone()))
    }

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>, StorageError> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == case_id)
            .map(|entry| entry.value().clone())
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn save_run(&self, run: &AnalysisRun) -> Result<(), StorageError> {
        self.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<AnalysisRun>, StorageError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn list_runs(&self) -> Result<Vec<AnalysisRun>, StorageError> {
        let mut runs: Vec<AnalysisRun> = self.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn append_findings(
        &self,
        run_id: &str,
        findings: &[Finding],
    ) -> Result<(), StorageError> {
        check_findings(findings)?;
        let mut entry = self.findings.entry(run_id.to_string()).or_default();
        for finding in findings {
            if !entry.iter().any(|f| f.id == finding.id) {
                entry.push(finding.clone());
            }
        }
        Ok(())
    }

    async fn list_findings(&self, run_id: &str) -> Result<Vec<Finding>, StorageError> {
        Ok(self
            .findings
            .get(run_id)
            .map(|f| f.value().clone())
            .unwrap_or_default())
    }

    async fn save_phase_output(
        &self,
        run_id: &str,
        output: &PhaseOutput,
    ) -> Result<(), StorageError> {
        self.phase_outputs
            .insert((run_id.to_string(), output.phase()), output.clone());
        Ok(())
    }

    async fn load_phase_outputs(&self, run_id: &str) -> Result<PhaseOutputs, StorageError> {
        let mut outputs = PhaseOutputs::default();
        for phase in SamPhase::ALL {
            if let Some(output) = self.phase_outputs.get(&(run_id.to_string(), phase)) {
                outputs.apply(output.value().clone());
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Citation;
    use crate::sam::RunOptions;

    fn cited_finding(id: &str) -> Finding {
        Finding::new("bias", "characterisation_bias", "Loaded language")
            .with_id(id)
            .with_citation(Citation {
                document_id: "mock-police".into(),
                page: 1,
                paragraph: 2,
                quote: "No injuries were observed on either child.".into(),
            })
    }

    #[tokio::test]
    async fn documents_are_scoped_by_case() {
        let store = MemoryStore::with_fixtures();
        assert!(
            store
                .get_document(fixtures::CASE_ID, "mock-sw")
                .await
                .unwrap()
                .is_some()
        );
        assert!(store.get_document("other-case", "mock-sw").await.unwrap().is_none());
        assert_eq!(store.list_documents(fixtures::CASE_ID).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn findings_append_in_order_and_ignore_duplicates() {
        let store = MemoryStore::new();
        store
            .append_findings("run-1", &[cited_finding("f1"), cited_finding("f2")])
            .await
            .unwrap();
        store
            .append_findings("run-1", &[cited_finding("f1"), cited_finding("f3")])
            .await
            .unwrap();
        let ids: Vec<String> = store
            .list_findings("run-1")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);
    }

    #[tokio::test]
    async fn uncited_finding_rejects_the_batch() {
        let store = MemoryStore::new();
        let bare = Finding::new("bias", "x", "y").with_document_ids(vec!["d".into()]);
        let err = store
            .append_findings("run-1", &[cited_finding("ok"), bare])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidFinding(_)));
        assert!(store.list_findings("run-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_and_phase_outputs_round_trip() {
        let store = MemoryStore::new();
        let run = AnalysisRun::new(RunOptions::new("case", vec!["d".into()]));
        store.save_run(&run).await.unwrap();
        assert_eq!(store.get_run(&run.id).await.unwrap().unwrap().id, run.id);

        store
            .save_phase_output(&run.id, &PhaseOutput::Anchor { origins: Vec::new() })
            .await
            .unwrap();
        let outputs = store.load_phase_outputs(&run.id).await.unwrap();
        assert!(outputs.origins.is_empty());
    }
}
