//! Storage backends for documents, runs, findings and phase records.
//!
//! The backend is chosen explicitly from configuration ([`StorageBackend`]);
//! callers only ever see the [`Storage`] trait.

pub mod fixtures;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::errors::{EngineError, StorageError};
use crate::fcip_config::StorageSection;
use crate::findings::Finding;
use crate::sam::{AnalysisRun, PhaseOutput, PhaseOutputs};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process maps, optionally seeded with the development fixture case.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            _ => anyhow::bail!("Invalid storage backend '{}'. Valid values: memory, sqlite", s),
        }
    }
}

/// Persistence seam for the orchestrator.
///
/// Findings are append-only: there is no update or delete.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put_document(&self, document: Document) -> Result<(), StorageError>;

    async fn get_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, StorageError>;

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>, StorageError>;

    async fn save_run(&self, run: &AnalysisRun) -> Result<(), StorageError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<AnalysisRun>, StorageError>;

    async fn list_runs(&self) -> Result<Vec<AnalysisRun>, StorageError>;

    /// Append findings for a run. Invalid findings are refused as a batch.
    async fn append_findings(&self, run_id: &str, findings: &[Finding])
    -> Result<(), StorageError>;

    /// Findings of a run in insertion order.
    async fn list_findings(&self, run_id: &str) -> Result<Vec<Finding>, StorageError>;

    async fn save_phase_output(&self, run_id: &str, output: &PhaseOutput)
    -> Result<(), StorageError>;

    async fn load_phase_outputs(&self, run_id: &str) -> Result<PhaseOutputs, StorageError>;
}

/// Fetch the requested documents of a case, in request order.
pub async fn fetch_documents(
    store: &dyn Storage,
    case_id: &str,
    document_ids: &[String],
) -> Result<Vec<Document>, EngineError> {
    let mut documents = Vec::with_capacity(document_ids.len());
    for id in document_ids {
        match store.get_document(case_id, id).await? {
            Some(doc) => documents.push(doc),
            None => {
                return Err(EngineError::DocumentNotFound {
                    case_id: case_id.to_string(),
                    document_id: id.clone(),
                });
            }
        }
    }
    Ok(documents)
}

/// Reject the batch if any finding breaks the evidentiary contract.
pub(crate) fn check_findings(findings: &[Finding]) -> Result<(), StorageError> {
    for finding in findings {
        finding.validate()?;
    }
    Ok(())
}

/// Construct the configured backend.
pub fn open(section: &StorageSection) -> Result<Arc<dyn Storage>> {
    match section.backend {
        StorageBackend::Memory => {
            let store = if section.seed_fixtures {
                MemoryStore::with_fixtures()
            } else {
                MemoryStore::new()
            };
            Ok(Arc::new(store))
        }
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(&section.path)?;
            if section.seed_fixtures {
                store.seed_sync(&fixtures::documents())?;
            }
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert!("postgres".parse::<StorageBackend>().is_err());
        assert_eq!(StorageBackend::default(), StorageBackend::Memory);
    }

    #[tokio::test]
    async fn fetch_documents_reports_first_missing_id() {
        let store = MemoryStore::with_fixtures();
        let found = fetch_documents(
            &store,
            fixtures::CASE_ID,
            &["mock-police".to_string(), "mock-sw".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 2);

        let missing = fetch_documents(&store, fixtures::CASE_ID, &["nope".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            missing,
            EngineError::DocumentNotFound { ref document_id, .. } if document_id == "nope"
        ));
    }
}
