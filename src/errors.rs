//! Typed error hierarchy for the FCIP orchestrator.
//!
//! One enum per subsystem:
//! - `EngineError`: registry lookup, input checks and engine execution
//! - `FindingError`: evidentiary contract violations on a single finding
//! - `PhaseError`: S.A.M. state machine transitions and phase failures
//! - `RunError`: run lifecycle requests (progress, results, cancel, resume)
//! - `StorageError`: storage backend failures
//!
//! Engine errors never escape the dispatcher as faults: they are rendered
//! into failed `EngineResponse`s via their `Display` text.

use thiserror::Error;

/// Errors raised while resolving or executing an analysis engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown engine: {engine_id}")]
    UnknownEngine { engine_id: String },

    #[error("Engine {engine_id} timed out after {timeout_secs}s")]
    Timeout { engine_id: String, timeout_secs: u64 },

    #[error("Engine {engine_id} failed: {message}")]
    Failure { engine_id: String, message: String },

    #[error("Engine {engine_id} panicked during execution")]
    Panicked { engine_id: String },

    #[error("Engine {engine_id} requires at least {required} documents, got {provided}")]
    InsufficientInput {
        engine_id: String,
        required: usize,
        provided: usize,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Document {document_id} not found in case {case_id}")]
    DocumentNotFound {
        case_id: String,
        document_id: String,
    },

    #[error("Failed to spawn engine process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Shorthand for an engine-reported failure.
    pub fn failure(engine_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            engine_id: engine_id.into(),
            message: message.into(),
        }
    }
}

/// A finding that cannot be surfaced or persisted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FindingError {
    #[error("Finding {finding_id} has no document reference")]
    MissingDocumentReference { finding_id: String },

    #[error("Finding {finding_id} has no resolvable citation")]
    MissingCitation { finding_id: String },

    #[error("Finding {finding_id} cites document {document_id} which it does not reference")]
    ForeignCitation {
        finding_id: String,
        document_id: String,
    },
}

/// Errors from the phase state machine and phase execution.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Cannot start {phase}: {predecessor} has not completed")]
    PredecessorIncomplete { phase: String, predecessor: String },

    #[error("Phase {phase} has already completed")]
    AlreadyCompleted { phase: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{message}")]
    RequiredEngineFailed {
        phase: String,
        engine_id: String,
        message: String,
    },

    #[error("Document validation failed: {0}")]
    InvalidDocuments(String),

    #[error("{0}")]
    MalformedOutput(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors surfaced by the run lifecycle API.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Analysis run {run_id} not found")]
    NotFound { run_id: String },

    #[error("Analysis run {run_id} is {status}; results are only available once completed")]
    NotCompleted { run_id: String, status: String },

    #[error("Analysis run {run_id} is already {status}")]
    AlreadyTerminal { run_id: String, status: String },

    #[error("Analysis run {run_id} is still running ({status})")]
    AlreadyRunning { run_id: String, status: String },

    #[error("Analysis run {run_id} cannot be resumed from {status}")]
    NotResumable { run_id: String, status: String },

    #[error("Finding {finding_id} not found in run {run_id}")]
    FindingNotFound { run_id: String, finding_id: String },

    #[error("Engine job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Engine job {job_id} is already {status}")]
    JobFinished { job_id: String, status: String },

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize stored record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Storage task panicked")]
    TaskPanicked,

    #[error("Refusing to persist invalid finding: {0}")]
    InvalidFinding(#[from] FindingError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_engine_message_names_the_id() {
        let err = EngineError::UnknownEngine {
            engine_id: "astrology".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown engine: astrology");
    }

    #[test]
    fn insufficient_input_mentions_minimum() {
        let err = EngineError::InsufficientInput {
            engine_id: "omission".to_string(),
            required: 2,
            provided: 1,
        };
        assert!(err.to_string().contains("at least 2 documents"));
    }

    #[test]
    fn engine_error_spawn_failed_carries_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "node not found");
        let err = EngineError::SpawnFailed {
            command: "node".to_string(),
            source: io_err,
        };
        match &err {
            EngineError::SpawnFailed { command, source } => {
                assert_eq!(command, "node");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected SpawnFailed"),
        }
    }

    #[test]
    fn required_engine_failure_displays_engine_message_only() {
        let err = PhaseError::RequiredEngineFailed {
            phase: "anchor".to_string(),
            engine_id: "anchor".to_string(),
            message: "Engine anchor timed out after 300s".to_string(),
        };
        assert_eq!(err.to_string(), "Engine anchor timed out after 300s");
    }

    #[test]
    fn run_error_converts_from_phase_error() {
        let inner = PhaseError::InvalidTransition {
            from: "cancelled".to_string(),
            to: "inherit_running".to_string(),
        };
        let run_err: RunError = inner.into();
        assert!(matches!(
            run_err,
            RunError::Phase(PhaseError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn storage_error_wraps_finding_error() {
        let err: StorageError = FindingError::MissingCitation {
            finding_id: "f-1".to_string(),
        }
        .into();
        assert!(err.to_string().contains("f-1"));
        assert!(matches!(err, StorageError::InvalidFinding(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&EngineError::MalformedRequest("x".into()));
        assert_std_error(&FindingError::MissingDocumentReference {
            finding_id: "x".into(),
        });
        assert_std_error(&PhaseError::InvalidDocuments("x".into()));
        assert_std_error(&RunError::NotFound { run_id: "x".into() });
        assert_std_error(&StorageError::LockPoisoned);
    }
}
