//! Analysis engines: identifiers, the executor trait, and dispatch.
//!
//! - [`registry`]: immutable id → engine table built once at startup
//! - [`protocol`]: line-delimited `EngineRequest` / `EngineResponse` wire types
//! - [`normalize`]: heterogeneous engine output → validated findings
//! - [`dispatcher`]: timeout, isolation and normalization around one invocation
//! - [`process`]: engines implemented by an external process
//! - [`builtin`]: deterministic lexical reference engines

pub mod builtin;
pub mod dispatcher;
pub mod normalize;
pub mod process;
pub mod protocol;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::document::Document;
use crate::errors::EngineError;

pub use dispatcher::{DispatcherConfig, EngineDispatcher};
pub use protocol::{EngineRequest, EngineResponse};
pub use registry::{EngineRegistry, EngineSource, RegisteredEngine, RegistryBuilder};

/// Every engine the registry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineId {
    Anchor,
    Inherit,
    Compound,
    Arrive,
    Contradiction,
    Omission,
    Coordination,
    Temporal,
    Bias,
}

impl EngineId {
    pub const ALL: [EngineId; 9] = [
        Self::Anchor,
        Self::Inherit,
        Self::Compound,
        Self::Arrive,
        Self::Contradiction,
        Self::Omission,
        Self::Coordination,
        Self::Temporal,
        Self::Bias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anchor => "anchor",
            Self::Inherit => "inherit",
            Self::Compound => "compound",
            Self::Arrive => "arrive",
            Self::Contradiction => "contradiction",
            Self::Omission => "omission",
            Self::Coordination => "coordination",
            Self::Temporal => "temporal",
            Self::Bias => "bias",
        }
    }

    /// Human-readable engine name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Anchor => "S.A.M. Anchor (claim origins)",
            Self::Inherit => "S.A.M. Inherit (propagation)",
            Self::Compound => "S.A.M. Compound (authority accumulation)",
            Self::Arrive => "S.A.M. Arrive (outcome linking)",
            Self::Contradiction => "Contradiction Detection",
            Self::Omission => "Omission Detection",
            Self::Coordination => "Cross-Institutional Coordination",
            Self::Temporal => "Temporal Consistency",
            Self::Bias => "Bias Detection",
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| EngineError::UnknownEngine {
                engine_id: s.to_string(),
            })
    }
}

/// Inputs an engine needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequirements {
    pub min_documents: usize,
}

impl Default for InputRequirements {
    fn default() -> Self {
        Self { min_documents: 1 }
    }
}

impl InputRequirements {
    pub fn min_documents(min_documents: usize) -> Self {
        Self { min_documents }
    }
}

/// Everything an engine receives for one invocation.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub engine_id: EngineId,
    pub case_id: String,
    /// Resolved documents, in request order.
    pub documents: Vec<Document>,
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl EngineContext {
    pub fn document_ids(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.id.clone()).collect()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Deserialize an option, treating a missing key as `T::default()`.
    pub fn option<T>(&self, key: &str) -> Result<T, EngineError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.options.get(key) {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                EngineError::failure(self.engine_id.as_str(), format!("invalid option '{key}': {e}"))
            }),
        }
    }

    /// Documents ordered by date, undated ones last; ties keep request order.
    pub fn chronological(&self) -> Vec<&Document> {
        chronological(&self.documents)
    }
}

/// Order documents by date, undated ones last; ties keep input order.
pub fn chronological(documents: &[Document]) -> Vec<&Document> {
    let mut docs: Vec<&Document> = documents.iter().collect();
    docs.sort_by_key(|d| d.date.unwrap_or(chrono::NaiveDate::MAX));
    docs
}

/// A pluggable analysis unit.
///
/// Implementations return raw JSON in any of the shapes understood by
/// [`normalize`]: an array of finding-like objects, an object carrying a
/// `findings` array plus summary keys, or a single finding-like object.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::default()
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<serde_json::Value, EngineError>;
}
