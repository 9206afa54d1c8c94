//! Engine dispatcher: one request in, one response out.
//!
//! Every invocation is resolved through the registry, checked against the
//! engine's input requirements, run in its own tokio task under a timeout,
//! and normalized into validated findings. Nothing an engine does (error,
//! panic, hang, malformed output) escapes as anything but a failed
//! [`EngineResponse`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::normalize::{Normalized, normalize};
use super::protocol::UNKNOWN_ENGINE_ID;
use super::{EngineContext, EngineId, EngineRegistry, EngineRequest, EngineResponse, RegisteredEngine};
use crate::document::Document;
use crate::errors::EngineError;
use crate::storage::{Storage, fetch_documents};

/// Default per-engine timeout.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub default_timeout: Duration,
    pub engine_timeouts: HashMap<EngineId, Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_ENGINE_TIMEOUT,
            engine_timeouts: HashMap::new(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_engine_timeout(mut self, id: EngineId, timeout: Duration) -> Self {
        self.engine_timeouts.insert(id, timeout);
        self
    }

    pub fn timeout_for(&self, id: EngineId) -> Duration {
        self.engine_timeouts
            .get(&id)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// Counters for one [`EngineDispatcher::serve`] session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub requests: usize,
    pub failures: usize,
}

pub struct EngineDispatcher {
    registry: Arc<EngineRegistry>,
    store: Arc<dyn Storage>,
    config: DispatcherConfig,
}

impl EngineDispatcher {
    pub fn new(registry: Arc<EngineRegistry>, store: Arc<dyn Storage>) -> Self {
        Self {
            registry,
            store,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// Execute a wire request.
    pub async fn dispatch(&self, request: EngineRequest) -> EngineResponse {
        self.execute(
            &request.engine_id,
            &request.case_id,
            &request.document_ids,
            request.options.unwrap_or_default(),
        )
        .await
    }

    /// Execute one engine over documents fetched from storage.
    pub async fn execute(
        &self,
        engine_id: &str,
        case_id: &str,
        document_ids: &[String],
        options: Map<String, Value>,
    ) -> EngineResponse {
        let started = Instant::now();
        let engine = match self.registry.resolve(engine_id) {
            Ok(engine) => engine,
            Err(e) => return self.failed(engine_id, e, started),
        };
        let documents = match fetch_documents(self.store.as_ref(), case_id, document_ids).await {
            Ok(documents) => documents,
            Err(e) => return self.failed(engine_id, e, started),
        };
        self.run(engine, case_id, documents, options, started).await
    }

    /// Execute one engine over documents the caller already holds.
    pub async fn execute_with_documents(
        &self,
        engine_id: EngineId,
        case_id: &str,
        documents: Vec<Document>,
        options: Map<String, Value>,
    ) -> EngineResponse {
        let started = Instant::now();
        match self.registry.get(engine_id) {
            Some(engine) => self.run(engine, case_id, documents, options, started).await,
            None => self.failed(
                engine_id.as_str(),
                EngineError::UnknownEngine {
                    engine_id: engine_id.to_string(),
                },
                started,
            ),
        }
    }

    async fn run(
        &self,
        engine: &RegisteredEngine,
        case_id: &str,
        documents: Vec<Document>,
        options: Map<String, Value>,
        started: Instant,
    ) -> EngineResponse {
        let engine_id = engine.id.as_str();
        info!(
            engine = engine_id,
            case_id,
            documents = documents.len(),
            "Executing engine"
        );
        let ctx = EngineContext {
            engine_id: engine.id,
            case_id: case_id.to_string(),
            documents,
            options,
        };
        match self.invoke(engine, ctx).await {
            Ok(normalized) => {
                let duration_ms = elapsed_ms(started);
                info!(
                    engine = engine_id,
                    findings = normalized.findings.len(),
                    rejected = normalized.rejected,
                    duration_ms,
                    "Engine completed"
                );
                EngineResponse::success(engine_id, normalized.findings, duration_ms)
                    .with_summary(normalized.summary)
                    .with_rejected(normalized.rejected)
            }
            Err(e) => self.failed(engine_id, e, started),
        }
    }

    /// Requirements check, isolated execution, timeout and normalization.
    async fn invoke(
        &self,
        engine: &RegisteredEngine,
        ctx: EngineContext,
    ) -> Result<Normalized, EngineError> {
        let engine_id = engine.id.as_str();
        let required = engine.requirements.min_documents;
        if ctx.documents.len() < required {
            return Err(EngineError::InsufficientInput {
                engine_id: engine_id.to_string(),
                required,
                provided: ctx.documents.len(),
            });
        }

        let timeout = self.config.timeout_for(engine.id);
        let executor = engine.executor.clone();
        let task_ctx = ctx.clone();
        let mut handle = tokio::spawn(async move { executor.analyze(&task_ctx).await });

        let raw = match tokio::time::timeout(timeout, &mut handle).await {
            Err(_) => {
                handle.abort();
                return Err(EngineError::Timeout {
                    engine_id: engine_id.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            Ok(Err(join_error)) if join_error.is_panic() => {
                return Err(EngineError::Panicked {
                    engine_id: engine_id.to_string(),
                });
            }
            Ok(Err(join_error)) => {
                return Err(EngineError::failure(engine_id, join_error.to_string()));
            }
            Ok(Ok(result)) => result?,
        };

        Ok(normalize(engine_id, raw, &ctx.documents))
    }

    fn failed(&self, engine_id: &str, error: EngineError, started: Instant) -> EngineResponse {
        warn!(engine = engine_id, error = %error, "Engine failed");
        EngineResponse::failure(engine_id, &error.to_string(), elapsed_ms(started))
    }

    /// Serve the line-delimited protocol until `reader` is exhausted.
    ///
    /// Blank lines are skipped. Every other line gets exactly one response
    /// line, in order; a line that is not a valid request is answered with a
    /// failure for engine `unknown` and the loop continues.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<ServeStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut stats = ServeStats::default();
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.context("Failed to read request")? {
            if line.trim().is_empty() {
                continue;
            }
            stats.requests += 1;
            let response = match EngineRequest::parse_line(&line) {
                Ok(request) => self.dispatch(request).await,
                Err(e) => {
                    debug!(line = %line, "Malformed request");
                    self.failed(
                        UNKNOWN_ENGINE_ID,
                        EngineError::MalformedRequest(e.to_string()),
                        Instant::now(),
                    )
                }
            };
            if !response.success {
                stats.failures += 1;
            }
            writer
                .write_all(format!("{}\n", response.to_line()).as_bytes())
                .await
                .context("Failed to write response")?;
            writer.flush().await.context("Failed to flush response")?;
        }
        Ok(stats)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AnalysisEngine;
    use crate::storage::{MemoryStore, fixtures};
    use async_trait::async_trait;
    use serde_json::json;

    struct Sleepy;

    #[async_trait]
    impl AnalysisEngine for Sleepy {
        async fn analyze(&self, _ctx: &EngineContext) -> Result<Value, EngineError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!([]))
        }
    }

    struct Panics;

    #[async_trait]
    impl AnalysisEngine for Panics {
        async fn analyze(&self, _ctx: &EngineContext) -> Result<Value, EngineError> {
            panic!("engine bug");
        }
    }

    struct Sloppy;

    #[async_trait]
    impl AnalysisEngine for Sloppy {
        async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
            let doc = &ctx.documents[0];
            Ok(json!({
                "findings": [
                    {"title": "cited", "document_id": doc.id, "quote": "No injuries were observed on either child."},
                    {"title": "uncited"}
                ],
                "score": 3
            }))
        }
    }

    fn dispatcher() -> EngineDispatcher {
        let registry = EngineRegistry::builder().with_builtins().build();
        EngineDispatcher::new(registry, Arc::new(MemoryStore::with_fixtures()))
    }

    fn custom(id: EngineId, engine: Arc<dyn AnalysisEngine>) -> EngineDispatcher {
        let registry = EngineRegistry::builder().register(id, engine).build();
        EngineDispatcher::new(registry, Arc::new(MemoryStore::with_fixtures()))
            .with_config(DispatcherConfig::default().with_timeout(Duration::from_millis(50)))
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn unknown_engine_is_a_failure_naming_the_id() {
        let resp = dispatcher()
            .execute("astrology", fixtures::CASE_ID, &ids(&["mock-police"]), Map::new())
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("astrology"));
    }

    #[tokio::test]
    async fn omission_with_one_document_reports_minimum() {
        let resp = dispatcher()
            .execute("omission", fixtures::CASE_ID, &ids(&["mock-police"]), Map::new())
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("at least 2 documents"));
    }

    #[tokio::test]
    async fn coordination_carries_summary_lists() {
        let resp = dispatcher()
            .execute(
                "coordination",
                fixtures::CASE_ID,
                &ids(&["mock-police", "mock-sw"]),
                Map::new(),
            )
            .await;
        assert!(resp.success, "{:?}", resp.error);
        assert!(resp.summary["sharedLanguage"].is_array());
        assert!(resp.summary["independenceViolations"].is_array());
        assert!(resp.findings().iter().all(|f| f.validate().is_ok()));
    }

    #[tokio::test]
    async fn missing_document_is_named() {
        let resp = dispatcher()
            .execute("bias", fixtures::CASE_ID, &ids(&["mock-police", "ghost"]), Map::new())
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let resp = custom(EngineId::Bias, Arc::new(Sleepy))
            .execute("bias", fixtures::CASE_ID, &ids(&["mock-police"]), Map::new())
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_engine_is_isolated() {
        let resp = custom(EngineId::Temporal, Arc::new(Panics))
            .execute("temporal", fixtures::CASE_ID, &ids(&["mock-police"]), Map::new())
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn uncited_findings_are_counted_as_rejected() {
        let resp = custom(EngineId::Omission, Arc::new(Sloppy))
            .execute("omission", fixtures::CASE_ID, &ids(&["mock-police"]), Map::new())
            .await;
        assert!(resp.success);
        assert_eq!(resp.findings().len(), 1);
        assert_eq!(resp.rejected_findings, 1);
        assert_eq!(resp.summary["score"], json!(3));
        let citation = &resp.findings()[0].citations[0];
        assert_eq!((citation.page, citation.paragraph), (1, 2));
    }

    #[tokio::test]
    async fn serve_answers_every_line_and_survives_garbage() {
        let input = concat!(
            "{\"engine_id\":\"omission\",\"case_id\":\"PE23C50095\",\"document_ids\":[\"mock-police\"]}\n",
            "\n",
            "this is not json\n",
            "{\"engine_id\":\"bias\",\"case_id\":\"PE23C50095\",\"document_ids\":[\"mock-police\"]}\n",
        );
        let mut output = Vec::new();
        let stats = dispatcher()
            .serve(input.as_bytes(), &mut output)
            .await
            .unwrap();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.failures, 2);

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["engine_id"], json!("omission"));
        assert_eq!(lines[1]["engine_id"], json!("unknown"));
        assert!(lines[1]["error"].as_str().unwrap().starts_with("Malformed request"));
        assert_eq!(lines[2]["success"], json!(true));
    }
}
