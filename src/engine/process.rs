//! Engines implemented by an external process.
//!
//! The process is spawned once per invocation. It receives the request as a
//! single JSON line on stdin (documents inlined) and must answer with one
//! JSON line on stdout: either raw engine output in any shape accepted by
//! [`super::normalize`], or a complete `EngineResponse`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::protocol::RESERVED_KEYS;
use super::{AnalysisEngine, EngineContext, InputRequirements};
use crate::errors::EngineError;

#[derive(Debug, Clone)]
pub struct ProcessEngine {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub min_documents: usize,
}

impl ProcessEngine {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            working_dir: None,
            min_documents: 1,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_min_documents(mut self, min_documents: usize) -> Self {
        self.min_documents = min_documents;
        self
    }

    /// Command and arguments as one display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn request_line(ctx: &EngineContext) -> Result<String, EngineError> {
        let request = json!({
            "engine_id": ctx.engine_id.as_str(),
            "case_id": ctx.case_id,
            "document_ids": ctx.document_ids(),
            "options": ctx.options,
            "documents": ctx.documents,
        });
        serde_json::to_string(&request)
            .map_err(|e| EngineError::failure(ctx.engine_id.as_str(), e.to_string()))
    }
}

/// Unwrap a full protocol response into raw output, or pass raw output through.
fn unwrap_response(engine_id: &str, value: Value) -> Result<Value, EngineError> {
    let Value::Object(mut map) = value else {
        return Ok(value);
    };
    if !(map.contains_key("success") && map.contains_key("engine_id")) {
        return Ok(Value::Object(map));
    }
    if map.get("success").and_then(Value::as_bool) != Some(true) {
        let message = map
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("engine process reported failure")
            .to_string();
        return Err(EngineError::failure(engine_id, message));
    }
    for key in RESERVED_KEYS.iter().filter(|k| **k != "findings") {
        map.remove(*key);
    }
    if !map.contains_key("findings") {
        map.insert("findings".to_string(), Value::Array(Vec::new()));
    }
    Ok(Value::Object(map))
}

#[async_trait]
impl AnalysisEngine for ProcessEngine {
    fn requirements(&self) -> InputRequirements {
        InputRequirements::min_documents(self.min_documents)
    }

    async fn analyze(&self, ctx: &EngineContext) -> Result<Value, EngineError> {
        let engine_id = ctx.engine_id.as_str();
        let line = Self::request_line(ctx)?;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .env("FCIP_ENGINE_ID", engine_id)
            .env("FCIP_CASE_ID", &ctx.case_id)
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(engine = engine_id, command = %self.command_line(), "Spawning engine process");
        let mut child = command.spawn().map_err(|source| EngineError::SpawnFailed {
            command: self.command_line(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{line}\n").as_bytes())
                .await
                .map_err(|e| EngineError::failure(engine_id, format!("failed to write request: {e}")))?;
            // stdin is dropped here, closing the pipe
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::failure(engine_id, "engine process has no stdout"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut answer = None;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::failure(engine_id, format!("failed to read output: {e}")))?
        {
            if !line.trim().is_empty() {
                answer = Some(line);
                break;
            }
        }
        drop(lines);

        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::failure(engine_id, format!("failed to wait: {e}")))?;

        let Some(answer) = answer else {
            return Err(EngineError::failure(
                engine_id,
                format!("engine process produced no output (exit status {status})"),
            ));
        };
        let value: Value = serde_json::from_str(answer.trim())
            .map_err(|e| EngineError::failure(engine_id, format!("invalid JSON output: {e}")))?;
        unwrap_response(engine_id, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineId;
    use crate::engine::builtin::test_support::{ctx, dated};

    #[test]
    fn command_line_joins_args() {
        let engine = ProcessEngine::new("python3").with_args(vec!["bias.py".into(), "-q".into()]);
        assert_eq!(engine.command_line(), "python3 bias.py -q");
    }

    #[test]
    fn full_response_is_unwrapped_to_raw_output() {
        let raw = unwrap_response(
            "bias",
            json!({"success": true, "engine_id": "bias", "duration_ms": 4,
                   "findings": [{"title": "x"}], "scores": [1]}),
        )
        .unwrap();
        assert_eq!(raw, json!({"findings": [{"title": "x"}], "scores": [1]}));

        let err = unwrap_response(
            "bias",
            json!({"success": false, "engine_id": "bias", "error": "model offline"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("model offline"));

        let passthrough = unwrap_response("bias", json!([{"title": "y"}])).unwrap();
        assert_eq!(passthrough, json!([{"title": "y"}]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_engine_answers_on_stdout() {
        let engine = ProcessEngine::new("sh").with_args(vec![
            "-c".into(),
            r#"read line; echo '[{"title":"from shell","document_id":"a","quote":"The mother was evasive"}]'"#
                .into(),
        ]);
        let docs = vec![dated("a", 2023, 1, 1, "Police", "The mother was evasive.")];
        let out = engine.analyze(&ctx(EngineId::Bias, docs)).await.unwrap();
        assert_eq!(out[0]["title"], json!("from shell"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_process_is_a_failure() {
        let engine = ProcessEngine::new("sh").with_args(vec!["-c".into(), "read line; exit 3".into()]);
        let docs = vec![dated("a", 2023, 1, 1, "Police", "Text.")];
        let err = engine.analyze(&ctx(EngineId::Bias, docs)).await.unwrap_err();
        assert!(err.to_string().contains("no output"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let engine = ProcessEngine::new("/nonexistent/fcip-engine");
        let docs = vec![dated("a", 2023, 1, 1, "Police", "Text.")];
        let err = engine.analyze(&ctx(EngineId::Bias, docs)).await.unwrap_err();
        assert!(matches!(err, EngineError::SpawnFailed { .. }));
    }
}
