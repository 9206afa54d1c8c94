//! Line-delimited engine request/response wire types.
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! → {"engine_id":"omission","case_id":"PE23C50095","document_ids":["a","b"]}
//! ← {"success":true,"engine_id":"omission","findings":[...],"duration_ms":12}
//! ```
//!
//! Engine-level summary keys (everything an engine returned besides its
//! findings) are flattened into the top level of the response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::findings::Finding;

/// Engine id reported when a request line could not be parsed.
pub const UNKNOWN_ENGINE_ID: &str = "unknown";

/// Top-level response keys owned by the protocol; a summary never carries them.
pub const RESERVED_KEYS: &[&str] = &[
    "success",
    "engine_id",
    "findings",
    "error",
    "duration_ms",
    "rejected_findings",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub engine_id: String,
    pub case_id: String,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

impl EngineRequest {
    pub fn new(engine_id: &str, case_id: &str, document_ids: Vec<String>) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            case_id: case_id.to_string(),
            document_ids,
            options: None,
        }
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = Some(options);
        self
    }

    /// Parse one request line.
    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub success: bool,
    pub engine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<Vec<Finding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Findings dropped for failing the evidentiary contract.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rejected_findings: usize,
    #[serde(flatten)]
    pub summary: Map<String, Value>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl EngineResponse {
    pub fn success(engine_id: &str, findings: Vec<Finding>, duration_ms: u64) -> Self {
        Self {
            success: true,
            engine_id: engine_id.to_string(),
            findings: Some(findings),
            error: None,
            duration_ms,
            rejected_findings: 0,
            summary: Map::new(),
        }
    }

    pub fn failure(engine_id: &str, error: &str, duration_ms: u64) -> Self {
        Self {
            success: false,
            engine_id: engine_id.to_string(),
            findings: None,
            error: Some(error.to_string()),
            duration_ms,
            rejected_findings: 0,
            summary: Map::new(),
        }
    }

    pub fn with_summary(mut self, summary: Map<String, Value>) -> Self {
        self.summary = summary
            .into_iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .collect();
        self
    }

    pub fn with_rejected(mut self, rejected: usize) -> Self {
        self.rejected_findings = rejected;
        self
    }

    pub fn findings(&self) -> &[Finding] {
        self.findings.as_deref().unwrap_or(&[])
    }

    /// Serialize as a single protocol line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"engine_id":{},"error":"failed to encode response: {}","duration_ms":{}}}"#,
                Value::String(self.engine_id.clone()),
                e.to_string().replace('"', "'"),
                self.duration_ms
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_options_are_optional() {
        let req = EngineRequest::parse_line(
            r#"{"engine_id":"coordination","case_id":"PE23C50095","document_ids":["mock-police","mock-sw"]}"#,
        )
        .unwrap();
        assert_eq!(req.engine_id, "coordination");
        assert!(req.options.is_none());
        assert_eq!(req.document_ids.len(), 2);
    }

    #[test]
    fn request_without_engine_id_is_rejected() {
        assert!(EngineRequest::parse_line(r#"{"case_id":"x"}"#).is_err());
        assert!(EngineRequest::parse_line("not json").is_err());
    }

    #[test]
    fn summary_keys_are_flattened() {
        let mut summary = Map::new();
        summary.insert("sharedLanguage".into(), json!(["phrase"]));
        let resp = EngineResponse::success("coordination", Vec::new(), 5).with_summary(summary);
        let value: Value = serde_json::from_str(&resp.to_line()).unwrap();
        assert_eq!(value["sharedLanguage"], json!(["phrase"]));
        assert_eq!(value["success"], json!(true));
        assert!(value.get("rejected_findings").is_none());
    }

    #[test]
    fn summary_cannot_shadow_protocol_keys() {
        let mut summary = Map::new();
        summary.insert("success".into(), json!(false));
        summary.insert("duration_ms".into(), json!(999_999));
        summary.insert("note".into(), json!("kept"));
        let resp = EngineResponse::success("bias", Vec::new(), 1).with_summary(summary);
        let line = resp.to_line();
        assert_eq!(line.matches("\"success\"").count(), 1);

        let parsed: EngineResponse = serde_json::from_str(&line).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.duration_ms, 1);
        assert_eq!(parsed.summary["note"], json!("kept"));
    }

    #[test]
    fn failure_has_error_and_no_findings() {
        let resp = EngineResponse::failure("omission", "boom", 3);
        let value: Value = serde_json::from_str(&resp.to_line()).unwrap();
        assert_eq!(value["error"], json!("boom"));
        assert!(value.get("findings").is_none());
        assert!(resp.findings().is_empty());
    }

    #[test]
    fn response_parses_extra_keys_into_summary() {
        let resp: EngineResponse = serde_json::from_value(json!({
            "success": true,
            "engine_id": "coordination",
            "findings": [],
            "duration_ms": 1,
            "independenceViolations": []
        }))
        .unwrap();
        assert!(resp.summary.contains_key("independenceViolations"));
    }
}
