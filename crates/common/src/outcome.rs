//! Structured execution results.
//!
//! Adapters return `Result<ExecutionOutput, FlowlineError>` so callers
//! branch on a discriminant instead of probing a response map for an
//! `error` key.

use serde::{Deserialize, Serialize};

/// Successful output of one flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// The primary output payload, normalized by the adapter.
    pub output: serde_json::Value,

    /// The raw engine response, kept for debugging and tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,

    /// Session id the engine associated with this execution, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ExecutionOutput {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            raw: None,
            session_id: None,
        }
    }

    pub fn text(output: impl Into<String>) -> Self {
        Self::new(serde_json::Value::String(output.into()))
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
