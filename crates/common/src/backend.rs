//! Backend identity, per-backend configuration, and health reporting.

use crate::error::{FlowlineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of workflow-execution platform a backend adapter talks to.
///
/// The kind namespaces universal flow ids and keys the registry, so each
/// kind can be registered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    N8n,
    Langflow,
    Flowise,
}

impl BackendKind {
    /// All kinds the static factory can know about.
    pub const ALL: [Self; 3] = [Self::N8n, Self::Langflow, Self::Flowise];

    /// Lowercase wire name, also used as the universal-id namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::N8n => "n8n",
            Self::Langflow => "langflow",
            Self::Flowise => "flowise",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = FlowlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "n8n" => Ok(Self::N8n),
            "langflow" => Ok(Self::Langflow),
            "flowise" => Ok(Self::Flowise),
            other => Err(FlowlineError::UnknownBackend(other.to_string())),
        }
    }
}

/// Connection settings for one backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the remote workflow engine.
    pub api_url: String,

    /// API key for authentication. If not set, resolved from the
    /// `FLOWLINE_<KIND>_API_KEY` environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Whether this backend participates in discovery and routing.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Adapter-specific extras (workspace ids, project slugs, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl BackendConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            enabled: true,
            options: serde_json::Map::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Resolve the API key from config or the environment.
    ///
    /// Priority:
    /// 1. Explicit `api_key` in config
    /// 2. `FLOWLINE_<KIND>_API_KEY` environment variable
    pub fn resolve_api_key(&self, kind: BackendKind) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let env_var = format!("FLOWLINE_{}_API_KEY", kind.as_str().to_uppercase());
        std::env::var(env_var).ok()
    }
}

/// Result of the most recent health probe against a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the probe succeeded.
    pub healthy: bool,

    /// Probe completion time (Unix millis).
    pub checked_at: u64,

    /// Probe round-trip latency, when the probe completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// Failure detail, when the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            checked_at: now_millis(),
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            checked_at: now_millis(),
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "zapier".parse::<BackendKind>().unwrap_err();
        assert_eq!(err.kind(), "unknown_backend");
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BackendKind::N8n).unwrap(), "\"n8n\"");
        assert_eq!(
            serde_json::to_string(&BackendKind::Langflow).unwrap(),
            "\"langflow\""
        );
    }

    #[test]
    fn explicit_api_key_wins_over_env() {
        let config = BackendConfig::new("http://localhost:5678").with_api_key("sk-test");
        assert_eq!(
            config.resolve_api_key(BackendKind::N8n).as_deref(),
            Some("sk-test")
        );
    }

    #[test]
    fn config_defaults_to_enabled() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"api_url": "http://localhost:5678"}"#).unwrap();
        assert!(config.enabled);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn health_status_carries_probe_detail() {
        let up = HealthStatus::up(12);
        assert!(up.healthy);
        assert_eq!(up.latency_ms, Some(12));
        assert!(up.checked_at > 0);

        let down = HealthStatus::down("connection refused");
        assert!(!down.healthy);
        assert_eq!(down.error.as_deref(), Some("connection refused"));
    }
}
