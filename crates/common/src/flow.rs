//! Backend-agnostic flow descriptors.
//!
//! A [`Flow`] is the router's view of one invokable pipeline on a remote
//! engine. Flows are immutable within one cache window: the registry holds
//! them as `Arc<Vec<Flow>>` and replaces the whole list on refresh, never
//! patching entries in place.

use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};

/// Capabilities a flow can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCapability {
    TextGeneration,
    DocumentSearch,
    DataAnalysis,
    Automation,
    Integration,
    Conversation,
}

/// Rolling performance snapshot for a flow or a (backend, intent) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPerformance {
    /// Mean latency over the scored window, in milliseconds.
    pub avg_latency_ms: f64,

    /// Fraction of successful executions over the scored window, in [0, 1].
    pub success_rate: f64,

    /// Number of records the snapshot was computed from.
    pub sample_count: u64,
}

/// A backend-agnostic descriptor of one remote workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Globally unique id, namespaced by backend kind: `"<kind>:<flow id>"`.
    pub universal_id: String,

    /// The id the owning backend uses for this flow.
    pub backend_flow_id: String,

    /// The backend that hosts this flow.
    pub backend: BackendKind,

    /// Human-readable name.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Keywords used to match this flow against a resolved intent.
    #[serde(default)]
    pub intent_keywords: Vec<String>,

    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<FlowCapability>,

    /// Accepted input content types.
    #[serde(default)]
    pub input_types: Vec<String>,

    /// Produced output content types.
    #[serde(default)]
    pub output_types: Vec<String>,

    /// Last-known performance snapshot, if the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<FlowPerformance>,
}

impl Flow {
    /// Create a flow descriptor, deriving the universal id from the backend
    /// kind and the backend's own flow id.
    pub fn new(
        backend: BackendKind,
        backend_flow_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let backend_flow_id = backend_flow_id.into();
        Self {
            universal_id: format!("{}:{}", backend, backend_flow_id),
            backend_flow_id,
            backend,
            name: name.into(),
            description: String::new(),
            intent_keywords: vec![],
            capabilities: vec![],
            input_types: vec![],
            output_types: vec![],
            performance: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.intent_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<FlowCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_performance(mut self, performance: FlowPerformance) -> Self {
        self.performance = Some(performance);
        self
    }

    /// Number of intent keywords this flow advertises. Higher counts signal
    /// a more specific flow and raise its match score.
    pub fn keyword_count(&self) -> usize {
        self.intent_keywords.len()
    }
}
