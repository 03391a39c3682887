//! The backend contract and the external collaborator seams.
//!
//! These traits are defined in `flowline-common` so the coordinator crate
//! and concrete adapter crates can reference them without circular
//! dependencies. Concrete adapters own their connection handles; the core
//! never assumes anything about the remote engine beyond what these calls
//! report.

use crate::backend::{BackendConfig, BackendKind};
use crate::error::{FlowlineError, Result};
use crate::flow::{Flow, FlowPerformance};
use crate::outcome::ExecutionOutput;
use crate::session::Session;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The capability contract every concrete backend adapter implements.
///
/// Side effects are confined to network I/O against the remote engine.
/// Discovery fails soft (empty list on any error); execution returns a
/// structured [`FlowlineError::Execution`] for known remote failures.
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    /// The platform kind this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// Establish the adapter's connection. Returns `false` (or an error)
    /// when the engine is unreachable.
    async fn connect(&self) -> Result<bool>;

    /// Tear down the adapter's connection.
    async fn disconnect(&self);

    /// Probe liveness. Idempotent and side-effect-free beyond the probe.
    async fn health_check(&self) -> bool;

    /// Enumerate the flows this backend hosts. Fails soft: returns an
    /// empty list on any error, never an `Err`.
    async fn discover_flows(&self) -> Vec<Flow>;

    /// Execute one flow with a text input.
    ///
    /// `flow_id` is the backend's own id, not the universal id.
    async fn execute_flow(
        &self,
        flow_id: &str,
        input: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        session_id: Option<&str>,
    ) -> Result<ExecutionOutput>;

    /// Engine-reported performance for one flow, when the platform exposes
    /// execution statistics.
    async fn get_performance_metrics(&self, _flow_id: &str) -> Option<FlowPerformance> {
        None
    }
}

/// Constructor signature the factory holds per backend kind.
pub type BackendConstructor =
    Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn WorkflowBackend>> + Send + Sync>;

/// Static map from backend kind to adapter constructor.
///
/// Each adapter crate registers itself explicitly at startup; there is no
/// runtime scanning for implementations.
#[derive(Default)]
pub struct BackendFactory {
    constructors: HashMap<BackendKind, BackendConstructor>,
}

impl BackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a kind, replacing any previous one.
    pub fn register<F>(&mut self, kind: BackendKind, constructor: F)
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn WorkflowBackend>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    /// Build an adapter for `kind` from its configuration.
    pub fn build(&self, kind: BackendKind, config: &BackendConfig) -> Result<Arc<dyn WorkflowBackend>> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| FlowlineError::UnknownBackend(kind.to_string()))?;
        constructor(config)
    }

    /// Kinds this factory can construct.
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.constructors.keys().copied().collect()
    }
}

/// External session persistence, consumed fail-soft by the coordinator.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, session: &Session) -> Result<bool>;
    async fn load_session(&self, id: &str) -> Result<Option<Session>>;
    async fn delete_session(&self, id: &str) -> Result<bool>;
}

/// External tracing sink, consumed fail-soft and no-op when disabled.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Open a trace; `None` means the sink is disabled or unavailable.
    async fn create_trace(&self, name: &str, metadata: serde_json::Value) -> Option<String>;

    /// Attach an observation to an open trace.
    async fn add_observation(&self, trace_id: &str, data: serde_json::Value);

    /// Attach a named score to an open trace.
    async fn add_score(&self, trace_id: &str, name: &str, value: f64);
}
