//! Per-request execution: classify, route, execute, fall back, record.
//!
//! The coordinator drives one request through
//! `CLASSIFY -> ROUTE -> EXECUTE -> (SUCCESS | RETRY_NEXT | EXHAUSTED) ->
//! RECORD -> RESPOND`. Every attempt is recorded against its own
//! (backend, intent) key, so a fallback's success never inflates the
//! primary's score and the primary's failure always lands on the primary.
//! Session persistence and tracing are best-effort: their errors are
//! logged and never propagated to the caller.

use crate::config::CoordinatorConfig;
use crate::intent::IntentClassifier;
use crate::registry::BackendRegistry;
use crate::router::{RoutingCandidate, ScoreBreakdown, SelectionMethod, UniversalRouter};
use crate::tracker::PerformanceTracker;
use flowline_common::{
    BackendFactory, BackendKind, FlowlineError, Result, Session, SessionStore, TraceSink,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One routing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The natural-language question.
    pub question: String,

    /// Explicit intent, overriding classification at confidence 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    /// Backend override. `None`, empty, or `"auto"` routes intelligently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Conversation id for session continuity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Extra parameters forwarded verbatim to the adapter.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            intent: None,
            backend: None,
            session_id: None,
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Routing and execution detail attached to a successful response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub backend_used: String,
    pub flow_id: String,
    pub flow_name: String,
    pub routing_score: f64,
    pub routing_breakdown: ScoreBreakdown,
    pub intent_classified: String,
    pub intent_confidence: f64,
    pub selection_method: SelectionMethod,
    pub execution_time_ms: u64,
    pub fallback_used: bool,
    pub attempts: u32,
}

/// The outcome of one request: always a structured payload, never a raw
/// stack trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryResponse {
    Success {
        result: serde_json::Value,
        metadata: QueryMetadata,
    },
    Failure {
        error: String,
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
        attempts: u32,
        backends_tried: Vec<String>,
    },
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Drives requests end to end over one shared registry, tracker, and
/// router instance.
pub struct FlowlineCoordinator {
    config: CoordinatorConfig,
    registry: Arc<BackendRegistry>,
    tracker: Arc<PerformanceTracker>,
    router: UniversalRouter,
    classifier: IntentClassifier,
    session_store: Option<Arc<dyn SessionStore>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl FlowlineCoordinator {
    /// Create a coordinator with the default intent table.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        Self::with_classifier(config, IntentClassifier::default())
    }

    /// Create a coordinator with a custom intent table.
    pub fn with_classifier(config: CoordinatorConfig, classifier: IntentClassifier) -> Result<Self> {
        config
            .validate()
            .map_err(|e| FlowlineError::Config(e.to_string()))?;

        let registry = Arc::new(BackendRegistry::new(
            config.flow_cache_ttl(),
            config.per_call_timeout(),
        ));
        let tracker = Arc::new(PerformanceTracker::new(config.performance.clone()));
        let router = UniversalRouter::new(
            registry.clone(),
            tracker.clone(),
            classifier.clone(),
            config.routing.clone(),
        );

        info!(
            backends = config.backends.len(),
            fallback_enabled = config.fallback_enabled,
            "Initializing Flowline coordinator"
        );

        Ok(Self {
            config,
            registry,
            tracker,
            router,
            classifier,
            session_store: None,
            trace_sink: None,
        })
    }

    /// Attach an external session store (best-effort persistence).
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Attach an external tracing sink (fail-soft observability).
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    /// The shared registry, for wiring backends directly.
    pub fn registry(&self) -> Arc<BackendRegistry> {
        self.registry.clone()
    }

    /// The shared performance tracker.
    pub fn tracker(&self) -> Arc<PerformanceTracker> {
        self.tracker.clone()
    }

    /// Build, register, and connect backends for every enabled config
    /// entry the factory knows. Returns the number registered.
    pub async fn bootstrap(&self, factory: &BackendFactory) -> usize {
        let registered = self
            .registry
            .discover_backends(factory, &self.config.backends)
            .await;
        let connected = self.registry.connect_all().await;
        info!(
            registered,
            connected = connected.values().filter(|ok| **ok).count(),
            "Bootstrapped backends"
        );
        registered
    }

    /// Execute one request end to end.
    pub async fn execute_query(&self, request: QueryRequest) -> QueryResponse {
        let trace_id = self.create_trace(&request).await;

        let backend_override = match resolve_override(request.backend.as_deref()) {
            Ok(kind) => kind,
            Err(e) => {
                // Surfaced immediately, not retried.
                warn!(backend = ?request.backend, error = %e, "Invalid backend override");
                return self.routing_failure(&request, &trace_id, e).await;
            }
        };

        let decision = match self
            .router
            .select_backend(&request.question, request.intent.as_deref(), backend_override)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Routing failed");
                return self.routing_failure(&request, &trace_id, e).await;
            }
        };

        debug!(
            backend = %decision.backend,
            flow = %decision.flow.universal_id,
            score = decision.score,
            intent = %decision.intent,
            method = ?decision.method,
            alternatives = decision.alternatives.len(),
            "Routing decision made"
        );

        // Primary first, then the ranked fallback order.
        let mut candidates = vec![RoutingCandidate {
            backend: decision.backend,
            flow: decision.flow.clone(),
            composite: decision.score,
            breakdown: decision.breakdown,
        }];
        if self.config.fallback_enabled {
            for alt in &decision.alternatives {
                if candidates.iter().all(|c| c.backend != alt.backend) {
                    candidates.push(alt.clone());
                }
            }
        }

        let mut backends_tried = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            backends_tried.push(candidate.backend.to_string());

            let backend = match self.registry.backend(candidate.backend).await {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(backend = %candidate.backend, error = %e, "Candidate vanished from registry");
                    continue;
                }
            };

            let started = Instant::now();
            let outcome = tokio::time::timeout(
                self.config.per_call_timeout(),
                backend.execute_flow(
                    &candidate.flow.backend_flow_id,
                    &request.question,
                    &request.parameters,
                    request.session_id.as_deref(),
                ),
            )
            .await;
            let latency_ms = started.elapsed().as_millis() as f64;

            // Each attempt lands on its own backend+intent key.
            match outcome {
                Ok(Ok(output)) => {
                    self.tracker
                        .record(candidate.backend, &decision.intent, latency_ms, true);
                    self.observe(
                        &trace_id,
                        json!({
                            "event": "execution_succeeded",
                            "backend": candidate.backend.to_string(),
                            "flow": candidate.flow.universal_id,
                            "attempt": index + 1,
                            "latency_ms": latency_ms,
                        }),
                    )
                    .await;
                    self.score_trace(&trace_id, candidate.composite).await;
                    self.touch_session(&request, candidate).await;

                    if index > 0 {
                        info!(
                            backend = %candidate.backend,
                            attempt = index + 1,
                            "Request succeeded via fallback"
                        );
                    }

                    return QueryResponse::Success {
                        result: output.output,
                        metadata: QueryMetadata {
                            backend_used: candidate.backend.to_string(),
                            flow_id: candidate.flow.universal_id.clone(),
                            flow_name: candidate.flow.name.clone(),
                            routing_score: candidate.composite,
                            routing_breakdown: candidate.breakdown,
                            intent_classified: decision.intent.clone(),
                            intent_confidence: decision.intent_confidence,
                            selection_method: decision.method,
                            execution_time_ms: latency_ms as u64,
                            fallback_used: index > 0,
                            attempts: (index + 1) as u32,
                        },
                    };
                }
                Ok(Err(e)) => {
                    self.tracker
                        .record(candidate.backend, &decision.intent, latency_ms, false);
                    warn!(
                        backend = %candidate.backend,
                        flow = %candidate.flow.universal_id,
                        attempt = index + 1,
                        error = %e,
                        "Execution failed, advancing to next candidate"
                    );
                    self.observe(
                        &trace_id,
                        json!({
                            "event": "execution_failed",
                            "backend": candidate.backend.to_string(),
                            "attempt": index + 1,
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                }
                Err(_) => {
                    self.tracker
                        .record(candidate.backend, &decision.intent, latency_ms, false);
                    warn!(
                        backend = %candidate.backend,
                        attempt = index + 1,
                        timeout_ms = self.config.per_call_timeout_ms,
                        "Execution timed out, advancing to next candidate"
                    );
                    self.observe(
                        &trace_id,
                        json!({
                            "event": "execution_timed_out",
                            "backend": candidate.backend.to_string(),
                            "attempt": index + 1,
                        }),
                    )
                    .await;
                }
            }
        }

        let attempts = backends_tried.len() as u32;
        warn!(attempts, "All fallback candidates exhausted");
        QueryResponse::Failure {
            error: format!("all {attempts} candidate backend(s) failed"),
            kind: "execution_failure".into(),
            intent: Some(decision.intent),
            attempts,
            backends_tried,
        }
    }

    async fn routing_failure(
        &self,
        request: &QueryRequest,
        trace_id: &Option<String>,
        error: FlowlineError,
    ) -> QueryResponse {
        let intent = request
            .intent
            .clone()
            .unwrap_or_else(|| self.classifier.classify(&request.question).intent);
        self.observe(
            trace_id,
            json!({
                "event": "routing_failed",
                "kind": error.kind(),
                "error": error.to_string(),
            }),
        )
        .await;
        QueryResponse::Failure {
            error: error.to_string(),
            kind: error.kind().into(),
            intent: Some(intent),
            attempts: 0,
            backends_tried: vec![],
        }
    }

    async fn create_trace(&self, request: &QueryRequest) -> Option<String> {
        let sink = self.trace_sink.as_ref()?;
        sink.create_trace(
            "execute_query",
            json!({
                "question": request.question,
                "backend": request.backend,
                "session_id": request.session_id,
            }),
        )
        .await
    }

    async fn observe(&self, trace_id: &Option<String>, data: serde_json::Value) {
        if let (Some(sink), Some(id)) = (&self.trace_sink, trace_id) {
            sink.add_observation(id, data).await;
        }
    }

    async fn score_trace(&self, trace_id: &Option<String>, composite: f64) {
        if let (Some(sink), Some(id)) = (&self.trace_sink, trace_id) {
            sink.add_score(id, "routing_composite", composite).await;
        }
    }

    /// Best-effort session update. Losing a session only affects
    /// conversational continuity for that one id.
    async fn touch_session(&self, request: &QueryRequest, candidate: &RoutingCandidate) {
        let Some(store) = &self.session_store else {
            return;
        };
        let Some(id) = &request.session_id else {
            return;
        };

        let mut session = match store.load_session(id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(id.clone()),
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session load failed, starting fresh");
                Session::new(id.clone())
            }
        };
        session.record_turn(
            &request.question,
            &candidate.flow.universal_id,
            candidate.backend,
        );
        if let Err(e) = store.save_session(&session).await {
            warn!(session_id = %id, error = %e, "Session save failed");
        }
    }
}

/// Normalize the wire-level backend override: `None`, empty, and `"auto"`
/// all mean intelligent routing.
fn resolve_override(backend: Option<&str>) -> Result<Option<BackendKind>> {
    match backend {
        None => Ok(None),
        Some(name) if name.is_empty() || name.eq_ignore_ascii_case("auto") => Ok(None),
        Some(name) => BackendKind::from_str(name).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_and_empty_overrides_mean_intelligent() {
        assert_eq!(resolve_override(None).unwrap(), None);
        assert_eq!(resolve_override(Some("")).unwrap(), None);
        assert_eq!(resolve_override(Some("auto")).unwrap(), None);
        assert_eq!(resolve_override(Some("AUTO")).unwrap(), None);
    }

    #[test]
    fn named_override_parses_to_kind() {
        assert_eq!(
            resolve_override(Some("n8n")).unwrap(),
            Some(BackendKind::N8n)
        );
        assert_eq!(
            resolve_override(Some("zapier")).unwrap_err().kind(),
            "unknown_backend"
        );
    }

    #[test]
    fn request_builder_populates_fields() {
        let request = QueryRequest::new("automate the report")
            .with_intent("automation")
            .with_backend("n8n")
            .with_session("conv-9")
            .with_parameter("dry_run", serde_json::Value::Bool(true));

        assert_eq!(request.intent.as_deref(), Some("automation"));
        assert_eq!(request.backend.as_deref(), Some("n8n"));
        assert_eq!(request.session_id.as_deref(), Some("conv-9"));
        assert_eq!(request.parameters["dry_run"], serde_json::Value::Bool(true));
    }

    #[test]
    fn response_serializes_with_status_tag() {
        let failure = QueryResponse::Failure {
            error: "no backends available".into(),
            kind: "no_backends_available".into(),
            intent: Some("conversation".into()),
            attempts: 0,
            backends_tried: vec![],
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "no_backends_available");
    }

    #[tokio::test]
    async fn zero_backends_fails_with_structured_payload() {
        let coordinator = FlowlineCoordinator::new(CoordinatorConfig::default()).unwrap();
        let response = coordinator
            .execute_query(QueryRequest::new("hello there"))
            .await;
        match response {
            QueryResponse::Failure {
                kind,
                attempts,
                backends_tried,
                ..
            } => {
                assert_eq!(kind, "no_backends_available");
                assert_eq!(attempts, 0);
                assert!(backends_tried.is_empty());
            }
            QueryResponse::Success { .. } => panic!("expected failure"),
        }
    }
}
