//! Backend ownership, connection lifecycle, and the TTL-bounded flow cache.
//!
//! The registry is the single owner of the registered backend set. Fan-out
//! operations (connect sweep, health sweep) probe concurrently, give every
//! probe its own timeout, and isolate per-backend failure so one slow or
//! broken backend never stalls the others. The flow cache is replaced
//! wholesale per backend — concurrent readers always see some complete
//! prior write, never a partial merge.

use flowline_common::{
    BackendConfig, BackendFactory, BackendKind, Flow, FlowlineError, HealthStatus, Result,
    WorkflowBackend,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A backend instance under registry ownership.
pub struct RegisteredBackend {
    pub backend: Arc<dyn WorkflowBackend>,
    pub config: BackendConfig,
    pub connected: bool,
    pub health: Option<HealthStatus>,
}

struct FlowCacheEntry {
    flows: Arc<Vec<Flow>>,
    fetched_at: Instant,
}

/// Owns registered backends and mediates their discovery, connection, and
/// health lifecycle.
pub struct BackendRegistry {
    backends: RwLock<HashMap<BackendKind, RegisteredBackend>>,
    flow_cache: RwLock<HashMap<BackendKind, FlowCacheEntry>>,
    cache_ttl: Duration,
    probe_timeout: Duration,
}

impl BackendRegistry {
    pub fn new(cache_ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
            flow_cache: RwLock::new(HashMap::new()),
            cache_ttl,
            probe_timeout,
        }
    }

    /// Register a backend, replacing any previous entry of the same kind.
    /// Replacing also drops that kind's flow cache.
    pub async fn register(&self, backend: Arc<dyn WorkflowBackend>, config: BackendConfig) {
        let kind = backend.kind();
        let replaced = self
            .backends
            .write()
            .await
            .insert(
                kind,
                RegisteredBackend {
                    backend,
                    config,
                    connected: false,
                    health: None,
                },
            )
            .is_some();
        if replaced {
            self.flow_cache.write().await.remove(&kind);
        }
        info!(backend = %kind, replaced, "Registered backend");
    }

    /// Build and register backends for every enabled config entry the
    /// factory knows how to construct. Idempotent: re-running replaces
    /// entries by kind rather than duplicating them.
    pub async fn discover_backends(
        &self,
        factory: &BackendFactory,
        configs: &HashMap<String, BackendConfig>,
    ) -> usize {
        let mut registered = 0;
        for (name, config) in configs {
            if !config.enabled {
                debug!(backend = %name, "Skipping disabled backend");
                continue;
            }
            let kind = match BackendKind::from_str(name) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(backend = %name, error = %e, "Unrecognized backend kind in config");
                    continue;
                }
            };
            match factory.build(kind, config) {
                Ok(backend) => {
                    self.register(backend, config.clone()).await;
                    registered += 1;
                }
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Failed to construct backend adapter");
                }
            }
        }
        registered
    }

    /// Connect one backend. Failure marks its health false but keeps the
    /// entry registered so a later retry can succeed without
    /// re-registration.
    pub async fn connect(&self, kind: BackendKind) -> Result<bool> {
        let backend = self.backend(kind).await?;
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, backend.connect()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (connected, status) = match outcome {
            Ok(Ok(true)) => (true, HealthStatus::up(elapsed_ms)),
            Ok(Ok(false)) => (false, HealthStatus::down("connect refused")),
            Ok(Err(e)) => {
                warn!(backend = %kind, error = %e, "Backend connect failed");
                (false, HealthStatus::down(e.to_string()))
            }
            Err(_) => {
                warn!(backend = %kind, timeout_ms = self.probe_timeout.as_millis() as u64, "Backend connect timed out");
                (false, HealthStatus::down("connect timed out"))
            }
        };

        self.apply_probe(kind, Some(connected), status).await;
        Ok(connected)
    }

    /// Connect every registered backend concurrently. Per-backend outcomes
    /// are isolated; the sweep completes once every probe has returned or
    /// hit its own timeout.
    pub async fn connect_all(&self) -> HashMap<BackendKind, bool> {
        let targets = self.backend_arcs().await;
        let mut probes = JoinSet::new();
        let timeout = self.probe_timeout;
        for (kind, backend) in targets {
            probes.spawn(async move {
                let started = Instant::now();
                let outcome = tokio::time::timeout(timeout, backend.connect()).await;
                (kind, started.elapsed().as_millis() as u64, outcome)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = probes.join_next().await {
            let Ok((kind, elapsed_ms, outcome)) = joined else {
                continue;
            };
            let (connected, status) = match outcome {
                Ok(Ok(true)) => (true, HealthStatus::up(elapsed_ms)),
                Ok(Ok(false)) => (false, HealthStatus::down("connect refused")),
                Ok(Err(e)) => (false, HealthStatus::down(e.to_string())),
                Err(_) => (false, HealthStatus::down("connect timed out")),
            };
            if !connected {
                warn!(backend = %kind, error = ?status.error, "Backend connect failed in sweep");
            }
            self.apply_probe(kind, Some(connected), status).await;
            results.insert(kind, connected);
        }
        results
    }

    /// Probe one backend's liveness right now and update its cached
    /// status. This is the re-check routing trusts at decision time.
    pub async fn health_check(&self, kind: BackendKind) -> Result<HealthStatus> {
        let backend = self.backend(kind).await?;
        let status = Self::probe(backend, self.probe_timeout).await;
        self.apply_probe(kind, None, status.clone()).await;
        Ok(status)
    }

    /// Probe every backend concurrently, each probe with its own timeout.
    /// One backend's failure or hang never aborts the others.
    pub async fn health_check_all(&self) -> HashMap<BackendKind, HealthStatus> {
        let targets = self.backend_arcs().await;
        let mut probes = JoinSet::new();
        let timeout = self.probe_timeout;
        for (kind, backend) in targets {
            probes.spawn(async move { (kind, Self::probe(backend, timeout).await) });
        }

        let mut results = HashMap::new();
        while let Some(joined) = probes.join_next().await {
            let Ok((kind, status)) = joined else { continue };
            if !status.healthy {
                warn!(backend = %kind, error = ?status.error, "Health probe negative");
            }
            self.apply_probe(kind, None, status.clone()).await;
            results.insert(kind, status);
        }
        results
    }

    async fn probe(backend: Arc<dyn WorkflowBackend>, timeout: Duration) -> HealthStatus {
        let started = Instant::now();
        match tokio::time::timeout(timeout, backend.health_check()).await {
            Ok(true) => HealthStatus::up(started.elapsed().as_millis() as u64),
            Ok(false) => HealthStatus::down("health probe returned false"),
            Err(_) => HealthStatus::down("health probe timed out"),
        }
    }

    /// Cached flow view for one backend.
    ///
    /// Returns the cached list while it is younger than the TTL; otherwise
    /// calls `discover_flows()` (fail-soft, with its own timeout) and
    /// atomically replaces the cache entry. Flow lists are immutable
    /// within a cache window — never merged or patched.
    pub async fn flows(&self, kind: BackendKind) -> Result<Arc<Vec<Flow>>> {
        {
            let cache = self.flow_cache.read().await;
            if let Some(entry) = cache.get(&kind) {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.flows.clone());
                }
            }
        }

        let backend = self.backend(kind).await?;
        let mut flows = match tokio::time::timeout(self.probe_timeout, backend.discover_flows()).await
        {
            Ok(flows) => flows,
            Err(_) => {
                warn!(backend = %kind, "Flow discovery timed out, caching empty list");
                vec![]
            }
        };

        // Stitch in engine-reported performance where the adapter has it.
        for flow in &mut flows {
            if flow.performance.is_none() {
                flow.performance = backend.get_performance_metrics(&flow.backend_flow_id).await;
            }
        }

        debug!(backend = %kind, count = flows.len(), "Refreshed flow cache");
        let flows = Arc::new(flows);
        self.flow_cache.write().await.insert(
            kind,
            FlowCacheEntry {
                flows: flows.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(flows)
    }

    /// Look up a flow by universal id: cache first, then a discovery sweep
    /// over connected backends on miss.
    pub async fn find_flow(&self, universal_id: &str) -> Result<Option<Flow>> {
        {
            let cache = self.flow_cache.read().await;
            for entry in cache.values() {
                if let Some(flow) = entry.flows.iter().find(|f| f.universal_id == universal_id) {
                    return Ok(Some(flow.clone()));
                }
            }
        }

        for kind in self.connected_kinds().await {
            let flows = self.flows(kind).await?;
            if let Some(flow) = flows.iter().find(|f| f.universal_id == universal_id) {
                return Ok(Some(flow.clone()));
            }
        }
        Ok(None)
    }

    /// The adapter handle for one kind.
    pub async fn backend(&self, kind: BackendKind) -> Result<Arc<dyn WorkflowBackend>> {
        self.backends
            .read()
            .await
            .get(&kind)
            .map(|rb| rb.backend.clone())
            .ok_or_else(|| FlowlineError::UnknownBackend(kind.to_string()))
    }

    pub async fn is_registered(&self, kind: BackendKind) -> bool {
        self.backends.read().await.contains_key(&kind)
    }

    pub async fn is_connected(&self, kind: BackendKind) -> bool {
        self.backends
            .read()
            .await
            .get(&kind)
            .map_or(false, |rb| rb.connected)
    }

    /// Last recorded health status for one kind, as of the most recent
    /// probe. Routing re-checks live instead of trusting this.
    pub async fn health_status(&self, kind: BackendKind) -> Option<HealthStatus> {
        self.backends
            .read()
            .await
            .get(&kind)
            .and_then(|rb| rb.health.clone())
    }

    /// All registered kinds, in stable name order.
    pub async fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<BackendKind> = self.backends.read().await.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Registered kinds currently marked connected, in stable name order.
    pub async fn connected_kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<BackendKind> = self
            .backends
            .read()
            .await
            .iter()
            .filter(|(_, rb)| rb.connected)
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }

    async fn backend_arcs(&self) -> Vec<(BackendKind, Arc<dyn WorkflowBackend>)> {
        self.backends
            .read()
            .await
            .iter()
            .map(|(kind, rb)| (*kind, rb.backend.clone()))
            .collect()
    }

    async fn apply_probe(
        &self,
        kind: BackendKind,
        connected: Option<bool>,
        status: HealthStatus,
    ) {
        let mut backends = self.backends.write().await;
        if let Some(entry) = backends.get_mut(&kind) {
            if let Some(connected) = connected {
                entry.connected = connected;
            }
            entry.health = Some(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowline_common::ExecutionOutput;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeBackend {
        kind: BackendKind,
        healthy: AtomicBool,
        connect_ok: bool,
        probe_delay: Option<Duration>,
        flows: Vec<Flow>,
        discover_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(kind: BackendKind) -> Self {
            Self {
                kind,
                healthy: AtomicBool::new(true),
                connect_ok: true,
                probe_delay: None,
                flows: vec![],
                discover_calls: AtomicUsize::new(0),
            }
        }

        fn with_flows(mut self, flows: Vec<Flow>) -> Self {
            self.flows = flows;
            self
        }
    }

    #[async_trait]
    impl WorkflowBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }
        async fn connect(&self) -> Result<bool> {
            Ok(self.connect_ok)
        }
        async fn disconnect(&self) {}
        async fn health_check(&self) -> bool {
            if let Some(delay) = self.probe_delay {
                tokio::time::sleep(delay).await;
            }
            self.healthy.load(Ordering::SeqCst)
        }
        async fn discover_flows(&self) -> Vec<Flow> {
            self.discover_calls.fetch_add(1, Ordering::SeqCst);
            self.flows.clone()
        }
        async fn execute_flow(
            &self,
            _flow_id: &str,
            _input: &str,
            _params: &serde_json::Map<String, serde_json::Value>,
            _session_id: Option<&str>,
        ) -> Result<ExecutionOutput> {
            Ok(ExecutionOutput::text("ok"))
        }
    }

    fn registry(ttl: Duration) -> BackendRegistry {
        BackendRegistry::new(ttl, Duration::from_millis(100))
    }

    fn config() -> BackendConfig {
        BackendConfig::new("http://localhost:5678")
    }

    #[tokio::test]
    async fn register_replaces_by_kind() {
        let reg = registry(Duration::from_secs(60));
        reg.register(Arc::new(FakeBackend::new(BackendKind::N8n)), config())
            .await;
        reg.register(Arc::new(FakeBackend::new(BackendKind::N8n)), config())
            .await;
        assert_eq!(reg.kinds().await, vec![BackendKind::N8n]);
    }

    #[tokio::test]
    async fn failed_connect_keeps_backend_registered() {
        let reg = registry(Duration::from_secs(60));
        let mut backend = FakeBackend::new(BackendKind::Langflow);
        backend.connect_ok = false;
        reg.register(Arc::new(backend), config()).await;

        assert!(!reg.connect(BackendKind::Langflow).await.unwrap());
        assert!(reg.is_registered(BackendKind::Langflow).await);
        assert!(!reg.is_connected(BackendKind::Langflow).await);
        let status = reg.health_status(BackendKind::Langflow).await.unwrap();
        assert!(!status.healthy);
    }

    #[tokio::test]
    async fn connect_unknown_kind_errors() {
        let reg = registry(Duration::from_secs(60));
        let err = reg.connect(BackendKind::Flowise).await.unwrap_err();
        assert_eq!(err.kind(), "unknown_backend");
    }

    #[tokio::test]
    async fn flow_cache_serves_within_ttl() {
        let reg = registry(Duration::from_secs(60));
        let backend = Arc::new(
            FakeBackend::new(BackendKind::N8n)
                .with_flows(vec![Flow::new(BackendKind::N8n, "wf-1", "One")]),
        );
        reg.register(backend.clone(), config()).await;

        let first = reg.flows(BackendKind::N8n).await.unwrap();
        let second = reg.flows(BackendKind::N8n).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.discover_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_flow_cache_is_refreshed_wholesale() {
        let reg = registry(Duration::ZERO);
        let backend = Arc::new(
            FakeBackend::new(BackendKind::N8n)
                .with_flows(vec![Flow::new(BackendKind::N8n, "wf-1", "One")]),
        );
        reg.register(backend.clone(), config()).await;

        reg.flows(BackendKind::N8n).await.unwrap();
        reg.flows(BackendKind::N8n).await.unwrap();
        assert_eq!(backend.discover_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn health_sweep_isolates_a_hung_probe() {
        let reg = registry(Duration::from_secs(60));

        let mut hung = FakeBackend::new(BackendKind::N8n);
        hung.probe_delay = Some(Duration::from_secs(5));
        reg.register(Arc::new(hung), config()).await;
        reg.register(Arc::new(FakeBackend::new(BackendKind::Flowise)), config())
            .await;

        let started = Instant::now();
        let statuses = reg.health_check_all().await;
        // Bounded by the per-probe timeout, not the hung probe's delay.
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(!statuses[&BackendKind::N8n].healthy);
        assert!(statuses[&BackendKind::Flowise].healthy);
    }

    #[tokio::test]
    async fn find_flow_searches_connected_backends_on_miss() {
        let reg = registry(Duration::from_secs(60));
        let backend = Arc::new(
            FakeBackend::new(BackendKind::Flowise)
                .with_flows(vec![Flow::new(BackendKind::Flowise, "chat-1", "Chat")]),
        );
        reg.register(backend, config()).await;
        reg.connect(BackendKind::Flowise).await.unwrap();

        let found = reg.find_flow("flowise:chat-1").await.unwrap();
        assert_eq!(found.unwrap().name, "Chat");
        assert!(reg.find_flow("flowise:nope").await.unwrap().is_none());
    }
}
