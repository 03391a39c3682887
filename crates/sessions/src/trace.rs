//! Trace sink implementations.
//!
//! The coordinator emits traces fail-soft: a sink returning `None` from
//! `create_trace` simply disables observation for that request.

use async_trait::async_trait;
use flowline_common::TraceSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

/// Disabled tracing: every call is a no-op.
#[derive(Debug, Default)]
pub struct NoopTraceSink;

#[async_trait]
impl TraceSink for NoopTraceSink {
    async fn create_trace(&self, _name: &str, _metadata: serde_json::Value) -> Option<String> {
        None
    }

    async fn add_observation(&self, _trace_id: &str, _data: serde_json::Value) {}

    async fn add_score(&self, _trace_id: &str, _name: &str, _value: f64) {}
}

/// One recorded trace event, retained in the sink's bounded tail.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Created { trace_id: String, name: String },
    Observation { trace_id: String, data: serde_json::Value },
    Score { trace_id: String, name: String, value: f64 },
}

impl TraceEvent {
    pub fn trace_id(&self) -> &str {
        match self {
            Self::Created { trace_id, .. }
            | Self::Observation { trace_id, .. }
            | Self::Score { trace_id, .. } => trace_id,
        }
    }
}

/// Emits trace activity as `tracing` events and keeps a bounded tail of
/// recent events for inspection.
pub struct LogTraceSink {
    max_events: usize,
    events: Mutex<VecDeque<TraceEvent>>,
}

impl LogTraceSink {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            events: Mutex::new(VecDeque::with_capacity(max_events)),
        }
    }

    /// Recent events, oldest first.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().iter().cloned().collect()
    }

    fn push(&self, event: TraceEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }
}

impl Default for LogTraceSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl TraceSink for LogTraceSink {
    async fn create_trace(&self, name: &str, metadata: serde_json::Value) -> Option<String> {
        let trace_id = Uuid::new_v4().to_string();
        debug!(trace_id = %trace_id, name = %name, metadata = %metadata, "Trace created");
        self.push(TraceEvent::Created {
            trace_id: trace_id.clone(),
            name: name.to_string(),
        });
        Some(trace_id)
    }

    async fn add_observation(&self, trace_id: &str, data: serde_json::Value) {
        debug!(trace_id = %trace_id, data = %data, "Trace observation");
        self.push(TraceEvent::Observation {
            trace_id: trace_id.to_string(),
            data,
        });
    }

    async fn add_score(&self, trace_id: &str, name: &str, value: f64) {
        debug!(trace_id = %trace_id, score = %name, value, "Trace score");
        self.push(TraceEvent::Score {
            trace_id: trace_id.to_string(),
            name: name.to_string(),
            value,
        });
    }
}
