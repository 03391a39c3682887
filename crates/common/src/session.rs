//! Conversation sessions.
//!
//! A session correlates a sequence of routing decisions under one
//! conversation id. Persistence is external and best-effort: losing a
//! session affects only conversational continuity for that one id.

use crate::backend::{now_millis, BackendKind};
use serde::{Deserialize, Serialize};

/// One routed question within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    /// The user's question.
    pub question: String,

    /// Universal id of the flow that answered it.
    pub flow_id: String,

    /// Backend that executed the flow.
    pub backend: BackendKind,

    /// When the turn completed (Unix millis).
    pub timestamp: u64,
}

/// A conversation correlating routing decisions across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Caller-supplied conversation id.
    pub id: String,

    /// Backend that served the most recent turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,

    /// Turns in arrival order.
    #[serde(default)]
    pub history: Vec<SessionTurn>,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,

    /// Last update timestamp (Unix millis).
    pub updated_at: u64,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            backend: None,
            history: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a completed turn and bump the update timestamp.
    pub fn record_turn(
        &mut self,
        question: impl Into<String>,
        flow_id: impl Into<String>,
        backend: BackendKind,
    ) {
        let now = now_millis();
        self.history.push(SessionTurn {
            question: question.into(),
            flow_id: flow_id.into(),
            backend,
            timestamp: now,
        });
        self.backend = Some(backend);
        self.updated_at = now;
    }
}
