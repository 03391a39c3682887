//! In-memory session storage.

use async_trait::async_trait;
use flowline_common::{Result, Session, SessionStore};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// A bounded in-memory session store.
///
/// When the store is at capacity, saving a new session evicts the one
/// with the oldest `updated_at` — stale conversations make room for
/// active ones.
pub struct InMemorySessionStore {
    max_sessions: usize,
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of sessions currently held.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_session(&self, session: &Session) -> Result<bool> {
        let mut sessions = self.sessions.write().await;

        let is_new = !sessions.contains_key(&session.id);
        if is_new && sessions.len() >= self.max_sessions {
            let stalest = sessions
                .values()
                .min_by_key(|s| s.updated_at)
                .map(|s| s.id.clone());
            if let Some(id) = stalest {
                debug!(session_id = %id, "Evicting stalest session at capacity");
                sessions.remove(&id);
            }
        }

        sessions.insert(session.id.clone(), session.clone());
        Ok(true)
    }

    async fn load_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_common::BackendKind;

    #[tokio::test]
    async fn save_load_delete_roundtrip() {
        let store = InMemorySessionStore::default();

        let mut session = Session::new("conv-1");
        session.record_turn("hello", "flowise:chat-1", BackendKind::Flowise);
        assert!(store.save_session(&session).await.unwrap());

        let loaded = store.load_session("conv-1").await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 1);

        assert!(store.delete_session("conv-1").await.unwrap());
        assert!(!store.delete_session("conv-1").await.unwrap());
        assert!(store.load_session("conv-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capacity_evicts_stalest_session() {
        let store = InMemorySessionStore::new(2);

        let old = Session::new("old");
        store.save_session(&old).await.unwrap();

        // Later sessions carry later updated_at timestamps.
        let mut mid = Session::new("mid");
        mid.updated_at = old.updated_at + 1;
        store.save_session(&mid).await.unwrap();

        let mut new = Session::new("new");
        new.updated_at = old.updated_at + 2;
        store.save_session(&new).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.load_session("old").await.unwrap().is_none());
        assert!(store.load_session("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resaving_existing_session_does_not_evict() {
        let store = InMemorySessionStore::new(2);
        store.save_session(&Session::new("a")).await.unwrap();
        store.save_session(&Session::new("b")).await.unwrap();

        let mut a = store.load_session("a").await.unwrap().unwrap();
        a.record_turn("again", "n8n:wf-1", BackendKind::N8n);
        store.save_session(&a).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.load_session("b").await.unwrap().is_some());
    }
}
