//! Session registry — which authenticated transport client belongs to which
//! sending session.
//!
//! Authentication and shutdown flows call [`SessionRegistry::set`] and
//! [`SessionRegistry::remove`]; the dispatch engine and the cycle scheduler only
//! ever read.

use std::collections::HashMap;
use std::sync::Arc;

use castline_core::error::{CastlineError, Result};
use castline_core::traits::TransportClient;
use castline_core::types::Session;
use tokio::sync::RwLock;

/// A registered session and its live client.
#[derive(Clone)]
pub struct SessionEntry {
    pub session: Session,
    pub client: Arc<dyn TransportClient>,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("session", &self.session)
            .field("client", &self.client.name())
            .finish()
    }
}

/// Thread-safe session → client map.
#[derive(Default)]
pub struct SessionRegistry {
    entries: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the client for a session.
    pub async fn set(&self, session: Session, client: Arc<dyn TransportClient>) {
        tracing::info!(
            "🔑 Session '{}' registered (account {}, client {})",
            session.id,
            session.account_id,
            client.name()
        );
        let mut entries = self.entries.write().await;
        entries.insert(session.id.clone(), SessionEntry { session, client });
    }

    /// Remove a session. Returns the entry if it was present.
    pub async fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        let removed = self.entries.write().await.remove(session_id);
        if removed.is_some() {
            tracing::info!("🔒 Session '{session_id}' removed");
        }
        removed
    }

    /// The client handle for a session.
    pub async fn get(&self, session_id: &str) -> Result<Arc<dyn TransportClient>> {
        self.entry(session_id).await.map(|e| e.client)
    }

    pub async fn entry(&self, session_id: &str) -> Result<SessionEntry> {
        self.entries
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| CastlineError::SessionNotFound(session_id.to_string()))
    }

    /// The client for a session, provided it is authenticated.
    pub async fn authenticated(&self, session_id: &str) -> Result<SessionEntry> {
        let entry = self.entry(session_id).await?;
        if !entry.client.is_authenticated() {
            return Err(CastlineError::NotAuthenticated(session_id.to_string()));
        }
        Ok(entry)
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.entries.read().await.contains_key(session_id)
    }

    pub async fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    #[tokio::test]
    async fn test_set_get_remove() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get("s1").await,
            Err(CastlineError::SessionNotFound(_))
        ));

        registry
            .set(Session::new("s1", "acct-1"), Arc::new(ScriptedTransport::new()))
            .await;
        assert!(registry.contains("s1").await);
        assert_eq!(registry.get("s1").await.unwrap().name(), "scripted");
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("s1").await.is_some());
        assert!(registry.remove("s1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_replaces_client() {
        let registry = SessionRegistry::new();
        let first = Arc::new(ScriptedTransport::new());
        let second = Arc::new(ScriptedTransport::new());
        registry.set(Session::new("s1", "acct-1"), first).await;
        registry.set(Session::new("s1", "acct-1"), second.clone()).await;
        assert_eq!(registry.len().await, 1);

        second.set_authenticated(false);
        assert!(!registry.get("s1").await.unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn test_authenticated_rejects_disconnected_client() {
        let registry = SessionRegistry::new();
        let client = Arc::new(ScriptedTransport::new());
        client.set_authenticated(false);
        registry.set(Session::new("s1", "acct-1"), client).await;

        let err = registry.authenticated("s1").await.unwrap_err();
        assert!(matches!(err, CastlineError::NotAuthenticated(_)));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_sessions_sorted() {
        let registry = SessionRegistry::new();
        registry
            .set(Session::new("b", "acct"), Arc::new(ScriptedTransport::new()))
            .await;
        registry
            .set(Session::new("a", "acct"), Arc::new(ScriptedTransport::new()))
            .await;
        let ids: Vec<_> = registry.sessions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
