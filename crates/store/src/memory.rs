//! In-memory store: useful for testing and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use codeloop_core::error::StoreError;
use codeloop_core::session::{Session, SessionSummary};
use codeloop_core::store::Store;
use tokio::sync::RwLock;

/// Keeps sessions in a map for the lifetime of the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id.as_str().to_string(), session.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Session, StoreError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(Session::summary_entry)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeloop_core::message::Message;

    #[tokio::test]
    async fn save_load_delete() {
        let store = InMemoryStore::new();
        let mut session = Session::new();
        session.push(Message::user("hello"));

        store.save(&session).await.unwrap();
        assert_eq!(store.len().await, 1);

        let loaded = store.load(session.id.as_str()).await.unwrap();
        assert_eq!(loaded.messages.len(), 1);

        let list = store.list().await.unwrap();
        assert_eq!(list[0].title, "hello");

        store.delete(session.id.as_str()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(matches!(
            store.delete(session.id.as_str()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryStore::new();
        let other = store.clone();
        store.save(&Session::new()).await.unwrap();
        assert_eq!(other.len().await, 1);
    }
}
