//! Store trait: durable session persistence.
//!
//! The runtime only needs save/load/list/delete; how sessions are laid out
//! on disk (or anywhere else) is up to the implementation.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::session::{Session, SessionSummary};

#[async_trait]
pub trait Store: Send + Sync {
    /// A short name for this backend (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Insert or overwrite a session.
    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Load a session by id.
    async fn load(&self, id: &str) -> Result<Session, StoreError>;

    /// List stored sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError>;

    /// Delete a session. Deleting a missing id is an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Flush and release resources.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
