//! File-based session store: one pretty-printed JSON document per session.
//!
//! Storage location: `~/.codeloop/sessions/<id>.json`
//!
//! Human-inspectable and dependency-free. Writes go to a temporary file
//! that is renamed over the target, so a crash mid-save never leaves a
//! truncated session behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use codeloop_core::error::StoreError;
use codeloop_core::session::{Session, SessionSummary};
use codeloop_core::store::Store;
use tracing::{debug, warn};

/// A directory of `<id>.json` session files.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        // Ids come from the command line on --resume; keep them inside dir
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read_session(path: &Path) -> Result<Session, StoreError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl Store for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.path_for(session.id.as_str())?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create session directory: {e}")))?;

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to write session file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to replace session file: {e}")))?;

        debug!(session_id = %session.id, messages = session.messages.len(), "Session saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Session, StoreError> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Self::read_session(&path).await
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            // Nothing saved yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_session(&path).await {
                Ok(session) => summaries.push(session.summary_entry()),
                Err(e) => warn!(error = %e, "Skipping unreadable session file"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}
