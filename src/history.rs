//! Chat history persistence
//!
//! The transcript is stored as a single JSON document under a fixed file
//! name. Persistence is best-effort: callers log failures and keep the
//! in-memory transcript authoritative.

use std::path::{Path, PathBuf};

use crate::message::Message;
use crate::{Error, Result};

/// Fixed file name for the persisted transcript
pub const HISTORY_FILE: &str = "chat_history.json";

/// Stores and reloads the chat transcript
pub trait HistoryStore: Send + Sync {
    /// Load the persisted transcript, or an empty one if none exists
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreadable or holds invalid JSON
    fn load(&self) -> Result<Vec<Message>>;

    /// Persist the transcript, replacing any previous contents
    ///
    /// # Errors
    ///
    /// Returns error if the transcript cannot be written
    fn save(&self, messages: &[Message]) -> Result<()>;
}

/// File-backed history store
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    /// Create a store writing to the given file
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default history location in the platform data directory
    ///
    /// # Errors
    ///
    /// Returns error if no home directory can be resolved
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("ai", "salou", "salou-assistant")
            .ok_or_else(|| Error::Storage("no data directory available".to_string()))?;
        Ok(dirs.data_dir().join(HISTORY_FILE))
    }

    /// The file this store reads and writes
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for FileHistoryStore {
    fn load(&self) -> Result<Vec<Message>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn save(&self, messages: &[Message]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(messages)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
