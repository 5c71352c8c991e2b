//! Fingerprint → session URL storage.
//!
//! Keeps the URLs of created upload sessions so an interrupted transfer can
//! be rediscovered, optionally persisted to a JSON file so that works across
//! process restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors from session store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One remembered upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub url: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Session URLs keyed by fingerprint.
pub struct SessionStore {
    path: Option<PathBuf>,
    sessions: RwLock<HashMap<String, Vec<StoredSession>>>,
}

impl SessionStore {
    /// Creates a store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Opens a file-backed store, loading existing entries from disk.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let sessions = load_sessions(&path)?;
        Ok(Self {
            path: Some(path),
            sessions: RwLock::new(sessions),
        })
    }

    /// Sessions for `fingerprint`, most recent first.
    pub fn find(&self, fingerprint: &str) -> Vec<StoredSession> {
        let mut found = self
            .sessions
            .read()
            .unwrap()
            .get(fingerprint)
            .cloned()
            .unwrap_or_default();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    /// Remembers a new session for `fingerprint`.
    pub fn record(&self, fingerprint: &str, session: StoredSession) -> Result<(), StoreError> {
        {
            let mut map = self.sessions.write().unwrap();
            map.entry(fingerprint.to_string()).or_default().push(session);
        }
        self.persist()
    }

    /// Forgets every session for `fingerprint`.
    pub fn remove(&self, fingerprint: &str) -> Result<(), StoreError> {
        let removed = self.sessions.write().unwrap().remove(fingerprint).is_some();
        if removed {
            self.persist()?;
        }
        Ok(())
    }

    /// Number of fingerprints with at least one session.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the current sessions to disk (no-op for in-memory stores).
    fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let map = self.sessions.read().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        debug!("persisted {} session fingerprint(s) to {:?}", map.len(), path);
        Ok(())
    }
}

fn load_sessions(path: &Path) -> Result<HashMap<String, Vec<StoredSession>>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let sessions: HashMap<String, Vec<StoredSession>> = serde_json::from_str(&data)?;
    debug!("loaded {} session fingerprint(s) from {:?}", sessions.len(), path);
    Ok(sessions)
}

/// Returns the default store path.
pub fn default_store_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("ingest").join("sessions.json"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
