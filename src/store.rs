//! Persists config entries to a JSON file.
//!
//! Only the refresh token is stored; account passwords never reach this
//! module.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("location {0} is already configured")]
    AlreadyConfigured(i64),

    #[error("unknown config entry {0}")]
    NotFound(Uuid),

    #[error("entry store I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("entry store at {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigEntry {
    pub entry_id: Uuid,
    pub location_id: i64,
    pub title: String,
    pub refresh_token: String,
}

impl ConfigEntry {
    pub fn new(location_id: i64, location_name: &str, refresh_token: String) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            location_id,
            title: format!("Schluter Heat - {location_name}"),
            refresh_token,
        }
    }
}

impl fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigEntry")
            .field("entry_id", &self.entry_id)
            .field("location_id", &self.location_id)
            .field("title", &self.title)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    entries: Vec<ConfigEntry>,
}

/// Shared handle to the entry file. Every mutation is written through.
#[derive(Debug, Clone)]
pub struct EntryStore {
    path: PathBuf,
    entries: Arc<RwLock<Vec<ConfigEntry>>>,
}

impl EntryStore {
    /// Load entries from `path`; a missing file means no entries yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read(&path).await {
            Ok(bytes) => {
                serde_json::from_slice::<StoreFile>(&bytes)
                    .map_err(|source| StoreError::Corrupt {
                        path: path.display().to_string(),
                        source,
                    })?
                    .entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No entry store yet, starting empty");
                Vec::new()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        info!(path = %path.display(), entries = entries.len(), "Entry store loaded");
        Ok(Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn all(&self) -> Vec<ConfigEntry> {
        self.entries.read().await.clone()
    }

    pub async fn get(&self, entry_id: Uuid) -> Option<ConfigEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.entry_id == entry_id)
            .cloned()
    }

    pub async fn is_configured(&self, location_id: i64) -> bool {
        self.entries
            .read()
            .await
            .iter()
            .any(|e| e.location_id == location_id)
    }

    /// Add a new entry. Each location may only be configured once.
    pub async fn insert(&self, entry: ConfigEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.location_id == entry.location_id) {
            return Err(StoreError::AlreadyConfigured(entry.location_id));
        }
        entries.push(entry);
        self.persist(&entries).await
    }

    /// Replace the refresh token of an existing entry, leaving everything
    /// else untouched.
    pub async fn update_refresh_token(
        &self,
        entry_id: Uuid,
        refresh_token: String,
    ) -> Result<ConfigEntry, StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or(StoreError::NotFound(entry_id))?;
        entry.refresh_token = refresh_token;
        let updated = entry.clone();
        self.persist(&entries).await?;
        Ok(updated)
    }

    pub async fn remove(&self, entry_id: Uuid) -> Result<ConfigEntry, StoreError> {
        let mut entries = self.entries.write().await;
        let index = entries
            .iter()
            .position(|e| e.entry_id == entry_id)
            .ok_or(StoreError::NotFound(entry_id))?;
        let removed = entries.remove(index);
        self.persist(&entries).await?;
        Ok(removed)
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn persist(&self, entries: &[ConfigEntry]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };

        let file = StoreFile {
            entries: entries.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&file).map_err(|e| io_err(e.into()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(io_err)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &content).await.map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(io_err)?;
        }

        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        debug!(path = %self.path.display(), entries = entries.len(), "Entry store saved");
        Ok(())
    }
}
