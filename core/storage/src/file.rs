//! Local filesystem persisted store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::memory::CHANGE_CHANNEL_CAPACITY;
use crate::store::{PersistedStore, StoredValue, WriteBatch};
use vaultkey_common::{Error, Result};

/// Persisted store backed by a single JSON file.
///
/// The whole map is rewritten on every commit: the new content goes to a
/// sibling temporary file which is then renamed over the target, so a crash
/// leaves either the old or the new map on disk.
pub struct FileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, StoredValue>>,
    changes: broadcast::Sender<String>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// # Postconditions
    /// - Parent directory exists
    /// - Existing content is loaded; a missing file yields an empty store
    ///
    /// # Errors
    /// - Permission denied
    /// - Existing file is not a valid store
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        let values = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        info!("Opened store at {} ({} keys)", path.display(), values.len());

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            values: RwLock::new(values),
            changes,
        })
    }

    /// Get the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_atomically(&self, values: &BTreeMap<String, StoredValue>) -> Result<()> {
        let content = serde_json::to_vec_pretty(values)?;
        let temp = self.temp_path();

        fs::write(&temp, &content).await?;
        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistedStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut values = self.values.write().await;

        let mut next = values.clone();
        let mut touched = Vec::with_capacity(batch.len());
        for (key, value) in batch.into_ops() {
            match value {
                Some(value) => {
                    next.insert(key.clone(), value);
                }
                None => {
                    next.remove(&key);
                }
            }
            touched.push(key);
        }

        self.write_atomically(&next).await?;
        *values = next;
        drop(values);

        debug!("Committed {} keys to {}", touched.len(), self.path.display());
        for key in touched {
            let _ = self.changes.send(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
