//! In-memory persisted store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::store::{PersistedStore, StoredValue, WriteBatch};
use vaultkey_common::Result;

/// Capacity of the change notification channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// In-memory persisted store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
pub struct MemoryStore {
    values: RwLock<HashMap<String, StoredValue>>,
    changes: broadcast::Sender<String>,
    commits: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
            commits: AtomicUsize::new(0),
        }
    }

    /// Number of batches committed so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    /// Check if the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistedStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut touched = Vec::with_capacity(batch.len());
        {
            let mut values = self.values.write().await;
            for (key, value) in batch.into_ops() {
                match value {
                    Some(value) => {
                        values.insert(key.clone(), value);
                    }
                    None => {
                        values.remove(&key);
                    }
                }
                touched.push(key);
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} keys to memory store", touched.len());

        for key in touched {
            // No subscribers is not an error.
            let _ = self.changes.send(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
