//! Persisted key-value store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use vaultkey_common::{Error, Result};

/// A single persisted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl StoredValue {
    fn kind(&self) -> &'static str {
        match self {
            StoredValue::Bool(_) => "bool",
            StoredValue::Int(_) => "int",
            StoredValue::Str(_) => "string",
        }
    }
}

/// A set of writes committed together.
///
/// Either every operation in the batch becomes visible, or none does.
#[derive(Clone, Default)]
pub struct WriteBatch {
    ops: Vec<(String, Option<StoredValue>)>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an integer write.
    pub fn put_int(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.ops.push((key.into(), Some(StoredValue::Int(value))));
        self
    }

    /// Queue a string write.
    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push((key.into(), Some(StoredValue::Str(value.into()))));
        self
    }

    /// Queue a boolean write.
    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.ops.push((key.into(), Some(StoredValue::Bool(value))));
        self
    }

    /// Queue a removal.
    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push((key.into(), None));
        self
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Keys touched by this batch, in queue order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|(key, _)| key.as_str())
    }

    /// Consume the batch into its operations. `None` means remove.
    pub fn into_ops(self) -> Vec<(String, Option<StoredValue>)> {
        self.ops
    }
}

// Values may hold cached passphrases, so only keys are printed.
impl fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBatch")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Key-value persistence used for settings and history.
///
/// Implementations must apply a [`WriteBatch`] atomically and announce every
/// key it touched to subscribers once the batch is durable.
#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// Get the store name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read a raw value.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Apply all writes in `batch` atomically.
    ///
    /// # Postconditions
    /// - Every key in the batch is updated, or none is
    /// - Subscribers receive each touched key after the write is durable
    ///
    /// # Errors
    /// - I/O or serialization failure; the previous state is kept
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Subscribe to change notifications. Each message is a changed key.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Read an integer value.
    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Int(v)) => Ok(Some(v)),
            Some(other) => Err(type_mismatch(key, "int", &other)),
        }
    }

    /// Read a string value.
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Str(v)) => Ok(Some(v)),
            Some(other) => Err(type_mismatch(key, "string", &other)),
        }
    }

    /// Read a boolean value.
    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Bool(v)) => Ok(Some(v)),
            Some(other) => Err(type_mismatch(key, "bool", &other)),
        }
    }
}

fn type_mismatch(key: &str, expected: &str, found: &StoredValue) -> Error {
    Error::Serialization(format!(
        "Key '{}' holds a {}, expected {}",
        key,
        found.kind(),
        expected
    ))
}
