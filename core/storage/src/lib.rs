//! Persisted key-value storage for VaultKey.
//!
//! This module provides the [`PersistedStore`] abstraction that settings and
//! the recent-file history are written through, plus two backends:
//! an in-memory store for tests and a JSON file store for real use.
//!
//! # Design Principles
//! - Atomic batches: a [`WriteBatch`] lands completely or not at all
//! - Change notifications: committed keys are broadcast to subscribers
//! - Async operations: all reads and writes are async

pub mod file;
pub mod memory;
pub mod settings;
pub mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use settings::{
    Settings, DEFAULT_MAX_FILES, DEFAULT_VAULT_KEY, HISTORY_ENABLED_KEY, REMEMBER_KEY_FILE_KEY,
};
pub use store::{PersistedStore, StoredValue, WriteBatch};
