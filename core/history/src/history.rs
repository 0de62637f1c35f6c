//! Recent-file history with cached credentials.
//!
//! The history is process-wide state shared through an
//! `Arc<RecentFileHistory>`. It is loaded lazily: the first operation runs
//! the legacy migration (if configured) or reads the persisted lists, exactly
//! once even under concurrent first access. Every mutation holds one lock
//! across read-modify-write-persist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{RecentEntry, RecentList};
use crate::layout;
use crate::legacy::{LegacyMigrator, MigrationOutcome};
use vaultkey_common::{Passphrase, Result, VaultIdentity};
use vaultkey_storage::{PersistedStore, Settings, HISTORY_ENABLED_KEY};

/// In-memory history plus what is known about the persisted copy.
#[derive(Debug, Default)]
struct HistoryState {
    list: RecentList,
    /// Number of rows currently persisted, used to drop stale keys.
    persisted_len: usize,
}

/// Bounded, ordered history of opened vaults.
pub struct RecentFileHistory {
    store: Arc<dyn PersistedStore>,
    migrator: Option<LegacyMigrator>,
    max_files: usize,
    enabled: AtomicBool,
    init: OnceCell<()>,
    state: Mutex<HistoryState>,
}

impl RecentFileHistory {
    /// Create a history on top of `store`.
    ///
    /// Nothing is read until the first operation.
    pub fn new(store: Arc<dyn PersistedStore>, settings: &Settings) -> Self {
        Self {
            store,
            migrator: None,
            max_files: settings.max_files,
            enabled: AtomicBool::new(settings.history_enabled),
            init: OnceCell::new(),
            state: Mutex::new(HistoryState::default()),
        }
    }

    /// Migrate from `migrator` on first use.
    pub fn with_legacy(mut self, migrator: LegacyMigrator) -> Self {
        self.migrator = Some(migrator.with_max_files(self.max_files));
        self
    }

    /// Maximum number of entries kept.
    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Check if the history serves and records entries.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the history.
    ///
    /// Persisted entries are kept; only future reads and writes are gated.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("Recent file history {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    /// React to a changed setting key.
    pub async fn on_setting_changed(&self, key: &str) -> Result<()> {
        if key != HISTORY_ENABLED_KEY {
            return Ok(());
        }
        let enabled = self
            .store
            .get_bool(HISTORY_ENABLED_KEY)
            .await?
            .unwrap_or(Settings::default().history_enabled);
        self.set_enabled(enabled);
        Ok(())
    }

    /// Follow the enable setting through store change notifications.
    ///
    /// The task stops once the history is dropped or the store closes.
    pub fn watch_settings(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.store.subscribe();
        let history: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let key = match changes.recv().await {
                    Ok(key) => key,
                    // Missed notifications; re-read the setting.
                    Err(RecvError::Lagged(_)) => HISTORY_ENABLED_KEY.to_string(),
                    Err(RecvError::Closed) => break,
                };
                let Some(history) = history.upgrade() else {
                    break;
                };
                if let Err(e) = history.on_setting_changed(&key).await {
                    warn!("Failed to re-read history setting: {}", e);
                }
            }
            debug!("History settings watcher stopped");
        })
    }

    async fn state(&self) -> Result<MutexGuard<'_, HistoryState>> {
        self.init.get_or_try_init(|| self.initialize()).await?;
        Ok(self.state.lock().await)
    }

    async fn initialize(&self) -> Result<()> {
        let outcome = match &self.migrator {
            Some(migrator) => migrator.migrate(self.store.as_ref()).await,
            None => MigrationOutcome::Skipped,
        };

        let (entries, persisted_len) = match outcome {
            MigrationOutcome::Skipped => {
                let stored = layout::load_entries(self.store.as_ref()).await?;
                (stored.entries, stored.stored_len)
            }
            MigrationOutcome::Migrated(entries) => {
                let len = entries.len();
                (entries, len)
            }
            MigrationOutcome::Abandoned => (Vec::new(), 0),
        };

        let mut state = self.state.lock().await;
        state.list = RecentList::from_entries(entries, self.max_files);
        state.persisted_len = persisted_len;
        debug!("Loaded {} history entries", state.list.len());
        Ok(())
    }

    /// Write `list` and make it current.
    ///
    /// The in-memory list is only replaced once the store accepted the write.
    async fn persist(&self, state: &mut HistoryState, list: RecentList) -> Result<()> {
        layout::save_entries(self.store.as_ref(), list.entries(), state.persisted_len).await?;
        state.persisted_len = list.len();
        state.list = list;
        Ok(())
    }

    /// Record a successful unlock.
    ///
    /// # Postconditions
    /// - `vault` is the first entry and appears once
    /// - At most `max_files` entries remain
    /// - The list is persisted
    ///
    /// No-op while disabled.
    pub async fn record_success(
        &self,
        vault: &VaultIdentity,
        key_file: Option<&VaultIdentity>,
        passphrase: Option<&Passphrase>,
    ) -> Result<()> {
        if !self.is_enabled() {
            debug!("History disabled, not recording {}", vault);
            return Ok(());
        }

        let mut state = self.state().await?;
        let entry = RecentEntry::new(vault.clone(), key_file.cloned(), passphrase.cloned());
        let mut list = state.list.clone();
        list.record(entry, self.max_files);
        self.persist(&mut state, list).await?;

        debug!("Recorded {} ({} entries)", vault, state.list.len());
        Ok(())
    }

    /// Key file last used for `vault`.
    pub async fn lookup_key_file(&self, vault: &VaultIdentity) -> Result<Option<VaultIdentity>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let state = self.state().await?;
        Ok(state.list.find(vault).and_then(|e| e.key_file.clone()))
    }

    /// Passphrase cached for `vault`.
    pub async fn lookup_passphrase(&self, vault: &VaultIdentity) -> Result<Option<Passphrase>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let state = self.state().await?;
        Ok(state
            .list
            .find(vault)
            .and_then(|e| e.cached_passphrase.clone()))
    }

    /// Remove the entry for `vault`.
    ///
    /// With `persist == false` the removal stays in memory until [`flush`]
    /// is called, so several removals can share one write.
    ///
    /// [`flush`]: Self::flush
    pub async fn remove(&self, vault: &VaultIdentity, persist: bool) -> Result<bool> {
        let mut state = self.state().await?;
        let mut list = state.list.clone();
        let removed = list.remove(vault).is_some();
        if persist {
            self.persist(&mut state, list).await?;
        } else {
            state.list = list;
        }
        if removed {
            debug!("Removed {} from history", vault);
        }
        Ok(removed)
    }

    /// Persist the current list.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state().await?;
        let list = state.list.clone();
        self.persist(&mut state, list).await
    }

    /// Forget every vault.
    pub async fn clear_all(&self) -> Result<()> {
        let mut state = self.state().await?;
        self.persist(&mut state, RecentList::new()).await?;
        info!("Cleared recent file history");
        Ok(())
    }

    /// Forget every key file and passphrase, keeping the vault list.
    pub async fn clear_credentials_only(&self) -> Result<()> {
        let mut state = self.state().await?;
        let mut list = state.list.clone();
        list.clear_credentials();
        self.persist(&mut state, list).await?;
        info!("Cleared cached credentials for {} vaults", state.list.len());
        Ok(())
    }

    /// Snapshot of remembered vaults, most recent first.
    pub async fn list_vaults(&self) -> Result<Vec<VaultIdentity>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        let state = self.state().await?;
        Ok(state.list.vaults())
    }

    /// Entry at `index`, most recent first.
    pub async fn entry_at(&self, index: usize) -> Result<Option<RecentEntry>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let state = self.state().await?;
        Ok(state.list.get(index).cloned())
    }

    /// Check if any vault is remembered.
    pub async fn has_recent_files(&self) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let state = self.state().await?;
        Ok(!state.list.is_empty())
    }
}
