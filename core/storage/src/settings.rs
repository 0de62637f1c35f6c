//! Unlock and history settings.

use serde::Serialize;
use tracing::warn;

use crate::store::{PersistedStore, WriteBatch};
use vaultkey_common::{Result, VaultIdentity};

/// Setting key: remember the key file used for each vault.
pub const REMEMBER_KEY_FILE_KEY: &str = "keyfile";

/// Setting key: keep a history of recently opened vaults.
pub const HISTORY_ENABLED_KEY: &str = "recentfile";

/// Setting key: vault preselected on start. Empty when unset.
pub const DEFAULT_VAULT_KEY: &str = "defaultFileName";

/// Default history capacity.
pub const DEFAULT_MAX_FILES: usize = 5;

/// User-facing settings consumed by the unlock layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Fill in the key file from history when a request carries none.
    pub remember_key_file: bool,
    /// Record and serve recent vaults.
    pub history_enabled: bool,
    /// Vault opened by default.
    pub default_vault: Option<VaultIdentity>,
    /// Maximum number of history entries. Not persisted.
    pub max_files: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            remember_key_file: true,
            history_enabled: true,
            default_vault: None,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl Settings {
    /// Load settings from the store, using defaults for missing keys.
    pub async fn load(store: &dyn PersistedStore) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            remember_key_file: store
                .get_bool(REMEMBER_KEY_FILE_KEY)
                .await?
                .unwrap_or(defaults.remember_key_file),
            history_enabled: store
                .get_bool(HISTORY_ENABLED_KEY)
                .await?
                .unwrap_or(defaults.history_enabled),
            default_vault: load_default_vault(store).await?,
            max_files: defaults.max_files,
        })
    }

    /// Persist every stored setting.
    pub async fn save(&self, store: &dyn PersistedStore) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch
            .put_bool(REMEMBER_KEY_FILE_KEY, self.remember_key_file)
            .put_bool(HISTORY_ENABLED_KEY, self.history_enabled)
            .put_string(
                DEFAULT_VAULT_KEY,
                self.default_vault.as_ref().map(|v| v.as_str()).unwrap_or(""),
            );
        store.commit(batch).await
    }

    /// Make `vault` the default.
    pub fn set_default(&mut self, vault: VaultIdentity) {
        self.default_vault = Some(vault);
    }

    /// Unset the default vault.
    pub fn clear_default(&mut self) {
        self.default_vault = None;
    }

    /// Check if `vault` is the default, comparing canonical identities.
    pub fn is_default(&self, vault: &VaultIdentity) -> bool {
        self.default_vault.as_ref() == Some(vault)
    }

    /// Override the history capacity.
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }
}

async fn load_default_vault(store: &dyn PersistedStore) -> Result<Option<VaultIdentity>> {
    let raw = store.get_string(DEFAULT_VAULT_KEY).await?.unwrap_or_default();
    match VaultIdentity::parse_optional(&raw) {
        Ok(vault) => Ok(vault),
        Err(e) => {
            warn!("Ignoring invalid default vault: {}", e);
            Ok(None)
        }
    }
}
