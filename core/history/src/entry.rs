//! History entries and the ordered, bounded list that holds them.

use vaultkey_common::{Passphrase, VaultIdentity};

/// One remembered vault with the credentials last used to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEntry {
    /// Vault that was opened.
    pub vault: VaultIdentity,
    /// Key file used, if any.
    pub key_file: Option<VaultIdentity>,
    /// Passphrase used, if caching applied.
    pub cached_passphrase: Option<Passphrase>,
}

impl RecentEntry {
    /// Create an entry. An empty passphrase is stored as absent.
    pub fn new(
        vault: VaultIdentity,
        key_file: Option<VaultIdentity>,
        cached_passphrase: Option<Passphrase>,
    ) -> Self {
        Self {
            vault,
            key_file,
            cached_passphrase: cached_passphrase.filter(|p| !p.is_empty()),
        }
    }

    /// Create an entry without credentials.
    pub fn vault_only(vault: VaultIdentity) -> Self {
        Self::new(vault, None, None)
    }

    /// Forget the key file and passphrase.
    pub fn clear_credentials(&mut self) {
        self.key_file = None;
        self.cached_passphrase = None;
    }
}

/// Ordered history list, most recent first, unique by vault.
///
/// All mutations keep `len() <= capacity`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentList {
    entries: Vec<RecentEntry>,
}

impl RecentList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from entries in history order.
    ///
    /// Later duplicates of a vault are dropped and the result is truncated
    /// to `capacity`.
    pub fn from_entries(entries: impl IntoIterator<Item = RecentEntry>, capacity: usize) -> Self {
        let mut list = Self::new();
        for entry in entries {
            if list.position(&entry.vault).is_none() {
                list.entries.push(entry);
            }
        }
        list.entries.truncate(capacity);
        list
    }

    /// Move or insert `entry` at the front, then evict from the tail.
    pub fn record(&mut self, entry: RecentEntry, capacity: usize) {
        self.remove(&entry.vault);
        self.entries.insert(0, entry);
        self.entries.truncate(capacity);
    }

    /// Index of the entry for `vault`.
    pub fn position(&self, vault: &VaultIdentity) -> Option<usize> {
        self.entries.iter().position(|e| &e.vault == vault)
    }

    /// Entry for `vault`.
    pub fn find(&self, vault: &VaultIdentity) -> Option<&RecentEntry> {
        self.entries.iter().find(|e| &e.vault == vault)
    }

    /// Remove the entry for `vault`. Returns the removed entry.
    pub fn remove(&mut self, vault: &VaultIdentity) -> Option<RecentEntry> {
        self.position(vault).map(|i| self.entries.remove(i))
    }

    /// Reset every entry's credentials, keeping vaults and order.
    pub fn clear_credentials(&mut self) {
        self.entries.iter_mut().for_each(RecentEntry::clear_credentials);
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Truncate to `capacity`.
    pub fn truncate(&mut self, capacity: usize) {
        self.entries.truncate(capacity);
    }

    /// Entry at `index`, most recent first.
    pub fn get(&self, index: usize) -> Option<&RecentEntry> {
        self.entries.get(index)
    }

    /// Vault identities in order.
    pub fn vaults(&self) -> Vec<VaultIdentity> {
        self.entries.iter().map(|e| e.vault.clone()).collect()
    }

    /// Entries in order.
    pub fn entries(&self) -> &[RecentEntry] {
        &self.entries
    }

    /// Consume the list into its entries.
    pub fn into_entries(self) -> Vec<RecentEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
