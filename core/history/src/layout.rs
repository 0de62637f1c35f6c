//! Persisted layout of the history lists.
//!
//! Three parallel lists are written under fixed prefixes. For each prefix the
//! key `<prefix>` holds the count `N` and `<prefix>_0 .. <prefix>_{N-1}` hold
//! the values, index 0 being the most recent. Missing credentials are stored
//! as empty strings.

use tracing::warn;

use crate::entry::RecentEntry;
use vaultkey_common::{Passphrase, Result, VaultIdentity};
use vaultkey_storage::{PersistedStore, WriteBatch};

/// Prefix of the vault list.
pub const VAULTS_PREFIX: &str = "recent_databases";

/// Prefix of the key-file list.
pub const KEY_FILES_PREFIX: &str = "recent_keyfiles";

/// Prefix of the passphrase list.
pub const PASSPHRASES_PREFIX: &str = "recent_pwd";

fn item_key(prefix: &str, index: usize) -> String {
    format!("{}_{}", prefix, index)
}

/// Upper bound on a stored list length. Larger counts mean the store is corrupt.
pub const MAX_STORED_ENTRIES: i64 = 1024;

async fn load_list(store: &dyn PersistedStore, prefix: &str) -> Result<Vec<String>> {
    let count = store.get_int(prefix).await?.unwrap_or(0);
    if !(0..=MAX_STORED_ENTRIES).contains(&count) {
        warn!("Ignoring history list {} with invalid length {}", prefix, count);
        return Ok(Vec::new());
    }
    let mut values = Vec::new();
    for i in 0..count as usize {
        values.push(store.get_string(&item_key(prefix, i)).await?.unwrap_or_default());
    }
    Ok(values)
}

/// Entries read back from the store.
#[derive(Debug, Default)]
pub struct StoredHistory {
    /// Valid entries in history order.
    pub entries: Vec<RecentEntry>,
    /// Count recorded under the vault prefix, including unreadable rows.
    pub stored_len: usize,
}

/// Read the history lists from `store`.
///
/// Rows whose vault identity cannot be parsed are skipped. A key file that
/// cannot be parsed is treated as absent.
pub async fn load_entries(store: &dyn PersistedStore) -> Result<StoredHistory> {
    let vaults = load_list(store, VAULTS_PREFIX).await?;
    let key_files = load_list(store, KEY_FILES_PREFIX).await?;
    let mut passphrases = load_list(store, PASSPHRASES_PREFIX).await?;
    passphrases.resize(vaults.len(), String::new());

    let stored_len = vaults.len();
    let mut entries = Vec::with_capacity(stored_len);
    for (i, (raw_vault, passphrase)) in vaults.iter().zip(passphrases.drain(..)).enumerate() {
        let passphrase = Passphrase::from(passphrase);
        let vault = match VaultIdentity::parse(raw_vault) {
            Ok(vault) => vault,
            Err(e) => {
                warn!("Skipping history row {}: {}", i, e);
                continue;
            }
        };
        let key_file = key_files
            .get(i)
            .and_then(|raw| match VaultIdentity::parse_optional(raw) {
                Ok(key_file) => key_file,
                Err(e) => {
                    warn!("Ignoring key file of history row {}: {}", i, e);
                    None
                }
            });
        entries.push(RecentEntry::new(vault, key_file, Some(passphrase)));
    }

    Ok(StoredHistory {
        entries,
        stored_len,
    })
}

/// Build one batch writing all three lists.
///
/// Item keys between `entries.len()` and `previous_len` are removed so that
/// no stale value outlives a shrinking list.
pub fn write_batch(entries: &[RecentEntry], previous_len: usize) -> WriteBatch {
    let mut batch = WriteBatch::new();
    let len = entries.len();

    batch.put_int(VAULTS_PREFIX, len as i64);
    batch.put_int(KEY_FILES_PREFIX, len as i64);
    batch.put_int(PASSPHRASES_PREFIX, len as i64);

    for (i, entry) in entries.iter().enumerate() {
        batch.put_string(item_key(VAULTS_PREFIX, i), entry.vault.as_str());
        batch.put_string(
            item_key(KEY_FILES_PREFIX, i),
            entry.key_file.as_ref().map(|k| k.as_str()).unwrap_or(""),
        );
        batch.put_string(
            item_key(PASSPHRASES_PREFIX, i),
            entry
                .cached_passphrase
                .as_ref()
                .map(|p| p.expose())
                .unwrap_or(""),
        );
    }

    for i in len..previous_len {
        for prefix in [VAULTS_PREFIX, KEY_FILES_PREFIX, PASSPHRASES_PREFIX] {
            batch.remove(item_key(prefix, i));
        }
    }

    batch
}

/// Write `entries` to `store` in one atomic batch.
pub async fn save_entries(
    store: &dyn PersistedStore,
    entries: &[RecentEntry],
    previous_len: usize,
) -> Result<()> {
    store.commit(write_batch(entries, previous_len)).await
}
