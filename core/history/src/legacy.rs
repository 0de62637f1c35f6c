//! One-time migration from the legacy SQLite history.
//!
//! Older releases kept recent files in a SQLite table
//! `files(filename, keyfile, password)`. On first use the rows are converted
//! into the key-value layout and the database is deleted. The conversion is
//! best-effort: if reading fails, the old data is dropped rather than
//! retried on every start.

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::entry::{RecentEntry, RecentList};
use crate::layout;
use vaultkey_common::{Error, Passphrase, Result, VaultIdentity};
use vaultkey_storage::{PersistedStore, DEFAULT_MAX_FILES};

/// File name of the legacy database inside the data directory.
pub const LEGACY_DATABASE_NAME: &str = "recent_files.db";

/// One row of the legacy `files` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyRow {
    pub filename: Option<String>,
    pub key_file: Option<String>,
    pub password: Option<String>,
}

/// Result of a migration attempt.
#[derive(Debug)]
pub enum MigrationOutcome {
    /// No legacy database was present.
    Skipped,
    /// Rows were converted and written to the store.
    Migrated(Vec<RecentEntry>),
    /// The legacy database could not be read; its data was dropped.
    Abandoned,
}

impl MigrationOutcome {
    /// Check if migration was attempted.
    pub fn ran(&self) -> bool {
        !matches!(self, MigrationOutcome::Skipped)
    }
}

/// Convert legacy rows to history entries, preserving row order.
///
/// Rows without a usable filename are skipped, later duplicates of a vault
/// are dropped and the result is truncated to `max_files`.
pub fn entries_from_rows(
    rows: impl IntoIterator<Item = LegacyRow>,
    max_files: usize,
) -> Vec<RecentEntry> {
    let entries = rows.into_iter().filter_map(|row| {
        let vault = VaultIdentity::parse(row.filename.as_deref().unwrap_or("")).ok()?;
        let key_file = row
            .key_file
            .as_deref()
            .and_then(|raw| VaultIdentity::parse_optional(raw).ok().flatten());
        let passphrase = row.password.map(Passphrase::from);
        Some(RecentEntry::new(vault, key_file, passphrase))
    });

    RecentList::from_entries(entries, max_files).into_entries()
}

/// Read every row of the legacy table in insertion order.
pub fn read_rows(path: &Path) -> Result<Vec<LegacyRow>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| Error::Storage(e.to_string()))?;

    let mut stmt = conn
        .prepare("SELECT filename, keyfile, password FROM files ORDER BY rowid")
        .map_err(|e| Error::Storage(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(LegacyRow {
                filename: row.get(0)?,
                key_file: row.get(1)?,
                password: row.get(2)?,
            })
        })
        .map_err(|e| Error::Storage(e.to_string()))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| Error::Storage(e.to_string()))?);
    }
    Ok(result)
}

/// Migrates the legacy SQLite history into a [`PersistedStore`].
#[derive(Debug, Clone)]
pub struct LegacyMigrator {
    path: PathBuf,
    max_files: usize,
}

impl LegacyMigrator {
    /// Create a migrator for the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_files: DEFAULT_MAX_FILES,
        }
    }

    /// Create a migrator for the default database name inside `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(LEGACY_DATABASE_NAME))
    }

    /// Set the capacity applied to migrated entries.
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Get the legacy database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a legacy database is present.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Migrate if a legacy database exists.
    ///
    /// Returns `true` if migration ran, whether or not it succeeded.
    pub async fn run_if_needed(&self, store: &dyn PersistedStore) -> bool {
        self.migrate(store).await.ran()
    }

    /// Migrate and report what happened.
    ///
    /// # Postconditions
    /// - The legacy database has been deleted, if deletion was possible
    /// - On success the store holds the converted entries
    pub async fn migrate(&self, store: &dyn PersistedStore) -> MigrationOutcome {
        if !self.exists().await {
            debug!("No legacy history at {}", self.path.display());
            return MigrationOutcome::Skipped;
        }

        info!("Migrating legacy history from {}", self.path.display());

        let outcome = match self.convert(store).await {
            Ok(entries) => {
                info!("Migrated {} legacy history entries", entries.len());
                MigrationOutcome::Migrated(entries)
            }
            Err(e) => {
                warn!("Legacy history migration abandoned: {}", e);
                MigrationOutcome::Abandoned
            }
        };

        self.delete_database().await;
        outcome
    }

    async fn convert(&self, store: &dyn PersistedStore) -> Result<Vec<RecentEntry>> {
        let path = self.path.clone();
        let rows = tokio::task::spawn_blocking(move || read_rows(&path))
            .await
            .map_err(|e| Error::Storage(format!("Legacy reader failed: {}", e)))??;

        let entries = entries_from_rows(rows, self.max_files);
        let previous_len = store
            .get_int(layout::VAULTS_PREFIX)
            .await?
            .unwrap_or(0)
            .max(0) as usize;
        layout::save_entries(store, &entries, previous_len).await?;
        Ok(entries)
    }

    async fn delete_database(&self) {
        let mut journal = self.path.clone().into_os_string();
        journal.push("-journal");

        for path in [self.path.clone(), PathBuf::from(journal)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Deleted legacy file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete legacy file {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;
    use vaultkey_storage::MemoryStore;

    fn row(filename: &str, key_file: &str, password: &str) -> LegacyRow {
        LegacyRow {
            filename: Some(filename.to_string()),
            key_file: Some(key_file.to_string()),
            password: Some(password.to_string()),
        }
    }

    fn create_legacy_db(path: &Path, rows: &[LegacyRow]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE files (
                _id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                keyfile TEXT,
                password TEXT,
                updated INTEGER
            );
            "#,
        )
        .unwrap();
        for r in rows {
            conn.execute(
                "INSERT INTO files (filename, keyfile, password, updated) VALUES (?1, ?2, ?3, 0)",
                params![r.filename, r.key_file, r.password],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_entries_from_rows() {
        let rows = vec![
            row("file:///a.db", "file:///a.key", "pa"),
            row("", "", ""),
            row("/b.db", "", ""),
            row("file:///a.db", "", "dup"),
        ];
        let entries = entries_from_rows(rows, 5);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].vault.as_str(), "file:///a.db");
        assert_eq!(entries[0].key_file.as_ref().unwrap().as_str(), "file:///a.key");
        assert_eq!(entries[0].cached_passphrase.as_ref().unwrap().expose(), "pa");
        assert_eq!(entries[1].vault.as_str(), "file:///b.db");
        assert!(entries[1].key_file.is_none());
        assert!(entries[1].cached_passphrase.is_none());
    }

    #[test]
    fn test_entries_from_rows_respects_capacity() {
        let rows = (0..8).map(|i| row(&format!("file:///v{}.db", i), "", ""));
        assert_eq!(entries_from_rows(rows, 5).len(), 5);
    }

    #[tokio::test]
    async fn test_migrate_rows_in_order() {
        let dir = TempDir::new().unwrap();
        let migrator = LegacyMigrator::in_dir(dir.path());
        create_legacy_db(
            migrator.path(),
            &[
                row("file:///A.db", "file:///ka.key", "pa"),
                row("file:///B.db", "file:///kb.key", "pb"),
            ],
        );

        let store = MemoryStore::new();
        assert!(migrator.run_if_needed(&store).await);
        assert!(!migrator.exists().await);

        let stored = layout::load_entries(&store).await.unwrap();
        let vaults: Vec<_> = stored.entries.iter().map(|e| e.vault.as_str()).collect();
        assert_eq!(vaults, vec!["file:///A.db", "file:///B.db"]);
        assert_eq!(stored.entries[0].key_file.as_ref().unwrap().as_str(), "file:///ka.key");
        assert_eq!(stored.entries[0].cached_passphrase.as_ref().unwrap().expose(), "pa");
        assert_eq!(stored.entries[1].key_file.as_ref().unwrap().as_str(), "file:///kb.key");
        assert_eq!(stored.entries[1].cached_passphrase.as_ref().unwrap().expose(), "pb");

        // Second run is a no-op.
        let commits = store.commit_count();
        assert!(!migrator.run_if_needed(&store).await);
        assert_eq!(store.commit_count(), commits);
    }

    #[tokio::test]
    async fn test_missing_database_is_skipped() {
        let dir = TempDir::new().unwrap();
        let migrator = LegacyMigrator::in_dir(dir.path());
        let store = MemoryStore::new();

        assert!(matches!(migrator.migrate(&store).await, MigrationOutcome::Skipped));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_database_is_abandoned_and_deleted() {
        let dir = TempDir::new().unwrap();
        let migrator = LegacyMigrator::in_dir(dir.path());
        std::fs::write(migrator.path(), b"this is not a sqlite database at all").unwrap();

        let store = MemoryStore::new();
        assert!(matches!(migrator.migrate(&store).await, MigrationOutcome::Abandoned));
        assert!(!migrator.exists().await);
        assert_eq!(store.commit_count(), 0);

        assert!(!migrator.run_if_needed(&store).await);
    }

    #[tokio::test]
    async fn test_missing_table_is_abandoned() {
        let dir = TempDir::new().unwrap();
        let migrator = LegacyMigrator::in_dir(dir.path());
        Connection::open(migrator.path())
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();

        let store = MemoryStore::new();
        assert!(matches!(migrator.migrate(&store).await, MigrationOutcome::Abandoned));
        assert!(!migrator.exists().await);
    }
}
