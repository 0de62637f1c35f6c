//! Recent-file history for VaultKey.
//!
//! This module provides:
//! - A bounded, most-recent-first list of opened vaults with cached key files
//!   and passphrases
//! - The persisted key-value layout of that list
//! - One-time migration from the legacy SQLite history
//!
//! # Architecture
//! [`RecentFileHistory`] owns the in-memory list and writes it through a
//! [`vaultkey_storage::PersistedStore`]; [`LegacyMigrator`] runs once on first
//! access and writes with the same layout.

pub mod entry;
pub mod history;
pub mod layout;
pub mod legacy;

pub use entry::{RecentEntry, RecentList};
pub use history::RecentFileHistory;
pub use legacy::{entries_from_rows, LegacyMigrator, LegacyRow, MigrationOutcome};
