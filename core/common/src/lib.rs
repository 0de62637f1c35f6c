//! Common utilities and types shared across VaultKey modules.
//!
//! This module provides the foundational vocabulary of the unlock layer:
//! vault identities, key material and the shared error type.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{KeyMaterial, Passphrase, VaultIdentity};
