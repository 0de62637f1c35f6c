//! Vault decryption collaborator.

use async_trait::async_trait;

use vaultkey_common::{Passphrase, VaultIdentity};

/// Result reported by a [`VaultLoader`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// The vault was opened.
    pub success: bool,
    /// The vault was opened, but the passphrase had to be re-encoded to match.
    pub password_encoding_error: bool,
    /// Loader-provided detail for failures.
    pub message: Option<String>,
}

impl LoadOutcome {
    /// Successful load.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Load that succeeded only with a legacy passphrase encoding.
    pub fn encoding_warning() -> Self {
        Self {
            success: true,
            password_encoding_error: true,
            message: None,
        }
    }

    /// Failed load.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            password_encoding_error: false,
            message: Some(message.into()),
        }
    }
}

/// Opens and closes vaults.
///
/// Implementations own the vault format and key derivation. `load` runs on
/// a worker task and may block for as long as decryption takes.
#[async_trait]
pub trait VaultLoader: Send + Sync {
    /// Attempt to open `vault` with the given credentials.
    async fn load(
        &self,
        vault: &VaultIdentity,
        passphrase: Option<&Passphrase>,
        key_file: Option<&VaultIdentity>,
    ) -> LoadOutcome;

    /// Release any previously loaded vault.
    fn unload(&self) {}
}
