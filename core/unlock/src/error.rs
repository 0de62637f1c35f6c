//! Error types for unlock orchestration.

use thiserror::Error;

use crate::biometric::UnavailableReason;

/// Reasons an open request or unlock attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnlockError {
    #[error("Cannot handle URI: {0}")]
    CannotHandleUri(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Neither a passphrase nor a key file was supplied")]
    EmptyCredential,

    #[error("Failed to load vault: {0}")]
    LoadFailure(String),

    #[error("An unlock attempt is already in progress")]
    Busy,

    #[error("History error: {0}")]
    History(String),
}

impl From<vaultkey_common::Error> for UnlockError {
    fn from(err: vaultkey_common::Error) -> Self {
        UnlockError::History(err.to_string())
    }
}

/// Reasons a biometric session cannot be armed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BiometricError {
    #[error("Biometric authentication unavailable: {0}")]
    Unavailable(UnavailableReason),

    #[error("No cached passphrase for this vault")]
    NoCachedPassphrase,

    #[error("History error: {0}")]
    History(String),
}

impl From<vaultkey_common::Error> for BiometricError {
    fn from(err: vaultkey_common::Error) -> Self {
        BiometricError::History(err.to_string())
    }
}
