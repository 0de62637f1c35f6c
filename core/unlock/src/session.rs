//! Unlock session tracking.

use std::fmt;
use uuid::Uuid;

use crate::error::UnlockError;
use vaultkey_common::VaultIdentity;

/// Session handle for tracking unlock attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an unlock attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Vault opened.
    Success,
    /// Vault opened, but the passphrase only matched in a legacy encoding.
    PassphraseEncodingWarning,
    /// Vault not opened.
    Failure(UnlockError),
}

impl UnlockOutcome {
    /// Check if the vault was opened.
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Success | Self::PassphraseEncodingWarning)
    }
}

/// State of the coordinator's current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No request in progress.
    Idle,
    /// An open request is being resolved.
    Resolving,
    /// The loader is running.
    Unlocking,
    /// The last attempt ended.
    Terminal(UnlockOutcome),
}

impl SessionState {
    /// Check if an unlock attempt is outstanding.
    pub fn is_unlocking(&self) -> bool {
        matches!(self, Self::Unlocking)
    }
}

/// Terminal event emitted once per completed, non-discarded attempt.
#[derive(Debug, Clone)]
pub struct UnlockEvent {
    pub session: SessionHandle,
    pub vault: VaultIdentity,
    pub outcome: UnlockOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = SessionHandle::new();
        let b = SessionHandle::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), a.to_string());
    }

    #[test]
    fn test_outcome_is_unlocked() {
        assert!(UnlockOutcome::Success.is_unlocked());
        assert!(UnlockOutcome::PassphraseEncodingWarning.is_unlocked());
        assert!(!UnlockOutcome::Failure(UnlockError::LoadFailure("bad".into())).is_unlocked());
    }
}
