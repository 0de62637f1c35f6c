//! Biometric unlock shortcut.
//!
//! Biometrics only gate access to a passphrase that history already caches
//! for the vault. A successful authentication carries no secret; the caller
//! follows up with [`crate::UnlockCoordinator::unlock_with_cached_credentials`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BiometricError;
use vaultkey_common::VaultIdentity;
use vaultkey_history::RecentFileHistory;

/// Capabilities reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareStatus {
    pub hardware_detected: bool,
    pub enrolled: bool,
    pub permission_granted: bool,
}

impl HardwareStatus {
    /// Status of fully usable hardware.
    pub fn available() -> Self {
        Self {
            hardware_detected: true,
            enrolled: true,
            permission_granted: true,
        }
    }

    /// First unmet precondition, if any.
    pub fn unavailable_reason(&self) -> Option<UnavailableReason> {
        if !self.hardware_detected {
            Some(UnavailableReason::NoHardware)
        } else if !self.permission_granted {
            Some(UnavailableReason::PermissionDenied)
        } else if !self.enrolled {
            Some(UnavailableReason::NotEnrolled)
        } else {
            None
        }
    }
}

/// Why biometrics cannot be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    NoHardware,
    PermissionDenied,
    NotEnrolled,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NoHardware => "no biometric hardware",
            Self::PermissionDenied => "permission not granted",
            Self::NotEnrolled => "no biometrics enrolled",
        };
        f.write_str(reason)
    }
}

/// Signal from a running authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    Succeeded,
    /// A biometric was read but did not match. The session continues.
    NotRecognized,
    /// Advisory message for the user. The session continues.
    Help(String),
    /// Unrecoverable error. The session ends.
    Error(String),
}

/// Platform biometric hardware.
pub trait BiometricHardware: Send + Sync {
    /// Current capability of the device.
    fn status(&self) -> HardwareStatus;

    /// Begin an authentication.
    ///
    /// Signals arrive on the returned channel until the session ends or
    /// `cancel` fires.
    fn authenticate(&self, cancel: CancellationToken) -> mpsc::Receiver<AuthSignal>;
}

/// Receives the outcome of an armed session.
pub trait AuthListener: Send + Sync {
    fn on_success(&self, vault: &VaultIdentity);
    fn on_recoverable_failure(&self);
    fn on_help(&self, message: &str);
    fn on_fatal_failure(&self, message: &str);
}

/// What the biometric shortcut can do for a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiometricState {
    Unavailable(UnavailableReason),
    /// Hardware is usable but no passphrase is cached for the vault.
    ReadyNoCachedSecret,
    /// Can be armed.
    Ready,
    Armed,
    AuthSucceeded,
    AuthFailedRecoverable,
    AuthFailedFatal,
}

struct ArmedSession {
    vault: VaultIdentity,
    cancel: CancellationToken,
}

/// Runs at most one biometric authentication at a time.
pub struct BiometricAuthenticator {
    hardware: Arc<dyn BiometricHardware>,
    history: Arc<RecentFileHistory>,
    session: Mutex<Option<ArmedSession>>,
    state: Arc<Mutex<BiometricState>>,
}

impl BiometricAuthenticator {
    pub fn new(hardware: Arc<dyn BiometricHardware>, history: Arc<RecentFileHistory>) -> Self {
        let initial = match hardware.status().unavailable_reason() {
            Some(reason) => BiometricState::Unavailable(reason),
            None => BiometricState::Ready,
        };
        Self {
            hardware,
            history,
            session: Mutex::new(None),
            state: Arc::new(Mutex::new(initial)),
        }
    }

    /// State of the last or current session.
    pub fn state(&self) -> BiometricState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check what can be offered for `vault`.
    pub async fn probe(&self, vault: &VaultIdentity) -> Result<BiometricState, BiometricError> {
        if let Some(reason) = self.hardware.status().unavailable_reason() {
            return Ok(BiometricState::Unavailable(reason));
        }
        if self.history.lookup_passphrase(vault).await?.is_none() {
            return Ok(BiometricState::ReadyNoCachedSecret);
        }
        if self.is_armed_for(vault) {
            return Ok(BiometricState::Armed);
        }
        Ok(BiometricState::Ready)
    }

    fn is_armed_for(&self, vault: &VaultIdentity) -> bool {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(
            session.as_ref(),
            Some(s) if &s.vault == vault && !s.cancel.is_cancelled()
        ) && self.state() == BiometricState::Armed
    }

    /// Start an authentication for `vault`.
    ///
    /// # Preconditions
    /// - Hardware is present, permitted and enrolled
    /// - History caches a passphrase for `vault`
    ///
    /// # Postconditions
    /// - Any previous session is cancelled
    /// - State is `Armed` until a terminal signal or `cancel`
    ///
    /// # Errors
    /// - `Unavailable` naming the unmet hardware precondition
    /// - `NoCachedPassphrase` if nothing is cached for `vault`
    pub async fn arm(
        &self,
        vault: &VaultIdentity,
        listener: Arc<dyn AuthListener>,
    ) -> Result<(), BiometricError> {
        if let Some(reason) = self.hardware.status().unavailable_reason() {
            self.set_state(BiometricState::Unavailable(reason));
            return Err(BiometricError::Unavailable(reason));
        }
        if self.history.lookup_passphrase(vault).await?.is_none() {
            self.set_state(BiometricState::ReadyNoCachedSecret);
            return Err(BiometricError::NoCachedPassphrase);
        }

        let cancel = CancellationToken::new();
        {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = session.take() {
                debug!("Cancelling biometric session for {}", previous.vault);
                previous.cancel.cancel();
            }
            *session = Some(ArmedSession {
                vault: vault.clone(),
                cancel: cancel.clone(),
            });
        }
        self.set_state(BiometricState::Armed);

        let signals = self.hardware.authenticate(cancel.clone());
        info!("Biometric authentication armed for {}", vault);
        tokio::spawn(listen(
            signals,
            cancel,
            vault.clone(),
            listener,
            self.state.clone(),
        ));
        Ok(())
    }

    /// Cancel the armed session, if any.
    pub fn cancel(&self) {
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(previous) = previous else {
            return;
        };
        if previous.cancel.is_cancelled() {
            return;
        }
        previous.cancel.cancel();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == BiometricState::Armed {
            *state = BiometricState::Ready;
        }
        debug!("Biometric session for {} cancelled", previous.vault);
    }

    fn set_state(&self, next: BiometricState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Drop for BiometricAuthenticator {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn listen(
    mut signals: mpsc::Receiver<AuthSignal>,
    cancel: CancellationToken,
    vault: VaultIdentity,
    listener: Arc<dyn AuthListener>,
    state: Arc<Mutex<BiometricState>>,
) {
    let set_state = |next: BiometricState| {
        if !cancel.is_cancelled() {
            *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        }
    };

    loop {
        let signal = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = signals.recv() => signal,
        };

        match signal {
            Some(AuthSignal::Succeeded) => {
                set_state(BiometricState::AuthSucceeded);
                info!("Biometric authentication succeeded for {}", vault);
                listener.on_success(&vault);
                break;
            }
            Some(AuthSignal::NotRecognized) => {
                set_state(BiometricState::AuthFailedRecoverable);
                listener.on_recoverable_failure();
            }
            Some(AuthSignal::Help(message)) => listener.on_help(&message),
            Some(AuthSignal::Error(message)) => {
                set_state(BiometricState::AuthFailedFatal);
                warn!("Biometric authentication failed: {}", message);
                listener.on_fatal_failure(&message);
                break;
            }
            None => {
                debug!("Biometric signal channel closed");
                break;
            }
        }
    }

    // The session is over; a later cancel() has nothing to stop.
    cancel.cancel();
}
