//! Unlock orchestration for VaultKey.
//!
//! This module provides:
//! - Resolution of open requests into a vault identity and key material
//! - A single in-flight unlock attempt driven on a worker task
//! - A biometric shortcut that replays cached credentials
//!
//! # Architecture
//! [`UnlockCoordinator`] sits between the caller and the [`VaultLoader`]
//! collaborator. It consults [`vaultkey_history::RecentFileHistory`] for
//! remembered key files, and records the attempt there only once the loader
//! reports success. [`BiometricAuthenticator`] never handles secrets: its
//! success signal tells the caller to unlock with cached credentials.

pub mod biometric;
pub mod coordinator;
pub mod error;
pub mod loader;
pub mod session;

pub use biometric::{
    AuthListener, AuthSignal, BiometricAuthenticator, BiometricHardware, BiometricState,
    HardwareStatus, UnavailableReason,
};
pub use coordinator::{OpenRequest, Opened, ResolvedRequest, UnlockCoordinator, SUPPORTED_SCHEMES};
pub use error::{BiometricError, UnlockError};
pub use loader::{LoadOutcome, VaultLoader};
pub use session::{SessionHandle, SessionState, UnlockEvent, UnlockOutcome};
