//! Open-request resolution and unlock orchestration.
//!
//! The coordinator runs at most one unlock attempt at a time. The loader call
//! is spawned on a worker task; when it completes the task checks that its
//! session is still current before touching history or emitting an event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::UnlockError;
use crate::loader::{LoadOutcome, VaultLoader};
use crate::session::{SessionHandle, SessionState, UnlockEvent, UnlockOutcome};
use vaultkey_common::{KeyMaterial, Passphrase, VaultIdentity};
use vaultkey_history::RecentFileHistory;
use vaultkey_storage::Settings;

/// URI schemes accepted from external open requests.
pub const SUPPORTED_SCHEMES: &[&str] = &["file", "content"];

/// A request to open a vault.
#[derive(Debug, Clone)]
pub enum OpenRequest {
    /// Raw URI handed over by another application or the command line.
    External {
        uri: String,
        passphrase: Option<Passphrase>,
        auto_launch: bool,
    },
    /// Vault chosen inside the application.
    Direct {
        vault: VaultIdentity,
        key_file: Option<VaultIdentity>,
        passphrase: Option<Passphrase>,
        auto_launch: bool,
    },
}

/// An open request with its vault and credentials resolved.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub vault: VaultIdentity,
    pub key_material: KeyMaterial,
    pub auto_launch: bool,
    /// The vault is the configured default.
    pub is_default: bool,
}

/// Result of [`UnlockCoordinator::open`].
#[derive(Debug, Clone)]
pub struct Opened {
    pub request: ResolvedRequest,
    /// Set when the unlock was launched immediately.
    pub session: Option<SessionHandle>,
}

#[derive(Debug)]
struct Slot {
    current: Option<SessionHandle>,
    state: SessionState,
}

/// Drives unlock attempts against a [`VaultLoader`].
pub struct UnlockCoordinator {
    history: Arc<RecentFileHistory>,
    loader: Arc<dyn VaultLoader>,
    remember_key_file: AtomicBool,
    default_vault: RwLock<Option<VaultIdentity>>,
    slot: Arc<Mutex<Slot>>,
    events: mpsc::UnboundedSender<UnlockEvent>,
}

impl UnlockCoordinator {
    /// Create a coordinator and the receiver of its terminal events.
    pub fn new(
        history: Arc<RecentFileHistory>,
        loader: Arc<dyn VaultLoader>,
        settings: &Settings,
    ) -> (Self, mpsc::UnboundedReceiver<UnlockEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            history,
            loader,
            remember_key_file: AtomicBool::new(settings.remember_key_file),
            default_vault: RwLock::new(settings.default_vault.clone()),
            slot: Arc::new(Mutex::new(Slot {
                current: None,
                state: SessionState::Idle,
            })),
            events,
        };
        (coordinator, rx)
    }

    /// Toggle the remembered key-file fallback.
    pub fn set_remember_key_file(&self, remember: bool) {
        self.remember_key_file.store(remember, Ordering::SeqCst);
    }

    /// Replace the default vault.
    pub async fn set_default_vault(&self, vault: Option<VaultIdentity>) {
        *self.default_vault.write().await = vault;
    }

    /// Get the current session state.
    pub async fn state(&self) -> SessionState {
        self.slot.lock().await.state.clone()
    }

    /// Resolve an open request into a vault and key material.
    ///
    /// # Postconditions
    /// - A missing key file is filled from history when key files are remembered
    ///
    /// # Errors
    /// - `CannotHandleUri` if the URI is empty, malformed, or uses an unsupported scheme
    /// - `FileNotFound` if a `file` URI does not name an existing file
    pub async fn resolve_request(
        &self,
        request: OpenRequest,
    ) -> Result<ResolvedRequest, UnlockError> {
        {
            let mut slot = self.slot.lock().await;
            if !slot.state.is_unlocking() {
                slot.state = SessionState::Resolving;
            }
        }

        let result = self.resolve(request).await;

        if let Err(e) = &result {
            debug!("Open request rejected: {}", e);
            let mut slot = self.slot.lock().await;
            if slot.state == SessionState::Resolving {
                slot.state = SessionState::Terminal(UnlockOutcome::Failure(e.clone()));
            }
        }
        result
    }

    async fn resolve(&self, request: OpenRequest) -> Result<ResolvedRequest, UnlockError> {
        match request {
            OpenRequest::External {
                uri,
                passphrase,
                auto_launch,
            } => {
                let vault = parse_external(&uri)?;
                if vault.is_local() {
                    check_local_file(&vault).await?;
                }
                let key_file = self.remembered_key_file(&vault).await?;
                Ok(ResolvedRequest {
                    key_material: KeyMaterial::new(passphrase, key_file),
                    is_default: self.is_default(&vault).await,
                    vault,
                    auto_launch,
                })
            }
            OpenRequest::Direct {
                vault,
                key_file,
                passphrase,
                auto_launch,
            } => {
                let key_file = match key_file {
                    Some(key_file) => Some(key_file),
                    None => self.remembered_key_file(&vault).await?,
                };
                Ok(ResolvedRequest {
                    key_material: KeyMaterial::new(passphrase, key_file),
                    is_default: self.is_default(&vault).await,
                    vault,
                    auto_launch,
                })
            }
        }
    }

    async fn is_default(&self, vault: &VaultIdentity) -> bool {
        self.default_vault.read().await.as_ref() == Some(vault)
    }

    async fn remembered_key_file(
        &self,
        vault: &VaultIdentity,
    ) -> Result<Option<VaultIdentity>, UnlockError> {
        if !self.remember_key_file.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.history.lookup_key_file(vault).await?)
    }

    /// Check that key material is usable for an attempt.
    pub fn validate(&self, key_material: &KeyMaterial) -> Result<(), UnlockError> {
        if key_material.is_empty() {
            return Err(UnlockError::EmptyCredential);
        }
        Ok(())
    }

    /// Start unlocking `vault`.
    ///
    /// # Preconditions
    /// - No other attempt is outstanding
    ///
    /// # Postconditions
    /// - State is `Unlocking` until the loader returns
    /// - Exactly one [`UnlockEvent`] is emitted unless the session is discarded
    ///
    /// # Errors
    /// - `EmptyCredential` if neither passphrase nor key file is present
    /// - `Busy` if an attempt is already running
    pub async fn unlock(
        &self,
        vault: VaultIdentity,
        key_material: KeyMaterial,
    ) -> Result<SessionHandle, UnlockError> {
        self.validate(&key_material)?;

        let handle = {
            let mut slot = self.slot.lock().await;
            if slot.state.is_unlocking() {
                return Err(UnlockError::Busy);
            }
            let handle = SessionHandle::new();
            slot.current = Some(handle.clone());
            slot.state = SessionState::Unlocking;
            handle
        };

        self.loader.unload();
        info!("Unlocking {} (session {})", vault, handle);

        let attempt = Attempt {
            handle: handle.clone(),
            vault,
            key_material,
            loader: self.loader.clone(),
            history: self.history.clone(),
            slot: self.slot.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(attempt.run());

        Ok(handle)
    }

    /// Resolve a request and, for auto-launch requests, start unlocking
    /// right away.
    ///
    /// # Errors
    /// - Any resolution error
    /// - `EmptyCredential` if an auto-launch request carries no credentials
    pub async fn open(&self, request: OpenRequest) -> Result<Opened, UnlockError> {
        let request = self.resolve_request(request).await?;
        if !request.auto_launch {
            return Ok(Opened {
                request,
                session: None,
            });
        }

        if let Err(e) = self.validate(&request.key_material) {
            debug!("Cannot launch {}: {}", request.vault, e);
            let mut slot = self.slot.lock().await;
            if slot.state == SessionState::Resolving {
                slot.state = SessionState::Terminal(UnlockOutcome::Failure(e.clone()));
            }
            return Err(e);
        }

        let session = self
            .unlock(request.vault.clone(), request.key_material.clone())
            .await?;
        Ok(Opened {
            request,
            session: Some(session),
        })
    }

    /// Unlock with the passphrase and key file cached in history.
    ///
    /// Used after a successful biometric authentication.
    pub async fn unlock_with_cached_credentials(
        &self,
        vault: &VaultIdentity,
    ) -> Result<SessionHandle, UnlockError> {
        let passphrase = self.history.lookup_passphrase(vault).await?;
        let key_file = self.history.lookup_key_file(vault).await?;
        self.unlock(vault.clone(), KeyMaterial::new(passphrase, key_file))
            .await
    }

    /// Abandon the current session.
    ///
    /// A running loader call completes, but its result is ignored.
    pub async fn discard(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.current.take() {
            info!("Discarding session {}", handle);
        }
        slot.state = SessionState::Idle;
    }
}

struct Attempt {
    handle: SessionHandle,
    vault: VaultIdentity,
    key_material: KeyMaterial,
    loader: Arc<dyn VaultLoader>,
    history: Arc<RecentFileHistory>,
    slot: Arc<Mutex<Slot>>,
    events: mpsc::UnboundedSender<UnlockEvent>,
}

impl Attempt {
    async fn run(mut self) {
        let loader = self.loader.clone();
        let vault = self.vault.clone();
        let key_material = self.key_material.clone();
        // A panicking loader must still end the session.
        let load = tokio::spawn(async move {
            loader
                .load(&vault, key_material.passphrase(), key_material.key_file())
                .await
        });
        let outcome = match load.await {
            Ok(outcome) => classify(outcome),
            Err(e) => {
                warn!("Vault loader for {} did not complete: {}", self.vault, e);
                UnlockOutcome::Failure(UnlockError::LoadFailure(format!(
                    "Vault loader did not complete: {}",
                    e
                )))
            }
        };

        let mut slot = self.slot.lock().await;
        if slot.current.as_ref() != Some(&self.handle) {
            debug!("Ignoring result of discarded session {}", self.handle);
            self.key_material.clear();
            return;
        }

        if outcome.is_unlocked() {
            if let Err(e) = self
                .history
                .record_success(
                    &self.vault,
                    self.key_material.key_file(),
                    self.key_material.passphrase(),
                )
                .await
            {
                warn!("Failed to record {} in history: {}", self.vault, e);
            }
        }

        match &outcome {
            UnlockOutcome::Success => info!("Unlocked {}", self.vault),
            UnlockOutcome::PassphraseEncodingWarning => {
                info!("Unlocked {} with legacy passphrase encoding", self.vault)
            }
            UnlockOutcome::Failure(e) => info!("Failed to unlock {}: {}", self.vault, e),
        }

        slot.current = None;
        slot.state = SessionState::Terminal(outcome.clone());
        self.key_material.clear();

        let _ = self.events.send(UnlockEvent {
            session: self.handle,
            vault: self.vault,
            outcome,
        });
    }
}

fn classify(outcome: LoadOutcome) -> UnlockOutcome {
    if outcome.password_encoding_error {
        UnlockOutcome::PassphraseEncodingWarning
    } else if outcome.success {
        UnlockOutcome::Success
    } else {
        let message = outcome
            .message
            .unwrap_or_else(|| "Unknown error".to_string());
        UnlockOutcome::Failure(UnlockError::LoadFailure(message))
    }
}

fn parse_external(uri: &str) -> Result<VaultIdentity, UnlockError> {
    if uri.trim().is_empty() {
        return Err(UnlockError::CannotHandleUri(uri.to_string()));
    }
    let vault =
        VaultIdentity::parse(uri).map_err(|_| UnlockError::CannotHandleUri(uri.to_string()))?;
    if !SUPPORTED_SCHEMES.contains(&vault.scheme()) {
        return Err(UnlockError::CannotHandleUri(uri.to_string()));
    }
    Ok(vault)
}

async fn check_local_file(vault: &VaultIdentity) -> Result<(), UnlockError> {
    let path = vault
        .local_path()
        .ok_or_else(|| UnlockError::FileNotFound(vault.to_string()))?;
    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        _ => Err(UnlockError::FileNotFound(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;
    use vaultkey_storage::MemoryStore;

    struct ScriptedLoader {
        outcome: LoadOutcome,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        completed: AtomicUsize,
        unloads: AtomicUsize,
        last_passphrase: std::sync::Mutex<Option<String>>,
    }

    impl ScriptedLoader {
        fn new(outcome: LoadOutcome) -> Self {
            Self {
                outcome,
                gate: None,
                calls: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                unloads: AtomicUsize::new(0),
                last_passphrase: std::sync::Mutex::new(None),
            }
        }

        fn gated(outcome: LoadOutcome, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(outcome)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VaultLoader for ScriptedLoader {
        async fn load(
            &self,
            _vault: &VaultIdentity,
            passphrase: Option<&Passphrase>,
            _key_file: Option<&VaultIdentity>,
        ) -> LoadOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_passphrase.lock().unwrap() = passphrase.map(|p| p.expose().to_string());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }

        fn unload(&self) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        history: Arc<RecentFileHistory>,
        loader: Arc<ScriptedLoader>,
        coordinator: UnlockCoordinator,
        events: mpsc::UnboundedReceiver<UnlockEvent>,
    }

    fn fixture(loader: ScriptedLoader) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let settings = Settings::default();
        let history = Arc::new(RecentFileHistory::new(store.clone(), &settings));
        let loader = Arc::new(loader);
        let (coordinator, events) =
            UnlockCoordinator::new(history.clone(), loader.clone(), &settings);
        Fixture {
            store,
            history,
            loader,
            coordinator,
            events,
        }
    }

    fn v1() -> VaultIdentity {
        VaultIdentity::parse("file:///v1.db").unwrap()
    }

    fn key() -> VaultIdentity {
        VaultIdentity::parse("file:///v1.key").unwrap()
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<UnlockEvent>) -> UnlockEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_credentials_rejected() {
        let f = fixture(ScriptedLoader::new(LoadOutcome::success()));

        let result = f
            .coordinator
            .unlock(v1(), KeyMaterial::new(Some(Passphrase::new("")), None))
            .await;

        assert_eq!(result.unwrap_err(), UnlockError::EmptyCredential);
        assert_eq!(f.loader.calls(), 0);
        assert_eq!(f.store.commit_count(), 0);
        assert_eq!(f.coordinator.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_success_records_history() {
        let mut f = fixture(ScriptedLoader::new(LoadOutcome::success()));

        let handle = f
            .coordinator
            .unlock(v1(), KeyMaterial::from_passphrase("secret"))
            .await
            .unwrap();

        let event = next_event(&mut f.events).await;
        assert_eq!(event.session, handle);
        assert_eq!(event.vault, v1());
        assert_eq!(event.outcome, UnlockOutcome::Success);
        assert_eq!(
            f.coordinator.state().await,
            SessionState::Terminal(UnlockOutcome::Success)
        );

        let entry = f.history.entry_at(0).await.unwrap().unwrap();
        assert_eq!(entry.vault, v1());
        assert!(entry.key_file.is_none());
        assert_eq!(entry.cached_passphrase.unwrap().expose(), "secret");
        assert_eq!(f.loader.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(f.loader.last_passphrase.lock().unwrap().as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_encoding_warning_records_history() {
        let mut f = fixture(ScriptedLoader::new(LoadOutcome::encoding_warning()));

        f.coordinator
            .unlock(v1(), KeyMaterial::new(Some("pw".into()), Some(key())))
            .await
            .unwrap();

        let event = next_event(&mut f.events).await;
        assert_eq!(event.outcome, UnlockOutcome::PassphraseEncodingWarning);
        assert_eq!(f.history.lookup_key_file(&v1()).await.unwrap(), Some(key()));
    }

    #[tokio::test]
    async fn test_failure_leaves_history_untouched() {
        let mut f = fixture(ScriptedLoader::new(LoadOutcome::failure("Invalid password")));

        f.coordinator
            .unlock(v1(), KeyMaterial::from_passphrase("wrong"))
            .await
            .unwrap();

        let event = next_event(&mut f.events).await;
        let expected = UnlockOutcome::Failure(UnlockError::LoadFailure(
            "Invalid password".to_string(),
        ));
        assert_eq!(event.outcome, expected);
        assert_eq!(f.coordinator.state().await, SessionState::Terminal(expected));
        assert_eq!(f.store.commit_count(), 0);
        assert!(!f.history.has_recent_files().await.unwrap());
    }

    #[tokio::test]
    async fn test_second_unlock_is_busy() {
        let gate = Arc::new(Notify::new());
        let mut f = fixture(ScriptedLoader::gated(LoadOutcome::success(), gate.clone()));

        f.coordinator
            .unlock(v1(), KeyMaterial::from_passphrase("a"))
            .await
            .unwrap();
        assert_eq!(f.coordinator.state().await, SessionState::Unlocking);

        let second = f
            .coordinator
            .unlock(key(), KeyMaterial::from_passphrase("b"))
            .await;
        assert_eq!(second.unwrap_err(), UnlockError::Busy);

        gate.notify_one();
        let event = next_event(&mut f.events).await;
        assert_eq!(event.vault, v1());
        assert_eq!(f.loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_discarded_session_is_silent() {
        let gate = Arc::new(Notify::new());
        let mut f = fixture(ScriptedLoader::gated(LoadOutcome::success(), gate.clone()));

        f.coordinator
            .unlock(v1(), KeyMaterial::from_passphrase("secret"))
            .await
            .unwrap();
        f.coordinator.discard().await;
        assert_eq!(f.coordinator.state().await, SessionState::Idle);

        gate.notify_one();
        while f.loader.completed.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let event = tokio::time::timeout(Duration::from_millis(50), f.events.recv()).await;
        assert!(event.is_err());
        assert_eq!(f.store.commit_count(), 0);
        assert_eq!(f.coordinator.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_resolve_external_fills_remembered_key_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v1.db");
        std::fs::write(&path, b"vault").unwrap();
        let vault = VaultIdentity::from_path(&path).unwrap();

        let f = fixture(ScriptedLoader::new(LoadOutcome::success()));
        f.history
            .record_success(&vault, Some(&key()), None)
            .await
            .unwrap();

        let resolved = f
            .coordinator
            .resolve_request(OpenRequest::External {
                uri: path.display().to_string(),
                passphrase: None,
                auto_launch: false,
            })
            .await
            .unwrap();

        assert_eq!(resolved.vault, vault);
        assert_eq!(resolved.key_material.key_file(), Some(&key()));
        assert_eq!(f.coordinator.state().await, SessionState::Resolving);

        f.coordinator.set_remember_key_file(false);
        let resolved = f
            .coordinator
            .resolve_request(OpenRequest::External {
                uri: vault.to_string(),
                passphrase: None,
                auto_launch: false,
            })
            .await
            .unwrap();
        assert!(resolved.key_material.key_file().is_none());
    }

    #[tokio::test]
    async fn test_resolve_external_rejections() {
        let dir = TempDir::new().unwrap();
        let f = fixture(ScriptedLoader::new(LoadOutcome::success()));

        let external = |uri: &str| OpenRequest::External {
            uri: uri.to_string(),
            passphrase: Some("pw".into()),
            auto_launch: true,
        };

        for uri in ["", "   ", "https://example.com/v1.db", "relative/v1.db"] {
            let err = f.coordinator.resolve_request(external(uri)).await.unwrap_err();
            assert!(matches!(err, UnlockError::CannotHandleUri(_)), "{uri}: {err:?}");
        }

        let missing = dir.path().join("missing.db");
        let err = f
            .coordinator
            .resolve_request(external(&missing.display().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, UnlockError::FileNotFound(_)));
        assert!(matches!(
            f.coordinator.state().await,
            SessionState::Terminal(UnlockOutcome::Failure(UnlockError::FileNotFound(_)))
        ));

        let err = f
            .coordinator
            .resolve_request(external(&dir.path().display().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, UnlockError::FileNotFound(_)));

        let resolved = f
            .coordinator
            .resolve_request(external("content://docs/v1"))
            .await
            .unwrap();
        assert_eq!(resolved.vault.scheme(), "content");
        assert_eq!(f.loader.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_direct_keeps_supplied_key_file() {
        let f = fixture(ScriptedLoader::new(LoadOutcome::success()));
        let remembered = VaultIdentity::parse("file:///old.key").unwrap();
        f.history
            .record_success(&v1(), Some(&remembered), None)
            .await
            .unwrap();

        let resolved = f
            .coordinator
            .resolve_request(OpenRequest::Direct {
                vault: v1(),
                key_file: Some(key()),
                passphrase: None,
                auto_launch: false,
            })
            .await
            .unwrap();
        assert_eq!(resolved.key_material.key_file(), Some(&key()));

        let resolved = f
            .coordinator
            .resolve_request(OpenRequest::Direct {
                vault: v1(),
                key_file: None,
                passphrase: None,
                auto_launch: false,
            })
            .await
            .unwrap();
        assert_eq!(resolved.key_material.key_file(), Some(&remembered));
    }

    #[tokio::test]
    async fn test_resolve_reports_default_vault() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = Settings::default();
        settings.set_default(VaultIdentity::parse("/v1.db").unwrap());
        let history = Arc::new(RecentFileHistory::new(store, &settings));
        let (coordinator, _events) = UnlockCoordinator::new(
            history,
            Arc::new(ScriptedLoader::new(LoadOutcome::success())),
            &settings,
        );
        let direct = |vault: VaultIdentity| OpenRequest::Direct {
            vault,
            key_file: None,
            passphrase: None,
            auto_launch: false,
        };

        assert!(coordinator.resolve_request(direct(v1())).await.unwrap().is_default);
        let other = VaultIdentity::parse("file:///v2.db").unwrap();
        assert!(!coordinator.resolve_request(direct(other.clone())).await.unwrap().is_default);

        coordinator.set_default_vault(Some(other.clone())).await;
        assert!(coordinator.resolve_request(direct(other)).await.unwrap().is_default);
        coordinator.set_default_vault(None).await;
        assert!(!coordinator.resolve_request(direct(v1())).await.unwrap().is_default);
    }

    #[tokio::test]
    async fn test_open_auto_launches() {
        let mut f = fixture(ScriptedLoader::new(LoadOutcome::success()));

        let opened = f
            .coordinator
            .open(OpenRequest::Direct {
                vault: v1(),
                key_file: None,
                passphrase: Some("secret".into()),
                auto_launch: true,
            })
            .await
            .unwrap();

        let session = opened.session.unwrap();
        assert_eq!(next_event(&mut f.events).await.session, session);
    }

    #[tokio::test]
    async fn test_open_without_credentials_is_empty_credential() {
        let f = fixture(ScriptedLoader::new(LoadOutcome::success()));

        let err = f
            .coordinator
            .open(OpenRequest::Direct {
                vault: v1(),
                key_file: None,
                passphrase: Some(Passphrase::new("")),
                auto_launch: true,
            })
            .await
            .unwrap_err();

        assert_eq!(err, UnlockError::EmptyCredential);
        assert_eq!(
            f.coordinator.state().await,
            SessionState::Terminal(UnlockOutcome::Failure(UnlockError::EmptyCredential))
        );
        assert_eq!(f.loader.calls(), 0);
        assert_eq!(f.store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_open_without_auto_launch_waits() {
        let f = fixture(ScriptedLoader::new(LoadOutcome::success()));

        let opened = f
            .coordinator
            .open(OpenRequest::Direct {
                vault: v1(),
                key_file: None,
                passphrase: None,
                auto_launch: false,
            })
            .await
            .unwrap();

        assert!(opened.session.is_none());
        assert!(opened.request.key_material.is_empty());
        assert_eq!(f.coordinator.state().await, SessionState::Resolving);
        assert_eq!(f.loader.calls(), 0);
    }

    struct PanickingLoader;

    #[async_trait]
    impl VaultLoader for PanickingLoader {
        async fn load(
            &self,
            _vault: &VaultIdentity,
            _passphrase: Option<&Passphrase>,
            _key_file: Option<&VaultIdentity>,
        ) -> LoadOutcome {
            panic!("corrupt header");
        }
    }

    #[tokio::test]
    async fn test_panicking_loader_ends_session() {
        let store = Arc::new(MemoryStore::new());
        let settings = Settings::default();
        let history = Arc::new(RecentFileHistory::new(store.clone(), &settings));
        let (coordinator, mut events) =
            UnlockCoordinator::new(history, Arc::new(PanickingLoader), &settings);

        let handle = coordinator
            .unlock(v1(), KeyMaterial::from_passphrase("secret"))
            .await
            .unwrap();

        let event = next_event(&mut events).await;
        assert_eq!(event.session, handle);
        assert!(matches!(
            event.outcome,
            UnlockOutcome::Failure(UnlockError::LoadFailure(_))
        ));
        assert!(matches!(
            coordinator.state().await,
            SessionState::Terminal(UnlockOutcome::Failure(UnlockError::LoadFailure(_)))
        ));
        assert_eq!(store.commit_count(), 0);

        // The slot is free again.
        coordinator
            .unlock(v1(), KeyMaterial::from_passphrase("secret"))
            .await
            .unwrap();
        next_event(&mut events).await;
    }

    #[tokio::test]
    async fn test_unlock_with_cached_credentials() {
        let mut f = fixture(ScriptedLoader::new(LoadOutcome::success()));
        f.history
            .record_success(&v1(), Some(&key()), Some(&"cached".into()))
            .await
            .unwrap();

        f.coordinator.unlock_with_cached_credentials(&v1()).await.unwrap();
        next_event(&mut f.events).await;

        assert_eq!(f.loader.last_passphrase.lock().unwrap().as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn test_unlock_with_nothing_cached_is_empty_credential() {
        let f = fixture(ScriptedLoader::new(LoadOutcome::success()));
        let err = f
            .coordinator
            .unlock_with_cached_credentials(&v1())
            .await
            .unwrap_err();
        assert_eq!(err, UnlockError::EmptyCredential);
    }
}
