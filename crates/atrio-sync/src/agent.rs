//! # Sync Agent
//!
//! Main orchestrator for the terminal sync stack. Owns pairing, the
//! credential lifecycle, and both background loops.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • Pairs the terminal (token, human code, or PIN)                │  │
//! │  │  • Persists the device credential across restarts                │  │
//! │  │  • Spawns and stops the engine and the monitor                   │  │
//! │  │  • Exposes status(), connectivity(), trigger_sync()              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │              ┌────────────────┴───────────────┐                        │
//! │              ▼                                ▼                         │
//! │  ┌─────────────────────┐        ┌──────────────────────────┐           │
//! │  │     SyncEngine      │◄──────│   ConnectivityMonitor    │           │
//! │  │  (queue drain)      │ watch  │   (heartbeat loop)       │           │
//! │  └─────────────────────┘        └──────────────────────────┘           │
//! │                                                                         │
//! │  EVENTS (to the hosting UI via SyncEventEmitter):                      │
//! │  status / degraded / recovered / reauth_required / error               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use atrio_core::{ConnectivityState, DeviceSnapshot};
use atrio_db::Database;

use crate::client::{HttpServerApi, ServerApi};
use crate::config::SyncConfig;
use crate::credentials::{ActiveCredential, CredentialCell, CredentialStore, StoredCredential};
use crate::engine::{SyncEngine, SyncEngineHandle, SyncStatus};
use crate::error::{SyncError, SyncResult};
use crate::monitor::{ConnectivityMonitor, ConnectivityMonitorHandle};
use crate::protocol::{DeviceConfigSnapshot, DeviceLoginResponse};

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Events the sync stack surfaces to whatever UI layer hosts the agent.
///
/// Implemented by the host application (a desktop shell, a kiosk wrapper);
/// the engine and monitor never talk to a rendering layer directly.
pub trait SyncEventEmitter: Send + Sync {
    /// Engine status after every pass.
    fn emit_status(&self, status: &SyncStatus);

    /// Heartbeat failure threshold crossed. Fires once per outage.
    fn emit_degraded(&self);

    /// Link restored after degradation. Fires once per recovery.
    fn emit_recovered(&self);

    /// The server rejected our credential; the terminal must re-pair or
    /// log in with a PIN before sync resumes.
    fn emit_reauth_required(&self);

    /// A sync-level failure worth showing the operator.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for headless use and tests.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_degraded(&self) {}
    fn emit_recovered(&self) {}
    fn emit_reauth_required(&self) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Orchestrates pairing, credential storage, and the two background loops.
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Arc<Database>,
    api: Arc<dyn ServerApi>,
    credentials: Arc<CredentialCell>,
    emitter: Arc<dyn SyncEventEmitter>,

    /// File persistence for the credential; `None` for in-memory-only use.
    store: Option<CredentialStore>,

    engine_handle: Option<SyncEngineHandle>,
    monitor_handle: Option<ConnectivityMonitorHandle>,
}

impl SyncAgent {
    /// Creates an agent with the production HTTP client and the default
    /// credential file, seeding the session from a previously stored
    /// credential when one exists.
    pub fn new(config: SyncConfig, db: Arc<Database>) -> SyncResult<Self> {
        config.validate()?;
        let api = Arc::new(HttpServerApi::new(&config)?);

        let store = SyncConfig::default_credential_path().map(CredentialStore::new);
        let initial = match &store {
            Some(store) => store.load()?.map(|stored| ActiveCredential {
                device_id: stored.device_id,
                token: stored.device_credential,
            }),
            None => None,
        };

        Ok(Self::assemble(
            config,
            db,
            api,
            initial,
            store,
            Arc::new(NoOpEmitter),
        ))
    }

    fn assemble(
        config: SyncConfig,
        db: Arc<Database>,
        api: Arc<dyn ServerApi>,
        initial: Option<ActiveCredential>,
        store: Option<CredentialStore>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SyncAgent {
            config: Arc::new(config),
            db,
            api,
            credentials: Arc::new(CredentialCell::new(initial)),
            emitter,
            store,
            engine_handle: None,
            monitor_handle: None,
        }
    }

    /// True once a device credential is present (stored or freshly paired).
    pub async fn is_paired(&self) -> bool {
        self.credentials.current().await.is_some()
    }

    // =========================================================================
    // Pairing
    // =========================================================================

    /// Claims a pairing token (from the direct link / QR code) and installs
    /// the resulting credential.
    ///
    /// If the loops are already running after a credential rejection, call
    /// `shutdown()` then `start()` to resume with the new identity.
    pub async fn pair_with_token(&self, token: &str) -> SyncResult<DeviceSnapshot> {
        let grant = self.api.claim_by_token(token).await?;
        self.install_credential(&grant.device.id, grant.device_credential)
            .await?;
        info!(device_id = %grant.device.id, "Terminal paired by token");
        Ok(grant.device)
    }

    /// Claims a pairing token by its human-readable "NNN-NNN" code.
    pub async fn pair_with_code(&self, code: &str) -> SyncResult<DeviceSnapshot> {
        let grant = self.api.claim_by_code(code).await?;
        self.install_credential(&grant.device.id, grant.device_credential)
            .await?;
        info!(device_id = %grant.device.id, "Terminal paired by code");
        Ok(grant.device)
    }

    /// Logs in with the device PIN, refreshing the credential. Repeatable;
    /// does not consume pairing tokens.
    pub async fn login_with_pin(
        &self,
        device_id: &str,
        pin: &str,
    ) -> SyncResult<DeviceLoginResponse> {
        let response = self.api.login_with_pin(device_id, pin).await?;
        self.install_credential(&response.device.id, response.device_credential.clone())
            .await?;
        info!(device_id = %response.device.id, "Device PIN login succeeded");
        Ok(response)
    }

    /// Drops the credential locally (explicit unpair).
    pub async fn unpair(&self) -> SyncResult<()> {
        self.credentials.invalidate().await;
        if let Some(store) = &self.store {
            store.clear()?;
        }
        Ok(())
    }

    /// Fetches the device config snapshot with the current credential.
    pub async fn device_config(&self) -> SyncResult<DeviceConfigSnapshot> {
        let (credential, _) = self
            .credentials
            .current()
            .await
            .ok_or(SyncError::NotPaired)?;
        self.api.device_config(&credential.token).await
    }

    async fn install_credential(&self, device_id: &str, token: String) -> SyncResult<()> {
        self.credentials
            .install(ActiveCredential {
                device_id: device_id.to_string(),
                token: token.clone(),
            })
            .await;

        if let Some(store) = &self.store {
            store.save(&StoredCredential {
                device_id: device_id.to_string(),
                device_credential: token,
                obtained_at: Utc::now(),
            })?;
        }

        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the monitor and the engine as background tasks.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.engine_handle.is_some() {
            warn!("Sync agent already started");
            return Ok(());
        }

        self.config.validate()?;

        let (monitor, monitor_handle) = ConnectivityMonitor::new(
            self.api.clone(),
            self.config.clone(),
            self.credentials.clone(),
            self.emitter.clone(),
        );

        let (engine, engine_handle) = SyncEngine::new(
            self.db.clone(),
            self.config.clone(),
            self.api.clone(),
            self.credentials.clone(),
            monitor_handle.state_stream(),
            self.emitter.clone(),
        );

        tokio::spawn(monitor.run());
        tokio::spawn(engine.run());

        self.monitor_handle = Some(monitor_handle);
        self.engine_handle = Some(engine_handle);

        info!("Sync agent started");
        Ok(())
    }

    /// Stops both loops gracefully. In-flight calls complete, but their
    /// results are discarded if the credential epoch has moved.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync agent");

        if let Some(handle) = self.engine_handle.take() {
            let _ = handle.shutdown().await;
        }

        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.shutdown().await;
        }

        info!("Sync agent stopped");
        Ok(())
    }

    // =========================================================================
    // Queries & Control
    // =========================================================================

    /// Latest engine status. Default (never-synced) before `start()`.
    pub fn status(&self) -> SyncStatus {
        self.engine_handle
            .as_ref()
            .map(|h| h.status())
            .unwrap_or_default()
    }

    /// Latest connectivity verdict. `Connected` before `start()`.
    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor_handle
            .as_ref()
            .map(|h| h.state())
            .unwrap_or_default()
    }

    /// Requests a sync pass now (suppressed if one is already queued).
    pub fn trigger_sync(&self) {
        if let Some(handle) = &self.engine_handle {
            handle.trigger_sync();
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncAgent with custom parts (a fake API in tests,
/// a UI-backed emitter in the host application).
pub struct SyncAgentBuilder {
    config: SyncConfig,
    db: Option<Arc<Database>>,
    api: Option<Arc<dyn ServerApi>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    store: Option<CredentialStore>,
    initial_credential: Option<ActiveCredential>,
}

impl SyncAgentBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            db: None,
            api: None,
            emitter: None,
            store: None,
            initial_credential: None,
        }
    }

    /// Sets the database connection (required).
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Overrides the server API implementation.
    pub fn with_api(mut self, api: Arc<dyn ServerApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Uses a specific credential file instead of the default location.
    pub fn with_credential_store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Seeds the session with an already-obtained credential.
    pub fn with_credential(mut self, credential: ActiveCredential) -> Self {
        self.initial_credential = Some(credential);
        self
    }

    /// Builds the SyncAgent.
    pub fn build(self) -> SyncResult<SyncAgent> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;

        let api: Arc<dyn ServerApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpServerApi::new(&self.config)?),
        };

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::assemble(
            self.config,
            db,
            api,
            self.initial_credential,
            self.store,
            emitter,
        ))
    }
}

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts every emitted event; used by engine and monitor tests to
    /// assert one-time notification semantics.
    #[derive(Default)]
    pub(crate) struct RecordingEmitter {
        statuses: AtomicUsize,
        degraded: AtomicUsize,
        recovered: AtomicUsize,
        reauth: AtomicUsize,
        errors: AtomicUsize,
    }

    impl RecordingEmitter {
        pub(crate) fn status_count(&self) -> usize {
            self.statuses.load(Ordering::SeqCst)
        }
        pub(crate) fn degraded_count(&self) -> usize {
            self.degraded.load(Ordering::SeqCst)
        }
        pub(crate) fn recovered_count(&self) -> usize {
            self.recovered.load(Ordering::SeqCst)
        }
        pub(crate) fn reauth_count(&self) -> usize {
            self.reauth.load(Ordering::SeqCst)
        }
        pub(crate) fn error_count(&self) -> usize {
            self.errors.load(Ordering::SeqCst)
        }
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, _status: &SyncStatus) {
            self.statuses.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_degraded(&self) {
            self.degraded.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_recovered(&self) {
            self.recovered.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_reauth_required(&self) {
            self.reauth.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_error(&self, _message: &str, _retryable: bool) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ClaimGrant, SyncBatchRequest, SyncBatchResponse,
    };
    use async_trait::async_trait;
    use atrio_core::AssignmentMode;
    use atrio_db::DbConfig;

    struct AlwaysUpApi;

    fn device_snapshot() -> DeviceSnapshot {
        DeviceSnapshot {
            id: "device-1".to_string(),
            name: "Register 1".to_string(),
            location: None,
            assignment: AssignmentMode::Ephemeral,
            shared_terminal: false,
            is_active: true,
            last_seen_at: None,
            last_synced_at: None,
        }
    }

    #[async_trait]
    impl ServerApi for AlwaysUpApi {
        async fn claim_by_token(&self, _token: &str) -> SyncResult<ClaimGrant> {
            Ok(ClaimGrant {
                device_credential: "fresh.jwt".to_string(),
                device: device_snapshot(),
            })
        }

        async fn claim_by_code(&self, _code: &str) -> SyncResult<ClaimGrant> {
            Err(SyncError::PairingAlreadyClaimed)
        }

        async fn login_with_pin(
            &self,
            _device_id: &str,
            _pin: &str,
        ) -> SyncResult<DeviceLoginResponse> {
            Err(SyncError::InvalidCredential("bad pin".into()))
        }

        async fn submit_batch(
            &self,
            _credential: &str,
            _batch: &SyncBatchRequest,
        ) -> SyncResult<SyncBatchResponse> {
            Ok(SyncBatchResponse { results: vec![] })
        }

        async fn heartbeat(&self, _credential: &str) -> SyncResult<()> {
            Ok(())
        }

        async fn device_config(&self, _credential: &str) -> SyncResult<DeviceConfigSnapshot> {
            Err(SyncError::Internal("not scripted".into()))
        }
    }

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.server.base_url = "http://localhost:9".to_string();
        config
    }

    async fn test_agent() -> SyncAgent {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        SyncAgentBuilder::new(test_config())
            .with_database(db)
            .with_api(Arc::new(AlwaysUpApi))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_builder_requires_database() {
        let result = SyncAgentBuilder::new(test_config())
            .with_api(Arc::new(AlwaysUpApi))
            .build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_pairing_installs_credential() {
        let agent = test_agent().await;
        assert!(!agent.is_paired().await);

        let device = agent.pair_with_token("some-token").await.unwrap();
        assert_eq!(device.id, "device-1");
        assert!(agent.is_paired().await);

        agent.unpair().await.unwrap();
        assert!(!agent.is_paired().await);
    }

    #[tokio::test]
    async fn test_claimed_token_surfaces_terminal_error() {
        let agent = test_agent().await;
        let err = agent.pair_with_code("123-456").await.unwrap_err();
        assert!(matches!(err, SyncError::PairingAlreadyClaimed));
        assert!(err.is_terminal());
        assert!(!agent.is_paired().await);
    }

    #[tokio::test]
    async fn test_start_shutdown_lifecycle() {
        let mut agent = test_agent().await;
        agent.pair_with_token("some-token").await.unwrap();

        agent.start().await.unwrap();
        // Idempotent start
        agent.start().await.unwrap();

        agent.trigger_sync();
        let _ = agent.status();
        let _ = agent.connectivity();

        agent.shutdown().await.unwrap();
        // Control calls after shutdown are harmless no-ops
        agent.trigger_sync();
        assert_eq!(agent.status().pending_count, 0);
    }

    #[tokio::test]
    async fn test_device_config_requires_pairing() {
        let agent = test_agent().await;
        assert!(matches!(
            agent.device_config().await,
            Err(SyncError::NotPaired)
        ));
    }
}
