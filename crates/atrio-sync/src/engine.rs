//! # Sync Engine
//!
//! Drains the local `pending_sales` queue against the venue server.
//!
//! ## Drain Pass Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Engine Pass                                  │
//! │                                                                         │
//! │  TRIGGERS (any of)                                                     │
//! │  • interval tick (default 30 s)                                        │
//! │  • connectivity transition back to Connected                           │
//! │  • manual trigger (capacity-1: a second trigger while one is           │
//! │    queued is suppressed, not queued)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  list_pending(batch_size)  (oldest first, corrupt rows excluded)       │
//! │       │                                                                 │
//! │       ├── attempts ≥ max_attempts?   skip (visible, never deleted)     │
//! │       ├── not yet eligible?          skip (persisted backoff)          │
//! │       ├── fails monetary checks?     quarantine BEFORE any network     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  mark_submitting → POST /api/sync/batch → per-key verdicts             │
//! │       │                                                                 │
//! │       ├── accepted / already_applied → remove (the ONLY delete path)   │
//! │       ├── rejected(reason)           → record_failure(reason)          │
//! │       └── transport failure          → record_failure for the batch    │
//! │                                                                         │
//! │  A 401/403 invalidates the credential; verdicts arriving under a       │
//! │  stale epoch are discarded without touching the queue.                 │
//! │                                                                         │
//! │  Whole pass runs under tokio::time::timeout(max_pass_secs) so a hung   │
//! │  call can never block the next tick.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Backoff
//! A record becomes eligible again at
//! `last_attempt_at + min(base * 2^attempts, cap)`. The schedule is derived
//! from persisted columns, so it survives restarts without any in-memory
//! timer state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use atrio_core::validation::verify_stored_payload;
use atrio_core::{ConnectivityState, PendingSale, SalePayload, SyncOutcome};
use atrio_db::Database;

use crate::agent::SyncEventEmitter;
use crate::client::ServerApi;
use crate::config::{MaxAttemptsPolicy, SyncConfig};
use crate::credentials::CredentialCell;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{SyncBatchRequest, SyncRecord};

// =============================================================================
// Sync Status
// =============================================================================

/// Engine status for external queries, published on a watch channel after
/// every pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// A drain pass is running right now.
    pub is_syncing: bool,

    /// Non-corrupt rows still in the local queue.
    pub pending_count: i64,

    /// When the last pass finished without an engine-level error.
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Last engine-level error (transport, credential, timeout).
    pub last_error: Option<String>,
}

// =============================================================================
// Engine Handle
// =============================================================================

/// Handle for controlling a running engine from the agent or the host UI.
#[derive(Debug, Clone)]
pub struct SyncEngineHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    status_rx: watch::Receiver<SyncStatus>,
}

impl SyncEngineHandle {
    /// Requests a sync pass now.
    ///
    /// The trigger channel has capacity 1: if a trigger is already queued,
    /// this one is suppressed. A pass is a full queue drain, so two queued
    /// triggers could never do more work than one.
    pub fn trigger_sync(&self) {
        match self.trigger_tx.try_send(()) {
            Ok(()) => debug!("Manual sync trigger queued"),
            Err(TrySendError::Full(_)) => debug!("Sync trigger already queued, suppressing"),
            Err(TrySendError::Closed(_)) => warn!("Sync engine stopped, trigger dropped"),
        }
    }

    /// Returns the latest published status.
    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    /// Returns a watch receiver for observing status changes.
    pub fn status_stream(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// The queue drain loop. One instance per terminal, one pass at a time.
pub struct SyncEngine {
    db: Arc<Database>,
    config: Arc<SyncConfig>,
    api: Arc<dyn ServerApi>,
    credentials: Arc<CredentialCell>,
    emitter: Arc<dyn SyncEventEmitter>,

    /// Connectivity published by the monitor; a transition back to
    /// Connected triggers an immediate pass.
    connectivity_rx: watch::Receiver<ConnectivityState>,

    status_tx: watch::Sender<SyncStatus>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SyncEngine {
    /// Creates an engine and its control handle.
    pub fn new(
        db: Arc<Database>,
        config: Arc<SyncConfig>,
        api: Arc<dyn ServerApi>,
        credentials: Arc<CredentialCell>,
        connectivity_rx: watch::Receiver<ConnectivityState>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> (Self, SyncEngineHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());

        let engine = SyncEngine {
            db,
            config,
            api,
            credentials,
            emitter,
            connectivity_rx,
            status_tx,
            trigger_rx,
            shutdown_rx,
        };

        let handle = SyncEngineHandle {
            trigger_tx,
            shutdown_tx,
            status_rx,
        };

        (engine, handle)
    }

    /// Runs the engine loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.sync.interval_secs,
            batch_size = self.config.sync.batch_size,
            "Sync engine starting"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sync.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut monitor_alive = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.drive_pass("interval").await;
                }

                Some(_) = self.trigger_rx.recv() => {
                    self.drive_pass("manual").await;
                }

                changed = self.connectivity_rx.changed(), if monitor_alive => {
                    match changed {
                        Ok(()) => {
                            let state = *self.connectivity_rx.borrow_and_update();
                            if state == ConnectivityState::Connected {
                                self.drive_pass("reconnect").await;
                            }
                        }
                        Err(_) => {
                            debug!("Connectivity channel closed, timer-only from here");
                            monitor_alive = false;
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync engine shutting down");
                    break;
                }
            }
        }

        info!("Sync engine stopped");
    }

    /// Runs one pass under the time budget and publishes the outcome.
    async fn drive_pass(&mut self, reason: &str) {
        if *self.connectivity_rx.borrow() == ConnectivityState::Unauthenticated {
            debug!("Skipping sync pass: credential rejected, waiting for re-pairing");
            return;
        }

        debug!(reason, "Starting sync pass");
        self.status_tx.send_modify(|s| s.is_syncing = true);

        let budget = Duration::from_secs(self.config.sync.max_pass_secs);
        let result = match tokio::time::timeout(budget, self.run_pass()).await {
            Ok(result) => result,
            // The abandoned pass leaves its rows in `submitting`; they are
            // picked up again next tick like any crashed pass would be.
            Err(_) => Err(SyncError::Timeout(self.config.sync.max_pass_secs)),
        };

        self.apply_purge_policy().await;

        let pending = self.db.sale_queue().count_pending().await.ok();
        let finished_at = Utc::now();
        self.status_tx.send_modify(|s| {
            s.is_syncing = false;
            if let Some(count) = pending {
                s.pending_count = count;
            }
            match &result {
                Ok(confirmed) => {
                    s.last_sync_at = Some(finished_at);
                    s.last_error = None;
                    debug!(confirmed, "Sync pass complete");
                }
                Err(e) => {
                    s.last_error = Some(e.to_string());
                }
            }
        });

        let status = self.status_tx.borrow().clone();
        self.emitter.emit_status(&status);

        if let Err(e) = result {
            match e {
                // An unpaired terminal quietly queues; nothing to report.
                SyncError::NotPaired => debug!("Sync pass skipped: not paired"),
                e => {
                    warn!(error = %e, "Sync pass failed");
                    self.emitter.emit_error(&e.to_string(), e.is_retryable());
                }
            }
        }
    }

    /// One drain pass. Returns the number of records confirmed by the
    /// server (and therefore removed locally).
    async fn run_pass(&self) -> SyncResult<usize> {
        let queue = self.db.sale_queue();

        let (credential, epoch) = self
            .credentials
            .current()
            .await
            .ok_or(SyncError::NotPaired)?;

        let records = queue.list_pending(self.config.sync.batch_size).await?;
        if records.is_empty() {
            return Ok(0);
        }

        // Select eligible records, quarantining corrupt ones before any
        // network traffic.
        let now = Utc::now();
        let mut outgoing: Vec<(i64, String, SalePayload)> = Vec::new();
        for record in records {
            if record.attempts >= self.config.sync.max_attempts {
                debug!(
                    id = record.id,
                    attempts = record.attempts,
                    "Record exhausted automatic retry, left for operator"
                );
                continue;
            }

            if !self.is_eligible(&record, now) {
                continue;
            }

            match verify_stored_payload(&record.payload) {
                Ok(payload) => {
                    outgoing.push((record.id, record.idempotency_key.clone(), payload))
                }
                Err(e) => {
                    warn!(
                        id = record.id,
                        idempotency_key = %record.idempotency_key,
                        error = %e,
                        "Quarantining corrupt queue record"
                    );
                    queue.quarantine(record.id, &e.to_string()).await?;
                    self.emitter.emit_error(
                        &SyncError::CorruptRecord {
                            id: record.id,
                            reason: e.to_string(),
                        }
                        .to_string(),
                        false,
                    );
                }
            }
        }

        if outgoing.is_empty() {
            return Ok(0);
        }

        for (id, _, _) in &outgoing {
            queue.mark_submitting(*id).await?;
        }

        let batch = SyncBatchRequest {
            device_id: credential.device_id.clone(),
            records: outgoing
                .iter()
                .map(|(_, key, payload)| SyncRecord {
                    idempotency_key: key.clone(),
                    payload: payload.clone(),
                })
                .collect(),
        };

        let response = match self.api.submit_batch(&credential.token, &batch).await {
            Ok(response) => response,
            Err(SyncError::InvalidCredential(message)) => {
                // Rows stay in `submitting`: restart-safe, retried once the
                // terminal re-pairs. The attempt is not counted against them.
                self.credentials.invalidate().await;
                self.emitter.emit_reauth_required();
                return Err(SyncError::InvalidCredential(message));
            }
            Err(e) => {
                for (id, _, _) in &outgoing {
                    if let Err(db_err) = queue.record_failure(*id, &e.to_string()).await {
                        error!(id, error = %db_err, "Failed to record submission failure");
                    }
                }
                return Err(e);
            }
        };

        // The call raced a credential invalidation: the server may have
        // applied the batch, but we no longer trust the session that sent
        // it. Idempotency keys make the re-submission harmless.
        if !self.credentials.is_current(epoch).await {
            info!("Discarding sync verdicts from a stale credential session");
            return Ok(0);
        }

        let verdicts: HashMap<String, SyncOutcome> = response
            .results
            .into_iter()
            .map(|r| (r.idempotency_key, r.outcome))
            .collect();

        let mut confirmed = 0usize;
        for (id, key, _) in &outgoing {
            match verdicts.get(key) {
                Some(SyncOutcome::Rejected { reason }) => {
                    info!(id, idempotency_key = %key, reason = %reason, "Record rejected by server");
                    queue.record_failure(*id, reason).await?;
                }
                // Accepted or AlreadyApplied: the server durably holds the
                // sale. This is the only code path that deletes a queue row.
                Some(_) => {
                    queue.remove(*id).await?;
                    confirmed += 1;
                }
                None => {
                    warn!(id, idempotency_key = %key, "Server returned no verdict for record");
                    queue
                        .record_failure(*id, "no verdict returned for record")
                        .await?;
                }
            }
        }

        Ok(confirmed)
    }

    /// Deletes old exhausted records when the purge policy says so.
    /// With the default `Retain` policy this is a no-op.
    async fn apply_purge_policy(&self) {
        if let MaxAttemptsPolicy::PurgeAfterDays { days } = self.config.sync.max_attempts_policy {
            match self
                .db
                .sale_queue()
                .purge_exhausted(self.config.sync.max_attempts, days)
                .await
            {
                Ok(0) => {}
                Ok(purged) => info!(purged, days, "Purged exhausted queue records"),
                Err(e) => warn!(error = %e, "Purge of exhausted records failed"),
            }
        }
    }

    /// A record may be retried once its persisted backoff window has passed.
    fn is_eligible(&self, record: &PendingSale, now: DateTime<Utc>) -> bool {
        match record.last_attempt_at {
            None => true,
            Some(last_attempt) => now >= last_attempt + self.retry_delay(record.attempts),
        }
    }

    /// `min(base * 2^attempts, cap)`, shift clamped so it cannot overflow.
    fn retry_delay(&self, attempts: i64) -> chrono::Duration {
        let exponent = attempts.clamp(0, 20) as u32;
        let delay_ms = self
            .config
            .sync
            .base_retry_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.sync.max_retry_delay_ms);
        chrono::Duration::milliseconds(delay_ms as i64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::RecordingEmitter;
    use crate::agent::NoOpEmitter;
    use crate::credentials::ActiveCredential;
    use crate::protocol::{SyncBatchResponse, SyncRecordResult};
    use async_trait::async_trait;
    use atrio_core::{SaleLine, SyncState, TenderMethod, TenderSplit};
    use atrio_db::DbConfig;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    // -------------------------------------------------------------------------
    // Scripted server fake
    // -------------------------------------------------------------------------

    enum BatchReply {
        AcceptAll,
        RejectAll(&'static str),
        NetworkDown,
        AuthFail,
        /// Answers AcceptAll but invalidates the credential cell first,
        /// simulating a revocation racing the in-flight call.
        AcceptAllAfterInvalidation(Arc<CredentialCell>),
    }

    #[derive(Default)]
    struct ScriptedApi {
        script: Mutex<VecDeque<BatchReply>>,
        captured: Mutex<Vec<SyncBatchRequest>>,
    }

    impl ScriptedApi {
        fn new(script: Vec<BatchReply>) -> Arc<Self> {
            Arc::new(ScriptedApi {
                script: Mutex::new(script.into()),
                captured: Mutex::new(Vec::new()),
            })
        }

        async fn captured_batches(&self) -> usize {
            self.captured.lock().await.len()
        }

        fn accept_all(batch: &SyncBatchRequest) -> SyncBatchResponse {
            SyncBatchResponse {
                results: batch
                    .records
                    .iter()
                    .map(|r| SyncRecordResult {
                        idempotency_key: r.idempotency_key.clone(),
                        outcome: SyncOutcome::Accepted,
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ServerApi for ScriptedApi {
        async fn claim_by_token(&self, _token: &str) -> SyncResult<crate::protocol::ClaimGrant> {
            Err(SyncError::Internal("not scripted".into()))
        }

        async fn claim_by_code(&self, _code: &str) -> SyncResult<crate::protocol::ClaimGrant> {
            Err(SyncError::Internal("not scripted".into()))
        }

        async fn login_with_pin(
            &self,
            _device_id: &str,
            _pin: &str,
        ) -> SyncResult<crate::protocol::DeviceLoginResponse> {
            Err(SyncError::Internal("not scripted".into()))
        }

        async fn submit_batch(
            &self,
            _credential: &str,
            batch: &SyncBatchRequest,
        ) -> SyncResult<SyncBatchResponse> {
            self.captured.lock().await.push(batch.clone());

            let reply = self
                .script
                .lock()
                .await
                .pop_front()
                .unwrap_or(BatchReply::AcceptAll);

            match reply {
                BatchReply::AcceptAll => Ok(Self::accept_all(batch)),
                BatchReply::RejectAll(reason) => Ok(SyncBatchResponse {
                    results: batch
                        .records
                        .iter()
                        .map(|r| SyncRecordResult {
                            idempotency_key: r.idempotency_key.clone(),
                            outcome: SyncOutcome::Rejected {
                                reason: reason.to_string(),
                            },
                        })
                        .collect(),
                }),
                BatchReply::NetworkDown => {
                    Err(SyncError::TransientNetwork("connection refused".into()))
                }
                BatchReply::AuthFail => Err(SyncError::InvalidCredential("revoked".into())),
                BatchReply::AcceptAllAfterInvalidation(cell) => {
                    cell.invalidate().await;
                    Ok(Self::accept_all(batch))
                }
            }
        }

        async fn heartbeat(&self, _credential: &str) -> SyncResult<()> {
            Ok(())
        }

        async fn device_config(
            &self,
            _credential: &str,
        ) -> SyncResult<crate::protocol::DeviceConfigSnapshot> {
            Err(SyncError::Internal("not scripted".into()))
        }
    }

    // -------------------------------------------------------------------------
    // Fixtures
    // -------------------------------------------------------------------------

    fn sale_json(sale_id: &str) -> String {
        serde_json::to_string(&SalePayload {
            sale_id: sale_id.to_string(),
            device_id: "device-1".to_string(),
            operator_id: "op-1".to_string(),
            lines: vec![SaleLine {
                product_id: "prod-1".to_string(),
                name: "Draft Lager".to_string(),
                unit_price_cents: 650,
                quantity: 2,
                line_total_cents: 1300,
            }],
            total_cents: 1300,
            tenders: vec![TenderSplit {
                method: TenderMethod::Cash,
                amount_cents: 1300,
            }],
            notes: None,
            created_at: Utc::now(),
        })
        .unwrap()
    }

    fn paired_credentials() -> Arc<CredentialCell> {
        Arc::new(CredentialCell::new(Some(ActiveCredential {
            device_id: "device-1".to_string(),
            token: "jwt.device.credential".to_string(),
        })))
    }

    async fn engine_with(
        api: Arc<ScriptedApi>,
        credentials: Arc<CredentialCell>,
        emitter: Arc<RecordingEmitter>,
        tune: impl FnOnce(&mut SyncConfig),
    ) -> (SyncEngine, Arc<Database>) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let mut config = SyncConfig::default();
        config.server.base_url = "http://localhost:9".to_string();
        tune(&mut config);

        let (_state_tx, state_rx) = watch::channel(ConnectivityState::Connected);

        let (engine, _handle) = SyncEngine::new(
            db.clone(),
            Arc::new(config),
            api,
            credentials,
            state_rx,
            emitter,
        );
        (engine, db)
    }

    // -------------------------------------------------------------------------
    // Scenarios
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_offline_backlog_drains_exactly_once() {
        let api = ScriptedApi::new(vec![BatchReply::AcceptAll]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, db) = engine_with(api.clone(), paired_credentials(), emitter, |_| {}).await;

        let queue = db.sale_queue();
        for i in 0..3 {
            queue
                .enqueue(
                    &sale_json(&format!("00000000-0000-4000-8000-00000000000{i}")),
                    &format!("key-{i}"),
                )
                .await
                .unwrap();
        }

        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 3);
        assert_eq!(queue.count_pending().await.unwrap(), 0);

        // One batch, three records, oldest first
        let batches = api.captured.lock().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records.len(), 3);
        assert_eq!(batches[0].records[0].idempotency_key, "key-0");

        // A second pass finds nothing to resend
        drop(batches);
        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 0);
        assert_eq!(api.captured_batches().await, 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_quarantined_before_any_network_call() {
        let api = ScriptedApi::new(vec![]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, db) =
            engine_with(api.clone(), paired_credentials(), emitter.clone(), |_| {}).await;

        // total does not match the line items
        let mut payload: serde_json::Value =
            serde_json::from_str(&sale_json("00000000-0000-4000-8000-00000000000a")).unwrap();
        payload["totalCents"] = serde_json::json!(9_999);
        let queue = db.sale_queue();
        queue
            .enqueue(&payload.to_string(), "key-corrupt")
            .await
            .unwrap();

        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 0);
        assert_eq!(api.captured_batches().await, 0);

        let quarantined = queue.list_quarantined(10).await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert!(quarantined[0].corrupt);
        assert_eq!(queue.count_pending().await.unwrap(), 0);
        assert_eq!(emitter.error_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_record_stays_with_failure_bookkeeping() {
        let api = ScriptedApi::new(vec![BatchReply::RejectAll("unknown operator")]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, db) = engine_with(api.clone(), paired_credentials(), emitter, |_| {}).await;

        let queue = db.sale_queue();
        let row = queue
            .enqueue(&sale_json("00000000-0000-4000-8000-00000000000b"), "key-r")
            .await
            .unwrap();

        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 0);

        let record = queue.get(row.id).await.unwrap();
        assert_eq!(record.state, SyncState::Failed);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.last_error.as_deref(), Some("unknown operator"));
        assert!(record.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_backoff_blocks_immediate_retry() {
        let api = ScriptedApi::new(vec![BatchReply::NetworkDown]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, db) = engine_with(api.clone(), paired_credentials(), emitter, |_| {}).await;

        let queue = db.sale_queue();
        queue
            .enqueue(&sale_json("00000000-0000-4000-8000-00000000000c"), "key-b")
            .await
            .unwrap();

        assert!(engine.run_pass().await.is_err());
        assert_eq!(api.captured_batches().await, 1);

        // Default base delay is 1s: the record is not yet eligible, so the
        // next pass must not touch the network.
        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 0);
        assert_eq!(api.captured_batches().await, 1);
    }

    #[tokio::test]
    async fn test_record_retried_after_backoff_window() {
        let api = ScriptedApi::new(vec![BatchReply::NetworkDown, BatchReply::AcceptAll]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, db) = engine_with(api.clone(), paired_credentials(), emitter, |config| {
            config.sync.base_retry_delay_ms = 1;
            config.sync.max_retry_delay_ms = 10;
        })
        .await;

        let queue = db.sale_queue();
        queue
            .enqueue(&sale_json("00000000-0000-4000-8000-00000000000d"), "key-w")
            .await
            .unwrap();

        assert!(engine.run_pass().await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 1);
        assert_eq!(queue.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_record_excluded_but_still_queryable() {
        let api = ScriptedApi::new(vec![]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, db) = engine_with(api.clone(), paired_credentials(), emitter, |_| {}).await;

        let queue = db.sale_queue();
        let row = queue
            .enqueue(&sale_json("00000000-0000-4000-8000-00000000000e"), "key-x")
            .await
            .unwrap();
        for _ in 0..10 {
            queue.record_failure(row.id, "server unreachable").await.unwrap();
        }

        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 0);
        assert_eq!(api.captured_batches().await, 0);

        // Visible with its history, never silently deleted
        let record = queue.get(row.id).await.unwrap();
        assert_eq!(record.attempts, 10);
        assert_eq!(record.last_error.as_deref(), Some("server unreachable"));
    }

    #[tokio::test]
    async fn test_auth_failure_invalidates_credential_without_counting_attempt() {
        let api = ScriptedApi::new(vec![BatchReply::AuthFail]);
        let emitter = Arc::new(RecordingEmitter::default());
        let credentials = paired_credentials();
        let (engine, db) =
            engine_with(api.clone(), credentials.clone(), emitter.clone(), |_| {}).await;

        let queue = db.sale_queue();
        let row = queue
            .enqueue(&sale_json("00000000-0000-4000-8000-00000000000f"), "key-a")
            .await
            .unwrap();

        let err = engine.run_pass().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidCredential(_)));

        assert!(credentials.current().await.is_none());
        assert_eq!(emitter.reauth_count(), 1);

        // The attempt was not counted; the row waits in submitting state
        let record = queue.get(row.id).await.unwrap();
        assert_eq!(record.attempts, 0);
        assert_eq!(record.state, SyncState::Submitting);
    }

    #[tokio::test]
    async fn test_stale_epoch_verdicts_are_discarded() {
        let credentials = paired_credentials();
        let api = ScriptedApi::new(vec![BatchReply::AcceptAllAfterInvalidation(
            credentials.clone(),
        )]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, db) =
            engine_with(api.clone(), credentials.clone(), emitter, |_| {}).await;

        let queue = db.sale_queue();
        queue
            .enqueue(&sale_json("00000000-0000-4000-8000-000000000010"), "key-s")
            .await
            .unwrap();

        let confirmed = engine.run_pass().await.unwrap();
        assert_eq!(confirmed, 0);

        // The accept verdict arrived under a dead session: the row survives
        // and will be re-submitted (idempotency key makes that harmless).
        assert_eq!(queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trigger_suppression_on_full_channel() {
        let api = ScriptedApi::new(vec![]);
        let (_state_tx, state_rx) = watch::channel(ConnectivityState::Connected);
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let mut config = SyncConfig::default();
        config.server.base_url = "http://localhost:9".to_string();

        let (_engine, handle) = SyncEngine::new(
            db,
            Arc::new(config),
            api,
            paired_credentials(),
            state_rx,
            Arc::new(NoOpEmitter),
        );

        // The engine is not running, so the first trigger fills the
        // capacity-1 channel and later ones are suppressed without panic.
        handle.trigger_sync();
        handle.trigger_sync();
        handle.trigger_sync();
    }

    #[tokio::test]
    async fn test_retry_delay_is_bounded() {
        let api = ScriptedApi::new(vec![]);
        let emitter = Arc::new(RecordingEmitter::default());
        let (engine, _db) = engine_with(api, paired_credentials(), emitter, |config| {
            config.sync.base_retry_delay_ms = 1_000;
            config.sync.max_retry_delay_ms = 60_000;
        })
        .await;

        assert_eq!(engine.retry_delay(0), chrono::Duration::milliseconds(1_000));
        assert_eq!(engine.retry_delay(1), chrono::Duration::milliseconds(2_000));
        assert_eq!(engine.retry_delay(5), chrono::Duration::milliseconds(32_000));
        // Capped
        assert_eq!(engine.retry_delay(6), chrono::Duration::milliseconds(60_000));
        // Huge attempt counts cannot overflow
        assert_eq!(
            engine.retry_delay(i64::MAX),
            chrono::Duration::milliseconds(60_000)
        );
    }
}
