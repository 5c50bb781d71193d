//! # Connectivity Monitor
//!
//! Heartbeat loop that tells transient network loss apart from credential
//! invalidation, publishing its verdict on a watch channel the engine
//! consumes.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Connectivity State Machine                          │
//! │                                                                         │
//! │                    success (counter := 0)                              │
//! │        ┌──────────────────────────────────────────┐                    │
//! │        ▼                                          │                    │
//! │  ┌───────────┐  N consecutive transient     ┌───────────┐              │
//! │  │ CONNECTED │ ───── failures (N = 3) ────► │ DEGRADED  │              │
//! │  └─────┬─────┘                              └─────┬─────┘              │
//! │        │                                          │                    │
//! │        │ 401 / 403                      401 / 403 │                    │
//! │        ▼                                          ▼                    │
//! │  ┌─────────────────────────────────────────────────────┐               │
//! │  │                  UNAUTHENTICATED                    │               │
//! │  │  Loop halts. No amount of waiting fixes a revoked   │               │
//! │  │  credential; the terminal must re-pair.             │               │
//! │  └─────────────────────────────────────────────────────┘               │
//! │                                                                         │
//! │  NOTIFICATIONS (one per transition, never repeated):                   │
//! │  • degraded  - when the counter reaches the threshold                  │
//! │  • recovered - on the first success after Degraded                     │
//! │  • reauth    - on credential rejection                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A 401/403 never touches the transient counter: credential state and link
//! state are independent diagnoses.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use atrio_core::ConnectivityState;

use crate::agent::SyncEventEmitter;
use crate::client::ServerApi;
use crate::config::SyncConfig;
use crate::credentials::CredentialCell;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Monitor Handle
// =============================================================================

/// Handle for observing and stopping a running monitor.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<ConnectivityState>,
}

impl ConnectivityMonitorHandle {
    /// Current connectivity verdict.
    pub fn state(&self) -> ConnectivityState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for state transitions (consumed by the engine).
    pub fn state_stream(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
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
// Connectivity Monitor
// =============================================================================

/// The heartbeat loop.
pub struct ConnectivityMonitor {
    api: Arc<dyn ServerApi>,
    config: Arc<SyncConfig>,
    credentials: Arc<CredentialCell>,
    emitter: Arc<dyn SyncEventEmitter>,

    state_tx: watch::Sender<ConnectivityState>,
    shutdown_rx: mpsc::Receiver<()>,

    /// Consecutive transient failures since the last success.
    failures: u32,
}

impl ConnectivityMonitor {
    /// Creates a monitor and its handle.
    pub fn new(
        api: Arc<dyn ServerApi>,
        config: Arc<SyncConfig>,
        credentials: Arc<CredentialCell>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> (Self, ConnectivityMonitorHandle) {
        let (state_tx, state_rx) = watch::channel(ConnectivityState::Connected);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let monitor = ConnectivityMonitor {
            api,
            config,
            credentials,
            emitter,
            state_tx,
            shutdown_rx,
            failures: 0,
        };

        let handle = ConnectivityMonitorHandle {
            shutdown_tx,
            state_rx,
        };

        (monitor, handle)
    }

    /// Runs the heartbeat loop. Spawn as a background task.
    ///
    /// The loop ends on shutdown or on credential rejection; there is no
    /// point heartbeating with a credential the server already refused.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.heartbeat.interval_secs,
            threshold = self.config.heartbeat.failure_threshold,
            "Connectivity monitor starting"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.beat().await {
                        break;
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Connectivity monitor shutting down");
                    break;
                }
            }
        }

        info!("Connectivity monitor stopped");
    }

    /// One heartbeat. Returns false when the loop must halt.
    async fn beat(&mut self) -> bool {
        let Some((credential, _epoch)) = self.credentials.current().await else {
            // Unpaired terminal: publish once and halt until the agent
            // restarts the monitor after pairing.
            debug!("No credential, halting heartbeat until pairing");
            self.publish(ConnectivityState::Unauthenticated);
            return false;
        };

        match self.api.heartbeat(&credential.token).await {
            Ok(()) => {
                let was_degraded = *self.state_tx.borrow() == ConnectivityState::Degraded;
                self.failures = 0;
                self.publish(ConnectivityState::Connected);
                if was_degraded {
                    info!("Connectivity recovered");
                    self.emitter.emit_recovered();
                }
                true
            }

            Err(SyncError::InvalidCredential(message)) => {
                // Independent of the transient counter: the link may be
                // fine, the identity is not.
                warn!(message = %message, "Heartbeat rejected, credential invalid");
                self.credentials.invalidate().await;
                self.publish(ConnectivityState::Unauthenticated);
                self.emitter.emit_reauth_required();
                false
            }

            Err(e) => {
                self.failures += 1;
                debug!(
                    failures = self.failures,
                    error = %e,
                    "Heartbeat failed"
                );
                if self.failures == self.config.heartbeat.failure_threshold {
                    warn!(
                        failures = self.failures,
                        "Connectivity degraded"
                    );
                    self.publish(ConnectivityState::Degraded);
                    self.emitter.emit_degraded();
                }
                true
            }
        }
    }

    /// Publishes only actual transitions so the engine's watch channel
    /// never wakes for a no-op.
    fn publish(&self, state: ConnectivityState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::RecordingEmitter;
    use crate::credentials::ActiveCredential;
    use crate::protocol::{
        ClaimGrant, DeviceConfigSnapshot, DeviceLoginResponse, SyncBatchRequest,
        SyncBatchResponse,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    enum HeartbeatReply {
        Up,
        NetworkDown,
        AuthFail,
    }

    struct ScriptedHeartbeat {
        script: Mutex<VecDeque<HeartbeatReply>>,
    }

    impl ScriptedHeartbeat {
        fn new(script: Vec<HeartbeatReply>) -> Arc<Self> {
            Arc::new(ScriptedHeartbeat {
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl ServerApi for ScriptedHeartbeat {
        async fn claim_by_token(&self, _token: &str) -> SyncResult<ClaimGrant> {
            Err(SyncError::Internal("not scripted".into()))
        }

        async fn claim_by_code(&self, _code: &str) -> SyncResult<ClaimGrant> {
            Err(SyncError::Internal("not scripted".into()))
        }

        async fn login_with_pin(
            &self,
            _device_id: &str,
            _pin: &str,
        ) -> SyncResult<DeviceLoginResponse> {
            Err(SyncError::Internal("not scripted".into()))
        }

        async fn submit_batch(
            &self,
            _credential: &str,
            _batch: &SyncBatchRequest,
        ) -> SyncResult<SyncBatchResponse> {
            Err(SyncError::Internal("not scripted".into()))
        }

        async fn heartbeat(&self, _credential: &str) -> SyncResult<()> {
            match self
                .script
                .lock()
                .await
                .pop_front()
                .unwrap_or(HeartbeatReply::Up)
            {
                HeartbeatReply::Up => Ok(()),
                HeartbeatReply::NetworkDown => {
                    Err(SyncError::TransientNetwork("request timed out".into()))
                }
                HeartbeatReply::AuthFail => Err(SyncError::InvalidCredential("expired".into())),
            }
        }

        async fn device_config(&self, _credential: &str) -> SyncResult<DeviceConfigSnapshot> {
            Err(SyncError::Internal("not scripted".into()))
        }
    }

    fn monitor_with(
        script: Vec<HeartbeatReply>,
        emitter: Arc<RecordingEmitter>,
    ) -> (ConnectivityMonitor, ConnectivityMonitorHandle) {
        let mut config = SyncConfig::default();
        config.server.base_url = "http://localhost:9".to_string();
        let credentials = Arc::new(CredentialCell::new(Some(ActiveCredential {
            device_id: "device-1".to_string(),
            token: "jwt.device.credential".to_string(),
        })));

        ConnectivityMonitor::new(
            ScriptedHeartbeat::new(script),
            Arc::new(config),
            credentials,
            emitter,
        )
    }

    #[tokio::test]
    async fn test_degraded_after_third_failure_then_recovered_once() {
        let emitter = Arc::new(RecordingEmitter::default());
        let (mut monitor, handle) = monitor_with(
            vec![
                HeartbeatReply::NetworkDown,
                HeartbeatReply::NetworkDown,
                HeartbeatReply::NetworkDown,
                HeartbeatReply::Up,
            ],
            emitter.clone(),
        );

        assert!(monitor.beat().await);
        assert!(monitor.beat().await);
        assert_eq!(handle.state(), ConnectivityState::Connected);
        assert_eq!(emitter.degraded_count(), 0);

        // Third failure crosses the threshold, exactly one notification
        assert!(monitor.beat().await);
        assert_eq!(handle.state(), ConnectivityState::Degraded);
        assert_eq!(emitter.degraded_count(), 1);

        // Recovery resets the counter and fires exactly one notification
        assert!(monitor.beat().await);
        assert_eq!(handle.state(), ConnectivityState::Connected);
        assert_eq!(monitor.failures, 0);
        assert_eq!(emitter.recovered_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_below_threshold_never_degrade() {
        let emitter = Arc::new(RecordingEmitter::default());
        let (mut monitor, handle) = monitor_with(
            vec![
                HeartbeatReply::NetworkDown,
                HeartbeatReply::NetworkDown,
                HeartbeatReply::Up,
                HeartbeatReply::NetworkDown,
                HeartbeatReply::NetworkDown,
            ],
            emitter.clone(),
        );

        for _ in 0..5 {
            assert!(monitor.beat().await);
        }
        assert_eq!(handle.state(), ConnectivityState::Connected);
        assert_eq!(emitter.degraded_count(), 0);
        assert_eq!(monitor.failures, 2);
    }

    #[tokio::test]
    async fn test_auth_failure_halts_without_touching_counter() {
        let emitter = Arc::new(RecordingEmitter::default());
        let (mut monitor, handle) = monitor_with(
            vec![HeartbeatReply::NetworkDown, HeartbeatReply::AuthFail],
            emitter.clone(),
        );

        assert!(monitor.beat().await);
        assert_eq!(monitor.failures, 1);

        // One 401 halts the loop immediately; the transient counter is
        // untouched and no degraded event fires.
        assert!(!monitor.beat().await);
        assert_eq!(monitor.failures, 1);
        assert_eq!(handle.state(), ConnectivityState::Unauthenticated);
        assert_eq!(emitter.reauth_count(), 1);
        assert_eq!(emitter.degraded_count(), 0);

        // The credential is gone
        assert!(monitor.credentials.current().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_credential_halts_loop() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut config = SyncConfig::default();
        config.server.base_url = "http://localhost:9".to_string();

        let (mut monitor, handle) = ConnectivityMonitor::new(
            ScriptedHeartbeat::new(vec![]),
            Arc::new(config),
            Arc::new(CredentialCell::new(None)),
            emitter,
        );

        assert!(!monitor.beat().await);
        assert_eq!(handle.state(), ConnectivityState::Unauthenticated);
    }
}
