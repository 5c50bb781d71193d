//! # Device Credentials
//!
//! Persistence and in-memory lifecycle for the device credential the venue
//! server issues at pairing / PIN login.
//!
//! ## Credential Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Credential Lifecycle                               │
//! │                                                                         │
//! │  pair / PIN login                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CredentialCell::install(...)  ──► epoch += 1                          │
//! │       │                                                                 │
//! │       ├──► CredentialStore::save(...)   (credential.toml on disk)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  engine/monitor read (credential, epoch) before each call              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  server answers 401/403 ──► invalidate() ──► epoch += 1                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  results from calls started under an older epoch are DISCARDED         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The epoch check closes a race: a batch submission in flight when the
//! credential is invalidated may still complete on the server, but its
//! verdicts must not mutate the local queue under an identity we no longer
//! trust.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Stored Credential (on disk)
// =============================================================================

/// What gets written to `credential.toml` in the config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Device identifier the credential was issued to.
    pub device_id: String,

    /// The opaque JWT presented as a Bearer token.
    pub device_credential: String,

    /// When the credential was obtained (the server embeds the real expiry).
    pub obtained_at: DateTime<Utc>,
}

// =============================================================================
// Credential Store (file persistence)
// =============================================================================

/// Reads and writes the credential file.
///
/// The file lives beside `sync.toml` so a terminal survives restarts without
/// re-pairing for the credential's 30-day lifetime.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Creates a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CredentialStore { path: path.into() }
    }

    /// Loads the stored credential, if one exists.
    pub fn load(&self) -> SyncResult<Option<StoredCredential>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No stored credential");
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| SyncError::CredentialStoreFailed(e.to_string()))?;
        let stored: StoredCredential = toml::from_str(&contents)
            .map_err(|e| SyncError::CredentialStoreFailed(e.to_string()))?;

        Ok(Some(stored))
    }

    /// Persists a credential, replacing any previous one.
    pub fn save(&self, credential: &StoredCredential) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::CredentialStoreFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(credential)
            .map_err(|e| SyncError::CredentialStoreFailed(e.to_string()))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| SyncError::CredentialStoreFailed(e.to_string()))?;

        info!(device_id = %credential.device_id, "Device credential saved");
        Ok(())
    }

    /// Deletes the credential file (on revocation / explicit unpair).
    pub fn clear(&self) -> SyncResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| SyncError::CredentialStoreFailed(e.to_string()))?;
            info!("Device credential cleared");
        }
        Ok(())
    }
}

// =============================================================================
// Credential Cell (in-memory, epoch-guarded)
// =============================================================================

/// The credential as the running loops see it.
#[derive(Debug, Clone)]
pub struct ActiveCredential {
    pub device_id: String,
    /// The Bearer token value.
    pub token: String,
}

#[derive(Debug, Default)]
struct CellState {
    credential: Option<ActiveCredential>,
    epoch: u64,
}

/// Shared, epoch-guarded credential slot.
///
/// Every install or invalidation bumps the epoch. Callers snapshot
/// `(credential, epoch)` before a network call and check `is_current(epoch)`
/// before acting on the result.
#[derive(Debug, Default)]
pub struct CredentialCell {
    state: RwLock<CellState>,
}

impl CredentialCell {
    /// Creates a cell, optionally seeded from a stored credential.
    pub fn new(initial: Option<ActiveCredential>) -> Self {
        CredentialCell {
            state: RwLock::new(CellState {
                credential: initial,
                epoch: 0,
            }),
        }
    }

    /// Returns the current credential and the epoch it belongs to.
    pub async fn current(&self) -> Option<(ActiveCredential, u64)> {
        let state = self.state.read().await;
        state
            .credential
            .as_ref()
            .map(|c| (c.clone(), state.epoch))
    }

    /// Returns the current epoch.
    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    /// True if `epoch` is still the live session.
    pub async fn is_current(&self, epoch: u64) -> bool {
        self.state.read().await.epoch == epoch
    }

    /// Installs a fresh credential (pairing or PIN login succeeded).
    pub async fn install(&self, credential: ActiveCredential) {
        let mut state = self.state.write().await;
        state.credential = Some(credential);
        state.epoch += 1;
        debug!(epoch = state.epoch, "Credential installed");
    }

    /// Drops the credential after a 401/403. In-flight results under the
    /// old epoch become stale.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.credential = None;
        state.epoch += 1;
        info!(epoch = state.epoch, "Credential invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_credential_path() -> PathBuf {
        std::env::temp_dir().join(format!("atrio-cred-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_store_round_trip() {
        let path = temp_credential_path();
        let store = CredentialStore::new(&path);

        assert!(store.load().unwrap().is_none());

        let stored = StoredCredential {
            device_id: "device-1".to_string(),
            device_credential: "jwt.goes.here".to_string(),
            obtained_at: Utc::now(),
        };
        store.save(&stored).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.device_id, "device-1");
        assert_eq!(loaded.device_credential, "jwt.goes.here");

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidation_bumps_epoch_and_stales_snapshots() {
        let cell = CredentialCell::new(Some(ActiveCredential {
            device_id: "device-1".to_string(),
            token: "jwt-a".to_string(),
        }));

        let (cred, epoch) = cell.current().await.unwrap();
        assert_eq!(cred.token, "jwt-a");
        assert!(cell.is_current(epoch).await);

        cell.invalidate().await;
        assert!(!cell.is_current(epoch).await);
        assert!(cell.current().await.is_none());

        cell.install(ActiveCredential {
            device_id: "device-1".to_string(),
            token: "jwt-b".to_string(),
        })
        .await;
        // Still stale: the epoch moved twice since the snapshot
        assert!(!cell.is_current(epoch).await);
        let (cred, _) = cell.current().await.unwrap();
        assert_eq!(cred.token, "jwt-b");
    }
}
