//! Pairing service: token issuance and the claim flow.
//!
//! ## Claim Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Admin: POST /api/pairing/token                                         │
//! │       │  invalidate older unconsumed tokens for the device              │
//! │       │  insert fresh token (uuid) + human code "NNN-NNN" + expiry      │
//! │       ▼                                                                 │
//! │  Terminal: GET /api/pairing/claim?token=... (or ?code=...)              │
//! │       │                                                                 │
//! │       ├── expired?            ──► 410 Gone                              │
//! │       ├── UPDATE consumed=1 WHERE consumed=0                            │
//! │       │        rows_affected == 0  ──► 409 Conflict                     │
//! │       ▼                                                                 │
//! │  winner gets { deviceCredential (JWT), device snapshot }                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The consumed flag flip is the whole concurrency story: two terminals
//! racing the same token reach the same UPDATE, and SQLite lets exactly one
//! of them affect a row.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use atrio_core::types::DeviceSnapshot;

use crate::auth::JwtManager;
use crate::db::PairingTokenRecord;
use crate::error::VenueError;
use crate::AppState;

// =============================================================================
// Wire Types
// =============================================================================

/// Admin request to issue a pairing token.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    pub device_id: String,
}

/// A freshly issued pairing token, shown to the admin as a QR code,
/// a direct link, and a human-readable fallback code.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingTicket {
    pub token: String,
    pub human_code: String,
    pub expires_at: DateTime<Utc>,
    pub direct_link: String,
}

/// What the winning claimant receives.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimGrant {
    pub device_credential: String,
    pub device: DeviceSnapshot,
}

// =============================================================================
// Service
// =============================================================================

/// Pairing service implementation.
pub struct PairingService {
    state: Arc<AppState>,
    jwt_manager: JwtManager,
}

impl PairingService {
    /// Create a new pairing service.
    pub fn new(state: Arc<AppState>) -> Self {
        let jwt_manager = JwtManager::new(
            state.config.jwt_secret.clone(),
            state.config.jwt_device_lifetime_secs,
        );

        PairingService { state, jwt_manager }
    }

    /// Issue a pairing token for a device, invalidating any earlier one.
    pub async fn issue_token(&self, device_id: &str) -> Result<PairingTicket, VenueError> {
        let device = self
            .state
            .db
            .get_device(device_id)
            .await?
            .ok_or_else(|| VenueError::NotFound(format!("Device {}", device_id)))?;

        if !device.is_active {
            return Err(VenueError::InvalidRequest(
                "Cannot issue pairing token for a deactivated device".to_string(),
            ));
        }

        let invalidated = self.state.db.invalidate_pairing_tokens(device_id).await?;
        if invalidated > 0 {
            info!(device_id = %device_id, count = invalidated, "Invalidated earlier pairing tokens");
        }

        let record = PairingTokenRecord {
            token: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            human_code: generate_human_code(),
            expires_at: Utc::now() + Duration::seconds(self.state.config.pairing_token_ttl_secs),
            consumed: false,
            created_at: Utc::now(),
        };
        self.state.db.insert_pairing_token(&record).await?;

        info!(device_id = %device_id, expires_at = %record.expires_at, "Pairing token issued");

        Ok(PairingTicket {
            direct_link: format!(
                "{}/pos/pair?p={}",
                self.state.config.public_base_url.trim_end_matches('/'),
                record.token
            ),
            token: record.token,
            human_code: record.human_code,
            expires_at: record.expires_at,
        })
    }

    /// Claim by the opaque token (QR code / direct link path).
    pub async fn claim_by_token(&self, token: &str) -> Result<ClaimGrant, VenueError> {
        let record = self
            .state
            .db
            .find_pairing_token(token)
            .await?
            .ok_or_else(|| VenueError::NotFound("Unknown pairing token".to_string()))?;

        self.complete_claim(record).await
    }

    /// Claim by the human-readable "NNN-NNN" code.
    pub async fn claim_by_code(&self, code: &str) -> Result<ClaimGrant, VenueError> {
        let record = self
            .state
            .db
            .find_pairing_token_by_code(code)
            .await?
            .ok_or_else(|| VenueError::NotFound("Unknown pairing code".to_string()))?;

        self.complete_claim(record).await
    }

    /// Shared tail of both claim paths: expiry check, atomic consume,
    /// credential minting.
    async fn complete_claim(&self, record: PairingTokenRecord) -> Result<ClaimGrant, VenueError> {
        if record.expires_at < Utc::now() {
            return Err(VenueError::PairingExpired);
        }

        // Exactly one concurrent claimant wins this update
        if !self.state.db.consume_pairing_token(&record.token).await? {
            warn!(device_id = %record.device_id, "Pairing token claimed twice");
            return Err(VenueError::AlreadyClaimed);
        }

        let device = self
            .state
            .db
            .get_device(&record.device_id)
            .await?
            .ok_or_else(|| VenueError::NotFound(format!("Device {}", record.device_id)))?;

        if !device.is_active {
            return Err(VenueError::Unauthorized(
                "Device is deactivated".to_string(),
            ));
        }

        let credential = self.jwt_manager.generate_device_token(&device.id)?;

        self.state.db.touch_last_seen(&device.id).await?;
        self.state
            .db
            .record_event(&device.id, "paired", None)
            .await?;
        info!(device_id = %device.id, "Device paired");

        Ok(ClaimGrant {
            device_credential: credential,
            device: device.snapshot(),
        })
    }
}

/// Generate a "NNN-NNN" human pairing code.
fn generate_human_code() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{:03}-{:03}",
        rng.gen_range(0..1000),
        rng.gen_range(0..1000)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_device, test_state};

    #[test]
    fn test_human_code_shape() {
        for _ in 0..50 {
            let code = generate_human_code();
            assert_eq!(code.len(), 7);
            assert_eq!(&code[3..4], "-");
            assert!(code[0..3].chars().all(|c| c.is_ascii_digit()));
            assert!(code[4..7].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_issue_and_claim_round_trip() {
        let state = test_state().await;
        let device_id = seed_device(&state, "Bar 1", true).await;
        let service = PairingService::new(state.clone());

        let ticket = service.issue_token(&device_id).await.unwrap();
        assert!(ticket.direct_link.contains(&ticket.token));

        let grant = service.claim_by_token(&ticket.token).await.unwrap();
        assert_eq!(grant.device.id, device_id);
        assert!(!grant.device_credential.is_empty());

        // Audit trail has the claim
        assert_eq!(state.db.count_events(&device_id, "paired").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_claim_conflicts() {
        let state = test_state().await;
        let device_id = seed_device(&state, "Bar 1", true).await;
        let service = PairingService::new(state.clone());

        let ticket = service.issue_token(&device_id).await.unwrap();
        service.claim_by_token(&ticket.token).await.unwrap();

        assert!(matches!(
            service.claim_by_token(&ticket.token).await,
            Err(VenueError::AlreadyClaimed)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let state = test_state().await;
        let device_id = seed_device(&state, "Bar 1", true).await;
        let service = Arc::new(PairingService::new(state.clone()));

        let ticket = service.issue_token(&device_id).await.unwrap();

        let a = {
            let service = service.clone();
            let token = ticket.token.clone();
            tokio::spawn(async move { service.claim_by_token(&token).await })
        };
        let b = {
            let service = service.clone();
            let token = ticket.token.clone();
            tokio::spawn(async move { service.claim_by_token(&token).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "exactly one claimant must win");

        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(VenueError::AlreadyClaimed)));
    }

    #[tokio::test]
    async fn test_expired_token_is_gone() {
        let state = test_state().await;
        let device_id = seed_device(&state, "Bar 1", true).await;
        let service = PairingService::new(state.clone());

        // Insert a token that expired a minute ago
        let record = PairingTokenRecord {
            token: Uuid::new_v4().to_string(),
            device_id: device_id.clone(),
            human_code: "123-456".to_string(),
            expires_at: Utc::now() - Duration::seconds(60),
            consumed: false,
            created_at: Utc::now() - Duration::seconds(120),
        };
        state.db.insert_pairing_token(&record).await.unwrap();

        assert!(matches!(
            service.claim_by_token(&record.token).await,
            Err(VenueError::PairingExpired)
        ));
        // Expiry never consumes: the error is stable across retries
        assert!(matches!(
            service.claim_by_token(&record.token).await,
            Err(VenueError::PairingExpired)
        ));
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous_token() {
        let state = test_state().await;
        let device_id = seed_device(&state, "Bar 1", true).await;
        let service = PairingService::new(state.clone());

        let first = service.issue_token(&device_id).await.unwrap();
        let second = service.issue_token(&device_id).await.unwrap();

        assert!(matches!(
            service.claim_by_token(&first.token).await,
            Err(VenueError::AlreadyClaimed)
        ));
        assert!(service.claim_by_token(&second.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_by_code() {
        let state = test_state().await;
        let device_id = seed_device(&state, "Bar 1", true).await;
        let service = PairingService::new(state.clone());

        let ticket = service.issue_token(&device_id).await.unwrap();
        let grant = service.claim_by_code(&ticket.human_code).await.unwrap();
        assert_eq!(grant.device.id, device_id);
    }

    #[tokio::test]
    async fn test_inactive_device_cannot_issue() {
        let state = test_state().await;
        let device_id = seed_device(&state, "Bar 1", false).await;
        let service = PairingService::new(state.clone());

        assert!(matches!(
            service.issue_token(&device_id).await,
            Err(VenueError::InvalidRequest(_))
        ));
    }
}
