//! Sync service: batch intake into the idempotent sales ledger.
//!
//! ## Batch Processing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /api/sync/batch                                                   │
//! │       │                                                                 │
//! │       ▼  for each record (independently):                               │
//! │  check_sale_payload ──fail──► rejected { reason }                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT ... ON CONFLICT (idempotency_key) DO NOTHING                    │
//! │       │                                                                 │
//! │       ├── 1 row  ──► accepted                                           │
//! │       └── 0 rows ──► already_applied                                    │
//! │                                                                         │
//! │  One bad record never poisons its batch: every other record still       │
//! │  gets its own verdict.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use atrio_core::types::{SalePayload, SyncOutcome};
use atrio_core::validation::check_sale_payload;

use crate::db::SaleInsert;
use crate::error::VenueError;
use crate::AppState;

// =============================================================================
// Wire Types
// =============================================================================

/// One queued sale in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub idempotency_key: String,
    pub payload: SalePayload,
}

/// A terminal's sync batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchRequest {
    pub device_id: String,
    pub records: Vec<SyncRecord>,
}

/// Per-record verdict, keyed by idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecordResult {
    pub idempotency_key: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// The response: one verdict per submitted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResponse {
    pub results: Vec<SyncRecordResult>,
}

// =============================================================================
// Service
// =============================================================================

/// Sync service implementation.
pub struct SyncService {
    state: Arc<AppState>,
}

impl SyncService {
    /// Create a new sync service.
    pub fn new(state: Arc<AppState>) -> Self {
        SyncService { state }
    }

    /// Process a sync batch from an authenticated device.
    ///
    /// `auth_device_id` comes from the validated credential; the batch may
    /// not submit on behalf of any other device.
    pub async fn submit_batch(
        &self,
        auth_device_id: &str,
        request: &SyncBatchRequest,
    ) -> Result<SyncBatchResponse, VenueError> {
        if request.device_id != auth_device_id {
            return Err(VenueError::Unauthorized(
                "Batch device does not match credential".to_string(),
            ));
        }

        if request.records.len() > self.state.config.sync_batch_size_limit {
            return Err(VenueError::InvalidRequest(format!(
                "Batch exceeds limit of {} records",
                self.state.config.sync_batch_size_limit
            )));
        }

        let mut results = Vec::with_capacity(request.records.len());
        let mut accepted = 0usize;

        for record in &request.records {
            let outcome = self.apply_record(auth_device_id, record).await?;
            if outcome == SyncOutcome::Accepted {
                accepted += 1;
            }
            results.push(SyncRecordResult {
                idempotency_key: record.idempotency_key.clone(),
                outcome,
            });
        }

        self.state.db.touch_last_synced(auth_device_id).await?;
        self.state
            .db
            .record_event(
                auth_device_id,
                "sync_batch",
                Some(&format!(
                    "{} records, {} accepted",
                    request.records.len(),
                    accepted
                )),
            )
            .await?;

        info!(
            device_id = %auth_device_id,
            records = request.records.len(),
            accepted,
            "Sync batch processed"
        );

        Ok(SyncBatchResponse { results })
    }

    /// Validate and apply a single record. Database failures propagate (the
    /// whole batch fails retryably); validation failures become verdicts.
    async fn apply_record(
        &self,
        device_id: &str,
        record: &SyncRecord,
    ) -> Result<SyncOutcome, VenueError> {
        if let Err(e) = check_sale_payload(&record.payload) {
            debug!(
                idempotency_key = %record.idempotency_key,
                reason = %e,
                "Record rejected by payload checks"
            );
            return Ok(SyncOutcome::Rejected {
                reason: e.to_string(),
            });
        }

        let payload_json = serde_json::to_string(&record.payload)
            .map_err(|e| VenueError::Internal(e.to_string()))?;

        let insert = SaleInsert {
            id: Uuid::new_v4().to_string(),
            idempotency_key: record.idempotency_key.clone(),
            device_id: device_id.to_string(),
            operator_id: record.payload.operator_id.clone(),
            payload: payload_json,
            total_cents: record.payload.total_cents,
            created_at: record.payload.created_at,
            received_at: Utc::now(),
        };

        if self.state.db.insert_sale(&insert).await? {
            Ok(SyncOutcome::Accepted)
        } else {
            debug!(idempotency_key = %record.idempotency_key, "Duplicate idempotency key");
            Ok(SyncOutcome::AlreadyApplied)
        }
    }

    /// Record a heartbeat from an authenticated device.
    pub async fn heartbeat(&self, device_id: &str) -> Result<(), VenueError> {
        self.state.db.touch_last_seen(device_id).await?;
        Ok(())
    }
}
