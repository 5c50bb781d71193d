//! # Sync Protocol
//!
//! Wire DTOs exchanged with the venue API. All JSON, all camelCase, matching
//! the serialization of the core domain types.
//!
//! ## Message Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Terminal ◄─► Venue API                             │
//! │                                                                         │
//! │  PAIRING (once per terminal)                                           │
//! │  ──────────────────────────                                            │
//! │  GET /api/pairing/claim?token=...        → ClaimGrant                  │
//! │  GET /api/pairing/claim?code=NNN-NNN     → ClaimGrant                  │
//! │  POST /api/auth/device/login             → DeviceLoginResponse         │
//! │                                                                         │
//! │  STEADY STATE                                                          │
//! │  ────────────                                                          │
//! │  POST /api/sync/batch   SyncBatchRequest → SyncBatchResponse           │
//! │  POST /api/heartbeat    (empty body)     → 204                         │
//! │  GET  /api/device/config                 → DeviceConfigSnapshot        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atrio_core::{DeviceSnapshot, SalePayload, SyncOutcome};

// =============================================================================
// Pairing
// =============================================================================

/// A freshly issued pairing token, as shown to the administrator.
///
/// The terminal consumes either the `token` (via the direct link / QR) or
/// the `human_code` (typed by hand). Both expire together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingTicket {
    /// Opaque claim token (UUID v4).
    pub token: String,
    /// Six digits formatted "NNN-NNN" for manual entry.
    pub human_code: String,
    pub expires_at: DateTime<Utc>,
    /// URL that opens the terminal pairing screen with the token filled in.
    pub direct_link: String,
}

/// What a successful claim (or PIN login) hands the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimGrant {
    /// Opaque device credential (JWT, 30-day expiry). Presented as a
    /// Bearer token on every subsequent call.
    pub device_credential: String,
    pub device: DeviceSnapshot,
}

// =============================================================================
// Device Login
// =============================================================================

/// PIN login request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLoginRequest {
    pub device_id: String,
    pub pin: String,
}

/// PIN login response: a fresh credential plus the config snapshot the
/// register needs to start selling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLoginResponse {
    pub device_credential: String,
    pub device: DeviceSnapshot,
    pub config: DeviceConfigSnapshot,
}

// =============================================================================
// Device Config Snapshot
// =============================================================================

/// One operator the terminal may sign in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSummary {
    pub id: String,
    pub name: String,
}

/// Permission flags the register UI enforces locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePermissions {
    pub can_refund: bool,
    pub can_discount: bool,
}

/// Everything the register needs to render and sell, fetched on login and
/// on demand via `GET /api/device/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigSnapshot {
    pub device: DeviceSnapshot,
    /// Monotonic catalog version; the register refetches products when it
    /// sees a newer one.
    pub catalog_version: i64,
    /// Operator roster. Only populated for shared terminals; a permanently
    /// assigned device gets an empty list.
    pub operators: Vec<OperatorSummary>,
    pub permissions: DevicePermissions,
}

// =============================================================================
// Batch Sync
// =============================================================================

/// One queued sale on its way to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Sync identity - what the server dedupes on. Immutable across retries.
    pub idempotency_key: String,
    pub payload: SalePayload,
}

/// Batch submission body for `POST /api/sync/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchRequest {
    pub device_id: String,
    pub records: Vec<SyncRecord>,
}

/// Per-record verdict. `outcome` and (for rejections) `reason` are flattened
/// next to the key:
///
/// ```json
/// { "idempotencyKey": "...", "outcome": "rejected", "reason": "..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecordResult {
    pub idempotency_key: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Batch response. Always one result per submitted record; partial success
/// is normal and reported per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResponse {
    pub results: Vec<SyncRecordResult>,
}
