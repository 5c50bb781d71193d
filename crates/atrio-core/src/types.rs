//! # Domain Types
//!
//! Core domain types shared by the terminal sync stack and the venue server.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SalePayload   │   │   PendingSale   │   │  DeviceSnapshot │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  sale_id (UUID) │   │  idempotency_key│   │  id (UUID)      │       │
//! │  │  lines[]        │   │  payload (JSON) │   │  name           │       │
//! │  │  total_cents    │   │  state/attempts │   │  assignment     │       │
//! │  │  tenders[]      │   │  corrupt flag   │   │  last_seen_at   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SyncState     │   │   SyncOutcome   │   │ConnectivityState│       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Pending        │   │  Accepted       │   │  Connected      │       │
//! │  │  Submitting     │   │  AlreadyApplied │   │  Degraded       │       │
//! │  │  Failed         │   │  Rejected       │   │  Unauthenticated│       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every sale carries:
//! - `sale_id`: UUID v4 generated on the register - the business identity
//! - `idempotency_key`: UUID v4 generated at enqueue time - the sync identity,
//!   immutable across retries, what the server dedupes on

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tender Method
// =============================================================================

/// How a portion of a sale was paid.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TenderMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on external terminal.
    Card,
    /// Charged to a member's house account.
    MemberAccount,
}

// =============================================================================
// Sale Payload
// =============================================================================

/// One line item in a sale.
/// Uses snapshot pattern: product data is frozen at time of sale so a later
/// price change cannot alter a queued payload.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleLine {
    pub product_id: String,
    /// Product name at time of sale (frozen).
    pub name: String,
    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,
    /// Quantity sold.
    pub quantity: i64,
    /// Line total (unit_price × quantity).
    pub line_total_cents: i64,
}

impl SaleLine {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns the line total as Money.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

/// One entry of a (possibly split) payment.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TenderSplit {
    pub method: TenderMethod,
    /// Amount covered by this tender, in cents.
    pub amount_cents: i64,
}

impl TenderSplit {
    /// Returns the tendered amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// The complete record of one sale as it travels to the venue server.
///
/// This is the unit of durability: once a `SalePayload` is in the local
/// queue, the register considers the sale taken. Everything the server needs
/// to apply the sale is in here, including the *true* creation time (the
/// moment the sale happened, not the moment it reached the server).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SalePayload {
    /// Business identity of the sale (UUID v4, generated on the register).
    pub sale_id: String,
    /// Device that took the sale.
    pub device_id: String,
    /// Operator signed in when the sale was taken.
    pub operator_id: String,
    /// Line items. Never empty for a valid sale.
    pub lines: Vec<SaleLine>,
    /// Grand total in cents. Must equal Σ line totals and Σ tender amounts.
    pub total_cents: i64,
    /// Payment split. Never empty for a valid sale.
    pub tenders: Vec<TenderSplit>,
    /// Free-form note from the register.
    pub notes: Option<String>,
    /// When the sale actually happened on the register.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SalePayload {
    /// Returns the grand total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Sync State (local queue)
// =============================================================================

/// Lifecycle state of a queued sale on the terminal.
///
/// ```text
/// enqueue ──► Pending ──► Submitting ──► (removed on accepted/already_applied)
///                ▲             │
///                └── Failed ◄──┘  (rejected or transport failure)
/// ```
///
/// There is no `Confirmed` state: confirmation is deletion. A row that exists
/// is, by definition, not yet confirmed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Waiting for its first submission.
    Pending,
    /// A submission is in flight right now.
    Submitting,
    /// At least one submission failed; retried per backoff schedule.
    Failed,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Pending
    }
}

// =============================================================================
// Pending Sale (queue row)
// =============================================================================

/// A row in the terminal's durable sale queue.
///
/// The payload is stored as the exact JSON produced at enqueue time, never
/// rewritten. Retry bookkeeping lives in the surrounding columns.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PendingSale {
    /// Queue row id (local, monotonic).
    pub id: i64,
    /// Sync identity - immutable, what the server dedupes on.
    pub idempotency_key: String,
    /// The full SalePayload as JSON.
    pub payload: String,
    /// Lifecycle state.
    pub state: SyncState,
    /// Number of submission attempts so far.
    pub attempts: i64,
    /// Last error message if a submission failed.
    pub last_error: Option<String>,
    /// Quarantined: payload failed structural monetary checks. Never retried.
    pub corrupt: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    /// When the last submission was attempted.
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingSale {
    /// Parses the stored payload JSON back into a typed `SalePayload`.
    pub fn parse_payload(&self) -> Result<SalePayload, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

// =============================================================================
// Sync Outcome (server verdict)
// =============================================================================

/// Per-record verdict from the venue server for one submitted sale.
///
/// Both `Accepted` and `AlreadyApplied` mean the sale is durably in the
/// ledger - they are the only outcomes that permit deleting the local row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Applied for the first time.
    Accepted,
    /// This idempotency key was applied earlier; nothing was re-applied.
    AlreadyApplied,
    /// The server refused the record. The reason is shown to the operator.
    Rejected { reason: String },
}

impl SyncOutcome {
    /// True when the server durably holds this sale (safe to delete locally).
    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Accepted | SyncOutcome::AlreadyApplied)
    }
}

// =============================================================================
// Connectivity State
// =============================================================================

/// What the heartbeat loop currently believes about the link to the venue
/// server. Independent of the queue: a terminal can be `Connected` with a
/// backlog, or `Degraded` with an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// Last heartbeat succeeded.
    Connected,
    /// Consecutive transient failures crossed the threshold.
    Degraded,
    /// The server rejected our credential. Sync is halted until re-pairing.
    Unauthenticated,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        ConnectivityState::Connected
    }
}

// =============================================================================
// Device
// =============================================================================

/// How a terminal is bound to an operator.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    /// Bound to a single operator until explicitly reassigned.
    Permanent,
    /// Bound per session (quick-start terminals, loaner tablets).
    Ephemeral,
}

/// Server-side view of a registered terminal, as returned to clients.
///
/// Never carries the PIN hash or any credential material.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub assignment: AssignmentMode,
    /// Multiple operators share this terminal (roster included in config).
    pub shared_terminal: bool,
    /// Deactivated devices cannot pair, log in, heartbeat, or sync.
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================
