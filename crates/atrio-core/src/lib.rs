//! # atrio-core: Pure Domain Types for Atrio POS
//!
//! This crate holds the data model shared by the terminal-side sync stack and
//! the venue server. It contains no I/O of any kind.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Atrio POS Sync Subsystem                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Register UI (excluded)                       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ atrio-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │validation │  │   error   │  │   │
//! │  │   │SalePayload│  │   Money   │  │  payload  │  │ CoreError │  │   │
//! │  │   │PendingSale│  │  (cents)  │  │  checks   │  │Validation │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └───────────┬───────────────────────────────────┬─────────────────┘   │
//! │              │                                   │                      │
//! │  ┌───────────▼───────────┐           ┌───────────▼───────────┐         │
//! │  │  atrio-db / atrio-sync│           │     apps/venue-api    │         │
//! │  │  (terminal side)      │           │     (server side)     │         │
//! │  └───────────────────────┘           └───────────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (SalePayload, PendingSale, device state, etc.)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types
//! - [`validation`] - Payload validation and corruption classification
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use atrio_core::Money` instead of
// `use atrio_core::money::Money`

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items allowed in a single sale payload.
///
/// ## Why a limit?
/// A payload past this size is almost certainly a serialization bug on the
/// register, not a real sale, and it would bloat the sync batch it travels in.
pub const MAX_SALE_LINES: usize = 200;

/// Maximum quantity of a single line item.
///
/// ## Why a limit?
/// Prevents accidental over-entry (e.g., typing 1000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 999;

/// Maximum tender entries in a split payment.
pub const MAX_TENDERS: usize = 8;
