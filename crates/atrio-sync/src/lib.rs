//! # atrio-sync: Terminal Sync Agent for Atrio POS
//!
//! This crate provides the synchronization layer for an Atrio POS terminal,
//! enabling offline-first operation with background reconciliation against
//! the venue server.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (Main Orchestrator)               │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a Tokio task by the host application                 │  │
//! │  │  Owns pairing, credential storage, and both background loops     │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │              ┌────────────────┴────────────────┐                       │
//! │              ▼                                 ▼                        │
//! │  ┌─────────────────────────┐   ┌─────────────────────────────────┐     │
//! │  │      SyncEngine         │   │     ConnectivityMonitor         │     │
//! │  │                         │   │                                 │     │
//! │  │ Drains pending_sales    │   │ Heartbeats the venue server     │     │
//! │  │ with bounded backoff    │◄──│ Publishes ConnectivityState     │     │
//! │  │ Removes rows only on    │   │ on a watch channel; a return    │     │
//! │  │ accepted/already_applied│   │ to Connected wakes the engine   │     │
//! │  └───────────┬─────────────┘   └─────────────────────────────────┘     │
//! │              │                                                          │
//! │              ▼                                                          │
//! │  ┌─────────────────────────┐                                            │
//! │  │  ServerApi (trait)      │  HttpServerApi in production,              │
//! │  │  reqwest → venue-api    │  an in-process fake in tests               │
//! │  └─────────────────────────┘                                            │
//! │                                                                         │
//! │  STATUS EVENTS (to the hosting UI via SyncEventEmitter):               │
//! │  • status    - SyncStatus after every pass                             │
//! │  • degraded  - heartbeat failure threshold crossed (one-time)          │
//! │  • recovered - link restored after degradation (one-time)              │
//! │  • reauth    - credential rejected, re-pairing required                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - Main `SyncAgent` orchestrator and pairing entry points
//! - [`client`] - `ServerApi` trait and the reqwest-backed implementation
//! - [`config`] - Sync configuration (TOML file + `ATRIO_*` env overrides)
//! - [`credentials`] - Device credential persistence and session epochs
//! - [`engine`] - Queue drain loop with backoff and quarantine
//! - [`error`] - Sync error types and retry categorization
//! - [`monitor`] - Heartbeat loop publishing `ConnectivityState`
//! - [`protocol`] - Wire DTOs shared with the venue API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use atrio_sync::{SyncAgent, SyncConfig};
//! use atrio_db::Database;
//!
//! let config = SyncConfig::load_or_default(None);
//! let mut agent = SyncAgent::new(config, database)?;
//!
//! // One-time pairing (token came from the QR code / direct link)
//! agent.pair_with_token("550e8400-...").await?;
//!
//! agent.start().await?;
//!
//! let status = agent.status();
//! println!("backlog: {}", status.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod client;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod protocol;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncEventEmitter};
pub use client::{HttpServerApi, ServerApi};
pub use config::{MaxAttemptsPolicy, SyncConfig};
pub use credentials::{ActiveCredential, CredentialCell, CredentialStore};
pub use engine::{SyncEngine, SyncEngineHandle, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use monitor::{ConnectivityMonitor, ConnectivityMonitorHandle};
pub use protocol::{SyncBatchRequest, SyncBatchResponse, SyncRecord, SyncRecordResult};
