//! # atrio-db: Terminal Database Layer for Atrio POS
//!
//! This crate provides database access for the terminal side of the sync
//! subsystem. It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Terminal-Side Data Flow                            │
//! │                                                                         │
//! │  Sale finalized on the register                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     atrio-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repository   │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │  (queue.rs)   │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SaleQueue     │    │ 001_pending_ │  │   │
//! │  │   │ WAL mode      │    │ Repository    │    │ sales.sql    │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                          ▲                      │
//! │       ▼                                          │                      │
//! │  SQLite file (survives crash/restart)      atrio-sync engine           │
//! │                                            (drains the queue)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - The sale queue repository
//!
//! ## Usage
//!
//! ```rust,ignore
//! use atrio_db::{Database, DbConfig};
//!
//! let config = DbConfig::new("path/to/terminal.db");
//! let db = Database::new(config).await?;
//!
//! let row = db.sale_queue().enqueue(&payload_json, &key).await?;
//! let backlog = db.sale_queue().count_pending().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::DbError;
pub use pool::{Database, DbConfig};

pub use repository::queue::SaleQueueRepository;
