//! # Atrio Venue API
//!
//! HTTP server for terminal synchronization at a single venue.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Venue API Services                              │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────────┐│
//! │  │ PairingService │  │  SyncService   │  │  DeviceService             ││
//! │  │                │  │                │  │                            ││
//! │  │ • IssueToken   │  │ • SubmitBatch  │  │ • Create / List / Update   ││
//! │  │ • ClaimByToken │  │ • Heartbeat    │  │ • Revoke                   ││
//! │  │ • ClaimByCode  │  │                │  │ • PinLogin / ConfigSnapshot││
//! │  └────────────────┘  └────────────────┘  └────────────────────────────┘│
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Infrastructure                               │  │
//! │  │                                                                   │  │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐│  │
//! │  │  │  SQLite      │  │  JwtManager  │  │  Argon2                  ││  │
//! │  │  │              │  │              │  │                          ││  │
//! │  │  │ Ledger +     │  │ Device       │  │ PIN hashing              ││  │
//! │  │  │ devices      │  │ credentials  │  │                          ││  │
//! │  │  └──────────────┘  └──────────────┘  └──────────────────────────┘│  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Environment variables:
//! - `DATABASE_URL` - SQLite path (default: `sqlite://venue.db`)
//! - `HTTP_PORT` - listen port (default: 8080)
//! - `JWT_SECRET` - secret for device credential signing
//! - `JWT_DEVICE_LIFETIME_SECS` - credential lifetime (default: 30 days)
//! - `PUBLIC_BASE_URL` - base for pairing direct links
//! - `ADMIN_TOKEN` - shared secret for admin routes (required)
//! - `PAIRING_TOKEN_TTL_SECS` - pairing token lifetime (default: 600)

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;

// Re-exports
pub use config::VenueConfig;
pub use db::Database;
pub use error::VenueError;

/// Shared application state.
pub struct AppState {
    /// Application configuration.
    pub config: VenueConfig,

    /// Database connection pool.
    pub db: Database,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for service tests.

    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    use atrio_core::types::{
        AssignmentMode, SaleLine, SalePayload, TenderMethod, TenderSplit,
    };

    use crate::db::{Database, DeviceRecord};
    use crate::{AppState, VenueConfig};

    /// In-memory state with migrations applied.
    pub async fn test_state() -> Arc<AppState> {
        let db = Database::in_memory().await.unwrap();
        Arc::new(AppState {
            config: VenueConfig::default(),
            db,
        })
    }

    /// Insert a device directly and return its id.
    pub async fn seed_device(state: &Arc<AppState>, name: &str, active: bool) -> String {
        let now = Utc::now();
        let record = DeviceRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            location: None,
            assignment: AssignmentMode::Permanent,
            shared_terminal: false,
            pin_hash: None,
            can_refund: false,
            can_discount: true,
            is_active: active,
            last_seen_at: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };
        state.db.insert_device(&record).await.unwrap();
        record.id
    }

    /// A structurally valid sale: one line, one cash tender, totals agree.
    pub fn sample_payload(device_id: &str) -> SalePayload {
        SalePayload {
            sale_id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            operator_id: Uuid::new_v4().to_string(),
            lines: vec![SaleLine {
                product_id: Uuid::new_v4().to_string(),
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
        }
    }
}
