//! Database layer for the Venue API.
//!
//! Provides SQLite connectivity and repository methods for devices, pairing
//! tokens, the sales ledger, operators, and the device audit trail.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use atrio_core::types::{AssignmentMode, DeviceSnapshot};

use crate::error::VenueError;

/// Embedded migrations from the `migrations/server` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/server");

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database, creating the file if needed.
    pub async fn connect(url: &str) -> Result<Self, VenueError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| VenueError::Database(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| VenueError::Database(e.to_string()))?;

        Ok(Database { pool })
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same SQLite memory instance.
    pub async fn in_memory() -> Result<Self, VenueError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| VenueError::Database(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| VenueError::Database(e.to_string()))?;

        let db = Database { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<(), VenueError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| VenueError::Migration(e.to_string()))?;
        info!("Venue database migrations applied");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Device Operations
    // =========================================================================

    /// Insert a newly registered device.
    pub async fn insert_device(&self, device: &DeviceRecord) -> Result<(), VenueError> {
        sqlx::query(
            r#"
            INSERT INTO devices (
                id, name, location, assignment, shared_terminal,
                pin_hash, can_refund, can_discount, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(&device.location)
        .bind(device.assignment)
        .bind(device.shared_terminal)
        .bind(&device.pin_hash)
        .bind(device.can_refund)
        .bind(device.can_discount)
        .bind(device.is_active)
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a device by id.
    pub async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, VenueError> {
        let result = sqlx::query_as::<_, DeviceRecord>(
            r#"
            SELECT id, name, location, assignment, shared_terminal,
                   pin_hash, can_refund, can_discount, is_active,
                   last_seen_at, last_synced_at, created_at, updated_at
            FROM devices
            WHERE id = ?
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    /// List all devices, newest first.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, VenueError> {
        let rows = sqlx::query_as::<_, DeviceRecord>(
            r#"
            SELECT id, name, location, assignment, shared_terminal,
                   pin_hash, can_refund, can_discount, is_active,
                   last_seen_at, last_synced_at, created_at, updated_at
            FROM devices
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Update the admin-editable fields of a device.
    pub async fn update_device(&self, device: &DeviceRecord) -> Result<(), VenueError> {
        sqlx::query(
            r#"
            UPDATE devices
            SET name = ?, location = ?, assignment = ?, shared_terminal = ?,
                can_refund = ?, can_discount = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&device.name)
        .bind(&device.location)
        .bind(device.assignment)
        .bind(device.shared_terminal)
        .bind(device.can_refund)
        .bind(device.can_discount)
        .bind(Utc::now())
        .bind(&device.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set or replace the device PIN hash.
    pub async fn set_device_pin(&self, device_id: &str, pin_hash: &str) -> Result<(), VenueError> {
        sqlx::query("UPDATE devices SET pin_hash = ?, updated_at = ? WHERE id = ?")
            .bind(pin_hash)
            .bind(Utc::now())
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Activate or deactivate a device. Deactivation revokes its access:
    /// every authenticated route checks `is_active` on each request.
    pub async fn set_device_active(&self, device_id: &str, active: bool) -> Result<(), VenueError> {
        sqlx::query("UPDATE devices SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record a heartbeat.
    pub async fn touch_last_seen(&self, device_id: &str) -> Result<(), VenueError> {
        sqlx::query("UPDATE devices SET last_seen_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record a completed sync batch.
    pub async fn touch_last_synced(&self, device_id: &str) -> Result<(), VenueError> {
        let now = Utc::now();
        sqlx::query("UPDATE devices SET last_synced_at = ?, last_seen_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Pairing Token Operations
    // =========================================================================

    /// Invalidate all unconsumed tokens for a device. Issuing a new token
    /// always goes through here first, so at most one token is live.
    pub async fn invalidate_pairing_tokens(&self, device_id: &str) -> Result<u64, VenueError> {
        let result =
            sqlx::query("UPDATE pairing_tokens SET consumed = 1 WHERE device_id = ? AND consumed = 0")
                .bind(device_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Insert a freshly issued pairing token.
    pub async fn insert_pairing_token(&self, token: &PairingTokenRecord) -> Result<(), VenueError> {
        sqlx::query(
            r#"
            INSERT INTO pairing_tokens (token, device_id, human_code, expires_at, consumed, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&token.token)
        .bind(&token.device_id)
        .bind(&token.human_code)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a pairing token by its opaque value.
    pub async fn find_pairing_token(
        &self,
        token: &str,
    ) -> Result<Option<PairingTokenRecord>, VenueError> {
        let result = sqlx::query_as::<_, PairingTokenRecord>(
            r#"
            SELECT token, device_id, human_code, expires_at, consumed, created_at
            FROM pairing_tokens
            WHERE token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    /// Look up the most recent pairing token carrying a human code.
    pub async fn find_pairing_token_by_code(
        &self,
        code: &str,
    ) -> Result<Option<PairingTokenRecord>, VenueError> {
        let result = sqlx::query_as::<_, PairingTokenRecord>(
            r#"
            SELECT token, device_id, human_code, expires_at, consumed, created_at
            FROM pairing_tokens
            WHERE human_code = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    /// Atomically consume a pairing token. Returns true only for the single
    /// caller that flips the flag; every concurrent claimant sees false.
    pub async fn consume_pairing_token(&self, token: &str) -> Result<bool, VenueError> {
        let result =
            sqlx::query("UPDATE pairing_tokens SET consumed = 1 WHERE token = ? AND consumed = 0")
                .bind(token)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Sales Ledger Operations
    // =========================================================================

    /// Insert a sale into the ledger.
    ///
    /// Returns true if the row was applied now, false if the idempotency key
    /// was already present (an earlier batch applied it).
    pub async fn insert_sale(&self, sale: &SaleInsert) -> Result<bool, VenueError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sales (
                id, idempotency_key, device_id, operator_id,
                payload, total_cents, created_at, received_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.idempotency_key)
        .bind(&sale.device_id)
        .bind(&sale.operator_id)
        .bind(&sale.payload)
        .bind(sale.total_cents)
        .bind(sale.created_at)
        .bind(sale.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Count ledger rows for a device (diagnostics and tests).
    pub async fn count_sales(&self, device_id: &str) -> Result<i64, VenueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales WHERE device_id = ?")
            .bind(device_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Operator Operations
    // =========================================================================

    /// Insert an operator.
    pub async fn insert_operator(&self, operator: &OperatorRecord) -> Result<(), VenueError> {
        sqlx::query("INSERT INTO operators (id, name, is_active, created_at) VALUES (?, ?, ?, ?)")
            .bind(&operator.id)
            .bind(&operator.name)
            .bind(operator.is_active)
            .bind(operator.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// List active operators for shared-terminal rosters.
    pub async fn list_active_operators(&self) -> Result<Vec<OperatorRecord>, VenueError> {
        let rows = sqlx::query_as::<_, OperatorRecord>(
            r#"
            SELECT id, name, is_active, created_at
            FROM operators
            WHERE is_active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // =========================================================================
    // Audit Trail
    // =========================================================================

    /// Append an event to the device audit trail.
    pub async fn record_event(
        &self,
        device_id: &str,
        event_type: &str,
        detail: Option<&str>,
    ) -> Result<(), VenueError> {
        sqlx::query(
            "INSERT INTO device_events (device_id, event_type, detail, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(event_type)
        .bind(detail)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count events of a given type for a device (tests and diagnostics).
    pub async fn count_events(&self, device_id: &str, event_type: &str) -> Result<i64, VenueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM device_events WHERE device_id = ? AND event_type = ?",
        )
        .bind(device_id)
        .bind(event_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // Venue Metadata
    // =========================================================================

    /// Current catalog version.
    pub async fn catalog_version(&self) -> Result<i64, VenueError> {
        let version: i64 = sqlx::query_scalar("SELECT catalog_version FROM venue_meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(version)
    }
}

// =============================================================================
// Records
// =============================================================================

/// A device row. Internal: carries the PIN hash, so it never serializes to
/// clients directly - convert to [`DeviceSnapshot`] first.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub assignment: AssignmentMode,
    pub shared_terminal: bool,
    pub pin_hash: Option<String>,
    pub can_refund: bool,
    pub can_discount: bool,
    pub is_active: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// The client-facing view, without credential material.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            location: self.location.clone(),
            assignment: self.assignment,
            shared_terminal: self.shared_terminal,
            is_active: self.is_active,
            last_seen_at: self.last_seen_at,
            last_synced_at: self.last_synced_at,
        }
    }
}

/// A pairing token row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PairingTokenRecord {
    pub token: String,
    pub device_id: String,
    pub human_code: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

/// A new ledger row.
#[derive(Debug, Clone)]
pub struct SaleInsert {
    pub id: String,
    pub idempotency_key: String,
    pub device_id: String,
    pub operator_id: String,
    pub payload: String,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// An operator row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OperatorRecord {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
