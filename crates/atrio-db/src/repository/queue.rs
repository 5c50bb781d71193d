//! # Sale Queue Repository
//!
//! The durable queue of sales awaiting server confirmation.
//!
//! ## The Queue Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Durable Queue Implementation                           │
//! │                                                                         │
//! │  SALE FINALIZED ON THE REGISTER                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue(payload_json, idempotency_key)                                │
//! │       │   row committed → the sale can no longer be lost               │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              SYNC ENGINE (atrio-sync, async)                    │   │
//! │  │                                                                 │   │
//! │  │  1. list_pending(limit)   - non-corrupt rows, oldest first     │   │
//! │  │  2. mark_submitting(id)   - before the network call            │   │
//! │  │  3a. remove(id)           - ONLY on accepted/already_applied   │   │
//! │  │  3b. record_failure(id)   - attempts += 1, back to 'failed'    │   │
//! │  │  3c. quarantine(id)       - corrupt payload, never retried     │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A row exists until the server durably holds the sale                │
//! │  • The payload column is never rewritten after enqueue                 │
//! │  • Quarantined rows stay visible but leave the retry path              │
//! │  • A crash mid-submission leaves 'submitting' rows that the next      │
//! │    pass picks up again (the server dedupes on the idempotency key)    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use atrio_core::{PendingSale, SyncState};

// =============================================================================
// Row Mapping
// =============================================================================

/// Raw row shape for `pending_sales`. Converted to the shared `PendingSale`
/// type before leaving the repository.
#[derive(Debug, sqlx::FromRow)]
struct PendingSaleRow {
    id: i64,
    idempotency_key: String,
    payload: String,
    state: SyncState,
    attempts: i64,
    last_error: Option<String>,
    corrupt: bool,
    created_at: DateTime<Utc>,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl From<PendingSaleRow> for PendingSale {
    fn from(row: PendingSaleRow) -> Self {
        PendingSale {
            id: row.id,
            idempotency_key: row.idempotency_key,
            payload: row.payload,
            state: row.state,
            attempts: row.attempts,
            last_error: row.last_error,
            corrupt: row.corrupt,
            created_at: row.created_at,
            last_attempt_at: row.last_attempt_at,
        }
    }
}

const SELECT_COLUMNS: &str = "id, idempotency_key, payload, state, attempts, \
     last_error, corrupt, created_at, last_attempt_at";

// =============================================================================
// Repository
// =============================================================================

/// Repository for the terminal's durable sale queue.
#[derive(Debug, Clone)]
pub struct SaleQueueRepository {
    pool: SqlitePool,
}

impl SaleQueueRepository {
    /// Creates a new SaleQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleQueueRepository { pool }
    }

    /// Enqueues a finalized sale for synchronization.
    ///
    /// ## Arguments
    /// * `payload_json` - Full `SalePayload` as JSON, written verbatim
    /// * `idempotency_key` - Sync identity, generated once at enqueue time
    ///
    /// ## Errors
    /// [`DbError::UniqueViolation`] if the key was already enqueued. The
    /// caller treats that as "already queued", not as a failure.
    pub async fn enqueue(&self, payload_json: &str, idempotency_key: &str) -> DbResult<PendingSale> {
        let now = Utc::now();

        debug!(key = %idempotency_key, "Enqueueing sale");

        let row: PendingSaleRow = sqlx::query_as(&format!(
            "INSERT INTO pending_sales (idempotency_key, payload, state, attempts, corrupt, created_at) \
             VALUES (?1, ?2, 'pending', 0, 0, ?3) \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(idempotency_key)
        .bind(payload_json)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Fetches one queue row by id.
    pub async fn get(&self, id: i64) -> DbResult<PendingSale> {
        let row: Option<PendingSaleRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM pending_sales WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| DbError::not_found("PendingSale", id.to_string()))
    }

    /// Lists unconfirmed, non-quarantined rows, oldest first.
    ///
    /// Includes rows in every lifecycle state: `submitting` rows are ones a
    /// crashed pass never resolved, and they must be retried (the server
    /// dedupes on the idempotency key, so a re-send is safe).
    ///
    /// Backoff eligibility and the attempt ceiling are applied by the engine,
    /// not here, because both are configuration the repository never sees.
    pub async fn list_pending(&self, limit: u32) -> DbResult<Vec<PendingSale>> {
        let rows: Vec<PendingSaleRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM pending_sales \
             WHERE corrupt = 0 \
             ORDER BY created_at ASC, id ASC \
             LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Marks a row as having a submission in flight.
    pub async fn mark_submitting(&self, id: i64) -> DbResult<()> {
        sqlx::query("UPDATE pending_sales SET state = 'submitting' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Records a failed submission attempt.
    ///
    /// Increments the attempt counter, stores the error for the operator,
    /// timestamps the attempt, and returns the row to `failed` state.
    pub async fn record_failure(&self, id: i64, error: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            "UPDATE pending_sales SET \
                state = 'failed', \
                attempts = attempts + 1, \
                last_error = ?2, \
                last_attempt_at = ?3 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes a confirmed row.
    ///
    /// The ONLY legitimate caller is the sync engine after the server
    /// returned accepted or already_applied for this row's idempotency key.
    pub async fn remove(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM pending_sales WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PendingSale", id.to_string()));
        }

        Ok(())
    }

    /// Counts unconfirmed, non-quarantined rows.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_sales WHERE corrupt = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Quarantines a row whose payload failed structural monetary checks.
    ///
    /// The row leaves the retry path permanently but stays in the table so
    /// the data is recoverable by hand.
    pub async fn quarantine(&self, id: i64, reason: &str) -> DbResult<()> {
        warn!(id, reason, "Quarantining corrupt sale payload");

        sqlx::query(
            "UPDATE pending_sales SET corrupt = 1, state = 'failed', last_error = ?2 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists quarantined rows for operator review.
    pub async fn list_quarantined(&self, limit: u32) -> DbResult<Vec<PendingSale>> {
        let rows: Vec<PendingSaleRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM pending_sales \
             WHERE corrupt = 1 \
             ORDER BY created_at ASC \
             LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Deletes a quarantined row after the operator has recovered its data.
    ///
    /// Refuses to touch non-quarantined rows: live queue entries only leave
    /// through server confirmation.
    pub async fn purge_quarantined(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM pending_sales WHERE id = ?1 AND corrupt = 1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PendingSale", id.to_string()));
        }

        Ok(())
    }

    /// Resets retry bookkeeping on a row (operator-initiated).
    ///
    /// Used after a record exhausted its attempts and the operator fixed the
    /// underlying cause (or simply wants another round of retries).
    pub async fn clear_failure(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE pending_sales SET \
                state = 'pending', \
                attempts = 0, \
                last_error = NULL, \
                last_attempt_at = NULL \
             WHERE id = ?1 AND corrupt = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PendingSale", id.to_string()));
        }

        Ok(())
    }

    /// Deletes rows that exhausted their attempts long ago.
    ///
    /// Only runs when the operator opted into `purge_after_days`; the
    /// default policy retains exhausted rows indefinitely.
    ///
    /// ## Returns
    /// Number of deleted rows.
    pub async fn purge_exhausted(&self, max_attempts: i64, days_old: u32) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM pending_sales \
             WHERE corrupt = 0 \
             AND attempts >= ?1 \
             AND last_attempt_at IS NOT NULL \
             AND last_attempt_at < datetime('now', '-' || ?2 || ' days')",
        )
        .bind(max_attempts)
        .bind(days_old)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn payload(n: u32) -> String {
        // Shape only matters to the engine; the repository treats it as opaque
        format!(r#"{{"saleId":"sale-{n}","totalCents":1000}}"#)
    }

    #[tokio::test]
    async fn test_enqueue_and_list() {
        let db = test_db().await;
        let repo = db.sale_queue();

        let row = repo.enqueue(&payload(1), "key-1").await.unwrap();
        assert_eq!(row.state, SyncState::Pending);
        assert_eq!(row.attempts, 0);
        assert!(!row.corrupt);

        let pending = repo.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].idempotency_key, "key-1");
        assert_eq!(repo.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_rejected() {
        let db = test_db().await;
        let repo = db.sale_queue();

        repo.enqueue(&payload(1), "key-1").await.unwrap();
        let err = repo.enqueue(&payload(2), "key-1").await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // First row untouched
        assert_eq!(repo.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_is_oldest_first() {
        let db = test_db().await;
        let repo = db.sale_queue();

        repo.enqueue(&payload(1), "key-1").await.unwrap();
        repo.enqueue(&payload(2), "key-2").await.unwrap();
        repo.enqueue(&payload(3), "key-3").await.unwrap();

        let pending = repo.list_pending(10).await.unwrap();
        let keys: Vec<_> = pending.iter().map(|p| p.idempotency_key.as_str()).collect();
        assert_eq!(keys, vec!["key-1", "key-2", "key-3"]);
    }

    #[tokio::test]
    async fn test_failure_bookkeeping() {
        let db = test_db().await;
        let repo = db.sale_queue();

        let row = repo.enqueue(&payload(1), "key-1").await.unwrap();

        repo.mark_submitting(row.id).await.unwrap();
        assert_eq!(repo.get(row.id).await.unwrap().state, SyncState::Submitting);

        repo.record_failure(row.id, "connection refused").await.unwrap();
        let failed = repo.get(row.id).await.unwrap();
        assert_eq!(failed.state, SyncState::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("connection refused"));
        assert!(failed.last_attempt_at.is_some());

        repo.record_failure(row.id, "timeout").await.unwrap();
        let failed = repo.get(row.id).await.unwrap();
        assert_eq!(failed.attempts, 2);
        assert_eq!(failed.last_error.as_deref(), Some("timeout"));

        // Failed rows remain listed for retry
        assert_eq!(repo.list_pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_the_only_delete_path() {
        let db = test_db().await;
        let repo = db.sale_queue();

        let row = repo.enqueue(&payload(1), "key-1").await.unwrap();
        repo.remove(row.id).await.unwrap();

        assert_eq!(repo.count_pending().await.unwrap(), 0);
        assert!(matches!(
            repo.remove(row.id).await.unwrap_err(),
            DbError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_quarantine_leaves_the_retry_path() {
        let db = test_db().await;
        let repo = db.sale_queue();

        let good = repo.enqueue(&payload(1), "key-1").await.unwrap();
        let bad = repo.enqueue("{garbled", "key-2").await.unwrap();

        repo.quarantine(bad.id, "payload is not valid JSON").await.unwrap();

        // Quarantined rows are excluded from the drain and from the count
        let pending = repo.list_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, good.id);
        assert_eq!(repo.count_pending().await.unwrap(), 1);

        // But stay visible for review
        let quarantined = repo.list_quarantined(10).await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert!(quarantined[0].corrupt);
        assert_eq!(
            quarantined[0].last_error.as_deref(),
            Some("payload is not valid JSON")
        );

        // And cannot be reset back into rotation
        assert!(repo.clear_failure(bad.id).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_quarantined_only_deletes_corrupt_rows() {
        let db = test_db().await;
        let repo = db.sale_queue();

        let good = repo.enqueue(&payload(1), "key-1").await.unwrap();
        let bad = repo.enqueue("{garbled", "key-2").await.unwrap();
        repo.quarantine(bad.id, "payload is not valid JSON").await.unwrap();

        // Live rows are off limits
        assert!(repo.purge_quarantined(good.id).await.is_err());

        repo.purge_quarantined(bad.id).await.unwrap();
        assert!(repo.list_quarantined(10).await.unwrap().is_empty());
        assert_eq!(repo.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_failure_resets_bookkeeping() {
        let db = test_db().await;
        let repo = db.sale_queue();

        let row = repo.enqueue(&payload(1), "key-1").await.unwrap();
        for _ in 0..10 {
            repo.record_failure(row.id, "validation rejected").await.unwrap();
        }
        assert_eq!(repo.get(row.id).await.unwrap().attempts, 10);

        repo.clear_failure(row.id).await.unwrap();
        let reset = repo.get(row.id).await.unwrap();
        assert_eq!(reset.state, SyncState::Pending);
        assert_eq!(reset.attempts, 0);
        assert!(reset.last_error.is_none());
        assert!(reset.last_attempt_at.is_none());
    }

    #[tokio::test]
    async fn test_purge_exhausted_spares_recent_and_fresh_rows() {
        let db = test_db().await;
        let repo = db.sale_queue();

        let exhausted = repo.enqueue(&payload(1), "key-1").await.unwrap();
        for _ in 0..10 {
            repo.record_failure(exhausted.id, "rejected").await.unwrap();
        }
        repo.enqueue(&payload(2), "key-2").await.unwrap();

        // Exhausted but attempted recently: spared
        let deleted = repo.purge_exhausted(10, 30).await.unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(repo.count_pending().await.unwrap(), 2);

        // Backdate the last attempt past the cutoff, then it goes
        sqlx::query("UPDATE pending_sales SET last_attempt_at = datetime('now', '-60 days') WHERE id = ?1")
            .bind(exhausted.id)
            .execute(db.pool())
            .await
            .unwrap();

        let deleted = repo.purge_exhausted(10, 30).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.count_pending().await.unwrap(), 1);
    }
}
