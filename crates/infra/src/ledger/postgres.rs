use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use lakegate_core::{OffsetToken, StreamId};

use super::r#trait::{AdvanceOutcome, LedgerError, OffsetLedger, StreamCheckpoint};

/// Postgres-backed offset ledger.
///
/// The compare-and-set is one conditional upsert, never read-then-write.
/// Cursors are stored in their canonical string encoding, whose lexicographic
/// order equals token order, so the comparison happens inside the statement
/// as a plain TEXT comparison.
///
/// Expected schema:
///
/// ```sql
/// CREATE TABLE stream_checkpoints (
///     stream_id     TEXT PRIMARY KEY,
///     cursor        TEXT NOT NULL,
///     last_seen_at  TIMESTAMPTZ NOT NULL,
///     updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
pub struct PostgresOffsetLedger {
    pool: Arc<PgPool>,
}

impl PostgresOffsetLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn runtime() -> Result<tokio::runtime::Handle, LedgerError> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| LedgerError::Storage("no tokio runtime available".to_string()))
    }
}

impl OffsetLedger for PostgresOffsetLedger {
    fn get(&self, stream_id: &StreamId) -> Result<Option<StreamCheckpoint>, LedgerError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let stream = stream_id.as_str().to_string();

        let row = handle.block_on(async {
            sqlx::query(
                r#"
                SELECT cursor, last_seen_at
                FROM stream_checkpoints
                WHERE stream_id = $1
                "#,
            )
            .bind(&stream)
            .fetch_optional(&*pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let encoded: String = row
            .try_get("cursor")
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        let last_seen_at: DateTime<Utc> = row
            .try_get("last_seen_at")
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;

        let cursor =
            OffsetToken::decode(&encoded).map_err(|e| LedgerError::Corrupt(e.to_string()))?;

        Ok(Some(StreamCheckpoint {
            stream_id: stream_id.clone(),
            cursor,
            last_seen_at,
        }))
    }

    fn advance(
        &self,
        stream_id: &StreamId,
        candidate: &OffsetToken,
    ) -> Result<AdvanceOutcome, LedgerError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let stream = stream_id.as_str().to_string();
        let encoded = candidate.encode();
        let last_seen_at = candidate.last_modified();

        let rows_affected = handle.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO stream_checkpoints (stream_id, cursor, last_seen_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (stream_id)
                DO UPDATE SET
                    cursor = EXCLUDED.cursor,
                    last_seen_at = EXCLUDED.last_seen_at,
                    updated_at = NOW()
                WHERE stream_checkpoints.cursor < EXCLUDED.cursor
                "#,
            )
            .bind(&stream)
            .bind(&encoded)
            .bind(last_seen_at)
            .execute(&*pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| LedgerError::Storage(e.to_string()))
        })?;

        if rows_affected == 1 {
            Ok(AdvanceOutcome::Accepted)
        } else {
            Ok(AdvanceOutcome::Rejected)
        }
    }

    fn reset(&self, stream_id: &StreamId) -> Result<(), LedgerError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let stream = stream_id.as_str().to_string();

        handle.block_on(async {
            sqlx::query(
                r#"
                DELETE FROM stream_checkpoints
                WHERE stream_id = $1
                "#,
            )
            .bind(&stream)
            .execute(&*pool)
            .await
            .map(|_| ())
            .map_err(|e| LedgerError::Storage(e.to_string()))
        })
    }
}
