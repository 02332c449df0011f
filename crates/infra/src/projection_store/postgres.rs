use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use lakegate_core::{OffsetToken, ResourceId};

use super::r#trait::{ProjectionStore, ProjectionStoreError, ResourceProjection, UpsertOutcome};

/// Postgres-backed projection store.
///
/// The last-write-wins rule is a single conditional upsert comparing source
/// timestamps inside the statement, so racing writers resolve in the
/// database, not in application code.
///
/// Expected schema:
///
/// ```sql
/// CREATE TABLE resource_projections (
///     resource_id       TEXT PRIMARY KEY,
///     payload           BYTEA NOT NULL,
///     source_timestamp  TIMESTAMPTZ NOT NULL,
///     source_offset     TEXT NOT NULL,
///     updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
pub struct PostgresProjectionStore {
    pool: Arc<PgPool>,
}

impl PostgresProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn runtime() -> Result<tokio::runtime::Handle, ProjectionStoreError> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| ProjectionStoreError::Storage("no tokio runtime available".to_string()))
    }
}

impl ProjectionStore for PostgresProjectionStore {
    fn get(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<ResourceProjection>, ProjectionStoreError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let id = resource_id.as_str().to_string();

        let row = handle.block_on(async {
            sqlx::query(
                r#"
                SELECT payload, source_timestamp, source_offset
                FROM resource_projections
                WHERE resource_id = $1
                "#,
            )
            .bind(&id)
            .fetch_optional(&*pool)
            .await
            .map_err(|e| ProjectionStoreError::Storage(e.to_string()))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: Vec<u8> = row
            .try_get("payload")
            .map_err(|e| ProjectionStoreError::Corrupt(e.to_string()))?;
        let source_timestamp: DateTime<Utc> = row
            .try_get("source_timestamp")
            .map_err(|e| ProjectionStoreError::Corrupt(e.to_string()))?;
        let encoded_offset: String = row
            .try_get("source_offset")
            .map_err(|e| ProjectionStoreError::Corrupt(e.to_string()))?;

        let source_offset = OffsetToken::decode(&encoded_offset)
            .map_err(|e| ProjectionStoreError::Corrupt(e.to_string()))?;

        Ok(Some(ResourceProjection {
            resource_id: resource_id.clone(),
            payload,
            source_timestamp,
            source_offset,
        }))
    }

    fn upsert_if_newer(
        &self,
        candidate: ResourceProjection,
    ) -> Result<UpsertOutcome, ProjectionStoreError> {
        let handle = Self::runtime()?;
        let pool = self.pool.clone();
        let id = candidate.resource_id.as_str().to_string();
        let encoded_offset = candidate.source_offset.encode();

        let rows_affected = handle.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO resource_projections
                    (resource_id, payload, source_timestamp, source_offset)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (resource_id)
                DO UPDATE SET
                    payload = EXCLUDED.payload,
                    source_timestamp = EXCLUDED.source_timestamp,
                    source_offset = EXCLUDED.source_offset,
                    updated_at = NOW()
                WHERE resource_projections.source_timestamp < EXCLUDED.source_timestamp
                "#,
            )
            .bind(&id)
            .bind(&candidate.payload)
            .bind(candidate.source_timestamp)
            .bind(&encoded_offset)
            .execute(&*pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| ProjectionStoreError::Storage(e.to_string()))
        })?;

        if rows_affected == 1 {
            Ok(UpsertOutcome::Applied)
        } else {
            Ok(UpsertOutcome::Skipped)
        }
    }
}
