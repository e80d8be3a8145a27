//! SQLite checkpoint store.
//!
//! Implements `CheckpointStore` from `flowpoint-core` using sqlx with split
//! read/write pools. The checkpoint itself is stored as a JSON blob; `version`,
//! `status` and `waiting_for` are kept in their own columns so the version
//! check runs in SQL and operators can query flows by state.

use chrono::{DateTime, Utc};
use flowpoint_core::repository::checkpoint::CheckpointStore;
use flowpoint_types::checkpoint::Checkpoint;
use flowpoint_types::error::RepositoryError;
use flowpoint_types::ids::FlowId;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Flow ids whose status label (`running`, `completed`, ...) matches,
    /// least recently updated first.
    pub async fn list_by_status(&self, status: &str) -> Result<Vec<FlowId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT flow_id FROM flow_checkpoints WHERE status = ? ORDER BY updated_at ASC",
        )
        .bind(status)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("flow_id")
                    .map(FlowId::from)
                    .map_err(|e| RepositoryError::Query(e.to_string()))
            })
            .collect()
    }

    /// Stored version for a flow, 0 when there is no row.
    async fn current_version(&self, flow_id: &FlowId) -> Result<u64, RepositoryError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM flow_checkpoints WHERE flow_id = ?")
                .bind(flow_id.as_str())
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        match version {
            Some(v) => stored_version(v),
            None => Ok(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct CheckpointRow {
    version: i64,
    checkpoint: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            version: row.try_get("version")?,
            checkpoint: row.try_get("checkpoint")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let mut checkpoint: Checkpoint = serde_json::from_str(&self.checkpoint)
            .map_err(|e| RepositoryError::Query(format!("invalid checkpoint JSON: {e}")))?;
        // The column is authoritative.
        checkpoint.version = stored_version(self.version)?;
        Ok(checkpoint)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn stored_version(version: i64) -> Result<u64, RepositoryError> {
    u64::try_from(version)
        .map_err(|_| RepositoryError::Query(format!("negative checkpoint version {version}")))
}

fn column_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Query(format!("checkpoint version {version} out of range")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json(checkpoint: &Checkpoint, version: u64) -> Result<String, RepositoryError> {
    let mut stored = checkpoint.clone();
    stored.version = version;
    serde_json::to_string(&stored)
        .map_err(|e| RepositoryError::Query(format!("serialize checkpoint: {e}")))
}

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn read(&self, flow_id: &FlowId) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query("SELECT version, checkpoint FROM flow_checkpoints WHERE flow_id = ?")
            .bind(flow_id.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn write_if_version(&self, checkpoint: &Checkpoint) -> Result<u64, RepositoryError> {
        let expected = checkpoint.version;
        let new_version = expected
            .checked_add(1)
            .ok_or_else(|| RepositoryError::Query(format!("checkpoint version {expected} out of range")))?;
        let expected_column = column_version(expected)?;
        let new_column = column_version(new_version)?;
        let json = to_json(checkpoint, new_version)?;
        let now = format_datetime(&Utc::now());

        let result = if expected == 0 {
            sqlx::query(
                r#"INSERT INTO flow_checkpoints
                     (flow_id, version, class_name, status, waiting_for, checkpoint, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(flow_id) DO NOTHING"#,
            )
            .bind(checkpoint.flow_id.as_str())
            .bind(new_column)
            .bind(&checkpoint.start_context.class_name)
            .bind(checkpoint.status.label())
            .bind(checkpoint.waiting_for.label())
            .bind(&json)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool.writer)
            .await
        } else {
            sqlx::query(
                r#"UPDATE flow_checkpoints
                   SET version = ?, status = ?, waiting_for = ?, checkpoint = ?, updated_at = ?
                   WHERE flow_id = ? AND version = ?"#,
            )
            .bind(new_column)
            .bind(checkpoint.status.label())
            .bind(checkpoint.waiting_for.label())
            .bind(&json)
            .bind(&now)
            .bind(checkpoint.flow_id.as_str())
            .bind(expected_column)
            .execute(&self.pool.writer)
            .await
        };
        let result = result.map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            let actual = self.current_version(&checkpoint.flow_id).await?;
            tracing::debug!(
                flow_id = %checkpoint.flow_id,
                expected,
                actual,
                "checkpoint write lost version race"
            );
            return Err(RepositoryError::Conflict {
                flow_id: checkpoint.flow_id.clone(),
                expected,
                actual,
            });
        }

        Ok(new_version)
    }
}
