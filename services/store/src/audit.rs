//! The audit-log collection.
//!
//! Append-only `{request_id, recorded_at}` entries, one per observed
//! processing event. No uniqueness is enforced: redelivered events produce
//! duplicate entries by design.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A persisted audit entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub request_id: String,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Write side of the audit log
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one audit entry.
    async fn record_entry(
        &self,
        request_id: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;
}

/// PostgreSQL-backed audit log
pub struct AuditStore {
    pool: PgPool,
}

impl AuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Entries for a request id, oldest first. Redelivered events show up as
    /// multiple entries.
    pub async fn entries_for_request(
        &self,
        request_id: &str,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, request_id, recorded_at, created_at
            FROM audit_log
            WHERE request_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl AuditSink for AuditStore {
    #[instrument(skip(self), fields(request_id = %request_id))]
    async fn record_entry(
        &self,
        request_id: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, request_id, recorded_at, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(id)
        .bind(request_id)
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;

        debug!(id = %id, "Audit entry recorded");

        Ok(id)
    }
}
