//! The processing-results collection.
//!
//! One row per successful enrichment, keyed by the request id (equal to the
//! blob key of the stored image). Rows are immutable once written and the
//! collection tolerates duplicate request ids from event redelivery; reads
//! resolve duplicates by taking the most recent row.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A result ready to be persisted. Construction enforces that
/// characteristics and translations pair positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProcessingResult {
    pub request_id: String,
    pub recorded_at: DateTime<Utc>,
    pub characteristics: Vec<String>,
    pub translations: Vec<String>,
}

impl NewProcessingResult {
    /// Build a result, rejecting mismatched enrichment lists.
    pub fn new(
        request_id: impl Into<String>,
        recorded_at: DateTime<Utc>,
        characteristics: Vec<String>,
        translations: Vec<String>,
    ) -> Result<Self, StoreError> {
        if characteristics.len() != translations.len() {
            return Err(StoreError::MismatchedEnrichment {
                characteristics: characteristics.len(),
                translations: translations.len(),
            });
        }
        Ok(Self {
            request_id: request_id.into(),
            recorded_at,
            characteristics,
            translations,
        })
    }
}

/// A persisted processing result
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredProcessingResult {
    /// Row identity, distinct from the request id
    pub id: Uuid,
    /// Request identifier (blob key of the source image)
    pub request_id: String,
    /// Event timestamp carried from the bus
    pub recorded_at: DateTime<Utc>,
    /// Detected labels, in detection order
    pub characteristics: Vec<String>,
    /// Translations, positionally paired with characteristics
    pub translations: Vec<String>,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

/// Write side of the results collection
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Append a result row. Never updates an existing row.
    async fn record_result(&self, result: NewProcessingResult) -> Result<Uuid, StoreError>;
}

/// Read side of the results collection
#[async_trait]
pub trait ResultIndex: Send + Sync {
    /// Point lookup by request id. Under redelivery duplicates, returns the
    /// most recent row; `None` when the id is unknown.
    async fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<StoredProcessingResult>, StoreError>;

    /// Request ids of results recorded strictly inside `(start, end)` whose
    /// characteristics contain `characteristic`. Store-native order.
    async fn find_ids_within(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        characteristic: &str,
    ) -> Result<Vec<String>, StoreError>;
}

/// PostgreSQL-backed results collection
pub struct ResultStore {
    pool: PgPool,
}

impl ResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultSink for ResultStore {
    #[instrument(skip(self, result), fields(request_id = %result.request_id))]
    async fn record_result(&self, result: NewProcessingResult) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO processing_results (
                id, request_id, recorded_at, characteristics, translations, created_at
            ) VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(id)
        .bind(&result.request_id)
        .bind(result.recorded_at)
        .bind(&result.characteristics)
        .bind(&result.translations)
        .execute(&self.pool)
        .await?;

        debug!(
            id = %id,
            labels = result.characteristics.len(),
            "Processing result recorded"
        );

        Ok(id)
    }
}

#[async_trait]
impl ResultIndex for ResultStore {
    async fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<StoredProcessingResult>, StoreError> {
        let result = sqlx::query_as::<_, StoredProcessingResult>(
            r#"
            SELECT id, request_id, recorded_at, characteristics, translations, created_at
            FROM processing_results
            WHERE request_id = $1
            ORDER BY recorded_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    #[instrument(skip(self))]
    async fn find_ids_within(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        characteristic: &str,
    ) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT request_id
            FROM processing_results
            WHERE recorded_at > $1
              AND recorded_at < $2
              AND $3 = ANY(characteristics)
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(characteristic)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
