//! Read-only query surface over the processing-results collection.
//!
//! Point lookups resolve a request id to its enrichment data; range queries
//! return the ids of results recorded strictly inside a date window and
//! carrying a given characteristic. Neither mutates the store, so both are
//! safe to retry.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use lumen_store::{ResultIndex, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Wire format of `processed_date` in detail responses
pub const DETAIL_DATE_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Wire format of range query bounds
pub const WINDOW_DATE_FORMAT: &str = "%d-%m-%Y";

/// Errors raised by the query surface
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid date {value:?}: expected format dd-MM-yyyy")]
    InvalidDate { value: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Enrichment details for one processed image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDetails {
    pub characteristics: Vec<String>,
    pub translations: Vec<String>,
    pub processed_date: String,
}

/// Parse a `dd-MM-yyyy` bound into a UTC instant at midnight
fn parse_window_bound(value: &str) -> Result<DateTime<Utc>, QueryError> {
    let date = NaiveDate::parse_from_str(value, WINDOW_DATE_FORMAT).map_err(|_| {
        QueryError::InvalidDate {
            value: value.to_string(),
        }
    })?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

/// Query service over the results collection
pub struct QueryService {
    index: Arc<dyn ResultIndex>,
}

impl QueryService {
    pub fn new(index: Arc<dyn ResultIndex>) -> Self {
        Self { index }
    }

    /// Details for one request id, or `None` when nothing was processed
    /// under it. Duplicate rows from redelivery resolve to the most recent.
    #[instrument(skip(self))]
    pub async fn image_details(&self, unique_id: &str) -> Result<Option<ImageDetails>, QueryError> {
        let Some(row) = self.index.find_by_request_id(unique_id).await? else {
            return Ok(None);
        };

        Ok(Some(ImageDetails {
            characteristics: row.characteristics,
            translations: row.translations,
            processed_date: row.recorded_at.format(DETAIL_DATE_FORMAT).to_string(),
        }))
    }

    /// Request ids recorded strictly between `start_date` and `end_date`
    /// (both `dd-MM-yyyy`) whose characteristics contain `characteristic`.
    /// Order is store-native.
    #[instrument(skip(self))]
    pub async fn images_within(
        &self,
        start_date: &str,
        end_date: &str,
        characteristic: &str,
    ) -> Result<Vec<String>, QueryError> {
        let start = parse_window_bound(start_date)?;
        let end = parse_window_bound(end_date)?;

        Ok(self.index.find_ids_within(start, end, characteristic).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use lumen_store::StoredProcessingResult;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory results collection mirroring the store's read semantics
    struct InMemoryIndex {
        rows: Mutex<Vec<StoredProcessingResult>>,
    }

    impl InMemoryIndex {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
            }
        }

        fn insert(
            &self,
            request_id: &str,
            recorded_at: DateTime<Utc>,
            characteristics: &[&str],
            translations: &[&str],
        ) {
            self.rows.lock().unwrap().push(StoredProcessingResult {
                id: Uuid::new_v4(),
                request_id: request_id.to_string(),
                recorded_at,
                characteristics: characteristics.iter().map(|s| s.to_string()).collect(),
                translations: translations.iter().map(|s| s.to_string()).collect(),
                created_at: recorded_at,
            });
        }
    }

    #[async_trait]
    impl ResultIndex for InMemoryIndex {
        async fn find_by_request_id(
            &self,
            request_id: &str,
        ) -> Result<Option<StoredProcessingResult>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|r| r.request_id == request_id)
                .max_by_key(|r| (r.recorded_at, r.created_at))
                .cloned())
        }

        async fn find_ids_within(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            characteristic: &str,
        ) -> Result<Vec<String>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|r| r.recorded_at > start && r.recorded_at < end)
                .filter(|r| r.characteristics.iter().any(|c| c == characteristic))
                .map(|r| r.request_id.clone())
                .collect())
        }
    }

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap()
    }

    #[tokio::test]
    async fn test_details_format_processed_date() {
        let index = Arc::new(InMemoryIndex::new());
        index.insert(
            "image-1",
            at(2017, 2, 15, 10, 30),
            &["car", "tree"],
            &["carro", "árvore"],
        );
        let service = QueryService::new(index);

        let details = service.image_details("image-1").await.unwrap().unwrap();
        assert_eq!(details.processed_date, "15-02-2017 10:30:00");
        assert_eq!(details.characteristics, vec!["car", "tree"]);
        assert_eq!(details.translations, vec!["carro", "árvore"]);
    }

    #[tokio::test]
    async fn test_details_not_found() {
        let service = QueryService::new(Arc::new(InMemoryIndex::new()));
        assert!(service.image_details("image-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_details_pick_most_recent_duplicate() {
        let index = Arc::new(InMemoryIndex::new());
        index.insert("image-1", at(2017, 2, 15, 10, 0), &["car"], &["carro"]);
        index.insert("image-1", at(2017, 2, 15, 11, 0), &["car"], &["carro"]);
        let service = QueryService::new(index);

        let details = service.image_details("image-1").await.unwrap().unwrap();
        assert_eq!(details.processed_date, "15-02-2017 11:00:00");
    }

    #[tokio::test]
    async fn test_window_query_is_strict_and_filters_characteristic() {
        let index = Arc::new(InMemoryIndex::new());
        index.insert("image-feb", at(2017, 2, 15, 0, 0), &["car", "tree"], &["carro", "árvore"]);
        index.insert("image-jan", at(2017, 1, 15, 0, 0), &["car"], &["carro"]);
        index.insert("image-dog", at(2017, 2, 20, 0, 0), &["dog"], &["cão"]);
        let service = QueryService::new(index);

        let ids = service
            .images_within("01-02-2017", "28-02-2017", "car")
            .await
            .unwrap();

        assert_eq!(ids, vec!["image-feb".to_string()]);
    }

    #[tokio::test]
    async fn test_window_bounds_are_exclusive() {
        let index = Arc::new(InMemoryIndex::new());
        // Exactly on the start bound: excluded by the strict comparison.
        index.insert("image-edge", at(2017, 2, 1, 0, 0), &["car"], &["carro"]);
        let service = QueryService::new(index);

        let ids = service
            .images_within("01-02-2017", "28-02-2017", "car")
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_date_rejected() {
        let service = QueryService::new(Arc::new(InMemoryIndex::new()));
        let result = service.images_within("2017-02-01", "28-02-2017", "car").await;
        assert!(matches!(result, Err(QueryError::InvalidDate { .. })));
    }

    #[tokio::test]
    async fn test_repeated_queries_yield_identical_results() {
        let index = Arc::new(InMemoryIndex::new());
        index.insert("image-1", at(2017, 2, 15, 0, 0), &["car"], &["carro"]);
        let service = QueryService::new(index);

        let first = service
            .images_within("01-02-2017", "28-02-2017", "car")
            .await
            .unwrap();
        let second = service
            .images_within("01-02-2017", "28-02-2017", "car")
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
