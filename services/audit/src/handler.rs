//! Audit logging of processing-requested events.
//!
//! Per message: `Received -> Decoded -> Logged`; the subscriber acks on `Ok`
//! and nacks on `Err`. The entry is written unconditionally, with no view of
//! whether enrichment succeeded elsewhere - the analysis subscription is a
//! separate consumer with which this one shares no failure state.

use anyhow::Context;
use async_trait::async_trait;
use lumen_pipeline::{EventHandler, HandlerError, InboundEvent};
use lumen_store::AuditSink;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handler appending one audit entry per observed event
pub struct AuditHandler {
    sink: Arc<dyn AuditSink>,
}

impl AuditHandler {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    #[instrument(skip(self, event), fields(offset = event.offset))]
    async fn process(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        let request = event
            .decode_processing_request()
            .context("Failed to decode processing request")?;

        self.sink
            .record_entry(&request.id, request.timestamp)
            .await
            .context("Failed to append audit entry")?;

        debug!(id = %request.id, "Audit entry appended");

        Ok(())
    }
}

#[async_trait]
impl EventHandler for AuditHandler {
    async fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        match self.process(event).await {
            Ok(()) => {
                metrics::counter!("audit.events.logged").increment(1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!("audit.events.failed").increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use lumen_pipeline::{ProcessingRequest, TIMESTAMP_HEADER};
    use lumen_store::StoreError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct RecordingSink {
        entries: Mutex<Vec<(String, DateTime<Utc>)>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record_entry(
            &self,
            request_id: &str,
            recorded_at: DateTime<Utc>,
        ) -> Result<Uuid, StoreError> {
            if self.fail {
                return Err(StoreError::Database(lumen_store::sqlx::Error::PoolClosed));
            }
            self.entries
                .lock()
                .unwrap()
                .push((request_id.to_string(), recorded_at));
            Ok(Uuid::new_v4())
        }
    }

    fn sample_event() -> InboundEvent {
        let request = ProcessingRequest::new(
            "image-abc",
            "lumen-images",
            "image-abc",
            Utc.with_ymd_and_hms(2017, 2, 15, 10, 30, 0).unwrap(),
        );
        let mut headers = HashMap::new();
        headers.insert(
            TIMESTAMP_HEADER.to_string(),
            request.timestamp_header_value(),
        );
        InboundEvent {
            payload: request.encode_payload(),
            headers,
            topic: "lumen.processing.requests".to_string(),
            partition: 0,
            offset: 3,
            key: Some("image-abc".to_string()),
        }
    }

    #[tokio::test]
    async fn test_entry_carries_event_id_and_timestamp() {
        let sink = Arc::new(RecordingSink::new());
        let handler = AuditHandler::new(sink.clone());

        handler.handle(&sample_event()).await.unwrap();

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "image-abc");
        assert_eq!(
            entries[0].1,
            Utc.with_ymd_and_hms(2017, 2, 15, 10, 30, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_redelivered_event_appends_again() {
        let sink = Arc::new(RecordingSink::new());
        let handler = AuditHandler::new(sink.clone());

        let event = sample_event();
        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        assert_eq!(sink.entries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sink_failure_propagates_for_nack() {
        let mut sink = RecordingSink::new();
        sink.fail = true;
        let handler = AuditHandler::new(Arc::new(sink));

        assert!(handler.handle(&sample_event()).await.is_err());
    }

    #[tokio::test]
    async fn test_undecodable_event_fails() {
        let sink = Arc::new(RecordingSink::new());
        let handler = AuditHandler::new(sink.clone());

        let mut event = sample_event();
        event.payload = vec![0xff, 0xff];

        assert!(handler.handle(&event).await.is_err());
        assert!(sink.entries.lock().unwrap().is_empty());
    }
}
