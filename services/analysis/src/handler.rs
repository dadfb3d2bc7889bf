//! Enrichment of processing-requested events.
//!
//! Per message the handler walks `Received -> Deserialized -> Enriched ->
//! Persisted`; the subscriber acknowledges on `Ok` and negative-acknowledges
//! on any `Err`. The result insert is the terminal step, after both remote
//! calls have succeeded, so no partial document is ever written. There is no
//! message-identity dedup: a lost acknowledge after persistence yields a
//! duplicate row, which readers resolve by recency.

use crate::providers::{LabelDetector, Translator};
use anyhow::Context;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use lumen_pipeline::{EventHandler, HandlerError, InboundEvent};
use lumen_store::{NewProcessingResult, ResultSink};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Handler wiring the capability providers to the results collection
pub struct AnalysisHandler {
    detector: Arc<dyn LabelDetector>,
    translator: Arc<dyn Translator>,
    sink: Arc<dyn ResultSink>,
    source_language: String,
    target_language: String,
    translate_concurrency: usize,
}

impl AnalysisHandler {
    pub fn new(
        detector: Arc<dyn LabelDetector>,
        translator: Arc<dyn Translator>,
        sink: Arc<dyn ResultSink>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        translate_concurrency: usize,
    ) -> Self {
        Self {
            detector,
            translator,
            sink,
            source_language: source_language.into(),
            target_language: target_language.into(),
            translate_concurrency: translate_concurrency.max(1),
        }
    }

    #[instrument(skip(self, event), fields(offset = event.offset))]
    async fn process(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        // Received -> Deserialized
        let request = event
            .decode_processing_request()
            .context("Failed to decode processing request")?;

        debug!(id = %request.id, bucket = %request.bucket_name, "Enriching image");

        // Deserialized -> Enriched: labels first, then one translation per
        // label through a bounded pool. `buffered` keeps completion order
        // equal to submission order, which preserves positional pairing.
        let labels = self
            .detector
            .detect_labels(&request.bucket_name, &request.blob_name)
            .await
            .context("Label detection failed")?;

        let translations: Vec<String> = futures::stream::iter(labels.clone())
            .map(|label| {
                let translator = self.translator.clone();
                let source = self.source_language.clone();
                let target = self.target_language.clone();
                async move { translator.translate(&label, &source, &target).await }
            })
            .buffered(self.translate_concurrency)
            .try_collect()
            .await
            .context("Translation failed")?;

        // Enriched -> Persisted: the insert is the only write, and the last step.
        let result = NewProcessingResult::new(
            request.id.clone(),
            request.timestamp,
            labels,
            translations,
        )
        .context("Enrichment lists out of step")?;

        self.sink
            .record_result(result)
            .await
            .context("Failed to persist processing result")?;

        info!(id = %request.id, "Image enrichment persisted");

        Ok(())
    }
}

#[async_trait]
impl EventHandler for AnalysisHandler {
    async fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        match self.process(event).await {
            Ok(()) => {
                metrics::counter!("analysis.events.processed").increment(1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!("analysis.events.failed").increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use chrono::{TimeZone, Utc};
    use lumen_pipeline::{ProcessingRequest, TIMESTAMP_HEADER};
    use lumen_store::StoreError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    mockall::mock! {
        pub Detector {}

        #[async_trait]
        impl LabelDetector for Detector {
            async fn detect_labels(
                &self,
                bucket_name: &str,
                blob_name: &str,
            ) -> Result<Vec<String>, ProviderError>;
        }
    }

    mockall::mock! {
        pub Translate {}

        #[async_trait]
        impl Translator for Translate {
            async fn translate(
                &self,
                text: &str,
                source_language: &str,
                target_language: &str,
            ) -> Result<String, ProviderError>;
        }
    }

    /// Records every insert; tolerates duplicates like the real collection
    struct RecordingSink {
        rows: Mutex<Vec<NewProcessingResult>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn record_result(&self, result: NewProcessingResult) -> Result<Uuid, StoreError> {
            self.rows.lock().unwrap().push(result);
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
            offset: 7,
            key: Some("image-abc".to_string()),
        }
    }

    fn translating_mock() -> MockTranslate {
        let mut translator = MockTranslate::new();
        translator.expect_translate().returning(|text, _, _| {
            Ok(match text {
                "car" => "carro",
                "tree" => "árvore",
                other => other,
            }
            .to_string())
        });
        translator
    }

    fn handler(
        detector: MockDetector,
        translator: MockTranslate,
        sink: Arc<RecordingSink>,
    ) -> AnalysisHandler {
        AnalysisHandler::new(
            Arc::new(detector),
            Arc::new(translator),
            sink,
            "en",
            "pt",
            4,
        )
    }

    #[tokio::test]
    async fn test_enrichment_pairs_labels_and_translations() {
        let mut detector = MockDetector::new();
        detector
            .expect_detect_labels()
            .withf(|bucket, blob| bucket == "lumen-images" && blob == "image-abc")
            .returning(|_, _| Ok(vec!["car".to_string(), "tree".to_string()]));

        let sink = Arc::new(RecordingSink::new());
        let handler = handler(detector, translating_mock(), sink.clone());

        handler.handle(&sample_event()).await.unwrap();

        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request_id, "image-abc");
        assert_eq!(rows[0].characteristics, vec!["car", "tree"]);
        assert_eq!(rows[0].translations, vec!["carro", "árvore"]);
        assert_eq!(rows[0].characteristics.len(), rows[0].translations.len());
    }

    #[tokio::test]
    async fn test_detection_failure_writes_nothing() {
        let mut detector = MockDetector::new();
        detector
            .expect_detect_labels()
            .returning(|_, _| Err(ProviderError::Call(tonic::Status::unavailable("down"))));

        let sink = Arc::new(RecordingSink::new());
        let handler = handler(detector, translating_mock(), sink.clone());

        assert!(handler.handle(&sample_event()).await.is_err());
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_translation_failure_writes_nothing() {
        let mut detector = MockDetector::new();
        detector
            .expect_detect_labels()
            .returning(|_, _| Ok(vec!["car".to_string()]));

        let mut translator = MockTranslate::new();
        translator
            .expect_translate()
            .returning(|_, _, _| Err(ProviderError::Call(tonic::Status::unavailable("down"))));

        let sink = Arc::new(RecordingSink::new());
        let handler = handler(detector, translator, sink.clone());

        assert!(handler.handle(&sample_event()).await.is_err());
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_event_fails_before_any_call() {
        let detector = MockDetector::new();
        let translator = MockTranslate::new();
        let sink = Arc::new(RecordingSink::new());
        let handler = handler(detector, translator, sink.clone());

        let mut event = sample_event();
        event.headers.clear();

        assert!(handler.handle(&event).await.is_err());
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_event_produces_duplicate_rows() {
        // Redelivery after a lost acknowledge replays the same message; the
        // handler must tolerate the duplication, not prevent it.
        let mut detector = MockDetector::new();
        detector
            .expect_detect_labels()
            .returning(|_, _| Ok(vec!["car".to_string()]));

        let sink = Arc::new(RecordingSink::new());
        let handler = handler(detector, translating_mock(), sink.clone());

        let event = sample_event();
        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
    }

    #[tokio::test]
    async fn test_image_with_no_labels_persists_empty_result() {
        let mut detector = MockDetector::new();
        detector.expect_detect_labels().returning(|_, _| Ok(vec![]));

        let sink = Arc::new(RecordingSink::new());
        let handler = handler(detector, translating_mock(), sink.clone());

        handler.handle(&sample_event()).await.unwrap();

        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].characteristics.is_empty());
        assert!(rows[0].translations.is_empty());
    }
}
