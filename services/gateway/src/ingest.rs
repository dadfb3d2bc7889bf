//! Ingestion coordinator: streamed image upload into blob storage plus a
//! processing-requested event.
//!
//! Each in-flight upload is an [`UploadSession`] state machine
//! (`Open -> Receiving -> Completed | Failed`). Side effects are strictly
//! ordered: blob write happens-before publish happens-before the response,
//! so a caller that sees a key is guaranteed the blob exists and an event is
//! enqueued. A blob left behind by a failed publish is accepted and logged,
//! never deleted.

use crate::blob_store::{BlobStoreError, BlobWriter};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use lumen_pipeline::{EventPublisher, ProcessingRequest, PublishError};
use std::sync::Arc;
use thiserror::Error;
use tonic::Status;
use tracing::{debug, info, instrument, warn};

/// Errors surfaced by the ingestion path
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Upload stream failed: {0}")]
    Stream(Status),

    #[error("Upload session is {state} and cannot accept chunks")]
    SessionClosed { state: &'static str },

    #[error(transparent)]
    Blob(#[from] BlobStoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Phases of one upload stream
#[derive(Debug)]
enum UploadPhase {
    /// Stream accepted, no chunk seen yet
    Open,
    /// At least one chunk received
    Receiving { chunks: usize },
    /// Terminal: the stream errored
    Failed,
}

impl UploadPhase {
    fn name(&self) -> &'static str {
        match self {
            UploadPhase::Open => "open",
            UploadPhase::Receiving { .. } => "receiving",
            UploadPhase::Failed => "failed",
        }
    }
}

/// State machine for one in-flight upload. Chunks accumulate in arrival
/// order; `complete` consumes the session so no chunk can follow it.
pub struct UploadSession {
    key: String,
    buffer: BytesMut,
    phase: UploadPhase,
}

impl UploadSession {
    /// Open a session under a freshly generated blob key
    pub fn open(key: String) -> Self {
        Self {
            key,
            buffer: BytesMut::new(),
            phase: UploadPhase::Open,
        }
    }

    /// The blob key this session will store under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append one chunk, in arrival order
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), IngestError> {
        match self.phase {
            UploadPhase::Open => {
                self.phase = UploadPhase::Receiving { chunks: 1 };
            }
            UploadPhase::Receiving { chunks } => {
                self.phase = UploadPhase::Receiving { chunks: chunks + 1 };
            }
            UploadPhase::Failed => {
                return Err(IngestError::SessionClosed {
                    state: self.phase.name(),
                });
            }
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Mark the session failed after a stream error
    pub fn fail(&mut self) {
        self.phase = UploadPhase::Failed;
    }

    /// Finish the session, yielding the key and the accumulated bytes
    pub fn complete(self) -> Result<(String, Bytes), IngestError> {
        match self.phase {
            UploadPhase::Open | UploadPhase::Receiving { .. } => {
                Ok((self.key, self.buffer.freeze()))
            }
            UploadPhase::Failed => Err(IngestError::SessionClosed {
                state: "failed",
            }),
        }
    }
}

/// Drives upload sessions through storage and event publication
pub struct IngestCoordinator {
    blob_store: Arc<dyn BlobWriter>,
    publisher: Arc<dyn EventPublisher>,
}

impl IngestCoordinator {
    pub fn new(blob_store: Arc<dyn BlobWriter>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            blob_store,
            publisher,
        }
    }

    /// Accept one upload stream and return the generated blob key.
    ///
    /// The key equals the request id published on the bus, which is the
    /// correlation handle for every later lookup.
    #[instrument(skip(self, chunks))]
    pub async fn submit<S>(&self, mut chunks: S) -> Result<String, IngestError>
    where
        S: Stream<Item = Result<Vec<u8>, Status>> + Unpin,
    {
        let mut session = UploadSession::open(self.blob_store.generate_key());
        debug!(key = %session.key(), "Upload session opened");

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(data) => session.push_chunk(&data)?,
                Err(status) => {
                    warn!(key = %session.key(), error = %status, "Upload stream failed");
                    session.fail();
                    return Err(IngestError::Stream(status));
                }
            }
        }

        let (key, data) = session.complete()?;
        let size = data.len();

        // Ordering contract: store, then publish, then respond.
        self.blob_store.put(&key, data.to_vec()).await?;

        let request = ProcessingRequest::new(
            key.clone(),
            self.blob_store.bucket(),
            key.clone(),
            Utc::now(),
        );
        if let Err(e) = self.publisher.publish_processing_request(&request).await {
            // The blob stays in place; dangling blobs are an accepted leak.
            warn!(key = %key, error = %e, "Event publish failed after blob write");
            return Err(e.into());
        }

        info!(key = %key, size_bytes = size, "Image ingested");

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records blob writes and the order of side effects
    struct FakeBlobStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
        effects: Arc<Mutex<Vec<String>>>,
        next_key: String,
    }

    impl FakeBlobStore {
        fn new(effects: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                blobs: Mutex::new(HashMap::new()),
                effects,
                next_key: "image-test-0001".to_string(),
            }
        }
    }

    #[async_trait]
    impl BlobWriter for FakeBlobStore {
        fn generate_key(&self) -> String {
            self.next_key.clone()
        }

        fn bucket(&self) -> &str {
            "lumen-images"
        }

        async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobStoreError> {
            self.effects.lock().unwrap().push(format!("store:{key}"));
            self.blobs.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }
    }

    struct FakePublisher {
        published: Mutex<Vec<ProcessingRequest>>,
        effects: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl FakePublisher {
        fn new(effects: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                effects,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl EventPublisher for FakePublisher {
        async fn publish_processing_request(
            &self,
            request: &ProcessingRequest,
        ) -> Result<(), PublishError> {
            if self.fail {
                return Err(PublishError::EnqueueError {
                    topic: "lumen.processing.requests".to_string(),
                    message: "broker unavailable".to_string(),
                });
            }
            self.effects
                .lock()
                .unwrap()
                .push(format!("publish:{}", request.id));
            self.published.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn chunk_stream(
        chunks: Vec<Result<Vec<u8>, Status>>,
    ) -> impl Stream<Item = Result<Vec<u8>, Status>> + Unpin {
        futures::stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_chunks_concatenate_in_order() {
        let effects = Arc::new(Mutex::new(Vec::new()));
        let blob_store = Arc::new(FakeBlobStore::new(effects.clone()));
        let publisher = Arc::new(FakePublisher::new(effects.clone()));
        let coordinator = IngestCoordinator::new(blob_store.clone(), publisher.clone());

        let key = coordinator
            .submit(chunk_stream(vec![
                Ok(b"AB".to_vec()),
                Ok(b"CD".to_vec()),
                Ok(b"EF".to_vec()),
            ]))
            .await
            .unwrap();

        let blobs = blob_store.blobs.lock().unwrap();
        assert_eq!(blobs.get(&key).unwrap(), b"ABCDEF");

        // Exactly one event, carrying the blob key as its id.
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, key);
        assert_eq!(published[0].blob_name, key);
        assert_eq!(published[0].bucket_name, "lumen-images");
    }

    #[tokio::test]
    async fn test_store_happens_before_publish() {
        let effects = Arc::new(Mutex::new(Vec::new()));
        let blob_store = Arc::new(FakeBlobStore::new(effects.clone()));
        let publisher = Arc::new(FakePublisher::new(effects.clone()));
        let coordinator = IngestCoordinator::new(blob_store, publisher);

        let key = coordinator
            .submit(chunk_stream(vec![Ok(b"payload".to_vec())]))
            .await
            .unwrap();

        let effects = effects.lock().unwrap();
        assert_eq!(
            effects.as_slice(),
            [format!("store:{key}"), format!("publish:{key}")]
        );
    }

    #[tokio::test]
    async fn test_stream_error_publishes_nothing() {
        let effects = Arc::new(Mutex::new(Vec::new()));
        let blob_store = Arc::new(FakeBlobStore::new(effects.clone()));
        let publisher = Arc::new(FakePublisher::new(effects.clone()));
        let coordinator = IngestCoordinator::new(blob_store.clone(), publisher.clone());

        let result = coordinator
            .submit(chunk_stream(vec![
                Ok(b"AB".to_vec()),
                Err(Status::cancelled("client went away")),
            ]))
            .await;

        assert!(matches!(result, Err(IngestError::Stream(_))));
        assert!(blob_store.blobs.lock().unwrap().is_empty());
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_blob_in_place() {
        let effects = Arc::new(Mutex::new(Vec::new()));
        let blob_store = Arc::new(FakeBlobStore::new(effects.clone()));
        let mut failing = FakePublisher::new(effects.clone());
        failing.fail = true;
        let coordinator = IngestCoordinator::new(blob_store.clone(), Arc::new(failing));

        let result = coordinator
            .submit(chunk_stream(vec![Ok(b"orphan".to_vec())]))
            .await;

        assert!(matches!(result, Err(IngestError::Publish(_))));
        // The already-written blob is not rolled back.
        assert_eq!(blob_store.blobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_stores_empty_blob() {
        let effects = Arc::new(Mutex::new(Vec::new()));
        let blob_store = Arc::new(FakeBlobStore::new(effects.clone()));
        let publisher = Arc::new(FakePublisher::new(effects));
        let coordinator = IngestCoordinator::new(blob_store.clone(), publisher);

        let key = coordinator.submit(chunk_stream(vec![])).await.unwrap();
        assert_eq!(blob_store.blobs.lock().unwrap().get(&key).unwrap(), b"");
    }

    #[test]
    fn test_failed_session_rejects_chunks() {
        let mut session = UploadSession::open("image-x".to_string());
        session.push_chunk(b"AB").unwrap();
        session.fail();
        assert!(matches!(
            session.push_chunk(b"CD"),
            Err(IngestError::SessionClosed { state: "failed" })
        ));
        assert!(session.complete().is_err());
    }
}
