//! Kafka publisher for processing-requested events.
//!
//! Publishing is a two-step contract: the call returns once the record has
//! been handed to the producer's queue, and a spawned task waits on the
//! delivery confirmation to log the outcome. Delivery failures are logged,
//! never retried here.

use crate::codec::{ProcessingRequest, TIMESTAMP_HEADER};
use crate::config::BusConfig;
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during event publication
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to enqueue event for topic {topic}: {message}")]
    EnqueueError { topic: String, message: String },

    #[error("Producer flush timed out after {0:?}")]
    FlushTimeout(Duration),
}

/// Seam for components that emit processing-requested events.
///
/// Injected into the ingestion path so tests can observe publications
/// without a broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hand the event to the bus. Returns once the event is enqueued;
    /// delivery confirmation is asynchronous.
    async fn publish_processing_request(
        &self,
        request: &ProcessingRequest,
    ) -> Result<(), PublishError>;
}

/// Kafka-backed [`EventPublisher`].
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    config: Arc<BusConfig>,
}

impl KafkaEventPublisher {
    /// Create a new publisher from the given bus configuration
    pub fn new(config: BusConfig) -> Result<Self, PublishError> {
        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            "Creating Kafka event publisher"
        );

        let producer: FutureProducer = config
            .producer_client_config()
            .create()
            .map_err(|e| PublishError::CreationError(e.to_string()))?;

        let topic = config.topic.clone();

        Ok(Self {
            producer,
            topic,
            config: Arc::new(config),
        })
    }

    /// Get the bus configuration
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Flush all pending events
    pub fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|_| PublishError::FlushTimeout(timeout))
    }

    /// Number of events still awaiting delivery confirmation
    pub fn in_flight(&self) -> usize {
        self.producer.in_flight_count() as usize
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    #[instrument(skip(self, request), fields(topic = %self.topic, id = %request.id))]
    async fn publish_processing_request(
        &self,
        request: &ProcessingRequest,
    ) -> Result<(), PublishError> {
        let payload = request.encode_payload();
        let headers = OwnedHeaders::new().insert(Header {
            key: TIMESTAMP_HEADER,
            value: Some(&request.timestamp_header_value()),
        });

        let record = FutureRecord::to(&self.topic)
            .key(&request.id)
            .payload(&payload)
            .headers(headers);

        debug!(size = payload.len(), "Enqueueing processing request");

        // send_result hands the record to the producer queue without waiting
        // for the broker; a full queue is the only failure surfaced here.
        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| PublishError::EnqueueError {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        let id = request.id.clone();
        let topic = self.topic.clone();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => {
                    info!(
                        id = %id,
                        topic = %topic,
                        partition,
                        offset,
                        "Processing request delivered"
                    );
                }
                Ok(Err((e, _))) => {
                    error!(id = %id, topic = %topic, error = %e, "Event delivery failed");
                }
                Err(_) => {
                    warn!(id = %id, topic = %topic, "Producer dropped before delivery confirmation");
                }
            }
        });

        Ok(())
    }
}

impl Drop for KafkaEventPublisher {
    fn drop(&mut self) {
        info!("Shutting down Kafka event publisher");
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!("Failed to flush publisher on shutdown: {}", e);
        }
    }
}
