//! Kafka subscription with explicit per-message acknowledgement.
//!
//! Delivery is at-least-once: every message stays eligible for redelivery
//! until its handler acknowledges it. Each in-flight message is tracked by a
//! [`Delivery`] state machine (`Received -> Acked | Nacked`); acknowledging
//! commits the offset, negative-acknowledging seeks the partition back so
//! the message is delivered again. Handlers must therefore be idempotent.

use crate::codec::{CodecError, ProcessingRequest, TIMESTAMP_HEADER};
use crate::config::BusConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message as KafkaMessage};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur while consuming events
#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("Failed to create consumer: {0}")]
    CreationError(String),

    #[error("Failed to subscribe to topic {topic}: {message}")]
    SubscriptionError { topic: String, message: String },

    #[error("Failed to commit offset: {0}")]
    CommitError(String),

    #[error("Failed to rewind partition for redelivery: {0}")]
    SeekError(String),
}

/// Error returned by an event handler; any cause results in a nack.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct HandlerError(#[from] pub anyhow::Error);

/// A message as delivered to a handler
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Message headers (attributes)
    pub headers: HashMap<String, String>,
    /// Topic the message arrived on
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key, when present and valid UTF-8
    pub key: Option<String>,
}

impl InboundEvent {
    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    /// Decode the payload and timestamp header as a processing request
    pub fn decode_processing_request(&self) -> Result<ProcessingRequest, CodecError> {
        ProcessingRequest::decode(&self.payload, self.header(TIMESTAMP_HEADER))
    }
}

/// Handler invoked once per delivered message.
///
/// `Ok` acknowledges the message; `Err` negative-acknowledges it and the bus
/// redelivers. Handlers see each message one or more times, never zero.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError>;
}

/// Terminal states of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Nacked,
}

/// State machine tracking one in-flight message. Consuming `ack`/`nack`
/// makes double-resolution unrepresentable.
struct Delivery<'a> {
    consumer: &'a StreamConsumer,
    topic: String,
    partition: i32,
    offset: i64,
}

impl Delivery<'_> {
    /// Mark the message processed: commit the next offset asynchronously.
    fn ack(self) -> Result<DeliveryOutcome, SubscriberError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| SubscriberError::CommitError(e.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| SubscriberError::CommitError(e.to_string()))?;
        Ok(DeliveryOutcome::Acked)
    }

    /// Request redelivery: rewind the partition to this message's offset.
    fn nack(self) -> Result<DeliveryOutcome, SubscriberError> {
        self.consumer
            .seek(
                &self.topic,
                self.partition,
                Offset::Offset(self.offset),
                Timeout::After(Duration::from_secs(5)),
            )
            .map_err(|e| SubscriberError::SeekError(e.to_string()))?;
        Ok(DeliveryOutcome::Nacked)
    }
}

/// One subscription over the processing-requests topic.
///
/// Independent subscriptions (distinct consumer group ids) each receive
/// every published message; this is fan-out, not partitioning.
pub struct EventSubscriber {
    consumer: StreamConsumer,
    config: Arc<BusConfig>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EventSubscriber {
    /// Create a new subscriber under the configured consumer group
    pub fn new(config: BusConfig) -> Result<Self, SubscriberError> {
        info!(
            brokers = %config.brokers,
            group = %config.subscription.group_id,
            "Creating Kafka event subscriber"
        );

        let consumer: StreamConsumer = config
            .consumer_client_config()
            .create()
            .map_err(|e| SubscriberError::CreationError(e.to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            consumer,
            config: Arc::new(config),
            shutdown_tx,
        })
    }

    /// Get the bus configuration
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Subscribe to the processing-requests topic
    pub fn subscribe_processing_requests(&self) -> Result<(), SubscriberError> {
        let topic = self.config.topic.clone();
        info!(topic = %topic, group = %self.config.subscription.group_id, "Subscribing");
        self.consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| SubscriberError::SubscriptionError {
                topic,
                message: e.to_string(),
            })
    }

    /// Signal the consumption loop to stop
    pub fn shutdown(&self) {
        info!("Signaling subscriber shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Consume messages until shutdown, resolving each delivery through the
    /// given handler.
    #[instrument(skip(self, handler), fields(group = %self.config.subscription.group_id))]
    pub async fn run<H: EventHandler>(&self, handler: Arc<H>) -> Result<(), SubscriberError> {
        use tokio_stream::StreamExt;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        info!("Starting event consumption loop");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                message_result = stream.next() => {
                    match message_result {
                        Some(Ok(borrowed_message)) => {
                            let event = convert_message(&borrowed_message);
                            let delivery = Delivery {
                                consumer: &self.consumer,
                                topic: event.topic.clone(),
                                partition: event.partition,
                                offset: event.offset,
                            };

                            debug!(
                                topic = %event.topic,
                                partition = event.partition,
                                offset = event.offset,
                                "Received event"
                            );

                            let outcome = match handler.handle(&event).await {
                                Ok(()) => delivery.ack(),
                                Err(e) => {
                                    error!(
                                        partition = event.partition,
                                        offset = event.offset,
                                        error = %e,
                                        "Event processing failed, requesting redelivery"
                                    );
                                    delivery.nack()
                                }
                            };

                            if let Err(e) = outcome {
                                // The message stays uncommitted either way, so
                                // redelivery still happens; only the timing differs.
                                warn!(error = %e, "Failed to resolve delivery");
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Kafka error while polling");
                        }
                        None => {
                            debug!("Message stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Final commit so a clean shutdown does not replay acked messages.
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            warn!(error = %e, "Final offset commit failed on shutdown");
        }

        Ok(())
    }
}

/// Convert a borrowed Kafka message into an owned [`InboundEvent`]
fn convert_message<M: KafkaMessage>(msg: &M) -> InboundEvent {
    let payload = msg.payload().unwrap_or(&[]).to_vec();
    let key = msg
        .key()
        .and_then(|k| String::from_utf8(k.to_vec()).ok());

    let mut headers = HashMap::new();
    if let Some(h) = msg.headers() {
        for header in h.iter() {
            if let Some(value) = header.value {
                if let Ok(v) = String::from_utf8(value.to_vec()) {
                    headers.insert(header.key.to_string(), v);
                }
            }
        }
    }

    InboundEvent {
        payload,
        headers,
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key,
    }
}
