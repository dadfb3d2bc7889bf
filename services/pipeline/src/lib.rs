//! Lumen Pipeline - event bus adapter for the Lumen image analysis platform
//!
//! This library carries processing-requested events from the ingestion
//! gateway to the analysis and audit services:
//!
//! - A publisher that enqueues one event per completed image upload
//! - Independent push-style subscriptions with at-least-once delivery and
//!   explicit acknowledge / negative-acknowledge per message
//! - The fixed wire record shared by all parties
//!
//! # Example
//!
//! ```rust,no_run
//! use lumen_pipeline::{BusConfig, EventSubscriber, KafkaEventPublisher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BusConfig::new("localhost:9092");
//!
//!     let publisher = KafkaEventPublisher::new(config.clone())?;
//!
//!     let subscriber = EventSubscriber::new(config)?;
//!     subscriber.subscribe_processing_requests()?;
//!
//!     let _ = publisher;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use codec::{CodecError, ProcessingRequest, ProcessingRequestRecord, TIMESTAMP_HEADER};
pub use config::{
    AuthConfig, BusConfig, ConfigError, DeliveryConfig, SecurityProtocol, SubscriptionConfig,
};
pub use publisher::{EventPublisher, KafkaEventPublisher, PublishError};
pub use subscriber::{
    DeliveryOutcome, EventHandler, EventSubscriber, HandlerError, InboundEvent, SubscriberError,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::ProcessingRequest;
    pub use crate::config::BusConfig;
    pub use crate::publisher::{EventPublisher, KafkaEventPublisher, PublishError};
    pub use crate::subscriber::{
        EventHandler, EventSubscriber, HandlerError, InboundEvent, SubscriberError,
    };
}
