//! Capability provider boundaries: label detection and translation.
//!
//! Both providers are remote gRPC services addressed by configuration. The
//! traits are the seam the handler depends on; the gRPC clients behind them
//! are built once at startup with connection retry.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::Channel;
use tracing::{debug, instrument, warn};

pub mod pb {
    tonic::include_proto!("lumen.providers.v1");
}

use pb::label_detection_client::LabelDetectionClient;
use pb::translation_client::TranslationClient;
use pb::{DetectLabelsRequest, TranslateTextRequest};

/// Errors at the provider boundary
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid provider endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Failed to connect to provider: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("Provider call failed: {0}")]
    Call(#[from] tonic::Status),
}

/// Detects what an image depicts, by blob location
#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// Ordered list of characteristic labels for the image
    async fn detect_labels(
        &self,
        bucket_name: &str,
        blob_name: &str,
    ) -> Result<Vec<String>, ProviderError>;
}

/// Translates a single text between two fixed languages
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, ProviderError>;
}

/// Open a channel to a provider, retrying transient connect failures with
/// exponential backoff.
pub async fn connect_channel(
    endpoint: &str,
    timeout: Duration,
    max_elapsed: Duration,
) -> Result<Channel, ProviderError> {
    let endpoint = Channel::from_shared(endpoint.to_string())
        .map_err(|e| ProviderError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?
        .timeout(timeout);

    let policy = ExponentialBackoff {
        max_elapsed_time: Some(max_elapsed),
        ..ExponentialBackoff::default()
    };

    let channel = backoff::future::retry(policy, || async {
        endpoint.connect().await.map_err(|e| {
            warn!(error = %e, "Provider connection attempt failed, backing off");
            backoff::Error::transient(e)
        })
    })
    .await?;

    Ok(channel)
}

/// gRPC-backed [`LabelDetector`]
pub struct GrpcLabelDetector {
    client: LabelDetectionClient<Channel>,
}

impl GrpcLabelDetector {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: LabelDetectionClient::new(channel),
        }
    }
}

#[async_trait]
impl LabelDetector for GrpcLabelDetector {
    #[instrument(skip(self))]
    async fn detect_labels(
        &self,
        bucket_name: &str,
        blob_name: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .clone()
            .detect_labels(DetectLabelsRequest {
                bucket_name: bucket_name.to_string(),
                blob_name: blob_name.to_string(),
            })
            .await?;

        let labels = response.into_inner().labels;
        debug!(count = labels.len(), "Labels detected");

        Ok(labels)
    }
}

/// gRPC-backed [`Translator`]
pub struct GrpcTranslator {
    client: TranslationClient<Channel>,
}

impl GrpcTranslator {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: TranslationClient::new(channel),
        }
    }
}

#[async_trait]
impl Translator for GrpcTranslator {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .clone()
            .translate_text(TranslateTextRequest {
                text: text.to_string(),
                source_language: source_language.to_string(),
                target_language: target_language.to_string(),
            })
            .await?;

        Ok(response.into_inner().translated_text)
    }
}
