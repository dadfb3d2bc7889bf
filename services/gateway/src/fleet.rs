//! Fleet scaling controller.
//!
//! A resize is a long-running operation on the compute side: we start it,
//! then poll its status under a bounded wait. The outcome is tri-state -
//! completed, failed, or timed out - and the RPC edge decides how to word
//! each for callers.

use crate::config::{FleetConfig, InstanceGroupConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// The two independently scalable fleets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fleet {
    /// gRPC gateway servers
    Servers,
    /// Image processing workers
    ImageProcessors,
}

impl fmt::Display for Fleet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fleet::Servers => write!(f, "server"),
            Fleet::ImageProcessors => write!(f, "image processing"),
        }
    }
}

/// Identity of one instance group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceGroupRef {
    pub project: String,
    pub zone: String,
    pub group_name: String,
}

impl From<&InstanceGroupConfig> for InstanceGroupRef {
    fn from(config: &InstanceGroupConfig) -> Self {
        Self {
            project: config.project.clone(),
            zone: config.zone.clone(),
            group_name: config.group_name.clone(),
        }
    }
}

/// Handle to a long-running compute operation
#[derive(Debug, Clone)]
pub struct OperationRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

/// Observed state of a compute operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Running,
    Done,
    Failed(String),
}

/// Errors from the compute API boundary
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Compute API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Compute API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Outcome of a bounded resize-and-wait
#[derive(Debug, Clone, PartialEq)]
pub enum ResizeOutcome {
    /// The operation completed within the wait bound
    Completed,
    /// The operation failed, or could not be started or observed
    Failed(String),
    /// The wait bound expired with the operation still running
    TimedOut,
}

/// Boundary to the compute instance-group API
#[async_trait]
pub trait InstanceGroupApi: Send + Sync {
    /// Start a resize of `group` to `size` instances
    async fn begin_resize(
        &self,
        group: InstanceGroupRef,
        size: u32,
    ) -> Result<OperationRef, FleetError>;

    /// Observe the current state of an operation
    async fn operation_state(&self, operation: &OperationRef) -> Result<OperationState, FleetError>;
}

#[derive(Debug, Deserialize)]
struct ResizeResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OperationResource {
    status: String,
    #[serde(default)]
    error: Option<OperationErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorBody {
    #[serde(default)]
    errors: Vec<OperationErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorDetail {
    #[serde(default)]
    message: String,
}

/// REST-backed [`InstanceGroupApi`]
pub struct HttpComputeApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpComputeApi {
    pub fn new(config: &FleetConfig) -> Result<Self, FleetError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, FleetError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(FleetError::Api { status, body })
    }
}

#[async_trait]
impl InstanceGroupApi for HttpComputeApi {
    #[instrument(skip(self, group), fields(group = %group.group_name))]
    async fn begin_resize(
        &self,
        group: InstanceGroupRef,
        size: u32,
    ) -> Result<OperationRef, FleetError> {
        let url = format!(
            "{}/projects/{}/zones/{}/instanceGroupManagers/{}/resize",
            self.base_url, group.project, group.zone, group.group_name
        );

        let response = self
            .authorize(self.client.post(&url).query(&[("size", size)]))
            .send()
            .await?;
        let resize: ResizeResponse = Self::check(response).await?.json().await?;

        debug!(operation = %resize.name, "Resize operation started");

        Ok(OperationRef {
            project: group.project,
            zone: group.zone,
            name: resize.name,
        })
    }

    async fn operation_state(
        &self,
        operation: &OperationRef,
    ) -> Result<OperationState, FleetError> {
        let url = format!(
            "{}/projects/{}/zones/{}/operations/{}",
            self.base_url, operation.project, operation.zone, operation.name
        );

        let response = self.authorize(self.client.get(&url)).send().await?;
        let resource: OperationResource = Self::check(response).await?.json().await?;

        if let Some(error) = resource.error {
            let message = error
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "unknown operation error".to_string());
            return Ok(OperationState::Failed(message));
        }

        Ok(match resource.status.as_str() {
            "DONE" => OperationState::Done,
            _ => OperationState::Running,
        })
    }
}

/// Drives resize operations for the two statically configured fleets
pub struct FleetScaler {
    api: Arc<dyn InstanceGroupApi>,
    servers: InstanceGroupRef,
    image_processors: InstanceGroupRef,
    resize_timeout: std::time::Duration,
    poll_interval: std::time::Duration,
}

impl FleetScaler {
    pub fn new(api: Arc<dyn InstanceGroupApi>, config: &FleetConfig) -> Self {
        Self {
            api,
            servers: InstanceGroupRef::from(&config.servers),
            image_processors: InstanceGroupRef::from(&config.image_processors),
            resize_timeout: config.resize_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    fn group_for(&self, fleet: Fleet) -> InstanceGroupRef {
        match fleet {
            Fleet::Servers => self.servers.clone(),
            Fleet::ImageProcessors => self.image_processors.clone(),
        }
    }

    /// Resize `fleet` to `num_instances` and wait, bounded, for the
    /// operation to settle. A resize to the current size is a no-op that
    /// completes successfully.
    #[instrument(skip(self), fields(fleet = %fleet, num_instances))]
    pub async fn resize(&self, fleet: Fleet, num_instances: u32) -> ResizeOutcome {
        let group = self.group_for(fleet);

        let operation = match self.api.begin_resize(group, num_instances).await {
            Ok(operation) => operation,
            Err(e) => {
                warn!(error = %e, "Failed to start resize operation");
                return ResizeOutcome::Failed(e.to_string());
            }
        };

        let wait = self.await_operation(&operation);
        match tokio::time::timeout(self.resize_timeout, wait).await {
            Ok(outcome) => {
                info!(outcome = ?outcome, "Resize operation settled");
                outcome
            }
            Err(_) => {
                warn!(
                    operation = %operation.name,
                    timeout = ?self.resize_timeout,
                    "Resize operation still running at wait bound"
                );
                ResizeOutcome::TimedOut
            }
        }
    }

    async fn await_operation(&self, operation: &OperationRef) -> ResizeOutcome {
        loop {
            match self.api.operation_state(operation).await {
                Ok(OperationState::Done) => return ResizeOutcome::Completed,
                Ok(OperationState::Failed(message)) => return ResizeOutcome::Failed(message),
                Ok(OperationState::Running) => {}
                Err(e) => return ResizeOutcome::Failed(e.to_string()),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
