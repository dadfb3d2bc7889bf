//! gRPC service implementations and server wiring.
//!
//! All client handles are constructed at startup and injected here; no
//! component reaches for ambient globals. RPC callers see a status code and
//! a free-text description, nothing more structured.

use crate::fleet::{Fleet, FleetScaler, ResizeOutcome};
use crate::ingest::{IngestCoordinator, IngestError};
use crate::pb;
use crate::pb::fleets_server::{Fleets, FleetsServer};
use crate::pb::images_server::{Images, ImagesServer};
use crate::query::{QueryError, QueryService};
use futures::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

/// Image submission and retrieval service
pub struct ImagesRpc {
    coordinator: Arc<IngestCoordinator>,
    query: Arc<QueryService>,
}

impl ImagesRpc {
    pub fn new(coordinator: Arc<IngestCoordinator>, query: Arc<QueryService>) -> Self {
        Self { coordinator, query }
    }
}

#[tonic::async_trait]
impl Images for ImagesRpc {
    async fn submit_image(
        &self,
        request: Request<Streaming<pb::ImageChunk>>,
    ) -> Result<Response<pb::SubmitImageResponse>, Status> {
        let chunks = request
            .into_inner()
            .map(|chunk| chunk.map(|c| c.image_chunk));

        let unique_id = self.coordinator.submit(chunks).await.map_err(|e| match e {
            IngestError::Stream(status) => status,
            other => Status::internal(other.to_string()),
        })?;

        Ok(Response::new(pb::SubmitImageResponse { unique_id }))
    }

    async fn get_image_details(
        &self,
        request: Request<pb::ImageDetailsRequest>,
    ) -> Result<Response<pb::ImageDetailsResponse>, Status> {
        let unique_id = request.into_inner().unique_id;

        let details = self
            .query
            .image_details(&unique_id)
            .await
            .map_err(|e| Status::internal(e.to_string()))?
            .ok_or_else(|| {
                Status::not_found(format!("No processed image under id {unique_id}"))
            })?;

        Ok(Response::new(pb::ImageDetailsResponse {
            characteristics: details.characteristics,
            translations: details.translations,
            processed_date: details.processed_date,
        }))
    }

    async fn list_images_within(
        &self,
        request: Request<pb::ListImagesWithinRequest>,
    ) -> Result<Response<pb::ListImagesWithinResponse>, Status> {
        let request = request.into_inner();

        let file_names = self
            .query
            .images_within(
                &request.start_date,
                &request.end_date,
                &request.characteristic,
            )
            .await
            .map_err(|e| match e {
                QueryError::InvalidDate { .. } => Status::invalid_argument(e.to_string()),
                QueryError::Store(e) => Status::internal(e.to_string()),
            })?;

        Ok(Response::new(pb::ListImagesWithinResponse { file_names }))
    }
}

/// Fleet scaling service
pub struct FleetsRpc {
    scaler: Arc<FleetScaler>,
}

impl FleetsRpc {
    pub fn new(scaler: Arc<FleetScaler>) -> Self {
        Self { scaler }
    }

    async fn scale(&self, fleet: Fleet, num_instances: i32) -> pb::ScaleFleetResponse {
        if num_instances < 0 {
            return pb::ScaleFleetResponse {
                message: format!("Failed to scale {fleet} instances to {num_instances}"),
            };
        }

        let outcome = self.scaler.resize(fleet, num_instances as u32).await;

        // The caller only ever learns success or failure; the tri-state
        // detail stays in the logs.
        let message = match outcome {
            ResizeOutcome::Completed => {
                format!("Successfully scaled {fleet} instances to {num_instances}")
            }
            ResizeOutcome::Failed(ref reason) => {
                warn!(fleet = %fleet, reason = %reason, "Fleet resize failed");
                format!("Failed to scale {fleet} instances to {num_instances}")
            }
            ResizeOutcome::TimedOut => {
                warn!(fleet = %fleet, "Fleet resize timed out");
                format!("Failed to scale {fleet} instances to {num_instances}")
            }
        };

        pb::ScaleFleetResponse { message }
    }
}

#[tonic::async_trait]
impl Fleets for FleetsRpc {
    async fn scale_server_fleet(
        &self,
        request: Request<pb::ScaleFleetRequest>,
    ) -> Result<Response<pb::ScaleFleetResponse>, Status> {
        let num_instances = request.into_inner().num_instances;
        Ok(Response::new(
            self.scale(Fleet::Servers, num_instances).await,
        ))
    }

    async fn scale_image_processing_fleet(
        &self,
        request: Request<pb::ScaleFleetRequest>,
    ) -> Result<Response<pb::ScaleFleetResponse>, Status> {
        let num_instances = request.into_inner().num_instances;
        Ok(Response::new(
            self.scale(Fleet::ImageProcessors, num_instances).await,
        ))
    }
}

/// Serve both gRPC services until the shutdown future resolves
pub async fn serve(
    addr: SocketAddr,
    images: ImagesRpc,
    fleets: FleetsRpc,
    shutdown: impl Future<Output = ()>,
) -> Result<(), tonic::transport::Error> {
    info!(addr = %addr, "Starting gateway gRPC server");

    Server::builder()
        .add_service(ImagesServer::new(images))
        .add_service(FleetsServer::new(fleets))
        .serve_with_shutdown(addr, shutdown)
        .await
}
