//! Lumen Gateway
//!
//! gRPC front end of the Lumen image analysis platform. Hosts three
//! concerns behind one listener:
//!
//! - streaming image ingestion into blob storage plus a processing event
//!   on the bus
//! - read queries over the processing-results collection
//! - the fleet scaling control surface
//!
//! # Architecture
//!
//! ```text
//! Client ──> Images.SubmitImage ──> BlobStore ──> EventBus ──> consumers
//!        ──> Images.Get*/List*  ──> ResultStore (read only)
//!        ──> Fleets.Scale*      ──> Compute API (resize + poll)
//! ```

mod blob_store;
mod config;
mod fleet;
mod ingest;
mod pb;
mod query;
mod server;

use anyhow::{Context, Result};
use blob_store::S3BlobStore;
use config::GatewayConfig;
use fleet::{FleetScaler, HttpComputeApi};
use ingest::IngestCoordinator;
use lumen_pipeline::KafkaEventPublisher;
use lumen_store::Store;
use query::QueryService;
use server::{FleetsRpc, ImagesRpc};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.logging);

    info!(
        service = "lumen-gateway",
        version = env!("CARGO_PKG_VERSION"),
        "Starting gateway"
    );

    config.validate().context("Invalid configuration")?;

    // Every client handle is built here and injected; nothing is ambient.
    let store = Store::connect(&config.database)
        .await
        .context("Failed to connect to document store")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run document store migrations")?;
    }

    let blob_store = Arc::new(S3BlobStore::new(&config.blob).await);

    let publisher = Arc::new(
        KafkaEventPublisher::new(config.bus.clone())
            .context("Failed to create event publisher")?,
    );

    let compute_api =
        Arc::new(HttpComputeApi::new(&config.fleet).context("Failed to create compute client")?);

    let coordinator = Arc::new(IngestCoordinator::new(blob_store, publisher));
    let query = Arc::new(QueryService::new(Arc::new(store.results())));
    let scaler = Arc::new(FleetScaler::new(compute_api, &config.fleet));

    let images = ImagesRpc::new(coordinator, query);
    let fleets = FleetsRpc::new(scaler);

    let addr = config
        .server
        .listen_addr()
        .parse()
        .context("Invalid listen address")?;

    server::serve(addr, images, fleets, shutdown_signal())
        .await
        .context("gRPC server failed")?;

    info!("Gateway stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &config::LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
