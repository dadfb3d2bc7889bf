//! Lumen Analysis Service
//!
//! Consumes processing-requested events from its own bus subscription,
//! enriches each image through the label-detection and translation
//! providers, and persists one processing result per successful enrichment.
//! Failures are negative-acknowledged and redelivered by the bus; this
//! process keeps no retry state of its own.

mod config;
mod handler;
mod providers;

use anyhow::{Context, Result};
use config::AnalysisConfig;
use handler::AnalysisHandler;
use lumen_pipeline::EventSubscriber;
use lumen_store::Store;
use providers::{connect_channel, GrpcLabelDetector, GrpcTranslator};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AnalysisConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        group = %config.bus.subscription.group_id,
        "Starting analysis service"
    );

    config.validate().context("Invalid configuration")?;

    init_metrics(config.service.metrics_port)?;

    let store = Store::connect(&config.database)
        .await
        .context("Failed to connect to document store")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run document store migrations")?;
    }

    // Provider channels are opened up front with retry so a misconfigured
    // endpoint fails the process instead of failing every message.
    let label_channel = connect_channel(
        &config.providers.label_endpoint,
        config.providers.request_timeout(),
        config.providers.connect_max_elapsed(),
    )
    .await
    .context("Failed to connect to label detection provider")?;

    let translation_channel = connect_channel(
        &config.providers.translation_endpoint,
        config.providers.request_timeout(),
        config.providers.connect_max_elapsed(),
    )
    .await
    .context("Failed to connect to translation provider")?;

    let handler = Arc::new(AnalysisHandler::new(
        Arc::new(GrpcLabelDetector::new(label_channel)),
        Arc::new(GrpcTranslator::new(translation_channel)),
        Arc::new(store.results()),
        config.providers.source_language.clone(),
        config.providers.target_language.clone(),
        config.providers.translate_concurrency,
    ));

    let subscriber = Arc::new(
        EventSubscriber::new(config.bus.clone()).context("Failed to create bus subscriber")?,
    );
    subscriber
        .subscribe_processing_requests()
        .context("Failed to subscribe to processing requests")?;

    let consumer_handle = tokio::spawn({
        let subscriber = subscriber.clone();
        async move {
            if let Err(e) = subscriber.run(handler).await {
                error!(error = %e, "Subscriber loop failed");
            }
        }
    });

    info!("Analysis service started");

    shutdown_signal().await;

    info!("Shutting down analysis service");
    subscriber.shutdown();
    let _ = consumer_handle.await;

    info!("Analysis service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
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
