//! Lumen Audit Service
//!
//! Consumes processing-requested events on its own subscription and appends
//! a minimal `{request_id, timestamp}` entry per observed event. Runs fully
//! independently of the analysis service: same topic, different consumer
//! group, no shared failure state.

mod config;
mod handler;

use anyhow::{Context, Result};
use config::AuditConfig;
use handler::AuditHandler;
use lumen_pipeline::EventSubscriber;
use lumen_store::Store;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AuditConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        group = %config.bus.subscription.group_id,
        "Starting audit service"
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

    let handler = Arc::new(AuditHandler::new(Arc::new(store.audit())));

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

    info!("Audit service started");

    shutdown_signal().await;

    info!("Shutting down audit service");
    subscriber.shutdown();
    let _ = consumer_handle.await;

    info!("Audit service stopped");

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
