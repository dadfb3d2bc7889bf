//! Configuration for the audit service.

use config::{Config, ConfigError, Environment, File};
use lumen_pipeline::BusConfig;
use lumen_store::DatabaseConfig;
use serde::Deserialize;

/// Main configuration for the audit consumer
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Service-level settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Event bus settings; `bus.subscription.group_id` names this service's
    /// subscription, independent of the analysis service's
    pub bus: BusConfig,

    /// Document store settings
    pub database: DatabaseConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_service_name() -> String {
    "lumen-audit".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9092
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl AuditConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("AUDIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate required settings; failures here abort startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(())
    }
}
