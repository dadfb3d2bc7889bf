//! Configuration for the analysis service.

use config::{Config, ConfigError, Environment, File};
use lumen_pipeline::BusConfig;
use lumen_store::DatabaseConfig;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the analysis consumer
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Service-level settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Event bus settings; `bus.subscription.group_id` names this service's
    /// subscription and must differ from the audit service's
    pub bus: BusConfig,

    /// Document store settings
    pub database: DatabaseConfig,

    /// Capability provider settings
    pub providers: ProvidersConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Capability provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Label detection endpoint
    pub label_endpoint: String,
    /// Translation endpoint
    pub translation_endpoint: String,
    /// Source language of detected labels
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// Target language of translations
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on connect retries in seconds
    #[serde(default = "default_connect_max_elapsed_secs")]
    pub connect_max_elapsed_secs: u64,
    /// Bounded pool size for per-label translation calls
    #[serde(default = "default_translate_concurrency")]
    pub translate_concurrency: usize,
}

fn default_service_name() -> String {
    "lumen-analysis".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_target_language() -> String {
    "pt".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_max_elapsed_secs() -> u64 {
    60
}

fn default_translate_concurrency() -> usize {
    4
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

impl AnalysisConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("ANALYSIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate required settings; failures here abort startup
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.providers.label_endpoint.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "providers.label_endpoint".to_string(),
            ));
        }
        if self.providers.translation_endpoint.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "providers.translation_endpoint".to_string(),
            ));
        }
        if self.providers.translate_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "providers.translate_concurrency".to_string(),
                message: "concurrency must be greater than 0".to_string(),
            });
        }

        self.bus
            .validate()
            .map_err(|e| ConfigValidationError::InvalidValue {
                field: "bus".to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}

impl ProvidersConfig {
    /// Per-call timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect retry bound as Duration
    pub fn connect_max_elapsed(&self) -> Duration {
        Duration::from_secs(self.connect_max_elapsed_secs)
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AnalysisConfig {
        AnalysisConfig {
            service: ServiceConfig::default(),
            bus: BusConfig::new("localhost:9092"),
            database: DatabaseConfig {
                url: "postgres://localhost/lumen".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_secs: 30,
                idle_timeout_secs: 600,
                run_migrations: true,
            },
            providers: ProvidersConfig {
                label_endpoint: "http://labels:50051".to_string(),
                translation_endpoint: "http://translate:50052".to_string(),
                source_language: default_source_language(),
                target_language: default_target_language(),
                request_timeout_secs: 30,
                connect_max_elapsed_secs: 60,
                translate_concurrency: 4,
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_missing_label_endpoint() {
        let mut config = test_config();
        config.providers.label_endpoint = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = test_config();
        config.providers.translate_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_default_language_pair() {
        let config = test_config();
        assert_eq!(config.providers.source_language, "en");
        assert_eq!(config.providers.target_language, "pt");
    }
}
