//! Configuration for the gateway service.
//!
//! Loaded from config files (`config/default.toml`, `config/{RUN_MODE}.toml`)
//! overridden by environment variables prefixed with `GATEWAY__`. Missing
//! required settings are fatal at startup; there is no degraded mode.

use config::{Config, ConfigError, Environment, File};
use lumen_pipeline::BusConfig;
use lumen_store::DatabaseConfig;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// gRPC server settings
    pub server: ServerConfig,

    /// Blob storage settings
    pub blob: BlobConfig,

    /// Event bus settings
    pub bus: BusConfig,

    /// Document store settings
    pub database: DatabaseConfig,

    /// Fleet scaling settings
    pub fleet: FleetConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// gRPC listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// Bucket receiving uploaded images
    pub bucket: String,
    /// Region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// One statically configured instance group
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceGroupConfig {
    pub project: String,
    pub zone: String,
    pub group_name: String,
}

/// Fleet scaling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Base URL of the compute API
    pub api_base_url: String,
    /// Bearer token for the compute API
    pub auth_token: Option<String>,
    /// Server fleet instance group
    pub servers: InstanceGroupConfig,
    /// Image processing fleet instance group
    pub image_processors: InstanceGroupConfig,
    /// Upper bound on the resize wait
    #[serde(default = "default_resize_timeout_secs")]
    pub resize_timeout_secs: u64,
    /// Interval between operation polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_resize_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate required settings; failures here abort startup.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.blob.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("blob.bucket".to_string()));
        }

        if self.fleet.api_base_url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "fleet.api_base_url".to_string(),
            ));
        }

        for (name, group) in [
            ("fleet.servers", &self.fleet.servers),
            ("fleet.image_processors", &self.fleet.image_processors),
        ] {
            if group.project.is_empty() || group.zone.is_empty() || group.group_name.is_empty() {
                return Err(ConfigValidationError::InvalidValue {
                    field: name.to_string(),
                    message: "project, zone and group_name are all required".to_string(),
                });
            }
        }

        if self.fleet.resize_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "fleet.resize_timeout_secs".to_string(),
                message: "timeout must be greater than 0".to_string(),
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

impl ServerConfig {
    /// Socket address to bind
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FleetConfig {
    /// Get resize wait bound as Duration
    pub fn resize_timeout(&self) -> Duration {
        Duration::from_secs(self.resize_timeout_secs)
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get HTTP timeout as Duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
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
