//! Event bus configuration.
//!
//! One `BusConfig` serves every role: the gateway builds a producer from it,
//! the consumer services build a subscriber. The subscription section names
//! the consumer group; independent groups over the same topic each receive
//! every published message, which is how the analysis and audit services
//! fan out without partitioning the stream.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating bus configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required bus setting: {0}")]
    MissingRequired(&'static str),
}

/// Main event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Comma-separated broker addresses
    pub brokers: String,
    /// Client ID reported to the brokers
    pub client_id: String,
    /// Topic carrying processing-requested events
    pub topic: String,
    /// Transport security and authentication
    pub auth: AuthConfig,
    /// Producer-side delivery settings
    pub delivery: DeliveryConfig,
    /// Consumer-side subscription settings
    pub subscription: SubscriptionConfig,
    /// Passed through to rdkafka verbatim
    pub extra_properties: HashMap<String, String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".into(),
            client_id: "lumen".into(),
            topic: "lumen.processing.requests".into(),
            auth: AuthConfig::default(),
            delivery: DeliveryConfig::default(),
            subscription: SubscriptionConfig::default(),
            extra_properties: HashMap::new(),
        }
    }
}

/// Broker security protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "plaintext",
            Self::Ssl => "ssl",
            Self::SaslPlaintext => "sasl_plaintext",
            Self::SaslSsl => "sasl_ssl",
        }
    }

    fn uses_sasl(self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }
}

/// Transport security and SASL credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub security_protocol: SecurityProtocol,
    /// SASL mechanism name, e.g. "PLAIN" or "SCRAM-SHA-256"
    pub sasl_mechanism: String,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// CA certificate path for SSL endpoints
    pub ssl_ca_location: Option<String>,
}

/// Producer delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Required acknowledgments: "0", "1" or "all"
    pub acks: String,
    /// Broker-side retries for failed produce requests
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub linger_ms: u64,
    /// none, gzip, snappy, lz4 or zstd
    pub compression: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            acks: "all".into(),
            retries: 3,
            retry_backoff_ms: 100,
            request_timeout_ms: 30_000,
            linger_ms: 5,
            compression: "lz4".into(),
        }
    }
}

/// Consumer subscription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Consumer group naming this subscription
    pub group_id: String,
    /// earliest, latest or none
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    /// Exceeding this without progress triggers redelivery of uncommitted
    /// messages; it is the bus-side delivery deadline.
    pub max_poll_interval_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            group_id: "lumen".into(),
            auto_offset_reset: "earliest".into(),
            session_timeout_ms: 30_000,
            max_poll_interval_ms: 300_000,
        }
    }
}

impl BusConfig {
    /// Create a config for the given brokers, defaults elsewhere
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            ..Default::default()
        }
    }

    fn base_client_config(&self) -> ClientConfig {
        let mut cc = ClientConfig::new();
        cc.set("bootstrap.servers", &self.brokers);
        cc.set("client.id", &self.client_id);
        cc.set("security.protocol", self.auth.security_protocol.as_str());

        if self.auth.security_protocol.uses_sasl() {
            cc.set("sasl.mechanism", &self.auth.sasl_mechanism);
            if let Some(ref user) = self.auth.sasl_username {
                cc.set("sasl.username", user);
            }
            if let Some(ref pass) = self.auth.sasl_password {
                cc.set("sasl.password", pass);
            }
        }
        if let Some(ref ca) = self.auth.ssl_ca_location {
            cc.set("ssl.ca.location", ca);
        }

        for (key, value) in &self.extra_properties {
            cc.set(key, value);
        }

        cc
    }

    /// rdkafka settings for the publisher role
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut cc = self.base_client_config();
        cc.set("acks", &self.delivery.acks);
        cc.set("retries", self.delivery.retries.to_string());
        cc.set("retry.backoff.ms", self.delivery.retry_backoff_ms.to_string());
        cc.set("request.timeout.ms", self.delivery.request_timeout_ms.to_string());
        cc.set("linger.ms", self.delivery.linger_ms.to_string());
        cc.set("compression.type", &self.delivery.compression);
        cc
    }

    /// rdkafka settings for the subscriber role. Auto commit is always off:
    /// offsets move only when a handler acknowledges its message.
    pub fn consumer_client_config(&self) -> ClientConfig {
        let mut cc = self.base_client_config();
        cc.set("group.id", &self.subscription.group_id);
        cc.set("auto.offset.reset", &self.subscription.auto_offset_reset);
        cc.set("enable.auto.commit", "false");
        cc.set(
            "session.timeout.ms",
            self.subscription.session_timeout_ms.to_string(),
        );
        cc.set(
            "max.poll.interval.ms",
            self.subscription.max_poll_interval_ms.to_string(),
        );
        cc
    }

    /// Producer request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery.request_timeout_ms)
    }

    /// Check the settings every role needs; fatal at startup when violated
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.is_empty() {
            return Err(ConfigError::MissingRequired("brokers"));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::MissingRequired("topic"));
        }
        if self.subscription.group_id.is_empty() {
            return Err(ConfigError::MissingRequired("subscription.group_id"));
        }
        if self.auth.security_protocol.uses_sasl() {
            if self.auth.sasl_mechanism.is_empty() {
                return Err(ConfigError::MissingRequired("auth.sasl_mechanism"));
            }
            if self.auth.sasl_username.is_none() {
                return Err(ConfigError::MissingRequired("auth.sasl_username"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BusConfig::default();
        assert_eq!(config.topic, "lumen.processing.requests");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_producer_settings() {
        let cc = BusConfig::new("broker-1:9092").producer_client_config();
        assert_eq!(cc.get("bootstrap.servers"), Some("broker-1:9092"));
        assert_eq!(cc.get("acks"), Some("all"));
    }

    #[test]
    fn test_consumer_never_auto_commits() {
        let cc = BusConfig::new("broker-1:9092").consumer_client_config();
        assert_eq!(cc.get("enable.auto.commit"), Some("false"));
        assert_eq!(cc.get("group.id"), Some("lumen"));
    }

    #[test]
    fn test_sasl_requires_credentials() {
        let mut config = BusConfig::new("broker-1:9092");
        config.auth.security_protocol = SecurityProtocol::SaslSsl;
        config.auth.sasl_mechanism = "PLAIN".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired("auth.sasl_username"))
        ));
    }

    #[test]
    fn test_extra_properties_pass_through() {
        let mut config = BusConfig::new("broker-1:9092");
        config
            .extra_properties
            .insert("fetch.min.bytes".into(), "1024".into());
        let cc = config.consumer_client_config();
        assert_eq!(cc.get("fetch.min.bytes"), Some("1024"));
    }
}
