//! Configuration structures for k2s.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags
//! or environment variables. Every section has local-development defaults
//! except the store credentials, which must always be supplied.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Remote store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Stream loop configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Producer configuration
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: Vec<String>,

    /// Topic carrying entity-change events
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Maximum number of messages per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a poll blocks waiting for the batch, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds (must exceed the slowest batch reconciliation)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            topic: default_topic(),
            consumer_group: default_consumer_group(),
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            auto_offset_reset: OffsetReset::default(),
            security: KafkaSecurityConfig::default(),
        }
    }
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

impl OffsetReset {
    /// librdkafka value for `auto.offset.reset`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Kafka security configuration, shared by consumer and producer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,
}

/// Remote store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Base URL of the store API, e.g. `http://localhost:8082/api`
    #[serde(default = "default_store_url")]
    pub base_url: String,

    /// Collection path below the base URL
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Basic auth username
    #[serde(default)]
    pub username: String,

    /// Basic auth password
    #[serde(default)]
    pub password: String,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            resource: default_resource(),
            username: String::new(),
            password: String::new(),
            request_timeout_seconds: default_request_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

/// Stream loop configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncConfig {
    /// When batch progress is committed relative to failed reconciliations
    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

/// Offset commit policy for batches containing failed reconciliations.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit the whole batch; failed events count as consumed
    #[default]
    Always,
    /// Stop each partition at its first failed event and redeliver it
    OnSuccess,
}

/// Producer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
    /// Delivery timeout in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Required acknowledgements (`0`, `1` or `all`)
    #[serde(default = "default_acks")]
    pub acks: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            message_timeout_ms: default_message_timeout_ms(),
            acks: default_acks(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions

fn default_bootstrap_servers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_topic() -> String {
    "products".to_string()
}

fn default_consumer_group() -> String {
    "product-consumer-group".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_heartbeat_interval_ms() -> u32 {
    3000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_store_url() -> String {
    "http://localhost:8082/api".to_string()
}

fn default_resource() -> String {
    "products".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_message_timeout_ms() -> u64 {
    5000
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text without validating it.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.kafka.batch_size == 0 {
            return Err(crate::Error::Config(
                "Batch size must be greater than zero".into(),
            ));
        }

        if self.kafka.poll_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "Poll timeout must be greater than zero".into(),
            ));
        }

        if !(self.store.base_url.starts_with("http://")
            || self.store.base_url.starts_with("https://"))
        {
            return Err(crate::Error::Config(format!(
                "Store base URL must be http(s): {}",
                self.store.base_url
            )));
        }

        if self.store.resource.trim_matches('/').is_empty() {
            return Err(crate::Error::Config("Store resource is required".into()));
        }

        if self.store.username.is_empty() {
            return Err(crate::Error::Config(
                "Store username is required (store.username or K2S_STORE_USERNAME)".into(),
            ));
        }

        if self.store.password.is_empty() {
            tracing::warn!("Store password is empty");
        }

        if self.store.request_timeout_seconds == 0 {
            return Err(crate::Error::Config(
                "Store request timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
