//! Error types for k2s core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for k2s operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for k2s.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Store gateway error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Payload decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Consumer group / poll error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Seeking a partition back to a previous offset failed
    #[error("Seek failed for {topic}[{partition}] at offset {offset}: {message}")]
    Seek {
        topic: String,
        partition: i32,
        offset: i64,
        message: String,
    },

    /// Producer delivery failed
    #[error("Delivery to {topic} failed: {message}")]
    Delivery { topic: String, message: String },

    /// Consumer closed
    #[error("Consumer closed")]
    ConsumerClosed,
}

/// Errors returned by the store gateway.
///
/// Any of these turns the reconciliation of the current event into a failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Network failure, timeout, or request construction failure
    #[error("{method} {url} failed: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
    },

    /// The store answered with a non-2xx status
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// The listing could not be decoded into entities
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl StoreError {
    /// HTTP status code, if the store answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors produced while turning a log payload into an entity.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Message carried no payload (tombstone)
    #[error("Message has no payload")]
    EmptyPayload,

    /// Payload bytes are not UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    /// Payload is not a well-formed entity document
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let kafka_err = KafkaError::ConnectionFailed {
            broker: "localhost:9092".into(),
            message: "connection refused".into(),
        };
        let err: Error = kafka_err.into();
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_store_error_status() {
        let err = StoreError::Status {
            method: "PUT".into(),
            url: "http://localhost:8082/api/products/3".into(),
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(
            err.to_string(),
            "PUT http://localhost:8082/api/products/3 returned 503: unavailable"
        );

        let err = StoreError::Transport {
            method: "GET".into(),
            url: "http://localhost:8082/api/products".into(),
            message: "connection refused".into(),
        };
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_decode_error_into_error() {
        let err: Error = DecodeError::MalformedPayload("missing field `id`".into()).into();
        assert_eq!(
            err.to_string(),
            "Decode error: Malformed payload: missing field `id`"
        );
    }
}
