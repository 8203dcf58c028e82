//! Error types for the kcli client library

use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use crate::decoder::DecodeError;

/// Main error type for kcli client operations
#[derive(Debug, thiserror::Error)]
pub enum KcliError {
    /// Broker unreachable, or a partition stream could not be opened
    #[error("Connection error: {message}")]
    Connect { message: String },

    /// SASL/SCRAM initialization or step failure
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Certificate or key could not be parsed into a TLS configuration
    #[error("TLS configuration error: {message}")]
    TlsConfig { message: String },

    /// The caller's decode hook rejected a message
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Topic, partition or offset lookup failure
    #[error("Metadata error: {message}")]
    Metadata { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors
    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Topic does not exist
    #[error("Topic '{topic}' does not exist")]
    TopicNotFound { topic: String },

    /// Broker not available
    #[error("No available brokers")]
    NoBrokersAvailable,

    /// A background task panicked
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl KcliError {
    /// Create a new connection error
    pub fn connect<S: Into<String>>(message: S) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a new TLS configuration error
    pub fn tls_config<S: Into<String>>(message: S) -> Self {
        Self::TlsConfig {
            message: message.into(),
        }
    }

    /// Create a new metadata error
    pub fn metadata<S: Into<String>>(message: S) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Check if this error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::NoBrokersAvailable
        )
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<rustls::Error> for KcliError {
    fn from(err: rustls::Error) -> Self {
        Self::tls_config(err.to_string())
    }
}

/// Classify a broker client failure; `context` names the topic or the
/// operation that failed
pub(crate) fn from_kafka(err: KafkaError, context: &str) -> KcliError {
    if let KafkaError::ClientCreation(message) = &err {
        return KcliError::invalid_config(format!("{}: {}", context, message));
    }
    match err.rdkafka_error_code() {
        Some(code) => from_code(code, context),
        None => KcliError::connect(format!("{}: {}", context, err)),
    }
}

/// Map a librdkafka error code to the client error taxonomy
pub(crate) fn from_code(code: RDKafkaErrorCode, context: &str) -> KcliError {
    match code {
        RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
            KcliError::TopicNotFound {
                topic: context.to_string(),
            }
        }
        RDKafkaErrorCode::UnknownPartition | RDKafkaErrorCode::OffsetOutOfRange => {
            KcliError::metadata(format!("{}: {}", context, code))
        }
        RDKafkaErrorCode::Authentication
        | RDKafkaErrorCode::SaslAuthenticationFailed
        | RDKafkaErrorCode::TopicAuthorizationFailed => {
            KcliError::auth(format!("{}: {}", context, code))
        }
        RDKafkaErrorCode::SSL => KcliError::tls_config(format!("{}: {}", context, code)),
        RDKafkaErrorCode::OperationTimedOut | RDKafkaErrorCode::RequestTimedOut => {
            KcliError::timeout(format!("{}: {}", context, code))
        }
        RDKafkaErrorCode::AllBrokersDown => KcliError::NoBrokersAvailable,
        _ => KcliError::connect(format!("{}: {}", context, code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        match from_code(RDKafkaErrorCode::UnknownTopicOrPartition, "orders") {
            KcliError::TopicNotFound { topic } => assert_eq!(topic, "orders"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            from_code(RDKafkaErrorCode::SaslAuthenticationFailed, "alice"),
            KcliError::Auth { .. }
        ));
        assert!(matches!(
            from_code(RDKafkaErrorCode::SSL, "handshake"),
            KcliError::TlsConfig { .. }
        ));
        assert!(from_code(RDKafkaErrorCode::OperationTimedOut, "metadata").is_timeout());
        assert!(from_code(RDKafkaErrorCode::AllBrokersDown, "metadata").is_connection_error());
    }

    #[test]
    fn test_leadership_changes_are_connection_errors() {
        for code in [
            RDKafkaErrorCode::LeaderNotAvailable,
            RDKafkaErrorCode::NotLeaderForPartition,
            RDKafkaErrorCode::BrokerTransportFailure,
        ] {
            let err = from_code(code, "orders:3");
            assert!(err.is_connection_error(), "{:?} classified as {}", code, err);
        }
    }

    #[test]
    fn test_kafka_errors() {
        let err = from_kafka(KafkaError::ClientCreation("bad value".to_string()), "consumer");
        assert!(matches!(err, KcliError::InvalidConfig { .. }));

        let err = from_kafka(
            KafkaError::MetadataFetch(RDKafkaErrorCode::UnknownTopicOrPartition),
            "payments",
        );
        assert!(matches!(err, KcliError::TopicNotFound { .. }));
    }

    #[test]
    fn test_error_predicates() {
        assert!(KcliError::connect("refused").is_connection_error());
        assert!(KcliError::NoBrokersAvailable.is_connection_error());
        assert!(!KcliError::metadata("bad").is_connection_error());
        assert!(KcliError::timeout("metadata after 30s").is_timeout());
    }
}
