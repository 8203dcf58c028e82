//! # kcli client library
//!
//! An async client for browsing and searching log-based message brokers.
//!
//! ## Features
//!
//! - **Secure connections**: SCRAM-SHA-512 authentication and mutual TLS over librdkafka
//! - **Partition reads**: bounded, offset-ordered reads with per-message polling
//! - **Topic search**: substring search across all partitions with a bounded worker pool
//! - **Cooperative cancellation**: early stop on first match, error or close
//! - **Pluggable decoding**: a [`Decoder`] hook applied to every payload
//! - **Testability**: an in-memory [`MemoryTransport`] with stream instrumentation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kcli_client::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfigBuilder::new()
//!         .brokers(vec!["localhost:9092"])
//!         .security(SecurityConfig::from_env())
//!         .build();
//!     let client = KcliClient::connect(config).await?;
//!
//!     let partitions = client.describe_topic("orders").await?;
//!     let hits = client
//!         .search_topic(&partitions, "order-1234", true, |_, _| {})
//!         .await?;
//!     for hit in hits {
//!         println!("found in partition {} at offset {}", hit.partition, hit.offset);
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connector;
pub mod decoder;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod partition;
pub mod reader;
pub mod scanner;
pub mod scram;
pub mod search;
pub mod tls;
pub mod transport;

pub use client::*;
pub use config::*;
pub use connector::{ConnectionConfig, SaslConfig, SecureConnector};
pub use decoder::{DecodeError, Decoder, PlainDecoder};
pub use error::*;
pub use memory::MemoryTransport;
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use partition::{Message, Offset, Partition, PartitionId, TopicName};
pub use reader::{OnDecodeError, PartitionReader, ReadContext};
pub use scram::{ScramClient, ScramMechanism, ScramState};
pub use search::{SearchMode, TopicSearchCoordinator};
pub use tls::{TlsFiles, TlsMaterial};
pub use transport::{BrokerTransport, MessageStream, OffsetSpec, RawMessage, Transport};

/// Client library result type
pub type Result<T> = std::result::Result<T, KcliError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
