//! Broker access seam used by the partition reader
//!
//! [`Transport`] covers the metadata calls and opens per-partition
//! [`MessageStream`]s. [`BrokerTransport`] talks to real brokers through
//! librdkafka; the in-process [`MemoryTransport`](crate::memory::MemoryTransport)
//! backs tests.

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::Message as _;
use rdkafka::{Offset as KafkaOffset, TopicPartitionList};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connector::ConnectionConfig;
use crate::error::{from_code, from_kafka, KcliError};
use crate::metrics::ClientMetrics;
use crate::partition::{Offset, PartitionId, TopicName};
use crate::Result;

/// Which end of a partition an offset lookup asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    /// Oldest retained offset
    Earliest,
    /// Offset the next produced message will get
    Latest,
}

/// Undecoded message as delivered by a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub offset: Offset,
    pub key: Option<Bytes>,
    pub value: Bytes,
}

/// Offset-ordered cursor over one partition
#[async_trait]
pub trait MessageStream: Send {
    /// Wait for the next message.
    ///
    /// Implementations must be cancel safe: dropping the returned future
    /// before it completes loses no message.
    async fn next_message(&mut self) -> Result<RawMessage>;

    /// Release the subscription
    async fn close(&mut self) -> Result<()>;
}

/// Metadata calls and stream factory
#[async_trait]
pub trait Transport: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<TopicName>>;

    /// Partition ids of a topic, ascending
    async fn partitions(&self, topic: &str) -> Result<Vec<PartitionId>>;

    async fn offset(&self, topic: &str, partition: PartitionId, spec: OffsetSpec) -> Result<Offset>;

    /// Open a dedicated stream starting at `offset`
    async fn open_stream(
        &self,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<Box<dyn MessageStream>>;

    async fn close(&self) -> Result<()>;
}

/// [`Transport`] over librdkafka consumers.
///
/// One shared consumer answers metadata and watermark queries; every stream
/// gets its own manually assigned consumer so partitions are read in
/// parallel. Leader tracking and reconnects are left to librdkafka.
pub struct BrokerTransport {
    config: ConnectionConfig,
    metadata_client: Arc<BaseConsumer>,
}

impl BrokerTransport {
    /// Create the metadata consumer and wait for the cluster to answer
    pub async fn connect(config: ConnectionConfig, metrics: Arc<ClientMetrics>) -> Result<Self> {
        if config.brokers.is_empty() {
            return Err(KcliError::invalid_config("at least one broker address is required"));
        }

        let metadata_client: BaseConsumer = config
            .client_config()
            .create()
            .map_err(|e| from_kafka(e, "metadata client"))?;
        let transport = Self {
            metadata_client: Arc::new(metadata_client),
            config,
        };

        let timeout = transport.config.connection_timeout;
        let bootstrap = transport
            .blocking("bootstrap", move |client| {
                let metadata = client
                    .fetch_metadata(None, timeout)
                    .map_err(|e| from_kafka(e, "bootstrap"))?;
                Ok((metadata.orig_broker_name().to_string(), metadata.brokers().len()))
            })
            .await;

        match bootstrap {
            Ok((broker, count)) => {
                metrics.record_connection_created();
                info!("Bootstrapped from broker {} ({} brokers in cluster)", broker, count);
                Ok(transport)
            }
            Err(e) => {
                metrics.record_connection_failed();
                warn!(
                    "Failed to reach any of {}: {}",
                    transport.config.brokers.join(","),
                    e
                );
                Err(e)
            }
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Run a blocking librdkafka call off the async workers
    async fn blocking<T, F>(&self, context: &str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&BaseConsumer) -> Result<T> + Send + 'static,
    {
        let client = self.metadata_client.clone();
        let result = tokio::task::spawn_blocking(move || call(&client)).await?;
        if let Err(e) = &result {
            debug!("{} failed: {}", context, e);
        }
        result
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn list_topics(&self) -> Result<Vec<TopicName>> {
        let timeout = self.config.request_timeout;
        self.blocking("list topics", move |client| {
            let metadata = client
                .fetch_metadata(None, timeout)
                .map_err(|e| from_kafka(e, "list topics"))?;

            let mut topics: Vec<TopicName> = metadata
                .topics()
                .iter()
                .filter(|t| t.error().is_none())
                .map(|t| t.name().to_string())
                .collect();
            topics.sort();
            Ok(topics)
        })
        .await
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<PartitionId>> {
        let timeout = self.config.request_timeout;
        let topic = topic.to_string();
        self.blocking("describe topic", move |client| {
            let metadata = client
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|e| from_kafka(e, &topic))?;

            let found = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| from_code(RDKafkaErrorCode::UnknownTopicOrPartition, &topic))?;
            if let Some(err) = found.error() {
                return Err(from_code(err.into(), &topic));
            }

            let mut ids: Vec<PartitionId> = found.partitions().iter().map(|p| p.id()).collect();
            ids.sort_unstable();
            Ok(ids)
        })
        .await
    }

    async fn offset(&self, topic: &str, partition: PartitionId, spec: OffsetSpec) -> Result<Offset> {
        let timeout = self.config.request_timeout;
        let topic = topic.to_string();
        let (low, high) = self
            .blocking("watermarks", move |client| {
                client
                    .fetch_watermarks(&topic, partition, timeout)
                    .map_err(|e| from_kafka(e, &topic))
            })
            .await?;

        Ok(match spec {
            OffsetSpec::Earliest => low,
            OffsetSpec::Latest => high,
        })
    }

    async fn open_stream(
        &self,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<Box<dyn MessageStream>> {
        let consumer: StreamConsumer = self
            .config
            .client_config()
            .create()
            .map_err(|e| from_kafka(e, topic))?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, KafkaOffset::Offset(offset))
            .map_err(|e| from_kafka(e, topic))?;
        consumer.assign(&assignment).map_err(|e| from_kafka(e, topic))?;
        debug!("Assigned {}:{} at offset {}", topic, partition, offset);

        Ok(Box::new(KafkaStream {
            consumer: Some(consumer),
            topic: topic.to_string(),
            partition,
        }))
    }

    async fn close(&self) -> Result<()> {
        info!("Broker transport closed");
        Ok(())
    }
}

/// Partition stream backed by a manually assigned consumer
pub struct KafkaStream {
    consumer: Option<StreamConsumer>,
    topic: String,
    partition: PartitionId,
}

#[async_trait]
impl MessageStream for KafkaStream {
    async fn next_message(&mut self) -> Result<RawMessage> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| KcliError::connect("partition stream is closed"))?;

        // recv is cancel safe: an undelivered message stays queued
        let message = consumer
            .recv()
            .await
            .map_err(|e| from_kafka(e, &self.topic))?;

        Ok(RawMessage {
            offset: message.offset(),
            key: message.key().map(Bytes::copy_from_slice),
            value: message.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        // closing a librdkafka consumer blocks until its queues drain
        let unassigned = tokio::task::spawn_blocking(move || consumer.unassign()).await?;
        unassigned.map_err(|e| from_kafka(e, &self.topic))?;
        debug!("Closed stream for {}:{}", self.topic, self.partition);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfigBuilder;
    use crate::connector::SecureConnector;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_requires_brokers() {
        let config = SecureConnector::new(&ClientConfigBuilder::new().brokers(Vec::<String>::new()).build())
            .build()
            .unwrap();

        assert!(matches!(
            BrokerTransport::connect(config, Arc::default()).await,
            Err(KcliError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        // grab a free port, then release it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfigBuilder::new()
            .brokers([addr.to_string()])
            .connection_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(1))
            .build();
        let connection = SecureConnector::new(&config).build().unwrap();
        let metrics = Arc::new(ClientMetrics::default());

        let err = match BrokerTransport::connect(connection, metrics.clone()).await {
            Ok(_) => panic!("connected to a closed port"),
            Err(e) => e,
        };
        assert!(err.is_connection_error() || err.is_timeout(), "{:?}", err);
        assert_eq!(metrics.snapshot().connections_failed, 1);
        assert_eq!(metrics.snapshot().connections_created, 0);
    }
}
