//! High-level client interface

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connector::SecureConnector;
use crate::decoder::{Decoder, PlainDecoder};
use crate::error::KcliError;
use crate::metrics::ClientMetrics;
use crate::partition::{Message, Offset, Partition, TopicName};
use crate::reader::{PartitionReader, ReadContext};
use crate::scanner;
use crate::search::{SearchMode, TopicSearchCoordinator};
use crate::transport::{BrokerTransport, OffsetSpec, Transport};
use crate::Result;

/// Main client: metadata lookups, partition reads and topic searches
pub struct KcliClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn Decoder>,
    metrics: Arc<ClientMetrics>,
    shutdown: CancellationToken,
}

impl KcliClient {
    /// Resolve security settings and connect to the configured brokers
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let connection = SecureConnector::new(&config).build()?;
        let metrics = Arc::new(ClientMetrics::default());
        let transport = BrokerTransport::connect(connection, metrics.clone()).await?;

        Ok(Self::from_parts(config, Arc::new(transport), metrics))
    }

    /// Build a client over an existing transport, such as
    /// [`MemoryTransport`](crate::memory::MemoryTransport)
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(KcliError::invalid_config("concurrency must be at least 1"));
        }
        Ok(Self::from_parts(config, transport, Arc::default()))
    }

    fn from_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            config,
            transport,
            decoder: Arc::new(PlainDecoder),
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the identity decoder
    pub fn with_decoder<D: Decoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.metrics.clone()
    }

    fn read_context(&self) -> ReadContext {
        ReadContext {
            transport: self.transport.clone(),
            decoder: self.decoder.clone(),
            metrics: self.metrics.clone(),
            poll_timeout: self.config.poll_timeout,
        }
    }

    pub async fn list_topics(&self) -> Result<Vec<TopicName>> {
        self.transport.list_topics().await
    }

    /// Every partition of `topic` with its oldest and newest offsets, the
    /// cursor placed at the oldest
    pub async fn describe_topic(&self, topic: &str) -> Result<Vec<Partition>> {
        let ids = self.transport.partitions(topic).await?;

        let mut partitions = Vec::with_capacity(ids.len());
        for id in ids {
            let end = self.transport.offset(topic, id, OffsetSpec::Latest).await?;
            let start = self.transport.offset(topic, id, OffsetSpec::Earliest).await?;
            let partition = Partition::new(topic, id, start, end).map_err(|_| {
                KcliError::metadata(format!(
                    "{}:{} reports oldest offset {} past newest {}",
                    topic, id, start, end
                ))
            })?;
            partitions.push(partition);
        }

        debug!("Described {} with {} partitions", topic, partitions.len());
        Ok(partitions)
    }

    /// Collect up to `count` messages from the partition cursor whose raw
    /// payload satisfies `predicate`
    pub async fn read_range<P>(
        &self,
        partition: &Partition,
        count: usize,
        predicate: P,
    ) -> Result<Vec<Message>>
    where
        P: FnMut(&[u8]) -> bool,
    {
        let mut reader =
            PartitionReader::open(self.read_context(), partition, self.shutdown.child_token())
                .await?;
        let result = reader.read_until(count, predicate).await;
        let closed = reader.close().await;

        let messages = result?;
        closed?;
        Ok(messages)
    }

    /// Offset of the first message at or after the cursor containing `needle`
    pub async fn search<P>(
        &self,
        partition: &Partition,
        needle: &str,
        progress: P,
    ) -> Result<Option<Offset>>
    where
        P: FnMut(i64, i64),
    {
        scanner::search(
            &self.read_context(),
            partition,
            needle.as_bytes(),
            self.shutdown.child_token(),
            progress,
        )
        .await
    }

    /// Search every given partition in parallel.
    ///
    /// With `first_only` the search ends at the first match anywhere.
    pub async fn search_topic<P>(
        &self,
        partitions: &[Partition],
        needle: &str,
        first_only: bool,
        progress: P,
    ) -> Result<Vec<Partition>>
    where
        P: FnMut(i64, i64),
    {
        self.search_topic_with(partitions, needle, SearchMode::from_first_only(first_only), progress)
            .await
    }

    pub async fn search_topic_with<P>(
        &self,
        partitions: &[Partition],
        needle: &str,
        mode: SearchMode,
        progress: P,
    ) -> Result<Vec<Partition>>
    where
        P: FnMut(i64, i64),
    {
        TopicSearchCoordinator::new(
            self.read_context(),
            self.config.concurrency,
            self.config.result_order,
        )
        .run(partitions, needle.as_bytes(), mode, &self.shutdown, progress)
        .await
    }

    /// Deliver up to `end` decoded messages from the cursor to `callback`
    pub async fn fetch<F>(&self, partition: &Partition, end: i64, callback: F) -> Result<()>
    where
        F: FnMut(String),
    {
        scanner::fetch(
            &self.read_context(),
            partition,
            end,
            self.shutdown.child_token(),
            callback,
        )
        .await
    }

    /// Cancel in-flight reads and disconnect
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.transport.close().await?;
        info!("Client closed");
        Ok(())
    }
}
