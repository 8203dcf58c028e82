//! In-process broker for tests and offline tooling
//!
//! Partitions hold a fixed list of messages. Streams deliver them in offset
//! order, optionally after a per-message delay, and then wait forever like a
//! consumer parked at the head of a live partition. Every open stream is
//! counted so callers can observe how many reads run at once.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::KcliError;
use crate::partition::{Offset, PartitionId, TopicName};
use crate::transport::{MessageStream, OffsetSpec, RawMessage, Transport};
use crate::Result;

#[derive(Debug, Clone, Default)]
struct MemoryPartition {
    start: Offset,
    messages: Vec<Bytes>,
    delay: Duration,
}

impl MemoryPartition {
    fn end(&self) -> Offset {
        self.start + self.messages.len() as Offset
    }
}

#[derive(Debug, Default)]
struct StreamCounters {
    open: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Fake [`Transport`] keeping every topic in memory
#[derive(Debug, Default)]
pub struct MemoryTransport {
    topics: RwLock<BTreeMap<TopicName, BTreeMap<PartitionId, MemoryPartition>>>,
    failing: RwLock<HashSet<(TopicName, PartitionId)>>,
    counters: Arc<StreamCounters>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic with `partitions` empty partitions
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        let mut topics = self.topics.write();
        let entry = topics.entry(topic.to_string()).or_default();
        for id in 0..partitions {
            entry.entry(id as PartitionId).or_default();
        }
    }

    /// Replace a partition's contents; the first message gets offset `start`
    pub fn set_partition<I, B>(&self, topic: &str, partition: PartitionId, start: Offset, messages: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut topics = self.topics.write();
        let entry = topics
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_default();
        entry.start = start;
        entry.messages = messages.into_iter().map(Into::into).collect();
    }

    /// Append a message, returning its offset
    pub fn produce<B: Into<Bytes>>(&self, topic: &str, partition: PartitionId, value: B) -> Offset {
        let mut topics = self.topics.write();
        let entry = topics
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_default();
        entry.messages.push(value.into());
        entry.end() - 1
    }

    /// Delay applied before each message of a partition is delivered
    pub fn set_delay(&self, topic: &str, partition: PartitionId, delay: Duration) {
        if let Some(p) = self
            .topics
            .write()
            .get_mut(topic)
            .and_then(|t| t.get_mut(&partition))
        {
            p.delay = delay;
        }
    }

    /// Make every later attempt to open a stream on this partition fail
    pub fn fail_open(&self, topic: &str, partition: PartitionId) {
        self.failing.write().insert((topic.to_string(), partition));
    }

    /// Streams currently open
    pub fn open_streams(&self) -> usize {
        self.counters.open.load(Ordering::Acquire)
    }

    /// Highest number of streams open at the same time
    pub fn peak_open_streams(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    pub fn streams_opened(&self) -> usize {
        self.counters.opened.load(Ordering::Acquire)
    }

    pub fn streams_closed(&self) -> usize {
        self.counters.closed.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn partition(&self, topic: &str, partition: PartitionId) -> Result<MemoryPartition> {
        let topics = self.topics.read();
        let partitions = topics.get(topic).ok_or_else(|| KcliError::TopicNotFound {
            topic: topic.to_string(),
        })?;
        partitions
            .get(&partition)
            .cloned()
            .ok_or_else(|| KcliError::metadata(format!("Unknown partition {}:{}", topic, partition)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(KcliError::connect("transport is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn list_topics(&self) -> Result<Vec<TopicName>> {
        self.ensure_open()?;
        Ok(self.topics.read().keys().cloned().collect())
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<PartitionId>> {
        self.ensure_open()?;
        let topics = self.topics.read();
        let partitions = topics.get(topic).ok_or_else(|| KcliError::TopicNotFound {
            topic: topic.to_string(),
        })?;
        Ok(partitions.keys().copied().collect())
    }

    async fn offset(&self, topic: &str, partition: PartitionId, spec: OffsetSpec) -> Result<Offset> {
        self.ensure_open()?;
        let p = self.partition(topic, partition)?;
        Ok(match spec {
            OffsetSpec::Earliest => p.start,
            OffsetSpec::Latest => p.end(),
        })
    }

    async fn open_stream(
        &self,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
    ) -> Result<Box<dyn MessageStream>> {
        self.ensure_open()?;
        if self.failing.read().contains(&(topic.to_string(), partition)) {
            return Err(KcliError::connect(format!(
                "cannot open stream for {}:{}",
                topic, partition
            )));
        }

        let data = self.partition(topic, partition)?;
        if offset < data.start || offset > data.end() {
            return Err(KcliError::metadata(format!(
                "Offset out of range: {} not in [{}, {}]",
                offset,
                data.start,
                data.end()
            )));
        }

        let open = self.counters.open.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(open, Ordering::AcqRel);
        self.counters.opened.fetch_add(1, Ordering::AcqRel);
        debug!("Opened memory stream {}:{} at offset {}", topic, partition, offset);

        Ok(Box::new(MemoryStream {
            data,
            next: offset,
            ready_at: None,
            counters: self.counters.clone(),
            released: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemoryStream {
    data: MemoryPartition,
    next: Offset,
    ready_at: Option<Instant>,
    counters: Arc<StreamCounters>,
    released: bool,
}

impl MemoryStream {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.open.fetch_sub(1, Ordering::AcqRel);
            self.counters.closed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next_message(&mut self) -> Result<RawMessage> {
        if self.released {
            return Err(KcliError::connect("stream is closed"));
        }

        if self.next >= self.data.end() {
            // parked at the head of the partition
            return std::future::pending().await;
        }

        if !self.data.delay.is_zero() {
            let at = *self
                .ready_at
                .get_or_insert_with(|| Instant::now() + self.data.delay);
            tokio::time::sleep_until(at).await;
            self.ready_at = None;
        }

        let index = (self.next - self.data.start) as usize;
        let value = self.data.messages[index].clone();
        let message = RawMessage {
            offset: self.next,
            key: None,
            value,
        };
        self.next += 1;
        Ok(message)
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metadata() {
        let transport = MemoryTransport::new();
        transport.create_topic("b-topic", 2);
        transport.set_partition("a-topic", 0, 5, ["x", "y", "z"]);

        assert_eq!(transport.list_topics().await.unwrap(), vec!["a-topic", "b-topic"]);
        assert_eq!(transport.partitions("b-topic").await.unwrap(), vec![0, 1]);
        assert_eq!(
            transport.offset("a-topic", 0, OffsetSpec::Earliest).await.unwrap(),
            5
        );
        assert_eq!(
            transport.offset("a-topic", 0, OffsetSpec::Latest).await.unwrap(),
            8
        );
        assert!(matches!(
            transport.partitions("missing").await,
            Err(KcliError::TopicNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_delivers_in_order_and_counts() {
        let transport = MemoryTransport::new();
        transport.set_partition("t", 0, 0, ["a", "b", "c"]);

        let mut stream = transport.open_stream("t", 0, 1).await.unwrap();
        assert_eq!(transport.open_streams(), 1);

        let first = stream.next_message().await.unwrap();
        assert_eq!((first.offset, first.value), (1, Bytes::from_static(b"b")));
        assert_eq!(stream.next_message().await.unwrap().offset, 2);

        // nothing left: the stream parks
        let parked = tokio::time::timeout(Duration::from_millis(20), stream.next_message()).await;
        assert!(parked.is_err());

        stream.close().await.unwrap();
        drop(stream);
        assert_eq!(transport.open_streams(), 0);
        assert_eq!(transport.streams_closed(), 1);
        assert_eq!(transport.peak_open_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_survives_cancelled_poll() {
        let transport = MemoryTransport::new();
        transport.set_partition("t", 0, 0, ["slow"]);
        transport.set_delay("t", 0, Duration::from_millis(300));

        let mut stream = transport.open_stream("t", 0, 0).await.unwrap();
        for _ in 0..2 {
            let poll = tokio::time::timeout(Duration::from_millis(100), stream.next_message()).await;
            assert!(poll.is_err());
        }
        let message = tokio::time::timeout(Duration::from_millis(150), stream.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.offset, 0);
    }

    #[tokio::test]
    async fn test_failure_injection_and_close() {
        let transport = MemoryTransport::new();
        transport.create_topic("t", 1);
        transport.fail_open("t", 0);

        assert!(matches!(
            transport.open_stream("t", 0, 0).await,
            Err(KcliError::Connect { .. })
        ));

        transport.close().await.unwrap();
        assert!(transport.list_topics().await.is_err());
    }
}
