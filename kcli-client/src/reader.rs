//! Streaming reads over a single partition

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::decoder::Decoder;
use crate::error::KcliError;
use crate::metrics::ClientMetrics;
use crate::partition::{Message, Partition};
use crate::transport::{MessageStream, RawMessage, Transport};
use crate::Result;

/// What a read does when the decoder rejects a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnDecodeError {
    /// Fail the read with [`KcliError::Decode`]
    #[default]
    Abort,
    /// End the read quietly, keeping what was produced so far
    StopSilently,
}

/// Returned by a visitor to continue or end a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Why a read loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The visitor asked to stop
    Stopped,
    /// The message just before `End` was read, or nothing was left to read
    EndOfPartition,
    /// The cancellation token fired
    Cancelled,
}

/// Everything a read needs, cheap to clone into worker tasks
#[derive(Clone)]
pub struct ReadContext {
    pub transport: Arc<dyn Transport>,
    pub decoder: Arc<dyn Decoder>,
    pub metrics: Arc<ClientMetrics>,
    /// Longest single wait for a message before re-polling
    pub poll_timeout: Duration,
}

/// Applies the caller's decoder with an explicit failure policy
pub struct MessageDecoder {
    decoder: Arc<dyn Decoder>,
    metrics: Arc<ClientMetrics>,
    topic: String,
    policy: OnDecodeError,
}

impl MessageDecoder {
    /// `Ok(None)` means the read should stop without an error
    pub fn decode(&self, value: Bytes) -> Result<Option<Bytes>> {
        match self.decoder.decode(&self.topic, value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                self.metrics.record_decode_error();
                match self.policy {
                    OnDecodeError::Abort => Err(e.into()),
                    OnDecodeError::StopSilently => {
                        debug!("Stopping read of {} after decode failure: {}", self.topic, e);
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// A dedicated stream on one partition, bounded by the partition's
/// `[offset, end)` window.
///
/// The stream is released by [`PartitionReader::close`] or, on any other exit
/// path, when the reader is dropped.
pub struct PartitionReader {
    ctx: ReadContext,
    partition: Partition,
    stream: Option<Box<dyn MessageStream>>,
    cancel: CancellationToken,
}

impl PartitionReader {
    /// Open a stream at `partition.offset`
    pub async fn open(
        ctx: ReadContext,
        partition: &Partition,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let stream = ctx
            .transport
            .open_stream(&partition.topic, partition.partition, partition.offset)
            .await?;
        ctx.metrics.record_stream_opened();
        debug!(
            "Opened stream {}:{} at offset {} (end {})",
            partition.topic, partition.partition, partition.offset, partition.end
        );

        Ok(Self {
            ctx,
            partition: partition.clone(),
            stream: Some(stream),
            cancel,
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Decoder for this partition's topic with the given policy
    pub fn message_decoder(&self, policy: OnDecodeError) -> MessageDecoder {
        MessageDecoder {
            decoder: self.ctx.decoder.clone(),
            metrics: self.ctx.metrics.clone(),
            topic: self.partition.topic.clone(),
            policy,
        }
    }

    /// Hand every message in the window to `visit`, in offset order.
    ///
    /// Each wait is bounded by the poll timeout; a timeout re-polls after
    /// checking the cancellation token, it never ends the read.
    pub async fn for_each<F>(&mut self, mut visit: F) -> Result<ReadEnd>
    where
        F: FnMut(RawMessage) -> Result<Visit>,
    {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| KcliError::connect("partition reader is closed"))?;

        let start = self.partition.offset;
        let end = self.partition.end;
        if start >= end {
            return Ok(ReadEnd::EndOfPartition);
        }

        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Read of {} cancelled", self.partition);
                    return Ok(ReadEnd::Cancelled);
                }
                result = stream.next_message() => result?,
                _ = tokio::time::sleep(self.ctx.poll_timeout) => {
                    self.ctx.metrics.record_poll_timeout();
                    trace!(
                        "No message from {}:{} within {:?}, polling again",
                        self.partition.topic, self.partition.partition, self.ctx.poll_timeout
                    );
                    continue;
                }
            };

            if message.offset < start {
                continue;
            }
            if message.offset >= end {
                return Ok(ReadEnd::EndOfPartition);
            }

            self.ctx.metrics.record_message(message.value.len() as u64);
            let last = message.offset == end - 1;
            if visit(message)? == Visit::Stop {
                return Ok(ReadEnd::Stopped);
            }
            if last {
                return Ok(ReadEnd::EndOfPartition);
            }
        }
    }

    /// Collect up to `count` messages whose raw payload satisfies `predicate`.
    ///
    /// Only matching messages are decoded; a decode failure fails the read.
    pub async fn read_until<P>(&mut self, count: usize, mut predicate: P) -> Result<Vec<Message>>
    where
        P: FnMut(&[u8]) -> bool,
    {
        let mut out = Vec::new();
        if count == 0 {
            return Ok(out);
        }

        let decoder = self.message_decoder(OnDecodeError::Abort);
        let source = self.partition.clone();
        self.for_each(|raw| {
            if predicate(&raw.value) {
                let Some(value) = decoder.decode(raw.value)? else {
                    return Ok(Visit::Stop);
                };
                out.push(Message::new(&source, raw.offset, value));
                if out.len() >= count {
                    return Ok(Visit::Stop);
                }
            }
            Ok(Visit::Continue)
        })
        .await?;

        Ok(out)
    }

    /// Release the stream
    pub async fn close(mut self) -> Result<()> {
        match self.stream.take() {
            Some(mut stream) => {
                let result = stream.close().await;
                self.ctx.metrics.record_stream_closed();
                debug!("Closed stream {}:{}", self.partition.topic, self.partition.partition);
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for PartitionReader {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            self.ctx.metrics.record_stream_closed();
            warn!(
                "Stream {}:{} released without close",
                self.partition.topic, self.partition.partition
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeError, PlainDecoder};
    use crate::memory::MemoryTransport;

    fn context(transport: Arc<MemoryTransport>) -> ReadContext {
        ReadContext {
            transport,
            decoder: Arc::new(PlainDecoder),
            metrics: Arc::default(),
            poll_timeout: Duration::from_millis(20),
        }
    }

    fn transport_with(messages: &[&'static str]) -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_partition("t", 0, 0, messages.iter().copied());
        transport
    }

    #[tokio::test]
    async fn test_read_until_stops_at_count() {
        let transport = transport_with(&["a1", "b1", "a2", "a3", "b2"]);
        let ctx = context(transport.clone());
        let partition = Partition::new("t", 0, 0, 5).unwrap();

        let mut reader = PartitionReader::open(ctx, &partition, CancellationToken::new())
            .await
            .unwrap();
        let messages = reader.read_until(2, |v| v.starts_with(b"a")).await.unwrap();
        reader.close().await.unwrap();

        let offsets: Vec<_> = messages.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 2]);
        assert_eq!(messages[1].value, Bytes::from_static(b"a2"));
        assert_eq!(transport.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_read_until_stops_at_end_of_partition() {
        // end below the stored head: messages at or past end are never emitted
        let transport = transport_with(&["m0", "m1", "m2", "m3"]);
        let ctx = context(transport);
        let partition = Partition::new("t", 0, 0, 4)
            .unwrap()
            .with_offset(1)
            .unwrap();
        let partition = Partition { end: 3, ..partition };

        let mut reader = PartitionReader::open(ctx, &partition, CancellationToken::new())
            .await
            .unwrap();
        let messages = reader.read_until(100, |_| true).await.unwrap();

        let offsets: Vec<_> = messages.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![1, 2]);
        assert!(messages.iter().all(|m| m.partition.end == 3));
    }

    #[tokio::test]
    async fn test_empty_window_returns_immediately() {
        let transport = transport_with(&["m0"]);
        let ctx = context(transport);
        let partition = Partition::new("t", 0, 0, 1).unwrap().with_offset(1).unwrap();

        let mut reader = PartitionReader::open(ctx, &partition, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            reader.for_each(|_| Ok(Visit::Continue)).await.unwrap(),
            ReadEnd::EndOfPartition
        );
    }

    #[tokio::test]
    async fn test_decode_failure_policies() {
        let transport = transport_with(&["ok", "bad", "ok"]);
        let mut ctx = context(transport);
        ctx.decoder = Arc::new(|topic: &str, data: Bytes| {
            if data.as_ref() == b"bad" {
                Err(DecodeError::new(topic, "corrupt"))
            } else {
                Ok(data)
            }
        });
        let partition = Partition::new("t", 0, 0, 3).unwrap();

        let mut reader = PartitionReader::open(ctx.clone(), &partition, CancellationToken::new())
            .await
            .unwrap();
        let err = reader.read_until(10, |_| true).await.unwrap_err();
        assert!(matches!(err, KcliError::Decode(_)));
        reader.close().await.unwrap();

        let mut reader = PartitionReader::open(ctx.clone(), &partition, CancellationToken::new())
            .await
            .unwrap();
        let decoder = reader.message_decoder(OnDecodeError::StopSilently);
        let mut seen = 0;
        let end = reader
            .for_each(|raw| {
                if decoder.decode(raw.value)?.is_none() {
                    return Ok(Visit::Stop);
                }
                seen += 1;
                Ok(Visit::Continue)
            })
            .await
            .unwrap();
        assert_eq!(end, ReadEnd::Stopped);
        assert_eq!(seen, 1);
        assert_eq!(ctx.metrics.snapshot().decode_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_repoll_until_cancelled() {
        let transport = Arc::new(MemoryTransport::new());
        transport.create_topic("t", 1);
        let ctx = context(transport);
        // claims a message that never arrives
        let partition = Partition {
            end: 1,
            ..Partition::new("t", 0, 0, 0).unwrap()
        };

        let cancel = CancellationToken::new();
        let mut reader = PartitionReader::open(ctx.clone(), &partition, cancel.clone())
            .await
            .unwrap();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(110)).await;
            cancel.cancel();
        });

        let end = reader.for_each(|_| Ok(Visit::Continue)).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(end, ReadEnd::Cancelled);
        assert!(ctx.metrics.snapshot().poll_timeouts >= 5);
    }

    #[tokio::test]
    async fn test_drop_releases_stream() {
        let transport = transport_with(&["m0"]);
        let ctx = context(transport.clone());
        let partition = Partition::new("t", 0, 0, 1).unwrap();

        let reader = PartitionReader::open(ctx.clone(), &partition, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ctx.metrics.snapshot().open_streams, 1);
        drop(reader);

        assert_eq!(transport.open_streams(), 0);
        assert_eq!(ctx.metrics.snapshot().open_streams, 0);
    }
}
