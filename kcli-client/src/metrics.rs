//! Metrics collection for the kcli client

use std::sync::atomic::{AtomicU64, Ordering};

/// Client metrics collector
#[derive(Debug, Default)]
pub struct ClientMetrics {
    // Reader metrics
    pub messages_read: AtomicU64,
    pub bytes_read: AtomicU64,
    pub decode_errors: AtomicU64,
    pub poll_timeouts: AtomicU64,

    // Stream metrics
    pub streams_opened: AtomicU64,
    pub streams_closed: AtomicU64,
    pub open_streams: AtomicU64,
    pub peak_open_streams: AtomicU64,

    // Search metrics
    pub searches_started: AtomicU64,
    pub matches_found: AtomicU64,

    // Connection metrics
    pub connections_created: AtomicU64,
    pub connections_failed: AtomicU64,
}

impl ClientMetrics {
    /// Record one message pulled from a partition stream
    pub fn record_message(&self, byte_count: u64) {
        self.messages_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a poll that waited the full timeout without a message
    pub fn record_poll_timeout(&self) {
        self.poll_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        let open = self.open_streams.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_open_streams.fetch_max(open, Ordering::AcqRel);
    }

    pub fn record_stream_closed(&self) {
        self.streams_closed.fetch_add(1, Ordering::Relaxed);
        self.open_streams.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn record_search_started(&self) {
        self.searches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful connection
    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed connection
    pub fn record_connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_read: self.messages_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            poll_timeouts: self.poll_timeouts.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_closed: self.streams_closed.load(Ordering::Relaxed),
            open_streams: self.open_streams.load(Ordering::Relaxed),
            peak_open_streams: self.peak_open_streams.load(Ordering::Relaxed),
            searches_started: self.searches_started.load(Ordering::Relaxed),
            matches_found: self.matches_found.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_read: u64,
    pub bytes_read: u64,
    pub decode_errors: u64,
    pub poll_timeouts: u64,
    pub streams_opened: u64,
    pub streams_closed: u64,
    pub open_streams: u64,
    pub peak_open_streams: u64,
    pub searches_started: u64,
    pub matches_found: u64,
    pub connections_created: u64,
    pub connections_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_gauge_tracks_peak() {
        let metrics = ClientMetrics::default();
        metrics.record_stream_opened();
        metrics.record_stream_opened();
        metrics.record_stream_closed();
        metrics.record_stream_opened();
        metrics.record_stream_closed();
        metrics.record_stream_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.streams_opened, 3);
        assert_eq!(snapshot.streams_closed, 3);
        assert_eq!(snapshot.open_streams, 0);
        assert_eq!(snapshot.peak_open_streams, 2);
    }

    #[test]
    fn test_message_counters() {
        let metrics = ClientMetrics::default();
        metrics.record_message(5);
        metrics.record_message(7);
        metrics.record_poll_timeout();
        metrics.record_decode_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_read, 2);
        assert_eq!(snapshot.bytes_read, 12);
        assert_eq!(snapshot.poll_timeouts, 1);
        assert_eq!(snapshot.decode_errors, 1);
    }
}
