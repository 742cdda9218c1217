//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::HubStats;
use parley_transport::{Connection, FrameReader, FrameWriter, TransportError};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const MESSAGES_TOTAL: &str = "parley_messages_total";
    pub const MESSAGES_BYTES: &str = "parley_messages_bytes";
    pub const HUB_MEMBERS: &str = "parley_hub_members";
    pub const HUB_PUBLISHED: &str = "parley_hub_published";
    pub const HUB_DELIVERED: &str = "parley_hub_delivered";
    pub const HUB_DROPPED: &str = "parley_hub_dropped";
    pub const HUB_EVICTED: &str = "parley_hub_evicted";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages received");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages received");
    metrics::describe_gauge!(names::HUB_MEMBERS, "Current number of hub members");
    metrics::describe_counter!(names::HUB_PUBLISHED, "Messages published to the hub");
    metrics::describe_counter!(names::HUB_DELIVERED, "Payloads queued into mailboxes");
    metrics::describe_counter!(
        names::HUB_DROPPED,
        "Payloads dropped because a mailbox was full"
    );
    metrics::describe_counter!(
        names::HUB_EVICTED,
        "Subscribers disconnected for a full mailbox"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message received from a client.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Mirror a hub statistics snapshot. Totals are counters, membership a gauge.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::HUB_MEMBERS).set(stats.members as f64);
    counter!(names::HUB_PUBLISHED).absolute(stats.published);
    counter!(names::HUB_DELIVERED).absolute(stats.delivered);
    counter!(names::HUB_DROPPED).absolute(stats.dropped);
    counter!(names::HUB_EVICTED).absolute(stats.evicted);
}

/// Follow hub statistics until the hub stops.
pub async fn watch_hub(mut stats: watch::Receiver<HubStats>) {
    while stats.changed().await.is_ok() {
        let snapshot = stats.borrow_and_update().clone();
        record_hub_stats(&snapshot);
    }
}

/// Connection wrapper that counts inbound frames.
pub struct MeteredConnection {
    inner: Box<dyn Connection>,
}

impl MeteredConnection {
    /// Wrap a connection.
    #[must_use]
    pub fn new(inner: Box<dyn Connection>) -> Self {
        Self { inner }
    }
}

impl Connection for MeteredConnection {
    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (reader, writer) = self.inner.split();
        (Box::new(MeteredReader { inner: reader }), writer)
    }
}

struct MeteredReader {
    inner: Box<dyn FrameReader>,
}

#[async_trait]
impl FrameReader for MeteredReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let frame = self.inner.recv().await?;
        if let Some(payload) = &frame {
            record_message(payload.len(), "inbound");
        }
        Ok(frame)
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use parley_transport::memory;

    fn counter_value(recorder: &DebuggingRecorder, name: &str) -> u64 {
        recorder
            .snapshotter()
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == name)
            .map(|(.., value)| match value {
                DebugValue::Counter(v) => v,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_metered_connection_counts_inbound_frames() {
        let recorder = DebuggingRecorder::new();
        let (conn, mut peer) = memory::pair();
        let conn: Box<dyn Connection> = Box::new(MeteredConnection::new(Box::new(conn)));
        let (mut reader, _writer) = conn.split();

        peer.send("hello").unwrap();
        peer.send("hi").unwrap();
        peer.close();

        // Frames are already queued, so each recv is ready on first poll
        let frames = metrics::with_local_recorder(&recorder, || {
            let mut frames = Vec::new();
            while let Some(frame) = reader.recv().now_or_never().unwrap().unwrap() {
                frames.push(frame);
            }
            frames
        });

        assert_eq!(frames, vec![Bytes::from("hello"), Bytes::from("hi")]);
        assert_eq!(counter_value(&recorder, names::MESSAGES_TOTAL), 2);
        assert_eq!(counter_value(&recorder, names::MESSAGES_BYTES), 7);
    }

    #[test]
    fn test_hub_totals_are_counters() {
        let recorder = DebuggingRecorder::new();
        metrics::with_local_recorder(&recorder, || {
            record_hub_stats(&HubStats {
                members: 2,
                published: 5,
                delivered: 9,
                dropped: 1,
                evicted: 1,
            });
        });

        assert_eq!(counter_value(&recorder, names::HUB_PUBLISHED), 5);
        assert_eq!(counter_value(&recorder, names::HUB_DELIVERED), 9);
        assert_eq!(counter_value(&recorder, names::HUB_EVICTED), 1);
    }

    #[test]
    fn test_metrics_guard() {
        // No recorder installed, so this only checks nothing panics
        let _guard = ConnectionMetricsGuard::new();
        record_hub_stats(&HubStats::default());
    }

    #[tokio::test]
    async fn test_watch_hub_ends_with_sender() {
        let (tx, rx) = watch::channel(HubStats::default());
        let task = tokio::spawn(watch_hub(rx));
        tx.send_replace(HubStats {
            members: 3,
            ..Default::default()
        });
        drop(tx);
        task.await.unwrap();
    }
}
