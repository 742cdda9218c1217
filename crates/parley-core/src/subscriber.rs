//! Subscriber pumps.
//!
//! A subscriber bridges one transport connection to the hub with two tasks:
//!
//! - the **read-pump** turns every inbound frame into a publish request
//! - the **write-pump** drains the subscriber's mailbox onto the transport
//!
//! Neither pump sees hub state. They stop each other through the mailbox
//! (closed by the hub after leave) and a per-subscriber cancellation token.
//! Either pump cancels the token when it exits; the hub cancels it when it
//! evicts the subscriber, and hub shutdown cancels every token.

use std::time::Duration;

use parley_transport::{Connection, FrameReader, FrameWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::hub::{HubError, HubHandle, SubscriberHandle, SubscriberId};
use crate::mailbox::{mailbox, Mailbox};
use crate::message::Message;

/// How long an orderly close may take before the writer is abandoned.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One connected participant.
pub struct Subscriber {
    id: SubscriberId,
    hub: HubHandle,
    conn: Box<dyn Connection>,
    mailbox: Mailbox,
    cancel: CancellationToken,
}

impl Subscriber {
    /// Create a subscriber for `conn` and register it with the hub.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub fn join(hub: &HubHandle, conn: Box<dyn Connection>) -> Result<Self, HubError> {
        let id = SubscriberId::next();
        let cancel = hub.shutdown_token().child_token();
        let (sender, mailbox) = mailbox(hub.mailbox_capacity());
        hub.join(SubscriberHandle::new(id, sender, cancel.clone()))?;

        debug!(
            subscriber = %id,
            remote = conn.remote_addr().as_deref().unwrap_or("unknown"),
            "Subscriber created"
        );

        Ok(Self {
            id,
            hub: hub.clone(),
            conn,
            mailbox,
            cancel,
        })
    }

    /// Run both pumps until the connection is finished.
    ///
    /// The write-pump runs on its own task; the read-pump runs on the
    /// caller's. Returns once both have exited.
    pub async fn run(self) {
        let Self {
            id,
            hub,
            conn,
            mailbox,
            cancel,
        } = self;
        let (reader, writer) = conn.split();

        let write_pump = tokio::spawn(write_pump(
            id,
            hub.clone(),
            writer,
            mailbox,
            cancel.clone(),
        ));
        read_pump(id, &hub, reader, &cancel).await;

        if let Err(e) = write_pump.await {
            error!(subscriber = %id, error = %e, "Write pump failed");
        }
        debug!(subscriber = %id, "Subscriber finished");
    }
}

/// Handle an accepted connection: join, pump until done, leave.
pub async fn serve_connection(hub: HubHandle, conn: Box<dyn Connection>) {
    match Subscriber::join(&hub, conn) {
        Ok(subscriber) => subscriber.run().await,
        Err(e) => warn!(error = %e, "Rejecting connection"),
    }
}

async fn read_pump(
    id: SubscriberId,
    hub: &HubHandle,
    mut reader: Box<dyn FrameReader>,
    cancel: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                trace!(subscriber = %id, "Read pump cancelled");
                break;
            }
            frame = reader.recv() => frame,
        };

        match frame {
            Ok(Some(payload)) => {
                trace!(subscriber = %id, bytes = payload.len(), "Frame received");
                let message = Message::new(payload).with_source(id);
                if hub.publish(message).await.is_err() {
                    debug!(subscriber = %id, "Hub stopped, ending read pump");
                    break;
                }
            }
            Ok(None) => {
                debug!(subscriber = %id, "Connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(subscriber = %id, error = %e, "Transport receive failed");
                break;
            }
        }
    }

    hub.leave(id);
    // Releases a write-pump parked on a stalled send
    cancel.cancel();
}

async fn write_pump(
    id: SubscriberId,
    hub: HubHandle,
    mut writer: Box<dyn FrameWriter>,
    mut mailbox: Mailbox,
    cancel: CancellationToken,
) {
    loop {
        // Buffered payloads go out before a pending cancellation is honored
        let next = tokio::select! {
            biased;
            payload = mailbox.recv() => payload,
            _ = cancel.cancelled() => None,
        };
        let Some(payload) = next else {
            break;
        };

        let sent = tokio::select! {
            sent = writer.send(payload) => sent,
            _ = cancel.cancelled() => {
                debug!(subscriber = %id, pending = mailbox.len(), "Send abandoned");
                break;
            }
        };
        if let Err(e) = sent {
            debug!(subscriber = %id, error = %e, "Transport write failed");
            hub.leave(id);
            cancel.cancel();
            return;
        }
    }

    // Mailbox closed by the hub, eviction, or shutdown
    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(subscriber = %id, error = %e, "Close after mailbox closed failed"),
        Err(_) => debug!(subscriber = %id, "Transport close timed out"),
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig, HubStats, OverflowPolicy};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parley_transport::memory::{self, MemoryPeer};
    use parley_transport::TransportError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    /// A peer that stopped reading: every send hangs forever. Inbound frames
    /// never arrive; the read side ends only when `hangup` fires.
    struct StalledConnection {
        hangup: oneshot::Receiver<()>,
        closed: Arc<AtomicBool>,
    }

    struct StalledReader {
        hangup: Option<oneshot::Receiver<()>>,
    }

    struct StalledWriter {
        closed: Arc<AtomicBool>,
    }

    impl Connection for StalledConnection {
        fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
            (
                Box::new(StalledReader {
                    hangup: Some(self.hangup),
                }),
                Box::new(StalledWriter {
                    closed: self.closed,
                }),
            )
        }
    }

    #[async_trait]
    impl FrameReader for StalledReader {
        async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
            if let Some(hangup) = self.hangup.take() {
                let _ = hangup.await;
            }
            Ok(None)
        }
    }

    #[async_trait]
    impl FrameWriter for StalledWriter {
        async fn send(&mut self, _payload: Bytes) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn connect_stalled(
        handle: &HubHandle,
    ) -> (JoinHandle<()>, oneshot::Sender<()>, Arc<AtomicBool>) {
        let (hangup_tx, hangup) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let conn = StalledConnection {
            hangup,
            closed: closed.clone(),
        };
        let task = tokio::spawn(serve_connection(handle.clone(), Box::new(conn)));
        (task, hangup_tx, closed)
    }

    fn connect(handle: &HubHandle) -> (JoinHandle<()>, MemoryPeer) {
        let (conn, peer) = memory::pair();
        let task = tokio::spawn(serve_connection(handle.clone(), Box::new(conn)));
        (task, peer)
    }

    async fn settle(handle: &HubHandle, done: impl FnMut(&HubStats) -> bool) {
        let mut stats = handle.watch_stats();
        tokio::time::timeout(WAIT, stats.wait_for(done))
            .await
            .expect("hub did not settle")
            .unwrap();
    }

    async fn recv(peer: &mut MemoryPeer) -> Option<Bytes> {
        tokio::time::timeout(WAIT, peer.recv())
            .await
            .expect("nothing written to peer")
    }

    #[tokio::test]
    async fn test_message_is_echoed_to_all_peers() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = hub.spawn();

        let (_task_a, mut a) = connect(&handle);
        let (_task_b, mut b) = connect(&handle);
        settle(&handle, |s| s.members == 2).await;

        a.send("hello").unwrap();
        assert_eq!(recv(&mut a).await, Some(Bytes::from("hello")));
        assert_eq!(recv(&mut b).await, Some(Bytes::from("hello")));

        settle(&handle, |s| s.delivered == 2).await;
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());

        handle.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_per_sender_order_is_preserved() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = hub.spawn();

        let (_task_a, a) = connect(&handle);
        let (_task_b, mut b) = connect(&handle);
        settle(&handle, |s| s.members == 2).await;

        for i in 0..100 {
            a.send(format!("msg-{}", i)).unwrap();
        }
        for i in 0..100 {
            assert_eq!(recv(&mut b).await, Some(Bytes::from(format!("msg-{}", i))));
        }

        handle.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_peer_leaves_and_gets_nothing_more() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = hub.spawn();

        let (task_a, mut a) = connect(&handle);
        let (_task_b, mut b) = connect(&handle);
        settle(&handle, |s| s.members == 2).await;

        a.close();
        settle(&handle, |s| s.members == 1).await;
        tokio::time::timeout(WAIT, task_a)
            .await
            .expect("subscriber still running")
            .unwrap();
        // Write side was shut down in order
        assert_eq!(recv(&mut a).await, None);

        b.send("x").unwrap();
        assert_eq!(recv(&mut b).await, Some(Bytes::from("x")));
        settle(&handle, |s| s.published == 1).await;
        assert_eq!(handle.stats().delivered, 1);

        handle.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_peer_is_removed() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = hub.spawn();

        let (task_a, a) = connect(&handle);
        settle(&handle, |s| s.members == 1).await;

        drop(a);
        settle(&handle, |s| s.members == 0).await;
        tokio::time::timeout(WAIT, task_a)
            .await
            .expect("subscriber still running")
            .unwrap();

        handle.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_unwinds_all_pumps() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = hub.spawn();

        let (task_a, mut a) = connect(&handle);
        let (task_b, mut b) = connect(&handle);
        settle(&handle, |s| s.members == 2).await;

        handle.shutdown();
        hub_task.await.unwrap();

        for task in [task_a, task_b] {
            tokio::time::timeout(WAIT, task)
                .await
                .expect("subscriber still running")
                .unwrap();
        }
        assert_eq!(recv(&mut a).await, None);
        assert_eq!(recv(&mut b).await, None);
    }

    #[tokio::test]
    async fn test_evicted_subscriber_with_stalled_peer_is_disconnected() {
        let config = HubConfig {
            mailbox_capacity: 1,
            overflow: OverflowPolicy::Disconnect,
            ..Default::default()
        };
        let (hub, handle) = Hub::new(config);
        let hub_task = hub.spawn();

        let (task, _hangup, closed) = connect_stalled(&handle);
        settle(&handle, |s| s.members == 1).await;

        for i in 0..5 {
            handle.publish(Message::new(format!("m-{}", i))).await.unwrap();
        }
        settle(&handle, |s| s.evicted == 1).await;

        tokio::time::timeout(WAIT, task)
            .await
            .expect("evicted subscriber still running")
            .unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(handle.stats().members, 0);

        handle.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_side_exit_releases_stalled_writer() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = hub.spawn();

        let (task, hangup, closed) = connect_stalled(&handle);
        settle(&handle, |s| s.members == 1).await;

        // The write-pump picks this up and parks on the send
        handle.publish(Message::new("stuck")).await.unwrap();
        settle(&handle, |s| s.delivered == 1).await;

        hangup.send(()).unwrap();
        settle(&handle, |s| s.members == 0).await;
        tokio::time::timeout(WAIT, task)
            .await
            .expect("subscriber still running")
            .unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(handle.stats().evicted, 0);

        handle.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_hub_rejects_connection() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = hub.spawn();
        handle.shutdown();
        hub_task.await.unwrap();

        let (conn, _peer) = memory::pair();
        assert!(Subscriber::join(&handle, Box::new(conn)).is_err());

        let (task, mut peer) = connect(&handle);
        tokio::time::timeout(WAIT, task)
            .await
            .expect("rejected connection still running")
            .unwrap();
        assert_eq!(recv(&mut peer).await, None);
    }
}
