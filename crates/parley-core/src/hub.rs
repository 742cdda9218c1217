//! The broadcast hub.
//!
//! [`Hub`] is a single task that owns the member set. It is reached only
//! through three control channels (join, leave, broadcast) exposed by the
//! cloneable [`HubHandle`]. Because nothing else can see the member set,
//! there is nothing to lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::mailbox::{MailboxSender, Offer};
use crate::message::Message;
use crate::tracer::{self, TraceEvent, Tracer};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a subscriber within the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a fresh, process-unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What the hub keeps for each member: its id, the producer side of its
/// mailbox, and the token that stops its pumps.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    mailbox: MailboxSender,
    cancel: CancellationToken,
}

impl SubscriberHandle {
    /// Create a handle.
    ///
    /// `cancel` is cancelled if the hub evicts the member, so pumps stuck on
    /// a stalled transport are released.
    #[must_use]
    pub fn new(id: SubscriberId, mailbox: MailboxSender, cancel: CancellationToken) -> Self {
        Self {
            id,
            mailbox,
            cancel,
        }
    }
}

struct Member {
    mailbox: MailboxSender,
    cancel: CancellationToken,
}

/// What to do when a member's mailbox is full at fan-out time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Skip this message for that member only.
    #[default]
    Drop,
    /// Remove the member, close its mailbox and stop its connection.
    Disconnect,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each subscriber's mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the broadcast request channel.
    pub broadcast_capacity: usize,
    /// Full-mailbox policy.
    pub overflow: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            broadcast_capacity: 1024,
            overflow: OverflowPolicy::Drop,
        }
    }
}

/// Hub errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The hub loop has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// Counters published by the hub loop after every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Current number of members.
    pub members: usize,
    /// Broadcast requests processed.
    pub published: u64,
    /// Payloads queued into mailboxes.
    pub delivered: u64,
    /// Payloads not queued because a mailbox was full or its consumer gone.
    pub dropped: u64,
    /// Members removed for having a full mailbox.
    pub evicted: u64,
}

enum Request {
    Join(SubscriberHandle),
    Leave(SubscriberId),
    Broadcast(Message),
}

/// Cloneable entry point to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    join_tx: mpsc::UnboundedSender<SubscriberHandle>,
    leave_tx: mpsc::UnboundedSender<SubscriberId>,
    broadcast_tx: mpsc::Sender<Message>,
    stats: watch::Receiver<HubStats>,
    mailbox_capacity: usize,
    shutdown: CancellationToken,
}

impl HubHandle {
    /// Ask the hub to add a member. Joining twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub fn join(&self, subscriber: SubscriberHandle) -> Result<(), HubError> {
        self.join_tx.send(subscriber).map_err(|_| HubError::Closed)
    }

    /// Ask the hub to remove a member and close its mailbox.
    ///
    /// Leaving twice, or leaving a stopped hub, is a no-op.
    pub fn leave(&self, id: SubscriberId) {
        if self.leave_tx.send(id).is_err() {
            trace!(subscriber = %id, "Leave after hub stopped");
        }
    }

    /// Submit a message for fan-out to every current member.
    ///
    /// Waits only while the broadcast channel itself is full.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn publish(&self, message: Message) -> Result<(), HubError> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Latest statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.stats.borrow().clone()
    }

    /// Subscribe to statistics updates.
    #[must_use]
    pub fn watch_stats(&self) -> watch::Receiver<HubStats> {
        self.stats.clone()
    }

    /// Capacity new subscribers should give their mailbox.
    #[must_use]
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    /// Stop the hub loop. Every mailbox is closed as the loop exits.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the hub shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// The coordinating loop and the member set it owns.
pub struct Hub {
    members: HashMap<SubscriberId, Member>,
    join_rx: mpsc::UnboundedReceiver<SubscriberHandle>,
    leave_rx: mpsc::UnboundedReceiver<SubscriberId>,
    broadcast_rx: mpsc::Receiver<Message>,
    tracer: Box<dyn Tracer>,
    overflow: OverflowPolicy,
    stats: HubStats,
    stats_tx: watch::Sender<HubStats>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    ///
    /// Nothing happens until [`Hub::run`] is polled.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        info!("Creating hub with config: {:?}", config);

        let (join_tx, join_rx) = mpsc::unbounded_channel();
        let (leave_tx, leave_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let (stats_tx, stats_rx) = watch::channel(HubStats::default());
        let shutdown = CancellationToken::new();

        let hub = Self {
            members: HashMap::new(),
            join_rx,
            leave_rx,
            broadcast_rx,
            tracer: tracer::off(),
            overflow: config.overflow,
            stats: HubStats::default(),
            stats_tx,
            shutdown: shutdown.clone(),
        };
        let handle = HubHandle {
            join_tx,
            leave_tx,
            broadcast_tx,
            stats: stats_rx,
            mailbox_capacity: config.mailbox_capacity.max(1),
            shutdown,
        };
        (hub, handle)
    }

    /// Replace the tracer.
    #[must_use]
    pub fn with_tracer(mut self, tracer: impl Tracer + 'static) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Run the loop on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process control requests until shutdown.
    ///
    /// Join and leave are served ahead of broadcast, so a membership change
    /// sent before a publish is applied before it. The loop also ends once
    /// every handle has been dropped.
    pub async fn run(mut self) {
        debug!(overflow = ?self.overflow, "Hub loop started");

        loop {
            let request = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("Hub shutdown requested");
                    break;
                }
                subscriber = self.join_rx.recv() => match subscriber {
                    Some(subscriber) => Request::Join(subscriber),
                    // Every handle owns all three senders
                    None => {
                        debug!("All hub handles dropped");
                        break;
                    }
                },
                Some(id) = self.leave_rx.recv() => Request::Leave(id),
                Some(message) = self.broadcast_rx.recv() => Request::Broadcast(message),
            };

            match request {
                Request::Join(subscriber) => self.join(subscriber),
                Request::Leave(id) => {
                    self.leave(id);
                }
                Request::Broadcast(message) => self.broadcast(message),
            }
            self.stats_tx.send_replace(self.stats.clone());
        }

        self.close_all();
        self.stats_tx.send_replace(self.stats.clone());
        info!(
            published = self.stats.published,
            delivered = self.stats.delivered,
            dropped = self.stats.dropped,
            "Hub stopped"
        );
    }

    fn join(&mut self, subscriber: SubscriberHandle) {
        let id = subscriber.id;
        match self.members.entry(id) {
            Entry::Occupied(_) => {
                trace!(subscriber = %id, "Duplicate join ignored");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(Member {
                    mailbox: subscriber.mailbox,
                    cancel: subscriber.cancel,
                });
            }
        }

        self.stats.members = self.members.len();
        self.tracer.trace(&TraceEvent::Joined(id));
        debug!(subscriber = %id, members = self.members.len(), "Subscriber joined");
    }

    /// Returns the removed member, its mailbox already closed.
    fn leave(&mut self, id: SubscriberId) -> Option<CancellationToken> {
        // Removal first: the sender is dropped, closing the mailbox, only
        // once it can no longer be reached by a broadcast.
        let Some(Member { mailbox, cancel }) = self.members.remove(&id) else {
            trace!(subscriber = %id, "Leave for non-member ignored");
            return None;
        };
        drop(mailbox);

        self.stats.members = self.members.len();
        self.tracer.trace(&TraceEvent::Left(id));
        debug!(subscriber = %id, members = self.members.len(), "Subscriber left");
        Some(cancel)
    }

    fn broadcast(&mut self, message: Message) {
        self.stats.published += 1;
        self.tracer.trace(&TraceEvent::Received {
            source: message.source,
            payload: &message.payload,
        });

        let mut evict = Vec::new();
        let mut recipients = 0usize;

        for (id, member) in &self.members {
            match member.mailbox.offer(message.payload.clone()) {
                Offer::Accepted => {
                    recipients += 1;
                    self.stats.delivered += 1;
                    self.tracer.trace(&TraceEvent::Forwarded(*id));
                }
                Offer::Full => {
                    self.stats.dropped += 1;
                    match self.overflow {
                        OverflowPolicy::Drop => {
                            debug!(subscriber = %id, message = message.id, "Mailbox full, message dropped");
                        }
                        OverflowPolicy::Disconnect => evict.push(*id),
                    }
                }
                Offer::Gone => {
                    // Write-pump already exited; its leave is on the way
                    self.stats.dropped += 1;
                    trace!(subscriber = %id, "Mailbox consumer gone");
                }
            }
        }

        for id in evict {
            warn!(subscriber = %id, "Mailbox full, disconnecting slow subscriber");
            if let Some(cancel) = self.leave(id) {
                // The write-pump may be parked on a send that never completes
                cancel.cancel();
                self.stats.evicted += 1;
            }
        }

        trace!(
            message = message.id,
            source = ?message.source,
            bytes = message.payload_size(),
            timestamp = message.timestamp,
            recipients,
            "Broadcast complete"
        );
    }

    fn close_all(&mut self) {
        let count = self.members.len();
        for (id, member) in self.members.drain() {
            drop(member);
            self.tracer.trace(&TraceEvent::Left(id));
        }
        self.stats.members = 0;
        debug!(closed = count, "Closed all mailboxes");
    }
}
