//! Broadcast request type.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hub::SubscriberId;

/// A unique message identifier.
pub type MessageId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A message submitted to the hub for fan-out.
///
/// Only the payload is delivered to mailboxes; the rest is bookkeeping for
/// logs and traces.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Subscriber whose read-pump produced the message.
    pub source: Option<SubscriberId>,
    /// Opaque payload, cheap to clone per recipient.
    pub payload: Bytes,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            source: None,
            payload: payload.into(),
            timestamp: now_millis(),
        }
    }

    /// Tag the message with the subscriber that sent it.
    #[must_use]
    pub fn with_source(mut self, source: SubscriberId) -> Self {
        self.source = Some(source);
        self
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
