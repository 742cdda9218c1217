//! Per-subscriber outbound queue.
//!
//! A mailbox has exactly one producer, the hub loop, and one consumer, the
//! subscriber's write-pump. The hub holds the only [`MailboxSender`] that is
//! ever registered, so dropping it on leave is what closes the mailbox; the
//! write-pump then drains whatever is buffered and sees the end of the queue.

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The payload was queued.
    Accepted,
    /// The mailbox is at capacity; the payload was not queued.
    Full,
    /// The consumer is gone; the payload was not queued.
    Gone,
}

/// Create a mailbox with room for `capacity` payloads (at least one).
#[must_use]
pub fn mailbox(capacity: usize) -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MailboxSender { tx }, Mailbox { rx })
}

/// Producer side of a mailbox. Not cloneable: dropping it closes the mailbox.
#[derive(Debug)]
pub struct MailboxSender {
    tx: mpsc::Sender<Bytes>,
}

impl MailboxSender {
    /// Try to enqueue a payload without waiting.
    pub fn offer(&self, payload: Bytes) -> Offer {
        match self.tx.try_send(payload) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Closed(_)) => Offer::Gone,
        }
    }
}

/// Consumer side of a mailbox, owned by the write-pump.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Bytes>,
}

impl Mailbox {
    /// Wait for the next payload.
    ///
    /// Returns `None` once every sender has been dropped and the buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take the next payload if one is buffered.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Number of buffered payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
