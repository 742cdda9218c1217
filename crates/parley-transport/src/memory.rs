//! In-memory transport.
//!
//! A [`MemoryConnection`] behaves like an accepted socket, and the matching
//! [`MemoryPeer`] plays the remote client. Both directions are unbounded
//! channels, so nothing here ever applies backpressure.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{Connection, FrameReader, FrameWriter, TransportError};

/// Create a connected pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();

    let conn = MemoryConnection {
        inbound: from_peer,
        outbound: to_peer,
    };
    let peer = MemoryPeer {
        tx: Some(to_server),
        rx: from_server,
    };
    (conn, peer)
}

/// Server side of an in-memory pair.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Bytes>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Connection for MemoryConnection {
    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let reader = MemoryReader { rx: self.inbound };
        let writer = MemoryWriter {
            tx: Some(self.outbound),
        };
        (Box::new(reader), Box::new(writer))
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(payload)
            .map_err(|_| TransportError::SendFailed("peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }
}

/// Client side of an in-memory pair.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryPeer {
    /// Send a frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer was closed or the server side is gone.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(payload.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next frame written by the server side.
    ///
    /// Returns `None` once the server closed its write side.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Close the client's sending direction, as a close frame would.
    pub fn close(&mut self) {
        self.tx.take();
    }
}
