//! Transport abstraction traits for Parley.
//!
//! A connection is split in two halves so that the read side and the write
//! side can be driven by independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An accepted, message-framed connection.
pub trait Connection: Send {
    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split the connection into independently owned read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

/// The inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next payload.
    ///
    /// Returns `None` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one payload as a single frame.
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Shut down the write side. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}
