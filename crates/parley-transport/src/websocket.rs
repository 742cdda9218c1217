//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`]. Text and binary frames are both
//! surfaced as opaque payloads; control frames never reach the hub.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{Connection, FrameReader, FrameWriter, TransportError};

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// An upgraded WebSocket connection.
pub struct WebSocketConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            socket,
            remote_addr,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the maximum inbound message size.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl Connection for WebSocketConnection {
    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.socket.split();
        let reader = WebSocketReader {
            stream,
            max_message_size: self.max_message_size,
        };
        let writer = WebSocketWriter {
            sink,
            closed: false,
        };
        (Box::new(reader), Box::new(writer))
    }
}

struct WebSocketReader {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketReader {
    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                size, self.max_message_size
            );
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(Bytes::from(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by the protocol layer
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match std::str::from_utf8(&payload) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(payload.to_vec()),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
