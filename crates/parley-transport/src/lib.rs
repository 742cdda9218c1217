//! # parley-transport
//!
//! Transport adapter layer for the Parley broadcast hub.
//!
//! The hub never talks to sockets directly. A transport upgrades an inbound
//! request to a persistent, message-framed connection and hands it over as a
//! [`Connection`], which splits into a [`FrameReader`] for the read-pump and a
//! [`FrameWriter`] for the write-pump.
//!
//! - **WebSocket** - axum upgrade, text frames in and out
//! - **Memory** - channel-backed pair for tests and benchmarks
//!
//! ```rust,ignore
//! use parley_transport::Connection;
//!
//! async fn echo(conn: Box<dyn Connection>) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(Some(payload)) = reader.recv().await {
//!         if writer.send(payload).await.is_err() {
//!             break;
//!         }
//!     }
//!     let _ = writer.close().await;
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
