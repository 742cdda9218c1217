//! # parley-core
//!
//! The broadcast hub at the heart of Parley.
//!
//! - **Hub** - single task that owns the member set and fans messages out
//! - **Subscriber** - one connection, driven by a read-pump and a write-pump
//! - **Mailbox** - bounded per-subscriber outbound queue
//! - **Tracer** - injected sink for lifecycle events
//!
//! ## Architecture
//!
//! ```text
//!                 join / leave / broadcast
//! ┌─────────────┐ ─────────────────────────▶ ┌─────────────┐
//! │  read-pump  │                            │  Hub loop   │
//! └─────────────┘                            └─────────────┘
//!        ▲                                          │ offer
//!        │ frames                                   ▼
//! ┌─────────────┐                            ┌─────────────┐
//! │  transport  │ ◀───────────────────────── │  Mailbox    │
//! └─────────────┘        write-pump          └─────────────┘
//! ```
//!
//! The member set is only ever touched by the hub loop. Everything else
//! reaches it through channels, so no lock guards it.

pub mod hub;
pub mod mailbox;
pub mod message;
pub mod subscriber;
pub mod tracer;

pub use hub::{
    Hub, HubConfig, HubError, HubHandle, HubStats, OverflowPolicy, SubscriberHandle, SubscriberId,
};
pub use mailbox::{mailbox, Mailbox, MailboxSender, Offer};
pub use message::Message;
pub use subscriber::{serve_connection, Subscriber};
pub use tracer::{NoopTracer, RecordingTracer, TraceEvent, Tracer, WriterTracer};
