//! Lifecycle tracing for the hub.
//!
//! A [`Tracer`] is handed to the hub at construction and called at four
//! points: join, leave, broadcast received, and broadcast forwarded to one
//! subscriber. It only observes; swapping one tracer for another never changes
//! what the hub does.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::hub::SubscriberId;

/// A lifecycle event emitted by the hub loop.
#[derive(Debug, Clone, Copy)]
pub enum TraceEvent<'a> {
    /// A subscriber was added to the member set.
    Joined(SubscriberId),
    /// A subscriber was removed and its mailbox closed.
    Left(SubscriberId),
    /// A broadcast request was taken off the broadcast channel.
    Received {
        /// Sending subscriber, if known.
        source: Option<SubscriberId>,
        /// The payload about to be fanned out.
        payload: &'a [u8],
    },
    /// A payload was queued into one subscriber's mailbox.
    Forwarded(SubscriberId),
}

impl fmt::Display for TraceEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined(id) => write!(f, "New client joined: {}", id),
            Self::Left(id) => write!(f, "Client left: {}", id),
            Self::Received { source, payload } => {
                let text = String::from_utf8_lossy(payload);
                match source {
                    Some(id) => write!(f, "Message received from {}: {}", id, text),
                    None => write!(f, "Message received: {}", text),
                }
            }
            Self::Forwarded(id) => write!(f, " -- sent to {}", id),
        }
    }
}

/// Sink for hub lifecycle events.
pub trait Tracer: Send {
    /// Record one event.
    fn trace(&mut self, event: &TraceEvent<'_>);
}

/// A tracer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn trace(&mut self, _event: &TraceEvent<'_>) {}
}

/// Get a tracer that does nothing.
#[must_use]
pub fn off() -> Box<dyn Tracer> {
    Box::new(NoopTracer)
}

/// A tracer writing one line per event to an output stream.
///
/// Write errors are ignored.
#[derive(Debug)]
pub struct WriterTracer<W> {
    out: W,
}

impl<W: Write + Send> WriterTracer<W> {
    /// Trace into the given writer.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Consume the tracer and return the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl WriterTracer<io::Stdout> {
    /// Trace to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Tracer for WriterTracer<W> {
    fn trace(&mut self, event: &TraceEvent<'_>) {
        let _ = writeln!(self.out, "{}", event);
    }
}

/// A tracer that keeps rendered events in memory.
///
/// Clones share the same buffer, so a test can hand one clone to the hub and
/// inspect the other.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracer {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingTracer {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded lines.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Tracer for RecordingTracer {
    fn trace(&mut self, event: &TraceEvent<'_>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_tracer_writes_lines() {
        let id = SubscriberId::next();
        let mut tracer = WriterTracer::new(Vec::new());
        tracer.trace(&TraceEvent::Joined(id));
        tracer.trace(&TraceEvent::Received {
            source: None,
            payload: b"hello",
        });

        let out = String::from_utf8(tracer.into_inner()).unwrap();
        assert_eq!(
            out,
            format!("New client joined: {}\nMessage received: hello\n", id)
        );
    }

    #[test]
    fn test_noop_tracer_is_silent() {
        let mut tracer = off();
        tracer.trace(&TraceEvent::Left(SubscriberId::next()));
    }

    #[test]
    fn test_recording_tracer_shares_buffer() {
        let recorder = RecordingTracer::new();
        let mut handle = recorder.clone();
        let id = SubscriberId::next();
        handle.trace(&TraceEvent::Forwarded(id));

        assert_eq!(recorder.events(), vec![format!(" -- sent to {}", id)]);
    }
}
