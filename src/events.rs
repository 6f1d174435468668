//! Gateway events and the sink they are delivered through.
//!
//! Every state change observed by a poll loop and every debounced key
//! press becomes one [`Event`]. Consumers receive events through an
//! [`EventSink`]; the binary uses a channel-backed sink feeding its main
//! loop, tests use [`CollectingSink`].

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// How an event relates to time: a one-shot occurrence, or the start/end
/// of a held (enduring) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Discrete,
    EnduringStart,
    EnduringEnd,
}

/// One named gateway event, e.g. `Living Room.Volume.12`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Adapter name the event originated from.
    pub source: String,
    /// Dotted event name below the adapter, e.g. `Volume.12`.
    pub name: String,
    pub kind: EventKind,
    pub at: DateTime<Local>,
}

impl Event {
    pub fn discrete(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(source, name, EventKind::Discrete)
    }

    pub fn enduring_start(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(source, name, EventKind::EnduringStart)
    }

    pub fn enduring_end(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(source, name, EventKind::EnduringEnd)
    }

    fn new(source: impl Into<String>, name: impl Into<String>, kind: EventKind) -> Self {
        Event {
            source: source.into(),
            name: name.into(),
            kind,
            at: Local::now(),
        }
    }

    /// Full display form, `<AdapterName>.<Field>.<NewValue>`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.source, self.name)
    }
}

/// Destination for gateway events. Implementations must be cheap and
/// non-blocking; they are called from poll tasks and backend callback
/// threads.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink forwarding events into an unbounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        ChannelSink { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // Receiver gone means the gateway is shutting down; drop silently.
        let _ = self.tx.send(event);
    }
}

/// Sink buffering events in memory. Used by tests and available to
/// library consumers that want to poll instead of subscribe.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return everything emitted so far.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Full names of buffered events, without draining.
    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(Event::full_name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}
