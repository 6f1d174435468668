//! Key-press debouncing.
//!
//! CEC adapters report a key as a stream of (code, duration) callbacks:
//! duration 0 while the key is going down or auto-repeating, a positive
//! duration once it is released. The debouncer collapses that stream
//! into one enduring event per physical press, or a single discrete
//! event when only the release edge was seen.

use crate::backend::KeyPress;
use crate::events::{Event, EventSink};
use crate::keymap::KeyCode;
use std::sync::Arc;

/// Per-adapter key state machine. At most one enduring key event is
/// outstanding at a time; a different key always ends the previous one
/// before emitting anything of its own.
pub struct KeyDebouncer {
    source: String,
    sink: Arc<dyn EventSink>,
    last: Option<KeyCode>,
}

impl KeyDebouncer {
    pub fn new(source: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        KeyDebouncer {
            source: source.into(),
            sink,
            last: None,
        }
    }

    /// Feed one raw callback through the state machine.
    pub fn handle(&mut self, press: KeyPress) {
        let key = press.code;
        if press.duration.is_zero() {
            if self.last == Some(key) {
                // Hardware auto-repeat of the held key.
                return;
            }
            self.end_outstanding();
            self.last = Some(key);
            self.sink
                .emit(Event::enduring_start(&self.source, event_name(key)));
        } else if self.last == Some(key) {
            self.last = None;
            self.sink
                .emit(Event::enduring_end(&self.source, event_name(key)));
        } else {
            // Release edge of a press whose down edge was never seen:
            // a short tap the adapter reported in one message.
            self.end_outstanding();
            self.sink.emit(Event::discrete(&self.source, event_name(key)));
        }
    }

    fn end_outstanding(&mut self) {
        if let Some(previous) = self.last.take() {
            self.sink
                .emit(Event::enduring_end(&self.source, event_name(previous)));
        }
    }
}

fn event_name(key: KeyCode) -> String {
    format!("KeyPressed.{key}")
}
