// Event value and the field-accumulation state machine behind dispatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::parser::Field;

/// An event dispatched to subscribers.
///
/// `event_type` is empty for unnamed events (the "message" bucket).
/// `data` joins the block's `data:` values with single newlines, without a
/// trailing newline. `last_event_id` is the stream-global most recent
/// NUL-free `id:` value observed up to and including this event's block —
/// it persists across events and across reconnections.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub data: String,
    pub last_event_id: String,
}

/// Accumulates parsed fields into events.
///
/// One builder lives for the whole logical connection: `last_event_id` and
/// the server-suggested reconnection time survive reconnects, while the
/// per-event scratch is cleared between physical connections via
/// [`reset_scratch`](Self::reset_scratch).
///
/// A block produces an event only if at least one field actually took
/// effect in it (comments never count, nor do ignored `id:`/`retry:`
/// values), so blocks carrying only `retry:` or `id:` updates still emit an
/// event with empty data, and comment-only keep-alive blocks emit nothing.
#[derive(Debug, Default)]
pub struct EventBuilder {
    data: String,
    event_type: String,
    last_event_id: String,
    reconnection_time: Option<Duration>,
    dirty: bool,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one parsed field. Returns the finished event on a dispatch
    /// boundary that closes a non-empty block.
    pub fn apply(&mut self, field: Field) -> Option<Event> {
        match field {
            Field::Data(value) => {
                self.data.push_str(&value);
                self.data.push('\n');
                self.dirty = true;
            }
            Field::EventType(value) => {
                self.event_type = value;
                self.dirty = true;
            }
            Field::Id(value) => {
                // IDs containing the NUL byte are ignored entirely; an
                // empty value clears the stream's last event ID.
                if !value.contains('\0') {
                    self.last_event_id = value;
                    self.dirty = true;
                }
            }
            Field::Retry(value) => {
                if let Some(time) = parse_retry(&value) {
                    self.reconnection_time = Some(time);
                    self.dirty = true;
                }
            }
            Field::Comment(_) => {}
            Field::Dispatch => return self.take_event(),
        }
        None
    }

    /// Emit the in-flight block without a dispatch boundary. Used when the
    /// transport closed cleanly mid-block; an interrupted connection must
    /// not call this.
    pub fn flush_dirty(&mut self) -> Option<Event> {
        self.take_event()
    }

    /// Clear per-event scratch at the start of a physical connection.
    /// `last_event_id` and the reconnection time deliberately survive.
    pub fn reset_scratch(&mut self) {
        self.data.clear();
        self.event_type.clear();
        self.dirty = false;
    }

    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// The server-suggested reconnection delay, if a valid `retry:` field
    /// has been observed.
    pub fn reconnection_time(&self) -> Option<Duration> {
        self.reconnection_time
    }

    fn take_event(&mut self) -> Option<Event> {
        if !self.dirty {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        self.dirty = false;
        Some(Event {
            event_type: std::mem::take(&mut self.event_type),
            data,
            last_event_id: self.last_event_id.clone(),
        })
    }
}

/// `retry:` values must be a non-empty unsigned ASCII decimal, interpreted
/// as milliseconds. Anything else is ignored.
fn parse_retry(value: &str) -> Option<Duration> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_millis)
}
