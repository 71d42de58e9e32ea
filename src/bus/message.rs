//! Message envelope carried by the bus.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::poller::PolledItem;

/// What a message carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A newly seen item from a source.
    Item(Arc<PolledItem>),
    /// A derived domain event.
    Event {
        /// Event kind, e.g. `"earnings_beat"`.
        kind: String,
        /// Event body.
        data: Value,
    },
}

/// Envelope published on a channel and shared by every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Name of the producing source or node.
    pub source: String,
    pub payload: Payload,
    /// When the envelope was created.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Wraps an item.
    pub fn item(source: impl Into<String>, item: impl Into<Arc<PolledItem>>) -> Self {
        Self {
            source: source.into(),
            payload: Payload::Item(item.into()),
            received_at: Utc::now(),
        }
    }

    /// Builds a domain event.
    pub fn event(source: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            source: source.into(),
            payload: Payload::Event {
                kind: kind.into(),
                data,
            },
            received_at: Utc::now(),
        }
    }

    /// Returns the item, if this message carries one.
    #[must_use]
    pub fn as_item(&self) -> Option<&PolledItem> {
        match &self.payload {
            Payload::Item(item) => Some(item),
            Payload::Event { .. } => None,
        }
    }

    /// Returns the event kind, if this message carries an event.
    #[must_use]
    pub fn event_kind(&self) -> Option<&str> {
        match &self.payload {
            Payload::Event { kind, .. } => Some(kind),
            Payload::Item(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_item_message() {
        let message = Message::item("feed", PolledItem::new("1", "t", "https://a.test/1"));
        assert_eq!(message.as_item().unwrap().id(), "1");
        assert_eq!(message.event_kind(), None);
    }

    #[test]
    fn test_event_message_serializes_tagged() {
        let message = Message::event("scorer", "earnings_beat", json!({"ticker": "ACME"}));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["payload"]["type"], "event");
        assert_eq!(value["payload"]["kind"], "earnings_beat");
        assert_eq!(value["source"], "scorer");
    }
}
