//! Immutable storage records.
//!
//! Events are the source of truth for an application's history. Every
//! state change produces an immutable [`StoredEvent`] written once and
//! never mutated or deleted. The store treats `topic` and `state` as
//! opaque values; serialization of domain events into them is the
//! caller's concern.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A domain event in its stored, serialized form.
///
/// The pair `(originator_id, originator_version)` is unique across the
/// store. That uniqueness is the sole concurrency-control mechanism:
/// two writers proposing the same next version race, and exactly one
/// wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Identifier of the aggregate that produced this event.
    pub originator_id: Uuid,
    /// Position of this event in its aggregate's sequence. Positive,
    /// strictly increasing, assigned by the caller.
    pub originator_version: i32,
    /// Opaque string naming the event's decodable type.
    pub topic: String,
    /// Opaque serialized event payload.
    pub state: Vec<u8>,
}

/// A stored event stamped with its global notification sequence id.
///
/// The id is assigned by the database at commit time and is unique and
/// monotonically ordered for committed rows. Ids reserved by rolled-back
/// transactions are never reused, so consumers must tolerate gaps in the
/// sequence but will never see a committed id out of order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Global notification sequence id.
    pub id: i64,
    /// Identifier of the aggregate that produced this event.
    pub originator_id: Uuid,
    /// Position of this event in its aggregate's sequence.
    pub originator_version: i32,
    /// Opaque string naming the event's decodable type.
    pub topic: String,
    /// Opaque serialized event payload.
    pub state: Vec<u8>,
}

impl From<Notification> for StoredEvent {
    fn from(notification: Notification) -> Self {
        Self {
            originator_id: notification.originator_id,
            originator_version: notification.originator_version,
            topic: notification.topic,
            state: notification.state,
        }
    }
}

/// A consumer's durable checkpoint: "this application has processed up
/// to this notification id".
///
/// Tracking rows are written in the same transaction as the events the
/// consumer produces in response to the tracked notification, and the
/// pair `(application_name, notification_id)` is unique. Inserting a
/// duplicate fails, which is what prevents double-processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracking {
    /// Name of the consuming application.
    pub application_name: String,
    /// The notification id that has been processed.
    pub notification_id: i64,
}

impl Tracking {
    /// Create a tracking checkpoint for the given application and
    /// notification id.
    pub fn new(application_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            application_name: application_name.into(),
            notification_id,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn notification_converts_to_stored_event() {
        let notification = Notification {
            id: 42,
            originator_id: Uuid::new_v4(),
            originator_version: 3,
            topic: "example:Happened".to_owned(),
            state: b"{}".to_vec(),
        };
        let event = StoredEvent::from(notification.clone());
        assert_eq!(event.originator_id, notification.originator_id);
        assert_eq!(event.originator_version, 3);
        assert_eq!(event.topic, "example:Happened");
        assert_eq!(event.state, b"{}");
    }

    #[test]
    fn stored_event_serde_roundtrip() {
        let event = StoredEvent {
            originator_id: Uuid::new_v4(),
            originator_version: 1,
            topic: "example:Registered".to_owned(),
            state: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: StoredEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn tracking_new_accepts_str_and_string() {
        let a = Tracking::new("upstream", 7);
        let b = Tracking::new(String::from("upstream"), 7);
        assert_eq!(a, b);
        assert_eq!(a.application_name, "upstream");
        assert_eq!(a.notification_id, 7);
    }
}
