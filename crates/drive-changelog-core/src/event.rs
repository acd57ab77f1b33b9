use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Classification of a changed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Create => "create",
            EventType::Update => "update",
            EventType::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One changelog record. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub item_id: String,
    pub item_name: Option<String>,
    pub event_type: EventType,
    /// Unified diff, only for `update` events with non-empty textual changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl Event {
    pub fn new(
        item_id: impl Into<String>,
        item_name: Option<String>,
        event_type: EventType,
        diff: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            item_id: item_id.into(),
            item_name,
            event_type,
            diff: diff.filter(|d| event_type == EventType::Update && !d.is_empty()),
        }
    }
}

/// Durable, append-only changelog.
///
/// Each `append` produces one complete record or none at all, and is durable
/// before it returns. Records are never rewritten.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: &Event) -> Result<(), SyncError>;

    /// Every complete record, in append order.
    async fn read_all(&self) -> Result<Vec<Event>, SyncError>;

    /// Location of the log, handed to the archive sink.
    fn path(&self) -> &Path;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_omitted_when_absent() {
        let event = Event::new("f1", Some("notes.txt".into()), EventType::Create, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["itemId"], "f1");
        assert_eq!(json["itemName"], "notes.txt");
        assert_eq!(json["eventType"], "create");
        assert!(json.get("diff").is_none());
    }

    #[test]
    fn test_diff_only_kept_for_updates() {
        let event = Event::new("f1", None, EventType::Delete, Some("-a\n+b".into()));
        assert!(event.diff.is_none());

        let event = Event::new("f1", None, EventType::Update, Some(String::new()));
        assert!(event.diff.is_none());

        let event = Event::new("f1", None, EventType::Update, Some("-a\n+b".into()));
        assert_eq!(event.diff.as_deref(), Some("-a\n+b"));
    }
}
