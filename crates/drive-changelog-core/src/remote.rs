use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::SyncError;

/// One item reported by the remote change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub item_id: String,
    /// Display name, absent when the remote store no longer exposes the item.
    #[serde(default)]
    pub item_name: Option<String>,
    /// Explicit removal or trashed item.
    pub removed: bool,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ChangeRecord {
    /// Folders carry no content history worth diffing.
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some("application/vnd.google-apps.folder")
    }
}

/// An immutable historical version of one item's content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    /// Export targets keyed by mime type (native documents only).
    #[serde(default)]
    pub export_links: HashMap<String, String>,
}

/// One page of the remote change feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePage {
    pub changes: Vec<ChangeRecord>,
    /// More changes follow; resume from here.
    pub next_page: Option<Cursor>,
    /// The feed is drained; future changes start here.
    pub new_start: Option<Cursor>,
}

impl ChangePage {
    /// The cursor to persist once every change on this page is recorded.
    pub fn advance_to(&self) -> Option<&Cursor> {
        self.next_page.as_ref().or(self.new_start.as_ref())
    }

    pub fn has_more(&self) -> bool {
        self.next_page.is_some()
    }
}

/// Remote content store consumed by the sync engine.
///
/// Implementations construct typed records at the API boundary; the engine
/// never inspects raw responses.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current position of the change feed.
    async fn start_cursor(&self) -> Result<Cursor, SyncError>;

    /// Changes since `cursor`. Idempotent for a fixed cursor.
    async fn list_changes(&self, cursor: &Cursor) -> Result<ChangePage, SyncError>;

    /// Revision history of an item, oldest first.
    async fn list_revisions(&self, item_id: &str) -> Result<Vec<Revision>, SyncError>;

    /// Raw content of one revision.
    async fn download_revision(
        &self,
        item_id: &str,
        revision: &Revision,
    ) -> Result<Vec<u8>, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_prefers_continuation() {
        let page = ChangePage {
            changes: vec![],
            next_page: Cursor::parse("next"),
            new_start: Cursor::parse("start"),
        };
        assert_eq!(page.advance_to().unwrap().as_str(), "next");
        assert!(page.has_more());

        let drained = ChangePage {
            new_start: Cursor::parse("start"),
            ..Default::default()
        };
        assert_eq!(drained.advance_to().unwrap().as_str(), "start");
        assert!(!drained.has_more());

        assert!(ChangePage::default().advance_to().is_none());
    }
}
