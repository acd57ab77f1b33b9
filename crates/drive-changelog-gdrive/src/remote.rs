//! `RemoteStore` backed by the Google Drive change feed.

use std::sync::Arc;

use async_trait::async_trait;
use drive_changelog_core::{ChangePage, ChangeRecord, Cursor, RemoteStore, Revision, SyncError};
use tracing::{instrument, warn};

use crate::gdrive::{ChangeEntry, ChangeList, GDriveClient, RevisionEntry};
use crate::token_manager::TokenManager;

/// Export formats tried for native Google documents, most useful first.
const TEXT_EXPORTS: &[&str] = &["text/plain", "text/csv", "text/markdown", "text/html"];

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

pub struct DriveRemoteStore {
    client: Arc<GDriveClient>,
    token_manager: Arc<TokenManager>,
}

impl DriveRemoteStore {
    pub fn new(client: Arc<GDriveClient>, token_manager: Arc<TokenManager>) -> Self {
        Self {
            client,
            token_manager,
        }
    }

    async fn token(&self) -> Result<String, SyncError> {
        self.token_manager
            .get_valid_token()
            .await
            .map_err(|e| SyncError::Remote(format!("Token error: {}", e)))
    }
}

fn remote_err(e: anyhow::Error) -> SyncError {
    SyncError::Remote(e.to_string())
}

/// Drop entries that do not name a file (e.g. shared drive changes).
fn to_change_record(entry: ChangeEntry) -> Option<ChangeRecord> {
    let ChangeEntry {
        file_id,
        removed,
        file,
    } = entry;
    let file = file.unwrap_or_default();
    let item_id = file_id.or(file.id)?;

    Some(ChangeRecord {
        item_id,
        item_name: file.name,
        removed: removed || file.trashed,
        mime_type: file.mime_type,
    })
}

fn to_change_page(list: ChangeList) -> ChangePage {
    let total = list.changes.len();
    let changes: Vec<_> = list
        .changes
        .into_iter()
        .filter_map(to_change_record)
        .collect();
    if changes.len() < total {
        warn!("Skipped {} change(s) without a file id", total - changes.len());
    }

    ChangePage {
        changes,
        next_page: list.next_page_token.as_deref().and_then(Cursor::parse),
        new_start: list.new_start_page_token.as_deref().and_then(Cursor::parse),
    }
}

fn to_revision(entry: RevisionEntry) -> Revision {
    Revision {
        id: entry.id,
        mime_type: entry.mime_type,
        modified_time: entry.modified_time,
        export_links: entry.export_links,
    }
}

/// Drive prefixes text exports with a UTF-8 byte order mark.
fn strip_export_bom(mut bytes: Vec<u8>) -> Vec<u8> {
    if bytes.starts_with(UTF8_BOM) {
        bytes.drain(..UTF8_BOM.len());
    }
    bytes
}

/// Text export link for a native document revision, if any.
fn export_link(revision: &Revision) -> Option<&str> {
    TEXT_EXPORTS
        .iter()
        .find_map(|mime| revision.export_links.get(*mime))
        .map(String::as_str)
}

#[async_trait]
impl RemoteStore for DriveRemoteStore {
    #[instrument(skip(self), level = "debug")]
    async fn start_cursor(&self) -> Result<Cursor, SyncError> {
        let token = self.token().await?;
        let raw = self
            .client
            .get_start_page_token(&token)
            .await
            .map_err(remote_err)?;
        Cursor::parse(&raw)
            .ok_or_else(|| SyncError::Remote("Google Drive returned a blank start token".into()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_changes(&self, cursor: &Cursor) -> Result<ChangePage, SyncError> {
        let token = self.token().await?;
        let list = self
            .client
            .list_changes(&token, cursor.as_str())
            .await
            .map_err(remote_err)?;
        Ok(to_change_page(list))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_revisions(&self, item_id: &str) -> Result<Vec<Revision>, SyncError> {
        let token = self.token().await?;
        let revisions = self
            .client
            .list_revisions(&token, item_id)
            .await
            .map_err(remote_err)?;
        Ok(revisions.into_iter().map(to_revision).collect())
    }

    #[instrument(skip(self, revision), level = "debug", fields(revision_id = %revision.id))]
    async fn download_revision(
        &self,
        item_id: &str,
        revision: &Revision,
    ) -> Result<Vec<u8>, SyncError> {
        let token = self.token().await?;

        let result = if let Some(link) = export_link(revision) {
            self.client
                .download_url(&token, link)
                .await
                .map(strip_export_bom)
        } else if !revision.export_links.is_empty() {
            return Err(SyncError::Remote(format!(
                "No text export available for revision {} of {}",
                revision.id, item_id
            )));
        } else {
            self.client
                .download_revision(&token, item_id, &revision.id)
                .await
        };

        result.map_err(remote_err)
    }
}
