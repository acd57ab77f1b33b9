use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SyncError;
use crate::remote::RemoteStore;

/// Opaque resumption token issued by the remote store.
///
/// Everything before the cursor has been processed. The remote store defines
/// the ordering; callers must never interpret or compare the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Build a cursor from a raw token. Blank tokens are not cursors.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable storage for the single active cursor.
///
/// `save` must not return before the value is durable: a reader after a
/// completed `save` observes the new value, even across a process restart.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the persisted cursor, if any.
    async fn load(&self) -> Result<Option<Cursor>, SyncError>;

    /// Persist `cursor`, replacing the previous value atomically.
    async fn save(&self, cursor: &Cursor) -> Result<(), SyncError>;

    /// Establish a "start now" cursor from the remote store and persist it.
    ///
    /// Changes made before this point are never observed.
    async fn initialize(&self, remote: &dyn RemoteStore) -> Result<Cursor, SyncError> {
        info!("Initializing start cursor from remote store");
        let cursor = remote.start_cursor().await?;
        self.save(&cursor).await?;
        Ok(cursor)
    }
}
