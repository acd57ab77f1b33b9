use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Where a published changelog ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Remote identifier of the published copy.
    pub remote_id: String,
    pub bytes: u64,
}

/// Outbound archival of the changelog.
///
/// Publishing only reads the already-durable log; failures never affect the
/// cursor or the log itself.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn publish(&self, log_path: &Path) -> Result<PublishReceipt, SyncError>;
}
