/// Errors surfaced by the sync engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Cursor store error: {0}")]
    Cursor(String),

    #[error("Event log error: {0}")]
    EventLog(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Sync cycle cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the next scheduled cycle is expected to recover on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Remote(_) | SyncError::Cancelled)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(e.to_string())
    }
}
