//! Filesystem persistence for drive-changelog.
//!
//! Layout of a state directory:
//! ```text
//! <state_dir>/
//! ├── .drive-changelog.lock   # single-instance guard
//! ├── page_token.txt          # cursor
//! └── changelog.jsonl         # event log, one JSON object per line
//! ```

pub mod cursor;
pub mod event_log;
pub mod lock;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use drive_changelog_core::SyncError;

pub use cursor::FileCursorStore;
pub use event_log::JsonlEventLog;
pub use lock::StateDirLock;

pub const CURSOR_FILE: &str = "page_token.txt";
pub const CHANGELOG_FILE: &str = "changelog.jsonl";

/// Everything persisted under one state directory.
pub struct LocalState {
    pub dir: PathBuf,
    pub cursors: Arc<FileCursorStore>,
    pub log: Arc<JsonlEventLog>,
    _lock: StateDirLock,
}

impl LocalState {
    /// Lock the state directory and open the cursor store and event log.
    ///
    /// Fails if another process holds the directory.
    pub async fn open(dir: &Path) -> Result<Self, SyncError> {
        let lock = StateDirLock::acquire(dir)?;
        let cursors = Arc::new(FileCursorStore::new(dir.join(CURSOR_FILE)));
        let log = Arc::new(JsonlEventLog::open(dir.join(CHANGELOG_FILE)).await?);
        Ok(Self {
            dir: dir.to_path_buf(),
            cursors,
            log,
            _lock: lock,
        })
    }
}
