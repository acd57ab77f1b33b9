use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use drive_changelog_core::{Cursor, CursorStore, SyncError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Cursor persisted as a single line of text.
///
/// Saves go through a temp file that is fsynced and renamed over the
/// target, so readers see either the old or the new token.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("txt.tmp")
    }

    async fn write_durably(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        sync_parent_dir(&self.path).await
    }
}

/// Make the rename itself durable.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl CursorStore for FileCursorStore {
    #[instrument(skip(self), level = "debug")]
    async fn load(&self) -> Result<Option<Cursor>, SyncError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Cursor::parse(&contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Cursor(format!(
                "Failed to read cursor file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn save(&self, cursor: &Cursor) -> Result<(), SyncError> {
        self.write_durably(cursor.as_str().as_bytes())
            .await
            .map_err(|e| {
                SyncError::Cursor(format!(
                    "Failed to persist cursor to {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        debug!("Saved cursor {} to {}", cursor, self.path.display());
        Ok(())
    }
}
