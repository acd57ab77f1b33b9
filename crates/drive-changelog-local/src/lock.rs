use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use drive_changelog_core::SyncError;
use fs2::FileExt;
use tracing::{debug, warn};

const LOCK_FILE: &str = ".drive-changelog.lock";

/// Exclusive advisory lock on a state directory.
///
/// Two processes advancing the same cursor would interleave cycles, so only
/// one may own a state directory at a time. Released on drop.
#[derive(Debug)]
pub struct StateDirLock {
    file: File,
    path: PathBuf,
}

impl StateDirLock {
    pub fn acquire(dir: &Path) -> Result<Self, SyncError> {
        fs::create_dir_all(dir).map_err(|e| {
            SyncError::Io(format!(
                "Failed to create state directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| {
                SyncError::Io(format!("Failed to open lock file {}: {}", path.display(), e))
            })?;

        file.try_lock_exclusive().map_err(|_| {
            SyncError::Io(format!(
                "State directory {} is in use by another process",
                dir.display()
            ))
        })?;

        // Informational only; the lock itself is what matters.
        if let Err(e) = file
            .set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
        {
            warn!("Failed to record pid in {}: {}", path.display(), e);
        }

        debug!("Acquired state directory lock {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for StateDirLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();

        let first = StateDirLock::acquire(temp_dir.path()).unwrap();
        assert!(StateDirLock::acquire(temp_dir.path()).is_err());

        drop(first);
        assert!(StateDirLock::acquire(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");

        let _lock = StateDirLock::acquire(&nested).unwrap();
        assert!(nested.join(LOCK_FILE).exists());
    }
}
