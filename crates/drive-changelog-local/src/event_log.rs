//! Append-only JSON-lines event log.
//!
//! Every record is written with a single `write_all` on a file opened in
//! append mode and synced before `append` returns. The write runs on a
//! blocking worker that holds the file lock for its whole duration, so a
//! cancelled caller can never leave a half-written record behind it.
//!
//! A failed write or sync is rolled back to the previous length before the
//! error is returned. A crash in the middle of a write can still leave a
//! fragment without a trailing newline. Readers ignore it, and both
//! [`JsonlEventLog::open`] and the next append truncate it away, which keeps
//! the log prefix-durable.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drive_changelog_core::{Event, EventLog, SyncError};
use tracing::{debug, instrument, warn};

pub struct JsonlEventLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl JsonlEventLog {
    /// Open (creating if needed) the log at `path`, repairing a torn tail.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let open_path = path.clone();

        let file = tokio::task::spawn_blocking(move || -> io::Result<File> {
            if let Some(parent) = open_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&open_path)?;
            if let Some(dropped) = truncate_torn_tail(&mut file)? {
                warn!(
                    "Discarded {} byte(s) of incomplete record at end of {}",
                    dropped,
                    open_path.display()
                );
            }
            Ok(file)
        })
        .await
        .map_err(|e| SyncError::EventLog(format!("Event log task failed: {}", e)))?
        .map_err(|e| {
            SyncError::EventLog(format!(
                "Failed to open event log {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }
}

/// Truncate anything after the last newline. Returns the bytes dropped.
fn truncate_torn_tail(file: &mut File) -> io::Result<Option<u64>> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(None);
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos as u64 + 1)
        .unwrap_or(0);

    file.set_len(keep)?;
    file.sync_all()?;
    Ok(Some(len - keep))
}

#[async_trait]
impl EventLog for JsonlEventLog {
    #[instrument(skip(self, event), level = "debug", fields(item_id = %event.item_id))]
    async fn append(&self, event: &Event) -> Result<(), SyncError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let len = line.len();

        let file = Arc::clone(&self.file);
        let log_path = self.path.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut file = file
                .lock()
                .map_err(|_| io::Error::other("event log lock poisoned"))?;
            if let Some(dropped) = truncate_torn_tail(&mut file)? {
                warn!(
                    "Discarded {} byte(s) of incomplete record at end of {}",
                    dropped,
                    log_path.display()
                );
            }

            let prev_len = file.metadata()?.len();
            if let Err(e) = file.write_all(&line).and_then(|()| file.sync_data()) {
                if let Err(rollback) = file.set_len(prev_len) {
                    warn!(
                        "Failed to roll back partial record in {}: {}",
                        log_path.display(),
                        rollback
                    );
                }
                return Err(e);
            }
            Ok(())
        })
        .await
        .map_err(|e| SyncError::EventLog(format!("Event log task failed: {}", e)))?
        .map_err(|e| {
            SyncError::EventLog(format!(
                "Failed to append to {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!("Appended {} byte record to {}", len, self.path.display());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Event>, SyncError> {
        let contents = tokio::fs::read(&self.path).await.map_err(|e| {
            SyncError::EventLog(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let mut events = Vec::new();
        let mut lines = contents.split(|&b| b == b'\n').peekable();
        while let Some(line) = lines.next() {
            if lines.peek().is_none() {
                // Bytes after the final newline are an unfinished record.
                if !line.is_empty() {
                    warn!("Ignoring incomplete record at end of {}", self.path.display());
                }
                break;
            }
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping unreadable record in {}: {}", self.path.display(), e),
            }
        }

        Ok(events)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
