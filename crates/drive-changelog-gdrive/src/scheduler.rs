use std::sync::Arc;
use std::time::Duration;

use drive_changelog_core::{CycleOutcome, SyncOrchestrator};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Run a sync cycle every `interval` until `shutdown` flips.
///
/// The first tick fires immediately. Ticks landing while a cycle is still
/// running (manual trigger or slow remote) are skipped.
pub fn spawn(
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Scheduler started ({} secs interval)", interval.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => run_scheduled(&orchestrator).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    })
}

async fn run_scheduled(orchestrator: &SyncOrchestrator) {
    match orchestrator.try_run_cycle().await {
        Ok(CycleOutcome::Completed(report)) => {
            debug!("Scheduled cycle appended {} event(s)", report.events)
        }
        Ok(CycleOutcome::AlreadyRunning) => debug!("Previous cycle still running, tick skipped"),
        // Already logged and recorded in the status by the orchestrator.
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drive_changelog_core::{
        ChangePage, Cursor, CursorStore, Event, EventLog, RemoteStore, Revision, SyncError,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingRemote {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for CountingRemote {
        async fn start_cursor(&self) -> Result<Cursor, SyncError> {
            Ok(Cursor::parse("1").unwrap())
        }
        async fn list_changes(&self, _cursor: &Cursor) -> Result<ChangePage, SyncError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(ChangePage {
                new_start: Cursor::parse("1"),
                ..Default::default()
            })
        }
        async fn list_revisions(&self, _item_id: &str) -> Result<Vec<Revision>, SyncError> {
            Ok(vec![])
        }
        async fn download_revision(
            &self,
            _item_id: &str,
            _revision: &Revision,
        ) -> Result<Vec<u8>, SyncError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct MemCursor(Mutex<Option<Cursor>>);

    #[async_trait]
    impl CursorStore for MemCursor {
        async fn load(&self) -> Result<Option<Cursor>, SyncError> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn save(&self, cursor: &Cursor) -> Result<(), SyncError> {
            *self.0.lock().unwrap() = Some(cursor.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullLog;

    #[async_trait]
    impl EventLog for NullLog {
        async fn append(&self, _event: &Event) -> Result<(), SyncError> {
            Ok(())
        }
        async fn read_all(&self) -> Result<Vec<Event>, SyncError> {
            Ok(vec![])
        }
        fn path(&self) -> &Path {
            Path::new("changelog.jsonl")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_on_interval_until_shutdown() {
        let remote = Arc::new(CountingRemote::default());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            remote.clone(),
            Arc::new(MemCursor::default()),
            Arc::new(NullLog),
        ));
        let (tx, rx) = watch::channel(false);

        let handle = spawn(orchestrator.clone(), Duration::from_secs(60), rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.status().await.cycles_completed, 1);
        assert_eq!(remote.polls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(orchestrator.status().await.cycles_completed, 2);
        assert_eq!(remote.polls.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
