//! Sync orchestrator.
//!
//! One cycle walks `Idle → Polling → Classifying → Persisting → Publishing →
//! Idle`. An aborted cycle parks in `Failed` until the next one starts.
//! Cycles are serialized by an explicit lock owned by the orchestrator; the
//! publish step runs after the lock is released because it only reads the
//! already-durable log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveSink, PublishReceipt};
use crate::cursor::{Cursor, CursorStore};
use crate::differ;
use crate::error::SyncError;
use crate::event::{Event, EventLog};
use crate::remote::RemoteStore;
use crate::status::{CyclePhase, PublishState, SyncStatus};

/// Tunables for a sync cycle.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Change pages drained per cycle before yielding to the next cycle.
    pub max_pages_per_cycle: usize,
    pub publish_timeout: Duration,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            max_pages_per_cycle: 10,
            publish_timeout: Duration::from_secs(120),
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub pages: usize,
    pub events: usize,
    /// Cursor persisted at the end of the cycle.
    pub cursor: Option<Cursor>,
    pub cursor_advanced: bool,
    /// The page limit was hit with a continuation pending.
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishReceipt>,
}

/// Result of a non-blocking cycle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    AlreadyRunning,
}

#[derive(Debug)]
struct StatusState {
    last_sync: Option<DateTime<Utc>>,
    current_cursor: Option<Cursor>,
    phase: CyclePhase,
    cycles_completed: u64,
    last_cycle_events: usize,
    last_error: Option<String>,
    publish: PublishState,
}

/// Runs sync cycles against a remote store, a cursor store and an event log.
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteStore>,
    cursors: Arc<dyn CursorStore>,
    log: Arc<dyn EventLog>,
    archive: Option<Arc<dyn ArchiveSink>>,
    options: CycleOptions,
    /// Held for the mutating part of a cycle (poll, classify, persist).
    cycle_lock: Mutex<()>,
    state: RwLock<StatusState>,
    shutdown: Option<watch::Receiver<bool>>,
    started_at: Instant,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cursors: Arc<dyn CursorStore>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            remote,
            cursors,
            log,
            archive: None,
            options: CycleOptions::default(),
            cycle_lock: Mutex::new(()),
            state: RwLock::new(StatusState {
                last_sync: None,
                current_cursor: None,
                phase: CyclePhase::Idle,
                cycles_completed: 0,
                last_cycle_events: 0,
                last_error: None,
                publish: PublishState::Disabled,
            }),
            shutdown: None,
            started_at: Instant::now(),
        }
    }

    /// Publish the log to `sink` after every cycle that needs it.
    pub fn with_archive(mut self, sink: Arc<dyn ArchiveSink>) -> Self {
        self.archive = Some(sink);
        self.state.get_mut().publish = PublishState::Never;
        self
    }

    pub fn with_options(mut self, options: CycleOptions) -> Self {
        self.options = CycleOptions {
            max_pages_per_cycle: options.max_pages_per_cycle.max(1),
            ..options
        };
        self
    }

    /// Stop cycles between items once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Load the persisted cursor into the status snapshot.
    pub async fn restore(&self) -> Result<Option<Cursor>, SyncError> {
        let cursor = self.cursors.load().await?;
        if cursor.is_some() {
            info!("Loaded saved cursor");
        }
        self.state.write().await.current_cursor = cursor.clone();
        Ok(cursor)
    }

    /// Run one cycle, waiting for any in-flight cycle to finish first.
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let guard = self.cycle_lock.lock().await;
        self.run_locked(guard).await
    }

    /// Run one cycle unless another is in flight.
    pub async fn try_run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        match self.cycle_lock.try_lock() {
            Ok(guard) => self.run_locked(guard).await.map(CycleOutcome::Completed),
            Err(_) => {
                info!("Sync cycle already running, request rejected");
                Ok(CycleOutcome::AlreadyRunning)
            }
        }
    }

    pub async fn status(&self) -> SyncStatus {
        let state = self.state.read().await;
        SyncStatus {
            uptime: self.started_at.elapsed().as_secs_f64(),
            last_sync_timestamp: state.last_sync,
            current_cursor: state.current_cursor.as_ref().map(|c| c.to_string()),
            phase: state.phase,
            cycles_completed: state.cycles_completed,
            last_cycle_events: state.last_cycle_events,
            last_error: state.last_error.clone(),
            publish: state.publish.clone(),
        }
    }

    async fn run_locked(&self, guard: MutexGuard<'_, ()>) -> Result<CycleReport, SyncError> {
        let started = Instant::now();
        let mut report = match self.sync_pages().await {
            Ok(report) => report,
            Err(e) => {
                self.record_failure(&e).await;
                return Err(e);
            }
        };

        let publish_needed = self.record_success(&report).await;
        drop(guard);

        if let Some(sink) = self.archive.clone() {
            if publish_needed {
                report.published = self.publish(sink.as_ref()).await;
            } else {
                debug!("No new events and last publish succeeded, skipping publish");
            }
        }

        info!(
            "Finished processing changes: {} event(s) over {} page(s) in {:?}",
            report.events,
            report.pages,
            started.elapsed()
        );
        Ok(report)
    }

    /// Poll, classify and persist until the feed is drained or the page
    /// limit is reached.
    async fn sync_pages(&self) -> Result<CycleReport, SyncError> {
        self.set_phase(CyclePhase::Polling).await;

        let mut cursor = match self.cursors.load().await? {
            Some(cursor) => cursor,
            None => {
                let cursor = self.cursors.initialize(self.remote.as_ref()).await?;
                self.state.write().await.current_cursor = Some(cursor.clone());
                cursor
            }
        };

        let mut report = CycleReport::default();
        loop {
            self.check_cancelled()?;
            self.set_phase(CyclePhase::Polling).await;

            debug!("Fetching changes since cursor {}", cursor);
            let page = self.remote.list_changes(&cursor).await?;
            if page.changes.is_empty() {
                info!("No changes detected");
            } else {
                info!("Processing {} change(s)", page.changes.len());
            }

            self.set_phase(CyclePhase::Classifying).await;
            let mut events = Vec::with_capacity(page.changes.len());
            for change in &page.changes {
                self.check_cancelled()?;
                debug!(
                    "Processing change for {} ({})",
                    change.item_id,
                    change.item_name.as_deref().unwrap_or("<unnamed>")
                );
                let (event_type, diff) = differ::evaluate(self.remote.as_ref(), change).await;
                events.push(Event::new(
                    change.item_id.clone(),
                    change.item_name.clone(),
                    event_type,
                    diff,
                ));
            }

            self.set_phase(CyclePhase::Persisting).await;
            for event in &events {
                self.log.append(event).await?;
            }
            report.events += events.len();
            report.pages += 1;

            if let Some(next) = page.advance_to() {
                if *next != cursor {
                    self.cursors.save(next).await?;
                    cursor = next.clone();
                    report.cursor_advanced = true;
                    self.state.write().await.current_cursor = Some(cursor.clone());
                    debug!("Cursor advanced to {}", cursor);
                }
            }

            if !page.has_more() {
                break;
            }
            if report.pages >= self.options.max_pages_per_cycle {
                info!(
                    "Page limit ({}) reached, remaining changes deferred to next cycle",
                    self.options.max_pages_per_cycle
                );
                report.has_more = true;
                break;
            }
        }

        report.cursor = Some(cursor);
        Ok(report)
    }

    async fn publish(&self, sink: &dyn ArchiveSink) -> Option<PublishReceipt> {
        {
            // A newer cycle may already own the phase.
            let mut state = self.state.write().await;
            if state.phase == CyclePhase::Idle {
                state.phase = CyclePhase::Publishing;
            }
        }

        let result =
            tokio::time::timeout(self.options.publish_timeout, sink.publish(self.log.path())).await;

        let mut state = self.state.write().await;
        let receipt = match result {
            Ok(Ok(receipt)) => {
                info!("Changelog uploaded ({} bytes)", receipt.bytes);
                state.publish = PublishState::Published {
                    at: Utc::now(),
                    remote_id: receipt.remote_id.clone(),
                };
                Some(receipt)
            }
            Ok(Err(e)) => {
                warn!("Changelog upload failed: {}", e);
                state.publish = PublishState::Failed {
                    at: Utc::now(),
                    error: e.to_string(),
                };
                None
            }
            Err(_) => {
                warn!(
                    "Changelog upload timed out after {:?}",
                    self.options.publish_timeout
                );
                state.publish = PublishState::Failed {
                    at: Utc::now(),
                    error: "publish timed out".to_string(),
                };
                None
            }
        };

        if state.phase == CyclePhase::Publishing {
            state.phase = CyclePhase::Idle;
        }
        receipt
    }

    /// Returns whether the log should be published.
    async fn record_success(&self, report: &CycleReport) -> bool {
        let mut state = self.state.write().await;
        state.last_sync = Some(Utc::now());
        state.current_cursor = report.cursor.clone();
        state.cycles_completed += 1;
        state.last_cycle_events = report.events;
        state.last_error = None;
        state.phase = CyclePhase::Idle;

        report.events > 0 || !matches!(state.publish, PublishState::Published { .. })
    }

    async fn record_failure(&self, e: &SyncError) {
        if e.is_transient() {
            warn!("Sync cycle aborted, will retry next cycle: {}", e);
        } else {
            error!("Sync cycle failed: {}", e);
        }

        // Failed stays visible until the next cycle starts polling.
        let mut state = self.state.write().await;
        state.phase = CyclePhase::Failed;
        state.last_error = Some(e.to_string());
    }

    async fn set_phase(&self, phase: CyclePhase) {
        self.state.write().await.phase = phase;
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        match &self.shutdown {
            Some(rx) if *rx.borrow() => Err(SyncError::Cancelled),
            _ => Ok(()),
        }
    }
}
