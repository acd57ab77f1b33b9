use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the orchestrator is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Polling,
    Classifying,
    Persisting,
    Publishing,
    /// The last cycle aborted; cleared when the next cycle starts.
    Failed,
}

/// Outcome of the most recent archive publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublishState {
    Disabled,
    Never,
    Published {
        at: DateTime<Utc>,
        remote_id: String,
    },
    Failed {
        at: DateTime<Utc>,
        error: String,
    },
}

/// Read-only snapshot of the sync engine.
///
/// `last_sync_timestamp` only moves on successful cycles, so staleness is
/// visible directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Seconds since the orchestrator was created.
    pub uptime: f64,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub current_cursor: Option<String>,
    pub phase: CyclePhase,
    pub cycles_completed: u64,
    /// Events appended by the last successful cycle.
    pub last_cycle_events: usize,
    /// Error of the last failed cycle, cleared by the next success.
    pub last_error: Option<String>,
    pub publish: PublishState,
}
