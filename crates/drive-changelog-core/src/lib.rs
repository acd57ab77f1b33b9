//! Core traits and types for drive-changelog.
//!
//! This crate defines the change-synchronization engine and the abstractions
//! its collaborators implement:
//! - `RemoteStore`: change feed, revision history and revision content
//! - `CursorStore`: durable resumption token
//! - `EventLog`: append-only changelog
//! - `ArchiveSink`: publishes the changelog somewhere else
//! - `SyncOrchestrator`: runs one poll → classify → persist → publish cycle

mod archive;
mod cursor;
mod differ;
mod error;
mod event;
mod orchestrator;
mod remote;
mod status;

pub use archive::{ArchiveSink, PublishReceipt};
pub use cursor::{Cursor, CursorStore};
pub use differ::{classify, decode, diff_revisions, evaluate, unified_diff, Decoded};
pub use error::SyncError;
pub use event::{Event, EventLog, EventType};
pub use orchestrator::{CycleOptions, CycleOutcome, CycleReport, SyncOrchestrator};
pub use remote::{ChangePage, ChangeRecord, RemoteStore, Revision};
pub use status::{CyclePhase, PublishState, SyncStatus};
