//! Lineage persistence.
//!
//! Files written under lineage semantics live in the worker cache only, and could be recomputed if lost. Until a
//! durable copy exists in the under-storage, the worker keeps track of them in a [`LineageDataManager`]. On every
//! heartbeat, the [`LineageSyncExecutor`] persists what is pending and reports outcomes to the master, which
//! acknowledges persisted files.
//!
//! ```text
//!                      persist ok                 master ack
//!     Pending ─────► Persisting ────────────────────────────► Persisted (untracked)
//!                      ▲    │
//!             next     │    │ persist failed
//!           heartbeat  │    ▼
//!                      └─ Failed
//! ```

use std::collections::HashSet;
use std::fmt;

use crate::{BlockId, FileId};

mod executor;
pub use executor::*;

mod manager;
pub use manager::*;

mod service;
pub use service::*;

mod ufs;
pub use ufs::*;

/// Persistence state of a lineage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistState {
    /// Waiting for a durable copy.
    Pending,
    /// Being written to the under-storage, or written and waiting for the master acknowledgment.
    Persisting,
    /// Acknowledged by the master, no longer tracked.
    Persisted,
    /// The last attempt failed, it will be retried on the next heartbeat.
    Failed,
}

impl PersistState {
    /// Whether a file may move from this state to `next`.
    #[inline]
    pub fn can_transition_to(self, next: PersistState) -> bool {
        use PersistState::*;

        matches!(
            (self, next),
            (Pending, Persisting) | (Failed, Persisting) | (Persisting, Persisted) | (Persisting, Failed)
        )
    }
}

impl fmt::Display for PersistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Persisting => "PERSISTING",
            Self::Persisted => "PERSISTED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A file produced under lineage semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageFile {
    file_id: FileId,
    /// Blocks of the file, in order.
    block_ids: Vec<BlockId>,
    state: PersistState,
}

impl LineageFile {
    /// Create a new [`PersistState::Pending`] file.
    pub fn new(file_id: FileId, block_ids: Vec<BlockId>) -> Self {
        Self {
            file_id,
            block_ids,
            state: PersistState::Pending,
        }
    }

    #[inline]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    #[inline]
    pub fn block_ids(&self) -> &[BlockId] {
        &self.block_ids
    }

    #[inline]
    pub fn state(&self) -> PersistState {
        self.state
    }
}

/// Outcome of a persistence attempt as reported to the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    Failed(String),
}

/// One entry of a persistence report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub file_id: FileId,
    pub block_ids: Vec<BlockId>,
    pub outcome: PersistOutcome,
}

/// Instructions returned by the master along with acknowledgments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineageCommand {
    Nothing,
    /// Track and persist these files.
    Persist(Vec<LineageFile>),
    /// Stop tracking a file, its data is either lost for good or recomputed elsewhere.
    Abandon(FileId),
}

/// Master reply to a persistence report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportResponse {
    /// Files the master recorded as durably persisted.
    pub acknowledged: HashSet<FileId>,
    pub commands: Vec<LineageCommand>,
}
