use std::io;

use thiserror::Error;

use crate::client::{Endpoint, RpcError};
use crate::config::ConfigError;
use crate::{BlockId, FileId, LockId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures to obtain a pooled connection.
///
/// All of them are retryable by the caller.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("endpoint `{endpoint}` is unreachable: {source}")]
    Unreachable {
        endpoint: Endpoint,
        #[source]
        source: RpcError,
    },
    #[error("connection pool for endpoint `{0}` is exhausted")]
    Exhausted(Endpoint),
    #[error("connection pool is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum Error {
    /// The worker holds no local copy of the block, callers must fall back to a remote read.
    #[error("block {0} is not available on the local worker")]
    BlockNotLocallyAvailable(BlockId),
    #[error("lock {lock_id} is not held on block {block_id}")]
    InvalidLockToken { block_id: BlockId, lock_id: LockId },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("failed to persist lineage file {file_id}: {reason}")]
    Persistence { file_id: FileId, reason: String },
    #[error("failed to report persistence to master: {0}")]
    Reporting(String),
    #[error("cannot read {len} bytes at position {position} of block {block_id} ({block_size} bytes)")]
    OutOfRange {
        block_id: BlockId,
        position: u64,
        len: usize,
        block_size: u64,
    },
    #[error("stream is closed")]
    Closed,
    #[error("worker is not registered to the master")]
    Unregistered,
    #[error("service is already started")]
    AlreadyStarted,
    #[error("operation has been cancelled")]
    Cancelled,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("worker rpc failed: {0}")]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Persistence { .. } | Self::Reporting(_))
    }
}
