//! Client side of the worker and master RPC services.
//!
//! The transport itself is not part of this crate: a [`Connector`] creates clients for an [`Endpoint`], and the
//! client types implement the RPC operations they serve ([`BlockWorkerClient`], [`LineageMasterClient`]).
//! Everything here goes through a [`WorkerClientPool`] so that each connection has exactly one owner between
//! acquire and release.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::lineage::{PersistReport, ReportResponse};
use crate::{BlockId, LockId, WorkerId};

mod context;
pub use context::*;

mod local;
pub use local::*;

mod pool;
pub use pool::*;

/// Address of an RPC service, as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Endpoint {
    #[inline]
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for Endpoint {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned by remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("lock {lock_id} is not held on block {block_id}")]
    InvalidLockToken { block_id: BlockId, lock_id: LockId },
    /// The call did not go through (connection refused, reset, timed out...).
    #[error("transport failure: {0}")]
    Unavailable(String),
    /// The remote side processed the call and refused it.
    #[error("remote failure: {0}")]
    Rejected(String),
}

impl RpcError {
    /// Whether the connection the call went through should not be reused.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Reply to a successful `lock_block` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockBlockResult {
    pub lock_id: LockId,
    /// Local file backing the block.
    pub block_path: PathBuf,
}

/// Creates RPC clients for endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: Send + 'static;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Client, RpcError>;
}

/// Block operations served by a worker.
#[async_trait]
pub trait BlockWorkerClient: Send {
    /// Lock a block for reading, `None` if the worker has no local copy of it.
    async fn lock_block(&mut self, block_id: BlockId) -> Result<Option<LockBlockResult>, RpcError>;

    async fn unlock_block(&mut self, block_id: BlockId, lock_id: LockId) -> Result<(), RpcError>;

    /// Update access-time bookkeeping of a block.
    async fn access_block(&mut self, block_id: BlockId) -> Result<(), RpcError>;
}

/// Lineage operations served by the master.
#[async_trait]
pub trait LineageMasterClient: Send {
    /// Report persistence outcomes of a worker as one batch.
    ///
    /// The master must handle repeated reports of the same file idempotently.
    async fn report_persistence(&mut self, worker_id: WorkerId, batch: Vec<PersistReport>) -> Result<ReportResponse, RpcError>;
}
