use std::path::{Path, PathBuf};

use crate::client::{BlockWorkerClient, Connector, Endpoint, PooledConnection, RpcError, WorkerClientPool};
use crate::error::{Error, Result};
use crate::{BlockId, LockId};

/// Proof that a block is locked for reading on a worker.
///
/// A token is created by [`BlockLockCoordinator::lock()`] and consumed by [`BlockLockCoordinator::unlock()`]: it cannot
/// be cloned, so it is presented on unlock exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct LockToken {
    block_id: BlockId,
    lock_id: LockId,
    local_path: PathBuf,
}

impl LockToken {
    #[inline]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    #[inline]
    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    /// Local file backing the block.
    #[inline]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

/// Client side of the worker block lock protocol, over one pooled worker connection.
///
/// Locks are advisory at this level: the worker storage is responsible for keeping locked blocks in place, the
/// coordinator only drives the lifecycle of lock handles. Calls failing at the transport level mark the connection as
/// unhealthy so that it is not handed out again.
///
/// A call whose future is dropped before completion leaves the coordinator [interrupted](Self::is_interrupted()): its
/// connection may still carry the abandoned reply, so it is never reused.
#[derive(Debug)]
pub struct BlockLockCoordinator<C: Connector> {
    connection: PooledConnection<C>,
    /// Set while a call is awaiting its reply.
    in_flight: bool,
}

impl<C: Connector> BlockLockCoordinator<C> {
    #[inline]
    pub fn new(connection: PooledConnection<C>) -> Self {
        Self {
            connection,
            in_flight: false,
        }
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    #[inline]
    pub fn mark_unhealthy(&mut self) {
        self.connection.mark_unhealthy();
    }

    /// Whether a call was abandoned before its reply came back.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.in_flight
    }

    /// Give the underlying connection back to its pool.
    pub fn release(mut self) {
        if self.in_flight {
            self.connection.mark_unhealthy();
        }
        self.connection.release();
    }
}

impl<C> BlockLockCoordinator<C>
where
    C: Connector,
    C::Client: BlockWorkerClient,
{
    /// Acquire a connection to the worker at `endpoint`.
    pub async fn connect(pool: &WorkerClientPool<C>, endpoint: &Endpoint) -> Result<Self> {
        Ok(Self::new(pool.acquire(endpoint).await?))
    }

    /// Lock `block_id` for reading.
    ///
    /// Fails with [`Error::BlockNotLocallyAvailable`] if the worker has no copy of the block.
    pub async fn lock(&mut self, block_id: BlockId) -> Result<LockToken> {
        self.in_flight = true;
        let result = self.connection.lock_block(block_id).await;
        self.in_flight = false;

        match result {
            Ok(Some(result)) => {
                tracing::trace!("Block {block_id} locked with lock {} on `{}`", result.lock_id, self.endpoint());

                Ok(LockToken {
                    block_id,
                    lock_id: result.lock_id,
                    local_path: result.block_path,
                })
            }
            Ok(None) => Err(Error::BlockNotLocallyAvailable(block_id)),
            Err(err) => Err(self.failed(err)),
        }
    }

    /// Release the lock proven by `token`.
    ///
    /// Fails with [`Error::InvalidLockToken`] if the worker no longer knows about this lock.
    pub async fn unlock(&mut self, token: LockToken) -> Result<()> {
        self.unlock_held(&token).await
    }

    /// Release the lock proven by `token`, which stays with the caller until this call completes.
    pub(crate) async fn unlock_held(&mut self, token: &LockToken) -> Result<()> {
        let (block_id, lock_id) = (token.block_id, token.lock_id);

        self.in_flight = true;
        let result = self.connection.unlock_block(block_id, lock_id).await;
        self.in_flight = false;

        match result {
            Ok(()) => {
                tracing::trace!("Block {block_id} unlocked from lock {lock_id} on `{}`", self.endpoint());
                Ok(())
            }
            Err(RpcError::InvalidLockToken { block_id, lock_id }) => Err(Error::InvalidLockToken { block_id, lock_id }),
            Err(err) => Err(self.failed(err)),
        }
    }

    /// Notify the worker that the block has been read.
    ///
    /// This is best effort: failures are logged, never returned.
    pub async fn access_block(&mut self, block_id: BlockId) {
        self.in_flight = true;
        let result = self.connection.access_block(block_id).await;
        self.in_flight = false;

        if let Err(err) = result {
            tracing::warn!("Failed to report access to block {block_id} on `{}`: {err}", self.endpoint());

            let _ = self.failed(err);
        }
    }

    fn failed(&mut self, err: RpcError) -> Error {
        if err.is_transport() {
            self.connection.mark_unhealthy();
        }
        Error::Rpc(err)
    }
}
