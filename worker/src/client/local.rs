use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{BlockWorkerClient, Connector, Endpoint, LockBlockResult, RpcError};
use crate::block::{BlockStore, LocalBlockStore};
use crate::{BlockId, LockId};

/// In-process binding to a worker's block store.
///
/// Used by clients living in the same process as the worker: calls go straight to the [`LocalBlockStore`] instead of
/// through the network, while still following the pooled connection discipline.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    endpoint: Endpoint,
    store: Arc<LocalBlockStore>,
}

impl LocalConnector {
    pub fn new(endpoint: Endpoint, store: Arc<LocalBlockStore>) -> Self {
        Self { endpoint, store }
    }

    #[inline]
    pub fn store(&self) -> &Arc<LocalBlockStore> {
        &self.store
    }
}

#[async_trait]
impl Connector for LocalConnector {
    type Client = LocalWorkerClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Client, RpcError> {
        if *endpoint != self.endpoint {
            return Err(RpcError::Unavailable(format!("no worker is served in-process at `{endpoint}`")));
        }

        Ok(LocalWorkerClient::new(Arc::clone(&self.store)))
    }
}

/// A session on the worker's block store.
///
/// Locks taken through a client belong to its session: those still held when the client is dropped are released, the
/// way a worker expires the locks of a closed connection.
#[derive(Debug)]
pub struct LocalWorkerClient {
    store: Arc<LocalBlockStore>,
    held: HashSet<LockId>,
}

impl LocalWorkerClient {
    pub fn new(store: Arc<LocalBlockStore>) -> Self {
        Self {
            store,
            held: HashSet::new(),
        }
    }

    /// Number of locks held by this session.
    #[inline]
    pub fn held_locks(&self) -> usize {
        self.held.len()
    }
}

#[async_trait]
impl BlockWorkerClient for LocalWorkerClient {
    async fn lock_block(&mut self, block_id: BlockId) -> Result<Option<LockBlockResult>, RpcError> {
        let result = self.store.lock_block(block_id);

        if let Some(ref result) = result {
            self.held.insert(result.lock_id);
        }
        Ok(result)
    }

    async fn unlock_block(&mut self, block_id: BlockId, lock_id: LockId) -> Result<(), RpcError> {
        self.store.unlock_block(block_id, lock_id)?;
        self.held.remove(&lock_id);
        Ok(())
    }

    async fn access_block(&mut self, block_id: BlockId) -> Result<(), RpcError> {
        self.store.access_block(block_id)
    }
}

impl Drop for LocalWorkerClient {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }

        let released = self.store.release_locks(self.held.drain());
        if released > 0 {
            tracing::debug!("Session closed, releasing {released} block locks");
        }
    }
}
