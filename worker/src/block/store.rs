use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use super::BlockStore;
use crate::client::{LockBlockResult, RpcError};
use crate::{BlockId, LockId};

/// Blocks stored as flat files in a local directory, together with their read lock table.
///
/// ```text
///     - data dir
///       L {block_id}
///       L {block_id}
///       L ...
/// ```
///
/// Lock ids are never reused, so that a stale lock id cannot release a newer lock by accident.
#[derive(Debug)]
pub struct LocalBlockStore {
    data_dir: PathBuf,
    /// Held read locks and the block each one protects.
    locks: Mutex<HashMap<LockId, BlockId>>,
    last_access: Mutex<HashMap<BlockId, Instant>>,
    next_lock_id: AtomicU64,
}

impl LocalBlockStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            locks: Mutex::default(),
            last_access: Mutex::default(),
            next_lock_id: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Return the expected path in the local storage related to this block.
    #[inline]
    pub fn block_path(&self, block_id: BlockId) -> PathBuf {
        self.data_dir.join(block_id.to_string())
    }

    /// Record an access to a block, used to rank blocks for eviction.
    pub fn access_block(&self, block_id: BlockId) -> Result<(), RpcError> {
        if !self.block_path(block_id).is_file() {
            return Err(RpcError::Rejected(format!("block {block_id} does not exist")));
        }

        tracing::trace!("Access block {block_id}");

        self.last_access.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(block_id, Instant::now());

        Ok(())
    }

    pub fn last_access(&self, block_id: BlockId) -> Option<Instant> {
        self.last_access.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).get(&block_id).copied()
    }

    /// Number of read locks currently held, optionally restricted to one block.
    pub fn lock_count(&self, block_id: Option<BlockId>) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match block_id {
            Some(block_id) => locks.values().filter(|&&id| id == block_id).count(),
            None => locks.len(),
        }
    }

    /// Release every lock held on this store, as when the sessions holding them expire.
    pub fn release_all_locks(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = locks.len();

        if count > 0 {
            tracing::debug!("Releasing {count} expired block locks");
        }

        locks.clear();
        count
    }

    /// Release the given locks, as when the session holding them expires. Locks already released are skipped.
    pub fn release_locks(&self, lock_ids: impl IntoIterator<Item = LockId>) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        lock_ids.into_iter().filter(|lock_id| locks.remove(lock_id).is_some()).count()
    }
}

impl BlockStore for LocalBlockStore {
    fn lock_block(&self, block_id: BlockId) -> Option<LockBlockResult> {
        let block_path = self.block_path(block_id);

        if !block_path.is_file() {
            tracing::trace!("Block {block_id} is not stored locally: `{}`", block_path.display());
            return None;
        }

        let lock_id = self.next_lock_id.fetch_add(1, Ordering::Relaxed);
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(lock_id, block_id);

        tracing::trace!("Locked block {block_id} with lock {lock_id}");

        Some(LockBlockResult { lock_id, block_path })
    }

    fn unlock_block(&self, block_id: BlockId, lock_id: LockId) -> Result<(), RpcError> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match locks.get(&lock_id) {
            Some(&locked) if locked == block_id => {
                locks.remove(&lock_id);

                tracing::trace!("Unlocked block {block_id} with lock {lock_id}");

                Ok(())
            }
            _ => Err(RpcError::InvalidLockToken { block_id, lock_id }),
        }
    }
}
