//! Block access: lock coordination with the worker and local short-circuit reads.

use crate::client::{LockBlockResult, RpcError};
use crate::{BlockId, LockId};

mod coordinator;
pub use coordinator::*;

mod reader;
pub use reader::*;

mod store;
pub use store::*;

/// Worker-side view of the blocks stored on this host.
///
/// Blocks handed out by [`BlockStore::lock_block()`] stay in place, untouched, until the matching
/// [`BlockStore::unlock_block()`].
pub trait BlockStore: Send + Sync {
    /// Lock a block for reading, `None` if there is no local copy of it.
    fn lock_block(&self, block_id: BlockId) -> Option<LockBlockResult>;

    fn unlock_block(&self, block_id: BlockId, lock_id: LockId) -> Result<(), RpcError>;
}
