//! Worker-side core of a distributed in-memory storage system.
//!
//! This crate provides the pieces a worker node and its co-located clients are made of:
//! - a per-endpoint pool of worker connections, bounding concurrent connections and releasing them on every path,
//! - a block lock protocol keeping a block in place while it is being read,
//! - a short-circuit reader serving locally stored blocks straight from memory-mapped files,
//! - lineage persistence, which writes cached-only files to the under-storage and reports them to the master on a
//!   fixed heartbeat.
//!
//! Transport and master-side metadata are out of scope: RPC peers are reached through the [`client::Connector`] trait,
//! and implementations of [`client::BlockWorkerClient`] and [`client::LineageMasterClient`].
//!
//! Blocks are stored as flat files named after their id in the worker data directory, lineage files are persisted to
//! the under-storage directory:
//!
//! ```text
//!     - data dir                        - under-storage dir
//!       L {block_id}                      L {file_id}
//!       L {block_id}                      L {file_id}.tmp    being persisted
//!       L ...                             L ...
//! ```
//!
//! A client stream on a local block goes through the following steps:
//!
//! ```text
//!     WorkerClientPool::acquire ─► BlockLockCoordinator::lock ─► mmap + reads ─► access_block ─► unlock ─► release
//! ```
//!
//! Every step after a successful acquisition is undone on failure, so that neither a lock nor a connection can leak.

/// Id of a block, unique across the cluster.
pub type BlockId = u64;
/// Id of a file, unique across the cluster.
pub type FileId = u64;
/// Id of a block lock, unique on a worker.
pub type LockId = u64;
/// Id assigned to a worker by the master on registration, `0` until then.
pub type WorkerId = u64;

pub mod block;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod lineage;
pub mod metrics;
pub mod task;

mod util;

#[cfg(test)]
mod testing;
