//! Counters exported to an external metrics collector.

use std::sync::atomic::{AtomicU64, Ordering};

/// Client side metrics of local short-circuit reads.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    blocks_read_local: AtomicU64,
    bytes_read_local: AtomicU64,
}

/// A point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    /// Number of streams which read at least one byte from a local block.
    pub blocks_read_local: u64,
    pub bytes_read_local: u64,
}

impl ClientMetrics {
    #[inline]
    pub fn inc_blocks_read_local(&self, n: u64) {
        self.blocks_read_local.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_bytes_read_local(&self, n: u64) {
        self.bytes_read_local.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            blocks_read_local: self.blocks_read_local.load(Ordering::Relaxed),
            bytes_read_local: self.bytes_read_local.load(Ordering::Relaxed),
        }
    }
}
