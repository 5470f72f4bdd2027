use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};

use super::{BlockLockCoordinator, LockToken};
use crate::client::{BlockWorkerClient, ClientContext, Connector};
use crate::error::{Error, Result};
use crate::metrics::ClientMetrics;
use crate::util::Cleanup;
use crate::BlockId;

/// Per-stream state of a block read.
#[derive(Debug, Default)]
pub struct BlockReadSession {
    /// Offset of the next byte to read within the block.
    position: u64,
    /// Region mapped by the last buffered read, if any.
    buffer: Option<MappedRegion>,
    closed: bool,
    /// Whether any byte has been read, drives access reporting on close.
    block_is_read: bool,
    access_reported: bool,
}

impl BlockReadSession {
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn block_is_read(&self) -> bool {
        self.block_is_read
    }
}

#[derive(Debug)]
struct MappedRegion {
    /// Offset of the region within the block.
    offset: u64,
    map: Mmap,
}

impl MappedRegion {
    #[inline]
    fn contains(&self, position: u64) -> bool {
        position >= self.offset && position < self.offset + self.map.len() as u64
    }

    /// Copy as many bytes as possible from `position` into `dst`.
    fn copy_to(&self, position: u64, dst: &mut [u8]) -> usize {
        let start = (position - self.offset) as usize;
        let len = dst.len().min(self.map.len() - start);

        dst[..len].copy_from_slice(&self.map[start..start + len]);
        len
    }
}

/// A stream reading a block straight from the local worker's storage.
///
/// The block is locked on the local worker for the whole life of the stream and its backing file is memory-mapped,
/// bypassing the data transfer path entirely. Two read modes are available:
/// - [`LocalBlockReader::read()`] serves small reads from a mapped region of `read_buffer_size` bytes, which is replaced
///   once exhausted;
/// - [`LocalBlockReader::direct_read()`] maps exactly the requested range, copies it to the caller's buffer and unmaps it
///   right away. It never uses nor replaces the buffered region.
///
/// Both modes read exactly the requested number of bytes or fail.
///
/// A stream must be used by one task at a time and should be [closed](LocalBlockReader::close()) once done, which unlocks
/// the block and gives the worker connection back to the pool.
#[derive(Debug)]
pub struct LocalBlockReader<C: Connector> {
    block_id: BlockId,
    block_size: u64,
    buffer_size: usize,
    coordinator: Option<BlockLockCoordinator<C>>,
    token: Option<LockToken>,
    file: Option<File>,
    session: BlockReadSession,
    metrics: Arc<ClientMetrics>,
}

impl<C> LocalBlockReader<C>
where
    C: Connector,
    C::Client: BlockWorkerClient,
{
    /// Open a stream on `block_id` through the worker running on this host.
    ///
    /// Fails with [`Error::BlockNotLocallyAvailable`] if the local worker has no copy of the block, in which case callers
    /// should fall back to a remote read. On any failure, whatever was acquired so far (connection, lock) is released
    /// before returning. Dropping the returned future halfway retires the connection along with the lock it holds.
    pub async fn open(ctx: &ClientContext<C>, block_id: BlockId, block_size: u64) -> Result<Self> {
        let endpoint = ctx.local_endpoint();
        let mut coordinator = BlockLockCoordinator::connect(ctx.pool(), &endpoint).await?;

        let token = match coordinator.lock(block_id).await {
            Ok(token) => token,
            Err(err) => {
                coordinator.release();
                return Err(err);
            }
        };

        let file = match open_block_file(token.local_path(), block_size).await {
            Ok(file) => file,
            Err(err) => {
                tracing::debug!("Failed to open block {block_id}, releasing its lock: {err}");

                if let Err(unlock_err) = coordinator.unlock(token).await {
                    tracing::warn!("Failed to unlock block {block_id} after a failed open: {unlock_err}");
                }
                coordinator.release();
                return Err(err.into());
            }
        };

        tracing::debug!("Opened local stream on block {block_id} from `{endpoint}`");

        Ok(Self {
            block_id,
            block_size,
            buffer_size: ctx.conf().client.read_buffer_size,
            coordinator: Some(coordinator),
            token: Some(token),
            file: Some(file),
            session: BlockReadSession::default(),
            metrics: Arc::clone(ctx.metrics()),
        })
    }

    /// Fill `dst` from the current position, through the buffered region.
    ///
    /// Requests at least as large as the read buffer go through [`LocalBlockReader::direct_read()`].
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.check_read(dst.len())?;

        if dst.is_empty() {
            return Ok(0);
        }
        if dst.len() >= self.buffer_size {
            return self.direct_read(dst);
        }

        let start = self.session.position;
        let mut copied = 0;

        while copied < dst.len() {
            let position = self.session.position;

            let region = match &self.session.buffer {
                Some(region) if region.contains(position) => region,
                _ => {
                    if let Err(err) = self.buffered_read() {
                        // nothing was read as far as the caller knows
                        self.session.position = start;
                        return Err(err);
                    }
                    continue;
                }
            };

            let len = region.copy_to(position, &mut dst[copied..]);
            copied += len;
            self.session.position += len as u64;
        }

        self.record_read(copied);

        Ok(copied)
    }

    /// Fill `dst` from the current position with a transient mapping of exactly `dst.len()` bytes.
    pub fn direct_read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.check_read(dst.len())?;

        if dst.is_empty() {
            return Ok(0);
        }

        let map = self.map(self.session.position, dst.len())?;
        dst.copy_from_slice(&map[..]);
        // unmap right away, direct reads must not pile up mappings
        drop(map);

        self.session.position += dst.len() as u64;
        self.record_read(dst.len());

        Ok(dst.len())
    }

    /// Move to `position` within the block.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if self.session.closed {
            return Err(Error::Closed);
        }
        if position > self.block_size {
            return Err(self.out_of_range(position, 0));
        }

        self.session.position = position;
        Ok(())
    }

    /// Skip up to `n` bytes, returning how many were actually skipped.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        if self.session.closed {
            return Err(Error::Closed);
        }

        let n = n.min(self.remaining());
        self.session.position += n;
        Ok(n)
    }

    #[inline]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.session.position
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.block_size - self.session.position
    }

    #[inline]
    pub fn session(&self) -> &BlockReadSession {
        &self.session
    }

    /// Close the stream.
    ///
    /// The mappings are dropped first. If anything was read, the access is then reported to the worker (best effort)
    /// and counted as a local block read. Then the block is unlocked and the connection released. Every step runs
    /// whatever happened to the previous ones, the first failure being returned afterwards. Closing a closed stream
    /// does nothing.
    ///
    /// If the returned future is dropped before completion, the stream stays open and a later call finishes the job.
    /// A call interrupted on the worker connection retires that connection, and the lock with it.
    pub async fn close(&mut self) -> Result<()> {
        if self.session.closed {
            return Ok(());
        }

        // the block must stay locked as long as it is mapped
        self.session.buffer = None;
        self.file = None;

        let mut cleanup = Cleanup::<Error>::new();

        if self.session.block_is_read && !self.session.access_reported {
            if let Some(coordinator) = self.coordinator.as_mut().filter(|coordinator| !coordinator.is_interrupted()) {
                coordinator.access_block(self.block_id).await;
            }
            self.session.access_reported = true;
            self.metrics.inc_blocks_read_local(1);
        }

        if let Some(token) = &self.token {
            match self.coordinator.as_mut() {
                Some(coordinator) if !coordinator.is_interrupted() => {
                    cleanup.record(coordinator.unlock_held(token).await);
                }
                _ => tracing::debug!("Lock {} on block {} goes with its interrupted connection", token.lock_id(), self.block_id),
            }
            self.token = None;
        }

        if let Some(coordinator) = self.coordinator.take() {
            coordinator.release();
        }
        self.session.closed = true;

        tracing::debug!("Closed local stream on block {}", self.block_id);

        cleanup.finish()
    }

    /// Map the next region for buffered reads, dropping the previous one first.
    fn buffered_read(&mut self) -> Result<()> {
        self.session.buffer = None;

        let position = self.session.position;
        let len = self.remaining().min(self.buffer_size as u64) as usize;

        self.session.buffer = Some(MappedRegion {
            offset: position,
            map: self.map(position, len)?,
        });

        Ok(())
    }

    fn map(&self, offset: u64, len: usize) -> Result<Mmap> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;

        // SAFETY: the file is opened read-only and the block is locked on the worker, which keeps it in place and
        // unmodified until unlocked. `close()` drops every mapping of this stream before unlocking, and so does `Drop`
        // by retiring the connection holding the lock after the mappings are gone.
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map(file)? };

        Ok(map)
    }

    fn check_read(&self, len: usize) -> Result<()> {
        if self.session.closed {
            return Err(Error::Closed);
        }
        if len as u64 > self.remaining() {
            return Err(self.out_of_range(self.session.position, len));
        }
        Ok(())
    }

    fn record_read(&mut self, len: usize) {
        self.session.block_is_read = true;
        self.metrics.inc_bytes_read_local(len as u64);
    }

    fn out_of_range(&self, position: u64, len: usize) -> Error {
        Error::OutOfRange {
            block_id: self.block_id,
            position,
            len,
            block_size: self.block_size,
        }
    }
}

impl<C: Connector> Drop for LocalBlockReader<C> {
    fn drop(&mut self) {
        self.session.buffer = None;
        self.file = None;

        if let Some(mut coordinator) = self.coordinator.take() {
            tracing::warn!("Local stream on block {} dropped without being closed", self.block_id);

            // the lock cannot be released from here, let the worker expire it with the connection
            coordinator.mark_unhealthy();
        }
    }
}

async fn open_block_file(path: &Path, block_size: u64) -> io::Result<File> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();

    if len < block_size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("block file `{}` holds {len} bytes, expected {block_size}", path.display()),
        ));
    }

    Ok(file.into_std().await)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::client::ExhaustedPolicy;
    use crate::metrics::ClientMetricsSnapshot;
    use crate::testing::{FakeConnector, TestBlocks};

    const MB: u64 = 1024 * 1024;

    fn context(blocks: &TestBlocks) -> ClientContext<FakeConnector> {
        ClientContext::new(blocks.conf(), FakeConnector::new(blocks.store()))
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_read_whole_block_in_small_chunks() {
        let blocks = TestBlocks::new(&[(1, MB)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, MB).await.unwrap();

        let mut content = Vec::with_capacity(MB as usize);
        let mut chunk = [0; 4096];
        let mut total = 0;

        while reader.remaining() > 0 {
            total += reader.read(&mut chunk).unwrap();
            content.extend_from_slice(&chunk);
        }

        assert_eq!(total, 1_048_576);
        assert_eq!(content, blocks.content(1));

        reader.close().await.unwrap();

        assert_eq!(
            ctx.metrics().snapshot(),
            ClientMetricsSnapshot {
                blocks_read_local: 1,
                bytes_read_local: 1_048_576,
            }
        );
        assert_eq!(blocks.store().lock_count(None), 0);
        assert!(blocks.store().last_access(1).is_some());
        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), 0);
    }

    #[tokio::test]
    async fn test_buffered_read_across_regions() {
        let blocks = TestBlocks::new(&[(1, 10_000)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 10_000).await.unwrap();
        reader.buffer_size = 1000;

        reader.seek(990).unwrap();
        let mut dst = [0; 20];
        assert_eq!(reader.read(&mut dst).unwrap(), 20);
        assert_eq!(dst[..], blocks.content(1)[990..1010]);

        let region = reader.session.buffer.as_ref().unwrap();
        assert_eq!(region.offset, 990);
        assert_eq!(region.map.len(), 1000);

        // the mapped region is reused for nearby reads
        assert_eq!(reader.read(&mut dst).unwrap(), 20);
        assert_eq!(dst[..], blocks.content(1)[1010..1030]);
        assert_eq!(reader.session.buffer.as_ref().unwrap().offset, 990);

        // a read crossing the end of the region continues from a new one
        reader.seek(1980).unwrap();
        assert_eq!(reader.read(&mut dst).unwrap(), 20);
        assert_eq!(dst[..], blocks.content(1)[1980..2000]);
        assert_eq!(reader.session.buffer.as_ref().unwrap().offset, 1990);

        reader.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_read_is_exact() {
        let blocks = TestBlocks::new(&[(1, 8192)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 8192).await.unwrap();

        let mut dst = vec![0; 5000];
        assert_eq!(reader.direct_read(&mut dst).unwrap(), 5000);
        assert_eq!(dst, blocks.content(1)[..5000]);
        assert!(reader.session().buffer.is_none(), "direct reads must not keep a mapping");

        // never a short count: past the end of the block is an error
        let err = reader.direct_read(&mut dst).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { position: 5000, len: 5000, .. }), "{err}");
        assert_eq!(reader.position(), 5000);

        let mut dst = vec![0; 3192];
        assert_eq!(reader.direct_read(&mut dst).unwrap(), 3192);
        assert_eq!(reader.remaining(), 0);

        reader.close().await.unwrap();
        assert_eq!(ctx.metrics().snapshot().bytes_read_local, 8192);
    }

    #[tokio::test]
    async fn test_large_read_goes_direct() {
        let blocks = TestBlocks::new(&[(1, 4 * MB)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 4 * MB).await.unwrap();

        let mut dst = vec![0; 2 * MB as usize];
        assert_eq!(reader.read(&mut dst).unwrap(), dst.len());
        assert_eq!(dst, blocks.content(1)[..2 * MB as usize]);
        assert!(reader.session().buffer.is_none());

        reader.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        reader.read(&mut [0; 16]).unwrap();

        reader.close().await.unwrap();
        let after_first = (ctx.metrics().snapshot(), blocks.store().lock_count(None), ctx.pool().idle(&blocks.endpoint()));

        reader.close().await.unwrap();
        let after_second = (ctx.metrics().snapshot(), blocks.store().lock_count(None), ctx.pool().idle(&blocks.endpoint()));

        assert_eq!(after_first, after_second);
        assert_eq!(after_first.0.blocks_read_local, 1);
        assert!(reader.session().is_closed());
        assert!(matches!(reader.read(&mut [0; 1]), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_close_without_read() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        reader.close().await.unwrap();

        assert_eq!(ctx.metrics().snapshot(), ClientMetricsSnapshot::default());
        assert!(blocks.store().last_access(1).is_none());
        assert_eq!(blocks.store().lock_count(None), 0);
    }

    #[tokio::test]
    async fn test_lock_unlock_pairing() {
        let blocks = TestBlocks::new(&[(1, 1024), (2, 2048)]);
        let ctx = context(&blocks);

        for (block_id, size) in [(1, 1024), (2, 2048), (1, 1024)] {
            let mut reader = LocalBlockReader::open(&ctx, block_id, size).await.unwrap();
            assert_eq!(blocks.store().lock_count(Some(block_id)), 1);
            reader.skip(10).unwrap();
            reader.close().await.unwrap();
        }

        let faults = &ctx.pool().connector().faults;
        assert_eq!(faults.locks.load(Ordering::SeqCst), 3);
        assert_eq!(faults.unlocks.load(Ordering::SeqCst), 3);
        assert_eq!(blocks.store().lock_count(None), 0);
    }

    #[tokio::test]
    async fn test_block_not_locally_available() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);
        let before = ctx.pool().outstanding(&blocks.endpoint());

        let err = LocalBlockReader::open(&ctx, 2, 1024).await.unwrap_err();

        assert!(matches!(err, Error::BlockNotLocallyAvailable(2)), "{err}");
        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), before);
    }

    #[tokio::test]
    async fn test_failed_opens_do_not_leak() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let conf = blocks.conf();
        let pool = crate::client::WorkerClientPool::new(FakeConnector::new(blocks.store()), 2, ExhaustedPolicy::FailFast);
        let ctx = ClientContext::with_pool(conf, Arc::new(pool));

        for i in 0..50 {
            let err = match i % 2 {
                // missing block
                0 => LocalBlockReader::open(&ctx, 2, 1024).await.unwrap_err(),
                // backing file shorter than the block
                _ => LocalBlockReader::open(&ctx, 1, 4096).await.unwrap_err(),
            };
            assert!(matches!(err, Error::BlockNotLocallyAvailable(_) | Error::Io(_)), "{err}");
        }

        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), 0);
        assert_eq!(blocks.store().lock_count(None), 0);

        // the pool still has its two slots
        let mut first = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        let mut second = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        first.close().await.unwrap();
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_failure_surfaces_after_cleanup() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        reader.read(&mut [0; 8]).unwrap();

        let faults = &ctx.pool().connector().faults;
        faults.access.store(true, Ordering::SeqCst);
        faults.unlock.store(true, Ordering::SeqCst);

        let err = reader.close().await.unwrap_err();
        assert!(matches!(err, Error::Rpc(_)), "{err}");

        // every cleanup step ran anyway
        assert_eq!(ctx.metrics().snapshot().blocks_read_local, 1);
        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), 0);
        assert!(reader.session().buffer.is_none());
        assert!(reader.file.is_none());

        reader.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_on_close() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        blocks.store().release_all_locks();

        assert!(matches!(reader.close().await, Err(Error::InvalidLockToken { block_id: 1, .. })));
        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_drop_without_close_releases_connection() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);

        let reader = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        drop(reader);

        assert!(logs_contain("dropped without being closed"));
        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), 0);
        assert_eq!(ctx.pool().idle(&blocks.endpoint()), 0);
        assert_eq!(blocks.store().lock_count(None), 0);
    }

    #[tokio::test]
    async fn test_cancelled_close_can_be_retried() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 1024).await.unwrap();
        reader.read(&mut [0; 8]).unwrap();

        let faults = &ctx.pool().connector().faults;
        faults.stall_access.store(true, Ordering::SeqCst);

        let cancelled = tokio::time::timeout(Duration::from_millis(20), reader.close()).await;
        assert!(cancelled.is_err());
        assert!(!reader.session().is_closed());
        assert!(reader.session().buffer.is_none());
        assert_eq!(blocks.store().lock_count(None), 1);

        faults.stall_access.store(false, Ordering::SeqCst);
        reader.close().await.unwrap();

        assert!(reader.session().is_closed());
        assert_eq!(ctx.metrics().snapshot().blocks_read_local, 1);
        assert_eq!(blocks.store().lock_count(None), 0);
        // the interrupted connection is closed, not reused
        assert_eq!(ctx.pool().idle(&blocks.endpoint()), 0);
        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), 0);
        // no unlock went through the interrupted connection
        assert_eq!(faults.unlocks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_open_does_not_leak() {
        let blocks = TestBlocks::new(&[(1, 1024)]);
        let ctx = context(&blocks);

        ctx.pool().connector().faults.stall_lock.store(true, Ordering::SeqCst);

        let cancelled = tokio::time::timeout(Duration::from_millis(20), LocalBlockReader::open(&ctx, 1, 1024)).await;
        assert!(cancelled.is_err());

        assert_eq!(blocks.store().lock_count(None), 0);
        assert_eq!(ctx.pool().idle(&blocks.endpoint()), 0);
        assert_eq!(ctx.pool().outstanding(&blocks.endpoint()), 0);
    }

    #[tokio::test]
    async fn test_failed_buffered_read_keeps_position() {
        let blocks = TestBlocks::new(&[(1, 4000)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 4000).await.unwrap();
        reader.buffer_size = 1000;

        // maps [995, 1995)
        reader.seek(995).unwrap();
        reader.read(&mut [0; 2]).unwrap();
        reader.seek(1990).unwrap();
        reader.read(&mut [0; 2]).unwrap();
        let bytes_read = ctx.metrics().snapshot().bytes_read_local;

        // the last 3 bytes of the region are copied, then the next region cannot be mapped
        reader.file = None;
        let err = reader.read(&mut [0; 10]).unwrap_err();

        assert!(matches!(err, Error::Closed), "{err}");
        assert_eq!(reader.position(), 1992);
        assert_eq!(ctx.metrics().snapshot().bytes_read_local, bytes_read);

        reader.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_seek_and_skip() {
        let blocks = TestBlocks::new(&[(1, 100)]);
        let ctx = context(&blocks);

        let mut reader = LocalBlockReader::open(&ctx, 1, 100).await.unwrap();

        assert_eq!(reader.skip(30).unwrap(), 30);
        let mut dst = [0; 10];
        reader.read(&mut dst).unwrap();
        assert_eq!(dst[..], blocks.content(1)[30..40]);

        assert_eq!(reader.skip(1000).unwrap(), 60);
        assert_eq!(reader.remaining(), 0);
        assert!(matches!(reader.seek(101), Err(Error::OutOfRange { position: 101, .. })));

        reader.seek(0).unwrap();
        reader.read(&mut dst).unwrap();
        assert_eq!(dst[..], blocks.content(1)[..10]);

        reader.close().await.unwrap();
    }
}
