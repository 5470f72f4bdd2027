//! Fixtures shared by unit tests: a temporary block store and fake RPC peers.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::block::LocalBlockStore;
use crate::client::{BlockWorkerClient, Connector, Endpoint, LineageMasterClient, LocalWorkerClient, LockBlockResult, RpcError};
use crate::config::WorkerConf;
use crate::lineage::{LineageCommand, LocalUnderStorage, PersistOutcome, PersistReport, ReportResponse, UfsWriter, UnderStorage};
use crate::{BlockId, FileId, LockId, WorkerId};

/// Blocks with deterministic content in a temporary worker storage, with an under-storage next to it.
pub(crate) struct TestBlocks {
    _dir: TempDir,
    conf: Arc<WorkerConf>,
    store: Arc<LocalBlockStore>,
    ufs: Arc<FlakyUfs>,
}

impl TestBlocks {
    pub fn new(blocks: &[(BlockId, u64)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let ufs_dir = dir.path().join("ufs");
        std::fs::create_dir_all(&data_dir).unwrap();

        let store = Arc::new(LocalBlockStore::new(data_dir.clone()));
        for &(block_id, size) in blocks {
            let content = (0..size).map(|i| (i.wrapping_mul(31).wrapping_add(block_id) % 251) as u8).collect::<Vec<_>>();
            std::fs::write(store.block_path(block_id), content).unwrap();
        }

        let mut conf = WorkerConf::default();
        conf.worker.data_dir = data_dir;
        conf.lineage.under_storage_dir = ufs_dir.clone();

        Self {
            _dir: dir,
            conf: Arc::new(conf),
            store,
            ufs: Arc::new(FlakyUfs::new(ufs_dir)),
        }
    }

    pub fn conf(&self) -> Arc<WorkerConf> {
        Arc::clone(&self.conf)
    }

    pub fn store(&self) -> Arc<LocalBlockStore> {
        Arc::clone(&self.store)
    }

    pub fn ufs(&self) -> Arc<FlakyUfs> {
        Arc::clone(&self.ufs)
    }

    /// Endpoint of the local worker, as configured.
    pub fn endpoint(&self) -> Endpoint {
        self.conf.local_endpoint()
    }

    pub fn content(&self, block_id: BlockId) -> Vec<u8> {
        std::fs::read(self.store.block_path(block_id)).unwrap()
    }
}

/// Injected worker failures and call counters, shared by all the clients of a [`FakeConnector`].
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub lock: AtomicBool,
    pub unlock: AtomicBool,
    pub access: AtomicBool,
    /// Never reply to lock calls, once the lock is taken.
    pub stall_lock: AtomicBool,
    /// Never reply to access calls.
    pub stall_access: AtomicBool,
    pub locks: AtomicUsize,
    pub unlocks: AtomicUsize,
}

impl Faults {
    fn check(flag: &AtomicBool, call: &str) -> Result<(), RpcError> {
        if flag.load(Ordering::SeqCst) {
            return Err(RpcError::Unavailable(format!("injected {call} failure")));
        }
        Ok(())
    }

    async fn stall(flag: &AtomicBool) {
        if flag.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

/// Connector to an in-process worker, accepting any endpoint.
#[derive(Debug)]
pub(crate) struct FakeConnector {
    store: Arc<LocalBlockStore>,
    pub connects: AtomicUsize,
    pub unreachable: AtomicBool,
    pub faults: Arc<Faults>,
}

impl FakeConnector {
    pub fn new(store: Arc<LocalBlockStore>) -> Self {
        Self {
            store,
            connects: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
            faults: Arc::default(),
        }
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new(Arc::new(LocalBlockStore::new(PathBuf::from("missing"))))
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Client = FakeWorkerClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Client, RpcError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RpcError::Unavailable(format!("connection refused by `{endpoint}`")));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);

        Ok(FakeWorkerClient {
            inner: LocalWorkerClient::new(Arc::clone(&self.store)),
            faults: Arc::clone(&self.faults),
        })
    }
}

#[derive(Debug)]
pub(crate) struct FakeWorkerClient {
    inner: LocalWorkerClient,
    faults: Arc<Faults>,
}

#[async_trait]
impl BlockWorkerClient for FakeWorkerClient {
    async fn lock_block(&mut self, block_id: BlockId) -> Result<Option<LockBlockResult>, RpcError> {
        self.faults.locks.fetch_add(1, Ordering::SeqCst);
        Faults::check(&self.faults.lock, "lock")?;
        let result = self.inner.lock_block(block_id).await;
        Faults::stall(&self.faults.stall_lock).await;
        result
    }

    async fn unlock_block(&mut self, block_id: BlockId, lock_id: LockId) -> Result<(), RpcError> {
        self.faults.unlocks.fetch_add(1, Ordering::SeqCst);
        Faults::check(&self.faults.unlock, "unlock")?;
        self.inner.unlock_block(block_id, lock_id).await
    }

    async fn access_block(&mut self, block_id: BlockId) -> Result<(), RpcError> {
        Faults::check(&self.faults.access, "access")?;
        Faults::stall(&self.faults.stall_access).await;
        self.inner.access_block(block_id).await
    }
}

/// Master recording persistence reports.
///
/// By default it acknowledges every file reported as persisted.
#[derive(Debug)]
pub(crate) struct FakeMaster {
    state: Arc<MasterState>,
    pub acknowledge: Arc<AtomicBool>,
    /// Refuse connections.
    pub unreachable: AtomicBool,
    /// Fail reports at the transport level.
    pub reject: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct MasterState {
    reports: Mutex<Vec<(WorkerId, Vec<PersistReport>)>>,
    commands: Mutex<VecDeque<Vec<LineageCommand>>>,
}

impl Default for FakeMaster {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            acknowledge: Arc::new(AtomicBool::new(true)),
            unreachable: AtomicBool::new(false),
            reject: Arc::default(),
        }
    }
}

impl FakeMaster {
    /// Reports received so far, oldest first.
    pub fn reports(&self) -> Vec<(WorkerId, Vec<PersistReport>)> {
        self.state.reports.lock().unwrap().clone()
    }

    /// Queue commands returned with the next reply.
    pub fn push_commands(&self, commands: Vec<LineageCommand>) {
        self.state.commands.lock().unwrap().push_back(commands);
    }
}

#[async_trait]
impl Connector for FakeMaster {
    type Client = FakeMasterClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Client, RpcError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RpcError::Unavailable(format!("connection refused by `{endpoint}`")));
        }

        Ok(FakeMasterClient {
            state: Arc::clone(&self.state),
            acknowledge: Arc::clone(&self.acknowledge),
            reject: Arc::clone(&self.reject),
        })
    }
}

#[derive(Debug)]
pub(crate) struct FakeMasterClient {
    state: Arc<MasterState>,
    acknowledge: Arc<AtomicBool>,
    reject: Arc<AtomicBool>,
}

#[async_trait]
impl LineageMasterClient for FakeMasterClient {
    async fn report_persistence(&mut self, worker_id: WorkerId, batch: Vec<PersistReport>) -> Result<ReportResponse, RpcError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(RpcError::Unavailable("connection reset".into()));
        }

        let acknowledged = match self.acknowledge.load(Ordering::SeqCst) {
            true => batch
                .iter()
                .filter(|report| report.outcome == PersistOutcome::Persisted)
                .map(|report| report.file_id)
                .collect(),
            false => HashSet::new(),
        };

        self.state.reports.lock().unwrap().push((worker_id, batch));

        Ok(ReportResponse {
            acknowledged,
            commands: self.state.commands.lock().unwrap().pop_front().unwrap_or_default(),
        })
    }
}

/// Local under-storage failing on demand for chosen files.
#[derive(Debug)]
pub(crate) struct FlakyUfs {
    pub inner: LocalUnderStorage,
    failing: Mutex<HashSet<FileId>>,
}

impl FlakyUfs {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: LocalUnderStorage::new(root),
            failing: Mutex::default(),
        }
    }

    /// Make every following write of `file_id` fail.
    pub fn fail_file(&self, file_id: FileId) {
        self.failing.lock().unwrap().insert(file_id);
    }
}

#[async_trait]
impl UnderStorage for FlakyUfs {
    async fn create(&self, file_id: FileId) -> io::Result<UfsWriter> {
        if self.failing.lock().unwrap().contains(&file_id) {
            return Err(io::Error::other(format!("injected write failure on file {file_id}")));
        }
        self.inner.create(file_id).await
    }

    async fn commit(&self, file_id: FileId) -> io::Result<()> {
        self.inner.commit(file_id).await
    }

    async fn abort(&self, file_id: FileId) -> io::Result<()> {
        self.inner.abort(file_id).await
    }
}
