use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::client::{Connector, LineageMasterClient, WorkerClientPool};
use crate::config::WorkerConf;
use crate::error::{ConnectionError, Error, Result};
use crate::heartbeat::HeartbeatTask;
use crate::task::{self, Aborted, RemoteHandle};
use crate::WorkerId;

const HEARTBEAT_POOL: &str = "lineage-worker-heartbeat";

#[derive(Debug)]
enum State {
    Idle,
    Running {
        token: CancellationToken,
        handle: RemoteHandle<Result<u64, Aborted>>,
    },
    Stopped,
}

/// The lineage worker service, running the lineage heartbeat in the background.
///
/// ```text
///     Idle ── start() ──► Running ── stop() ──► Stopped
///       └──────────────── stop() ───────────────────┘
/// ```
///
/// A stopped service has closed its master connection pool and cannot be started again.
#[derive(Debug)]
pub struct LineageWorker<C: Connector> {
    conf: Arc<WorkerConf>,
    worker_id: WorkerId,
    manager: Arc<LineageDataManager>,
    master_pool: Arc<WorkerClientPool<C>>,
    tasks: task::Pool,
    state: State,
}

impl<C> LineageWorker<C>
where
    C: Connector,
    C::Client: LineageMasterClient,
{
    /// Create the service of a worker registered to the master as `worker_id`.
    ///
    /// Fails with [`Error::Unregistered`] if the worker has no id yet.
    pub fn new(conf: Arc<WorkerConf>, worker_id: WorkerId, manager: Arc<LineageDataManager>, master_pool: Arc<WorkerClientPool<C>>) -> Result<Self> {
        if worker_id == 0 {
            return Err(Error::Unregistered);
        }

        Ok(Self {
            conf,
            worker_id,
            manager,
            master_pool,
            tasks: task::Pool::new(HEARTBEAT_POOL),
            state: State::Idle,
        })
    }

    #[inline]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    #[inline]
    pub fn manager(&self) -> &Arc<LineageDataManager> {
        &self.manager
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Schedule the lineage heartbeat.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            State::Idle => {}
            State::Running { .. } => return Err(Error::AlreadyStarted),
            State::Stopped => return Err(ConnectionError::Closed.into()),
        }

        self.conf.validate()?;
        let interval = self.conf.heartbeat_interval();

        self.tasks.start(self.conf.heartbeat_threads()?);

        let token = CancellationToken::new();
        let executor = LineageSyncExecutor::new(
            self.worker_id,
            Arc::clone(&self.manager),
            Arc::clone(&self.master_pool),
            self.conf.master_endpoint(),
        );
        let heartbeat = HeartbeatTask::new(format!("lineage-worker-{}", self.worker_id), executor, interval, token.clone());

        let (handle, _) = self.tasks.execute(heartbeat.run());

        tracing::info!("Lineage worker {} started, heartbeat every {interval:?}", self.worker_id);

        self.state = State::Running { token, handle };

        Ok(())
    }

    /// Stop the heartbeat, waiting for the tick in flight to exit, and release the service resources.
    pub async fn stop(&mut self) {
        if let State::Running { token, handle } = std::mem::replace(&mut self.state, State::Stopped) {
            token.cancel();

            match handle.await {
                Ok(ticks) => tracing::debug!("Lineage heartbeat stopped after {ticks} ticks"),
                Err(Aborted) => tracing::warn!("Lineage heartbeat was aborted"),
            }
        }

        self.master_pool.close();
        self.tasks.stop().await;

        tracing::info!("Lineage worker {} stopped", self.worker_id);
    }
}
