use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::client::{Connector, Endpoint, LineageMasterClient, WorkerClientPool};
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatExecutor;
use crate::WorkerId;

/// What a heartbeat tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Files written to the under-storage during this tick.
    pub persisted: usize,
    pub failed: usize,
    /// Files acknowledged by the master and no longer tracked.
    pub acknowledged: usize,
    pub abandoned: usize,
    /// Files the master asked to persist.
    pub scheduled: usize,
}

/// Heartbeat work of the lineage worker: persist pending files then report to the master.
///
/// Within a tick:
/// - `Pending` and `Failed` files are persisted one by one, a failure (or a panic) only affects the file at hand;
/// - `Persisting` files, already written but not acknowledged yet, are reported again without being rewritten;
/// - the whole batch is sent to the master in one report.
///
/// If the report cannot be delivered, or the tick is cancelled, tracked files are rolled back to the states they had
/// when the tick started, so that they are all reported again on the next one. Files already committed to the
/// under-storage stay there.
#[derive(Debug)]
pub struct LineageSyncExecutor<C: Connector> {
    worker_id: WorkerId,
    manager: Arc<LineageDataManager>,
    pool: Arc<WorkerClientPool<C>>,
    master: Endpoint,
}

impl<C> LineageSyncExecutor<C>
where
    C: Connector,
    C::Client: LineageMasterClient,
{
    pub fn new(worker_id: WorkerId, manager: Arc<LineageDataManager>, pool: Arc<WorkerClientPool<C>>, master: Endpoint) -> Self {
        Self {
            worker_id,
            manager,
            pool,
            master,
        }
    }

    #[inline]
    pub fn manager(&self) -> &Arc<LineageDataManager> {
        &self.manager
    }

    /// Run one tick.
    pub async fn sync(&self, token: &CancellationToken) -> Result<TickSummary> {
        let snapshot = self.manager.pending_files();

        match self.sync_files(&snapshot, token).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                tracing::debug!("Rolling back {} lineage files after failed tick: {err}", snapshot.len());

                self.manager.rollback(&snapshot);
                Err(err)
            }
        }
    }

    async fn sync_files(&self, snapshot: &[LineageFile], token: &CancellationToken) -> Result<TickSummary> {
        let mut summary = TickSummary::default();
        let mut batch = Vec::with_capacity(snapshot.len());

        for file in snapshot {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outcome = match file.state() {
                PersistState::Persisting => PersistOutcome::Persisted,
                _ => match self.persist(file).await {
                    Ok(()) => {
                        summary.persisted += 1;
                        PersistOutcome::Persisted
                    }
                    Err(reason) => {
                        summary.failed += 1;
                        PersistOutcome::Failed(reason)
                    }
                },
            };

            batch.push(PersistReport {
                file_id: file.file_id(),
                block_ids: file.block_ids().to_vec(),
                outcome,
            });
        }

        let response = self.report(batch, token).await?;

        for file_id in response.acknowledged {
            if self.manager.acknowledge(file_id).is_some() {
                summary.acknowledged += 1;
            }
        }

        for command in response.commands {
            match command {
                LineageCommand::Nothing => {}
                LineageCommand::Persist(files) => {
                    for file in files {
                        if self.manager.record_pending(file) {
                            summary.scheduled += 1;
                        }
                    }
                }
                LineageCommand::Abandon(file_id) => {
                    if self.manager.abandon(file_id) {
                        summary.abandoned += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Persist one file, turning any failure into the reason reported to the master.
    async fn persist(&self, file: &LineageFile) -> std::result::Result<(), String> {
        match AssertUnwindSafe(self.manager.persist(file)).catch_unwind().await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(Error::Persistence { reason, .. })) => Err(reason),
            Ok(Err(err)) => Err(err.to_string()),
            Err(panic) => {
                let reason = format!("persistence panicked: {}", panic_message(&*panic));

                tracing::error!("Lineage file {}: {reason}", file.file_id());

                self.manager.mark_failed(file.file_id(), reason.clone());
                Err(reason)
            }
        }
    }

    async fn report(&self, batch: Vec<PersistReport>, token: &CancellationToken) -> Result<ReportResponse> {
        let acquired = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            acquired = self.pool.acquire(&self.master) => acquired,
        };
        let mut connection = acquired.map_err(|err| Error::Reporting(err.to_string()))?;

        tracing::trace!("Reporting {} lineage files to master `{}`", batch.len(), self.master);

        let reported = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            reported = connection.report_persistence(self.worker_id, batch) => Some(reported),
        };

        match reported {
            Some(Ok(response)) => {
                connection.release();
                Ok(response)
            }
            Some(Err(err)) => {
                connection.mark_unhealthy();
                Err(Error::Reporting(err.to_string()))
            }
            None => {
                // the reply of an interrupted call may still be in flight
                connection.mark_unhealthy();
                Err(Error::Cancelled)
            }
        }
    }
}

#[async_trait]
impl<C> HeartbeatExecutor for LineageSyncExecutor<C>
where
    C: Connector,
    C::Client: LineageMasterClient,
{
    async fn heartbeat(&self, token: &CancellationToken) -> Result<()> {
        let summary = self.sync(token).await?;

        if summary != TickSummary::default() {
            tracing::debug!("Lineage heartbeat of worker {}: {summary:?}", self.worker_id);
        }

        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown cause"
    }
}
