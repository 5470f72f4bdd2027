//! Periodic heartbeat scheduling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Work run once per heartbeat.
///
/// Implementations should check `token` between units of work and return early once it is cancelled.
#[async_trait]
pub trait HeartbeatExecutor: Send + Sync + 'static {
    async fn heartbeat(&self, token: &CancellationToken) -> Result<()>;
}

#[async_trait]
impl<E: HeartbeatExecutor + ?Sized> HeartbeatExecutor for Arc<E> {
    async fn heartbeat(&self, token: &CancellationToken) -> Result<()> {
        (**self).heartbeat(token).await
    }
}

/// Run a [`HeartbeatExecutor`] at a fixed rate until cancelled.
///
/// The first tick fires immediately. Ticks never overlap: a tick lasting longer than the interval delays the following
/// ones. A failed tick is logged and does not stop the task.
#[derive(Debug)]
pub struct HeartbeatTask<E> {
    name: String,
    executor: E,
    interval: Duration,
    token: CancellationToken,
}

impl<E: HeartbeatExecutor> HeartbeatTask<E> {
    /// # Panics
    /// This method panics if `interval` is zero.
    pub fn new(name: impl Into<String>, executor: E, interval: Duration, token: CancellationToken) -> Self {
        assert!(!interval.is_zero(), "heartbeat interval must be greater than zero");

        Self {
            name: name.into(),
            executor,
            interval,
            token,
        }
    }

    /// Loop over heartbeats, returning the number of ticks run once cancelled.
    pub async fn run(self) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Starting heartbeat {} every {:?}", self.name, self.interval);

        let mut ticks = 0;
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            ticks += 1;
            if let Err(err) = self.executor.heartbeat(&self.token).await {
                tracing::warn!("Heartbeat {} failed: {err}", self.name);
            }
        }

        tracing::debug!("Heartbeat {} stopped after {ticks} ticks", self.name);

        ticks
    }
}
