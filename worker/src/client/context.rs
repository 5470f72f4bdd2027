use std::sync::Arc;

use super::{Connector, Endpoint, WorkerClientPool};
use crate::config::WorkerConf;
use crate::metrics::ClientMetrics;

/// Everything a client stream needs: configuration, the worker connection pool and metrics.
///
/// It is passed explicitly to the components using it and cheap to clone, clones share the same pool and metrics.
#[derive(Debug)]
pub struct ClientContext<C: Connector> {
    conf: Arc<WorkerConf>,
    pool: Arc<WorkerClientPool<C>>,
    metrics: Arc<ClientMetrics>,
}

impl<C: Connector> ClientContext<C> {
    /// Create a context with a new pool sized after `conf`.
    pub fn new(conf: Arc<WorkerConf>, connector: C) -> Self {
        let pool = WorkerClientPool::new(connector, conf.client.pool_size, conf.client.exhausted);

        Self::with_pool(conf, Arc::new(pool))
    }

    pub fn with_pool(conf: Arc<WorkerConf>, pool: Arc<WorkerClientPool<C>>) -> Self {
        Self {
            conf,
            pool,
            metrics: Arc::default(),
        }
    }

    #[inline]
    pub fn conf(&self) -> &WorkerConf {
        &self.conf
    }

    #[inline]
    pub fn pool(&self) -> &Arc<WorkerClientPool<C>> {
        &self.pool
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    /// Endpoint of the worker running on this host.
    #[inline]
    pub fn local_endpoint(&self) -> Endpoint {
        self.conf.local_endpoint()
    }
}

impl<C: Connector> Clone for ClientContext<C> {
    fn clone(&self) -> Self {
        Self {
            conf: Arc::clone(&self.conf),
            pool: Arc::clone(&self.pool),
            metrics: Arc::clone(&self.metrics),
        }
    }
}
