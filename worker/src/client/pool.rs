use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use super::{Connector, Endpoint};
use crate::error::ConnectionError;

/// Behavior of [`WorkerClientPool::acquire()`] once an endpoint has reached its connection limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Wait for another caller to release a connection.
    #[default]
    Block,
    /// Fail immediately with [`ConnectionError::Exhausted`].
    FailFast,
}

/// A bounded pool of reusable RPC connections, keyed by endpoint.
///
/// Every endpoint gets its own [`Semaphore`] of `size` permits: a [`PooledConnection`] holds one permit for its whole
/// lifetime, so that at most `size` connections to a given endpoint are outstanding at any time. Released healthy
/// connections are kept idle and handed out again by later acquisitions.
///
/// The pool is safe to share between tasks and threads, reads and background tasks all draw from the same instance.
pub struct WorkerClientPool<C: Connector> {
    connector: C,
    size: usize,
    policy: ExhaustedPolicy,
    /// Per-endpoint slots, only ever inserted while the pool is open.
    slots: RwLock<HashMap<Endpoint, Arc<Slot<C::Client>>>>,
    closed: AtomicBool,
}

struct Slot<T> {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<T>>,
}

impl<T> Slot<T> {
    fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::new()),
        }
    }

    fn checkout(&self) -> Option<T> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).pop()
    }

    fn put(&self, client: T) {
        let mut idle = self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // the slot may have been closed while the connection was checked out
        if !self.permits.is_closed() {
            idle.push(client);
        }
    }

    fn close(&self) {
        self.permits.close();
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl<C: Connector> WorkerClientPool<C> {
    /// Create a pool allowing up to `size` outstanding connections per endpoint.
    ///
    /// # Panics
    /// This method panics if `size` is 0.
    pub fn new(connector: C, size: usize, policy: ExhaustedPolicy) -> Self {
        assert!(size > 0, "connection pool size must be greater than 0");

        Self {
            connector,
            size,
            policy,
            slots: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Check a connection to `endpoint` out of the pool.
    ///
    /// An idle connection is reused when there is one, otherwise a new one is created through the [`Connector`].
    /// The permit taken for this connection is given back on any failure, so a failed acquisition never
    /// consumes a pool slot.
    pub async fn acquire(&self, endpoint: &Endpoint) -> Result<PooledConnection<C>, ConnectionError> {
        let slot = self.slot(endpoint)?;

        let permit = match self.policy {
            ExhaustedPolicy::Block => Arc::clone(&slot.permits).acquire_owned().await.map_err(|_| ConnectionError::Closed)?,
            ExhaustedPolicy::FailFast => match Arc::clone(&slot.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => return Err(ConnectionError::Exhausted(endpoint.clone())),
                Err(TryAcquireError::Closed) => return Err(ConnectionError::Closed),
            },
        };

        let client = match slot.checkout() {
            Some(client) => {
                tracing::trace!("Reusing idle connection to `{endpoint}`");
                client
            }
            None => {
                tracing::debug!("Opening new connection to `{endpoint}`");

                self.connector
                    .connect(endpoint)
                    .await
                    .map_err(|source| ConnectionError::Unreachable {
                        endpoint: endpoint.clone(),
                        source,
                    })?
            }
        };

        Ok(PooledConnection {
            endpoint: endpoint.clone(),
            client: Some(client),
            slot,
            permit: Some(permit),
            healthy: true,
        })
    }

    /// Number of connections to `endpoint` currently checked out.
    pub fn outstanding(&self, endpoint: &Endpoint) -> usize {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(endpoint)
            .map_or(0, |slot| self.size.saturating_sub(slot.permits.available_permits()))
    }

    /// Number of connections to `endpoint` waiting to be reused.
    pub fn idle(&self, endpoint: &Endpoint) -> usize {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(endpoint)
            .map_or(0, |slot| slot.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len())
    }

    /// Close the pool.
    ///
    /// Idle connections are dropped, pending and future acquisitions fail with [`ConnectionError::Closed`] and
    /// connections still checked out are dropped instead of being reused once released.
    pub fn close(&self) {
        let slots = self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!("Closing connection pool ({} endpoints)", slots.len());

        for slot in slots.values() {
            slot.close();
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn slot(&self, endpoint: &Endpoint) -> Result<Arc<Slot<C::Client>>, ConnectionError> {
        if let Some(slot) = self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner()).get(endpoint) {
            return Ok(Arc::clone(slot));
        }

        let mut slots = self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        // checked under the write lock, `close()` cannot miss a slot created here
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        // check if the entry is still vacant, otherwise another caller created it in the meantime
        Ok(Arc::clone(slots.entry(endpoint.clone()).or_insert_with(|| Arc::new(Slot::new(self.size)))))
    }
}

/// A connection checked out of a [`WorkerClientPool`].
///
/// It dereferences to the underlying client. The pool slot is given back on every path including early returns,
/// panics and cancelled futures, but only an explicit [`PooledConnection::release()`] hands a healthy connection out
/// again: a connection dropped without being released may have a call in flight and is closed.
pub struct PooledConnection<C: Connector> {
    endpoint: Endpoint,
    client: Option<C::Client>,
    slot: Arc<Slot<C::Client>>,
    permit: Option<OwnedSemaphorePermit>,
    healthy: bool,
}

impl<C: Connector> PooledConnection<C> {
    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Prevent this connection from being reused, it will be closed on release.
    #[inline]
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Give the connection back to its pool.
    #[inline]
    pub fn release(mut self) {
        self.release_inner(true);
    }

    fn release_inner(&mut self, reuse: bool) {
        if let Some(client) = self.client.take() {
            if reuse && self.healthy {
                tracing::trace!("Releasing connection to `{}`", self.endpoint);

                self.slot.put(client);
            } else {
                tracing::debug!("Closing connection to `{}` (healthy: {})", self.endpoint, self.healthy);

                drop(client);
            }
        }

        // the permit is released last so that a waiting caller finds the idle connection
        drop(self.permit.take());
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Client;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // only `None` once released, which consumes `self`
        self.client.as_ref().expect("pooled connection is released")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut().expect("pooled connection is released")
    }
}

impl<C: Connector> fmt::Debug for WorkerClientPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerClientPool")
            .field("size", &self.size)
            .field("policy", &self.policy)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.endpoint)
            .field("healthy", &self.healthy)
            .field("released", &self.client.is_none())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        // no-op once released
        self.release_inner(false);
    }
}
