//! Background task pooling.

use std::borrow::Cow;
use std::num::NonZeroU8;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{self, Future, FutureExt};
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

pub use future::{AbortHandle, Aborted, RemoteHandle};

type Task = future::BoxFuture<'static, ()>;

/// A named pool of workers running asynchronous tasks in the background.
///
/// Workers are named `{name}-{n}` in logs, `n` starting from 1. A task panicking is logged and does not take its worker
/// down with it.
///
/// # Forget tasks
/// Tasks can just be pushed and forgotten using [`Pool::forget()`] method (tasks must return `()`).
///
/// # Keep control over tasks
/// Tasks can alternatively be pushed while still keeping both a remote handle on a task result on completion
/// and an abortable handle to cancel a task using [`Pool::execute()`] method (tasks can return any `T: Send`).
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use block_worker::task::Pool;
/// let mut pool = Pool::new("heartbeat");
/// pool.start(3.try_into().unwrap());
///
/// for i in 0..=5 {
///     pool.forget(async move { println!("Tick #{i}") });
/// }
///
/// pool.close().await;
/// # })
/// ```
#[derive(Debug)]
pub struct Pool {
    name: Cow<'static, str>,
    workers: Vec<Worker>,
    /// The sending part of a channel to push tasks to the workers, `None` while stopped.
    ///
    /// The next available worker will wait for a task to be received through the channel.
    sender: Option<mpsc::UnboundedSender<Task>>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new("task-worker")
    }
}

impl Pool {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            workers: Vec::new(),
            sender: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    /// Number of running workers.
    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Start the pool with `size` workers.
    ///
    /// Once started, tasks can be pushed and will be processed in the background in order.
    ///
    /// # Panics
    /// This method panics if the pool is already running, ie. when called more than once without stopping the pool in between.
    pub fn start(&mut self, size: NonZeroU8) {
        assert!(!self.is_running() && self.workers.is_empty(), "pool `{}` is already running", self.name);

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));

        self.workers = (1..=size.get())
            .map(|n| Worker::spawn(format!("{}-{n}", self.name), Arc::clone(&receiver)))
            .collect();
        self.sender = Some(sender);
    }

    /// Send a task and keep remote and abort handles on it.
    ///
    /// To retrieve a task result on completion, just await on the remote handle:
    /// ```
    /// # tokio_test::block_on(async {
    /// # use block_worker::task::Pool;
    /// # let mut pool = Pool::default();
    /// # pool.start(1.try_into().unwrap());
    /// let (remote_handle, _) = pool.execute(async { 42 });
    ///
    /// assert_eq!(remote_handle.await, Ok(42));
    /// # })
    /// ```
    ///
    /// **Dropping the remote handle cancels the task**, call `remote_handle.forget()` to let it complete in the background.
    ///
    /// To cancel a task, call `abort_handle.abort()`, the remote handle then returns `Err(Aborted)`:
    /// ```
    /// # tokio_test::block_on(async {
    /// # use block_worker::task::{Aborted, Pool};
    /// # let mut pool = Pool::default();
    /// # pool.start(1.try_into().unwrap());
    /// let (remote_handle, abort_handle) = pool.execute(std::future::pending::<()>());
    ///
    /// abort_handle.abort();
    ///
    /// assert_eq!(remote_handle.await, Err(Aborted));
    /// # })
    /// ```
    ///
    /// If the pool is not running, the task is dropped and the remote handle resolves to `Err(Aborted)`.
    pub fn execute<T: Send + 'static>(
        &self,
        future: impl Future<Output = T> + Send + 'static,
    ) -> (RemoteHandle<Result<T, Aborted>>, AbortHandle) {
        let (abortable, abort_handle) = future::abortable(future);
        let (remote, remote_handle) = abortable.remote_handle();

        if self.is_running() {
            self.forget(remote);
        } else {
            tracing::warn!("Pool `{}` is not running, aborting task", self.name);

            // resolve the remote handle instead of dropping its sending side
            abort_handle.abort();
            let _ = remote.now_or_never();
        }

        (remote_handle, abort_handle)
    }

    /// Send a task and forget it.
    ///
    /// Return `false` if the pool is not running, in which case the task is dropped without executing anything.
    #[inline]
    pub fn forget(&self, future: impl Future<Output = ()> + Send + 'static) -> bool {
        match self.sender {
            Some(ref sender) => sender.send(future.boxed()).is_ok(),
            None => {
                tracing::warn!("Pool `{}` is not running, dropping task", self.name);
                false
            }
        }
    }

    /// Stop the workers, waiting for all pending tasks to complete.
    ///
    /// Once stopped, the pool can be started again with any number of workers.
    pub async fn stop(&mut self) {
        // workers exit once the channel is drained
        self.sender = None;

        let workers = std::mem::take(&mut self.workers);

        for result in future::join_all(workers.into_iter().inspect(|worker| {
            tracing::debug!("Stopping worker {}...", worker.name);
        }))
        .await
        {
            if let Err(err) = result {
                tracing::warn!("Worker of pool `{}` did not shut down cleanly: {err}", self.name);
            }
        }
    }

    /// Stop the workers and consume the pool.
    pub async fn close(mut self) {
        self.stop().await
    }
}

#[derive(Debug)]
struct Worker {
    name: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Worker {
    fn spawn(name: String, receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>) -> Worker {
        tracing::debug!("Starting worker {name}...");

        let handle = tokio::spawn({
            let name = name.clone();

            async move {
                loop {
                    let message = receiver.lock().await.recv().await;

                    match message {
                        Some(task) => {
                            tracing::trace!("Executing task on worker {name}...");

                            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                                tracing::error!("Task panicked on worker {name}");
                            }
                        }
                        None => {
                            tracing::debug!("All tasks exhausted, shutting down worker {name}.");
                            break;
                        }
                    }
                }
            }
            .in_current_span()
        });

        Worker { name, handle }
    }
}

impl Future for Worker {
    type Output = Result<(), tokio::task::JoinError>;

    #[inline]
    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        self.handle.poll_unpin(cx)
    }
}
