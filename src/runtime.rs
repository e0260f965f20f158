//! Bounded worker pool for resolutions.
//!
//! A resolution may block for seconds inside the normalizer's backoff. The
//! runtime runs resolutions on a fixed set of threads fed by a bounded queue so
//! one slow query does not hold up store hits for others, and callers get
//! back-pressure (`QueueFull`) instead of unbounded thread growth.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::{ExecutionError, ResolveError, ResolveResult};
use crate::resolver::{Resolution, Resolver};

/// Runtime configuration.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued resolutions.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

struct Job {
    query: String,
    reply: Sender<ResolveResult<Resolution>>,
}

/// Handle returned by [`ResolverRuntime::submit`].
#[derive(Debug)]
pub struct ResolutionHandle {
    rx: Receiver<ResolveResult<Resolution>>,
}

impl ResolutionHandle {
    /// Waits for the resolution to complete.
    ///
    /// # Errors
    /// The resolver's own error, or `Disconnected` if the worker went away.
    pub fn join(self) -> ResolveResult<Resolution> {
        self.rx
            .recv()
            .map_err(|_| ResolveError::from(ExecutionError::Disconnected))?
    }

    /// Waits at most `timeout` for the resolution.
    ///
    /// # Errors
    /// As [`ResolutionHandle::join`], plus `Timeout` when the deadline passes.
    /// The resolution itself keeps running.
    pub fn join_timeout(self, timeout: Duration) -> ResolveResult<Resolution> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ResolveError::from(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => ResolveError::from(ExecutionError::Disconnected),
        })?
    }
}

/// Fixed pool of resolver threads.
pub struct ResolverRuntime {
    resolver: Arc<Resolver>,
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl std::fmt::Debug for ResolverRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRuntime")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl ResolverRuntime {
    /// Start the pool. Zero workers or capacity are raised to one.
    ///
    /// # Errors
    /// `Internal` if a worker thread cannot be spawned.
    pub fn new(resolver: Resolver, config: RuntimeConfig) -> ResolveResult<Self> {
        let resolver = Arc::new(resolver);
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let resolver = Arc::clone(&resolver);
            let handle = thread::Builder::new()
                .name(format!("resolver-{idx}"))
                .spawn(move || {
                    while let Ok(Job { query, reply }) = rx.recv() {
                        let result = resolver.resolve_detailed(&query);
                        if let Err(e) = &result {
                            tracing::warn!(query = %query, error = %e, "resolution failed");
                        }
                        let _ = reply.send(result);
                    }
                })
                .map_err(|e| ResolveError::internal(format!("failed to spawn resolver worker: {e}")))?;
            handles.push(handle);
        }

        tracing::debug!(workers, queue_capacity, "resolver runtime started");
        Ok(Self {
            resolver,
            tx: Some(tx),
            workers: handles,
            queue_capacity,
        })
    }

    /// Queue `query` for resolution.
    ///
    /// # Errors
    /// - `QueueFull` when the queue is at capacity
    /// - `Disconnected` when the pool has shut down
    pub fn submit(&self, query: impl Into<String>) -> ResolveResult<ResolutionHandle> {
        let tx = self
            .tx
            .as_ref()
            .ok_or(ResolveError::Execution(ExecutionError::Disconnected))?;
        let (reply, rx) = bounded::<ResolveResult<Resolution>>(1);
        let job = Job {
            query: query.into(),
            reply,
        };
        match tx.try_send(job) {
            Ok(()) => Ok(ResolutionHandle { rx }),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    /// Resolve on the pool and wait for the answer.
    ///
    /// # Errors
    /// As [`ResolverRuntime::submit`] and [`ResolutionHandle::join`].
    pub fn resolve(&self, query: impl Into<String>) -> ResolveResult<Resolution> {
        self.submit(query)?.join()
    }

    /// The shared resolver.
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ResolverRuntime {
    fn drop(&mut self) {
        // Closing the channel lets workers drain queued jobs and exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
