//! Forwarding engine lifecycle: start, stop, and task bookkeeping.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    config::ForwardingConfig,
    persist::{StorageError, StorageResult},
    upload::QsoUpload,
};

use super::{
    inflight::InFlight,
    poller::{Admitted, poller_loop},
    provider::ForwardError,
    registry::WorkerRegistry,
    stats::{EngineStats, StatsSnapshot},
    worker::{WorkerContext, worker_loop},
    writer::{UploadWrites, WriteOp, WriteQueue, db_writer_loop},
};

/// Source of uploads that need a delivery attempt.
#[async_trait]
pub trait PendingUploads: Send + Sync + 'static {
    /// Returns every upload currently eligible for an attempt.
    async fn fetch_pending(&self) -> StorageResult<Vec<QsoUpload>>;
}

/// Error returned by an [`UploadHandler`]; logged by the worker, never fatal.
#[derive(Debug, Error)]
pub enum HandleError {
    /// Network phase failed; the failure is already recorded.
    #[error(transparent)]
    Forward(#[from] ForwardError),
    /// The outcome write ran inline and failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Forwards one upload and submits its outcome write.
///
/// Implementations must not touch storage directly: the outcome goes through
/// `writes`, which either queues it for the DB writer or runs it inline.
#[async_trait]
pub trait UploadHandler: Send + Sync + 'static {
    /// Processes one dequeued upload.
    async fn handle(&self, upload: QsoUpload, writes: UploadWrites) -> Result<(), HandleError>;
}

/// Configuration and lifecycle errors returned to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected by [`ForwardingConfig::validate`].
    #[error("invalid forwarding config: {0}")]
    InvalidConfig(String),
    /// `start` was handed a context that is already cancelled.
    #[error("context is already cancelled")]
    ContextCancelled,
    /// `start` called while the engine is running.
    #[error("forwarding already started")]
    AlreadyStarted,
    /// `start` called while a stop has not finished.
    #[error("forwarding is stopping, cannot start")]
    Stopping,
    /// Some tasks were still running when the stop timeout elapsed.
    #[error(
        "timeout after {timeout:?} with {count} workers still running: {names}",
        count = .workers.len(),
        names = .workers.join(", ")
    )]
    StopTimeout {
        /// Timeout that elapsed.
        timeout: Duration,
        /// Names of the tasks still registered, sorted.
        workers: Vec<String>,
    },
}

/// Engine lifecycle; `Stopped` may be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Never started.
    NotStarted,
    /// Tasks launched and serving.
    Running,
    /// A stop fired and its tasks have not all exited.
    Stopping,
    /// Last run shut down cleanly.
    Stopped,
}

/// Cancellation inputs observed by every engine loop.
#[derive(Clone)]
pub(crate) struct Signals {
    ctx: CancellationToken,
    shutdown: CancellationToken,
    stop: CancellationToken,
}

impl Signals {
    /// Resolves once any of the three tokens is cancelled.
    pub(crate) async fn fired(&self) {
        tokio::select! {
            _ = self.ctx.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
            _ = self.stop.cancelled() => {}
        }
    }

    pub(crate) fn any_fired(&self) -> bool {
        self.ctx.is_cancelled() || self.shutdown.is_cancelled() || self.stop.is_cancelled()
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Resources owned by one start/stop cycle.
struct Run {
    stop: CancellationToken,
    tracker: TaskTracker,
    forward_tx: mpsc::Sender<Admitted>,
    forward_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Admitted>>>,
    write_tx: mpsc::Sender<WriteOp>,
}

impl Run {
    /// Closes both queues. Only valid once every task of the run has exited.
    fn close_queues(self) -> bool {
        match self.forward_rx.try_lock() {
            Ok(mut rx) => rx.close(),
            Err(_) => warn!("forwarding queue receiver still locked at close"),
        }
        self.forward_tx.is_closed() && self.write_tx.is_closed()
    }
}

/// Clears `stop_waiting` even if the stop future is dropped mid-wait.
struct StopWaiting<'a>(&'a Forwarding);

impl Drop for StopWaiting<'_> {
    fn drop(&mut self) {
        self.0.inner().stop_waiting = false;
    }
}

struct Inner {
    state: LifecycleState,
    run: Option<Run>,
    stop_waiting: bool,
    queues_closed: bool,
}

/// Poller, worker pool and DB writer for the upload pipeline.
///
/// Each `start` launches `worker_count` workers, one DB writer and one
/// poller over fresh queues; `stop` waits for all of them, bounded by a
/// timeout.
pub struct Forwarding {
    config: ForwardingConfig,
    source: Arc<dyn PendingUploads>,
    handler: Arc<dyn UploadHandler>,
    registry: WorkerRegistry,
    in_flight: InFlight,
    stats: Arc<EngineStats>,
    inner: Mutex<Inner>,
}

impl Forwarding {
    /// Builds an idle engine after validating `config`.
    pub fn new(
        config: ForwardingConfig,
        source: Arc<dyn PendingUploads>,
        handler: Arc<dyn UploadHandler>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        Ok(Self {
            config,
            source,
            handler,
            registry: WorkerRegistry::new(),
            in_flight: InFlight::default(),
            stats: Arc::new(EngineStats::default()),
            inner: Mutex::new(Inner {
                state: LifecycleState::NotStarted,
                run: None,
                stop_waiting: false,
                queues_closed: false,
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Launches all engine tasks. Must be called from within a tokio runtime.
    ///
    /// `ctx` and `shutdown` are both observed by every loop; cancelling either
    /// one ends the loops at their next iteration boundary.
    pub fn start(&self, ctx: CancellationToken, shutdown: CancellationToken) -> Result<(), EngineError> {
        if ctx.is_cancelled() {
            return Err(EngineError::ContextCancelled);
        }

        let mut inner = self.inner();
        match inner.state {
            LifecycleState::Stopping => return Err(EngineError::Stopping),
            LifecycleState::Running => return Err(EngineError::AlreadyStarted),
            LifecycleState::NotStarted | LifecycleState::Stopped => {}
        }

        let (forward_tx, forward_rx) = mpsc::channel(self.config.forwarding_queue_capacity);
        let (write_tx, write_rx) = mpsc::channel(self.config.db_write_queue_capacity);
        let forward_rx = Arc::new(tokio::sync::Mutex::new(forward_rx));
        let stop = CancellationToken::new();
        let signals = Signals {
            ctx,
            shutdown,
            stop: stop.clone(),
        };
        let tracker = TaskTracker::new();
        let pool = TaskTracker::new();
        let writes = WriteQueue::new(write_tx.clone(), stop.clone(), Arc::clone(&self.stats));

        for worker_id in 0..self.config.worker_count {
            let cx = WorkerContext {
                worker_id,
                rx: Arc::clone(&forward_rx),
                handler: Arc::clone(&self.handler),
                writes: writes.clone(),
                signals: signals.clone(),
                stats: Arc::clone(&self.stats),
                _pool: pool.token(),
            };
            self.registry
                .spawn(&tracker, format!("worker-{worker_id}"), worker_loop(cx));
        }
        pool.close();

        self.registry.spawn(
            &tracker,
            "db-writer",
            db_writer_loop(write_rx, signals.clone(), pool, Arc::clone(&self.stats)),
        );

        self.registry.spawn(
            &tracker,
            "poller",
            poller_loop(
                Arc::clone(&self.source),
                forward_tx.clone(),
                self.in_flight.clone(),
                self.config.poll_interval(),
                signals,
                Arc::clone(&self.stats),
            ),
        );
        tracker.close();

        inner.state = LifecycleState::Running;
        inner.queues_closed = false;
        inner.run = Some(Run {
            stop,
            tracker,
            forward_tx,
            forward_rx,
            write_tx,
        });

        info!(workers = self.config.worker_count + 2, "all forwarding workers launched");
        Ok(())
    }

    /// Stops all engine tasks, waiting at most `timeout`.
    ///
    /// A call made while another stop is still waiting returns `Ok(())`
    /// immediately. On timeout the queues are left open and the engine stays
    /// in [`LifecycleState::Stopping`]; a later call waits again.
    ///
    /// The DB writer only exits after every network worker has, so a worker
    /// stuck in a network call is reported together with `db-writer` even
    /// though the writer itself is idle.
    pub async fn stop(&self, timeout: Duration) -> Result<(), EngineError> {
        let tracker = {
            let mut inner = self.inner();
            match inner.state {
                LifecycleState::NotStarted | LifecycleState::Stopped => return Ok(()),
                LifecycleState::Stopping if inner.stop_waiting => {
                    debug!("forwarding already stopping");
                    return Ok(());
                }
                LifecycleState::Stopping | LifecycleState::Running => {}
            }
            inner.state = LifecycleState::Stopping;

            let Some(run) = inner.run.as_ref() else {
                inner.state = LifecycleState::Stopped;
                return Ok(());
            };
            run.stop.cancel();
            let tracker = run.tracker.clone();
            inner.stop_waiting = true;
            tracker
        };

        info!("stopping forwarding workers");
        let waiting = StopWaiting(self);
        let finished = tokio::time::timeout(timeout, tracker.wait()).await.is_ok();
        drop(waiting);

        let mut inner = self.inner();

        if !finished {
            let workers = self.registry.names();
            error!(stuck_workers = workers.len(), "timeout waiting for workers to stop");
            for name in &workers {
                warn!(worker = %name, "worker still running after timeout");
            }
            return Err(EngineError::StopTimeout { timeout, workers });
        }

        if let Some(run) = inner.run.take() {
            inner.queues_closed = run.close_queues();
        }
        inner.state = LifecycleState::Stopped;
        info!("all forwarding workers stopped gracefully");
        Ok(())
    }

    /// Number of engine tasks currently running.
    pub fn active_worker_count(&self) -> usize {
        self.registry.len()
    }

    /// Names of the engine tasks currently running, sorted.
    pub fn active_workers(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner().state
    }

    /// True once a clean stop has closed both queues of the last run.
    pub fn queues_closed(&self) -> bool {
        self.inner().queues_closed
    }

    /// Uploads currently claimed by the pipeline.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Counters accumulated across all runs of this engine.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &ForwardingConfig {
        &self.config
    }
}
