use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    persist::{StorageError, StorageResult},
    types::UploadId,
};

use super::{
    engine::Signals,
    inflight::Claim,
    registry::panic_message,
    stats::EngineStats,
};

/// Zero-argument storage mutation queued for the DB writer.
pub type WriteOp = Box<dyn FnOnce() -> StorageResult<()> + Send + 'static>;

/// Where a submitted write ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    /// Handed to the DB writer; errors surface only in its log.
    Queued,
    /// Run synchronously by the submitting worker.
    Inline,
}

/// Producer side of the DB write queue, shared by all workers.
#[derive(Clone)]
pub(crate) struct WriteQueue {
    tx: mpsc::Sender<WriteOp>,
    stop: CancellationToken,
    stats: Arc<EngineStats>,
}

impl WriteQueue {
    pub(crate) fn new(
        tx: mpsc::Sender<WriteOp>,
        stop: CancellationToken,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self { tx, stop, stats }
    }

    async fn submit(&self, op: WriteOp) -> StorageResult<WritePath> {
        if self.stop.is_cancelled() {
            debug!("engine stopping, running storage write inline");
            return self.run_inline(op).await;
        }

        match self.tx.try_send(op) {
            Ok(()) => {
                EngineStats::bump(&self.stats.queued_writes);
                Ok(WritePath::Queued)
            }
            Err(TrySendError::Full(op)) => {
                warn!("db write queue full, running storage write inline");
                self.run_inline(op).await
            }
            Err(TrySendError::Closed(op)) => {
                warn!("db write queue closed, running storage write inline");
                self.run_inline(op).await
            }
        }
    }

    async fn run_inline(&self, op: WriteOp) -> StorageResult<WritePath> {
        EngineStats::bump(&self.stats.inline_writes);
        if let Err(err) = run_write(op).await {
            EngineStats::bump(&self.stats.write_failures);
            error!(error = %err, "inline storage write failed");
            return Err(err);
        }
        Ok(WritePath::Inline)
    }
}

/// One-shot write slot handed to the upload handler for a single upload.
///
/// The upload stays claimed (invisible to the poller) until the submitted
/// write has run, or until the slot is dropped unused.
pub struct UploadWrites {
    queue: WriteQueue,
    claim: Claim,
    upload_id: UploadId,
}

impl UploadWrites {
    pub(crate) fn new(queue: WriteQueue, claim: Claim, upload_id: UploadId) -> Self {
        Self {
            queue,
            claim,
            upload_id,
        }
    }

    /// Upload this slot belongs to.
    pub fn upload_id(&self) -> UploadId {
        self.upload_id
    }

    /// Submits the storage phase for this upload.
    ///
    /// Returns the write's own error only when it ran inline.
    pub async fn submit(self, op: WriteOp) -> StorageResult<WritePath> {
        let Self { queue, claim, .. } = self;
        let op: WriteOp = Box::new(move || {
            let res = op();
            drop(claim);
            res
        });
        queue.submit(op).await
    }
}

/// Runs one write on the blocking pool and waits for it.
pub(crate) async fn run_write(op: WriteOp) -> StorageResult<()> {
    match tokio::task::spawn_blocking(op).await {
        Ok(res) => res,
        Err(err) if err.is_panic() => Err(StorageError::WriteTask(format!(
            "storage write panicked: {}",
            panic_message(err.into_panic().as_ref())
        ))),
        Err(err) => Err(StorageError::WriteTask(err.to_string())),
    }
}

/// Single consumer of the DB write queue.
///
/// Writes run strictly one after another in queue order. Once a signal fires
/// the writer waits for the network workers to exit, runs whatever is still
/// queued, and returns.
pub(crate) async fn db_writer_loop(
    mut rx: mpsc::Receiver<WriteOp>,
    signals: Signals,
    workers: TaskTracker,
    stats: Arc<EngineStats>,
) {
    info!("starting database write worker");

    loop {
        tokio::select! {
            biased;
            op = rx.recv() => {
                let Some(op) = op else {
                    debug!("db write queue closed");
                    return;
                };
                execute(op, &stats).await;
            }
            _ = signals.fired() => break,
        }
    }

    if !workers.is_empty() {
        info!(workers = workers.len(), "db writer waiting for network workers to exit");
    }
    workers.wait().await;
    let mut drained = 0usize;
    while let Ok(op) = rx.try_recv() {
        execute(op, &stats).await;
        drained += 1;
    }
    rx.close();
    info!(drained, "database write worker stopped");
}

async fn execute(op: WriteOp, stats: &EngineStats) {
    if let Err(err) = run_write(op).await {
        EngineStats::bump(&stats.write_failures);
        error!(error = %err, "database write operation failed");
    }
}
