use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, error, info, warn};

use super::{
    engine::{HandleError, Signals, UploadHandler},
    poller::Admitted,
    stats::EngineStats,
    writer::{UploadWrites, WriteQueue},
};

pub(crate) struct WorkerContext {
    pub(crate) worker_id: usize,
    pub(crate) rx: Arc<Mutex<mpsc::Receiver<Admitted>>>,
    pub(crate) handler: Arc<dyn UploadHandler>,
    pub(crate) writes: WriteQueue,
    pub(crate) signals: Signals,
    pub(crate) stats: Arc<EngineStats>,
    /// Keeps the pool tracker open until this worker returns.
    pub(crate) _pool: TaskTrackerToken,
}

pub(crate) async fn worker_loop(cx: WorkerContext) {
    let worker_id = cx.worker_id;
    info!(worker_id, "starting forwarding worker");

    loop {
        let next = tokio::select! {
            _ = cx.signals.fired() => {
                info!(worker_id, "forwarding worker shutting down");
                return;
            }
            next = recv_shared(&cx.rx) => next,
        };
        let Some(Admitted { upload, claim }) = next else {
            debug!(worker_id, "forwarding queue closed");
            return;
        };

        EngineStats::bump(&cx.stats.processed);
        let upload_id = upload.id;
        let service = upload.service.clone();
        let writes = UploadWrites::new(cx.writes.clone(), claim, upload_id);

        match cx.handler.handle(upload, writes).await {
            Ok(()) => debug!(worker_id, upload_id, service = %service, "upload forwarded"),
            Err(HandleError::Forward(err)) => {
                EngineStats::bump(&cx.stats.handler_errors);
                warn!(worker_id, upload_id, service = %service, error = %err, "forwarding attempt failed");
            }
            Err(HandleError::Storage(err)) => {
                EngineStats::bump(&cx.stats.handler_errors);
                error!(worker_id, upload_id, service = %service, error = %err, "error recording forwarding outcome");
            }
        }
    }
}

async fn recv_shared<T>(rx: &Mutex<mpsc::Receiver<T>>) -> Option<T> {
    rx.lock().await.recv().await
}
