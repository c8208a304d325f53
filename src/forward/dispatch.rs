use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    persist::{StorageError, StorageResult, UploadStore},
    upload::QsoUpload,
};

use super::{
    engine::{HandleError, PendingUploads, UploadHandler},
    outcome::record_outcome,
    provider::{ForwardError, ProviderRegistry},
    writer::{UploadWrites, WriteOp},
};

/// [`PendingUploads`] backed by an [`UploadStore`], queried on the blocking pool.
pub struct StorePending {
    store: Arc<dyn UploadStore>,
}

impl StorePending {
    /// Wraps `store` as a fetch source.
    pub fn new(store: Arc<dyn UploadStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PendingUploads for StorePending {
    async fn fetch_pending(&self) -> StorageResult<Vec<QsoUpload>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.fetch_pending_uploads())
            .await
            .map_err(|e| StorageError::WriteTask(format!("fetch task failed: {e}")))?
    }
}

/// Two-phase upload handler: network delivery through the provider
/// registry, then the outcome write through the engine's write queue.
pub struct Dispatcher {
    store: Arc<dyn UploadStore>,
    providers: Arc<ProviderRegistry>,
}

impl Dispatcher {
    /// Handler delivering through `providers` and recording into `store`.
    pub fn new(store: Arc<dyn UploadStore>, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, providers }
    }
}

#[async_trait]
impl UploadHandler for Dispatcher {
    async fn handle(&self, upload: QsoUpload, writes: UploadWrites) -> Result<(), HandleError> {
        let provider = self.providers.get(&upload.service).cloned();

        // Network phase. No storage access here.
        let result = match &provider {
            Some(provider) => provider.forward(&upload.qso, upload.action).await,
            None => Err(ForwardError::UnknownService(upload.service.clone())),
        };
        let network_err = result.as_ref().err().cloned();

        // Storage phase, serialized through the DB writer.
        let store = Arc::clone(&self.store);
        let hook = provider.and_then(|p| p.db_hook);
        let op: WriteOp = Box::new(move || {
            record_outcome(store.as_ref(), hook.as_deref(), &upload, &result)
        });
        writes.submit(op).await?;

        match network_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
