use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::ForwardingConfig,
    forward::{
        dispatch::{Dispatcher, StorePending},
        engine::{EngineError, Forwarding},
        provider::ProviderRegistry,
    },
    persist::{StorageError, UploadStore, sqlite::SqliteUploadStore},
    qso::{QsoDraft, QsoPatch, QsoRecord},
    types::{QsoId, UploadAction},
};

/// Errors from the owning service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage call failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Engine construction or lifecycle failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A blocking storage task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Logging front end plus the forwarding engine that serves it.
///
/// Saving or editing a contact queues one upload per registered provider;
/// the engine picks them up on its next poll.
pub struct ForwardingService {
    store: Arc<dyn UploadStore>,
    providers: Arc<ProviderRegistry>,
    engine: Forwarding,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl ForwardingService {
    /// Builds the service and its engine over `store`.
    pub fn new(
        store: Arc<dyn UploadStore>,
        providers: ProviderRegistry,
        config: ForwardingConfig,
    ) -> Result<Self, ServiceError> {
        let providers = Arc::new(providers);
        let engine = Forwarding::new(
            config,
            Arc::new(StorePending::new(Arc::clone(&store))),
            Arc::new(Dispatcher::new(Arc::clone(&store), Arc::clone(&providers))),
        )?;
        Ok(Self {
            store,
            providers,
            engine,
            shutdown: Mutex::new(None),
        })
    }

    /// Opens (or creates) a SQLite log at `path` and builds the service over it.
    pub fn open(
        path: impl AsRef<Path>,
        providers: ProviderRegistry,
        config: ForwardingConfig,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(SqliteUploadStore::open(path)?);
        Self::new(store, providers, config)
    }

    /// Underlying forwarding engine.
    pub fn engine(&self) -> &Forwarding {
        &self.engine
    }

    /// Storage gateway shared with the engine.
    pub fn store(&self) -> &Arc<dyn UploadStore> {
        &self.store
    }

    /// Starts the engine under `ctx` with a fresh shutdown signal.
    pub fn start(&self, ctx: CancellationToken) -> Result<(), ServiceError> {
        let shutdown = CancellationToken::new();
        self.engine.start(ctx, shutdown.clone())?;
        *self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(shutdown);
        info!(services = ?self.providers.services(), "forwarding service started");
        Ok(())
    }

    /// Signals shutdown and waits for the engine, bounded by the configured timeout.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }
        self.engine
            .stop(self.engine.config().shutdown_timeout())
            .await?;
        info!("forwarding service stopped");
        Ok(())
    }

    /// Saves a new contact and queues an insert upload per provider.
    pub async fn log_qso(&self, draft: QsoDraft) -> Result<QsoRecord, ServiceError> {
        let store = Arc::clone(&self.store);
        let services = self.providers.services();
        let record = tokio::task::spawn_blocking(move || -> Result<QsoRecord, ServiceError> {
            let record = store.insert_qso(draft)?;
            queue_uploads(store.as_ref(), record.id, UploadAction::Insert, &services)?;
            Ok(record)
        })
        .await
        .map_err(|e| ServiceError::Join(e.to_string()))??;
        Ok(record)
    }

    /// Applies `patch` and queues an update upload per provider.
    pub async fn update_qso(&self, id: QsoId, patch: QsoPatch) -> Result<QsoRecord, ServiceError> {
        let store = Arc::clone(&self.store);
        let services = self.providers.services();
        let record = tokio::task::spawn_blocking(move || -> Result<QsoRecord, ServiceError> {
            let record = store.update_qso(id, &patch)?;
            if !patch.is_empty() {
                queue_uploads(store.as_ref(), record.id, UploadAction::Update, &services)?;
            }
            Ok(record)
        })
        .await
        .map_err(|e| ServiceError::Join(e.to_string()))??;
        Ok(record)
    }
}

fn queue_uploads(
    store: &dyn UploadStore,
    qso_id: QsoId,
    action: UploadAction,
    services: &[String],
) -> Result<(), ServiceError> {
    for service in services {
        let upload_id = store.insert_qso_upload(qso_id, action, service)?;
        debug!(qso_id, upload_id, service = %service, action = %action, "upload queued");
    }
    Ok(())
}
