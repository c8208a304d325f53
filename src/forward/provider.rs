use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    persist::StorageResult,
    qso::QsoRecord,
    types::UploadAction,
};

/// Network-phase failure for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    /// No provider is registered under the upload's service name.
    #[error("no forwarder registered for service {0:?}")]
    UnknownService(String),
    /// The service answered and refused the contact.
    #[error("{service} rejected the upload: {reason}")]
    Rejected {
        /// Service that refused.
        service: String,
        /// Reason given by the service.
        reason: String,
    },
    /// The request never got a usable answer.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivery that only talks to the remote service and never touches storage.
#[async_trait]
pub trait NetworkForwarder: Send + Sync {
    /// Sends `qso` to the service as an insert or update.
    async fn forward_network_only(
        &self,
        qso: &QsoRecord,
        action: UploadAction,
    ) -> Result<(), ForwardError>;
}

/// Older delivery entry point that may also do its own bookkeeping.
#[async_trait]
pub trait LegacyForwarder: Send + Sync {
    /// Sends `qso` to the service.
    async fn forward(&self, qso: &QsoRecord, action: UploadAction) -> Result<(), ForwardError>;
}

/// Service-specific storage update run after a successful delivery.
///
/// Always executed on the DB writer (or inline by a worker), never
/// concurrently with other forwarding writes.
pub trait DatabaseHook: Send + Sync {
    /// Records the delivery of `qso` in service-specific storage.
    fn update_database(&self, qso: &QsoRecord) -> StorageResult<()>;
}

/// How a provider delivers, resolved once at registration.
#[derive(Clone)]
pub enum Delivery {
    /// Network-only forward; the preferred path.
    NetworkOnly(Arc<dyn NetworkForwarder>),
    /// Older combined forward, logged each time it is used.
    Legacy(Arc<dyn LegacyForwarder>),
}

/// One registered online service.
#[derive(Clone)]
pub struct ProviderDescriptor {
    /// Service name that uploads are keyed by.
    pub name: String,
    /// Network-phase entry point.
    pub delivery: Delivery,
    /// Storage update run after a successful delivery.
    pub db_hook: Option<Arc<dyn DatabaseHook>>,
}

impl ProviderDescriptor {
    /// Provider with a network-only forward and no hook.
    pub fn network_only(name: impl Into<String>, forwarder: Arc<dyn NetworkForwarder>) -> Self {
        Self {
            name: name.into(),
            delivery: Delivery::NetworkOnly(forwarder),
            db_hook: None,
        }
    }

    /// Provider that only offers the legacy forward.
    pub fn legacy(name: impl Into<String>, forwarder: Arc<dyn LegacyForwarder>) -> Self {
        Self {
            name: name.into(),
            delivery: Delivery::Legacy(forwarder),
            db_hook: None,
        }
    }

    /// Attaches a post-delivery storage hook.
    pub fn with_db_hook(mut self, hook: Arc<dyn DatabaseHook>) -> Self {
        self.db_hook = Some(hook);
        self
    }

    /// True when delivery goes through the legacy path.
    pub fn is_legacy(&self) -> bool {
        matches!(self.delivery, Delivery::Legacy(_))
    }

    /// Runs the network phase for one upload.
    pub async fn forward(&self, qso: &QsoRecord, action: UploadAction) -> Result<(), ForwardError> {
        match &self.delivery {
            Delivery::NetworkOnly(fwd) => fwd.forward_network_only(qso, action).await,
            Delivery::Legacy(fwd) => {
                warn!(
                    service = %self.name,
                    qso_id = qso.id,
                    "provider has no network-only forward, using legacy forward"
                );
                fwd.forward(qso, action).await
            }
        }
    }
}

/// Service name → provider map.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the provider under its name.
    pub fn register(&mut self, provider: ProviderDescriptor) {
        if provider.is_legacy() {
            warn!(service = %provider.name, "registering legacy-only forwarder");
        } else {
            info!(service = %provider.name, hook = provider.db_hook.is_some(), "registering forwarder");
        }
        self.providers.insert(provider.name.clone(), provider);
    }

    /// Provider registered under `service`.
    pub fn get(&self, service: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(service)
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
