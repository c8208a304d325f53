use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::FutureExt;
use hashbrown::HashSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Names of the engine tasks that are currently running.
///
/// Observability only: it backs [`WorkerRegistry::len`] and the list of
/// stragglers reported when a stop times out.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    names: Arc<Mutex<HashSet<String>>>,
}

impl WorkerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn names_mut(&self) -> MutexGuard<'_, HashSet<String>> {
        self.names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of running tasks.
    pub fn len(&self) -> usize {
        self.names_mut().len()
    }

    /// True when no task is running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names_mut().iter().cloned().collect();
        names.sort();
        names
    }

    fn register(&self, name: &str) -> Registration {
        self.names_mut().insert(name.to_string());
        Registration {
            registry: self.clone(),
            name: name.to_string(),
        }
    }

    /// Spawns `work` on `tracker` under `name`.
    ///
    /// The name is registered before the task is spawned and removed when the
    /// task ends, before the tracker counts it as finished. A panic inside
    /// `work` is caught and logged; it never reaches sibling tasks.
    pub fn spawn<F>(&self, tracker: &TaskTracker, name: impl Into<String>, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let registration = self.register(&name);

        tracker.spawn(async move {
            debug!(worker = %name, "worker started");
            if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                error!(
                    worker = %name,
                    panic = %panic_message(panic.as_ref()),
                    "worker panicked"
                );
            }
            drop(registration);
            debug!(worker = %name, "worker exited");
        });
    }
}

struct Registration {
    registry: WorkerRegistry,
    name: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.names_mut().remove(&self.name);
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
