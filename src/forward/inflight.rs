use std::sync::{Arc, Mutex};

use hashbrown::HashSet;

use crate::types::UploadId;

/// Upload ids currently queued or being worked on.
///
/// A claim is held from admission until the outcome write has run (or the
/// upload is dropped), so the poller never admits the same id twice.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    ids: Arc<Mutex<HashSet<UploadId>>>,
}

impl InFlight {
    pub(crate) fn try_claim(&self, id: UploadId) -> Option<Claim> {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ids.insert(id) {
            return None;
        }
        Some(Claim {
            ids: Arc::clone(&self.ids),
            id,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Releases its id on drop.
pub(crate) struct Claim {
    ids: Arc<Mutex<HashSet<UploadId>>>,
    id: UploadId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.remove(&self.id);
    }
}
