//! Upload tracking records and the network-result → status transition.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    qso::QsoRecord,
    types::{QsoId, UploadAction, UploadId, UploadStatus},
};

/// One (contact, service) forwarding record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QsoUpload {
    /// Storage-assigned record id.
    pub id: UploadId,
    /// Owning contact.
    pub qso_id: QsoId,
    /// Target service name, as registered with the provider registry.
    pub service: String,
    /// Insert or update intent.
    pub action: UploadAction,
    /// Current forwarding state.
    pub status: UploadStatus,
    /// Failed attempts since the last success.
    pub attempts: u32,
    /// Most recent failure text; empty after a success.
    pub last_error: String,
    /// Contact snapshot taken when the upload was queued.
    pub qso: QsoRecord,
}

/// Arguments of one `update_upload_status` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Record to update.
    pub id: UploadId,
    /// New status.
    pub status: UploadStatus,
    /// Action carried through unchanged.
    pub action: UploadAction,
    /// New attempt count.
    pub attempts: u32,
    /// New failure text.
    pub last_error: String,
}

/// Computes the status write for `upload` given the network-phase result.
///
/// Success resets `attempts` and clears `last_error`; failure increments
/// `attempts` by exactly one and records the error text.
pub fn resolve_outcome<E: fmt::Display>(upload: &QsoUpload, result: &Result<(), E>) -> StatusUpdate {
    match result {
        Ok(()) => StatusUpdate {
            id: upload.id,
            status: UploadStatus::Uploaded,
            action: upload.action,
            attempts: 0,
            last_error: String::new(),
        },
        Err(err) => {
            let mut last_error = err.to_string();
            if last_error.is_empty() {
                last_error = "unknown forwarding error".to_string();
            }
            StatusUpdate {
                id: upload.id,
                status: UploadStatus::Failed,
                action: upload.action,
                attempts: upload.attempts.saturating_add(1),
                last_error,
            }
        }
    }
}

impl QsoUpload {
    /// Returns a copy of this record with `update` applied.
    pub fn with_update(&self, update: &StatusUpdate) -> Self {
        Self {
            status: update.status,
            action: update.action,
            attempts: update.attempts,
            last_error: update.last_error.clone(),
            ..self.clone()
        }
    }
}
