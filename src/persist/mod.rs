/// SQLite-backed [`UploadStore`].
pub mod sqlite;

use thiserror::Error;

use crate::{
    qso::{QsoDraft, QsoPatch, QsoRecord},
    types::{QsoId, UploadAction, UploadId, UploadStatus},
    upload::{QsoUpload, StatusUpdate},
};

/// Storage-layer failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite driver error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// QSO payload failed to encode or decode.
    #[error("payload encoding: {0}")]
    Serde(#[from] serde_json::Error),
    /// No row for the named record.
    #[error("{0} not found")]
    NotFound(String),
    /// A storage closure panicked or its blocking task was cancelled.
    #[error("storage write task failed: {0}")]
    WriteTask(String),
    /// Any other failure, as text.
    #[error("{0}")]
    Message(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage gateway used by the forwarding pipeline and the logging path.
///
/// Methods take `&self`; implementations serialize access internally. Only
/// the engine's DB writer (or a worker running a write inline) calls the
/// mutating upload methods while the engine runs.
pub trait UploadStore: Send + Sync {
    /// Saves a new contact and returns it with its assigned id.
    fn insert_qso(&self, draft: QsoDraft) -> StorageResult<QsoRecord>;
    /// Applies `patch` to a stored contact.
    fn update_qso(&self, id: QsoId, patch: &QsoPatch) -> StorageResult<QsoRecord>;
    /// Loads one contact.
    fn fetch_qso(&self, id: QsoId) -> StorageResult<QsoRecord>;

    /// Queues an upload of the current state of `qso_id` for `service`.
    fn insert_qso_upload(
        &self,
        qso_id: QsoId,
        action: UploadAction,
        service: &str,
    ) -> StorageResult<UploadId>;

    /// Loads one upload record.
    fn fetch_upload(&self, id: UploadId) -> StorageResult<QsoUpload>;

    /// Uploads that still need a delivery attempt.
    fn fetch_pending_uploads(&self) -> StorageResult<Vec<QsoUpload>>;

    /// Overwrites the forwarding state of upload `id`.
    fn update_upload_status(
        &self,
        id: UploadId,
        status: UploadStatus,
        action: UploadAction,
        attempts: u32,
        last_error: &str,
    ) -> StorageResult<()>;

    /// Records that `service` confirmed the contact.
    fn mark_forwarded(&self, qso_id: QsoId, service: &str, confirmation: &str) -> StorageResult<()>;

    /// [`UploadStore::update_upload_status`] driven by a [`StatusUpdate`].
    fn apply_status(&self, update: &StatusUpdate) -> StorageResult<()> {
        self.update_upload_status(
            update.id,
            update.status,
            update.action,
            update.attempts,
            &update.last_error,
        )
    }
}
