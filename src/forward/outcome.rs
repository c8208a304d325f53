use tracing::{debug, error};

use crate::{
    persist::{StorageResult, UploadStore},
    upload::{QsoUpload, resolve_outcome},
};

use super::provider::{DatabaseHook, ForwardError};

/// Writes the outcome of one delivery attempt.
///
/// The status write always happens. After a successful delivery the
/// provider's hook runs as well; a hook failure is returned even though the
/// upload itself is already marked uploaded. Errors are logged here and not
/// retried: the next poll picks the record up again if its status allows.
pub fn record_outcome(
    store: &dyn UploadStore,
    hook: Option<&dyn DatabaseHook>,
    upload: &QsoUpload,
    result: &Result<(), ForwardError>,
) -> StorageResult<()> {
    let update = resolve_outcome(upload, result);

    if let Err(err) = store.apply_status(&update) {
        error!(
            upload_id = upload.id,
            status = %update.status,
            error = %err,
            "failed to update upload status"
        );
        return Err(err);
    }
    debug!(
        upload_id = upload.id,
        status = %update.status,
        attempts = update.attempts,
        "upload status recorded"
    );

    if result.is_ok()
        && let Some(hook) = hook
        && let Err(err) = hook.update_database(&upload.qso)
    {
        error!(
            upload_id = upload.id,
            service = %upload.service,
            error = %err,
            "service database update failed after successful forward"
        );
        return Err(err);
    }

    Ok(())
}
