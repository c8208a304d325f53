//! SQLite-backed QSO log and upload queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::{
    qso::{QsoDraft, QsoPatch, QsoRecord},
    types::{QsoId, UploadAction, UploadId, UploadStatus},
    upload::QsoUpload,
};

use super::{StorageError, StorageResult, UploadStore};

const UPLOAD_COLUMNS: &str =
    "id, qso_id, service, action, status, attempts, last_error, payload";

/// SQLite implementation of [`crate::persist::UploadStore`].
pub struct SqliteUploadStore {
    conn: Mutex<Connection>,
}

impl SqliteUploadStore {
    /// Opens or creates a SQLite store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Message("sqlite connection lock poisoned".to_string()))
    }

    /// Services that have confirmed `qso_id`, with their confirmation ids.
    pub fn forwarded_services(&self, qso_id: QsoId) -> StorageResult<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT service, confirmation FROM qso_forwards WHERE qso_id = ?1 ORDER BY service",
        )?;
        let rows = stmt.query_map(params![qso_id], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every upload for `qso_id`, oldest first, regardless of status.
    pub fn uploads_for_qso(&self, qso_id: QsoId) -> StorageResult<Vec<QsoUpload>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM qso_uploads WHERE qso_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![qso_id], upload_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl UploadStore for SqliteUploadStore {
    fn insert_qso(&self, draft: QsoDraft) -> StorageResult<QsoRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_ms() as i64;

        // Reserve the row first so the payload can carry the assigned id.
        tx.execute(
            "INSERT INTO qsos(logbook_id, call, ts_ms, payload, updated_ms) VALUES (?1, ?2, ?3, x'', ?4)",
            params![draft.logbook_id, draft.call, draft.ts_ms as i64, now],
        )?;
        let id = tx.last_insert_rowid();
        let record = draft.into_record(id);
        let payload = serde_json::to_vec(&record)?;
        tx.execute(
            "UPDATE qsos SET payload = ?1 WHERE id = ?2",
            params![payload, id],
        )?;
        tx.commit()?;

        debug!(qso_id = id, call = %record.call, "qso inserted");
        Ok(record)
    }

    fn update_qso(&self, id: QsoId, patch: &QsoPatch) -> StorageResult<QsoRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut record = load_qso(&tx, id)?;
        patch.apply_to(&mut record);
        let payload = serde_json::to_vec(&record)?;
        tx.execute(
            "UPDATE qsos SET call = ?1, ts_ms = ?2, payload = ?3, updated_ms = ?4 WHERE id = ?5",
            params![record.call, record.ts_ms as i64, payload, now_ms() as i64, id],
        )?;
        tx.commit()?;

        Ok(record)
    }

    fn fetch_qso(&self, id: QsoId) -> StorageResult<QsoRecord> {
        let conn = self.conn()?;
        load_qso(&conn, id)
    }

    fn insert_qso_upload(
        &self,
        qso_id: QsoId,
        action: UploadAction,
        service: &str,
    ) -> StorageResult<UploadId> {
        let conn = self.conn()?;
        let snapshot = load_qso(&conn, qso_id)?;
        let payload = serde_json::to_vec(&snapshot)?;
        let now = now_ms() as i64;
        conn.execute(
            "INSERT INTO qso_uploads(qso_id, service, action, status, attempts, last_error, payload, created_ms, updated_ms) \
             VALUES (?1, ?2, ?3, ?4, 0, '', ?5, ?6, ?6)",
            params![
                qso_id,
                service,
                action.as_str(),
                UploadStatus::Pending.as_str(),
                payload,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn fetch_upload(&self, id: UploadId) -> StorageResult<QsoUpload> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {UPLOAD_COLUMNS} FROM qso_uploads WHERE id = ?1"),
            params![id],
            upload_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("upload {id}")))
    }

    fn fetch_pending_uploads(&self) -> StorageResult<Vec<QsoUpload>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM qso_uploads WHERE status IN (?1, ?2) ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(
            params![UploadStatus::Pending.as_str(), UploadStatus::Failed.as_str()],
            upload_from_row,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn update_upload_status(
        &self,
        id: UploadId,
        status: UploadStatus,
        action: UploadAction,
        attempts: u32,
        last_error: &str,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE qso_uploads SET status = ?1, action = ?2, attempts = ?3, last_error = ?4, updated_ms = ?5 WHERE id = ?6",
            params![
                status.as_str(),
                action.as_str(),
                i64::from(attempts),
                last_error,
                now_ms() as i64,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("upload {id}")));
        }
        Ok(())
    }

    fn mark_forwarded(&self, qso_id: QsoId, service: &str, confirmation: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO qso_forwards(qso_id, service, confirmation, ts_ms) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(qso_id, service) DO UPDATE SET confirmation = excluded.confirmation, ts_ms = excluded.ts_ms",
            params![qso_id, service, confirmation, now_ms() as i64],
        )?;
        Ok(())
    }
}

fn load_qso(conn: &Connection, id: QsoId) -> StorageResult<QsoRecord> {
    let payload: Option<Vec<u8>> = conn
        .query_row("SELECT payload FROM qsos WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    let Some(payload) = payload else {
        return Err(StorageError::NotFound(format!("qso {id}")));
    };
    Ok(serde_json::from_slice(&payload)?)
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<QsoUpload> {
    let action: String = row.get(3)?;
    let status: String = row.get(4)?;
    let attempts: i64 = row.get(5)?;
    let payload: Vec<u8> = row.get(7)?;

    let qso = serde_json::from_slice::<QsoRecord>(&payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            payload.len(),
            rusqlite::types::Type::Blob,
            Box::new(err),
        )
    })?;

    Ok(QsoUpload {
        id: row.get(0)?,
        qso_id: row.get(1)?,
        service: row.get(2)?,
        action: UploadAction::parse(&action).ok_or_else(|| bad_text(3, &action))?,
        status: UploadStatus::parse(&status).ok_or_else(|| bad_text(4, &status))?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.get(6)?,
        qso,
    })
}

fn bad_text(col: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::other(format!("unexpected value {value:?}"))),
    )
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
