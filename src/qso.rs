//! QSO domain record, draft, and patch types.

use serde::{Deserialize, Serialize};

use crate::types::{Band, LogbookId, Mode, QsoId};

/// Fully materialized contact as stored locally.
///
/// Upload records embed a copy of this struct taken at queue time, so the
/// payload sent to a service never changes under a later edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QsoRecord {
    /// Stable QSO identifier.
    pub id: QsoId,
    /// Logbook this contact belongs to.
    pub logbook_id: LogbookId,
    /// Callsign of the logging station.
    pub station_callsign: String,
    /// Callsign of the contacted station.
    pub call: String,
    /// Band bucket.
    pub band: Band,
    /// Mode bucket.
    pub mode: Mode,
    /// Frequency in Hz.
    pub freq_hz: u64,
    /// Timestamp in milliseconds since epoch.
    pub ts_ms: u64,
    /// Signal report sent.
    pub rst_sent: String,
    /// Signal report received.
    pub rst_rcvd: String,
    /// Transmit power in watts, when known.
    pub tx_power_w: Option<f32>,
    /// Free-form operator comment.
    pub comment: String,
}

/// Insert payload used to create a new [`QsoRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct QsoDraft {
    /// Logbook this contact belongs to.
    pub logbook_id: LogbookId,
    /// Callsign of the logging station.
    pub station_callsign: String,
    /// Callsign of the contacted station.
    pub call: String,
    /// Band bucket.
    pub band: Band,
    /// Mode bucket.
    pub mode: Mode,
    /// Frequency in Hz.
    pub freq_hz: u64,
    /// Timestamp in milliseconds since epoch.
    pub ts_ms: u64,
    /// Signal report sent.
    pub rst_sent: String,
    /// Signal report received.
    pub rst_rcvd: String,
    /// Transmit power in watts, when known.
    pub tx_power_w: Option<f32>,
    /// Free-form operator comment.
    pub comment: String,
}

impl QsoDraft {
    /// Materializes the draft under the storage-assigned `id`.
    pub fn into_record(self, id: QsoId) -> QsoRecord {
        QsoRecord {
            id,
            logbook_id: self.logbook_id,
            station_callsign: self.station_callsign,
            call: self.call,
            band: self.band,
            mode: self.mode,
            freq_hz: self.freq_hz,
            ts_ms: self.ts_ms,
            rst_sent: self.rst_sent,
            rst_rcvd: self.rst_rcvd,
            tx_power_w: self.tx_power_w,
            comment: self.comment,
        }
    }
}

/// Sparse patch where each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QsoPatch {
    /// Optional replacement for the contacted callsign.
    pub call: Option<String>,
    /// Optional replacement for band.
    pub band: Option<Band>,
    /// Optional replacement for mode.
    pub mode: Option<Mode>,
    /// Optional replacement for frequency.
    pub freq_hz: Option<u64>,
    /// Optional replacement for timestamp.
    pub ts_ms: Option<u64>,
    /// Optional replacement for the sent report.
    pub rst_sent: Option<String>,
    /// Optional replacement for the received report.
    pub rst_rcvd: Option<String>,
    /// Optional replacement for transmit power.
    pub tx_power_w: Option<Option<f32>>,
    /// Optional replacement for the comment.
    pub comment: Option<String>,
}

impl QsoPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut QsoRecord) {
        if let Some(v) = &self.call {
            rec.call = v.clone();
        }
        if let Some(v) = self.band {
            rec.band = v;
        }
        if let Some(v) = self.mode {
            rec.mode = v;
        }
        if let Some(v) = self.freq_hz {
            rec.freq_hz = v;
        }
        if let Some(v) = self.ts_ms {
            rec.ts_ms = v;
        }
        if let Some(v) = &self.rst_sent {
            rec.rst_sent = v.clone();
        }
        if let Some(v) = &self.rst_rcvd {
            rec.rst_rcvd = v.clone();
        }
        if let Some(v) = self.tx_power_w {
            rec.tx_power_w = v;
        }
        if let Some(v) = &self.comment {
            rec.comment = v.clone();
        }
    }
}
