//! Shared primitive IDs and logging/forwarding enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage-assigned QSO identifier.
pub type QsoId = i64;
/// Storage-assigned upload record identifier.
pub type UploadId = i64;
/// Logbook identifier.
pub type LogbookId = i64;

/// Amateur band bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    /// 160 meters.
    B160m,
    /// 80 meters.
    B80m,
    /// 40 meters.
    B40m,
    /// 30 meters.
    B30m,
    /// 20 meters.
    B20m,
    /// 17 meters.
    B17m,
    /// 15 meters.
    B15m,
    /// 12 meters.
    B12m,
    /// 10 meters.
    B10m,
    /// 6 meters.
    B6m,
    /// 2 meters.
    B2m,
    /// Any non-standard band.
    Other,
}

/// Emission mode bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Continuous Wave.
    CW,
    /// Single side-band phone.
    SSB,
    /// Frequency modulation.
    FM,
    /// FT8.
    FT8,
    /// Any other digital mode.
    Digital,
    /// Any non-standard mode.
    Other,
}

/// What an upload asks the remote service to do with the contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadAction {
    /// First upload of a newly logged contact.
    Insert,
    /// Re-upload after the contact was edited.
    Update,
}

impl UploadAction {
    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for UploadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forwarding state of one upload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    /// Queued and never attempted.
    Pending,
    /// Accepted by the remote service. Terminal.
    Uploaded,
    /// Last attempt failed; still eligible for another attempt.
    Failed,
}

impl UploadStatus {
    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploaded => "uploaded",
            Self::Failed => "failed",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "uploaded" => Some(Self::Uploaded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
