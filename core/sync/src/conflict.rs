//! Version conflict detection.
//!
//! The remote store rejects writes based on a stale version. Such a
//! rejection is reported to the caller, never retried; the caller resyncs
//! the record and resubmits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cmsbridge_common::{RecordId, RemoteError};
use cmsbridge_storage::Record;

/// Information about a rejected stale write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Local record whose push was rejected.
    pub record_id: RecordId,
    /// Remote entry the push targeted.
    pub remote_id: String,
    /// Version the push was based on.
    pub submitted_version: Option<u64>,
    /// Remote explanation, when one was sent.
    pub message: Option<String>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    /// Build conflict info for `record` if `error` is a version mismatch.
    pub fn from_remote_error(record: &Record, error: &RemoteError) -> Option<Self> {
        if !error.is_version_mismatch() {
            return None;
        }

        Some(Self {
            record_id: record.id.clone(),
            remote_id: record.contentful_id().unwrap_or_default().to_string(),
            submitted_version: record.contentful_version(),
            message: error.message.clone(),
            detected_at: Utc::now(),
        })
    }
}

impl std::fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Record {} is out of date with entry {}",
            self.record_id, self.remote_id
        )?;
        if let Some(version) = self.submitted_version {
            write!(f, " (pushed version {})", version)?;
        }
        write!(f, "; resync it and save again")
    }
}
