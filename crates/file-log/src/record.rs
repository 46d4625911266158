use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Format used for the human-readable timestamp fields.
pub const DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Upload status of a tracked file.
///
/// `Updating`/`Updated` are the re-upload counterparts of
/// `Uploading`/`Uploaded`, used when the file had already been sent once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Queued,
    Uploading,
    Updating,
    Uploaded,
    Updated,
    Error(String),
}

impl FileStatus {
    /// Returns `true` for statuses between enqueue and a terminal outcome.
    /// In-flight files must never be enqueued a second time.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            FileStatus::Queued | FileStatus::Uploading | FileStatus::Updating
        )
    }

    /// Returns `true` if the file has completed at least one upload.
    pub fn is_uploaded(&self) -> bool {
        matches!(self, FileStatus::Uploaded | FileStatus::Updated)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Queued => write!(f, "queued"),
            FileStatus::Uploading => write!(f, "uploading"),
            FileStatus::Updating => write!(f, "updating"),
            FileStatus::Uploaded => write!(f, "uploaded"),
            FileStatus::Updated => write!(f, "updated"),
            FileStatus::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// One persisted entry of the file log, keyed by filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Current upload status.
    pub status: FileStatus,
    /// Formatted timestamp of the most recent status transition.
    pub status_date: String,
    /// Formatted timestamp of the most recent successful upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    /// Last observed filesystem modification time (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<f64>,
    /// Formatted counterpart of `mtime`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl FileRecord {
    pub(crate) fn new() -> Self {
        Self {
            status: FileStatus::Pending,
            status_date: format_now(),
            upload_date: None,
            mtime: None,
            date: None,
        }
    }
}

/// Current local time, formatted.
pub(crate) fn format_now() -> String {
    Local::now().format(DATE_FORMAT).to_string()
}

/// Formats an epoch-seconds timestamp in local time.
///
/// Out-of-range values fall back to the raw number.
pub(crate) fn format_epoch(mtime: f64) -> String {
    let secs = mtime.trunc() as i64;
    let nanos = (mtime.fract().abs() * 1e9).min(999_999_999.0) as u32;
    match DateTime::from_timestamp(secs, nanos) {
        Some(dt) => dt.with_timezone(&Local).format(DATE_FORMAT).to_string(),
        None => format!("{mtime}"),
    }
}
