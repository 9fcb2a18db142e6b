//! Shared types for the persistent thread index
//!
//! - Index statistics
//! - Error types
//! - Row types for sqlx query mapping

use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Thread ids are allocated from a single counter and never reused.
pub type ThreadId = i64;

/// Statistics about one account's index
///
/// Used by the operator CLI and the stats endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IndexStats {
    /// Number of message ids filed under a thread
    pub message_count: i64,

    /// Number of distinct thread ids currently in use
    pub thread_count: i64,

    /// Last thread id handed out by the counter (0 when none yet)
    pub last_thread_id: ThreadId,

    /// Number of folders with a stored update watermark
    pub folder_count: i64,
}

/// Errors that can occur during thread index operations
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("thread index database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("thread index migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("thread index I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid account name: {0:?}")]
    InvalidAccount(String),

    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

/// Database row type for folder watermarks
///
/// Timestamps are stored as milliseconds since the Unix epoch
#[derive(sqlx::FromRow)]
pub(crate) struct FolderTimestampRow {
    pub folder_uri: String,
    pub updated_at: i64,
}

impl FolderTimestampRow {
    pub(crate) fn into_entry(self) -> Result<(String, DateTime<Utc>), IndexError> {
        Ok((self.folder_uri, millis_to_datetime(self.updated_at)?))
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, IndexError> {
    DateTime::from_timestamp_millis(millis).ok_or(IndexError::InvalidTimestamp(millis))
}
