//! Mail store collaborator
//!
//! The threading service reads messages through the [`MailSource`] trait: the
//! folders of an account, the records in a folder, and records by Message-ID.
//! Each record carries its raw reference headers; whether it counts as sent is
//! decided by a [`SentClassifier`].

mod memory;
mod record;
pub mod rfc822;
mod sent;

use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashSet;

pub use memory::MemoryMailStore;
pub use record::{MessageRecord, RecordError};
pub use sent::SentClassifier;

/// Summary of one folder of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct FolderInfo {
    pub uri: String,
    /// Last time the folder's contents changed; `None` if never
    pub modified_at: Option<DateTime<Utc>>,
    pub message_count: usize,
}

/// Read access to an account's mail
pub trait MailSource: Send + Sync {
    fn folders(&self, account: &str) -> Vec<FolderInfo>;

    fn folder_messages(&self, account: &str, folder_uri: &str) -> Vec<MessageRecord>;

    /// Every record whose normalized Message-ID is in `message_ids`, across all folders.
    fn messages_by_id(&self, account: &str, message_ids: &HashSet<String>) -> Vec<MessageRecord>;
}
