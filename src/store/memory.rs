//! In-memory mail store
//!
//! Holds message records per account and folder. Used by the HTTP surface, which
//! accepts records over the API, and by tests.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{FolderInfo, MailSource, MessageRecord};

#[derive(Debug, Default)]
struct FolderMail {
    modified_at: Option<DateTime<Utc>>,
    next_sequence_key: u64,
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Default)]
struct AccountMail {
    folders: BTreeMap<String, FolderMail>,
}

#[derive(Debug, Default)]
pub struct MemoryMailStore {
    accounts: RwLock<HashMap<String, AccountMail>>,
}

impl MemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, stamping its folder as modified now.
    pub fn insert(&self, account: &str, record: MessageRecord) {
        self.insert_at(account, record, Utc::now());
    }

    /// Add a record and stamp its folder with `modified_at`.
    ///
    /// Records without a sequence key get the next one of their folder.
    pub fn insert_at(&self, account: &str, mut record: MessageRecord, modified_at: DateTime<Utc>) {
        let mut accounts = self.accounts.write();
        let folder = accounts
            .entry(account.to_string())
            .or_default()
            .folders
            .entry(record.folder.clone())
            .or_default();

        let sequence_key = record.sequence_key.unwrap_or(folder.next_sequence_key + 1);
        folder.next_sequence_key = folder.next_sequence_key.max(sequence_key);
        record.sequence_key = Some(sequence_key);

        folder.messages.push(record);
        folder.modified_at = Some(folder.modified_at.map_or(modified_at, |t| t.max(modified_at)));
    }

    pub fn message_count(&self, account: &str) -> usize {
        self.accounts.read().get(account).map_or(0, |mail| {
            mail.folders.values().map(|folder| folder.messages.len()).sum()
        })
    }
}

impl MailSource for MemoryMailStore {
    fn folders(&self, account: &str) -> Vec<FolderInfo> {
        let accounts = self.accounts.read();
        let Some(mail) = accounts.get(account) else {
            return Vec::new();
        };

        mail.folders
            .iter()
            .map(|(uri, folder)| FolderInfo {
                uri: uri.clone(),
                modified_at: folder.modified_at,
                message_count: folder.messages.len(),
            })
            .collect()
    }

    fn folder_messages(&self, account: &str, folder_uri: &str) -> Vec<MessageRecord> {
        self.accounts
            .read()
            .get(account)
            .and_then(|mail| mail.folders.get(folder_uri))
            .map(|folder| folder.messages.clone())
            .unwrap_or_default()
    }

    fn messages_by_id(&self, account: &str, message_ids: &HashSet<String>) -> Vec<MessageRecord> {
        let accounts = self.accounts.read();
        let Some(mail) = accounts.get(account) else {
            return Vec::new();
        };

        mail.folders
            .values()
            .flat_map(|folder| folder.messages.iter())
            .filter(|record| {
                record
                    .normalized_id()
                    .is_some_and(|id| message_ids.contains(&id))
            })
            .cloned()
            .collect()
    }
}
