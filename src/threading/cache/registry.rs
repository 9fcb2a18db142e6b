//! Account-keyed registry of thread indexes
//!
//! Each account gets its own directory under the store base path, holding the
//! account's index database and override ledger. Indexes are opened lazily on
//! first use and shared afterwards.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::thread_index::ThreadIndex;
use super::types::IndexError;

const INDEX_FILE_NAME: &str = "threads.sqlite";
const OVERRIDES_FILE_NAME: &str = "overrides.jsonl";

/// Validate an account name for use as a directory name.
///
/// Letters, digits and `.`, `_`, `-`, `@`, `+` are accepted. Names made only of
/// dots are rejected.
pub fn account_key(account: &str) -> Result<String, IndexError> {
    let trimmed = account.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= 128
        && !trimmed.chars().all(|c| c == '.')
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '+'));

    if valid {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err(IndexError::InvalidAccount(account.to_string()))
    }
}

/// Lazily opened thread indexes, one per account
#[derive(Debug)]
pub struct ThreadIndexRegistry {
    base_path: PathBuf,
    indexes: DashMap<String, Arc<ThreadIndex>>,
}

impl ThreadIndexRegistry {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        ThreadIndexRegistry {
            base_path: base_path.into(),
            indexes: DashMap::new(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding everything stored for `account`.
    pub fn account_dir(&self, account: &str) -> Result<PathBuf, IndexError> {
        Ok(self.base_path.join(account_key(account)?))
    }

    pub fn index_path(&self, account: &str) -> Result<PathBuf, IndexError> {
        Ok(self.account_dir(account)?.join(INDEX_FILE_NAME))
    }

    pub fn overrides_path(&self, account: &str) -> Result<PathBuf, IndexError> {
        Ok(self.account_dir(account)?.join(OVERRIDES_FILE_NAME))
    }

    /// Shared handle to the account's index, opening it on first use.
    pub async fn get(&self, account: &str) -> Result<Arc<ThreadIndex>, IndexError> {
        let key = account_key(account)?;
        if let Some(existing) = self.indexes.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        let opened = Arc::new(ThreadIndex::open(self.base_path.join(&key).join(INDEX_FILE_NAME)).await?);
        log::info!("opened thread index for account {}", key);

        // Another task may have opened the same account meanwhile; keep the first
        let shared = self.indexes.entry(key).or_insert(opened);
        Ok(Arc::clone(shared.value()))
    }

    pub fn open_accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = self.indexes.iter().map(|entry| entry.key().clone()).collect();
        accounts.sort();
        accounts
    }

    /// Close every open index.
    pub async fn close_all(&self) {
        let indexes: Vec<Arc<ThreadIndex>> = self.indexes.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.indexes.clear();
        for index in indexes {
            index.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_key() {
        assert_eq!(account_key(" Alice@Example.com ").unwrap(), "alice@example.com");
        assert_eq!(account_key("work-imap_2").unwrap(), "work-imap_2");
        assert!(account_key("").is_err());
        assert!(account_key("..").is_err());
        assert!(account_key("a/b").is_err());
        assert!(account_key("a b").is_err());
    }

    #[tokio::test]
    async fn test_one_index_per_account() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ThreadIndexRegistry::new(dir.path());

        let work = registry.get("work").await.unwrap();
        let again = registry.get("WORK").await.unwrap();
        let home = registry.get("home").await.unwrap();

        assert!(Arc::ptr_eq(&work, &again));
        assert_ne!(work.path(), home.path());
        assert_eq!(registry.open_accounts(), vec!["home", "work"]);

        work.store_thread(1, &[], &["a".to_string()], &[]).await.unwrap();
        assert!(!home.is_cached("a").await.unwrap());
        assert!(dir.path().join("work").join("threads.sqlite").exists());

        registry.close_all().await;
        assert!(registry.open_accounts().is_empty());
    }
}
