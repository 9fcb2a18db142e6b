//! Per-account threading orchestration
//!
//! [`AccountThreading`] ties the pieces together for one mail account: it reads
//! records from the mail store, threads them (honouring the account's override
//! ledger), writes the resulting threads back to the account's thread index and
//! answers lookups from the index when it can.
//!
//! [`ThreadingService`] hands out one `AccountThreading` per account behind an
//! async mutex, which is the single-writer discipline the threader relies on.
//!
//! When the index cannot be opened or fails mid-operation the account drops to
//! memory-only mode: lookups re-thread the whole account and no thread ids are
//! persisted. Every later acquisition retries opening the index. An override
//! ledger that cannot be read is left untouched and new overrides are refused
//! until it reads cleanly again.

use dashmap::DashMap;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::algorithm::Threader;
use super::cache::{IndexError, IndexStats, ThreadId, ThreadIndex, ThreadIndexRegistry, account_key};
use super::container::Message;
use super::error::ThreadingError;
use super::incremental::{find_affected_message_set, run_batches, seed_ids};
use super::overrides::OverrideStore;
use super::references::normalize_message_id;
use super::subject_matching::group_by_subject;
use super::view::ThreadView;
use crate::config::ThreadingConfig;
use crate::store::{MailSource, MessageRecord, SentClassifier};

/// Outcome of writing a pass back to the thread index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct PersistSummary {
    pub threads_written: usize,
    pub ids_allocated: usize,
    pub ids_merged: usize,
    pub threads_split: usize,
}

/// Outcome of a folder sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SyncSummary {
    pub folders_swept: usize,
    pub folders_unchanged: usize,
    pub new_messages: usize,
    pub threads_written: usize,
}

/// Threading state of one account
#[derive(Debug)]
pub struct AccountThreading {
    account: String,
    index: Option<Arc<ThreadIndex>>,
    storage_error: Option<String>,
    overrides: OverrideStore,
    /// Set while the override ledger cannot be read; overrides are refused then
    ledger_error: Option<String>,
    classifier: SentClassifier,
    batch_size: usize,
    cancel: CancellationToken,
}

impl AccountThreading {
    /// Open the account's index and override ledger.
    ///
    /// Storage failures do not fail the open; the account starts in memory-only
    /// mode instead. Only an unusable account name is an error.
    pub async fn open(
        account: &str,
        registry: &ThreadIndexRegistry,
        config: &ThreadingConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ThreadingError> {
        let key = account_key(account)?;
        let mut state = AccountThreading {
            account: key,
            index: None,
            storage_error: None,
            overrides: OverrideStore::in_memory(),
            ledger_error: None,
            classifier: config.sent_classifier(),
            batch_size: config.batch_size,
            cancel,
        };
        let ledger_path = registry.overrides_path(&state.account)?;
        match OverrideStore::open(ledger_path.clone()) {
            Ok(store) => state.overrides = store,
            Err(err) => {
                log::warn!(
                    "override ledger for {} unreadable, overrides refused: {}",
                    state.account,
                    err
                );
                // Keeps the path so a later retry reads the same file; never written meanwhile
                state.overrides = OverrideStore::at_path(ledger_path);
                state.ledger_error = Some(err.to_string());
            }
        }
        state.try_restore_storage(registry).await;
        Ok(state)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// True while either the thread index or the override ledger is unusable.
    pub fn is_memory_only(&self) -> bool {
        self.index.is_none() || self.ledger_error.is_some()
    }

    /// Why the account is in memory-only mode, if it is.
    pub fn storage_error(&self) -> Option<&str> {
        self.storage_error.as_deref().or(self.ledger_error.as_deref())
    }

    /// Why the override ledger could not be loaded, if it could not.
    pub fn ledger_error(&self) -> Option<&str> {
        self.ledger_error.as_deref()
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    /// Re-load the override ledger if it failed to load earlier.
    fn try_restore_ledger(&mut self) {
        if self.ledger_error.is_none() {
            return;
        }
        let Some(path) = self.overrides.path().map(Path::to_path_buf) else {
            self.ledger_error = None;
            return;
        };
        match OverrideStore::open(path) {
            Ok(store) => {
                log::info!("override ledger for {} readable again", self.account);
                self.overrides = store;
                self.ledger_error = None;
            }
            Err(err) => self.ledger_error = Some(err.to_string()),
        }
    }

    /// Refuse ledger writes while the ledger could not be loaded.
    fn require_ledger(&self) -> Result<(), ThreadingError> {
        match &self.ledger_error {
            Some(err) => Err(ThreadingError::StorageUnavailable(format!(
                "override ledger unavailable: {}",
                err
            ))),
            None => Ok(()),
        }
    }

    /// Re-open the index and re-load the override ledger if either failed earlier.
    pub async fn try_restore_storage(&mut self, registry: &ThreadIndexRegistry) {
        self.try_restore_ledger();
        if self.index.is_some() {
            return;
        }
        match registry.get(&self.account).await {
            Ok(index) => {
                if self.storage_error.take().is_some() {
                    log::info!("thread index for {} reachable again", self.account);
                }
                self.index = Some(index);
            }
            Err(err) => {
                if self.storage_error.is_none() {
                    log::warn!(
                        "thread index for {} unavailable, threading in memory only: {}",
                        self.account,
                        err
                    );
                }
                self.storage_error = Some(err.to_string());
            }
        }
    }

    /// Switch to memory-only mode after an index failure.
    fn degrade(&mut self, err: IndexError) -> ThreadingError {
        log::warn!(
            "thread index for {} failed, continuing in memory only: {}",
            self.account,
            err
        );
        self.index = None;
        self.storage_error = Some(err.to_string());
        ThreadingError::from(err)
    }

    fn to_messages(&self, records: Vec<MessageRecord>) -> Vec<Message> {
        let mut messages: Vec<Message> = records
            .into_iter()
            .filter_map(|record| match record.to_message(&self.classifier) {
                Ok(message) => Some(message),
                Err(err) => {
                    log::warn!("skipping message in {}: {}", record.folder, err);
                    None
                }
            })
            .collect();
        messages.sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.id().cmp(b.id())));
        messages
    }

    /// Every record of the account, across all folders.
    fn all_records(&self, source: &dyn MailSource) -> Vec<MessageRecord> {
        source
            .folders(&self.account)
            .into_iter()
            .flat_map(|folder| source.folder_messages(&self.account, &folder.uri))
            .collect()
    }

    /// Thread a set of messages in bounded batches.
    pub async fn thread_messages(&self, messages: Vec<Message>) -> Result<Threader, ThreadingError> {
        let mut threader = Threader::with_overrides(self.overrides.rules());
        let count = messages.len();
        threader.enqueue(messages);
        let pruned = run_batches(&mut threader, self.batch_size, &self.cancel).await?;

        let stats = threader.stats();
        log::info!(
            "threaded {} messages for {} into {} threads ({} duplicates, {} dummies pruned)",
            count,
            self.account,
            threader.thread_roots().len(),
            stats.discarded_duplicates,
            pruned
        );
        Ok(threader)
    }

    /// Records needed to rebuild the threads around `seeds`.
    ///
    /// With an index and all of `required` already cached, only the indexed
    /// threads the seeds touch are loaded. Otherwise the whole account is read.
    async fn records_around(
        &self,
        source: &dyn MailSource,
        seeds: HashSet<String>,
        required: &[String],
    ) -> Result<Vec<MessageRecord>, IndexError> {
        let Some(index) = &self.index else {
            return Ok(self.all_records(source));
        };

        for message_id in required {
            if !index.is_cached(message_id).await? {
                log::debug!("{} not indexed yet, reading all of {}", message_id, self.account);
                return Ok(self.all_records(source));
            }
        }

        let seed_records = source.messages_by_id(&self.account, &seeds);
        let mut expanded = seeds;
        expanded.extend(seed_ids(&self.to_messages(seed_records)));
        let affected = find_affected_message_set(index, expanded).await?;
        Ok(source.messages_by_id(&self.account, &affected))
    }

    /// Write every thread of a finished pass back to the index.
    ///
    /// Each thread keeps the smallest existing id among its members and absorbs
    /// the others. A thread whose only existing ids were already claimed earlier
    /// in the same pass was split off and gets a fresh id.
    async fn persist(index: &ThreadIndex, threader: &Threader) -> Result<PersistSummary, IndexError> {
        let mut summary = PersistSummary::default();
        let mut claimed: HashSet<ThreadId> = HashSet::new();

        for &top in threader.thread_roots() {
            let members = threader.thread_keys(top);
            if members.is_empty() {
                continue;
            }

            let existing = index.thread_ids_for(&members).await?;
            let mut available: Vec<ThreadId> = existing
                .iter()
                .copied()
                .filter(|thread_id| !claimed.contains(thread_id))
                .collect();
            available.sort_unstable();

            let thread_id = match available.first() {
                Some(&thread_id) => thread_id,
                None => {
                    summary.ids_allocated += 1;
                    index.allocate_thread_id().await?
                }
            };
            let merged: Vec<ThreadId> = available.iter().copied().skip(1).collect();

            if existing.iter().any(|thread_id| claimed.contains(thread_id)) {
                let mut moving = Vec::new();
                for member in &members {
                    if index
                        .thread_id_for(member)
                        .await?
                        .is_some_and(|current| claimed.contains(&current))
                    {
                        moving.push(member.clone());
                    }
                }
                index.forget_messages(&moving).await?;
                summary.threads_split += 1;
                log::debug!("split {} messages off into thread {}", moving.len(), thread_id);
            }

            let messages = threader.thread_message_ids(top);
            let real: HashSet<&str> = messages.iter().map(String::as_str).collect();
            let dummies: Vec<String> = members
                .iter()
                .filter(|member| !real.contains(member.as_str()))
                .cloned()
                .collect();
            index.store_thread(thread_id, &merged, &messages, &dummies).await?;

            summary.threads_written += 1;
            summary.ids_merged += merged.len();
            claimed.insert(thread_id);
            claimed.extend(merged);
        }

        Ok(summary)
    }

    async fn persist_pass(&mut self, threader: &Threader) -> Result<PersistSummary, ThreadingError> {
        let Some(index) = self.index.clone() else {
            return Ok(PersistSummary::default());
        };
        match Self::persist(&index, threader).await {
            Ok(summary) => {
                log::debug!("persisted threads for {}: {:?}", self.account, summary);
                Ok(summary)
            }
            Err(err) => Err(self.degrade(err)),
        }
    }

    async fn thread_id_of(&mut self, message_id: &str) -> Result<Option<ThreadId>, ThreadingError> {
        let Some(index) = self.index.clone() else {
            return Ok(None);
        };
        match index.thread_id_for(message_id).await {
            Ok(thread_id) => Ok(thread_id),
            Err(err) => Err(self.degrade(err)),
        }
    }

    /// Re-thread everything around `seeds` and write it back.
    async fn rethread_around(
        &mut self,
        source: &dyn MailSource,
        seeds: HashSet<String>,
        required: &[String],
    ) -> Result<Threader, ThreadingError> {
        let records = match self.records_around(source, seeds, required).await {
            Ok(records) => records,
            Err(err) => return Err(self.degrade(err)),
        };
        let threader = self.thread_messages(self.to_messages(records)).await?;
        self.persist_pass(&threader).await?;
        Ok(threader)
    }

    /// The thread containing `message_id`.
    pub async fn thread_for_message(
        &mut self,
        source: &dyn MailSource,
        message_id: &str,
    ) -> Result<ThreadView, ThreadingError> {
        let message_id = normalize_message_id(message_id)
            .ok_or_else(|| ThreadingError::UnknownMessage(message_id.to_string()))?;

        let seeds: HashSet<String> = [message_id.clone()].into_iter().collect();
        let threader = self
            .rethread_around(source, seeds, std::slice::from_ref(&message_id))
            .await?;

        let container = threader
            .find_container(&message_id)
            .filter(|&id| !threader.arena().is_dummy(id))
            .ok_or_else(|| ThreadingError::UnknownMessage(message_id.clone()))?;
        let top = threader.top_container(container);
        let thread_id = self.thread_id_of(&message_id).await?;

        Ok(ThreadView::build(&threader, top, thread_id))
    }

    /// Thread the whole account from scratch and write it back.
    pub async fn rethread_all(&mut self, source: &dyn MailSource) -> Result<PersistSummary, ThreadingError> {
        let messages = self.to_messages(self.all_records(source));
        let threader = self.thread_messages(messages).await?;
        self.persist_pass(&threader).await
    }

    /// Every thread of the account.
    ///
    /// With `subject_grouping`, root-level threads sharing a normalized subject
    /// are shown together. The grouping only shapes the returned views; the
    /// index keeps the header-based threads.
    pub async fn list_threads(
        &mut self,
        source: &dyn MailSource,
        subject_grouping: bool,
    ) -> Result<Vec<ThreadView>, ThreadingError> {
        let messages = self.to_messages(self.all_records(source));
        let mut threader = self.thread_messages(messages).await?;
        self.persist_pass(&threader).await?;

        if subject_grouping {
            let merged = group_by_subject(&mut threader);
            log::debug!("subject grouping merged {} threads in {}", merged, self.account);
        }

        let tops = threader.thread_roots().to_vec();
        let mut views = Vec::with_capacity(tops.len());
        for top in tops {
            let members = threader.thread_message_ids(top);
            let thread_id = match members.first() {
                Some(first) => self.thread_id_of(first).await?,
                None => None,
            };
            views.push(ThreadView::build(&threader, top, thread_id));
        }
        Ok(views)
    }

    fn flush_overrides(&mut self) -> Result<(), ThreadingError> {
        self.overrides.close().map_err(|err| {
            log::warn!("failed to write override ledger for {}: {}", self.account, err);
            ThreadingError::from(err)
        })
    }

    /// Detach `child_id` from `parent_id` and keep them apart on every later pass.
    pub async fn add_cut(
        &mut self,
        source: &dyn MailSource,
        child_id: &str,
        parent_id: &str,
    ) -> Result<ThreadView, ThreadingError> {
        let (child_id, parent_id) = normalize_pair(child_id, parent_id)?;
        self.require_ledger()?;

        self.overrides.add_cut(&child_id, &parent_id);
        self.flush_overrides()?;
        log::info!("cut {} from {} in {}", child_id, parent_id, self.account);

        self.replay(source, &child_id, &parent_id).await
    }

    /// Attach `child_id` under `parent_id` regardless of references.
    ///
    /// Rejected with [`ThreadingError::LoopRequestedByOverride`] before anything
    /// is recorded when `parent_id` currently sits below `child_id`.
    pub async fn add_copy(
        &mut self,
        source: &dyn MailSource,
        child_id: &str,
        parent_id: &str,
    ) -> Result<ThreadView, ThreadingError> {
        let (child_id, parent_id) = normalize_pair(child_id, parent_id)?;
        self.require_ledger()?;

        let seeds: HashSet<String> = [child_id.clone(), parent_id.clone()].into_iter().collect();
        let current = self
            .rethread_around(source, seeds, std::slice::from_ref(&child_id))
            .await?;
        if current.find_container(&child_id).is_none() {
            return Err(ThreadingError::UnknownMessage(child_id));
        }
        if current.copy_would_create_cycle(&child_id, &parent_id) {
            log::info!(
                "rejected pasting {} under {} in {}: would create a loop",
                child_id,
                parent_id,
                self.account
            );
            return Err(ThreadingError::LoopRequestedByOverride {
                child: child_id,
                parent: parent_id,
            });
        }

        self.overrides.add_copy(&child_id, &parent_id);
        self.flush_overrides()?;
        log::info!("pasted {} under {} in {}", child_id, parent_id, self.account);

        self.replay(source, &child_id, &parent_id).await
    }

    /// Re-thread the threads touched by an override and return the child's thread.
    async fn replay(
        &mut self,
        source: &dyn MailSource,
        child_id: &str,
        parent_id: &str,
    ) -> Result<ThreadView, ThreadingError> {
        let seeds: HashSet<String> = [child_id.to_string(), parent_id.to_string()]
            .into_iter()
            .collect();
        let threader = self
            .rethread_around(source, seeds, &[child_id.to_string()])
            .await?;

        let container = threader
            .find_container(child_id)
            .ok_or_else(|| ThreadingError::UnknownMessage(child_id.to_string()))?;
        let top = threader.top_container(container);
        let thread_id = self.thread_id_of(child_id).await?;
        Ok(ThreadView::build(&threader, top, thread_id))
    }

    /// Re-thread folders that changed since their last sweep.
    ///
    /// New messages are expanded with every indexed thread they touch, threaded
    /// together and written back. Folder watermarks advance only after the
    /// write-back succeeded.
    pub async fn sync_folders(&mut self, source: &dyn MailSource) -> Result<SyncSummary, ThreadingError> {
        let Some(index) = self.index.clone() else {
            return Err(ThreadingError::StorageUnavailable(
                self.storage_error
                    .clone()
                    .unwrap_or_else(|| "thread index not open".to_string()),
            ));
        };

        match self.sweep(&index, source).await {
            Ok(summary) => Ok(summary),
            Err(SweepError::Index(err)) => Err(self.degrade(err)),
            Err(SweepError::Threading(err)) => Err(err),
        }
    }

    async fn sweep(&self, index: &ThreadIndex, source: &dyn MailSource) -> Result<SyncSummary, SweepError> {
        let mut summary = SyncSummary::default();
        let mut swept = Vec::new();
        let mut new_messages = Vec::new();

        for folder in source.folders(&self.account) {
            let Some(modified_at) = folder.modified_at else {
                summary.folders_unchanged += 1;
                continue;
            };
            let watermark = index.folder_update_timestamp(&folder.uri).await?;
            if watermark.is_some_and(|seen| modified_at <= seen) {
                summary.folders_unchanged += 1;
                continue;
            }

            for message in self.to_messages(source.folder_messages(&self.account, &folder.uri)) {
                // Ids indexed only as someone's reference still count as new
                if !index.has_message(message.id()).await? {
                    new_messages.push(message);
                }
            }
            swept.push((folder.uri, modified_at));
        }

        summary.folders_swept = swept.len();
        summary.new_messages = new_messages.len();

        if !new_messages.is_empty() {
            let affected = find_affected_message_set(index, seed_ids(&new_messages)).await?;
            let records = source.messages_by_id(&self.account, &affected);
            let threader = self.thread_messages(self.to_messages(records)).await?;
            summary.threads_written = Self::persist(index, &threader).await?.threads_written;
        }

        for (uri, modified_at) in swept {
            index.set_folder_update_timestamp(&uri, modified_at).await?;
        }

        log::info!(
            "swept {} folders of {} ({} unchanged): {} new messages, {} threads written",
            summary.folders_swept,
            self.account,
            summary.folders_unchanged,
            summary.new_messages,
            summary.threads_written
        );
        Ok(summary)
    }

    /// Drop the account's index tables. The override ledger is kept.
    pub async fn reset(&mut self) -> Result<(), ThreadingError> {
        let Some(index) = self.index.clone() else {
            return Err(ThreadingError::StorageUnavailable(
                self.storage_error
                    .clone()
                    .unwrap_or_else(|| "thread index not open".to_string()),
            ));
        };
        index.reset().await.map_err(|err| self.degrade(err))
    }

    pub async fn stats(&mut self) -> Result<Option<IndexStats>, ThreadingError> {
        let Some(index) = self.index.clone() else {
            return Ok(None);
        };
        match index.stats().await {
            Ok(stats) => Ok(Some(stats)),
            Err(err) => Err(self.degrade(err)),
        }
    }
}

/// Internal error of a folder sweep, split so index failures can degrade the account
enum SweepError {
    Index(IndexError),
    Threading(ThreadingError),
}

impl From<IndexError> for SweepError {
    fn from(err: IndexError) -> Self {
        SweepError::Index(err)
    }
}

impl From<ThreadingError> for SweepError {
    fn from(err: ThreadingError) -> Self {
        SweepError::Threading(err)
    }
}

fn normalize_pair(child_id: &str, parent_id: &str) -> Result<(String, String), ThreadingError> {
    let child = normalize_message_id(child_id)
        .ok_or_else(|| ThreadingError::UnknownMessage(child_id.to_string()))?;
    let parent = normalize_message_id(parent_id)
        .ok_or_else(|| ThreadingError::UnknownMessage(parent_id.to_string()))?;
    Ok((child, parent))
}

/// One [`AccountThreading`] per account, each behind its own lock
#[derive(Debug)]
pub struct ThreadingService {
    config: ThreadingConfig,
    registry: ThreadIndexRegistry,
    accounts: DashMap<String, Arc<Mutex<AccountThreading>>>,
    shutdown: CancellationToken,
}

impl ThreadingService {
    pub fn new(config: ThreadingConfig) -> Self {
        let registry = ThreadIndexRegistry::new(config.store_base_path.clone());
        ThreadingService {
            config,
            registry,
            accounts: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ThreadingConfig {
        &self.config
    }

    pub fn registry(&self) -> &ThreadIndexRegistry {
        &self.registry
    }

    /// Lock-guarded state for `account`, created on first use.
    ///
    /// An account running memory-only retries opening its index here.
    pub async fn account(&self, account: &str) -> Result<Arc<Mutex<AccountThreading>>, ThreadingError> {
        let key = account_key(account)?;

        let existing = self.accounts.get(&key).map(|entry| Arc::clone(entry.value()));
        let state = match existing {
            Some(state) => state,
            None => {
                let opened =
                    AccountThreading::open(&key, &self.registry, &self.config, self.shutdown.child_token())
                        .await?;
                let shared = self
                    .accounts
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(opened)));
                Arc::clone(shared.value())
            }
        };

        {
            let mut guard = state.lock().await;
            guard.try_restore_storage(&self.registry).await;
        }
        Ok(state)
    }

    /// Cancel in-flight passes and close every index.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMailStore;
    use chrono::{Duration, TimeZone, Utc};

    const ACCOUNT: &str = "acct";

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn record(id: &str, refs: &[&str], minutes: i64) -> MessageRecord {
        let mut record = MessageRecord::new(
            format!("<{}>", id),
            format!("Subject {}", id),
            "someone@example.com",
            base_time() + Duration::minutes(minutes),
            "INBOX",
        );
        if !refs.is_empty() {
            let header: Vec<String> = refs.iter().map(|r| format!("<{}>", r)).collect();
            record = record.with_references(header.join(" "));
        }
        record
    }

    async fn open_account(dir: &tempfile::TempDir) -> AccountThreading {
        let config = ThreadingConfig::with_store_path(dir.path());
        let registry = ThreadIndexRegistry::new(dir.path());
        AccountThreading::open(ACCOUNT, &registry, &config, CancellationToken::new())
            .await
            .unwrap()
    }

    fn ids(node: &crate::threading::view::ThreadNode) -> Vec<String> {
        node.children
            .iter()
            .filter_map(|child| child.message_id.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_lookup_threads_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("a@x", &[], 0));
        store.insert(ACCOUNT, record("b@x", &["a@x"], 1));
        store.insert(ACCOUNT, record("c@x", &["a@x", "b@x"], 2));
        store.insert(ACCOUNT, record("z@x", &[], 3));

        let mut account = open_account(&dir).await;
        let view = account.thread_for_message(&store, "<c@x>").await.unwrap();

        assert_eq!(view.message_count, 3);
        assert_eq!(view.root.message_id.as_deref(), Some("a@x"));
        let thread_id = view.thread_id.unwrap();

        let stats = account.stats().await.unwrap().unwrap();
        assert_eq!(stats.message_count, 4);
        assert_eq!(stats.thread_count, 2);

        // Second lookup is answered from the indexed thread only
        let again = account.thread_for_message(&store, "b@x").await.unwrap();
        assert_eq!(again.thread_id, Some(thread_id));
        assert_eq!(again.message_count, 3);
    }

    #[tokio::test]
    async fn test_unknown_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("b@x", &["missing@x"], 0));

        let mut account = open_account(&dir).await;
        assert!(matches!(
            account.thread_for_message(&store, "nope@x").await,
            Err(ThreadingError::UnknownMessage(_))
        ));
        // Referenced but never seen
        assert!(matches!(
            account.thread_for_message(&store, "missing@x").await,
            Err(ThreadingError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_merges_threads_through_late_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert_at(ACCOUNT, record("b@x", &["a@x"], 1), base_time());
        store.insert_at(ACCOUNT, record("c@x", &[], 2), base_time());

        let mut account = open_account(&dir).await;
        let first = account.sync_folders(&store).await.unwrap();
        assert_eq!(first.folders_swept, 1);
        assert_eq!(first.new_messages, 2);

        let unchanged = account.sync_folders(&store).await.unwrap();
        assert_eq!(unchanged.folders_swept, 0);
        assert_eq!(unchanged.folders_unchanged, 1);

        // a arrives later and c turns out to be a reply to it as well
        let later = base_time() + Duration::hours(1);
        store.insert_at(ACCOUNT, record("a@x", &[], 0), later);
        store.insert_at(ACCOUNT, record("d@x", &["a@x", "c@x"], 3), later);
        let second = account.sync_folders(&store).await.unwrap();
        // a was indexed as the dummy parent of b but still counts as new
        assert_eq!(second.new_messages, 2);
        assert_eq!(second.threads_written, 1);

        let index = account.index.clone().unwrap();
        let b_thread = index.thread_id_for("b@x").await.unwrap();
        assert_eq!(index.thread_id_for("a@x").await.unwrap(), b_thread);
        assert_eq!(index.thread_id_for("d@x").await.unwrap(), b_thread);
    }

    #[tokio::test]
    async fn test_sync_late_parent_links_two_indexed_threads() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert_at(ACCOUNT, record("b@x", &["a@x"], 1), base_time());
        store.insert_at(ACCOUNT, record("z@x", &[], 2), base_time());

        let mut account = open_account(&dir).await;
        account.sync_folders(&store).await.unwrap();
        let index = account.index.clone().unwrap();
        assert_ne!(
            index.thread_id_for("b@x").await.unwrap(),
            index.thread_id_for("z@x").await.unwrap()
        );

        // a was only a placeholder so far; it turns out to be a reply to z
        store.insert_at(ACCOUNT, record("a@x", &["z@x"], 3), base_time() + Duration::hours(1));
        let summary = account.sync_folders(&store).await.unwrap();
        assert_eq!(summary.new_messages, 1);
        assert_eq!(summary.threads_written, 1);

        let z_thread = index.thread_id_for("z@x").await.unwrap();
        assert!(z_thread.is_some());
        assert_eq!(index.thread_id_for("a@x").await.unwrap(), z_thread);
        assert_eq!(index.thread_id_for("b@x").await.unwrap(), z_thread);
        assert!(index.has_message("a@x").await.unwrap());

        let view = account.thread_for_message(&store, "z@x").await.unwrap();
        assert_eq!(view.message_count, 3);
        assert_eq!(view.root.message_id.as_deref(), Some("z@x"));
    }

    #[tokio::test]
    async fn test_cut_splits_thread() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("a@x", &[], 0));
        store.insert(ACCOUNT, record("b@x", &["a@x"], 1));
        store.insert(ACCOUNT, record("c@x", &["a@x", "b@x"], 2));

        let mut account = open_account(&dir).await;
        let before = account.thread_for_message(&store, "a@x").await.unwrap();

        let view = account.add_cut(&store, "b@x", "a@x").await.unwrap();

        assert_eq!(view.root.message_id.as_deref(), Some("b@x"));
        assert_eq!(ids(&view.root), vec!["c@x"]);
        assert_ne!(view.thread_id, before.thread_id);

        let a_view = account.thread_for_message(&store, "a@x").await.unwrap();
        assert_eq!(a_view.message_count, 1);
        assert_eq!(a_view.thread_id, before.thread_id);

        // The ledger survives a reopen
        drop(account);
        let reopened = open_account(&dir).await;
        assert!(reopened.overrides().is_cut("b@x", "a@x"));
    }

    #[tokio::test]
    async fn test_copy_attaches_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("a@x", &[], 0));
        store.insert(ACCOUNT, record("z@x", &[], 1));

        let mut account = open_account(&dir).await;
        account.rethread_all(&store).await.unwrap();

        let view = account.add_copy(&store, "z@x", "a@x").await.unwrap();

        assert_eq!(view.root.message_id.as_deref(), Some("a@x"));
        assert_eq!(ids(&view.root), vec!["z@x"]);
        assert_eq!(account.stats().await.unwrap().unwrap().thread_count, 1);
    }

    #[tokio::test]
    async fn test_copy_loop_rejected_before_recording() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("a@x", &[], 0));
        store.insert(ACCOUNT, record("b@x", &["a@x"], 1));

        let mut account = open_account(&dir).await;
        let result = account.add_copy(&store, "a@x", "b@x").await;

        assert!(matches!(
            result,
            Err(ThreadingError::LoopRequestedByOverride { .. })
        ));
        assert!(account.overrides().is_empty());

        let view = account.thread_for_message(&store, "b@x").await.unwrap();
        assert_eq!(view.root.message_id.as_deref(), Some("a@x"));
    }

    #[tokio::test]
    async fn test_memory_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the account directory should be makes the index unopenable
        std::fs::write(dir.path().join(ACCOUNT), b"not a directory").unwrap();
        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("a@x", &[], 0));
        store.insert(ACCOUNT, record("b@x", &["a@x"], 1));

        let mut account = open_account(&dir).await;
        assert!(account.is_memory_only());
        assert!(account.storage_error().is_some());

        let view = account.thread_for_message(&store, "b@x").await.unwrap();
        assert_eq!(view.thread_id, None);
        assert_eq!(view.message_count, 2);
        assert!(matches!(
            account.sync_folders(&store).await,
            Err(ThreadingError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_ledger_refuses_overrides_until_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ThreadIndexRegistry::new(dir.path());
        let ledger_path = registry.overrides_path(ACCOUNT).unwrap();
        let mut seed = OverrideStore::at_path(&ledger_path);
        seed.add_cut("q@x", "p@x");
        seed.write_all().unwrap();
        let valid = std::fs::read_to_string(&ledger_path).unwrap();
        std::fs::write(&ledger_path, format!("{}broken\n", valid)).unwrap();

        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("a@x", &[], 0));
        store.insert(ACCOUNT, record("b@x", &["a@x"], 1));

        let mut account = open_account(&dir).await;
        assert!(account.is_memory_only());
        assert!(account.ledger_error().is_some());
        assert!(account.storage_error().is_some());

        assert!(matches!(
            account.add_cut(&store, "b@x", "a@x").await,
            Err(ThreadingError::StorageUnavailable(_))
        ));
        assert!(matches!(
            account.add_copy(&store, "b@x", "a@x").await,
            Err(ThreadingError::StorageUnavailable(_))
        ));
        assert_eq!(
            std::fs::read_to_string(&ledger_path).unwrap(),
            format!("{}broken\n", valid)
        );

        // Lookups still work and the refused cut never took effect
        let view = account.thread_for_message(&store, "b@x").await.unwrap();
        assert_eq!(view.root.message_id.as_deref(), Some("a@x"));

        std::fs::write(&ledger_path, &valid).unwrap();
        account.try_restore_storage(&registry).await;
        assert!(!account.is_memory_only());
        assert!(account.overrides().is_cut("q@x", "p@x"));

        account.add_cut(&store, "b@x", "a@x").await.unwrap();
        drop(account);
        let reopened = open_account(&dir).await;
        assert!(reopened.overrides().is_cut("q@x", "p@x"));
        assert!(reopened.overrides().is_cut("b@x", "a@x"));
    }

    #[tokio::test]
    async fn test_cut_after_copy_detaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        store.insert(ACCOUNT, record("a@x", &[], 0));
        store.insert(ACCOUNT, record("z@x", &[], 1));

        let mut account = open_account(&dir).await;
        let copied = account.add_copy(&store, "z@x", "a@x").await.unwrap();
        assert_eq!(ids(&copied.root), vec!["z@x"]);

        let cut = account.add_cut(&store, "z@x", "a@x").await.unwrap();
        assert_eq!(cut.root.message_id.as_deref(), Some("z@x"));
        assert_eq!(cut.message_count, 1);

        let a_view = account.thread_for_message(&store, "a@x").await.unwrap();
        assert!(ids(&a_view.root).is_empty());

        drop(account);
        let reopened = open_account(&dir).await;
        assert!(reopened.overrides().is_cut("z@x", "a@x"));
        assert_eq!(reopened.overrides().get_copy("z@x"), None);
    }

    #[tokio::test]
    async fn test_list_threads_with_subject_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMailStore::new();
        let mut first = record("a@x", &[], 0);
        first.subject = "Lunch plans".to_string();
        let mut reply = record("b@x", &[], 1);
        reply.subject = "Re: Lunch plans".to_string();
        store.insert(ACCOUNT, first);
        store.insert(ACCOUNT, reply);
        store.insert(ACCOUNT, record("z@x", &[], 2));

        let mut account = open_account(&dir).await;
        let plain = account.list_threads(&store, false).await.unwrap();
        assert_eq!(plain.len(), 3);
        assert!(plain.iter().all(|view| view.thread_id.is_some()));

        let grouped = account.list_threads(&store, true).await.unwrap();
        assert_eq!(grouped.len(), 2);
        let lunch = grouped
            .iter()
            .find(|view| view.root.message_id.as_deref() == Some("a@x"))
            .unwrap();
        assert_eq!(ids(&lunch.root), vec!["b@x"]);

        // Grouping is not written back
        assert_eq!(account.stats().await.unwrap().unwrap().thread_count, 3);
    }

    #[tokio::test]
    async fn test_service_hands_out_one_state_per_account() {
        let dir = tempfile::tempdir().unwrap();
        let service = ThreadingService::new(ThreadingConfig::with_store_path(dir.path()));

        let first = service.account("Acct").await.unwrap();
        let second = service.account("acct").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            service.account("../etc").await,
            Err(ThreadingError::InvalidAccount(_))
        ));

        service.shutdown().await;
    }
}
