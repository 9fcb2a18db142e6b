use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::SentClassifier;

const DEFAULT_SENT_FOLDERS: &str = "Sent,Sent Items,Sent Mail,Sent Messages";

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    split_list(&env_string(key, default))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runtime configuration for the threading service.
#[derive(Debug, Clone)]
pub struct ThreadingConfig {
    /// Directory holding one sub-directory per account
    pub store_base_path: PathBuf,
    /// Messages ingested per batch before yielding
    pub batch_size: usize,
    pub sent_identities: Vec<String>,
    pub sent_folder_names: Vec<String>,
    pub slow_request_threshold: Duration,
}

impl ThreadingConfig {
    pub fn from_env() -> Self {
        Self {
            store_base_path: PathBuf::from(env_string("THREAD_STORE_BASE_PATH", "./thread-store")),
            batch_size: env_usize("THREADING_BATCH_SIZE", 500),
            sent_identities: env_list("SENT_IDENTITIES", ""),
            sent_folder_names: env_list("SENT_FOLDER_NAMES", DEFAULT_SENT_FOLDERS),
            slow_request_threshold: env_duration_millis("SLOW_REQUEST_MS", 500),
        }
    }

    /// Defaults with the store rooted at `store_base_path`, ignoring the environment.
    pub fn with_store_path(store_base_path: impl Into<PathBuf>) -> Self {
        Self {
            store_base_path: store_base_path.into(),
            batch_size: 500,
            sent_identities: Vec::new(),
            sent_folder_names: split_list(DEFAULT_SENT_FOLDERS),
            slow_request_threshold: Duration::from_millis(500),
        }
    }

    pub fn sent_classifier(&self) -> SentClassifier {
        SentClassifier::new(&self.sent_identities, &self.sent_folder_names)
    }
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
