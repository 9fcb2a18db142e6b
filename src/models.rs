use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::store::MessageRecord;
use crate::threading::{IndexStats, SyncSummary};

/// Envelope wrapping every successful payload
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

// ===== Message intake =====

/// A raw RFC 5322 message; only its headers are read.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawMessage {
    pub folder: String,
    /// Full message text, or at least its header block
    pub content: String,
    #[serde(default)]
    pub sequence_key: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IngestRequest {
    /// Messages whose headers were already extracted
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    /// Messages given as raw text
    #[serde(default)]
    pub raw: Vec<RawMessage>,
}

/// Why one entry of an [`IngestRequest`] was skipped
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RejectedMessage {
    /// Position in `messages`, then `raw`, counted together
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: Vec<RejectedMessage>,
    /// Messages held for the account after the intake
    pub total_messages: usize,
}

// ===== Overrides =====

/// Body of a cut or copy request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OverrideRequest {
    #[serde(rename = "childId")]
    pub child_id: String,
    #[serde(rename = "parentId")]
    pub parent_id: String,
}

// ===== Index maintenance =====

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SyncResponse {
    pub account: String,
    pub summary: SyncSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexStatusResponse {
    pub account: String,
    /// True when the account threads without its durable index or override ledger
    #[serde(rename = "memoryOnly")]
    pub memory_only: bool,
    #[serde(rename = "storageError")]
    pub storage_error: Option<String>,
    /// Set while the override ledger cannot be read and overrides are refused
    #[serde(rename = "ledgerError")]
    pub ledger_error: Option<String>,
    #[serde(rename = "overrideCount")]
    pub override_count: usize,
    /// Absent while memory-only
    pub stats: Option<IndexStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResetResponse {
    pub account: String,
    pub message: String,
}
