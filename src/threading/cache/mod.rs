//! Persistent thread index
//!
//! Durable mapping from message id to thread id, used to answer "what thread is
//! this message in" without re-threading, and to merge or split thread ids as new
//! evidence arrives.
//!
//! ## Architecture
//!
//! One SQLite database per mail account (the isolation boundary), opened lazily
//! through [`ThreadIndexRegistry`]. Schema lives in `migrations/` and is applied
//! with sqlx's migrator on open.

mod registry;
mod thread_index;
mod types;

// Re-export public types
pub use registry::{ThreadIndexRegistry, account_key};
pub use thread_index::ThreadIndex;
pub use types::{IndexError, IndexStats, ThreadId};
