//! Email threading module
//!
//! This module implements the JWZ (Jamie Zawinski) threading algorithm for organizing
//! email messages into conversation threads. The implementation is based on the algorithm
//! from https://www.jwz.org/doc/threading.html with adaptations for a personal mail
//! client: sent copies win over received copies of the same message, user overrides
//! (cut and copy) take precedence over headers, and thread ids persist per account.
//!
//! ## Threading Strategy
//!
//! 1. **References Header**: The primary method - uses the full chain of message IDs from
//!    the References header to build parent-child relationships
//! 2. **In-Reply-To Header**: Fallback for messages without References but with In-Reply-To
//! 3. **Overrides**: A user's cut or copy replaces what the headers say
//! 4. **Subject**: Optional, explicit regrouping of root-level threads
//!
//! ## Module Structure
//!
//! - `container`: Arena of containers and the message type
//! - `references`: Reference header parsing
//! - `algorithm`: Core JWZ threading implementation
//! - `subject_matching`: Subject normalization and grouping
//! - `overrides`: Durable cut/copy ledger
//! - `incremental`: Batched driver and affected-set expansion
//! - `cache`: Persistent per-account thread index
//! - `service`: Per-account orchestration
//! - `view`: Serializable thread trees

pub mod algorithm;
pub mod cache;
pub mod container;
pub mod error;
pub mod incremental;
pub mod overrides;
pub mod references;
pub mod service;
pub mod subject_matching;
pub mod view;

// Re-export main types and functions
pub use algorithm::{BatchProgress, IngestOutcome, Threader};
pub use cache::{IndexError, IndexStats, ThreadId, ThreadIndex, ThreadIndexRegistry};
pub use container::{ContainerArena, ContainerId, Message};
pub use error::ThreadingError;
pub use overrides::{OverrideError, OverrideStore};
pub use service::{AccountThreading, SyncSummary, ThreadingService};
pub use subject_matching::group_by_subject;
pub use view::{ThreadNode, ThreadView};
