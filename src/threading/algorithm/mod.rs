//! Email threading algorithm implementation
//!
//! This module implements the JWZ (Jamie Zawinski) threading algorithm
//! for organizing email messages into conversation threads.
//!
//! ## Main Entry Point
//!
//! Create a [`Threader`], queue messages with `enqueue()` and drive it with
//! `next_batch()` until it reports [`BatchProgress::Done`].

mod cycle_detection;
mod jwz_threading;
mod tree_traversal;

pub use cycle_detection::would_create_cycle;
pub use jwz_threading::{BatchProgress, IngestOutcome, Threader, ThreadingStats};
pub use tree_traversal::{collect_thread_members, find_first_real_message};
