//! Incremental threading support
//!
//! Two pieces let a large mailbox be threaded without blocking:
//!
//! - [`run_batches`] drives a [`Threader`] in bounded batches, yielding to the
//!   runtime between batches and checking a cancellation token at each boundary.
//! - [`find_affected_message_set`] expands a set of new message ids with every
//!   message already indexed in a thread they touch, so only those threads need to
//!   be re-threaded instead of the whole account.

use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use super::algorithm::{BatchProgress, Threader};
use super::cache::{IndexError, ThreadIndex};
use super::container::Message;
use super::error::ThreadingError;

/// Drive the threader until its queue is drained.
///
/// Cancellation is only observed between batches, so the id table is never left
/// half-updated; a cancelled threader can be resumed with another call or dropped.
/// Returns the number of dummies pruned at the end of the pass.
pub async fn run_batches(
    threader: &mut Threader,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<usize, ThreadingError> {
    let mut batches = 0usize;

    loop {
        if cancel.is_cancelled() {
            log::info!(
                "threading cancelled after {} batches, {} messages still pending",
                batches,
                threader.pending_len()
            );
            return Err(ThreadingError::Cancelled);
        }

        batches += 1;
        match threader.next_batch(batch_size) {
            BatchProgress::Progress { ingested, remaining } => {
                log::debug!(
                    "threading batch {}: {} ingested, {} remaining",
                    batches,
                    ingested,
                    remaining
                );
                tokio::task::yield_now().await;
            }
            BatchProgress::Done { ingested, pruned } => {
                log::debug!(
                    "threading batch {}: {} ingested, done ({} dummies pruned)",
                    batches,
                    ingested,
                    pruned
                );
                return Ok(pruned);
            }
        }
    }
}

/// Find the complete set of message ids that need to be re-threaded
///
/// Starting from `seed_ids` (new messages plus every id they reference), adds
/// every message filed under a thread id that any of them already has. The
/// expansion repeats until no new thread id turns up.
pub async fn find_affected_message_set(
    index: &ThreadIndex,
    seed_ids: HashSet<String>,
) -> Result<HashSet<String>, IndexError> {
    let mut affected = seed_ids;
    let mut seen_threads = HashSet::new();
    let mut frontier: Vec<String> = affected.iter().cloned().collect();

    while !frontier.is_empty() {
        let thread_ids = index.thread_ids_for(&frontier).await?;
        frontier.clear();

        for thread_id in thread_ids {
            if !seen_threads.insert(thread_id) {
                continue;
            }
            for message_id in index.message_ids_for(thread_id).await? {
                if affected.insert(message_id.clone()) {
                    frontier.push(message_id);
                }
            }
        }
    }

    log::debug!(
        "affected set: {} messages across {} indexed threads",
        affected.len(),
        seen_threads.len()
    );
    Ok(affected)
}

/// Ids a batch of messages brings into play: their own ids and every reference.
pub fn seed_ids<'a, I>(messages: I) -> HashSet<String>
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut ids = HashSet::new();
    for message in messages {
        ids.insert(message.id().to_string());
        ids.extend(message.reference_ids().iter().cloned());
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: &str, refs: &[&str]) -> Message {
        Message::new(id, "subject", "a@example.com", Utc::now()).with_references(refs.iter().copied())
    }

    #[tokio::test]
    async fn test_run_batches_completes() {
        let mut threader = Threader::new();
        threader.enqueue((0..25).map(|i| message(&format!("m{}", i), &[])));

        let pruned = run_batches(&mut threader, 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(pruned, 0);
        assert_eq!(threader.thread_roots().len(), 25);
        assert_eq!(threader.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let mut threader = Threader::new();
        threader.enqueue(vec![message("a", &[]), message("b", &["a"])]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_batches(&mut threader, 1, &cancel).await;

        assert!(matches!(result, Err(ThreadingError::Cancelled)));
        assert_eq!(threader.pending_len(), 2);

        // Resuming with a fresh token finishes the pass
        run_batches(&mut threader, 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(threader.thread_roots().len(), 1);
    }

    #[test]
    fn test_seed_ids_include_references() {
        let messages = vec![message("c", &["a", "b"]), message("d", &[])];
        let ids = seed_ids(&messages);
        assert_eq!(ids.len(), 4);
        assert!(ids.contains("a"));
    }

    #[tokio::test]
    async fn test_affected_set_pulls_in_indexed_threads() {
        let dir = tempfile::tempdir().unwrap();
        let index = ThreadIndex::open(dir.path().join("threads.sqlite")).await.unwrap();
        index
            .store_thread(1, &[], &["a".to_string(), "b".to_string()], &[])
            .await
            .unwrap();
        index.store_thread(2, &[], &["x".to_string()], &[]).await.unwrap();

        let seed: HashSet<String> = ["c".to_string(), "b".to_string()].into_iter().collect();
        let affected = find_affected_message_set(&index, seed).await.unwrap();

        let mut affected: Vec<String> = affected.into_iter().collect();
        affected.sort();
        assert_eq!(affected, vec!["a", "b", "c"]);
    }
}
