//! Core JWZ (Jamie Zawinski) threading algorithm implementation
//!
//! Implements the standard email threading algorithm as described at:
//! https://www.jwz.org/doc/threading.html
//!
//! adapted for incremental use: a [`Threader`] owns its container arena and id
//! table for the whole session, messages can be ingested in bounded batches, and
//! user overrides (cuts and copies) take precedence over reference-derived links.
//!
//! ## Algorithm Overview
//!
//! 1. **Ingest**: Fill or create the message's container, resolving duplicate ids
//! 2. **Link References**: Chain each reference under the previous one
//! 3. **Choose Parent**: Copy override first, otherwise the last reference
//! 4. **Find Roots**: Attach every parentless container to the root set
//! 5. **Prune**: Drop dummies that ended up with no children

use std::collections::{HashMap, VecDeque};

use super::super::container::{Container, ContainerArena, ContainerId, Message};
use super::super::overrides::OverrideRules;
use super::cycle_detection::would_create_cycle;
use super::tree_traversal::collect_thread_members;

/// What happened to a message handed to [`Threader::ingest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First time this id was seen
    Created,
    /// The id was only known as a dummy; the message now fills it
    FilledDummy,
    /// A received copy was replaced by a sent copy with the same id
    ReplacedUnsent,
    /// A copy with the same id was already present and takes precedence
    Discarded,
}

/// Result of one bounded batch of ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchProgress {
    /// Messages are still pending; call `next_batch` again to resume
    Progress { ingested: usize, remaining: usize },
    /// The queue is drained, the root set is built and empty dummies are pruned
    Done { ingested: usize, pruned: usize },
}

/// Counters for one threading session, used for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadingStats {
    pub ingested: usize,
    pub discarded_duplicates: usize,
    pub cycle_vetoes: usize,
    pub cut_vetoes: usize,
    pub copies_applied: usize,
}

/// Stateful JWZ threader for one account's message set.
///
/// Not designed for concurrent mutation: callers hold it behind a single
/// writer (a plain owner or an exclusive per-account lock).
#[derive(Debug)]
pub struct Threader {
    arena: ContainerArena,
    root: ContainerId,
    id_table: HashMap<String, ContainerId>,
    overrides: OverrideRules,
    pending: VecDeque<Message>,
    pending_ids: HashMap<String, usize>,
    stats: ThreadingStats,
}

impl Default for Threader {
    fn default() -> Self {
        Self::new()
    }
}

impl Threader {
    pub fn new() -> Self {
        Self::with_overrides(OverrideRules::none())
    }

    /// Create a threader that honours the given cut/copy overrides.
    pub fn with_overrides(overrides: OverrideRules) -> Self {
        let mut arena = ContainerArena::new();
        let root = arena.alloc(None, None);
        Threader {
            arena,
            root,
            id_table: HashMap::new(),
            overrides,
            pending: VecDeque::new(),
            pending_ids: HashMap::new(),
            stats: ThreadingStats::default(),
        }
    }

    /// The synthetic root set container. Always a dummy.
    pub fn root(&self) -> ContainerId {
        self.root
    }

    pub fn arena(&self) -> &ContainerArena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut ContainerArena {
        &mut self.arena
    }

    pub fn container(&self, id: ContainerId) -> &Container {
        self.arena.get(id)
    }

    pub fn stats(&self) -> ThreadingStats {
        self.stats
    }

    pub fn overrides(&self) -> &OverrideRules {
        &self.overrides
    }

    /// Top-level containers currently in the root set.
    pub fn thread_roots(&self) -> &[ContainerId] {
        self.arena.children(self.root)
    }

    /// Queue messages for ingestion by [`next_batch`](Self::next_batch).
    pub fn enqueue<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        for message in messages {
            *self.pending_ids.entry(message.id().to_string()).or_insert(0) += 1;
            self.pending.push_back(message);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ingest at most `max_items` pending messages.
    ///
    /// When the queue drains, the root set is rebuilt and empty dummies are
    /// pruned. Both the id table and the queue persist between calls, so the
    /// caller may yield (or stop) at any batch boundary.
    pub fn next_batch(&mut self, max_items: usize) -> BatchProgress {
        let max_items = max_items.max(1);
        let mut ingested = 0;

        while ingested < max_items {
            let Some(message) = self.pending.pop_front() else {
                break;
            };
            self.release_pending(message.id());
            self.ingest(message);
            ingested += 1;
        }

        if self.pending.is_empty() {
            self.find_root_set();
            let pruned = self.prune_empty_containers();
            log::debug!(
                "threading pass complete: {} ingested, {} duplicates discarded, {} cycle vetoes, {} cut vetoes, {} copies applied, {} dummies pruned",
                self.stats.ingested,
                self.stats.discarded_duplicates,
                self.stats.cycle_vetoes,
                self.stats.cut_vetoes,
                self.stats.copies_applied,
                pruned
            );
            BatchProgress::Done { ingested, pruned }
        } else {
            BatchProgress::Progress {
                ingested,
                remaining: self.pending.len(),
            }
        }
    }

    /// Queue and fully thread a set of messages in one go.
    pub fn thread_all<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        self.enqueue(messages);
        while let BatchProgress::Progress { .. } = self.next_batch(usize::MAX) {}
    }

    fn release_pending(&mut self, message_id: &str) {
        if let Some(count) = self.pending_ids.get_mut(message_id) {
            *count -= 1;
            if *count == 0 {
                self.pending_ids.remove(message_id);
            }
        }
    }

    /// Parent of `id` unless that parent is the root set.
    fn real_parent(&self, id: ContainerId) -> Option<ContainerId> {
        self.arena.parent(id).filter(|&parent| parent != self.root)
    }

    fn get_or_create(&mut self, message_id: &str) -> ContainerId {
        if let Some(&id) = self.id_table.get(message_id) {
            return id;
        }
        let id = self.arena.alloc(Some(message_id.to_string()), None);
        self.id_table.insert(message_id.to_string(), id);
        id
    }

    fn key_of(&self, id: ContainerId) -> &str {
        self.arena.get(id).message_id().unwrap_or_default()
    }

    /// Thread a single message into the container forest.
    pub fn ingest(&mut self, message: Message) -> IngestOutcome {
        let message_id = message.id().to_string();

        // Step 1: find or create the message's container, resolving duplicates
        let (own, outcome) = match self.id_table.get(&message_id).copied() {
            None => {
                let id = self.arena.alloc(Some(message_id.clone()), None);
                self.id_table.insert(message_id.clone(), id);
                (id, IngestOutcome::Created)
            }
            Some(id) => match self.arena.message(id) {
                None => (id, IngestOutcome::FilledDummy),
                Some(existing) if !existing.is_sent() && message.is_sent() => {
                    (id, IngestOutcome::ReplacedUnsent)
                }
                Some(_) => {
                    log::trace!("discarding duplicate message {}", message_id);
                    self.stats.discarded_duplicates += 1;
                    return IngestOutcome::Discarded;
                }
            },
        };

        let reference_ids: Vec<String> = message.reference_ids().to_vec();
        self.arena.set_message(own, message);
        self.stats.ingested += 1;

        // Step 2: chain the references, oldest first
        let mut candidate: Option<ContainerId> = None;
        for reference_id in &reference_ids {
            if *reference_id == message_id {
                continue;
            }
            let reference = self.get_or_create(reference_id);

            if let Some(previous) = candidate {
                if self.real_parent(reference).is_none()
                    && !would_create_cycle(&self.arena, reference, previous)
                {
                    if self.overrides.is_cut(reference_id, self.key_of(previous)) {
                        self.stats.cut_vetoes += 1;
                        log::trace!("cut override keeps {} off {}", reference_id, self.key_of(previous));
                    } else {
                        self.arena.attach_child(previous, reference);
                    }
                }
            }
            candidate = Some(reference);
        }

        // Step 3: cycle guard on the prospective parent
        if let Some(parent) = candidate {
            if would_create_cycle(&self.arena, own, parent) {
                self.stats.cycle_vetoes += 1;
                log::trace!("ignoring parent {} of {}: would create a cycle", self.key_of(parent), message_id);
                candidate = None;
            }
        }

        // Step 4: a newly computed parent replaces the old one
        if let (Some(parent), Some(old_parent)) = (candidate, self.real_parent(own)) {
            if parent != old_parent {
                self.arena.detach_child(old_parent, own);
            }
        }

        // Step 5: a copy override wins over references
        if let Some(target_id) = self.overrides.get_copy(&message_id).map(str::to_string) {
            let target = self.get_or_create(&target_id);
            if self.overrides.is_cut(&message_id, &target_id) {
                self.stats.cut_vetoes += 1;
                log::debug!("copy override {} -> {} is also cut, ignoring", message_id, target_id);
            } else if would_create_cycle(&self.arena, own, target) {
                log::debug!("copy override {} -> {} would create a cycle, ignoring", message_id, target_id);
            } else {
                if self.arena.parent(own) != Some(target) {
                    self.arena.attach_child(target, own);
                }
                self.stats.copies_applied += 1;
                return outcome;
            }
        }

        // Step 6: attach under the reference-derived parent unless cut
        if let Some(parent) = candidate {
            if self.overrides.is_cut(&message_id, self.key_of(parent)) {
                self.stats.cut_vetoes += 1;
                log::trace!("cut override keeps {} off {}", message_id, self.key_of(parent));
            } else if self.real_parent(own) != Some(parent) {
                self.arena.attach_child(parent, own);
            }
        }

        outcome
    }

    /// Attach every parentless container in the id table to the root set.
    ///
    /// Containers are visited in creation order so the root set order is
    /// deterministic.
    pub fn find_root_set(&mut self) {
        let orphans: Vec<ContainerId> = self
            .arena
            .ids()
            .filter(|&id| id != self.root && self.arena.parent(id).is_none())
            .filter(|&id| {
                self.arena
                    .get(id)
                    .message_id()
                    .and_then(|key| self.id_table.get(key))
                    == Some(&id)
            })
            .collect();

        for id in orphans {
            self.arena.attach_child(self.root, id);
        }
    }

    /// Remove dummies without children from the whole forest.
    pub fn prune_empty_containers(&mut self) -> usize {
        let removed = self.arena.prune_empty_subtrees(self.root);
        for id in &removed {
            self.forget(*id);
        }
        removed.len()
    }

    fn forget(&mut self, id: ContainerId) {
        if let Some(key) = self.arena.get(id).message_id() {
            if self.id_table.get(key) == Some(&id) {
                self.id_table.remove(key);
            }
        }
    }

    /// O(1) lookup of the container filed under `message_id`.
    pub fn find_container(&self, message_id: &str) -> Option<ContainerId> {
        self.id_table.get(message_id).copied()
    }

    /// Whether a real message with this id is pending or already threaded.
    pub fn has_message(&self, message_id: &str) -> bool {
        self.pending_ids.contains_key(message_id)
            || self
                .find_container(message_id)
                .is_some_and(|id| !self.arena.is_dummy(id))
    }

    /// Detach a thread from the root set and purge all of its containers from
    /// the id table.
    pub fn remove_thread(&mut self, top: ContainerId) {
        if top == self.root {
            return;
        }
        self.arena.detach(top);
        for id in self.arena.subtree(top) {
            self.forget(id);
        }
    }

    /// The container just below the root set that contains `id`.
    pub fn top_container(&self, id: ContainerId) -> ContainerId {
        self.arena.top_container(id, self.root)
    }

    pub fn count_descendants_inclusive(&self, id: ContainerId) -> usize {
        self.arena.count_descendants_inclusive(id)
    }

    /// Ids of all real messages in the subtree under `top`, in thread order.
    pub fn thread_message_ids(&self, top: ContainerId) -> Vec<String> {
        collect_thread_members(&self.arena, top, 0)
            .into_iter()
            .map(|(message, _)| message.id().to_string())
            .collect()
    }

    /// Ids of every container under `top` that is filed in the id table, dummies
    /// included, in thread order.
    pub fn thread_keys(&self, top: ContainerId) -> Vec<String> {
        self.arena
            .subtree(top)
            .into_iter()
            .filter_map(|id| self.arena.get(id).message_id().map(str::to_string))
            .collect()
    }

    /// Whether pasting `child_id` under `parent_id` would create a cycle in the
    /// current tree. Unknown ids never do.
    pub fn copy_would_create_cycle(&self, child_id: &str, parent_id: &str) -> bool {
        if child_id == parent_id {
            return true;
        }
        match (self.find_container(child_id), self.find_container(parent_id)) {
            (Some(child), Some(parent)) => would_create_cycle(&self.arena, child, parent),
            _ => false,
        }
    }
}
