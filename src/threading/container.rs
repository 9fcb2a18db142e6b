//! Container data structures for the JWZ threading algorithm
//!
//! The JWZ algorithm uses a "container" abstraction to represent both real messages
//! and "dummy" messages (messages referenced but never seen in the mailbox).
//!
//! Containers live in an arena and refer to each other through [`ContainerId`]
//! handles. A container stores its parent as a handle and its children as an
//! ordered list of handles, so every structural check (cycle guard, top container,
//! descendant counts) is a walk over handles rather than over shared references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message as handed to the threader by the mail store.
///
/// Messages are immutable once created: the threader may replace the message a
/// container holds, but never edits a message in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    subject: String,
    author: String,
    sequence_key: u64,
    date: DateTime<Utc>,
    location_ref: String,
    reference_ids: Vec<String>,
    is_sent: bool,
}

impl Message {
    /// Create a message with no references that was received (not sent).
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        author: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Message {
            id: id.into(),
            subject: subject.into(),
            author: author.into(),
            sequence_key: 0,
            date,
            location_ref: String::new(),
            reference_ids: Vec::new(),
            is_sent: false,
        }
    }

    /// Set the ordered reference chain, oldest first.
    pub fn with_references<I, S>(mut self, reference_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference_ids = reference_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the mailbox-local retrieval key and the opaque content handle.
    pub fn with_location(mut self, sequence_key: u64, location_ref: impl Into<String>) -> Self {
        self.sequence_key = sequence_key;
        self.location_ref = location_ref.into();
        self
    }

    pub fn with_sent(mut self, is_sent: bool) -> Self {
        self.is_sent = is_sent;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn sequence_key(&self) -> u64 {
        self.sequence_key
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn location_ref(&self) -> &str {
        &self.location_ref
    }

    pub fn reference_ids(&self) -> &[String] {
        &self.reference_ids
    }

    pub fn is_sent(&self) -> bool {
        self.is_sent
    }
}

/// Stable handle of a container inside a [`ContainerArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(usize);

impl ContainerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A container represents a node in the thread tree.
///
/// Each container has:
/// - An optional message id (the key it is filed under in the id table; `None` for
///   the root set and for synthetic dummies created by subject grouping)
/// - An optional message (`None` for dummy containers)
/// - An optional parent handle
/// - An ordered list of child handles
///
/// ## Dummy Containers
///
/// Dummy containers are created for messages that are referenced but were never
/// retrieved. They keep the shape of a conversation whose connecting message is
/// missing.
#[derive(Debug, Clone)]
pub struct Container {
    message_id: Option<String>,
    message: Option<Message>,
    parent: Option<ContainerId>,
    children: Vec<ContainerId>,
}

impl Container {
    fn new(message_id: Option<String>, message: Option<Message>) -> Self {
        Container {
            message_id,
            message,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn parent(&self) -> Option<ContainerId> {
        self.parent
    }

    pub fn children(&self) -> &[ContainerId] {
        &self.children
    }

    /// A container without a message.
    pub fn is_dummy(&self) -> bool {
        self.message.is_none()
    }
}

/// Owner of every container built during a threading session.
#[derive(Debug, Clone, Default)]
pub struct ContainerArena {
    nodes: Vec<Container>,
}

impl ContainerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new, unlinked container.
    pub fn alloc(&mut self, message_id: Option<String>, message: Option<Message>) -> ContainerId {
        let id = ContainerId(self.nodes.len());
        self.nodes.push(Container::new(message_id, message));
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All handles in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = ContainerId> + '_ {
        (0..self.nodes.len()).map(ContainerId)
    }

    pub fn get(&self, id: ContainerId) -> &Container {
        &self.nodes[id.0]
    }

    pub fn parent(&self, id: ContainerId) -> Option<ContainerId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: ContainerId) -> &[ContainerId] {
        &self.nodes[id.0].children
    }

    pub fn is_dummy(&self, id: ContainerId) -> bool {
        self.nodes[id.0].is_dummy()
    }

    pub fn message(&self, id: ContainerId) -> Option<&Message> {
        self.nodes[id.0].message.as_ref()
    }

    /// Replace the message held by a container, returning the previous one.
    pub fn set_message(&mut self, id: ContainerId, message: Message) -> Option<Message> {
        self.nodes[id.0].message.replace(message)
    }

    /// Append `child` to the end of `parent`'s children, detaching it from any
    /// previous parent first.
    pub fn attach_child(&mut self, parent: ContainerId, child: ContainerId) {
        if let Some(old_parent) = self.nodes[child.0].parent {
            self.detach_child(old_parent, child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Remove `child` from `parent`'s children. No-op when `child` is not one of them.
    pub fn detach_child(&mut self, parent: ContainerId, child: ContainerId) {
        let siblings = &mut self.nodes[parent.0].children;
        if let Some(position) = siblings.iter().position(|&c| c == child) {
            siblings.remove(position);
            self.nodes[child.0].parent = None;
        }
    }

    /// Detach a container from whatever parent it has.
    pub fn detach(&mut self, child: ContainerId) {
        if let Some(parent) = self.nodes[child.0].parent {
            self.detach_child(parent, child);
        }
    }

    /// Move every child of `from` to the end of `to`'s children, in order.
    pub fn adopt_children(&mut self, to: ContainerId, from: ContainerId) {
        let moved = std::mem::take(&mut self.nodes[from.0].children);
        for child in moved {
            self.nodes[child.0].parent = Some(to);
            self.nodes[to.0].children.push(child);
        }
    }
}
