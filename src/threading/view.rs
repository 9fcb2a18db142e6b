//! Serializable thread trees for the visualization side
//!
//! A [`ThreadNode`] mirrors one container and its children. Trees are built
//! bottom-up over a pre-order listing, without recursion, so very deep threads
//! are safe.

use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashMap;

use super::algorithm::Threader;
use super::cache::ThreadId;
use super::container::ContainerId;

/// One container of a thread. Dummies carry only their message id (if any).
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ThreadNode {
    pub message_id: Option<String>,
    pub is_dummy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub is_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_ref: Option<String>,
    pub children: Vec<ThreadNode>,
}

/// A whole thread as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ThreadView {
    /// Persistent thread id; `None` when running without a thread index
    pub thread_id: Option<ThreadId>,
    /// Number of real messages in the thread
    pub message_count: usize,
    pub root: ThreadNode,
}

impl ThreadNode {
    fn leaf(threader: &Threader, id: ContainerId) -> Self {
        let container = threader.container(id);
        let message = container.message();
        ThreadNode {
            message_id: container.message_id().map(str::to_string),
            is_dummy: container.is_dummy(),
            subject: message.map(|m| m.subject().to_string()),
            author: message.map(|m| m.author().to_string()),
            date: message.map(|m| m.date()),
            is_sent: message.is_some_and(|m| m.is_sent()),
            location_ref: message.map(|m| m.location_ref().to_string()),
            children: Vec::new(),
        }
    }

    /// Build the tree under `top`.
    pub fn build(threader: &Threader, top: ContainerId) -> Self {
        let order = threader.arena().subtree(top);
        let mut built: HashMap<ContainerId, ThreadNode> = HashMap::with_capacity(order.len());

        // Reverse pre-order finishes every child before its parent
        for &id in order.iter().rev() {
            let mut node = ThreadNode::leaf(threader, id);
            node.children = threader
                .arena()
                .children(id)
                .iter()
                .filter_map(|child| built.remove(child))
                .collect();
            built.insert(id, node);
        }

        built
            .remove(&top)
            .unwrap_or_else(|| ThreadNode::leaf(threader, top))
    }

    pub fn count_messages(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if !node.is_dummy {
                count += 1;
            }
            stack.extend(node.children.iter());
        }
        count
    }
}

impl ThreadView {
    pub fn build(threader: &Threader, top: ContainerId, thread_id: Option<ThreadId>) -> Self {
        let root = ThreadNode::build(threader, top);
        ThreadView {
            thread_id,
            message_count: root.count_messages(),
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading::container::Message;
    use chrono::Utc;

    #[test]
    fn test_build_nested_tree() {
        let mut threader = Threader::new();
        threader.thread_all(vec![
            Message::new("b", "Re: x", "b@x", Utc::now()).with_references(["a"]),
            Message::new("c", "Re: x", "c@x", Utc::now()).with_references(["a", "b"]),
            Message::new("d", "Re: x", "d@x", Utc::now()).with_references(["a"]),
        ]);
        let top = threader.thread_roots()[0];

        let view = ThreadView::build(&threader, top, Some(3));

        assert_eq!(view.thread_id, Some(3));
        assert_eq!(view.message_count, 3);
        assert!(view.root.is_dummy);
        assert_eq!(view.root.message_id.as_deref(), Some("a"));
        let children: Vec<_> = view.root.children.iter().map(|n| n.message_id.as_deref()).collect();
        assert_eq!(children, vec![Some("b"), Some("d")]);
        assert_eq!(view.root.children[0].children[0].author.as_deref(), Some("c@x"));
    }

    #[test]
    fn test_deep_thread_without_recursion() {
        let mut threader = Threader::new();
        let depth = 5_000;
        threader.thread_all((0..depth).map(|i| {
            let message = Message::new(format!("m{}", i), "deep", "a@x", Utc::now());
            if i == 0 {
                message
            } else {
                message.with_references([format!("m{}", i - 1)])
            }
        }));

        let view = ThreadView::build(&threader, threader.thread_roots()[0], None);
        assert_eq!(view.message_count, depth);
        // Dropping a deep tree recurses; keep it bounded by flattening first
        let mut stack = vec![view.root];
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}
