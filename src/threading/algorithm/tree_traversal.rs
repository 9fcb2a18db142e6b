//! Tree traversal utilities for email threading
//!
//! Functions for walking the container arena: counting and collecting thread
//! members, pruning empty dummies, and finding real messages below dummy tops.
//! All functions use iterative approaches to avoid stack overflow on deeply
//! nested threads.

use super::super::container::{ContainerArena, ContainerId, Message};

impl ContainerArena {
    /// Number of containers in the subtree rooted at `root`, `root` included.
    pub fn count_descendants_inclusive(&self, root: ContainerId) -> usize {
        let mut count = 0;
        let mut stack = vec![root];

        while let Some(current) = stack.pop() {
            count += 1;
            stack.extend_from_slice(self.children(current));
        }

        count
    }

    /// Pre-order (parent before children, children left to right) listing of a subtree.
    pub fn subtree(&self, root: ContainerId) -> Vec<ContainerId> {
        let mut ordered = Vec::new();
        let mut stack = vec![root];

        while let Some(current) = stack.pop() {
            ordered.push(current);
            // Reverse so the leftmost child is visited first
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }

        ordered
    }

    /// Remove every dummy below `root` that has no children, bottom-up.
    ///
    /// A dummy that still has at least one child is kept: it holds the position
    /// of a message that was never retrieved. A dummy whose children were all
    /// pruned becomes childless and is pruned in turn. `root` itself is never
    /// removed. Returns the removed handles.
    pub fn prune_empty_subtrees(&mut self, root: ContainerId) -> Vec<ContainerId> {
        let order = self.subtree(root);
        let mut removed = Vec::new();

        // Reverse pre-order visits every child before its parent
        for &node in order.iter().rev() {
            if node == root {
                continue;
            }
            if self.is_dummy(node) && self.children(node).is_empty() {
                self.detach(node);
                removed.push(node);
            }
        }

        removed
    }

    /// Walk up from `node` to the container just below `root` (or the top of the
    /// parent chain when `node` is not under `root`).
    pub fn top_container(&self, node: ContainerId, root: ContainerId) -> ContainerId {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            if parent == root {
                break;
            }
            current = parent;
        }
        current
    }

    /// Number of parent hops between `node` and `ancestor`, if `ancestor` is above it.
    pub fn depth_below(&self, node: ContainerId, ancestor: ContainerId) -> Option<usize> {
        let mut depth = 0;
        let mut current = node;
        while current != ancestor {
            current = self.parent(current)?;
            depth += 1;
        }
        Some(depth)
    }
}

/// Find the first real (non-dummy) message in a subtree
///
/// When a thread top is a dummy we still need a real message for thread
/// metadata (subject, date). Performs a left-to-right depth-first search and
/// returns the handle, its message and its depth below `root`.
pub fn find_first_real_message(
    arena: &ContainerArena,
    root: ContainerId,
) -> Option<(ContainerId, &Message, usize)> {
    let mut search_stack = vec![(root, 0usize)];

    while let Some((current, depth)) = search_stack.pop() {
        if let Some(message) = arena.message(current) {
            return Some((current, message, depth));
        }
        for &child in arena.children(current).iter().rev() {
            search_stack.push((child, depth + 1));
        }
    }

    None
}

/// Collect all real messages in a thread with their depth values
///
/// Dummies are skipped but still count towards the depth of their children.
/// Start at `-1` for a dummy top so that its first real children get depth 0.
pub fn collect_thread_members<'a>(
    arena: &'a ContainerArena,
    root: ContainerId,
    starting_depth: i32,
) -> Vec<(&'a Message, i32)> {
    let mut collected = Vec::new();
    let mut traversal_stack = vec![(root, starting_depth)];

    while let Some((current, depth)) = traversal_stack.pop() {
        if let Some(message) = arena.message(current) {
            collected.push((message, depth));
        }
        for &child in arena.children(current).iter().rev() {
            traversal_stack.push((child, depth + 1));
        }
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn real(arena: &mut ContainerArena, id: &str) -> ContainerId {
        let message = Message::new(id, format!("Test {}", id), "x@example.com", Utc::now());
        arena.alloc(Some(id.to_string()), Some(message))
    }

    fn dummy(arena: &mut ContainerArena, id: &str) -> ContainerId {
        arena.alloc(Some(id.to_string()), None)
    }

    #[test]
    fn test_find_real_message_immediate() {
        let mut arena = ContainerArena::new();
        let a = real(&mut arena, "A");

        let (found, message, depth) = find_first_real_message(&arena, a).unwrap();
        assert_eq!(found, a);
        assert_eq!(message.id(), "A");
        assert_eq!(depth, 0);
    }

    #[test]
    fn test_find_real_message_in_child() {
        let mut arena = ContainerArena::new();
        let a = dummy(&mut arena, "A");
        let b = real(&mut arena, "B");
        arena.attach_child(a, b);

        let (found, _, depth) = find_first_real_message(&arena, a).unwrap();
        assert_eq!(found, b);
        assert_eq!(depth, 1);
    }

    #[test]
    fn test_collect_with_dummy() {
        let mut arena = ContainerArena::new();
        let a = dummy(&mut arena, "A");
        let b = real(&mut arena, "B");
        let c = real(&mut arena, "C");
        arena.attach_child(a, b);
        arena.attach_child(b, c);

        let members: Vec<(String, i32)> = collect_thread_members(&arena, a, -1)
            .into_iter()
            .map(|(m, d)| (m.id().to_string(), d))
            .collect();

        assert_eq!(members, vec![("B".to_string(), 0), ("C".to_string(), 1)]);
    }

    #[test]
    fn test_count_descendants_inclusive() {
        let mut arena = ContainerArena::new();
        let a = real(&mut arena, "A");
        let b = dummy(&mut arena, "B");
        let c = real(&mut arena, "C");
        let d = real(&mut arena, "D");
        arena.attach_child(a, b);
        arena.attach_child(b, c);
        arena.attach_child(a, d);

        assert_eq!(arena.count_descendants_inclusive(a), 4);
        assert_eq!(arena.count_descendants_inclusive(b), 2);
        assert_eq!(arena.count_descendants_inclusive(d), 1);
    }

    #[test]
    fn test_prune_keeps_dummy_with_child() {
        let mut arena = ContainerArena::new();
        let root = dummy(&mut arena, "root");
        let kept = dummy(&mut arena, "kept");
        let leaf = real(&mut arena, "leaf");
        arena.attach_child(root, kept);
        arena.attach_child(kept, leaf);

        let removed = arena.prune_empty_subtrees(root);

        assert!(removed.is_empty());
        assert_eq!(arena.children(root), &[kept]);
    }

    #[test]
    fn test_prune_removes_nested_empty_dummies() {
        let mut arena = ContainerArena::new();
        let root = dummy(&mut arena, "root");
        let outer = dummy(&mut arena, "outer");
        let inner = dummy(&mut arena, "inner");
        let sibling = real(&mut arena, "sibling");
        arena.attach_child(root, outer);
        arena.attach_child(outer, inner);
        arena.attach_child(root, sibling);

        let removed = arena.prune_empty_subtrees(root);

        assert_eq!(removed, vec![inner, outer]);
        assert_eq!(arena.children(root), &[sibling]);
        assert!(arena.parent(outer).is_none());
    }

    #[test]
    fn test_top_container_and_depth() {
        let mut arena = ContainerArena::new();
        let root = dummy(&mut arena, "root");
        let a = real(&mut arena, "A");
        let b = real(&mut arena, "B");
        let c = real(&mut arena, "C");
        arena.attach_child(root, a);
        arena.attach_child(a, b);
        arena.attach_child(b, c);

        assert_eq!(arena.top_container(c, root), a);
        assert_eq!(arena.top_container(a, root), a);
        assert_eq!(arena.depth_below(c, a), Some(2));
        assert_eq!(arena.depth_below(a, c), None);
    }
}
