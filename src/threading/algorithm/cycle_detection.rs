//! Cycle detection for email threading
//!
//! Ensures that parent-child relationships don't create cycles in the thread tree.
//! A cycle would occur if we tried to make a container a child of its own descendant.

use std::collections::HashSet;

use super::super::container::{ContainerArena, ContainerId};

impl ContainerArena {
    /// Whether `candidate` appears anywhere on the parent chain above `node`.
    ///
    /// Walks parent handles only, so the cost is O(depth).
    pub fn has_ancestor(&self, node: ContainerId, candidate: ContainerId) -> bool {
        let mut visited = HashSet::new();
        let mut current = self.parent(node);

        while let Some(ancestor) = current {
            if ancestor == candidate {
                return true;
            }
            // A repeated handle means the chain itself is already broken
            if !visited.insert(ancestor) {
                return true;
            }
            current = self.parent(ancestor);
        }

        false
    }
}

/// Check if making `child` a child of `parent` would create a cycle
///
/// Linking is unsafe when the two handles are the same container, or when
/// `child` already sits on the ancestry chain of `parent`.
///
/// ## Example
///
/// ```text
/// Current tree:  A → B → C
///
/// Trying to link: A under C (would create cycle A → B → C → A)
/// Result: true (cycle detected)
///
/// Trying to link: D under C (D is not in chain)
/// Result: false (safe to link)
/// ```
pub fn would_create_cycle(arena: &ContainerArena, child: ContainerId, parent: ContainerId) -> bool {
    child == parent || arena.has_ancestor(parent, child)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(arena: &mut ContainerArena) -> (ContainerId, ContainerId, ContainerId) {
        let a = arena.alloc(Some("A".to_string()), None);
        let b = arena.alloc(Some("B".to_string()), None);
        let c = arena.alloc(Some("C".to_string()), None);
        arena.attach_child(a, b);
        arena.attach_child(b, c);
        (a, b, c)
    }

    #[test]
    fn test_no_cycle_simple_chain() {
        let mut arena = ContainerArena::new();
        let (_, _, c) = chain(&mut arena);
        let d = arena.alloc(Some("D".to_string()), None);

        assert!(!would_create_cycle(&arena, d, c));
    }

    #[test]
    fn test_cycle_detected() {
        let mut arena = ContainerArena::new();
        let (a, _, c) = chain(&mut arena);

        assert!(would_create_cycle(&arena, a, c));
        assert!(arena.has_ancestor(c, a));
        assert!(!arena.has_ancestor(a, c));
    }

    #[test]
    fn test_self_loop() {
        let mut arena = ContainerArena::new();
        let a = arena.alloc(Some("A".to_string()), None);

        assert!(would_create_cycle(&arena, a, a));
        assert!(!arena.has_ancestor(a, a));
    }
}
