//! Subject normalization and matching for email threading
//!
//! When email headers (In-Reply-To, References) are missing or incomplete,
//! root-level threads that belong to the same conversation can still be joined by
//! subject. This pass is never run by the threading pipeline on its own; callers
//! invoke [`group_by_subject`] explicitly after a pass has finished.

use std::collections::HashMap;

use super::algorithm::{Threader, find_first_real_message};
use super::container::{ContainerArena, ContainerId};

/// Normalize an email subject for threading comparison
///
/// Repeatedly strips reply/forward prefixes and bracketed tags, lower-cases and
/// collapses whitespace. Returns the normalized key together with the number of
/// reply prefixes (`Re:`, `Aw:`) removed, which approximates how many reply hops
/// the message sits below the start of the conversation.
///
/// ## Examples
///
/// ```rust
/// use threadline::threading::subject_matching::normalize_subject;
///
/// assert_eq!(
///     normalize_subject("Re: [PATCH] Fix memory leak"),
///     ("fix memory leak".to_string(), 1)
/// );
/// assert_eq!(
///     normalize_subject("Re: Fwd: Re:  Lunch   plans"),
///     ("lunch plans".to_string(), 2)
/// );
/// ```
pub fn normalize_subject(subject: &str) -> (String, usize) {
    let mut normalized = subject.trim().to_lowercase();
    let mut reply_hops = 0;

    // Keep removing prefixes until none match
    loop {
        let before = normalized.len();

        for prefix in &["re:", "fwd:", "fw:", "aw:"] {
            if let Some(rest) = normalized.strip_prefix(prefix) {
                if *prefix == "re:" || *prefix == "aw:" {
                    reply_hops += 1;
                }
                normalized = rest.trim_start().to_string();
            }
        }

        // Mailing list tags like [PATCH], [dev-list], [RFC]
        if normalized.starts_with('[') {
            if let Some(end_bracket) = normalized.find(']') {
                normalized = normalized[end_bracket + 1..].trim_start().to_string();
            }
        }

        if before == normalized.len() {
            break;
        }
    }

    let words: Vec<&str> = normalized.split_whitespace().collect();
    (words.join(" "), reply_hops)
}

/// Representative of one subject key among the root-level threads
#[derive(Debug, Clone, Copy)]
struct Representative {
    top: ContainerId,
    hops: usize,
}

/// Subject key and hop count of a root-level thread, if it has a real message.
///
/// A dummy top borrows the subject of its first real descendant; the
/// descendant's hops are reduced by how far below the top it sits.
fn subject_of(arena: &ContainerArena, top: ContainerId) -> Option<(String, usize)> {
    let (_, message, depth) = find_first_real_message(arena, top)?;
    let (key, hops) = normalize_subject(message.subject());
    if key.is_empty() {
        return None;
    }
    Some((key, hops.saturating_sub(depth)))
}

/// Attach `child` under `parent` with `gap` synthetic dummies in between.
fn attach_with_gap(arena: &mut ContainerArena, parent: ContainerId, child: ContainerId, gap: usize) {
    let mut current = parent;
    for _ in 0..gap {
        let filler = arena.alloc(None, None);
        arena.attach_child(current, filler);
        current = filler;
    }
    arena.attach_child(current, child);
}

/// Merge root-level threads whose subjects normalize to the same key.
///
/// Only the Root Set's direct children are considered. For each key the
/// shallowest thread (fewest reply hops) is kept as the representative and
/// deeper threads are attached below it, with synthetic dummies keeping the
/// hop-count difference. Two real tops at equal depth get a new dummy parent.
/// Returns the number of threads merged away.
pub fn group_by_subject(threader: &mut Threader) -> usize {
    let root = threader.root();
    let tops: Vec<ContainerId> = threader.thread_roots().to_vec();
    let arena = threader.arena_mut();

    let mut by_subject: HashMap<String, Representative> = HashMap::new();
    let mut merged = 0;

    for top in tops {
        let Some((key, hops)) = subject_of(arena, top) else {
            continue;
        };

        let Some(existing) = by_subject.get(&key).copied() else {
            by_subject.insert(key, Representative { top, hops });
            continue;
        };

        let representative = if hops > existing.hops {
            attach_with_gap(arena, existing.top, top, hops - existing.hops - 1);
            existing
        } else if hops < existing.hops {
            attach_with_gap(arena, top, existing.top, existing.hops - hops - 1);
            Representative { top, hops }
        } else {
            match (arena.is_dummy(existing.top), arena.is_dummy(top)) {
                (false, false) => {
                    let parent = arena.alloc(None, None);
                    arena.attach_child(root, parent);
                    arena.attach_child(parent, existing.top);
                    arena.attach_child(parent, top);
                    Representative {
                        top: parent,
                        hops: hops.saturating_sub(1),
                    }
                }
                (true, false) => {
                    arena.attach_child(existing.top, top);
                    existing
                }
                (false, true) => {
                    arena.attach_child(top, existing.top);
                    Representative { top, hops }
                }
                (true, true) => {
                    arena.adopt_children(existing.top, top);
                    arena.detach(top);
                    existing
                }
            }
        };

        log::trace!("grouped thread by subject `{}`", key);
        by_subject.insert(key, representative);
        merged += 1;
    }

    if merged > 0 {
        log::debug!("subject grouping merged {} root-level threads", merged);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading::container::Message;
    use chrono::Utc;

    fn message(id: &str, subject: &str, refs: &[&str]) -> Message {
        Message::new(id, subject, "someone@example.com", Utc::now()).with_references(refs.iter().copied())
    }

    fn depth_of(threader: &Threader, message_id: &str) -> usize {
        let id = threader.find_container(message_id).unwrap();
        threader.arena().depth_below(id, threader.root()).unwrap()
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("Hello"), ("hello".to_string(), 0));
        assert_eq!(normalize_subject("RE: re: [list] Hello  world"), ("hello world".to_string(), 2));
        assert_eq!(normalize_subject("Fwd: Hello"), ("hello".to_string(), 0));
        assert_eq!(normalize_subject("AW: Hallo"), ("hallo".to_string(), 1));
        assert_eq!(normalize_subject("  "), (String::new(), 0));
    }

    #[test]
    fn test_not_run_automatically() {
        let mut threader = Threader::new();
        threader.thread_all(vec![message("a", "Hello", &[]), message("b", "Re: Hello", &[])]);
        assert_eq!(threader.thread_roots().len(), 2);
    }

    #[test]
    fn test_reply_joins_original() {
        let mut threader = Threader::new();
        threader.thread_all(vec![message("b", "Re: Hello", &[]), message("a", "Hello", &[])]);

        assert_eq!(group_by_subject(&mut threader), 1);

        assert_eq!(threader.thread_roots().len(), 1);
        assert_eq!(depth_of(&threader, "a"), 1);
        assert_eq!(depth_of(&threader, "b"), 2);
    }

    #[test]
    fn test_hop_gap_filled_with_dummies() {
        let mut threader = Threader::new();
        threader.thread_all(vec![message("a", "Hello", &[]), message("d", "Re: Re: Re: Hello", &[])]);

        group_by_subject(&mut threader);

        assert_eq!(depth_of(&threader, "d"), 4);
        let d = threader.find_container("d").unwrap();
        let parent = threader.arena().parent(d).unwrap();
        assert!(threader.arena().is_dummy(parent));
        assert_eq!(threader.top_container(d), threader.find_container("a").unwrap());
    }

    #[test]
    fn test_tie_creates_dummy_parent() {
        let mut threader = Threader::new();
        threader.thread_all(vec![
            message("a", "Hello", &[]),
            message("b", "hello", &[]),
            message("c", "Re: Hello", &[]),
        ]);

        assert_eq!(group_by_subject(&mut threader), 2);

        assert_eq!(threader.thread_roots().len(), 1);
        let top = threader.thread_roots()[0];
        assert!(threader.arena().is_dummy(top));
        assert_eq!(threader.arena().children(top).len(), 3);
        assert_eq!(depth_of(&threader, "c"), 2);
    }

    #[test]
    fn test_dummy_top_uses_first_real_descendant() {
        let mut threader = Threader::new();
        threader.thread_all(vec![
            message("b", "Re: Hello", &["missing"]),
            message("x", "Re: Hello", &[]),
        ]);

        group_by_subject(&mut threader);

        // The dummy top sits at hop 0, so the unlinked reply joins it as a sibling of b
        let missing = threader.find_container("missing").unwrap();
        let x = threader.find_container("x").unwrap();
        assert_eq!(threader.arena().parent(x), Some(missing));
        assert_eq!(threader.thread_roots(), &[missing]);
    }

    #[test]
    fn test_only_root_level_considered() {
        let mut threader = Threader::new();
        threader.thread_all(vec![
            message("a", "Topic", &[]),
            message("b", "Hello", &["a"]),
            message("c", "Hello", &[]),
        ]);

        assert_eq!(group_by_subject(&mut threader), 0);
        assert_eq!(threader.thread_roots().len(), 2);
    }
}
