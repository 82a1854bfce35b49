//! Reply threads as an arena: rows indexed by id, linked by parent-id
//! pointers. No row holds a reference to another.

use std::collections::{HashMap, HashSet};

use crate::models::MessageRow;
use crate::{Result, StoreError};

/// How deep "all replies" looks below a message by default.
pub const DEFAULT_REPLY_DEPTH: usize = 3;

/// Hard cap on parent-pointer walks. Anything deeper is treated as corrupt.
pub const MAX_THREAD_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNode {
    pub message: MessageRow,
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    /// Number of messages in this subtree, including this one.
    pub fn message_count(&self) -> usize {
        1 + self.replies.iter().map(ThreadNode::message_count).sum::<usize>()
    }
}

#[derive(Debug, Default)]
pub struct ThreadArena {
    nodes: HashMap<String, MessageRow>,
    children: HashMap<String, Vec<String>>,
}

impl ThreadArena {
    pub fn from_rows(rows: Vec<MessageRow>) -> Self {
        let mut rows = rows;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut arena = ThreadArena::default();
        for row in rows {
            if let Some(parent) = &row.parent_id {
                arena.children.entry(parent.clone()).or_default().push(row.id.clone());
            }
            arena.nodes.insert(row.id.clone(), row);
        }
        arena
    }

    pub fn get(&self, id: &str) -> Option<&MessageRow> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk parent pointers from `id` to the topmost message held in the arena.
    pub fn root_of(&self, id: &str) -> Result<&MessageRow> {
        let mut current = self.get(id).ok_or_else(|| StoreError::not_found("message", id))?;
        let mut visited: HashSet<&str> = HashSet::from([current.id.as_str()]);

        while let Some(parent) = current.parent_id.as_deref().and_then(|p| self.get(p)) {
            if !visited.insert(parent.id.as_str()) || visited.len() > MAX_THREAD_DEPTH {
                return Err(StoreError::Corrupt(format!(
                    "reply chain of message {} loops back on itself",
                    id
                )));
            }
            current = parent;
        }
        Ok(current)
    }

    /// Descendants of `id` at most `max_depth` levels below it, depth-first
    /// in creation order. The message itself is not included.
    pub fn descendants<'a>(&'a self, id: &'a str, max_depth: usize) -> Vec<&'a MessageRow> {
        let mut out = Vec::new();
        let mut visited: HashSet<&str> = HashSet::from([id]);
        self.collect(id, 1, max_depth, &mut visited, &mut out);
        out
    }

    fn collect<'a>(
        &'a self,
        id: &str,
        depth: usize,
        max_depth: usize,
        visited: &mut HashSet<&'a str>,
        out: &mut Vec<&'a MessageRow>,
    ) {
        if depth > max_depth {
            return;
        }
        for child_id in self.children.get(id).into_iter().flatten() {
            if !visited.insert(child_id.as_str()) {
                continue;
            }
            if let Some(child) = self.nodes.get(child_id) {
                out.push(child);
                self.collect(child_id, depth + 1, max_depth, visited, out);
            }
        }
    }

    /// Owned reply tree rooted at `id`, limited to `max_depth` levels of replies.
    pub fn tree(&self, id: &str, max_depth: usize) -> Option<ThreadNode> {
        let mut visited = HashSet::new();
        self.build(id, 0, max_depth, &mut visited)
    }

    fn build<'a>(
        &'a self,
        id: &'a str,
        depth: usize,
        max_depth: usize,
        visited: &mut HashSet<&'a str>,
    ) -> Option<ThreadNode> {
        if !visited.insert(id) {
            return None;
        }
        let message = self.nodes.get(id)?.clone();
        let replies = if depth < max_depth {
            self.children
                .get(id)
                .into_iter()
                .flatten()
                .filter_map(|child| self.build(child, depth + 1, max_depth, visited))
                .collect()
        } else {
            Vec::new()
        };
        Some(ThreadNode { message, replies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, parent: Option<&str>, level: i64, at: &str) -> MessageRow {
        MessageRow {
            id: id.into(),
            sender_id: "a".into(),
            sender_username: "alice".into(),
            receiver_id: "b".into(),
            receiver_username: "bob".into(),
            content: id.into(),
            created_at: at.into(),
            edited: false,
            edited_at: None,
            parent_id: parent.map(Into::into),
            thread_level: level,
            reply_count: 0,
        }
    }

    fn chain(depth: usize) -> ThreadArena {
        let mut rows = vec![row("m0", None, 0, "t00")];
        for i in 1..=depth {
            let parent = format!("m{}", i - 1);
            rows.push(row(
                &format!("m{}", i),
                Some(parent.as_str()),
                i as i64,
                &format!("t{:02}", i),
            ));
        }
        ThreadArena::from_rows(rows)
    }

    #[test]
    fn root_of_walks_to_top() {
        let arena = chain(5);
        assert_eq!(arena.root_of("m5").unwrap().id, "m0");
        assert_eq!(arena.root_of("m0").unwrap().id, "m0");
    }

    #[test]
    fn root_of_detects_cycles() {
        let arena = ThreadArena::from_rows(vec![
            row("x", Some("y"), 1, "t1"),
            row("y", Some("x"), 1, "t2"),
        ]);
        assert!(matches!(arena.root_of("x"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn descendants_stop_at_depth() {
        let arena = chain(5);
        let ids: Vec<_> = arena
            .descendants("m0", DEFAULT_REPLY_DEPTH)
            .into_iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
    }

    #[test]
    fn descendants_are_depth_first_in_creation_order() {
        let arena = ThreadArena::from_rows(vec![
            row("root", None, 0, "t0"),
            row("b", Some("root"), 1, "t2"),
            row("a", Some("root"), 1, "t1"),
            row("a1", Some("a"), 2, "t3"),
        ]);
        let ids: Vec<_> = arena.descendants("root", 3).into_iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "a1", "b"]);
    }

    #[test]
    fn tree_is_bounded() {
        let arena = chain(5);
        let tree = arena.tree("m0", 2).unwrap();
        assert_eq!(tree.message_count(), 3);
        assert_eq!(tree.replies[0].replies[0].message.id, "m2");
        assert!(tree.replies[0].replies[0].replies.is_empty());
    }
}
