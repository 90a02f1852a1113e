use std::collections::BTreeMap;

use crate::entry::Entry;
use crate::event::ArchiveEvent;

pub type NodeId = usize;

#[derive(Debug)]
struct Node {
    entry: Entry,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
}

/// Hierarchy of entries built incrementally from list events.
///
/// Ancestors missing from the listing are created as plain directory
/// entries. Nodes live in an arena; removed slots are left empty.
#[derive(Debug, Default)]
pub struct EntryTree {
    nodes: Vec<Option<Node>>,
    roots: BTreeMap<String, NodeId>,
    len: usize,
    // Consecutive entries usually share a parent directory.
    last_parent: Option<(String, NodeId)>,
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

impl EntryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop everything, including the lookup cache.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.len = 0;
        self.last_parent = None;
    }

    /// Apply an `Entry` or `EntryRemoved` event. Returns whether the tree
    /// changed.
    pub fn apply(&mut self, event: &ArchiveEvent) -> bool {
        match event {
            ArchiveEvent::Entry(entry) => {
                self.append(entry.clone());
                true
            }
            ArchiveEvent::EntryRemoved(path) => self.remove(path).is_some(),
            _ => false,
        }
    }

    /// Insert or update an entry.
    pub fn append(&mut self, entry: Entry) -> NodeId {
        let entry = entry.normalized();
        let parent = self.ensure_parent(entry.parent_path());
        let name = entry.name().to_string();

        let existing = match parent {
            Some(parent) => self.node(parent).and_then(|node| node.children.get(&name).copied()),
            None => self.roots.get(&name).copied(),
        };
        if let Some(id) = existing {
            if let Some(node) = self.nodes[id].as_mut() {
                node.entry = entry;
            }
            return id;
        }

        let id = self.nodes.len();
        self.nodes.push(Some(Node {
            entry,
            parent,
            children: BTreeMap::new(),
        }));
        self.len += 1;
        match parent.and_then(|parent| self.nodes[parent].as_mut()) {
            Some(node) => {
                node.children.insert(name, id);
            }
            None => {
                self.roots.insert(name, id);
            }
        }
        id
    }

    fn ensure_parent(&mut self, parent_path: &str) -> Option<NodeId> {
        if parent_path.is_empty() {
            return None;
        }
        if let Some((path, id)) = &self.last_parent {
            if path == parent_path && self.node(*id).is_some() {
                return Some(*id);
            }
        }

        let mut current: Option<NodeId> = None;
        let mut prefix = String::new();
        for part in components(parent_path) {
            prefix.push_str(part);
            prefix.push('/');
            let found = match current {
                Some(id) => self.node(id).and_then(|node| node.children.get(part).copied()),
                None => self.roots.get(part).copied(),
            };
            current = Some(match found {
                Some(id) => id,
                None => self.append(Entry::directory(prefix.clone())),
            });
        }
        if let Some(id) = current {
            self.last_parent = Some((parent_path.to_string(), id));
        }
        current
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    fn lookup(&self, path: &str) -> Option<NodeId> {
        let mut current: Option<NodeId> = None;
        for part in components(path) {
            current = Some(match current {
                Some(id) => *self.node(id)?.children.get(part)?,
                None => *self.roots.get(part)?,
            });
        }
        current
    }

    pub fn find(&self, path: &str) -> Option<&Entry> {
        self.lookup(path).and_then(|id| self.get(id))
    }

    pub fn get(&self, id: NodeId) -> Option<&Entry> {
        self.node(id).map(|node| &node.entry)
    }

    pub fn top_level(&self) -> Vec<&Entry> {
        self.roots.values().filter_map(|&id| self.get(id)).collect()
    }

    pub fn children(&self, path: &str) -> Vec<&Entry> {
        let children = match self.lookup(path).and_then(|id| self.node(id)) {
            Some(node) => &node.children,
            None if components(path).next().is_none() => &self.roots,
            None => return Vec::new(),
        };
        children.values().filter_map(|&id| self.get(id)).collect()
    }

    /// Remove an entry and everything below it.
    pub fn remove(&mut self, path: &str) -> Option<Entry> {
        let id = self.lookup(path)?;
        let node = self.nodes[id].take()?;
        self.len -= 1;
        self.last_parent = None;

        let name = node.entry.name().to_string();
        match node.parent.and_then(|parent| self.nodes[parent].as_mut()) {
            Some(parent) => {
                parent.children.remove(&name);
            }
            None => {
                self.roots.remove(&name);
            }
        }

        let mut stack: Vec<NodeId> = node.children.values().copied().collect();
        while let Some(child) = stack.pop() {
            if let Some(removed) = self.nodes[child].take() {
                self.len -= 1;
                stack.extend(removed.children.values().copied());
            }
        }
        Some(node.entry)
    }

    /// All entries, depth first in name order.
    pub fn entries(&self) -> Vec<&Entry> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack: Vec<NodeId> = self.roots.values().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                out.push(&node.entry);
                stack.extend(node.children.values().rev().copied());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(entries: Vec<&Entry>) -> Vec<&str> {
        entries.into_iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn builds_missing_ancestors() {
        let mut tree = EntryTree::new();
        tree.append(Entry::file("a/b/c.txt", 3));
        tree.append(Entry::file("a/d.txt", 1));

        assert_eq!(tree.len(), 4);
        assert!(tree.find("a/").unwrap().is_dir);
        assert!(tree.find("a/b").unwrap().is_dir);
        assert_eq!(paths(tree.entries()), vec!["a/", "a/b/", "a/b/c.txt", "a/d.txt"]);
        assert_eq!(paths(tree.children("a/")), vec!["a/b/", "a/d.txt"]);
        assert_eq!(paths(tree.children("")), vec!["a/"]);
    }

    #[test]
    fn listed_directory_replaces_implied_one() {
        let mut tree = EntryTree::new();
        tree.append(Entry::file("docs/readme", 5));
        let mut docs = Entry::directory("docs");
        docs.permissions = Some("drwxr-x---".into());
        tree.append(docs);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.find("docs/").unwrap().permissions.as_deref(), Some("drwxr-x---"));
    }

    #[test]
    fn remove_drops_subtree_and_invalidates_cache() {
        let mut tree = EntryTree::new();
        tree.append(Entry::file("a/x", 1));
        tree.append(Entry::file("a/y", 1));
        tree.append(Entry::file("b", 1));

        let removed = tree.remove("a/").unwrap();
        assert_eq!(removed.path, "a/");
        assert_eq!(tree.len(), 1);
        assert!(tree.find("a/x").is_none());

        tree.append(Entry::file("a/z", 1));
        assert_eq!(paths(tree.entries()), vec!["a/", "a/z", "b"]);
    }

    #[test]
    fn applies_events_and_resets() {
        let mut tree = EntryTree::new();
        assert!(tree.apply(&ArchiveEvent::Entry(Entry::file("f", 1))));
        assert!(!tree.apply(&ArchiveEvent::Progress(0.5)));
        assert!(tree.apply(&ArchiveEvent::EntryRemoved("f".into())));
        assert!(!tree.apply(&ArchiveEvent::EntryRemoved("f".into())));

        tree.append(Entry::file("x/y", 1));
        tree.reset();
        assert!(tree.is_empty());
        tree.append(Entry::file("x/z", 1));
        assert_eq!(tree.top_level().len(), 1);
        assert_eq!(tree.len(), 2);
    }
}
