//! Segment trie used to answer "who matches this topic" without scanning every filter.

use std::collections::{HashMap, HashSet};

use crate::broker::topic::FilterSegment;
use crate::broker::types::ClientId;

#[derive(Default)]
pub(crate) struct Node {
    // Exact match children: "kitchen" -> Node
    children: HashMap<String, Node>,

    // '+' child: any single level
    plus_child: Option<Box<Node>>,

    // '#' child: this level and everything below
    hash_child: Option<Box<Node>>,

    // Clients whose filter ends exactly at this node
    subscribers: HashSet<ClientId>,
}

impl Node {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
            && self.children.is_empty()
            && self.plus_child.is_none()
            && self.hash_child.is_none()
    }

    pub(crate) fn insert(&mut self, pattern: &[FilterSegment], client: &ClientId) {
        let mut current = self;
        for part in pattern {
            current = match part {
                FilterSegment::MultiLevel => &mut **current.hash_child.get_or_insert_with(Default::default),
                FilterSegment::SingleLevel => &mut **current.plus_child.get_or_insert_with(Default::default),
                FilterSegment::Literal(name) => current.children.entry(name.clone()).or_default(),
            };
        }
        current.subscribers.insert(client.clone());
    }

    /// Removes `client` from the node at the end of `pattern` and prunes emptied branches.
    /// Returns true when this node itself became empty.
    pub(crate) fn remove(&mut self, pattern: &[FilterSegment], client: &ClientId) -> bool {
        let Some((head, tail)) = pattern.split_first() else {
            self.subscribers.remove(client);
            return self.is_empty();
        };

        match head {
            FilterSegment::MultiLevel => {
                if let Some(hash_node) = self.hash_child.as_mut() {
                    if hash_node.remove(tail, client) {
                        self.hash_child = None;
                    }
                }
            }
            FilterSegment::SingleLevel => {
                if let Some(plus_node) = self.plus_child.as_mut() {
                    if plus_node.remove(tail, client) {
                        self.plus_child = None;
                    }
                }
            }
            FilterSegment::Literal(name) => {
                if let Some(child) = self.children.get_mut(name) {
                    if child.remove(tail, client) {
                        self.children.remove(name);
                    }
                }
            }
        }

        self.is_empty()
    }

    pub(crate) fn collect_matches(&self, parts: &[String], results: &mut HashSet<ClientId>) {
        // '#' matches everything from here, including no remaining levels
        if let Some(hash_node) = &self.hash_child {
            results.extend(hash_node.subscribers.iter().cloned());
        }

        let Some((head, tail)) = parts.split_first() else {
            results.extend(self.subscribers.iter().cloned());
            return;
        };

        if let Some(child) = self.children.get(head) {
            child.collect_matches(tail, results);
        }

        if let Some(plus_node) = &self.plus_child {
            plus_node.collect_matches(tail, results);
        }
    }
}
