//! Least-recently-used ordering over URL keys.
//!
//! The list links nodes by key rather than by reference, so the whole
//! structure is a flat, JSON-serializable state object. That state is what
//! gets persisted after cache-mutating operations; a snapshot may trail the
//! in-memory list, but it is always internally consistent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serializable LRU state: a doubly-linked list stored as a flat map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LruState {
    pub head: Option<String>,
    pub tail: Option<String>,
    pub map: HashMap<String, LruNode>,
    pub count: u32,
}

/// Per-URL links. `prev` is toward the head (more recently used).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LruNode {
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// LRU list over string keys.
#[derive(Debug, Default)]
pub struct LruList {
    state: LruState,
}

impl LruList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate from a persisted state snapshot.
    pub fn from_state(state: LruState) -> Self {
        Self { state }
    }

    /// The serializable state, for persistence.
    pub fn state(&self) -> &LruState {
        &self.state
    }

    /// Number of entries.
    pub fn size(&self) -> u32 {
        self.state.count
    }

    /// Mark a URL as most recently used, inserting it if new.
    pub fn accessed(&mut self, url: &str) {
        if self.state.head.as_deref() == Some(url) {
            return;
        }
        self.remove(url);

        let old_head = self.state.head.take();
        self.state.map.insert(
            url.to_string(),
            LruNode {
                prev: None,
                next: old_head.clone(),
            },
        );
        if let Some(old_head) = old_head {
            if let Some(node) = self.state.map.get_mut(&old_head) {
                node.prev = Some(url.to_string());
            }
        } else {
            self.state.tail = Some(url.to_string());
        }
        self.state.head = Some(url.to_string());
        self.state.count += 1;
    }

    /// Remove and return the least recently used URL.
    pub fn pop(&mut self) -> Option<String> {
        let tail = self.state.tail.clone()?;
        self.remove(&tail);
        Some(tail)
    }

    /// Unlink a URL. Returns whether it was present.
    pub fn remove(&mut self, url: &str) -> bool {
        let Some(node) = self.state.map.remove(url) else {
            return false;
        };

        match &node.prev {
            Some(prev) => {
                if let Some(prev_node) = self.state.map.get_mut(prev) {
                    prev_node.next = node.next.clone();
                }
            }
            None => self.state.head = node.next.clone(),
        }
        match &node.next {
            Some(next) => {
                if let Some(next_node) = self.state.map.get_mut(next) {
                    next_node.prev = node.prev.clone();
                }
            }
            None => self.state.tail = node.prev.clone(),
        }
        self.state.count -= 1;
        true
    }
}
