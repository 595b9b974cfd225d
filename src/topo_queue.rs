//! Topological scheduling queue.
//!
//! A priority queue keyed by node level. Extraction is batched: one fetch
//! drains every node currently at the minimum level, which is what lets
//! the engine fan a whole level out to the worker pool at once. Nodes at
//! the same level can never depend on each other, because a node's level
//! is strictly greater than any predecessor's.

use crate::{NodeFlags, NodeRef};

struct Entry {
    level: u32,
    node: NodeRef,
}

/// Level-ordered queue of nodes awaiting their tick.
///
/// Pushing is idempotent per turn: the node's `queued` flag dedupes, so a
/// node scheduled from several predecessors is enqueued once. No ordering
/// is promised among nodes within a level tier.
#[derive(Default)]
pub struct TopoQueue {
    entries: Vec<Entry>,
}

impl TopoQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a node at its current level, unless it is already queued.
    pub fn push(&mut self, node: NodeRef) {
        let base = node.base();
        if base.test_and_set_flags(NodeFlags::QUEUED) {
            return;
        }
        self.entries.push(Entry {
            level: base.level(),
            node,
        });
    }

    /// Remove and return all nodes at the current minimum level, clearing
    /// their `queued` flag. Returns an empty batch if the queue is empty.
    pub fn fetch_next(&mut self) -> Vec<NodeRef> {
        let Some(min) = self.entries.iter().map(|e| e.level).min() else {
            return Vec::new();
        };
        let mut batch = Vec::new();
        self.entries.retain(|e| {
            if e.level == min {
                batch.push(e.node.clone());
                false
            } else {
                true
            }
        });
        for node in &batch {
            node.base().clear_flags(NodeFlags::QUEUED);
        }
        batch
    }

    /// Returns true if no node is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.node.base().clear_flags(NodeFlags::QUEUED);
        }
    }
}
