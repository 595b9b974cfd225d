//! The reactive node base shared by every entity in the dataflow graph.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::flags::FlagCell;
use crate::{NodeFlags, SubtreeEngine, Turn};

/// Unique identifier for a node in the dataflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node id.
    pub fn fresh() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Shared handle to any reactive node, as seen by the engine.
pub type NodeRef = Arc<dyn ReactiveNode>;

/// A non-owning edge to a direct downstream node.
///
/// Successor edges never keep a node alive; ownership flows strictly
/// upstream (children hold their dependencies), which is what makes the
/// acyclic construction API sufficient to prevent reference cycles.
struct Successor {
    id: NodeId,
    node: Weak<dyn ReactiveNode>,
}

/// State embedded in every reactive node.
///
/// The scheduling fields are atomics: levels and wait counts are only
/// written by the engine between level batches, while ready counts and
/// flags are touched concurrently by parallel ticks. The successor list is
/// guarded by the node's shift lock, taken exclusively for topology edits
/// and shared for iteration.
pub struct NodeBase {
    id: NodeId,
    level: AtomicU32,
    new_level: AtomicU32,
    wait_count: AtomicU32,
    ready_count: AtomicU32,
    should_update: AtomicBool,
    flags: FlagCell,
    successors: RwLock<Vec<Successor>>,
}

impl NodeBase {
    /// Create the base state for a new node at level 0.
    pub fn new() -> Self {
        Self {
            id: NodeId::fresh(),
            level: AtomicU32::new(0),
            new_level: AtomicU32::new(0),
            wait_count: AtomicU32::new(0),
            ready_count: AtomicU32::new(0),
            should_update: AtomicBool::new(false),
            flags: FlagCell::default(),
            successors: RwLock::new(Vec::new()),
        }
    }

    /// The node's stable identity.
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's topological level, strictly greater than the level of any
    /// current predecessor.
    #[inline]
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Relaxed)
    }

    pub(crate) fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::Relaxed);
    }

    /// Scratch level written when a dynamic attach pushes this node above a
    /// predecessor; reconciled into [`level`](Self::level) by the engine.
    #[inline]
    pub fn new_level(&self) -> u32 {
        self.new_level.load(Ordering::Relaxed)
    }

    pub(crate) fn set_new_level(&self, level: u32) {
        self.new_level.store(level, Ordering::Relaxed);
    }

    /// Number of marked predecessors this node waits for in the current turn.
    #[inline]
    pub fn wait_count(&self) -> u32 {
        self.wait_count.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_wait(&self) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_wait(&self) {
        self.wait_count.store(0, Ordering::Relaxed);
    }

    /// Number of marked predecessors that have completed so far this turn.
    #[inline]
    pub fn ready_count(&self) -> u32 {
        self.ready_count.load(Ordering::Relaxed)
    }

    /// Record one more completed predecessor and return the new count.
    pub(crate) fn inc_ready(&self) -> u32 {
        self.ready_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn set_ready(&self, count: u32) {
        self.ready_count.store(count, Ordering::Relaxed);
    }

    /// Whether any predecessor pulsed this turn, i.e. the node must
    /// actually recompute rather than forward idleness.
    #[inline]
    pub fn should_update(&self) -> bool {
        self.should_update.load(Ordering::Relaxed)
    }

    pub(crate) fn set_should_update(&self, value: bool) {
        self.should_update.store(value, Ordering::Relaxed);
    }

    /// Snapshot of the node's transient scheduling flags.
    #[inline]
    pub fn flags(&self) -> NodeFlags {
        self.flags.snapshot()
    }

    pub(crate) fn set_flags(&self, flags: NodeFlags) {
        self.flags.set(flags);
    }

    /// Set `flags`, returning whether all of them were already set.
    pub(crate) fn test_and_set_flags(&self, flags: NodeFlags) -> bool {
        self.flags.test_and_set(flags)
    }

    pub(crate) fn clear_flags(&self, flags: NodeFlags) {
        self.flags.clear(flags);
    }

    pub(crate) fn test_flags(&self, flags: NodeFlags) -> bool {
        self.flags.test(flags)
    }

    /// Number of direct downstream nodes.
    pub fn successor_count(&self) -> usize {
        self.successors.read().len()
    }

    pub(crate) fn add_successor(&self, id: NodeId, node: Weak<dyn ReactiveNode>) {
        self.successors.write().push(Successor { id, node });
    }

    pub(crate) fn remove_successor(&self, id: NodeId) {
        self.successors.write().retain(|s| s.id != id);
    }

    /// Collect the live successors under the shared shift lock.
    ///
    /// Dropped nodes whose weak edges have not been detached yet are
    /// silently skipped; the engine tolerates destruction of a node whose
    /// predecessors are still alive.
    pub(crate) fn successors(&self) -> Vec<NodeRef> {
        self.successors
            .read()
            .iter()
            .filter_map(|s| s.node.upgrade())
            .collect()
    }
}

impl Default for NodeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NodeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBase")
            .field("id", &self.id)
            .field("level", &self.level())
            .field("wait_count", &self.wait_count())
            .field("ready_count", &self.ready_count())
            .field("flags", &self.flags())
            .finish()
    }
}

/// A node in the dataflow graph, as driven by the engine.
///
/// Concrete node types embed a [`NodeBase`] and implement their evaluation
/// in [`tick`](Self::tick). A tick must finish by reporting either a pulse
/// ([`SubtreeEngine::on_node_pulse`]) or an idle pulse
/// ([`SubtreeEngine::on_node_idle_pulse`]) exactly once, with one
/// exception: a dynamic node that requests re-parenting returns without
/// reporting and is run again by the engine after the topology edit has
/// been applied.
pub trait ReactiveNode: Send + Sync + 'static {
    /// The scheduling state embedded in this node.
    fn base(&self) -> &NodeBase;

    /// Compute this turn's output.
    ///
    /// Never called on input nodes; calling it on one is a contract
    /// violation and aborts.
    fn tick(self: Arc<Self>, turn: &Turn, engine: &SubtreeEngine);

    /// Debug label for this node's concrete type.
    fn node_type(&self) -> &'static str;

    /// Number of dependencies this node is attached to.
    fn dependency_count(&self) -> usize;

    /// Whether this node receives external input between turns.
    fn is_input_node(&self) -> bool {
        false
    }

    /// Whether this node may re-target its dependencies mid-turn.
    fn is_dynamic_node(&self) -> bool {
        false
    }

    /// Input nodes only: commit buffered external input, returning whether
    /// it constitutes a change.
    fn apply_input(&self, turn: &Turn) -> bool {
        let _ = turn;
        false
    }

    /// Drop partially written output after a failed tick.
    fn discard_buffer(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        assert_ne!(NodeId::fresh(), NodeId::fresh());
    }

    #[test]
    fn base_starts_at_level_zero_with_clean_flags() {
        let base = NodeBase::new();
        assert_eq!(base.level(), 0);
        assert_eq!(base.wait_count(), 0);
        assert_eq!(base.ready_count(), 0);
        assert!(base.flags().is_empty());
        assert!(!base.should_update());
    }

    #[test]
    fn ready_count_increments() {
        let base = NodeBase::new();
        assert_eq!(base.inc_ready(), 1);
        assert_eq!(base.inc_ready(), 2);
        assert_eq!(base.ready_count(), 2);
    }
}
