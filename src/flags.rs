use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Transient per-node scheduling state.
    ///
    /// All flags are cleared when the turn that set them completes, so a
    /// node entering a new turn always starts from an empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u16 {
        /// Node is currently in the topological queue.
        const QUEUED = 1 << 0;
        /// Node is in the subtree affected by this turn's inputs.
        const MARKED = 1 << 1;
        /// Node's last tick produced output.
        const CHANGED = 1 << 2;
        /// A dynamic edge was attached above this node mid-turn; its level
        /// must be reconsidered before it ticks.
        const DEFERRED = 1 << 3;
        /// A dynamic re-parent requires this node to run again this turn.
        const REPEATED = 1 << 4;
        /// Node is a seed for this turn's subtree marking.
        const INITIAL = 1 << 5;
        /// Node is a marking root.
        const ROOT = 1 << 6;
    }
}

/// Atomic storage for [`NodeFlags`].
///
/// Parallel ticks test and set flags on nodes they schedule, so the bits
/// live in a single atomic word rather than behind a lock.
#[derive(Debug, Default)]
pub(crate) struct FlagCell(AtomicU16);

impl FlagCell {
    pub(crate) fn test(&self, flags: NodeFlags) -> bool {
        self.snapshot().contains(flags)
    }

    pub(crate) fn set(&self, flags: NodeFlags) {
        self.0.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    /// Set `flags` and return whether all of them were already set.
    pub(crate) fn test_and_set(&self, flags: NodeFlags) -> bool {
        let previous = self.0.fetch_or(flags.bits(), Ordering::Relaxed);
        NodeFlags::from_bits_retain(previous).contains(flags)
    }

    pub(crate) fn clear(&self, flags: NodeFlags) {
        self.0.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> NodeFlags {
        NodeFlags::from_bits_retain(self.0.load(Ordering::Relaxed))
    }
}
