//! Error types for turn propagation.

use thiserror::Error;

use crate::NodeId;

/// System-level propagation errors.
///
/// These are distinct from user domain values flowing through event
/// streams. A failing user function aborts the whole turn; the engine
/// unwinds, clears all transient per-node state, and surfaces the
/// originating failure to the caller that submitted the turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropagationError {
    /// A node's user-supplied function failed while the node was ticking.
    ///
    /// Events the node emitted before the failure are discarded; the turn
    /// does not schedule any further work.
    #[error("{node_type} {node} failed during tick: {message}")]
    TickFailed {
        /// Identity of the failing node.
        node: NodeId,
        /// Debug label of the failing node.
        node_type: &'static str,
        /// Panic payload rendered as text.
        message: String,
    },
}
