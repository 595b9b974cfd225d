//! Observer trait for watching turn propagation.
//!
//! The engine reports node evaluation, pulses, and dynamic topology edits
//! to a [`PropagationObserver`]. All methods have empty default bodies, so
//! an implementation only overrides the events it cares about; the default
//! [`NoopObserver`] keeps everything at zero cost.

use crate::{NodeId, TurnId};

/// Observer of engine activity.
///
/// Implementations must be `Send + Sync`: evaluate and pulse callbacks are
/// invoked from worker threads while a level batch runs in parallel.
pub trait PropagationObserver: Send + Sync + 'static {
    /// Called when the engine starts driving a turn.
    #[inline]
    fn on_turn_begin(&self, _turn: TurnId) {}

    /// Called when a turn has completed, whether it succeeded or aborted.
    #[inline]
    fn on_turn_end(&self, _turn: TurnId) {}

    /// Called when a node starts evaluating.
    #[inline]
    fn on_node_evaluate_begin(&self, _node: NodeId, _turn: TurnId) {}

    /// Called when a node finishes evaluating.
    #[inline]
    fn on_node_evaluate_end(&self, _node: NodeId, _turn: TurnId) {}

    /// Called when a node publishes output this turn.
    #[inline]
    fn on_node_pulse(&self, _node: NodeId, _turn: TurnId) {}

    /// Called when a node completes without output this turn.
    #[inline]
    fn on_node_idle_pulse(&self, _node: NodeId, _turn: TurnId) {}

    /// Called when a dynamic node requests an attach to a new parent.
    #[inline]
    fn on_dynamic_attach(&self, _node: NodeId, _parent: NodeId, _turn: TurnId) {}

    /// Called when a dynamic node requests a detach from its old parent.
    #[inline]
    fn on_dynamic_detach(&self, _node: NodeId, _parent: NodeId, _turn: TurnId) {}
}

/// Observer that discards every event.
///
/// This is the default observer of
/// [`SubtreeEngine`](crate::SubtreeEngine).
pub struct NoopObserver;

impl PropagationObserver for NoopObserver {}
