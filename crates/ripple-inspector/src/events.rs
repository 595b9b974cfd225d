//! Typed events describing engine activity during a turn.

use ripple::{NodeId, TurnId};
use serde::{Deserialize, Serialize};

/// One engine report, in the order the observer received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationEvent {
    /// The engine started driving a turn.
    TurnBegin {
        /// The turn being driven.
        turn: TurnId,
    },
    /// The turn completed, successfully or not.
    TurnEnd {
        /// The turn that completed.
        turn: TurnId,
    },
    /// A node started evaluating.
    EvaluateBegin {
        /// The evaluating node.
        node: NodeId,
        /// The turn it evaluates in.
        turn: TurnId,
    },
    /// A node finished evaluating.
    EvaluateEnd {
        /// The node that finished.
        node: NodeId,
        /// The turn it evaluated in.
        turn: TurnId,
    },
    /// A node published output.
    Pulse {
        /// The pulsing node.
        node: NodeId,
        /// The turn it pulsed in.
        turn: TurnId,
    },
    /// A node completed without output.
    IdlePulse {
        /// The idle node.
        node: NodeId,
        /// The turn it completed in.
        turn: TurnId,
    },
    /// A dynamic node attached to a new parent mid-turn.
    DynamicAttach {
        /// The re-parenting node.
        node: NodeId,
        /// Its new parent.
        parent: NodeId,
        /// The turn the edit happened in.
        turn: TurnId,
    },
    /// A dynamic node detached from its old parent mid-turn.
    DynamicDetach {
        /// The re-parenting node.
        node: NodeId,
        /// Its old parent.
        parent: NodeId,
        /// The turn the edit happened in.
        turn: TurnId,
    },
}

impl PropagationEvent {
    /// The turn this event belongs to.
    pub fn turn(&self) -> TurnId {
        match self {
            PropagationEvent::TurnBegin { turn }
            | PropagationEvent::TurnEnd { turn }
            | PropagationEvent::EvaluateBegin { turn, .. }
            | PropagationEvent::EvaluateEnd { turn, .. }
            | PropagationEvent::Pulse { turn, .. }
            | PropagationEvent::IdlePulse { turn, .. }
            | PropagationEvent::DynamicAttach { turn, .. }
            | PropagationEvent::DynamicDetach { turn, .. } => *turn,
        }
    }
}

/// An ordered record of everything the engine reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnTrace {
    /// The recorded events, oldest first.
    pub events: Vec<PropagationEvent>,
}

impl TurnTrace {
    /// Number of times `node` evaluated, across all recorded turns.
    ///
    /// A dynamic node's re-targeting pass is not an evaluation; only the
    /// run that actually collects output reports one.
    pub fn evaluate_count(&self, node: NodeId) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, PropagationEvent::EvaluateBegin { node: n, .. } if *n == node))
            .count()
    }

    /// Number of times `node` pulsed, across all recorded turns.
    pub fn pulse_count(&self, node: NodeId) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, PropagationEvent::Pulse { node: n, .. } if *n == node))
            .count()
    }

    /// Number of times `node` completed idle, across all recorded turns.
    pub fn idle_pulse_count(&self, node: NodeId) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, PropagationEvent::IdlePulse { node: n, .. } if *n == node))
            .count()
    }

    /// The `(node, parent)` pairs of dynamic attaches, in order.
    pub fn dynamic_attaches(&self) -> Vec<(NodeId, NodeId)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PropagationEvent::DynamicAttach { node, parent, .. } => Some((*node, *parent)),
                _ => None,
            })
            .collect()
    }

    /// The `(node, parent)` pairs of dynamic detaches, in order.
    pub fn dynamic_detaches(&self) -> Vec<(NodeId, NodeId)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PropagationEvent::DynamicDetach { node, parent, .. } => Some((*node, *parent)),
                _ => None,
            })
            .collect()
    }

    /// The events belonging to `turn`, in order.
    pub fn for_turn(&self, turn: TurnId) -> Vec<PropagationEvent> {
        self.events
            .iter()
            .filter(|e| e.turn() == turn)
            .cloned()
            .collect()
    }
}
