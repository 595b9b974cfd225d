#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use ripple::{NodeId, PropagationObserver, TurnId};

#[derive(Default)]
pub struct Recorded {
    pub evaluates: Vec<(NodeId, TurnId)>,
    pub pulses: Vec<(NodeId, TurnId)>,
    pub idle_pulses: Vec<(NodeId, TurnId)>,
    pub attaches: Vec<(NodeId, NodeId, TurnId)>,
    pub detaches: Vec<(NodeId, NodeId, TurnId)>,
}

/// Test observer counting evaluations, pulses, and dynamic edges.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingObserver {
    pub fn evaluate_count(&self, node: NodeId) -> usize {
        self.inner.lock().evaluates.iter().filter(|(n, _)| *n == node).count()
    }

    pub fn pulse_count(&self, node: NodeId) -> usize {
        self.inner.lock().pulses.iter().filter(|(n, _)| *n == node).count()
    }

    pub fn idle_pulse_count(&self, node: NodeId) -> usize {
        self.inner.lock().idle_pulses.iter().filter(|(n, _)| *n == node).count()
    }

    pub fn attaches(&self) -> Vec<(NodeId, NodeId, TurnId)> {
        self.inner.lock().attaches.clone()
    }

    pub fn detaches(&self) -> Vec<(NodeId, NodeId, TurnId)> {
        self.inner.lock().detaches.clone()
    }
}

impl PropagationObserver for RecordingObserver {
    fn on_node_evaluate_begin(&self, node: NodeId, turn: TurnId) {
        self.inner.lock().evaluates.push((node, turn));
    }

    fn on_node_pulse(&self, node: NodeId, turn: TurnId) {
        self.inner.lock().pulses.push((node, turn));
    }

    fn on_node_idle_pulse(&self, node: NodeId, turn: TurnId) {
        self.inner.lock().idle_pulses.push((node, turn));
    }

    fn on_dynamic_attach(&self, node: NodeId, parent: NodeId, turn: TurnId) {
        self.inner.lock().attaches.push((node, parent, turn));
    }

    fn on_dynamic_detach(&self, node: NodeId, parent: NodeId, turn: TurnId) {
        self.inner.lock().detaches.push((node, parent, turn));
    }
}
