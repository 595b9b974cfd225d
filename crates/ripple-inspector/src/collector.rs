//! Collecting observer for testing and debugging.

use std::sync::Arc;

use parking_lot::Mutex;
use ripple::{NodeId, PropagationObserver, TurnId};

use crate::events::{PropagationEvent, TurnTrace};

/// Observer that accumulates every engine report for later inspection.
///
/// Cloning is cheap and all clones share the same buffer, so a clone can
/// be handed to the engine while the original stays behind for assertions.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<PropagationEvent>>>,
}

impl EventCollector {
    /// Create a new empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the collected events as a trace.
    pub fn trace(&self) -> TurnTrace {
        TurnTrace {
            events: self.events.lock().clone(),
        }
    }

    /// Get the collected events as a vector.
    pub fn events(&self) -> Vec<PropagationEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take the collected events, clearing the collector.
    pub fn take(&self) -> Vec<PropagationEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn emit(&self, event: PropagationEvent) {
        self.events.lock().push(event);
    }
}

impl PropagationObserver for EventCollector {
    fn on_turn_begin(&self, turn: TurnId) {
        self.emit(PropagationEvent::TurnBegin { turn });
    }

    fn on_turn_end(&self, turn: TurnId) {
        self.emit(PropagationEvent::TurnEnd { turn });
    }

    fn on_node_evaluate_begin(&self, node: NodeId, turn: TurnId) {
        self.emit(PropagationEvent::EvaluateBegin { node, turn });
    }

    fn on_node_evaluate_end(&self, node: NodeId, turn: TurnId) {
        self.emit(PropagationEvent::EvaluateEnd { node, turn });
    }

    fn on_node_pulse(&self, node: NodeId, turn: TurnId) {
        self.emit(PropagationEvent::Pulse { node, turn });
    }

    fn on_node_idle_pulse(&self, node: NodeId, turn: TurnId) {
        self.emit(PropagationEvent::IdlePulse { node, turn });
    }

    fn on_dynamic_attach(&self, node: NodeId, parent: NodeId, turn: TurnId) {
        self.emit(PropagationEvent::DynamicAttach { node, parent, turn });
    }

    fn on_dynamic_detach(&self, node: NodeId, parent: NodeId, turn: TurnId) {
        self.emit(PropagationEvent::DynamicDetach { node, parent, turn });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_accumulates_and_clears() {
        let collector = EventCollector::new();
        assert!(collector.is_empty());

        collector.on_turn_begin(TurnId(1));
        collector.on_turn_end(TurnId(1));
        assert_eq!(collector.len(), 2);

        let events = collector.take();
        assert_eq!(events.len(), 2);
        assert!(collector.is_empty());
    }

    #[test]
    fn clones_share_the_buffer() {
        let collector = EventCollector::new();
        let clone = collector.clone();
        clone.on_turn_begin(TurnId(3));
        assert_eq!(collector.len(), 1);
    }
}
