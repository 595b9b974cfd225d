use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::{NodeBase, ReactiveNode, SubtreeEngine, Turn};

/// A signal: an opaque value holder in the dataflow graph.
///
/// Event nodes read the current value while they tick (synced operators
/// snapshot it, flatten nodes dereference it). A signal is also an input
/// node: [`set`](Self::set) stages a new value between turns and submitting
/// the signal with a turn commits it and seeds the signal's subtree.
pub struct SignalNode<V: Clone + Send + Sync + 'static> {
    base: NodeBase,
    engine: Arc<SubtreeEngine>,
    value: RwLock<V>,
    pending: Mutex<Option<V>>,
}

impl<V: Clone + Send + Sync + 'static> SignalNode<V> {
    /// Create a signal holding `initial`.
    pub fn new(engine: &Arc<SubtreeEngine>, initial: V) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(),
            engine: engine.clone(),
            value: RwLock::new(initial),
            pending: Mutex::new(None),
        });
        engine.on_node_create(&*node);
        node
    }

    /// Stage a new value, committed when this signal is next submitted as a
    /// turn input. Staging again before that overwrites the previous stage.
    pub fn set(&self, value: V) {
        *self.pending.lock() = Some(value);
    }

    /// Snapshot the current committed value.
    pub fn get(&self) -> V {
        self.value.read().clone()
    }
}

impl<V: Clone + Send + Sync + 'static> ReactiveNode for SignalNode<V> {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn tick(self: Arc<Self>, _turn: &Turn, _engine: &SubtreeEngine) {
        panic!("ticked an input node: {}", self.base.id());
    }

    fn node_type(&self) -> &'static str {
        "SignalNode"
    }

    fn dependency_count(&self) -> usize {
        0
    }

    fn is_input_node(&self) -> bool {
        true
    }

    fn apply_input(&self, _turn: &Turn) -> bool {
        match self.pending.lock().take() {
            Some(value) => {
                *self.value.write() = value;
                true
            }
            None => false,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Drop for SignalNode<V> {
    fn drop(&mut self) {
        self.engine.on_node_destroy(self.base.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TurnFlags, TurnId};

    #[test]
    fn set_stages_until_input_is_applied() {
        let engine = SubtreeEngine::new();
        let signal = SignalNode::new(&engine, 5);
        assert_eq!(signal.get(), 5);

        signal.set(8);
        assert_eq!(signal.get(), 5);

        let turn = Turn::new(TurnId::new(0), TurnFlags::empty());
        assert!(signal.apply_input(&turn));
        assert_eq!(signal.get(), 8);

        // Nothing staged, nothing changes.
        assert!(!signal.apply_input(&turn));
    }

    #[test]
    fn last_stage_wins() {
        let engine = SubtreeEngine::new();
        let signal = SignalNode::new(&engine, 0);
        signal.set(1);
        signal.set(2);
        let turn = Turn::new(TurnId::new(0), TurnFlags::empty());
        assert!(signal.apply_input(&turn));
        assert_eq!(signal.get(), 2);
    }
}
