use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    EventBuffer, EventStream, NodeBase, NodeRef, ReactiveNode, SignalNode, StreamRef,
    SubtreeEngine, Turn,
};

/// A dynamic node forwarding the events of whatever stream its outer
/// signal currently references.
///
/// When a tick finds that the outer signal points at a different inner
/// node, the flatten requests a dynamic detach from the old inner and an
/// attach to the new one instead of producing output; the engine applies
/// the edit after the running level batch and schedules the flatten again
/// (its `repeated` run), which then forwards the new inner's events.
pub struct EventFlattenNode<E: Clone + Send + Sync + 'static> {
    base: NodeBase,
    engine: Arc<SubtreeEngine>,
    buffer: EventBuffer<E>,
    outer: Arc<SignalNode<StreamRef<E>>>,
    inner: Mutex<StreamRef<E>>,
}

impl<E: Clone + Send + Sync + 'static> EventFlattenNode<E> {
    /// Create a flatten over `outer`, initially attached to the stream the
    /// signal currently references.
    pub fn new(engine: &Arc<SubtreeEngine>, outer: &Arc<SignalNode<StreamRef<E>>>) -> Arc<Self> {
        let inner = outer.get();
        let node = Arc::new(Self {
            base: NodeBase::new(),
            engine: engine.clone(),
            buffer: EventBuffer::new(),
            outer: outer.clone(),
            inner: Mutex::new(inner.clone()),
        });
        engine.on_node_create(&*node);
        let this: NodeRef = node.clone();
        engine.on_node_attach(&this, &**outer);
        engine.on_node_attach(&this, &*inner);
        node
    }

    /// The stream this flatten currently forwards.
    pub fn inner(&self) -> StreamRef<E> {
        self.inner.lock().clone()
    }
}

impl<E: Clone + Send + Sync + 'static> ReactiveNode for EventFlattenNode<E> {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn tick(self: Arc<Self>, turn: &Turn, engine: &SubtreeEngine) {
        self.buffer.set_current_turn(turn, true, false);
        let current = self.inner.lock().clone();
        current.set_current_turn(turn, false, false);

        let new_inner = self.outer.get();
        if new_inner.base().id() != current.base().id() {
            new_inner.set_current_turn(turn, false, false);

            // Topology has changed; hand both edits to the engine and let
            // it run us again once they are applied.
            *self.inner.lock() = new_inner.clone();
            let this: NodeRef = self.clone();
            let old: NodeRef = current;
            let new: NodeRef = new_inner;
            engine.on_dynamic_node_detach(this.clone(), old, turn);
            engine.on_dynamic_node_attach(this, new, turn);
            return;
        }

        engine
            .observer()
            .on_node_evaluate_begin(self.base.id(), turn.id());
        let mut forwarded = Vec::new();
        current.for_each_event(&mut |event| forwarded.push(event.clone()));
        engine
            .observer()
            .on_node_evaluate_end(self.base.id(), turn.id());

        if forwarded.is_empty() {
            engine.on_node_idle_pulse(&*self, turn);
        } else {
            self.buffer.extend(forwarded);
            engine.on_node_pulse(&*self, turn);
        }
    }

    fn node_type(&self) -> &'static str {
        "EventFlattenNode"
    }

    fn dependency_count(&self) -> usize {
        2
    }

    fn is_dynamic_node(&self) -> bool {
        true
    }

    fn discard_buffer(&self) {
        self.buffer.clear();
    }
}

impl<E: Clone + Send + Sync + 'static> EventStream<E> for EventFlattenNode<E> {
    fn set_current_turn(&self, turn: &Turn, force_update: bool, no_clear: bool) {
        self.buffer.set_current_turn(turn, force_update, no_clear);
    }

    fn for_each_event(&self, f: &mut dyn FnMut(&E)) {
        self.buffer.for_each(f);
    }

    fn events(&self) -> Vec<E> {
        self.buffer.snapshot()
    }
}

impl<E: Clone + Send + Sync + 'static> Drop for EventFlattenNode<E> {
    fn drop(&mut self) {
        self.engine.on_node_detach(self.base.id(), &*self.outer);
        let inner = self.inner.lock().clone();
        self.engine.on_node_detach(self.base.id(), &*inner);
        self.engine.on_node_destroy(self.base.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventSourceNode;

    #[test]
    fn flatten_attaches_to_outer_and_initial_inner() {
        let engine = SubtreeEngine::new();
        let inner = EventSourceNode::<i32>::new(&engine);
        let stream: StreamRef<i32> = inner.clone();
        let outer = SignalNode::new(&engine, stream);
        let flatten = EventFlattenNode::new(&engine, &outer);

        assert!(flatten.is_dynamic_node());
        assert_eq!(flatten.dependency_count(), 2);
        assert_eq!(outer.base().successor_count(), 1);
        assert_eq!(inner.base().successor_count(), 1);
        assert_eq!(flatten.base().level(), 1);
        assert_eq!(flatten.inner().base().id(), inner.base().id());

        drop(flatten);
        assert_eq!(outer.base().successor_count(), 0);
        assert_eq!(inner.base().successor_count(), 0);
    }
}
