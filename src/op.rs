//! Event operators and the operator-carrying node.
//!
//! Operators are first-class values carried inside a single node rather
//! than one node per operation: composing a filter over a merge over two
//! sources yields one [`EventOp`] tree inside one [`EventOpNode`], and
//! collection recurses through the tree without materializing intermediate
//! buffers (operator fusion).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    EventBuffer, EventStream, NodeBase, NodeRef, ReactiveNode, SignalNode, StreamRef,
    SubtreeEngine, Turn,
};

/// Predicate applied to each event of a filter operator.
pub type FilterFn<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Description of an event operator node's computation.
///
/// A dependency is either a materialized upstream node ([`Source`]) or a
/// nested operator collected by direct recursion. Synced variants are
/// built with the [`synced_filter`](Self::synced_filter) and
/// [`synced_transform`](Self::synced_transform) constructors: their user
/// function snapshots the attached signals' values at evaluation time.
///
/// [`Source`]: EventOp::Source
pub enum EventOp<E> {
    /// Replay the current-turn events of an upstream node.
    Source(StreamRef<E>),
    /// Concatenation of any number of inputs, in order.
    Merge(Vec<EventOp<E>>),
    /// Keep only the events accepted by the predicate.
    Filter {
        /// The predicate; for synced filters it reads the attached signals.
        pred: FilterFn<E>,
        /// The fused input the predicate is applied to.
        input: Box<EventOp<E>>,
        /// Signal nodes this operator snapshots, attached as dependencies.
        signals: Vec<NodeRef>,
    },
    /// Apply a function to every event of an input, possibly changing the
    /// element type mid-chain.
    Transform(Box<dyn TransformCollect<E>>),
}

impl<E> EventOp<E> {
    /// Visit every node dependency of this operator tree, in order.
    pub fn visit_dependencies(&self, f: &mut dyn FnMut(&NodeRef)) {
        match self {
            EventOp::Source(dep) => {
                let node: NodeRef = dep.clone();
                f(&node);
            }
            EventOp::Merge(inputs) => {
                for input in inputs {
                    input.visit_dependencies(f);
                }
            }
            EventOp::Filter { input, signals, .. } => {
                input.visit_dependencies(f);
                for signal in signals {
                    f(signal);
                }
            }
            EventOp::Transform(inner) => inner.visit_dependencies(f),
        }
    }

    /// Number of node dependencies of this operator tree.
    pub fn dependency_count(&self) -> usize {
        let mut count = 0;
        self.visit_dependencies(&mut |_| count += 1);
        count
    }
}

impl<E: Clone + Send + Sync + 'static> EventOp<E> {
    /// Replay an upstream node's events.
    pub fn source(dep: StreamRef<E>) -> Self {
        EventOp::Source(dep)
    }

    /// Merge any number of inputs into one stream.
    pub fn merge(inputs: Vec<EventOp<E>>) -> Self {
        EventOp::Merge(inputs)
    }

    /// Keep the events of `input` accepted by `pred`.
    pub fn filter(input: EventOp<E>, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        EventOp::Filter {
            pred: Box::new(pred),
            input: Box::new(input),
            signals: Vec::new(),
        }
    }

    /// Keep the events of `input` accepted by `pred`, which also receives
    /// the value of `signal` as snapshotted at evaluation time.
    pub fn synced_filter<V: Clone + Send + Sync + 'static>(
        input: EventOp<E>,
        signal: &Arc<SignalNode<V>>,
        pred: impl Fn(&E, &V) -> bool + Send + Sync + 'static,
    ) -> Self {
        let dep = signal.clone();
        let node: NodeRef = signal.clone();
        EventOp::Filter {
            pred: Box::new(move |event| {
                let value = dep.get();
                pred(event, &value)
            }),
            input: Box::new(input),
            signals: vec![node],
        }
    }

    /// Apply `func` to every event of `input`.
    pub fn transform<I: Clone + Send + Sync + 'static>(
        input: EventOp<I>,
        func: impl Fn(&I) -> E + Send + Sync + 'static,
    ) -> Self {
        EventOp::Transform(Box::new(TransformOp {
            func: Box::new(func),
            input,
            signals: Vec::new(),
        }))
    }

    /// Apply `func` to every event of `input`, passing the value of
    /// `signal` as snapshotted at evaluation time.
    pub fn synced_transform<I, V>(
        input: EventOp<I>,
        signal: &Arc<SignalNode<V>>,
        func: impl Fn(&I, &V) -> E + Send + Sync + 'static,
    ) -> Self
    where
        I: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let dep = signal.clone();
        let node: NodeRef = signal.clone();
        EventOp::Transform(Box::new(TransformOp {
            func: Box::new(move |event: &I| {
                let value = dep.get();
                func(event, &value)
            }),
            input,
            signals: vec![node],
        }))
    }

    /// Collect this operator's output for `turn` into `emit`.
    ///
    /// Node dependencies are advanced to `turn` before they are read, so a
    /// dependency untouched this turn drops its stale events first.
    pub fn collect(&self, turn: &Turn, emit: &mut dyn FnMut(E)) {
        match self {
            EventOp::Source(dep) => {
                dep.set_current_turn(turn, false, false);
                dep.for_each_event(&mut |event| emit(event.clone()));
            }
            EventOp::Merge(inputs) => {
                for input in inputs {
                    input.collect(turn, emit);
                }
            }
            EventOp::Filter { pred, input, .. } => {
                input.collect(turn, &mut |event| {
                    if pred(&event) {
                        emit(event);
                    }
                });
            }
            EventOp::Transform(inner) => inner.collect(turn, emit),
        }
    }
}

/// A type-erased transforming input, so an operator chain can change its
/// element type without materializing a node at the seam.
pub trait TransformCollect<E>: Send + Sync {
    /// Collect the transformed output for `turn` into `emit`.
    fn collect(&self, turn: &Turn, emit: &mut dyn FnMut(E));

    /// Visit the node dependencies below the transform, in order.
    fn visit_dependencies(&self, f: &mut dyn FnMut(&NodeRef));
}

struct TransformOp<I, E> {
    func: Box<dyn Fn(&I) -> E + Send + Sync>,
    input: EventOp<I>,
    signals: Vec<NodeRef>,
}

impl<I, E> TransformCollect<E> for TransformOp<I, E>
where
    I: Clone + Send + Sync + 'static,
{
    fn collect(&self, turn: &Turn, emit: &mut dyn FnMut(E)) {
        self.input
            .collect(turn, &mut |event| emit((self.func)(&event)));
    }

    fn visit_dependencies(&self, f: &mut dyn FnMut(&NodeRef)) {
        self.input.visit_dependencies(f);
        for signal in &self.signals {
            f(signal);
        }
    }
}

/// An event node whose computation is described by an [`EventOp`].
///
/// The node holds strong references to each dependency through its
/// operator and participates in each dependency's successor list exactly
/// once for its lifetime.
pub struct EventOpNode<E: Clone + Send + Sync + 'static> {
    base: NodeBase,
    engine: Arc<SubtreeEngine>,
    buffer: EventBuffer<E>,
    op: Mutex<Option<EventOp<E>>>,
    dep_count: usize,
}

impl<E: Clone + Send + Sync + 'static> EventOpNode<E> {
    /// Create a node computing `op` and attach it to every dependency.
    pub fn new(engine: &Arc<SubtreeEngine>, op: EventOp<E>) -> Arc<Self> {
        let dep_count = op.dependency_count();
        let node = Arc::new(Self {
            base: NodeBase::new(),
            engine: engine.clone(),
            buffer: EventBuffer::new(),
            op: Mutex::new(Some(op)),
            dep_count,
        });
        engine.on_node_create(&*node);
        let this: NodeRef = node.clone();
        if let Some(op) = node.op.lock().as_ref() {
            op.visit_dependencies(&mut |dep| engine.on_node_attach(&this, &**dep));
        }
        node
    }

    /// Transfer the operator out of this node, detaching the node from
    /// every dependency in the same step.
    ///
    /// The returned operator can be embedded in a larger fused operator for
    /// a new node. Stealing twice, or ticking a node whose operator was
    /// stolen, is a contract violation and aborts.
    pub fn steal_op(&self) -> EventOp<E> {
        let mut slot = self.op.lock();
        let Some(op) = slot.take() else {
            panic!("operator already stolen from {}", self.base.id());
        };
        op.visit_dependencies(&mut |dep| self.engine.on_node_detach(self.base.id(), &**dep));
        op
    }
}

impl<E: Clone + Send + Sync + 'static> ReactiveNode for EventOpNode<E> {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn tick(self: Arc<Self>, turn: &Turn, engine: &SubtreeEngine) {
        self.buffer.set_current_turn(turn, true, false);

        engine
            .observer()
            .on_node_evaluate_begin(self.base.id(), turn.id());
        let mut collected = Vec::new();
        {
            let slot = self.op.lock();
            let Some(op) = slot.as_ref() else {
                panic!("ticked {} after its operator was stolen", self.base.id());
            };
            op.collect(turn, &mut |event| collected.push(event));
        }
        engine
            .observer()
            .on_node_evaluate_end(self.base.id(), turn.id());

        if collected.is_empty() {
            engine.on_node_idle_pulse(&*self, turn);
        } else {
            self.buffer.extend(collected);
            engine.on_node_pulse(&*self, turn);
        }
    }

    fn node_type(&self) -> &'static str {
        "EventOpNode"
    }

    fn dependency_count(&self) -> usize {
        self.dep_count
    }

    fn discard_buffer(&self) {
        self.buffer.clear();
    }
}

impl<E: Clone + Send + Sync + 'static> EventStream<E> for EventOpNode<E> {
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

impl<E: Clone + Send + Sync + 'static> Drop for EventOpNode<E> {
    fn drop(&mut self) {
        if let Some(op) = self.op.lock().as_ref() {
            op.visit_dependencies(&mut |dep| self.engine.on_node_detach(self.base.id(), &**dep));
        }
        self.engine.on_node_destroy(self.base.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventSourceNode, TurnFlags, TurnId};

    fn committed_source(engine: &Arc<SubtreeEngine>, events: &[i32], turn: &Turn) -> StreamRef<i32> {
        let source = EventSourceNode::new(engine);
        for &event in events {
            source.push(event);
        }
        assert!(source.apply_input(turn));
        source
    }

    #[test]
    fn fused_filter_over_merge_collects_without_intermediate_nodes() {
        let engine = SubtreeEngine::new();
        let turn = Turn::new(TurnId::new(1), TurnFlags::empty());
        let left = committed_source(&engine, &[1, 2, 3], &turn);
        let right = committed_source(&engine, &[4, 5], &turn);

        let op = EventOp::filter(
            EventOp::merge(vec![EventOp::source(left), EventOp::source(right)]),
            |e| e % 2 == 0,
        );
        assert_eq!(op.dependency_count(), 2);

        let mut collected = Vec::new();
        op.collect(&turn, &mut |e| collected.push(e));
        assert_eq!(collected, vec![2, 4]);
    }

    #[test]
    fn transform_changes_the_element_type_mid_chain() {
        let engine = SubtreeEngine::new();
        let turn = Turn::new(TurnId::new(1), TurnFlags::empty());
        let source = committed_source(&engine, &[1, 12], &turn);

        let op: EventOp<String> = EventOp::filter(
            EventOp::transform(EventOp::source(source), |e: &i32| format!("{e:02}")),
            |s: &String| s.len() == 2,
        );

        let mut collected = Vec::new();
        op.collect(&turn, &mut |e| collected.push(e));
        assert_eq!(collected, vec!["01".to_string(), "12".to_string()]);
    }

    #[test]
    fn synced_operators_count_their_signal_dependencies() {
        let engine = SubtreeEngine::new();
        let source = EventSourceNode::<i32>::new(&engine);
        let threshold = SignalNode::new(&engine, 5);

        let stream: StreamRef<i32> = source;
        let op = EventOp::synced_filter(EventOp::source(stream), &threshold, |e, limit| e > limit);
        assert_eq!(op.dependency_count(), 2);
    }

    #[test]
    fn node_attaches_once_per_dependency() {
        let engine = SubtreeEngine::new();
        let source = EventSourceNode::<i32>::new(&engine);
        let node = EventOpNode::new(
            &engine,
            EventOp::transform(EventOp::source(source.clone()), |e: &i32| e + 1),
        );
        assert_eq!(node.dependency_count(), 1);
        assert_eq!(source.base().successor_count(), 1);
        assert_eq!(node.base().level(), 1);

        drop(node);
        assert_eq!(source.base().successor_count(), 0);
    }

    #[test]
    fn steal_detaches_and_the_op_composes_into_a_new_node() {
        let engine = SubtreeEngine::new();
        let source = EventSourceNode::<i32>::new(&engine);
        let first = EventOpNode::new(
            &engine,
            EventOp::transform(EventOp::source(source.clone()), |e: &i32| e + 1),
        );
        assert_eq!(source.base().successor_count(), 1);

        let stolen = first.steal_op();
        assert_eq!(source.base().successor_count(), 0);

        let second = EventOpNode::new(&engine, EventOp::filter(stolen, |e| *e > 2));
        assert_eq!(source.base().successor_count(), 1);
        assert_eq!(second.dependency_count(), 1);
    }

    #[test]
    #[should_panic(expected = "operator already stolen")]
    fn stealing_twice_is_a_contract_violation() {
        let engine = SubtreeEngine::new();
        let source = EventSourceNode::<i32>::new(&engine);
        let node = EventOpNode::new(
            &engine,
            EventOp::transform(EventOp::source(source), |e: &i32| *e),
        );
        let _ = node.steal_op();
        let _ = node.steal_op();
    }
}
