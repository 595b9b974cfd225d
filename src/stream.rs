//! Event-stream nodes and their per-turn buffers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{NodeBase, ReactiveNode, SubtreeEngine, Turn, TurnId};

struct BufferState<E> {
    turn: Option<TurnId>,
    events: Vec<E>,
}

/// Ordered per-turn event buffer.
///
/// The buffer records which turn it currently belongs to and is cleared
/// lazily: the owning node clears it when it ticks, and downstream readers
/// clear it when they touch a dependency that has not been advanced to the
/// current turn yet. The clear lock serializes that check-and-clear, which
/// is only ever contended when two downstream ticks lazily touch the same
/// predecessor at once.
pub struct EventBuffer<E> {
    state: Mutex<BufferState<E>>,
}

impl<E> EventBuffer<E> {
    /// Create an empty buffer belonging to no turn.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                turn: None,
                events: Vec::new(),
            }),
        }
    }

    /// Advance the buffer to `turn`.
    ///
    /// If the recorded turn differs from `turn` (or `force_update` holds),
    /// the new id is adopted and, unless `no_clear` is set, the events of
    /// the previous turn are dropped.
    pub fn set_current_turn(&self, turn: &Turn, force_update: bool, no_clear: bool) {
        let mut state = self.state.lock();
        if state.turn != Some(turn.id()) || force_update {
            state.turn = Some(turn.id());
            if !no_clear {
                state.events.clear();
            }
        }
    }

    /// Append a single event.
    pub fn push(&self, event: E) {
        self.state.lock().events.push(event);
    }

    /// Append a batch of events.
    pub fn extend(&self, events: Vec<E>) {
        self.state.lock().events.extend(events);
    }

    /// Visit the buffered events in order.
    pub fn for_each(&self, f: &mut dyn FnMut(&E)) {
        for event in &self.state.lock().events {
            f(event);
        }
    }

    /// Returns true if the buffer holds no events.
    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Drop all buffered events, keeping the recorded turn.
    pub fn clear(&self) {
        self.state.lock().events.clear();
    }
}

impl<E: Clone> EventBuffer<E> {
    /// Clone out the buffered events.
    pub fn snapshot(&self) -> Vec<E> {
        self.state.lock().events.clone()
    }
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A reactive node producing an ordered stream of events of type `E`.
///
/// After a node's tick completes in turn `T`, its buffer holds exactly the
/// events emitted during `T`, and downstream readers observe them until
/// turn `T + 1` begins.
pub trait EventStream<E>: ReactiveNode {
    /// Advance this node's buffer to `turn`; see
    /// [`EventBuffer::set_current_turn`].
    fn set_current_turn(&self, turn: &Turn, force_update: bool, no_clear: bool);

    /// Visit the events this node produced in its current turn.
    fn for_each_event(&self, f: &mut dyn FnMut(&E));

    /// Clone out the events this node produced in its current turn.
    fn events(&self) -> Vec<E>;
}

/// Shared handle to an event stream of element type `E`.
pub type StreamRef<E> = Arc<dyn EventStream<E>>;

/// An event source: the externally fed root of an event subtree.
///
/// Inputs are appended between turns with [`push`](Self::push); submitting
/// the source with a turn commits them. The buffer is never mutated by a
/// tick — the engine publishes a committed source directly.
pub struct EventSourceNode<E: Clone + Send + Sync + 'static> {
    base: NodeBase,
    engine: Arc<SubtreeEngine>,
    buffer: EventBuffer<E>,
    changed: AtomicBool,
}

impl<E: Clone + Send + Sync + 'static> EventSourceNode<E> {
    /// Create a new event source.
    pub fn new(engine: &Arc<SubtreeEngine>) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(),
            engine: engine.clone(),
            buffer: EventBuffer::new(),
            changed: AtomicBool::new(false),
        });
        engine.on_node_create(&*node);
        node
    }

    /// Append an input event, to be committed by the next turn this source
    /// is submitted with. The first append after a committed turn drops
    /// that turn's events.
    pub fn push(&self, event: E) {
        if self.changed.swap(false, Ordering::Relaxed) {
            self.buffer.clear();
        }
        self.buffer.push(event);
    }
}

impl<E: Clone + Send + Sync + 'static> ReactiveNode for EventSourceNode<E> {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn tick(self: Arc<Self>, _turn: &Turn, _engine: &SubtreeEngine) {
        panic!("ticked an event source: {}", self.base.id());
    }

    fn node_type(&self) -> &'static str {
        "EventSourceNode"
    }

    fn dependency_count(&self) -> usize {
        0
    }

    fn is_input_node(&self) -> bool {
        true
    }

    fn apply_input(&self, turn: &Turn) -> bool {
        if !self.buffer.is_empty() && !self.changed.load(Ordering::Relaxed) {
            // The buffer already holds this turn's inputs.
            self.buffer.set_current_turn(turn, true, true);
            self.changed.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn discard_buffer(&self) {
        self.buffer.clear();
    }
}

impl<E: Clone + Send + Sync + 'static> EventStream<E> for EventSourceNode<E> {
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

impl<E: Clone + Send + Sync + 'static> Drop for EventSourceNode<E> {
    fn drop(&mut self) {
        self.engine.on_node_destroy(self.base.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TurnFlags, TurnId};

    fn turn(id: u64) -> Turn {
        Turn::new(TurnId::new(id), TurnFlags::empty())
    }

    #[test]
    fn buffer_clears_lazily_on_turn_change() {
        let buffer = EventBuffer::new();
        let first = turn(1);
        buffer.set_current_turn(&first, false, false);
        buffer.push(1);
        buffer.push(2);

        // Same turn: a plain advance keeps the events.
        buffer.set_current_turn(&first, false, false);
        assert_eq!(buffer.snapshot(), vec![1, 2]);

        // New turn: the stale events are dropped.
        buffer.set_current_turn(&turn(2), false, false);
        assert!(buffer.is_empty());
    }

    #[test]
    fn force_update_clears_within_the_same_turn() {
        let buffer = EventBuffer::new();
        let t = turn(1);
        buffer.set_current_turn(&t, false, false);
        buffer.push(9);
        buffer.set_current_turn(&t, true, false);
        assert!(buffer.is_empty());
    }

    #[test]
    fn no_clear_preserves_committed_inputs() {
        let buffer = EventBuffer::new();
        buffer.push(7);
        buffer.set_current_turn(&turn(1), true, true);
        assert_eq!(buffer.snapshot(), vec![7]);
    }

    #[test]
    fn source_commit_cycle() {
        let engine = SubtreeEngine::new();
        let source = EventSourceNode::new(&engine);
        source.push(1);
        source.push(2);

        let first = turn(1);
        assert!(source.apply_input(&first));
        assert_eq!(source.events(), vec![1, 2]);
        // A second apply within the same turn is a no-op.
        assert!(!source.apply_input(&first));

        // The first push after a committed turn drops the old events.
        source.push(3);
        assert_eq!(source.events(), vec![3]);
        assert!(source.apply_input(&turn(2)));
        assert_eq!(source.events(), vec![3]);
    }

    #[test]
    fn source_with_no_staged_input_reports_no_change() {
        let engine = SubtreeEngine::new();
        let source = EventSourceNode::<i32>::new(&engine);
        assert!(!source.apply_input(&turn(1)));
    }
}
