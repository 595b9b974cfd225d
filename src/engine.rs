//! The subtree propagation engine.
//!
//! One turn is driven in phases:
//!
//! 1. Every submitted input commits its staged data; changed inputs become
//!    marking seeds. A BFS over successors marks the affected subtree and
//!    counts, per node, the incoming marked edges it must wait for.
//! 2. The topological queue releases all nodes at the minimum level in one
//!    batch; the batch ticks in parallel on the worker pool. Each
//!    completing node bumps the ready count of its marked successors — a
//!    pulse additionally arms them to recompute — and a successor whose
//!    ready count reaches its wait count is enqueued.
//! 3. Dynamic attach/detach requested by a tick is queued, applied between
//!    batches, and may re-level part of the subtree; the requesting node
//!    runs again (its `repeated` run) once the edit is in place.
//!
//! When the queue drains, all transient per-node state is cleared so the
//! next turn starts from a blank slate.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    NodeFlags, NodeId, NodeRef, NoopObserver, PropagationError, PropagationObserver, ReactiveNode,
    TopoQueue, Turn, TurnFlags, TurnId,
};

/// Flags cleared from every visited node when a turn finishes.
const TRANSIENT: NodeFlags = NodeFlags::all();

struct PendingTurn {
    turn: Arc<Turn>,
    inputs: Vec<NodeRef>,
}

enum TopologyEdit {
    Attach { child: NodeRef, parent: NodeRef },
    Detach { child: NodeRef, parent: NodeRef },
}

/// The propagation engine: owns the worker pool and drives turns over the
/// node graph, one at a time, in submission order.
///
/// Nodes register with the engine on construction and call its hooks for
/// attachment, input changes, and pulse publication; the engine calls back
/// into nodes only through [`ReactiveNode`].
pub struct SubtreeEngine {
    observer: Box<dyn PropagationObserver>,
    pool: Option<rayon::ThreadPool>,
    registry: papaya::HashMap<NodeId, &'static str, ahash::RandomState>,
    next_turn: AtomicU64,
    pending: Mutex<VecDeque<PendingTurn>>,
    gate: Mutex<()>,
    // Per-turn state below; only meaningful while the gate is held.
    seeds: Mutex<Vec<NodeRef>>,
    queue: Mutex<TopoQueue>,
    requests: Mutex<Vec<TopologyEdit>>,
    visited: Mutex<Vec<NodeRef>>,
    completed: Mutex<ahash::HashSet<NodeId>>,
    failure: Mutex<Option<PropagationError>>,
}

impl SubtreeEngine {
    /// Create an engine with the default worker pool and a discarding
    /// observer.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Start configuring an engine.
    pub fn builder() -> SubtreeEngineBuilder {
        SubtreeEngineBuilder {
            workers: None,
            observer: Box::new(NoopObserver),
        }
    }

    /// The observer this engine reports to.
    #[inline]
    pub fn observer(&self) -> &dyn PropagationObserver {
        &*self.observer
    }

    /// Number of live registered nodes.
    pub fn node_count(&self) -> usize {
        self.registry.pin().len()
    }

    /// Debug label of a registered node, if it is still alive.
    pub fn node_type_of(&self, node: NodeId) -> Option<&'static str> {
        self.registry.pin().get(&node).copied()
    }

    // ---- lifecycle hooks, called by the node layer ----

    /// Register a newly constructed node.
    pub fn on_node_create(&self, node: &dyn ReactiveNode) {
        self.registry.pin().insert(node.base().id(), node.node_type());
    }

    /// Deregister a node that is being destroyed.
    pub fn on_node_destroy(&self, node: NodeId) {
        self.registry.pin().remove(&node);
    }

    /// Attach `child` below `parent`: record the successor edge and raise
    /// the child (and transitively its descendants) above the parent's
    /// level.
    pub fn on_node_attach(&self, child: &NodeRef, parent: &dyn ReactiveNode) {
        parent
            .base()
            .add_successor(child.base().id(), Arc::downgrade(child));
        let min_level = parent.base().level() + 1;
        if child.base().level() < min_level {
            child.base().set_level(min_level);
            Self::raise_descendants(&**child, min_level + 1);
        }
    }

    /// Detach `child` from `parent`. Levels are not lowered: a level that
    /// is too high wastes a queue tier at worst, never correctness.
    pub fn on_node_detach(&self, child: NodeId, parent: &dyn ReactiveNode) {
        parent.base().remove_successor(child);
    }

    /// Queue a mid-turn attach of `child` below `parent`, applied after the
    /// running level batch.
    pub fn on_dynamic_node_attach(&self, child: NodeRef, parent: NodeRef, turn: &Turn) {
        self.observer
            .on_dynamic_attach(child.base().id(), parent.base().id(), turn.id());
        self.requests
            .lock()
            .push(TopologyEdit::Attach { child, parent });
    }

    /// Queue a mid-turn detach of `child` from `parent`, applied after the
    /// running level batch.
    pub fn on_dynamic_node_detach(&self, child: NodeRef, parent: NodeRef, turn: &Turn) {
        self.observer
            .on_dynamic_detach(child.base().id(), parent.base().id(), turn.id());
        self.requests
            .lock()
            .push(TopologyEdit::Detach { child, parent });
    }

    /// Register a changed input as a marking seed for the current turn.
    pub fn on_input_change(&self, node: NodeRef, _turn: &Turn) {
        node.base()
            .set_flags(NodeFlags::INITIAL | NodeFlags::ROOT);
        self.seeds.lock().push(node);
    }

    /// A tick produced output: mark the node changed and schedule its
    /// marked successors, arming them to recompute.
    pub fn on_node_pulse(&self, node: &dyn ReactiveNode, turn: &Turn) {
        self.observer.on_node_pulse(node.base().id(), turn.id());
        node.base().set_flags(NodeFlags::CHANGED);
        self.complete_node(node, true);
    }

    /// A tick produced no output: successors still see the completion so
    /// their ready counts keep moving, but they are not armed by it.
    pub fn on_node_idle_pulse(&self, node: &dyn ReactiveNode, turn: &Turn) {
        self.observer.on_node_idle_pulse(node.base().id(), turn.id());
        self.complete_node(node, false);
    }

    // ---- turn submission ----

    /// Submit a turn over `inputs` and return its handle without waiting.
    ///
    /// Turns are dispatched FIFO; a submission made while another turn is
    /// running is picked up as soon as the engine is free. Wait on the
    /// returned turn for the outcome.
    pub fn submit(&self, inputs: Vec<NodeRef>) -> Arc<Turn> {
        self.submit_with_flags(inputs, TurnFlags::empty())
    }

    /// Like [`submit`](Self::submit), with explicit turn flags.
    pub fn submit_with_flags(&self, inputs: Vec<NodeRef>, flags: TurnFlags) -> Arc<Turn> {
        let id = TurnId::new(self.next_turn.fetch_add(1, Ordering::Relaxed));
        let turn = Arc::new(Turn::new(id, flags));
        self.pending.lock().push_back(PendingTurn {
            turn: turn.clone(),
            inputs,
        });
        self.drain_pending();
        turn
    }

    /// Submit a turn over `inputs` and block until it completes.
    pub fn run_turn(&self, inputs: Vec<NodeRef>) -> Result<TurnId, PropagationError> {
        let turn = self.submit(inputs);
        turn.wait()?;
        Ok(turn.id())
    }

    /// Run pending turns FIFO. Whichever thread holds the gate drains the
    /// queue; a submitter that finds the gate taken leaves its turn for the
    /// holder to pick up.
    fn drain_pending(&self) {
        loop {
            if self.pending.lock().is_empty() {
                return;
            }
            let Some(guard) = self.gate.try_lock() else {
                return;
            };
            loop {
                let job = self.pending.lock().pop_front();
                let Some(job) = job else { break };
                let outcome = self.execute_turn(&job.turn, &job.inputs);
                job.turn.complete(outcome);
            }
            drop(guard);
        }
    }

    // ---- turn execution; the gate is held throughout ----

    fn execute_turn(&self, turn: &Turn, inputs: &[NodeRef]) -> Result<(), PropagationError> {
        debug!(turn = turn.id().raw(), inputs = inputs.len(), "turn begin");
        self.observer.on_turn_begin(turn.id());
        for input in inputs {
            debug_assert!(input.is_input_node(), "submitted a non-input node");
            if input.apply_input(turn) {
                self.on_input_change(input.clone(), turn);
            }
        }
        let outcome = if self.seeds.lock().is_empty() {
            Ok(())
        } else {
            self.propagate(turn)
        };
        self.observer.on_turn_end(turn.id());
        debug!(turn = turn.id().raw(), ok = outcome.is_ok(), "turn end");
        outcome
    }

    /// Drive the turn to completion.
    fn propagate(&self, turn: &Turn) -> Result<(), PropagationError> {
        let seeds = std::mem::take(&mut *self.seeds.lock());
        for seed in &seeds {
            self.mark_subtree(seed);
        }
        {
            let mut queue = self.queue.lock();
            for seed in seeds {
                let base = seed.base();
                base.set_ready(base.wait_count());
                queue.push(seed);
            }
        }

        loop {
            let batch = self.queue.lock().fetch_next();
            if batch.is_empty() && self.requests.lock().is_empty() {
                break;
            }

            let mut runnable = Vec::with_capacity(batch.len());
            for node in batch {
                let base = node.base();
                if base.level() < base.new_level() {
                    // A deferred dynamic attach raised this node; settle the
                    // level shift before it runs.
                    base.set_level(base.new_level());
                    self.invalidate_successors(&*node);
                    self.queue.lock().push(node);
                    continue;
                }
                runnable.push(node);
            }
            trace!(count = runnable.len(), "level batch");

            match (&self.pool, runnable.len()) {
                (_, 0) => {}
                (None, _) | (_, 1) => {
                    for node in &runnable {
                        self.exec_node(node, turn);
                    }
                }
                (Some(pool), _) => pool.scope(|scope| {
                    for node in &runnable {
                        scope.spawn(move |_| self.exec_node(node, turn));
                    }
                }),
            }

            if self.failure.lock().is_some() {
                break;
            }
            self.apply_topology_edits();
        }

        self.finish_turn()
    }

    /// Phase 0: mark every node reachable from `root` and count, per node,
    /// the marked edges entering it.
    fn mark_subtree(&self, root: &NodeRef) {
        if !root.base().test_and_set_flags(NodeFlags::MARKED) {
            self.visited.lock().push(root.clone());
        }
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            for succ in node.base().successors() {
                succ.base().bump_wait();
                if !succ.base().test_and_set_flags(NodeFlags::MARKED) {
                    self.visited.lock().push(succ.clone());
                    stack.push(succ);
                }
            }
        }
    }

    /// Run one node of a level batch, on a worker when the batch is wide.
    fn exec_node(&self, node: &NodeRef, turn: &Turn) {
        if self.failure.lock().is_some() {
            return;
        }
        if node.is_input_node() {
            // Seeds are never ticked; their committed buffer is published
            // directly.
            self.on_node_pulse(&**node, turn);
            return;
        }
        if !node.base().should_update() {
            // No predecessor pulsed: forward the idleness downstream.
            self.on_node_idle_pulse(&**node, turn);
            return;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| node.clone().tick(turn, self)));
        if let Err(payload) = outcome {
            node.discard_buffer();
            let message = panic_message(payload);
            debug!(node = %node.base().id(), %message, "tick failed, aborting turn");
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(PropagationError::TickFailed {
                    node: node.base().id(),
                    node_type: node.node_type(),
                    message,
                });
            }
        }
    }

    /// Record a node's completion and move its marked successors forward.
    fn complete_node(&self, node: &dyn ReactiveNode, pulsed: bool) {
        self.completed.lock().insert(node.base().id());
        for succ in node.base().successors() {
            let base = succ.base();
            if !base.test_flags(NodeFlags::MARKED) {
                continue;
            }
            if pulsed {
                base.set_should_update(true);
            }
            if base.inc_ready() == base.wait_count() {
                self.queue.lock().push(succ);
            }
        }
    }

    /// Raise the scratch level of `node`'s direct successors above its own.
    /// Deeper descendants are handled when they pass through the queue.
    fn invalidate_successors(&self, node: &dyn ReactiveNode) {
        let level = node.base().level();
        for succ in node.base().successors() {
            if succ.base().new_level() <= level {
                succ.base().set_new_level(level + 1);
            }
        }
    }

    /// Phase 2: apply the topology edits queued by dynamic nodes during the
    /// batch that just completed.
    fn apply_topology_edits(&self) {
        let edits = std::mem::take(&mut *self.requests.lock());
        for edit in edits {
            match edit {
                TopologyEdit::Detach { child, parent } => {
                    // The old parent has necessarily completed this turn
                    // before the child could tick and request the detach, so
                    // no wait-count adjustment is needed.
                    parent.base().remove_successor(child.base().id());
                }
                TopologyEdit::Attach { child, parent } => {
                    let child_base = child.base();
                    let parent_base = parent.base();
                    parent_base.add_successor(child_base.id(), Arc::downgrade(&child));

                    child_base.set_flags(NodeFlags::DEFERRED | NodeFlags::REPEATED);
                    if child_base.level() <= parent_base.level() {
                        child_base.set_new_level(parent_base.level() + 1);
                    }
                    if !child_base.test_and_set_flags(NodeFlags::MARKED) {
                        self.visited.lock().push(child.clone());
                    }

                    let parent_pending = parent_base.test_flags(NodeFlags::MARKED)
                        && !self.completed.lock().contains(&parent_base.id());
                    if parent_pending {
                        // The new parent still runs this turn; its pulse
                        // schedules the repeated run.
                        child_base.bump_wait();
                    } else {
                        self.queue.lock().push(child);
                    }
                }
            }
        }
    }

    /// Clear all transient state so the next turn starts clean, and take
    /// the turn's outcome.
    fn finish_turn(&self) -> Result<(), PropagationError> {
        let visited = std::mem::take(&mut *self.visited.lock());

        // Settle levels still deferred when the turn ended, then repair any
        // edge left non-monotonic by mid-turn re-parenting.
        for node in &visited {
            let base = node.base();
            if base.new_level() > base.level() {
                base.set_level(base.new_level());
            }
        }
        let mut ordered = visited.clone();
        ordered.sort_by_key(|n| n.base().level());
        for node in &ordered {
            let level = node.base().level();
            for succ in node.base().successors() {
                if succ.base().level() <= level {
                    succ.base().set_level(level + 1);
                    Self::raise_descendants(&*succ, level + 2);
                }
            }
        }

        for node in &visited {
            let base = node.base();
            base.clear_flags(TRANSIENT);
            base.set_should_update(false);
            base.reset_wait();
            base.set_ready(0);
            base.set_new_level(0);
        }
        self.completed.lock().clear();
        self.queue.lock().clear();
        self.requests.lock().clear();
        self.seeds.lock().clear();

        match self.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn raise_descendants(node: &dyn ReactiveNode, min_level: u32) {
        for succ in node.base().successors() {
            if succ.base().level() < min_level {
                succ.base().set_level(min_level);
                Self::raise_descendants(&*succ, min_level + 1);
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "tick panicked".to_string()
    }
}

/// Builder for a [`SubtreeEngine`].
pub struct SubtreeEngineBuilder {
    workers: Option<usize>,
    observer: Box<dyn PropagationObserver>,
}

impl SubtreeEngineBuilder {
    /// Size of the worker pool. `0` or `1` selects single-threaded mode:
    /// every tick runs inline on the submitting thread and no pool is
    /// created.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Observer to report engine activity to.
    pub fn observer(mut self, observer: impl PropagationObserver) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Arc<SubtreeEngine> {
        let pool = match self.workers {
            Some(0) | Some(1) => None,
            Some(workers) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .expect("failed to create worker pool"),
            ),
            None => Some(
                rayon::ThreadPoolBuilder::new()
                    .build()
                    .expect("failed to create worker pool"),
            ),
        };
        Arc::new(SubtreeEngine {
            observer: self.observer,
            pool,
            registry: papaya::HashMap::default(),
            next_turn: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            gate: Mutex::new(()),
            seeds: Mutex::new(Vec::new()),
            queue: Mutex::new(TopoQueue::new()),
            requests: Mutex::new(Vec::new()),
            visited: Mutex::new(Vec::new()),
            completed: Mutex::new(ahash::HashSet::default()),
            failure: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventOp, EventOpNode, EventSourceNode};

    #[test]
    fn engine_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<SubtreeEngine>();
        assert_sync::<SubtreeEngine>();
    }

    #[test]
    fn registry_tracks_node_lifecycle() {
        let engine = SubtreeEngine::builder().workers(1).build();
        assert_eq!(engine.node_count(), 0);

        let source = EventSourceNode::<i32>::new(&engine);
        let id = source.base().id();
        assert_eq!(engine.node_count(), 1);
        assert_eq!(engine.node_type_of(id), Some("EventSourceNode"));

        drop(source);
        assert_eq!(engine.node_count(), 0);
        assert_eq!(engine.node_type_of(id), None);
    }

    #[test]
    fn empty_turn_completes_immediately() {
        let engine = SubtreeEngine::builder().workers(1).build();
        let source = EventSourceNode::<i32>::new(&engine);
        // Nothing staged: the turn is a no-op but still completes.
        let id = engine.run_turn(vec![source]).unwrap();
        let second = engine.run_turn(vec![]).unwrap();
        assert!(second > id);
    }

    #[test]
    fn attach_raises_descendants_transitively() {
        let engine = SubtreeEngine::builder().workers(1).build();
        let shallow = EventSourceNode::<i32>::new(&engine);
        let a = EventOpNode::new(
            &engine,
            EventOp::transform(EventOp::source(shallow.clone()), |e: &i32| *e),
        );
        let b = EventOpNode::new(
            &engine,
            EventOp::transform(EventOp::source(a.clone()), |e: &i32| *e),
        );
        assert_eq!(a.base().level(), 1);
        assert_eq!(b.base().level(), 2);

        // Attaching `a` below a deeper chain raises `a` and, transitively, `b`.
        let deep_src = EventSourceNode::<i32>::new(&engine);
        let deep = EventOpNode::new(
            &engine,
            EventOp::transform(EventOp::source(deep_src.clone()), |e: &i32| *e),
        );
        let a_ref: NodeRef = a.clone();
        engine.on_node_attach(&a_ref, &*deep);
        assert_eq!(a.base().level(), 2);
        assert_eq!(b.base().level(), 3);
    }
}
