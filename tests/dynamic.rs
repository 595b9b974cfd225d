mod common;

use std::sync::Arc;

use common::RecordingObserver;
use ripple::{
    EventFlattenNode, EventOp, EventOpNode, EventSourceNode, EventStream, ReactiveNode,
    SignalNode, StreamRef, SubtreeEngine,
};

fn serial_engine(observer: &RecordingObserver) -> Arc<SubtreeEngine> {
    SubtreeEngine::builder()
        .workers(1)
        .observer(observer.clone())
        .build()
}

#[test]
fn flatten_follows_the_outer_signal() {
    let observer = RecordingObserver::default();
    let engine = serial_engine(&observer);

    let x0 = EventSourceNode::<&'static str>::new(&engine);
    let x1 = EventSourceNode::<&'static str>::new(&engine);
    let outer = SignalNode::new(&engine, x0.clone() as StreamRef<&'static str>);
    let flatten = EventFlattenNode::new(&engine, &outer);

    // While the outer points at x0, the flatten forwards x0's events.
    x0.push("a");
    engine.run_turn(vec![x0.clone()]).unwrap();
    assert_eq!(flatten.events(), vec!["a"]);
    assert_eq!(flatten.inner().base().id(), x0.base().id());

    // Re-pointing the outer re-parents the flatten dynamically.
    outer.set(x1.clone() as StreamRef<&'static str>);
    let retarget_turn = engine.run_turn(vec![outer.clone()]).unwrap();
    assert_eq!(flatten.inner().base().id(), x1.base().id());
    assert_eq!(
        observer.detaches(),
        vec![(flatten.base().id(), x0.base().id(), retarget_turn)]
    );
    assert_eq!(
        observer.attaches(),
        vec![(flatten.base().id(), x1.base().id(), retarget_turn)]
    );
    assert_eq!(x0.base().successor_count(), 0);
    assert_eq!(x1.base().successor_count(), 1);
    // Nothing flowed through the new inner yet.
    assert!(flatten.events().is_empty());

    // Events now arrive from x1, and x0 no longer reaches the flatten.
    x1.push("b");
    engine.run_turn(vec![x1.clone()]).unwrap();
    assert_eq!(flatten.events(), vec!["b"]);

    // A later x0 turn no longer reaches the flatten; its buffer still shows
    // the last turn it took part in.
    x0.push("c");
    engine.run_turn(vec![x0.clone()]).unwrap();
    assert_eq!(flatten.events(), vec!["b"]);
}

#[test]
fn dynamic_attach_shifts_levels_mid_turn() {
    let observer = RecordingObserver::default();
    let engine = serial_engine(&observer);

    // Chain source -> a1 -> a2, with b on a short branch and a flatten that
    // will re-target from a shallow node onto the deep end of the chain.
    let source = EventSourceNode::<i32>::new(&engine);
    let a1 = EventOpNode::new(
        &engine,
        EventOp::transform(EventOp::source(source.clone()), |e: &i32| e + 1),
    );
    let a2 = EventOpNode::new(
        &engine,
        EventOp::transform(EventOp::source(a1.clone()), |e: &i32| e * 2),
    );
    let b = EventOpNode::new(
        &engine,
        EventOp::transform(EventOp::source(source.clone()), |e: &i32| e * 10),
    );

    let shallow = EventSourceNode::<i32>::new(&engine);
    let outer = SignalNode::new(&engine, shallow.clone() as StreamRef<i32>);
    let flatten = EventFlattenNode::new(&engine, &outer);
    let consumer = EventOpNode::new(
        &engine,
        EventOp::merge(vec![
            EventOp::source(flatten.clone() as StreamRef<i32>),
            EventOp::source(b.clone()),
        ]),
    );

    assert_eq!(flatten.base().level(), 1);
    assert_eq!(consumer.base().level(), 2);
    assert_eq!(a2.base().level(), 2);

    // One turn both feeds the chain and re-points the flatten at a2.
    source.push(1);
    outer.set(a2.clone() as StreamRef<i32>);
    engine
        .run_turn(vec![source.clone(), outer.clone()])
        .unwrap();

    // The flatten now sits above a2, and the consumer above everything.
    assert!(a2.base().level() < flatten.base().level());
    assert!(flatten.base().level() < consumer.base().level());
    assert!(b.base().level() < consumer.base().level());

    // The re-scheduled consumer ran once and saw this turn's events from
    // both branches.
    assert_eq!(observer.evaluate_count(consumer.base().id()), 1);
    assert_eq!(a2.events(), vec![4]);
    assert_eq!(flatten.events(), vec![4]);
    assert_eq!(consumer.events(), vec![4, 10]);

    // The dynamic edit happened inside the turn.
    assert_eq!(observer.attaches().len(), 1);
    assert_eq!(observer.detaches().len(), 1);

    // The flatten evaluated once: the re-targeting pass is not an
    // evaluation, only the repeated run is.
    assert_eq!(observer.evaluate_count(flatten.base().id()), 1);

    // All transient state is gone despite the mid-turn topology edit.
    for base in [
        source.base(),
        a1.base(),
        a2.base(),
        b.base(),
        flatten.base(),
        consumer.base(),
    ] {
        assert!(base.flags().is_empty());
        assert_eq!(base.ready_count(), 0);
        assert_eq!(base.wait_count(), 0);
    }
}

#[test]
fn stolen_op_composes_while_the_victim_goes_silent() {
    let observer = RecordingObserver::default();
    let engine = serial_engine(&observer);

    let source = EventSourceNode::<i32>::new(&engine);
    let victim = EventOpNode::new(
        &engine,
        EventOp::transform(EventOp::source(source.clone()), |e: &i32| e + 1),
    );

    let stolen = victim.steal_op();
    let fused = EventOpNode::new(&engine, EventOp::filter(stolen, |e: &i32| *e > 2));

    for event in [1, 2, 3] {
        source.push(event);
    }
    engine.run_turn(vec![source.clone()]).unwrap();

    assert_eq!(fused.events(), vec![3, 4]);
    assert_eq!(observer.evaluate_count(victim.base().id()), 0);
    assert_eq!(observer.evaluate_count(fused.base().id()), 1);
}

#[test]
fn dropping_a_downstream_node_detaches_it() {
    let observer = RecordingObserver::default();
    let engine = serial_engine(&observer);

    let source = EventSourceNode::<i32>::new(&engine);
    let doomed = EventOpNode::new(
        &engine,
        EventOp::transform(EventOp::source(source.clone()), |e: &i32| *e),
    );
    let survivor = EventOpNode::new(
        &engine,
        EventOp::transform(EventOp::source(source.clone()), |e: &i32| e * 2),
    );
    assert_eq!(source.base().successor_count(), 2);

    drop(doomed);
    assert_eq!(source.base().successor_count(), 1);

    source.push(4);
    engine.run_turn(vec![source.clone()]).unwrap();
    assert_eq!(survivor.events(), vec![8]);
}
