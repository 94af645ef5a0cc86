//! Garbage collection through the session: reachability, baseline
//! recovery, and handle rooting.

use rell::{Datum, NoPrint, Session};

fn eval(session: &mut Session, code: &str) -> Datum {
    session
        .execute(code, &mut NoPrint)
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"))
}

/// Build a deeply nested block graph, discard the root, sweep: the managed
/// node count returns to its baseline.
#[test]
fn discarded_graph_returns_to_baseline() {
    let mut session = Session::new();
    // Warm up: define the variable so the context shape stays fixed.
    eval(&mut session, "x: _");
    session.collect_garbage();
    let baseline = session.heap_stats().live_objects;

    // A nested graph of blocks and strings.
    eval(
        &mut session,
        "x: [1 [2 [3 [4 [5 \"deep\"] \"d\"] \"c\"] \"b\"] \"a\"]",
    );
    session.collect_garbage();
    let with_graph = session.heap_stats().live_objects;
    assert!(
        with_graph > baseline,
        "the graph must be rooted through x ({with_graph} vs {baseline})"
    );

    eval(&mut session, "x: _");
    session.collect_garbage();
    let after = session.heap_stats().live_objects;
    assert_eq!(after, baseline, "discarding the root frees the whole graph");
}

/// Collection with live references never frees reachable data.
#[test]
fn reachable_data_survives_collection() {
    let mut session = Session::new();
    eval(&mut session, "x: [1 2 3]");
    for _ in 0..3 {
        session.collect_garbage();
    }
    assert_eq!(
        eval(&mut session, "x"),
        Datum::Block(vec![Datum::Integer(1), Datum::Integer(2), Datum::Integer(3)])
    );
}

/// The recycle native sweeps from inside evaluation; data reachable from
/// the running expression survives.
#[test]
fn recycle_native_runs_mid_evaluation() {
    let mut session = Session::new();
    eval(&mut session, "x: [1 2]");
    let result = eval(&mut session, "reduce [x recycle x]");
    let Datum::Block(items) = result else { panic!() };
    assert_eq!(items.len(), 3);
    assert!(matches!(items[0], Datum::Block(_)));
    assert!(matches!(items[2], Datum::Block(_)), "x survives the mid-eval sweep");
}

/// Handles are GC roots: the held value survives sweeps with no other
/// references, and releasing un-roots it.
#[test]
fn handles_root_their_values() {
    let mut session = Session::new();
    let handle = session
        .alloc_handle(&Datum::Block(vec![Datum::Integer(7)]))
        .expect("handle allocation");
    session.collect_garbage();
    assert_eq!(
        session.handle_datum(handle),
        Datum::Block(vec![Datum::Integer(7)]),
        "rooted value survives collection"
    );
    let before = session.heap_stats().live_objects;
    session.release(handle);
    session.collect_garbage();
    assert!(
        session.heap_stats().live_objects < before,
        "release un-roots the held value"
    );
}

/// Objects keep their keylists and values alive; dropping the object
/// releases them.
#[test]
fn objects_are_collected_as_a_unit() {
    let mut session = Session::new();
    eval(&mut session, "o: _");
    session.collect_garbage();
    let baseline = session.heap_stats().live_objects;
    eval(&mut session, "o: make object! [a: \"alpha\" b: [1 2 3]]");
    session.collect_garbage();
    assert!(session.heap_stats().live_objects > baseline);
    eval(&mut session, "o: _");
    session.collect_garbage();
    assert_eq!(session.heap_stats().live_objects, baseline);
}

/// Heap stats break live objects down by flavor.
#[test]
fn stats_track_flavors() {
    let mut session = Session::new();
    eval(&mut session, "x: [1 2 3]");
    let stats = session.heap_stats();
    assert!(stats.objects_by_flavor.contains_key("Array"));
    assert!(stats.live_objects > 0);
    assert_eq!(
        stats.live_objects + stats.free_slots,
        stats.total_slots,
        "slot accounting is exact"
    );
}
