//! Specialization: exemplars, facades, and partial refinement ordering.

use rell::{Datum, NoPrint, Session};

fn eval(session: &mut Session, code: &str) -> Datum {
    session
        .execute(code, &mut NoPrint)
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"))
}

/// `g: specialize 'foo/b [y: 99]` then `g/a 10` yields `[10 99]`.
#[test]
fn partial_specialization_chain() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [/a x /b y] [reduce [x y]]");
    eval(&mut session, "g: specialize 'foo/b [y: 99]");
    assert_eq!(
        eval(&mut session, "g/a 10"),
        Datum::Block(vec![Datum::Integer(10), Datum::Integer(99)])
    );
}

/// Specializing with an empty def changes nothing observable.
#[test]
fn empty_specialization_is_identity() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [n /b y] [reduce [n y]]");
    eval(&mut session, "g: specialize :foo []");
    assert_eq!(
        eval(&mut session, "g 1"),
        Datum::Block(vec![Datum::Integer(1), Datum::Null])
    );
    assert_eq!(
        eval(&mut session, "g/b 1 2"),
        Datum::Block(vec![Datum::Integer(1), Datum::Integer(2)])
    );
    assert_eq!(
        eval(&mut session, "words-of :g"),
        eval(&mut session, "words-of :foo"),
        "an empty specialization reflects identically"
    );
}

/// Ordinary arguments fixed by the exemplar are consumed from it, not the
/// feed; specialized-out parameters vanish from reflection (the facade).
#[test]
fn specialized_arguments_leave_the_feed_alone() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [n m] [reduce [n m]]");
    eval(&mut session, "g: specialize :foo [n: 1]");
    assert_eq!(
        eval(&mut session, "g 2"),
        Datum::Block(vec![Datum::Integer(1), Datum::Integer(2)])
    );
    assert_eq!(
        eval(&mut session, "words-of :g"),
        Datum::Block(vec![Datum::Word("m".into())]),
        "the facade hides the specialized-out parameter"
    );
}

/// A fully specialized action consumes zero cells from the feed.
#[test]
fn fully_specialized_consumes_nothing() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [n m] [n + m]");
    eval(&mut session, "g: specialize :foo [n: 40 m: 2]");
    // If g consumed from the feed it would swallow the 5.
    assert_eq!(
        eval(&mut session, "reduce [g 5]"),
        Datum::Block(vec![Datum::Integer(42), Datum::Integer(5)])
    );
}

/// `specialize 'foo/ref2/ref3 []` then calling with a further refinement:
/// partials are consumed before the new request, in the order the
/// specializing path named them, so arguments flow in call-site order.
#[test]
fn partial_refinements_order_before_new_ones() {
    let mut session = Session::new();
    eval(
        &mut session,
        "foo: func [/ref1 a /ref2 b /ref3 c] [reduce [a b c]]",
    );
    eval(&mut session, "g: specialize 'foo/ref2/ref3 []");
    // Equivalent to foo/ref2/ref3/ref1 1 2 3: b <- 1, c <- 2, a <- 3.
    assert_eq!(
        eval(&mut session, "g/ref1 1 2 3"),
        Datum::Block(vec![Datum::Integer(3), Datum::Integer(1), Datum::Integer(2)])
    );
}

/// Stacked partial specialization matches the flat equivalent.
#[test]
fn partial_specialization_composes() {
    let mut session = Session::new();
    eval(
        &mut session,
        "foo: func [/ref1 a /ref2 b /ref3 c] [reduce [a b c]]",
    );
    eval(&mut session, "g: specialize 'foo/ref2 []");
    eval(&mut session, "h: specialize 'g/ref3 []");
    assert_eq!(
        eval(&mut session, "h 1 2"),
        eval(&mut session, "foo/ref2/ref3 1 2"),
        "stacked partials behave like the flat refinement path"
    );
}

/// Refinements the def block enables completely read true at the call.
#[test]
fn refinement_fulfilled_by_def_block() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [/b y] [reduce [b y]]");
    eval(&mut session, "g: specialize 'foo/b [y: 7]");
    assert_eq!(
        eval(&mut session, "g"),
        Datum::Block(vec![Datum::Logic(true), Datum::Integer(7)])
    );
}

/// Enabling a refinement without all of its arguments is an error at
/// specialization finalization, not at some later call.
#[test]
fn half_filled_refinement_errors_at_specialize() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [/b y z] [y]");
    let err = session
        .execute("specialize 'foo/b [y: 1]", &mut NoPrint)
        .unwrap_err();
    assert_eq!(err.id, "partial-specialization");
}

/// Specializing a non-action is rejected.
#[test]
fn specialize_rejects_non_actions() {
    let mut session = Session::new();
    eval(&mut session, "notfn: 3");
    let err = session.execute("specialize 'notfn []", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "bad-specializee");
}

/// A specialization of a specialization layers exemplars correctly.
#[test]
fn nested_value_specialization() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [a b c] [reduce [a b c]]");
    eval(&mut session, "g: specialize :foo [a: 1]");
    eval(&mut session, "h: specialize :g [b: 2]");
    assert_eq!(
        eval(&mut session, "h 3"),
        Datum::Block(vec![Datum::Integer(1), Datum::Integer(2), Datum::Integer(3)])
    );
}
