//! Function definition, refinement reordering, returns, and frame
//! reflection through the public session.

use rell::{Datum, NoPrint, Session};

fn eval(session: &mut Session, code: &str) -> Datum {
    session
        .execute(code, &mut NoPrint)
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"))
}

/// A function's arguments bind relatively and resolve in its frame.
#[test]
fn basic_function_call() {
    let mut session = Session::new();
    eval(&mut session, "double: func [n] [n * 2]");
    assert_eq!(eval(&mut session, "double 21"), Datum::Integer(42));
}

/// With `foo: func [/a x /b y] [reduce [x y]]`, `foo/b/a 10 20` gives
/// `[20 10]` and `foo/a/b 10 20` gives `[10 20]`: dependent arguments are
/// taken from the feed in call-site refinement order.
#[test]
fn refinement_reorder_follows_call_site() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [/a x /b y] [reduce [x y]]");
    assert_eq!(
        eval(&mut session, "foo/b/a 10 20"),
        Datum::Block(vec![Datum::Integer(20), Datum::Integer(10)])
    );
    assert_eq!(
        eval(&mut session, "foo/a/b 10 20"),
        Datum::Block(vec![Datum::Integer(10), Datum::Integer(20)])
    );
}

/// Unused refinements read as null; their arguments too.
#[test]
fn disabled_refinements_read_null() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [/a x] [reduce [a x]]");
    assert_eq!(
        eval(&mut session, "foo"),
        Datum::Block(vec![Datum::Null, Datum::Null])
    );
    assert_eq!(
        eval(&mut session, "foo/a 5"),
        Datum::Block(vec![Datum::Logic(true), Datum::Integer(5)])
    );
}

/// Naming a refinement the action does not have is a bad-refine error.
#[test]
fn unknown_refinement_errors() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [/a x] [x]");
    let err = session.execute("foo/zzz 1", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "bad-refine");
}

/// return exits the enclosing function with its value.
#[test]
fn return_exits_function() {
    let mut session = Session::new();
    eval(&mut session, "f: func [n] [if n > 0 [return \"positive\"] \"other\"]");
    assert_eq!(eval(&mut session, "f 1"), Datum::Text("positive".into()));
    assert_eq!(eval(&mut session, "f 0"), Datum::Text("other".into()));
}

/// Each invocation's return targets its own frame: recursion unwinds one
/// level at a time.
#[test]
fn recursive_functions_return_independently() {
    let mut session = Session::new();
    eval(
        &mut session,
        "fact: func [n] [if n <= 1 [return 1] n * fact n - 1]",
    );
    assert_eq!(eval(&mut session, "fact 5"), Datum::Integer(120));
}

/// does makes a zero-parameter action.
#[test]
fn does_takes_no_arguments() {
    let mut session = Session::new();
    eval(&mut session, "f: does [7]");
    assert_eq!(eval(&mut session, "f 1 + 1"), Datum::Integer(2), "f consumed nothing");
    assert_eq!(eval(&mut session, "f"), Datum::Integer(7));
}

/// Hard-quoted parameters take the next cell literally; soft-quoted ones
/// evaluate groups.
#[test]
fn quoting_parameter_classes() {
    let mut session = Session::new();
    eval(&mut session, "hard: func ['w] [w]");
    assert_eq!(eval(&mut session, "type-of hard some-word"), Datum::Word("word!".into()));
    eval(&mut session, "soft: func [:w] [w]");
    assert_eq!(eval(&mut session, "soft (1 + 1)"), Datum::Integer(2), "groups evaluate for soft quotes");
    assert_eq!(eval(&mut session, "type-of soft plain"), Datum::Word("word!".into()));
}

/// Argument typesets reject wrong kinds.
#[test]
fn typeset_checking_rejects() {
    let mut session = Session::new();
    eval(&mut session, "f: func [n [integer!]] [n]");
    assert_eq!(eval(&mut session, "f 3"), Datum::Integer(3));
    let err = session.execute("f \"nope\"", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "expect-arg");
}

/// Too few arguments at the end of input is a need-non-end error.
#[test]
fn missing_argument_errors() {
    let mut session = Session::new();
    eval(&mut session, "f: func [a b] [a]");
    let err = session.execute("f 1", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "need-non-end");
}

/// A copy of body content derelativizes its words to the invocation frame.
/// Once that frame ends un-reified, reading through the copied word is a
/// reported inaccessible error, never a stale read.
#[test]
fn copied_body_words_report_dead_frames() {
    let mut session = Session::new();
    eval(&mut session, "f: func [n] [copy [n]]");
    eval(&mut session, "blk: f 42");
    let err = session.execute("get pick blk 1", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "inaccessible", "dead frame access must be a reported error");
}

/// make frame! reifies an action's parameter frame; do runs it.
#[test]
fn frames_are_first_class() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [x /b y] [reduce [x y]]");
    eval(&mut session, "fr: make frame! :foo");
    eval(&mut session, "fr/x: 1");
    assert_eq!(
        eval(&mut session, "do fr"),
        Datum::Block(vec![Datum::Integer(1), Datum::Null])
    );
    // The frame survives and can run again with changed slots.
    eval(&mut session, "fr/x: 2");
    assert_eq!(
        eval(&mut session, "do fr"),
        Datum::Block(vec![Datum::Integer(2), Datum::Null])
    );
}

/// words-of an action lists its visible parameters.
#[test]
fn words_of_action_reflects_parameters() {
    let mut session = Session::new();
    eval(&mut session, "foo: func [x /b y] [x]");
    assert_eq!(
        eval(&mut session, "words-of :foo"),
        Datum::Block(vec![
            Datum::Word("x".into()),
            Datum::Word("b".into()),
            Datum::Word("y".into()),
        ])
    );
}

/// adapt runs a prelude in the frame before the base action.
#[test]
fn adapt_preprocesses_arguments() {
    let mut session = Session::new();
    eval(&mut session, "base: func [n] [n * 10]");
    eval(&mut session, "bumped: adapt :base [n: n + 1]");
    assert_eq!(eval(&mut session, "bumped 4"), Datum::Integer(50));
    assert_eq!(eval(&mut session, "base 4"), Datum::Integer(40), "the base is untouched");
}

/// hijack re-routes every existing reference to the victim.
#[test]
fn hijack_reroutes_existing_references() {
    let mut session = Session::new();
    eval(&mut session, "old: func [n] [n + 1]");
    eval(&mut session, "alias: :old");
    eval(&mut session, "new: func [n] [n * 100]");
    eval(&mut session, "hijack :old :new");
    assert_eq!(eval(&mut session, "old 3"), Datum::Integer(300));
    assert_eq!(
        eval(&mut session, "alias 3"),
        Datum::Integer(300),
        "previously captured references follow the hijack"
    );
}

/// chain pipes the first action's result through the rest.
#[test]
fn chain_pipes_results() {
    let mut session = Session::new();
    eval(&mut session, "inc: func [n] [n + 1]");
    eval(&mut session, "dbl: func [n] [n * 2]");
    eval(&mut session, "both: chain [:inc :dbl]");
    assert_eq!(eval(&mut session, "both 5"), Datum::Integer(12));
}
