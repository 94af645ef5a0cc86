//! Session lifecycle: persistence, snapshots, variable listing, halt,
//! resource limits, and binder hygiene observable from outside.

use pretty_assertions::assert_eq;
use rell::{CollectStringPrint, Datum, NoPrint, ResourceLimits, Session, Tracker};

fn eval(session: &mut Session, code: &str) -> Datum {
    session
        .execute(code, &mut NoPrint)
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"))
}

/// A fresh session has no user variables.
#[test]
fn fresh_session_is_empty() {
    let session = Session::new();
    assert!(session.list_variables().is_empty());
}

/// Assignments appear in the variable listing.
#[test]
fn variables_are_listed() {
    let mut session = Session::new();
    eval(&mut session, "alpha: 1 beta: 2");
    assert_eq!(session.list_variables(), vec!["alpha".to_owned(), "beta".to_owned()]);
}

/// Functions defined in one execute are callable in the next.
#[test]
fn definitions_persist_across_executes() {
    let mut session = Session::new();
    eval(&mut session, "triple: func [n] [n * 3]");
    assert_eq!(eval(&mut session, "triple 7"), Datum::Integer(21));
}

/// dump/load round-trips the whole interpreter state: variables,
/// functions, and heap survive the snapshot.
#[test]
fn snapshots_round_trip() {
    let mut session = Session::new();
    eval(&mut session, "x: [1 2 3]");
    eval(&mut session, "double: func [n] [n * 2]");

    let bytes = session.dump().expect("snapshot serializes");
    let mut restored = Session::load(&bytes).expect("snapshot restores");

    assert_eq!(
        eval(&mut restored, "x"),
        Datum::Block(vec![Datum::Integer(1), Datum::Integer(2), Datum::Integer(3)])
    );
    assert_eq!(eval(&mut restored, "double 21"), Datum::Integer(42));
    // The original keeps working independently.
    eval(&mut session, "x: 0");
    assert_eq!(
        eval(&mut restored, "length-of x"),
        Datum::Integer(3),
        "restored session is isolated from the original"
    );
}

/// A requested halt fires at the next step boundary of the next run.
#[test]
fn requested_halt_interrupts() {
    let mut session = Session::new();
    session.request_halt();
    let err = session.execute("1 + 2", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "halt");
    // The session recovers afterward.
    assert_eq!(eval(&mut session, "1 + 2"), Datum::Integer(3));
}

/// Recursion beyond the tracker's depth limit raises a resource error
/// instead of overflowing the host stack.
#[test]
fn recursion_limit_reports() {
    let mut session = Session::with_tracker(Tracker::limited(ResourceLimits {
        max_heap_slots: None,
        max_memory_bytes: None,
        max_recursion_depth: 40,
    }))
    .expect("limited startup");
    eval(&mut session, "loop-forever: func [] [loop-forever]");
    let err = session.execute("loop-forever", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "resource-limit");
}

/// Print output reaches the writer passed to that execute, not later ones.
#[test]
fn output_drains_per_execute() {
    let mut session = Session::new();
    let mut first = CollectStringPrint::new();
    session.execute("print \"one\"", &mut first).unwrap();
    let mut second = CollectStringPrint::new();
    session.execute("1 + 1", &mut second).unwrap();
    assert_eq!(first.contents(), "one\n");
    assert_eq!(second.contents(), "");
}

/// execute_molded is the REPL's read-eval-mold loop.
#[test]
fn execute_molded_renders_results() {
    let mut session = Session::new();
    assert_eq!(
        session.execute_molded("1 + 2", &mut NoPrint).unwrap(),
        "3"
    );
    assert_eq!(
        session.execute_molded("reduce [1 + 1]", &mut NoPrint).unwrap(),
        "[2]"
    );
}

/// Syntax errors from the scanner surface as reports, and the session
/// stays usable.
#[test]
fn scan_errors_are_reported() {
    let mut session = Session::new();
    let err = session.execute("[1 2", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "syntax");
    assert_eq!(eval(&mut session, "1"), Datum::Integer(1));
}

/// The symbol table only grows; case variants of one word share identity
/// observable through case-insensitive lookup.
#[test]
fn words_are_case_insensitive() {
    let mut session = Session::new();
    eval(&mut session, "Value: 5");
    assert_eq!(eval(&mut session, "VALUE + value"), Datum::Integer(10));
}
