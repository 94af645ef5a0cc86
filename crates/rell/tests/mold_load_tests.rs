//! Mold/load round-trips: for every round-trippable kind, molding and
//! re-scanning produces a structurally equal value.

use rell::{Datum, NoPrint, Session};

fn eval(session: &mut Session, code: &str) -> Datum {
    session
        .execute(code, &mut NoPrint)
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"))
}

/// Checks `equal? x first load mold x` for an expression producing x.
fn assert_round_trips(session: &mut Session, expr: &str) {
    let code = format!("x: {expr} equal? x first load mold x");
    assert_eq!(
        eval(session, &code),
        Datum::Logic(true),
        "{expr} failed to round-trip through mold/load"
    );
}

#[test]
fn scalars_round_trip() {
    let mut session = Session::new();
    for expr in [
        "42",
        "-17",
        "3.25",
        "1.5e10",
        "#\"a\"",
        "#\"^/\"",
        "1x2",
        "1.2.3",
        "0:30:15.25",
        "12-Jan-2000",
        "true",
        "false",
        "_",
    ] {
        assert_round_trips(&mut session, expr);
    }
}

#[test]
fn strings_round_trip_both_forms() {
    let mut session = Session::new();
    for expr in [
        "\"simple\"",
        "\"with ^\"quotes^\" inside\"",
        "\"tab^-and^/newline\"",
        "{braced form because this string is long enough to pass the cutoff}",
        "\"control ^(001e) char\"",
    ] {
        assert_round_trips(&mut session, expr);
    }
}

#[test]
fn words_and_arrays_round_trip() {
    let mut session = Session::new();
    for expr in [
        "'some-word",
        "[1 2 three \"four\"]",
        "[nested [blocks [deeply]]]",
        "'a/b/c",
        "[x: 1 :y @z]",
        "[(grouped 1 2)]",
    ] {
        assert_round_trips(&mut session, expr);
    }
}

#[test]
fn binaries_files_tags_round_trip() {
    let mut session = Session::new();
    for expr in ["#{DEADBEEF}", "#{}", "%dir/name.txt", "<a href=\"x\">", "#issue-word"] {
        assert_round_trips(&mut session, expr);
    }
}

#[test]
fn quoted_values_round_trip_with_depth() {
    let mut session = Session::new();
    for expr in ["''double", "'''[deep]"] {
        assert_round_trips(&mut session, expr);
    }
}

/// Quoting laws: quoting increments depth by one, evaluation strips one.
#[test]
fn quote_depth_laws() {
    let mut session = Session::new();
    eval(&mut session, "q: '''x");
    assert_eq!(eval(&mut session, "type-of q"), Datum::Word("quoted!".into()));
    // Evaluating the literal stripped one level on the way to storage.
    assert_eq!(
        eval(&mut session, "mold q"),
        Datum::Text("''x".into()),
        "storage consumed one quoting level at assignment"
    );
}

/// Molded output is canonical: specific expected renderings.
#[test]
fn canonical_mold_forms() {
    let mut session = Session::new();
    let cases = [
        ("mold 3.0", "3.0"),
        ("mold [1   2    3]", "[1 2 3]"),
        ("mold \"a\"", "\"a\""),
        ("mold #{00FF}", "#{00FF}"),
        ("mold 'word", "word"),
        ("mold first [x:]", "x:"),
        ("mold first [:x]", ":x"),
        ("mold 1:02:03", "1:02:03"),
        ("mold 12-Jan-2000", "12-Jan-2000"),
    ];
    for (code, expected) in cases {
        assert_eq!(
            eval(&mut session, code),
            Datum::Text(expected.into()),
            "{code} molded unexpectedly"
        );
    }
}

/// Events mold in constructor notation and round-trip through `do`:
/// the molded form re-evaluates to a structurally equal event.
#[test]
fn events_round_trip_through_do() {
    let mut session = Session::new();
    eval(&mut session, "x: make event! [type: read code: 3 data: 7]");
    assert_eq!(eval(&mut session, "type-of x"), Datum::Word("event!".into()));
    assert_eq!(
        eval(&mut session, "mold x"),
        Datum::Text("make event! [type: read code: 3 data: 7]".into())
    );
    assert_eq!(
        eval(&mut session, "equal? x do load mold x"),
        Datum::Logic(true),
        "constructor notation must rebuild an equal event"
    );
}

/// Event construction rejects unknown fields and types.
#[test]
fn event_construction_is_checked() {
    let mut session = Session::new();
    let err = session
        .execute("make event! [shape: 1]", &mut NoPrint)
        .unwrap_err();
    assert_eq!(err.id, "bad-make");
    let err = session
        .execute("make event! [type: sideways]", &mut NoPrint)
        .unwrap_err();
    assert_eq!(err.id, "bad-make");
}

/// Molding an error stringifies through the mold machinery.
#[test]
fn errors_mold_as_contexts() {
    let mut session = Session::new();
    eval(&mut session, "e: trap [1 / 0]");
    let Datum::Text(molded) = eval(&mut session, "mold e") else {
        panic!("mold yields text");
    };
    assert!(molded.starts_with("make error! ["), "got: {molded}");
    assert!(molded.contains("zero-divide"), "got: {molded}");
}
