//! End-to-end evaluator behavior through the public session: stepping,
//! enfix lookahead, set-words, groups, paths, invisibles, and objects.

use rell::{Datum, NoPrint, Session};

fn eval(session: &mut Session, code: &str) -> Datum {
    session
        .execute(code, &mut NoPrint)
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"))
}

fn eval_one(code: &str) -> Datum {
    eval(&mut Session::new(), code)
}

/// Evaluating `[1 + 2]` with the standard lib produces integer 3.
#[test]
fn arithmetic_through_evaluator() {
    assert_eq!(eval_one("1 + 2"), Datum::Integer(3));
}

/// Operators associate left-to-right: ops take tight right arguments.
#[test]
fn operators_associate_left() {
    assert_eq!(eval_one("1 + 2 * 3"), Datum::Integer(9));
    assert_eq!(eval_one("10 - 4 - 3"), Datum::Integer(3));
}

/// Prefix function calls bind looser than operators on their arguments.
#[test]
fn prefix_call_with_operator_argument() {
    assert_eq!(eval_one("add 1 2 * 3"), Datum::Integer(7));
}

/// Division widens to decimal only when inexact.
#[test]
fn division_stays_integral_when_exact() {
    assert_eq!(eval_one("10 / 2"), Datum::Integer(5));
    assert_eq!(eval_one("10 / 4"), Datum::Decimal(2.5));
}

/// Dividing by zero raises zero-divide.
#[test]
fn zero_divide_reports() {
    let err = Session::new().execute("1 / 0", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "zero-divide");
}

/// A set-word evaluates the following full expression and stores it.
#[test]
fn set_word_takes_full_expression() {
    let mut session = Session::new();
    assert_eq!(eval(&mut session, "x: 1 + 2"), Datum::Integer(3));
    assert_eq!(eval(&mut session, "x"), Datum::Integer(3));
}

/// Variables persist across session executes.
#[test]
fn session_state_persists() {
    let mut session = Session::new();
    eval(&mut session, "x: 42");
    assert_eq!(eval(&mut session, "x + 1"), Datum::Integer(43));
}

/// Groups evaluate eagerly; blocks stay inert.
#[test]
fn groups_evaluate_blocks_do_not() {
    assert_eq!(eval_one("(1 + 2)"), Datum::Integer(3));
    let block = eval_one("[1 + 2]");
    let Datum::Block(items) = block else {
        panic!("expected a block, got {block:?}");
    };
    assert_eq!(items.len(), 3, "block contents are unevaluated");
}

/// A get-word fetches without invoking; an unset get-word reads null.
#[test]
fn get_word_is_inert_fetch() {
    let mut session = Session::new();
    eval(&mut session, "f: func [] [99]");
    assert_eq!(eval(&mut session, "f"), Datum::Integer(99), "plain word invokes");
    let fetched = eval(&mut session, ":f");
    assert!(
        matches!(fetched, Datum::Opaque(_)),
        "get-word yields the action itself, got {fetched:?}"
    );
}

/// Evaluating an unset word is a no-value error; an unknown word is
/// attached to the user context by a set-word but reading it first fails.
#[test]
fn unset_word_errors() {
    let err = Session::new().execute("definitely-unset-word", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "not-bound");
}

/// Quoted values lose one level per evaluation.
#[test]
fn quote_strips_one_level() {
    let mut session = Session::new();
    eval(&mut session, "w: 'foo");
    assert_eq!(eval(&mut session, "type-of w"), Datum::Word("word!".into()));
    eval(&mut session, "q: ''foo");
    assert_eq!(eval(&mut session, "type-of q"), Datum::Word("quoted!".into()));
}

/// Invisible expressions leave the previous result in place.
#[test]
fn comment_and_elide_are_invisible() {
    assert_eq!(eval_one("3 comment \"ignored\""), Datum::Integer(3));
    assert_eq!(eval_one("3 elide 1 + 1"), Datum::Integer(3));
    assert_eq!(
        eval_one("x: 5 comment [not evaluated] x"),
        Datum::Integer(5),
        "comments between expressions do not disturb flow"
    );
}

/// Conditionals: if returns null on a false condition.
#[test]
fn if_and_either() {
    assert_eq!(eval_one("if true [1]"), Datum::Integer(1));
    assert_eq!(eval_one("if false [1]"), Datum::Null);
    assert_eq!(eval_one("either 1 < 2 [\"yes\"] [\"no\"]"), Datum::Text("yes".into()));
}

/// any takes the first truthy value; all needs every one truthy.
#[test]
fn any_and_all_shortcut() {
    assert_eq!(eval_one("any [false null 7 8]"), Datum::Integer(7));
    assert_eq!(eval_one("any [false null]"), Datum::Null);
    assert_eq!(eval_one("all [1 2 3]"), Datum::Integer(3));
    assert_eq!(eval_one("all [1 false 3]"), Datum::Null);
}

/// reduce evaluates each expression into a new block.
#[test]
fn reduce_builds_evaluated_block() {
    assert_eq!(
        eval_one("reduce [1 + 1 2 * 3]"),
        Datum::Block(vec![Datum::Integer(2), Datum::Integer(6)])
    );
}

/// Objects construct from set-word blocks; paths pick fields.
#[test]
fn objects_and_field_paths() {
    let mut session = Session::new();
    eval(&mut session, "obj: make object! [a: 10 b: 20]");
    assert_eq!(eval(&mut session, "obj/a"), Datum::Integer(10));
    assert_eq!(eval(&mut session, "obj/b + obj/a"), Datum::Integer(30));
    eval(&mut session, "obj/a: 11");
    assert_eq!(eval(&mut session, "obj/a"), Datum::Integer(11));
}

/// Methods close over their object when invoked through a path.
#[test]
fn object_methods_invoke_through_paths() {
    let mut session = Session::new();
    eval(&mut session, "counter: make object! [n: 0 bump: func [] [n: n + 1]]");
    eval(&mut session, "counter/bump counter/bump");
    assert_eq!(eval(&mut session, "counter/n"), Datum::Integer(2));
}

/// Blocks pick by integer (1-based) and select by word.
#[test]
fn block_paths_pick_and_select() {
    let mut session = Session::new();
    eval(&mut session, "blk: [10 x 30]");
    assert_eq!(eval(&mut session, "blk/1"), Datum::Integer(10));
    assert_eq!(eval(&mut session, "blk/x"), Datum::Integer(30), "word select takes the next value");
    assert_eq!(eval(&mut session, "pick blk 99"), Datum::Null, "past-end pick is null");
}

/// Maps read through paths; tombstoned keys are invisible.
#[test]
fn map_paths_and_tombstones() {
    let mut session = Session::new();
    eval(&mut session, "m: make map! [alpha 1 beta 2]");
    assert_eq!(eval(&mut session, "m/alpha"), Datum::Integer(1));
    eval(&mut session, "put m 'alpha null");
    assert_eq!(eval(&mut session, "m/alpha"), Datum::Null, "tombstoned key reads absent");
    assert_eq!(eval(&mut session, "length-of m"), Datum::Integer(1));
    eval(&mut session, "put m 'alpha 9");
    assert_eq!(eval(&mut session, "m/alpha"), Datum::Integer(9), "reinsert revives the key");
}

/// length-of a blank reports null, not zero.
#[test]
fn length_of_blank_is_null() {
    assert_eq!(eval_one("length-of _"), Datum::Null);
    assert_eq!(eval_one("length-of [1 2 3]"), Datum::Integer(3));
}

/// Series positions: head, tail, next, skip, index-of.
#[test]
fn series_positions() {
    let mut session = Session::new();
    eval(&mut session, "s: [a b c d]");
    assert_eq!(eval(&mut session, "index-of s"), Datum::Integer(1));
    assert_eq!(eval(&mut session, "index-of next s"), Datum::Integer(2));
    assert_eq!(eval(&mut session, "index-of skip s 3"), Datum::Integer(4));
    assert_eq!(eval(&mut session, "index-of tail s"), Datum::Integer(5));
    assert_eq!(eval(&mut session, "index-of back tail s"), Datum::Integer(4));
    assert_eq!(eval(&mut session, "length-of next s"), Datum::Integer(3));
}

/// append and insert mutate; copies are pointer-distinct and equal.
#[test]
fn append_insert_copy() {
    let mut session = Session::new();
    eval(&mut session, "s: copy [1 2]");
    eval(&mut session, "append s 3");
    assert_eq!(
        eval(&mut session, "s"),
        Datum::Block(vec![Datum::Integer(1), Datum::Integer(2), Datum::Integer(3)])
    );
    eval(&mut session, "append/dup s 0 2");
    assert_eq!(eval(&mut session, "length-of s"), Datum::Integer(5));
    eval(&mut session, "t: copy s");
    eval(&mut session, "append t 99");
    assert_eq!(
        eval(&mut session, "length-of s"),
        Datum::Integer(5),
        "copy must not alias the source"
    );
    // copy of a copy equals the copy but is distinct storage
    assert_eq!(eval(&mut session, "equal? copy s copy copy s"), Datum::Logic(true));
}

/// Appending a block splices unless /only.
#[test]
fn append_splices_blocks() {
    let mut session = Session::new();
    eval(&mut session, "s: copy [1]");
    eval(&mut session, "append s [2 3]");
    assert_eq!(eval(&mut session, "length-of s"), Datum::Integer(3));
    eval(&mut session, "append/only s [4 5]");
    assert_eq!(eval(&mut session, "length-of s"), Datum::Integer(4));
    let Datum::Block(items) = eval(&mut session, "s") else { panic!() };
    assert!(matches!(items[3], Datum::Block(_)), "/only keeps the block whole");
}

/// Mutating a protected series is a locked error.
#[test]
fn protect_blocks_mutation() {
    let mut session = Session::new();
    eval(&mut session, "s: copy [1 2]");
    eval(&mut session, "protect s");
    let err = session.execute("append s 3", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "locked");
}

/// The halt signal raises at the next step boundary.
#[test]
fn halt_native_stops_evaluation() {
    let err = Session::new().execute("halt 1 + 2", &mut NoPrint).unwrap_err();
    assert_eq!(err.id, "halt");
}

/// print collects into the provided writer.
#[test]
fn print_output_reaches_writer() {
    let mut session = Session::new();
    let mut collector = rell::CollectStringPrint::new();
    session.execute("print \"hello\" print [1 + 1 \"two\"]", &mut collector).unwrap();
    assert_eq!(collector.contents(), "hello\n2 two\n");
}

/// String indexing is by codepoint, not byte.
#[test]
fn strings_index_by_codepoint() {
    let mut session = Session::new();
    eval(&mut session, "s: \"a\u{20ac}b\"");
    assert_eq!(eval(&mut session, "length-of s"), Datum::Integer(3));
    assert_eq!(eval(&mut session, "pick s 2"), Datum::Char('\u{20ac}'));
    assert_eq!(eval(&mut session, "pick s 3"), Datum::Char('b'));
    eval(&mut session, "insert s #\"x\"");
    assert_eq!(eval(&mut session, "pick s 1"), Datum::Char('x'));
    assert_eq!(eval(&mut session, "length-of s"), Datum::Integer(4));
}

/// Errors carry the script name the source was executed under.
#[test]
fn errors_carry_provenance() {
    let err = Session::new().execute("1 / 0", &mut NoPrint).unwrap_err();
    assert_eq!(err.file.as_deref(), Some("user"));
}
