//! Canonical molding: rendering any value as source text.
//!
//! Kinds declared round-trippable — scalars, words, strings, files, urls,
//! tags, emails, issues, binaries, blocks/groups/paths, logic, blank, pair,
//! tuple, time, date, quoted — scan back to a structurally equal value.
//! Contexts, actions, maps, and the internal kinds mold as `make ...`
//! constructor notation for human eyes and make no round-trip promise.
//!
//! Strings mold with paired quotes when short and newline-poor, else with
//! braces; non-printables escape as `^(xxxx)`, as do U+001E and U+FEFF.

use std::fmt::Write;

use crate::{
    context::context_keys,
    heap::{Heap, HeapId},
    intern::Interner,
    value::{CtxKind, Kind, SeqKind, StrandKind, Value, WordKind, quoted_payload},
};

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Molds a value to its canonical source form.
#[must_use]
pub fn mold(heap: &Heap, interner: &Interner, value: &Value) -> String {
    let mut buf = String::new();
    mold_into(heap, interner, value, &mut buf);
    buf
}

/// Forms a value: human-oriented rendering. Strings drop their delimiters,
/// blocks drop their brackets; everything else molds.
#[must_use]
pub fn form(heap: &Heap, interner: &Interner, value: &Value) -> String {
    match value {
        Value::Strand(s) => heap.text(s.series).str_from(s.index).to_owned(),
        Value::Seq(s) if s.kind == SeqKind::Block => {
            let cells: Vec<Value> = heap.array(s.series).slice_from(s.index).to_vec();
            cells
                .iter()
                .map(|cell| form(heap, interner, cell))
                .collect::<Vec<_>>()
                .join(" ")
        }
        Value::Char(c) => c.to_string(),
        other => mold(heap, interner, other),
    }
}

pub fn mold_into(heap: &Heap, interner: &Interner, value: &Value, buf: &mut String) {
    match value {
        Value::Unset => buf.push_str("~unset~"),
        Value::PartialRefinement { symbol, .. } => {
            buf.push('/');
            buf.push_str(interner.spelling(*symbol));
        }
        Value::Null => buf.push_str("~null~"),
        Value::Blank => buf.push('_'),
        Value::Logic(b) => buf.push_str(if *b { "#[true]" } else { "#[false]" }),
        Value::Integer(n) => {
            let _ = write!(buf, "{n}");
        }
        Value::Decimal(d) => {
            let mut ryu_buf = ryu::Buffer::new();
            buf.push_str(ryu_buf.format(*d));
        }
        Value::Char(c) => mold_char(*c, buf),
        Value::Time(nanos) => mold_time(*nanos, buf),
        Value::Date(d) => {
            let _ = write!(buf, "{}-{}-{}", d.day, MONTH_NAMES[(d.month - 1) as usize], d.year);
            if let Some(nanos) = d.nanos {
                buf.push('/');
                mold_time(nanos, buf);
                if let Some(zone) = d.zone {
                    let sign = if zone < 0 { '-' } else { '+' };
                    let _ = write!(buf, "{sign}{}:{:02}", zone.abs() / 60, zone.abs() % 60);
                }
            }
        }
        Value::Pair(x, y) => {
            mold_pair_part(*x, buf);
            buf.push('x');
            mold_pair_part(*y, buf);
        }
        Value::Tuple(t) => {
            let parts: Vec<String> = t.as_slice().iter().map(u8::to_string).collect();
            buf.push_str(&parts.join("."));
        }
        Value::Datatype(kind) => buf.push_str(<&'static str>::from(*kind)),
        Value::Typeset(ts) => {
            buf.push_str("make typeset! [");
            let names: Vec<&str> = ts.kinds().map(<&'static str>::from).collect();
            buf.push_str(&names.join(" "));
            buf.push(']');
        }
        Value::Word(w) => {
            let spelling = interner.spelling(w.symbol);
            match w.kind {
                WordKind::Plain => buf.push_str(spelling),
                WordKind::Set => {
                    buf.push_str(spelling);
                    buf.push(':');
                }
                WordKind::Get => {
                    buf.push(':');
                    buf.push_str(spelling);
                }
                WordKind::Sym => {
                    buf.push('@');
                    buf.push_str(spelling);
                }
            }
        }
        Value::Seq(s) => mold_seq(heap, interner, s, buf),
        Value::Strand(s) => mold_strand(heap, s, buf),
        Value::Binary(b) => {
            buf.push_str("#{");
            for byte in heap.binary(b.series).slice_from(b.index) {
                let _ = write!(buf, "{byte:02X}");
            }
            buf.push('}');
        }
        Value::Context(c) => mold_context(heap, interner, c.kind, c.varlist, buf),
        Value::Action(a) => {
            buf.push_str("make action! [");
            if let Some(name) = heap.action_body(a.action).name {
                buf.push_str(interner.spelling(name));
            }
            buf.push(']');
        }
        Value::Map(id) => {
            buf.push_str("make map! [");
            let pairs = heap.map(*id).pairs().to_vec();
            let mut first = true;
            for pair in pairs.chunks_exact(2) {
                if matches!(pair[1], Value::Null) {
                    continue;
                }
                if !first {
                    buf.push(' ');
                }
                first = false;
                mold_into(heap, interner, &pair[0], buf);
                buf.push(' ');
                mold_into(heap, interner, &pair[1], buf);
            }
            buf.push(']');
        }
        Value::Bitset(id) => {
            buf.push_str("make bitset! #{");
            match heap.get(*id) {
                crate::heap::HeapData::Bitset(bs) => {
                    for byte in &bs.bits {
                        let _ = write!(buf, "{byte:02X}");
                    }
                }
                other => panic!("bitset value points at a {} node", other.flavor_name()),
            }
            buf.push('}');
        }
        Value::Varargs(_) => buf.push_str("make varargs! [...]"),
        Value::Handle(_) => buf.push_str("#[handle!]"),
        Value::Event(e) => {
            let _ = write!(buf, "make event! [type: {} code: {} data: {}]", e.etype, e.code, e.data);
        }
        Value::Quoted(q) => {
            for _ in 0..q.depth {
                buf.push('\'');
            }
            let inner = quoted_payload(heap, *q);
            mold_into(heap, interner, &inner, buf);
        }
    }
}

fn mold_pair_part(v: f64, buf: &mut String) {
    if v.fract() == 0.0 {
        let _ = write!(buf, "{}", v as i64);
    } else {
        let mut ryu_buf = ryu::Buffer::new();
        buf.push_str(ryu_buf.format(v));
    }
}

fn mold_seq(heap: &Heap, interner: &Interner, s: &crate::value::Seq, buf: &mut String) {
    let cells: Vec<Value> = heap.array(s.series).slice_from(s.index).to_vec();
    match s.kind {
        SeqKind::Block | SeqKind::SetBlock | SeqKind::GetBlock | SeqKind::SymBlock => {
            if s.kind == SeqKind::GetBlock {
                buf.push(':');
            }
            if s.kind == SeqKind::SymBlock {
                buf.push('@');
            }
            buf.push('[');
            mold_cells(heap, interner, &cells, buf);
            buf.push(']');
            if s.kind == SeqKind::SetBlock {
                buf.push(':');
            }
        }
        SeqKind::Group | SeqKind::SetGroup | SeqKind::GetGroup | SeqKind::SymGroup => {
            if s.kind == SeqKind::GetGroup {
                buf.push(':');
            }
            if s.kind == SeqKind::SymGroup {
                buf.push('@');
            }
            buf.push('(');
            mold_cells(heap, interner, &cells, buf);
            buf.push(')');
            if s.kind == SeqKind::SetGroup {
                buf.push(':');
            }
        }
        SeqKind::Path | SeqKind::SetPath | SeqKind::GetPath | SeqKind::SymPath => {
            if s.kind == SeqKind::GetPath {
                buf.push(':');
            }
            if s.kind == SeqKind::SymPath {
                buf.push('@');
            }
            for (i, cell) in cells.iter().enumerate() {
                if i > 0 {
                    buf.push('/');
                }
                // A blank path head renders as nothing: /refinement form.
                if i == 0 && matches!(cell, Value::Blank) {
                    continue;
                }
                mold_into(heap, interner, cell, buf);
            }
            if s.kind == SeqKind::SetPath {
                buf.push(':');
            }
        }
    }
}

fn mold_cells(heap: &Heap, interner: &Interner, cells: &[Value], buf: &mut String) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            buf.push(' ');
        }
        mold_into(heap, interner, cell, buf);
    }
}

fn mold_strand(heap: &Heap, s: &crate::value::Strand, buf: &mut String) {
    let content = heap.text(s.series).str_from(s.index);
    match s.kind {
        StrandKind::Text => mold_text(content, buf),
        StrandKind::File => {
            buf.push('%');
            buf.push_str(content);
        }
        StrandKind::Url | StrandKind::Email => buf.push_str(content),
        StrandKind::Tag => {
            buf.push('<');
            buf.push_str(content);
            buf.push('>');
        }
        StrandKind::Issue => {
            buf.push('#');
            buf.push_str(content);
        }
    }
}

/// Quoted form for short, newline-poor strings; braced form otherwise.
fn mold_text(content: &str, buf: &mut String) {
    let braced = content.contains('\n') || content.len() > 64;
    if braced {
        buf.push('{');
        for c in content.chars() {
            match c {
                '{' => buf.push_str("^{"),
                '}' => buf.push_str("^}"),
                '^' => buf.push_str("^^"),
                c => push_escaped(c, buf),
            }
        }
        buf.push('}');
    } else {
        buf.push('"');
        for c in content.chars() {
            match c {
                '"' => buf.push_str("^\""),
                '^' => buf.push_str("^^"),
                c => push_escaped(c, buf),
            }
        }
        buf.push('"');
    }
}

/// Shared escape policy: newline and tab have short names; other control
/// characters, U+001E, and U+FEFF escape as `^(xxxx)`.
fn push_escaped(c: char, buf: &mut String) {
    match c {
        '\n' => buf.push_str("^/"),
        '\t' => buf.push_str("^-"),
        '\u{1e}' | '\u{feff}' => {
            let _ = write!(buf, "^({:04x})", c as u32);
        }
        c if (c as u32) < 0x20 => {
            let _ = write!(buf, "^({:04x})", c as u32);
        }
        c => buf.push(c),
    }
}

fn mold_char(c: char, buf: &mut String) {
    buf.push_str("#\"");
    match c {
        '"' => buf.push_str("^\""),
        '^' => buf.push_str("^^"),
        c => push_escaped(c, buf),
    }
    buf.push('"');
}

fn mold_time(nanos: i64, buf: &mut String) {
    let mut n = nanos;
    if n < 0 {
        buf.push('-');
        n = -n;
    }
    let hours = n / 3_600_000_000_000;
    let minutes = (n / 60_000_000_000) % 60;
    let seconds = (n / 1_000_000_000) % 60;
    let frac = n % 1_000_000_000;
    let _ = write!(buf, "{hours}:{minutes:02}:{seconds:02}");
    if frac != 0 {
        let digits = format!("{frac:09}");
        let trimmed = digits.trim_end_matches('0');
        let _ = write!(buf, ".{trimmed}");
    }
}

fn mold_context(heap: &Heap, interner: &Interner, kind: CtxKind, varlist: HeapId, buf: &mut String) {
    let type_name = match kind {
        CtxKind::Object => "object!",
        CtxKind::Module => "module!",
        CtxKind::Error => "error!",
        CtxKind::Frame => "frame!",
        CtxKind::Port => "port!",
    };
    let _ = write!(buf, "make {type_name} [");
    let ctx = heap.ctx(varlist);
    if ctx.inaccessible {
        buf.push_str("...]");
        return;
    }
    let keys = context_keys(heap, varlist);
    let vars = ctx.vars.clone();
    let mut first = true;
    for (pos, key) in keys.iter().enumerate() {
        if key.hidden {
            continue;
        }
        let value = vars[pos + 1];
        if value.is_unset() {
            continue;
        }
        if !first {
            buf.push(' ');
        }
        first = false;
        buf.push_str(interner.spelling(key.symbol));
        buf.push_str(": ");
        mold_into(heap, interner, &value, buf);
    }
    buf.push(']');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        heap::{Heap, HeapData},
        resource::Tracker,
        series::Array,
        strings::Text,
        value::{Seq, Strand, Tuple},
    };

    fn setup() -> (Heap, Interner) {
        (Heap::new(Tracker::NoLimit), Interner::new())
    }

    #[test]
    fn scalars_mold_canonically() {
        let (heap, interner) = setup();
        assert_eq!(mold(&heap, &interner, &Value::Integer(42)), "42");
        assert_eq!(mold(&heap, &interner, &Value::Decimal(3.0)), "3.0");
        assert_eq!(mold(&heap, &interner, &Value::Blank), "_");
        assert_eq!(mold(&heap, &interner, &Value::Logic(true)), "#[true]");
        assert_eq!(mold(&heap, &interner, &Value::Tuple(Tuple::from_parts(&[1, 2, 3]))), "1.2.3");
        assert_eq!(mold(&heap, &interner, &Value::Pair(1.0, 2.0)), "1x2");
    }

    #[test]
    fn time_molds_with_fraction_trimmed() {
        let (heap, interner) = setup();
        let t = 1 * 3_600_000_000_000 + 2 * 60_000_000_000 + 3_500_000_000;
        assert_eq!(mold(&heap, &interner, &Value::Time(t)), "1:02:03.5");
    }

    #[test]
    fn short_strings_quote_long_strings_brace() {
        let (mut heap, interner) = setup();
        let short = heap.alloc(HeapData::Text(Text::from_str("hi \"you\""))).unwrap();
        let molded = mold(&heap, &interner, &Value::text(short));
        assert_eq!(molded, "\"hi ^\"you^\"\"");
        let long = heap
            .alloc(HeapData::Text(Text::from_str("line one\nline two")))
            .unwrap();
        let molded = mold(&heap, &interner, &Value::text(long));
        assert_eq!(molded, "{line one^/line two}");
    }

    #[test]
    fn control_chars_escape_hex() {
        let (mut heap, interner) = setup();
        let s = heap.alloc(HeapData::Text(Text::from_str("a\u{1e}b"))).unwrap();
        assert_eq!(mold(&heap, &interner, &Value::text(s)), "\"a^(001e)b\"");
    }

    #[test]
    fn blocks_and_paths_mold_with_structure() {
        let (mut heap, mut interner) = setup();
        let a = interner.intern("a");
        let b = interner.intern("b");
        let path = heap
            .alloc(HeapData::Array(Array::from_values(vec![
                Value::word(WordKind::Plain, a),
                Value::word(WordKind::Plain, b),
            ])))
            .unwrap();
        let block = heap
            .alloc(HeapData::Array(Array::from_values(vec![
                Value::Integer(1),
                Value::Seq(Seq::new(SeqKind::Path, path)),
            ])))
            .unwrap();
        assert_eq!(mold(&heap, &interner, &Value::block(block)), "[1 a/b]");
    }

    #[test]
    fn refinement_paths_mold_with_leading_slash() {
        let (mut heap, mut interner) = setup();
        let part = interner.intern("part");
        let path = heap
            .alloc(HeapData::Array(Array::from_values(vec![
                Value::Blank,
                Value::word(WordKind::Plain, part),
            ])))
            .unwrap();
        assert_eq!(
            mold(&heap, &interner, &Value::Seq(Seq::new(SeqKind::Path, path))),
            "/part"
        );
    }

    #[test]
    fn binary_molds_hex() {
        let (mut heap, interner) = setup();
        let b = heap
            .alloc(HeapData::Binary(crate::series::Binary::from_bytes(vec![0xde, 0xad])))
            .unwrap();
        assert_eq!(
            mold(&heap, &interner, &Value::Binary(crate::value::BinRef { series: b, index: 0 })),
            "#{DEAD}"
        );
    }

    #[test]
    fn form_drops_delimiters() {
        let (mut heap, interner) = setup();
        let s = heap.alloc(HeapData::Text(Text::from_str("plain"))).unwrap();
        assert_eq!(form(&heap, &interner, &Value::text(s)), "plain");
        let strand = Value::Strand(Strand {
            kind: StrandKind::Text,
            series: s,
            index: 0,
        });
        let block = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::Integer(1), strand])))
            .unwrap();
        assert_eq!(form(&heap, &interner, &Value::block(block)), "1 plain");
    }
}
