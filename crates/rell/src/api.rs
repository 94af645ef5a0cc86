//! The embedding surface: host values, variadic arguments, and handles.
//!
//! Foreign callers never see cells or heap ids. They exchange [`Datum`]
//! values (deep copies across the boundary), [`ApiArg`] streams for
//! variadic evaluation, and [`Handle`]s — opaque references into singular
//! root-flagged heap nodes with explicit lifetime ownership.

use serde::{Deserialize, Serialize};

use crate::{
    error::{ErrorData, ErrorId, RunError, RunResult},
    eval::Machine,
    heap::{Heap, HeapData, HeapId},
    intern::Interner,
    mold,
    series::{Array, Binary},
    strings::Text,
    value::{BinRef, SeqKind, Strand, StrandKind, Tuple, Value, WordKind},
};

/// Lifetime owner of an API handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum HandleOwner {
    /// Lives until explicitly released.
    Indefinite,
    /// Auto-released when the owning frame ends.
    Frame(HeapId),
}

/// Payload of a handle node: the held cell plus its lifetime owner.
#[derive(Debug, Serialize, Deserialize)]
pub struct HandleData {
    pub cell: Value,
    pub owner: HandleOwner,
}

/// Opaque host reference to a value held alive inside the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub(crate) node: HeapId,
}

/// One element of a variadic evaluation stream.
///
/// The Rust slice replaces the C `END` sentinel; a missing terminator is a
/// type error rather than a runtime fault.
#[derive(Debug, Clone, Copy)]
pub enum ApiArg<'a> {
    /// Source fragment: scanned and bound against the user context.
    Utf8(&'a str),
    /// A host value spliced inertly (its evaluation is itself).
    Cell(&'a Datum),
    /// A host value spliced evaluatively.
    Eval(&'a Datum),
}

/// Host-side value: the deep-copied boundary representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Blank,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Char(char),
    /// Nanoseconds since midnight.
    Time(i64),
    Date {
        year: i16,
        month: u8,
        day: u8,
    },
    Pair(f64, f64),
    Tuple(Vec<u8>),
    Text(String),
    File(String),
    Url(String),
    Tag(String),
    Email(String),
    Issue(String),
    Word(String),
    Binary(Vec<u8>),
    Block(Vec<Datum>),
    Group(Vec<Datum>),
    Error {
        id: String,
        message: String,
    },
    /// Molded rendering for kinds with no host mapping (actions, contexts).
    Opaque(String),
}

impl Datum {
    /// Count reflector. A blank reports no count at all — reads as null.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::Blank => None,
            Self::Text(s) => Some(s.chars().count()),
            Self::Binary(b) => Some(b.len()),
            Self::Block(items) | Self::Group(items) => Some(items.len()),
            Self::Tuple(parts) => Some(parts.len()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_char(&self) -> Option<char> {
        match self {
            Self::Char(c) => Some(*c),
            _ => None,
        }
    }

    /// Spelling of words and string-like values.
    #[must_use]
    pub fn spelling(&self) -> Option<&str> {
        match self {
            Self::Word(s) | Self::Text(s) | Self::File(s) | Self::Url(s) | Self::Tag(s) | Self::Email(s)
            | Self::Issue(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Null | Self::Blank | Self::Logic(false))
    }
}

/// Builds a cell (allocating as needed) from a host value.
pub fn datum_to_value(heap: &mut Heap, interner: &mut Interner, datum: &Datum) -> RunResult<Value> {
    Ok(match datum {
        Datum::Null => Value::Null,
        Datum::Blank => Value::Blank,
        Datum::Logic(b) => Value::Logic(*b),
        Datum::Integer(n) => Value::Integer(*n),
        Datum::Decimal(d) => Value::Decimal(*d),
        Datum::Char(c) => Value::Char(*c),
        Datum::Time(t) => Value::Time(*t),
        Datum::Date { year, month, day } => Value::Date(crate::date::Date::new_normalized(
            i32::from(*year),
            i32::from(*month),
            i32::from(*day),
        )),
        Datum::Pair(x, y) => Value::Pair(*x, *y),
        Datum::Tuple(parts) => Value::Tuple(Tuple::from_parts(parts)),
        Datum::Text(s) => strand(heap, StrandKind::Text, s)?,
        Datum::File(s) => strand(heap, StrandKind::File, s)?,
        Datum::Url(s) => strand(heap, StrandKind::Url, s)?,
        Datum::Tag(s) => strand(heap, StrandKind::Tag, s)?,
        Datum::Email(s) => strand(heap, StrandKind::Email, s)?,
        Datum::Issue(s) => strand(heap, StrandKind::Issue, s)?,
        Datum::Word(s) => Value::word(WordKind::Plain, interner.intern(s)),
        Datum::Binary(bytes) => {
            let id = heap.alloc(HeapData::Binary(Binary::from_bytes(bytes.clone())))?;
            Value::Binary(BinRef { series: id, index: 0 })
        }
        Datum::Block(items) | Datum::Group(items) => {
            let mut cells = Vec::with_capacity(items.len());
            for item in items {
                cells.push(datum_to_value(heap, interner, item)?);
            }
            let id = heap.alloc(HeapData::Array(Array::from_values(cells)))?;
            let kind = if matches!(datum, Datum::Group(_)) {
                SeqKind::Group
            } else {
                SeqKind::Block
            };
            Value::Seq(crate::value::Seq::new(kind, id))
        }
        Datum::Error { id, message } => {
            return Err(RunError::Fail(Box::new(ErrorData::new(
                id.parse().unwrap_or(ErrorId::User),
                message.clone(),
            ))));
        }
        Datum::Opaque(_) => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                "opaque host values cannot cross back into the interpreter",
            ));
        }
    })
}

/// Deep-copies a cell out to the host representation.
#[must_use]
pub fn value_to_datum(heap: &Heap, interner: &Interner, value: &Value) -> Datum {
    value_to_datum_depth(heap, interner, value, 0)
}

fn value_to_datum_depth(heap: &Heap, interner: &Interner, value: &Value, depth: usize) -> Datum {
    if depth > 64 {
        return Datum::Opaque(mold::mold(heap, interner, value));
    }
    match value {
        Value::Unset | Value::Null => Datum::Null,
        Value::Blank => Datum::Blank,
        Value::Logic(b) => Datum::Logic(*b),
        Value::Integer(n) => Datum::Integer(*n),
        Value::Decimal(d) => Datum::Decimal(*d),
        Value::Char(c) => Datum::Char(*c),
        Value::Time(t) => Datum::Time(*t),
        Value::Date(d) => Datum::Date {
            year: d.year,
            month: d.month,
            day: d.day,
        },
        Value::Pair(x, y) => Datum::Pair(*x, *y),
        Value::Tuple(t) => Datum::Tuple(t.as_slice().to_vec()),
        Value::Word(w) => Datum::Word(interner.spelling(w.symbol).to_owned()),
        // Hosts see datatypes by their name word.
        Value::Datatype(kind) => Datum::Word(<&'static str>::from(*kind).to_owned()),
        Value::Strand(s) => {
            let content = heap.text(s.series).str_from(s.index).to_owned();
            match s.kind {
                StrandKind::Text => Datum::Text(content),
                StrandKind::File => Datum::File(content),
                StrandKind::Url => Datum::Url(content),
                StrandKind::Tag => Datum::Tag(content),
                StrandKind::Email => Datum::Email(content),
                StrandKind::Issue => Datum::Issue(content),
            }
        }
        Value::Binary(b) => Datum::Binary(heap.binary(b.series).slice_from(b.index).to_vec()),
        Value::Seq(s) if matches!(s.kind, SeqKind::Block | SeqKind::Group) => {
            let cells: Vec<Value> = heap.array(s.series).slice_from(s.index).to_vec();
            let items = cells
                .iter()
                .map(|cell| value_to_datum_depth(heap, interner, cell, depth + 1))
                .collect();
            if s.kind == SeqKind::Group {
                Datum::Group(items)
            } else {
                Datum::Block(items)
            }
        }
        other => Datum::Opaque(mold::mold(heap, interner, other)),
    }
}

fn strand(heap: &mut Heap, kind: StrandKind, content: &str) -> RunResult<Value> {
    let id = heap.alloc(HeapData::Text(Text::from_str(content)))?;
    Ok(Value::Strand(Strand {
        kind,
        series: id,
        index: 0,
    }))
}

// --- handle lifecycle ------------------------------------------------------

/// Allocates a handle node holding a cell. The node is unmanaged (the host
/// owns it) and root-flagged so the GC keeps the held cell alive.
pub fn alloc_handle(machine: &mut Machine, cell: Value) -> RunResult<Handle> {
    let owner = match machine.frames.last() {
        Some(frame) => HandleOwner::Frame(frame.varlist),
        None => HandleOwner::Indefinite,
    };
    let node = machine
        .heap
        .alloc_unmanaged(HeapData::Handle(HandleData { cell, owner }))?;
    machine.heap.set_root(node, true);
    if let HandleOwner::Frame(_) = owner {
        machine
            .frames
            .last_mut()
            .expect("owner frame just observed")
            .owned_handles
            .push(node);
    }
    Ok(Handle { node })
}

/// Reads the cell a handle holds.
///
/// # Panics
/// Using a handle after release or after its owner frame ended is fatal.
#[must_use]
pub fn handle_cell(heap: &Heap, handle: Handle) -> Value {
    assert!(
        heap.is_live(handle.node),
        "use of a released handle is a fatal error"
    );
    heap.handle_data(handle.node).cell
}

/// Ties a handle's lifetime to the current frame (auto-release).
pub fn manage_handle(machine: &mut Machine, handle: Handle) {
    assert!(
        machine.heap.is_live(handle.node),
        "manage of a released handle is a fatal error"
    );
    let owner = match machine.frames.last() {
        Some(frame) => HandleOwner::Frame(frame.varlist),
        None => HandleOwner::Indefinite,
    };
    machine.heap.handle_data_mut(handle.node).owner = owner;
    if let Some(frame) = machine.frames.last_mut()
        && !frame.owned_handles.contains(&handle.node)
    {
        frame.owned_handles.push(handle.node);
    }
}

/// Gives a handle indefinite lifetime; the host must release it.
pub fn unmanage_handle(machine: &mut Machine, handle: Handle) {
    assert!(
        machine.heap.is_live(handle.node),
        "unmanage of a released handle is a fatal error"
    );
    machine.heap.handle_data_mut(handle.node).owner = HandleOwner::Indefinite;
    for frame in &mut machine.frames {
        frame.owned_handles.retain(|&node| node != handle.node);
    }
}

/// Releases a handle.
///
/// # Panics
/// Releasing an already-released handle is a fatal error.
pub fn release_handle(machine: &mut Machine, handle: Handle) {
    assert!(
        machine.heap.is_live(handle.node),
        "double release of a handle is a fatal error"
    );
    machine.heap.set_root(handle.node, false);
    machine.heap.free(handle.node);
    for frame in &mut machine.frames {
        frame.owned_handles.retain(|&node| node != handle.node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_reports_no_length() {
        assert_eq!(Datum::Blank.length(), None);
        assert_eq!(Datum::Text("ab".into()).length(), Some(2));
        assert_eq!(Datum::Block(vec![Datum::Integer(1)]).length(), Some(1));
    }

    #[test]
    fn text_length_counts_codepoints() {
        assert_eq!(Datum::Text("a\u{20ac}b".into()).length(), Some(3));
    }

    #[test]
    fn as_decimal_widens_integers() {
        assert_eq!(Datum::Integer(3).as_decimal(), Some(3.0));
        assert_eq!(Datum::Decimal(2.5).as_decimal(), Some(2.5));
        assert_eq!(Datum::Text("x".into()).as_decimal(), None);
    }
}
