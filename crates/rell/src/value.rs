use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

use crate::{
    bind::Binding,
    date::Date,
    heap::{Heap, HeapData, HeapId},
    intern::{Interner, SymbolId},
};

/// Datatype of a value cell.
///
/// One variant per user-visible datatype. The discriminant doubles as the
/// bit position inside [`TypeSet`], so the enum must stay below 64 variants.
/// Internal cell states (unset slots, specialization sentinels) are variants
/// of [`Value`] itself, not kinds: they can never be reached by user code and
/// have no datatype word.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, FromRepr, Serialize, Deserialize,
)]
pub enum Kind {
    #[strum(serialize = "null!")]
    Null = 0,
    #[strum(serialize = "blank!")]
    Blank,
    #[strum(serialize = "logic!")]
    Logic,
    #[strum(serialize = "integer!")]
    Integer,
    #[strum(serialize = "decimal!")]
    Decimal,
    #[strum(serialize = "char!")]
    Char,
    #[strum(serialize = "time!")]
    Time,
    #[strum(serialize = "date!")]
    Date,
    #[strum(serialize = "pair!")]
    Pair,
    #[strum(serialize = "tuple!")]
    Tuple,
    #[strum(serialize = "binary!")]
    Binary,
    #[strum(serialize = "text!")]
    Text,
    #[strum(serialize = "file!")]
    File,
    #[strum(serialize = "url!")]
    Url,
    #[strum(serialize = "tag!")]
    Tag,
    #[strum(serialize = "email!")]
    Email,
    #[strum(serialize = "issue!")]
    Issue,
    #[strum(serialize = "word!")]
    Word,
    #[strum(serialize = "set-word!")]
    SetWord,
    #[strum(serialize = "get-word!")]
    GetWord,
    #[strum(serialize = "sym-word!")]
    SymWord,
    #[strum(serialize = "block!")]
    Block,
    #[strum(serialize = "set-block!")]
    SetBlock,
    #[strum(serialize = "get-block!")]
    GetBlock,
    #[strum(serialize = "sym-block!")]
    SymBlock,
    #[strum(serialize = "group!")]
    Group,
    #[strum(serialize = "set-group!")]
    SetGroup,
    #[strum(serialize = "get-group!")]
    GetGroup,
    #[strum(serialize = "sym-group!")]
    SymGroup,
    #[strum(serialize = "path!")]
    Path,
    #[strum(serialize = "set-path!")]
    SetPath,
    #[strum(serialize = "get-path!")]
    GetPath,
    #[strum(serialize = "sym-path!")]
    SymPath,
    #[strum(serialize = "object!")]
    Object,
    #[strum(serialize = "module!")]
    Module,
    #[strum(serialize = "error!")]
    Error,
    #[strum(serialize = "frame!")]
    Frame,
    #[strum(serialize = "port!")]
    Port,
    #[strum(serialize = "action!")]
    Action,
    #[strum(serialize = "map!")]
    Map,
    #[strum(serialize = "varargs!")]
    Varargs,
    #[strum(serialize = "bitset!")]
    Bitset,
    #[strum(serialize = "typeset!")]
    Typeset,
    #[strum(serialize = "datatype!")]
    Datatype,
    #[strum(serialize = "handle!")]
    Handle,
    #[strum(serialize = "event!")]
    Event,
    #[strum(serialize = "quoted!")]
    Quoted,
}

impl Kind {
    /// True for kinds whose cells carry a binding (words and arrays).
    #[must_use]
    pub fn is_bindable(self) -> bool {
        self.is_any_word() || self.is_any_array() || self == Self::Action
    }

    #[must_use]
    pub fn is_any_word(self) -> bool {
        matches!(self, Self::Word | Self::SetWord | Self::GetWord | Self::SymWord)
    }

    #[must_use]
    pub fn is_any_array(self) -> bool {
        matches!(
            self,
            Self::Block
                | Self::SetBlock
                | Self::GetBlock
                | Self::SymBlock
                | Self::Group
                | Self::SetGroup
                | Self::GetGroup
                | Self::SymGroup
                | Self::Path
                | Self::SetPath
                | Self::GetPath
                | Self::SymPath
        )
    }

    #[must_use]
    pub fn is_any_string(self) -> bool {
        matches!(
            self,
            Self::Text | Self::File | Self::Url | Self::Tag | Self::Email | Self::Issue
        )
    }

    #[must_use]
    pub fn is_any_context(self) -> bool {
        matches!(
            self,
            Self::Object | Self::Module | Self::Error | Self::Frame | Self::Port
        )
    }

    /// Kinds that evaluate to themselves in the evaluator's kind dispatch.
    #[must_use]
    pub fn is_inert(self) -> bool {
        !matches!(
            self,
            Self::Word
                | Self::SetWord
                | Self::GetWord
                | Self::SymWord
                | Self::Group
                | Self::SetGroup
                | Self::GetGroup
                | Self::Path
                | Self::SetPath
                | Self::GetPath
                | Self::Action
                | Self::Quoted
        )
    }
}

/// A set of datatypes, one bit per [`Kind`].
///
/// Used for parameter type checking and as the payload of typeset! values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeSet(u64);

impl TypeSet {
    pub const EMPTY: Self = Self(0);
    /// Every kind, including null. Parameters default to this minus null.
    pub const ALL: Self = Self(u64::MAX);

    #[must_use]
    pub fn single(kind: Kind) -> Self {
        Self(1 << (kind as u8))
    }

    #[must_use]
    pub fn with(self, kind: Kind) -> Self {
        Self(self.0 | (1 << (kind as u8)))
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn contains(self, kind: Kind) -> bool {
        self.0 & (1 << (kind as u8)) != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Default argument typeset: anything but null.
    #[must_use]
    pub fn any_value() -> Self {
        Self(u64::MAX & !(1 << (Kind::Null as u8)))
    }

    /// Iterates the kinds present in the set, in discriminant order.
    pub fn kinds(self) -> impl Iterator<Item = Kind> {
        (0..64u8).filter_map(move |bit| {
            if self.0 & (1 << bit) != 0 {
                Kind::from_repr(bit)
            } else {
                None
            }
        })
    }
}

/// Flavor shared by the four word kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordKind {
    Plain,
    Set,
    Get,
    Sym,
}

impl WordKind {
    #[must_use]
    pub fn cell_kind(self) -> Kind {
        match self {
            Self::Plain => Kind::Word,
            Self::Set => Kind::SetWord,
            Self::Get => Kind::GetWord,
            Self::Sym => Kind::SymWord,
        }
    }
}

/// Flavor shared by the twelve array kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeqKind {
    Block,
    SetBlock,
    GetBlock,
    SymBlock,
    Group,
    SetGroup,
    GetGroup,
    SymGroup,
    Path,
    SetPath,
    GetPath,
    SymPath,
}

impl SeqKind {
    #[must_use]
    pub fn cell_kind(self) -> Kind {
        match self {
            Self::Block => Kind::Block,
            Self::SetBlock => Kind::SetBlock,
            Self::GetBlock => Kind::GetBlock,
            Self::SymBlock => Kind::SymBlock,
            Self::Group => Kind::Group,
            Self::SetGroup => Kind::SetGroup,
            Self::GetGroup => Kind::GetGroup,
            Self::SymGroup => Kind::SymGroup,
            Self::Path => Kind::Path,
            Self::SetPath => Kind::SetPath,
            Self::GetPath => Kind::GetPath,
            Self::SymPath => Kind::SymPath,
        }
    }

    #[must_use]
    pub fn is_path(self) -> bool {
        matches!(self, Self::Path | Self::SetPath | Self::GetPath | Self::SymPath)
    }

    #[must_use]
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group | Self::SetGroup | Self::GetGroup | Self::SymGroup)
    }
}

/// Flavor shared by the six string kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrandKind {
    Text,
    File,
    Url,
    Tag,
    Email,
    Issue,
}

impl StrandKind {
    #[must_use]
    pub fn cell_kind(self) -> Kind {
        match self {
            Self::Text => Kind::Text,
            Self::File => Kind::File,
            Self::Url => Kind::Url,
            Self::Tag => Kind::Tag,
            Self::Email => Kind::Email,
            Self::Issue => Kind::Issue,
        }
    }
}

/// Flavor shared by the five context kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtxKind {
    Object,
    Module,
    Error,
    Frame,
    Port,
}

impl CtxKind {
    #[must_use]
    pub fn cell_kind(self) -> Kind {
        match self {
            Self::Object => Kind::Object,
            Self::Module => Kind::Module,
            Self::Error => Kind::Error,
            Self::Frame => Kind::Frame,
            Self::Port => Kind::Port,
        }
    }
}

/// Payload of any-word cells: interned spelling plus binding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Word {
    pub kind: WordKind,
    pub symbol: SymbolId,
    pub binding: Binding,
}

impl Word {
    #[must_use]
    pub fn unbound(kind: WordKind, symbol: SymbolId) -> Self {
        Self {
            kind,
            symbol,
            binding: Binding::Unbound,
        }
    }
}

/// Payload of any-array cells: series node, position, binding.
///
/// The binding is attached when an array value travels out of a relativized
/// body, so later descent can derive the right specifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Seq {
    pub kind: SeqKind,
    pub series: HeapId,
    pub index: u32,
    pub binding: Binding,
}

impl Seq {
    #[must_use]
    pub fn new(kind: SeqKind, series: HeapId) -> Self {
        Self {
            kind,
            series,
            index: 0,
            binding: Binding::Unbound,
        }
    }

    #[must_use]
    pub fn at(self, index: u32) -> Self {
        Self { index, ..self }
    }
}

/// Payload of any-string cells: series node plus codepoint position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Strand {
    pub kind: StrandKind,
    pub series: HeapId,
    pub index: u32,
}

/// Payload of binary! cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BinRef {
    pub series: HeapId,
    pub index: u32,
}

/// Payload of any-context cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CtxRef {
    pub kind: CtxKind,
    pub varlist: HeapId,
}

/// Payload of action! cells: the action node plus the binding it closes over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActRef {
    pub action: HeapId,
    pub binding: Binding,
}

/// Payload of quoted! cells.
///
/// A uniform depth byte over a single-cell heap container replaces the
/// C-style depth-1..3 kind-byte offsets; bumping the depth of an already
/// quoted value never allocates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotedRef {
    pub depth: u8,
    pub cell: HeapId,
}

/// Payload of tuple! cells: up to ten small integer parts, stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    pub len: u8,
    pub parts: [u8; 10],
}

impl Tuple {
    #[must_use]
    pub fn from_parts(parts: &[u8]) -> Self {
        let len = parts.len().min(10);
        let mut buf = [0u8; 10];
        buf[..len].copy_from_slice(&parts[..len]);
        Self {
            len: len as u8,
            parts: buf,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.parts[..self.len as usize]
    }
}

/// Payload of event! cells.
///
/// Events cross the device boundary through explicit field-by-field
/// serialization; they never alias a foreign struct's bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub etype: EventType,
    pub code: u32,
    pub data: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum EventType {
    Read,
    Wrote,
    Opened,
    Closed,
    Error,
    Custom,
}

/// Payload of handle! cells: the root-flagged heap node the handle lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HandleRef {
    pub node: HeapId,
}

/// A value cell.
///
/// Fixed-size and `Copy`: cell assignment is a pure bit copy, as the
/// substrate requires. Heap-backed kinds point into the arena by [`HeapId`];
/// everything else is stored inline.
///
/// Two variants are internal pseudo-states, not datatypes: `Unset` marks a
/// slot with no value yet (context slots before assignment, action frame
/// slots before gathering), and `PartialRefinement` is the specialization
/// sentinel recording a refinement's position on the ordering stack. Neither
/// is ever produced by evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Value {
    /// Slot state: no value has been stored here. Distinct from `Null`,
    /// which is a first-class value.
    Unset,
    Null,
    Blank,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Char(char),
    /// Nanoseconds since midnight (or a duration when negative / >= 24h).
    Time(i64),
    Date(Date),
    Pair(f64, f64),
    Tuple(Tuple),
    Datatype(Kind),
    Typeset(TypeSet),
    Word(Word),
    Seq(Seq),
    Strand(Strand),
    Binary(BinRef),
    Context(CtxRef),
    Action(ActRef),
    Map(HeapId),
    Bitset(HeapId),
    Varargs(HeapId),
    Handle(HandleRef),
    Event(Event),
    Quoted(QuotedRef),
    /// Specialization sentinel: this refinement slot was named in a
    /// specialization path but its arguments were not all provided. The
    /// stack position orders partials ahead of newly requested refinements
    /// at the next full invocation.
    PartialRefinement { symbol: SymbolId, stack_pos: u16 },
}

impl Value {
    /// The cell's datatype.
    ///
    /// # Panics
    /// Panics on internal pseudo-states, which have no datatype.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Unset => panic!("cannot take the kind of an unset slot"),
            Self::PartialRefinement { .. } => panic!("cannot take the kind of a specialization sentinel"),
            Self::Null => Kind::Null,
            Self::Blank => Kind::Blank,
            Self::Logic(_) => Kind::Logic,
            Self::Integer(_) => Kind::Integer,
            Self::Decimal(_) => Kind::Decimal,
            Self::Char(_) => Kind::Char,
            Self::Time(_) => Kind::Time,
            Self::Date(_) => Kind::Date,
            Self::Pair(..) => Kind::Pair,
            Self::Tuple(_) => Kind::Tuple,
            Self::Datatype(_) => Kind::Datatype,
            Self::Typeset(_) => Kind::Typeset,
            Self::Word(w) => w.kind.cell_kind(),
            Self::Seq(s) => s.kind.cell_kind(),
            Self::Strand(s) => s.kind.cell_kind(),
            Self::Binary(_) => Kind::Binary,
            Self::Context(c) => c.kind.cell_kind(),
            Self::Action(_) => Kind::Action,
            Self::Map(_) => Kind::Map,
            Self::Bitset(_) => Kind::Bitset,
            Self::Varargs(_) => Kind::Varargs,
            Self::Handle(_) => Kind::Handle,
            Self::Event(_) => Kind::Event,
            Self::Quoted(_) => Kind::Quoted,
        }
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Conditional truth: everything is truthy except null, blank, and false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Null | Self::Blank | Self::Logic(false))
    }

    #[must_use]
    pub fn word(kind: WordKind, symbol: SymbolId) -> Self {
        Self::Word(Word::unbound(kind, symbol))
    }

    #[must_use]
    pub fn block(series: HeapId) -> Self {
        Self::Seq(Seq::new(SeqKind::Block, series))
    }

    #[must_use]
    pub fn group(series: HeapId) -> Self {
        Self::Seq(Seq::new(SeqKind::Group, series))
    }

    #[must_use]
    pub fn text(series: HeapId) -> Self {
        Self::Strand(Strand {
            kind: StrandKind::Text,
            series,
            index: 0,
        })
    }

    #[must_use]
    pub fn object(varlist: HeapId) -> Self {
        Self::Context(CtxRef {
            kind: CtxKind::Object,
            varlist,
        })
    }

    #[must_use]
    pub fn frame(varlist: HeapId) -> Self {
        Self::Context(CtxRef {
            kind: CtxKind::Frame,
            varlist,
        })
    }

    #[must_use]
    pub fn action(action: HeapId) -> Self {
        Self::Action(ActRef {
            action,
            binding: Binding::Unbound,
        })
    }
}

/// Structural equality in the language's sense: case-insensitive for words
/// and strings, element-wise for series, identity for contexts and actions.
///
/// Needs the heap to chase series references.
#[must_use]
pub fn equal_values(a: &Value, b: &Value, heap: &Heap, interner: &Interner) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) | (Value::Blank, Value::Blank) | (Value::Unset, Value::Unset) => true,
        (Value::Logic(x), Value::Logic(y)) => x == y,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Decimal(x), Value::Decimal(y)) => x == y,
        (Value::Integer(x), Value::Decimal(y)) | (Value::Decimal(y), Value::Integer(x)) => (*x as f64) == *y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Time(x), Value::Time(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Pair(x1, y1), Value::Pair(x2, y2)) => x1 == x2 && y1 == y2,
        (Value::Tuple(x), Value::Tuple(y)) => x == y,
        (Value::Datatype(x), Value::Datatype(y)) => x == y,
        (Value::Typeset(x), Value::Typeset(y)) => x == y,
        (Value::Event(x), Value::Event(y)) => x == y,
        (Value::Word(x), Value::Word(y)) => x.kind == y.kind && interner.same_spelling(x.symbol, y.symbol),
        (Value::Strand(x), Value::Strand(y)) => {
            x.kind == y.kind && {
                let sx = heap.text(x.series).slice_from(x.index);
                let sy = heap.text(y.series).slice_from(y.index);
                caseless_eq(sx, sy)
            }
        }
        (Value::Binary(x), Value::Binary(y)) => {
            heap.binary(x.series).slice_from(x.index) == heap.binary(y.series).slice_from(y.index)
        }
        (Value::Seq(x), Value::Seq(y)) => {
            x.kind == y.kind
                && ((x.series == y.series && x.index == y.index) || {
                    let ax = heap.array(x.series).slice_from(x.index);
                    let ay = heap.array(y.series).slice_from(y.index);
                    ax.len() == ay.len() && {
                        // cloned to end the array borrows before recursing
                        let ax: Vec<Value> = ax.to_vec();
                        let ay: Vec<Value> = ay.to_vec();
                        ax.iter().zip(ay.iter()).all(|(va, vb)| equal_values(va, vb, heap, interner))
                    }
                })
        }
        (Value::Context(x), Value::Context(y)) => x.kind == y.kind && x.varlist == y.varlist,
        (Value::Action(x), Value::Action(y)) => x.action == y.action,
        (Value::Map(x), Value::Map(y)) => x == y,
        (Value::Bitset(x), Value::Bitset(y)) => x == y,
        (Value::Varargs(x), Value::Varargs(y)) => x == y,
        (Value::Handle(x), Value::Handle(y)) => x.node == y.node,
        (Value::Quoted(x), Value::Quoted(y)) => {
            x.depth == y.depth && {
                let (va, vb) = (quoted_payload(heap, *x), quoted_payload(heap, *y));
                equal_values(&va, &vb, heap, interner)
            }
        }
        _ => false,
    }
}

/// Strict sameness: identical cell bits for inline kinds, same node and
/// position for reference kinds.
#[must_use]
pub fn same_values(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Word(x), Value::Word(y)) => x.kind == y.kind && x.symbol == y.symbol,
        (Value::Seq(x), Value::Seq(y)) => x.kind == y.kind && x.series == y.series && x.index == y.index,
        (Value::Strand(x), Value::Strand(y)) => x.kind == y.kind && x.series == y.series && x.index == y.index,
        (Value::Binary(x), Value::Binary(y)) => x.series == y.series && x.index == y.index,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Decimal(x), Value::Decimal(y)) => x.to_bits() == y.to_bits(),
        _ => {
            // all remaining kinds have no looser form of equality
            std::mem::discriminant(a) == std::mem::discriminant(b) && {
                match (a, b) {
                    (Value::Logic(x), Value::Logic(y)) => x == y,
                    (Value::Char(x), Value::Char(y)) => x == y,
                    (Value::Time(x), Value::Time(y)) => x == y,
                    (Value::Date(x), Value::Date(y)) => x == y,
                    (Value::Datatype(x), Value::Datatype(y)) => x == y,
                    (Value::Context(x), Value::Context(y)) => x.varlist == y.varlist,
                    (Value::Action(x), Value::Action(y)) => x.action == y.action,
                    (Value::Map(x), Value::Map(y)) => x == y,
                    (Value::Quoted(x), Value::Quoted(y)) => x.cell == y.cell && x.depth == y.depth,
                    _ => true,
                }
            }
        }
    }
}

/// Reads the payload under a quoted reference.
#[must_use]
pub fn quoted_payload(heap: &Heap, q: QuotedRef) -> Value {
    match heap.get(q.cell) {
        HeapData::QuotedCell(v) => *v,
        other => panic!("quoted cell points at a {} node", other.flavor_name()),
    }
}

/// ASCII-case-insensitive byte comparison, the same fold the interner uses
/// for spelling canonization.
#[must_use]
pub fn caseless_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

impl fmt::Display for Value {
    /// Debug-oriented display: kind name only. Canonical rendering goes
    /// through the mold machinery, which needs heap access.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "~unset~"),
            Self::PartialRefinement { .. } => write!(f, "~partial~"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typeset_single_and_union() {
        let ts = TypeSet::single(Kind::Integer).with(Kind::Decimal);
        assert!(ts.contains(Kind::Integer));
        assert!(ts.contains(Kind::Decimal));
        assert!(!ts.contains(Kind::Block));
    }

    #[test]
    fn any_value_excludes_null() {
        let ts = TypeSet::any_value();
        assert!(!ts.contains(Kind::Null));
        assert!(ts.contains(Kind::Integer));
        assert!(ts.contains(Kind::Quoted));
    }

    #[test]
    fn typeset_kinds_iterates_in_order() {
        let ts = TypeSet::single(Kind::Blank).with(Kind::Integer);
        let kinds: Vec<Kind> = ts.kinds().collect();
        assert_eq!(kinds, vec![Kind::Blank, Kind::Integer]);
    }

    #[test]
    fn truthiness() {
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::Logic(true).is_truthy());
        assert!(!Value::Logic(false).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Blank.is_truthy());
    }

    #[test]
    fn kind_names_round_trip() {
        assert_eq!(Kind::SetWord.to_string(), "set-word!");
        assert_eq!("sym-path!".parse::<Kind>().unwrap(), Kind::SymPath);
    }

    #[test]
    fn tuple_from_parts_clamps() {
        let t = Tuple::from_parts(&[1, 2, 3]);
        assert_eq!(t.as_slice(), &[1, 2, 3]);
        let long = Tuple::from_parts(&[0; 16]);
        assert_eq!(long.len, 10);
    }
}
