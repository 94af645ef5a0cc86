//! Actions: paramlists, parameter classes, and dispatchers.
//!
//! An action node owns its parameter list (whose identity is the relative
//! binding target for interpreted bodies) and a dispatcher saying how a
//! filled frame runs. The `hidden` bit on parameters is the facade: a
//! specialized-out parameter keeps its slot (frame layout is shared with
//! the unspecialized action) but disappears from reflection and gathering.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    error::{ErrorId, RunError, RunResult},
    heap::{Heap, HeapId},
    intern::{Interner, SymbolId},
    natives::Native,
    value::{Kind, Seq, TypeSet, Value, WordKind},
};

/// How an argument is gathered from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamClass {
    /// Evaluate one full step (enfix lookahead allowed to complete).
    Normal,
    /// Evaluate one step without enfix lookahead.
    Tight,
    /// Take the next cell literally.
    HardQuote,
    /// Take literally, except groups and get-words evaluate.
    SoftQuote,
    /// Optional named parameter group, addressed via path syntax.
    Refinement,
    /// Not gathered; starts unset (locals).
    Local,
}

/// One parameter cell of a paramlist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Param {
    pub symbol: SymbolId,
    pub class: ParamClass,
    pub types: TypeSet,
    /// Facade bit: hidden from reflection and gathering (specialized out).
    pub hidden: bool,
}

/// How a filled frame is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Dispatcher {
    /// Built-in function, dispatched by enum.
    Native(Native),
    /// Relativized block body, evaluated with the frame as specifier.
    Interpreted { body: HeapId },
    /// Re-enter `base` with slots pre-filled from the exemplar frame.
    Specialized { exemplar: HeapId, base: HeapId },
    /// Evaluate a prelude block in the frame, then dispatch `base` on it.
    Adapted { prelude: HeapId, base: HeapId },
    /// Run the first action, then pipe the result through the rest.
    Chained { pipeline: SmallVec<[HeapId; 2]> },
    /// All calls re-route to another action.
    Hijacked { target: HeapId },
}

/// An action node.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionBody {
    pub params: Vec<Param>,
    pub dispatcher: Dispatcher,
    /// Help/spec metadata context, shared by reflection.
    pub meta: Option<HeapId>,
    /// Cached name for molding and error messages.
    pub name: Option<SymbolId>,
    /// Enfix actions take their first argument from the completed left-hand
    /// result during lookahead.
    pub enfix: bool,
    /// Declared return typeset, checked on dispatch output.
    pub returns: Option<TypeSet>,
}

impl ActionBody {
    /// Minimal action for tests and archetypes: normal any-value params.
    #[must_use]
    pub fn stub(symbols: Vec<SymbolId>) -> Self {
        Self {
            params: symbols
                .into_iter()
                .map(|symbol| Param {
                    symbol,
                    class: ParamClass::Normal,
                    types: TypeSet::any_value(),
                    hidden: false,
                })
                .collect(),
            dispatcher: Dispatcher::Native(Native::Comment),
            meta: None,
            name: None,
            enfix: false,
            returns: None,
        }
    }

    /// Visible (non-hidden, non-local) parameter positions, paramlist order.
    pub fn visible_params(&self) -> impl Iterator<Item = (usize, &Param)> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.hidden && p.class != ParamClass::Local)
    }

    /// Finds a parameter by spelling.
    #[must_use]
    pub fn find_param(&self, interner: &Interner, symbol: SymbolId) -> Option<usize> {
        self.params
            .iter()
            .position(|p| interner.same_spelling(p.symbol, symbol))
    }

    /// The positions of the arguments belonging to the refinement at
    /// `refinement_pos`: the run of ordinary params up to the next
    /// refinement or the end.
    #[must_use]
    pub fn refinement_deps(&self, refinement_pos: usize) -> Vec<usize> {
        debug_assert!(matches!(self.params[refinement_pos].class, ParamClass::Refinement));
        let mut deps = Vec::new();
        for (pos, param) in self.params.iter().enumerate().skip(refinement_pos + 1) {
            match param.class {
                ParamClass::Refinement => break,
                ParamClass::Local => continue,
                _ => deps.push(pos),
            }
        }
        deps
    }

    /// Positions of refinement params, paramlist order.
    pub fn refinements(&self) -> impl Iterator<Item = usize> + '_ {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p.class, ParamClass::Refinement) && !p.hidden)
            .map(|(pos, _)| pos)
    }
}

/// Resolves a specialization chain to its core action.
///
/// The exemplar of the outermost specialization already carries everything
/// inner layers filled (specialize seeds a new exemplar from its base's),
/// so one exemplar plus the core action fully describes the call.
#[must_use]
pub fn resolve_specialized(heap: &Heap, action: HeapId) -> (HeapId, Option<HeapId>) {
    let mut core = action;
    let mut exemplar = None;
    loop {
        match &heap.action_body(core).dispatcher {
            Dispatcher::Specialized { exemplar: ex, base } => {
                if exemplar.is_none() {
                    exemplar = Some(*ex);
                }
                core = *base;
            }
            Dispatcher::Hijacked { target } => {
                core = *target;
                exemplar = None;
            }
            _ => return (core, exemplar),
        }
    }
}

/// Parses a func-style spec block into parameters.
///
/// Grammar, in block order:
/// - `word` — normal argument
/// - `'word` (quoted) — hard-quoted argument
/// - `:word` (get-word) — soft-quoted argument
/// - `/word` (blank-headed path) — refinement; following words are its args
/// - `[type! ...]` — typeset filter for the preceding parameter
/// - `"..."` — description text, ignored here (meta carries help)
pub fn parse_param_spec(heap: &Heap, interner: &Interner, spec: &Seq) -> RunResult<Vec<Param>> {
    let cells: Vec<Value> = heap.array(spec.series).slice_from(spec.index).to_vec();
    let mut params: Vec<Param> = Vec::new();
    for cell in cells {
        match cell {
            Value::Word(w) => {
                let class = match w.kind {
                    WordKind::Plain => ParamClass::Normal,
                    WordKind::Get => ParamClass::SoftQuote,
                    WordKind::Set => {
                        return Err(RunError::fail(ErrorId::BadMake, "set-words are not valid in a spec"));
                    }
                    WordKind::Sym => ParamClass::Tight,
                };
                params.push(Param {
                    symbol: w.symbol,
                    class,
                    types: TypeSet::any_value(),
                    hidden: false,
                });
            }
            Value::Quoted(q) => {
                let inner = crate::value::quoted_payload(heap, q);
                let Value::Word(w) = inner else {
                    return Err(RunError::fail(ErrorId::BadMake, "only words can be hard-quoted params"));
                };
                params.push(Param {
                    symbol: w.symbol,
                    class: ParamClass::HardQuote,
                    types: TypeSet::any_value(),
                    hidden: false,
                });
            }
            Value::Seq(s) if s.kind.is_path() => {
                // `/name`: a blank-headed path names a refinement.
                let elems: Vec<Value> = heap.array(s.series).slice_from(s.index).to_vec();
                match elems.as_slice() {
                    [Value::Blank, Value::Word(w)] => params.push(Param {
                        symbol: w.symbol,
                        class: ParamClass::Refinement,
                        types: TypeSet::single(Kind::Logic).with(Kind::Null),
                        hidden: false,
                    }),
                    _ => return Err(RunError::fail(ErrorId::BadMake, "unrecognized refinement in spec")),
                }
            }
            Value::Seq(s) if s.kind == crate::value::SeqKind::Block => {
                // Typeset filter for the last parameter.
                let Some(last) = params.last_mut() else {
                    return Err(RunError::fail(ErrorId::BadMake, "typeset block precedes any parameter"));
                };
                last.types = parse_typeset_block(heap, interner, &s)?;
            }
            Value::Strand(_) => {} // description text
            other => {
                return Err(RunError::fail(
                    ErrorId::BadMake,
                    format!("unexpected {} in spec block", other.kind()),
                ));
            }
        }
    }
    Ok(params)
}

/// Parses a block of datatype words into a typeset.
pub fn parse_typeset_block(heap: &Heap, interner: &Interner, block: &Seq) -> RunResult<TypeSet> {
    let cells: Vec<Value> = heap.array(block.series).slice_from(block.index).to_vec();
    let mut types = TypeSet::EMPTY;
    for cell in cells {
        match cell {
            Value::Word(w) => {
                let spelling = interner.spelling(w.symbol);
                if spelling.eq_ignore_ascii_case("any-value!") {
                    types = types.union(TypeSet::any_value());
                } else if let Ok(kind) = spelling.parse::<Kind>() {
                    types = types.with(kind);
                } else {
                    return Err(RunError::fail(
                        ErrorId::BadMake,
                        format!("{spelling} is not a datatype"),
                    ));
                }
            }
            Value::Datatype(kind) => types = types.with(kind),
            other => {
                return Err(RunError::fail(
                    ErrorId::BadMake,
                    format!("unexpected {} in typeset block", other.kind()),
                ));
            }
        }
    }
    if types.is_empty() {
        types = TypeSet::any_value();
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        heap::HeapData,
        resource::Tracker,
        series::Array,
        value::SeqKind,
    };

    fn scan_spec(heap: &mut Heap, interner: &mut Interner, cells: Vec<Value>) -> Seq {
        let id = heap.alloc(HeapData::Array(Array::from_values(cells))).unwrap();
        let _ = interner;
        Seq::new(SeqKind::Block, id)
    }

    fn refinement_cell(heap: &mut Heap, sym: SymbolId) -> Value {
        let path = heap
            .alloc(HeapData::Array(Array::from_values(vec![
                Value::Blank,
                Value::word(WordKind::Plain, sym),
            ])))
            .unwrap();
        Value::Seq(Seq::new(SeqKind::Path, path))
    }

    #[test]
    fn spec_with_refinement_groups_args() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut interner = Interner::new();
        let a = interner.intern("a");
        let x = interner.intern("x");
        let b = interner.intern("b");
        let y = interner.intern("y");
        let ra = refinement_cell(&mut heap, a);
        let rb = refinement_cell(&mut heap, b);
        let spec = scan_spec(
            &mut heap,
            &mut interner,
            vec![
                ra,
                Value::word(WordKind::Plain, x),
                rb,
                Value::word(WordKind::Plain, y),
            ],
        );
        let params = parse_param_spec(&heap, &interner, &spec).unwrap();
        assert_eq!(params.len(), 4);
        assert!(matches!(params[0].class, ParamClass::Refinement));
        assert!(matches!(params[1].class, ParamClass::Normal));

        let body = ActionBody {
            params,
            ..ActionBody::stub(vec![])
        };
        assert_eq!(body.refinement_deps(0), vec![1]);
        assert_eq!(body.refinement_deps(2), vec![3]);
    }

    #[test]
    fn typeset_blocks_attach_to_preceding_param() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut interner = Interner::new();
        let v = interner.intern("value");
        let int_word = interner.intern("integer!");
        let types = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::word(
                WordKind::Plain,
                int_word,
            )])))
            .unwrap();
        let spec = scan_spec(
            &mut heap,
            &mut interner,
            vec![
                Value::word(WordKind::Plain, v),
                Value::Seq(Seq::new(SeqKind::Block, types)),
            ],
        );
        let params = parse_param_spec(&heap, &interner, &spec).unwrap();
        assert!(params[0].types.contains(Kind::Integer));
        assert!(!params[0].types.contains(Kind::Text));
    }

    #[test]
    fn find_param_matches_case_insensitively() {
        let mut interner = Interner::new();
        let lower = interner.intern("count");
        let upper = interner.intern("COUNT");
        let body = ActionBody::stub(vec![lower]);
        assert_eq!(body.find_param(&interner, upper), Some(0));
    }
}
