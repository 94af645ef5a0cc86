//! Word binding and specifier resolution.
//!
//! A word resolves to a storage slot through its binding: *specific*
//! (varlist + index), *relative* (action + index, resolved against a live
//! frame named by the specifier), or *unbound* (an error to evaluate). A
//! specifier travels through every tree walk that can touch relative
//! content; descending into an array cell that carries its own stored
//! binding derives a new specifier from it.
//!
//! Bind walks use the binder index side-channel on symbols (see
//! [`crate::intern::Binder`]); the binder is always torn down before
//! anything that can fault or run user code.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    context::{self, Keys},
    error::{ErrorId, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{Binder, Interner, SymbolId},
    series::Array,
    value::{Value, Word, WordKind},
};

/// Where a word's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binding {
    Unbound,
    /// Direct slot in a context varlist (1-based).
    Context { ctx: HeapId, index: u32 },
    /// Slot in whichever frame of `action` the specifier names (1-based).
    Relative { action: HeapId, index: u32 },
}

/// Resolution record carried through tree walks: the frame varlist that
/// relative bindings resolve against, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specifier {
    pub frame: Option<HeapId>,
}

impl Specifier {
    pub const NONE: Self = Self { frame: None };

    #[must_use]
    pub fn for_frame(varlist: HeapId) -> Self {
        Self { frame: Some(varlist) }
    }

    /// Derives the specifier for descending into an array cell: the cell's
    /// stored binding overlays the caller's specifier.
    #[must_use]
    pub fn derive(self, stored: &Binding) -> Self {
        match stored {
            Binding::Context { ctx, .. } => Self { frame: Some(*ctx) },
            _ => self,
        }
    }
}

/// Resolves a binding to (varlist, 1-based slot).
///
/// Relative bindings demand a specifier naming a frame of the same action;
/// a mismatch is a loud error, never a silent misread.
pub fn resolve_binding(heap: &Heap, binding: &Binding, specifier: Specifier) -> RunResult<(HeapId, usize)> {
    match binding {
        Binding::Unbound => Err(RunError::fail(ErrorId::NotBound, "word is not bound to a context")),
        Binding::Context { ctx, index } => Ok((*ctx, *index as usize)),
        Binding::Relative { action, index } => {
            let Some(frame) = specifier.frame else {
                return Err(RunError::fail(
                    ErrorId::NotBound,
                    "relative word reached without a specifier",
                ));
            };
            let ctx = heap.ctx(frame);
            if ctx.action != Some(*action) {
                return Err(RunError::fail(
                    ErrorId::NotBound,
                    "specifier frame does not match the word's action",
                ));
            }
            Ok((frame, *index as usize))
        }
    }
}

/// Reads the value a word is bound to.
pub fn read_word(heap: &Heap, interner: &Interner, word: &Word, specifier: Specifier) -> RunResult<Value> {
    let (varlist, slot) = resolve_binding(heap, &word.binding, specifier)?;
    let ctx = heap.ctx(varlist);
    if ctx.inaccessible {
        return Err(RunError::fail(
            ErrorId::Inaccessible,
            format!("{} refers to a frame that has ended", interner.spelling(word.symbol)),
        ));
    }
    let value = *ctx.slot(slot);
    if value.is_unset() {
        return Err(RunError::fail(
            ErrorId::NoValue,
            format!("{} has no value", interner.spelling(word.symbol)),
        ));
    }
    Ok(value)
}

/// Writes through a word's binding.
pub fn write_word(heap: &mut Heap, word: &Word, specifier: Specifier, value: Value) -> RunResult<()> {
    let (varlist, slot) = resolve_binding(heap, &word.binding, specifier)?;
    let ctx = heap.ctx_mut(varlist);
    if ctx.inaccessible {
        return Err(RunError::fail(
            ErrorId::Inaccessible,
            "cannot set a word whose frame has ended",
        ));
    }
    ctx.set_slot(slot, value);
    Ok(())
}

/// Deep-collects the set-word spellings of a block, in first-appearance
/// order. Used by object construction and top-level binding.
#[must_use]
pub fn collect_set_words(heap: &Heap, array: HeapId, deep: bool) -> Vec<SymbolId> {
    let mut out: Vec<SymbolId> = Vec::new();
    let mut stack = vec![array];
    let mut seen = AHashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        for cell in heap.array(id).as_slice() {
            match cell {
                Value::Word(w) if w.kind == WordKind::Set => {
                    if !out.contains(&w.symbol) {
                        out.push(w.symbol);
                    }
                }
                Value::Seq(s) if deep && !s.kind.is_path() => stack.push(s.series),
                _ => {}
            }
        }
    }
    out
}

/// Binds words in an array (deeply) to a context's slots.
///
/// Words whose spelling is not in the context keep their prior binding.
pub fn bind_to_context(heap: &mut Heap, interner: &mut Interner, array: HeapId, ctx: HeapId) {
    let keys = context::context_keys(heap, ctx);
    let mut binder = Binder::begin(interner);
    for (pos, key) in keys.iter().enumerate() {
        if !key.hidden {
            binder.set(interner, key.symbol, (pos + 1) as i32);
        }
    }
    walk_arrays(heap, array, |cell| {
        if let Value::Word(w) = cell {
            let index = binder.get(interner, w.symbol);
            if index > 0 {
                w.binding = Binding::Context {
                    ctx,
                    index: index as u32,
                };
            }
        }
    });
    binder.finish(interner);
}

/// Binds freshly scanned top-level source: set-words are attached to the
/// user context (adding slots as needed), then every word binds to user
/// first, lib second.
pub fn bind_source(heap: &mut Heap, interner: &mut Interner, array: HeapId, user: HeapId, lib: HeapId) {
    for symbol in collect_set_words(heap, array, true) {
        if context::find_slot(heap, interner, user, symbol).is_none() {
            context::append_slot(heap, user, symbol);
        }
    }

    let user_keys = context::context_keys(heap, user);
    let lib_keys = context::context_keys(heap, lib);
    let mut binder = Binder::begin(interner);
    for (pos, key) in lib_keys.iter().enumerate() {
        binder.set_lib(interner, key.symbol, (pos + 1) as i32);
    }
    for (pos, key) in user_keys.iter().enumerate() {
        binder.set(interner, key.symbol, (pos + 1) as i32);
    }
    walk_arrays(heap, array, |cell| {
        if let Value::Word(w) = cell {
            let user_index = binder.get(interner, w.symbol);
            if user_index > 0 {
                w.binding = Binding::Context {
                    ctx: user,
                    index: user_index as u32,
                };
            } else {
                let lib_index = binder.get_lib(interner, w.symbol);
                if lib_index > 0 {
                    w.binding = Binding::Context {
                        ctx: lib,
                        index: lib_index as u32,
                    };
                }
            }
        }
    });
    binder.finish(interner);
}

/// Rebinds words matching an action's parameters to relative bindings, and
/// stamps every array in the body as relative to that action.
pub fn relativize_body(heap: &mut Heap, interner: &mut Interner, body: HeapId, action: HeapId, params: &[SymbolId]) {
    let mut binder = Binder::begin(interner);
    for (pos, symbol) in params.iter().enumerate() {
        binder.set(interner, *symbol, (pos + 1) as i32);
    }
    let mut touched: Vec<HeapId> = Vec::new();
    walk_arrays_with_ids(heap, body, &mut touched, |cell| {
        if let Value::Word(w) = cell {
            let index = binder.get(interner, w.symbol);
            if index > 0 {
                w.binding = Binding::Relative {
                    action,
                    index: index as u32,
                };
            }
        }
    });
    binder.finish(interner);
    for id in touched {
        heap.array_mut(id).relative_to = Some(action);
    }
}

/// Deep-copies an array, lifting every relative binding to a specific one.
///
/// This is the derelativization a plain `copy` of possibly-relative content
/// must perform: the result is fully specific and safe to outlive the frame.
pub fn copy_derelativized(heap: &mut Heap, src: HeapId, index: u32, specifier: Specifier) -> RunResult<HeapId> {
    let cells: Vec<Value> = heap.array(src).slice_from(index).to_vec();
    let mut out: Vec<Value> = Vec::with_capacity(cells.len());
    for cell in cells {
        out.push(derelativize_cell(heap, cell, specifier)?);
    }
    Ok(heap.alloc(HeapData::Array(Array::from_values(out)))?)
}

fn derelativize_cell(heap: &mut Heap, cell: Value, specifier: Specifier) -> RunResult<Value> {
    match cell {
        Value::Word(mut w) => {
            if let Binding::Relative { .. } = w.binding {
                let (ctx, index) = resolve_binding(heap, &w.binding, specifier)?;
                w.binding = Binding::Context {
                    ctx,
                    index: index as u32,
                };
            }
            Ok(Value::Word(w))
        }
        Value::Seq(mut s) => {
            let inner_spec = specifier.derive(&s.binding);
            let copied = copy_derelativized(heap, s.series, 0, inner_spec)?;
            s.series = copied;
            s.binding = Binding::Unbound;
            Ok(Value::Seq(s))
        }
        Value::Quoted(q) => {
            let payload = crate::value::quoted_payload(heap, q);
            let fixed = derelativize_cell(heap, payload, specifier)?;
            let cell = heap.alloc(HeapData::QuotedCell(fixed))?;
            Ok(Value::Quoted(crate::value::QuotedRef { depth: q.depth, cell }))
        }
        other => Ok(other),
    }
}

/// Applies `f` to every cell of every array reachable from `root`,
/// excluding descent through paths' group elements only when they are
/// shared. Cycles are walked once.
fn walk_arrays(heap: &mut Heap, root: HeapId, mut f: impl FnMut(&mut Value)) {
    let mut touched = Vec::new();
    walk_arrays_with_ids(heap, root, &mut touched, &mut f);
}

fn walk_arrays_with_ids(heap: &mut Heap, root: HeapId, touched: &mut Vec<HeapId>, mut f: impl FnMut(&mut Value)) {
    let mut stack = vec![root];
    let mut seen = AHashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        touched.push(id);
        let len = heap.array(id).len();
        for i in 0..len {
            let mut cell = *heap.array(id).get(i).expect("index within walked length");
            f(&mut cell);
            match &cell {
                Value::Seq(s) => stack.push(s.series),
                Value::Quoted(q) => {
                    // Quoted content binds like unquoted content; the walk
                    // reaches through the single-cell container.
                    let mut payload = crate::value::quoted_payload(heap, *q);
                    f(&mut payload);
                    if let Value::Seq(s) = &payload {
                        stack.push(s.series);
                    }
                    match heap.get_mut(q.cell) {
                        HeapData::QuotedCell(slot) => *slot = payload,
                        other => panic!("quoted cell points at a {} node", other.flavor_name()),
                    }
                }
                _ => {}
            }
            heap.array_mut(id).set(i, cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::make_context,
        resource::Tracker,
        value::{CtxKind, WordKind},
    };

    fn setup() -> (Heap, Interner) {
        (Heap::new(Tracker::NoLimit), Interner::new())
    }

    #[test]
    fn bind_to_context_sets_specific_bindings() {
        let (mut heap, mut interner) = setup();
        let x = interner.intern("x");
        let ctx = make_context(&mut heap, CtxKind::Object, &[x]).unwrap();
        let block = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::word(WordKind::Plain, x)])))
            .unwrap();
        bind_to_context(&mut heap, &mut interner, block, ctx);
        let Value::Word(w) = heap.array(block).get(0).copied().unwrap() else {
            panic!("expected word");
        };
        assert_eq!(w.binding, Binding::Context { ctx, index: 1 });
        assert!(interner.binder_indices_clear(), "bind must tear its binder down");
    }

    #[test]
    fn bind_source_prefers_user_over_lib() {
        let (mut heap, mut interner) = setup();
        let x = interner.intern("x");
        let y = interner.intern("y");
        let lib = make_context(&mut heap, CtxKind::Module, &[x, y]).unwrap();
        let user = make_context(&mut heap, CtxKind::Module, &[x]).unwrap();
        let block = heap
            .alloc(HeapData::Array(Array::from_values(vec![
                Value::word(WordKind::Plain, x),
                Value::word(WordKind::Plain, y),
            ])))
            .unwrap();
        bind_source(&mut heap, &mut interner, block, user, lib);
        let Value::Word(wx) = heap.array(block).get(0).copied().unwrap() else {
            panic!()
        };
        let Value::Word(wy) = heap.array(block).get(1).copied().unwrap() else {
            panic!()
        };
        assert_eq!(wx.binding, Binding::Context { ctx: user, index: 1 });
        assert_eq!(wy.binding, Binding::Context { ctx: lib, index: 2 });
        assert!(interner.binder_indices_clear());
    }

    #[test]
    fn bind_source_attaches_set_words() {
        let (mut heap, mut interner) = setup();
        let lib = make_context(&mut heap, CtxKind::Module, &[]).unwrap();
        let user = make_context(&mut heap, CtxKind::Module, &[]).unwrap();
        let fresh = interner.intern("fresh");
        let block = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::word(
                WordKind::Set,
                fresh,
            )])))
            .unwrap();
        bind_source(&mut heap, &mut interner, block, user, lib);
        assert_eq!(context::find_slot(&heap, &interner, user, fresh), Some(1));
        let Value::Word(w) = heap.array(block).get(0).copied().unwrap() else {
            panic!()
        };
        assert!(matches!(w.binding, Binding::Context { ctx, index: 1 } if ctx == user));
    }

    #[test]
    fn relative_binding_resolves_through_matching_frame() {
        let (mut heap, mut interner) = setup();
        let arg = interner.intern("arg");
        // A stand-in action node.
        let action = heap
            .alloc(HeapData::Action(crate::action::ActionBody::stub(vec![arg])))
            .unwrap();
        let body = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::word(
                WordKind::Plain,
                arg,
            )])))
            .unwrap();
        relativize_body(&mut heap, &mut interner, body, action, &[arg]);
        let Value::Word(w) = heap.array(body).get(0).copied().unwrap() else {
            panic!()
        };
        assert_eq!(w.binding, Binding::Relative { action, index: 1 });
        assert_eq!(heap.array(body).relative_to, Some(action));

        // A frame of the same action resolves; a frame of another does not.
        let frame = make_context(&mut heap, CtxKind::Frame, &[arg]).unwrap();
        heap.ctx_mut(frame).action = Some(action);
        heap.ctx_mut(frame).set_slot(1, Value::Integer(5));
        let got = read_word(&heap, &interner, &w, Specifier::for_frame(frame)).unwrap();
        assert!(matches!(got, Value::Integer(5)));

        let err = read_word(&heap, &interner, &w, Specifier::NONE);
        assert!(err.is_err(), "relative word without a specifier fails loudly");
    }

    #[test]
    fn copy_derelativized_produces_specific_words() {
        let (mut heap, mut interner) = setup();
        let arg = interner.intern("v");
        let action = heap
            .alloc(HeapData::Action(crate::action::ActionBody::stub(vec![arg])))
            .unwrap();
        let inner = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::word(
                WordKind::Plain,
                arg,
            )])))
            .unwrap();
        let body = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::block(inner)])))
            .unwrap();
        relativize_body(&mut heap, &mut interner, body, action, &[arg]);

        let frame = make_context(&mut heap, CtxKind::Frame, &[arg]).unwrap();
        heap.ctx_mut(frame).action = Some(action);

        let copied = copy_derelativized(&mut heap, body, 0, Specifier::for_frame(frame)).unwrap();
        let Value::Seq(inner_copy) = heap.array(copied).get(0).copied().unwrap() else {
            panic!()
        };
        assert_ne!(inner_copy.series, inner, "copy is pointer-distinct");
        let Value::Word(w) = heap.array(inner_copy.series).get(0).copied().unwrap() else {
            panic!()
        };
        assert!(matches!(w.binding, Binding::Context { ctx, index: 1 } if ctx == frame));
    }
}
