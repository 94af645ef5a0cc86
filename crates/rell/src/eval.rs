//! The step evaluator and action invocation.
//!
//! Evaluation is driven by a [`Feed`]: an array position plus the specifier
//! resolving any relative content. One step consumes one expression and
//! produces at most one result; invisible expressions (comment, elide)
//! produce none, leaving the caller's previous output in place. A TO_END
//! evaluation repeats steps until the feed ends or a non-local exit occurs,
//! checking the halt signal between steps.
//!
//! Action invocation walks the paramlist, taking pre-specialized slots from
//! the exemplar and gathering the rest from the feed per parameter class.
//! Refinements requested by path syntax go on an ordering stack; their
//! dependent arguments are taken from the feed in call-site order, with
//! partially specialized refinements consumed first.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    action::{Dispatcher, Param, ParamClass, resolve_specialized},
    bind::{self, Binding, Specifier},
    error::{ErrorId, RunError, RunResult},
    frame::{FrameInfo, make_frame, teardown_frame},
    heap::{Heap, HeapData, HeapId},
    intern::{Interner, SymbolId},
    value::{ActRef, CtxRef, QuotedRef, Seq, SeqKind, Value, Word, WordKind, equal_values, quoted_payload},
};

/// A stream of cells under evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Feed {
    pub series: HeapId,
    pub index: usize,
    pub specifier: Specifier,
}

impl Feed {
    #[must_use]
    pub fn for_seq(seq: &Seq, outer: Specifier) -> Self {
        Self {
            series: seq.series,
            index: seq.index as usize,
            specifier: outer.derive(&seq.binding),
        }
    }

    #[must_use]
    pub fn at_end(&self, heap: &Heap) -> bool {
        self.index >= heap.array(self.series).len()
    }

    #[must_use]
    pub fn peek(&self, heap: &Heap) -> Option<Value> {
        heap.array(self.series).get(self.index).copied()
    }

    pub fn next(&mut self, heap: &Heap) -> Option<Value> {
        let cell = self.peek(heap)?;
        self.index += 1;
        Some(cell)
    }
}

/// Recorded stack depths for balanced trap unwinding.
#[derive(Debug, Clone, Copy)]
pub struct Depths {
    pub frames: usize,
    pub data: usize,
    pub mold: usize,
    pub guards: (usize, usize),
}

/// One interpreter instance: heap, interner, root contexts, and the stacks
/// the GC uses as roots.
#[derive(Debug, Serialize, Deserialize)]
pub struct Machine {
    pub heap: Heap,
    pub interner: Interner,
    /// The lib context natives are bound into.
    pub lib: HeapId,
    /// The user context top-level code binds into.
    pub user: HeapId,
    /// Live invocations, innermost last. A GC root set.
    pub frames: Vec<FrameInfo>,
    /// Scratch value stack (reduce and friends). A GC root.
    pub data_stack: Vec<Value>,
    /// Mold buffer stack; balanced like the others.
    pub mold_stack: Vec<String>,
    /// Polled between steps; raises a halt throw at the next safe point.
    pub halt_requested: bool,
    /// Collected print output, drained by the session into its writer.
    pub output: String,
    /// Evaluator recursion depth, bounded by the tracker.
    depth: usize,
}

impl Machine {
    pub fn new(heap: Heap, interner: Interner, lib: HeapId, user: HeapId) -> Self {
        Self {
            heap,
            interner,
            lib,
            user,
            frames: Vec::new(),
            data_stack: Vec::new(),
            mold_stack: Vec::new(),
            halt_requested: false,
            output: String::new(),
            depth: 0,
        }
    }

    // --- GC ----------------------------------------------------------------

    /// Runs a collection with the machine's full root set.
    pub fn collect_garbage(&mut self) -> usize {
        if !self.heap.gc_active() {
            return 0;
        }
        let mut root_ids = vec![self.lib, self.user];
        for frame in &self.frames {
            root_ids.push(frame.action);
            root_ids.push(frame.varlist);
            root_ids.extend_from_slice(&frame.owned_handles);
        }
        let root_values = self.data_stack.clone();
        self.heap.collect(&root_values, &root_ids)
    }

    // --- balanced-depth bookkeeping ----------------------------------------

    #[must_use]
    pub fn depths(&self) -> Depths {
        Depths {
            frames: self.frames.len(),
            data: self.data_stack.len(),
            mold: self.mold_stack.len(),
            guards: self.heap.guard_depth(),
        }
    }

    /// Restores all stacks to recorded depths after an unwind, tearing down
    /// any frames that were abandoned mid-flight.
    pub fn restore_depths(&mut self, depths: Depths) {
        while self.frames.len() > depths.frames {
            let info = self.frames.pop().expect("length checked");
            release_frame_handles(&mut self.heap, &info);
            teardown_frame(&mut self.heap, info.varlist);
        }
        self.data_stack.truncate(depths.data);
        self.mold_stack.truncate(depths.mold);
        self.heap.restore_guard_depth(depths.guards);
    }

    // --- word access -------------------------------------------------------

    /// Quiet fetch for lookahead: no errors, just "is there an action here".
    fn fetch_word_quiet(&self, word: &Word, specifier: Specifier) -> Option<Value> {
        let (varlist, slot) = bind::resolve_binding(&self.heap, &word.binding, specifier).ok()?;
        let ctx = self.heap.ctx(varlist);
        if ctx.inaccessible {
            return None;
        }
        let value = *ctx.slot(slot);
        if value.is_unset() { None } else { Some(value) }
    }

    // --- evaluation --------------------------------------------------------

    /// Evaluates a block value to its end, returning the last result
    /// (null when nothing produced output).
    pub fn eval_seq(&mut self, seq: &Seq, outer: Specifier) -> RunResult<Value> {
        let mut feed = Feed::for_seq(seq, outer);
        self.eval_feed_to_end(&mut feed)
    }

    /// TO_END driver: steps until the feed is exhausted.
    pub fn eval_feed_to_end(&mut self, feed: &mut Feed) -> RunResult<Value> {
        let limit = self.heap.tracker.max_recursion_depth();
        if self.depth >= limit {
            return Err(crate::resource::ResourceError::RecursionDepth { limit }.into());
        }
        self.depth += 1;
        self.heap.guard(feed.series);
        let result = self.eval_to_end_inner(feed);
        self.heap.drop_guard();
        self.depth -= 1;
        // Raised errors pick up provenance from the raising array.
        result.map_err(|err| {
            let file_line = self.heap.array(feed.series).file_line;
            match file_line {
                Some((file, line)) => {
                    let name = self.interner.spelling(file).to_owned();
                    err.with_location(Some(&name), Some(line), None)
                }
                None => err,
            }
        })
    }

    fn eval_to_end_inner(&mut self, feed: &mut Feed) -> RunResult<Value> {
        let mut out: Option<Value> = None;
        while !feed.at_end(&self.heap) {
            if self.halt_requested {
                self.halt_requested = false;
                return Err(RunError::Halt);
            }
            if let Some(value) = self.eval_step(feed, false)? {
                out = Some(value);
            }
        }
        Ok(out.unwrap_or(Value::Null))
    }

    /// One step: consumes one expression, returns its result, or `None`
    /// when the expression was invisible (the out cell stays stale).
    pub fn eval_step(&mut self, feed: &mut Feed, tight: bool) -> RunResult<Option<Value>> {
        let Some(cell) = feed.next(&self.heap) else {
            return Ok(None);
        };
        let produced = self.dispatch_cell(cell, feed)?;
        match produced {
            None => Ok(None),
            Some(mut value) => {
                if !tight {
                    value = self.lookahead_enfix(feed, value)?;
                }
                Ok(Some(value))
            }
        }
    }

    /// Steps until a value is produced; invisible expressions are skipped.
    fn eval_step_required(&mut self, feed: &mut Feed, tight: bool, wanted: &str) -> RunResult<Value> {
        loop {
            if feed.at_end(&self.heap) {
                return Err(RunError::fail(
                    ErrorId::NeedNonEnd,
                    format!("{wanted} needed a value but the input ended"),
                ));
            }
            if let Some(value) = self.eval_step(feed, tight)? {
                return Ok(value);
            }
        }
    }

    /// Post-step lookahead: while the next cell resolves to an enfix action,
    /// feed it the just-produced result as its first argument.
    fn lookahead_enfix(&mut self, feed: &mut Feed, mut left: Value) -> RunResult<Value> {
        loop {
            let Some(Value::Word(w)) = feed.peek(&self.heap) else {
                return Ok(left);
            };
            if w.kind != WordKind::Plain {
                return Ok(left);
            }
            let Some(Value::Action(act)) = self.fetch_word_quiet(&w, feed.specifier) else {
                return Ok(left);
            };
            if !self.heap.action_body(act.action).enfix {
                return Ok(left);
            }
            feed.next(&self.heap);
            match self.invoke_action(act, Some(w.symbol), feed, &[], Some(left))? {
                Some(value) => left = value,
                None => return Ok(left),
            }
        }
    }

    /// Kind dispatch for one consumed cell.
    fn dispatch_cell(&mut self, cell: Value, feed: &mut Feed) -> RunResult<Option<Value>> {
        match cell {
            Value::Word(w) => match w.kind {
                WordKind::Plain => {
                    let value = bind::read_word(&self.heap, &self.interner, &w, feed.specifier)?;
                    if let Value::Action(act) = value {
                        self.invoke_action(act, Some(w.symbol), feed, &[], None)
                    } else {
                        Ok(Some(value))
                    }
                }
                WordKind::Set => {
                    let value = self.eval_step_required(feed, false, "set-word")?;
                    bind::write_word(&mut self.heap, &w, feed.specifier, value)?;
                    Ok(Some(value))
                }
                WordKind::Get => {
                    let (varlist, slot) = bind::resolve_binding(&self.heap, &w.binding, feed.specifier)?;
                    let ctx = self.heap.ctx(varlist);
                    if ctx.inaccessible {
                        return Err(RunError::fail(
                            ErrorId::Inaccessible,
                            "get-word refers to a frame that has ended",
                        ));
                    }
                    let value = *ctx.slot(slot);
                    // Fetch is inert; an unset slot reads as null.
                    Ok(Some(if value.is_unset() { Value::Null } else { value }))
                }
                WordKind::Sym => Ok(Some(cell)),
            },
            Value::Seq(s) => match s.kind {
                SeqKind::Group | SeqKind::SetGroup | SeqKind::GetGroup | SeqKind::SymGroup => {
                    let mut inner = Feed::for_seq(&s, feed.specifier);
                    self.eval_feed_to_end(&mut inner).map(Some)
                }
                SeqKind::Path => self.eval_path_invoking(&s, feed),
                SeqKind::GetPath => self.eval_get_path(&s, feed.specifier).map(Some),
                SeqKind::SetPath => self.eval_set_path(&s, feed).map(Some),
                SeqKind::SymPath => Ok(Some(cell)),
                _ => {
                    // Inert arrays: attach the live specifier so relative
                    // content stays resolvable once the value travels.
                    let mut s = s;
                    if matches!(s.binding, Binding::Unbound)
                        && let Some(frame) = feed.specifier.frame
                        && self.heap.array(s.series).relative_to.is_some()
                    {
                        s.binding = Binding::Context { ctx: frame, index: 0 };
                    }
                    Ok(Some(Value::Seq(s)))
                }
            },
            Value::Action(act) => self.invoke_action(act, None, feed, &[], None),
            Value::Quoted(q) => Ok(Some(unquote_one(&mut self.heap, q)?)),
            // Everything else is inert.
            other => Ok(Some(other)),
        }
    }

    // --- paths -------------------------------------------------------------

    /// Plain-path evaluation: picking that may end in an action invocation
    /// with path-supplied refinements.
    fn eval_path_invoking(&mut self, seq: &Seq, feed: &mut Feed) -> RunResult<Option<Value>> {
        let spec = feed.specifier.derive(&seq.binding);
        match self.walk_path(seq, spec, false)? {
            PathOutcome::Value(v) => {
                if let Value::Action(act) = v {
                    // A path ending in an action invokes it (obj/method).
                    self.invoke_action(act, None, feed, &[], None)
                } else {
                    Ok(Some(v))
                }
            }
            PathOutcome::ActionCall {
                act,
                label,
                refinements,
            } => self.invoke_action(act, label, feed, &refinements, None),
        }
    }

    /// Get-path: fetch without invoking. Refinements specialize nothing
    /// here; their presence is an error.
    pub fn eval_get_path(&mut self, seq: &Seq, outer: Specifier) -> RunResult<Value> {
        let spec = outer.derive(&seq.binding);
        match self.walk_path(seq, spec, false)? {
            PathOutcome::Value(v) => Ok(v),
            PathOutcome::ActionCall { act, refinements, .. } => {
                if refinements.is_empty() {
                    Ok(Value::Action(act))
                } else {
                    Err(RunError::fail(
                        ErrorId::InvalidPath,
                        "get-path cannot carry refinements",
                    ))
                }
            }
        }
    }

    /// Resolves a path or word value to an action plus the refinements it
    /// names, without invoking. The specialization natives use this to read
    /// their targets.
    pub(crate) fn path_to_action(&mut self, target: &Value, outer: Specifier) -> RunResult<(ActRef, Vec<SymbolId>)> {
        match target {
            Value::Action(act) => Ok((*act, Vec::new())),
            Value::Word(w) => {
                let value = bind::read_word(&self.heap, &self.interner, w, outer)?;
                let Value::Action(act) = value else {
                    return Err(RunError::fail(
                        ErrorId::BadSpecializee,
                        format!("{} is not an action", self.interner.spelling(w.symbol)),
                    ));
                };
                Ok((act, Vec::new()))
            }
            Value::Seq(s) if s.kind.is_path() => {
                let spec = outer.derive(&s.binding);
                match self.walk_path(s, spec, false)? {
                    PathOutcome::ActionCall { act, refinements, .. } => Ok((act, refinements)),
                    PathOutcome::Value(Value::Action(act)) => Ok((act, Vec::new())),
                    PathOutcome::Value(other) => Err(RunError::fail(
                        ErrorId::BadSpecializee,
                        format!("path names a {}, not an action", other.kind()),
                    )),
                }
            }
            other => Err(RunError::fail(
                ErrorId::BadSpecializee,
                format!("cannot resolve a {} to an action", other.kind()),
            )),
        }
    }

    /// Set-path: evaluate the right-hand side, then store through the path.
    fn eval_set_path(&mut self, seq: &Seq, feed: &mut Feed) -> RunResult<Value> {
        let value = self.eval_step_required(feed, false, "set-path")?;
        let spec = feed.specifier.derive(&seq.binding);
        self.store_through_path(seq, spec, value)?;
        Ok(value)
    }

    /// Walks path elements, picking through containers.
    fn walk_path(&mut self, seq: &Seq, spec: Specifier, _for_store: bool) -> RunResult<PathOutcome> {
        let elems: Vec<Value> = self.heap.array(seq.series).slice_from(seq.index).to_vec();
        if elems.is_empty() {
            return Err(RunError::fail(ErrorId::InvalidPath, "empty path"));
        }
        let mut label: Option<SymbolId> = None;
        let mut current = match &elems[0] {
            Value::Word(w) => {
                label = Some(w.symbol);
                bind::read_word(&self.heap, &self.interner, w, spec)?
            }
            Value::Seq(g) if g.kind.is_group() => self.eval_seq(g, spec)?,
            other => *other,
        };

        let mut i = 1;
        while i < elems.len() {
            if let Value::Action(act) = current {
                // Remaining elements are refinement requests, in call order.
                let mut refinements = Vec::new();
                for elem in &elems[i..] {
                    let sym = match elem {
                        Value::Word(w) if w.kind == WordKind::Plain => w.symbol,
                        Value::Seq(g) if g.kind.is_group() => {
                            let v = self.eval_seq(g, spec)?;
                            let Value::Word(w) = v else {
                                return Err(RunError::fail(
                                    ErrorId::BadRefine,
                                    "group in refinement position must produce a word",
                                ));
                            };
                            w.symbol
                        }
                        other => {
                            return Err(RunError::fail(
                                ErrorId::BadRefine,
                                format!("{} cannot name a refinement", other),
                            ));
                        }
                    };
                    refinements.push(sym);
                }
                return Ok(PathOutcome::ActionCall {
                    act,
                    label,
                    refinements,
                });
            }
            let elem = match &elems[i] {
                Value::Seq(g) if g.kind.is_group() => self.eval_seq(g, spec)?,
                other => *other,
            };
            if let Value::Word(w) = &elems[i] {
                label = Some(w.symbol);
            }
            current = self.pick_step(current, elem, spec)?;
            i += 1;
        }
        Ok(PathOutcome::Value(current))
    }

    /// One pick: container x selector -> value.
    pub(crate) fn pick_step(&mut self, container: Value, selector: Value, spec: Specifier) -> RunResult<Value> {
        match container {
            // Picking through a literal delegates to the unescaped value
            // and preserves the quoting depth on the result.
            Value::Quoted(q) => {
                let inner = quoted_payload(&self.heap, q);
                let picked = self.pick_step(inner, selector, spec)?;
                let cell = self.heap.alloc(HeapData::QuotedCell(picked))?;
                Ok(Value::Quoted(QuotedRef { depth: q.depth, cell }))
            }
            Value::Context(c) => {
                let Value::Word(w) = selector else {
                    return Err(RunError::fail(
                        ErrorId::InvalidPath,
                        format!("cannot pick a {} field with {}", c.kind.cell_kind(), selector),
                    ));
                };
                let Some(slot) = crate::context::find_slot(&self.heap, &self.interner, c.varlist, w.symbol) else {
                    return Err(RunError::fail(
                        ErrorId::InvalidPath,
                        format!("{} is not in the context", self.interner.spelling(w.symbol)),
                    ));
                };
                let ctx = self.heap.ctx(c.varlist);
                if ctx.inaccessible {
                    return Err(RunError::fail(ErrorId::Inaccessible, "context frame has ended"));
                }
                let value = *ctx.slot(slot);
                if value.is_unset() {
                    return Err(RunError::fail(
                        ErrorId::NoValue,
                        format!("{} has no value", self.interner.spelling(w.symbol)),
                    ));
                }
                Ok(value)
            }
            Value::Seq(s) => match selector {
                Value::Integer(n) => {
                    if n < 1 {
                        return Ok(Value::Null);
                    }
                    let at = s.index as usize + (n - 1) as usize;
                    Ok(self.heap.array(s.series).get(at).copied().unwrap_or(Value::Null))
                }
                Value::Word(w) => {
                    // select: find the word, return what follows it.
                    let cells: Vec<Value> = self.heap.array(s.series).slice_from(s.index).to_vec();
                    for (pos, cell) in cells.iter().enumerate() {
                        if let Value::Word(cw) = cell
                            && self.interner.same_spelling(cw.symbol, w.symbol)
                        {
                            return Ok(cells.get(pos + 1).copied().unwrap_or(Value::Null));
                        }
                    }
                    Ok(Value::Null)
                }
                other => Err(RunError::fail(
                    ErrorId::InvalidPath,
                    format!("cannot pick a block with {other}"),
                )),
            },
            Value::Strand(s) => {
                let Value::Integer(n) = selector else {
                    return Err(RunError::fail(ErrorId::InvalidPath, "strings pick by integer"));
                };
                if n < 1 {
                    return Ok(Value::Null);
                }
                let at = s.index as usize + (n - 1) as usize;
                Ok(self
                    .heap
                    .text_mut(s.series)
                    .char_at(at)
                    .map_or(Value::Null, Value::Char))
            }
            Value::Binary(b) => {
                let Value::Integer(n) = selector else {
                    return Err(RunError::fail(ErrorId::InvalidPath, "binaries pick by integer"));
                };
                if n < 1 {
                    return Ok(Value::Null);
                }
                let at = b.index as usize + (n - 1) as usize;
                Ok(self
                    .heap
                    .binary(b.series)
                    .as_slice()
                    .get(at)
                    .map_or(Value::Null, |byte| Value::Integer(i64::from(*byte))))
            }
            Value::Map(id) => {
                let found = crate::map::select_map(&self.heap, &self.interner, id, &selector);
                Ok(found.unwrap_or(Value::Null))
            }
            Value::Tuple(t) => {
                let Value::Integer(n) = selector else {
                    return Err(RunError::fail(ErrorId::InvalidPath, "tuples pick by integer"));
                };
                if n < 1 {
                    return Ok(Value::Null);
                }
                Ok(t.as_slice()
                    .get((n - 1) as usize)
                    .map_or(Value::Null, |part| Value::Integer(i64::from(*part))))
            }
            Value::Pair(x, y) => match &selector {
                Value::Integer(1) => Ok(Value::Decimal(x)),
                Value::Integer(2) => Ok(Value::Decimal(y)),
                Value::Word(w) if self.interner.spelling(w.symbol).eq_ignore_ascii_case("x") => {
                    Ok(Value::Decimal(x))
                }
                Value::Word(w) if self.interner.spelling(w.symbol).eq_ignore_ascii_case("y") => {
                    Ok(Value::Decimal(y))
                }
                _ => Err(RunError::fail(ErrorId::InvalidPath, "pairs pick x, y, 1, or 2")),
            },
            Value::Date(d) => {
                let Value::Word(w) = selector else {
                    return Err(RunError::fail(ErrorId::InvalidPath, "dates pick by field word"));
                };
                match self.interner.spelling(w.symbol).to_ascii_lowercase().as_str() {
                    "year" => Ok(Value::Integer(i64::from(d.year))),
                    "month" => Ok(Value::Integer(i64::from(d.month))),
                    "day" => Ok(Value::Integer(i64::from(d.day))),
                    "time" => Ok(d.nanos.map_or(Value::Null, Value::Time)),
                    field => Err(RunError::fail(
                        ErrorId::InvalidPath,
                        format!("{field} is not a date field"),
                    )),
                }
            }
            other => Err(RunError::fail(
                ErrorId::InvalidPath,
                format!("cannot pick through a {}", other.kind()),
            )),
        }
    }

    /// Stores a value through a path: walk to the penultimate container,
    /// then assign into it.
    pub fn store_through_path(&mut self, seq: &Seq, spec: Specifier, value: Value) -> RunResult<()> {
        let elems: Vec<Value> = self.heap.array(seq.series).slice_from(seq.index).to_vec();
        if elems.len() < 2 {
            return Err(RunError::fail(ErrorId::InvalidPath, "set-path needs two elements"));
        }
        let head_seq = Seq {
            kind: SeqKind::Path,
            series: seq.series,
            index: seq.index,
            binding: seq.binding,
        };
        // Walk all but the last element.
        let container = if elems.len() == 2 {
            match &elems[0] {
                Value::Word(w) => bind::read_word(&self.heap, &self.interner, w, spec)?,
                Value::Seq(g) if g.kind.is_group() => self.eval_seq(g, spec)?,
                other => *other,
            }
        } else {
            let prefix: Vec<Value> = elems[..elems.len() - 1].to_vec();
            let id = self
                .heap
                .alloc(HeapData::Array(crate::series::Array::from_values(prefix)))?;
            let sub = Seq {
                kind: SeqKind::Path,
                series: id,
                index: 0,
                binding: head_seq.binding,
            };
            match self.walk_path(&sub, spec, true)? {
                PathOutcome::Value(v) => v,
                PathOutcome::ActionCall { .. } => {
                    return Err(RunError::fail(ErrorId::InvalidPath, "cannot assign into an action"));
                }
            }
        };
        let last = match &elems[elems.len() - 1] {
            Value::Seq(g) if g.kind.is_group() => self.eval_seq(g, spec)?,
            other => *other,
        };
        self.assign_into(container, last, value)
    }

    pub(crate) fn assign_into(&mut self, container: Value, selector: Value, value: Value) -> RunResult<()> {
        match container {
            Value::Context(c) => {
                let Value::Word(w) = selector else {
                    return Err(RunError::fail(ErrorId::InvalidPath, "context fields are set by word"));
                };
                let Some(slot) = crate::context::find_slot(&self.heap, &self.interner, c.varlist, w.symbol) else {
                    return Err(RunError::fail(
                        ErrorId::InvalidPath,
                        format!("{} is not in the context", self.interner.spelling(w.symbol)),
                    ));
                };
                let ctx = self.heap.ctx_mut(c.varlist);
                if ctx.inaccessible {
                    return Err(RunError::fail(ErrorId::Inaccessible, "context frame has ended"));
                }
                ctx.set_slot(slot, value);
                Ok(())
            }
            Value::Seq(s) => {
                let Value::Integer(n) = selector else {
                    return Err(RunError::fail(ErrorId::InvalidPath, "blocks are poked by integer"));
                };
                ensure_array_mutable(&self.heap, s.series)?;
                let at = s.index as usize + (n - 1).max(0) as usize;
                if n < 1 || at >= s.index as usize + self.heap.array(s.series).slice_from(s.index).len() {
                    return Err(RunError::fail(ErrorId::OutOfRange, format!("poke index {n} out of range")));
                }
                self.heap.array_mut(s.series).set(at, value);
                Ok(())
            }
            Value::Map(id) => {
                crate::map::insert_map(&mut self.heap, &self.interner, id, selector, value)?;
                Ok(())
            }
            other => Err(RunError::fail(
                ErrorId::InvalidPath,
                format!("cannot store through a {}", other.kind()),
            )),
        }
    }

    // --- invocation --------------------------------------------------------

    /// Full action invocation: frame begin, parameter walk, dispatch,
    /// return, teardown. See the module docs for the phase structure.
    pub fn invoke_action(
        &mut self,
        act: ActRef,
        label: Option<SymbolId>,
        feed: &mut Feed,
        path_refinements: &[SymbolId],
        enfix_left: Option<Value>,
    ) -> RunResult<Option<Value>> {
        let (core, exemplar) = resolve_specialized(&self.heap, act.action);
        let exemplar_vars: Option<Vec<Value>> = exemplar.map(|ex| self.heap.ctx(ex).vars.clone());

        // Ordering stack: partials (reverse-stack order, i.e. the order the
        // specializing path named them) ahead of call-site refinements.
        let mut ordered: Vec<SymbolId> = Vec::new();
        if let Some(vars) = &exemplar_vars {
            let mut partials: Vec<(u16, SymbolId)> = vars
                .iter()
                .filter_map(|v| match v {
                    Value::PartialRefinement { symbol, stack_pos } => Some((*stack_pos, *symbol)),
                    _ => None,
                })
                .collect();
            partials.sort_by_key(|(pos, _)| *pos);
            ordered.extend(partials.into_iter().map(|(_, sym)| sym));
        }
        ordered.extend_from_slice(path_refinements);

        let body = self.heap.action_body(core);
        let params: Vec<Param> = body.params.clone();
        let returns = body.returns;

        // Validate the ordering stack against the paramlist up front:
        // unresolved refinements at path-end are an error.
        let mut ordered_positions: Vec<usize> = Vec::with_capacity(ordered.len());
        for sym in &ordered {
            let pos = params
                .iter()
                .position(|p| {
                    matches!(p.class, ParamClass::Refinement) && self.interner.same_spelling(p.symbol, *sym)
                })
                .ok_or_else(|| {
                    RunError::fail(
                        ErrorId::BadRefine,
                        format!("{} is not a refinement of the action", self.interner.spelling(*sym)),
                    )
                })?;
            ordered_positions.push(pos);
        }

        let frame = make_frame(&mut self.heap, core)?;
        self.frames.push(FrameInfo {
            action: core,
            varlist: frame,
            owned_handles: Vec::new(),
        });
        let result = self.fill_and_dispatch(
            core,
            frame,
            &params,
            exemplar_vars.as_deref(),
            &ordered_positions,
            feed,
            enfix_left,
        );
        let info = self.frames.pop().expect("invocation frame still on stack");
        release_frame_handles(&mut self.heap, &info);
        teardown_frame(&mut self.heap, frame);

        // Return-type check happens on the way out.
        if let (Ok(Some(value)), Some(rt)) = (&result, returns)
            && !rt.contains(value.kind())
        {
            return Err(RunError::fail(
                ErrorId::ExpectArg,
                format!("return value of type {} not in declared returns", value.kind()),
            ));
        }
        result
    }

    /// Parameter walk plus dispatch. Split out so teardown in the caller
    /// runs on every path.
    fn fill_and_dispatch(
        &mut self,
        core: HeapId,
        frame: HeapId,
        params: &[Param],
        exemplar_vars: Option<&[Value]>,
        ordered_positions: &[usize],
        feed: &mut Feed,
        mut enfix_left: Option<Value>,
    ) -> RunResult<Option<Value>> {
        // Owning refinement for each param position.
        let mut owner: Vec<Option<usize>> = vec![None; params.len()];
        let mut current_refinement = None;
        for (pos, param) in params.iter().enumerate() {
            match param.class {
                ParamClass::Refinement => current_refinement = Some(pos),
                ParamClass::Local => {}
                _ => owner[pos] = current_refinement,
            }
        }
        let enabled_by_call: AHashSet<usize> = ordered_positions.iter().copied().collect();

        // Phase 1: paramlist-order walk.
        for (pos, param) in params.iter().enumerate() {
            let slot = pos + 1;
            let ex = exemplar_vars.and_then(|vars| vars.get(slot)).copied();
            let specialized = matches!(ex, Some(v) if !v.is_unset() && !matches!(v, Value::PartialRefinement { .. }));

            let value = match param.class {
                ParamClass::Local => Value::Unset,
                ParamClass::Refinement => {
                    if enabled_by_call.contains(&pos) {
                        Value::Logic(true)
                    } else if specialized {
                        ex.expect("specialized checked")
                    } else {
                        Value::Null
                    }
                }
                _ => {
                    if specialized {
                        let v = ex.expect("specialized checked");
                        // Null marks the argument of a disabled refinement;
                        // it bypasses the typeset like any disabled arg.
                        if !matches!(v, Value::Null) {
                            self.check_arg(param, &v)?;
                        }
                        v
                    } else {
                        match owner[pos] {
                            None => {
                                // Positional: enfix left feeds the first one.
                                let v = if let Some(left) = enfix_left.take() {
                                    left
                                } else {
                                    self.gather_arg(feed, param.class)?
                                };
                                self.check_arg(param, &v)?;
                                v
                            }
                            Some(rpos) => {
                                if enabled_by_call.contains(&rpos) {
                                    // Deferred to phase 2, call-site order.
                                    Value::Unset
                                } else {
                                    // Disabled refinement: args are null.
                                    Value::Null
                                }
                            }
                        }
                    }
                }
            };
            self.heap.ctx_mut(frame).set_slot(slot, value);
        }

        // Phase 2: dependent args of requested refinements, in the order
        // the refinements appeared at the call site (partials first).
        for &rpos in ordered_positions {
            let deps: Vec<usize> = {
                let body = self.heap.action_body(core);
                body.refinement_deps(rpos)
            };
            for dep in deps {
                if !self.heap.ctx(frame).slot(dep + 1).is_unset() {
                    continue; // specialized earlier
                }
                let param = params[dep];
                let v = self.gather_arg(feed, param.class)?;
                self.check_arg(&param, &v)?;
                self.heap.ctx_mut(frame).set_slot(dep + 1, v);
            }
        }

        self.dispatch_frame(core, frame)
    }

    /// Runs a filled frame through its action's dispatcher.
    pub fn dispatch_frame(&mut self, core: HeapId, frame: HeapId) -> RunResult<Option<Value>> {
        let dispatcher = self.heap.action_body(core).dispatcher.clone();
        match dispatcher {
            Dispatcher::Native(native) => native.call(self, frame),
            Dispatcher::Interpreted { body } => {
                let seq = Seq::new(SeqKind::Block, body);
                let result = self.eval_seq(&seq, Specifier::for_frame(frame));
                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(RunError::Throw { label, value })
                        if matches!(label, Value::Context(CtxRef { varlist, .. }) if varlist == frame) =>
                    {
                        Ok(Some(value))
                    }
                    Err(other) => Err(other),
                }
            }
            Dispatcher::Adapted { prelude, base } => {
                let seq = Seq::new(SeqKind::Block, prelude);
                self.eval_seq(&seq, Specifier::for_frame(frame))?;
                let (base_core, _) = resolve_specialized(&self.heap, base);
                self.heap.ctx_mut(frame).action = Some(base_core);
                let result = self.dispatch_frame(base_core, frame);
                self.heap.ctx_mut(frame).action = Some(core);
                result
            }
            Dispatcher::Chained { pipeline } => {
                let mut iter = pipeline.iter();
                let first = *iter.next().expect("chain pipelines are non-empty");
                let (first_core, _) = resolve_specialized(&self.heap, first);
                self.heap.ctx_mut(frame).action = Some(first_core);
                let mut result = self.dispatch_frame(first_core, frame)?;
                self.heap.ctx_mut(frame).action = Some(core);
                for &next in iter {
                    let input = result.unwrap_or(Value::Null);
                    result = self.invoke_with_values(next, &[input])?;
                }
                Ok(result)
            }
            Dispatcher::Specialized { .. } | Dispatcher::Hijacked { .. } => {
                // Normally resolved before dispatch; a reified frame can
                // still reach here when its action was hijacked after the
                // frame was made.
                let (resolved, _) = resolve_specialized(&self.heap, core);
                assert!(resolved != core, "specialization chain failed to resolve");
                self.dispatch_frame(resolved, frame)
            }
        }
    }

    /// Invokes an action on positional values with no feed: every visible
    /// ordinary parameter takes one value, refinements stay disabled.
    /// The workhorse behind chained actions and host-side application.
    pub fn invoke_with_values(&mut self, action: HeapId, args: &[Value]) -> RunResult<Option<Value>> {
        let (core, exemplar) = resolve_specialized(&self.heap, action);
        let exemplar_vars: Option<Vec<Value>> = exemplar.map(|ex| self.heap.ctx(ex).vars.clone());
        let params: Vec<Param> = self.heap.action_body(core).params.clone();
        let frame = make_frame(&mut self.heap, core)?;
        self.frames.push(FrameInfo {
            action: core,
            varlist: frame,
            owned_handles: Vec::new(),
        });
        let result = (|| {
            let mut next_arg = 0usize;
            let mut in_refinement = false;
            for (pos, param) in params.iter().enumerate() {
                let slot = pos + 1;
                let ex = exemplar_vars.as_ref().and_then(|vars| vars.get(slot)).copied();
                let specialized = matches!(ex, Some(v) if !v.is_unset() && !matches!(v, Value::PartialRefinement { .. }));
                let value = match param.class {
                    ParamClass::Local => Value::Unset,
                    ParamClass::Refinement => {
                        in_refinement = true;
                        if specialized { ex.expect("checked") } else { Value::Null }
                    }
                    _ => {
                        if specialized {
                            ex.expect("checked")
                        } else if in_refinement {
                            Value::Null
                        } else if next_arg < args.len() {
                            let v = args[next_arg];
                            next_arg += 1;
                            self.check_arg(param, &v)?;
                            v
                        } else {
                            return Err(RunError::fail(
                                ErrorId::NeedNonEnd,
                                "not enough arguments for applied action",
                            ));
                        }
                    }
                };
                self.heap.ctx_mut(frame).set_slot(slot, value);
            }
            self.dispatch_frame(core, frame)
        })();
        let info = self.frames.pop().expect("applied frame still on stack");
        release_frame_handles(&mut self.heap, &info);
        teardown_frame(&mut self.heap, frame);
        result
    }

    /// Gathers one argument from the feed per parameter class.
    fn gather_arg(&mut self, feed: &mut Feed, class: ParamClass) -> RunResult<Value> {
        match class {
            ParamClass::Normal => self.eval_step_required(feed, false, "argument"),
            ParamClass::Tight => self.eval_step_required(feed, true, "argument"),
            ParamClass::HardQuote => feed
                .next(&self.heap)
                .ok_or_else(|| RunError::fail(ErrorId::NeedNonEnd, "hard-quoted argument missing")),
            ParamClass::SoftQuote => {
                let cell = feed
                    .next(&self.heap)
                    .ok_or_else(|| RunError::fail(ErrorId::NeedNonEnd, "soft-quoted argument missing"))?;
                match cell {
                    Value::Seq(s) if s.kind.is_group() => {
                        let mut inner = Feed::for_seq(&s, feed.specifier);
                        self.eval_feed_to_end(&mut inner)
                    }
                    Value::Word(w) if w.kind == WordKind::Get => {
                        bind::read_word(&self.heap, &self.interner, &w, feed.specifier)
                    }
                    Value::Seq(s) if s.kind == SeqKind::GetPath => self.eval_get_path(&s, feed.specifier),
                    literal => Ok(literal),
                }
            }
            ParamClass::Refinement | ParamClass::Local => {
                unreachable!("refinements and locals are not gathered from the feed")
            }
        }
    }

    fn check_arg(&self, param: &Param, value: &Value) -> RunResult<()> {
        if value.is_unset() {
            return Err(RunError::fail(ErrorId::NeedNonEnd, "argument slot left unset"));
        }
        if param.types.contains(value.kind()) {
            Ok(())
        } else {
            Err(RunError::fail(
                ErrorId::ExpectArg,
                format!(
                    "{} does not accept {} arguments",
                    self.interner.spelling(param.symbol),
                    value.kind()
                ),
            ))
        }
    }

    // --- misc helpers ------------------------------------------------------

    /// Frame argument access for natives: parameter position -> value.
    #[must_use]
    pub fn arg(&self, frame: HeapId, pos: usize) -> Value {
        *self.heap.ctx(frame).slot(pos + 1)
    }

    /// True when the refinement at `pos` was requested for this call.
    #[must_use]
    pub fn refinement_on(&self, frame: HeapId, pos: usize) -> bool {
        self.arg(frame, pos).is_truthy()
    }

    /// Value-equality through the machine's heap and interner.
    #[must_use]
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        equal_values(a, b, &self.heap, &self.interner)
    }
}

/// Strips one quoting level; depth 1 releases the payload.
pub fn unquote_one(heap: &mut Heap, q: QuotedRef) -> RunResult<Value> {
    if q.depth <= 1 {
        Ok(quoted_payload(heap, q))
    } else {
        Ok(Value::Quoted(QuotedRef {
            depth: q.depth - 1,
            cell: q.cell,
        }))
    }
}

/// Wraps a value in one quoting level. Quoting an already-quoted value
/// bumps the shared container's depth without allocating.
pub fn quote_one(heap: &mut Heap, value: Value) -> RunResult<Value> {
    match value {
        Value::Quoted(q) if q.depth < u8::MAX => Ok(Value::Quoted(QuotedRef {
            depth: q.depth + 1,
            cell: q.cell,
        })),
        other => {
            let cell = heap.alloc(HeapData::QuotedCell(other))?;
            Ok(Value::Quoted(QuotedRef { depth: 1, cell }))
        }
    }
}

/// Releases the API handles a frame owns, as its lifetime ends.
fn release_frame_handles(heap: &mut Heap, info: &FrameInfo) {
    for &node in &info.owned_handles {
        if heap.is_live(node) {
            heap.set_root(node, false);
            heap.free(node);
        }
    }
}

/// Mutation guard shared by the series natives.
pub fn ensure_array_mutable(heap: &Heap, series: HeapId) -> RunResult<()> {
    let flags = heap.array(series).flags;
    if !flags.can_mutate() {
        return Err(RunError::fail(ErrorId::Locked, "series is protected from mutation"));
    }
    Ok(())
}

/// Outcome of a path walk.
enum PathOutcome {
    Value(Value),
    ActionCall {
        act: ActRef,
        label: Option<SymbolId>,
        refinements: Vec<SymbolId>,
    },
}
