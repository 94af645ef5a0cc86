//! Contexts: the paired varlist/keylist nodes behind objects, modules,
//! errors, ports, and action frames.
//!
//! A varlist's slot 0 holds the archetypal self-value; named slots start at
//! index 1. Object-family contexts own a [`Keylist`] node (with an ancestor
//! back-link enabling derivation); frame contexts reuse their action's
//! paramlist as the keylist, so [`Keys`] points either way.

use serde::{Deserialize, Serialize};

use crate::{
    heap::{Heap, HeapData, HeapId},
    intern::{Interner, SymbolId},
    resource::ResourceError,
    value::{CtxKind, CtxRef, Value},
};

/// A named key in an object-family keylist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextKey {
    pub symbol: SymbolId,
    /// Hidden keys exist in storage but are invisible to reflection.
    pub hidden: bool,
}

/// Keylist node: names the slots of one or more varlists.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Keylist {
    pub keys: Vec<ContextKey>,
    /// The keylist this one was derived from, for object derivation.
    pub ancestor: Option<HeapId>,
}

/// Where a context's keys live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Keys {
    /// An owned [`Keylist`] node.
    List(HeapId),
    /// An action node; the paramlist names the slots (frame contexts).
    Action(HeapId),
}

/// A context node: one varlist plus its key source.
#[derive(Debug, Serialize, Deserialize)]
pub struct Context {
    pub kind: CtxKind,
    /// Slot 0 is the archetype; named slots are 1-based.
    pub vars: Vec<Value>,
    pub keys: Keys,
    /// Set when a frame ends without being reified: the shell survives but
    /// the cells are gone, and access reports an error.
    pub inaccessible: bool,
    /// For frames: the action whose invocation this frame is.
    pub action: Option<HeapId>,
    /// A frame value was made from this varlist; teardown keeps it alive.
    pub reified: bool,
}

impl Context {
    /// Named slot count (archetype excluded).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.vars.len().saturating_sub(1)
    }

    /// Reads a 1-based slot.
    #[must_use]
    pub fn slot(&self, index: usize) -> &Value {
        &self.vars[index]
    }

    pub fn set_slot(&mut self, index: usize, value: Value) {
        self.vars[index] = value;
    }
}

/// Allocates a context with unset slots for the given symbols.
///
/// The archetype cell at slot 0 is patched to point back at the node.
pub fn make_context(heap: &mut Heap, kind: CtxKind, symbols: &[SymbolId]) -> Result<HeapId, ResourceError> {
    let keys: Vec<ContextKey> = symbols
        .iter()
        .map(|&symbol| ContextKey { symbol, hidden: false })
        .collect();
    let keylist = heap.alloc(HeapData::Keylist(Keylist {
        keys,
        ancestor: None,
    }))?;
    let mut vars = vec![Value::Unset; symbols.len() + 1];
    vars[0] = Value::Null; // placeholder until the id exists
    let varlist = heap.alloc(HeapData::Context(Context {
        kind,
        vars,
        keys: Keys::List(keylist),
        inaccessible: false,
        action: None,
        reified: false,
    }))?;
    heap.ctx_mut(varlist).vars[0] = Value::Context(CtxRef { kind, varlist });
    Ok(varlist)
}

/// Derives a child context: copies the parent's keys and values, linking
/// the new keylist's ancestor to the parent's.
pub fn derive_context(heap: &mut Heap, parent: HeapId) -> Result<HeapId, ResourceError> {
    let (kind, parent_keys, parent_vars) = {
        let ctx = heap.ctx(parent);
        let keys = context_keys(heap, parent);
        (ctx.kind, keys, ctx.vars.clone())
    };
    let parent_keylist = match heap.ctx(parent).keys {
        Keys::List(id) => Some(id),
        Keys::Action(_) => None,
    };
    let keylist = heap.alloc(HeapData::Keylist(Keylist {
        keys: parent_keys,
        ancestor: parent_keylist,
    }))?;
    let varlist = heap.alloc(HeapData::Context(Context {
        kind,
        vars: parent_vars,
        keys: Keys::List(keylist),
        inaccessible: false,
        action: None,
        reified: false,
    }))?;
    heap.ctx_mut(varlist).vars[0] = Value::Context(CtxRef { kind, varlist });
    Ok(varlist)
}

/// All keys of a context, in slot order, hidden included.
#[must_use]
pub fn context_keys(heap: &Heap, varlist: HeapId) -> Vec<ContextKey> {
    match heap.ctx(varlist).keys {
        Keys::List(keylist) => heap.keylist(keylist).keys.clone(),
        Keys::Action(action) => heap
            .action_body(action)
            .params
            .iter()
            .map(|p| ContextKey {
                symbol: p.symbol,
                hidden: p.hidden,
            })
            .collect(),
    }
}

/// Finds the 1-based slot for a spelling, case-insensitively.
#[must_use]
pub fn find_slot(heap: &Heap, interner: &Interner, varlist: HeapId, symbol: SymbolId) -> Option<usize> {
    let keys = context_keys(heap, varlist);
    keys.iter()
        .position(|key| !key.hidden && interner.same_spelling(key.symbol, symbol))
        .map(|pos| pos + 1)
}

/// Appends a slot for a new symbol, returning its 1-based index.
///
/// Only valid for contexts owning their keylist; frame shapes are fixed by
/// their paramlist.
pub fn append_slot(heap: &mut Heap, varlist: HeapId, symbol: SymbolId) -> usize {
    let keylist = match heap.ctx(varlist).keys {
        Keys::List(id) => id,
        Keys::Action(_) => panic!("cannot expand a frame context; its shape is the paramlist"),
    };
    match heap.get_mut(keylist) {
        HeapData::Keylist(k) => k.keys.push(ContextKey { symbol, hidden: false }),
        other => panic!("expected Keylist node, found {}", other.flavor_name()),
    }
    let ctx = heap.ctx_mut(varlist);
    ctx.vars.push(Value::Unset);
    ctx.vars.len() - 1
}
