//! Symbol interning: canonical spellings, synonym rings, binder indices.
//!
//! Every distinct spelling gets its own symbol node; case variants of the
//! same word are linked in a synonym ring whose canonical representative is
//! whichever spelling was interned first. Word equality at the cell level is
//! id equality on the spelling; case-insensitive equality compares canons.
//!
//! Symbols also host the binder index side-channel: a scratch pair of
//! integers used while a bind operation walks code. Only one binder may be
//! in flight at a time; the indices are zero whenever none is.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use unicode_casefold::UnicodeCaseFold;

/// Index into the interner's symbol table.
///
/// `u32` keeps word cells small; four billion symbols is plenty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(u32);

impl SymbolId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One interned spelling. Immortal for the life of the session.
#[derive(Debug, Serialize, Deserialize)]
struct Symbol {
    spelling: Box<str>,
    /// Canonical representative of this spelling's synonym ring.
    canon: SymbolId,
    /// Next spelling in the ring; self-linked when the ring has one member.
    next_synonym: SymbolId,
    /// Binder scratch: positive = slot N of the active context, negative =
    /// lib context slot, zero = not bound. Must be zero outside a bind.
    binder_high: i32,
    /// Secondary binder scratch for overlay binds.
    binder_low: i32,
}

/// The process-wide symbol table.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Interner {
    symbols: Vec<Symbol>,
    /// Exact spelling -> symbol.
    exact: AHashMap<Box<str>, SymbolId>,
    /// Case-folded spelling -> canon symbol.
    folded: AHashMap<Box<str>, SymbolId>,
    /// Single-owner token for the binder index side-channel.
    binder_active: bool,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a spelling, returning its symbol id.
    ///
    /// A new case variant of an existing word joins that word's synonym
    /// ring; the first-interned spelling stays the canon.
    pub fn intern(&mut self, spelling: &str) -> SymbolId {
        if let Some(&id) = self.exact.get(spelling) {
            return id;
        }
        let folded: String = spelling.case_fold().collect();
        let id = SymbolId(self.symbols.len() as u32);
        let canon = *self.folded.entry(folded.into_boxed_str()).or_insert(id);
        self.symbols.push(Symbol {
            spelling: spelling.into(),
            canon,
            next_synonym: id,
            binder_high: 0,
            binder_low: 0,
        });
        self.exact.insert(spelling.into(), id);
        if canon != id {
            // Splice the new spelling into the ring after the canon.
            let canon_next = self.symbols[canon.index()].next_synonym;
            self.symbols[canon.index()].next_synonym = id;
            self.symbols[id.index()].next_synonym = canon_next;
        }
        id
    }

    /// Looks up a spelling without interning it.
    #[must_use]
    pub fn try_lookup(&self, spelling: &str) -> Option<SymbolId> {
        self.exact.get(spelling).copied()
    }

    #[must_use]
    pub fn spelling(&self, id: SymbolId) -> &str {
        &self.symbols[id.index()].spelling
    }

    /// The canonical representative of this spelling's synonym ring.
    #[must_use]
    pub fn canon(&self, id: SymbolId) -> SymbolId {
        self.symbols[id.index()].canon
    }

    /// Case-insensitive spelling equality: same synonym ring.
    #[must_use]
    pub fn same_spelling(&self, a: SymbolId, b: SymbolId) -> bool {
        a == b || self.canon(a) == self.canon(b)
    }

    /// Walks the synonym ring starting at (and including) `id`.
    #[must_use]
    pub fn synonyms(&self, id: SymbolId) -> Vec<SymbolId> {
        let mut out = vec![id];
        let mut cur = self.symbols[id.index()].next_synonym;
        while cur != id {
            out.push(cur);
            cur = self.symbols[cur.index()].next_synonym;
        }
        out
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// The binder scratch index for a symbol (the "high" slot).
    #[must_use]
    pub fn binder_index(&self, id: SymbolId) -> i32 {
        self.symbols[self.canon(id).index()].binder_high
    }

    fn set_binder_index(&mut self, id: SymbolId, value: i32) {
        let canon = self.canon(id);
        self.symbols[canon.index()].binder_high = value;
    }

    #[must_use]
    pub fn binder_low(&self, id: SymbolId) -> i32 {
        self.symbols[self.canon(id).index()].binder_low
    }

    fn set_binder_low(&mut self, id: SymbolId, value: i32) {
        let canon = self.canon(id);
        self.symbols[canon.index()].binder_low = value;
    }

    /// Verifies the invariant that no binder indices are left behind.
    /// Cheap enough to call from tests after any balanced bind.
    #[must_use]
    pub fn binder_indices_clear(&self) -> bool {
        self.symbols.iter().all(|s| s.binder_high == 0 && s.binder_low == 0)
    }
}

/// Short-lived scratch association from symbols to slot indices.
///
/// Exactly one may exist at a time: the indices live on the symbols
/// themselves, so a second in-flight binder would scribble over the first.
/// Dropping the binder clears every index it set, restoring the all-zero
/// invariant. A binder must be dropped before any operation that can fault
/// or run user code.
#[derive(Debug)]
pub struct Binder {
    touched: Vec<SymbolId>,
}

impl Binder {
    /// Claims the binder token.
    ///
    /// # Panics
    /// Panics if a binder is already in flight; re-entrant binds are a bug.
    pub fn begin(interner: &mut Interner) -> Self {
        assert!(!interner.binder_active, "re-entrant bind: a binder is already in flight");
        interner.binder_active = true;
        Self { touched: Vec::new() }
    }

    /// Associates a symbol with a (1-based) context slot.
    pub fn set(&mut self, interner: &mut Interner, symbol: SymbolId, index: i32) {
        if interner.binder_index(symbol) == 0 {
            self.touched.push(interner.canon(symbol));
        }
        interner.set_binder_index(symbol, index);
    }

    /// Associates a symbol with a lib-context slot (stored negated).
    pub fn set_lib(&mut self, interner: &mut Interner, symbol: SymbolId, index: i32) {
        if interner.binder_low(symbol) == 0 {
            self.touched.push(interner.canon(symbol));
        }
        interner.set_binder_low(symbol, -index);
    }

    #[must_use]
    pub fn get(&self, interner: &Interner, symbol: SymbolId) -> i32 {
        interner.binder_index(symbol)
    }

    #[must_use]
    pub fn get_lib(&self, interner: &Interner, symbol: SymbolId) -> i32 {
        -interner.binder_low(symbol)
    }

    /// Releases the token and clears every index this binder set.
    ///
    /// Explicit rather than `Drop` so teardown can borrow the interner
    /// mutably without dance; callers must tear down on every path before
    /// anything that can fault.
    pub fn finish(self, interner: &mut Interner) {
        for sym in &self.touched {
            interner.set_binder_index(*sym, 0);
            interner.set_binder_low(*sym, 0);
        }
        interner.binder_active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut it = Interner::new();
        let a = it.intern("append");
        let b = it.intern("append");
        assert_eq!(a, b);
        assert_eq!(it.spelling(a), "append");
    }

    #[test]
    fn case_variants_share_a_ring() {
        let mut it = Interner::new();
        let lower = it.intern("foo");
        let upper = it.intern("FOO");
        let mixed = it.intern("Foo");
        assert_ne!(lower, upper);
        assert_eq!(it.canon(upper), lower, "first intern is the canon");
        assert!(it.same_spelling(lower, upper));
        assert!(it.same_spelling(upper, mixed));
        let ring = it.synonyms(lower);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn distinct_words_do_not_match() {
        let mut it = Interner::new();
        let a = it.intern("foo");
        let b = it.intern("bar");
        assert!(!it.same_spelling(a, b));
    }

    #[test]
    fn binder_clears_on_finish() {
        let mut it = Interner::new();
        let a = it.intern("alpha");
        let b = it.intern("beta");
        let mut binder = Binder::begin(&mut it);
        binder.set(&mut it, a, 1);
        binder.set(&mut it, b, 2);
        assert_eq!(binder.get(&it, a), 1);
        binder.finish(&mut it);
        assert!(it.binder_indices_clear(), "binder indices must be zero after teardown");
    }

    #[test]
    fn binder_sees_case_variants() {
        let mut it = Interner::new();
        let lower = it.intern("x");
        let upper = it.intern("X");
        let mut binder = Binder::begin(&mut it);
        binder.set(&mut it, lower, 3);
        assert_eq!(binder.get(&it, upper), 3, "binder indices live on the canon");
        binder.finish(&mut it);
    }

    #[test]
    #[should_panic(expected = "re-entrant bind")]
    fn second_binder_panics() {
        let mut it = Interner::new();
        let _first = Binder::begin(&mut it);
        let _second = Binder::begin(&mut it);
    }
}
