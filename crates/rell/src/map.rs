//! Maps: a pairlist of interleaved key/value cells plus a linear-probe
//! hashlist of pair indices.
//!
//! Keys compare with value equality (case-insensitive for words and
//! strings). A pair whose value slot is null is a zombie: its key is
//! invisible to reads, and the pair's storage is reused by the next insert
//! of a fresh key. The pairlist and hashlist form one graph: the map owns
//! both, and the GC marks the pairs while the hashlist carries no node ids.

use serde::{Deserialize, Serialize};

use crate::{
    error::RunResult,
    heap::{Heap, HeapData, HeapId},
    intern::Interner,
    value::{Value, equal_values},
};

const INITIAL_BUCKETS: usize = 8;

/// The heap payload of a map! value.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MapData {
    /// Interleaved key, value, key, value...
    pairs: Vec<Value>,
    /// Probe table: 0 = empty, else pair number + 1.
    buckets: Vec<u32>,
}

impl MapData {
    #[must_use]
    pub fn pairs(&self) -> &[Value] {
        &self.pairs
    }

    /// Count of live (non-zombie) entries.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.pairs
            .chunks_exact(2)
            .filter(|pair| !matches!(pair[1], Value::Null))
            .count()
    }

    #[must_use]
    pub fn estimate_size(&self) -> usize {
        self.pairs.len() * size_of::<Value>() + self.buckets.len() * 4
    }

    fn pair_count(&self) -> usize {
        self.pairs.len() / 2
    }
}

/// Allocates a map from interleaved key/value cells.
pub fn make_map(heap: &mut Heap, interner: &Interner, kv: Vec<Value>) -> RunResult<HeapId> {
    let id = heap.alloc(HeapData::Map(MapData::default()))?;
    let mut iter = kv.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        insert_map(heap, interner, id, key, value)?;
    }
    Ok(id)
}

/// Looks a key up; zombie entries read as absent.
#[must_use]
pub fn select_map(heap: &Heap, interner: &Interner, map: HeapId, key: &Value) -> Option<Value> {
    let data = heap.map(map);
    if data.buckets.is_empty() {
        return None;
    }
    let mask = data.buckets.len() - 1;
    let mut probe = (value_hash(heap, interner, key) as usize) & mask;
    loop {
        match data.buckets[probe] {
            0 => return None,
            slot => {
                let pair = (slot - 1) as usize;
                let stored_key = data.pairs[pair * 2];
                if equal_values(&stored_key, key, heap, interner) {
                    let value = data.pairs[pair * 2 + 1];
                    return if matches!(value, Value::Null) { None } else { Some(value) };
                }
            }
        }
        probe = (probe + 1) & mask;
    }
}

/// Inserts or overwrites. Inserting null tombstones an existing key; a
/// fresh key reuses the first zombie pair's storage when one exists.
pub fn insert_map(heap: &mut Heap, interner: &Interner, map: HeapId, key: Value, value: Value) -> RunResult<()> {
    grow_if_needed(heap, interner, map);

    let (mask, mut probe) = {
        let data = heap.map(map);
        let mask = data.buckets.len() - 1;
        (mask, (value_hash(heap, interner, &key) as usize) & mask)
    };

    // Probe for the key or the first empty bucket. Comparison needs the
    // heap immutably, so the walk collects its verdict before mutation.
    let outcome = loop {
        let data = heap.map(map);
        match data.buckets[probe] {
            0 => break ProbeOutcome::Empty(probe),
            slot => {
                let pair = (slot - 1) as usize;
                let stored_key = data.pairs[pair * 2];
                if equal_values(&stored_key, &key, heap, interner) {
                    break ProbeOutcome::Existing(pair);
                }
            }
        }
        probe = (probe + 1) & mask;
    };

    match outcome {
        ProbeOutcome::Existing(pair) => {
            heap.map_mut(map).pairs[pair * 2 + 1] = value;
        }
        ProbeOutcome::Empty(bucket) => {
            // A zombie pair's storage is reclaimed for the fresh key. Its
            // old bucket keeps pointing here; lookups of the dead key fail
            // the key comparison and walk on, which is correct.
            let zombie = heap
                .map(map)
                .pairs
                .chunks_exact(2)
                .position(|pair| matches!(pair[1], Value::Null));
            let data = heap.map_mut(map);
            let pair = if let Some(pair) = zombie {
                data.pairs[pair * 2] = key;
                data.pairs[pair * 2 + 1] = value;
                pair
            } else {
                data.pairs.push(key);
                data.pairs.push(value);
                data.pair_count() - 1
            };
            data.buckets[bucket] = (pair + 1) as u32;
        }
    }
    Ok(())
}

/// Live keys, insertion order.
#[must_use]
pub fn map_keys(heap: &Heap, map: HeapId) -> Vec<Value> {
    heap.map(map)
        .pairs
        .chunks_exact(2)
        .filter(|pair| !matches!(pair[1], Value::Null))
        .map(|pair| pair[0])
        .collect()
}

/// Live values, insertion order.
#[must_use]
pub fn map_values(heap: &Heap, map: HeapId) -> Vec<Value> {
    heap.map(map)
        .pairs
        .chunks_exact(2)
        .filter(|pair| !matches!(pair[1], Value::Null))
        .map(|pair| pair[1])
        .collect()
}

enum ProbeOutcome {
    Existing(usize),
    Empty(usize),
}

fn grow_if_needed(heap: &mut Heap, interner: &Interner, map: HeapId) {
    let (needs_init, needs_grow) = {
        let data = heap.map(map);
        (
            data.buckets.is_empty(),
            !data.buckets.is_empty() && (data.pair_count() + 1) * 4 > data.buckets.len() * 3,
        )
    };
    if needs_init {
        heap.map_mut(map).buckets = vec![0; INITIAL_BUCKETS];
        return;
    }
    if !needs_grow {
        return;
    }
    // Rehash into a doubled table; zombie pairs are dropped here.
    let old_pairs = std::mem::take(&mut heap.map_mut(map).pairs);
    let new_len = (heap.map(map).buckets.len() * 2).next_power_of_two();
    heap.map_mut(map).buckets = vec![0; new_len];
    let live: Vec<Value> = old_pairs
        .chunks_exact(2)
        .filter(|pair| !matches!(pair[1], Value::Null))
        .flat_map(|pair| pair.to_vec())
        .collect();
    let mask = new_len - 1;
    let mut iter = live.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        let mut probe = (value_hash(heap, interner, &key) as usize) & mask;
        loop {
            if heap.map(map).buckets[probe] == 0 {
                let data = heap.map_mut(map);
                data.pairs.push(key);
                data.pairs.push(value);
                let pair = data.pair_count() - 1;
                data.buckets[probe] = (pair + 1) as u32;
                break;
            }
            probe = (probe + 1) & mask;
        }
    }
}

/// Hashes a value consistently with [`equal_values`]: case variants of a
/// word or string hash alike, and whole decimals hash as their integer.
#[must_use]
pub fn value_hash(heap: &Heap, interner: &Interner, value: &Value) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = ahash::AHasher::default();
    hash_into(heap, interner, value, &mut hasher);
    hasher.finish()
}

fn hash_into(heap: &Heap, interner: &Interner, value: &Value, hasher: &mut impl std::hash::Hasher) {
    use std::hash::Hash;
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Blank => 1u8.hash(hasher),
        Value::Logic(b) => (2u8, b).hash(hasher),
        Value::Integer(n) => (3u8, n).hash(hasher),
        Value::Decimal(d) => {
            // Whole decimals equal their integer, so they must hash alike.
            if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                (3u8, *d as i64).hash(hasher);
            } else {
                (4u8, d.to_bits()).hash(hasher);
            }
        }
        Value::Char(c) => (5u8, *c as u32).hash(hasher),
        Value::Time(t) => (6u8, t).hash(hasher),
        Value::Date(d) => (7u8, d.year, d.month, d.day).hash(hasher),
        Value::Pair(x, y) => (8u8, x.to_bits(), y.to_bits()).hash(hasher),
        Value::Tuple(t) => (9u8, t.as_slice()).hash(hasher),
        Value::Datatype(k) => (10u8, *k as u8).hash(hasher),
        Value::Typeset(_) => 11u8.hash(hasher),
        Value::Word(w) => {
            // Canon makes case variants collide, as equality demands.
            (12u8, w.kind.cell_kind() as u8, interner.canon(w.symbol).index()).hash(hasher);
        }
        Value::Strand(s) => {
            (13u8, s.kind.cell_kind() as u8).hash(hasher);
            for byte in heap.text(s.series).slice_from(s.index) {
                byte.to_ascii_lowercase().hash(hasher);
            }
        }
        Value::Binary(b) => (14u8, heap.binary(b.series).slice_from(b.index)).hash(hasher),
        Value::Seq(s) => {
            (15u8, s.kind.cell_kind() as u8).hash(hasher);
            let cells: Vec<Value> = heap.array(s.series).slice_from(s.index).to_vec();
            cells.len().hash(hasher);
            for cell in cells {
                hash_into(heap, interner, &cell, hasher);
            }
        }
        Value::Context(c) => (16u8, c.varlist.index()).hash(hasher),
        Value::Action(a) => (17u8, a.action.index()).hash(hasher),
        Value::Map(id) | Value::Bitset(id) | Value::Varargs(id) => (18u8, id.index()).hash(hasher),
        Value::Handle(h) => (19u8, h.node.index()).hash(hasher),
        Value::Event(e) => (20u8, e.code, e.data).hash(hasher),
        Value::Quoted(q) => {
            (21u8, q.depth).hash(hasher);
            let inner = crate::value::quoted_payload(heap, *q);
            hash_into(heap, interner, &inner, hasher);
        }
        Value::Unset | Value::PartialRefinement { .. } => 22u8.hash(hasher),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resource::Tracker, value::WordKind};

    fn setup() -> (Heap, Interner) {
        (Heap::new(Tracker::NoLimit), Interner::new())
    }

    #[test]
    fn insert_select_round_trip() {
        let (mut heap, interner) = setup();
        let map = make_map(&mut heap, &interner, vec![]).unwrap();
        insert_map(&mut heap, &interner, map, Value::Integer(1), Value::Integer(10)).unwrap();
        assert!(matches!(
            select_map(&heap, &interner, map, &Value::Integer(1)),
            Some(Value::Integer(10))
        ));
        assert!(select_map(&heap, &interner, map, &Value::Integer(2)).is_none());
    }

    #[test]
    fn word_keys_are_case_insensitive() {
        let (mut heap, mut interner) = setup();
        let lower = interner.intern("key");
        let upper = interner.intern("KEY");
        let map = make_map(&mut heap, &interner, vec![]).unwrap();
        insert_map(
            &mut heap,
            &interner,
            map,
            Value::word(WordKind::Plain, lower),
            Value::Integer(1),
        )
        .unwrap();
        let found = select_map(&heap, &interner, map, &Value::word(WordKind::Plain, upper));
        assert!(matches!(found, Some(Value::Integer(1))));
    }

    #[test]
    fn whole_decimal_finds_integer_key() {
        let (mut heap, interner) = setup();
        let map = make_map(&mut heap, &interner, vec![]).unwrap();
        insert_map(&mut heap, &interner, map, Value::Integer(3), Value::Integer(30)).unwrap();
        assert!(matches!(
            select_map(&heap, &interner, map, &Value::Decimal(3.0)),
            Some(Value::Integer(30))
        ));
    }

    #[test]
    fn tombstone_hides_key_and_reuses_storage() {
        let (mut heap, interner) = setup();
        let map = make_map(&mut heap, &interner, vec![]).unwrap();
        insert_map(&mut heap, &interner, map, Value::Integer(1), Value::Integer(10)).unwrap();
        insert_map(&mut heap, &interner, map, Value::Integer(2), Value::Integer(20)).unwrap();
        // Tombstone key 1.
        insert_map(&mut heap, &interner, map, Value::Integer(1), Value::Null).unwrap();
        assert!(select_map(&heap, &interner, map, &Value::Integer(1)).is_none());
        assert_eq!(heap.map(map).live_len(), 1);
        let pairs_before = heap.map(map).pairs().len();
        // A fresh key reuses the zombie pair's storage.
        insert_map(&mut heap, &interner, map, Value::Integer(3), Value::Integer(30)).unwrap();
        assert_eq!(heap.map(map).pairs().len(), pairs_before, "zombie storage reused");
        assert!(matches!(
            select_map(&heap, &interner, map, &Value::Integer(3)),
            Some(Value::Integer(30))
        ));
        assert!(matches!(
            select_map(&heap, &interner, map, &Value::Integer(2)),
            Some(Value::Integer(20))
        ));
    }

    #[test]
    fn reinserting_a_tombstoned_key_revives_it() {
        let (mut heap, interner) = setup();
        let map = make_map(&mut heap, &interner, vec![]).unwrap();
        insert_map(&mut heap, &interner, map, Value::Integer(1), Value::Integer(10)).unwrap();
        insert_map(&mut heap, &interner, map, Value::Integer(1), Value::Null).unwrap();
        insert_map(&mut heap, &interner, map, Value::Integer(1), Value::Integer(11)).unwrap();
        assert!(matches!(
            select_map(&heap, &interner, map, &Value::Integer(1)),
            Some(Value::Integer(11))
        ));
    }

    #[test]
    fn growth_rehashes_and_drops_zombies() {
        let (mut heap, interner) = setup();
        let map = make_map(&mut heap, &interner, vec![]).unwrap();
        for n in 0..50 {
            insert_map(&mut heap, &interner, map, Value::Integer(n), Value::Integer(n * 10)).unwrap();
        }
        for n in 0..50 {
            assert!(
                matches!(select_map(&heap, &interner, map, &Value::Integer(n)), Some(Value::Integer(v)) if v == n * 10)
            );
        }
    }
}
