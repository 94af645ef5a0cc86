//! The heap arena and the mark-sweep garbage collector.
//!
//! Every series-backed node lives in one arena slot addressed by [`HeapId`].
//! Slots are either *managed* (owned by the collector, freed when
//! unreachable at sweep) or *unmanaged* (owned by their creator, never
//! swept, freed explicitly or lifted into management by [`Heap::manage`]).
//! A freed slot holds `None`; touching one trips an assertion rather than
//! yielding stale data.
//!
//! Roots for a collection are supplied by the caller: the live frame stack,
//! the data and mold stacks, the guard stacks kept here, the root contexts,
//! and every slot carrying the root flag (API handles).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    action::{ActionBody, Dispatcher},
    api::HandleData,
    bind::Binding,
    context::{Context, Keylist, Keys},
    map::MapData,
    port::Request,
    resource::{ResourceError, Tracker},
    series::{Array, Binary},
    strings::Text,
    value::Value,
};

/// Index of a node in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bit-pattern stand-ins for dead bitset cells.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BitsetData {
    pub bits: Vec<u8>,
    pub negated: bool,
}

impl BitsetData {
    #[must_use]
    pub fn test(&self, n: usize) -> bool {
        let set = self.bits.get(n / 8).is_some_and(|byte| byte & (1 << (n % 8)) != 0);
        set != self.negated
    }

    pub fn set(&mut self, n: usize) {
        let byte = n / 8;
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        self.bits[byte] |= 1 << (n % 8);
    }
}

/// One heap node. The flavor determines how LINK/MISC-style side channels
/// are interpreted and how the GC chases children.
#[derive(Debug, Serialize, Deserialize)]
pub enum HeapData {
    Array(Array),
    Binary(Binary),
    Text(Text),
    Context(Context),
    Keylist(Keylist),
    Action(ActionBody),
    Map(MapData),
    Bitset(BitsetData),
    /// Single-cell container behind quoted! values.
    QuotedCell(Value),
    /// Singular node backing an API handle.
    Handle(HandleData),
    /// A device request in flight.
    Request(Request),
}

impl HeapData {
    #[must_use]
    pub fn flavor_name(&self) -> &'static str {
        match self {
            Self::Array(_) => "Array",
            Self::Binary(_) => "Binary",
            Self::Text(_) => "Text",
            Self::Context(_) => "Context",
            Self::Keylist(_) => "Keylist",
            Self::Action(_) => "Action",
            Self::Map(_) => "Map",
            Self::Bitset(_) => "Bitset",
            Self::QuotedCell(_) => "QuotedCell",
            Self::Handle(_) => "Handle",
            Self::Request(_) => "Request",
        }
    }

    /// Rough byte estimate for resource accounting.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        let payload = match self {
            Self::Array(a) => a.len() * size_of::<Value>(),
            Self::Binary(b) => b.len(),
            Self::Text(t) => t.as_str().len(),
            Self::Context(c) => c.vars.len() * size_of::<Value>(),
            Self::Keylist(k) => k.keys.len() * 8,
            Self::Action(a) => a.params.len() * 24,
            Self::Map(m) => m.estimate_size(),
            Self::Bitset(b) => b.bits.len(),
            Self::QuotedCell(_) | Self::Handle(_) => size_of::<Value>(),
            Self::Request(r) => r.payload.len(),
        };
        payload + 64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Slot {
    /// `None` once freed; any access then is an assertion failure.
    data: Option<HeapData>,
    managed: bool,
    marked: bool,
    /// Root-flagged nodes (API handles) are GC roots themselves.
    root: bool,
}

/// Snapshot of heap occupancy, by flavor.
///
/// The flavor map uses `BTreeMap` for deterministic iteration order, making
/// snapshots directly comparable in tests and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapStats {
    /// Live (allocated, not freed) node count, managed or not.
    pub live_objects: usize,
    /// Freed slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
    /// Live node counts keyed by flavor name.
    pub objects_by_flavor: BTreeMap<String, usize>,
}

/// The arena.
#[derive(Debug, Serialize, Deserialize)]
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<HeapId>,
    /// Guarded node ids: roots pushed by code holding ids across allocation.
    guard_ids: Vec<HeapId>,
    /// Guarded loose cells, same purpose.
    guard_values: Vec<Value>,
    /// Collection is forbidden while positive.
    gc_disabled: u32,
    pub tracker: Tracker,
}

impl Heap {
    #[must_use]
    pub fn new(tracker: Tracker) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            guard_ids: Vec::new(),
            guard_values: Vec::new(),
            gc_disabled: 0,
            tracker,
        }
    }

    /// Allocates a managed node.
    pub fn alloc(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.alloc_inner(data, true)
    }

    /// Allocates an unmanaged node: never swept, freed explicitly or lifted
    /// by [`Heap::manage`].
    pub fn alloc_unmanaged(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.alloc_inner(data, false)
    }

    fn alloc_inner(&mut self, data: HeapData, managed: bool) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(data.estimate_size())?;
        let slot = Slot {
            data: Some(data),
            managed,
            marked: false,
            root: false,
        };
        if let Some(id) = self.free_list.pop() {
            self.slots[id.index()] = slot;
            Ok(id)
        } else {
            let id = HeapId(self.slots.len() as u32);
            self.slots.push(slot);
            Ok(id)
        }
    }

    /// Lifts an unmanaged node into GC management.
    pub fn manage(&mut self, id: HeapId) {
        self.slot_mut(id).managed = true;
    }

    /// Removes a node from GC management; the caller owns it again.
    pub fn unmanage(&mut self, id: HeapId) {
        self.slot_mut(id).managed = false;
    }

    #[must_use]
    pub fn is_managed(&self, id: HeapId) -> bool {
        self.slot(id).managed
    }

    /// Marks a node as a standing GC root (API handles).
    pub fn set_root(&mut self, id: HeapId, root: bool) {
        self.slot_mut(id).root = root;
    }

    /// Frees a node immediately. Valid for unmanaged nodes and for managed
    /// nodes the caller knows to be unreachable.
    pub fn free(&mut self, id: HeapId) {
        let slot = self.slot_mut(id);
        let data = slot.data.take().expect("Heap::free: node already freed");
        slot.root = false;
        self.tracker.on_free(data.estimate_size());
        self.free_list.push(id);
    }

    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.slots.get(id.index()).is_some_and(|s| s.data.is_some())
    }

    fn slot(&self, id: HeapId) -> &Slot {
        self.slots.get(id.index()).expect("Heap: slot index out of range")
    }

    fn slot_mut(&mut self, id: HeapId) -> &mut Slot {
        self.slots.get_mut(id.index()).expect("Heap: slot index out of range")
    }

    /// # Panics
    /// Panics if the node was freed; freed slots are poison.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slot(id).data.as_ref().expect("Heap::get: use of freed node")
    }

    #[must_use]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slot_mut(id).data.as_mut().expect("Heap::get_mut: use of freed node")
    }

    #[must_use]
    pub fn try_get(&self, id: HeapId) -> Option<&HeapData> {
        self.slots.get(id.index()).and_then(|s| s.data.as_ref())
    }

    // --- flavor accessors -------------------------------------------------

    #[must_use]
    pub fn array(&self, id: HeapId) -> &Array {
        match self.get(id) {
            HeapData::Array(a) => a,
            other => panic!("expected Array node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn array_mut(&mut self, id: HeapId) -> &mut Array {
        match self.get_mut(id) {
            HeapData::Array(a) => a,
            other => panic!("expected Array node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn binary(&self, id: HeapId) -> &Binary {
        match self.get(id) {
            HeapData::Binary(b) => b,
            other => panic!("expected Binary node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn binary_mut(&mut self, id: HeapId) -> &mut Binary {
        match self.get_mut(id) {
            HeapData::Binary(b) => b,
            other => panic!("expected Binary node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn text(&self, id: HeapId) -> &Text {
        match self.get(id) {
            HeapData::Text(t) => t,
            other => panic!("expected Text node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn text_mut(&mut self, id: HeapId) -> &mut Text {
        match self.get_mut(id) {
            HeapData::Text(t) => t,
            other => panic!("expected Text node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn ctx(&self, id: HeapId) -> &Context {
        match self.get(id) {
            HeapData::Context(c) => c,
            other => panic!("expected Context node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn ctx_mut(&mut self, id: HeapId) -> &mut Context {
        match self.get_mut(id) {
            HeapData::Context(c) => c,
            other => panic!("expected Context node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn keylist(&self, id: HeapId) -> &Keylist {
        match self.get(id) {
            HeapData::Keylist(k) => k,
            other => panic!("expected Keylist node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn action_body(&self, id: HeapId) -> &ActionBody {
        match self.get(id) {
            HeapData::Action(a) => a,
            other => panic!("expected Action node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn action_body_mut(&mut self, id: HeapId) -> &mut ActionBody {
        match self.get_mut(id) {
            HeapData::Action(a) => a,
            other => panic!("expected Action node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn map(&self, id: HeapId) -> &MapData {
        match self.get(id) {
            HeapData::Map(m) => m,
            other => panic!("expected Map node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn map_mut(&mut self, id: HeapId) -> &mut MapData {
        match self.get_mut(id) {
            HeapData::Map(m) => m,
            other => panic!("expected Map node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn handle_data(&self, id: HeapId) -> &HandleData {
        match self.get(id) {
            HeapData::Handle(h) => h,
            other => panic!("expected Handle node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn handle_data_mut(&mut self, id: HeapId) -> &mut HandleData {
        match self.get_mut(id) {
            HeapData::Handle(h) => h,
            other => panic!("expected Handle node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn request(&self, id: HeapId) -> &Request {
        match self.get(id) {
            HeapData::Request(r) => r,
            other => panic!("expected Request node, found {}", other.flavor_name()),
        }
    }

    #[must_use]
    pub fn request_mut(&mut self, id: HeapId) -> &mut Request {
        match self.get_mut(id) {
            HeapData::Request(r) => r,
            other => panic!("expected Request node, found {}", other.flavor_name()),
        }
    }

    // --- guards -----------------------------------------------------------

    /// Pushes a node onto the guard stack, pinning it across allocations.
    pub fn guard(&mut self, id: HeapId) {
        self.guard_ids.push(id);
    }

    pub fn guard_value(&mut self, value: Value) {
        self.guard_values.push(value);
    }

    #[must_use]
    pub fn guard_depth(&self) -> (usize, usize) {
        (self.guard_ids.len(), self.guard_values.len())
    }

    /// Restores the guard stacks to recorded depths.
    ///
    /// # Panics
    /// Panics if the stacks are shallower than the recorded depths: an
    /// unbalanced guard push is a bug, not a recoverable state.
    pub fn restore_guard_depth(&mut self, depth: (usize, usize)) {
        assert!(
            self.guard_ids.len() >= depth.0 && self.guard_values.len() >= depth.1,
            "guard stack underflow: pushes and pops are unbalanced"
        );
        self.guard_ids.truncate(depth.0);
        self.guard_values.truncate(depth.1);
    }

    pub fn drop_guard(&mut self) {
        self.guard_ids.pop().expect("guard stack underflow");
    }

    // --- collection -------------------------------------------------------

    /// Disables collection while the heap is in a half-initialized state.
    /// Allocation stays legal; marking must not run.
    pub fn gc_disable(&mut self) {
        self.gc_disabled += 1;
    }

    pub fn gc_enable(&mut self) {
        assert!(self.gc_disabled > 0, "gc_enable without matching gc_disable");
        self.gc_disabled -= 1;
    }

    #[must_use]
    pub fn gc_active(&self) -> bool {
        self.gc_disabled == 0
    }

    /// Runs a full mark-sweep over the managed heap.
    ///
    /// `root_values` and `root_ids` are the caller's roots (frame stack
    /// contents, data stack, root contexts); the guard stacks and
    /// root-flagged nodes are added here. Returns the number of nodes swept.
    ///
    /// # Panics
    /// Panics if collection is disabled; callers gate on [`Heap::gc_active`].
    pub fn collect(&mut self, root_values: &[Value], root_ids: &[HeapId]) -> usize {
        assert!(self.gc_disabled == 0, "collect called while GC is disabled");

        let mut worklist: Vec<HeapId> = Vec::new();
        for value in root_values.iter().chain(self.guard_values.iter()) {
            push_value_children(value, &mut worklist);
        }
        worklist.extend_from_slice(root_ids);
        worklist.extend_from_slice(&self.guard_ids);
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.root && slot.data.is_some() {
                worklist.push(HeapId(index as u32));
            }
        }

        // Mark.
        while let Some(id) = worklist.pop() {
            let slot = match self.slots.get_mut(id.index()) {
                Some(slot) if slot.data.is_some() => slot,
                _ => continue,
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            let data = slot.data.as_ref().expect("checked above");
            push_node_children(data, &mut worklist);
        }

        // Sweep: free managed, unmarked nodes; clear marks on survivors.
        let mut swept = 0;
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if slot.data.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else if slot.managed {
                let data = slot.data.take().expect("checked above");
                slot.root = false;
                self.tracker.on_free(data.estimate_size());
                self.free_list.push(HeapId(index as u32));
                swept += 1;
            }
        }
        swept
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_flavor: BTreeMap<String, usize> = BTreeMap::new();
        let mut live_objects = 0;
        for slot in &self.slots {
            if let Some(data) = &slot.data {
                live_objects += 1;
                *objects_by_flavor.entry(data.flavor_name().to_string()).or_insert(0) += 1;
            }
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.slots.len(),
            objects_by_flavor,
        }
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.data.is_some()).count()
    }
}

/// Queues the heap children reachable from a single cell.
///
/// Bindings are chased for bindable kinds; string bookmarks have no heap
/// identity and are freed with their string.
pub fn push_value_children(value: &Value, worklist: &mut Vec<HeapId>) {
    match value {
        Value::Seq(s) => {
            worklist.push(s.series);
            push_binding(&s.binding, worklist);
        }
        Value::Strand(s) => worklist.push(s.series),
        Value::Binary(b) => worklist.push(b.series),
        Value::Context(c) => worklist.push(c.varlist),
        Value::Action(a) => {
            worklist.push(a.action);
            push_binding(&a.binding, worklist);
        }
        Value::Word(w) => push_binding(&w.binding, worklist),
        Value::Map(id) | Value::Bitset(id) | Value::Varargs(id) => worklist.push(*id),
        Value::Handle(h) => worklist.push(h.node),
        Value::Quoted(q) => worklist.push(q.cell),
        _ => {}
    }
}

fn push_binding(binding: &Binding, worklist: &mut Vec<HeapId>) {
    match binding {
        Binding::Context { ctx, .. } => worklist.push(*ctx),
        Binding::Relative { action, .. } => worklist.push(*action),
        Binding::Unbound => {}
    }
}

/// Queues the children of a heap node.
fn push_node_children(data: &HeapData, worklist: &mut Vec<HeapId>) {
    match data {
        HeapData::Array(a) => {
            for cell in a.as_slice() {
                push_value_children(cell, worklist);
            }
            if let Some(action) = a.relative_to {
                worklist.push(action);
            }
        }
        HeapData::Binary(_) | HeapData::Text(_) | HeapData::Bitset(_) => {}
        HeapData::Context(c) => {
            match c.keys {
                Keys::List(keylist) => worklist.push(keylist),
                Keys::Action(action) => worklist.push(action),
            }
            // An ended frame keeps its shell but its cells are gone.
            if !c.inaccessible {
                for cell in &c.vars {
                    push_value_children(cell, worklist);
                }
            }
        }
        HeapData::Keylist(k) => {
            if let Some(ancestor) = k.ancestor {
                worklist.push(ancestor);
            }
        }
        HeapData::Action(a) => {
            if let Some(meta) = a.meta {
                worklist.push(meta);
            }
            match &a.dispatcher {
                Dispatcher::Native(_) => {}
                Dispatcher::Interpreted { body } => worklist.push(*body),
                Dispatcher::Specialized { exemplar, base } => {
                    worklist.push(*exemplar);
                    worklist.push(*base);
                }
                Dispatcher::Adapted { prelude, base } => {
                    worklist.push(*prelude);
                    worklist.push(*base);
                }
                Dispatcher::Chained { pipeline } => worklist.extend_from_slice(pipeline),
                Dispatcher::Hijacked { target } => worklist.push(*target),
            }
        }
        HeapData::Map(m) => {
            // Pairlist and hashlist are one graph; the hashlist holds no ids.
            for cell in m.pairs() {
                push_value_children(cell, worklist);
            }
        }
        HeapData::QuotedCell(v) => push_value_children(v, worklist),
        HeapData::Handle(h) => {
            push_value_children(&h.cell, worklist);
            if let crate::api::HandleOwner::Frame(varlist) = h.owner {
                worklist.push(varlist);
            }
        }
        HeapData::Request(r) => {
            if let Some(link) = r.link {
                worklist.push(link);
            }
            if let Some(misc) = r.misc {
                worklist.push(misc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Array;

    fn int_block(heap: &mut Heap, values: &[i64]) -> HeapId {
        let cells = values.iter().map(|n| Value::Integer(*n)).collect();
        heap.alloc(HeapData::Array(Array::from_values(cells))).unwrap()
    }

    #[test]
    fn unreferenced_managed_node_is_swept() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let id = int_block(&mut heap, &[1, 2, 3]);
        assert!(heap.is_live(id));
        let swept = heap.collect(&[], &[]);
        assert_eq!(swept, 1);
        assert!(!heap.is_live(id));
    }

    #[test]
    fn rooted_node_survives() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let id = int_block(&mut heap, &[1]);
        let swept = heap.collect(&[], &[id]);
        assert_eq!(swept, 0);
        assert!(heap.is_live(id));
    }

    #[test]
    fn nested_reachability_is_transitive() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let inner = int_block(&mut heap, &[1]);
        let outer = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::block(inner)])))
            .unwrap();
        heap.collect(&[], &[outer]);
        assert!(heap.is_live(inner), "inner block reachable through outer");
        heap.collect(&[], &[]);
        assert!(!heap.is_live(inner));
        assert!(!heap.is_live(outer));
    }

    #[test]
    fn unmanaged_nodes_are_never_swept() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let id = heap.alloc_unmanaged(HeapData::Array(Array::new())).unwrap();
        heap.collect(&[], &[]);
        assert!(heap.is_live(id));
        heap.manage(id);
        heap.collect(&[], &[]);
        assert!(!heap.is_live(id), "managed with no roots: swept");
    }

    #[test]
    fn guarded_nodes_are_roots() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let id = int_block(&mut heap, &[7]);
        heap.guard(id);
        heap.collect(&[], &[]);
        assert!(heap.is_live(id));
        heap.drop_guard();
        heap.collect(&[], &[]);
        assert!(!heap.is_live(id));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let a = int_block(&mut heap, &[1]);
        heap.collect(&[], &[]);
        let b = int_block(&mut heap, &[2]);
        assert_eq!(a, b, "free list recycles slots");
    }

    #[test]
    #[should_panic(expected = "use of freed node")]
    fn touching_a_freed_node_panics() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let id = int_block(&mut heap, &[1]);
        heap.free(id);
        let _ = heap.get(id);
    }

    #[test]
    #[should_panic(expected = "while GC is disabled")]
    fn collect_while_disabled_panics() {
        let mut heap = Heap::new(Tracker::NoLimit);
        heap.gc_disable();
        let _ = heap.collect(&[], &[]);
    }

    #[test]
    fn cycles_are_collected() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let a = heap.alloc(HeapData::Array(Array::new())).unwrap();
        let b = heap
            .alloc(HeapData::Array(Array::from_values(vec![Value::block(a)])))
            .unwrap();
        heap.array_mut(a).push(Value::block(b));
        heap.collect(&[], &[]);
        assert!(!heap.is_live(a));
        assert!(!heap.is_live(b));
    }

    #[test]
    fn stats_count_by_flavor() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let _ = int_block(&mut heap, &[1]);
        let _ = heap.alloc(HeapData::Binary(Binary::from_bytes(vec![1, 2]))).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.live_objects, 2);
        assert_eq!(stats.objects_by_flavor.get("Array"), Some(&1));
        assert_eq!(stats.objects_by_flavor.get("Binary"), Some(&1));
    }
}
