//! Call frame lifecycle.
//!
//! A frame is a context whose shape is its action's paramlist. It is born
//! at invocation, filled by the parameter walk, dispatched, and torn down —
//! unless it has been reified into a first-class frame value, in which case
//! the varlist stays live on the heap and only the bookkeeping entry goes.

use serde::{Deserialize, Serialize};

use crate::{
    context::{Context, Keys},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceError,
    value::{CtxKind, CtxRef, Value},
};

/// Bookkeeping for one live invocation; the frames vector is the call
/// stack and a GC root set.
#[derive(Debug, Serialize, Deserialize)]
pub struct FrameInfo {
    /// The action whose body/dispatcher is running.
    pub action: HeapId,
    /// The frame context.
    pub varlist: HeapId,
    /// API handles owned by this frame, released at teardown.
    pub owned_handles: Vec<HeapId>,
}

/// Allocates an unfilled frame for an action: one unset slot per parameter,
/// archetype at slot 0, keylist shared with the paramlist.
pub fn make_frame(heap: &mut Heap, action: HeapId) -> Result<HeapId, ResourceError> {
    let param_count = heap.action_body(action).params.len();
    let mut vars = vec![Value::Unset; param_count + 1];
    vars[0] = Value::Null;
    let varlist = heap.alloc(HeapData::Context(Context {
        kind: CtxKind::Frame,
        vars,
        keys: Keys::Action(action),
        inaccessible: false,
        action: Some(action),
        reified: false,
    }))?;
    heap.ctx_mut(varlist).vars[0] = Value::Context(CtxRef {
        kind: CtxKind::Frame,
        varlist,
    });
    Ok(varlist)
}

/// Ends a frame. A reified frame keeps its storage; otherwise the shell is
/// marked inaccessible and the cells are dropped, so stale references
/// report an error instead of reading dead slots.
pub fn teardown_frame(heap: &mut Heap, varlist: HeapId) {
    let ctx = heap.ctx_mut(varlist);
    if !ctx.reified {
        ctx.inaccessible = true;
        ctx.vars.clear();
    }
}

/// Marks a frame as captured; teardown will leave it intact.
pub fn reify_frame(heap: &mut Heap, varlist: HeapId) {
    heap.ctx_mut(varlist).reified = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{action::ActionBody, intern::Interner, resource::Tracker};

    #[test]
    fn frame_slots_match_paramlist() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut interner = Interner::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        let action = heap.alloc(HeapData::Action(ActionBody::stub(vec![a, b]))).unwrap();
        let frame = make_frame(&mut heap, action).unwrap();
        assert_eq!(heap.ctx(frame).slot_count(), 2);
        assert_eq!(heap.ctx(frame).action, Some(action));
    }

    #[test]
    fn teardown_clears_unreified_frames() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut interner = Interner::new();
        let a = interner.intern("a");
        let action = heap.alloc(HeapData::Action(ActionBody::stub(vec![a]))).unwrap();
        let frame = make_frame(&mut heap, action).unwrap();
        teardown_frame(&mut heap, frame);
        assert!(heap.ctx(frame).inaccessible);
        assert!(heap.ctx(frame).vars.is_empty());
    }

    #[test]
    fn reified_frames_survive_teardown() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut interner = Interner::new();
        let a = interner.intern("a");
        let action = heap.alloc(HeapData::Action(ActionBody::stub(vec![a]))).unwrap();
        let frame = make_frame(&mut heap, action).unwrap();
        heap.ctx_mut(frame).set_slot(1, Value::Integer(7));
        reify_frame(&mut heap, frame);
        teardown_frame(&mut heap, frame);
        assert!(!heap.ctx(frame).inaccessible);
        assert!(matches!(heap.ctx(frame).slot(1), Value::Integer(7)));
    }
}
