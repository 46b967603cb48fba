use log::trace;

use object::{ActivationId, ContextState, Heap, HeapObject, ObjectRef};

use crate::interpreter::PendingAction;
use crate::VM;

/// One entry of the interpreter's frame stack.
///
/// While virtual, the activation state lives inline in the frame; after
/// [`escape`] it lives in a heap `Context` object and the frame is a thin
/// redirect. Either way the activation keeps its [`ActivationId`], which
/// is what closures and unwind signals address it by.
pub struct Frame {
    pub id: ActivationId,
    repr: FrameRepr,
    /// Completion set aside while this frame runs an unwind-protection
    /// handler; restored when the handler returns.
    pub resume: Option<PendingAction>,
}

enum FrameRepr {
    Virtual(ContextState),
    Materialized(ObjectRef),
    /// Transient state inside [`escape`] only.
    Escaping,
}

impl Frame {
    pub fn new(state: ContextState) -> Frame {
        Frame {
            id: state.id,
            repr: FrameRepr::Virtual(state),
            resume: None,
        }
    }

    /// Rebuild the frame for a context that already lives on the heap
    /// (the `resume` entry mode).
    pub fn for_context(id: ActivationId, context: ObjectRef) -> Frame {
        Frame {
            id,
            repr: FrameRepr::Materialized(context),
            resume: None,
        }
    }

    /// The heap context backing this frame, if it has escaped.
    pub fn context_ref(&self) -> Option<ObjectRef> {
        match self.repr {
            FrameRepr::Materialized(context) => Some(context),
            _ => None,
        }
    }

    pub fn state<'a>(&'a self, heap: &'a Heap) -> &'a ContextState {
        match &self.repr {
            FrameRepr::Virtual(state) => state,
            FrameRepr::Materialized(context) => heap.context(*context),
            FrameRepr::Escaping => unreachable!("frame observed mid-escape"),
        }
    }

    pub fn state_mut<'a>(&'a mut self, heap: &'a mut Heap) -> &'a mut ContextState {
        match &mut self.repr {
            FrameRepr::Virtual(state) => state,
            FrameRepr::Materialized(context) => heap.context_mut(*context),
            FrameRepr::Escaping => unreachable!("frame observed mid-escape"),
        }
    }
}

/// Materialize the activation at `index`, promoting its state to an owned
/// heap record. Idempotent: escaping an already-escaped activation returns
/// the same handle and copies nothing.
pub fn escape(vm: &mut VM, frames: &mut [Frame], index: usize) -> ObjectRef {
    let frame = &mut frames[index];
    if let Some(context) = frame.context_ref() {
        return context;
    }
    let mut state = match std::mem::replace(&mut frame.repr, FrameRepr::Escaping)
    {
        FrameRepr::Virtual(state) => state,
        _ => unreachable!("virtual frame expected"),
    };
    state.escaped = true;
    let context = vm.heap.alloc(HeapObject::Context(state));
    frame.repr = FrameRepr::Materialized(context);
    vm.materialized.insert(frame.id, context);
    trace!("escaped activation {:?} to {:?}", frame.id, context);
    context
}

/// Where an activation identity currently resolves to.
pub enum Resolved {
    /// Live on this chain, at the given frame index.
    OnChain(usize),
    /// Off-chain, as a materialized heap context (possibly terminated).
    Materialized(ObjectRef),
    /// Neither on the chain nor in the materialized registry.
    Unknown,
}

/// Resolve an activation identity against the running chain first, then
/// the materialized registry. A target materialized before delivery is
/// found by identity regardless of whether its native frame still exists.
pub fn resolve(vm: &VM, frames: &[Frame], id: ActivationId) -> Resolved {
    if let Some(index) = frames.iter().rposition(|f| f.id == id) {
        return Resolved::OnChain(index);
    }
    match vm.materialized.get(&id) {
        Some(&context) => Resolved::Materialized(context),
        None => Resolved::Unknown,
    }
}
