use object::{Heap, ObjectRef};

/// A successful method lookup.
#[derive(Debug, Clone, Copy)]
pub struct MethodHit {
    pub method: ObjectRef,
    /// Class the method was found on (the defining class, not necessarily
    /// the receiver's class).
    pub holder: ObjectRef,
}

/// Resolve `selector` starting at `class` and walking the superclass
/// chain. This is the collaborator seam the interpreter sends through.
pub fn lookup(
    heap: &Heap,
    mut class: ObjectRef,
    selector: ObjectRef,
) -> Option<MethodHit> {
    loop {
        let c = heap.class(class);
        if let Some(method) = c.method_for(selector) {
            return Some(MethodHit {
                method,
                holder: class,
            });
        }
        class = c.superclass?;
    }
}
