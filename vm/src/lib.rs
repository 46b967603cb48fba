pub mod activation;
pub mod assemble;
pub mod interpreter;
pub mod lookup;
pub mod primitives;
pub mod safepoint;
pub mod special;

use std::collections::HashMap;
use std::sync::Arc;

use object::{
    ActivationId, Class, CompiledMethod, Heap, HeapObject, ObjectRef,
    SpecialObjects, Value,
};

use crate::interpreter::{Completion, RuntimeError};
use crate::primitives::PrimitiveDesc;
use crate::safepoint::{Interrupt, Safepoint};

/// Callback invoked with each interrupt drained at a safepoint.
pub type InterruptHook = Box<dyn FnMut(Interrupt)>;

/// The VM: heap, well-known objects, interned selectors, the closed
/// primitive table, the safepoint shared with the scheduling layer, and
/// the registry of materialized activations.
pub struct VM {
    pub heap: Heap,
    pub special: SpecialObjects,
    /// Interned symbols: name → heap symbol object.
    pub intern_table: HashMap<String, ObjectRef>,
    /// Registered primitive descriptors, indexed by primitive id.
    pub primitives: Vec<PrimitiveDesc>,
    /// Cooperative interrupt signal, polled at sends and back edges.
    pub safepoint: Arc<Safepoint>,
    /// Receives drained interrupts; unset interrupts are logged.
    pub interrupt_hook: Option<InterruptHook>,
    /// Every escaped activation, by identity. Entries persist after the
    /// activation terminates so a late non-local return can be told apart
    /// from a vanished target.
    pub materialized: HashMap<ActivationId, ObjectRef>,
    /// Total back edges taken; the safepoint poll cadence hangs off it.
    pub back_edges: u64,
    next_activation: u64,
}

impl VM {
    pub(crate) fn with_special(heap: Heap, special: SpecialObjects) -> VM {
        VM {
            heap,
            special,
            intern_table: HashMap::new(),
            primitives: Vec::new(),
            safepoint: Arc::new(Safepoint::new()),
            interrupt_hook: None,
            materialized: HashMap::new(),
            back_edges: 0,
            next_activation: 0,
        }
    }

    /// Intern `name`, returning the canonical symbol object.
    pub fn intern(&mut self, name: &str) -> ObjectRef {
        if let Some(&symbol) = self.intern_table.get(name) {
            return symbol;
        }
        let symbol = self.heap.alloc(HeapObject::Symbol(name.to_string()));
        self.intern_table.insert(name.to_string(), symbol);
        symbol
    }

    pub fn symbol(&mut self, name: &str) -> Value {
        Value::Ref(self.intern(name))
    }

    pub fn next_activation_id(&mut self) -> ActivationId {
        self.next_activation += 1;
        ActivationId(self.next_activation)
    }

    pub fn create_class(
        &mut self,
        name: &str,
        superclass: Option<ObjectRef>,
        field_count: u16,
    ) -> ObjectRef {
        self.heap.alloc(HeapObject::Class(Class::new(
            name.to_string(),
            superclass,
            field_count,
        )))
    }

    /// Install `method` on `class` under `selector`.
    pub fn install_method(
        &mut self,
        class: ObjectRef,
        selector: &str,
        method: CompiledMethod,
    ) -> ObjectRef {
        let selector = self.intern(selector);
        let method = self.heap.alloc(HeapObject::Method(method));
        self.heap.class_mut(class).install_method(selector, method);
        method
    }

    /// Convenience entry point: intern `selector` and send it.
    pub fn send(
        &mut self,
        selector: &str,
        receiver: Value,
        args: &[Value],
    ) -> Result<Completion, RuntimeError> {
        let selector = self.symbol(selector);
        interpreter::send(self, selector, receiver, args)
    }
}
