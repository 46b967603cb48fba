use crate::heap::{Heap, HeapObject, ObjectRef};
use crate::value::Value;

/// Well-known classes, filled in by the bootstrap and handed to the
/// interpreter as the identity source for immediates and heap kinds.
pub struct SpecialObjects {
    pub object_class: ObjectRef,
    pub undefined_object_class: ObjectRef,
    pub boolean_class: ObjectRef,
    pub true_class: ObjectRef,
    pub false_class: ObjectRef,
    pub small_integer_class: ObjectRef,
    pub large_integer_class: ObjectRef,
    pub float_class: ObjectRef,
    pub character_class: ObjectRef,
    pub symbol_class: ObjectRef,
    pub array_class: ObjectRef,
    pub block_class: ObjectRef,
    pub context_class: ObjectRef,
    pub method_class: ObjectRef,
    pub class_class: ObjectRef,
}

impl SpecialObjects {
    /// The class of any value.
    pub fn class_of(&self, heap: &Heap, value: Value) -> ObjectRef {
        match value {
            Value::Nil => self.undefined_object_class,
            Value::Bool(true) => self.true_class,
            Value::Bool(false) => self.false_class,
            Value::Char(_) => self.character_class,
            Value::SmallInt(_) => self.small_integer_class,
            Value::Float(_) => self.float_class,
            Value::Ref(r) => match heap.get(r) {
                HeapObject::Instance(instance) => instance.class,
                HeapObject::Class(_) => self.class_class,
                HeapObject::Array(_) => self.array_class,
                HeapObject::Symbol(_) => self.symbol_class,
                HeapObject::LargeInt(_) => self.large_integer_class,
                HeapObject::Method(_) => self.method_class,
                HeapObject::Closure(_) => self.block_class,
                HeapObject::Context(_) => self.context_class,
            },
        }
    }
}
