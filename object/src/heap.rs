use std::rc::Rc;

use bytecode::Instruction;
use log::trace;

use crate::class::Class;
use crate::code::{CodeRef, CompiledMethod};
use crate::context::{ActivationId, ContextState};
use crate::instance::{FieldWrite, Instance};
use crate::value::Value;

/// Handle to an object in the heap arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectRef(u32);

impl ObjectRef {
    #[cfg(test)]
    pub(crate) fn for_tests(raw: u32) -> ObjectRef {
        ObjectRef(raw)
    }
}

/// A block closure: code plus captured environment.
///
/// `home` identifies the method activation the block lexically belongs to;
/// the reference is non-owning and is used for home-argument addressing
/// and non-local-return targeting only.
pub struct Closure {
    pub method: ObjectRef,
    pub block_index: u16,
    pub receiver: Value,
    pub copied: Vec<Value>,
    pub home: ActivationId,
}

pub enum HeapObject {
    Instance(Instance),
    Class(Class),
    Array(Vec<Value>),
    Symbol(String),
    LargeInt(i128),
    Method(CompiledMethod),
    Closure(Closure),
    Context(ContextState),
}

/// Static shape of a method or block body.
#[derive(Clone, Copy, Debug)]
pub struct CodeInfo {
    pub num_args: usize,
    pub num_copied: usize,
    pub num_temps: usize,
    pub max_stack: usize,
}

/// The object arena. Handles are never reclaimed; collection is outside
/// this core.
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            objects: Vec::new(),
        }
    }

    pub fn alloc(&mut self, object: HeapObject) -> ObjectRef {
        let index = u32::try_from(self.objects.len())
            .unwrap_or_else(|_| panic!("heap exhausted"));
        self.objects.push(object);
        ObjectRef(index)
    }

    #[inline]
    pub fn get(&self, r: ObjectRef) -> &HeapObject {
        &self.objects[r.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, r: ObjectRef) -> &mut HeapObject {
        &mut self.objects[r.0 as usize]
    }

    // ── typed accessors ────────────────────────────────────────────
    // Reaching for the wrong type through these is an internal error.

    pub fn class(&self, r: ObjectRef) -> &Class {
        match self.get(r) {
            HeapObject::Class(c) => c,
            _ => panic!("{r:?} is not a class"),
        }
    }

    pub fn class_mut(&mut self, r: ObjectRef) -> &mut Class {
        match self.get_mut(r) {
            HeapObject::Class(c) => c,
            _ => panic!("{r:?} is not a class"),
        }
    }

    pub fn instance(&self, r: ObjectRef) -> &Instance {
        match self.get(r) {
            HeapObject::Instance(i) => i,
            _ => panic!("{r:?} is not an instance"),
        }
    }

    pub fn instance_mut(&mut self, r: ObjectRef) -> &mut Instance {
        match self.get_mut(r) {
            HeapObject::Instance(i) => i,
            _ => panic!("{r:?} is not an instance"),
        }
    }

    pub fn method(&self, r: ObjectRef) -> &CompiledMethod {
        match self.get(r) {
            HeapObject::Method(m) => m,
            _ => panic!("{r:?} is not a compiled method"),
        }
    }

    pub fn closure(&self, r: ObjectRef) -> &Closure {
        match self.get(r) {
            HeapObject::Closure(c) => c,
            _ => panic!("{r:?} is not a closure"),
        }
    }

    pub fn context(&self, r: ObjectRef) -> &ContextState {
        match self.get(r) {
            HeapObject::Context(c) => c,
            _ => panic!("{r:?} is not a context"),
        }
    }

    pub fn context_mut(&mut self, r: ObjectRef) -> &mut ContextState {
        match self.get_mut(r) {
            HeapObject::Context(c) => c,
            _ => panic!("{r:?} is not a context"),
        }
    }

    pub fn array(&self, r: ObjectRef) -> &Vec<Value> {
        match self.get(r) {
            HeapObject::Array(a) => a,
            _ => panic!("{r:?} is not an array"),
        }
    }

    pub fn array_mut(&mut self, r: ObjectRef) -> &mut Vec<Value> {
        match self.get_mut(r) {
            HeapObject::Array(a) => a,
            _ => panic!("{r:?} is not an array"),
        }
    }

    pub fn symbol(&self, r: ObjectRef) -> &str {
        match self.get(r) {
            HeapObject::Symbol(s) => s,
            _ => panic!("{r:?} is not a symbol"),
        }
    }

    pub fn large_int(&self, r: ObjectRef) -> i128 {
        match self.get(r) {
            HeapObject::LargeInt(n) => *n,
            _ => panic!("{r:?} is not a large integer"),
        }
    }

    // ── compiled code ──────────────────────────────────────────────

    pub fn code_info(&self, code: CodeRef) -> CodeInfo {
        let method = self.method(code.method);
        match code.block {
            None => CodeInfo {
                num_args: method.num_args as usize,
                num_copied: 0,
                num_temps: method.num_temps as usize,
                max_stack: method.max_stack as usize,
            },
            Some(index) => {
                let block = &method.blocks[index as usize];
                CodeInfo {
                    num_args: block.num_args as usize,
                    num_copied: block.num_copied as usize,
                    num_temps: block.num_temps as usize,
                    max_stack: block.max_stack as usize,
                }
            }
        }
    }

    pub fn code_instruction(&self, code: CodeRef, pc: usize) -> Instruction {
        let method = self.method(code.method);
        let instructions = match code.block {
            None => &method.instructions,
            Some(index) => &method.blocks[index as usize].instructions,
        };
        match instructions.get(pc) {
            Some(instr) => *instr,
            None => panic!(
                "pc {pc} past the end of {} ({} instructions)",
                method.name,
                instructions.len()
            ),
        }
    }

    pub fn code_literal(&self, code: CodeRef, index: usize) -> Value {
        self.method(code.method).literals[index]
    }

    // ── instances and adaptive field storage ───────────────────────

    /// Create an instance of `class`, building the class's generation-zero
    /// layout if this is the first instantiation.
    pub fn instantiate(&mut self, class: ObjectRef) -> ObjectRef {
        let layout = self.class_mut(class).layout_handle();
        self.alloc(HeapObject::Instance(Instance::new(class, layout)))
    }

    /// Read a field, first migrating the instance if its layout was
    /// invalidated by evolution on a sibling.
    pub fn read_field(&mut self, object: ObjectRef, index: usize) -> Value {
        self.sync_layout(object);
        self.instance(object).read_field(index)
    }

    /// Write a field, evolving the class layout when the value does not
    /// fit the field's current location.
    pub fn write_field(&mut self, object: ObjectRef, index: usize, value: Value) {
        self.sync_layout(object);
        match self.instance_mut(object).try_write_field(index, value) {
            FieldWrite::Stored => {}
            FieldWrite::NeedsEvolution => {
                let instance = self.instance(object);
                let class = instance.class;
                let layout = instance.layout().clone();
                let evolved = Rc::new(layout.evolve(index, &value));
                trace!(
                    "evolved {} to generation {}",
                    self.class(class).name,
                    evolved.generation()
                );
                self.class_mut(class).update_layout(evolved.clone());
                let instance = self.instance_mut(object);
                instance.migrate(evolved);
                match instance.try_write_field(index, value) {
                    FieldWrite::Stored => {}
                    FieldWrite::NeedsEvolution => {
                        unreachable!("evolved layout rejected its sample value")
                    }
                }
            }
        }
    }

    /// The generation-tagged fast-path check: an instance whose layout was
    /// invalidated takes the general path and re-houses itself under the
    /// class's current layout.
    fn sync_layout(&mut self, object: ObjectRef) {
        let (class, stale) = {
            let instance = self.instance(object);
            (instance.class, !instance.layout().is_valid())
        };
        if stale {
            let current = self.class_mut(class).layout_handle();
            trace!(
                "migrating stale {:?} to generation {}",
                object,
                current.generation()
            );
            self.instance_mut(object).migrate(current);
        }
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}
