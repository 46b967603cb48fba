use std::rc::Rc;

use crate::heap::ObjectRef;
use crate::layout::Layout;
use crate::location::Location;
use crate::value::Value;

/// Result of a typed field store attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWrite {
    Stored,
    /// The value does not fit the field's current location; the caller
    /// must evolve the layout and migrate before retrying.
    NeedsEvolution,
}

/// Instance storage: one cell array per location pool, sized to the
/// instance's own layout.
///
/// Boolean and primitive slots carry a used bit; a slot whose bit is clear
/// reads as `nil`, which is how a never-written field stays `nil` even
/// after its location was typed by a store on a sibling instance.
/// Primitive words hold a `char` codepoint, an `i64` in two's complement,
/// or an `f64` bit pattern, as told apart by the location kind.
pub struct Instance {
    pub class: ObjectRef,
    layout: Rc<Layout>,
    bools: Box<[bool]>,
    bool_used: u64,
    primitives: Box<[u64]>,
    primitive_used: u64,
    objects: Box<[Value]>,
}

impl Instance {
    pub fn new(class: ObjectRef, layout: Rc<Layout>) -> Instance {
        let bools = vec![false; layout.num_bools()].into();
        let primitives = vec![0u64; layout.num_primitives()].into();
        let objects = vec![Value::Nil; layout.num_objects()].into();
        Instance {
            class,
            layout,
            bools,
            bool_used: 0,
            primitives,
            primitive_used: 0,
            objects,
        }
    }

    #[inline]
    pub fn layout(&self) -> &Rc<Layout> {
        &self.layout
    }

    pub fn field_count(&self) -> usize {
        self.layout.field_count()
    }

    pub fn read_field(&self, index: usize) -> Value {
        match self.layout.location(index) {
            Location::Uninitialized => Value::Nil,
            Location::Bool { slot } => {
                if self.bool_used & (1 << slot) == 0 {
                    Value::Nil
                } else {
                    Value::Bool(self.bools[slot as usize])
                }
            }
            Location::Char { slot } => match self.primitive(slot) {
                None => Value::Nil,
                Some(word) => match char::from_u32(word as u32) {
                    Some(c) => Value::Char(c),
                    None => unreachable!("corrupt char word {word:#x}"),
                },
            },
            Location::Int { slot } => match self.primitive(slot) {
                None => Value::Nil,
                Some(word) => Value::SmallInt(word as i64),
            },
            Location::Float { slot } => match self.primitive(slot) {
                None => Value::Nil,
                Some(word) => Value::Float(f64::from_bits(word)),
            },
            Location::Object { slot } => self.objects[slot as usize],
        }
    }

    /// Store `value` if the field's location can hold it.
    pub fn try_write_field(&mut self, index: usize, value: Value) -> FieldWrite {
        match (self.layout.location(index), value) {
            (Location::Bool { slot }, Value::Bool(b)) => {
                self.bools[slot as usize] = b;
                self.bool_used |= 1 << slot;
                FieldWrite::Stored
            }
            (Location::Char { slot }, Value::Char(c)) => {
                self.set_primitive(slot, c as u64);
                FieldWrite::Stored
            }
            (Location::Int { slot }, Value::SmallInt(n)) => {
                self.set_primitive(slot, n as u64);
                FieldWrite::Stored
            }
            (Location::Float { slot }, Value::Float(f)) => {
                self.set_primitive(slot, f.to_bits());
                FieldWrite::Stored
            }
            (Location::Object { slot }, value) => {
                self.objects[slot as usize] = value;
                FieldWrite::Stored
            }
            _ => FieldWrite::NeedsEvolution,
        }
    }

    /// Re-house every field under `new_layout`. The caller guarantees the
    /// new layout is a successor of this instance's current one, so each
    /// held value either fits its new location or is `nil` on a typed
    /// location (which stays unset).
    pub fn migrate(&mut self, new_layout: Rc<Layout>) {
        let values: Vec<Value> = (0..self.field_count())
            .map(|i| self.read_field(i))
            .collect();

        self.layout = new_layout;
        self.bools = vec![false; self.layout.num_bools()].into();
        self.bool_used = 0;
        self.primitives = vec![0u64; self.layout.num_primitives()].into();
        self.primitive_used = 0;
        self.objects = vec![Value::Nil; self.layout.num_objects()].into();

        for (index, value) in values.into_iter().enumerate() {
            if value.is_nil() && !self.layout.location(index).is_object() {
                // Unwritten field on a typed location: leave the slot unset.
                continue;
            }
            match self.try_write_field(index, value) {
                FieldWrite::Stored => {}
                FieldWrite::NeedsEvolution => {
                    unreachable!(
                        "value {value:?} does not fit migrated field {index}"
                    )
                }
            }
        }
    }

    #[inline]
    fn primitive(&self, slot: u16) -> Option<u64> {
        if self.primitive_used & (1 << slot) == 0 {
            None
        } else {
            Some(self.primitives[slot as usize])
        }
    }

    #[inline]
    fn set_primitive(&mut self, slot: u16, word: u64) {
        self.primitives[slot as usize] = word;
        self.primitive_used |= 1 << slot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::ObjectRef;

    fn class_ref() -> ObjectRef {
        ObjectRef::for_tests(0)
    }

    fn evolved_for(layout: Rc<Layout>, index: usize, value: &Value) -> Rc<Layout> {
        Rc::new(layout.evolve(index, value))
    }

    #[test]
    fn uninitialized_fields_read_nil() {
        let layout = Rc::new(Layout::new(3));
        let instance = Instance::new(class_ref(), layout);
        for i in 0..3 {
            assert_eq!(instance.read_field(i), Value::Nil);
        }
    }

    #[test]
    fn typed_round_trips() {
        let layout = Rc::new(Layout::new(4));
        let layout = evolved_for(layout, 0, &Value::Bool(true));
        let layout = evolved_for(layout, 1, &Value::SmallInt(-9));
        let layout = evolved_for(layout, 2, &Value::Char('λ'));
        let layout = evolved_for(layout, 3, &Value::Float(2.75));

        let mut instance = Instance::new(class_ref(), layout);
        assert_eq!(
            instance.try_write_field(0, Value::Bool(true)),
            FieldWrite::Stored
        );
        assert_eq!(
            instance.try_write_field(1, Value::SmallInt(-9)),
            FieldWrite::Stored
        );
        assert_eq!(
            instance.try_write_field(2, Value::Char('λ')),
            FieldWrite::Stored
        );
        assert_eq!(
            instance.try_write_field(3, Value::Float(2.75)),
            FieldWrite::Stored
        );

        assert_eq!(instance.read_field(0), Value::Bool(true));
        assert_eq!(instance.read_field(1), Value::SmallInt(-9));
        assert_eq!(instance.read_field(2), Value::Char('λ'));
        assert_eq!(instance.read_field(3), Value::Float(2.75));
    }

    #[test]
    fn mismatched_store_requests_evolution() {
        let layout = Rc::new(Layout::new(1));
        let layout = evolved_for(layout, 0, &Value::SmallInt(1));
        let mut instance = Instance::new(class_ref(), layout);
        assert_eq!(
            instance.try_write_field(0, Value::Char('x')),
            FieldWrite::NeedsEvolution
        );
        assert_eq!(
            instance.try_write_field(0, Value::Nil),
            FieldWrite::NeedsEvolution
        );
    }

    #[test]
    fn migration_carries_values_and_leaves_unwritten_fields_nil() {
        let l0 = Rc::new(Layout::new(3));
        let l1 = evolved_for(l0, 0, &Value::SmallInt(5));
        let mut instance = Instance::new(class_ref(), l1.clone());
        instance.try_write_field(0, Value::SmallInt(5));

        // A sibling instance typed field 1; this one never wrote it.
        let l2 = evolved_for(l1, 1, &Value::Float(0.5));
        instance.migrate(l2.clone());
        assert_eq!(instance.read_field(0), Value::SmallInt(5));
        assert_eq!(instance.read_field(1), Value::Nil);

        // Field 0 goes generic; the held int moves into the object slot.
        let l3 = evolved_for(l2, 0, &Value::Nil);
        instance.migrate(l3);
        assert_eq!(instance.read_field(0), Value::SmallInt(5));
        assert_eq!(instance.read_field(1), Value::Nil);
        assert_eq!(instance.read_field(2), Value::Nil);
    }
}
