use std::cell::Cell;

use log::trace;

use crate::location::{
    FieldKind, Location, Pool, BOOL_POOL_LIMIT, PRIMITIVE_POOL_LIMIT,
};
use crate::value::Value;

/// The field-storage layout of one class generation.
///
/// A layout maps each field index to a [`Location`]. Within each storage
/// pool the used slot indices are exactly `0..count` with no gaps or
/// duplicates; evolution preserves this by compacting the pool a freed
/// slot came from. Layouts are immutable: evolution invalidates the old
/// layout and produces a fresh one with the next generation number. A
/// cached fast path keyed on a layout must check [`is_valid`](Self::is_valid)
/// (or compare [`generation`](Self::generation)) before trusting it.
pub struct Layout {
    locations: Box<[Location]>,
    num_bools: u16,
    num_primitives: u16,
    num_objects: u16,
    generation: u32,
    valid: Cell<bool>,
}

impl Layout {
    /// A fresh generation-zero layout with every field uninitialized.
    pub fn new(field_count: usize) -> Layout {
        Layout {
            locations: vec![Location::Uninitialized; field_count].into(),
            num_bools: 0,
            num_primitives: 0,
            num_objects: 0,
            generation: 0,
            valid: Cell::new(true),
        }
    }

    #[inline]
    pub fn field_count(&self) -> usize {
        self.locations.len()
    }

    #[inline]
    pub fn location(&self, index: usize) -> Location {
        self.locations[index]
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    /// Used slot count of the boolean pool.
    #[inline]
    pub fn num_bools(&self) -> usize {
        self.num_bools as usize
    }

    /// Used slot count of the shared primitive-word pool.
    #[inline]
    pub fn num_primitives(&self) -> usize {
        self.num_primitives as usize
    }

    /// Used slot count of the object pool.
    #[inline]
    pub fn num_objects(&self) -> usize {
        self.num_objects as usize
    }

    /// Produce the successor layout for storing `sample` into `field_index`.
    ///
    /// Deterministic in `(self, field_index, sample)`. Invalidates `self`.
    /// An uninitialized field is assigned the first free slot of the sample
    /// kind's pool, falling back to an object slot when the pool is
    /// exhausted; a field that already has a non-object location moves to
    /// an object slot, and the pool it left is compacted by moving the
    /// highest-indexed occupant into the freed slot.
    ///
    /// Panics when called on an invalidated layout or on a field that is
    /// already generic: both are caller bugs.
    pub fn evolve(&self, field_index: usize, sample: &Value) -> Layout {
        assert!(
            self.is_valid(),
            "evolve on invalidated layout generation {}",
            self.generation
        );
        let old = self.locations[field_index];
        assert!(
            !old.is_object(),
            "field {field_index} is already generic and cannot evolve"
        );
        self.valid.set(false);

        let mut locations = self.locations.to_vec();
        locations[field_index] = Location::Uninitialized;

        let kind = if old.is_uninitialized() {
            FieldKind::classify(sample)
        } else {
            // Category change: the field leaves its typed slot for good.
            FieldKind::Object
        };
        assign(&mut locations, field_index, kind);

        match old {
            Location::Bool { slot } => {
                compact(&mut locations, Pool::Bool, slot as usize)
            }
            Location::Char { slot }
            | Location::Int { slot }
            | Location::Float { slot } => {
                compact(&mut locations, Pool::Primitive, slot as usize)
            }
            _ => {}
        }

        let (num_bools, num_primitives, num_objects) = count_pools(&locations);
        let layout = Layout {
            locations: locations.into(),
            num_bools,
            num_primitives,
            num_objects,
            generation: self.generation + 1,
            valid: Cell::new(true),
        };
        debug_assert!(layout.consecutive(), "pool slots not consecutive");
        trace!(
            "layout gen {} -> {}: field {} now {:?}",
            self.generation,
            layout.generation,
            field_index,
            layout.locations[field_index]
        );
        layout
    }

    /// Whether each pool's used slots form `{0, .., count - 1}` with no
    /// duplicates.
    pub fn consecutive(&self) -> bool {
        [Pool::Bool, Pool::Primitive, Pool::Object]
            .into_iter()
            .all(|pool| {
                let mut slots: Vec<usize> = self
                    .locations
                    .iter()
                    .filter(|l| l.pool() == Some(pool))
                    .map(|l| l.slot().unwrap())
                    .collect();
                slots.sort_unstable();
                slots.iter().enumerate().all(|(i, &s)| i == s)
            })
    }
}

fn in_use(locations: &[Location], pool: Pool, slot: usize) -> bool {
    locations.iter().any(|l| l.occupies(pool, slot))
}

fn assign(locations: &mut [Location], field_index: usize, kind: FieldKind) {
    let limit = match kind.pool() {
        Pool::Bool => BOOL_POOL_LIMIT,
        Pool::Primitive => PRIMITIVE_POOL_LIMIT,
        // One object slot per field at most, so the scan always terminates.
        Pool::Object => locations.len(),
    };
    for slot in 0..limit {
        if !in_use(locations, kind.pool(), slot) {
            locations[field_index] = Location::with_kind(kind, slot);
            return;
        }
    }
    // Pool exhausted: fall back to a generic object slot.
    assert!(
        kind.pool() != Pool::Object,
        "object pool exhausted with {} fields",
        locations.len()
    );
    assign(locations, field_index, FieldKind::Object);
}

/// Close the gap left at `freed` by moving the pool's highest-indexed
/// occupant down into it, keeping that occupant's concrete kind.
fn compact(locations: &mut [Location], pool: Pool, freed: usize) {
    let highest = locations
        .iter()
        .filter(|l| l.pool() == Some(pool))
        .filter_map(|l| l.slot())
        .max();
    let Some(highest) = highest else {
        return;
    };
    if highest < freed {
        return;
    }
    for location in locations.iter_mut() {
        if location.occupies(pool, highest) {
            *location = Location::with_kind(location.kind().unwrap(), freed);
            return;
        }
    }
    unreachable!("highest occupied slot vanished during compaction");
}

fn count_pools(locations: &[Location]) -> (u16, u16, u16) {
    let mut bools = 0;
    let mut primitives = 0;
    let mut objects = 0;
    for location in locations {
        match location.pool() {
            Some(Pool::Bool) => bools += 1,
            Some(Pool::Primitive) => primitives += 1,
            Some(Pool::Object) => objects += 1,
            None => {}
        }
    }
    (bools, primitives, objects)
}
