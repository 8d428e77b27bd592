//! Identity and alias tracking for one (de)serialization run.
//!
//! The tracker owns the id and key counters plus every process-local table
//! the engine consults: the serialize-side address-to-id reference table,
//! the array storage records used for slice detection, the pointer
//! provenance tables, and the deserialize-side id-to-value and id-to-slot
//! tables together with the pending fixups resolved in the post-pass.
//!
//! Addresses are derived from live `Rc`s with `Rc::as_ptr`. Each recorded
//! `Rc` is cloned into a keep-alive list so no recorded address can be
//! freed and reused while the run is in progress; `reset` drops them all.

use std::collections::{HashMap, HashSet};

use crate::archive::Slice;
use crate::id::Id;
use crate::value::{Slot, Value};

/// Storage provenance of one archived array or string: the address of its
/// first element, its element count, and its element size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayRecord {
    /// Address of the first visible element.
    pub base: usize,
    /// Element count.
    pub len: usize,
    /// Element size in bytes.
    pub elem_size: usize,
}

impl ArrayRecord {
    /// True if `other`'s buffer range lies within this record's range and
    /// the element sizes match. Equal ranges satisfy this in both
    /// directions; the slice pass breaks the tie by id.
    pub fn contains(&self, other: &ArrayRecord) -> bool {
        self.elem_size == other.elem_size
            && self.base <= other.base
            && other.base + other.len * other.elem_size <= self.base + self.len * self.elem_size
    }
}

/// A deserialize-side edge whose target had not been walked yet when the
/// edge was encountered. Resolved in the deserialize post-pass.
#[derive(Debug)]
pub(crate) enum Fixup {
    /// A `reference` node naming a not-yet-reconstructed id.
    Reference {
        target: Id,
        slot: Slot,
        declared: String,
    },
    /// A `slice` node whose parent array was not reconstructed yet.
    Slice {
        parent: Id,
        offset: usize,
        length: usize,
        slot: Slot,
    },
    /// A pointer waiting for the value stored under `target`.
    Pointer { pointer: Id, target: Id, slot: Slot },
}

/// All per-run mutable state of the engine.
#[derive(Default)]
pub(crate) struct Tracker {
    next_id: u64,
    next_key: u64,

    // Serialize side.
    references: HashMap<usize, Id>,
    arrays: Vec<(Id, ArrayRecord)>,
    pointers: Vec<(Id, usize)>,
    value_positions: HashMap<usize, (Id, String)>,
    keep_alive: Vec<Value>,
    keep_alive_slots: Vec<Slot>,

    // Deserialize side.
    reconstructed: HashMap<Id, Value>,
    slots: HashMap<Id, Slot>,
    fixups: Vec<Fixup>,
}

impl Tracker {
    /// Allocates the next run-unique id.
    pub fn next_id(&mut self) -> Id {
        let id = Id::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Generates the next synthetic key.
    pub fn next_key(&mut self) -> String {
        let key = self.next_key.to_string();
        self.next_key += 1;
        key
    }

    /// Zeroes the id and key counters, leaving the tables alone.
    pub fn reset_counters(&mut self) {
        self.next_id = 0;
        self.next_key = 0;
    }

    /// Clears every table and counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // --- Serialize side ---

    /// The id previously assigned to the reference-typed value at `addr`.
    pub fn reference_id(&self, addr: usize) -> Option<Id> {
        self.references.get(&addr).copied()
    }

    /// Records a reference-typed value's address under `id`. `keep_alive`
    /// must own the `Rc` the address was derived from.
    pub fn record_reference(&mut self, addr: usize, id: Id, keep_alive: Value) {
        self.references.insert(addr, id);
        self.keep_alive.push(keep_alive);
    }

    /// Records the storage provenance of an archived array or string.
    pub fn record_array(&mut self, id: Id, record: ArrayRecord, keep_alive: Value) {
        self.arrays.push((id, record));
        self.keep_alive.push(keep_alive);
    }

    /// Records that pointer `id` targets the slot at `pointee_addr`.
    pub fn record_pointer(&mut self, id: Id, pointee_addr: usize) {
        self.pointers.push((id, pointee_addr));
    }

    /// Records that the slot at `addr` was serialized as a value under
    /// `id` and `key`, making it a viable pointer target.
    pub fn record_value_position(&mut self, addr: usize, id: Id, key: &str, keep_alive: Slot) {
        self.value_positions.insert(addr, (id, key.to_string()));
        self.keep_alive_slots.push(keep_alive);
    }

    /// All archived pointers in emission order.
    pub fn pointers(&self) -> &[(Id, usize)] {
        &self.pointers
    }

    /// The `{id, key}` of the value serialized at `addr`, if any.
    pub fn value_position(&self, addr: usize) -> Option<&(Id, String)> {
        self.value_positions.get(&addr)
    }

    /// Decides, for every archived array in ascending id order, whether it
    /// is a slice of another archived array.
    ///
    /// An array B is a slice of A iff A's range contains B's, the element
    /// sizes match, and A is not B. Empty arrays neither are slices nor
    /// serve as parents. Among candidate parents the largest range wins,
    /// ties broken by smallest id; for equal ranges only the smaller id may
    /// serve as parent, so duplicate views resolve one way. A chosen parent
    /// is never itself rewritten as a slice.
    pub fn resolve_slices(&self) -> Vec<(Id, Option<(Id, Slice)>)> {
        let mut arrays = self.arrays.clone();
        arrays.sort_by_key(|(id, _)| *id);

        let mut sliced: HashSet<Id> = HashSet::new();
        let mut out = Vec::with_capacity(arrays.len());

        for (id_b, rec_b) in &arrays {
            if rec_b.len == 0 {
                out.push((*id_b, None));
                continue;
            }
            let parent = arrays
                .iter()
                .filter(|(id_a, rec_a)| {
                    id_a != id_b
                        && rec_a.len > 0
                        && !sliced.contains(id_a)
                        && rec_a.contains(rec_b)
                        && (!rec_b.contains(rec_a) || id_a < id_b)
                })
                .max_by_key(|(id_a, rec_a)| (rec_a.len, std::cmp::Reverse(*id_a)));

            match parent {
                Some((id_a, rec_a)) => {
                    let offset = (rec_b.base - rec_a.base) / rec_b.elem_size;
                    sliced.insert(*id_b);
                    out.push((
                        *id_b,
                        Some((
                            *id_a,
                            Slice {
                                offset,
                                length: rec_b.len,
                            },
                        )),
                    ));
                }
                None => out.push((*id_b, None)),
            }
        }
        out
    }

    // --- Deserialize side ---

    /// Records a reconstructed reference-typed value under its document id.
    pub fn record_reconstructed(&mut self, id: Id, value: Value) {
        self.reconstructed.insert(id, value);
    }

    /// The reconstructed value for a document id.
    pub fn reconstructed(&self, id: Id) -> Option<Value> {
        self.reconstructed.get(&id).cloned()
    }

    /// Records the slot a document id was deserialized into.
    pub fn record_slot(&mut self, id: Id, slot: Slot) {
        self.slots.insert(id, slot);
    }

    /// The slot holding the value deserialized under `id`.
    pub fn slot(&self, id: Id) -> Option<Slot> {
        self.slots.get(&id).cloned()
    }

    /// Queues an edge for the deserialize post-pass.
    pub fn push_fixup(&mut self, fixup: Fixup) {
        self.fixups.push(fixup);
    }

    /// Drains the queued fixups.
    pub fn take_fixups(&mut self) -> Vec<Fixup> {
        std::mem::take(&mut self.fixups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(base: usize, len: usize) -> ArrayRecord {
        ArrayRecord {
            base,
            len,
            elem_size: 8,
        }
    }

    fn tracker_with(arrays: &[(u64, ArrayRecord)]) -> Tracker {
        let mut t = Tracker::default();
        for (id, record) in arrays {
            t.arrays.push((Id::new(*id), *record));
        }
        t
    }

    #[test]
    fn contained_range_becomes_a_slice() {
        let t = tracker_with(&[(0, rec(1000, 10)), (1, rec(1008, 2))]);
        let resolved = t.resolve_slices();
        let (id, edge) = &resolved[1];
        assert_eq!(*id, Id::new(1));
        let (parent, slice) = edge.as_ref().expect("slice detected");
        assert_eq!(*parent, Id::new(0));
        assert_eq!(slice.offset, 1);
        assert_eq!(slice.length, 2);
    }

    #[test]
    fn equal_ranges_slice_onto_the_smaller_id() {
        let t = tracker_with(&[(0, rec(1000, 4)), (1, rec(1000, 4))]);
        let resolved = t.resolve_slices();
        assert!(resolved[0].1.is_none());
        let (parent, slice) = resolved[1].1.as_ref().expect("duplicate view sliced");
        assert_eq!(*parent, Id::new(0));
        assert_eq!(slice.offset, 0);
        assert_eq!(slice.length, 4);
    }

    #[test]
    fn chains_resolve_against_the_outermost_array() {
        let t = tracker_with(&[(0, rec(1000, 10)), (1, rec(1008, 5)), (2, rec(1016, 2))]);
        let resolved = t.resolve_slices();
        let (parent_b, _) = resolved[1].1.as_ref().expect("mid sliced");
        let (parent_c, slice_c) = resolved[2].1.as_ref().expect("inner sliced");
        assert_eq!(*parent_b, Id::new(0));
        assert_eq!(*parent_c, Id::new(0));
        assert_eq!(slice_c.offset, 2);
    }

    #[test]
    fn empty_and_disjoint_arrays_stay_standalone() {
        let t = tracker_with(&[(0, rec(1000, 4)), (1, rec(5000, 4)), (2, rec(1000, 0))]);
        for (_, edge) in t.resolve_slices() {
            assert!(edge.is_none());
        }
    }
}
