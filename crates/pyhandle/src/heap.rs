use std::{cell::Cell, collections::BTreeMap, fmt, mem::size_of};

use ahash::AHashMap;
use strum::IntoEnumIterator;

use crate::{
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceError, ResourceTracker},
    types::{List, SeqIter, SetStorage, Tuple, Type},
};

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration order,
/// making snapshots suitable for display and comparison without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap, immortal singletons included.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by Python type name (e.g. "set", "int").
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Resource tracker allocation count, if the tracker records one.
    pub tracker_allocations: Option<usize>,
    /// Resource tracker memory usage in bytes, if the tracker records it.
    pub tracker_memory_bytes: Option<usize>,
}

impl HeapStats {
    /// Number of live objects of the given type.
    #[must_use]
    pub fn count_of(&self, ty: Type) -> usize {
        let name: &'static str = ty.into();
        self.objects_by_type.get(name).copied().unwrap_or(0)
    }
}

/// Identifier for an object stored inside the heap arena.
///
/// Pairs the slot index with the slot's generation at allocation time. When a
/// slot is freed its generation advances, so ids minted for the previous
/// occupant no longer resolve: they are *stale* rather than aliasing whatever
/// object reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct HeapId {
    index: u32,
    generation: u32,
}

impl HeapId {
    /// Returns the raw slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Objects that exist once per heap and are never freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Immortal {
    None,
    True,
    False,
    TypeObject(Type),
}

/// Payload of a heap slot.
#[derive(Debug)]
pub(crate) enum HeapData {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Tuple),
    List(List),
    Set(SetStorage),
    FrozenSet(SetStorage),
    Type(Type),
    Iter(SeqIter),
}

impl HeapData {
    /// The runtime type tag of this payload.
    pub(crate) fn py_type(&self) -> Type {
        match self {
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Str(_) => Type::Str,
            Self::Tuple(_) => Type::Tuple,
            Self::List(_) => Type::List,
            Self::Set(_) => Type::Set,
            Self::FrozenSet(_) => Type::FrozenSet,
            Self::Type(_) => Type::Type,
            Self::Iter(it) => it.py_type(),
        }
    }

    /// Moves the ids of every reference this payload owns into `out`.
    fn py_dec_ref_ids(self, out: &mut Vec<HeapId>) {
        match self {
            Self::Tuple(t) => out.extend(t.into_items()),
            Self::List(l) => out.extend(l.into_items()),
            Self::Set(s) | Self::FrozenSet(s) => out.extend(s.into_ids()),
            Self::Iter(it) => it.child_ids(out),
            Self::None | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_) | Self::Type(_) => {}
        }
    }

    /// Approximate number of bytes this object occupies, for memory limits.
    pub(crate) fn py_estimate_size(&self) -> usize {
        let payload = match self {
            Self::Str(s) => s.len(),
            Self::Tuple(t) => t.len() * size_of::<HeapId>(),
            Self::List(l) => l.len() * size_of::<HeapId>(),
            // entry (id + cached hash) plus its index-table slot
            Self::Set(s) | Self::FrozenSet(s) => s.len() * (size_of::<(HeapId, i64)>() + size_of::<usize>()),
            Self::Iter(SeqIter::Set { items, .. }) => items.len() * size_of::<HeapId>(),
            _ => 0,
        };
        size_of::<HeapValue>() + payload
    }
}

/// A live heap entry: the embedded refcount plus the payload.
///
/// The `data` field is an Option to support temporary borrowing: when an
/// operation needs mutable access to both the data and the heap,
/// `with_entry_mut` takes the data out (leaving `None`) and restores it
/// afterwards. `refcount` stays reachable throughout.
#[derive(Debug)]
struct HeapValue {
    refcount: Cell<usize>,
    immortal: bool,
    data: Option<HeapData>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    value: Option<HeapValue>,
}

/// Outcome of [`Heap::dec_ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecRef {
    /// The object is still alive with this many references.
    Alive(usize),
    /// The count reached zero and the object (plus anything only it owned) was freed.
    Freed,
}

/// Refcount transition reported to the observer passed to [`Heap::dec_ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefEvent {
    Released { id: HeapId, refcount: usize },
    Freed { id: HeapId, ty: Type },
}

/// Reference-counted arena that backs every runtime object.
///
/// Uses a free list to reuse slots from freed objects. When an object is freed
/// via `dec_ref`, its slot index is added to the free list and the slot's
/// generation advances. New allocations pop from the free list when
/// available, otherwise append.
///
/// Generic over `T: ResourceTracker` so tests can run without limits; with
/// `NoLimitTracker` all resource checks compile away.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Slot>,
    /// Indices of freed slots available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<u32>,
    tracker: T,
    /// Singleton objects, created eagerly so they never count against limits.
    immortals: AHashMap<Immortal, HeapId>,
    /// Remaining depth for nested data walks (repr, eq, compare, hash).
    ///
    /// A `Cell` so the walkers, which only hold `&Heap`, can count levels.
    data_depth_remaining: Cell<u16>,
}

macro_rules! take_data {
    ($self:ident, $id:expr, $func_name:literal) => {
        $self
            .value_mut($id)
            .expect(concat!("Heap::", $func_name, ": object already freed"))
            .data
            .take()
            .expect(concat!("Heap::", $func_name, ": data already borrowed"))
    };
}

macro_rules! restore_data {
    ($self:ident, $id:expr, $new_data:expr, $func_name:literal) => {{
        let entry = $self
            .value_mut($id)
            .expect(concat!("Heap::", $func_name, ": object already freed"));
        entry.data = Some($new_data);
    }};
}

impl<T: ResourceTracker> Heap<T> {
    /// Creates a heap with the given resource tracker.
    ///
    /// `None`, `True`, `False` and one type object per [`Type`] are created
    /// up front and bypass the tracker.
    pub fn new(tracker: T) -> Self {
        let mut heap = Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
            immortals: AHashMap::new(),
            data_depth_remaining: Cell::new(MAX_DATA_RECURSION_DEPTH),
        };
        heap.insert_immortal(Immortal::None, HeapData::None);
        heap.insert_immortal(Immortal::True, HeapData::Bool(true));
        heap.insert_immortal(Immortal::False, HeapData::Bool(false));
        for ty in Type::iter() {
            heap.insert_immortal(Immortal::TypeObject(ty), HeapData::Type(ty));
        }
        heap
    }

    fn insert_immortal(&mut self, key: Immortal, data: HeapData) {
        let id = self.insert(HeapValue {
            refcount: Cell::new(1),
            immortal: true,
            data: Some(data),
        });
        self.immortals.insert(key, id);
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a new object with a refcount of one.
    ///
    /// The tracker is consulted first; on refusal nothing is stored and the
    /// payload (with any references it owns) is handed back in the error so
    /// the caller can release them.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, (ResourceError, HeapData)> {
        if let Err(err) = self.tracker.on_allocate(|| data.py_estimate_size()) {
            return Err((err, data));
        }
        Ok(self.insert(HeapValue {
            refcount: Cell::new(1),
            immortal: false,
            data: Some(data),
        }))
    }

    fn insert(&mut self, value: HeapValue) -> HeapId {
        if let Some(index) = self.free_list.pop() {
            // Reuse a freed slot; its generation was advanced when it was freed
            let slot = &mut self.entries[index as usize];
            slot.value = Some(value);
            HeapId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.entries.len()).expect("Heap::insert: slot index overflow");
            self.entries.push(Slot {
                generation: 0,
                value: Some(value),
            });
            HeapId { index, generation: 0 }
        }
    }

    /// Returns a new reference to an immortal singleton.
    pub fn immortal(&self, key: Immortal) -> HeapId {
        let id = *self.immortals.get(&key).expect("Heap::immortal: singleton missing");
        self.inc_ref(id);
        id
    }

    fn value(&self, id: HeapId) -> Option<&HeapValue> {
        let slot = self.entries.get(id.index())?;
        if slot.generation == id.generation {
            slot.value.as_ref()
        } else {
            None
        }
    }

    fn value_mut(&mut self, id: HeapId) -> Option<&mut HeapValue> {
        let slot = self.entries.get_mut(id.index())?;
        if slot.generation == id.generation {
            slot.value.as_mut()
        } else {
            None
        }
    }

    /// Returns true if `id` still refers to the object it was minted for.
    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.value(id).is_some()
    }

    /// Current refcount, or `None` when `id` is stale.
    #[must_use]
    pub fn refcount(&self, id: HeapId) -> Option<usize> {
        self.value(id).map(|value| value.refcount.get())
    }

    /// Increments the reference count, returning the new count.
    ///
    /// Uses interior mutability for the refcount, so only shared access to the
    /// heap is required.
    ///
    /// # Panics
    /// Panics if `id` is stale.
    pub fn inc_ref(&self, id: HeapId) -> usize {
        let value = self.value(id).expect("Heap::inc_ref: object already freed");
        let count = value.refcount.get() + 1;
        value.refcount.set(count);
        count
    }

    /// Decrements the reference count and frees the object (plus children)
    /// once it hits zero.
    ///
    /// `observe` sees every transition this causes, including releases and
    /// frees of children. Children are processed with an explicit stack so
    /// deeply nested containers cannot overflow the call stack. Immortal
    /// objects never drop below one reference.
    ///
    /// # Panics
    /// Panics if `id` is stale.
    pub fn dec_ref(&mut self, id: HeapId, mut observe: impl FnMut(RefEvent)) -> DecRef {
        let outcome = self.release_one(id, &mut observe);
        let DecRef::Freed = outcome else {
            return outcome;
        };

        let mut pending = Vec::new();
        self.free_slot(id, &mut pending, &mut observe);
        self.release_all(pending, &mut observe);
        DecRef::Freed
    }

    /// Releases the references owned by a payload that never made it onto the
    /// heap, e.g. one handed back by a refused allocation.
    pub fn discard(&mut self, data: HeapData, mut observe: impl FnMut(RefEvent)) {
        let mut pending = Vec::new();
        data.py_dec_ref_ids(&mut pending);
        self.release_all(pending, &mut observe);
    }

    fn release_all(&mut self, mut pending: Vec<HeapId>, observe: &mut impl FnMut(RefEvent)) {
        while let Some(child) = pending.pop() {
            if self.release_one(child, observe) == DecRef::Freed {
                self.free_slot(child, &mut pending, observe);
            }
        }
    }

    fn release_one(&mut self, id: HeapId, observe: &mut impl FnMut(RefEvent)) -> DecRef {
        let value = self.value(id).expect("Heap::dec_ref: object already freed");
        let count = value.refcount.get();
        if count > 1 || value.immortal {
            let refcount = count.saturating_sub(1).max(1);
            value.refcount.set(refcount);
            observe(RefEvent::Released { id, refcount });
            DecRef::Alive(refcount)
        } else {
            DecRef::Freed
        }
    }

    fn free_slot(&mut self, id: HeapId, pending: &mut Vec<HeapId>, observe: &mut impl FnMut(RefEvent)) {
        let slot = &mut self.entries[id.index()];
        let value = slot.value.take().expect("Heap::dec_ref: object already freed");
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);

        let data = value.data.expect("Heap::dec_ref: data currently borrowed");
        self.tracker.on_free(|| data.py_estimate_size());
        observe(RefEvent::Freed { id, ty: data.py_type() });
        data.py_dec_ref_ids(pending);
    }

    /// Attempts to enter one level of a nested data walk.
    ///
    /// Returns `false` once the depth limit is reached; the depth is then left
    /// untouched and [`data_depth_exit`](Self::data_depth_exit) must not be
    /// called. After `true`, the caller must exit exactly once.
    #[inline]
    pub fn data_depth_enter(&self) -> bool {
        let remaining = self.data_depth_remaining.get();
        if remaining == 0 {
            false
        } else {
            self.data_depth_remaining.set(remaining - 1);
            true
        }
    }

    #[inline]
    pub fn data_depth_exit(&self) {
        self.data_depth_remaining.set(self.data_depth_remaining.get() + 1);
    }

    /// Returns an immutable reference to the payload stored at `id`.
    ///
    /// # Panics
    /// Panics if `id` is stale or the data is currently borrowed via `with_entry_mut`.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.value(id)
            .expect("Heap::get: object already freed")
            .data
            .as_ref()
            .expect("Heap::get: data currently borrowed")
    }

    /// Returns the payload if `id` is live and not currently borrowed.
    #[must_use]
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.value(id)?.data.as_ref()
    }

    /// Returns a mutable reference to the payload stored at `id`.
    ///
    /// # Panics
    /// Panics if `id` is stale or the data is currently borrowed via `with_entry_mut`.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.value_mut(id)
            .expect("Heap::get_mut: object already freed")
            .data
            .as_mut()
            .expect("Heap::get_mut: data currently borrowed")
    }

    /// Gives mutable access to a heap entry while allowing reentrant heap usage
    /// inside the closure (e.g. to read other objects or release references).
    ///
    /// The data is temporarily taken from the entry and restored after the
    /// closure completes.
    pub fn with_entry_mut<F, R>(&mut self, id: HeapId, f: F) -> R
    where
        F: FnOnce(&mut Self, &mut HeapData) -> R,
    {
        let mut data = take_data!(self, id, "with_entry_mut");

        let result = f(self, &mut data);

        restore_data!(self, id, data, "with_entry_mut");
        result
    }

    /// Returns a snapshot of the current heap state.
    pub fn heap_stats(&self) -> HeapStats {
        let mut live_objects: usize = 0;
        let mut free_slots: usize = 0;
        let mut objects_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();

        for slot in &self.entries {
            match &slot.value {
                Some(value) => {
                    live_objects += 1;
                    if let Some(data) = &value.data {
                        *objects_by_type.entry(data.py_type().into()).or_insert(0) += 1;
                    }
                }
                None => free_slots += 1,
            }
        }

        HeapStats {
            live_objects,
            free_slots,
            total_slots: self.entries.len(),
            objects_by_type,
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.memory_bytes(),
        }
    }
}
