//! The per-thread object runtime.
//!
//! Each thread owns one [`Runtime`]: a heap, the ambient error slot and the
//! installed tracer. Holding the thread-local borrow plays the role of the
//! interpreter lock; handles are `!Send`, so nothing created on one thread
//! can be touched from another.
//!
//! Methods on `Runtime` work on live, borrowed [`HeapId`]s and report failure
//! through [`PyResult`]. The [`ffi`](crate::ffi) layer resolves raw handles,
//! calls these methods and moves errors into the ambient slot.

use std::cell::RefCell;

use crate::{
    exception::{ExcType, PyErr, PyResult},
    ffi::Handle,
    heap::{DecRef, Heap, HeapData, HeapId, HeapStats, Immortal, RefEvent},
    resource::{LimitedTracker, ResourceLimits},
    tracer::{NoopTracer, RefTracer},
    types::{
        CompareOp, IterItem, List, SeqIter, SetStorage, Tuple, Type, UnaryOp,
        protocol::{py_ascii, py_compare, py_hash, py_len, py_repr, py_str, py_truthy, py_unary},
    },
};

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new(RuntimeConfig::default()));
}

/// Runs `f` with exclusive access to this thread's runtime.
///
/// # Panics
/// Panics on reentry, e.g. when a tracer hook calls back into the runtime.
pub(crate) fn with<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with_borrow_mut(f)
}

/// Like [`with`], but returns `None` once the thread-local has been torn down.
///
/// Destructors use this so wrappers dropped during thread exit are a no-op.
pub(crate) fn try_with<R>(f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
    RUNTIME.try_with(|cell| f(&mut cell.borrow_mut())).ok()
}

/// Settings applied to the current thread's runtime by [`configure`].
#[derive(Debug)]
pub struct RuntimeConfig {
    pub limits: ResourceLimits,
    pub tracer: Box<dyn RefTracer>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            tracer: Box::new(NoopTracer),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: impl RefTracer + 'static) -> Self {
        self.tracer = Box::new(tracer);
        self
    }
}

/// Applies `config` to the current thread's runtime.
///
/// Live objects are kept; new limits only affect future allocations.
pub fn configure(config: RuntimeConfig) {
    with(|rt| {
        rt.heap.tracker_mut().set_limits(config.limits);
        rt.tracer = config.tracer;
    });
}

/// Replaces the current thread's tracer, returning the previous one.
pub fn set_tracer(tracer: impl RefTracer + 'static) -> Box<dyn RefTracer> {
    with(|rt| std::mem::replace(&mut rt.tracer, Box::new(tracer)))
}

/// Replaces the current thread's resource limits.
pub fn set_limits(limits: ResourceLimits) {
    with(|rt| rt.heap.tracker_mut().set_limits(limits));
}

/// Snapshot of the current thread's heap.
#[must_use]
pub fn heap_stats() -> HeapStats {
    with(|rt| rt.heap_stats())
}

#[derive(Debug)]
pub(crate) struct Runtime {
    heap: Heap<LimitedTracker>,
    /// The ambient error slot; at most one exception is pending at a time.
    error: Option<PyErr>,
    tracer: Box<dyn RefTracer>,
}

fn report(tracer: &mut dyn RefTracer, event: RefEvent) {
    match event {
        RefEvent::Released { id, refcount } => tracer.on_release(Handle::from_id(id), refcount),
        RefEvent::Freed { id, ty } => tracer.on_dealloc(Handle::from_id(id), ty),
    }
}

impl Runtime {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            heap: Heap::new(LimitedTracker::new(config.limits)),
            error: None,
            tracer: config.tracer,
        }
    }

    // ------------------------------------------------------------------
    // ambient error channel
    // ------------------------------------------------------------------

    /// Stores `err` as the pending exception, replacing any earlier one.
    pub(crate) fn raise(&mut self, err: PyErr) {
        self.tracer.on_raise(&err);
        self.error = Some(err);
    }

    /// Stores `err` only if no exception is pending yet.
    pub(crate) fn raise_unless_pending(&mut self, err: PyErr) {
        if self.error.is_none() {
            self.raise(err);
        }
    }

    pub(crate) fn err_occurred(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn err_fetch(&mut self) -> Option<PyErr> {
        self.error.take()
    }

    /// Moves the error of a failed operation into the ambient slot.
    pub(crate) fn ok_or_raise<T>(&mut self, result: PyResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.raise(err);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // handles and reference counts
    // ------------------------------------------------------------------

    /// Resolves a raw handle to a live heap id.
    ///
    /// A null handle is `SystemError: bad argument to internal function`; a
    /// handle whose object was already freed is a `SystemError` naming it.
    pub(crate) fn resolve(&self, handle: Option<Handle>) -> PyResult<HeapId> {
        let handle = handle.ok_or_else(ExcType::bad_internal_call)?;
        let id = handle.id();
        if self.heap.is_live(id) {
            Ok(id)
        } else {
            Err(stale_reference(handle))
        }
    }

    pub(crate) fn is_live(&self, id: HeapId) -> bool {
        self.heap.is_live(id)
    }

    pub(crate) fn refcount(&self, id: HeapId) -> Option<usize> {
        self.heap.refcount(id)
    }

    pub(crate) fn acquire(&mut self, id: HeapId) {
        let refcount = self.heap.inc_ref(id);
        self.tracer.on_acquire(Handle::from_id(id), refcount);
    }

    pub(crate) fn release(&mut self, id: HeapId) -> DecRef {
        let tracer = &mut self.tracer;
        self.heap.dec_ref(id, |event| report(tracer.as_mut(), event))
    }

    /// Reports a release through a handle whose object is gone.
    pub(crate) fn stale_release(&mut self, handle: Handle) {
        self.tracer.on_stale_release(handle);
        self.raise_unless_pending(stale_reference(handle));
    }

    fn release_all(&mut self, ids: impl IntoIterator<Item = HeapId>) {
        for id in ids {
            self.release(id);
        }
    }

    /// Allocates `data`, or releases what it owns and raises `MemoryError`.
    fn alloc(&mut self, data: HeapData) -> PyResult<HeapId> {
        let ty = data.py_type();
        match self.heap.allocate(data) {
            Ok(id) => {
                self.tracer.on_allocate(Handle::from_id(id), ty);
                Ok(id)
            }
            Err((err, data)) => {
                let tracer = &mut self.tracer;
                self.heap.discard(data, |event| report(tracer.as_mut(), event));
                Err(err.into())
            }
        }
    }

    /// New reference to an immortal singleton.
    pub(crate) fn singleton(&mut self, key: Immortal) -> HeapId {
        let id = self.heap.immortal(key);
        let refcount = self.heap.refcount(id).unwrap_or(1);
        self.tracer.on_acquire(Handle::from_id(id), refcount);
        id
    }

    pub(crate) fn bool_object(&mut self, value: bool) -> HeapId {
        self.singleton(if value { Immortal::True } else { Immortal::False })
    }

    // ------------------------------------------------------------------
    // constructors
    // ------------------------------------------------------------------

    pub(crate) fn new_int(&mut self, value: i64) -> PyResult<HeapId> {
        self.alloc(HeapData::Int(value))
    }

    pub(crate) fn new_float(&mut self, value: f64) -> PyResult<HeapId> {
        self.alloc(HeapData::Float(value))
    }

    pub(crate) fn new_str(&mut self, value: String) -> PyResult<HeapId> {
        self.alloc(HeapData::Str(value))
    }

    /// Builds a tuple holding new references to `items`.
    pub(crate) fn new_tuple(&mut self, items: &[HeapId]) -> PyResult<HeapId> {
        for &item in items {
            self.acquire(item);
        }
        self.alloc(HeapData::Tuple(Tuple::new(items.iter().copied())))
    }

    pub(crate) fn new_list(&mut self) -> PyResult<HeapId> {
        self.alloc(HeapData::List(List::default()))
    }

    pub(crate) fn list_append(&mut self, list: HeapId, item: HeapId) -> PyResult<()> {
        if !matches!(self.heap.get(list), HeapData::List(_)) {
            return Err(ExcType::bad_internal_call());
        }
        self.acquire(item);
        if let HeapData::List(l) = self.heap.get_mut(list) {
            l.push(item);
        }
        Ok(())
    }

    /// `set(iterable)` / `frozenset(iterable)`; an absent iterable gives an empty set.
    ///
    /// Duplicate items (by hash and equality) are dropped, keeping the first.
    /// `frozenset(f)` for an exact frozenset `f` returns `f` itself.
    pub(crate) fn new_set(&mut self, iterable: Option<HeapId>, frozen: bool) -> PyResult<HeapId> {
        if frozen
            && let Some(source) = iterable
            && matches!(self.heap.get(source), HeapData::FrozenSet(_))
        {
            self.acquire(source);
            return Ok(source);
        }

        let items = match iterable {
            Some(source) => self.collect_items(source)?,
            None => Vec::new(),
        };
        let mut storage = SetStorage::with_capacity(items.len());
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            let inserted = py_hash(&self.heap, item).and_then(|hash| storage.insert(item, hash, &self.heap));
            match inserted {
                Ok(true) => {}
                Ok(false) => {
                    self.release(item);
                }
                Err(err) => {
                    self.release(item);
                    self.release_all(items.by_ref());
                    self.release_all(storage.into_ids());
                    return Err(err);
                }
            }
        }
        self.alloc(if frozen {
            HeapData::FrozenSet(storage)
        } else {
            HeapData::Set(storage)
        })
    }

    /// New references to every item `iterable` yields.
    fn collect_items(&mut self, iterable: HeapId) -> PyResult<Vec<HeapId>> {
        let iter = self.get_iter(iterable)?;
        let mut items = Vec::new();
        let outcome = loop {
            match self.iter_next(iter) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.release(iter);
        match outcome {
            Ok(()) => Ok(items),
            Err(err) => {
                self.release_all(items);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // object protocol
    // ------------------------------------------------------------------

    /// Text of a `str` object.
    pub(crate) fn str_value(&self, id: HeapId) -> PyResult<String> {
        match self.heap.get(id) {
            HeapData::Str(s) => Ok(s.clone()),
            data => Err(PyErr::new(
                ExcType::TypeError,
                format!("bad argument type for built-in operation: '{}'", data.py_type()),
            )),
        }
    }

    /// Value of an `int` (or `bool`) object.
    pub(crate) fn int_value(&self, id: HeapId) -> PyResult<i64> {
        match self.heap.get(id) {
            HeapData::Int(i) => Ok(*i),
            HeapData::Bool(b) => Ok(i64::from(*b)),
            data => Err(PyErr::new(
                ExcType::TypeError,
                format!("'{}' object cannot be interpreted as an integer", data.py_type()),
            )),
        }
    }

    pub(crate) fn type_of(&self, id: HeapId) -> Type {
        self.heap.get(id).py_type()
    }

    pub(crate) fn repr(&mut self, id: HeapId) -> PyResult<HeapId> {
        let text = py_repr(&self.heap, id);
        self.new_str(text)
    }

    pub(crate) fn ascii(&mut self, id: HeapId) -> PyResult<HeapId> {
        let text = py_ascii(&self.heap, id);
        self.new_str(text)
    }

    pub(crate) fn str(&mut self, id: HeapId) -> PyResult<HeapId> {
        let text = py_str(&self.heap, id);
        self.new_str(text)
    }

    pub(crate) fn hash(&self, id: HeapId) -> PyResult<i64> {
        py_hash(&self.heap, id)
    }

    pub(crate) fn is_true(&self, id: HeapId) -> bool {
        py_truthy(&self.heap, id)
    }

    pub(crate) fn len(&self, id: HeapId) -> PyResult<usize> {
        py_len(&self.heap, id)
    }

    /// `operator.length_hint(obj, default)`.
    pub(crate) fn length_hint(&self, id: HeapId, default: usize) -> usize {
        match self.heap.get(id) {
            HeapData::Iter(it) => it.length_hint(&self.heap),
            HeapData::Str(_) | HeapData::Tuple(_) | HeapData::List(_) | HeapData::Set(_) | HeapData::FrozenSet(_) => {
                py_len(&self.heap, id).unwrap_or(default)
            }
            _ => default,
        }
    }

    /// `dir(obj)`: a sorted list of the public attribute names of its type.
    pub(crate) fn dir(&mut self, id: HeapId) -> PyResult<HeapId> {
        let names = self.type_of(id).attribute_names();
        let list = self.new_list()?;
        for name in names {
            let item = match self.new_str((*name).to_owned()) {
                Ok(item) => item,
                Err(err) => {
                    self.release(list);
                    return Err(err);
                }
            };
            if let HeapData::List(l) = self.heap.get_mut(list) {
                l.push(item);
            }
        }
        Ok(list)
    }

    /// `iter(obj)`. Iterators return themselves.
    pub(crate) fn get_iter(&mut self, id: HeapId) -> PyResult<HeapId> {
        let iter = match self.heap.get(id) {
            HeapData::Tuple(_) => SeqIter::Tuple { source: id, index: 0 },
            HeapData::List(_) => SeqIter::List { source: id, index: 0 },
            HeapData::Str(_) => SeqIter::Str {
                source: id,
                byte_offset: 0,
            },
            HeapData::Set(storage) | HeapData::FrozenSet(storage) => SeqIter::Set {
                source: id,
                items: storage.ids().collect(),
                index: 0,
                expected_len: storage.len(),
            },
            HeapData::Iter(_) => {
                self.acquire(id);
                return Ok(id);
            }
            data => {
                return Err(PyErr::new(
                    ExcType::TypeError,
                    format!("'{}' object is not iterable", data.py_type()),
                ));
            }
        };
        let mut owned = Vec::new();
        iter.child_ids(&mut owned);
        for child in owned {
            self.acquire(child);
        }
        self.alloc(HeapData::Iter(iter))
    }

    /// `next(it)`; `Ok(None)` when the iterator is exhausted.
    pub(crate) fn iter_next(&mut self, id: HeapId) -> PyResult<Option<HeapId>> {
        let ty = self.type_of(id);
        if !ty.is_iterator() {
            return Err(PyErr::new(
                ExcType::TypeError,
                format!("'{ty}' object is not an iterator"),
            ));
        }
        let step = self.heap.with_entry_mut(id, |heap, data| match data {
            HeapData::Iter(it) => it.next(heap),
            _ => Ok(None),
        })?;
        match step {
            None => Ok(None),
            Some(IterItem::Borrowed(item)) => {
                self.acquire(item);
                Ok(Some(item))
            }
            Some(IterItem::New(data)) => self.alloc(data).map(Some),
        }
    }

    pub(crate) fn rich_compare(&mut self, a: HeapId, b: HeapId, op: CompareOp) -> PyResult<HeapId> {
        let outcome = py_compare(&self.heap, a, b, op)?;
        Ok(self.bool_object(outcome))
    }

    pub(crate) fn unary(&mut self, id: HeapId, op: UnaryOp) -> PyResult<HeapId> {
        let data = py_unary(&self.heap, id, op)?;
        self.alloc(data)
    }

    // ------------------------------------------------------------------
    // sets
    // ------------------------------------------------------------------

    fn expect_any_set(&self, id: HeapId) -> PyResult<()> {
        if self.type_of(id).is_any_set() {
            Ok(())
        } else {
            Err(ExcType::bad_internal_call())
        }
    }

    fn expect_set(&self, id: HeapId) -> PyResult<()> {
        if self.type_of(id) == Type::Set {
            Ok(())
        } else {
            Err(ExcType::bad_internal_call())
        }
    }

    pub(crate) fn set_size(&self, set: HeapId) -> PyResult<usize> {
        self.expect_any_set(set)?;
        py_len(&self.heap, set)
    }

    /// Size read straight from the storage of a live set or frozenset;
    /// `None` when `set` is stale or some other type.
    pub(crate) fn set_size_unchecked(&self, set: HeapId) -> Option<usize> {
        match self.heap.get_if_live(set)? {
            HeapData::Set(storage) | HeapData::FrozenSet(storage) => Some(storage.len()),
            _ => None,
        }
    }

    pub(crate) fn set_contains(&self, set: HeapId, key: HeapId) -> PyResult<bool> {
        self.expect_any_set(set)?;
        let hash = py_hash(&self.heap, key)?;
        match self.heap.get(set) {
            HeapData::Set(storage) | HeapData::FrozenSet(storage) => storage.contains(key, hash, &self.heap),
            _ => Ok(false),
        }
    }

    /// `set.add(key)`; returns whether the key was newly inserted.
    pub(crate) fn set_add(&mut self, set: HeapId, key: HeapId) -> PyResult<bool> {
        self.expect_set(set)?;
        let hash = py_hash(&self.heap, key)?;
        let inserted = self.heap.with_entry_mut(set, |heap, data| match data {
            HeapData::Set(storage) => storage.insert(key, hash, heap),
            _ => Ok(false),
        })?;
        if inserted {
            self.acquire(key);
        }
        Ok(inserted)
    }

    /// `set.discard(key)`; returns whether an element was removed.
    pub(crate) fn set_discard(&mut self, set: HeapId, key: HeapId) -> PyResult<bool> {
        self.expect_set(set)?;
        let hash = py_hash(&self.heap, key)?;
        let removed = self.heap.with_entry_mut(set, |heap, data| match data {
            HeapData::Set(storage) => storage.remove(key, hash, heap),
            _ => Ok(None),
        })?;
        match removed {
            Some(element) => {
                self.release(element);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn set_clear(&mut self, set: HeapId) -> PyResult<()> {
        self.expect_set(set)?;
        let elements = match self.heap.get_mut(set) {
            HeapData::Set(storage) => storage.drain(),
            _ => Vec::new(),
        };
        self.release_all(elements);
        Ok(())
    }

    /// `set.pop()`: removes an arbitrary element and returns the set's reference to it.
    pub(crate) fn set_pop(&mut self, set: HeapId) -> PyResult<HeapId> {
        self.expect_set(set)?;
        let popped = match self.heap.get_mut(set) {
            HeapData::Set(storage) => storage.pop(),
            _ => None,
        };
        popped.ok_or_else(|| PyErr::new(ExcType::KeyError, "'pop from an empty set'"))
    }

    pub(crate) fn heap_stats(&self) -> HeapStats {
        self.heap.heap_stats()
    }
}

fn stale_reference(handle: Handle) -> PyErr {
    PyErr::new(
        ExcType::SystemError,
        format!("reference to deallocated object {handle}"),
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tracer::{RecordingTracer, TraceEvent};

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default())
    }

    fn ints(rt: &mut Runtime, values: &[i64]) -> Vec<HeapId> {
        values.iter().map(|&v| rt.new_int(v).unwrap()).collect()
    }

    #[test]
    fn new_set_drops_duplicates_and_their_references() {
        let mut rt = runtime();
        let baseline = rt.heap_stats().live_objects;
        let items = ints(&mut rt, &[0, 1, 2, 0, 1]);
        let tuple = rt.new_tuple(&items).unwrap();
        rt.release_all(items);

        let set = rt.new_set(Some(tuple), false).unwrap();
        assert_eq!(rt.set_size(set).unwrap(), 3);
        rt.release(tuple);
        // the set keeps exactly its three elements alive
        assert_eq!(rt.heap_stats().live_objects, baseline + 4);
        rt.release(set);
        assert_eq!(rt.heap_stats().live_objects, baseline);
    }

    #[test]
    fn new_set_rejects_unhashable_items_without_leaking() {
        let mut rt = runtime();
        let baseline = rt.heap_stats().live_objects;
        let list = rt.new_list().unwrap();
        let one = rt.new_int(1).unwrap();
        let tuple = rt.new_tuple(&[one, list]).unwrap();
        rt.release_all([one, list]);

        let err = rt.new_set(Some(tuple), true).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unhashable type: 'list'");
        rt.release(tuple);
        assert_eq!(rt.heap_stats().live_objects, baseline);
    }

    #[test]
    fn frozenset_of_frozenset_is_identity() {
        let mut rt = runtime();
        let frozen = rt.new_set(None, true).unwrap();
        let again = rt.new_set(Some(frozen), true).unwrap();
        assert_eq!(again, frozen);
        assert_eq!(rt.refcount(frozen), Some(2));
    }

    #[test]
    fn set_iterator_detects_resize() {
        let mut rt = runtime();
        let set = rt.new_set(None, false).unwrap();
        let items = ints(&mut rt, &[1, 2]);
        for &item in &items {
            assert!(rt.set_add(set, item).unwrap());
        }
        let iter = rt.get_iter(set).unwrap();
        let first = rt.iter_next(iter).unwrap().unwrap();
        assert!(rt.set_discard(set, items[1]).unwrap());
        let err = rt.iter_next(iter).unwrap_err();
        assert_eq!(err.to_string(), "RuntimeError: Set changed size during iteration");
        rt.release(first);
        rt.release(iter);
    }

    #[test]
    fn str_iteration_yields_characters() {
        let mut rt = runtime();
        let s = rt.new_str("h\u{e9}".to_owned()).unwrap();
        let iter = rt.get_iter(s).unwrap();
        assert_eq!(rt.length_hint(iter, 0), 2);
        let mut seen = Vec::new();
        while let Some(c) = rt.iter_next(iter).unwrap() {
            seen.push(py_str(&rt.heap, c));
            rt.release(c);
        }
        assert_eq!(seen, vec!["h".to_owned(), "\u{e9}".to_owned()]);
        assert_eq!(rt.length_hint(iter, 0), 0);
    }

    #[test]
    fn pop_from_empty_set_is_key_error() {
        let mut rt = runtime();
        let set = rt.new_set(None, false).unwrap();
        let err = rt.set_pop(set).unwrap_err();
        assert!(err.matches(ExcType::KeyError));
        let frozen = rt.new_set(None, true).unwrap();
        assert_eq!(rt.set_pop(frozen).unwrap_err(), ExcType::bad_internal_call());
    }

    #[test]
    fn allocation_limit_surfaces_as_memory_error() {
        let mut rt = Runtime::new(RuntimeConfig::new().limits(ResourceLimits::new().max_allocations(2)));
        let items = ints(&mut rt, &[1, 2]);
        let err = rt.new_tuple(&items).unwrap_err();
        assert!(err.matches(ExcType::MemoryError));
        // the references taken for the refused tuple were given back
        assert_eq!(rt.refcount(items[0]), Some(1));
    }

    #[test]
    fn tracer_sees_allocation_and_dealloc() {
        let recorder = RecordingTracer::new();
        let mut rt = Runtime::new(RuntimeConfig::new().tracer(recorder.clone()));
        let id = rt.new_int(5).unwrap();
        rt.acquire(id);
        rt.release(id);
        rt.release(id);
        let handle = Handle::from_id(id);
        assert_eq!(
            recorder.take_events(),
            vec![
                TraceEvent::Allocate { handle, ty: Type::Int },
                TraceEvent::Acquire { handle, refcount: 2 },
                TraceEvent::Release { handle, refcount: 1 },
                TraceEvent::Dealloc { handle, ty: Type::Int },
            ]
        );
    }
}
