//! C-API-shaped surface of the runtime.
//!
//! Functions here follow the conventions of a C extension API:
//!
//! * a handle argument is an `Option<Handle>`, where `None` plays the part of
//!   a null pointer;
//! * functions returning `Option<Handle>` hand the caller a *new* reference,
//!   or `None` with an exception pending;
//! * integer-returning functions use `-1` as the error sentinel;
//! * failures are reported through the ambient error slot (`err_*`), never
//!   through Rust `Result`s.
//!
//! Reference counts are entirely manual at this level. The owning wrappers in
//! [`Object`](crate::Object) and friends are the intended way to use it.

use std::{fmt, marker::PhantomData};

use crate::{
    exception::{ExcType, PyErr},
    heap::{DecRef, HeapId, Immortal},
    runtime::{self, Runtime},
    types::{CompareOp, Type, UnaryOp},
};

/// Opaque reference to a runtime object.
///
/// A handle is a plain identifier: copying it does not touch the refcount.
/// Once the object is freed the handle becomes stale, and every function in
/// this module reports stale handles instead of touching whatever object
/// reuses the slot.
///
/// Handles are bound to the thread whose runtime created them (`!Send`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: HeapId,
    _not_send: PhantomData<*const ()>,
}

impl Handle {
    pub(crate) fn from_id(id: HeapId) -> Self {
        Self {
            id,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn id(self) -> HeapId {
        self.id
    }

    /// Slot index of the object in its runtime's heap.
    #[must_use]
    pub fn index(self) -> usize {
        self.id.index()
    }

    /// How many objects occupied this slot before this one.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.id.generation()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.id)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

/// Resolves `ob`, runs `f`, and moves any failure into the error slot.
fn call<T>(ob: Option<Handle>, f: impl FnOnce(&mut Runtime, HeapId) -> Result<T, PyErr>) -> Option<T> {
    runtime::with(|rt| {
        let result = rt.resolve(ob).and_then(|id| f(rt, id));
        rt.ok_or_raise(result)
    })
}

/// Like [`call`] for two operands.
fn call2<T>(
    a: Option<Handle>,
    b: Option<Handle>,
    f: impl FnOnce(&mut Runtime, HeapId, HeapId) -> Result<T, PyErr>,
) -> Option<T> {
    runtime::with(|rt| {
        let result = resolve2(rt, a, b).and_then(|(a, b)| f(rt, a, b));
        rt.ok_or_raise(result)
    })
}

fn resolve2(rt: &Runtime, a: Option<Handle>, b: Option<Handle>) -> Result<(HeapId, HeapId), PyErr> {
    Ok((rt.resolve(a)?, rt.resolve(b)?))
}

fn new_ref(id: Option<HeapId>) -> Option<Handle> {
    id.map(Handle::from_id)
}

fn flag(outcome: Option<bool>) -> i32 {
    match outcome {
        Some(true) => 1,
        Some(false) => 0,
        None => -1,
    }
}

fn size(outcome: Option<usize>) -> isize {
    outcome.map_or(-1, |n| isize::try_from(n).unwrap_or(isize::MAX))
}

// ============================================================================
// Allocation
// ============================================================================

/// `PyLong_FromLongLong`.
#[must_use]
pub fn long_from_i64(value: i64) -> Option<Handle> {
    runtime::with(|rt| {
        let result = rt.new_int(value);
        new_ref(rt.ok_or_raise(result))
    })
}

/// `PyFloat_FromDouble`.
#[must_use]
pub fn float_from_f64(value: f64) -> Option<Handle> {
    runtime::with(|rt| {
        let result = rt.new_float(value);
        new_ref(rt.ok_or_raise(result))
    })
}

/// `PyUnicode_FromString`.
#[must_use]
pub fn unicode_from_str(value: &str) -> Option<Handle> {
    runtime::with(|rt| {
        let result = rt.new_str(value.to_owned());
        new_ref(rt.ok_or_raise(result))
    })
}

/// Builds a tuple of new references to `items`. Any null item fails the call.
#[must_use]
pub fn tuple_pack(items: &[Option<Handle>]) -> Option<Handle> {
    runtime::with(|rt| {
        let result = items
            .iter()
            .map(|&item| rt.resolve(item))
            .collect::<Result<Vec<_>, _>>()
            .and_then(|ids| rt.new_tuple(&ids));
        new_ref(rt.ok_or_raise(result))
    })
}

/// `PyList_New(0)`.
#[must_use]
pub fn list_new() -> Option<Handle> {
    runtime::with(|rt| {
        let result = rt.new_list();
        new_ref(rt.ok_or_raise(result))
    })
}

/// `PyList_Append`: 0 on success, -1 on error. The list takes a new reference.
pub fn list_append(list: Option<Handle>, item: Option<Handle>) -> i32 {
    call2(list, item, |rt, list, item| rt.list_append(list, item)).map_or(-1, |()| 0)
}

/// `PySet_New`: a set of the items of `iterable`, or an empty set for null.
#[must_use]
pub fn set_new(iterable: Option<Handle>) -> Option<Handle> {
    new_any_set(iterable, false)
}

/// `PyFrozenSet_New`: a frozenset of the items of `iterable`, or an empty one for null.
#[must_use]
pub fn frozenset_new(iterable: Option<Handle>) -> Option<Handle> {
    new_any_set(iterable, true)
}

fn new_any_set(iterable: Option<Handle>, frozen: bool) -> Option<Handle> {
    runtime::with(|rt| {
        let result = match iterable {
            Some(_) => rt.resolve(iterable).and_then(|id| rt.new_set(Some(id), frozen)),
            None => rt.new_set(None, frozen),
        };
        new_ref(rt.ok_or_raise(result))
    })
}

/// `PyUnicode_AsUTF8`: the text of a `str` object.
#[must_use]
pub fn unicode_as_string(ob: Option<Handle>) -> Option<String> {
    call(ob, |rt, id| rt.str_value(id))
}

/// `PyLong_AsLongLong`: -1 on error (check [`err_occurred`] to disambiguate).
#[must_use]
pub fn long_as_i64(ob: Option<Handle>) -> i64 {
    call(ob, |rt, id| rt.int_value(id)).unwrap_or(-1)
}

/// New reference to `None`.
#[must_use]
pub fn none() -> Handle {
    runtime::with(|rt| Handle::from_id(rt.singleton(Immortal::None)))
}

/// New reference to `True` or `False`.
#[must_use]
pub fn bool_from(value: bool) -> Handle {
    runtime::with(|rt| Handle::from_id(rt.bool_object(value)))
}

// ============================================================================
// Reference counts
// ============================================================================

/// `Py_XINCREF`: no-op for null.
///
/// Acquiring through a stale handle raises `SystemError` and changes nothing.
pub fn incref(ob: Option<Handle>) {
    if ob.is_none() {
        return;
    }
    runtime::with(|rt| match rt.resolve(ob) {
        Ok(id) => rt.acquire(id),
        Err(err) => rt.raise_unless_pending(err),
    });
}

/// `Py_XDECREF` fused with the zero check.
///
/// Returns true when the caller's handle must no longer be used: either this
/// release freed the object, or the object was already gone (a stale
/// release, reported to the tracer and raised as `SystemError` unless an
/// exception is already pending). Null is a no-op returning false.
pub fn decref(ob: Option<Handle>) -> bool {
    let Some(handle) = ob else { return false };
    // the runtime may already be torn down when called from a destructor
    runtime::try_with(|rt| {
        if rt.is_live(handle.id()) {
            rt.release(handle.id()) == DecRef::Freed
        } else {
            rt.stale_release(handle);
            true
        }
    })
    .unwrap_or(true)
}

/// Current reference count; 0 for null or a stale handle.
#[must_use]
pub fn refcount(ob: Option<Handle>) -> usize {
    let Some(handle) = ob else { return 0 };
    runtime::with(|rt| rt.refcount(handle.id()).unwrap_or(0))
}

// ============================================================================
// Type tags
// ============================================================================

/// Runtime type of `ob`, or `None` for null or a stale handle. Never raises.
#[must_use]
pub fn type_tag(ob: Option<Handle>) -> Option<Type> {
    runtime::with(|rt| rt.resolve(ob).ok().map(|id| rt.type_of(id)))
}

/// New reference to the type object for `ty`.
#[must_use]
pub fn type_object(ty: Type) -> Handle {
    runtime::with(|rt| Handle::from_id(rt.singleton(Immortal::TypeObject(ty))))
}

/// Returns true if `ob` is non-null, live and exactly of type `ty`.
#[must_use]
pub fn is_type(ob: Option<Handle>, ty: Type) -> bool {
    type_tag(ob) == Some(ty)
}

// ============================================================================
// Object protocol
// ============================================================================

/// `PyObject_Repr`.
#[must_use]
pub fn object_repr(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, Runtime::repr))
}

/// `PyObject_ASCII`.
#[must_use]
pub fn object_ascii(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, Runtime::ascii))
}

/// `PyObject_Str`.
#[must_use]
pub fn object_str(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, Runtime::str))
}

/// `PyObject_Hash`: -1 on error.
#[must_use]
pub fn object_hash(ob: Option<Handle>) -> i64 {
    call(ob, |rt, id| rt.hash(id)).unwrap_or(-1)
}

/// `PyObject_IsTrue`: 1, 0, or -1 on error.
#[must_use]
pub fn object_is_true(ob: Option<Handle>) -> i32 {
    flag(call(ob, |rt, id| Ok(rt.is_true(id))))
}

/// `PyObject_Length`: -1 on error, including for null.
#[must_use]
pub fn object_length(ob: Option<Handle>) -> isize {
    size(call(ob, |rt, id| rt.len(id)))
}

/// `PyObject_LengthHint`: the length if known, else `default`; -1 on error.
#[must_use]
pub fn object_length_hint(ob: Option<Handle>, default: usize) -> isize {
    size(call(ob, |rt, id| Ok(rt.length_hint(id, default))))
}

/// `PyObject_Dir` for a non-null object. Null raises instead of listing a scope.
#[must_use]
pub fn object_dir(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, Runtime::dir))
}

/// `PyObject_GetIter`.
#[must_use]
pub fn object_get_iter(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, Runtime::get_iter))
}

/// `PyIter_Next`: the next item, or `None` either at exhaustion (no error
/// pending) or on failure (error pending).
#[must_use]
pub fn iter_next(iter: Option<Handle>) -> Option<Handle> {
    new_ref(call(iter, Runtime::iter_next).flatten())
}

/// `PyObject_RichCompare`: a new reference to the result.
#[must_use]
pub fn rich_compare(a: Option<Handle>, b: Option<Handle>, op: CompareOp) -> Option<Handle> {
    new_ref(call2(a, b, |rt, a, b| rt.rich_compare(a, b, op)))
}

/// `PyNumber_Negative`.
#[must_use]
pub fn number_negative(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, |rt, id| rt.unary(id, UnaryOp::Negative)))
}

/// `PyNumber_Positive`.
#[must_use]
pub fn number_positive(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, |rt, id| rt.unary(id, UnaryOp::Positive)))
}

/// `PyNumber_Absolute`.
#[must_use]
pub fn number_absolute(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, |rt, id| rt.unary(id, UnaryOp::Absolute)))
}

/// `PyNumber_Invert`.
#[must_use]
pub fn number_invert(ob: Option<Handle>) -> Option<Handle> {
    new_ref(call(ob, |rt, id| rt.unary(id, UnaryOp::Invert)))
}

// ============================================================================
// Sets
// ============================================================================

/// `PySet_Add`: 0 on success (including when already present), -1 on error.
pub fn set_add(set: Option<Handle>, key: Option<Handle>) -> i32 {
    call2(set, key, |rt, set, key| rt.set_add(set, key)).map_or(-1, |_| 0)
}

/// `PySet_Discard`: 1 if found and removed, 0 if absent, -1 on error.
pub fn set_discard(set: Option<Handle>, key: Option<Handle>) -> i32 {
    flag(call2(set, key, |rt, set, key| rt.set_discard(set, key)))
}

/// `PySet_Contains`: 1, 0, or -1 on error.
#[must_use]
pub fn set_contains(set: Option<Handle>, key: Option<Handle>) -> i32 {
    flag(call2(set, key, |rt, set, key| rt.set_contains(set, key)))
}

/// `PySet_Clear`: 0 on success, -1 on error.
pub fn set_clear(set: Option<Handle>) -> i32 {
    call(set, |rt, set| rt.set_clear(set)).map_or(-1, |()| 0)
}

/// `PySet_Pop`: a new reference to an arbitrary element.
#[must_use]
pub fn set_pop(set: Option<Handle>) -> Option<Handle> {
    new_ref(call(set, Runtime::set_pop))
}

/// `PySet_Size`: -1 on error.
#[must_use]
pub fn set_get_size(set: Option<Handle>) -> isize {
    size(call(set, |rt, set| rt.set_size(set)))
}

/// `PySet_GET_SIZE`: the size of a handle the caller knows is a live set or
/// frozenset, read straight from its storage with no null or type check.
///
/// A handle that breaks the promise raises `SystemError` and returns -1.
#[must_use]
pub(crate) fn set_get_size_unchecked(set: Handle) -> isize {
    runtime::with(|rt| match rt.set_size_unchecked(set.id()) {
        Some(n) => size(Some(n)),
        None => {
            rt.raise_unless_pending(ExcType::bad_internal_call());
            -1
        }
    })
}

// ============================================================================
// Error channel
// ============================================================================

/// `PyErr_Occurred`.
#[must_use]
pub fn err_occurred() -> bool {
    runtime::with(|rt| rt.err_occurred())
}

/// `PyErr_SetString`: replaces any pending exception.
pub fn err_set_string(exc_type: ExcType, message: &str) {
    runtime::with(|rt| rt.raise(PyErr::new(exc_type, message)));
}

/// Stores an existing exception, replacing any pending one.
pub fn err_restore(err: PyErr) {
    runtime::with(|rt| rt.raise(err));
}

/// Moves the pending exception out of the error slot.
#[must_use]
pub fn err_fetch() -> Option<PyErr> {
    runtime::with(Runtime::err_fetch)
}

/// `PyErr_Clear`.
pub fn err_clear() {
    runtime::with(|rt| {
        rt.err_fetch();
    });
}

/// `PyErr_BadInternalCall`.
pub fn err_bad_internal_call() {
    runtime::with(|rt| rt.raise(ExcType::bad_internal_call()));
}

/// Raises `err` unless an exception is already pending.
pub(crate) fn err_set_unless_pending(err: PyErr) {
    runtime::with(|rt| rt.raise_unless_pending(err));
}
