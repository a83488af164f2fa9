use std::{fmt, marker::PhantomData, ops::Neg};

use crate::{
    cell::RefSlot,
    exception::{BadNonnull, ExcType, PyErr, PyResult},
    ffi::{self, Handle},
    iter::Iter,
    kind::{AnyKind, AsHandle, Kind, ListKind, TupleKind},
    nonnull::Nonnull,
    tmpref::Tmpref,
    types::CompareOp,
};

/// An owned, possibly null reference to a runtime object of kind `K`.
///
/// Cloning acquires a new reference and dropping releases it. Operations
/// mirror the C API: on failure they return a sentinel (`-1` or a null
/// `Object`) and leave the exception in the ambient error slot, where
/// [`ffi::err_fetch`] or [`into_result`](Self::into_result) can pick it up.
///
/// A handle whose object is not of kind `K` never makes it into the wrapper:
/// construction releases it, leaves the wrapper null and raises `TypeError`.
pub struct Object<K: Kind = AnyKind> {
    slot: RefSlot,
    kind: PhantomData<K>,
}

/// Fetches the pending exception after a failed call.
pub(crate) fn fetch_error() -> PyErr {
    ffi::err_fetch().unwrap_or_else(|| PyErr::new(ExcType::SystemError, "error return without exception set"))
}

impl<K: Kind> Object<K> {
    /// The null wrapper.
    #[must_use]
    pub fn null() -> Self {
        Self::adopt(None)
    }

    /// Takes ownership of `handle` without a kind check.
    pub(crate) fn adopt(handle: Option<Handle>) -> Self {
        Self {
            slot: RefSlot::from_owned(handle),
            kind: PhantomData,
        }
    }

    /// Steals the reference in `handle`.
    ///
    /// A null handle gives a null wrapper and leaves the error slot alone:
    /// the call that produced it has already raised.
    #[must_use]
    pub fn from_owned_ptr(handle: Option<Handle>) -> Self {
        let Some(handle) = handle else {
            return Self::null();
        };
        match ffi::type_tag(Some(handle)) {
            Some(ty) if K::accepts(ty) => Self::adopt(Some(handle)),
            Some(ty) => {
                ffi::decref(Some(handle));
                ffi::err_set_unless_pending(PyErr::new(
                    ExcType::TypeError,
                    format!("cannot make {} from {ty}", K::NAME),
                ));
                Self::null()
            }
            None => {
                ffi::err_set_unless_pending(ExcType::bad_internal_call());
                Self::null()
            }
        }
    }

    /// Acquires a new reference to `handle`.
    #[must_use]
    pub fn from_borrowed_ptr(handle: Option<Handle>) -> Self {
        ffi::incref(handle);
        Self::from_owned_ptr(handle)
    }

    /// A new reference to the object held by `ob`, checked against `K`.
    #[must_use]
    pub fn from_object<K2: Kind>(ob: &Object<K2>) -> Self {
        Self::from_borrowed_ptr(ob.as_ptr())
    }

    /// Reinterprets this reference as kind `K2`, checking the object's type.
    #[must_use]
    pub fn cast<K2: Kind>(self) -> Object<K2> {
        Object::from_owned_ptr(self.into_ptr())
    }

    #[must_use]
    pub fn into_any(self) -> Object {
        Object::adopt(self.into_ptr())
    }

    /// Peeks at the handle; the wrapper keeps its reference.
    #[must_use]
    pub fn as_ptr(&self) -> Option<Handle> {
        self.slot.get()
    }

    /// Gives up the reference without releasing it.
    #[must_use]
    pub fn into_ptr(mut self) -> Option<Handle> {
        self.slot.take()
    }

    #[must_use]
    pub fn is_nonnull(&self) -> bool {
        !self.slot.is_empty()
    }

    /// Identity comparison (`a is b`). Null is never identical to anything.
    #[must_use]
    pub fn is(&self, other: &impl AsHandle) -> bool {
        self.is_nonnull() && self.as_ptr() == other.as_handle()
    }

    /// Current reference count of the held object; 0 when null.
    #[must_use]
    pub fn refcount(&self) -> usize {
        ffi::refcount(self.as_ptr())
    }

    /// Adds a reference that this wrapper does not own.
    pub fn incref(&self) {
        self.slot.acquire();
    }

    /// Drops one reference. If it was the last, the wrapper becomes null.
    pub fn decref(&mut self) {
        self.slot.release();
    }

    /// Refines into a [`Nonnull`] holding the same reference.
    pub fn as_nonnull(self) -> Result<Nonnull<K>, BadNonnull> {
        if self.is_nonnull() {
            Ok(Nonnull::new_unchecked(self))
        } else {
            Err(BadNonnull)
        }
    }

    /// Moves the reference into a scoped [`Tmpref`].
    pub fn as_tmpref(self) -> Tmpref<K> {
        Tmpref::from_object(self)
    }

    /// `Ok` for a non-null wrapper, otherwise the pending exception.
    pub fn into_result(self) -> PyResult<Nonnull<K>> {
        self.as_nonnull().map_err(|BadNonnull| fetch_error())
    }

    // ------------------------------------------------------------------
    // object protocol
    // ------------------------------------------------------------------

    /// `repr(self)`.
    #[must_use]
    pub fn repr(&self) -> Object {
        Object::adopt(ffi::object_repr(self.as_ptr()))
    }

    /// `ascii(self)`.
    #[must_use]
    pub fn ascii(&self) -> Object {
        Object::adopt(ffi::object_ascii(self.as_ptr()))
    }

    /// `str(self)`.
    #[must_use]
    pub fn str(&self) -> Object {
        Object::adopt(ffi::object_str(self.as_ptr()))
    }

    /// `hash(self)`, or -1 on error.
    #[must_use]
    pub fn hash(&self) -> i64 {
        ffi::object_hash(self.as_ptr())
    }

    /// `bool(self)`: 1, 0, or -1 on error.
    #[must_use]
    pub fn is_true(&self) -> i32 {
        ffi::object_is_true(self.as_ptr())
    }

    /// `type(self)`.
    #[must_use]
    pub fn type_of(&self) -> Object {
        match ffi::type_tag(self.as_ptr()) {
            Some(ty) => Object::adopt(Some(ffi::type_object(ty))),
            None => {
                ffi::err_bad_internal_call();
                Object::null()
            }
        }
    }

    /// `len(self)`, or -1 on error. Set kinds read their size directly.
    #[must_use]
    pub fn len(&self) -> isize {
        K::length(self.as_ptr())
    }

    /// `operator.length_hint(self, fallback)`, or -1 on error.
    #[must_use]
    pub fn length_hint(&self, fallback: usize) -> isize {
        ffi::object_length_hint(self.as_ptr(), fallback)
    }

    /// `dir(self)`. A null wrapper raises rather than listing a scope.
    #[must_use]
    pub fn dir(&self) -> Object {
        Object::adopt(ffi::object_dir(self.as_ptr()))
    }

    /// `iter(self)` as a runtime iterator object.
    #[must_use]
    pub fn py_iter(&self) -> Object {
        Object::adopt(ffi::object_get_iter(self.as_ptr()))
    }

    /// Iterates over the items of `self` from Rust.
    #[must_use]
    pub fn iter(&self) -> Iter {
        Iter::new(self.as_ptr())
    }

    /// Compares `self` with `other` using `op`; the result is usually `True` or `False`.
    #[must_use]
    pub fn rich_compare(&self, other: &impl AsHandle, op: CompareOp) -> Object {
        Object::adopt(ffi::rich_compare(self.as_ptr(), other.as_handle(), op))
    }

    #[must_use]
    pub fn py_lt(&self, other: &impl AsHandle) -> Object {
        self.rich_compare(other, CompareOp::Lt)
    }

    #[must_use]
    pub fn py_le(&self, other: &impl AsHandle) -> Object {
        self.rich_compare(other, CompareOp::Le)
    }

    #[must_use]
    pub fn py_eq(&self, other: &impl AsHandle) -> Object {
        self.rich_compare(other, CompareOp::Eq)
    }

    #[must_use]
    pub fn py_ne(&self, other: &impl AsHandle) -> Object {
        self.rich_compare(other, CompareOp::Ne)
    }

    #[must_use]
    pub fn py_gt(&self, other: &impl AsHandle) -> Object {
        self.rich_compare(other, CompareOp::Gt)
    }

    #[must_use]
    pub fn py_ge(&self, other: &impl AsHandle) -> Object {
        self.rich_compare(other, CompareOp::Ge)
    }

    /// `-self`.
    #[must_use]
    pub fn py_neg(&self) -> Object {
        Object::adopt(ffi::number_negative(self.as_ptr()))
    }

    /// `+self`.
    #[must_use]
    pub fn py_pos(&self) -> Object {
        Object::adopt(ffi::number_positive(self.as_ptr()))
    }

    /// `abs(self)`.
    #[must_use]
    pub fn py_abs(&self) -> Object {
        Object::adopt(ffi::number_absolute(self.as_ptr()))
    }

    /// `~self`.
    #[must_use]
    pub fn py_invert(&self) -> Object {
        Object::adopt(ffi::number_invert(self.as_ptr()))
    }

    /// The text of a `str` object.
    pub fn to_str(&self) -> PyResult<String> {
        ffi::unicode_as_string(self.as_ptr()).ok_or_else(fetch_error)
    }

    /// The value of an `int` or `bool` object.
    pub fn to_i64(&self) -> PyResult<i64> {
        let value = ffi::long_as_i64(self.as_ptr());
        if value == -1 && ffi::err_occurred() {
            Err(fetch_error())
        } else {
            Ok(value)
        }
    }
}

impl Object {
    /// New reference to `None`.
    #[must_use]
    pub fn none() -> Self {
        Self::adopt(Some(ffi::none()))
    }

    #[must_use]
    pub fn new_bool(value: bool) -> Self {
        Self::adopt(Some(ffi::bool_from(value)))
    }

    #[must_use]
    pub fn new_int(value: i64) -> Self {
        Self::adopt(ffi::long_from_i64(value))
    }

    #[must_use]
    pub fn new_float(value: f64) -> Self {
        Self::adopt(ffi::float_from_f64(value))
    }

    #[must_use]
    pub fn new_str(value: &str) -> Self {
        Self::adopt(ffi::unicode_from_str(value))
    }

    /// A tuple of new references to `items`; null if any item is null.
    #[must_use]
    pub fn new_tuple(items: &[&dyn AsHandle]) -> Object<TupleKind> {
        let handles: Vec<Option<Handle>> = items.iter().map(|item| item.as_handle()).collect();
        Object::adopt(ffi::tuple_pack(&handles))
    }

    /// A list of new references to `items`; null if any item is null.
    #[must_use]
    pub fn new_list(items: &[&dyn AsHandle]) -> Object<ListKind> {
        let list = Object::<ListKind>::adopt(ffi::list_new());
        for item in items {
            if list.append(item) < 0 {
                return Object::null();
            }
        }
        list
    }
}

impl Object<ListKind> {
    /// `list.append(item)`: 0 on success, -1 on error.
    pub fn append(&self, item: &impl AsHandle) -> i32 {
        ffi::list_append(self.as_ptr(), item.as_handle())
    }
}

impl<K: Kind> Default for Object<K> {
    fn default() -> Self {
        Self::null()
    }
}

impl<K: Kind> Clone for Object<K> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            kind: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.slot.clone_from(&source.slot);
    }
}

impl<K: Kind> AsHandle for Object<K> {
    fn as_handle(&self) -> Option<Handle> {
        self.as_ptr()
    }
}

impl<K: Kind> Neg for &Object<K> {
    type Output = Object;

    fn neg(self) -> Object {
        self.py_neg()
    }
}

impl<K: Kind> IntoIterator for &Object<K> {
    type Item = PyResult<Nonnull>;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl<K: Kind> fmt::Debug for Object<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ptr() {
            Some(handle) => write!(f, "Object<{}>({handle})", K::NAME),
            None => write!(f, "Object<{}>(NULL)", K::NAME),
        }
    }
}

/// Formats as `str(self)`; a null wrapper shows as `<NULL>`.
impl<K: Kind> fmt::Display for Object<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_nonnull() {
            return f.write_str("<NULL>");
        }
        match self.str().to_str() {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::kind::SetKind;

    #[test]
    fn wrong_kind_leaves_wrapper_null() {
        ffi::err_clear();
        let list = Object::new_list(&[]);
        let handle = list.as_ptr();
        let set = Object::<SetKind>::from_object(&list);
        assert!(!set.is_nonnull());
        assert_eq!(list.refcount(), 1);
        assert_eq!(
            ffi::err_fetch().map(|e| e.to_string()),
            Some("TypeError: cannot make set from list".to_owned())
        );

        let moved = list.cast::<SetKind>();
        assert!(!moved.is_nonnull());
        assert_eq!(ffi::refcount(handle), 0);
        ffi::err_clear();
    }

    #[test]
    fn null_queries_raise_system_error() {
        ffi::err_clear();
        let null = Object::<AnyKind>::null();
        assert_eq!(null.hash(), -1);
        assert_eq!(fetch_error().exc_type(), ExcType::SystemError);
        assert!(!null.repr().is_nonnull());
        assert!(ffi::err_fetch().is_some());
        assert_eq!(null.to_string(), "<NULL>");
    }

    #[test]
    fn negation_operator_delegates() {
        let five = Object::new_int(5);
        assert_eq!((-&five).to_i64(), Ok(-5));
        assert_eq!(five.py_invert().to_i64(), Ok(-6));
        assert_eq!(Object::new_float(-1.5).py_abs().to_string(), "1.5");
    }

    #[test]
    fn display_uses_str() {
        let text = Object::new_str("hi");
        assert_eq!(text.to_string(), "hi");
        assert_eq!(text.repr().to_string(), "'hi'");
        assert_eq!(format!("{:?}", Object::<SetKind>::null()), "Object<set>(NULL)");
    }
}
