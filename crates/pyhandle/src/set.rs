//! Typed wrappers for `set` and `frozenset`.
//!
//! [`Set`] exposes the mutating operations, [`FrozenSet`] only the shared
//! ones, and [`AnySet`] accepts either. Every operation null-checks its
//! operands first: a null wrapper or argument raises
//! `AssertionError: failed null check` (unless something is already pending)
//! and returns the failure sentinel.

use crate::{
    exception::{ExcType, PyErr, PyResult},
    ffi,
    kind::{
        AnyKind, AnySetKind, AsHandle, FrozenSetKind, MutableSet, Packable, SetKind, SetLike, TupleKind,
        failed_null_check,
    },
    nonnull::Nonnull,
    object::{Object, fetch_error},
    tmpref::Tmpref,
};

/// A mutable `set`.
pub type Set = Object<SetKind>;
/// An immutable `frozenset`.
pub type FrozenSet = Object<FrozenSetKind>;
/// Either kind of set.
pub type AnySet = Object<AnySetKind>;

impl<K: SetLike> Object<K> {
    /// `key in self`: 1, 0, or -1 on error (e.g. an unhashable key).
    pub fn contains(&self, key: &impl AsHandle) -> i32 {
        let (Some(set), Some(key)) = (self.as_ptr(), key.as_handle()) else {
            return failed_null_check();
        };
        ffi::set_contains(Some(set), Some(key))
    }
}

impl<K: MutableSet> Object<K> {
    /// `self.add(key)`: 0 on success, -1 on error.
    pub fn add(&self, key: &impl AsHandle) -> i32 {
        let (Some(set), Some(key)) = (self.as_ptr(), key.as_handle()) else {
            return failed_null_check();
        };
        ffi::set_add(Some(set), Some(key))
    }

    /// `self.discard(key)`: 1 if found and removed, 0 if absent, -1 on error.
    pub fn discard(&self, key: &impl AsHandle) -> i32 {
        let (Some(set), Some(key)) = (self.as_ptr(), key.as_handle()) else {
            return failed_null_check();
        };
        ffi::set_discard(Some(set), Some(key))
    }

    /// `self.remove(key)`: 0 on success; -1 with `KeyError(repr(key))` when
    /// the key is absent.
    pub fn remove(&self, key: &impl AsHandle) -> i32 {
        match self.discard(key) {
            1 => 0,
            0 => {
                match Object::<AnyKind>::from_owned_ptr(ffi::object_repr(key.as_handle())).to_str() {
                    Ok(text) => ffi::err_restore(PyErr::new(ExcType::KeyError, text)),
                    Err(err) => ffi::err_restore(err),
                }
                -1
            }
            _ => -1,
        }
    }

    /// `self.clear()`: 0 on success, -1 on error.
    pub fn clear(&self) -> i32 {
        if !self.is_nonnull() {
            return failed_null_check();
        }
        ffi::set_clear(self.as_ptr())
    }

    /// `self.pop()`: an arbitrary element, or null with `KeyError` when empty.
    #[must_use]
    pub fn pop(&self) -> Object {
        if !self.is_nonnull() {
            failed_null_check();
            return Object::null();
        }
        Object::from_owned_ptr(ffi::set_pop(self.as_ptr()))
    }
}

impl<K: Packable> Object<K> {
    /// A new empty set of this kind.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_owned_ptr(K::new_from(None))
    }

    /// Builds a set of this kind from the elements of `iterable`.
    #[must_use]
    pub fn from_iterable(iterable: &impl AsHandle) -> Self {
        let Some(iterable) = iterable.as_handle() else {
            failed_null_check();
            return Self::null();
        };
        Self::from_owned_ptr(K::new_from(Some(iterable)))
    }

    /// Builds a set from `elements`, dropping duplicates.
    ///
    /// A null element fails the whole pack before anything is allocated.
    /// See also [`pack!`](crate::pack).
    pub fn pack(elements: &[&dyn AsHandle]) -> Tmpref<K> {
        let mut handles = Vec::with_capacity(elements.len());
        for element in elements {
            let Some(handle) = element.as_handle() else {
                failed_null_check();
                return Tmpref::null();
            };
            handles.push(Some(handle));
        }
        let tuple = Tmpref::<TupleKind>::from_owned_ptr(ffi::tuple_pack(&handles));
        if !tuple.is_nonnull() {
            return Tmpref::null();
        }
        Tmpref::from_owned_ptr(K::new_from(tuple.as_ptr()))
    }

    /// [`pack`](Self::pack) that reports failure as a `Result`.
    pub fn try_pack(elements: &[&dyn AsHandle]) -> PyResult<Nonnull<K>> {
        Self::pack(elements).into_nonnull().map_err(|_| fetch_error())
    }
}

/// Packs the given values into a new set of the named kind.
///
/// ```
/// use pyhandle::{Object, SetKind, pack};
///
/// let one = Object::new_int(1);
/// let two = Object::new_int(2);
/// let set = pack!(SetKind; one, two, one);
/// assert_eq!(set.len(), 2);
/// ```
#[macro_export]
macro_rules! pack {
    ($kind:ty; $($elem:expr),* $(,)?) => {
        $crate::Object::<$kind>::pack(&[$(&$elem as &dyn $crate::AsHandle),*])
    };
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn remove_missing_key_raises_key_error_with_repr() {
        ffi::err_clear();
        let set = Set::empty();
        let key = Object::new_str("gone");
        assert_eq!(set.remove(&key), -1);
        assert_eq!(ffi::err_fetch(), Some(PyErr::new(ExcType::KeyError, "'gone'")));

        assert_eq!(set.add(&key), 0);
        assert_eq!(set.remove(&key), 0);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn null_operands_fail_the_null_check() {
        ffi::err_clear();
        let set = Set::empty();
        assert_eq!(set.add(&Object::<AnyKind>::null()), -1);
        assert_eq!(
            ffi::err_fetch(),
            Some(PyErr::new(ExcType::AssertionError, "failed null check"))
        );

        assert_eq!(Set::null().contains(&Object::new_int(1)), -1);
        assert!(ffi::err_occurred());

        // a pending exception is not overwritten
        ffi::err_set_string(ExcType::ValueError, "earlier");
        assert_eq!(Set::null().clear(), -1);
        assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::ValueError));
    }

    #[test]
    fn pack_deduplicates() {
        let a = Object::new_int(0);
        let b = Object::new_int(1);
        let c = Object::new_int(2);
        let packed = pack!(FrozenSetKind; a, b, c, a, b);
        assert_eq!(packed.len(), 3);
        assert_eq!(packed.contains(&c), 1);
        assert_eq!(a.refcount(), 2);
    }

    #[test]
    fn pack_null_element_fails() {
        ffi::err_clear();
        let a = Object::new_int(0);
        let packed = pack!(SetKind; a, Object::<AnyKind>::null());
        assert!(!packed.is_nonnull());
        assert_eq!(a.refcount(), 1);
        assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::AssertionError));
    }

    #[test]
    fn any_set_accepts_both() {
        let frozen = pack!(FrozenSetKind; Object::new_int(1)).into_object();
        let any = AnySet::from_object(&frozen);
        assert!(any.is_nonnull());
        assert_eq!(any.len(), 1);
        let mutable = pack!(SetKind; Object::new_int(1)).into_object();
        assert!(AnySet::from_object(&mutable).is_nonnull());
    }

    #[test]
    fn pop_returns_the_element() {
        let set = pack!(SetKind; Object::new_str("only")).into_object();
        assert_eq!(set.pop().to_str(), Ok("only".to_owned()));
        assert!(!set.pop().is_nonnull());
        assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::KeyError));
    }
}
