use std::{fmt, ops::Deref};

use crate::{
    exception::BadNonnull,
    ffi::{self, Handle},
    iter::Iter,
    kind::{AnyKind, AsHandle, Kind},
    object::Object,
    tmpref::Tmpref,
};

/// An [`Object`] known to hold a reference.
///
/// Obtained through [`Object::as_nonnull`] or [`Object::into_result`]. The
/// accessors below skip the null checks that the `Object` versions make;
/// everything else is reached through `Deref`.
pub struct Nonnull<K: Kind = AnyKind> {
    inner: Object<K>,
}

impl<K: Kind> Nonnull<K> {
    /// `inner` must be non-null.
    pub(crate) fn new_unchecked(inner: Object<K>) -> Self {
        debug_assert!(inner.is_nonnull(), "Nonnull::new_unchecked: wrapper is empty");
        Self { inner }
    }

    #[must_use]
    pub fn as_ptr(&self) -> Handle {
        self.inner
            .as_ptr()
            .expect("Nonnull::as_ptr: wrapper lost its reference")
    }

    #[must_use]
    pub fn into_ptr(self) -> Handle {
        self.inner
            .into_ptr()
            .expect("Nonnull::into_ptr: wrapper lost its reference")
    }

    #[must_use]
    pub fn into_object(self) -> Object<K> {
        self.inner
    }

    pub fn into_tmpref(self) -> Tmpref<K> {
        Tmpref::from_object(self.inner)
    }

    #[must_use]
    pub fn len(&self) -> isize {
        K::length_unchecked(self.as_ptr())
    }

    #[must_use]
    pub fn hash(&self) -> i64 {
        ffi::object_hash(Some(self.as_ptr()))
    }

    #[must_use]
    pub fn is_true(&self) -> i32 {
        ffi::object_is_true(Some(self.as_ptr()))
    }

    #[must_use]
    pub fn length_hint(&self, fallback: usize) -> isize {
        ffi::object_length_hint(Some(self.as_ptr()), fallback)
    }

    #[must_use]
    pub fn type_of(&self) -> Object {
        self.inner.type_of()
    }

    #[must_use]
    pub fn repr(&self) -> Object {
        Object::adopt(ffi::object_repr(Some(self.as_ptr())))
    }

    #[must_use]
    pub fn str(&self) -> Object {
        Object::adopt(ffi::object_str(Some(self.as_ptr())))
    }

    #[must_use]
    pub fn dir(&self) -> Object {
        Object::adopt(ffi::object_dir(Some(self.as_ptr())))
    }

    #[must_use]
    pub fn iter(&self) -> Iter {
        Iter::new(Some(self.as_ptr()))
    }
}

impl<K: Kind> Deref for Nonnull<K> {
    type Target = Object<K>;

    fn deref(&self) -> &Object<K> {
        &self.inner
    }
}

impl<K: Kind> Clone for Nonnull<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: Kind> TryFrom<Object<K>> for Nonnull<K> {
    type Error = BadNonnull;

    fn try_from(ob: Object<K>) -> Result<Self, BadNonnull> {
        ob.as_nonnull()
    }
}

impl<K: Kind> From<Nonnull<K>> for Object<K> {
    fn from(ob: Nonnull<K>) -> Self {
        ob.inner
    }
}

impl<K: Kind> AsHandle for Nonnull<K> {
    fn as_handle(&self) -> Option<Handle> {
        Some(self.as_ptr())
    }
}

impl<K: Kind> IntoIterator for &Nonnull<K> {
    type Item = <Iter as Iterator>::Item;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl<K: Kind> fmt::Debug for Nonnull<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonnull<{}>({})", K::NAME, self.as_ptr())
    }
}

impl<K: Kind> fmt::Display for Nonnull<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::kind::{AnySetKind, FrozenSetKind, SetKind};

    #[test]
    fn as_nonnull_keeps_the_reference() {
        let ob = Object::new_int(12);
        let handle = ob.as_ptr();
        let nonnull = ob.as_nonnull().unwrap();
        assert_eq!(Some(nonnull.as_ptr()), handle);
        assert_eq!(nonnull.refcount(), 1);
        let back = nonnull.into_object();
        assert_eq!(back.as_ptr(), handle);
    }

    #[test]
    fn empty_wrapper_is_rejected() {
        assert_eq!(Object::<SetKind>::null().as_nonnull().err(), Some(BadNonnull));
        assert!(Nonnull::try_from(Object::<AnyKind>::null()).is_err());
    }

    #[test]
    fn unchecked_accessors_match_object() {
        let text = Object::new_str("abc").as_nonnull().unwrap();
        assert_eq!(text.len(), 3);
        assert_eq!(text.is_true(), 1);
        assert_eq!(text.hash(), Object::<AnyKind>::from_object(&*text).hash());
        assert_eq!(text.repr().to_str().unwrap(), "'abc'");
        assert_eq!(text.type_of().to_string(), "<class 'str'>");
    }

    #[test]
    fn set_length_reads_storage_directly() {
        ffi::err_clear();
        let set = Object::<SetKind>::empty();
        assert_eq!(set.add(&Object::new_int(1)), 0);
        assert_eq!(set.add(&Object::new_int(2)), 0);
        let frozen = Object::<FrozenSetKind>::from_iterable(&set).as_nonnull().unwrap();
        let any = Object::<AnySetKind>::from_object(&set).as_nonnull().unwrap();
        let set = set.as_nonnull().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(frozen.len(), 2);
        assert_eq!(any.len(), 2);
        assert_eq!(SetKind::length_unchecked(set.as_ptr()), set.len());
        assert!(!ffi::err_occurred());
    }
}
