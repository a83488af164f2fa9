use std::{fmt, ops::Deref};

use crate::{
    exception::BadNonnull,
    ffi::Handle,
    kind::{AnyKind, AsHandle, Kind},
    nonnull::Nonnull,
    object::Object,
};

/// A scoped temporary: owns one reference and releases it when the scope
/// ends, unless ownership is handed out with [`into_ptr`](Self::into_ptr).
///
/// Unlike [`Object`] it cannot be cloned, so the temporary has exactly one
/// owner for its whole life.
#[must_use = "a Tmpref releases its reference as soon as it is dropped"]
pub struct Tmpref<K: Kind = AnyKind> {
    inner: Object<K>,
}

impl<K: Kind> Tmpref<K> {
    /// Steals the reference in `handle`, checking its kind like [`Object::from_owned_ptr`].
    pub fn from_owned_ptr(handle: Option<Handle>) -> Self {
        Self {
            inner: Object::from_owned_ptr(handle),
        }
    }

    pub(crate) fn from_object(inner: Object<K>) -> Self {
        Self { inner }
    }

    pub fn null() -> Self {
        Self { inner: Object::null() }
    }

    /// Hands the reference to the caller; nothing is released.
    #[must_use]
    pub fn into_ptr(self) -> Option<Handle> {
        self.inner.into_ptr()
    }

    #[must_use]
    pub fn into_object(self) -> Object<K> {
        self.inner
    }

    pub fn into_nonnull(self) -> Result<Nonnull<K>, BadNonnull> {
        self.inner.as_nonnull()
    }
}

impl<K: Kind> Deref for Tmpref<K> {
    type Target = Object<K>;

    fn deref(&self) -> &Object<K> {
        &self.inner
    }
}

impl<K: Kind> AsHandle for Tmpref<K> {
    fn as_handle(&self) -> Option<Handle> {
        self.inner.as_ptr()
    }
}

impl<K: Kind> fmt::Debug for Tmpref<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.as_ptr() {
            Some(handle) => write!(f, "Tmpref<{}>({handle})", K::NAME),
            None => write!(f, "Tmpref<{}>(NULL)", K::NAME),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ffi;

    #[test]
    fn released_at_end_of_scope() {
        let handle = {
            let tmp = Tmpref::<AnyKind>::from_owned_ptr(ffi::long_from_i64(40));
            assert_eq!(tmp.refcount(), 1);
            tmp.as_ptr()
        };
        assert_eq!(ffi::refcount(handle), 0);
    }

    #[test]
    fn into_ptr_suppresses_release() {
        let tmp = Tmpref::<AnyKind>::from_owned_ptr(ffi::unicode_from_str("kept"));
        let handle = tmp.into_ptr();
        assert_eq!(ffi::refcount(handle), 1);
        assert!(ffi::decref(handle));
    }

    #[test]
    fn debug_shows_kind() {
        assert_eq!(format!("{:?}", Tmpref::<AnyKind>::null()), "Tmpref<object>(NULL)");
    }
}
