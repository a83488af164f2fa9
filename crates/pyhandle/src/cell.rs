use std::{fmt, mem};

use crate::ffi::{self, Handle};

/// Storage for at most one strong reference.
///
/// `RefSlot` is the only place in the ownership layer that adjusts reference
/// counts; every wrapper is built on one.
///
/// * `Clone` acquires a new reference to the same object.
/// * Moving a slot moves its reference; [`take`](Self::take) moves it out and
///   leaves the slot empty.
/// * Dropping a non-empty slot releases its reference exactly once.
pub struct RefSlot {
    handle: Option<Handle>,
}

impl RefSlot {
    #[must_use]
    pub const fn empty() -> Self {
        Self { handle: None }
    }

    /// Adopts a reference the caller already owns. No count change.
    #[must_use]
    pub fn from_owned(handle: Option<Handle>) -> Self {
        Self { handle }
    }

    /// Acquires a new reference to `handle`.
    #[must_use]
    pub fn from_borrowed(handle: Option<Handle>) -> Self {
        ffi::incref(handle);
        Self { handle }
    }

    #[must_use]
    pub fn get(&self) -> Option<Handle> {
        self.handle
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }

    /// Increments the count of the held object; no-op when empty.
    ///
    /// The extra reference is not owned by this slot: balancing it is up to
    /// the caller.
    pub fn acquire(&self) {
        ffi::incref(self.handle);
    }

    /// Releases one reference to the held object.
    ///
    /// If that was the last reference the object is freed and the slot is
    /// emptied in the same step, so the freed handle can never be released
    /// again. No-op when empty.
    pub fn release(&mut self) {
        if ffi::decref(self.handle) {
            self.handle = None;
        }
    }

    /// Moves the reference out, leaving the slot empty.
    pub fn take(&mut self) -> Option<Handle> {
        self.handle.take()
    }
}

impl Default for RefSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for RefSlot {
    fn clone(&self) -> Self {
        Self::from_borrowed(self.handle)
    }

    /// Acquires the new reference before releasing the old one, so assigning
    /// from a slot that holds the same object never frees it in between.
    fn clone_from(&mut self, source: &Self) {
        let mut incoming = source.clone();
        mem::swap(self, &mut incoming);
    }
}

impl Drop for RefSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            ffi::decref(Some(handle));
        }
    }
}

impl fmt::Debug for RefSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handle {
            Some(handle) => write!(f, "RefSlot({handle})"),
            None => f.write_str("RefSlot(NULL)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn clone_and_drop_balance() {
        let slot = RefSlot::from_owned(ffi::long_from_i64(3));
        let handle = slot.get();
        {
            let copy = slot.clone();
            assert_eq!(copy.get(), handle);
            assert_eq!(ffi::refcount(handle), 2);
        }
        assert_eq!(ffi::refcount(handle), 1);
        drop(slot);
        assert_eq!(ffi::refcount(handle), 0);
    }

    #[test]
    fn release_empties_on_last_reference() {
        let mut slot = RefSlot::from_owned(ffi::long_from_i64(3));
        slot.acquire();
        slot.release();
        assert!(!slot.is_empty());
        slot.release();
        assert!(slot.is_empty());
        // a second release is a no-op rather than a double free
        slot.release();
        assert!(!ffi::err_occurred());
    }

    #[test]
    fn clone_from_same_object_keeps_it_alive() {
        let mut slot = RefSlot::from_owned(ffi::long_from_i64(9));
        let source = slot.clone();
        slot.clone_from(&source);
        drop(source);
        assert_eq!(ffi::refcount(slot.get()), 1);
    }

    #[test]
    fn take_transfers_without_count_change() {
        let mut slot = RefSlot::from_owned(ffi::long_from_i64(1));
        let handle = slot.take();
        drop(slot);
        assert_eq!(ffi::refcount(handle), 1);
        assert!(ffi::decref(handle));
    }
}
