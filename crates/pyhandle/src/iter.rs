use std::iter::FusedIterator;

use crate::{
    exception::{PyErr, PyResult},
    ffi::{self, Handle},
    kind::AnyKind,
    nonnull::Nonnull,
    object::{Object, fetch_error},
};

/// Rust iterator over a runtime iterable.
///
/// Each item is a new reference. Errors (including failing to create the
/// iterator in the first place) are yielded once as `Err`, after which the
/// iterator is finished.
#[derive(Debug)]
pub struct Iter {
    iter: Object,
    pending: Option<PyErr>,
    done: bool,
}

impl Iter {
    pub(crate) fn new(iterable: Option<Handle>) -> Self {
        let iter = Object::<AnyKind>::from_owned_ptr(ffi::object_get_iter(iterable));
        let pending = if iter.is_nonnull() { None } else { Some(fetch_error()) };
        Self {
            iter,
            pending,
            done: false,
        }
    }
}

impl Iterator for Iter {
    type Item = PyResult<Nonnull>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.pending.take() {
            self.done = true;
            return Some(Err(err));
        }
        match Object::<AnyKind>::from_owned_ptr(ffi::iter_next(self.iter.as_ptr())).as_nonnull() {
            Ok(item) => Some(Ok(item)),
            Err(_) => {
                self.done = true;
                ffi::err_fetch().map(Err)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done || self.pending.is_some() {
            return (0, Some(usize::from(self.pending.is_some())));
        }
        // lists may grow while being iterated
        (0, None)
    }
}

impl FusedIterator for Iter {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{exception::ExcType, kind::SetKind};

    #[test]
    fn yields_every_item_once() {
        let list = Object::new_list(&[&Object::new_int(1), &Object::new_int(2), &Object::new_int(3)]);
        let values: Vec<i64> = list.iter().map(|item| item.unwrap().to_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn non_iterable_yields_error_once() {
        ffi::err_clear();
        let mut iter = Object::new_int(4).iter();
        let err = iter.next().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'int' object is not iterable");
        assert!(iter.next().is_none());
        assert!(!ffi::err_occurred());
    }

    #[test]
    fn set_resized_during_iteration() {
        let set = Object::<SetKind>::empty();
        assert_eq!(set.add(&Object::new_int(1)), 0);
        assert_eq!(set.add(&Object::new_int(2)), 0);
        let mut iter = set.iter();
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(set.add(&Object::new_int(3)), 0);
        let err = iter.next().unwrap().unwrap_err();
        assert_eq!(err.exc_type(), ExcType::RuntimeError);
        assert!(iter.next().is_none());
    }
}
