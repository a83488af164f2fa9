//! Kind markers: the static type a wrapper promises its object has.
//!
//! `Object<SetKind>` can only hold a `set`; `Object<AnyKind>` holds anything.
//! The check runs once, when a handle enters a wrapper. Capabilities such as
//! [`SetLike`] gate which operations a wrapper exposes.

use crate::{
    exception::{ExcType, PyErr},
    ffi::{self, Handle},
    types::Type,
};

/// Anything that can lend out a (possibly null) handle without giving up its
/// reference.
pub trait AsHandle {
    fn as_handle(&self) -> Option<Handle>;
}

impl AsHandle for Handle {
    fn as_handle(&self) -> Option<Handle> {
        Some(*self)
    }
}

impl AsHandle for Option<Handle> {
    fn as_handle(&self) -> Option<Handle> {
        *self
    }
}

impl<T: AsHandle + ?Sized> AsHandle for &T {
    fn as_handle(&self) -> Option<Handle> {
        (**self).as_handle()
    }
}

/// Static description of which runtime types a wrapper accepts.
pub trait Kind: 'static {
    /// Name used in error messages, e.g. `cannot make set from list`.
    const NAME: &'static str;

    /// Returns true if an object of type `ty` may be held.
    fn accepts(ty: Type) -> bool;

    /// Returns true if `ty` is exactly this kind's type. The runtime has no
    /// subclassing, so this defaults to [`accepts`](Self::accepts).
    fn exact(ty: Type) -> bool {
        Self::accepts(ty)
    }

    /// The type whose type object represents this kind, if there is one.
    fn py_type() -> Option<Type> {
        None
    }

    /// New reference to this kind's type object, or `None` for abstract kinds.
    #[must_use]
    fn type_object() -> Option<Handle> {
        Self::py_type().map(ffi::type_object)
    }

    /// Length of `ob`, -1 with an exception pending on failure.
    fn length(ob: Option<Handle>) -> isize {
        ffi::object_length(ob)
    }

    /// Length of an object known to be non-null.
    fn length_unchecked(ob: Handle) -> isize {
        Self::length(Some(ob))
    }
}

/// Sets whose size can be read directly.
pub trait SetLike: Kind {}

/// Sets that can be mutated in place. Only `set` qualifies.
pub trait MutableSet: SetLike {}

/// Sets that can be built from a list of elements.
pub trait Packable: SetLike {
    /// Builds a new set of this kind from `iterable` (empty for null).
    fn new_from(iterable: Option<Handle>) -> Option<Handle>;
}

/// Any object at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyKind;

impl Kind for AnyKind {
    const NAME: &'static str = "object";

    fn accepts(_ty: Type) -> bool {
        true
    }
}

/// Exactly `set`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetKind;

impl Kind for SetKind {
    const NAME: &'static str = "set";

    fn accepts(ty: Type) -> bool {
        ty == Type::Set
    }

    fn py_type() -> Option<Type> {
        Some(Type::Set)
    }

    fn length(ob: Option<Handle>) -> isize {
        ffi::set_get_size(ob)
    }

    fn length_unchecked(ob: Handle) -> isize {
        ffi::set_get_size_unchecked(ob)
    }
}

impl SetLike for SetKind {}
impl MutableSet for SetKind {}

impl Packable for SetKind {
    fn new_from(iterable: Option<Handle>) -> Option<Handle> {
        ffi::set_new(iterable)
    }
}

/// Exactly `frozenset`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrozenSetKind;

impl Kind for FrozenSetKind {
    const NAME: &'static str = "frozenset";

    fn accepts(ty: Type) -> bool {
        ty == Type::FrozenSet
    }

    fn py_type() -> Option<Type> {
        Some(Type::FrozenSet)
    }

    fn length(ob: Option<Handle>) -> isize {
        ffi::set_get_size(ob)
    }

    fn length_unchecked(ob: Handle) -> isize {
        ffi::set_get_size_unchecked(ob)
    }
}

impl SetLike for FrozenSetKind {}

impl Packable for FrozenSetKind {
    fn new_from(iterable: Option<Handle>) -> Option<Handle> {
        ffi::frozenset_new(iterable)
    }
}

/// Either `set` or `frozenset`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySetKind;

impl Kind for AnySetKind {
    const NAME: &'static str = "anyset";

    fn accepts(ty: Type) -> bool {
        ty.is_any_set()
    }

    fn length(ob: Option<Handle>) -> isize {
        ffi::set_get_size(ob)
    }

    fn length_unchecked(ob: Handle) -> isize {
        ffi::set_get_size_unchecked(ob)
    }
}

impl SetLike for AnySetKind {}

/// Exactly `list`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListKind;

impl Kind for ListKind {
    const NAME: &'static str = "list";

    fn accepts(ty: Type) -> bool {
        ty == Type::List
    }

    fn py_type() -> Option<Type> {
        Some(Type::List)
    }
}

/// Exactly `tuple`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TupleKind;

impl Kind for TupleKind {
    const NAME: &'static str = "tuple";

    fn accepts(ty: Type) -> bool {
        ty == Type::Tuple
    }

    fn py_type() -> Option<Type> {
        Some(Type::Tuple)
    }
}

/// Raises `AssertionError: failed null check` unless an exception is
/// already pending, and returns -1.
pub(crate) fn failed_null_check() -> i32 {
    ffi::err_set_unless_pending(PyErr::new(ExcType::AssertionError, "failed null check"));
    -1
}

fn check_with(ob: &impl AsHandle, test: impl FnOnce(Type) -> bool) -> i32 {
    let Some(handle) = ob.as_handle() else {
        return failed_null_check();
    };
    match ffi::type_tag(Some(handle)) {
        Some(ty) => i32::from(test(ty)),
        None => {
            ffi::err_set_unless_pending(ExcType::bad_internal_call());
            -1
        }
    }
}

/// 1 if `ob` holds an object `K` accepts, 0 if not, -1 for null.
pub fn check<K: Kind>(ob: &impl AsHandle) -> i32 {
    check_with(ob, K::accepts)
}

/// 1 if `ob` is exactly of `K`'s type, 0 if not, -1 for null.
pub fn check_exact<K: Kind>(ob: &impl AsHandle) -> i32 {
    check_with(ob, K::exact)
}
