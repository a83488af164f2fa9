//! Tests for the data recursion depth guard.
//!
//! hash, equality, ordering and repr walk nested containers on the native
//! stack. Past `MAX_DATA_RECURSION_DEPTH` levels the first three raise
//! `RecursionError` and repr truncates with `...`, so no structure can
//! overflow the stack.

use pretty_assertions::assert_eq;
use pyhandle::{ExcType, MAX_DATA_RECURSION_DEPTH, Object, PyErr, SetKind, ffi, heap_stats, pack};

/// A tuple nested `depth` levels around the int 0.
fn nested_tuple(depth: usize) -> Object {
    let mut t = Object::new_int(0);
    for _ in 0..depth {
        t = Object::new_tuple(&[&t]).into_any();
    }
    t
}

/// A list whose only element is itself.
fn self_containing_list() -> Object {
    let list = Object::new_list(&[]);
    assert_eq!(list.append(&list), 0);
    list.into_any()
}

// =============================================================================
// 1. Deep nesting
// =============================================================================

/// Hashing a tuple nested far past the limit raises instead of crashing.
#[test]
fn deeply_nested_tuple_hash_does_not_crash() {
    ffi::err_clear();
    let t = nested_tuple(200_000);
    assert_eq!(t.hash(), -1);
    assert_eq!(
        ffi::err_fetch(),
        Some(PyErr::new(ExcType::RecursionError, "maximum recursion depth exceeded"))
    );
}

/// Equality and ordering of two deep tuples raise `RecursionError`.
#[test]
fn deeply_nested_tuple_comparison_does_not_crash() {
    ffi::err_clear();
    let depth = usize::from(MAX_DATA_RECURSION_DEPTH) * 4;
    let a = nested_tuple(depth);
    let b = nested_tuple(depth);

    let err = a.py_eq(&b).into_result().unwrap_err();
    assert_eq!(err.to_string(), "RecursionError: maximum recursion depth exceeded in comparison");
    assert!(err.matches(ExcType::RuntimeError));

    assert!(!a.py_lt(&b).is_nonnull());
    assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::RecursionError));
}

/// repr of a deep tuple is truncated with `...`.
#[test]
fn deeply_nested_tuple_repr_is_truncated() {
    ffi::err_clear();
    let t = nested_tuple(usize::from(MAX_DATA_RECURSION_DEPTH) * 4);
    let repr = t.repr().to_str().unwrap();
    assert!(repr.starts_with("(("), "{}", &repr[..20]);
    assert!(repr.contains("..."));
    assert!(!ffi::err_occurred());
}

/// Nesting up to the limit is walked in full.
#[test]
fn nesting_at_the_limit_still_works() {
    ffi::err_clear();
    let depth = usize::from(MAX_DATA_RECURSION_DEPTH);
    let a = nested_tuple(depth);
    let b = nested_tuple(depth);
    assert_eq!(a.py_eq(&b).is_true(), 1);
    assert_eq!(a.hash(), b.hash());
    assert!(a.repr().to_str().unwrap().contains('0'));
    assert!(!ffi::err_occurred());
}

/// Packing deep tuples into a set fails cleanly and the guard resets.
#[test]
fn failed_pack_of_deep_elements_leaks_nothing() {
    ffi::err_clear();
    let baseline = heap_stats().live_objects;
    {
        let deep = nested_tuple(usize::from(MAX_DATA_RECURSION_DEPTH) + 1);
        let packed = pack!(SetKind; deep);
        assert!(!packed.is_nonnull());
        assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::RecursionError));
        assert_eq!(deep.refcount(), 1);

        let shallow = pack!(SetKind; nested_tuple(3), nested_tuple(3));
        assert_eq!(shallow.len(), 1);
    }
    assert_eq!(heap_stats().live_objects, baseline);
}

// =============================================================================
// 2. Self-referencing containers
// =============================================================================

/// Two distinct lists that each contain themselves compare without overflow.
#[test]
fn self_referencing_list_eq_does_not_crash() {
    ffi::err_clear();
    let a = self_containing_list();
    let b = self_containing_list();
    assert!(!a.py_eq(&b).is_nonnull());
    assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::RecursionError));
    assert!(!a.py_ge(&b).is_nonnull());
    assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::RecursionError));

    // identity short-circuits
    assert_eq!(a.py_eq(&a).is_true(), 1);
    assert_eq!(a.repr().to_str().unwrap(), "[[...]]");
}
