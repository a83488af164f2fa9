//! Tests for runtime configuration: resource limits, tracers and heap stats.
//!
//! Each `#[test]` runs on its own thread and therefore gets a fresh runtime,
//! so configuration never leaks between tests.

use pretty_assertions::assert_eq;
use pyhandle::{
    AnyKind, ExcType, FrozenSetKind, NoopTracer, Object, RecordingTracer, ResourceLimits, RuntimeConfig, SetKind,
    TraceEvent, Type, configure, ffi, heap_stats, pack, runtime,
};

// =============================================================================
// 1. Resource limits
// =============================================================================

/// An allocation refused mid-pack yields an empty `Tmpref` with `MemoryError`
/// pending and leaves every element's count as it was.
#[test]
fn allocation_limit_during_pack() {
    ffi::err_clear();
    let v: Vec<Object> = (0..3).map(Object::new_int).collect();
    let used = heap_stats().tracker_allocations.unwrap();
    // room for the intermediate tuple only
    runtime::set_limits(ResourceLimits::new().max_allocations(used + 1));

    let packed = pack!(SetKind; v[0], v[1], v[2]);
    assert!(!packed.is_nonnull());
    let err = ffi::err_fetch().unwrap();
    assert_eq!(err.exc_type(), ExcType::MemoryError);
    for ob in &v {
        assert_eq!(ob.refcount(), 1);
    }
    assert_eq!(heap_stats().tracker_allocations, Some(used));

    runtime::set_limits(ResourceLimits::default());
    let packed = pack!(SetKind; v[0], v[1], v[2]);
    assert_eq!(packed.len(), 3);
}

/// Singletons never count against the allocation limit.
#[test]
fn singletons_ignore_limits() {
    ffi::err_clear();
    let used = heap_stats().tracker_allocations.unwrap();
    configure(RuntimeConfig::new().limits(ResourceLimits::new().max_allocations(used)));
    let none = Object::none();
    let yes = Object::new_bool(true);
    assert!(none.is_nonnull());
    assert!(yes.is_nonnull());
    assert!(!Object::new_int(1).is_nonnull());
    assert_eq!(ffi::err_fetch().map(|e| e.exc_type()), Some(ExcType::MemoryError));
}

/// A memory limit refuses large payloads.
#[test]
fn memory_limit_refuses_large_strings() {
    ffi::err_clear();
    let used = heap_stats().tracker_memory_bytes.unwrap();
    runtime::set_limits(ResourceLimits::new().max_memory(used + 4096));
    assert!(Object::new_str("small").is_nonnull());
    assert!(!Object::new_str(&"x".repeat(8192)).is_nonnull());
    let err = ffi::err_fetch().unwrap();
    assert_eq!(err.exc_type(), ExcType::MemoryError);
    assert!(err.to_string().starts_with("MemoryError: memory limit exceeded"), "{err}");
}

/// `ResourceLimits` round-trips through serde with defaults for missing keys.
#[test]
fn resource_limits_deserialize_with_defaults() {
    let limits: ResourceLimits = serde_json::from_str(r#"{"max_allocations": 10}"#).unwrap();
    assert_eq!(limits, ResourceLimits::new().max_allocations(10));
    let limits: ResourceLimits = serde_json::from_str("{}").unwrap();
    assert_eq!(limits, ResourceLimits::default());
}

// =============================================================================
// 2. Tracers
// =============================================================================

/// Clone and drop produce acquire / release / dealloc events in order.
#[test]
fn recording_tracer_sees_refcount_transitions() {
    let tracer = RecordingTracer::new();
    runtime::set_tracer(tracer.clone());

    let ob = Object::new_int(7);
    let handle = ob.as_ptr().unwrap();
    let copy = ob.clone();
    drop(copy);
    drop(ob);

    runtime::set_tracer(NoopTracer);
    assert_eq!(
        tracer.take_events(),
        vec![
            TraceEvent::Allocate { handle, ty: Type::Int },
            TraceEvent::Acquire { handle, refcount: 2 },
            TraceEvent::Release { handle, refcount: 1 },
            TraceEvent::Dealloc { handle, ty: Type::Int },
        ]
    );
}

/// Freeing a container releases its elements exactly once.
#[test]
fn container_dealloc_releases_children_once() {
    let tracer = RecordingTracer::new();
    configure(RuntimeConfig::new().tracer(tracer.clone()));

    let element = Object::new_str("child");
    let element_handle = element.as_ptr().unwrap();
    let set = pack!(FrozenSetKind; element).into_object();
    let set_handle = set.as_ptr().unwrap();
    drop(element);
    drop(set);

    assert_eq!(tracer.dealloc_count(set_handle), 1);
    assert_eq!(tracer.dealloc_count(element_handle), 1);
    let events = tracer.events();
    let set_freed = events
        .iter()
        .position(|e| matches!(e, TraceEvent::Dealloc { handle, .. } if *handle == set_handle))
        .unwrap();
    let element_freed = events
        .iter()
        .position(|e| matches!(e, TraceEvent::Dealloc { handle, .. } if *handle == element_handle))
        .unwrap();
    assert!(set_freed < element_freed);
}

/// Raised exceptions and stale releases are reported.
#[test]
fn tracer_sees_raises_and_stale_releases() {
    ffi::err_clear();
    let tracer = RecordingTracer::new();
    runtime::set_tracer(tracer.clone());

    let stale = ffi::long_from_i64(1);
    assert!(ffi::decref(stale));
    tracer.take_events();

    assert!(ffi::decref(stale));
    let events = tracer.take_events();
    assert!(matches!(events.first(), Some(TraceEvent::StaleRelease { handle }) if Some(*handle) == stale));
    assert!(matches!(events.get(1), Some(TraceEvent::Raise { error }) if error.exc_type() == ExcType::SystemError));
    ffi::err_clear();

    let _ = Object::<SetKind>::from_object(&Object::new_int(3));
    let raised: Vec<_> = tracer
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            TraceEvent::Raise { error } => Some(error.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(raised, vec!["TypeError: cannot make set from int".to_owned()]);
    ffi::err_clear();
}

// =============================================================================
// 3. Heap stats
// =============================================================================

/// Stats count live objects per type and return to baseline afterwards.
#[test]
fn heap_stats_track_live_objects_by_type() {
    let baseline = heap_stats();
    {
        let set = Object::<SetKind>::empty();
        assert_eq!(set.add(&Object::new_int(1)), 0);
        assert_eq!(set.add(&Object::new_int(2)), 0);
        let _list = Object::new_list(&[&set]);

        let stats = heap_stats();
        assert_eq!(stats.count_of(Type::Set), baseline.count_of(Type::Set) + 1);
        assert_eq!(stats.count_of(Type::Int), baseline.count_of(Type::Int) + 2);
        assert_eq!(stats.count_of(Type::List), baseline.count_of(Type::List) + 1);
        assert_eq!(stats.live_objects, baseline.live_objects + 4);
    }
    let after = heap_stats();
    assert_eq!(after.live_objects, baseline.live_objects);
    assert_eq!(after.tracker_allocations, baseline.tracker_allocations);
    assert!(after.free_slots >= 4);
}

/// Wrappers dropped after a failed operation leave nothing behind.
#[test]
fn failed_operations_do_not_leak() {
    ffi::err_clear();
    let baseline = heap_stats().live_objects;
    {
        let list = Object::new_list(&[&Object::new_int(1)]);
        let _ = Object::<AnyKind>::from_object(&list).cast::<FrozenSetKind>();
        let _ = list.py_lt(&Object::new_int(2));
        let _ = list.hash();
        let _ = list.iter().count();
        ffi::err_clear();
    }
    assert_eq!(heap_stats().live_objects, baseline);
}
