#![doc = include_str!("../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "hash folding narrows on purpose")]
#![expect(clippy::cast_sign_loss, reason = "hashes are reinterpreted as unsigned table keys")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors CPython hashing")]
// first so the take/restore macros are visible to later modules
mod heap;

mod cell;
mod exception;
pub mod ffi;
mod iter;
pub mod kind;
mod nonnull;
mod object;
mod py_hash;
mod resource;
pub mod runtime;
mod set;
mod tmpref;
pub mod tracer;
mod types;

pub use crate::{
    cell::RefSlot,
    exception::{BadNonnull, ExcType, PyErr, PyResult},
    ffi::Handle,
    heap::HeapStats,
    iter::Iter,
    kind::{
        AnyKind, AnySetKind, AsHandle, FrozenSetKind, Kind, ListKind, MutableSet, Packable, SetKind, SetLike,
        TupleKind, check, check_exact,
    },
    nonnull::Nonnull,
    object::Object,
    resource::{
        LimitedTracker, MAX_DATA_RECURSION_DEPTH, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    runtime::{RuntimeConfig, configure, heap_stats},
    set::{AnySet, FrozenSet, Set},
    tmpref::Tmpref,
    tracer::{NoopTracer, RecordingTracer, RefTracer, StderrTracer, TraceEvent},
    types::{CompareOp, Type},
};
