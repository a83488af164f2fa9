//! Reference-count tracing infrastructure.
//!
//! The runtime reports every refcount transition and every raised exception
//! to the installed [`RefTracer`]. All hooks default to no-ops, so
//! [`NoopTracer`] (the default) costs one virtual call per event and nothing
//! else.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`StderrTracer`] | Human-readable refcount log to stderr |
//! | [`RecordingTracer`] | Full event recording for assertions or post-mortem |
//!
//! Tracers run while the runtime is borrowed: a hook must not create, clone
//! or drop wrappers, or call into [`ffi`](crate::ffi).

use std::{cell::RefCell, rc::Rc};

use crate::{exception::PyErr, ffi::Handle, types::Type};

/// Event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A new object was allocated with a refcount of one.
    Allocate { handle: Handle, ty: Type },
    /// A strong reference was acquired; `refcount` is the count afterwards.
    Acquire { handle: Handle, refcount: usize },
    /// A strong reference was released; `refcount` is the count afterwards.
    Release { handle: Handle, refcount: usize },
    /// The refcount reached zero and the object was freed.
    Dealloc { handle: Handle, ty: Type },
    /// A release was requested through a handle whose object is already gone.
    StaleRelease { handle: Handle },
    /// An exception was stored in the ambient error channel.
    Raise { error: PyErr },
}

/// Trait for runtime refcount tracing.
///
/// All methods have default no-op implementations; implementations only
/// override the hooks they care about.
pub trait RefTracer: std::fmt::Debug {
    /// Called after an object is allocated.
    #[inline]
    fn on_allocate(&mut self, _handle: Handle, _ty: Type) {}

    /// Called after a refcount increment.
    ///
    /// # Arguments
    /// * `handle` - The object whose count changed
    /// * `refcount` - Count after the increment
    #[inline]
    fn on_acquire(&mut self, _handle: Handle, _refcount: usize) {}

    /// Called after a refcount decrement that left the object alive.
    ///
    /// # Arguments
    /// * `handle` - The object whose count changed
    /// * `refcount` - Count after the decrement (always at least one)
    #[inline]
    fn on_release(&mut self, _handle: Handle, _refcount: usize) {}

    /// Called after an object's last reference was released and it was freed.
    ///
    /// Children released as a consequence produce their own events.
    #[inline]
    fn on_dealloc(&mut self, _handle: Handle, _ty: Type) {}

    /// Called when a release targets an object that was already freed.
    #[inline]
    fn on_stale_release(&mut self, _handle: Handle) {}

    /// Called when an exception is stored in the ambient error channel.
    #[inline]
    fn on_raise(&mut self, _error: &PyErr) {}
}

// ============================================================================
// NoopTracer: default
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl RefTracer for NoopTracer {}

// ============================================================================
// StderrTracer: human-readable log
// ============================================================================

/// Tracer that prints one line per event to stderr.
///
/// Output format:
/// ```text
/// [rc] alloc    #3.0 set
/// [rc] acquire  #3.0 -> 2
/// [rc] release  #3.0 -> 1
/// [rc] dealloc  #3.0 set
/// [rc] raise    TypeError: unhashable type: 'set'
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RefTracer for StderrTracer {
    fn on_allocate(&mut self, handle: Handle, ty: Type) {
        eprintln!("[rc] alloc    {handle} {ty}");
    }

    fn on_acquire(&mut self, handle: Handle, refcount: usize) {
        eprintln!("[rc] acquire  {handle} -> {refcount}");
    }

    fn on_release(&mut self, handle: Handle, refcount: usize) {
        eprintln!("[rc] release  {handle} -> {refcount}");
    }

    fn on_dealloc(&mut self, handle: Handle, ty: Type) {
        eprintln!("[rc] dealloc  {handle} {ty}");
    }

    fn on_stale_release(&mut self, handle: Handle) {
        eprintln!("[rc] stale    {handle}");
    }

    fn on_raise(&mut self, error: &PyErr) {
        eprintln!("[rc] raise    {error}");
    }
}

// ============================================================================
// RecordingTracer: full event log
// ============================================================================

/// Tracer that records every event.
///
/// Clones share the same log, so a test can keep one clone and install the
/// other into the runtime.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    /// Removes and returns every event recorded so far.
    pub fn take_events(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Number of `Dealloc` events recorded for `handle`.
    #[must_use]
    pub fn dealloc_count(&self, handle: Handle) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| matches!(event, TraceEvent::Dealloc { handle: h, .. } if *h == handle))
            .count()
    }

    fn push(&self, event: TraceEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl RefTracer for RecordingTracer {
    fn on_allocate(&mut self, handle: Handle, ty: Type) {
        self.push(TraceEvent::Allocate { handle, ty });
    }

    fn on_acquire(&mut self, handle: Handle, refcount: usize) {
        self.push(TraceEvent::Acquire { handle, refcount });
    }

    fn on_release(&mut self, handle: Handle, refcount: usize) {
        self.push(TraceEvent::Release { handle, refcount });
    }

    fn on_dealloc(&mut self, handle: Handle, ty: Type) {
        self.push(TraceEvent::Dealloc { handle, ty });
    }

    fn on_stale_release(&mut self, handle: Handle) {
        self.push(TraceEvent::StaleRelease { handle });
    }

    fn on_raise(&mut self, error: &PyErr) {
        self.push(TraceEvent::Raise { error: error.clone() });
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{ffi, runtime};

    use super::*;

    #[test]
    fn set_tracer_returns_the_previous_tracer() {
        let previous = runtime::set_tracer(StderrTracer::new());
        assert_eq!(format!("{previous:?}"), "NoopTracer");

        let handle = ffi::set_new(None);
        let one = ffi::long_from_i64(1);
        assert_eq!(ffi::set_add(handle, one), 0);
        assert!(!ffi::decref(one));
        assert!(ffi::decref(handle));

        let stderr = runtime::set_tracer(NoopTracer);
        assert_eq!(format!("{stderr:?}"), "StderrTracer");
    }

    #[test]
    fn recording_clones_share_one_log() {
        let tracer = RecordingTracer::new();
        let mut installed = tracer.clone();
        installed.on_stale_release(ffi::none());
        assert_eq!(tracer.take_events().len(), 1);
        assert!(installed.events().is_empty());
    }
}
