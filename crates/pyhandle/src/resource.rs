use std::fmt;

use crate::exception::{ExcType, PyErr};

/// Error returned when a resource limit would be exceeded by an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of live allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for PyErr {
    /// Both limits surface as `MemoryError`, the same class CPython raises
    /// when an allocator refuses a request.
    fn from(err: ResourceError) -> Self {
        Self::new(ExcType::MemoryError, err.to_string())
    }
}

/// Maximum nesting depth for data walks (repr, eq, compare, hash).
///
/// Guards the native stack against structures like `t = (t,)` applied
/// thousands of times, or two lists that each contain themselves. Lower in
/// debug builds, whose frames are larger.
#[cfg(debug_assertions)]
pub const MAX_DATA_RECURSION_DEPTH: u16 = 100;

/// Maximum nesting depth for data walks (repr, eq, compare, hash).
#[cfg(not(debug_assertions))]
pub const MAX_DATA_RECURSION_DEPTH: u16 = 500;

/// Hooks the heap calls around allocation and release.
///
/// Implementations decide whether an allocation may proceed. When using
/// [`NoLimitTracker`] every check compiles away.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded.
    ///
    /// # Arguments
    /// * `get_size` - Lazily computes the approximate size in bytes of the allocation
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when an allocation is released (its refcount reached zero).
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Returns the number of live allocations tracked, if this tracker records them.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Returns the approximate number of live bytes tracked, if this tracker records them.
    fn memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Tracker that never refuses an allocation and records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}
}

/// Limits applied to a runtime's heap.
///
/// All limits are optional; `ResourceLimits::default()` imposes none.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum number of objects alive at the same time.
    pub max_allocations: Option<usize>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }
}

/// Tracker that enforces [`ResourceLimits`] on live allocations and memory.
///
/// Counts are of *live* objects: releasing an object gives its budget back.
#[derive(Debug, Clone, Default)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    allocation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            current_memory: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Replaces the limits without forgetting what is currently allocated.
    pub fn set_limits(&mut self, limits: ResourceLimits) {
        self.limits = limits;
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }

        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }

        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.allocation_count = self.allocation_count.saturating_sub(1);
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_tracker_refuses_past_allocation_limit() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(2));
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert_eq!(
            tracker.on_allocate(|| 8),
            Err(ResourceError::Allocation { limit: 2, count: 3 })
        );
        tracker.on_free(|| 8);
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert_eq!(tracker.allocation_count(), Some(2));
    }

    #[test]
    fn limited_tracker_refuses_past_memory_limit() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_memory(100));
        assert!(tracker.on_allocate(|| 60).is_ok());
        assert_eq!(
            tracker.on_allocate(|| 60),
            Err(ResourceError::Memory { limit: 100, used: 120 })
        );
        assert_eq!(tracker.memory_bytes(), Some(60));
    }

    #[test]
    fn resource_error_becomes_memory_error() {
        let err: PyErr = ResourceError::Allocation { limit: 1, count: 2 }.into();
        assert_eq!(err.exc_type(), ExcType::MemoryError);
        assert_eq!(err.to_string(), "MemoryError: allocation limit exceeded: 2 > 1");
    }

    #[test]
    fn limits_deserialize_with_missing_fields() {
        let limits: ResourceLimits = serde_json::from_str(r#"{"max_allocations": 16}"#).unwrap();
        assert_eq!(limits, ResourceLimits::new().max_allocations(16));
    }
}
