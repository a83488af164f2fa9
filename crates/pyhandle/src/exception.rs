use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for runtime operations that can raise.
pub type PyResult<T> = Result<T, PyErr>;

/// Python exception classes the runtime can raise.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `TypeError` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// Raised by the ownership layer when a non-null operand was required.
    AssertionError,
    /// Subclass of LookupError, raised by `set.remove` on a missing element.
    KeyError,
    /// Allocation or memory limit exhausted.
    MemoryError,
    /// Integer result outside the runtime's `i64` domain.
    OverflowError,
    /// Container mutated while it was being iterated.
    RuntimeError,
    /// Subclass of RuntimeError, raised when a nested data walk goes too deep.
    RecursionError,
    /// Internal API misuse, e.g. a null handle passed where one was required.
    SystemError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// `TypeError` for a value that cannot be placed in a set or used as a key.
    #[must_use]
    pub(crate) fn type_error_unhashable(type_name: &str) -> PyErr {
        PyErr::new(Self::TypeError, format!("unhashable type: '{type_name}'"))
    }

    /// `TypeError` for an ordering comparison between unsupported operands.
    #[must_use]
    pub(crate) fn type_error_not_supported(symbol: &str, left: &str, right: &str) -> PyErr {
        PyErr::new(
            Self::TypeError,
            format!("'{symbol}' not supported between instances of '{left}' and '{right}'"),
        )
    }

    /// `TypeError` for a unary operation applied to an unsupported operand.
    ///
    /// `operation` is the operator as CPython spells it in the message,
    /// e.g. `unary -` or `abs()`.
    #[must_use]
    pub(crate) fn type_error_bad_operand(operation: &str, type_name: &str) -> PyErr {
        PyErr::new(Self::TypeError, format!("bad operand type for {operation}: '{type_name}'"))
    }

    /// `RecursionError` for a nested data walk past the depth limit.
    ///
    /// `context` follows CPython's wording, e.g. `" in comparison"`.
    #[must_use]
    pub(crate) fn recursion_error(context: &str) -> PyErr {
        PyErr::new(Self::RecursionError, format!("maximum recursion depth exceeded{context}"))
    }

    /// `SystemError` matching CPython's `PyErr_BadInternalCall`.
    #[must_use]
    pub(crate) fn bad_internal_call() -> PyErr {
        PyErr::new(Self::SystemError, "bad argument to internal function")
    }
}

/// An exception instance as carried by the ambient error channel.
///
/// The runtime never unwinds: operations that fail store a `PyErr` in the
/// thread's error slot and return a sentinel. `ffi::err_fetch` moves it out
/// again, which is how wrappers bridge into Rust `Result`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyErr {
    exc_type: ExcType,
    message: String,
}

impl PyErr {
    #[must_use]
    pub fn new(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this exception is an instance of `exc_type`.
    ///
    /// `RecursionError` also matches its base, `RuntimeError`.
    #[must_use]
    pub fn matches(&self, exc_type: ExcType) -> bool {
        self.exc_type == exc_type || (exc_type == ExcType::RuntimeError && self.exc_type == ExcType::RecursionError)
    }
}

impl fmt::Display for PyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exc_type, self.message)
    }
}

impl std::error::Error for PyErr {}

/// Error returned when a null wrapper is coerced to a [`Nonnull`](crate::Nonnull).
///
/// Returned directly to the caller and never stored in the ambient error
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BadNonnull;

impl fmt::Display for BadNonnull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cannot coerce a null reference to nonnull")
    }
}

impl std::error::Error for BadNonnull {}
