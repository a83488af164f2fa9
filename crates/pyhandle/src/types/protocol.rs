//! Object protocol over heap payloads: equality, hashing, ordering, length,
//! truthiness, formatting and unary arithmetic.
//!
//! Everything here only reads the heap. Operations that produce a new object
//! return the payload (`HeapData`) and leave allocation to the runtime.

use std::{cmp::Ordering, fmt::Write};

use ahash::AHashSet;
use strum::{Display, IntoStaticStr};

use crate::{
    exception::{ExcType, PyErr, PyResult},
    heap::{Heap, HeapData, HeapId},
    py_hash::{hash_float, hash_frozenset, hash_int, hash_str, hash_tuple},
    resource::ResourceTracker,
};

const IN_COMPARISON: &str = " in comparison";

/// Rich comparison operator, in CPython's `Py_LT..Py_GE` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

impl CompareOp {
    /// Maps a total ordering onto this operator's outcome.
    #[must_use]
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering.is_lt(),
            Self::Le => ordering.is_le(),
            Self::Eq => ordering.is_eq(),
            Self::Ne => ordering.is_ne(),
            Self::Gt => ordering.is_gt(),
            Self::Ge => ordering.is_ge(),
        }
    }

    /// The operator with its operands swapped (`a < b` is `b > a`).
    #[must_use]
    pub fn reflected(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }
}

/// Unary numeric operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub(crate) enum UnaryOp {
    #[strum(serialize = "unary -")]
    Negative,
    #[strum(serialize = "unary +")]
    Positive,
    #[strum(serialize = "abs()")]
    Absolute,
    #[strum(serialize = "unary ~")]
    Invert,
}

/// A numeric payload viewed as either an exact integer or a float.
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(data: &HeapData) -> Option<Self> {
        match *data {
            HeapData::Bool(b) => Some(Self::Int(i64::from(b))),
            HeapData::Int(i) => Some(Self::Int(i)),
            HeapData::Float(f) => Some(Self::Float(f)),
            _ => None,
        }
    }

    fn partial_cmp(self, other: Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(&b)),
            (Self::Int(a), Self::Float(b)) => cmp_int_float(a, b),
            (Self::Float(a), Self::Int(b)) => cmp_int_float(b, a).map(Ordering::reverse),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(&b),
        }
    }
}

/// Orders an int against a float exactly, without rounding the int.
///
/// `None` only for NaN.
fn cmp_int_float(i: i64, f: f64) -> Option<Ordering> {
    // 2**63: every float at or above it exceeds every i64
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return None;
    }
    if f >= BOUND {
        return Some(Ordering::Less);
    }
    if f < -BOUND {
        return Some(Ordering::Greater);
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(f - whole)),
        unequal => Some(unequal),
    }
}

/// Runs one level of a nested data walk, raising `RecursionError` once the
/// heap's depth limit is reached.
fn nested<R>(heap: &Heap<impl ResourceTracker>, context: &str, walk: impl FnOnce() -> PyResult<R>) -> PyResult<R> {
    if !heap.data_depth_enter() {
        return Err(ExcType::recursion_error(context));
    }
    let result = walk();
    heap.data_depth_exit();
    result
}

/// Value equality (`a == b`), with an identity fast path.
///
/// Types without a value notion of equality compare by identity. Raises
/// `RecursionError` for containers nested past the depth limit, including
/// distinct lists that contain themselves.
pub(crate) fn py_eq(heap: &Heap<impl ResourceTracker>, a: HeapId, b: HeapId) -> PyResult<bool> {
    if a == b {
        return Ok(true);
    }
    let (left, right) = (heap.get(a), heap.get(b));
    if let (Some(x), Some(y)) = (Number::of(left), Number::of(right)) {
        return Ok(x.partial_cmp(y) == Some(Ordering::Equal));
    }
    match (left, right) {
        (HeapData::None, HeapData::None) => Ok(true),
        (HeapData::Str(x), HeapData::Str(y)) => Ok(x == y),
        (HeapData::Tuple(x), HeapData::Tuple(y)) => seq_eq(heap, x.as_slice(), y.as_slice()),
        (HeapData::List(x), HeapData::List(y)) => seq_eq(heap, x.as_slice(), y.as_slice()),
        (HeapData::Set(x) | HeapData::FrozenSet(x), HeapData::Set(y) | HeapData::FrozenSet(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            nested(heap, IN_COMPARISON, || x.is_subset(y, heap))
        }
        (HeapData::Type(x), HeapData::Type(y)) => Ok(x == y),
        _ => Ok(false),
    }
}

fn seq_eq(heap: &Heap<impl ResourceTracker>, a: &[HeapId], b: &[HeapId]) -> PyResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    nested(heap, IN_COMPARISON, || {
        for (&x, &y) in a.iter().zip(b) {
            if !py_eq(heap, x, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    })
}

/// `hash(obj)`. Raises `TypeError` for mutable containers.
pub(crate) fn py_hash(heap: &Heap<impl ResourceTracker>, id: HeapId) -> PyResult<i64> {
    match heap.get(id) {
        HeapData::None => Ok(hash_str("None")),
        HeapData::Bool(b) => Ok(i64::from(*b)),
        HeapData::Int(i) => Ok(hash_int(*i)),
        HeapData::Float(f) => Ok(hash_float(*f)),
        HeapData::Str(s) => Ok(hash_str(s)),
        HeapData::Tuple(t) => nested(heap, "", || {
            let hashes = t
                .as_slice()
                .iter()
                .map(|&item| py_hash(heap, item))
                .collect::<PyResult<Vec<_>>>()?;
            Ok(hash_tuple(hashes.into_iter()))
        }),
        HeapData::FrozenSet(s) => Ok(hash_frozenset(s.hashes())),
        HeapData::Type(t) => Ok(hash_str(t.into())),
        HeapData::Iter(_) => Ok(hash_int(id.index() as i64)),
        data @ (HeapData::List(_) | HeapData::Set(_)) => Err(ExcType::type_error_unhashable(data.py_type().into())),
    }
}

/// Rich comparison. `==`/`!=` are defined for every pair of objects; the
/// ordering operators raise `TypeError` for unsupported operand types.
pub(crate) fn py_compare(heap: &Heap<impl ResourceTracker>, a: HeapId, b: HeapId, op: CompareOp) -> PyResult<bool> {
    match op {
        CompareOp::Eq => return py_eq(heap, a, b),
        CompareOp::Ne => return py_eq(heap, a, b).map(|eq| !eq),
        _ => {}
    }

    let (left, right) = (heap.get(a), heap.get(b));
    if let (Some(x), Some(y)) = (Number::of(left), Number::of(right)) {
        // NaN is unordered: every ordering comparison is false
        return Ok(x.partial_cmp(y).is_some_and(|ord| op.matches(ord)));
    }
    match (left, right) {
        (HeapData::Str(x), HeapData::Str(y)) => Ok(op.matches(x.cmp(y))),
        (HeapData::Tuple(x), HeapData::Tuple(y)) => seq_compare(heap, x.as_slice(), y.as_slice(), op),
        (HeapData::List(x), HeapData::List(y)) => seq_compare(heap, x.as_slice(), y.as_slice(), op),
        (HeapData::Set(x) | HeapData::FrozenSet(x), HeapData::Set(y) | HeapData::FrozenSet(y)) => match op {
            CompareOp::Lt => Ok(x.len() < y.len() && x.is_subset(y, heap)?),
            CompareOp::Le => x.is_subset(y, heap),
            CompareOp::Gt | CompareOp::Ge => py_compare(heap, b, a, op.reflected()),
            CompareOp::Eq | CompareOp::Ne => unreachable!("equality handled above"),
        },
        _ => Err(ExcType::type_error_not_supported(
            op.into(),
            left.py_type().into(),
            right.py_type().into(),
        )),
    }
}

/// Lexicographic comparison: the first unequal pair decides, otherwise length.
fn seq_compare(heap: &Heap<impl ResourceTracker>, a: &[HeapId], b: &[HeapId], op: CompareOp) -> PyResult<bool> {
    nested(heap, IN_COMPARISON, || {
        for (&x, &y) in a.iter().zip(b) {
            if !py_eq(heap, x, y)? {
                return py_compare(heap, x, y, op);
            }
        }
        Ok(op.matches(a.len().cmp(&b.len())))
    })
}

/// `len(obj)`. Raises `TypeError` for unsized types.
pub(crate) fn py_len(heap: &Heap<impl ResourceTracker>, id: HeapId) -> PyResult<usize> {
    match heap.get(id) {
        HeapData::Str(s) => Ok(s.chars().count()),
        HeapData::Tuple(t) => Ok(t.len()),
        HeapData::List(l) => Ok(l.len()),
        HeapData::Set(s) | HeapData::FrozenSet(s) => Ok(s.len()),
        data => Err(PyErr::new(
            ExcType::TypeError,
            format!("object of type '{}' has no len()", data.py_type()),
        )),
    }
}

/// Python truth value testing.
pub(crate) fn py_truthy(heap: &Heap<impl ResourceTracker>, id: HeapId) -> bool {
    match heap.get(id) {
        HeapData::None => false,
        HeapData::Bool(b) => *b,
        HeapData::Int(i) => *i != 0,
        HeapData::Float(f) => *f != 0.0,
        HeapData::Str(s) => !s.is_empty(),
        HeapData::Tuple(t) => t.len() != 0,
        HeapData::List(l) => l.len() != 0,
        HeapData::Set(s) | HeapData::FrozenSet(s) => !s.is_empty(),
        HeapData::Type(_) | HeapData::Iter(_) => true,
    }
}

/// `repr(obj)`.
pub(crate) fn py_repr(heap: &Heap<impl ResourceTracker>, id: HeapId) -> String {
    let mut out = String::new();
    let mut in_progress = AHashSet::new();
    repr_into(heap, id, &mut out, &mut in_progress);
    out
}

/// `str(obj)`: the raw text for strings, `repr` for everything else.
pub(crate) fn py_str(heap: &Heap<impl ResourceTracker>, id: HeapId) -> String {
    match heap.get(id) {
        HeapData::Str(s) => s.clone(),
        _ => py_repr(heap, id),
    }
}

/// `ascii(obj)`: `repr` with every non-ASCII character escaped.
pub(crate) fn py_ascii(heap: &Heap<impl ResourceTracker>, id: HeapId) -> String {
    let repr = py_repr(heap, id);
    let mut out = String::with_capacity(repr.len());
    for c in repr.chars() {
        match u32::from(c) {
            0..=0x7f => out.push(c),
            n @ 0x80..=0xff => write!(out, "\\x{n:02x}").expect("writing to a String cannot fail"),
            n @ 0x100..=0xffff => write!(out, "\\u{n:04x}").expect("writing to a String cannot fail"),
            n => write!(out, "\\U{n:08x}").expect("writing to a String cannot fail"),
        }
    }
    out
}

/// Writes `repr(id)` into `out`.
///
/// `in_progress` holds the containers currently being formatted so a list
/// that contains itself renders as `[...]` instead of recursing forever.
/// Containers nested past the depth limit render as `...`.
fn repr_into(heap: &Heap<impl ResourceTracker>, id: HeapId, out: &mut String, in_progress: &mut AHashSet<HeapId>) {
    let data = heap.get(id);
    match data {
        HeapData::None => out.push_str("None"),
        HeapData::Bool(true) => out.push_str("True"),
        HeapData::Bool(false) => out.push_str("False"),
        HeapData::Int(i) => write!(out, "{i}").expect("writing to a String cannot fail"),
        HeapData::Float(f) => out.push_str(&float_repr(*f)),
        HeapData::Str(s) => str_repr(s, out),
        HeapData::Type(t) => write!(out, "<class '{t}'>").expect("writing to a String cannot fail"),
        HeapData::Iter(it) => {
            write!(out, "<{} object at {id}>", it.py_type()).expect("writing to a String cannot fail");
        }
        HeapData::Tuple(_) | HeapData::List(_) | HeapData::Set(_) | HeapData::FrozenSet(_) => {
            if !in_progress.insert(id) {
                out.push_str(match data {
                    HeapData::List(_) => "[...]",
                    _ => "...",
                });
                return;
            }
            if heap.data_depth_enter() {
                container_repr(heap, data, out, in_progress);
                heap.data_depth_exit();
            } else {
                out.push_str("...");
            }
            in_progress.remove(&id);
        }
    }
}

fn container_repr(
    heap: &Heap<impl ResourceTracker>,
    data: &HeapData,
    out: &mut String,
    in_progress: &mut AHashSet<HeapId>,
) {
    let mut items = |ids: &mut dyn Iterator<Item = HeapId>, out: &mut String| {
        for (i, item) in ids.enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            repr_into(heap, item, out, in_progress);
        }
    };
    match data {
        HeapData::Tuple(t) => {
            out.push('(');
            items(&mut t.as_slice().iter().copied(), out);
            if t.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        HeapData::List(l) => {
            out.push('[');
            items(&mut l.as_slice().iter().copied(), out);
            out.push(']');
        }
        HeapData::Set(s) if s.is_empty() => out.push_str("set()"),
        HeapData::FrozenSet(s) if s.is_empty() => out.push_str("frozenset()"),
        HeapData::Set(s) => {
            out.push('{');
            items(&mut s.ids(), out);
            out.push('}');
        }
        HeapData::FrozenSet(s) => {
            out.push_str("frozenset({");
            items(&mut s.ids(), out);
            out.push_str("})");
        }
        _ => unreachable!("container_repr called on a scalar"),
    }
}

/// Formats a float the way Python's `repr(float)` does for common values.
fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let text = format!("{f:?}");
    // Rust writes `1e16`, Python writes `1e+16`
    match text.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => text,
    }
}

/// Writes a Python string literal, preferring single quotes.
fn str_repr(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => write!(out, "\\x{:02x}", c as u32).expect("writing to a String cannot fail"),
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// Applies a unary numeric operation, returning the result payload.
pub(crate) fn py_unary(heap: &Heap<impl ResourceTracker>, id: HeapId, op: UnaryOp) -> PyResult<HeapData> {
    let data = heap.get(id);
    let overflow = || PyErr::new(ExcType::OverflowError, "integer result does not fit in 64 bits");
    match (Number::of(data), op) {
        (Some(Number::Int(i)), UnaryOp::Negative) => i.checked_neg().map(HeapData::Int).ok_or_else(overflow),
        (Some(Number::Int(i)), UnaryOp::Positive) => Ok(HeapData::Int(i)),
        (Some(Number::Int(i)), UnaryOp::Absolute) => i.checked_abs().map(HeapData::Int).ok_or_else(overflow),
        (Some(Number::Int(i)), UnaryOp::Invert) => Ok(HeapData::Int(!i)),
        (Some(Number::Float(f)), UnaryOp::Negative) => Ok(HeapData::Float(-f)),
        (Some(Number::Float(f)), UnaryOp::Positive) => Ok(HeapData::Float(f)),
        (Some(Number::Float(f)), UnaryOp::Absolute) => Ok(HeapData::Float(f.abs())),
        _ => Err(ExcType::type_error_bad_operand(&op.to_string(), data.py_type().into())),
    }
}
