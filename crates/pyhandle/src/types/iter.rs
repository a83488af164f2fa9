use crate::{
    exception::{ExcType, PyErr, PyResult},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::Type,
};

/// Item produced by one step of a [`SeqIter`].
#[derive(Debug)]
pub(crate) enum IterItem {
    /// An existing object; the runtime acquires a new reference for the caller.
    Borrowed(HeapId),
    /// A fresh payload the runtime must allocate (e.g. one character of a `str`).
    New(HeapData),
}

/// Iterator payload returned by `iter()` on the built-in containers.
///
/// Every variant owns a reference to its source. The set iterator also owns
/// a reference to each element in its snapshot, so elements stay alive even
/// if the set is cleared mid-iteration.
#[derive(Debug)]
pub(crate) enum SeqIter {
    Tuple {
        source: HeapId,
        index: usize,
    },
    List {
        source: HeapId,
        index: usize,
    },
    Str {
        source: HeapId,
        byte_offset: usize,
    },
    Set {
        source: HeapId,
        items: Vec<HeapId>,
        index: usize,
        expected_len: usize,
    },
}

impl SeqIter {
    pub(crate) fn py_type(&self) -> Type {
        match self {
            Self::Tuple { .. } => Type::TupleIterator,
            Self::List { .. } => Type::ListIterator,
            Self::Str { .. } => Type::StrIterator,
            Self::Set { .. } => Type::SetIterator,
        }
    }

    /// References owned by this iterator, released when it is freed.
    pub(crate) fn child_ids(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Tuple { source, .. } | Self::List { source, .. } | Self::Str { source, .. } => out.push(*source),
            Self::Set { source, items, .. } => {
                out.push(*source);
                out.extend_from_slice(items);
            }
        }
    }

    /// Advances the iterator. `Ok(None)` signals exhaustion.
    ///
    /// Lists are read live, so items appended during iteration are yielded.
    /// Sets raise `RuntimeError` once their size differs from the snapshot.
    pub(crate) fn next(&mut self, heap: &Heap<impl ResourceTracker>) -> PyResult<Option<IterItem>> {
        match self {
            Self::Tuple { source, index } => {
                let HeapData::Tuple(tuple) = heap.get(*source) else {
                    return Ok(None);
                };
                Ok(step(tuple.as_slice(), index))
            }
            Self::List { source, index } => {
                let HeapData::List(list) = heap.get(*source) else {
                    return Ok(None);
                };
                Ok(step(list.as_slice(), index))
            }
            Self::Str { source, byte_offset } => {
                let HeapData::Str(s) = heap.get(*source) else {
                    return Ok(None);
                };
                let Some(c) = s[*byte_offset..].chars().next() else {
                    return Ok(None);
                };
                *byte_offset += c.len_utf8();
                Ok(Some(IterItem::New(HeapData::Str(c.to_string()))))
            }
            Self::Set {
                source,
                items,
                index,
                expected_len,
            } => {
                if let HeapData::Set(storage) | HeapData::FrozenSet(storage) = heap.get(*source)
                    && storage.len() != *expected_len
                {
                    return Err(PyErr::new(ExcType::RuntimeError, "Set changed size during iteration"));
                }
                Ok(step(items, index))
            }
        }
    }

    /// Number of items left, as reported by `__length_hint__`.
    pub(crate) fn length_hint(&self, heap: &Heap<impl ResourceTracker>) -> usize {
        match self {
            Self::Tuple { source, index } | Self::List { source, index } => match heap.get(*source) {
                HeapData::Tuple(t) => t.len().saturating_sub(*index),
                HeapData::List(l) => l.len().saturating_sub(*index),
                _ => 0,
            },
            Self::Str { source, byte_offset } => match heap.get(*source) {
                HeapData::Str(s) => s[*byte_offset..].chars().count(),
                _ => 0,
            },
            Self::Set {
                source,
                items,
                index,
                expected_len,
            } => match heap.get(*source) {
                HeapData::Set(s) | HeapData::FrozenSet(s) if s.len() == *expected_len => items.len() - *index,
                _ => 0,
            },
        }
    }
}

fn step(items: &[HeapId], index: &mut usize) -> Option<IterItem> {
    let id = *items.get(*index)?;
    *index += 1;
    Some(IterItem::Borrowed(id))
}
