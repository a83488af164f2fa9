use hashbrown::HashTable;

use super::protocol::py_eq;
use crate::{
    exception::PyResult,
    heap::{Heap, HeapId},
    resource::ResourceTracker,
};

/// Entry in the set storage, containing an element and its cached hash.
#[derive(Debug)]
struct SetEntry {
    id: HeapId,
    hash: i64,
}

/// Storage shared by `set` and `frozenset` payloads.
///
/// Uses a `HashTable<usize>` for O(1) lookups combined with a dense
/// `Vec<SetEntry>` that keeps insertion order. The table maps element hashes
/// to indices in the entries vector. Each stored element owns one reference.
#[derive(Debug, Default)]
pub(crate) struct SetStorage {
    indices: HashTable<usize>,
    entries: Vec<SetEntry>,
}

impl SetStorage {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            indices: HashTable::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Element ids in insertion order.
    pub(crate) fn ids(&self) -> impl ExactSizeIterator<Item = HeapId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    /// Cached element hashes in insertion order.
    pub(crate) fn hashes(&self) -> impl ExactSizeIterator<Item = i64> + '_ {
        self.entries.iter().map(|e| e.hash)
    }

    /// Position in `entries` of the element equal to `id`.
    ///
    /// The first equality failure ends the probe and is returned.
    fn find_index(&self, id: HeapId, hash: i64, heap: &Heap<impl ResourceTracker>) -> PyResult<Option<usize>> {
        let mut failure = None;
        let found = self
            .indices
            .find(hash as u64, |&idx| {
                if failure.is_some() {
                    return false;
                }
                py_eq(heap, self.entries[idx].id, id).unwrap_or_else(|err| {
                    failure = Some(err);
                    false
                })
            })
            .copied();
        failure.map_or(Ok(found), Err)
    }

    /// Returns true if an element equal to `id` is stored.
    pub(crate) fn contains(&self, id: HeapId, hash: i64, heap: &Heap<impl ResourceTracker>) -> PyResult<bool> {
        Ok(self.find_index(id, hash, heap)?.is_some())
    }

    /// Inserts an element, taking over the caller's reference.
    ///
    /// Returns `false` without storing anything when an equal element is
    /// already present; the caller still owns `id` and must release it. On
    /// error nothing is stored either.
    pub(crate) fn insert(&mut self, id: HeapId, hash: i64, heap: &Heap<impl ResourceTracker>) -> PyResult<bool> {
        if self.contains(id, hash, heap)? {
            return Ok(false);
        }
        let index = self.entries.len();
        self.entries.push(SetEntry { id, hash });
        self.indices
            .insert_unique(hash as u64, index, |&idx| self.entries[idx].hash as u64);
        Ok(true)
    }

    /// Removes the element equal to `id`, handing its reference to the caller.
    pub(crate) fn remove(
        &mut self,
        id: HeapId,
        hash: i64,
        heap: &Heap<impl ResourceTracker>,
    ) -> PyResult<Option<HeapId>> {
        let Some(index) = self.find_index(id, hash, heap)? else {
            return Ok(None);
        };
        if let Ok(occ) = self.indices.find_entry(hash as u64, |&idx| idx == index) {
            occ.remove();
        }
        let removed = self.entries.remove(index);

        // Update indices for entries that shifted down
        for idx in &mut self.indices {
            if *idx > index {
                *idx -= 1;
            }
        }
        Ok(Some(removed.id))
    }

    /// Removes the most recently inserted element, handing its reference to the caller.
    pub(crate) fn pop(&mut self) -> Option<HeapId> {
        let entry = self.entries.pop()?;
        let index = self.entries.len();
        if let Ok(occ) = self.indices.find_entry(entry.hash as u64, |&idx| idx == index) {
            occ.remove();
        }
        Some(entry.id)
    }

    /// Empties the storage, handing every element reference to the caller.
    pub(crate) fn drain(&mut self) -> Vec<HeapId> {
        self.indices.clear();
        self.entries.drain(..).map(|e| e.id).collect()
    }

    /// Returns true if every element of `self` is also in `other`.
    pub(crate) fn is_subset(&self, other: &Self, heap: &Heap<impl ResourceTracker>) -> PyResult<bool> {
        if self.len() > other.len() {
            return Ok(false);
        }
        for entry in &self.entries {
            if !other.contains(entry.id, entry.hash, heap)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn into_ids(self) -> impl Iterator<Item = HeapId> {
        self.entries.into_iter().map(|e| e.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{heap::HeapData, py_hash::hash_int, resource::NoLimitTracker};

    fn int(heap: &mut Heap<NoLimitTracker>, value: i64) -> HeapId {
        heap.allocate(HeapData::Int(value)).unwrap()
    }

    #[test]
    fn insert_rejects_equal_elements() {
        let mut heap = Heap::new(NoLimitTracker);
        let a = int(&mut heap, 7);
        let b = int(&mut heap, 7);
        let mut storage = SetStorage::default();
        assert!(storage.insert(a, hash_int(7), &heap).unwrap());
        assert!(!storage.insert(b, hash_int(7), &heap).unwrap());
        assert_eq!(storage.len(), 1);
        assert!(storage.contains(b, hash_int(7), &heap).unwrap());
    }

    #[test]
    fn remove_keeps_indices_consistent() {
        let mut heap = Heap::new(NoLimitTracker);
        let ids: Vec<HeapId> = (0..5).map(|i| int(&mut heap, i)).collect();
        let mut storage = SetStorage::default();
        for (i, &id) in ids.iter().enumerate() {
            assert!(storage.insert(id, hash_int(i as i64), &heap).unwrap());
        }
        assert_eq!(storage.remove(ids[1], hash_int(1), &heap), Ok(Some(ids[1])));
        assert_eq!(storage.remove(ids[1], hash_int(1), &heap), Ok(None));
        for (i, &id) in ids.iter().enumerate().skip(2) {
            assert!(storage.contains(id, hash_int(i as i64), &heap).unwrap());
        }
        assert_eq!(storage.pop(), Some(ids[4]));
        assert!(!storage.contains(ids[4], hash_int(4), &heap).unwrap());
        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn subset_compares_by_value() {
        let mut heap = Heap::new(NoLimitTracker);
        let mut small = SetStorage::default();
        let mut large = SetStorage::default();
        for i in 0..2 {
            let id = int(&mut heap, i);
            assert!(small.insert(id, hash_int(i), &heap).unwrap());
        }
        for i in 0..3 {
            let id = int(&mut heap, i);
            assert!(large.insert(id, hash_int(i), &heap).unwrap());
        }
        assert!(small.is_subset(&large, &heap).unwrap());
        assert!(!large.is_subset(&small, &heap).unwrap());
    }
}
