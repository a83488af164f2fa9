use smallvec::SmallVec;

use crate::heap::HeapId;

/// Immutable sequence payload. Owns one reference to each item.
#[derive(Debug, Default)]
pub(crate) struct Tuple {
    items: SmallVec<[HeapId; 4]>,
}

impl Tuple {
    /// Builds a tuple that takes over the references in `items`.
    pub(crate) fn new(items: impl IntoIterator<Item = HeapId>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub(crate) fn as_slice(&self) -> &[HeapId] {
        &self.items
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn into_items(self) -> SmallVec<[HeapId; 4]> {
        self.items
    }
}

/// Mutable sequence payload. Owns one reference to each item.
#[derive(Debug, Default)]
pub(crate) struct List {
    items: Vec<HeapId>,
}

impl List {
    pub(crate) fn as_slice(&self) -> &[HeapId] {
        &self.items
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Appends an item, taking over the caller's reference.
    pub(crate) fn push(&mut self, id: HeapId) {
        self.items.push(id);
    }

    pub(crate) fn into_items(self) -> Vec<HeapId> {
        self.items
    }
}
