//! Ordered live collections the host exposes per extension kind.

use std::sync::Arc;

use parking_lot::RwLock;

/// Ordered, shared collection of installed extensions of one kind.
///
/// This is the only surface the autoload machinery touches in the host:
/// add at the front, remove by identity, replace in place, and snapshot
/// for iteration. Entries are compared by `Arc` identity, never by value.
pub struct ExtensionList<T: ?Sized> {
    items: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> ExtensionList<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }

    /// Install an entry ahead of everything already present.
    pub fn insert_front(&self, item: Arc<T>) {
        self.items.write().insert(0, item);
    }

    /// Remove the entry with the same identity, if present.
    pub fn remove(&self, item: &Arc<T>) -> bool {
        let mut items = self.items.write();
        match items.iter().position(|entry| Arc::ptr_eq(entry, item)) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Replace `current` with `next` at the same position.
    pub fn replace(&self, current: &Arc<T>, next: Arc<T>) -> bool {
        let mut items = self.items.write();
        match items.iter().position(|entry| Arc::ptr_eq(entry, current)) {
            Some(index) => {
                items[index] = next;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the current entries, front first.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl<T: ?Sized> Default for ExtensionList<T> {
    fn default() -> Self {
        Self::new()
    }
}
