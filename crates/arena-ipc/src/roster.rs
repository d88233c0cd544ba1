//! The live list of connection identifiers.
//!
//! Only the networking side holds a [`Roster`] and mutates it, on accept
//! and on disconnect. Everyone else gets a [`RosterView`], which can read
//! but has no way to add or remove entries.

use std::sync::{Arc, PoisonError, RwLock};

/// Insertion-ordered set of ids, shared by cloning.
#[derive(Debug)]
pub struct Roster<K> {
    ids: Arc<RwLock<Vec<K>>>,
}

impl<K> Clone for Roster<K> {
    fn clone(&self) -> Self {
        Self {
            ids: Arc::clone(&self.ids),
        }
    }
}

impl<K> Default for Roster<K> {
    fn default() -> Self {
        Self {
            ids: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<K: Copy + Eq> Roster<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`. Returns `false` if it was already present.
    pub fn insert(&self, id: K) -> bool {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        if ids.contains(&id) {
            return false;
        }
        ids.push(id);
        true
    }

    /// Removes `id`. Returns `false` if it was not present.
    pub fn remove(&self, id: &K) -> bool {
        let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
        match ids.iter().position(|k| k == id) {
            Some(pos) => {
                ids.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// A read-only handle to the same roster.
    pub fn view(&self) -> RosterView<K> {
        RosterView {
            ids: Arc::clone(&self.ids),
        }
    }

    pub fn contains(&self, id: &K) -> bool {
        self.view().contains(id)
    }

    pub fn snapshot(&self) -> Vec<K> {
        self.view().snapshot()
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only access to a [`Roster`].
#[derive(Debug)]
pub struct RosterView<K> {
    ids: Arc<RwLock<Vec<K>>>,
}

impl<K> Clone for RosterView<K> {
    fn clone(&self) -> Self {
        Self {
            ids: Arc::clone(&self.ids),
        }
    }
}

impl<K: Copy + Eq> RosterView<K> {
    pub fn contains(&self, id: &K) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// The ids present right now, in join order.
    pub fn snapshot(&self) -> Vec<K> {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let roster = Roster::new();
        assert!(roster.insert(1));
        assert!(!roster.insert(1));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_remove() {
        let roster = Roster::new();
        roster.insert(1);
        roster.insert(2);
        assert!(roster.remove(&1));
        assert!(!roster.remove(&1));
        assert_eq!(roster.snapshot(), vec![2]);
    }

    #[test]
    fn test_snapshot_keeps_join_order() {
        let roster = Roster::new();
        for id in [5, 3, 9] {
            roster.insert(id);
        }
        assert_eq!(roster.snapshot(), vec![5, 3, 9]);
    }

    #[test]
    fn test_view_sees_later_changes() {
        let roster = Roster::new();
        let view = roster.view();
        assert!(view.is_empty());
        roster.insert(4);
        assert!(view.contains(&4));
        roster.clear();
        assert!(!view.contains(&4));
    }
}
