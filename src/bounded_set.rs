use crate::types::TurnId;
use std::collections::{HashSet, VecDeque};

/// Insertion-ordered set of turn ids with a fixed capacity; the oldest id is evicted first.
#[derive(Debug, Clone)]
pub struct BoundedIdSet {
    capacity: usize,
    order: VecDeque<TurnId>,
    members: HashSet<TurnId>,
}

impl BoundedIdSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `false` if the id was already present. Re-inserting does not refresh its age.
    pub fn insert(&mut self, id: TurnId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
                tracing::trace!(target: "bounded_set", "Evicted {} (capacity {})", evicted.short(), self.capacity);
            }
        }
        true
    }

    pub fn contains(&self, id: &TurnId) -> bool {
        self.members.contains(id)
    }

    pub fn remove(&mut self, id: &TurnId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|existing| existing != id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut set = BoundedIdSet::new(200);
        for i in 0..200 {
            assert!(set.insert(TurnId(format!("m{}", i))));
        }
        assert_eq!(set.len(), 200);

        assert!(set.insert(TurnId("m200".into())));
        assert_eq!(set.len(), 200);
        assert!(!set.contains(&TurnId("m0".into())));
        assert!(set.contains(&TurnId("m1".into())));
        assert!(set.contains(&TurnId("m200".into())));
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let mut set = BoundedIdSet::new(2);
        assert!(set.insert("a".into()));
        assert!(!set.insert("a".into()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_frees_a_slot() {
        let mut set = BoundedIdSet::new(2);
        set.insert("a".into());
        set.insert("b".into());
        assert!(set.remove(&"a".into()));
        set.insert("c".into());
        assert!(set.contains(&"b".into()));
        assert!(set.contains(&"c".into()));
    }
}
