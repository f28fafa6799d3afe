use indexmap::IndexMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// Insertion ordered map with a fixed capacity.
///
/// When a `put` of a new key grows the map past capacity the earliest
/// inserted surviving entry is dropped. Reads never change the order.
#[derive(Debug, Clone)]
pub struct BoundedOrderedMap<K, V> {
    capacity: usize,
    entries: IndexMap<K, V>,
}

impl<K, V> BoundedOrderedMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or update. An existing key keeps its position.
    ///
    /// Returns the evicted entries, oldest first.
    pub fn put(&mut self, key: K, value: V) -> Vec<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return Vec::new();
        }
        self.entries.insert(key, value);

        let overflow = self.entries.len().saturating_sub(self.capacity);
        self.entries.drain(..overflow).collect()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Remove `key`, keeping the order of the remaining entries.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(map: &BoundedOrderedMap<&'static str, u32>) -> Vec<&'static str> {
        map.keys().cloned().collect()
    }

    #[test]
    fn test_fifo_eviction() {
        let mut map = BoundedOrderedMap::new(2);
        map.put("A", 1);
        map.put("B", 2);
        let evicted = map.put("C", 3);
        assert_eq!(evicted, vec![("A", 1)]);
        assert_eq!(keys(&map), vec!["B", "C"]);
        assert_eq!(map.get(&"A"), None);
        assert_eq!(map.get(&"C"), Some(&3));
    }

    #[test]
    fn test_reads_do_not_reorder() {
        let mut map = BoundedOrderedMap::new(2);
        map.put("A", 1);
        map.put("B", 2);
        assert_eq!(map.get(&"A"), Some(&1));
        map.put("C", 3);
        assert_eq!(keys(&map), vec!["B", "C"]);
    }

    #[test]
    fn test_update_keeps_position() {
        let mut map = BoundedOrderedMap::new(3);
        map.put("A", 1);
        map.put("B", 2);
        assert!(map.put("A", 10).is_empty());
        assert_eq!(keys(&map), vec!["A", "B"]);
        map.put("C", 3);
        map.put("D", 4);
        assert_eq!(keys(&map), vec!["B", "C", "D"]);
        let values: Vec<u32> = map.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[test]
    fn test_eviction_after_remove() {
        let mut map = BoundedOrderedMap::new(2);
        map.put("A", 1);
        map.put("B", 2);
        map.remove(&"A");
        assert!(map.put("C", 3).is_empty());
        assert_eq!(map.put("D", 4), vec![("B", 2)]);
        assert_eq!(keys(&map), vec!["C", "D"]);
    }

    #[test]
    fn test_remove() {
        let mut map = BoundedOrderedMap::new(0);
        assert_eq!(map.capacity(), 1);
        map.put("A", 1);
        assert_eq!(map.remove(&"A"), Some(1));
        assert_eq!(map.remove(&"A"), None);
        assert!(map.is_empty());
        assert!(!map.contains_key(&"A"));
    }
}
