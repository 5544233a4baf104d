use std::{collections::HashMap, hash::Hash};

///
/// BiMapConflict
///
/// The binding that blocked an insert. Either the key is already bound to a
/// different value, or the value is already bound to a different key.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BiMapConflict<K, V> {
    Key { key: K, existing: V },
    Value { key: K, value: V, existing: K },
}

///
/// BiMap
///
/// Bijective map: a forward `K -> V` map and a reverse `V -> K` map kept in
/// lockstep behind one type. An insert that would break the bijection is
/// rejected with the blocking binding, leaving the map unchanged.
///

#[derive(Clone, Debug, Default)]
pub struct BiMap<K, V> {
    forward: HashMap<K, V>,
    reverse: HashMap<V, K>,
}

impl<K, V> BiMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + Eq + Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.forward.get(key)
    }

    #[must_use]
    pub fn get_by_value(&self, value: &V) -> Option<&K> {
        self.reverse.get(value)
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.forward.contains_key(key)
    }

    /// Insert a binding, rejecting any key or value already bound elsewhere.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), BiMapConflict<K, V>> {
        if let Some(existing) = self.forward.get(&key) {
            if *existing == value {
                // Re-inserting the exact binding is a no-op.
                return Ok(());
            }
            return Err(BiMapConflict::Key {
                key,
                existing: existing.clone(),
            });
        }

        if let Some(existing) = self.reverse.get(&value) {
            return Err(BiMapConflict::Value {
                key,
                value,
                existing: existing.clone(),
            });
        }

        self.forward.insert(key.clone(), value.clone());
        self.reverse.insert(value, key);

        Ok(())
    }

    /// Remove the binding for `key`, returning the value it was bound to.
    pub fn remove_by_key(&mut self, key: &K) -> Option<V> {
        let value = self.forward.remove(key)?;
        self.reverse.remove(&value);

        Some(value)
    }

    /// Remove the binding for `value`, returning the key it was bound to.
    pub fn remove_by_value(&mut self, value: &V) -> Option<K> {
        let key = self.reverse.remove(value)?;
        self.forward.remove(&key);

        Some(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.forward.iter()
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_both_directions() {
        let mut map = BiMap::new();
        map.insert("alice", 1u64).unwrap();
        map.insert("bob", 2u64).unwrap();

        assert_eq!(map.get(&"alice"), Some(&1));
        assert_eq!(map.get_by_value(&2), Some(&"bob"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn key_conflict_reports_blocking_value() {
        let mut map = BiMap::new();
        map.insert("alice", 1u64).unwrap();

        let err = map.insert("alice", 2).unwrap_err();
        assert_eq!(
            err,
            BiMapConflict::Key {
                key: "alice",
                existing: 1
            }
        );
        // Map unchanged.
        assert_eq!(map.get(&"alice"), Some(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn value_conflict_reports_blocking_key() {
        let mut map = BiMap::new();
        map.insert("alice", 1u64).unwrap();

        let err = map.insert("bob", 1).unwrap_err();
        assert_eq!(
            err,
            BiMapConflict::Value {
                key: "bob",
                value: 1,
                existing: "alice"
            }
        );
        assert!(!map.contains_key(&"bob"));
    }

    #[test]
    fn reinserting_same_binding_is_noop() {
        let mut map = BiMap::new();
        map.insert("alice", 1u64).unwrap();
        map.insert("alice", 1).unwrap();

        assert_eq!(map.len(), 1);
    }

    #[test]
    fn removal_clears_both_directions() {
        let mut map = BiMap::new();
        map.insert("alice", 1u64).unwrap();

        assert_eq!(map.remove_by_key(&"alice"), Some(1));
        assert_eq!(map.get_by_value(&1), None);
        assert!(map.is_empty());

        map.insert("bob", 2).unwrap();
        assert_eq!(map.remove_by_value(&2), Some("bob"));
        assert!(map.is_empty());
    }
}
