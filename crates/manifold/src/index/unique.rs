use crate::{
    index::{ApplyChanges, CacheIndex, IndexError, apply_batch},
    obs::sink::{self, MetricsEvent},
    store::SharedStore,
    types::{
        Change, Id, Keyed,
        collection::{BiMap, BiMapConflict},
    },
};
use std::{collections::HashMap, fmt::Debug, hash::Hash, rc::Rc};

///
/// UniqueRead
///
/// Query surface shared by both unique-mapping implementations.
///

pub trait UniqueRead<K, R: Keyed> {
    /// Resolve the record mapped under `key` through the backing store.
    fn get(&self, key: &K) -> Option<Rc<R>>;

    fn id_for(&self, key: &K) -> Option<Id<R>>;

    fn len(&self) -> usize;

    fn contains_key(&self, key: &K) -> bool {
        self.id_for(key).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

///
/// UniqueIndex
///
/// The default unique mapping: a true bidirectional key<->identity map.
/// Duplicate keys are detected immediately at insert, reporting the record
/// that blocked the add; update goes through remove-then-add. A partial key
/// function yields the optional unique mapping.
///

pub struct UniqueIndex<K, R: Keyed> {
    key_fn: Box<dyn Fn(&R) -> Option<K>>,
    map: BiMap<K, Id<R>>,
    store: SharedStore<R>,
}

impl<K, R> UniqueIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    pub(crate) fn new(store: SharedStore<R>, key_fn: impl Fn(&R) -> Option<K> + 'static) -> Self {
        Self {
            key_fn: Box::new(key_fn),
            map: BiMap::new(),
            store,
        }
    }
}

impl<K, R> CacheIndex<R> for UniqueIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let Some(key) = (self.key_fn)(record) else {
            return Ok(());
        };

        self.map.insert(key, record.id()).map_err(|conflict| {
            sink::record(MetricsEvent::UniqueViolation);
            match conflict {
                BiMapConflict::Key { key, existing } => IndexError::DuplicateKey {
                    key: format!("{key:?}"),
                    existing: existing.value(),
                },
                // The same identity bound under a second key means the key
                // function is not stable for this record.
                BiMapConflict::Value {
                    key,
                    value,
                    existing,
                } => IndexError::UnstableKey {
                    id: value.value(),
                    key: format!("{key:?}"),
                    existing: format!("{existing:?}"),
                },
            }
        })
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let Some(key) = (self.key_fn)(record) else {
            return Ok(());
        };

        match self.map.remove_by_key(&key) {
            Some(bound) if bound == record.id() => Ok(()),
            Some(bound) => {
                // Entry under this key belongs to a different record; put it
                // back and report the inconsistency.
                let _ = self.map.insert(key.clone(), bound);
                Err(IndexError::StalePrevious {
                    key: format!("{key:?}"),
                    expected: Some(record.id().value()),
                    found: Some(bound.value()),
                })
            }
            None => Err(IndexError::MissingEntry {
                id: record.id().value(),
            }),
        }
    }
}

impl<K, R> ApplyChanges<R> for UniqueIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

impl<K, R> UniqueRead<K, R> for UniqueIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn get(&self, key: &K) -> Option<Rc<R>> {
        let id = *self.map.get(key)?;
        self.store.borrow().get(id)
    }

    fn id_for(&self, key: &K) -> Option<Id<R>> {
        self.map.get(key).copied()
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

///
/// FastUniqueIndex
///
/// Forward-map-only unique mapping. A key-preserving update is a single
/// overwrite instead of remove-then-add, which trades immediate duplicate
/// detection for raw update throughput; the expected-previous invariant is
/// checked after the fact, with full rollback when it fails. Intended for
/// workloads where updates vastly outnumber adds and removes.
///

pub struct FastUniqueIndex<K, R: Keyed> {
    key_fn: Box<dyn Fn(&R) -> Option<K>>,
    map: HashMap<K, Id<R>>,
    store: SharedStore<R>,
}

impl<K, R> FastUniqueIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    pub(crate) fn new(store: SharedStore<R>, key_fn: impl Fn(&R) -> Option<K> + 'static) -> Self {
        Self {
            key_fn: Box::new(key_fn),
            map: HashMap::new(),
            store,
        }
    }

    fn run(
        &mut self,
        changes: &[Change<R>],
        undo: &mut Vec<(K, Option<Id<R>>)>,
    ) -> Result<(), IndexError> {
        // Derived keys per change: (previous key, previous id, next key, next id).
        type Derived<K, R> = (Option<K>, Option<Id<R>>, Option<K>, Option<Id<R>>);
        let derived: Vec<Derived<K, R>> = changes
            .iter()
            .filter(|change| !change.is_identity())
            .map(|change| {
                (
                    change.previous().and_then(|r| (self.key_fn)(r)),
                    change.previous().map(|r| r.id()),
                    change.next().and_then(|r| (self.key_fn)(r)),
                    change.next().map(|r| r.id()),
                )
            })
            .collect();

        // Phase 1: vacate old keys, except key-preserving updates which are
        // handled by a single overwrite in phase 2.
        for (prev_key, prev_id, next_key, _) in &derived {
            let Some(old_key) = prev_key else { continue };
            if next_key.as_ref() == Some(old_key) {
                continue;
            }

            let prior = self.map.remove(old_key);
            undo.push((old_key.clone(), prior));
            if prior != *prev_id {
                return Err(IndexError::StalePrevious {
                    key: format!("{old_key:?}"),
                    expected: prev_id.map(|id| id.value()),
                    found: prior.map(|id| id.value()),
                });
            }
        }

        // Phase 2: put new keys.
        for (prev_key, prev_id, next_key, next_id) in &derived {
            let (Some(new_key), Some(next_id)) = (next_key, next_id) else {
                continue;
            };

            let overwrite = prev_key.as_ref() == Some(new_key);
            let prior = self.map.insert(new_key.clone(), *next_id);
            undo.push((new_key.clone(), prior));

            if overwrite {
                // Post-hoc expected-previous check for the direct put.
                if prior != *prev_id {
                    sink::record(MetricsEvent::UniqueViolation);
                    return Err(IndexError::StalePrevious {
                        key: format!("{new_key:?}"),
                        expected: prev_id.map(|id| id.value()),
                        found: prior.map(|id| id.value()),
                    });
                }
            } else if let Some(existing) = prior {
                sink::record(MetricsEvent::UniqueViolation);
                return Err(IndexError::DuplicateKey {
                    key: format!("{new_key:?}"),
                    existing: existing.value(),
                });
            }
        }

        Ok(())
    }
}

impl<K, R> ApplyChanges<R> for FastUniqueIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        let mut undo: Vec<(K, Option<Id<R>>)> = Vec::new();

        if let Err(err) = self.run(changes, &mut undo) {
            sink::record(MetricsEvent::Rollback {
                steps: undo.len() as u64,
            });
            for (key, prior) in undo.into_iter().rev() {
                match prior {
                    Some(id) => {
                        self.map.insert(key, id);
                    }
                    None => {
                        self.map.remove(&key);
                    }
                }
            }
            return Err(err);
        }

        let puts = undo.len() as u64;
        sink::record(MetricsEvent::IndexDelta {
            inserts: puts,
            removes: 0,
        });

        Ok(())
    }
}

impl<K, R> UniqueRead<K, R> for FastUniqueIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn get(&self, key: &K) -> Option<Rc<R>> {
        let id = *self.map.get(key)?;
        self.store.borrow().get(id)
    }

    fn id_for(&self, key: &K) -> Option<Id<R>> {
        self.map.get(key).copied()
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectStore;
    use std::cell::{Cell, RefCell};

    #[derive(Debug)]
    struct Car {
        id: u64,
        driver: Option<&'static str>,
    }

    impl Keyed for Car {
        fn id(&self) -> Id<Self> {
            Id::new(self.id)
        }
    }

    fn car(id: u64, driver: Option<&'static str>) -> Rc<Car> {
        Rc::new(Car { id, driver })
    }

    fn store_with(records: &[Rc<Car>]) -> SharedStore<Car> {
        let store = Rc::new(RefCell::new(ObjectStore::new()));
        for record in records {
            store.borrow_mut().add(record.clone()).unwrap();
        }
        store
    }

    fn driver_of(car: &Car) -> Option<&'static str> {
        car.driver
    }

    #[test]
    fn unique_index_maps_key_to_record() {
        let alice = car(1, Some("alice"));
        let store = store_with(std::slice::from_ref(&alice));
        let mut index = UniqueIndex::new(store, driver_of);

        index.apply(&[Change::add(alice.clone())]).unwrap();

        assert_eq!(index.id_for(&"alice"), Some(Id::new(1)));
        assert!(Rc::ptr_eq(&index.get(&"alice").unwrap(), &alice));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn unique_index_reports_blocking_record_on_duplicate() {
        let first = car(1, Some("alice"));
        let second = car(2, Some("alice"));
        let store = store_with(std::slice::from_ref(&first));
        let mut index = UniqueIndex::new(store, driver_of);
        index.apply(&[Change::add(first)]).unwrap();

        let err = index.apply(&[Change::add(second)]).unwrap_err();
        match err {
            IndexError::DuplicateKey { key, existing } => {
                assert_eq!(key, "\"alice\"");
                assert_eq!(existing, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Rollback left the original mapping intact.
        assert_eq!(index.id_for(&"alice"), Some(Id::new(1)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn unique_index_skips_records_without_key() {
        let keyless = car(1, None);
        let store = store_with(std::slice::from_ref(&keyless));
        let mut index = UniqueIndex::new(store, driver_of);

        index.apply(&[Change::add(keyless.clone())]).unwrap();
        assert!(index.is_empty());

        // Removing a keyless record is equally a no-op.
        index.apply(&[Change::delete(keyless)]).unwrap();
    }

    #[test]
    fn unique_index_update_remaps_key() {
        let before = car(1, Some("alice"));
        let after = car(1, Some("bob"));
        let store = store_with(std::slice::from_ref(&before));
        let mut index = UniqueIndex::new(store.clone(), driver_of);
        index.apply(&[Change::add(before.clone())]).unwrap();

        // Swap the canonical record so reads resolve the new value.
        store
            .borrow_mut()
            .update(before.clone(), after.clone())
            .unwrap();
        index
            .apply(&[Change::update(before, after).unwrap()])
            .unwrap();

        assert_eq!(index.id_for(&"alice"), None);
        assert_eq!(index.id_for(&"bob"), Some(Id::new(1)));
    }

    #[test]
    fn unique_index_names_both_keys_when_key_function_is_unstable() {
        let record = car(1, Some("alice"));
        let store = store_with(std::slice::from_ref(&record));
        let current = Rc::new(Cell::new("alice"));
        let key_fn = {
            let current = current.clone();
            move |_: &Car| Some(current.get())
        };
        let mut index = UniqueIndex::new(store, key_fn);
        index.apply(&[Change::add(record.clone())]).unwrap();

        // The key function changes its answer for the already-indexed record.
        current.set("amy");
        let err = index.insert(&record).unwrap_err();
        match err {
            IndexError::UnstableKey { id, key, existing } => {
                assert_eq!(id, 1);
                assert_eq!(key, "\"amy\"");
                assert_eq!(existing, "\"alice\"");
            }
            other => panic!("unexpected error: {other}"),
        }

        // The original binding is untouched.
        assert_eq!(index.id_for(&"alice"), Some(Id::new(1)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn fast_unique_overwrite_checks_expected_previous() {
        let before = car(1, Some("alice"));
        let store = store_with(std::slice::from_ref(&before));
        let mut index = FastUniqueIndex::new(store, driver_of);
        index.apply(&[Change::add(before.clone())]).unwrap();

        // Key-preserving update: single put, postcheck passes.
        let after = car(1, Some("alice"));
        index
            .apply(&[Change::update(before, after.clone()).unwrap()])
            .unwrap();
        assert_eq!(index.id_for(&"alice"), Some(Id::new(1)));

        // An update whose previous was never recorded fails and rolls back.
        let phantom_prev = car(2, Some("alice"));
        let phantom_next = car(2, Some("alice"));
        let err = index
            .apply(&[Change::update(phantom_prev, phantom_next).unwrap()])
            .unwrap_err();
        assert!(matches!(err, IndexError::StalePrevious { .. }));
        assert_eq!(index.id_for(&"alice"), Some(Id::new(1)));
    }

    #[test]
    fn fast_unique_detects_duplicate_on_add_postcheck() {
        let first = car(1, Some("alice"));
        let second = car(2, Some("alice"));
        let store = store_with(std::slice::from_ref(&first));
        let mut index = FastUniqueIndex::new(store, driver_of);
        index.apply(&[Change::add(first)]).unwrap();

        let err = index.apply(&[Change::add(second)]).unwrap_err();
        match err {
            IndexError::DuplicateKey { existing, .. } => assert_eq!(existing, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(index.id_for(&"alice"), Some(Id::new(1)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn fast_unique_key_change_vacates_old_key() {
        let before = car(1, Some("alice"));
        let after = car(1, Some("bob"));
        let store = store_with(std::slice::from_ref(&before));
        let mut index = FastUniqueIndex::new(store, driver_of);
        index.apply(&[Change::add(before.clone())]).unwrap();

        index
            .apply(&[Change::update(before, after).unwrap()])
            .unwrap();

        assert_eq!(index.id_for(&"alice"), None);
        assert_eq!(index.id_for(&"bob"), Some(Id::new(1)));
        assert_eq!(index.len(), 1);
    }
}
