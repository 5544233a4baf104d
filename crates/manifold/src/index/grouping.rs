use crate::{
    index::{ApplyChanges, CacheIndex, IndexError, apply_batch},
    store::SharedStore,
    types::{Change, Id, Keyed},
};
use std::{
    collections::{BTreeSet, HashMap},
    fmt::Debug,
    hash::Hash,
    rc::Rc,
};

///
/// GroupIndex
///
/// One-to-many grouping: each record contributes to zero or more group keys,
/// and each key resolves to the set of member records. Only identities are
/// cached; reads resolve members through the backing store. Keys with no
/// members are dropped entirely, so `keys()` never reports empty groups.
///

pub struct GroupIndex<K, R: Keyed> {
    keys_fn: Box<dyn Fn(&R) -> Vec<K>>,
    groups: HashMap<K, BTreeSet<Id<R>>>,
    store: SharedStore<R>,
}

impl<K, R> GroupIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    pub(crate) fn new(store: SharedStore<R>, keys_fn: impl Fn(&R) -> Vec<K> + 'static) -> Self {
        Self {
            keys_fn: Box::new(keys_fn),
            groups: HashMap::new(),
            store,
        }
    }

    /// The record's group keys, deduplicated so a key listed twice
    /// contributes a single membership.
    fn keys_of(&self, record: &R) -> Vec<K> {
        let mut seen = Vec::new();
        for key in (self.keys_fn)(record) {
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }

    /// Member records of `key`, resolved through the store, in identity order.
    #[must_use]
    pub fn get(&self, key: &K) -> Vec<Rc<R>> {
        let Some(ids) = self.groups.get(key) else {
            return Vec::new();
        };

        let store = self.store.borrow();
        ids.iter().filter_map(|id| store.get(*id)).collect()
    }

    #[must_use]
    pub fn ids_for(&self, key: &K) -> Vec<Id<R>> {
        self.groups
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, key: &K) -> usize {
        self.groups.get(key).map_or(0, BTreeSet::len)
    }

    #[must_use]
    pub fn contains(&self, key: &K, id: Id<R>) -> bool {
        self.groups.get(key).is_some_and(|ids| ids.contains(&id))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.groups.keys()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl<K, R> CacheIndex<R> for GroupIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let id = record.id();
        for key in self.keys_of(record) {
            self.groups.entry(key).or_default().insert(id);
        }
        Ok(())
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let id = record.id();
        let keys = self.keys_of(record);

        // Validate every membership before touching the map so a failing
        // remove leaves no net change.
        for key in &keys {
            if !self.groups.get(key).is_some_and(|ids| ids.contains(&id)) {
                return Err(IndexError::MissingEntry { id: id.value() });
            }
        }

        for key in keys {
            if let Some(ids) = self.groups.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.groups.remove(&key);
                }
            }
        }
        Ok(())
    }
}

impl<K, R> ApplyChanges<R> for GroupIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

///
/// ManyToOneIndex
///
/// Exclusive claim mapping: each key is owned by at most one record, but a
/// record may own many keys. A second record claiming an owned key is
/// rejected, naming the current owner.
///

pub struct ManyToOneIndex<K, R: Keyed> {
    keys_fn: Box<dyn Fn(&R) -> Vec<K>>,
    owners: HashMap<K, Id<R>>,
    store: SharedStore<R>,
}

impl<K, R> ManyToOneIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    pub(crate) fn new(store: SharedStore<R>, keys_fn: impl Fn(&R) -> Vec<K> + 'static) -> Self {
        Self {
            keys_fn: Box::new(keys_fn),
            owners: HashMap::new(),
            store,
        }
    }

    fn keys_of(&self, record: &R) -> Vec<K> {
        let mut seen = Vec::new();
        for key in (self.keys_fn)(record) {
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }

    /// The record owning `key`, resolved through the store.
    #[must_use]
    pub fn owner(&self, key: &K) -> Option<Rc<R>> {
        let id = *self.owners.get(key)?;
        self.store.borrow().get(id)
    }

    #[must_use]
    pub fn owner_id(&self, key: &K) -> Option<Id<R>> {
        self.owners.get(key).copied()
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.owners.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl<K, R> CacheIndex<R> for ManyToOneIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let id = record.id();
        let keys = self.keys_of(record);

        // Validate the full claim set before touching the map so a partial
        // insert never needs unwinding here.
        for key in &keys {
            if let Some(existing) = self.owners.get(key)
                && *existing != id
            {
                return Err(IndexError::OccupiedKey {
                    key: format!("{key:?}"),
                    existing: existing.value(),
                });
            }
        }

        for key in keys {
            self.owners.insert(key, id);
        }
        Ok(())
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let id = record.id();
        let keys = self.keys_of(record);

        // Same discipline as insert: check every claim first, then release.
        for key in &keys {
            if self.owners.get(key) != Some(&id) {
                return Err(IndexError::MissingEntry { id: id.value() });
            }
        }

        for key in keys {
            self.owners.remove(&key);
        }
        Ok(())
    }
}

impl<K, R> ApplyChanges<R> for ManyToOneIndex<K, R>
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

///
/// TESTS
///
