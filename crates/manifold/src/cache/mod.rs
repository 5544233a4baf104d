//! The orchestrating cache: one canonical store, any number of registered
//! indices, and the listener layer, mutated together as a unit.
//!
//! Pipeline for every mutation: acquire the update guard, apply the batch to
//! the store, then to each index in registration order. The first rejection
//! unwinds everything already applied, so either all of it committed or none
//! of it did. Listeners run after commit, while the guard is still held, so
//! they read fully consistent state and cannot mutate reentrantly.

mod guard;
mod handle;
mod listener;

pub use handle::{IndexHandle, PartitionHandle, UniqueHandle};
pub use listener::{Listenable, ListenerId, Projection};

use crate::{
    cache::{guard::UpdateGuard, listener::ListenerRegistry},
    error::CacheError,
    index::{
        ApplyChanges, Batched, CacheIndex, CachedPartition, CountIndex, FastUniqueIndex,
        FoldIndex, GroupAggregateIndex, GroupIndex, IdPartition, ManyToOneIndex,
        SortedGroupIndex, SortedPartition, UncachedPartition, UniqueIndex,
    },
    obs::sink::{self, MetricsEvent},
    store::{ObjectStore, SharedStore, Snapshot, StoreError},
    types::{Change, Id, Keyed},
};
use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    fmt::Debug,
    hash::Hash,
    rc::Rc,
};

///
/// Hint
///
/// Workload hint steering which implementation backs a registered index.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Hint {
    /// Optimize reads; cache whatever makes queries cheapest.
    #[default]
    QueryThroughput,

    /// Optimize mutations; cache identities only and take shortcuts on
    /// update paths where the implementation offers them.
    UpdateThroughput,

    /// Queries are rare; cache nothing and scan on read.
    InfrequentQueries,
}

///
/// RegisteredIndex
///

struct RegisteredIndex<R: Keyed> {
    name: Option<String>,
    index: Rc<RefCell<dyn ApplyChanges<R>>>,
}

impl<R: Keyed> RegisteredIndex<R> {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

///
/// Cache
///
/// Single-writer in-memory object cache with composable secondary indices.
/// All methods take `&self`; one mutation runs at a time, enforced by the
/// update guard rather than locking.
///

pub struct Cache<R: Keyed> {
    store: SharedStore<R>,
    indexes: RefCell<Vec<RegisteredIndex<R>>>,
    listeners: ListenerRegistry<R>,
    updating: Cell<bool>,
}

impl<R: Keyed + 'static> Default for Cache<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Keyed + 'static> Cache<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Rc::new(RefCell::new(ObjectStore::new())),
            indexes: RefCell::new(Vec::new()),
            listeners: ListenerRegistry::new(),
            updating: Cell::new(false),
        }
    }

    //
    // Reads
    //

    #[must_use]
    pub fn get(&self, id: Id<R>) -> Option<Rc<R>> {
        self.store.borrow().get(id)
    }

    #[must_use]
    pub fn contains_id(&self, id: Id<R>) -> bool {
        self.store.borrow().contains_id(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }

    /// Memoized immutable view of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<R> {
        self.store.borrow().snapshot()
    }

    /// All records, in identity order.
    #[must_use]
    pub fn records(&self) -> Vec<Rc<R>> {
        let mut records: Vec<Rc<R>> = self.store.borrow().records().cloned().collect();
        records.sort_by_key(|record| record.id());
        records
    }

    /// Visit every record, in identity order.
    pub fn for_each(&self, mut f: impl FnMut(&Rc<R>)) {
        for record in self.records() {
            f(&record);
        }
    }

    //
    // Mutations
    //

    pub fn add(&self, record: Rc<R>) -> Result<(), CacheError> {
        self.run("add", &[Change::add(record)])
    }

    pub fn add_all(&self, records: Vec<Rc<R>>) -> Result<(), CacheError> {
        let changes: Vec<Change<R>> = records.into_iter().map(Change::add).collect();
        self.run("add_all", &changes)
    }

    /// Replace the record under an identity. `previous` must be the canonical
    /// instance currently held.
    pub fn update(&self, previous: Rc<R>, next: Rc<R>) -> Result<(), CacheError> {
        let change = Change::update(previous, next)?;
        self.run("update", &[change])
    }

    pub fn update_all(&self, pairs: Vec<(Rc<R>, Rc<R>)>) -> Result<(), CacheError> {
        let changes: Vec<Change<R>> = pairs
            .into_iter()
            .map(|(previous, next)| Change::update(previous, next))
            .collect::<Result<_, _>>()?;
        self.run("update_all", &changes)
    }

    /// Delete the record under `id`, returning the removed instance.
    pub fn delete(&self, id: Id<R>) -> Result<Rc<R>, CacheError> {
        let previous = self
            .get(id)
            .ok_or(StoreError::NotFound { id: id.value() })?;
        self.run("delete", &[Change::delete(previous.clone())])?;

        Ok(previous)
    }

    /// Delete every listed identity, returning the removed instances. If any
    /// id is unknown, nothing is deleted and every unknown id is reported.
    pub fn delete_all(&self, ids: &[Id<R>]) -> Result<Vec<Rc<R>>, CacheError> {
        let mut missing: Vec<u64> = Vec::new();
        let mut previous: Vec<Rc<R>> = Vec::new();
        {
            let store = self.store.borrow();
            for id in ids {
                match store.get(*id) {
                    Some(record) => previous.push(record),
                    None => missing.push(id.value()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(StoreError::BatchMismatch { mismatched: missing }.into());
        }

        let changes: Vec<Change<R>> = previous.iter().cloned().map(Change::delete).collect();
        self.run("delete_all", &changes)?;

        Ok(previous)
    }

    /// Delete everything, returning how many records were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let changes: Vec<Change<R>> = self
            .store
            .borrow()
            .records()
            .cloned()
            .map(Change::delete)
            .collect();
        let count = changes.len();
        self.run("clear", &changes)?;

        Ok(count)
    }

    /// Apply a caller-built change through the full pipeline.
    pub fn apply(&self, change: Change<R>) -> Result<(), CacheError> {
        self.run("apply", &[change])
    }

    /// Apply a caller-built batch atomically.
    pub fn apply_all(&self, changes: Vec<Change<R>>) -> Result<(), CacheError> {
        self.run("apply_all", &changes)
    }

    //
    // Pipeline
    //

    fn run(&self, op: &'static str, changes: &[Change<R>]) -> Result<(), CacheError> {
        if changes.is_empty() {
            return Ok(());
        }

        let _guard = UpdateGuard::begin(&self.updating, op)?;
        sink::record(MetricsEvent::MutationStart { op });

        self.store.borrow_mut().apply_all(changes)?;

        if let Err(err) = self.apply_to_indexes(changes) {
            let inverses = Self::inverses_of(changes);
            if let Err(store_err) = self.store.borrow_mut().apply_all(&inverses) {
                panic!("store rollback failed: {store_err} (while recovering from: {err})");
            }
            return Err(err);
        }

        sink::record(MetricsEvent::MutationCommit {
            op,
            changes: changes.len() as u64,
        });

        // Commit point reached; listeners observe the new state. The guard is
        // still held, so a listener attempting a mutation gets a reentrancy
        // error instead of interleaving with this pipeline.
        let notified = self.listeners.notify(changes);
        if notified > 0 {
            sink::record(MetricsEvent::ListenersNotified { count: notified });
        }

        Ok(())
    }

    fn apply_to_indexes(&self, changes: &[Change<R>]) -> Result<(), CacheError> {
        let indexes = self.indexes.borrow();

        for (pos, entry) in indexes.iter().enumerate() {
            if let Err(source) = entry.index.borrow_mut().apply(changes) {
                let name = entry.name.clone();

                // Indices before `pos` committed their batch; undo them by
                // replaying the inverse batch, newest first.
                let inverses = Self::inverses_of(changes);
                for earlier in indexes[..pos].iter().rev() {
                    if let Err(err) = earlier.index.borrow_mut().apply(&inverses) {
                        panic!(
                            "index '{}' rollback failed: {err} (while recovering from: {source})",
                            earlier.label()
                        );
                    }
                }

                return Err(CacheError::Index { name, source });
            }
        }

        Ok(())
    }

    fn inverses_of(changes: &[Change<R>]) -> Vec<Change<R>> {
        changes.iter().rev().map(Change::inverse).collect()
    }

    //
    // Registration
    //
    // New indices are seeded from the current contents under the update
    // guard, so an index either joins fully consistent or not at all.
    //

    fn attach<I>(&self, name: Option<String>, index: &Rc<RefCell<I>>) -> Result<(), CacheError>
    where
        I: ApplyChanges<R> + 'static,
    {
        let _guard = UpdateGuard::begin(&self.updating, "register")?;

        let mut seed: Vec<Change<R>> = self
            .store
            .borrow()
            .records()
            .cloned()
            .map(Change::add)
            .collect();
        seed.sort_by_key(Change::id);

        index
            .borrow_mut()
            .apply(&seed)
            .map_err(|source| CacheError::Index {
                name: name.clone(),
                source,
            })?;

        self.indexes.borrow_mut().push(RegisteredIndex {
            name,
            index: index.clone(),
        });

        Ok(())
    }

    /// Register a caller-supplied index implementation. The index is run
    /// through the shared batch skeleton; the handle derefs to it for reads.
    pub fn register_index<I>(
        &self,
        name: impl Into<String>,
        index: I,
    ) -> Result<IndexHandle<Batched<I>>, CacheError>
    where
        I: CacheIndex<R> + 'static,
    {
        let index = Rc::new(RefCell::new(Batched::new(index)));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }

    /// Register a unique mapping. `UpdateThroughput` selects the forward-only
    /// implementation with direct-put updates; anything else gets the
    /// bidirectional map with immediate duplicate detection.
    pub fn register_unique<K>(
        &self,
        name: impl Into<String>,
        hint: Hint,
        key_fn: impl Fn(&R) -> Option<K> + 'static,
    ) -> Result<UniqueHandle<K, R>, CacheError>
    where
        K: Clone + Eq + Hash + Debug + 'static,
    {
        let name = Some(name.into());
        match hint {
            Hint::UpdateThroughput => {
                let index = Rc::new(RefCell::new(FastUniqueIndex::new(
                    self.store.clone(),
                    key_fn,
                )));
                self.attach(name, &index)?;
                Ok(UniqueHandle::new(index))
            }
            Hint::QueryThroughput | Hint::InfrequentQueries => {
                let index = Rc::new(RefCell::new(UniqueIndex::new(self.store.clone(), key_fn)));
                self.attach(name, &index)?;
                Ok(UniqueHandle::new(index))
            }
        }
    }

    /// Register a predicate partition, backed per the hint: fully cached,
    /// identity-cached, or scan-on-read.
    pub fn register_partition(
        &self,
        name: impl Into<String>,
        hint: Hint,
        predicate: impl Fn(&R) -> bool + 'static,
    ) -> Result<PartitionHandle<R>, CacheError> {
        let name = Some(name.into());
        match hint {
            Hint::QueryThroughput => {
                let index = Rc::new(RefCell::new(CachedPartition::new(predicate)));
                self.attach(name, &index)?;
                Ok(PartitionHandle::new(index))
            }
            Hint::UpdateThroughput => {
                let index = Rc::new(RefCell::new(IdPartition::new(self.store.clone(), predicate)));
                self.attach(name, &index)?;
                Ok(PartitionHandle::new(index))
            }
            Hint::InfrequentQueries => {
                let index = Rc::new(RefCell::new(UncachedPartition::new(
                    self.store.clone(),
                    predicate,
                )));
                self.attach(name, &index)?;
                Ok(PartitionHandle::new(index))
            }
        }
    }

    /// Register a comparator-ordered partition.
    pub fn register_sorted_partition(
        &self,
        name: impl Into<String>,
        predicate: impl Fn(&R) -> bool + 'static,
        comparator: impl Fn(&R, &R) -> Ordering + 'static,
    ) -> Result<IndexHandle<SortedPartition<R>>, CacheError> {
        let index = Rc::new(RefCell::new(SortedPartition::new(
            self.store.clone(),
            predicate,
            comparator,
        )));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }

    /// Register a one-to-many grouping.
    pub fn register_group<K>(
        &self,
        name: impl Into<String>,
        keys_fn: impl Fn(&R) -> Vec<K> + 'static,
    ) -> Result<IndexHandle<GroupIndex<K, R>>, CacheError>
    where
        K: Clone + Eq + Hash + Debug + 'static,
    {
        let index = Rc::new(RefCell::new(GroupIndex::new(self.store.clone(), keys_fn)));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }

    /// Register an exclusive claim mapping.
    pub fn register_many_to_one<K>(
        &self,
        name: impl Into<String>,
        keys_fn: impl Fn(&R) -> Vec<K> + 'static,
    ) -> Result<IndexHandle<ManyToOneIndex<K, R>>, CacheError>
    where
        K: Clone + Eq + Hash + Debug + 'static,
    {
        let index = Rc::new(RefCell::new(ManyToOneIndex::new(
            self.store.clone(),
            keys_fn,
        )));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }

    /// Register a grouping ordered within each group.
    pub fn register_sorted_group<G>(
        &self,
        name: impl Into<String>,
        group_fn: impl Fn(&R) -> Option<G> + 'static,
        comparator: impl Fn(&R, &R) -> Ordering + 'static,
    ) -> Result<IndexHandle<SortedGroupIndex<G, R>>, CacheError>
    where
        G: Clone + Eq + Hash + Debug + 'static,
    {
        let index = Rc::new(RefCell::new(SortedGroupIndex::new(group_fn, comparator)));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }

    /// Register per-group derived values.
    pub fn register_group_aggregate<G, A>(
        &self,
        name: impl Into<String>,
        group_fn: impl Fn(&R) -> Option<G> + 'static,
        aggregate_fn: impl Fn(&[Rc<R>]) -> A + 'static,
    ) -> Result<IndexHandle<GroupAggregateIndex<G, A, R>>, CacheError>
    where
        G: Clone + Eq + Hash + Debug + 'static,
        A: Clone + 'static,
    {
        let index = Rc::new(RefCell::new(GroupAggregateIndex::new(group_fn, aggregate_fn)));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }

    /// Register a running fold over matching records. `apply_fn` and
    /// `retract_fn` must be exact inverses.
    pub fn register_fold<A>(
        &self,
        name: impl Into<String>,
        initial: A,
        predicate: impl Fn(&R) -> bool + 'static,
        apply_fn: impl Fn(A, &R) -> A + 'static,
        retract_fn: impl Fn(A, &R) -> A + 'static,
    ) -> Result<IndexHandle<FoldIndex<A, R>>, CacheError>
    where
        A: Clone + 'static,
    {
        let index = Rc::new(RefCell::new(FoldIndex::new(
            initial, predicate, apply_fn, retract_fn,
        )));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }

    /// Register a running count of matching records.
    pub fn register_count(
        &self,
        name: impl Into<String>,
        predicate: impl Fn(&R) -> bool + 'static,
    ) -> Result<IndexHandle<CountIndex<R>>, CacheError> {
        let index = Rc::new(RefCell::new(CountIndex::new(predicate)));
        self.attach(Some(name.into()), &index)?;

        Ok(IndexHandle::new(index))
    }
}

impl<R: Keyed + 'static> Listenable<R> for Cache<R> {
    fn on_added(&self, listener: impl Fn(&Rc<R>) + 'static) -> ListenerId {
        self.listeners.subscribe_added(Rc::new(listener))
    }

    fn on_removed(&self, listener: impl Fn(&Rc<R>) + 'static) -> ListenerId {
        self.listeners.subscribe_removed(Rc::new(listener))
    }

    fn on_changed(&self, listener: impl Fn(&Rc<R>, &Rc<R>) + 'static) -> ListenerId {
        self.listeners.subscribe_changed(Rc::new(listener))
    }

    fn on_batch(&self, listener: impl Fn(&[Change<R>]) + 'static) -> ListenerId {
        self.listeners.subscribe_batch(Rc::new(listener))
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Account {
        id: u64,
        owner: Option<&'static str>,
        balance: i64,
    }

    impl Keyed for Account {
        fn id(&self) -> Id<Self> {
            Id::new(self.id)
        }
    }

    fn account(id: u64, owner: Option<&'static str>, balance: i64) -> Rc<Account> {
        Rc::new(Account { id, owner, balance })
    }

    #[test]
    fn add_and_read_through_unique_handle() {
        let cache: Cache<Account> = Cache::new();
        let by_owner = cache
            .register_unique("by_owner", Hint::default(), |a: &Account| a.owner)
            .unwrap();

        let alice = account(1, Some("alice"), 100);
        cache.add(alice.clone()).unwrap();

        assert!(Rc::ptr_eq(&by_owner.get(&"alice").unwrap(), &alice));
        assert_eq!(by_owner.id_for(&"alice"), Some(Id::new(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_batch_leaves_store_and_indexes_untouched() {
        let cache: Cache<Account> = Cache::new();
        let by_owner = cache
            .register_unique("by_owner", Hint::default(), |a: &Account| a.owner)
            .unwrap();
        let positive = cache
            .register_count("positive", |a: &Account| a.balance > 0)
            .unwrap();

        // Second add collides on the unique key; store and the count index
        // already accepted the batch and must both unwind.
        let err = cache
            .add_all(vec![
                account(1, Some("alice"), 100),
                account(2, Some("alice"), 50),
            ])
            .unwrap_err();
        match err {
            CacheError::Index { name, .. } => assert_eq!(name.as_deref(), Some("by_owner")),
            other => panic!("unexpected error: {other}"),
        }

        assert!(cache.is_empty());
        assert!(by_owner.is_empty());
        assert_eq!(positive.with(CountIndex::count), 0);
    }

    #[test]
    fn registration_seeds_from_existing_contents() {
        let cache: Cache<Account> = Cache::new();
        cache.add(account(1, Some("alice"), 100)).unwrap();
        cache.add(account(2, None, -5)).unwrap();

        let by_owner = cache
            .register_unique("by_owner", Hint::default(), |a: &Account| a.owner)
            .unwrap();
        let overdrawn = cache
            .register_partition("overdrawn", Hint::QueryThroughput, |a: &Account| {
                a.balance < 0
            })
            .unwrap();

        assert_eq!(by_owner.len(), 1);
        assert_eq!(overdrawn.count(), 1);
        assert!(overdrawn.contains(Id::new(2)));
    }

    #[test]
    fn registration_rejecting_seed_leaves_cache_unindexed() {
        let cache: Cache<Account> = Cache::new();
        cache.add(account(1, Some("alice"), 100)).unwrap();
        cache.add(account(2, Some("alice"), 50)).unwrap();

        let err = cache
            .register_unique("by_owner", Hint::default(), |a: &Account| a.owner)
            .unwrap_err();
        assert!(matches!(err, CacheError::Index { .. }));

        // The rejected index was never attached; mutations still work.
        cache.add(account(3, None, 0)).unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn update_requires_canonical_previous() {
        let cache: Cache<Account> = Cache::new();
        let original = account(1, Some("alice"), 100);
        cache.add(original.clone()).unwrap();

        let imposter = account(1, Some("alice"), 100);
        let err = cache
            .update(imposter, account(1, Some("alice"), 200))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Store(StoreError::PreviousMismatch { id: 1 })
        ));

        cache
            .update(original, account(1, Some("alice"), 200))
            .unwrap();
        assert_eq!(cache.get(Id::new(1)).unwrap().balance, 200);
    }

    #[test]
    fn listeners_fire_after_commit_with_consistent_state() {
        let cache: Rc<Cache<Account>> = Rc::new(Cache::new());
        let by_owner = cache
            .register_unique("by_owner", Hint::default(), |a: &Account| a.owner)
            .unwrap();

        let observed = Rc::new(Cell::new(false));
        {
            let by_owner = by_owner.clone();
            let observed = observed.clone();
            cache.on_added(move |record: &Rc<Account>| {
                // The index already reflects the record being announced.
                assert!(by_owner.contains_key(&record.owner.unwrap()));
                observed.set(true);
            });
        }

        cache.add(account(1, Some("alice"), 100)).unwrap();
        assert!(observed.get());
    }

    #[test]
    fn listeners_do_not_fire_for_failed_mutations() {
        let cache: Cache<Account> = Cache::new();
        cache
            .register_unique("by_owner", Hint::default(), |a: &Account| a.owner)
            .unwrap();

        let fired = Rc::new(Cell::new(0));
        {
            let fired = fired.clone();
            cache.on_added(move |_| fired.set(fired.get() + 1));
        }

        cache.add(account(1, Some("alice"), 100)).unwrap();
        let _ = cache
            .add_all(vec![
                account(2, Some("bob"), 10),
                account(3, Some("alice"), 10),
            ])
            .unwrap_err();

        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn mutating_from_a_listener_is_rejected() {
        let cache: Rc<Cache<Account>> = Rc::new(Cache::new());

        let reentrant: Rc<RefCell<Option<CacheError>>> = Rc::new(RefCell::new(None));
        {
            let cache = cache.clone();
            let reentrant = reentrant.clone();
            cache.clone().on_added(move |_| {
                let err = cache.add(account(99, None, 0)).unwrap_err();
                *reentrant.borrow_mut() = Some(err);
            });
        }

        cache.add(account(1, None, 0)).unwrap();

        assert!(matches!(
            *reentrant.borrow(),
            Some(CacheError::Reentrancy { op: "add" })
        ));
        assert!(!cache.contains_id(Id::new(99)));
    }

    #[test]
    fn delete_all_is_atomic_over_unknown_ids() {
        let cache: Cache<Account> = Cache::new();
        cache.add(account(1, None, 0)).unwrap();

        let err = cache
            .delete_all(&[Id::new(1), Id::new(7), Id::new(9)])
            .unwrap_err();
        match err {
            CacheError::Store(StoreError::BatchMismatch { mismatched }) => {
                assert_eq!(mismatched, vec![7, 9]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cache.len(), 1);

        let removed = cache.delete_all(&[Id::new(1)]).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_runs_through_the_full_pipeline() {
        let cache: Cache<Account> = Cache::new();
        let positive = cache
            .register_count("positive", |a: &Account| a.balance > 0)
            .unwrap();

        let removals = Rc::new(Cell::new(0));
        {
            let removals = removals.clone();
            cache.on_removed(move |_| removals.set(removals.get() + 1));
        }

        cache.add(account(1, None, 10)).unwrap();
        cache.add(account(2, None, 20)).unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.is_empty());
        assert_eq!(positive.with(CountIndex::count), 0);
        assert_eq!(removals.get(), 2);
    }

    #[test]
    fn custom_index_runs_through_the_pipeline() {
        use crate::index::{CacheIndex, IndexError};

        /// Tracks the highest balance ever stored.
        #[derive(Default)]
        struct HighWater {
            peak: i64,
        }

        impl CacheIndex<Account> for HighWater {
            fn insert(&mut self, record: &Rc<Account>) -> Result<(), IndexError> {
                self.peak = self.peak.max(record.balance);
                Ok(())
            }

            fn remove(&mut self, _record: &Rc<Account>) -> Result<(), IndexError> {
                Ok(())
            }
        }

        let cache: Cache<Account> = Cache::new();
        cache.add(account(1, None, 70)).unwrap();

        let high_water = cache.register_index("high_water", HighWater::default()).unwrap();
        // Seeded from the existing record.
        assert_eq!(high_water.with(|i| i.peak), 70);

        cache.add(account(2, None, 300)).unwrap();
        cache.add(account(3, None, 50)).unwrap();
        assert_eq!(high_water.with(|i| i.peak), 300);
    }

    #[test]
    fn projection_remaps_boundary_crossings() {
        let cache: Cache<Account> = Cache::new();

        let entered = Rc::new(Cell::new(0));
        let left = Rc::new(Cell::new(0));
        {
            let projection = cache.project(|a: &Account| a.balance < 0);
            let entered = entered.clone();
            projection.on_entered(move |_| entered.set(entered.get() + 1));
            let left = left.clone();
            projection.on_left(move |_| left.set(left.get() + 1));
        }

        // Add outside the filter, update across it, then back out.
        let v1 = account(1, None, 10);
        cache.add(v1.clone()).unwrap();
        let v2 = account(1, None, -10);
        cache.update(v1, v2.clone()).unwrap();
        let v3 = account(1, None, 5);
        cache.update(v2, v3).unwrap();

        assert_eq!(entered.get(), 1);
        assert_eq!(left.get(), 1);
    }
}
