use crate::{
    index::{ApplyChanges, CacheIndex, IndexError, Step, apply_batch},
    obs::sink::{self, MetricsEvent},
    store::SharedStore,
    types::{Change, Id, Keyed},
};
use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
    rc::Rc,
};

///
/// PartitionRead
///
/// Query surface shared by every predicate partition: the set of records the
/// predicate currently accepts.
///

pub trait PartitionRead<R: Keyed> {
    /// All matching records. Ordering is implementation-defined.
    fn matching(&self) -> Vec<Rc<R>>;

    fn count(&self) -> usize;

    fn contains(&self, id: Id<R>) -> bool;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

///
/// UncachedPartition
///
/// Zero-maintenance partition: nothing is cached, every read scans the
/// store. The choice for rarely-queried predicates where paying per-read
/// beats paying per-update.
///

pub struct UncachedPartition<R: Keyed> {
    predicate: Box<dyn Fn(&R) -> bool>,
    store: SharedStore<R>,
}

impl<R: Keyed + 'static> UncachedPartition<R> {
    pub(crate) fn new(store: SharedStore<R>, predicate: impl Fn(&R) -> bool + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            store,
        }
    }
}

impl<R: Keyed + 'static> CacheIndex<R> for UncachedPartition<R> {
    fn insert(&mut self, _record: &Rc<R>) -> Result<(), IndexError> {
        Ok(())
    }

    fn remove(&mut self, _record: &Rc<R>) -> Result<(), IndexError> {
        Ok(())
    }
}

impl<R: Keyed + 'static> ApplyChanges<R> for UncachedPartition<R> {
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

impl<R: Keyed + 'static> PartitionRead<R> for UncachedPartition<R> {
    fn matching(&self) -> Vec<Rc<R>> {
        let store = self.store.borrow();
        let mut found: Vec<Rc<R>> = store
            .records()
            .filter(|record| (self.predicate)(record))
            .cloned()
            .collect();
        found.sort_by_key(|record| record.id());
        found
    }

    fn count(&self) -> usize {
        self.store
            .borrow()
            .records()
            .filter(|record| (self.predicate)(record))
            .count()
    }

    fn contains(&self, id: Id<R>) -> bool {
        self.store
            .borrow()
            .get(id)
            .is_some_and(|record| (self.predicate)(&record))
    }
}

///
/// CachedPartition
///
/// Fully cached partition: matching records are held as shared instances, so
/// reads never touch the store. Costs one map entry per matching record.
///

pub struct CachedPartition<R: Keyed> {
    predicate: Box<dyn Fn(&R) -> bool>,
    members: HashMap<Id<R>, Rc<R>>,
}

impl<R: Keyed + 'static> CachedPartition<R> {
    pub(crate) fn new(predicate: impl Fn(&R) -> bool + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            members: HashMap::new(),
        }
    }
}

impl<R: Keyed + 'static> CacheIndex<R> for CachedPartition<R> {
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if (self.predicate)(record) {
            self.members.insert(record.id(), record.clone());
        }
        Ok(())
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if !(self.predicate)(record) {
            return Ok(());
        }
        match self.members.remove(&record.id()) {
            Some(_) => Ok(()),
            None => Err(IndexError::MissingEntry {
                id: record.id().value(),
            }),
        }
    }
}

impl<R: Keyed + 'static> ApplyChanges<R> for CachedPartition<R> {
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

impl<R: Keyed + 'static> PartitionRead<R> for CachedPartition<R> {
    fn matching(&self) -> Vec<Rc<R>> {
        let mut found: Vec<Rc<R>> = self.members.values().cloned().collect();
        found.sort_by_key(|record| record.id());
        found
    }

    fn count(&self) -> usize {
        self.members.len()
    }

    fn contains(&self, id: Id<R>) -> bool {
        self.members.contains_key(&id)
    }
}

///
/// IdPartition
///
/// Identity-cached partition: membership is tracked as an id set and records
/// are resolved through the store on read. The middle ground between the
/// cached and uncached variants.
///

pub struct IdPartition<R: Keyed> {
    predicate: Box<dyn Fn(&R) -> bool>,
    members: BTreeSet<Id<R>>,
    store: SharedStore<R>,
}

impl<R: Keyed + 'static> IdPartition<R> {
    pub(crate) fn new(store: SharedStore<R>, predicate: impl Fn(&R) -> bool + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            members: BTreeSet::new(),
            store,
        }
    }
}

impl<R: Keyed + 'static> CacheIndex<R> for IdPartition<R> {
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if (self.predicate)(record) {
            self.members.insert(record.id());
        }
        Ok(())
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if !(self.predicate)(record) {
            return Ok(());
        }
        if self.members.remove(&record.id()) {
            Ok(())
        } else {
            Err(IndexError::MissingEntry {
                id: record.id().value(),
            })
        }
    }
}

impl<R: Keyed + 'static> ApplyChanges<R> for IdPartition<R> {
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

impl<R: Keyed + 'static> PartitionRead<R> for IdPartition<R> {
    fn matching(&self) -> Vec<Rc<R>> {
        let store = self.store.borrow();
        self.members.iter().filter_map(|id| store.get(*id)).collect()
    }

    fn count(&self) -> usize {
        self.members.len()
    }

    fn contains(&self, id: Id<R>) -> bool {
        self.members.contains(&id)
    }
}

///
/// SortedPartition
///
/// Identity-cached partition kept in comparator order. The comparator must
/// be consistent with identity: two distinct records comparing equal is
/// rejected as an [`IndexError::OrderConflict`] at insert.
///
/// Because only identities are cached, positioning a record during a
/// mutation resolves its neighbors through the store. The store is updated
/// before the indices, so every record a batch touches is staged in a
/// short-lived overlay holding the value its entry is currently ordered by:
/// the pre-batch value until its entry is re-inserted, the new value after.
/// Probes then resolve correctly even when the whole batch crosses itself
/// (updates) or the store no longer holds a record at all (deletes).
///

pub struct SortedPartition<R: Keyed> {
    predicate: Box<dyn Fn(&R) -> bool>,
    comparator: Box<dyn Fn(&R, &R) -> Ordering>,
    entries: Vec<Id<R>>,
    overlay: HashMap<Id<R>, Rc<R>>,
    store: SharedStore<R>,
}

impl<R: Keyed + 'static> SortedPartition<R> {
    pub(crate) fn new(
        store: SharedStore<R>,
        predicate: impl Fn(&R) -> bool + 'static,
        comparator: impl Fn(&R, &R) -> Ordering + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            comparator: Box::new(comparator),
            entries: Vec::new(),
            overlay: HashMap::new(),
            store,
        }
    }

    fn resolve(&self, id: Id<R>) -> Rc<R> {
        if let Some(staged) = self.overlay.get(&id) {
            return staged.clone();
        }
        // An entry that cannot be resolved means the store and this
        // partition have diverged; the partition can no longer vouch for
        // its order.
        self.store.borrow().get(id).unwrap_or_else(|| {
            panic!("sorted partition holds identity {id} with no resolvable record")
        })
    }

    fn position_of(&self, record: &R) -> Result<usize, usize> {
        self.entries.binary_search_by(|probe| {
            let resolved = self.resolve(*probe);
            (self.comparator)(&resolved, record)
        })
    }

    fn insert_staged(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        match self.position_of(record) {
            Ok(pos) => {
                let existing = self.entries[pos];
                if existing == record.id() {
                    // Same identity already placed; nothing to do.
                    Ok(())
                } else {
                    Err(IndexError::OrderConflict {
                        incoming: record.id().value(),
                        existing: existing.value(),
                    })
                }
            }
            Err(pos) => {
                self.entries.insert(pos, record.id());
                Ok(())
            }
        }
    }

    fn remove_staged(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        match self.position_of(record) {
            Ok(pos) if self.entries[pos] == record.id() => {
                self.entries.remove(pos);
                Ok(())
            }
            _ => Err(IndexError::MissingEntry {
                id: record.id().value(),
            }),
        }
    }

    /// Matching records in comparator order.
    #[must_use]
    pub fn ordered(&self) -> Vec<Rc<R>> {
        let store = self.store.borrow();
        self.entries.iter().filter_map(|id| store.get(*id)).collect()
    }

    #[must_use]
    pub fn first(&self) -> Option<Rc<R>> {
        let id = *self.entries.first()?;
        self.store.borrow().get(id)
    }

    #[must_use]
    pub fn last(&self) -> Option<Rc<R>> {
        let id = *self.entries.last()?;
        self.store.borrow().get(id)
    }
}

impl<R: Keyed + 'static> SortedPartition<R> {
    fn run_batch<'a>(
        &mut self,
        changes: &'a [Change<R>],
        applied: &mut Vec<Step<'a, R>>,
    ) -> Result<(), IndexError> {
        // Phase 1: vacate old positions, resolved via the staged pre-batch
        // values.
        for change in changes {
            if change.is_identity() {
                continue;
            }
            if let Some(previous) = change.previous()
                && (self.predicate)(previous)
            {
                self.remove_staged(previous)?;
                applied.push(Step::Removed(previous));
            }
        }

        // Phase 2: place new positions. Once an entry is re-inserted, later
        // probes of its identity must see the value it was positioned by.
        for change in changes {
            if change.is_identity() {
                continue;
            }
            if let Some(next) = change.next()
                && (self.predicate)(next)
            {
                self.insert_staged(next)?;
                self.overlay.insert(next.id(), next.clone());
                applied.push(Step::Inserted(next));
            }
        }

        Ok(())
    }
}

impl<R: Keyed + 'static> ApplyChanges<R> for SortedPartition<R> {
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        // Stage the pre-batch value of every record the batch touches; the
        // store already holds the post-batch state.
        for change in changes {
            if change.is_identity() {
                continue;
            }
            if let Some(previous) = change.previous()
                && (self.predicate)(previous)
            {
                self.overlay.insert(previous.id(), previous.clone());
            }
        }

        let mut applied: Vec<Step<'_, R>> = Vec::new();
        let result = self.run_batch(changes, &mut applied);

        match &result {
            Ok(()) => {
                let removes = applied
                    .iter()
                    .filter(|step| matches!(step, Step::Removed(_)))
                    .count() as u64;
                sink::record(MetricsEvent::IndexDelta {
                    inserts: applied.len() as u64 - removes,
                    removes,
                });
            }
            Err(err) => {
                sink::record(MetricsEvent::Rollback {
                    steps: applied.len() as u64,
                });

                for step in applied.into_iter().rev() {
                    let undone = match step {
                        Step::Removed(record) => {
                            self.overlay.insert(record.id(), record.clone());
                            self.insert_staged(record)
                        }
                        Step::Inserted(record) => self.remove_staged(record),
                    };
                    if let Err(rollback_err) = undone {
                        panic!(
                            "index rollback failed: {rollback_err} (while recovering from: {err})"
                        );
                    }
                }
            }
        }

        self.overlay.clear();
        result
    }
}

impl<R: Keyed + 'static> PartitionRead<R> for SortedPartition<R> {
    fn matching(&self) -> Vec<Rc<R>> {
        self.ordered()
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, id: Id<R>) -> bool {
        self.entries.contains(&id)
    }
}

///
/// TESTS
///
