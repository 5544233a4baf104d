use crate::{
    index::{ApplyChanges, CacheIndex, IndexError, apply_batch},
    types::{Change, Keyed},
};
use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
    rc::Rc,
};

///
/// GroupAggregateIndex
///
/// Per-group derived values recomputed from group membership. Mutations only
/// maintain membership and mark touched groups dirty; the aggregate function
/// runs once per batch, in the `after_update` hook, and only for dirty
/// groups. A batch that fails never recomputes, so readers only ever see
/// aggregates derived from committed membership.
///

pub struct GroupAggregateIndex<G, A, R: Keyed> {
    group_fn: Box<dyn Fn(&R) -> Option<G>>,
    aggregate_fn: Box<dyn Fn(&[Rc<R>]) -> A>,
    groups: HashMap<G, Vec<Rc<R>>>,
    aggregates: HashMap<G, A>,
    dirty: HashSet<G>,
}

impl<G, A, R> GroupAggregateIndex<G, A, R>
where
    G: Clone + Eq + Hash + Debug + 'static,
    A: Clone + 'static,
    R: Keyed + 'static,
{
    pub(crate) fn new(
        group_fn: impl Fn(&R) -> Option<G> + 'static,
        aggregate_fn: impl Fn(&[Rc<R>]) -> A + 'static,
    ) -> Self {
        Self {
            group_fn: Box::new(group_fn),
            aggregate_fn: Box::new(aggregate_fn),
            groups: HashMap::new(),
            aggregates: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    /// The committed aggregate for `group`, if the group has members.
    #[must_use]
    pub fn value(&self, group: &G) -> Option<A> {
        self.aggregates.get(group).cloned()
    }

    #[must_use]
    pub fn member_count(&self, group: &G) -> usize {
        self.groups.get(group).map_or(0, Vec::len)
    }

    pub fn groups(&self) -> impl Iterator<Item = &G> {
        self.aggregates.keys()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.aggregates.len()
    }
}

impl<G, A, R> CacheIndex<R> for GroupAggregateIndex<G, A, R>
where
    G: Clone + Eq + Hash + Debug + 'static,
    A: Clone + 'static,
    R: Keyed + 'static,
{
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let Some(group) = (self.group_fn)(record) else {
            return Ok(());
        };

        self.groups
            .entry(group.clone())
            .or_default()
            .push(record.clone());
        self.dirty.insert(group);
        Ok(())
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let Some(group) = (self.group_fn)(record) else {
            return Ok(());
        };

        let id = record.id();
        let Some(members) = self.groups.get_mut(&group) else {
            return Err(IndexError::MissingEntry { id: id.value() });
        };
        let Some(pos) = members.iter().position(|member| member.id() == id) else {
            return Err(IndexError::MissingEntry { id: id.value() });
        };

        members.remove(pos);
        if members.is_empty() {
            self.groups.remove(&group);
        }
        self.dirty.insert(group);
        Ok(())
    }

    fn after_update(&mut self) {
        for group in self.dirty.drain() {
            match self.groups.get(&group) {
                Some(members) => {
                    let value = (self.aggregate_fn)(members);
                    self.aggregates.insert(group, value);
                }
                None => {
                    self.aggregates.remove(&group);
                }
            }
        }
    }
}

impl<G, A, R> ApplyChanges<R> for GroupAggregateIndex<G, A, R>
where
    G: Clone + Eq + Hash + Debug + 'static,
    A: Clone + 'static,
    R: Keyed + 'static,
{
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

///
/// FoldIndex
///
/// A single running value folded over the matching records. The caller
/// supplies paired combinators: `apply` folds a record in, `retract` folds
/// it back out, and the two must be exact inverses or rollback will not
/// restore the prior value.
///

pub struct FoldIndex<A, R: Keyed> {
    predicate: Box<dyn Fn(&R) -> bool>,
    apply_fn: Box<dyn Fn(A, &R) -> A>,
    retract_fn: Box<dyn Fn(A, &R) -> A>,
    value: A,
}

impl<A, R> FoldIndex<A, R>
where
    A: Clone + 'static,
    R: Keyed + 'static,
{
    pub(crate) fn new(
        initial: A,
        predicate: impl Fn(&R) -> bool + 'static,
        apply_fn: impl Fn(A, &R) -> A + 'static,
        retract_fn: impl Fn(A, &R) -> A + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            apply_fn: Box::new(apply_fn),
            retract_fn: Box::new(retract_fn),
            value: initial,
        }
    }

    #[must_use]
    pub fn value(&self) -> A {
        self.value.clone()
    }
}

impl<A, R> CacheIndex<R> for FoldIndex<A, R>
where
    A: Clone + 'static,
    R: Keyed + 'static,
{
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if (self.predicate)(record) {
            self.value = (self.apply_fn)(self.value.clone(), record);
        }
        Ok(())
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if (self.predicate)(record) {
            self.value = (self.retract_fn)(self.value.clone(), record);
        }
        Ok(())
    }
}

impl<A, R> ApplyChanges<R> for FoldIndex<A, R>
where
    A: Clone + 'static,
    R: Keyed + 'static,
{
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

///
/// CountIndex
///
/// Running count of records matching a predicate. The degenerate fold, kept
/// separate because it needs no combinators and can validate its own
/// underflow.
///

pub struct CountIndex<R: Keyed> {
    predicate: Box<dyn Fn(&R) -> bool>,
    count: usize,
}

impl<R: Keyed + 'static> CountIndex<R> {
    pub(crate) fn new(predicate: impl Fn(&R) -> bool + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            count: 0,
        }
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }
}

impl<R: Keyed + 'static> CacheIndex<R> for CountIndex<R> {
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if (self.predicate)(record) {
            self.count += 1;
        }
        Ok(())
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        if !(self.predicate)(record) {
            return Ok(());
        }
        if self.count == 0 {
            return Err(IndexError::MissingEntry {
                id: record.id().value(),
            });
        }
        self.count -= 1;
        Ok(())
    }
}

impl<R: Keyed + 'static> ApplyChanges<R> for CountIndex<R> {
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

///
/// TESTS
///
