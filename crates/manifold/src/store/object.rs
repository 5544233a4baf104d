use crate::{
    store::Snapshot,
    types::{Change, Id, Keyed},
};
use std::{cell::RefCell, collections::HashMap, rc::Rc};
use thiserror::Error as ThisError;

///
/// StoreError
///
/// Violations of the store mutation contract. Batch mutations are
/// all-or-nothing: on any mismatch the whole batch is rolled back and the
/// offending identities are reported.
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("no record under identity {id}")]
    NotFound { id: u64 },

    #[error("identity {id} is already occupied")]
    Collision { id: u64 },

    #[error("asserted previous value is not the canonical record for identity {id}")]
    PreviousMismatch { id: u64 },

    #[error("update pairs two different identities: previous={previous}, next={next}")]
    IdentityMismatch { previous: u64, next: u64 },

    #[error("batch aborted and rolled back; mismatched identities: {mismatched:?}")]
    BatchMismatch { mismatched: Vec<u64> },
}

///
/// ObjectStore
///
/// The canonical identity-to-record map: exactly one live `Rc<R>` instance
/// per identity. Records are immutable once stored; mutation replaces the
/// value under the same identity. Expected-previous checks compare by
/// pointer identity against the canonical instance, not by equality.
///

#[derive(Debug)]
pub struct ObjectStore<R: Keyed> {
    records: HashMap<Id<R>, Rc<R>>,
    memo: RefCell<Option<Snapshot<R>>>,
}

impl<R: Keyed> Default for ObjectStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Keyed> ObjectStore<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            memo: RefCell::new(None),
        }
    }

    //
    // Reads
    //

    #[must_use]
    pub fn get(&self, id: Id<R>) -> Option<Rc<R>> {
        self.records.get(&id).cloned()
    }

    #[must_use]
    pub fn contains_id(&self, id: Id<R>) -> bool {
        self.records.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<R>, &Rc<R>)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn records(&self) -> impl Iterator<Item = &Rc<R>> {
        self.records.values()
    }

    /// Memoized immutable view of the current contents.
    ///
    /// Repeated calls between mutations return the same shared map; the memo
    /// is invalidated lazily by the next mutation.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<R> {
        let mut memo = self.memo.borrow_mut();
        if let Some(snapshot) = memo.as_ref() {
            return snapshot.clone();
        }

        let snapshot = Snapshot::new(self.records.clone());
        *memo = Some(snapshot.clone());

        snapshot
    }

    //
    // Single-record primitives
    //

    /// Add a record under a vacant identity.
    pub fn add(&mut self, record: Rc<R>) -> Result<(), StoreError> {
        self.apply(&Change::add(record))
    }

    /// Replace the record under an identity. `previous` must be the canonical
    /// instance currently held.
    pub fn update(&mut self, previous: Rc<R>, next: Rc<R>) -> Result<(), StoreError> {
        let previous_id = previous.id().value();
        let next_id = next.id().value();
        let change = Change::update(previous, next).map_err(|_| StoreError::IdentityMismatch {
            previous: previous_id,
            next: next_id,
        })?;
        self.apply(&change)
    }

    /// Delete the record under `id`, returning the old canonical instance.
    pub fn delete(&mut self, id: Id<R>) -> Result<Rc<R>, StoreError> {
        let previous = self.get(id).ok_or(StoreError::NotFound { id: id.value() })?;
        self.apply(&Change::delete(previous.clone()))?;

        Ok(previous)
    }

    //
    // Change application
    //

    /// Apply a single validated change.
    pub fn apply(&mut self, change: &Change<R>) -> Result<(), StoreError> {
        self.check(change)?;
        self.apply_unchecked(change);

        Ok(())
    }

    /// Apply a batch of changes atomically.
    ///
    /// Every change is attempted in order; per-change mismatches are
    /// collected rather than aborting early, so the error names every
    /// offending identity. On any mismatch, already-applied changes are
    /// rolled back in reverse via their inverses and the store is left
    /// exactly as before the call.
    pub fn apply_all(&mut self, changes: &[Change<R>]) -> Result<(), StoreError> {
        let mut applied: Vec<&Change<R>> = Vec::new();
        let mut mismatched: Vec<u64> = Vec::new();

        for change in changes {
            match self.check(change) {
                Ok(()) => {
                    self.apply_unchecked(change);
                    applied.push(change);
                }
                Err(_) => mismatched.push(change.id().value()),
            }
        }

        if mismatched.is_empty() {
            return Ok(());
        }

        for change in applied.into_iter().rev() {
            let inverse = change.inverse();
            // A failing inverse here means a registered change was not a true
            // inverse pair; the store can no longer vouch for its contents.
            if let Err(err) = self.check(&inverse) {
                panic!("store rollback failed for identity {}: {err}", change.id());
            }
            self.apply_unchecked(&inverse);
        }

        Err(StoreError::BatchMismatch { mismatched })
    }

    fn check(&self, change: &Change<R>) -> Result<(), StoreError> {
        let id = change.id();

        match change.previous() {
            None => {
                if self.records.contains_key(&id) {
                    return Err(StoreError::Collision { id: id.value() });
                }
            }
            Some(previous) => {
                let held = self
                    .records
                    .get(&id)
                    .ok_or(StoreError::NotFound { id: id.value() })?;
                if !Rc::ptr_eq(held, previous) {
                    return Err(StoreError::PreviousMismatch { id: id.value() });
                }
            }
        }

        Ok(())
    }

    fn apply_unchecked(&mut self, change: &Change<R>) {
        self.memo.get_mut().take();

        if change.is_identity() {
            return;
        }

        match change.next() {
            Some(next) => {
                self.records.insert(change.id(), next.clone());
            }
            None => {
                self.records.remove(&change.id());
            }
        }
    }
}

///
/// TESTS
///
