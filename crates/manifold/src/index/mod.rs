//! The transactional index contract.
//!
//! Contract:
//! - `insert`/`remove` either fully apply or leave the index untouched.
//! - The batch skeleton removes olds, then adds news, then fires the
//!   `after_update` hook; on failure it replays inverse primitives for the
//!   already-applied steps in reverse order.
//! - A failure during rollback itself means `insert`/`remove` were not true
//!   inverses; the index can no longer vouch for its contents and the
//!   process traps.

pub mod aggregate;
pub mod grouping;
pub mod partition;
pub mod sorted;
pub mod unique;

pub use aggregate::{CountIndex, FoldIndex, GroupAggregateIndex};
pub use grouping::{GroupIndex, ManyToOneIndex};
pub use partition::{
    CachedPartition, IdPartition, PartitionRead, SortedPartition, UncachedPartition,
};
pub use sorted::SortedGroupIndex;
pub use unique::{FastUniqueIndex, UniqueIndex, UniqueRead};

use crate::{
    obs::sink::{MetricsEvent, record},
    types::{Change, Keyed},
};
use derive_more::{Deref, DerefMut};
use std::rc::Rc;
use thiserror::Error as ThisError;

///
/// IndexError
///
/// Contract violation inside one index's insert/remove/validate step.
/// Raising it guarantees the throwing index has made no net change; the
/// orchestrator additionally rolls back earlier indices and the store.
///

#[derive(Debug, ThisError)]
pub enum IndexError {
    #[error("duplicate key {key}: already mapped to record {existing}")]
    DuplicateKey { key: String, existing: u64 },

    #[error("key {key} is already claimed by record {existing}")]
    OccupiedKey { key: String, existing: u64 },

    #[error(
        "comparator order conflict: record {incoming} compares equal to distinct record {existing} \
         (comparator is not consistent with equality)"
    )]
    OrderConflict { incoming: u64, existing: u64 },

    #[error("no index entry for record {id} during remove")]
    MissingEntry { id: u64 },

    #[error("stale previous value under key {key}: expected {expected:?}, found {found:?}")]
    StalePrevious {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error(
        "record {id} derives key {key} but is already indexed under {existing}: \
         the key function is not stable for this record"
    )]
    UnstableKey {
        id: u64,
        key: String,
        existing: String,
    },
}

///
/// CacheIndex
///
/// The primitive index contract: implement `insert` and `remove` (each
/// all-or-nothing for a single record) and optionally `after_update`, which
/// runs once per batch after all primitives succeeded. The shared batch
/// skeleton supplies transactional behavior on top.
///

pub trait CacheIndex<R: Keyed> {
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError>;

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError>;

    /// Hook fired once per successfully applied batch. Aggregation indices
    /// use it to recompute derived values only for groups actually touched.
    fn after_update(&mut self) {}
}

///
/// ApplyChanges
///
/// Object-safe transactional entry point the orchestrator drives. The
/// built-in indices each route it through the shared batch skeleton;
/// indices with their own update strategy (the fast unique index, the
/// sorted partition) implement it directly. Caller-supplied `CacheIndex`
/// types get it by wrapping in [`Batched`].
///

pub trait ApplyChanges<R: Keyed> {
    /// Apply a batch of changes, fully or not at all.
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError>;
}

///
/// Batched
///
/// Adapter running any `CacheIndex` through the shared batch skeleton.
/// `register_index` wraps caller-supplied indices in it; the wrapper
/// derefs to the inner index for reads.
///

#[derive(Debug, Deref, DerefMut)]
pub struct Batched<I>(I);

impl<I> Batched<I> {
    pub const fn new(index: I) -> Self {
        Self(index)
    }

    pub fn into_inner(self) -> I {
        self.0
    }
}

impl<R: Keyed, I: CacheIndex<R>> ApplyChanges<R> for Batched<I> {
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(&mut self.0, changes)
    }
}

/// One applied primitive, recorded so it can be undone by its inverse.
enum Step<'a, R> {
    Removed(&'a Rc<R>),
    Inserted(&'a Rc<R>),
}

fn run_steps<'a, R, I>(
    index: &mut I,
    changes: &'a [Change<R>],
    applied: &mut Vec<Step<'a, R>>,
) -> Result<(), IndexError>
where
    R: Keyed,
    I: CacheIndex<R> + ?Sized,
{
    // Phase 1: remove old values.
    for change in changes {
        if change.is_identity() {
            continue;
        }
        if let Some(previous) = change.previous() {
            index.remove(previous)?;
            applied.push(Step::Removed(previous));
        }
    }

    // Phase 2: add new values.
    for change in changes {
        if change.is_identity() {
            continue;
        }
        if let Some(next) = change.next() {
            index.insert(next)?;
            applied.push(Step::Inserted(next));
        }
    }

    Ok(())
}

/// The shared two-phase batch skeleton with reverse-order rollback.
pub(crate) fn apply_batch<R, I>(index: &mut I, changes: &[Change<R>]) -> Result<(), IndexError>
where
    R: Keyed,
    I: CacheIndex<R> + ?Sized,
{
    let mut applied: Vec<Step<'_, R>> = Vec::new();

    match run_steps(index, changes, &mut applied) {
        Ok(()) => {
            let removes = applied
                .iter()
                .filter(|step| matches!(step, Step::Removed(_)))
                .count() as u64;
            let inserts = applied.len() as u64 - removes;
            record(MetricsEvent::IndexDelta { inserts, removes });

            index.after_update();
            Ok(())
        }
        Err(err) => {
            record(MetricsEvent::Rollback {
                steps: applied.len() as u64,
            });

            for step in applied.into_iter().rev() {
                let undone = match step {
                    Step::Removed(record) => index.insert(record),
                    Step::Inserted(record) => index.remove(record),
                };
                if let Err(rollback_err) = undone {
                    panic!("index rollback failed: {rollback_err} (while recovering from: {err})");
                }
            }

            Err(err)
        }
    }
}

///
/// TESTS
///
