use crate::types::{Id, Keyed};
use derive_more::Deref;
use std::{collections::HashMap, rc::Rc};

///
/// Snapshot
///
/// Immutable point-in-time view of the store's identity-to-record mapping.
/// Cloning is cheap; the underlying map is shared. The store memoizes the
/// most recent snapshot and invalidates it lazily on the next mutation.
///

#[derive(Debug, Deref)]
pub struct Snapshot<R: Keyed>(Rc<HashMap<Id<R>, Rc<R>>>);

impl<R: Keyed> Snapshot<R> {
    pub(crate) fn new(records: HashMap<Id<R>, Rc<R>>) -> Self {
        Self(Rc::new(records))
    }

    /// Two snapshots share the same underlying map.
    #[must_use]
    pub fn shares(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<R: Keyed> Clone for Snapshot<R> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
