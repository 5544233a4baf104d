use crate::{
    index::{PartitionRead, UniqueRead},
    types::{Id, Keyed},
};
use std::{cell::RefCell, fmt, rc::Rc};

///
/// IndexHandle
///
/// Typed read handle to a registered index. The index itself stays owned by
/// the cache; the handle borrows it per call, so holding a handle across a
/// mutation is fine but reading from inside one is not.
///

pub struct IndexHandle<I> {
    inner: Rc<RefCell<I>>,
}

impl<I> IndexHandle<I> {
    pub(crate) fn new(inner: Rc<RefCell<I>>) -> Self {
        Self { inner }
    }

    /// Run a read closure against the index.
    pub fn with<T>(&self, f: impl FnOnce(&I) -> T) -> T {
        f(&self.inner.borrow())
    }
}

impl<I> Clone for IndexHandle<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I> fmt::Debug for IndexHandle<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle").finish_non_exhaustive()
    }
}

///
/// UniqueHandle
///
/// Implementation-erased handle to a unique mapping; the registration hint
/// decides which implementation sits behind it.
///

pub struct UniqueHandle<K, R: Keyed> {
    inner: Rc<RefCell<dyn UniqueRead<K, R>>>,
}

impl<K, R: Keyed> UniqueHandle<K, R> {
    pub(crate) fn new(inner: Rc<RefCell<dyn UniqueRead<K, R>>>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<Rc<R>> {
        self.inner.borrow().get(key)
    }

    #[must_use]
    pub fn id_for(&self, key: &K) -> Option<Id<R>> {
        self.inner.borrow().id_for(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.borrow().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl<K, R: Keyed> Clone for UniqueHandle<K, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, R: Keyed> fmt::Debug for UniqueHandle<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueHandle").finish_non_exhaustive()
    }
}

///
/// PartitionHandle
///
/// Implementation-erased handle to a predicate partition.
///

pub struct PartitionHandle<R: Keyed> {
    inner: Rc<RefCell<dyn PartitionRead<R>>>,
}

impl<R: Keyed> PartitionHandle<R> {
    pub(crate) fn new(inner: Rc<RefCell<dyn PartitionRead<R>>>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn matching(&self) -> Vec<Rc<R>> {
        self.inner.borrow().matching()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.borrow().count()
    }

    #[must_use]
    pub fn contains(&self, id: Id<R>) -> bool {
        self.inner.borrow().contains(id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl<R: Keyed> Clone for PartitionHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Keyed> fmt::Debug for PartitionHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionHandle").finish_non_exhaustive()
    }
}
