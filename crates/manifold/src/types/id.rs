use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

///
/// Id
///
/// Typed identity key for stored records.
/// Carries the record kind as a phantom parameter so that keys for different
/// record types cannot be confused, without changing the underlying key type.
///

#[repr(transparent)]
pub struct Id<K> {
    value: u64,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Id<K> {
    /// Construct a typed identity from the raw key value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying key value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }
}

// Manual impls so that `Id<K>` is copyable and comparable for every `K`,
// not only for kinds that happen to implement the same traits.
#[allow(clippy::expl_impl_clone_on_copy)]
impl<K> Clone for Id<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Id<K> {}

impl<K> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<K> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<K> Eq for Id<K> {}

impl<K> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<K> Hash for Id<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<K> Ord for Id<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<K> PartialOrd for Id<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> From<u64> for Id<K> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

///
/// Keyed
///
/// Capability of identity-bearing records: every record exposes exactly one
/// stable [`Id`] for its lifetime. The identity must not change across
/// replacements of the value held under it.
///

pub trait Keyed: Sized {
    fn id(&self) -> Id<Self>;
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Car;
    struct Driver;

    #[test]
    fn ids_compare_by_value() {
        let a: Id<Car> = Id::new(1);
        let b: Id<Car> = Id::new(1);
        let c: Id<Car> = Id::new(2);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn ids_hash_by_value() {
        let mut set = HashSet::new();
        set.insert(Id::<Car>::new(7));
        set.insert(Id::<Car>::new(7));
        set.insert(Id::<Car>::new(8));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ids_are_kind_scoped() {
        // Compile-time property: Id<Car> and Id<Driver> are distinct types.
        fn takes_car(_: Id<Car>) {}
        takes_car(Id::new(1));

        let _driver: Id<Driver> = Id::new(1);
    }

    #[test]
    fn id_display_matches_value() {
        let id: Id<Car> = Id::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{id:?}"), "Id(42)");
    }
}
