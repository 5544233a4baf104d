use crate::types::{Id, Keyed};
use std::rc::Rc;
use thiserror::Error as ThisError;

///
/// ChangeError
///
/// Violations of the change construction contract.
/// These are programming errors on the caller's side, surfaced before any
/// state is touched.
///

#[derive(Debug, ThisError)]
pub enum ChangeError {
    #[error("change must carry at least one side")]
    Empty,

    #[error("update sides carry different identities: previous={previous}, next={next}")]
    IdentityMismatch { previous: u64, next: u64 },
}

///
/// Change
///
/// A (previous, next) pair describing one record's transition:
/// add (no previous), delete (no next), update (both present, same identity),
/// or identity (both sides the same canonical instance, a no-op).
///
/// Constructed only through the named factories, which enforce the
/// at-least-one-side and matching-identity contracts.
///

#[derive(Debug)]
pub struct Change<R> {
    previous: Option<Rc<R>>,
    next: Option<Rc<R>>,
}

impl<R> Clone for Change<R> {
    fn clone(&self) -> Self {
        Self {
            previous: self.previous.clone(),
            next: self.next.clone(),
        }
    }
}

impl<R: Keyed> Change<R> {
    /// Build a change from optional sides, enforcing the construction contract.
    pub fn new(previous: Option<Rc<R>>, next: Option<Rc<R>>) -> Result<Self, ChangeError> {
        match (previous, next) {
            (None, None) => Err(ChangeError::Empty),
            (Some(previous), Some(next)) => Self::update(previous, next),
            (previous, next) => Ok(Self { previous, next }),
        }
    }

    /// An addition: no previous value.
    #[must_use]
    pub const fn add(next: Rc<R>) -> Self {
        Self {
            previous: None,
            next: Some(next),
        }
    }

    /// A deletion: no next value.
    #[must_use]
    pub const fn delete(previous: Rc<R>) -> Self {
        Self {
            previous: Some(previous),
            next: None,
        }
    }

    /// A replacement. Both sides must carry the same identity.
    pub fn update(previous: Rc<R>, next: Rc<R>) -> Result<Self, ChangeError> {
        if previous.id() != next.id() {
            return Err(ChangeError::IdentityMismatch {
                previous: previous.id().value(),
                next: next.id().value(),
            });
        }

        Ok(Self {
            previous: Some(previous),
            next: Some(next),
        })
    }

    /// A no-op transition: both sides are the same canonical instance.
    #[must_use]
    pub fn identity(value: Rc<R>) -> Self {
        Self {
            previous: Some(value.clone()),
            next: Some(value),
        }
    }

    /// The inverse transition, used for rollback.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            previous: self.next.clone(),
            next: self.previous.clone(),
        }
    }

    /// Identity of the record this change describes.
    ///
    /// Both sides carry the same identity by construction, so either works.
    #[must_use]
    pub fn id(&self) -> Id<R> {
        self.previous
            .as_ref()
            .or(self.next.as_ref())
            .map(|record| record.id())
            .unwrap_or_else(|| unreachable!("change invariant violated: both sides absent"))
    }

    #[must_use]
    pub const fn previous(&self) -> Option<&Rc<R>> {
        self.previous.as_ref()
    }

    #[must_use]
    pub const fn next(&self) -> Option<&Rc<R>> {
        self.next.as_ref()
    }

    #[must_use]
    pub const fn is_add(&self) -> bool {
        self.previous.is_none() && self.next.is_some()
    }

    #[must_use]
    pub const fn is_delete(&self) -> bool {
        self.previous.is_some() && self.next.is_none()
    }

    #[must_use]
    pub const fn is_update(&self) -> bool {
        self.previous.is_some() && self.next.is_some()
    }

    /// Both sides are the same canonical instance (pointer identity).
    #[must_use]
    pub fn is_identity(&self) -> bool {
        match (&self.previous, &self.next) {
            (Some(previous), Some(next)) => Rc::ptr_eq(previous, next),
            _ => false,
        }
    }
}

///
/// TESTS
///
