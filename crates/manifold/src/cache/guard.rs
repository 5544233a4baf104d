use crate::error::CacheError;
use std::cell::Cell;

///
/// UpdateGuard
///
/// Marks a mutation in progress for the duration of one pipeline run.
/// Entering while the slot is already held means a listener (or other
/// callback) tried to mutate from inside the pipeline; that attempt is
/// rejected instead of corrupting the half-applied state. The slot is
/// released on all exits, including unwind.
///

#[derive(Debug)]
pub(crate) struct UpdateGuard<'a> {
    slot: &'a Cell<bool>,
}

impl<'a> UpdateGuard<'a> {
    pub(crate) fn begin(slot: &'a Cell<bool>, op: &'static str) -> Result<Self, CacheError> {
        if slot.replace(true) {
            return Err(CacheError::Reentrancy { op });
        }
        Ok(Self { slot })
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(false);
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_is_rejected_while_held() {
        let slot = Cell::new(false);

        let guard = UpdateGuard::begin(&slot, "add").unwrap();
        let err = UpdateGuard::begin(&slot, "delete").unwrap_err();
        assert!(matches!(err, CacheError::Reentrancy { op: "delete" }));

        drop(guard);
        assert!(!slot.get());
        let _reacquired = UpdateGuard::begin(&slot, "add").unwrap();
    }
}
