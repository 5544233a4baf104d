use std::cell::RefCell;

///
/// OpCounters
///
/// Process-local operation counters. Saturating adds only; counters are
/// diagnostics, never control flow.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpCounters {
    pub mutations_started: u64,
    pub mutations_committed: u64,
    pub changes_applied: u64,
    pub index_inserts: u64,
    pub index_removes: u64,
    pub unique_violations: u64,
    pub rollbacks: u64,
    pub listeners_notified: u64,
}

thread_local! {
    static STATE: RefCell<OpCounters> = RefCell::new(OpCounters::default());
}

pub(crate) fn with_state_mut<T>(f: impl FnOnce(&mut OpCounters) -> T) -> T {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Snapshot the current counters.
#[must_use]
pub fn report() -> OpCounters {
    STATE.with(|state| *state.borrow())
}

/// Reset all counters to zero.
pub fn reset_all() {
    STATE.with(|state| *state.borrow_mut() = OpCounters::default());
}
