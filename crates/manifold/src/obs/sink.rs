//! Metrics sink boundary.
//!
//! Core cache logic MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.

use crate::obs::metrics::{self, OpCounters};
use std::{cell::RefCell, rc::Rc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Rc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent {
    MutationStart {
        op: &'static str,
    },
    MutationCommit {
        op: &'static str,
        changes: u64,
    },
    IndexDelta {
        inserts: u64,
        removes: u64,
    },
    UniqueViolation,
    /// An index or store rollback was replayed for `steps` applied primitives.
    Rollback {
        steps: u64,
    },
    ListenersNotified {
        count: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

/// GlobalMetricsSink
/// Default process-local sink that writes into global counter state.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::MutationStart { .. } => {
                m.mutations_started = m.mutations_started.saturating_add(1);
            }
            MetricsEvent::MutationCommit { changes, .. } => {
                m.mutations_committed = m.mutations_committed.saturating_add(1);
                m.changes_applied = m.changes_applied.saturating_add(changes);
            }
            MetricsEvent::IndexDelta { inserts, removes } => {
                m.index_inserts = m.index_inserts.saturating_add(inserts);
                m.index_removes = m.index_removes.saturating_add(removes);
            }
            MetricsEvent::UniqueViolation => {
                m.unique_violations = m.unique_violations.saturating_add(1);
            }
            MetricsEvent::Rollback { .. } => {
                m.rollbacks = m.rollbacks.saturating_add(1);
            }
            MetricsEvent::ListenersNotified { count } => {
                m.listeners_notified = m.listeners_notified.saturating_add(count);
            }
        });
    }
}

pub(crate) fn record(event: MetricsEvent) {
    let sink = SINK_OVERRIDE.with(|cell| cell.borrow().clone());
    match sink {
        Some(sink) => sink.record(event),
        None => GlobalMetricsSink.record(event),
    }
}

/// Snapshot the current counter state for endpoint/test plumbing.
#[must_use]
pub fn metrics_report() -> OpCounters {
    metrics::report()
}

/// Reset all counter state.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
///
/// The previous override is restored on all exits, including unwind.
pub fn with_metrics_sink<T>(sink: Rc<dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Rc<dyn MetricsSink>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0.take();
            });
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(prev);

    f()
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    struct CountingSink {
        calls: Cell<usize>,
    }

    impl MetricsSink for CountingSink {
        fn record(&self, _: MetricsEvent) {
            self.calls.set(self.calls.get() + 1);
        }
    }

    #[test]
    fn with_metrics_sink_routes_and_restores_nested_overrides() {
        SINK_OVERRIDE.with(|cell| {
            *cell.borrow_mut() = None;
        });

        let outer = Rc::new(CountingSink {
            calls: Cell::new(0),
        });
        let inner = Rc::new(CountingSink {
            calls: Cell::new(0),
        });

        with_metrics_sink(outer.clone(), || {
            record(MetricsEvent::UniqueViolation);
            assert_eq!(outer.calls.get(), 1);

            with_metrics_sink(inner.clone(), || {
                record(MetricsEvent::UniqueViolation);
            });

            // Inner override was restored to outer override.
            record(MetricsEvent::UniqueViolation);
        });

        assert_eq!(outer.calls.get(), 2);
        assert_eq!(inner.calls.get(), 1);

        // Outer override was restored to previous (none).
        SINK_OVERRIDE.with(|cell| {
            assert!(cell.borrow().is_none());
        });
    }

    #[test]
    fn with_metrics_sink_restores_override_on_panic() {
        SINK_OVERRIDE.with(|cell| {
            *cell.borrow_mut() = None;
        });

        let sink = Rc::new(CountingSink {
            calls: Cell::new(0),
        });

        let panicked = catch_unwind(AssertUnwindSafe(|| {
            with_metrics_sink(sink.clone(), || {
                record(MetricsEvent::UniqueViolation);
                panic!("intentional panic for guard test");
            });
        }))
        .is_err();
        assert!(panicked);
        assert_eq!(sink.calls.get(), 1);

        SINK_OVERRIDE.with(|cell| {
            assert!(cell.borrow().is_none());
        });
    }

    #[test]
    fn global_sink_accumulates_counters() {
        metrics_reset_all();

        record(MetricsEvent::MutationStart { op: "add" });
        record(MetricsEvent::IndexDelta {
            inserts: 3,
            removes: 1,
        });
        record(MetricsEvent::MutationCommit {
            op: "add",
            changes: 2,
        });

        let counters = metrics_report();
        assert_eq!(counters.mutations_started, 1);
        assert_eq!(counters.mutations_committed, 1);
        assert_eq!(counters.changes_applied, 2);
        assert_eq!(counters.index_inserts, 3);
        assert_eq!(counters.index_removes, 1);
    }
}
