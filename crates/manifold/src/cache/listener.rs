use crate::types::{Change, Keyed};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

///
/// ListenerId
///
/// Opaque handle for unsubscribing a registered listener.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

///
/// Listenable
///
/// Subscription surface for change notifications. Listeners are only ever
/// invoked after a mutation has fully committed across the store and every
/// index, so every read they perform observes consistent state. Mutating
/// from inside a listener is rejected as reentrancy.
///

pub trait Listenable<R: Keyed> {
    /// Subscribe to records entering the cache.
    fn on_added(&self, listener: impl Fn(&Rc<R>) + 'static) -> ListenerId;

    /// Subscribe to records leaving the cache. The listener receives the
    /// last committed instance.
    fn on_removed(&self, listener: impl Fn(&Rc<R>) + 'static) -> ListenerId;

    /// Subscribe to replacements, receiving (previous, next).
    fn on_changed(&self, listener: impl Fn(&Rc<R>, &Rc<R>) + 'static) -> ListenerId;

    /// Subscribe to whole committed batches.
    fn on_batch(&self, listener: impl Fn(&[Change<R>]) + 'static) -> ListenerId;

    /// Drop a subscription. Returns whether the id was still registered.
    fn unsubscribe(&self, id: ListenerId) -> bool;

    /// A filtered view of this subscription surface.
    fn project(&self, filter: impl Fn(&R) -> bool + 'static) -> Projection<'_, R, Self>
    where
        Self: Sized,
    {
        Projection {
            source: self,
            filter: Rc::new(filter),
        }
    }
}

///
/// Projection
///
/// Filtered view over a [`Listenable`]: events are remapped relative to the
/// filtered set, so an update crossing into the filter surfaces as an entry
/// and one crossing out surfaces as an exit. Each projected subscription
/// registers up to two underlying listeners; the returned ids unsubscribe
/// them individually.
///

pub struct Projection<'a, R: Keyed, L: Listenable<R>> {
    source: &'a L,
    filter: Rc<dyn Fn(&R) -> bool>,
}

impl<R: Keyed + 'static, L: Listenable<R>> Projection<'_, R, L> {
    /// Fires when a record enters the filtered set: a matching add, or an
    /// update whose next side newly matches.
    pub fn on_entered(&self, listener: impl Fn(&Rc<R>) + 'static) -> Vec<ListenerId> {
        let listener = Rc::new(listener);

        let filter = self.filter.clone();
        let on_add = {
            let listener = listener.clone();
            move |record: &Rc<R>| {
                if filter(record) {
                    listener(record);
                }
            }
        };

        let filter = self.filter.clone();
        let on_change = move |previous: &Rc<R>, next: &Rc<R>| {
            if !filter(previous) && filter(next) {
                listener(next);
            }
        };

        vec![
            self.source.on_added(on_add),
            self.source.on_changed(on_change),
        ]
    }

    /// Fires when a record leaves the filtered set: a matching delete, or an
    /// update whose next side no longer matches.
    pub fn on_left(&self, listener: impl Fn(&Rc<R>) + 'static) -> Vec<ListenerId> {
        let listener = Rc::new(listener);

        let filter = self.filter.clone();
        let on_remove = {
            let listener = listener.clone();
            move |record: &Rc<R>| {
                if filter(record) {
                    listener(record);
                }
            }
        };

        let filter = self.filter.clone();
        let on_change = move |previous: &Rc<R>, next: &Rc<R>| {
            if filter(previous) && !filter(next) {
                listener(previous);
            }
        };

        vec![
            self.source.on_removed(on_remove),
            self.source.on_changed(on_change),
        ]
    }

    /// Fires for updates where both sides match the filter.
    pub fn on_changed_within(
        &self,
        listener: impl Fn(&Rc<R>, &Rc<R>) + 'static,
    ) -> Vec<ListenerId> {
        let filter = self.filter.clone();
        let on_change = move |previous: &Rc<R>, next: &Rc<R>| {
            if filter(previous) && filter(next) {
                listener(previous, next);
            }
        };

        vec![self.source.on_changed(on_change)]
    }
}

///
/// ListenerRegistry
///
/// Per-kind listener lists. Notification snapshots each list first, so a
/// listener may subscribe or unsubscribe without perturbing the delivery it
/// is part of; such edits take effect from the next mutation on.
///

pub(crate) struct ListenerRegistry<R> {
    next_id: Cell<u64>,
    added: RefCell<Vec<(ListenerId, Rc<dyn Fn(&Rc<R>)>)>>,
    removed: RefCell<Vec<(ListenerId, Rc<dyn Fn(&Rc<R>)>)>>,
    changed: RefCell<Vec<(ListenerId, Rc<dyn Fn(&Rc<R>, &Rc<R>)>)>>,
    batch: RefCell<Vec<(ListenerId, Rc<dyn Fn(&[Change<R>])>)>>,
}

impl<R: Keyed> ListenerRegistry<R> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            added: RefCell::new(Vec::new()),
            removed: RefCell::new(Vec::new()),
            changed: RefCell::new(Vec::new()),
            batch: RefCell::new(Vec::new()),
        }
    }

    fn fresh_id(&self) -> ListenerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        ListenerId(id)
    }

    pub(crate) fn subscribe_added(&self, listener: Rc<dyn Fn(&Rc<R>)>) -> ListenerId {
        let id = self.fresh_id();
        self.added.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn subscribe_removed(&self, listener: Rc<dyn Fn(&Rc<R>)>) -> ListenerId {
        let id = self.fresh_id();
        self.removed.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn subscribe_changed(&self, listener: Rc<dyn Fn(&Rc<R>, &Rc<R>)>) -> ListenerId {
        let id = self.fresh_id();
        self.changed.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn subscribe_batch(&self, listener: Rc<dyn Fn(&[Change<R>])>) -> ListenerId {
        let id = self.fresh_id();
        self.batch.borrow_mut().push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        let lists = [&self.added, &self.removed];
        for list in lists {
            let mut list = list.borrow_mut();
            if let Some(pos) = list.iter().position(|(held, _)| *held == id) {
                list.remove(pos);
                return true;
            }
        }

        let mut changed = self.changed.borrow_mut();
        if let Some(pos) = changed.iter().position(|(held, _)| *held == id) {
            changed.remove(pos);
            return true;
        }
        drop(changed);

        let mut batch = self.batch.borrow_mut();
        if let Some(pos) = batch.iter().position(|(held, _)| *held == id) {
            batch.remove(pos);
            return true;
        }

        false
    }

    /// Deliver a committed batch, returning the number of listener calls.
    pub(crate) fn notify(&self, changes: &[Change<R>]) -> u64 {
        let added: Vec<_> = self
            .added
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        let removed: Vec<_> = self
            .removed
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        let changed: Vec<_> = self
            .changed
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        let batch: Vec<_> = self
            .batch
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        let mut calls: u64 = 0;

        for change in changes {
            if change.is_identity() {
                continue;
            }
            match (change.previous(), change.next()) {
                (None, Some(next)) => {
                    for listener in &added {
                        listener(next);
                        calls += 1;
                    }
                }
                (Some(previous), None) => {
                    for listener in &removed {
                        listener(previous);
                        calls += 1;
                    }
                }
                (Some(previous), Some(next)) => {
                    for listener in &changed {
                        listener(previous, next);
                        calls += 1;
                    }
                }
                (None, None) => {}
            }
        }

        if !changes.is_empty() {
            for listener in &batch {
                listener(changes);
                calls += 1;
            }
        }

        calls
    }
}

///
/// TESTS
///
