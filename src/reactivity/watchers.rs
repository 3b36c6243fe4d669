// ============================================================================
// spark-keyval - Watcher Lists
// Ordered callback lists shared by stores and events
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::types::Subscription;
use crate::primitives::region::on_region_dispose_silent;

pub(crate) type WatchFn<T> = Rc<dyn Fn(&T)>;

/// Watchers in subscription order.
pub(crate) struct Watchers<T> {
    next_id: Cell<u64>,
    list: RefCell<Vec<(u64, WatchFn<T>)>>,
}

impl<T: 'static> Watchers<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            list: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, f: WatchFn<T>) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.list.borrow_mut().push((id, f));
        id
    }

    /// Remove one watcher. The closure is dropped after the list is
    /// released, since dropping it may end other subscriptions on this list.
    pub(crate) fn remove(&self, id: u64) {
        let removed = {
            let mut list = self.list.borrow_mut();
            list.iter()
                .position(|(wid, _)| *wid == id)
                .map(|pos| list.remove(pos))
        };
        drop(removed);
    }

    pub(crate) fn clear(&self) {
        let removed = std::mem::take(&mut *self.list.borrow_mut());
        drop(removed);
    }

    pub(crate) fn len(&self) -> usize {
        self.list.borrow().len()
    }

    /// Call every watcher with `value`.
    ///
    /// The list is snapshotted first, so watchers may subscribe or
    /// unsubscribe while being notified.
    pub(crate) fn notify(&self, value: &T) {
        let snapshot: Vec<WatchFn<T>> = self.list.borrow().iter().map(|(_, f)| f.clone()).collect();
        for watcher in snapshot {
            watcher(value);
        }
    }
}

/// Something that owns a watcher list.
pub(crate) trait HasWatchers<T> {
    fn watchers(&self) -> &Watchers<T>;
}

/// Register `f` on `owner` and hand back a subscription.
///
/// The subscription is also tied to the active region, if any, so disposing
/// the region removes the watcher.
pub(crate) fn subscribe<T, O>(owner: &Rc<O>, f: WatchFn<T>) -> Subscription
where
    T: 'static,
    O: HasWatchers<T> + 'static,
{
    let id = owner.watchers().add(f);
    let weak: Weak<O> = Rc::downgrade(owner);
    let sub = Subscription::new(move || {
        if let Some(owner) = weak.upgrade() {
            owner.watchers().remove(id);
        }
    });

    let sub_clone = sub.clone();
    on_region_dispose_silent(move || sub_clone.unsubscribe());
    sub
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_in_order() {
        let watchers: Watchers<i32> = Watchers::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b"] {
            let log = log.clone();
            watchers.add(Rc::new(move |v: &i32| log.borrow_mut().push(format!("{tag}{v}"))));
        }
        watchers.notify(&1);

        assert_eq!(*log.borrow(), vec!["a1", "b1"]);
    }

    #[test]
    fn remove_by_id() {
        let watchers: Watchers<i32> = Watchers::new();
        let first = watchers.add(Rc::new(|_| {}));
        watchers.add(Rc::new(|_| {}));
        watchers.remove(first);
        assert_eq!(watchers.len(), 1);
        watchers.clear();
        assert_eq!(watchers.len(), 0);
    }
}
