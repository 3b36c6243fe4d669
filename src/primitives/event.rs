// ============================================================================
// spark-keyval - Event Primitive
// Push-based triggers
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::core::context::with_context;
use crate::core::types::{Subscription, UnitId};
use crate::primitives::region::register_unit;
use crate::reactivity::batching::batch;
use crate::reactivity::watchers::{subscribe, HasWatchers, WatchFn, Watchers};

// =============================================================================
// EVENT INNER
// =============================================================================

/// Internal event state
pub struct EventInner<T> {
    id: UnitId,

    /// Derived events (map/filter) fire only through their source
    callable: bool,

    watchers: Watchers<T>,

    /// Subscription on the source of a derived event
    upstream: RefCell<Option<Subscription>>,
}

impl<T> Drop for EventInner<T> {
    fn drop(&mut self) {
        if let Some(sub) = self.upstream.get_mut().take() {
            sub.unsubscribe();
        }
    }
}

impl<T: 'static> HasWatchers<T> for EventInner<T> {
    fn watchers(&self) -> &Watchers<T> {
        &self.watchers
    }
}

// =============================================================================
// EVENT<T> - The public event handle
// =============================================================================

/// A push-based trigger carrying a payload of type T.
///
/// # Example
///
/// ```
/// use spark_keyval::event;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let clicked = event::<u32>();
/// let evens = clicked.filter(|n| n % 2 == 0);
/// let last = Rc::new(Cell::new(0));
///
/// let last_clone = last.clone();
/// evens.watch(move |n| last_clone.set(*n));
///
/// clicked.emit(3);
/// clicked.emit(4);
/// assert_eq!(last.get(), 4);
/// ```
pub struct Event<T> {
    inner: Rc<EventInner<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Event<T> {
    /// Create a callable event.
    pub fn new() -> Self {
        Self::build(true)
    }

    fn build(callable: bool) -> Self {
        let id = with_context(|ctx| ctx.next_unit_id());
        register_unit(id);
        Self {
            inner: Rc::new(EventInner {
                id,
                callable,
                watchers: Watchers::new(),
                upstream: RefCell::new(None),
            }),
        }
    }

    fn from_inner(inner: Rc<EventInner<T>>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    /// Whether `emit` is allowed (false for derived events).
    pub fn is_callable(&self) -> bool {
        self.inner.callable
    }

    /// Fire the event. Ignored with a warning on derived events.
    pub fn emit(&self, payload: T) {
        if !self.inner.callable {
            tracing::warn!(unit = self.inner.id.as_u64(), "emit on a derived event ignored");
            return;
        }
        self.fire(payload);
    }

    pub(crate) fn fire(&self, payload: T) {
        batch(|| self.inner.watchers.notify(&payload));
    }

    /// Run `f` every time the event fires.
    pub fn watch(&self, f: impl Fn(&T) + 'static) -> Subscription {
        let f: WatchFn<T> = Rc::new(f);
        subscribe(&self.inner, f)
    }

    /// Derived event carrying `f(payload)`.
    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Event<U> {
        let derived = Event::<U>::build(false);
        let weak = Rc::downgrade(&derived.inner);
        let sub = self.watch(move |payload| {
            if let Some(inner) = weak.upgrade() {
                Event::from_inner(inner).fire(f(payload));
            }
        });
        *derived.inner.upstream.borrow_mut() = Some(sub);
        derived
    }

    /// Derived event that only fires when `predicate` accepts the payload.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Event<T>
    where
        T: Clone,
    {
        let derived = Event::<T>::build(false);
        let weak = Rc::downgrade(&derived.inner);
        let sub = self.watch(move |payload| {
            if predicate(payload) {
                if let Some(inner) = weak.upgrade() {
                    Event::from_inner(inner).fire(payload.clone());
                }
            }
        });
        *derived.inner.upstream.borrow_mut() = Some(sub);
        derived
    }

    /// Callable event that transforms its payload and fires this one.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_keyval::event;
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let log = event::<String>();
    /// let log_number = log.prepend(|n: &i32| format!("#{n}"));
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    ///
    /// let seen_clone = seen.clone();
    /// log.watch(move |s| seen_clone.borrow_mut().push(s.clone()));
    ///
    /// log_number.emit(7);
    /// assert_eq!(*seen.borrow(), vec!["#7"]);
    /// ```
    pub fn prepend<U: 'static>(&self, f: impl Fn(&U) -> T + 'static) -> Event<U> {
        let before = Event::<U>::new();
        let target = self.clone();
        before.watch(move |payload| target.fire(f(payload)));
        before
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }
}

impl<T: 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("callable", &self.inner.callable)
            .finish()
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create a callable event.
pub fn event<T: 'static>() -> Event<T> {
    Event::new()
}

// =============================================================================
// TESTS
// =============================================================================
