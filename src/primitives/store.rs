// ============================================================================
// spark-keyval - Store Primitive
// Writable and derived reactive cells
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::core::context::with_context;
use crate::core::types::{EqualsFn, Subscription, UnitId};
use crate::primitives::event::Event;
use crate::primitives::region::register_unit;
use crate::reactivity::batching::batch;
use crate::reactivity::equality::equals;
use crate::reactivity::watchers::{subscribe, HasWatchers, WatchFn, Watchers};

// =============================================================================
// STORE INNER
// =============================================================================

/// Internal store state
pub struct StoreInner<T> {
    id: UnitId,

    /// Current value
    value: RefCell<T>,

    /// Value the store was created (or seeded) with, for `reinit()`
    initial: T,

    /// Derived stores only change through their sources
    writable: bool,

    equals: EqualsFn<T>,

    watchers: Watchers<T>,

    /// Subscriptions on the sources a derived store follows
    upstream: RefCell<Vec<Subscription>>,

    /// Sources of `map`/`combine`, so chains survive dropped intermediates
    sources: RefCell<Vec<Rc<dyn Any>>>,
}

impl<T> Drop for StoreInner<T> {
    fn drop(&mut self) {
        for sub in self.upstream.get_mut().drain(..) {
            sub.unsubscribe();
        }
    }
}

impl<T: 'static> HasWatchers<T> for StoreInner<T> {
    fn watchers(&self) -> &Watchers<T> {
        &self.watchers
    }
}

// =============================================================================
// STORE<T> - The public store handle
// =============================================================================

/// A reactive cell holding a value of type T.
///
/// Writable stores are changed with `set`/`update`/`reinit` or by reducers
/// attached with `on`. Derived stores (from `map`/`combine`) follow their
/// sources and reject writes.
///
/// Watchers run synchronously, inside a batch, whenever the value changes
/// according to the store's equality function.
///
/// # Example
///
/// ```
/// use spark_keyval::store;
///
/// let count = store(0);
/// let doubled = count.map(|n| n * 2);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// assert!(!doubled.set(1));
/// ```
pub struct Store<T> {
    inner: Rc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Store<T> {
    /// Create a writable store.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::build(value, equals::<T>, true)
    }

    /// Create a writable store with a custom equality function.
    pub fn with_equals(value: T, equals: EqualsFn<T>) -> Self {
        Self::build(value, equals, true)
    }

    /// Create a read-only store whose value is pushed by the crate.
    pub(crate) fn derived(value: T, equals: EqualsFn<T>) -> Self {
        Self::build(value, equals, false)
    }

    fn build(value: T, equals: EqualsFn<T>, writable: bool) -> Self {
        let id = with_context(|ctx| ctx.next_unit_id());

        // Writable stores pick up seeded initial state from the active region
        let value = match register_unit(id) {
            Some(seeded) if writable => downcast_seed(seeded).unwrap_or(value),
            _ => value,
        };

        Self {
            inner: Rc::new(StoreInner {
                id,
                value: RefCell::new(value.clone()),
                initial: value,
                writable,
                equals,
                watchers: Watchers::new(),
                upstream: RefCell::new(Vec::new()),
                sources: RefCell::new(Vec::new()),
            }),
        }
    }

    fn from_inner(inner: Rc<StoreInner<T>>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    pub fn is_writable(&self) -> bool {
        self.inner.writable
    }

    /// Get the current value (cloning).
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Access the current value with a closure (avoids cloning).
    ///
    /// # Example
    ///
    /// ```
    /// use spark_keyval::store;
    ///
    /// let items = store(vec![1, 2, 3]);
    /// let sum = items.with(|v| v.iter().sum::<i32>());
    /// assert_eq!(sum, 6);
    /// ```
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Set the store's value.
    ///
    /// Returns true if the value changed. Writes to derived stores are
    /// ignored with a warning and return false.
    pub fn set(&self, value: T) -> bool {
        if !self.inner.writable {
            tracing::warn!(unit = self.inner.id.as_u64(), "write to a derived store ignored");
            return false;
        }
        self.write(value)
    }

    /// Update the value in place using a closure.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_keyval::store;
    ///
    /// let count = store(0);
    /// count.update(|n| *n += 1);
    /// assert_eq!(count.get(), 1);
    /// ```
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }

    /// Reset to the value the store was created with.
    pub fn reinit(&self) -> bool {
        self.set(self.inner.initial.clone())
    }

    /// Write without the writable check. Notifies watchers on change.
    pub(crate) fn write(&self, value: T) -> bool {
        let unchanged = {
            let current = self.inner.value.borrow();
            (self.inner.equals)(&current, &value)
        };
        if unchanged {
            return false;
        }

        *self.inner.value.borrow_mut() = value;

        if self.inner.watchers.len() > 0 {
            let snapshot = self.get();
            batch(|| self.inner.watchers.notify(&snapshot));
        }
        true
    }

    /// Watch the value: `f` runs now with the current value, then after
    /// every change.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_keyval::store;
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let name = store(String::from("a"));
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    ///
    /// let seen_clone = seen.clone();
    /// let sub = name.watch(move |v| seen_clone.borrow_mut().push(v.clone()));
    ///
    /// name.set("b".into());
    /// sub.unsubscribe();
    /// name.set("c".into());
    ///
    /// assert_eq!(*seen.borrow(), vec!["a", "b"]);
    /// ```
    pub fn watch(&self, f: impl Fn(&T) + 'static) -> Subscription {
        let f: WatchFn<T> = Rc::new(f);
        f(&self.get());
        subscribe(&self.inner, f)
    }

    /// Like `watch`, without the initial call.
    pub(crate) fn on_change(&self, f: impl Fn(&T) + 'static) -> Subscription {
        subscribe(&self.inner, Rc::new(f))
    }

    /// Recompute this store with `compute` whenever any of `sources`
    /// changes. The subscriptions end when this store is dropped.
    pub(crate) fn follow<S: Clone + 'static>(&self, sources: &[Store<S>], compute: Rc<dyn Fn() -> T>) {
        for source in sources {
            let weak = self.downgrade();
            let compute = compute.clone();
            let sub = source.on_change(move |_| {
                if let Some(target) = weak.upgrade() {
                    target.write(compute());
                }
            });
            self.hold(sub);
        }
    }

    /// Keep `sub` alive for as long as this store, and end it on drop.
    fn hold(&self, sub: Subscription) {
        self.inner.upstream.borrow_mut().push(sub);
    }

    fn keep_source<S: 'static>(&self, source: &Store<S>) {
        let source: Rc<dyn Any> = source.inner.clone();
        self.inner.sources.borrow_mut().push(source);
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    pub(crate) fn downgrade(&self) -> WeakStore<T> {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Derive a read-only store from this one.
    ///
    /// The derived value is always computed from the source's current value,
    /// so a write made by an earlier watcher is never undone by a later one.
    pub fn map<U>(&self, f: impl Fn(&T) -> U + 'static) -> Store<U>
    where
        U: Clone + PartialEq + 'static,
    {
        let derived = Store::derived(self.with(&f), equals::<U>);
        let weak = derived.downgrade();
        let source = self.downgrade();
        let sub = self.on_change(move |_| {
            if let (Some(target), Some(source)) = (weak.upgrade(), source.upgrade()) {
                target.write(source.with(&f));
            }
        });
        derived.hold(sub);
        derived.keep_source(self);
        derived
    }

    /// Attach a reducer: every time `event` fires, the store becomes
    /// `reducer(current, payload)`.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_keyval::{event, store};
    ///
    /// let add = event::<i32>();
    /// let total = store(0);
    /// total.on(&add, |total, n| total + n);
    ///
    /// add.emit(2);
    /// add.emit(3);
    /// assert_eq!(total.get(), 5);
    /// ```
    pub fn on<P: 'static>(
        &self,
        event: &Event<P>,
        reducer: impl Fn(&T, &P) -> T + 'static,
    ) -> Subscription {
        if !self.inner.writable {
            tracing::warn!(unit = self.inner.id.as_u64(), "reducer on a derived store ignored");
            return Subscription::inert();
        }
        let weak = Rc::downgrade(&self.inner);
        event.watch(move |payload| {
            if let Some(inner) = weak.upgrade() {
                let store = Store::from_inner(inner);
                let next = store.with(|current| reducer(current, payload));
                store.write(next);
            }
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("writable", &self.inner.writable)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Non-owning store handle, used where a strong one would form a cycle
/// through the watcher lists.
pub(crate) struct WeakStore<T> {
    inner: Weak<StoreInner<T>>,
}

impl<T> Clone for WeakStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakStore<T> {
    pub(crate) fn upgrade(&self) -> Option<Store<T>> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

/// Convert a seeded JSON value into the store's value type.
fn downcast_seed<T: 'static>(seeded: Value) -> Option<T> {
    let boxed: Box<dyn std::any::Any> = Box::new(seeded);
    boxed.downcast::<T>().ok().map(|value| *value)
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create a writable store.
pub fn store<T: Clone + PartialEq + 'static>(value: T) -> Store<T> {
    Store::new(value)
}

/// Derive a read-only store from two sources.
///
/// # Example
///
/// ```
/// use spark_keyval::{combine, store};
///
/// let a = store(2);
/// let b = store(3);
/// let product = combine(&a, &b, |a, b| a * b);
///
/// a.set(4);
/// assert_eq!(product.get(), 12);
/// ```
pub fn combine<A, B, U>(a: &Store<A>, b: &Store<B>, f: impl Fn(&A, &B) -> U + 'static) -> Store<U>
where
    A: Clone + 'static,
    B: Clone + 'static,
    U: Clone + PartialEq + 'static,
{
    let derived = Store::derived(a.with(|a| b.with(|b| f(a, b))), equals::<U>);

    // Both sources are read through weak handles so the two watcher lists
    // do not keep each other alive.
    let (weak_a, weak_b) = (a.downgrade(), b.downgrade());
    let target = derived.downgrade();
    let recompute = Rc::new(move || {
        if let (Some(target), Some(a), Some(b)) = (target.upgrade(), weak_a.upgrade(), weak_b.upgrade()) {
            target.write(a.with(|a| b.with(|b| f(a, b))));
        }
    });

    let on_a = recompute.clone();
    derived.hold(a.on_change(move |_| on_a()));
    derived.hold(b.on_change(move |_| recompute()));
    derived.keep_source(a);
    derived.keep_source(b);
    derived
}

// =============================================================================
// TESTS
// =============================================================================
