// ============================================================================
// spark-keyval - Lazy Init
// Deferred construction with a FIFO queue, forced on first access
// ============================================================================
//
// A collection may name itself as the type of one of its own fields. Its
// state machinery can only be built once its definition is complete, so
// construction is queued here and runs either on first access or at the
// next `tick()`, whichever comes first. Forcing one pending init runs every
// init queued before it first, keeping construction order stable.
// ============================================================================

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

// =============================================================================
// QUEUE
// =============================================================================

/// Anything sitting in the init queue.
trait PendingInit {
    fn run_init(&self);
}

thread_local! {
    static QUEUE: RefCell<VecDeque<Weak<dyn PendingInit>>> = const { RefCell::new(VecDeque::new()) };
}

/// Run every queued init, FIFO, including ones queued while flushing.
///
/// Returns the number of inits that actually ran. Inits whose handle was
/// dropped before they ran are discarded.
pub fn flush_lazy_inits() -> usize {
    let mut ran = 0;
    while let Some(next) = QUEUE.with(|q| q.borrow_mut().pop_front()) {
        if let Some(pending) = next.upgrade() {
            pending.run_init();
            ran += 1;
        }
    }
    ran
}

/// Number of inits waiting in the queue.
pub fn pending_lazy_inits() -> usize {
    QUEUE.with(|q| q.borrow().len())
}

// =============================================================================
// LAZY INIT
// =============================================================================

enum LazyState<T> {
    Pending(Box<dyn FnOnce() -> T>),
    Running,
    Ready(T),
}

struct LazyInner<T> {
    state: RefCell<LazyState<T>>,
}

impl<T: 'static> LazyInner<T> {
    /// Run the init if nobody has yet. Returns false if it was not pending.
    fn try_run(&self) -> bool {
        let init = {
            let mut state = self.state.borrow_mut();
            match std::mem::replace(&mut *state, LazyState::Running) {
                LazyState::Pending(init) => init,
                other => {
                    *state = other;
                    return false;
                }
            }
        };

        let value = init();
        *self.state.borrow_mut() = LazyState::Ready(value);
        true
    }
}

impl<T: 'static> PendingInit for LazyInner<T> {
    fn run_init(&self) {
        self.try_run();
    }
}

/// A value built on first access or at the next `tick()`.
///
/// # Example
///
/// ```
/// use spark_keyval::lazy_init;
///
/// let first = lazy_init(|| String::from("first"));
/// let second = lazy_init(|| String::from("second"));
///
/// // Forcing the second one builds the first one too
/// assert_eq!(second.force().as_deref(), Some("second"));
/// assert!(first.is_ready());
/// ```
pub struct LazyInit<T> {
    inner: Rc<LazyInner<T>>,
}

impl<T> Clone for LazyInit<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> LazyInit<T> {
    /// Queue `init` to run later.
    pub fn new(init: impl FnOnce() -> T + 'static) -> Self {
        let inner = Rc::new(LazyInner {
            state: RefCell::new(LazyState::Pending(Box::new(init))),
        });
        let pending: Rc<dyn PendingInit> = inner.clone();
        QUEUE.with(|q| q.borrow_mut().push_back(Rc::downgrade(&pending)));
        Self { inner }
    }

    /// Get the value, building it (and everything queued before it) first
    /// if needed.
    ///
    /// Returns None when called from inside its own init.
    pub fn force(&self) -> Option<T> {
        if let Some(value) = self.peek() {
            return Some(value);
        }
        if self.is_running() {
            return None;
        }

        flush_lazy_inits();
        if self.inner.try_run() {
            tracing::trace!("lazy init forced out of queue order");
        }
        self.peek()
    }

    /// The value, if it has been built.
    pub fn peek(&self) -> Option<T> {
        match &*self.inner.state.borrow() {
            LazyState::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.inner.state.borrow(), LazyState::Ready(_))
    }

    fn is_running(&self) -> bool {
        matches!(&*self.inner.state.borrow(), LazyState::Running)
    }
}

impl<T> fmt::Debug for LazyInit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.borrow() {
            LazyState::Pending(_) => "pending",
            LazyState::Running => "running",
            LazyState::Ready(_) => "ready",
        };
        f.debug_struct("LazyInit").field("state", &state).finish()
    }
}

/// Queue `init` to run on first access or at the next `tick()`.
pub fn lazy_init<T: Clone + 'static>(init: impl FnOnce() -> T + 'static) -> LazyInit<T> {
    LazyInit::new(init)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn init_runs_exactly_once() {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let lazy = lazy_init(move || {
            runs_clone.set(runs_clone.get() + 1);
            5
        });

        assert_eq!(lazy.force(), Some(5));
        assert_eq!(lazy.force(), Some(5));
        flush_lazy_inits();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn forcing_runs_earlier_inits_first() {
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        let _a = lazy_init(move || o.borrow_mut().push("a"));
        let o = order.clone();
        let b = lazy_init(move || o.borrow_mut().push("b"));
        let o = order.clone();
        let _c = lazy_init(move || o.borrow_mut().push("c"));

        b.force();
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn reentrant_force_yields_none() {
        let slot: Rc<RefCell<Option<LazyInit<Option<i32>>>>> = Rc::new(RefCell::new(None));

        let slot_clone = slot.clone();
        let lazy = lazy_init(move || {
            let me = slot_clone.borrow().clone();
            me.and_then(|me| me.force()).flatten()
        });
        *slot.borrow_mut() = Some(lazy.clone());

        assert_eq!(lazy.force(), Some(None));
        slot.borrow_mut().take();
    }

    #[test]
    fn dropped_inits_are_skipped() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        drop(lazy_init(move || ran_clone.set(true)));

        flush_lazy_inits();
        assert!(!ran.get());
    }

    #[test]
    fn tick_flushes_queue() {
        let lazy = lazy_init(|| 1);
        assert!(!lazy.is_ready());
        crate::tick();
        assert!(lazy.is_ready());
        assert_eq!(pending_lazy_inits(), 0);
    }
}
