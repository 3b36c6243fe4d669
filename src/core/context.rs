// ============================================================================
// spark-keyval - Runtime Context
// Thread-local state for batching, deferred work and unit identity
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use super::types::UnitId;

/// A unit of work queued behind the current propagation.
pub type DeferredTask = Box<dyn FnOnce()>;

// =============================================================================
// RUNTIME CONTEXT
// =============================================================================

/// Thread-local runtime context holding all global state for propagation.
pub struct RuntimeContext {
    // =========================================================================
    // BATCHING
    // =========================================================================
    /// Current batch depth (for nested batches)
    pub batch_depth: Cell<u32>,

    /// Whether the deferred queue is being drained right now
    pub flushing: Cell<bool>,

    /// Tasks to run once the outermost batch completes, FIFO
    pub deferred: RefCell<VecDeque<DeferredTask>>,

    // =========================================================================
    // IDENTITY
    // =========================================================================
    /// Next unit id to hand out
    pub next_unit_id: Cell<u64>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
            deferred: RefCell::new(VecDeque::new()),
            next_unit_id: Cell::new(1),
        }
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Increment batch depth, returns new depth
    pub fn enter_batch(&self) -> u32 {
        let depth = self.batch_depth.get() + 1;
        self.batch_depth.set(depth);
        depth
    }

    /// Decrement batch depth, returns new depth
    pub fn exit_batch(&self) -> u32 {
        let depth = self.batch_depth.get().saturating_sub(1);
        self.batch_depth.set(depth);
        depth
    }

    pub fn get_batch_depth(&self) -> u32 {
        self.batch_depth.get()
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    /// Set flushing mode, returning previous
    pub fn set_flushing(&self, value: bool) -> bool {
        self.flushing.replace(value)
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Queue a task at the back of the deferred queue
    pub fn push_deferred(&self, task: DeferredTask) {
        self.deferred.borrow_mut().push_back(task);
    }

    /// Pop the oldest deferred task.
    ///
    /// The borrow is released before the caller runs the task, so tasks are
    /// free to queue more work.
    pub fn pop_deferred(&self) -> Option<DeferredTask> {
        self.deferred.borrow_mut().pop_front()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.borrow().len()
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// Allocate a fresh unit id
    pub fn next_unit_id(&self) -> UnitId {
        let id = self.next_unit_id.get();
        self.next_unit_id.set(id + 1);
        UnitId(id)
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    static CONTEXT: RuntimeContext = RuntimeContext::new();
}

/// Access the thread-local runtime context.
///
/// # Example
///
/// ```
/// use spark_keyval::{batch, with_context};
///
/// let depth = batch(|| with_context(|ctx| ctx.get_batch_depth()));
/// assert_eq!(depth, 1);
/// ```
pub fn with_context<R>(f: impl FnOnce(&RuntimeContext) -> R) -> R {
    CONTEXT.with(f)
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Check if currently in a batch
pub fn is_batching() -> bool {
    with_context(|ctx| ctx.is_batching())
}

/// Number of tasks waiting in the deferred queue
pub fn pending_tasks() -> usize {
    with_context(|ctx| ctx.deferred_len())
}

// =============================================================================
// TESTS
// =============================================================================
