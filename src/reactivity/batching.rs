// ============================================================================
// spark-keyval - Batching
// Group updates into one propagation and run deferred work after it
// ============================================================================
//
// Watchers run synchronously when a store or event fires. Work that must not
// interleave with the current propagation (field writes after a structural
// update, API forwarding, mount signals) is queued with `defer()` and drained
// FIFO when the outermost batch exits.
// ============================================================================

use crate::core::context::with_context;

// =============================================================================
// BATCH
// =============================================================================

/// Run `f` as one propagation.
///
/// Tasks deferred inside `f` run after the outermost batch exits, in the
/// order they were queued. Batches nest; only the outermost one flushes.
///
/// # Example
///
/// ```
/// use spark_keyval::{batch, defer};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let log_clone = log.clone();
/// batch(|| {
///     let inner = log_clone.clone();
///     defer(move || inner.borrow_mut().push("deferred"));
///     log_clone.borrow_mut().push("body");
/// });
///
/// assert_eq!(*log.borrow(), vec!["body", "deferred"]);
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    with_context(|ctx| ctx.enter_batch());

    // Use a guard pattern to ensure we exit the batch even on panic
    struct BatchGuard;

    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let depth = with_context(|ctx| ctx.exit_batch());

            if depth == 0 && !std::thread::panicking() {
                flush_deferred();
            }
        }
    }

    let _guard = BatchGuard;
    f()
}

/// Check if currently inside a batch.
///
/// # Example
///
/// ```
/// use spark_keyval::{batch, is_batching};
///
/// assert!(!is_batching());
/// batch(|| assert!(is_batching()));
/// assert!(!is_batching());
/// ```
pub fn is_batching() -> bool {
    with_context(|ctx| ctx.is_batching())
}

// =============================================================================
// DEFER
// =============================================================================

/// Queue `task` behind the current propagation.
///
/// Outside of any batch or flush the task runs right away, inside its own
/// batch.
pub fn defer(task: impl FnOnce() + 'static) {
    let idle = with_context(|ctx| {
        ctx.push_deferred(Box::new(task));
        !ctx.is_batching() && !ctx.is_flushing()
    });

    if idle {
        flush_deferred();
    }
}

/// Drain the deferred queue, FIFO, until it is empty.
///
/// Each task runs inside its own batch, so anything it defers lands at the
/// back of the same queue. Reentrant calls return immediately; the outer
/// drain picks up the new work.
pub fn flush_deferred() -> usize {
    if with_context(|ctx| ctx.set_flushing(true)) {
        return 0;
    }

    struct FlushGuard;

    impl Drop for FlushGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.set_flushing(false));
        }
    }

    let _guard = FlushGuard;
    let mut ran = 0;
    while let Some(task) = with_context(|ctx| ctx.pop_deferred()) {
        batch(task);
        ran += 1;
    }
    if ran > 0 {
        tracing::trace!(tasks = ran, "flushed deferred tasks");
    }
    ran
}

// =============================================================================
// TICK
// =============================================================================

/// Settle the runtime: drain deferred tasks and pending lazy inits until
/// both queues are empty.
///
/// Collections build their state lazily; `tick()` is the boundary at which
/// every collection declared so far is guaranteed to be built.
///
/// # Example
///
/// ```
/// use spark_keyval::{lazy_init, tick};
///
/// let lazy = lazy_init(|| 7);
/// assert!(!lazy.is_ready());
///
/// tick();
/// assert!(lazy.is_ready());
/// ```
pub fn tick() {
    loop {
        let tasks = flush_deferred();
        let inits = crate::lazy::flush_lazy_inits();
        if tasks == 0 && inits == 0 {
            break;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
