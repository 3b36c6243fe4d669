// ============================================================================
// spark-keyval - Region
//
// Hierarchical disposal of everything created while a region is active.
// ============================================================================
//
// A Region owns:
// - cleanup callbacks (subscriptions, nested collections, user hooks)
// - child regions, disposed together with their parent
// - an ordered link list of every unit and child region created inside it,
//   which is what factory paths index into
//
// Spawned instances run their model inside a detached region; disposing that
// region is the cancellation primitive for the whole instance.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::core::types::{CleanupFn, UnitId};
use crate::model::factory_paths::SeedHooks;

// =============================================================================
// THREAD-LOCAL REGION STATE
// =============================================================================

thread_local! {
    /// Currently active region (if any)
    static ACTIVE_REGION: RefCell<Option<Rc<RegionInner>>> = const { RefCell::new(None) };
}

fn get_active_region() -> Option<Rc<RegionInner>> {
    ACTIVE_REGION.with(|r| r.borrow().clone())
}

fn set_active_region(region: Option<Rc<RegionInner>>) -> Option<Rc<RegionInner>> {
    ACTIVE_REGION.with(|r| r.replace(region))
}

/// Run `f` with `region` active, restoring the previous region afterwards
/// (even on panic).
fn with_active_region<R>(region: Option<Rc<RegionInner>>, f: impl FnOnce() -> R) -> R {
    struct RestoreGuard {
        prev: Option<Option<Rc<RegionInner>>>,
    }

    impl Drop for RestoreGuard {
        fn drop(&mut self) {
            if let Some(prev) = self.prev.take() {
                set_active_region(prev);
            }
        }
    }

    let _guard = RestoreGuard {
        prev: Some(set_active_region(region)),
    };
    f()
}

// =============================================================================
// LINKS
// =============================================================================

/// One entry in a region's creation-ordered link list.
#[derive(Clone)]
pub(crate) enum RegionLink {
    Unit(UnitId),
    Region(Weak<RegionInner>),
}

// =============================================================================
// REGION INNER
// =============================================================================

/// Internal region implementation
pub struct RegionInner {
    /// Whether the region is still active (not disposed)
    active: Cell<bool>,

    /// Cleanup functions to run on dispose
    cleanups: RefCell<Vec<CleanupFn>>,

    /// Parent region (for nested regions)
    parent: RefCell<Option<Weak<RegionInner>>>,

    /// Child regions
    children: RefCell<Vec<Rc<RegionInner>>>,

    /// Units and child regions in creation order
    links: RefCell<Vec<RegionLink>>,

    /// Initial-state overrides consulted as units are created
    seed: RefCell<Option<SeedHooks>>,

    /// Self-reference for handing out handles
    self_weak: RefCell<Weak<RegionInner>>,
}

impl RegionInner {
    fn new(detached: bool) -> Rc<Self> {
        let parent = if detached { None } else { get_active_region() };

        let region = Rc::new(Self {
            active: Cell::new(true),
            cleanups: RefCell::new(Vec::new()),
            parent: RefCell::new(parent.as_ref().map(Rc::downgrade)),
            children: RefCell::new(Vec::new()),
            links: RefCell::new(Vec::new()),
            seed: RefCell::new(None),
            self_weak: RefCell::new(Weak::new()),
        });

        *region.self_weak.borrow_mut() = Rc::downgrade(&region);

        if let Some(ref parent_region) = parent {
            let idx = {
                let mut links = parent_region.links.borrow_mut();
                links.push(RegionLink::Region(Rc::downgrade(&region)));
                links.len() - 1
            };
            let nested = parent_region
                .seed
                .borrow()
                .as_ref()
                .and_then(|hooks| hooks.for_region(idx));
            *region.seed.borrow_mut() = nested;
            parent_region.children.borrow_mut().push(region.clone());
        }

        region
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn within<R>(&self, f: impl FnOnce() -> R) -> R {
        with_active_region(self.self_weak.borrow().upgrade(), f)
    }

    pub fn dispose(&self) {
        if !self.active.get() {
            return;
        }
        self.active.set(false);

        // Run cleanups (in reverse order for proper nesting)
        let cleanups: Vec<_> = self.cleanups.borrow_mut().drain(..).collect();
        for cleanup in cleanups.into_iter().rev() {
            // A failing cleanup must not stop the rest from running
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(cleanup));
        }

        let children: Vec<_> = self.children.borrow_mut().drain(..).collect();
        for child in children {
            child.dispose();
        }

        // Remove from parent's child list
        if let Some(parent) = self.parent.borrow().as_ref().and_then(|w| w.upgrade()) {
            if let Some(self_rc) = self.self_weak.borrow().upgrade() {
                parent.children.borrow_mut().retain(|c| !Rc::ptr_eq(c, &self_rc));
            }
        }

        self.links.borrow_mut().clear();
        self.seed.borrow_mut().take();
    }

    fn add_cleanup(&self, cleanup: CleanupFn) {
        self.cleanups.borrow_mut().push(cleanup);
    }

    fn cleanup_count(&self) -> usize {
        self.cleanups.borrow().len()
    }
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        if self.active.get() {
            self.dispose();
        }
    }
}

// =============================================================================
// REGION (Public wrapper)
// =============================================================================

/// A disposable region grouping subscriptions, child regions and the units
/// created inside it.
///
/// # Example
///
/// ```
/// use spark_keyval::{detached_region, event};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let clicked = event::<i32>();
/// let seen = Rc::new(Cell::new(0));
/// let region = detached_region();
///
/// let seen_clone = seen.clone();
/// region.run(|| {
///     clicked.watch(move |v| seen_clone.set(*v));
/// });
///
/// clicked.emit(1);
/// region.dispose();
/// clicked.emit(2);
///
/// assert_eq!(seen.get(), 1);
/// ```
#[derive(Clone)]
pub struct Region {
    inner: Rc<RegionInner>,
}

impl Region {
    fn from_inner(inner: Rc<RegionInner>) -> Self {
        Self { inner }
    }

    /// Whether the region is still active (not disposed)
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Run a function with this region active.
    ///
    /// Subscriptions, units and child regions created during `f` belong to
    /// this region. Returns None if the region has been disposed.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.inner.is_active() {
            return None;
        }
        Some(self.inner.within(f))
    }

    /// Run `f` with this region active whether or not it was disposed.
    pub(crate) fn within<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.within(f)
    }

    /// Dispose the region.
    ///
    /// - Cleanup callbacks run in reverse registration order
    /// - Child regions are disposed after that
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Register a cleanup on this region. Runs immediately if the region is
    /// already disposed.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        if self.inner.is_active() {
            self.inner.add_cleanup(Box::new(f));
        } else {
            f();
        }
    }

    pub(crate) fn links(&self) -> Vec<RegionLink> {
        self.inner.links.borrow().clone()
    }

    pub(crate) fn set_seed(&self, hooks: SeedHooks) {
        *self.inner.seed.borrow_mut() = Some(hooks);
    }

    pub(crate) fn clear_seed(&self) {
        self.inner.seed.borrow_mut().take();
    }

    pub(crate) fn from_link(link: &Weak<RegionInner>) -> Option<Region> {
        link.upgrade().map(Region::from_inner)
    }

    #[cfg(test)]
    pub(crate) fn cleanup_count(&self) -> usize {
        self.inner.cleanup_count()
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("active", &self.is_active())
            .field("links", &self.inner.links.borrow().len())
            .finish()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // Auto-dispose if this is the last strong reference
        if Rc::strong_count(&self.inner) == 1 {
            self.inner.dispose();
        }
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create a region owned by the active region (if any).
///
/// Disposing the parent disposes this region too.
pub fn region() -> Region {
    Region::from_inner(RegionInner::new(false))
}

/// Create a region that is not collected by the active region.
///
/// It lives until disposed explicitly or until its last handle is dropped.
pub fn detached_region() -> Region {
    Region::from_inner(RegionInner::new(true))
}

/// Get the currently active region, if any.
pub fn current_region() -> Option<Region> {
    get_active_region().map(Region::from_inner)
}

/// Register a cleanup on the active region.
///
/// Returns false (and logs a warning) when no region is active; the callback
/// is dropped in that case.
///
/// # Example
///
/// ```
/// use spark_keyval::{detached_region, on_region_dispose};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let cleaned = Rc::new(Cell::new(false));
/// let region = detached_region();
///
/// let cleaned_clone = cleaned.clone();
/// region.run(|| on_region_dispose(move || cleaned_clone.set(true)));
///
/// region.dispose();
/// assert!(cleaned.get());
/// ```
pub fn on_region_dispose(f: impl FnOnce() + 'static) -> bool {
    if on_region_dispose_silent(f) {
        true
    } else {
        tracing::warn!("on_region_dispose called outside of a region, cleanup ignored");
        false
    }
}

/// Like `on_region_dispose` but without the warning.
pub(crate) fn on_region_dispose_silent(f: impl FnOnce() + 'static) -> bool {
    match get_active_region() {
        Some(region) if region.is_active() => {
            region.add_cleanup(Box::new(f));
            true
        }
        _ => false,
    }
}

/// Record a freshly created unit in the active region.
///
/// Returns the seeded initial value for the unit's slot, if the region was
/// given one.
pub(crate) fn register_unit(id: UnitId) -> Option<Value> {
    let region = get_active_region()?;
    let idx = {
        let mut links = region.links.borrow_mut();
        links.push(RegionLink::Unit(id));
        links.len() - 1
    };
    let seed = region.seed.borrow();
    seed.as_ref().and_then(|hooks| hooks.for_unit(idx))
}

/// Run `f` with no active region.
///
/// Collection internals are built this way: they must neither occupy slots
/// in the caller's link list nor be disposed with the caller's region.
pub(crate) fn outside_regions<R>(f: impl FnOnce() -> R) -> R {
    with_active_region(None, f)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn run_sets_current_region() {
        assert!(current_region().is_none());

        let region = detached_region();
        let seen = region.run(|| current_region().is_some());

        assert_eq!(seen, Some(true));
        assert!(current_region().is_none());
    }

    #[test]
    fn run_after_dispose_returns_none() {
        let region = detached_region();
        region.dispose();
        assert!(!region.is_active());
        assert_eq!(region.run(|| 1), None);
    }

    #[test]
    fn cleanups_run_in_reverse_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let region = detached_region();

        region.run(|| {
            for i in 0..3 {
                let log = log.clone();
                on_region_dispose(move || log.borrow_mut().push(i));
            }
        });
        region.dispose();

        assert_eq!(*log.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn child_regions_dispose_with_parent() {
        let parent = detached_region();
        let child = parent.run(region).unwrap();

        assert!(child.is_active());
        parent.dispose();
        assert!(!child.is_active());
    }

    #[test]
    fn detached_region_survives_parent() {
        let parent = detached_region();
        let detached = parent.run(detached_region).unwrap();

        parent.dispose();
        assert!(detached.is_active());
    }

    #[test]
    fn dropping_last_handle_disposes() {
        let cleaned = Rc::new(Cell::new(false));
        {
            let region = detached_region();
            let cleaned = cleaned.clone();
            region.run(|| on_region_dispose(move || cleaned.set(true)));
        }
        assert!(cleaned.get());
    }

    #[test]
    fn on_region_dispose_outside_region_is_rejected() {
        assert!(!on_region_dispose(|| {}));
    }

    #[test]
    fn on_dispose_after_dispose_runs_immediately() {
        let ran = Rc::new(Cell::new(false));
        let region = detached_region();
        region.dispose();

        let ran_clone = ran.clone();
        region.on_dispose(move || ran_clone.set(true));
        assert!(ran.get());
    }

    #[test]
    fn units_and_children_are_linked_in_order() {
        let region = detached_region();
        region.run(|| {
            crate::store(serde_json::json!(1));
            let _child = super::region();
            crate::event::<()>();
        });

        let links = region.links();
        assert_eq!(links.len(), 3);
        assert!(matches!(links[0], RegionLink::Unit(_)));
        assert!(matches!(links[1], RegionLink::Region(_)));
        assert!(matches!(links[2], RegionLink::Unit(_)));
    }

    #[test]
    fn outside_regions_hides_active_region() {
        let region = detached_region();
        region.run(|| {
            assert!(outside_regions(current_region).is_none());
            assert!(current_region().is_some());
        });
    }
}
