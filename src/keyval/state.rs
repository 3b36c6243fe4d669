// ============================================================================
// spark-keyval - List State
// The three index-aligned arrays behind a collection, and the copy-on-write
// transaction every edit runs in
// ============================================================================

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::core::types::Key;
use crate::spawn::Instance;

// =============================================================================
// LIST STATE
// =============================================================================

/// `items[i]`, `instances[i]` and `keys[i]` describe the same entity.
#[derive(Clone, Default)]
pub(crate) struct ListState {
    pub(crate) items: Vec<Value>,
    pub(crate) instances: Vec<Option<Rc<Instance>>>,
    pub(crate) keys: Vec<Key>,
}

impl ListState {
    pub(crate) fn index_of(&self, key: &Key) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn push(&mut self, key: Key, item: Value, instance: Option<Rc<Instance>>) {
        self.keys.push(key);
        self.items.push(item);
        self.instances.push(instance);
    }

    pub(crate) fn remove(&mut self, idx: usize) -> Option<Rc<Instance>> {
        self.keys.remove(idx);
        self.items.remove(idx);
        self.instances.remove(idx)
    }

    /// Every live instance, in order.
    pub(crate) fn live_instances(&self) -> impl Iterator<Item = &Rc<Instance>> {
        self.instances.iter().flatten()
    }
}

impl fmt::Debug for ListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListState")
            .field("keys", &self.keys)
            .field("items", &self.items)
            .finish()
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Copy-on-write view over one published `ListState`.
///
/// Reads go to the published state until the first structural change, which
/// clones the arrays once. Later changes in the same transaction mutate that
/// clone in place.
pub(crate) struct Transaction {
    base: Rc<ListState>,
    fresh: Option<ListState>,
}

impl Transaction {
    pub(crate) fn new(base: Rc<ListState>) -> Self {
        Self { base, fresh: None }
    }

    pub(crate) fn state(&self) -> &ListState {
        self.fresh.as_ref().unwrap_or(&self.base)
    }

    /// Writable state, cloning the published arrays on first use.
    pub(crate) fn refresh(&mut self) -> &mut ListState {
        let base = &self.base;
        self.fresh.get_or_insert_with(|| ListState::clone(base))
    }

    /// Start over from empty arrays.
    pub(crate) fn reset(&mut self) {
        self.fresh = Some(ListState::default());
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.fresh.is_some()
    }

    /// The state to publish, if anything changed.
    pub(crate) fn commit(self) -> Option<Rc<ListState>> {
        self.fresh.map(Rc::new)
    }
}
