// ============================================================================
// spark-keyval - Type Definitions
// Shared value types used by the runtime and the collection engine
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

// =============================================================================
// EQUALITY
// =============================================================================

/// Equality function used by stores to decide whether a write is a change.
///
/// Stores only notify watchers when this returns `false` for the old and the
/// new value.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Cleanup callback run when a region is disposed.
pub type CleanupFn = Box<dyn FnOnce()>;

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle to a watcher registered on a store or an event.
///
/// Dropping the handle does NOT unsubscribe: watchers live until
/// `unsubscribe()` is called, the watched unit is dropped, or the region that
/// was active at subscription time is disposed.
#[derive(Clone)]
pub struct Subscription {
    cancel: Rc<RefCell<Option<CleanupFn>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Rc::new(RefCell::new(Some(Box::new(cancel)))),
        }
    }

    /// A subscription that is already inactive.
    pub(crate) fn inert() -> Self {
        Self {
            cancel: Rc::new(RefCell::new(None)),
        }
    }

    /// Remove the watcher. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.borrow_mut().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.borrow().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// UNIT IDS
// =============================================================================

/// Identity of a reactive unit (store or event).
///
/// Ids are allocated from the thread-local runtime context and are unique for
/// the lifetime of the thread. Regions record them in creation order, which
/// is what the factory-path tracker walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) u64);

impl UnitId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

// =============================================================================
// KEY
// =============================================================================

/// Identity of an entity inside a collection.
///
/// Keys come either from a named field of the entity or from a key function.
/// Only JSON strings and integers can be keys; `Str("1")` and `Int(1)` are
/// different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl Key {
    /// Extract a key from a JSON value.
    ///
    /// Returns `None` for anything that is not a string or an integer.
    ///
    /// ```
    /// use spark_keyval::Key;
    /// use serde_json::json;
    ///
    /// assert_eq!(Key::from_value(&json!("a")), Some(Key::from("a")));
    /// assert_eq!(Key::from_value(&json!(7)), Some(Key::Int(7)));
    /// assert_eq!(Key::from_value(&json!(1.5)), None);
    /// ```
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::String(s) => Some(Key::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(Key::Int),
            _ => None,
        }
    }

    /// Convert the key back into the JSON value it was read from.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Str(s) => Value::String(s.clone()),
            Key::Int(n) => Value::from(*n),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Str(value.clone())
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(i64::from(value))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Int(i64::from(value))
    }
}

// =============================================================================
// TESTS
// =============================================================================
