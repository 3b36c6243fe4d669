// ============================================================================
// spark-keyval - Edit API
// The events every collection accepts edits through
// ============================================================================

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::core::types::Key;
use crate::primitives::event::Event;

// =============================================================================
// PAYLOADS
// =============================================================================

/// What to remove from a collection.
#[derive(Clone)]
pub enum Remove {
    /// Remove these keys. Absent keys are ignored.
    Keys(Vec<Key>),
    /// Remove every item the predicate accepts.
    Where(Rc<dyn Fn(&Value) -> bool>),
}

impl Remove {
    pub fn key(key: impl Into<Key>) -> Self {
        Remove::Keys(vec![key.into()])
    }

    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Remove::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn matching(predicate: impl Fn(&Value) -> bool + 'static) -> Self {
        Remove::Where(Rc::new(predicate))
    }
}

impl From<Key> for Remove {
    fn from(key: Key) -> Self {
        Remove::Keys(vec![key])
    }
}

impl From<Vec<Key>> for Remove {
    fn from(keys: Vec<Key>) -> Self {
        Remove::Keys(keys)
    }
}

impl fmt::Debug for Remove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remove::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            Remove::Where(_) => f.write_str("Where(..)"),
        }
    }
}

/// Rewrite items by key.
///
/// `map` receives the current enriched item and returns the fields to merge
/// into it. The result is applied only when it differs from the current
/// item. With `upsert`, absent keys are first created from a stub holding
/// just the key field.
///
/// # Example
///
/// ```
/// use spark_keyval::{Keyval, KeyvalOptions, MapRequest};
/// use serde_json::json;
///
/// let todos = Keyval::with_options(KeyvalOptions::field("id"));
/// todos.edit().map.emit(
///     MapRequest::key("a", |item| {
///         let done = item["done"].as_bool().unwrap_or(false);
///         json!({"done": !done})
///     })
///     .upsert(true),
/// );
///
/// assert_eq!(todos.items().get(), vec![json!({"id": "a", "done": true})]);
/// ```
#[derive(Clone)]
pub struct MapRequest {
    pub keys: Vec<Key>,
    pub map: Rc<dyn Fn(&Value) -> Value>,
    pub upsert: bool,
}

impl MapRequest {
    pub fn new<I, K>(keys: I, map: impl Fn(&Value) -> Value + 'static) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            map: Rc::new(map),
            upsert: false,
        }
    }

    pub fn key(key: impl Into<Key>, map: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new([key.into()], map)
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

impl fmt::Debug for MapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapRequest")
            .field("keys", &self.keys)
            .field("upsert", &self.upsert)
            .finish()
    }
}

// =============================================================================
// EDIT API
// =============================================================================

/// Edit events of one collection.
///
/// `add`, `set` and `update` take one item or an array of items.
/// `replace_all` takes an array. Each emit publishes at most one new state.
#[derive(Clone, Debug)]
pub struct EditApi {
    /// Append items whose key is absent; present keys are left alone.
    pub add: Event<Value>,
    /// Update present keys, append absent ones.
    pub set: Event<Value>,
    /// Shallow-merge into present keys; absent keys are ignored.
    pub update: Event<Value>,
    /// Dispose everything and rebuild from the given items.
    pub replace_all: Event<Value>,
    pub remove: Event<Remove>,
    pub map: Event<MapRequest>,
}

impl EditApi {
    pub(crate) fn new() -> Self {
        Self {
            add: Event::new(),
            set: Event::new(),
            update: Event::new(),
            replace_all: Event::new(),
            remove: Event::new(),
            map: Event::new(),
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// One item or an array of items, as a list.
pub(crate) fn as_items(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Shallow merge: fields of `overlay` replace those of `base`.
pub(crate) fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (name, value) in overlay {
                merged.insert(name.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Object(_)) => overlay.clone(),
        (base, _) => base.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_items_are_wrapped() {
        assert_eq!(as_items(&json!({"id": 1})), vec![json!({"id": 1})]);
        assert_eq!(as_items(&json!([{"id": 1}, {"id": 2}])).len(), 2);
    }

    #[test]
    fn merge_overlays_fields() {
        let merged = merge(&json!({"id": "a", "n": 1, "x": true}), &json!({"n": 2}));
        assert_eq!(merged, json!({"id": "a", "n": 2, "x": true}));
    }

    #[test]
    fn merge_ignores_non_object_overlay() {
        assert_eq!(merge(&json!({"id": "a"}), &json!(3)), json!({"id": "a"}));
        assert_eq!(merge(&json!(null), &json!({"id": "a"})), json!({"id": "a"}));
    }

    #[test]
    fn remove_constructors() {
        assert!(matches!(Remove::key("a"), Remove::Keys(keys) if keys == vec![Key::from("a")]));
        assert!(matches!(Remove::keys([1, 2]), Remove::Keys(keys) if keys.len() == 2));
        let Remove::Where(pred) = Remove::matching(|v| v["done"] == json!(true)) else {
            panic!("expected predicate");
        };
        assert!(pred(&json!({"done": true})));
    }

    #[test]
    fn map_request_defaults_to_no_upsert() {
        let request = MapRequest::key(1, |v| v.clone());
        assert!(!request.upsert);
        assert!(request.upsert(true).upsert);
    }
}
