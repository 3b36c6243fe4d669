// ============================================================================
// spark-keyval - Keyed Dispatch
// Payload contract shared by collection API events and field editors
// ============================================================================
//
// One call addresses one or many items:
//
//   {"key": k, "data": d}
//   {"key": [k1, k2], "data": [d1, d2]}
//
// A missing `data` entry reads as null.
// ============================================================================

use serde_json::{json, Value};

use crate::core::types::Key;

/// A parsed or to-be-sent keyed call.
///
/// # Example
///
/// ```
/// use spark_keyval::{Dispatch, Key};
/// use serde_json::json;
///
/// let payload = Dispatch::many([("a", json!(1)), ("b", json!(2))]).into_value();
/// assert_eq!(payload, json!({"key": ["a", "b"], "data": [1, 2]}));
///
/// let parsed = Dispatch::parse(&json!({"key": "a", "data": 5})).unwrap();
/// assert_eq!(parsed.entries(), [(Key::from("a"), json!(5))]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    entries: Vec<(Key, Value)>,
    batched: bool,
}

impl Dispatch {
    /// Address a single item.
    pub fn one(key: impl Into<Key>, data: Value) -> Self {
        Self {
            entries: vec![(key.into(), data)],
            batched: false,
        }
    }

    /// Address several items at once.
    pub fn many<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        Self {
            entries: entries.into_iter().map(|(k, d)| (k.into(), d)).collect(),
            batched: true,
        }
    }

    /// Read a payload. Returns None when it does not follow the contract.
    pub fn parse(payload: &Value) -> Option<Self> {
        let key = payload.get("key")?;
        let data = payload.get("data");

        match key {
            Value::Array(keys) => {
                let data = match data {
                    None | Some(Value::Null) => &[][..],
                    Some(Value::Array(data)) => data.as_slice(),
                    Some(_) => return None,
                };
                let entries = keys
                    .iter()
                    .enumerate()
                    .map(|(i, key)| {
                        let key = Key::from_value(key)?;
                        Some((key, data.get(i).cloned().unwrap_or(Value::Null)))
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(Self {
                    entries,
                    batched: true,
                })
            }
            key => Some(Self::one(
                Key::from_value(key)?,
                data.cloned().unwrap_or(Value::Null),
            )),
        }
    }

    pub fn entries(&self) -> &[(Key, Value)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(Key, Value)> {
        self.entries
    }

    pub fn into_value(self) -> Value {
        if self.batched {
            let (keys, data): (Vec<Value>, Vec<Value>) = self
                .entries
                .into_iter()
                .map(|(key, data)| (key.to_value(), data))
                .unzip();
            json!({"key": keys, "data": data})
        } else {
            let (key, data) = self
                .entries
                .into_iter()
                .next()
                .map(|(key, data)| (key.to_value(), data))
                .unwrap_or((Value::Null, Value::Null));
            json!({"key": key, "data": data})
        }
    }
}

impl From<Dispatch> for Value {
    fn from(dispatch: Dispatch) -> Self {
        dispatch.into_value()
    }
}
