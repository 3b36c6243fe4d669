// ============================================================================
// spark-keyval - Field Editors
// One update event per writable field, generated from the item shape
// ============================================================================

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::keyval::instance_api::Dispatch;
use crate::model::shape::KeyvalShape;
use crate::primitives::event::Event;

/// Build the field editors for a collection.
///
/// Each editor takes a keyed dispatch payload and feeds `update` with
/// `{key_field: key, field: data}` per entry. Only writable cells get an
/// editor, the key field excluded; nothing is generated when the collection
/// has no key field.
pub(crate) fn field_editors(
    shape: &KeyvalShape,
    update: &Event<Value>,
) -> IndexMap<String, Event<Value>> {
    let Some(key_field) = shape.key.as_ref().and_then(|key| key.field_name()) else {
        return IndexMap::new();
    };

    shape
        .writable_fields()
        .into_iter()
        .filter(|field| *field != key_field)
        .map(|field| {
            let key_field = key_field.to_owned();
            let name = field.to_owned();
            let editor = update.prepend(move |payload: &Value| {
                let Some(dispatch) = Dispatch::parse(payload) else {
                    tracing::warn!(field = %name, "malformed field edit payload ignored");
                    return Value::Array(Vec::new());
                };
                let partials = dispatch
                    .into_entries()
                    .into_iter()
                    .map(|(key, data)| {
                        let mut partial = Map::new();
                        partial.insert(key_field.clone(), key.to_value());
                        partial.insert(name.clone(), data);
                        Value::Object(partial)
                    })
                    .collect();
                Value::Array(partials)
            });
            (field.to_owned(), editor)
        })
        .collect()
}
