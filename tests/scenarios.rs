use serde_json::{json, Value};
use spark_keyval::{
    event, keyval, store, Dispatch, Key, Keyval, KeyvalOptions, MapRequest, ModelOutput, Remove,
};
use std::io;
use std::sync::{Arc, Mutex};

fn counters() -> Keyval {
    keyval(|_| {
        ModelOutput::new("id")
            .state("id", store(json!("")))
            .state("count", store(json!(0)))
            .optional(["count"])
    })
    .unwrap()
}

fn tree() -> Keyval {
    keyval(|this| {
        ModelOutput::new("id")
            .state("id", store(json!("")))
            .state("childs", this.fork())
    })
    .unwrap()
}

// =============================================================================
// LOG CAPTURE
// =============================================================================

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn with_captured_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, captured.text())
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn update_overwrites_model_defaults() {
    let kv = counters();
    kv.edit().add.emit(json!([{"id": "foo"}]));
    assert_eq!(kv.items().get(), vec![json!({"id": "foo", "count": 0})]);

    kv.edit().update.emit(json!({"id": "foo", "count": 1}));
    assert_eq!(kv.items().get(), vec![json!({"id": "foo", "count": 1})]);
}

#[test]
fn nested_children_are_built_from_the_input() {
    let kv = tree();
    kv.edit().add.emit(json!({"id": "a", "childs": [{"id": "b", "childs": []}]}));

    assert_eq!(
        kv.items().get(),
        vec![json!({"id": "a", "childs": [{"id": "b", "childs": []}]})]
    );
    let a = kv.instance(&Key::from("a")).unwrap();
    assert_eq!(a.collection("childs").unwrap().keys().get(), vec![Key::from("b")]);
}

#[test]
fn removing_by_a_predicate_that_matches_nothing_publishes_nothing() {
    let kv = counters();
    kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
    let before = kv.items().get();

    let publishes = std::rc::Rc::new(std::cell::Cell::new(0));
    let seen = publishes.clone();
    let _sub = kv.items().watch(move |_| seen.set(seen.get() + 1));
    let baseline = publishes.get();

    kv.edit().remove.emit(Remove::matching(|item| item["id"] == json!("zzz")));
    assert_eq!(kv.items().get(), before);
    assert_eq!(publishes.get(), baseline);
}

#[test]
fn upsert_on_a_function_keyed_collection_warns_and_creates_nothing() {
    let kv = Keyval::with_options(KeyvalOptions::derive(|item| {
        item["name"].as_str().map(Key::from)
    }));
    kv.edit().add.emit(json!({"name": "present"}));

    let (_, logs) = with_captured_logs(|| {
        kv.edit().map.emit(
            MapRequest::key("missing", |_| json!({"touched": true})).upsert(true),
        );
    });

    assert!(logs.contains("WARN"), "expected a warning, got: {logs}");
    assert!(logs.contains("upsert"), "expected an upsert warning, got: {logs}");
    assert_eq!(kv.keys().get(), vec![Key::from("present")]);
    assert_eq!(kv.items().get(), vec![json!({"name": "present"})]);
}

// =============================================================================
// EDIT SEMANTICS
// =============================================================================

#[test]
fn add_skips_existing_keys_and_keeps_order() {
    let kv = counters();
    kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
    kv.edit().add.emit(json!([{"id": "b", "count": 9}, {"id": "c"}]));

    assert_eq!(kv.keys().get(), vec![Key::from("a"), Key::from("b"), Key::from("c")]);
    assert_eq!(kv.items().get()[1], json!({"id": "b", "count": 0}));
}

#[test]
fn set_updates_existing_and_inserts_missing() {
    let kv = counters();
    kv.edit().add.emit(json!({"id": "a"}));
    kv.edit().set.emit(json!([{"id": "a", "count": 3}, {"id": "b", "count": 4}]));

    assert_eq!(
        kv.items().get(),
        vec![json!({"id": "a", "count": 3}), json!({"id": "b", "count": 4})]
    );
}

#[test]
fn update_of_unknown_keys_is_a_silent_no_op() {
    let kv = counters();
    kv.edit().add.emit(json!({"id": "a"}));
    kv.edit().update.emit(json!({"id": "ghost", "count": 5}));
    assert_eq!(kv.keys().get(), vec![Key::from("a")]);
}

#[test]
fn map_applies_to_current_items_and_upserts_by_field() {
    let kv = counters();
    kv.edit().add.emit(json!({"id": "a", "count": 1}));

    let bump = |item: &Value| json!({"count": item["count"].as_i64().unwrap_or(0) + 10});
    kv.edit().map.emit(MapRequest::new(vec![Key::from("a"), Key::from("b")], bump).upsert(true));

    assert_eq!(
        kv.items().get(),
        vec![json!({"id": "a", "count": 11}), json!({"id": "b", "count": 10})]
    );
}

#[test]
fn map_that_changes_nothing_publishes_nothing() {
    let kv = counters();
    kv.edit().add.emit(json!([{"id": "a", "count": 1}, {"id": "b"}]));
    let before = kv.items().get();

    let publishes = std::rc::Rc::new(std::cell::Cell::new(0));
    let seen = publishes.clone();
    let _sub = kv.items().watch(move |_| seen.set(seen.get() + 1));
    let baseline = publishes.get();

    kv.edit().map.emit(MapRequest::key("a", |item| item.clone()));
    kv.edit().map.emit(MapRequest::key("ghost", |_| json!({"count": 5})));

    assert_eq!(kv.items().get(), before);
    assert_eq!(kv.keys().get(), vec![Key::from("a"), Key::from("b")]);
    assert_eq!(publishes.get(), baseline);
}

#[test]
fn edits_issued_by_item_watchers_keep_keys_in_step() {
    let kv = Keyval::with_options(KeyvalOptions::field("id"));
    let writer = kv.clone();
    let _sub = kv.items().watch(move |items| {
        if items.len() == 1 {
            writer.edit().add.emit(json!({"id": 2}));
        }
    });

    kv.edit().add.emit(json!({"id": 1}));

    assert_eq!(kv.items().get(), vec![json!({"id": 1}), json!({"id": 2})]);
    assert_eq!(kv.keys().get(), vec![Key::Int(1), Key::Int(2)]);
    assert_eq!(kv.len(), 2);
}

#[test]
fn replace_all_drops_everything_not_listed() {
    let kv = counters();
    kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
    let a = kv.instance(&Key::from("a")).unwrap();

    kv.edit().replace_all.emit(json!([{"id": "c"}, {"id": "c", "count": 2}]));

    assert_eq!(kv.items().get(), vec![json!({"id": "c", "count": 0})]);
    assert!(!a.is_active());
}

#[test]
fn field_editor_and_api_dispatch_address_items_by_key() {
    let kv = keyval(|_| {
        let title = store(json!(""));
        let rename = event::<Value>();
        {
            let title = title.clone();
            rename.watch(move |v| {
                title.set(v.clone());
            });
        }
        ModelOutput::new("id")
            .state("id", store(json!(0)))
            .state("title", title)
            .api("rename", rename)
    })
    .unwrap();
    kv.edit().add.emit(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]));

    kv.api_event("rename").unwrap().emit(Dispatch::one(2, json!("bee")).into_value());
    kv.edit_field("title")
        .unwrap()
        .emit(Dispatch::many([(Key::from(1), json!("ay"))]).into_value());

    assert_eq!(
        kv.items().get(),
        vec![json!({"id": 1, "title": "ay"}), json!({"id": 2, "title": "bee"})]
    );
}
