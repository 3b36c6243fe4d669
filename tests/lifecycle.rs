use serde_json::{json, Value};
use spark_keyval::{
    batch, detached_region, event, keyval, on_region_dispose, spawn, store, Key, Keyval, KeyvalOptions,
    Model, ModelOutput, Remove, SpawnParams, Store,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn id_of(id: &Store<Value>) -> String {
    id.get().as_str().unwrap_or_default().to_owned()
}

fn tracked(log: Rc<RefCell<Vec<String>>>) -> Keyval {
    keyval(move |_| {
        let id = store(json!(""));
        let mounted = event::<()>();
        {
            let log = log.clone();
            let id = id.clone();
            mounted.watch(move |_| log.borrow_mut().push(format!("mount {}", id_of(&id))));
        }
        {
            let log = log.clone();
            let id = id.clone();
            on_region_dispose(move || log.borrow_mut().push(format!("dispose {}", id_of(&id))));
        }
        ModelOutput::new("id").state("id", id).on_mount(mounted)
    })
    .unwrap()
}

#[test]
fn instances_mount_once_and_dispose_once() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let kv = tracked(log.clone());
    log.borrow_mut().clear();

    kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
    kv.edit().set.emit(json!({"id": "a"}));
    kv.edit().remove.emit(Remove::key("a"));
    kv.edit().remove.emit(Remove::key("a"));

    assert_eq!(
        *log.borrow(),
        vec!["mount a", "mount b", "dispose a"]
    );
}

#[test]
fn items_removed_in_the_same_batch_never_mount() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let kv = tracked(log.clone());
    log.borrow_mut().clear();

    batch(|| {
        kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
        kv.edit().remove.emit(Remove::key("a"));
    });

    assert_eq!(*log.borrow(), vec!["dispose a", "mount b"]);
    assert_eq!(kv.keys().get(), vec![Key::from("b")]);
}

#[test]
fn mount_sees_the_registered_item() {
    let seen = Rc::new(Cell::new(0));
    let kv_slot: Rc<RefCell<Option<Keyval>>> = Rc::new(RefCell::new(None));

    let kv = {
        let seen = seen.clone();
        let kv_slot = kv_slot.clone();
        keyval(move |_| {
            let mounted = event::<()>();
            {
                let seen = seen.clone();
                let kv_slot = kv_slot.clone();
                mounted.watch(move |_| {
                    if let Some(kv) = kv_slot.borrow().as_ref() {
                        seen.set(kv.len());
                    }
                });
            }
            ModelOutput::new("id")
                .state("id", store(json!(0)))
                .on_mount(mounted)
        })
        .unwrap()
    };
    *kv_slot.borrow_mut() = Some(kv.clone());

    kv.edit().add.emit(json!([{"id": 1}, {"id": 2}, {"id": 3}]));
    assert_eq!(seen.get(), 3);
}

#[test]
fn disposing_a_collection_disposes_instances_and_ignores_later_edits() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let kv = tracked(log.clone());
    kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
    log.borrow_mut().clear();

    kv.dispose();
    assert!(kv.is_disposed());
    assert!(kv.is_empty());
    assert_eq!(*log.borrow(), vec!["dispose a", "dispose b"]);

    kv.edit().add.emit(json!({"id": "c"}));
    assert!(kv.is_empty());
}

#[test]
fn collections_created_in_a_region_die_with_it() {
    let region = detached_region();
    let kv = region
        .run(|| Keyval::with_options(KeyvalOptions::field("id")))
        .unwrap();
    kv.edit().add.emit(json!({"id": 1}));

    region.dispose();
    assert!(kv.is_disposed());
    assert!(kv.items().get().is_empty());
}

#[test]
fn collections_disposed_before_first_use_stay_empty() {
    let kv = Keyval::with_options(KeyvalOptions::field("id"));
    kv.dispose();
    kv.edit().add.emit(json!({"id": 1}));
    assert!(kv.is_empty());
}

#[test]
fn spawned_instances_outlive_nothing_after_dispose() {
    let model = Model::define(|| {
        let count = store(json!(0));
        let doubled = count.map(|c| json!(c.as_i64().unwrap_or(0) * 2));
        ModelOutput::new("id")
            .state("id", store(json!(0)))
            .state("count", count)
            .state("doubled", doubled)
    })
    .unwrap();

    let driver = store(json!(2));
    let instance = spawn(
        &model,
        SpawnParams::new().value("id", json!(7)).store("count", driver.clone()),
    );
    assert_eq!(instance.output().get(), json!({"id": 7, "count": 2, "doubled": 4}));

    driver.set(json!(5));
    assert_eq!(instance.output().get()["doubled"], json!(10));

    instance.dispose();
    driver.set(json!(6));
    assert!(!instance.is_active());
    assert_eq!(instance.field("count").unwrap().get(), json!(5));
}

#[test]
fn nested_collections_are_disposed_with_their_owner() {
    let tree = keyval(|this| {
        ModelOutput::new("id")
            .state("id", store(json!("")))
            .state("childs", this.fork())
    })
    .unwrap();
    tree.edit().add.emit(json!({"id": "a", "childs": [{"id": "b", "childs": [{"id": "c"}]}]}));

    let a = tree.instance(&Key::from("a")).unwrap();
    let b_childs = a
        .collection("childs")
        .unwrap()
        .instance(&Key::from("b"))
        .unwrap()
        .collection("childs")
        .unwrap()
        .clone();
    assert_eq!(b_childs.len(), 1);

    tree.edit().replace_all.emit(json!([]));
    assert!(!a.is_active());
    assert!(b_childs.is_disposed());
    assert!(b_childs.is_empty());
}
