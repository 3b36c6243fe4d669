use serde_json::{json, Value};
use spark_keyval::{keyval, lens, store, Key, Keyval, ModelOutput, Remove};

const DEPTH: usize = 50;

/// Tree nodes that count their descendants through the nested items.
fn counted_tree() -> Keyval {
    keyval(|this| {
        let childs = this.fork();
        let descendants = childs.items().map(|items| {
            let total: i64 = items
                .iter()
                .map(|child| 1 + child["descendants"].as_i64().unwrap_or(0))
                .sum();
            json!(total)
        });
        ModelOutput::new("id")
            .state("id", store(json!("")))
            .state("childs", childs)
            .state("descendants", descendants)
    })
    .unwrap()
}

fn chain(depth: usize) -> Value {
    let mut node = json!({"id": format!("n{}", depth - 1), "childs": []});
    for level in (0..depth - 1).rev() {
        node = json!({"id": format!("n{level}"), "childs": [node]});
    }
    node
}

fn node_at<'a>(root: &'a Value, level: usize) -> &'a Value {
    let mut node = root;
    for _ in 0..level {
        node = &node["childs"][0];
    }
    node
}

#[test]
fn deep_tree_builds_every_level() {
    let tree = counted_tree();
    tree.edit().add.emit(chain(DEPTH));

    let items = tree.items().get();
    assert_eq!(items.len(), 1);
    for level in 0..DEPTH {
        let node = node_at(&items[0], level);
        assert_eq!(node["id"], json!(format!("n{level}")));
    }
    assert_eq!(node_at(&items[0], DEPTH - 1)["childs"], json!([]));
}

#[test]
fn deep_tree_aggregates_bottom_up() {
    let tree = counted_tree();
    tree.edit().add.emit(chain(DEPTH));

    let items = tree.items().get();
    for level in 0..DEPTH {
        let expected = (DEPTH - 1 - level) as i64;
        assert_eq!(node_at(&items[0], level)["descendants"], json!(expected));
    }
}

#[test]
fn leaf_edits_propagate_to_the_root() {
    let tree = counted_tree();
    tree.edit().add.emit(chain(DEPTH));

    // Walk the instances down to the deepest collection
    let mut collection = tree.clone();
    for level in 0..DEPTH - 1 {
        let node = collection.instance(&Key::from(format!("n{level}"))).unwrap();
        collection = node.collection("childs").unwrap().clone();
    }
    let leaf_parent = collection;

    leaf_parent.edit().add.emit(json!({"id": "extra"}));
    assert_eq!(tree.items().get()[0]["descendants"], json!(DEPTH as i64));

    leaf_parent.edit().remove.emit(Remove::key("extra"));
    assert_eq!(tree.items().get()[0]["descendants"], json!((DEPTH - 1) as i64));
}

#[test]
fn deep_lens_follows_the_path() {
    let tree = counted_tree();
    tree.edit().add.emit(chain(DEPTH));

    let mut path = lens(&tree);
    for level in 0..DEPTH - 1 {
        path = path.item(format!("n{level}")).collection("childs").unwrap();
    }
    let deepest = path.item(format!("n{}", DEPTH - 1));
    let descendants = deepest.field("descendants").unwrap().store();
    let exists = deepest.has();

    assert!(exists.get());
    assert_eq!(descendants.get(), json!(0));

    tree.edit().remove.emit(Remove::key("n0"));
    assert!(!exists.get());
    assert_eq!(descendants.get(), Value::Null);
}

#[test]
fn removing_the_root_disposes_the_whole_chain() {
    let tree = counted_tree();
    tree.edit().add.emit(chain(DEPTH));

    let mut instances = Vec::new();
    let mut collection = tree.clone();
    for level in 0..DEPTH {
        let node = collection.instance(&Key::from(format!("n{level}"))).unwrap();
        collection = node.collection("childs").unwrap().clone();
        instances.push(node);
    }

    tree.edit().remove.emit(Remove::key("n0"));
    assert!(tree.is_empty());
    assert!(instances.iter().all(|node| !node.is_active()));
}
