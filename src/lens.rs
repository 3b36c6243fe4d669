// ============================================================================
// spark-keyval - Lens
// Path-addressed derived readers over (possibly nested) collections
// ============================================================================
//
// A collection is a flat array under one store, not a keyed map. A lens
// turns "field F of whichever entity key K names, inside the nested
// collection of entity J" into a derived store that re-reads whenever the
// root items or any key along the path change.
//
// Lens steps are checked against the collection shape when they are built;
// reading never inspects live instances.
// ============================================================================

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::core::types::Key;
use crate::error::LensError;
use crate::keyval::Keyval;
use crate::model::shape::{resolve_nested, KeySpec, KeyvalShape, ShapeNode};
use crate::primitives::store::{Store, WeakStore};
use crate::reactivity::equality::equals;

// =============================================================================
// PATH
// =============================================================================

/// A key that is either fixed or read from a store.
#[derive(Clone)]
pub enum KeyRef {
    Const(Key),
    Key(Store<Key>),
    /// A JSON store; values that are not strings or integers match nothing.
    Value(Store<Value>),
}

impl KeyRef {
    fn downgrade(&self) -> ReadKey {
        match self {
            KeyRef::Const(key) => ReadKey::Const(key.clone()),
            KeyRef::Key(store) => ReadKey::Key(store.downgrade()),
            KeyRef::Value(store) => ReadKey::Value(store.downgrade()),
        }
    }
}

impl fmt::Debug for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRef::Const(key) => f.debug_tuple("Const").field(key).finish(),
            KeyRef::Key(store) => f.debug_tuple("Key").field(&store.get()).finish(),
            KeyRef::Value(store) => f.debug_tuple("Value").field(&store.get()).finish(),
        }
    }
}

impl From<Key> for KeyRef {
    fn from(key: Key) -> Self {
        KeyRef::Const(key)
    }
}

impl From<&str> for KeyRef {
    fn from(key: &str) -> Self {
        KeyRef::Const(key.into())
    }
}

impl From<String> for KeyRef {
    fn from(key: String) -> Self {
        KeyRef::Const(key.into())
    }
}

impl From<i64> for KeyRef {
    fn from(key: i64) -> Self {
        KeyRef::Const(key.into())
    }
}

impl From<i32> for KeyRef {
    fn from(key: i32) -> Self {
        KeyRef::Const(key.into())
    }
}

impl From<Store<Key>> for KeyRef {
    fn from(store: Store<Key>) -> Self {
        KeyRef::Key(store)
    }
}

impl From<&Store<Key>> for KeyRef {
    fn from(store: &Store<Key>) -> Self {
        KeyRef::Key(store.clone())
    }
}

impl From<Store<Value>> for KeyRef {
    fn from(store: Store<Value>) -> Self {
        KeyRef::Value(store)
    }
}

impl From<&Store<Value>> for KeyRef {
    fn from(store: &Store<Value>) -> Self {
        KeyRef::Value(store.clone())
    }
}

/// A path key as seen by a running reader. Key stores are held weakly; a
/// dropped key store matches nothing.
enum ReadKey {
    Const(Key),
    Key(WeakStore<Key>),
    Value(WeakStore<Value>),
}

impl ReadKey {
    fn current(&self) -> Option<Key> {
        match self {
            ReadKey::Const(key) => Some(key.clone()),
            ReadKey::Key(store) => store.upgrade().map(|store| store.get()),
            ReadKey::Value(store) => store.upgrade().and_then(|store| store.with(Key::from_value)),
        }
    }
}

/// One step of a lens path.
#[derive(Clone, Debug)]
pub enum PathStep {
    /// Select the array element whose key equals `key`.
    ByKey { key: KeyRef, key_spec: Option<KeySpec> },
    /// Read a field of an object.
    Field(String),
    /// `true` if every step before it resolved.
    Exists,
}

/// A path step as seen by a running reader.
enum ReadStep {
    ByKey { key: ReadKey, key_spec: Option<KeySpec> },
    Field(String),
    Exists,
}

impl From<&PathStep> for ReadStep {
    fn from(step: &PathStep) -> Self {
        match step {
            PathStep::ByKey { key, key_spec } => ReadStep::ByKey {
                key: key.downgrade(),
                key_spec: key_spec.clone(),
            },
            PathStep::Field(name) => ReadStep::Field(name.clone()),
            PathStep::Exists => ReadStep::Exists,
        }
    }
}

/// Where a walk currently stands.
enum At<'a> {
    List(&'a [Value]),
    Value(&'a Value),
}

/// Walk `steps` from the root items. None as soon as a step finds nothing.
fn read_path(items: &[Value], steps: &[ReadStep]) -> Option<Value> {
    let mut at = At::List(items);

    for step in steps {
        at = match step {
            ReadStep::ByKey { key, key_spec } => {
                let list = match at {
                    At::List(list) => list,
                    At::Value(value) => value.as_array()?.as_slice(),
                };
                let key = key.current()?;
                let spec = key_spec.as_ref()?;
                At::Value(list.iter().find(|item| spec.extract(item).as_ref() == Some(&key))?)
            }
            ReadStep::Field(name) => match at {
                At::Value(value) => At::Value(value.get(name)?),
                At::List(_) => return None,
            },
            ReadStep::Exists => return Some(Value::Bool(true)),
        };
    }

    Some(match at {
        At::List(list) => Value::Array(list.to_vec()),
        At::Value(value) => value.clone(),
    })
}

// =============================================================================
// READERS
// =============================================================================

/// Derived store over `root` that applies `read` to whatever `steps`
/// resolve to. Re-derives when `root` or any key store in the path changes.
///
/// Sources are held weakly: a reader never keeps a collection alive.
pub fn path_reader_with<T>(
    root: &Store<Vec<Value>>,
    steps: Vec<PathStep>,
    read: impl Fn(Option<Value>) -> T + 'static,
) -> Store<T>
where
    T: Clone + PartialEq + 'static,
{
    let read_steps: Vec<ReadStep> = steps.iter().map(ReadStep::from).collect();
    let weak_root = root.downgrade();
    let compute: Rc<dyn Fn() -> T> = Rc::new(move || {
        let found = weak_root
            .upgrade()
            .and_then(|root| root.with(|items| read_path(items, &read_steps)));
        read(found)
    });

    let reader = Store::derived(compute(), equals::<T>);
    reader.follow(std::slice::from_ref(root), compute.clone());
    for step in &steps {
        match step {
            PathStep::ByKey { key: KeyRef::Key(store), .. } => {
                reader.follow(std::slice::from_ref(store), compute.clone());
            }
            PathStep::ByKey { key: KeyRef::Value(store), .. } => {
                reader.follow(std::slice::from_ref(store), compute.clone());
            }
            _ => {}
        }
    }
    reader
}

/// Derived store holding the value at `steps`, or `default` when any step
/// finds nothing.
///
/// # Example
///
/// ```
/// use spark_keyval::{path_reader_store, store, Key, KeySpec, PathStep};
/// use serde_json::json;
///
/// let items = store(vec![json!({"id": "a", "n": 1}), json!({"id": "b", "n": 2})]);
/// let selected = store(Key::from("a"));
///
/// let n = path_reader_store(
///     &items,
///     vec![
///         PathStep::ByKey { key: selected.clone().into(), key_spec: Some(KeySpec::field("id")) },
///         PathStep::Field("n".into()),
///     ],
///     json!(0),
/// );
///
/// assert_eq!(n.get(), json!(1));
/// selected.set(Key::from("b"));
/// assert_eq!(n.get(), json!(2));
/// selected.set(Key::from("zzz"));
/// assert_eq!(n.get(), json!(0));
/// ```
pub fn path_reader_store(root: &Store<Vec<Value>>, steps: Vec<PathStep>, default: Value) -> Store<Value> {
    path_reader_with(root, steps, move |found| found.unwrap_or_else(|| default.clone()))
}

fn exists_reader(root: &Store<Vec<Value>>, mut steps: Vec<PathStep>) -> Store<bool> {
    steps.push(PathStep::Exists);
    path_reader_with(root, steps, |found| found == Some(Value::Bool(true)))
}

// =============================================================================
// LENSES
// =============================================================================

/// Lens over a collection (top-level, or nested inside an item).
///
/// # Example
///
/// ```
/// use spark_keyval::{keyval, lens, store, ModelOutput};
/// use serde_json::json;
///
/// let tree = keyval(|this| {
///     ModelOutput::new("id")
///         .state("id", store(json!("")))
///         .state("title", store(json!("")))
///         .state("childs", this.fork())
/// })
/// .unwrap();
/// tree.edit().add.emit(json!({"id": "a", "childs": [{"id": "b", "title": "leaf"}]}));
///
/// let title = lens(&tree)
///     .item("a")
///     .collection("childs")
///     .unwrap()
///     .item("b")
///     .field("title")
///     .unwrap()
///     .store();
/// assert_eq!(title.get(), json!("leaf"));
/// ```
#[derive(Clone)]
pub struct CollectionLens {
    root: Store<Vec<Value>>,
    steps: Vec<PathStep>,
    shape: Rc<KeyvalShape>,
}

/// Lens on the collection's items.
pub fn lens(kv: &Keyval) -> CollectionLens {
    CollectionLens {
        root: kv.items(),
        steps: Vec::new(),
        shape: kv.shape(),
    }
}

impl CollectionLens {
    /// The item whose key is `key`.
    pub fn item(&self, key: impl Into<KeyRef>) -> ItemLens {
        let mut steps = self.steps.clone();
        steps.push(PathStep::ByKey {
            key: key.into(),
            key_spec: self.shape.key.clone(),
        });
        ItemLens {
            root: self.root.clone(),
            steps,
            shape: self.shape.clone(),
        }
    }

    /// The whole item under `key`, null when absent.
    pub fn item_store(&self, key: impl Into<KeyRef>) -> Store<Value> {
        self.item(key).store()
    }

    pub fn has(&self, key: impl Into<KeyRef>) -> Store<bool> {
        self.item(key).has()
    }

    pub fn shape(&self) -> &Rc<KeyvalShape> {
        &self.shape
    }
}

impl fmt::Debug for CollectionLens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionLens").field("steps", &self.steps).finish()
    }
}

/// Lens on one item.
#[derive(Clone)]
pub struct ItemLens {
    root: Store<Vec<Value>>,
    steps: Vec<PathStep>,
    shape: Rc<KeyvalShape>,
}

impl ItemLens {
    /// A readable field. Fields outside a declared shape and API triggers
    /// are rejected; opaque shapes accept any name.
    pub fn field(&self, name: &str) -> Result<FieldLens, LensError> {
        match self.shape.field(name) {
            Some(ShapeNode::Trigger) => Err(LensError::NotReadable { field: name.to_owned() }),
            Some(_) => Ok(self.field_lens(name)),
            None if self.shape.fields.is_some() => Err(LensError::UnknownField { field: name.to_owned() }),
            None => Ok(self.field_lens(name)),
        }
    }

    fn field_lens(&self, name: &str) -> FieldLens {
        let mut steps = self.steps.clone();
        steps.push(PathStep::Field(name.to_owned()));
        FieldLens {
            root: self.root.clone(),
            steps,
        }
    }

    /// The nested collection held by `name`.
    pub fn collection(&self, name: &str) -> Result<CollectionLens, LensError> {
        let nested = match self.shape.field(name) {
            Some(ShapeNode::Collection(nested)) => nested,
            Some(_) => return Err(LensError::NotACollection { field: name.to_owned() }),
            None if self.shape.fields.is_some() => {
                return Err(LensError::UnknownField { field: name.to_owned() });
            }
            // Nothing to key the nested items by
            None => return Err(LensError::NotACollection { field: name.to_owned() }),
        };

        let mut steps = self.steps.clone();
        steps.push(PathStep::Field(name.to_owned()));
        Ok(CollectionLens {
            root: self.root.clone(),
            steps,
            shape: resolve_nested(&self.shape, nested),
        })
    }

    /// The whole item, null when absent.
    pub fn store(&self) -> Store<Value> {
        path_reader_store(&self.root, self.steps.clone(), Value::Null)
    }

    pub fn has(&self) -> Store<bool> {
        exists_reader(&self.root, self.steps.clone())
    }
}

impl fmt::Debug for ItemLens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemLens").field("steps", &self.steps).finish()
    }
}

/// Lens on one field of one item.
#[derive(Clone)]
pub struct FieldLens {
    root: Store<Vec<Value>>,
    steps: Vec<PathStep>,
}

impl FieldLens {
    /// The field value, null when absent.
    pub fn store(&self) -> Store<Value> {
        self.store_or(Value::Null)
    }

    pub fn store_or(&self, default: Value) -> Store<Value> {
        path_reader_store(&self.root, self.steps.clone(), default)
    }

    pub fn has(&self) -> Store<bool> {
        exists_reader(&self.root, self.steps.clone())
    }
}

impl fmt::Debug for FieldLens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldLens").field("steps", &self.steps).finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
