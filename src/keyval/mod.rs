// ============================================================================
// spark-keyval - Keyval Collections
// Ordered, keyed entity collections with one model instance per entity
// ============================================================================
//
// Three ways to get a collection:
//
// - `keyval(create)`: model-backed. Every item spawns an instance; items are
//   the raw input merged with the instance output.
// - `Keyval::with_options(..)`: items stored verbatim, keyed by a field or a
//   key function, optionally with an explicit model.
// - `fork()`: an independent collection sharing an existing definition. A
//   model may fork the collection it is defining to build trees.
//
// A collection's engine (its state, edit events and API events) is built
// lazily: on first access or at the next `tick()`. That is what lets a
// definition refer to itself before it is complete.
// ============================================================================

mod edit;
mod edit_field;
mod engine;
mod instance_api;
mod state;

pub use edit::{EditApi, MapRequest, Remove};
pub use instance_api::Dispatch;

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value;

use crate::core::context::with_context;
use crate::core::types::Key;
use crate::error::ModelError;
use crate::lazy::LazyInit;
use crate::model::shape::{KeySpec, KeyvalShape, ShapeNode};
use crate::model::{Model, ModelOutput};
use crate::primitives::event::Event;
use crate::primitives::region::on_region_dispose_silent;
use crate::primitives::store::Store;
use crate::spawn::Instance;

use engine::Engine;

// =============================================================================
// DEFINITION
// =============================================================================

/// Everything forks of one collection share.
pub(crate) struct KeyvalDef {
    pub(crate) model: Option<Model>,
    pub(crate) key: KeySpec,
    pub(crate) shape: Rc<KeyvalShape>,
}

/// Holds a definition that may not be complete yet.
struct DefSlot {
    id: u64,
    def: RefCell<Option<Rc<KeyvalDef>>>,
}

impl DefSlot {
    fn new(def: Option<KeyvalDef>) -> Rc<Self> {
        Rc::new(Self {
            id: with_context(|ctx| ctx.next_unit_id().as_u64()),
            def: RefCell::new(def.map(Rc::new)),
        })
    }

    fn def(&self) -> Option<Rc<KeyvalDef>> {
        self.def.borrow().clone()
    }
}

// =============================================================================
// KEYVAL
// =============================================================================

struct KeyvalCell {
    slot: Rc<DefSlot>,
    engine: LazyInit<Rc<Engine>>,
    /// Used when the engine is requested from inside its own construction
    stub: OnceCell<Rc<Engine>>,
    disposed: Rc<Cell<bool>>,
}

impl KeyvalCell {
    fn dispose(&self) {
        self.disposed.set(true);
        if let Some(engine) = self.engine.peek() {
            engine.dispose();
        }
        if let Some(stub) = self.stub.get() {
            stub.dispose();
        }
    }
}

/// A keyed collection handle. Clones share the same collection; use
/// [`Keyval::fork`] for an independent one.
///
/// # Example
///
/// ```
/// use spark_keyval::{keyval, store, Key, ModelOutput, Remove};
/// use serde_json::json;
///
/// let users = keyval(|_| {
///     let name = store(json!(""));
///     let greeting = name.map(|n| json!(format!("hi {}", n.as_str().unwrap_or(""))));
///     ModelOutput::new("name")
///         .state("name", name)
///         .state("greeting", greeting)
/// })
/// .unwrap();
///
/// users.edit().add.emit(json!([{"name": "ann"}, {"name": "bob"}]));
/// assert_eq!(users.keys().get(), vec![Key::from("ann"), Key::from("bob")]);
/// assert_eq!(users.items().get()[1], json!({"name": "bob", "greeting": "hi bob"}));
///
/// users.edit().remove.emit(Remove::key("ann"));
/// assert_eq!(users.len(), 1);
/// ```
#[derive(Clone)]
pub struct Keyval {
    cell: Rc<KeyvalCell>,
}

impl Keyval {
    /// A collection without a `create` closure.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_keyval::{Key, Keyval, KeyvalOptions};
    /// use serde_json::json;
    ///
    /// let tags = Keyval::with_options(KeyvalOptions::derive(|tag| {
    ///     tag["label"].as_str().map(|l| Key::from(l.to_lowercase()))
    /// }));
    /// tags.edit().add.emit(json!([{"label": "Rust"}, {"label": "rust"}]));
    /// assert_eq!(tags.items().get(), vec![json!({"label": "Rust"})]);
    /// ```
    pub fn with_options(options: KeyvalOptions) -> Keyval {
        let KeyvalOptions { key, model, shape } = options;
        let key = match &model {
            Some(model) => KeySpec::field(model.key_field()),
            None => key,
        };
        let fields = match &model {
            Some(model) => Some(model.shape().clone()),
            None => shape,
        };
        let shape = Rc::new(KeyvalShape::new(key.clone(), fields));
        Keyval::from_slot(DefSlot::new(Some(KeyvalDef { model, key, shape })))
    }

    fn from_slot(slot: Rc<DefSlot>) -> Keyval {
        let disposed = Rc::new(Cell::new(false));

        let engine = {
            let slot = slot.clone();
            let disposed = disposed.clone();
            LazyInit::new(move || {
                let def = slot.def();
                if def.is_none() {
                    tracing::debug!(
                        definition = slot.id,
                        "collection built before its definition was complete, using an empty stub"
                    );
                }
                let engine = Engine::build(def);
                if disposed.get() {
                    engine.dispose();
                }
                engine
            })
        };

        let cell = Rc::new(KeyvalCell {
            slot,
            engine,
            stub: OnceCell::new(),
            disposed,
        });

        // Collections created inside an instance die with it
        let weak: Weak<KeyvalCell> = Rc::downgrade(&cell);
        on_region_dispose_silent(move || {
            if let Some(cell) = weak.upgrade() {
                cell.dispose();
            }
        });

        Keyval { cell }
    }

    pub(crate) fn engine(&self) -> Rc<Engine> {
        self.cell.engine.force().unwrap_or_else(|| {
            self.cell
                .stub
                .get_or_init(|| {
                    tracing::debug!(
                        definition = self.cell.slot.id,
                        "collection read during its own construction, using an empty stub"
                    );
                    Engine::build(None)
                })
                .clone()
        })
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Enriched items in collection order.
    pub fn items(&self) -> Store<Vec<Value>> {
        self.engine().items().clone()
    }

    pub fn keys(&self) -> Store<Vec<Key>> {
        self.engine().keys().clone()
    }

    pub fn len(&self) -> usize {
        self.engine().state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The live instance behind `key`.
    pub fn instance(&self, key: &Key) -> Option<Rc<Instance>> {
        let state = self.engine().state();
        state
            .index_of(key)
            .and_then(|idx| state.instances[idx].clone())
    }

    /// Whether the engine has been built yet.
    pub fn is_initialized(&self) -> bool {
        self.cell.engine.is_ready()
    }

    // =========================================================================
    // EDIT
    // =========================================================================

    pub fn edit(&self) -> EditApi {
        self.engine().edit().clone()
    }

    /// Collection-level API events, one per model API field. Each accepts a
    /// [`Dispatch`] payload.
    pub fn api(&self) -> IndexMap<String, Event<Value>> {
        self.engine().api().clone()
    }

    pub fn api_event(&self, name: &str) -> Option<Event<Value>> {
        self.engine().api().get(name).cloned()
    }

    /// Update event for one writable field, taking a [`Dispatch`] payload.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_keyval::{keyval, store, Dispatch, ModelOutput};
    /// use serde_json::json;
    ///
    /// let todos = keyval(|_| {
    ///     ModelOutput::new("id")
    ///         .state("id", store(json!(0)))
    ///         .state("title", store(json!("")))
    /// })
    /// .unwrap();
    ///
    /// todos.edit().add.emit(json!({"id": 1, "title": "draft"}));
    /// todos.edit_field("title").unwrap().emit(Dispatch::one(1, json!("final")).into_value());
    /// assert_eq!(todos.items().get(), vec![json!({"id": 1, "title": "final"})]);
    /// ```
    pub fn edit_field(&self, name: &str) -> Option<Event<Value>> {
        self.engine().field_edits().get(name).cloned()
    }

    pub fn edit_fields(&self) -> IndexMap<String, Event<Value>> {
        self.engine().field_edits().clone()
    }

    // =========================================================================
    // DEFINITION
    // =========================================================================

    /// Initial state of one item, if the collection has a model.
    pub fn default_state(&self) -> Option<Value> {
        self.cell.slot.def()?.model.as_ref().map(Model::default_state)
    }

    /// Item shape. Opaque until the definition is complete.
    pub fn shape(&self) -> Rc<KeyvalShape> {
        self.cell
            .slot
            .def()
            .map(|def| def.shape.clone())
            .unwrap_or_else(|| Rc::new(KeyvalShape::opaque()))
    }

    pub fn model(&self) -> Option<Model> {
        self.cell.slot.def()?.model.clone()
    }

    pub fn key_spec(&self) -> Option<KeySpec> {
        self.cell.slot.def().map(|def| def.key.clone())
    }

    /// An independent, empty collection with the same definition.
    pub fn fork(&self) -> Keyval {
        Keyval::from_slot(self.cell.slot.clone())
    }

    /// Identity shared by every fork of one definition.
    pub fn definition_id(&self) -> u64 {
        self.cell.slot.id
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Dispose every instance and empty the collection. Later edits are
    /// ignored.
    pub fn dispose(&self) {
        self.cell.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.cell.disposed.get()
    }
}

impl fmt::Debug for Keyval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Keyval");
        debug.field("definition", &self.cell.slot.id);
        match self.cell.engine.peek() {
            Some(engine) => debug.field("keys", &engine.keys().get()),
            None => debug.field("keys", &"<not built>"),
        };
        debug.finish()
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

/// Handle to the collection being defined, passed to its `create` closure.
pub struct KeyvalRef {
    slot: Weak<DefSlot>,
    id: u64,
}

impl KeyvalRef {
    /// A fresh fork of the collection being defined, for tree fields.
    pub fn fork(&self) -> Keyval {
        match self.slot.upgrade() {
            Some(slot) => Keyval::from_slot(slot),
            None => Keyval::from_slot(DefSlot::new(None)),
        }
    }

    pub fn definition_id(&self) -> u64 {
        self.id
    }
}

/// Define a model-backed collection.
///
/// `create` builds one item's state and receives a handle to the collection
/// itself, so a field may hold a fork of it.
///
/// # Example
///
/// ```
/// use spark_keyval::{keyval, store, ModelOutput};
/// use serde_json::json;
///
/// let tree = keyval(|this| {
///     ModelOutput::new("id")
///         .state("id", store(json!("")))
///         .state("childs", this.fork())
/// })
/// .unwrap();
///
/// tree.edit().add.emit(json!({"id": "a", "childs": [{"id": "b", "childs": []}]}));
/// assert_eq!(
///     tree.items().get(),
///     vec![json!({"id": "a", "childs": [{"id": "b", "childs": []}]})]
/// );
/// ```
pub fn keyval(create: impl Fn(&KeyvalRef) -> ModelOutput + 'static) -> Result<Keyval, ModelError> {
    let slot = DefSlot::new(None);
    let this = KeyvalRef {
        slot: Rc::downgrade(&slot),
        id: slot.id,
    };

    let model = Model::define_with(Rc::new(move || create(&this)), Some(slot.id))?;
    let key = KeySpec::field(model.key_field());
    let shape = Rc::new(KeyvalShape::new(key.clone(), Some(model.shape().clone())));
    *slot.def.borrow_mut() = Some(Rc::new(KeyvalDef {
        model: Some(model),
        key,
        shape,
    }));

    Ok(Keyval::from_slot(slot))
}

/// Construction options for [`Keyval::with_options`].
#[derive(Clone, Debug)]
pub struct KeyvalOptions {
    key: KeySpec,
    model: Option<Model>,
    shape: Option<IndexMap<String, ShapeNode>>,
}

impl KeyvalOptions {
    /// Key items by the value of `name`.
    pub fn field(name: impl Into<String>) -> Self {
        Self::with_key(KeySpec::field(name))
    }

    /// Key items with a function. Items it returns None for are skipped.
    pub fn derive(f: impl Fn(&Value) -> Option<Key> + 'static) -> Self {
        Self::with_key(KeySpec::derive(f))
    }

    fn with_key(key: KeySpec) -> Self {
        Self {
            key,
            model: None,
            shape: None,
        }
    }

    /// Back items with a model. The model's key field replaces the key.
    pub fn model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Declare the item shape of a model-less collection, for lenses and
    /// nested shapes.
    pub fn shape(mut self, fields: IndexMap<String, ShapeNode>) -> Self {
        self.shape = Some(fields);
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event, store, tick};
    use serde_json::json;
    use std::cell::RefCell;

    fn tree() -> Keyval {
        keyval(|this| {
            ModelOutput::new("id")
                .state("id", store(json!("")))
                .state("childs", this.fork())
        })
        .unwrap()
    }

    #[test]
    fn engine_is_built_lazily() {
        let kv = Keyval::with_options(KeyvalOptions::field("id"));
        assert!(!kv.is_initialized());
        tick();
        assert!(kv.is_initialized());
    }

    #[test]
    fn clones_share_forks_do_not() {
        let kv = Keyval::with_options(KeyvalOptions::field("id"));
        let same = kv.clone();
        let other = kv.fork();

        kv.edit().add.emit(json!({"id": 1}));
        assert_eq!(same.len(), 1);
        assert_eq!(other.len(), 0);
        assert_eq!(other.definition_id(), kv.definition_id());
    }

    #[test]
    fn model_less_items_are_stored_verbatim() {
        let kv = Keyval::with_options(KeyvalOptions::field("id"));
        kv.edit().set.emit(json!({"id": 1, "a": 1}));
        kv.edit().set.emit(json!({"id": 1, "b": 2}));
        assert_eq!(kv.items().get(), vec![json!({"id": 1, "a": 1, "b": 2})]);
        assert!(kv.instance(&Key::Int(1)).is_none());
        assert!(kv.api().is_empty());
        assert!(kv.default_state().is_none());
    }

    #[test]
    fn nested_items_surface_in_parent() {
        let kv = tree();
        kv.edit().add.emit(json!({"id": "root", "childs": []}));

        let root = kv.instance(&Key::from("root")).unwrap();
        let childs = root.collection("childs").unwrap().clone();
        childs.edit().add.emit(json!({"id": "leaf"}));

        assert_eq!(
            kv.items().get(),
            vec![json!({"id": "root", "childs": [{"id": "leaf", "childs": []}]})]
        );
    }

    #[test]
    fn set_on_existing_entity_replaces_nested_items() {
        let kv = tree();
        kv.edit().add.emit(json!({"id": "a", "childs": [{"id": "b"}, {"id": "c"}]}));
        kv.edit().set.emit(json!({"id": "a", "childs": [{"id": "d"}]}));

        assert_eq!(
            kv.items().get(),
            vec![json!({"id": "a", "childs": [{"id": "d", "childs": []}]})]
        );
    }

    #[test]
    fn removing_parent_disposes_nested_instances() {
        let kv = tree();
        kv.edit().add.emit(json!({"id": "a", "childs": [{"id": "b"}]}));
        let a = kv.instance(&Key::from("a")).unwrap();
        let b = a.collection("childs").unwrap().instance(&Key::from("b")).unwrap();

        kv.edit().remove.emit(Remove::key("a"));
        assert!(!b.is_active());
        assert!(a.collection("childs").unwrap().is_disposed());
    }

    #[test]
    fn api_calls_reach_instances() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let kv = keyval(move |_| {
            let id = store(json!(""));
            let ping = event::<Value>();
            let log = log_clone.clone();
            let id_clone = id.clone();
            ping.watch(move |v| log.borrow_mut().push((id_clone.get(), v.clone())));
            ModelOutput::new("id").state("id", id).api("ping", ping)
        })
        .unwrap();

        kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
        let ping = kv.api_event("ping").unwrap();
        ping.emit(Dispatch::one("b", json!(1)).into_value());
        ping.emit(Dispatch::many([("a", json!(2)), ("missing", json!(3))]).into_value());
        ping.emit(json!({"nope": true}));

        assert_eq!(*log.borrow(), vec![(json!("b"), json!(1)), (json!("a"), json!(2))]);
    }

    #[test]
    fn on_mount_fires_after_registration() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let slot: Rc<RefCell<Option<Keyval>>> = Rc::new(RefCell::new(None));

        let (seen_clone, slot_clone) = (seen.clone(), slot.clone());
        let kv = keyval(move |_| {
            let mounted = event::<()>();
            let (seen, slot) = (seen_clone.clone(), slot_clone.clone());
            mounted.watch(move |_| {
                let len = slot.borrow().as_ref().map_or(0, Keyval::len);
                seen.borrow_mut().push(len);
            });
            ModelOutput::new("id")
                .state("id", store(json!("")))
                .on_mount(mounted)
        })
        .unwrap();
        *slot.borrow_mut() = Some(kv.clone());

        kv.edit().add.emit(json!([{"id": "a"}, {"id": "b"}]));
        assert_eq!(*seen.borrow(), vec![2, 2]);
        slot.borrow_mut().take();
    }

    #[test]
    fn field_editors_follow_model_shape() {
        let kv = keyval(|_| {
            let id = store(json!(""));
            let title = store(json!(""));
            let len = title.map(|t| json!(t.as_str().map_or(0, str::len)));
            ModelOutput::new("id")
                .state("id", id)
                .state("title", title)
                .state("len", len)
        })
        .unwrap();

        assert_eq!(kv.edit_fields().keys().collect::<Vec<_>>(), vec!["title"]);

        kv.edit().add.emit(json!({"id": "a"}));
        kv.edit_field("title")
            .unwrap()
            .emit(Dispatch::one("a", json!("hello")).into_value());
        assert_eq!(kv.items().get(), vec![json!({"id": "a", "title": "hello", "len": 5})]);
    }

    #[test]
    fn shape_is_recursive_for_self_forks() {
        let kv = tree();
        let shape = kv.shape();
        assert!(matches!(
            shape.field("childs"),
            Some(ShapeNode::Collection(crate::NestedShape::Recursive))
        ));
        assert_eq!(kv.default_state(), Some(json!({"id": "", "childs": []})));
    }

    #[test]
    fn options_model_overrides_key() {
        let model = Model::define(|| ModelOutput::new("slug").state("slug", store(json!(""))))
            .unwrap();
        let kv = Keyval::with_options(KeyvalOptions::field("id").model(model));
        kv.edit().add.emit(json!({"slug": "x", "id": 1}));
        assert_eq!(kv.keys().get(), vec![Key::from("x")]);
    }
}
