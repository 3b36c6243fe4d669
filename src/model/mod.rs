// ============================================================================
// spark-keyval - Model
// Declarative per-entity subgraph definitions
// ============================================================================
//
// A Model wraps a `create` closure that builds one entity's stores, nested
// collections and API events. Defining a model runs `create` once inside a
// throwaway probe region to validate what it returns and to record:
//
// - the key field, required fields, nested-collection fields, API fields
// - the structural shape (see `shape`)
// - factory paths for seeding initial state (see `factory_paths`)
//
// Nothing about a Model changes after `define` returns.
// ============================================================================

pub mod factory_paths;
pub mod shape;

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::ModelError;
use crate::keyval::Keyval;
use crate::primitives::event::Event;
use crate::primitives::region::detached_region;
use crate::primitives::store::Store;
use crate::spawn::{spawn, SpawnParams};

use factory_paths::{collect_factory_paths, FactoryPathMap};
use shape::{NestedShape, ShapeNode};

// =============================================================================
// MODEL OUTPUT
// =============================================================================

/// One state field returned by `create`.
#[derive(Clone)]
pub enum StateField {
    Store(Store<Value>),
    Collection(Keyval),
}

impl From<Store<Value>> for StateField {
    fn from(store: Store<Value>) -> Self {
        StateField::Store(store)
    }
}

impl From<&Store<Value>> for StateField {
    fn from(store: &Store<Value>) -> Self {
        StateField::Store(store.clone())
    }
}

impl From<Keyval> for StateField {
    fn from(keyval: Keyval) -> Self {
        StateField::Collection(keyval)
    }
}

impl From<&Keyval> for StateField {
    fn from(keyval: &Keyval) -> Self {
        StateField::Collection(keyval.clone())
    }
}

/// What a model's `create` closure returns.
///
/// # Example
///
/// ```
/// use spark_keyval::{event, store, ModelOutput};
/// use serde_json::{json, Value};
///
/// let output = ModelOutput::new("id")
///     .state("id", store(json!("")))
///     .state("count", store(json!(0)))
///     .api("reset", event::<Value>())
///     .optional(["count"]);
/// # let _ = output;
/// ```
pub struct ModelOutput {
    key: String,
    state: IndexMap<String, StateField>,
    api: IndexMap<String, Event<Value>>,
    optional: Vec<String>,
    on_mount: Option<Event<()>>,
}

impl ModelOutput {
    /// Start an output keyed by `key`, which must name a writable state
    /// store.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: IndexMap::new(),
            api: IndexMap::new(),
            optional: Vec::new(),
            on_mount: None,
        }
    }

    pub fn state(mut self, name: impl Into<String>, field: impl Into<StateField>) -> Self {
        self.state.insert(name.into(), field.into());
        self
    }

    pub fn api(mut self, name: impl Into<String>, trigger: Event<Value>) -> Self {
        self.api.insert(name.into(), trigger);
        self
    }

    /// Mark writable state fields as not required on input.
    pub fn optional<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Event fired once, deferred, after the instance joins its collection.
    pub fn on_mount(mut self, trigger: Event<()>) -> Self {
        self.on_mount = Some(trigger);
        self
    }

    pub(crate) fn into_parts(self) -> OutputParts {
        OutputParts {
            state: self.state,
            api: self.api,
            on_mount: self.on_mount,
        }
    }
}

/// Output pieces the spawner keeps.
pub(crate) struct OutputParts {
    pub(crate) state: IndexMap<String, StateField>,
    pub(crate) api: IndexMap<String, Event<Value>>,
    pub(crate) on_mount: Option<Event<()>>,
}

// =============================================================================
// MODEL
// =============================================================================

pub(crate) type CreateFn = Rc<dyn Fn() -> ModelOutput>;

struct ModelInner {
    create: CreateFn,
    key_field: String,
    required: Vec<String>,
    keyval_fields: Vec<String>,
    api_fields: Vec<String>,
    shape: IndexMap<String, ShapeNode>,
    factory_paths: Rc<FactoryPathMap>,
    default_state: OnceCell<Value>,
}

/// A validated, immutable entity definition.
///
/// # Example
///
/// ```
/// use spark_keyval::{store, Model, ModelOutput};
/// use serde_json::json;
///
/// let counter = Model::define(|| {
///     let id = store(json!(""));
///     let count = store(json!(0));
///     let doubled = count.map(|n| json!(n.as_i64().unwrap_or(0) * 2));
///     ModelOutput::new("id")
///         .state("id", id)
///         .state("count", count)
///         .state("doubled", doubled)
///         .optional(["count"])
/// })
/// .unwrap();
///
/// assert_eq!(counter.key_field(), "id");
/// assert_eq!(counter.required_fields(), ["id"]);
/// assert_eq!(counter.default_state(), json!({"id": "", "count": 0, "doubled": 0}));
/// ```
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

impl Model {
    /// Validate `create` and build the model definition.
    pub fn define(create: impl Fn() -> ModelOutput + 'static) -> Result<Model, ModelError> {
        Self::define_with(Rc::new(create), None)
    }

    /// Define a model for the collection identified by `defining`. Nested
    /// collection fields forked from that collection are recorded as
    /// recursive references.
    pub(crate) fn define_with(create: CreateFn, defining: Option<u64>) -> Result<Model, ModelError> {
        let probe = detached_region();
        let output = probe.within(|| create());
        let described = describe(&probe, output, defining);
        probe.dispose();

        let described = described?;
        tracing::debug!(
            key = %described.key_field,
            fields = described.shape.len(),
            "model defined"
        );

        Ok(Model {
            inner: Rc::new(ModelInner {
                create,
                key_field: described.key_field,
                required: described.required,
                keyval_fields: described.keyval_fields,
                api_fields: described.api_fields,
                shape: described.shape,
                factory_paths: Rc::new(described.factory_paths),
                default_state: OnceCell::new(),
            }),
        })
    }

    pub fn key_field(&self) -> &str {
        &self.inner.key_field
    }

    /// Writable state fields that are not optional (key included).
    pub fn required_fields(&self) -> &[String] {
        &self.inner.required
    }

    pub fn keyval_fields(&self) -> &[String] {
        &self.inner.keyval_fields
    }

    pub fn api_fields(&self) -> &[String] {
        &self.inner.api_fields
    }

    pub fn shape(&self) -> &IndexMap<String, ShapeNode> {
        &self.inner.shape
    }

    pub fn factory_paths(&self) -> &Rc<FactoryPathMap> {
        &self.inner.factory_paths
    }

    /// Initial value of every state field, nested collections as empty
    /// arrays. Computed once, by spawning a throwaway instance.
    pub fn default_state(&self) -> Value {
        self.inner
            .default_state
            .get_or_init(|| {
                let instance = spawn(self, SpawnParams::new());
                let state = instance.output().get();
                instance.dispose();
                state
            })
            .clone()
    }

    pub(crate) fn run_create(&self) -> ModelOutput {
        (self.inner.create)()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("key_field", &self.inner.key_field)
            .field("shape", &self.inner.shape)
            .finish()
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

struct Described {
    key_field: String,
    required: Vec<String>,
    keyval_fields: Vec<String>,
    api_fields: Vec<String>,
    shape: IndexMap<String, ShapeNode>,
    factory_paths: FactoryPathMap,
}

fn describe(
    probe: &crate::primitives::region::Region,
    output: ModelOutput,
    defining: Option<u64>,
) -> Result<Described, ModelError> {
    let ModelOutput {
        key,
        state,
        api,
        optional,
        on_mount,
    } = output;

    if let Some(field) = api.keys().find(|name| state.contains_key(*name)) {
        return Err(ModelError::UnexpectedField {
            field: field.clone(),
        });
    }
    if let Some(field) = optional.iter().find(|name| !state.contains_key(*name)) {
        return Err(ModelError::UnexpectedField {
            field: field.clone(),
        });
    }

    match state.get(&key) {
        None => return Err(ModelError::MissingKeyField { key }),
        Some(StateField::Store(store)) if store.is_writable() => {}
        Some(_) => return Err(ModelError::KeyFieldNotWritable { key }),
    }
    if optional.contains(&key) {
        return Err(ModelError::OptionalKeyField { key });
    }
    if on_mount.as_ref().is_some_and(|trigger| !trigger.is_callable()) {
        return Err(ModelError::OnMountNotCallable);
    }

    let mut required = Vec::new();
    let mut keyval_fields = Vec::new();
    let mut shape = IndexMap::new();
    let mut writable_units = Vec::new();

    for (name, field) in &state {
        let node = match field {
            StateField::Store(store) => {
                if store.is_writable() {
                    writable_units.push((name.clone(), store.id()));
                    if !optional.contains(name) {
                        required.push(name.clone());
                    }
                }
                ShapeNode::Cell {
                    derived: !store.is_writable(),
                }
            }
            StateField::Collection(keyval) => {
                keyval_fields.push(name.clone());
                if defining.is_some_and(|id| id == keyval.definition_id()) {
                    ShapeNode::Collection(NestedShape::Recursive)
                } else {
                    ShapeNode::Collection(NestedShape::Shape(keyval.shape()))
                }
            }
        };
        shape.insert(name.clone(), node);
    }
    for name in api.keys() {
        shape.insert(name.clone(), ShapeNode::Trigger);
    }

    Ok(Described {
        key_field: key,
        required,
        keyval_fields,
        api_fields: api.keys().cloned().collect(),
        shape,
        factory_paths: collect_factory_paths(probe, &writable_units),
    })
}

// =============================================================================
// TESTS
// =============================================================================
