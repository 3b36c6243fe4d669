// ============================================================================
// spark-keyval - Spawn
// Instantiate a model for one entity inside its own disposable region
// ============================================================================

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::keyval::Keyval;
use crate::model::factory_paths::SeedHooks;
use crate::model::shape::ShapeNode;
use crate::model::{Model, StateField};
use crate::primitives::event::Event;
use crate::primitives::region::{detached_region, Region};
use crate::primitives::store::Store;
use crate::reactivity::equality::equals;

// =============================================================================
// PARAMETERS
// =============================================================================

/// One caller-supplied spawn parameter.
#[derive(Clone)]
pub enum SpawnParam {
    /// Initial value for a writable cell, or the initial items of a nested
    /// collection.
    Value(Value),
    /// Seeds a writable cell and keeps driving it afterwards.
    Store(Store<Value>),
    /// Subscribed to an API trigger of the instance.
    Handler(Rc<dyn Fn(&Value)>),
}

impl SpawnParam {
    fn kind(&self) -> &'static str {
        match self {
            SpawnParam::Value(_) => "value",
            SpawnParam::Store(_) => "store",
            SpawnParam::Handler(_) => "handler",
        }
    }
}

/// Named spawn parameters.
///
/// # Example
///
/// ```
/// use spark_keyval::SpawnParams;
/// use serde_json::json;
///
/// let params = SpawnParams::from_item(&json!({"id": "a", "count": 2}))
///     .handler("log", |v| println!("{v}"));
/// assert_eq!(params.len(), 3);
/// ```
#[derive(Clone, Default)]
pub struct SpawnParams {
    params: IndexMap<String, SpawnParam>,
}

impl SpawnParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `Value` parameter per field of a JSON object. Anything else
    /// yields no parameters.
    pub fn from_item(item: &Value) -> Self {
        let params = item
            .as_object()
            .map(|fields| {
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), SpawnParam::Value(value.clone())))
                    .collect()
            })
            .unwrap_or_default();
        Self { params }
    }

    pub fn insert(&mut self, name: impl Into<String>, param: SpawnParam) {
        self.params.insert(name.into(), param);
    }

    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, SpawnParam::Value(value));
        self
    }

    pub fn store(mut self, name: impl Into<String>, store: Store<Value>) -> Self {
        self.insert(name, SpawnParam::Store(store));
        self
    }

    pub fn handler(mut self, name: impl Into<String>, f: impl Fn(&Value) + 'static) -> Self {
        self.insert(name, SpawnParam::Handler(Rc::new(f)));
        self
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

// =============================================================================
// INSTANCE
// =============================================================================

/// A live model instance for one entity.
pub struct Instance {
    output: Store<Value>,
    fields: IndexMap<String, Store<Value>>,
    collections: IndexMap<String, Keyval>,
    api: IndexMap<String, Event<Value>>,
    on_mount: Option<Event<()>>,
    region: Region,
    /// Array views over nested items, kept alive for the output store
    _views: Vec<Store<Value>>,
}

impl Instance {
    /// Every state field merged into one object, nested collections as
    /// arrays of their items.
    pub fn output(&self) -> &Store<Value> {
        &self.output
    }

    pub fn field(&self, name: &str) -> Option<&Store<Value>> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &IndexMap<String, Store<Value>> {
        &self.fields
    }

    pub fn collection(&self, name: &str) -> Option<&Keyval> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> &IndexMap<String, Keyval> {
        &self.collections
    }

    pub fn api(&self, name: &str) -> Option<&Event<Value>> {
        self.api.get(name)
    }

    pub fn on_mount(&self) -> Option<&Event<()>> {
        self.on_mount.as_ref()
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn is_active(&self) -> bool {
        self.region.is_active()
    }

    /// Release the instance region, nested collections included.
    pub fn dispose(&self) {
        if self.region.is_active() {
            tracing::debug!(fields = self.fields.len(), "instance disposed");
        }
        self.region.dispose();
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("output", &self.output.get())
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// SPAWN
// =============================================================================

/// Sorted-out parameters, ready to apply.
#[derive(Default)]
struct Normalized {
    seeds: IndexMap<String, Value>,
    drivers: Vec<(String, Store<Value>)>,
    handlers: Vec<(String, Rc<dyn Fn(&Value)>)>,
    nested: Vec<(String, Value)>,
}

fn normalize(model: &Model, params: SpawnParams) -> Normalized {
    let mut out = Normalized::default();

    for (name, param) in params.params {
        match (model.shape().get(&name), param) {
            (Some(ShapeNode::Cell { derived: false }), SpawnParam::Value(value)) => {
                out.seeds.insert(name, value);
            }
            (Some(ShapeNode::Cell { derived: false }), SpawnParam::Store(store)) => {
                out.seeds.insert(name.clone(), store.get());
                out.drivers.push((name, store));
            }
            (Some(ShapeNode::Trigger), SpawnParam::Handler(f)) => {
                out.handlers.push((name, f));
            }
            (Some(ShapeNode::Collection(_)), SpawnParam::Value(items @ Value::Array(_))) => {
                out.nested.push((name, items));
            }
            (node, param) => {
                let expected = match node {
                    None => "nothing",
                    Some(ShapeNode::Cell { derived: true }) => "derived cell",
                    Some(ShapeNode::Cell { derived: false }) => "value or store",
                    Some(ShapeNode::Trigger) => "handler",
                    Some(ShapeNode::Collection(_)) => "array of items",
                };
                tracing::warn!(
                    field = %name,
                    expected,
                    got = param.kind(),
                    "spawn parameter does not match the model, skipped"
                );
            }
        }
    }
    out
}

/// Spawn one instance of `model`.
///
/// `create()` runs inside a fresh detached region. Writable cells recorded in
/// the model's factory paths are seeded as they are created; seeded cells
/// without a recorded path are written right after `create()` returns.
///
/// # Example
///
/// ```
/// use spark_keyval::{spawn, store, Model, ModelOutput, SpawnParams};
/// use serde_json::json;
///
/// let model = Model::define(|| {
///     ModelOutput::new("id")
///         .state("id", store(json!("")))
///         .state("count", store(json!(0)))
/// })
/// .unwrap();
///
/// let instance = spawn(&model, SpawnParams::new().value("id", json!("a")));
/// assert_eq!(instance.output().get(), json!({"id": "a", "count": 0}));
///
/// instance.field("count").unwrap().set(json!(3));
/// assert_eq!(instance.output().get(), json!({"id": "a", "count": 3}));
/// instance.dispose();
/// ```
pub fn spawn(model: &Model, params: SpawnParams) -> Instance {
    let Normalized {
        seeds,
        drivers,
        handlers,
        nested,
    } = normalize(model, params);

    let region = detached_region();
    region.set_seed(SeedHooks::new(model.factory_paths().clone(), seeds.clone()));
    let parts = region.within(|| model.run_create()).into_parts();
    region.clear_seed();

    let mut fields = IndexMap::new();
    let mut collections = IndexMap::new();
    let mut sources = Vec::with_capacity(parts.state.len());
    let mut views = Vec::new();

    region.within(|| {
        for (name, field) in parts.state {
            match field {
                StateField::Store(store) => {
                    sources.push((name.clone(), store.clone()));
                    fields.insert(name, store);
                }
                StateField::Collection(keyval) => {
                    let view = keyval.items().map(|items| Value::Array(items.clone()));
                    sources.push((name.clone(), view.clone()));
                    views.push(view);
                    collections.insert(name, keyval);
                }
            }
        }
    });

    // Cells created outside of create()'s own region have no factory path
    for (name, value) in seeds {
        if model.factory_paths().path_of(&name).is_none() {
            if let Some(store) = fields.get(&name) {
                store.set(value);
            }
        }
    }

    let output = region.within(|| {
        for (name, driver) in drivers {
            if let Some(target) = fields.get(&name) {
                let target = target.downgrade();
                driver.on_change(move |value| {
                    if let Some(target) = target.upgrade() {
                        target.set(value.clone());
                    }
                });
            }
        }

        for (name, handler) in handlers {
            if let Some(trigger) = parts.api.get(&name) {
                trigger.watch(move |payload| handler(payload));
            }
        }

        merged_output(&sources)
    });

    for (name, items) in nested {
        if let Some(keyval) = collections.get(&name) {
            keyval.edit().replace_all.emit(items);
        }
    }

    tracing::debug!(
        fields = fields.len(),
        collections = collections.len(),
        "instance spawned"
    );

    Instance {
        output,
        fields,
        collections,
        api: parts.api,
        on_mount: parts.on_mount,
        region,
        _views: views,
    }
}

/// One object store following every source.
fn merged_output(sources: &[(String, Store<Value>)]) -> Store<Value> {
    let weak: Vec<_> = sources
        .iter()
        .map(|(name, store)| (name.clone(), store.downgrade()))
        .collect();

    let compute: Rc<dyn Fn() -> Value> = Rc::new(move || {
        let mut object = Map::new();
        for (name, store) in &weak {
            if let Some(store) = store.upgrade() {
                object.insert(name.clone(), store.get());
            }
        }
        Value::Object(object)
    });

    let output = Store::derived(compute(), equals::<Value>);
    let stores: Vec<_> = sources.iter().map(|(_, store)| store.clone()).collect();
    output.follow(&stores, compute);
    output
}

// =============================================================================
// TESTS
// =============================================================================
