// ============================================================================
// spark-keyval - Collection Engine
// Reducers over the three index-aligned arrays of one collection
// ============================================================================
//
// Every edit event is routed into `Engine::run` as one `Op`. An op runs in a
// `Transaction`, which clones the published arrays at most once, and
// publishes at most one new `ListState` when it is done.
//
// Structure first, leaves second: writes into instance cells, nested
// collection edits, API forwarding and mount signals are all deferred until
// the structural update has been published. Ops that arrive while another
// op is being applied (from a spawned instance, for example) are deferred
// the same way.
// ============================================================================

use std::cell::Cell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::types::Key;
use crate::keyval::edit::{as_items, merge, EditApi, MapRequest, Remove};
use crate::keyval::edit_field::field_editors;
use crate::keyval::instance_api::Dispatch;
use crate::keyval::state::{ListState, Transaction};
use crate::keyval::KeyvalDef;
use crate::model::shape::KeySpec;
use crate::primitives::event::Event;
use crate::primitives::region::outside_regions;
use crate::primitives::store::Store;
use crate::reactivity::batching::{batch, defer};
use crate::reactivity::equality::rc_ptr_equals;
use crate::spawn::{spawn, Instance, SpawnParam, SpawnParams};

// =============================================================================
// OPS
// =============================================================================

enum Op {
    Add(Value),
    Set(Value),
    Update(Value),
    ReplaceAll(Value),
    Remove(Remove),
    Map(MapRequest),
    /// An instance's output changed; fold it into the cached item.
    Enrich {
        key: Key,
        instance: Weak<Instance>,
        output: Value,
    },
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::Add(_) => "add",
            Op::Set(_) => "set",
            Op::Update(_) => "update",
            Op::ReplaceAll(_) => "replace_all",
            Op::Remove(_) => "remove",
            Op::Map(_) => "map",
            Op::Enrich { .. } => "enrich",
        }
    }
}

/// How a freshly spawned instance receives nested sub-arrays.
#[derive(Clone, Copy)]
enum NestedMode {
    Add,
    ReplaceAll,
}

// =============================================================================
// ENGINE
// =============================================================================

pub(crate) struct Engine {
    def: Option<Rc<KeyvalDef>>,
    list: Store<Rc<ListState>>,
    items: Store<Vec<Value>>,
    keys: Store<Vec<Key>>,
    edit: EditApi,
    api: IndexMap<String, Event<Value>>,
    field_edits: IndexMap<String, Event<Value>>,
    applying: Cell<bool>,
    disposed: Cell<bool>,
}

impl Engine {
    /// Build the engine for `def`. Without a definition the engine is an
    /// empty stub that cannot key any item.
    pub(crate) fn build(def: Option<Rc<KeyvalDef>>) -> Rc<Engine> {
        outside_regions(|| {
            let list = Store::with_equals(Rc::new(ListState::default()), rc_ptr_equals);
            let items = list.map(|state| state.items.clone());
            let keys = list.map(|state| state.keys.clone());
            let edit = EditApi::new();

            let api: IndexMap<String, Event<Value>> = def
                .as_ref()
                .and_then(|def| def.model.as_ref())
                .map(|model| {
                    model
                        .api_fields()
                        .iter()
                        .map(|name| (name.clone(), Event::new()))
                        .collect()
                })
                .unwrap_or_default();

            let field_edits = def
                .as_ref()
                .filter(|def| def.model.is_some())
                .map(|def| field_editors(&def.shape, &edit.update))
                .unwrap_or_default();

            let engine = Rc::new(Engine {
                def,
                list,
                items,
                keys,
                edit,
                api,
                field_edits,
                applying: Cell::new(false),
                disposed: Cell::new(false),
            });
            engine.wire();
            engine
        })
    }

    fn wire(self: &Rc<Self>) {
        fn route<T: 'static>(engine: &Rc<Engine>, event: &Event<T>, op: impl Fn(&T) -> Op + 'static) {
            let weak = Rc::downgrade(engine);
            event.watch(move |payload| {
                if let Some(engine) = weak.upgrade() {
                    engine.run(op(payload));
                }
            });
        }

        route(self, &self.edit.add, |v| Op::Add(v.clone()));
        route(self, &self.edit.set, |v| Op::Set(v.clone()));
        route(self, &self.edit.update, |v| Op::Update(v.clone()));
        route(self, &self.edit.replace_all, |v| Op::ReplaceAll(v.clone()));
        route(self, &self.edit.remove, |r| Op::Remove(r.clone()));
        route(self, &self.edit.map, |m| Op::Map(m.clone()));

        for (name, trigger) in &self.api {
            let weak = Rc::downgrade(self);
            let name = name.clone();
            trigger.watch(move |payload| {
                if let Some(engine) = weak.upgrade() {
                    engine.dispatch(&name, payload);
                }
            });
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub(crate) fn items(&self) -> &Store<Vec<Value>> {
        &self.items
    }

    pub(crate) fn keys(&self) -> &Store<Vec<Key>> {
        &self.keys
    }

    pub(crate) fn edit(&self) -> &EditApi {
        &self.edit
    }

    pub(crate) fn api(&self) -> &IndexMap<String, Event<Value>> {
        &self.api
    }

    pub(crate) fn field_edits(&self) -> &IndexMap<String, Event<Value>> {
        &self.field_edits
    }

    pub(crate) fn state(&self) -> Rc<ListState> {
        self.list.get()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn key_spec(&self) -> Option<&KeySpec> {
        self.def.as_ref().map(|def| &def.key)
    }

    fn key_of(&self, item: &Value) -> Option<Key> {
        let key = self.key_spec().and_then(|spec| spec.extract(item));
        if key.is_none() {
            tracing::warn!(item = %item, "item key cannot be derived, skipped");
        }
        key
    }

    // =========================================================================
    // RUN
    // =========================================================================

    fn run(self: &Rc<Self>, op: Op) {
        if self.disposed.get() {
            tracing::debug!(op = op.name(), "edit on a disposed collection ignored");
            return;
        }
        if self.applying.get() {
            let weak = Rc::downgrade(self);
            defer(move || {
                if let Some(engine) = weak.upgrade() {
                    engine.run(op);
                }
            });
            return;
        }

        struct Applying<'a>(&'a Cell<bool>);

        impl Drop for Applying<'_> {
            fn drop(&mut self) {
                self.0.set(false);
            }
        }

        // Ops issued by watchers of the published state queue behind it and
        // drain once `applying` is cleared and the batch exits
        batch(|| {
            self.applying.set(true);
            let _applying = Applying(&self.applying);

            let name = op.name();
            let mut tx = Transaction::new(self.list.get());
            self.apply(&mut tx, op);

            if let Some(next) = tx.commit() {
                tracing::trace!(op = name, len = next.len(), "collection state published");
                self.list.write(next);
            }
        });
    }

    fn apply(self: &Rc<Self>, tx: &mut Transaction, op: Op) {
        match op {
            Op::Add(payload) => {
                for item in as_items(&payload) {
                    let Some(key) = self.key_of(&item) else { continue };
                    if tx.state().index_of(&key).is_none() {
                        self.insert_new(tx, key, &item, NestedMode::Add);
                    }
                }
            }
            Op::Set(payload) => {
                for item in as_items(&payload) {
                    let Some(key) = self.key_of(&item) else { continue };
                    match tx.state().index_of(&key) {
                        Some(idx) => self.apply_update(tx, idx, &item),
                        None => self.insert_new(tx, key, &item, NestedMode::Add),
                    }
                }
            }
            Op::Update(payload) => {
                for partial in as_items(&payload) {
                    let Some(key) = self.key_of(&partial) else { continue };
                    if let Some(idx) = tx.state().index_of(&key) {
                        self.apply_update(tx, idx, &partial);
                    }
                }
            }
            Op::ReplaceAll(payload) => {
                for instance in tx.state().live_instances() {
                    instance.dispose();
                }
                tx.reset();
                for item in as_items(&payload) {
                    let Some(key) = self.key_of(&item) else { continue };
                    if tx.state().index_of(&key).is_none() {
                        self.insert_new(tx, key, &item, NestedMode::ReplaceAll);
                    }
                }
            }
            Op::Remove(request) => self.apply_remove(tx, request),
            Op::Map(request) => self.apply_map(tx, request),
            Op::Enrich {
                key,
                instance,
                output,
            } => {
                let Some(idx) = tx.state().index_of(&key) else { return };
                let same_instance = match (&tx.state().instances[idx], instance.upgrade()) {
                    (Some(current), Some(instance)) => Rc::ptr_eq(current, &instance),
                    _ => false,
                };
                if !same_instance {
                    return;
                }
                let enriched = merge(&tx.state().items[idx], &output);
                if enriched != tx.state().items[idx] {
                    tx.refresh().items[idx] = enriched;
                }
            }
        }
    }

    /// Spawn (when there is a model) and append one entity.
    fn insert_new(self: &Rc<Self>, tx: &mut Transaction, key: Key, input: &Value, mode: NestedMode) {
        let Some(model) = self.def.as_ref().and_then(|def| def.model.clone()) else {
            tx.refresh().push(key, input.clone(), None);
            return;
        };

        let mut params = SpawnParams::new();
        for (name, node) in model.shape() {
            if node.is_writable_cell() {
                if let Some(value) = input.get(name) {
                    params.insert(name.clone(), SpawnParam::Value(value.clone()));
                }
            }
        }

        let instance = Rc::new(spawn(&model, params));
        let enriched = merge(input, &instance.output().get());

        let weak_engine = Rc::downgrade(self);
        let weak_instance = Rc::downgrade(&instance);
        let output_key = key.clone();
        instance.region().within(|| {
            instance.output().on_change(move |output| {
                if let Some(engine) = weak_engine.upgrade() {
                    engine.run(Op::Enrich {
                        key: output_key.clone(),
                        instance: weak_instance.clone(),
                        output: output.clone(),
                    });
                }
            });
        });

        for (name, nested) in instance.collections() {
            let Some(items @ Value::Array(_)) = input.get(name) else { continue };
            let target = match mode {
                NestedMode::Add => nested.edit().add,
                NestedMode::ReplaceAll => nested.edit().replace_all,
            };
            let items = items.clone();
            defer(move || target.emit(items));
        }

        if let Some(on_mount) = instance.on_mount().cloned() {
            let weak_instance = Rc::downgrade(&instance);
            defer(move || {
                // Removed before the deferred queue drained
                if weak_instance.upgrade().is_some_and(|instance| instance.is_active()) {
                    on_mount.emit(());
                }
            });
        }

        tx.refresh().push(key, enriched, Some(instance));
    }

    /// Merge `partial` into the entity at `idx` and forward it to the
    /// instance, deferred.
    fn apply_update(self: &Rc<Self>, tx: &mut Transaction, idx: usize, partial: &Value) {
        let state = tx.refresh();
        let merged = merge(&state.items[idx], partial);
        state.items[idx] = merged;

        let Some(instance) = state.instances[idx].clone() else { return };
        let Some(fields) = partial.as_object() else { return };

        for (name, value) in fields {
            if let Some(store) = instance.field(name).filter(|store| store.is_writable()) {
                let store = store.clone();
                let value = value.clone();
                defer(move || {
                    store.set(value);
                });
            } else if let (Some(nested), Value::Array(_)) = (instance.collection(name), value) {
                let target = nested.edit().replace_all;
                let value = value.clone();
                defer(move || target.emit(value));
            }
        }

        // Values given for derived fields are overwritten by the instance
        let key = state.keys[idx].clone();
        let weak_engine = Rc::downgrade(self);
        let weak_instance = Rc::downgrade(&instance);
        defer(move || {
            if let (Some(engine), Some(instance)) = (weak_engine.upgrade(), weak_instance.upgrade()) {
                let output = instance.output().get();
                engine.run(Op::Enrich {
                    key,
                    instance: weak_instance,
                    output,
                });
            }
        });
    }

    fn apply_remove(&self, tx: &mut Transaction, request: Remove) {
        let state = tx.state();
        let mut indices: Vec<usize> = match request {
            Remove::Keys(keys) => keys.iter().filter_map(|key| state.index_of(key)).collect(),
            Remove::Where(predicate) => state
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| predicate(item))
                .map(|(idx, _)| idx)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();

        for idx in indices.into_iter().rev() {
            if let Some(instance) = tx.refresh().remove(idx) {
                instance.dispose();
            }
        }
    }

    fn apply_map(self: &Rc<Self>, tx: &mut Transaction, request: MapRequest) {
        let MapRequest { keys, map, upsert } = request;
        let key_field = self.key_spec().and_then(|spec| spec.field_name()).map(str::to_owned);

        let upsert = match (upsert, &key_field) {
            (true, None) => {
                tracing::warn!("map upsert needs a key field, not a key function; continuing without upsert");
                false
            }
            (upsert, _) => upsert,
        };

        for key in keys {
            let mut idx = tx.state().index_of(&key);
            if let (None, true, Some(field)) = (idx, upsert, &key_field) {
                let mut stub = Map::new();
                stub.insert(field.clone(), key.to_value());
                self.insert_new(tx, key.clone(), &Value::Object(stub), NestedMode::Add);
                idx = tx.state().index_of(&key);
            }
            let Some(idx) = idx else { continue };

            let current = &tx.state().items[idx];
            let mapped = map(current);
            if &mapped != current {
                self.apply_update(tx, idx, &mapped);
            }
        }
    }

    // =========================================================================
    // INSTANCE API
    // =========================================================================

    fn dispatch(&self, name: &str, payload: &Value) {
        if self.disposed.get() {
            return;
        }
        let Some(dispatch) = Dispatch::parse(payload) else {
            tracing::warn!(api = name, payload = %payload, "malformed api payload ignored");
            return;
        };

        let state = self.list.get();
        for (key, data) in dispatch.into_entries() {
            let Some(idx) = state.index_of(&key) else { continue };
            let Some(trigger) = state.instances[idx]
                .as_ref()
                .and_then(|instance| instance.api(name))
                .cloned()
            else {
                continue;
            };
            defer(move || trigger.emit(data));
        }
    }

    // =========================================================================
    // DISPOSE
    // =========================================================================

    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let state = self.list.get();
        for instance in state.live_instances() {
            instance.dispose();
        }
        tracing::debug!(len = state.len(), "collection disposed");
        self.list.write(Rc::new(ListState::default()));
    }
}
