// ============================================================================
// spark-keyval - Reactive Keyed Collections for Rust
// ============================================================================
//
// Ordered, keyed entity collections where every entity can own a spawned
// model instance, which may itself hold nested collections (trees included).
//
// Layers, leaves first:
//
//   core / reactivity / primitives   Store, Event, Region, batch/defer/tick
//   lazy                             deferred construction queue
//   model                            definitions, shapes, factory paths
//   spawn                            one model instance per entity
//   keyval                           the collection engine and its APIs
//   lens                             path-addressed derived readers
// ============================================================================

pub mod core;
pub mod error;
pub mod keyval;
pub mod lazy;
pub mod lens;
mod macros;
pub mod model;
pub mod primitives;
pub mod reactivity;
pub mod spawn;

// Runtime
pub use core::context::{pending_tasks, with_context, RuntimeContext};
pub use core::types::{CleanupFn, EqualsFn, Key, Subscription, UnitId};
pub use primitives::event::{event, Event};
pub use primitives::region::{current_region, detached_region, on_region_dispose, region, Region};
pub use primitives::store::{combine, store, Store};
pub use reactivity::batching::{batch, defer, flush_deferred, is_batching, tick};
pub use reactivity::equality::{equals, never_equals, rc_ptr_equals};

// Lazy construction
pub use lazy::{flush_lazy_inits, lazy_init, pending_lazy_inits, LazyInit};

// Models and instances
pub use error::{LensError, ModelError};
pub use model::factory_paths::{collect_factory_paths, FactoryPathMap, PathEntry};
pub use model::shape::{resolve_nested, KeySpec, KeyvalShape, NestedShape, ShapeNode};
pub use model::{Model, ModelOutput, StateField};
pub use spawn::{spawn, Instance, SpawnParam, SpawnParams};

// Collections
pub use keyval::{keyval, Dispatch, EditApi, Keyval, KeyvalOptions, KeyvalRef, MapRequest, Remove};
pub use lens::{
    lens, path_reader_store, path_reader_with, CollectionLens, FieldLens, ItemLens, KeyRef,
    PathStep,
};

// =============================================================================
// TESTS
// =============================================================================
