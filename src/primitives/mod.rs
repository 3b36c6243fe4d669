// ============================================================================
// spark-keyval - Primitives Module
// Runtime primitives: store, event, region
// ============================================================================

pub mod event;
pub mod region;
pub mod store;

pub use event::{event, Event};
pub use region::{current_region, detached_region, on_region_dispose, region, Region};
pub use store::{combine, store, Store};
