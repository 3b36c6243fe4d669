// ============================================================================
// spark-keyval - Reactivity Module
// Batching, deferred work, change detection and watcher plumbing
// ============================================================================

pub mod batching;
pub mod equality;
pub(crate) mod watchers;

pub use batching::{batch, defer, flush_deferred, is_batching, tick};
pub use equality::{equals, never_equals, rc_ptr_equals};
