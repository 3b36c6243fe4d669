// ============================================================================
// spark-keyval - Core Module
// Fundamental types and the thread-local runtime context
// ============================================================================

pub mod context;
pub mod types;

pub use context::{is_batching, pending_tasks, with_context, RuntimeContext};
pub use types::{CleanupFn, EqualsFn, Key, Subscription, UnitId};
