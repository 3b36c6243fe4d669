// ============================================================================
// spark-keyval - Equality Functions
// Change detection used by stores before notifying watchers
// ============================================================================

use std::rc::Rc;

// =============================================================================
// STRICT EQUALITY (Default)
// =============================================================================

/// Default strict equality using PartialEq.
/// This is the default for `store()`.
///
/// # Example
/// ```
/// use spark_keyval::reactivity::equality::equals;
/// use serde_json::json;
///
/// assert!(equals(&42, &42));
/// assert!(!equals(&42, &43));
/// assert!(equals(&json!({"a": 1}), &json!({"a": 1})));
/// ```
pub fn equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

// =============================================================================
// NEVER EQUAL
// =============================================================================

/// Equality that always reports a change, so every write notifies.
///
/// # Example
/// ```
/// use spark_keyval::reactivity::equality::never_equals;
///
/// assert!(!never_equals(&1, &1));
/// ```
pub fn never_equals<T>(_a: &T, _b: &T) -> bool {
    false
}

// =============================================================================
// IDENTITY EQUALITY
// =============================================================================

/// Pointer identity for `Rc` values.
///
/// Collection state is published as a fresh `Rc` whenever a reducer changes
/// it, so identity is the change signal and no deep comparison is needed.
///
/// # Example
/// ```
/// use spark_keyval::reactivity::equality::rc_ptr_equals;
/// use std::rc::Rc;
///
/// let a = Rc::new(vec![1, 2]);
/// let b = a.clone();
/// let c = Rc::new(vec![1, 2]);
///
/// assert!(rc_ptr_equals(&a, &b));
/// assert!(!rc_ptr_equals(&a, &c));
/// ```
pub fn rc_ptr_equals<T>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::ptr_eq(a, b)
}

// =============================================================================
// TESTS
// =============================================================================
