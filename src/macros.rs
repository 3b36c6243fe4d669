// ============================================================================
// spark-keyval - Ergonomic Macros
// ============================================================================

/// Clone variables into a move closure.
///
/// Saves the boilerplate of cloning `Rc`s and store handles before moving
/// them into a watcher or a `create` closure.
///
/// # Usage
///
/// ```rust
/// use spark_keyval::{cloned, store};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let count = store(1);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// count.watch(cloned!(log => move |v| log.borrow_mut().push(*v)));
/// count.set(2);
///
/// assert_eq!(*log.borrow(), vec![1, 2]);
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}

/// Watch a store or an event with automatic variable capturing.
///
/// Wraps `source.watch(cloned!(... => move |value| ...))`.
///
/// # Usage
///
/// ```rust
/// use spark_keyval::{event, watch};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let clicked = event::<i32>();
/// let total = Rc::new(Cell::new(0));
///
/// watch!(clicked, total => |n| total.set(total.get() + n));
/// clicked.emit(2);
/// clicked.emit(3);
///
/// assert_eq!(total.get(), 5);
/// ```
#[macro_export]
macro_rules! watch {
    // Case 1: With captures
    ($source:expr, $($deps:ident),+ => |$v:pat_param| $body:expr) => {
        $source.watch($crate::cloned!($($deps),+ => move |$v| $body))
    };
    // Case 2: No captures
    ($source:expr => |$v:pat_param| $body:expr) => {
        $source.watch(move |$v| $body)
    };
}
