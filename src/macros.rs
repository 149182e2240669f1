#![allow(unused_macros)]

/// Helper macro for locking items
///
/// A poisoned lock is recovered, since every guarded value is only ever replaced whole.
///
/// ```rust, ignore
///  let mut data = lock!(my_mutex);
///  *data = Some(42);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}
