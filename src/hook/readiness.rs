//! One-shot readiness notification.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::{Error, Result};

/// A value that becomes available exactly once.
///
/// Consumers block in [`Readiness::wait`] until a producer calls [`Readiness::fulfill`]. There
/// is no timeout: a pipeline that never produces its metadata never instantiates.
#[derive(Debug)]
pub struct Readiness<T> {
    value: Mutex<Option<Arc<T>>>,
    ready: Condvar,
}

impl<T> Default for Readiness<T> {
    fn default() -> Self {
        Readiness {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

impl<T> Readiness<T> {
    /// Create an unfulfilled notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the value and wake every waiter.
    ///
    /// # Errors
    /// Returns [`Error::SessionState`] if the value was already published.
    pub fn fulfill(&self, value: T) -> Result<()> {
        let mut slot = lock!(self.value);
        if slot.is_some() {
            return Err(Error::SessionState("readiness fulfilled twice".to_string()));
        }
        *slot = Some(Arc::new(value));
        self.ready.notify_all();
        Ok(())
    }

    /// Block until the value is published.
    pub fn wait(&self) -> Arc<T> {
        let mut slot = lock!(self.value);
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// The value, if already published.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        lock!(self.value).clone()
    }

    /// `true` once the value is published.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        lock!(self.value).is_some()
    }
}
