//! Exclusive access to the artifact that concurrent sub-tasks write into.
//!
//! A [`SharedArtifact`] wraps the one output object of a queue item. Every
//! mutation goes through [`SharedArtifact::with_lock`], which holds the lock
//! for exactly one closure call. Callers do their slow work (remote calls)
//! outside the closure and only hand in the final, in-memory write.

use std::sync::{Arc, Mutex, PoisonError};

/// Cloneable handle to a value mutated by many tasks, one mutation at a time.
#[derive(Debug)]
pub struct SharedArtifact<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for SharedArtifact<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedArtifact<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Apply `mutation` while holding the lock.
    ///
    /// The lock is released when `mutation` returns, errors, or panics. A lock
    /// poisoned by an earlier panicking mutation is recovered rather than
    /// propagated, so one broken sub-task cannot wedge its siblings.
    pub fn with_lock<R>(&self, mutation: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        mutation(&mut guard)
    }

    /// Take the value back once this is the last handle.
    ///
    /// Returns the handle unchanged if other clones are still alive.
    pub fn into_inner(self) -> Result<T, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(PoisonError::into_inner)),
            Err(inner) => Err(Self { inner }),
        }
    }
}
