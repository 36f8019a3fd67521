//! Mutex helper shared by the engine components.
//!
//! Locks are only held for short synchronous sections, never across an
//! await point. A poisoned lock still guards consistent state because every
//! critical section is a single transition, so the guard is recovered.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
