pub mod detector;
pub mod enumerator;
pub mod executor;
pub mod graph;
pub mod grouper;
pub mod profile;
pub mod thumbnail;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
