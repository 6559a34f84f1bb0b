//! Lock helpers shared by the sensor, circuit and link layers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquire `m`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate is a short field copy, so the data
/// behind a poisoned lock is still consistent.
pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
