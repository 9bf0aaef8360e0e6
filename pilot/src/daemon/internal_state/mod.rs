use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use state::InternalState;

/// The main struct used to represent the daemon's current state.
pub mod state;
/// The in-memory task cache in front of the persistence layer.
pub mod store;

pub type SharedState = Arc<Mutex<InternalState>>;

/// Lock the shared state.
///
/// A panic while holding the lock doesn't leave the state in an inconsistent shape, as all
/// modifications are single assignments. Hence, a poisoned lock is simply taken over.
pub fn lock(state: &SharedState) -> MutexGuard<'_, InternalState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
