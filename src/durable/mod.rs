// ============================================================================
// Durable Scope
// ============================================================================
//
// A caller-held handle that outlives any single host transaction. Every data
// operation goes through the same loop:
//
//   ensure a live transaction (opening one over all of the scope's stores and
//   rebinding every store handle to it) -> issue -> await
//     -> finished early? drop the live transaction and start over
//     -> otherwise return the outcome
//
// Store handles keep their identity across any number of rebinds, so callers
// never notice that the transaction underneath them was replaced.
//
// Live state:
//
//   absent --(operation)--> active --(finished early)--> absent --> ...
//   active --(commit / abort)--> absent
//
// ============================================================================

mod store;
mod transaction;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use store::DurableObjectStore;
pub use transaction::DurableTransaction;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
