// ============================================================================
// In-process Host Engine
// ============================================================================
//
// An object-store database living in memory that behaves like the hosts this
// crate is written for:
//
// - every operation returns a request that completes later, by event
// - requests of a transaction execute in issue order, one per scheduler turn,
//   on a task driving that transaction
// - a transaction with nothing queued, that stays idle for one more turn,
//   completes on its own ("auto-commit"); later use fails with
//   "The transaction has finished."
// - abort reverts the transaction's writes from an undo log
//
// No locking between transactions: requests from overlapping transactions
// apply in the order their drivers run them.
//
// ============================================================================

mod cursor;
mod events;
mod handles;
mod request;
mod store;
mod transaction;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use super::{HostEngine, HostResult, HostTransaction};
use crate::core::{HostError, Key, TransactionMode};

use store::{IndexData, StoreData};
use transaction::MemoryTransaction;

/// Options for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreOptions {
    /// Dotted path of the in-line key inside each value; `None` for out-of-line keys.
    pub key_path: Option<String>,
    pub auto_increment: bool,
}

/// Options for creating an index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub unique: bool,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) stores: BTreeMap<String, StoreData>,
}

impl EngineState {
    pub(crate) fn store(&self, name: &str) -> HostResult<&StoreData> {
        self.stores.get(name).ok_or_else(|| store_not_found(name))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> HostResult<&mut StoreData> {
        self.stores.get_mut(name).ok_or_else(|| store_not_found(name))
    }
}

fn store_not_found(name: &str) -> HostError {
    HostError::not_found(format!(
        "Failed to execute 'objectStore': The specified object store '{}' was not found.",
        name
    ))
}

#[derive(Default)]
pub(crate) struct Engine {
    pub(crate) state: Mutex<EngineState>,
    transactions: Mutex<Vec<Weak<MemoryTransaction>>>,
    next_id: AtomicU64,
}

impl Engine {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Handle to an in-memory database. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryHost {
    engine: Arc<Engine>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_object_store(&self, name: &str, options: ObjectStoreOptions) -> HostResult<()> {
        let mut state = lock(&self.engine.state);
        if state.stores.contains_key(name) {
            return Err(HostError::constraint(format!(
                "Failed to execute 'createObjectStore': An object store with the specified name '{}' already exists.",
                name
            )));
        }
        if options.auto_increment && options.key_path.as_deref() == Some("") {
            return Err(HostError::new(
                "InvalidAccessError",
                "The autoIncrement option was set but the keyPath option was empty.",
            ));
        }
        state
            .stores
            .insert(name.to_string(), StoreData::new(options));
        Ok(())
    }

    pub fn delete_object_store(&self, name: &str) -> HostResult<()> {
        let mut state = lock(&self.engine.state);
        state
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| store_not_found(name))
    }

    pub fn create_index(
        &self,
        store_name: &str,
        name: &str,
        key_path: &str,
        options: IndexOptions,
    ) -> HostResult<()> {
        let mut state = lock(&self.engine.state);
        let store = state.store_mut(store_name)?;
        if store.indexes.contains_key(name) {
            return Err(HostError::constraint(format!(
                "Failed to execute 'createIndex': An index with the specified name '{}' already exists.",
                name
            )));
        }
        let index = IndexData {
            key_path: key_path.to_string(),
            unique: options.unique,
        };
        if index.unique {
            store.check_unique_existing(name, &index)?;
        }
        store.indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Committed records of a store, in key order.
    pub fn records(&self, store_name: &str) -> HostResult<Vec<(Key, Value)>> {
        let state = lock(&self.engine.state);
        Ok(state
            .store(store_name)?
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Completes every idle transaction as if the program had been suspended
    /// long enough for the host to auto-commit it. Returns how many finished.
    pub fn expire_transactions(&self) -> usize {
        self.live_transactions()
            .iter()
            .filter(|txn| txn.expire())
            .count()
    }

    /// Number of transactions that have not reached a terminal state.
    pub fn active_transactions(&self) -> usize {
        self.live_transactions()
            .iter()
            .filter(|txn| !txn.state_now().is_terminal())
            .count()
    }

    fn live_transactions(&self) -> Vec<Arc<MemoryTransaction>> {
        let mut registry = lock(&self.engine.transactions);
        registry.retain(|weak| weak.strong_count() > 0);
        registry.iter().filter_map(Weak::upgrade).collect()
    }
}

impl HostEngine for MemoryHost {
    fn object_store_names(&self) -> Vec<String> {
        lock(&self.engine.state).stores.keys().cloned().collect()
    }

    fn transaction(
        &self,
        mode: TransactionMode,
        store_names: &[String],
    ) -> HostResult<Arc<dyn HostTransaction>> {
        if store_names.is_empty() {
            return Err(HostError::new(
                "InvalidAccessError",
                "Failed to execute 'transaction' on 'IDBDatabase': The storeNames parameter was empty.",
            ));
        }
        {
            let state = lock(&self.engine.state);
            if let Some(missing) = store_names.iter().find(|n| !state.stores.contains_key(*n)) {
                return Err(HostError::not_found(format!(
                    "Failed to execute 'transaction' on 'IDBDatabase': One of the specified object stores ('{}') was not found.",
                    missing
                )));
            }
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            HostError::invalid_state("No async runtime is available to drive the transaction.")
        })?;

        let mut scope: Vec<String> = Vec::with_capacity(store_names.len());
        for name in store_names {
            if !scope.contains(name) {
                scope.push(name.clone());
            }
        }

        let id = self.engine.next_id();
        let txn = Arc::new_cyclic(|this| {
            MemoryTransaction::new(id, mode, scope, self.engine.clone(), this.clone())
        });
        {
            let mut registry = lock(&self.engine.transactions);
            registry.retain(|weak| weak.strong_count() > 0);
            registry.push(Arc::downgrade(&txn));
        }
        let span = tracing::info_span!("idb_transaction", id = txn.id(), mode = %mode);
        runtime.spawn(transaction::drive(txn.clone()).instrument(span));

        Ok(txn)
    }
}
