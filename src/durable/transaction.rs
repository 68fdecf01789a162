use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::lock;
use super::store::{DurableObjectStore, StoreSlot};
use crate::core::{HostError, IdbError, Result, TransactionMode};
use crate::database::Database;
use crate::transaction::Transaction;

pub(crate) struct DurableInner {
    db: Database,
    mode: TransactionMode,
    store_names: Vec<String>,
    /// Never held across an await.
    live: Mutex<Option<Transaction>>,
    slots: Vec<Arc<StoreSlot>>,
}

/// A transaction that transparently reopens itself whenever the host
/// finishes it early.
///
/// Dropping the handle abandons a live transaction without aborting it; the
/// host completes it as usual.
#[derive(Clone)]
pub struct DurableTransaction {
    inner: Arc<DurableInner>,
}

impl DurableTransaction {
    /// Creates a scope over `store_names` in `mode`. No host transaction is
    /// opened until the first operation.
    pub fn new<S: AsRef<str>>(
        db: &Database,
        mode: TransactionMode,
        store_names: &[S],
    ) -> Result<Self> {
        if store_names.is_empty() {
            return Err(IdbError::Config(
                "transaction must have at least one object store".into(),
            ));
        }

        let existing = db.object_store_names();
        let mut names: Vec<String> = Vec::with_capacity(store_names.len());
        for name in store_names.iter().map(AsRef::as_ref) {
            if !existing.iter().any(|n| n == name) {
                return Err(IdbError::Host(HostError::not_found(format!(
                    "Failed to execute 'transaction' on 'IDBDatabase': One of the specified object stores ('{}') was not found.",
                    name
                ))));
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        let slots = names
            .iter()
            .map(|name| Arc::new(StoreSlot::new(name.clone())))
            .collect();

        Ok(Self {
            inner: Arc::new(DurableInner {
                db: db.clone(),
                mode,
                store_names: names,
                live: Mutex::new(None),
                slots,
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<DurableInner>) -> Self {
        Self { inner }
    }

    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    pub fn object_store_names(&self) -> &[String] {
        &self.inner.store_names
    }

    /// Whether a host transaction is currently bound.
    pub fn is_live(&self) -> bool {
        lock(&self.inner.live).is_some()
    }

    /// The handle for `name`. Every call returns the same underlying store.
    pub fn object_store(&self, name: &str) -> Result<DurableObjectStore> {
        let slot = self
            .inner
            .slots
            .iter()
            .find(|slot| slot.name() == name)
            .ok_or_else(|| IdbError::StoreNotInScope(name.to_string()))?;
        Ok(DurableObjectStore::new(self.inner.clone(), slot.clone()))
    }

    /// Aborts the live transaction. Returns `false` when there was none or
    /// the host had already finished it.
    pub fn abort(&self) -> Result<bool> {
        let Some(txn) = lock(&self.inner.live).take() else {
            return Ok(false);
        };
        match txn.abort() {
            Ok(()) => Ok(true),
            Err(err) if err.is_txn_finished() => {
                debug!("Durable abort found transaction {} already finished", txn.id());
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Commits the live transaction, if any. A transaction the host already
    /// finished counts as committed.
    pub fn commit(&self) -> Result<()> {
        let Some(txn) = lock(&self.inner.live).take() else {
            return Ok(());
        };
        match txn.commit() {
            Ok(()) => Ok(()),
            Err(err) if err.is_txn_finished() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Runs `f` against the live transaction, reopening it and running `f`
    /// again whenever it fails because the transaction finished early.
    pub async fn txn_with_retry<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner.run_with_retry(f).await
    }
}

impl fmt::Debug for DurableTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableTransaction")
            .field("mode", &self.inner.mode)
            .field("store_names", &self.inner.store_names)
            .field("live", &lock(&self.inner.live).as_ref().map(Transaction::id))
            .finish()
    }
}

impl DurableInner {
    /// The live transaction, opening one and rebinding every store if absent.
    fn ensure_transaction(&self) -> Result<Transaction> {
        let mut live = lock(&self.live);
        if let Some(txn) = live.as_ref() {
            return Ok(txn.clone());
        }

        let txn = self.db.transaction(self.mode, self.store_names.as_slice())?;
        for slot in &self.slots {
            slot.rebind(txn.object_store(slot.name())?);
        }
        debug!(
            "Durable scope over {:?} bound to transaction {}",
            self.store_names,
            txn.id()
        );
        *live = Some(txn.clone());
        Ok(txn)
    }

    /// Drops the live transaction if it is still `txn`.
    fn discard(&self, txn: &Transaction) {
        let mut live = lock(&self.live);
        if live.as_ref().is_some_and(|current| current.id() == txn.id()) {
            *live = None;
        }
    }

    pub(crate) async fn run_with_retry<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.db.config().retry.clone();
        let mut attempt = 1usize;
        loop {
            let outcome = match self.ensure_transaction() {
                Ok(txn) => f(txn.clone()).await.map_err(|err| (Some(txn), err)),
                Err(err) => Err((None, err)),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err((txn, err)) if err.is_txn_finished() => {
                    // Finished while rebinding: the scope was never stored as live.
                    if let Some(txn) = &txn {
                        self.discard(txn);
                    }
                    if !policy.allows_retry(attempt) {
                        warn!(
                            "Durable operation giving up after {} attempts: {}",
                            attempt, err
                        );
                        return Err(err);
                    }
                    debug!(
                        "Durable transaction {:?} finished early (attempt {}), reopening",
                        txn.as_ref().map(Transaction::id),
                        attempt
                    );
                    attempt += 1;
                }
                Err((_, err)) => return Err(err),
            }
        }
    }
}
