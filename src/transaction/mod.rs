// ============================================================================
// Transaction Scope
// ============================================================================
//
// Thin handles over a host transaction and the stores and indexes it covers.
// Every operation issues a host request and returns it wrapped for awaiting;
// issue failures are classified on the way out, so a scope that already
// finished reports `IdbError::TransactionFinished`.
//
// A scope can finish on its own: once every request is satisfied and nothing
// new is issued, the host completes it. Multi-step work that suspends between
// requests belongs inside `retry::retry_txn` or a `DurableTransaction`.
//
// ============================================================================

pub mod retry;

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::BridgeConfig;
use crate::context::Context;
use crate::core::{CursorDirection, HostError, IdbError, Key, Result, TransactionMode, TransactionState};
use crate::host::{EventKind, HostIndex, HostObjectStore, HostRequest, HostTransaction};
use crate::key_range::{KeyQuery, KeyRange};
use crate::request::cursor::{CursorRequest, CursorWithValueRequest};
use crate::request::listener::{Subscription, wait_context};
use crate::request::{AckRequest, ArrayRequest, CountRequest, Request};

pub use retry::retry_txn;

/// A transaction over a fixed set of object stores.
#[derive(Clone)]
pub struct Transaction {
    host: Arc<dyn HostTransaction>,
    config: Arc<BridgeConfig>,
}

impl Transaction {
    pub(crate) fn from_host(host: Arc<dyn HostTransaction>, config: Arc<BridgeConfig>) -> Self {
        Self { host, config }
    }

    fn classify(&self, err: HostError) -> IdbError {
        self.config.classify(err)
    }

    pub(crate) fn wrap(&self, host: Arc<dyn HostRequest>) -> Request {
        Request::new(host, Some(Arc::downgrade(&self.host)), self.config.clone())
    }

    pub fn id(&self) -> u64 {
        self.host.id()
    }

    pub fn mode(&self) -> TransactionMode {
        self.host.mode()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.host.object_store_names()
    }

    pub fn state(&self) -> TransactionState {
        self.host.state()
    }

    /// The error that aborted the transaction, if any.
    pub fn error(&self) -> Option<IdbError> {
        self.host.error().map(|err| self.classify(err))
    }

    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        let host = self
            .host
            .object_store(name)
            .map_err(|err| self.classify(err))?;
        Ok(ObjectStore {
            txn: self.clone(),
            host,
        })
    }

    /// Commits once every issued request has been satisfied.
    pub fn commit(&self) -> Result<()> {
        self.host.commit().map_err(|err| self.classify(err))
    }

    /// Rolls back the transaction's writes.
    pub fn abort(&self) -> Result<()> {
        self.host.abort().map_err(|err| self.classify(err))
    }

    /// Waits until the transaction completes or aborts.
    pub async fn await_completion(&self, ctx: &Context) -> Result<()> {
        let (tx, rx) = oneshot::channel::<Result<()>>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let mut subscription = Subscription::new(self.host.clone());

        for kind in [EventKind::Complete, EventKind::Abort, EventKind::Error] {
            let slot = slot.clone();
            let weak = Arc::downgrade(&self.host);
            let config = self.config.clone();
            subscription.add(
                kind,
                move || {
                    let outcome = match kind {
                        EventKind::Complete => Ok(()),
                        _ => Err(aborted_error(weak.upgrade().and_then(|txn| txn.error()), &config)),
                    };
                    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(sender) = sender {
                        let _ = sender.send(outcome);
                    }
                },
                &self.config,
            )?;
        }

        match self.host.state() {
            TransactionState::Committed | TransactionState::Finished => return Ok(()),
            TransactionState::Aborted => {
                return Err(aborted_error(self.host.error(), &self.config));
            }
            TransactionState::Active | TransactionState::Committing => {}
        }

        let ctx = wait_context(ctx, &self.config);
        let outcome = tokio::select! {
            outcome = rx => outcome.unwrap_or_else(|_| {
                Err(IdbError::ExecutionError("transaction listener closed".into()))
            }),
            err = ctx.done() => Err(err),
        };
        drop(subscription);
        outcome
    }
}

fn aborted_error(err: Option<HostError>, config: &BridgeConfig) -> IdbError {
    config.classify(err.unwrap_or_else(HostError::aborted))
}

/// Read operations shared by object stores and indexes.
macro_rules! source_reads {
    ($ty:ty) => {
        impl $ty {
            fn issued(&self, outcome: crate::host::HostResult<Arc<dyn HostRequest>>) -> Result<Request> {
                let host = outcome.map_err(|err| self.txn.classify(err))?;
                Ok(self.txn.wrap(host))
            }

            /// Retrieves the first record matching `query`.
            pub fn get(&self, query: impl Into<KeyQuery>) -> Result<Request> {
                self.issued(self.host.get(query.into()))
            }

            /// Retrieves the primary key of the first record matching `query`.
            pub fn get_key(&self, query: impl Into<KeyQuery>) -> Result<Request> {
                self.issued(self.host.get_key(query.into()))
            }

            pub fn count(&self) -> Result<CountRequest> {
                self.issued(self.host.count(None)).map(CountRequest::new)
            }

            pub fn count_key(&self, key: impl Into<Key>) -> Result<CountRequest> {
                let query = KeyQuery::Key(key.into());
                self.issued(self.host.count(Some(query))).map(CountRequest::new)
            }

            pub fn count_range(&self, range: KeyRange) -> Result<CountRequest> {
                let query = KeyQuery::Range(range);
                self.issued(self.host.count(Some(query))).map(CountRequest::new)
            }

            pub fn get_all_keys(&self) -> Result<ArrayRequest> {
                self.issued(self.host.get_all_keys(None, None))
                    .map(ArrayRequest::new)
            }

            /// Lists up to `max_count` primary keys in `range`; zero lists all.
            pub fn get_all_keys_range(&self, range: KeyRange, max_count: u32) -> Result<ArrayRequest> {
                let query = Some(KeyQuery::Range(range));
                self.issued(self.host.get_all_keys(query, Some(max_count)))
                    .map(ArrayRequest::new)
            }

            pub fn open_cursor(&self, direction: CursorDirection) -> Result<CursorWithValueRequest> {
                self.issued(self.host.open_cursor(None, direction, true))
                    .map(CursorWithValueRequest::new)
            }

            pub fn open_cursor_key(
                &self,
                key: impl Into<Key>,
                direction: CursorDirection,
            ) -> Result<CursorWithValueRequest> {
                let query = Some(KeyQuery::Key(key.into()));
                self.issued(self.host.open_cursor(query, direction, true))
                    .map(CursorWithValueRequest::new)
            }

            pub fn open_cursor_range(
                &self,
                range: KeyRange,
                direction: CursorDirection,
            ) -> Result<CursorWithValueRequest> {
                let query = Some(KeyQuery::Range(range));
                self.issued(self.host.open_cursor(query, direction, true))
                    .map(CursorWithValueRequest::new)
            }

            pub fn open_key_cursor(&self, direction: CursorDirection) -> Result<CursorRequest> {
                self.issued(self.host.open_cursor(None, direction, false))
                    .map(CursorRequest::new)
            }

            pub fn open_key_cursor_key(
                &self,
                key: impl Into<Key>,
                direction: CursorDirection,
            ) -> Result<CursorRequest> {
                let query = Some(KeyQuery::Key(key.into()));
                self.issued(self.host.open_cursor(query, direction, false))
                    .map(CursorRequest::new)
            }

            pub fn open_key_cursor_range(
                &self,
                range: KeyRange,
                direction: CursorDirection,
            ) -> Result<CursorRequest> {
                let query = Some(KeyQuery::Range(range));
                self.issued(self.host.open_cursor(query, direction, false))
                    .map(CursorRequest::new)
            }

            pub fn transaction(&self) -> &Transaction {
                &self.txn
            }
        }
    };
}

/// An object store as seen from one transaction.
#[derive(Clone)]
pub struct ObjectStore {
    txn: Transaction,
    host: Arc<dyn HostObjectStore>,
}

source_reads!(ObjectStore);

impl ObjectStore {
    pub fn name(&self) -> String {
        self.host.name()
    }

    pub fn key_path(&self) -> Option<String> {
        self.host.key_path()
    }

    pub fn auto_increment(&self) -> bool {
        self.host.auto_increment()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.host.index_names()
    }

    pub fn index(&self, name: &str) -> Result<Index> {
        let host = self.host.index(name).map_err(|err| self.txn.classify(err))?;
        Ok(Index {
            txn: self.txn.clone(),
            host,
        })
    }

    /// Inserts a value keyed by the store's key path or key generator.
    pub fn add(&self, value: Value) -> Result<AckRequest> {
        self.issued(self.host.add(value, None)).map(AckRequest::new)
    }

    /// Inserts a value under an explicit key. Fails if the key exists.
    pub fn add_key(&self, key: impl Into<Key>, value: Value) -> Result<AckRequest> {
        self.issued(self.host.add(value, Some(key.into())))
            .map(AckRequest::new)
    }

    /// Inserts or replaces a value; resolves to its key.
    pub fn put(&self, value: Value) -> Result<Request> {
        self.issued(self.host.put(value, None))
    }

    pub fn put_key(&self, key: impl Into<Key>, value: Value) -> Result<Request> {
        self.issued(self.host.put(value, Some(key.into())))
    }

    pub fn delete(&self, query: impl Into<KeyQuery>) -> Result<AckRequest> {
        self.issued(self.host.delete(query.into()))
            .map(AckRequest::new)
    }

    pub fn clear(&self) -> Result<AckRequest> {
        self.issued(self.host.clear()).map(AckRequest::new)
    }
}

/// An index over one of a transaction's object stores.
#[derive(Clone)]
pub struct Index {
    txn: Transaction,
    host: Arc<dyn HostIndex>,
}

source_reads!(Index);

impl Index {
    pub fn name(&self) -> String {
        self.host.name()
    }

    pub fn object_store_name(&self) -> String {
        self.host.object_store_name()
    }

    pub fn key_path(&self) -> String {
        self.host.key_path()
    }

    pub fn unique(&self) -> bool {
        self.host.unique()
    }
}
