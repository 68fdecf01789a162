use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::lock;
use super::transaction::{DurableInner, DurableTransaction};
use crate::context::Context;
use crate::core::{CursorDirection, IdbError, Key, Result};
use crate::key_range::{KeyQuery, KeyRange};
use crate::request::{Cursor, CursorWithValue};
use crate::transaction::ObjectStore;

/// The store handle shared by every `DurableObjectStore` for one name.
/// Rebound in place whenever the scope opens a new transaction.
pub(crate) struct StoreSlot {
    name: String,
    store: Mutex<Option<ObjectStore>>,
}

impl StoreSlot {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            store: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rebind(&self, store: ObjectStore) {
        *lock(&self.store) = Some(store);
    }

    fn current(&self) -> Result<ObjectStore> {
        lock(&self.store).clone().ok_or_else(|| {
            IdbError::ExecutionError(format!("object store '{}' is not bound", self.name))
        })
    }
}

/// An object store of a [`DurableTransaction`]. Each operation is awaited and
/// retried on a fresh transaction if the current one finished early.
#[derive(Clone)]
pub struct DurableObjectStore {
    scope: Arc<DurableInner>,
    slot: Arc<StoreSlot>,
}

impl DurableObjectStore {
    pub(crate) fn new(scope: Arc<DurableInner>, slot: Arc<StoreSlot>) -> Self {
        Self { scope, slot }
    }

    pub fn name(&self) -> &str {
        self.slot.name()
    }

    /// The scope this store belongs to.
    pub fn transaction(&self) -> DurableTransaction {
        DurableTransaction::from_inner(self.scope.clone())
    }

    /// Whether both handles share the same underlying store binding.
    pub fn same_store(&self, other: &DurableObjectStore) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Runs `f` against the store as bound to the live transaction, retrying
    /// on a new transaction whenever `f` fails because the old one finished.
    /// `f` may run more than once.
    pub async fn store_with_retry<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(ObjectStore) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.scope
            .run_with_retry(|_txn| {
                let issued = self.slot.current().map(&mut f);
                async move { issued?.await }
            })
            .await
    }

    pub async fn add(&self, ctx: &Context, value: Value) -> Result<()> {
        self.store_with_retry(|store| {
            let issued = store.add(value.clone());
            async move { issued?.await_ack(ctx).await }
        })
        .await
    }

    pub async fn add_key(&self, ctx: &Context, key: impl Into<Key>, value: Value) -> Result<()> {
        let key = key.into();
        self.store_with_retry(|store| {
            let issued = store.add_key(key.clone(), value.clone());
            async move { issued?.await_ack(ctx).await }
        })
        .await
    }

    /// Inserts or replaces a value keyed by the store's key path or
    /// generator. Resolves to the record's key.
    pub async fn put(&self, ctx: &Context, value: Value) -> Result<Key> {
        self.store_with_retry(|store| {
            let issued = store.put(value.clone());
            async move { expect_key(issued?.await_key(ctx).await?) }
        })
        .await
    }

    pub async fn put_key(&self, ctx: &Context, key: impl Into<Key>, value: Value) -> Result<Key> {
        let key = key.into();
        self.store_with_retry(|store| {
            let issued = store.put_key(key.clone(), value.clone());
            async move { expect_key(issued?.await_key(ctx).await?) }
        })
        .await
    }

    pub async fn delete(&self, ctx: &Context, query: impl Into<KeyQuery>) -> Result<()> {
        let query = query.into();
        self.store_with_retry(|store| {
            let issued = store.delete(query.clone());
            async move { issued?.await_ack(ctx).await }
        })
        .await
    }

    pub async fn clear(&self, ctx: &Context) -> Result<()> {
        self.store_with_retry(|store| {
            let issued = store.clear();
            async move { issued?.await_ack(ctx).await }
        })
        .await
    }

    /// The first record matching `query`, or `None`.
    pub async fn get(&self, ctx: &Context, query: impl Into<KeyQuery>) -> Result<Option<Value>> {
        let query = query.into();
        self.store_with_retry(|store| {
            let issued = store.get(query.clone());
            async move { issued?.await_value(ctx).await }
        })
        .await
    }

    pub async fn get_key(&self, ctx: &Context, query: impl Into<KeyQuery>) -> Result<Option<Key>> {
        let query = query.into();
        self.store_with_retry(|store| {
            let issued = store.get_key(query.clone());
            async move { issued?.await_key(ctx).await }
        })
        .await
    }

    pub async fn count(&self, ctx: &Context) -> Result<u64> {
        self.store_with_retry(|store| {
            let issued = store.count();
            async move { issued?.await_count(ctx).await }
        })
        .await
    }

    pub async fn count_key(&self, ctx: &Context, key: impl Into<Key>) -> Result<u64> {
        let key = key.into();
        self.store_with_retry(|store| {
            let issued = store.count_key(key.clone());
            async move { issued?.await_count(ctx).await }
        })
        .await
    }

    pub async fn count_range(&self, ctx: &Context, range: KeyRange) -> Result<u64> {
        self.store_with_retry(|store| {
            let issued = store.count_range(range.clone());
            async move { issued?.await_count(ctx).await }
        })
        .await
    }

    pub async fn get_all_keys(&self, ctx: &Context) -> Result<Vec<Key>> {
        self.store_with_retry(|store| {
            let issued = store.get_all_keys();
            async move { issued?.await_keys(ctx).await }
        })
        .await
    }

    pub async fn get_all_keys_range(
        &self,
        ctx: &Context,
        range: KeyRange,
        max_count: u32,
    ) -> Result<Vec<Key>> {
        self.store_with_retry(|store| {
            let issued = store.get_all_keys_range(range.clone(), max_count);
            async move { issued?.await_keys(ctx).await }
        })
        .await
    }

    pub async fn open_cursor(
        &self,
        ctx: &Context,
        direction: CursorDirection,
    ) -> Result<Option<CursorWithValue>> {
        self.store_with_retry(|store| {
            let issued = store.open_cursor(direction);
            async move { issued?.await_cursor(ctx).await }
        })
        .await
    }

    pub async fn open_cursor_key(
        &self,
        ctx: &Context,
        key: impl Into<Key>,
        direction: CursorDirection,
    ) -> Result<Option<CursorWithValue>> {
        let key = key.into();
        self.store_with_retry(|store| {
            let issued = store.open_cursor_key(key.clone(), direction);
            async move { issued?.await_cursor(ctx).await }
        })
        .await
    }

    pub async fn open_cursor_range(
        &self,
        ctx: &Context,
        range: KeyRange,
        direction: CursorDirection,
    ) -> Result<Option<CursorWithValue>> {
        self.store_with_retry(|store| {
            let issued = store.open_cursor_range(range.clone(), direction);
            async move { issued?.await_cursor(ctx).await }
        })
        .await
    }

    pub async fn open_key_cursor(
        &self,
        ctx: &Context,
        direction: CursorDirection,
    ) -> Result<Option<Cursor>> {
        self.store_with_retry(|store| {
            let issued = store.open_key_cursor(direction);
            async move { issued?.await_cursor(ctx).await }
        })
        .await
    }

    pub async fn open_key_cursor_key(
        &self,
        ctx: &Context,
        key: impl Into<Key>,
        direction: CursorDirection,
    ) -> Result<Option<Cursor>> {
        let key = key.into();
        self.store_with_retry(|store| {
            let issued = store.open_key_cursor_key(key.clone(), direction);
            async move { issued?.await_cursor(ctx).await }
        })
        .await
    }

    pub async fn open_key_cursor_range(
        &self,
        ctx: &Context,
        range: KeyRange,
        direction: CursorDirection,
    ) -> Result<Option<Cursor>> {
        self.store_with_retry(|store| {
            let issued = store.open_key_cursor_range(range.clone(), direction);
            async move { issued?.await_cursor(ctx).await }
        })
        .await
    }
}

impl fmt::Debug for DurableObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableObjectStore")
            .field("name", &self.slot.name())
            .finish()
    }
}

fn expect_key(key: Option<Key>) -> Result<Key> {
    key.ok_or_else(|| IdbError::TypeMismatch("put resolved without a key".into()))
}
