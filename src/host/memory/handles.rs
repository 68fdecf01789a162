use std::sync::Arc;

use serde_json::Value;

use super::cursor::MemoryCursor;
use super::request::Operation;
use super::transaction::MemoryTransaction;
use super::lock;
use crate::core::{CursorDirection, HostError, Key};
use crate::host::{
    CursorSource, HostIndex, HostObjectStore, HostRequest, HostResult, HostSource,
};
use crate::key_range::KeyQuery;

/// Issues the read operations shared by stores and indexes.
fn read(
    txn: &Arc<MemoryTransaction>,
    interface: &str,
    operation: &str,
    build: Operation,
) -> HostResult<Arc<dyn HostRequest>> {
    let request = txn.issue(operation, interface, false, |_| build)?;
    Ok(request)
}

fn open_cursor(
    txn: &Arc<MemoryTransaction>,
    interface: &str,
    source: CursorSource,
    query: Option<KeyQuery>,
    direction: CursorDirection,
    with_value: bool,
) -> HostResult<Arc<dyn HostRequest>> {
    let operation = if with_value { "openCursor" } else { "openKeyCursor" };
    let weak_txn = Arc::downgrade(txn);
    let request = txn.issue(operation, interface, false, |request| {
        Operation::Cursor(Arc::new(MemoryCursor::new(
            source,
            direction,
            query,
            with_value,
            request.clone(),
            weak_txn,
        )))
    })?;
    Ok(request)
}

pub(crate) struct MemoryObjectStore {
    txn: Arc<MemoryTransaction>,
    name: String,
}

impl MemoryObjectStore {
    pub(crate) fn new(txn: Arc<MemoryTransaction>, name: String) -> Self {
        Self { txn, name }
    }

    fn source(&self) -> CursorSource {
        CursorSource::ObjectStore(self.name.clone())
    }

    fn write(
        &self,
        operation: &str,
        build: Operation,
    ) -> HostResult<Arc<dyn HostRequest>> {
        let request = self.txn.issue(operation, "IDBObjectStore", true, |_| build)?;
        Ok(request)
    }
}

impl HostSource for MemoryObjectStore {
    fn get(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::Get {
            source: self.source(),
            query,
        };
        read(&self.txn, "IDBObjectStore", "get", op)
    }

    fn get_key(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::GetKey {
            source: self.source(),
            query,
        };
        read(&self.txn, "IDBObjectStore", "getKey", op)
    }

    fn get_all_keys(
        &self,
        query: Option<KeyQuery>,
        count: Option<u32>,
    ) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::GetAllKeys {
            source: self.source(),
            query,
            count,
        };
        read(&self.txn, "IDBObjectStore", "getAllKeys", op)
    }

    fn count(&self, query: Option<KeyQuery>) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::Count {
            source: self.source(),
            query,
        };
        read(&self.txn, "IDBObjectStore", "count", op)
    }

    fn open_cursor(
        &self,
        query: Option<KeyQuery>,
        direction: CursorDirection,
        with_value: bool,
    ) -> HostResult<Arc<dyn HostRequest>> {
        open_cursor(
            &self.txn,
            "IDBObjectStore",
            self.source(),
            query,
            direction,
            with_value,
        )
    }
}

impl HostObjectStore for MemoryObjectStore {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> Option<String> {
        let state = lock(&self.txn.engine.state);
        state
            .store(&self.name)
            .ok()
            .and_then(|store| store.options.key_path.clone())
    }

    fn auto_increment(&self) -> bool {
        let state = lock(&self.txn.engine.state);
        state
            .store(&self.name)
            .map(|store| store.options.auto_increment)
            .unwrap_or(false)
    }

    fn index_names(&self) -> Vec<String> {
        let state = lock(&self.txn.engine.state);
        state
            .store(&self.name)
            .map(|store| store.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn add(&self, value: Value, key: Option<Key>) -> HostResult<Arc<dyn HostRequest>> {
        self.write(
            "add",
            Operation::Store {
                store: self.name.clone(),
                key,
                value,
                overwrite: false,
            },
        )
    }

    fn put(&self, value: Value, key: Option<Key>) -> HostResult<Arc<dyn HostRequest>> {
        self.write(
            "put",
            Operation::Store {
                store: self.name.clone(),
                key,
                value,
                overwrite: true,
            },
        )
    }

    fn delete(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>> {
        self.write(
            "delete",
            Operation::Delete {
                store: self.name.clone(),
                query,
            },
        )
    }

    fn clear(&self) -> HostResult<Arc<dyn HostRequest>> {
        self.write(
            "clear",
            Operation::Clear {
                store: self.name.clone(),
            },
        )
    }

    fn index(&self, name: &str) -> HostResult<Arc<dyn HostIndex>> {
        if !self.txn.state_now().is_active() {
            return Err(HostError::invalid_state(
                "Failed to execute 'index' on 'IDBObjectStore': The transaction has finished.",
            ));
        }
        let state = lock(&self.txn.engine.state);
        let store = state.store(&self.name)?;
        let index = store.indexes.get(name).ok_or_else(|| {
            HostError::not_found(format!(
                "Failed to execute 'index' on 'IDBObjectStore': The specified index '{}' was not found.",
                name
            ))
        })?;
        Ok(Arc::new(MemoryIndex {
            txn: self.txn.clone(),
            store: self.name.clone(),
            name: name.to_string(),
            key_path: index.key_path.clone(),
            unique: index.unique,
        }))
    }
}

pub(crate) struct MemoryIndex {
    txn: Arc<MemoryTransaction>,
    store: String,
    name: String,
    key_path: String,
    unique: bool,
}

impl MemoryIndex {
    fn source(&self) -> CursorSource {
        CursorSource::Index {
            store: self.store.clone(),
            index: self.name.clone(),
        }
    }
}

impl HostSource for MemoryIndex {
    fn get(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::Get {
            source: self.source(),
            query,
        };
        read(&self.txn, "IDBIndex", "get", op)
    }

    fn get_key(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::GetKey {
            source: self.source(),
            query,
        };
        read(&self.txn, "IDBIndex", "getKey", op)
    }

    fn get_all_keys(
        &self,
        query: Option<KeyQuery>,
        count: Option<u32>,
    ) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::GetAllKeys {
            source: self.source(),
            query,
            count,
        };
        read(&self.txn, "IDBIndex", "getAllKeys", op)
    }

    fn count(&self, query: Option<KeyQuery>) -> HostResult<Arc<dyn HostRequest>> {
        let op = Operation::Count {
            source: self.source(),
            query,
        };
        read(&self.txn, "IDBIndex", "count", op)
    }

    fn open_cursor(
        &self,
        query: Option<KeyQuery>,
        direction: CursorDirection,
        with_value: bool,
    ) -> HostResult<Arc<dyn HostRequest>> {
        open_cursor(
            &self.txn,
            "IDBIndex",
            self.source(),
            query,
            direction,
            with_value,
        )
    }
}

impl HostIndex for MemoryIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn object_store_name(&self) -> String {
        self.store.clone()
    }

    fn key_path(&self) -> String {
        self.key_path.clone()
    }

    fn unique(&self) -> bool {
        self.unique
    }
}
