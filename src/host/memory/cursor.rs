use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use super::request::{MemoryRequest, Operation};
use super::store::Entry;
use super::transaction::MemoryTransaction;
use super::{EngineState, lock};
use crate::core::{CursorDirection, HostError, Key};
use crate::host::{CursorSource, HostCursor, HostRequest, HostResult, HostValue};
use crate::key_range::KeyQuery;

const IFACE: &str = "IDBCursor";

/// How the next step moves the cursor.
#[derive(Debug, Clone)]
enum Movement {
    Open,
    Next,
    ToKey(Key),
    ToPrimaryKey(Key, Key),
    Advance(u32),
}

struct CursorInner {
    /// (key, primary key) of the current position.
    position: Option<(Key, Key)>,
    value: Option<Value>,
    pending: Option<Movement>,
    /// True between a step landing on a record and the next move request.
    got_value: bool,
}

pub(crate) struct MemoryCursor {
    source: CursorSource,
    direction: CursorDirection,
    query: Option<KeyQuery>,
    with_value: bool,
    request: Weak<MemoryRequest>,
    txn: Weak<MemoryTransaction>,
    inner: Mutex<CursorInner>,
}

impl MemoryCursor {
    pub(crate) fn new(
        source: CursorSource,
        direction: CursorDirection,
        query: Option<KeyQuery>,
        with_value: bool,
        request: Weak<MemoryRequest>,
        txn: Weak<MemoryTransaction>,
    ) -> Self {
        Self {
            source,
            direction,
            query,
            with_value,
            request,
            txn,
            inner: Mutex::new(CursorInner {
                position: None,
                value: None,
                pending: Some(Movement::Open),
                got_value: false,
            }),
        }
    }

    /// Performs the pending movement. Resolves to the cursor itself, or to
    /// `Null` once the range is exhausted.
    pub(crate) fn step(self: &Arc<Self>, state: &EngineState) -> HostResult<HostValue> {
        let entries = state.entries(&self.source, self.query.as_ref())?;
        let mut inner = lock(&self.inner);
        let movement = inner.pending.take().unwrap_or(Movement::Next);
        let found = match movement {
            Movement::Advance(count) => {
                let mut current = inner.position.clone();
                let mut found = None;
                for _ in 0..count {
                    found = current
                        .as_ref()
                        .and_then(|(key, pk)| self.seek(&entries, &Movement::Next, key, pk));
                    current = found.as_ref().map(|e: &Entry| (e.key.clone(), e.primary_key.clone()));
                    if found.is_none() {
                        break;
                    }
                }
                found
            }
            Movement::Open => self.first(&entries),
            other => match inner.position.clone() {
                Some((key, pk)) => self.seek(&entries, &other, &key, &pk),
                None => None,
            },
        };

        match found {
            Some(entry) => {
                inner.position = Some((entry.key, entry.primary_key));
                inner.value = self.with_value.then_some(entry.value);
                inner.got_value = true;
                Ok(HostValue::Cursor(self.clone()))
            }
            None => {
                inner.position = None;
                inner.value = None;
                inner.got_value = false;
                Ok(HostValue::Null)
            }
        }
    }

    fn first(&self, entries: &[Entry]) -> Option<Entry> {
        if self.direction.is_forward() {
            entries.first().cloned()
        } else {
            self.last_matching(entries, |_| true)
        }
    }

    fn seek(&self, entries: &[Entry], movement: &Movement, key: &Key, pk: &Key) -> Option<Entry> {
        let unique = self.direction.is_unique();
        if self.direction.is_forward() {
            entries
                .iter()
                .find(|e| match movement {
                    Movement::Next if unique => e.key > *key,
                    Movement::Next => (&e.key, &e.primary_key) > (key, pk),
                    Movement::ToKey(target) => e.key >= *target,
                    Movement::ToPrimaryKey(target, target_pk) => {
                        (&e.key, &e.primary_key) >= (target, target_pk)
                    }
                    Movement::Open | Movement::Advance(_) => true,
                })
                .cloned()
        } else {
            self.last_matching(entries, |e| match movement {
                Movement::Next if unique => e.key < *key,
                Movement::Next => (&e.key, &e.primary_key) < (key, pk),
                Movement::ToKey(target) => e.key <= *target,
                Movement::ToPrimaryKey(target, target_pk) => {
                    (&e.key, &e.primary_key) <= (target, target_pk)
                }
                Movement::Open | Movement::Advance(_) => true,
            })
        }
    }

    /// Last entry satisfying `accept`; unique directions land on the first
    /// record carrying that key.
    fn last_matching(&self, entries: &[Entry], accept: impl Fn(&Entry) -> bool) -> Option<Entry> {
        let idx = entries.iter().rposition(accept)?;
        if self.direction.is_unique() {
            let key = &entries[idx].key;
            entries.iter().find(|e| e.key == *key).cloned()
        } else {
            Some(entries[idx].clone())
        }
    }

    fn transaction(&self, operation: &str) -> HostResult<Arc<MemoryTransaction>> {
        let txn = self
            .txn
            .upgrade()
            .ok_or_else(|| HostError::transaction_inactive(operation, IFACE))?;
        txn.ensure_active(operation, IFACE)?;
        Ok(txn)
    }

    /// Current position, failing when the cursor is mid-step or past its end.
    fn current(inner: &CursorInner, operation: &str) -> HostResult<(Key, Key)> {
        match (&inner.position, inner.got_value) {
            (Some(position), true) => Ok(position.clone()),
            _ => Err(HostError::invalid_state(format!(
                "Failed to execute '{}' on 'IDBCursor': The cursor is being iterated or has iterated past its end.",
                operation
            ))),
        }
    }

    fn schedule(&self, operation: &str, movement: Movement) -> HostResult<()> {
        let txn = self.transaction(operation)?;
        let request = self
            .request
            .upgrade()
            .ok_or_else(|| HostError::invalid_state("The cursor's request is gone."))?;
        {
            let mut inner = lock(&self.inner);
            let (key, pk) = Self::current(&inner, operation)?;
            self.validate(operation, &movement, &key, &pk)?;
            inner.pending = Some(movement);
            inner.got_value = false;
        }
        txn.requeue(request, operation)
    }

    fn validate(&self, operation: &str, movement: &Movement, key: &Key, pk: &Key) -> HostResult<()> {
        let forward = self.direction.is_forward();
        let behind = HostError::data(format!(
            "Failed to execute '{}' on 'IDBCursor': The parameter is not past this cursor's position.",
            operation
        ));
        match movement {
            Movement::ToKey(target) => {
                if (forward && target <= key) || (!forward && target >= key) {
                    return Err(behind);
                }
            }
            Movement::ToPrimaryKey(target, target_pk) => {
                if !matches!(self.source, CursorSource::Index { .. }) || self.direction.is_unique() {
                    return Err(HostError::new(
                        "InvalidAccessError",
                        "Failed to execute 'continuePrimaryKey' on 'IDBCursor': The cursor's source is not an index or its direction is unique.",
                    ));
                }
                let target = (target, target_pk);
                let current = (key, pk);
                if (forward && target <= current) || (!forward && target >= current) {
                    return Err(behind);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn effective_store(&self) -> String {
        match &self.source {
            CursorSource::ObjectStore(store) => store.clone(),
            CursorSource::Index { store, .. } => store.clone(),
        }
    }

    fn write_request(
        &self,
        operation: &str,
        build: impl FnOnce(String, Key) -> Operation,
    ) -> HostResult<Arc<dyn HostRequest>> {
        let txn = self.transaction(operation)?;
        let pk = {
            let inner = lock(&self.inner);
            let (_, pk) = Self::current(&inner, operation)?;
            pk
        };
        let store = self.effective_store();
        let request = txn.issue(operation, IFACE, true, |_| build(store, pk))?;
        Ok(request)
    }
}

impl HostCursor for MemoryCursor {
    fn source(&self) -> CursorSource {
        self.source.clone()
    }

    fn direction(&self) -> CursorDirection {
        self.direction
    }

    fn key(&self) -> Option<Key> {
        lock(&self.inner).position.as_ref().map(|(key, _)| key.clone())
    }

    fn primary_key(&self) -> Option<Key> {
        lock(&self.inner).position.as_ref().map(|(_, pk)| pk.clone())
    }

    fn value(&self) -> Option<Value> {
        lock(&self.inner).value.clone()
    }

    fn advance(&self, count: u32) -> HostResult<()> {
        if count == 0 {
            return Err(HostError::new(
                "TypeError",
                "Failed to execute 'advance' on 'IDBCursor': A count argument with value 0 (zero) was supplied, must be greater than 0.",
            ));
        }
        self.schedule("advance", Movement::Advance(count))
    }

    fn continue_(&self, key: Option<Key>) -> HostResult<()> {
        match key {
            Some(key) => self.schedule("continue", Movement::ToKey(key)),
            None => self.schedule("continue", Movement::Next),
        }
    }

    fn continue_primary_key(&self, key: Key, primary_key: Key) -> HostResult<()> {
        self.schedule("continuePrimaryKey", Movement::ToPrimaryKey(key, primary_key))
    }

    fn update(&self, value: Value) -> HostResult<Arc<dyn HostRequest>> {
        if !self.with_value {
            return Err(HostError::invalid_state(
                "Failed to execute 'update' on 'IDBCursor': The cursor is a key cursor.",
            ));
        }
        self.write_request("update", |store, primary_key| Operation::CursorUpdate {
            store,
            primary_key,
            value,
        })
    }

    fn delete(&self) -> HostResult<Arc<dyn HostRequest>> {
        if !self.with_value {
            return Err(HostError::invalid_state(
                "Failed to execute 'delete' on 'IDBCursor': The cursor is a key cursor.",
            ));
        }
        self.write_request("delete", |store, primary_key| Operation::Delete {
            store,
            query: KeyQuery::Key(primary_key),
        })
    }
}
