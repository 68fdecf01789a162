use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::cursor::MemoryCursor;
use super::events::EventListeners;
use super::store::Undo;
use super::{EngineState, lock};
use crate::core::{HostError, Key, ReadyState};
use crate::host::{
    CursorSource, EventKind, EventTarget, HostRequest, HostResult, HostValue, Listener, ListenerId,
};
use crate::key_range::KeyQuery;

/// Work a request performs once its transaction's driver reaches it.
pub(crate) enum Operation {
    Store {
        store: String,
        key: Option<Key>,
        value: Value,
        overwrite: bool,
    },
    Delete {
        store: String,
        query: KeyQuery,
    },
    Clear {
        store: String,
    },
    Get {
        source: CursorSource,
        query: KeyQuery,
    },
    GetKey {
        source: CursorSource,
        query: KeyQuery,
    },
    GetAllKeys {
        source: CursorSource,
        query: Option<KeyQuery>,
        count: Option<u32>,
    },
    Count {
        source: CursorSource,
        query: Option<KeyQuery>,
    },
    /// Moves the cursor; runs again every time the cursor is continued.
    Cursor(Arc<MemoryCursor>),
    CursorUpdate {
        store: String,
        primary_key: Key,
        value: Value,
    },
}

struct RequestInner {
    ready: ReadyState,
    result: Option<HostValue>,
    error: Option<HostError>,
}

pub(crate) struct MemoryRequest {
    operation: Operation,
    inner: Mutex<RequestInner>,
    events: EventListeners,
}

impl MemoryRequest {
    pub(crate) fn new(operation: Operation) -> Self {
        Self {
            operation,
            inner: Mutex::new(RequestInner {
                ready: ReadyState::Pending,
                result: None,
                error: None,
            }),
            events: EventListeners::default(),
        }
    }

    /// Applies the operation against the engine state, logging writes to `undo`.
    pub(crate) fn execute(
        &self,
        state: &mut EngineState,
        undo: &mut Vec<Undo>,
    ) -> HostResult<HostValue> {
        match &self.operation {
            Operation::Store {
                store,
                key,
                value,
                overwrite,
            } => {
                let key = state.store_mut(store)?.store_record(
                    store,
                    value.clone(),
                    key.clone(),
                    *overwrite,
                    undo,
                )?;
                Ok(HostValue::Key(key))
            }
            Operation::Delete { store, query } => {
                state.store_mut(store)?.delete_records(store, query, undo);
                Ok(HostValue::Undefined)
            }
            Operation::Clear { store } => {
                state.store_mut(store)?.clear(store, undo);
                Ok(HostValue::Undefined)
            }
            Operation::Get { source, query } => Ok(state
                .entries(source, Some(query))?
                .into_iter()
                .next()
                .map_or(HostValue::Undefined, |entry| HostValue::Value(entry.value))),
            Operation::GetKey { source, query } => Ok(state
                .entries(source, Some(query))?
                .into_iter()
                .next()
                .map_or(HostValue::Undefined, |entry| {
                    HostValue::Key(entry.primary_key)
                })),
            Operation::GetAllKeys {
                source,
                query,
                count,
            } => {
                let limit = match count {
                    Some(0) | None => usize::MAX,
                    Some(n) => *n as usize,
                };
                let keys = state
                    .entries(source, query.as_ref())?
                    .into_iter()
                    .take(limit)
                    .map(|entry| entry.primary_key)
                    .collect();
                Ok(HostValue::Keys(keys))
            }
            Operation::Count { source, query } => {
                let n = state.entries(source, query.as_ref())?.len();
                Ok(HostValue::Count(n as u64))
            }
            Operation::Cursor(cursor) => cursor.step(state),
            Operation::CursorUpdate {
                store,
                primary_key,
                value,
            } => {
                let data = state.store_mut(store)?;
                if let Some(path) = data.options.key_path.clone() {
                    match Key::extract(value, &path) {
                        Some(Ok(key)) if key == *primary_key => {}
                        _ => {
                            return Err(HostError::data(
                                "Failed to execute 'update' on 'IDBCursor': The effective object store of this cursor uses in-line keys and evaluating the key path of the value parameter results in a different value than the cursor's effective key.",
                            ));
                        }
                    }
                }
                let key = data.write_record(store, primary_key.clone(), value.clone(), undo)?;
                Ok(HostValue::Key(key))
            }
        }
    }

    /// Records the outcome and fires `success` or `error`.
    pub(crate) fn complete(&self, outcome: HostResult<HostValue>) {
        let kind = {
            let mut inner = lock(&self.inner);
            inner.ready = ReadyState::Done;
            match outcome {
                Ok(value) => {
                    inner.result = Some(value);
                    inner.error = None;
                    EventKind::Success
                }
                Err(err) => {
                    tracing::debug!(error = %err, "request failed");
                    inner.result = None;
                    inner.error = Some(err);
                    EventKind::Error
                }
            }
        };
        self.events.dispatch(kind);
    }

    /// Returns a cursor request to pending before its next step.
    pub(crate) fn reset_pending(&self) {
        let mut inner = lock(&self.inner);
        inner.ready = ReadyState::Pending;
        inner.result = None;
        inner.error = None;
    }
}

impl EventTarget for MemoryRequest {
    fn add_listener(&self, kind: EventKind, listener: Listener) -> HostResult<ListenerId> {
        Ok(self.events.add(kind, listener))
    }

    fn remove_listener(&self, kind: EventKind, id: ListenerId) -> HostResult<()> {
        self.events.remove(kind, id);
        Ok(())
    }

    fn listener_count(&self, kind: EventKind) -> usize {
        self.events.count(kind)
    }
}

impl HostRequest for MemoryRequest {
    fn ready_state(&self) -> ReadyState {
        lock(&self.inner).ready
    }

    fn result(&self) -> HostResult<HostValue> {
        let inner = lock(&self.inner);
        if inner.ready == ReadyState::Pending {
            return Err(HostError::invalid_state(
                "Failed to read the 'result' property from 'IDBRequest': The request has not finished.",
            ));
        }
        Ok(inner.result.clone().unwrap_or(HostValue::Undefined))
    }

    fn error(&self) -> HostResult<Option<HostError>> {
        let inner = lock(&self.inner);
        if inner.ready == ReadyState::Pending {
            return Err(HostError::invalid_state(
                "Failed to read the 'error' property from 'IDBRequest': The request has not finished.",
            ));
        }
        Ok(inner.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::ObjectStoreOptions;
    use crate::host::memory::store::StoreData;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state() -> EngineState {
        let mut state = EngineState::default();
        state
            .stores
            .insert("s".into(), StoreData::new(ObjectStoreOptions::default()));
        state
    }

    #[test]
    fn test_result_unavailable_while_pending() {
        let request = MemoryRequest::new(Operation::Clear { store: "s".into() });
        assert_eq!(request.ready_state(), ReadyState::Pending);
        let err = request.result().unwrap_err();
        assert_eq!(err.name, "InvalidStateError");
    }

    #[test]
    fn test_complete_fires_matching_event() {
        let request = MemoryRequest::new(Operation::Clear { store: "s".into() });
        let successes = Arc::new(AtomicUsize::new(0));
        let counter = successes.clone();
        request
            .add_listener(
                EventKind::Success,
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        request.complete(Err(HostError::constraint("nope")));
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(
            request.error().unwrap().map(|e| e.name),
            Some("ConstraintError".to_string())
        );

        request.reset_pending();
        request.complete(Ok(HostValue::Count(3)));
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert!(matches!(request.result().unwrap(), HostValue::Count(3)));
    }

    #[test]
    fn test_get_all_keys_respects_count() {
        let mut state = state();
        let mut undo = Vec::new();
        for k in ["a", "b", "c"] {
            MemoryRequest::new(Operation::Store {
                store: "s".into(),
                key: Some(Key::from(k)),
                value: json!(k),
                overwrite: false,
            })
            .execute(&mut state, &mut undo)
            .unwrap();
        }
        let keys = MemoryRequest::new(Operation::GetAllKeys {
            source: CursorSource::ObjectStore("s".into()),
            query: None,
            count: Some(2),
        })
        .execute(&mut state, &mut undo)
        .unwrap();
        match keys {
            HostValue::Keys(keys) => assert_eq!(keys, vec![Key::from("a"), Key::from("b")]),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
