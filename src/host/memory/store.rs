use std::collections::BTreeMap;

use serde_json::Value;

use super::{EngineState, ObjectStoreOptions};
use crate::core::{HostError, Key};
use crate::host::{CursorSource, HostResult};
use crate::key_range::KeyQuery;

/// Largest value the key generator hands out.
const MAX_GENERATED_KEY: u64 = 1 << 53;

pub(crate) struct IndexData {
    pub(crate) key_path: String,
    pub(crate) unique: bool,
}

pub(crate) struct StoreData {
    pub(crate) options: ObjectStoreOptions,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, IndexData>,
    /// Next number the key generator produces.
    pub(crate) next_key: u64,
}

/// One position of a traversal: the key the source is ordered by, the record's
/// primary key, and the record.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) key: Key,
    pub(crate) primary_key: Key,
    pub(crate) value: Value,
}

/// Reverts one write of a transaction.
pub(crate) enum Undo {
    Record {
        store: String,
        key: Key,
        previous: Option<Value>,
    },
    Generator {
        store: String,
        previous: u64,
    },
}

impl Undo {
    pub(crate) fn revert(self, state: &mut EngineState) {
        match self {
            Undo::Record {
                store,
                key,
                previous,
            } => {
                if let Some(data) = state.stores.get_mut(&store) {
                    match previous {
                        Some(value) => {
                            data.records.insert(key, value);
                        }
                        None => {
                            data.records.remove(&key);
                        }
                    }
                }
            }
            Undo::Generator { store, previous } => {
                if let Some(data) = state.stores.get_mut(&store) {
                    data.next_key = previous;
                }
            }
        }
    }
}

impl StoreData {
    pub(crate) fn new(options: ObjectStoreOptions) -> Self {
        Self {
            options,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
            next_key: 1,
        }
    }

    /// Adds or replaces a record, resolving its key from the explicit key, the
    /// store's key path or its key generator. Returns the primary key used.
    pub(crate) fn store_record(
        &mut self,
        store_name: &str,
        mut value: Value,
        key: Option<Key>,
        overwrite: bool,
        undo: &mut Vec<Undo>,
    ) -> HostResult<Key> {
        let key_path = self.options.key_path.clone();
        let key = match (&key_path, key) {
            (Some(_), Some(_)) => {
                return Err(HostError::data(
                    "The object store uses in-line keys and the key parameter was provided.",
                ));
            }
            (Some(path), None) => match Key::extract(&value, path) {
                Some(extracted) => extracted?,
                None if self.options.auto_increment => {
                    let generated = self.generate_key(store_name, undo)?;
                    inject_key(&mut value, path, &generated)?;
                    generated
                }
                None => {
                    return Err(HostError::data(
                        "Evaluating the object store's key path did not yield a value.",
                    ));
                }
            },
            (None, Some(key)) => key,
            (None, None) if self.options.auto_increment => self.generate_key(store_name, undo)?,
            (None, None) => {
                return Err(HostError::data(
                    "The object store uses out-of-line keys and has no key generator and the key parameter was not provided.",
                ));
            }
        };

        if self.options.auto_increment {
            if let Key::Number(n) = key {
                self.observe_explicit_key(store_name, n, undo);
            }
        }

        if !overwrite && self.records.contains_key(&key) {
            return Err(HostError::constraint(
                "Key already exists in the object store.",
            ));
        }

        self.write_record(store_name, key, value, undo)
    }

    /// Writes a record under a known primary key, enforcing unique indexes.
    pub(crate) fn write_record(
        &mut self,
        store_name: &str,
        key: Key,
        value: Value,
        undo: &mut Vec<Undo>,
    ) -> HostResult<Key> {
        for (index_name, index) in self.indexes.iter().filter(|(_, ix)| ix.unique) {
            let Some(Ok(index_key)) = Key::extract(&value, &index.key_path) else {
                continue;
            };
            let taken = self.records.iter().any(|(pk, other)| {
                *pk != key
                    && matches!(Key::extract(other, &index.key_path), Some(Ok(k)) if k == index_key)
            });
            if taken {
                return Err(HostError::constraint(format!(
                    "Unable to add key to index '{}': at least one key does not satisfy the uniqueness requirements.",
                    index_name
                )));
            }
        }

        let previous = self.records.insert(key.clone(), value);
        undo.push(Undo::Record {
            store: store_name.to_string(),
            key: key.clone(),
            previous,
        });
        Ok(key)
    }

    pub(crate) fn delete_records(
        &mut self,
        store_name: &str,
        query: &KeyQuery,
        undo: &mut Vec<Undo>,
    ) {
        let doomed: Vec<Key> = self
            .records
            .keys()
            .filter(|key| query.matches(key))
            .cloned()
            .collect();
        for key in doomed {
            let previous = self.records.remove(&key);
            undo.push(Undo::Record {
                store: store_name.to_string(),
                key,
                previous,
            });
        }
    }

    pub(crate) fn clear(&mut self, store_name: &str, undo: &mut Vec<Undo>) {
        let records = std::mem::take(&mut self.records);
        undo.extend(records.into_iter().map(|(key, value)| Undo::Record {
            store: store_name.to_string(),
            key,
            previous: Some(value),
        }));
    }

    /// Fails when existing records already violate a new unique index.
    pub(crate) fn check_unique_existing(&self, name: &str, index: &IndexData) -> HostResult<()> {
        let mut seen: Vec<Key> = Vec::new();
        for value in self.records.values() {
            if let Some(Ok(key)) = Key::extract(value, &index.key_path) {
                if seen.contains(&key) {
                    return Err(HostError::constraint(format!(
                        "Unable to create index '{}': existing records violate the uniqueness requirement.",
                        name
                    )));
                }
                seen.push(key);
            }
        }
        Ok(())
    }

    fn generate_key(&mut self, store_name: &str, undo: &mut Vec<Undo>) -> HostResult<Key> {
        if self.next_key > MAX_GENERATED_KEY {
            return Err(HostError::constraint("The key generator has reached its maximum."));
        }
        let key = self.next_key;
        undo.push(Undo::Generator {
            store: store_name.to_string(),
            previous: self.next_key,
        });
        self.next_key += 1;
        Ok(Key::from(key))
    }

    fn observe_explicit_key(&mut self, store_name: &str, n: f64, undo: &mut Vec<Undo>) {
        if n.is_finite() && n >= self.next_key as f64 {
            undo.push(Undo::Generator {
                store: store_name.to_string(),
                previous: self.next_key,
            });
            self.next_key = (n.floor() as u64).saturating_add(1);
        }
    }
}

fn inject_key(value: &mut Value, key_path: &str, key: &Key) -> HostResult<()> {
    let mut segments: Vec<&str> = key_path.split('.').collect();
    let last = segments.pop().unwrap_or(key_path);
    let mut current = value;
    for segment in segments {
        let object = current.as_object_mut().ok_or_else(|| {
            HostError::data("The generated key could not be inserted into the value.")
        })?;
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    current
        .as_object_mut()
        .ok_or_else(|| HostError::data("The generated key could not be inserted into the value."))?
        .insert(last.to_string(), key.to_value());
    Ok(())
}

impl EngineState {
    /// Positions of a source in traversal order, restricted to `query`.
    pub(crate) fn entries(
        &self,
        source: &CursorSource,
        query: Option<&KeyQuery>,
    ) -> HostResult<Vec<Entry>> {
        let in_query = |key: &Key| query.is_none_or(|q| q.matches(key));
        match source {
            CursorSource::ObjectStore(store) => Ok(self
                .store(store)?
                .records
                .iter()
                .filter(|(key, _)| in_query(key))
                .map(|(key, value)| Entry {
                    key: key.clone(),
                    primary_key: key.clone(),
                    value: value.clone(),
                })
                .collect()),
            CursorSource::Index { store, index } => {
                let data = self.store(store)?;
                let index_data = data.indexes.get(index).ok_or_else(|| {
                    HostError::not_found(format!(
                        "Failed to execute 'index' on 'IDBObjectStore': The specified index '{}' was not found.",
                        index
                    ))
                })?;
                let mut entries: Vec<Entry> = data
                    .records
                    .iter()
                    .filter_map(|(pk, value)| match Key::extract(value, &index_data.key_path) {
                        Some(Ok(key)) if in_query(&key) => Some(Entry {
                            key,
                            primary_key: pk.clone(),
                            value: value.clone(),
                        }),
                        _ => None,
                    })
                    .collect();
                entries.sort_by(|a, b| {
                    a.key
                        .cmp(&b.key)
                        .then_with(|| a.primary_key.cmp(&b.primary_key))
                });
                Ok(entries)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn out_of_line() -> StoreData {
        StoreData::new(ObjectStoreOptions::default())
    }

    #[test]
    fn test_add_rejects_duplicate_keys() {
        let mut store = out_of_line();
        let mut undo = Vec::new();
        store
            .store_record("s", json!("a"), Some(Key::from("k")), false, &mut undo)
            .unwrap();
        let err = store
            .store_record("s", json!("b"), Some(Key::from("k")), false, &mut undo)
            .unwrap_err();
        assert_eq!(err.name, "ConstraintError");
        store
            .store_record("s", json!("b"), Some(Key::from("k")), true, &mut undo)
            .unwrap();
        assert_eq!(store.records[&Key::from("k")], json!("b"));
    }

    #[test]
    fn test_out_of_line_store_requires_key() {
        let mut store = out_of_line();
        let err = store
            .store_record("s", json!(1), None, true, &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.name, "DataError");
    }

    #[test]
    fn test_key_generator_injects_into_key_path() {
        let mut store = StoreData::new(ObjectStoreOptions {
            key_path: Some("meta.id".into()),
            auto_increment: true,
        });
        let mut undo = Vec::new();
        let key = store
            .store_record("s", json!({"name": "x"}), None, false, &mut undo)
            .unwrap();
        assert_eq!(key, Key::from(1));
        assert_eq!(store.records[&key], json!({"name": "x", "meta": {"id": 1}}));

        store
            .store_record("s", json!({"meta": {"id": 10}}), None, false, &mut undo)
            .unwrap();
        let next = store
            .store_record("s", json!({}), None, false, &mut undo)
            .unwrap();
        assert_eq!(next, Key::from(11));
    }

    #[test]
    fn test_undo_restores_previous_state() {
        let mut state = EngineState::default();
        state.stores.insert("s".into(), out_of_line());
        let mut undo = Vec::new();
        {
            let store = state.store_mut("s").unwrap();
            store
                .store_record("s", json!(1), Some(Key::from("a")), false, &mut undo)
                .unwrap();
        }
        let mut committed = Vec::new();
        state
            .store_mut("s")
            .unwrap()
            .store_record("s", json!(0), Some(Key::from("b")), false, &mut committed)
            .unwrap();
        state
            .store_mut("s")
            .unwrap()
            .delete_records("s", &KeyQuery::from("b"), &mut undo);

        for entry in undo.into_iter().rev() {
            entry.revert(&mut state);
        }
        let store = state.store("s").unwrap();
        assert!(!store.records.contains_key(&Key::from("a")));
        assert_eq!(store.records[&Key::from("b")], json!(0));
    }

    #[test]
    fn test_unique_index_violation() {
        let mut store = out_of_line();
        store.indexes.insert(
            "by_email".into(),
            IndexData {
                key_path: "email".into(),
                unique: true,
            },
        );
        let mut undo = Vec::new();
        store
            .store_record("s", json!({"email": "a@x"}), Some(Key::from(1)), false, &mut undo)
            .unwrap();
        let err = store
            .store_record("s", json!({"email": "a@x"}), Some(Key::from(2)), false, &mut undo)
            .unwrap_err();
        assert_eq!(err.name, "ConstraintError");
        // Rewriting the same record keeps its own index key.
        store
            .store_record("s", json!({"email": "a@x", "v": 2}), Some(Key::from(1)), true, &mut undo)
            .unwrap();
    }

    #[test]
    fn test_index_entries_sorted_by_index_key_then_primary_key() {
        let mut state = EngineState::default();
        let mut store = out_of_line();
        store.indexes.insert(
            "by_tag".into(),
            IndexData {
                key_path: "tag".into(),
                unique: false,
            },
        );
        let mut undo = Vec::new();
        for (pk, tag) in [("c", "x"), ("a", "y"), ("b", "x")] {
            store
                .store_record("s", json!({"tag": tag}), Some(Key::from(pk)), false, &mut undo)
                .unwrap();
        }
        state.stores.insert("s".into(), store);
        let source = CursorSource::Index {
            store: "s".into(),
            index: "by_tag".into(),
        };
        let order: Vec<_> = state
            .entries(&source, None)
            .unwrap()
            .into_iter()
            .map(|e| e.primary_key)
            .collect();
        assert_eq!(order, vec![Key::from("b"), Key::from("c"), Key::from("a")]);
    }
}
