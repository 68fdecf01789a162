// ============================================================================
// Host Engine Boundary
// ============================================================================
//
// The database itself lives outside this crate. These traits describe the
// primitives the bridge consumes: transactions over named object stores,
// requests that complete later by firing events, and cursors driven one step
// at a time by the host.
//
// Every fallible call returns a `HostError`; classification into the crate's
// error taxonomy happens in the wrappers, never here.
//
// ============================================================================

pub mod memory;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::core::{CursorDirection, Key, ReadyState, TransactionMode, TransactionState};
use crate::key_range::KeyQuery;

pub use crate::core::HostError;
pub use memory::{IndexOptions, MemoryHost, ObjectStoreOptions};

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Events fired by requests (`Success`, `Error`) and transactions
/// (`Complete`, `Abort`, `Error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Success,
    Error,
    Complete,
    Abort,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Success => write!(f, "success"),
            EventKind::Error => write!(f, "error"),
            EventKind::Complete => write!(f, "complete"),
            EventKind::Abort => write!(f, "abort"),
        }
    }
}

pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub trait EventTarget: Send + Sync {
    fn add_listener(&self, kind: EventKind, listener: Listener) -> HostResult<ListenerId>;

    fn remove_listener(&self, kind: EventKind, id: ListenerId) -> HostResult<()>;

    /// Number of listeners currently registered for `kind`.
    fn listener_count(&self, kind: EventKind) -> usize;
}

/// Result value of a completed request.
#[derive(Clone)]
pub enum HostValue {
    /// No value (acknowledgements, missing records).
    Undefined,
    /// End of a cursor's range.
    Null,
    Value(Value),
    Key(Key),
    Count(u64),
    Keys(Vec<Key>),
    Cursor(Arc<dyn HostCursor>),
}

impl HostValue {
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Value(_) => "value",
            HostValue::Key(_) => "key",
            HostValue::Count(_) => "count",
            HostValue::Keys(_) => "keys",
            HostValue::Cursor(_) => "cursor",
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => write!(f, "Undefined"),
            HostValue::Null => write!(f, "Null"),
            HostValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            HostValue::Key(k) => f.debug_tuple("Key").field(k).finish(),
            HostValue::Count(n) => f.debug_tuple("Count").field(n).finish(),
            HostValue::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            HostValue::Cursor(cursor) => f
                .debug_struct("Cursor")
                .field("source", &cursor.source())
                .field("direction", &cursor.direction())
                .finish(),
        }
    }
}

/// What a cursor traverses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorSource {
    ObjectStore(String),
    Index { store: String, index: String },
}

/// One outstanding operation. Completes exactly once, except cursor requests,
/// which complete once per step.
pub trait HostRequest: EventTarget {
    fn ready_state(&self) -> ReadyState;

    /// Result of the last completion. Fails while pending or after an error.
    fn result(&self) -> HostResult<HostValue>;

    /// Error of the last completion, if it failed.
    fn error(&self) -> HostResult<Option<HostError>>;
}

pub trait HostEngine: Send + Sync {
    fn object_store_names(&self) -> Vec<String>;

    /// Opens a transaction over a non-empty, ordered set of store names.
    fn transaction(
        &self,
        mode: TransactionMode,
        store_names: &[String],
    ) -> HostResult<Arc<dyn HostTransaction>>;
}

pub trait HostTransaction: EventTarget {
    fn id(&self) -> u64;

    fn mode(&self) -> TransactionMode;

    fn object_store_names(&self) -> Vec<String>;

    fn state(&self) -> TransactionState;

    /// Error that caused the transaction to abort, if any.
    fn error(&self) -> Option<HostError>;

    fn object_store(&self, name: &str) -> HostResult<Arc<dyn HostObjectStore>>;

    fn commit(&self) -> HostResult<()>;

    fn abort(&self) -> HostResult<()>;
}

/// Read operations shared by object stores and indexes.
pub trait HostSource: Send + Sync {
    fn get(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>>;

    fn get_key(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>>;

    /// Lists primary keys. `count` of `None` lists everything.
    fn get_all_keys(
        &self,
        query: Option<KeyQuery>,
        count: Option<u32>,
    ) -> HostResult<Arc<dyn HostRequest>>;

    fn count(&self, query: Option<KeyQuery>) -> HostResult<Arc<dyn HostRequest>>;

    fn open_cursor(
        &self,
        query: Option<KeyQuery>,
        direction: CursorDirection,
        with_value: bool,
    ) -> HostResult<Arc<dyn HostRequest>>;
}

pub trait HostObjectStore: HostSource {
    fn name(&self) -> String;

    fn key_path(&self) -> Option<String>;

    fn auto_increment(&self) -> bool;

    fn index_names(&self) -> Vec<String>;

    fn add(&self, value: Value, key: Option<Key>) -> HostResult<Arc<dyn HostRequest>>;

    fn put(&self, value: Value, key: Option<Key>) -> HostResult<Arc<dyn HostRequest>>;

    fn delete(&self, query: KeyQuery) -> HostResult<Arc<dyn HostRequest>>;

    fn clear(&self) -> HostResult<Arc<dyn HostRequest>>;

    fn index(&self, name: &str) -> HostResult<Arc<dyn HostIndex>>;
}

pub trait HostIndex: HostSource {
    fn name(&self) -> String;

    fn object_store_name(&self) -> String;

    fn key_path(&self) -> String;

    fn unique(&self) -> bool;
}

pub trait HostCursor: Send + Sync {
    fn source(&self) -> CursorSource;

    fn direction(&self) -> CursorDirection;

    /// Key at the current position; `None` outside the range.
    fn key(&self) -> Option<Key>;

    fn primary_key(&self) -> Option<Key>;

    /// Record value, for cursors opened with values.
    fn value(&self) -> Option<Value>;

    fn advance(&self, count: u32) -> HostResult<()>;

    fn continue_(&self, key: Option<Key>) -> HostResult<()>;

    fn continue_primary_key(&self, key: Key, primary_key: Key) -> HostResult<()>;

    fn update(&self, value: Value) -> HostResult<Arc<dyn HostRequest>>;

    fn delete(&self) -> HostResult<Arc<dyn HostRequest>>;
}
