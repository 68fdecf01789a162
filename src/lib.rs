// ============================================================================
// idb-durable Library
// ============================================================================
//
// Awaitable requests, cursor iteration and transactions that survive being
// auto-finished, over an event-driven object-store database.
//
// ============================================================================

//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//!
//! use idb_durable::{Context, Database, DurableTransaction, MemoryHost, ObjectStoreOptions, TransactionMode};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let host = MemoryHost::new();
//! host.create_object_store("items", ObjectStoreOptions::default()).unwrap();
//! let db = Database::new(Arc::new(host.clone()));
//!
//! let txn = DurableTransaction::new(&db, TransactionMode::ReadWrite, &["items"]).unwrap();
//! let items = txn.object_store("items").unwrap();
//! let ctx = Context::background();
//!
//! items.put_key(&ctx, "k1", json!("v1")).await.unwrap();
//! // The host may finish the transaction while the program is suspended.
//! host.expire_transactions();
//! assert_eq!(items.get(&ctx, "k1").await.unwrap(), Some(json!("v1")));
//! txn.commit().unwrap();
//! # });
//! ```

pub mod config;
pub mod context;
pub mod core;
pub mod database;
pub mod durable;
pub mod host;
pub mod key_range;
pub mod request;
pub mod transaction;

pub use config::{BridgeConfig, RetryPolicy};
pub use context::{CancelHandle, Context};
pub use core::{
    CursorDirection, HostError, IdbError, Key, ReadyState, Result, TransactionMode,
    TransactionState, is_txn_finished_err,
};
pub use database::Database;
pub use durable::{DurableObjectStore, DurableTransaction};
pub use host::{IndexOptions, MemoryHost, ObjectStoreOptions};
pub use key_range::{KeyQuery, KeyRange};
pub use request::cursor::{CursorRequest, CursorWithValueRequest};
pub use request::{AckRequest, ArrayRequest, CountRequest, Cursor, CursorWithValue, Listening, Request};
pub use transaction::{Index, ObjectStore, Transaction, retry_txn};
