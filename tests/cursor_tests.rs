/// Cursor iteration tests
///
/// Traversal order, stop signal, auto-advance and the cursor movement and
/// record operations.
/// Run with: cargo test --test cursor_tests

use std::sync::Arc;
use std::time::Duration;

use idb_durable::{
    Context, CursorDirection, Database, IdbError, IndexOptions, Key, KeyRange, MemoryHost,
    ObjectStore, ObjectStoreOptions, Transaction, TransactionMode,
};
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};

async fn letters(keys: &[&str]) -> (MemoryHost, Transaction, ObjectStore) {
    let host = MemoryHost::new();
    host.create_object_store("items", ObjectStoreOptions::default())
        .unwrap();
    let db = Database::new(Arc::new(host.clone()));
    let txn = db.transaction(TransactionMode::ReadWrite, &["items"]).unwrap();
    let store = txn.object_store("items").unwrap();
    let ctx = Context::background();
    for key in keys {
        store
            .add_key(*key, json!(key.to_uppercase()))
            .unwrap()
            .await_ack(&ctx)
            .await
            .unwrap();
    }
    (host, txn, store)
}

async fn people() -> (Transaction, ObjectStore) {
    let host = MemoryHost::new();
    host.create_object_store("people", ObjectStoreOptions {
        key_path: Some("id".into()),
        auto_increment: false,
    })
    .unwrap();
    host.create_index("people", "by_city", "city", IndexOptions::default())
        .unwrap();
    let db = Database::new(Arc::new(host));
    let txn = db.transaction(TransactionMode::ReadWrite, &["people"]).unwrap();
    let store = txn.object_store("people").unwrap();
    let ctx = Context::background();
    for (id, city) in [(1, "london"), (2, "london"), (3, "nyc"), (4, "london")] {
        store
            .add(json!({"id": id, "city": city}))
            .unwrap()
            .await_ack(&ctx)
            .await
            .unwrap();
    }
    (txn, store)
}

#[tokio::test]
async fn test_forward_traversal_is_ascending() {
    let (_host, _txn, store) = letters(&["a", "b", "c"]).await;
    let ctx = Context::background();
    let mut seen = Vec::new();
    store
        .open_cursor(CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |cursor| {
            seen.push(cursor.key().unwrap());
            async { Ok(()) }
        })
        .await
        .unwrap();
    assert_eq!(seen, vec![Key::from("a"), Key::from("b"), Key::from("c")]);
}

#[tokio::test]
async fn test_reverse_traversal_is_descending() {
    let (_host, _txn, store) = letters(&["a", "b", "c"]).await;
    let ctx = Context::background();
    let mut seen = Vec::new();
    store
        .open_key_cursor(CursorDirection::Prev)
        .unwrap()
        .iter(&ctx, |cursor| {
            seen.push(cursor.key().unwrap());
            async { Ok(()) }
        })
        .await
        .unwrap();
    assert_eq!(seen, vec![Key::from("c"), Key::from("b"), Key::from("a")]);
}

#[tokio::test]
async fn test_stop_after_first_step() {
    let (_host, _txn, store) = letters(&["a", "b", "c"]).await;
    let ctx = Context::background();
    let mut calls = 0;
    let outcome = store
        .open_cursor(CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |_cursor| {
            calls += 1;
            async { Err(IdbError::StopIteration) }
        })
        .await;
    assert_ok!(outcome);
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn test_reading_without_moving_advances_once_per_step() {
    let (_host, _txn, store) = letters(&["a", "b", "c", "d"]).await;
    let ctx = Context::background();
    let mut seen: Vec<(Key, Value)> = Vec::new();
    store
        .open_cursor(CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |cursor| {
            seen.push((cursor.primary_key().unwrap(), cursor.value().unwrap()));
            assert!(!cursor.iterated());
            async { Ok(()) }
        })
        .await
        .unwrap();
    let keys: Vec<Key> = seen.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, ["a", "b", "c", "d"].map(Key::from).to_vec());
    assert_eq!(seen[3].1, json!("D"));
}

#[tokio::test]
async fn test_advance_skips_entries() {
    let (_host, _txn, store) = letters(&["a", "b", "c", "d", "e"]).await;
    let ctx = Context::background();
    let mut seen = Vec::new();
    store
        .open_cursor(CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |cursor| {
            seen.push(cursor.key().unwrap());
            let moved = cursor.advance(2);
            async move { moved }
        })
        .await
        .unwrap();
    assert_eq!(seen, ["a", "c", "e"].map(Key::from).to_vec());
}

#[tokio::test]
async fn test_advance_zero_is_rejected() {
    let (_host, _txn, store) = letters(&["a"]).await;
    let ctx = Context::background();
    let err = assert_err!(
        store
            .open_cursor(CursorDirection::Next)
            .unwrap()
            .iter(&ctx, |cursor| {
                let moved = cursor.advance(0);
                async move { moved }
            })
            .await
    );
    assert_eq!(err.host_error().map(|e| e.name.as_str()), Some("TypeError"));
}

#[tokio::test]
async fn test_continue_key_jumps_forward() {
    let (_host, _txn, store) = letters(&["a", "b", "c", "d", "e"]).await;
    let ctx = Context::background();
    let mut seen = Vec::new();
    store
        .open_key_cursor(CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |cursor| {
            let first = seen.is_empty();
            seen.push(cursor.key().unwrap());
            let moved = if first { cursor.continue_key("d") } else { Ok(()) };
            async move { moved }
        })
        .await
        .unwrap();
    assert_eq!(seen, ["a", "d", "e"].map(Key::from).to_vec());
}

#[tokio::test]
async fn test_continue_key_behind_position_fails() {
    let (_host, _txn, store) = letters(&["a", "b", "c"]).await;
    let ctx = Context::background();
    let cursor = store
        .open_key_cursor_range(KeyRange::lower_bound("b", false), CursorDirection::Next)
        .unwrap()
        .await_cursor(&ctx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cursor.key(), Some(Key::from("b")));
    let err = assert_err!(cursor.continue_key("a"));
    assert_eq!(err.host_error().map(|e| e.name.as_str()), Some("DataError"));
}

#[tokio::test]
async fn test_continue_primary_key_on_index() {
    let (_txn, store) = people().await;
    let ctx = Context::background();
    let index = store.index("by_city").unwrap();
    let mut seen = Vec::new();
    index
        .open_cursor(CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |cursor| {
            let first = seen.is_empty();
            seen.push((cursor.key().unwrap(), cursor.primary_key().unwrap()));
            let moved = if first {
                cursor.continue_primary_key("london", 4)
            } else {
                Ok(())
            };
            async move { moved }
        })
        .await
        .unwrap();
    assert_eq!(
        seen,
        vec![
            (Key::from("london"), Key::from(1)),
            (Key::from("london"), Key::from(4)),
            (Key::from("nyc"), Key::from(3)),
        ]
    );
}

#[tokio::test]
async fn test_continue_primary_key_requires_index() {
    let (_txn, store) = people().await;
    let ctx = Context::background();
    let cursor = store
        .open_cursor(CursorDirection::Next)
        .unwrap()
        .await_cursor(&ctx)
        .await
        .unwrap()
        .unwrap();
    let err = assert_err!(cursor.continue_primary_key(1, 2));
    assert_eq!(err.host_error().map(|e| e.name.as_str()), Some("InvalidAccessError"));
}

#[tokio::test]
async fn test_unique_directions_over_index() {
    let (_txn, store) = people().await;
    let ctx = Context::background();
    let index = store.index("by_city").unwrap();

    let mut forward = Vec::new();
    index
        .open_key_cursor(CursorDirection::NextUnique)
        .unwrap()
        .iter(&ctx, |cursor| {
            forward.push(cursor.primary_key().unwrap());
            async { Ok(()) }
        })
        .await
        .unwrap();
    assert_eq!(forward, vec![Key::from(1), Key::from(3)]);

    let mut backward = Vec::new();
    index
        .open_key_cursor(CursorDirection::PrevUnique)
        .unwrap()
        .iter(&ctx, |cursor| {
            backward.push(cursor.primary_key().unwrap());
            async { Ok(()) }
        })
        .await
        .unwrap();
    assert_eq!(backward, vec![Key::from(3), Key::from(1)]);
}

#[tokio::test]
async fn test_delete_and_update_through_cursor() {
    let (host, txn, store) = letters(&["a", "b", "c", "d"]).await;
    let ctx = Context::background();
    store
        .open_cursor(CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |cursor| {
            let ctx = &ctx;
            async move {
                match cursor.key() {
                    Some(key) if key == Key::from("b") || key == Key::from("d") => {
                        cursor.delete()?.await_ack(ctx).await
                    }
                    _ => {
                        let value = cursor.value().unwrap_or(Value::Null);
                        let lowered = json!(value.as_str().unwrap_or_default().to_lowercase());
                        cursor.update(lowered)?.await_key(ctx).await.map(|_| ())
                    }
                }
            }
        })
        .await
        .unwrap();
    txn.commit().unwrap();
    txn.await_completion(&ctx).await.unwrap();

    assert_eq!(
        host.records("items").unwrap(),
        vec![(Key::from("a"), json!("a")), (Key::from("c"), json!("c"))]
    );
}

#[tokio::test]
async fn test_key_cursor_cannot_write() {
    let (_host, _txn, store) = letters(&["a"]).await;
    let ctx = Context::background();
    let cursor = store
        .open_key_cursor(CursorDirection::Next)
        .unwrap()
        .await_cursor(&ctx)
        .await
        .unwrap()
        .unwrap();
    let err = cursor.delete().err().unwrap();
    assert_eq!(err.host_error().map(|e| e.name.as_str()), Some("InvalidStateError"));
}

#[tokio::test]
async fn test_step_error_propagates() {
    let (_host, _txn, store) = letters(&["a", "b"]).await;
    let ctx = Context::background();
    let mut calls = 0;
    let err = assert_err!(
        store
            .open_cursor(CursorDirection::Next)
            .unwrap()
            .iter(&ctx, |_cursor| {
                calls += 1;
                async { Err(IdbError::ExecutionError("boom".into())) }
            })
            .await
    );
    assert!(matches!(err, IdbError::ExecutionError(_)));
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn test_empty_range_never_calls_step() {
    let (_host, _txn, store) = letters(&["a", "b"]).await;
    let ctx = Context::background();
    let mut calls = 0;
    store
        .open_cursor_key("zzz", CursorDirection::Next)
        .unwrap()
        .iter(&ctx, |_cursor| {
            calls += 1;
            async { Ok(()) }
        })
        .await
        .unwrap();
    assert_eq!(calls, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_traversals_on_worker_threads() {
    let host = MemoryHost::new();
    host.create_object_store("items", ObjectStoreOptions::default())
        .unwrap();
    let db = Database::new(Arc::new(host));
    let ctx = Context::background().with_timeout(Duration::from_secs(5));
    let expected: Vec<Key> = ["a", "b", "c", "d", "e"].map(Key::from).to_vec();

    db.retry_txn(TransactionMode::ReadWrite, &["items"], |txn| {
        let ctx = &ctx;
        async move {
            let store = txn.object_store("items")?;
            for key in ["a", "b", "c", "d", "e"] {
                store.put_key(key, json!(key))?.await_key(ctx).await?;
            }
            Ok::<_, IdbError>(())
        }
    })
    .await
    .unwrap();

    for _ in 0..200 {
        let seen = db
            .retry_txn(TransactionMode::ReadOnly, &["items"], |txn| {
                let ctx = &ctx;
                async move {
                    let mut seen = Vec::new();
                    txn.object_store("items")?
                        .open_key_cursor(CursorDirection::Next)?
                        .iter(ctx, |cursor| {
                            seen.extend(cursor.key());
                            async { Ok(()) }
                        })
                        .await?;
                    Ok::<_, IdbError>(seen)
                }
            })
            .await
            .unwrap();
        assert_eq!(seen, expected);
    }
}
