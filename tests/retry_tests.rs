/// Retry wrapper tests
///
/// `retry_txn` reruns a unit of work on a fresh transaction whenever the
/// host finishes the previous one first.
/// Run with: cargo test --test retry_tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use idb_durable::{
    BridgeConfig, Context, Database, IdbError, Key, MemoryHost, ObjectStoreOptions, RetryPolicy,
    TransactionMode, TransactionState, is_txn_finished_err, retry_txn,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn setup(config: BridgeConfig) -> (MemoryHost, Database) {
    let host = MemoryHost::new();
    host.create_object_store("items", ObjectStoreOptions::default())
        .unwrap();
    let db = Database::with_config(Arc::new(host.clone()), config);
    (host, db)
}

#[tokio::test]
async fn test_single_attempt_commits() {
    let (host, db) = setup(BridgeConfig::default());
    let ctx = Context::background();
    let calls = AtomicUsize::new(0);

    let key = retry_txn(&db, TransactionMode::ReadWrite, &["items"], |txn| {
        calls.fetch_add(1, Ordering::SeqCst);
        let ctx = &ctx;
        async move {
            let store = txn.object_store("items")?;
            store.put_key("k", json!("v"))?.await_key(ctx).await
        }
    })
    .await
    .unwrap();

    assert_eq!(key, Some(Key::from("k")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(host.records("items").unwrap(), vec![(Key::from("k"), json!("v"))]);
}

#[tokio::test]
async fn test_injected_finish_reruns_idempotent_write() {
    let (clean_host, clean_db) = setup(BridgeConfig::default());
    let (host, db) = setup(BridgeConfig::default());
    let ctx = Context::background();

    let write = |db: Database, inject: Option<MemoryHost>| {
        let ctx = ctx.clone();
        async move {
            let calls = AtomicUsize::new(0);
            db.retry_txn(TransactionMode::ReadWrite, &["items"], |txn| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let inject = inject.clone();
                let ctx = &ctx;
                async move {
                    let store = txn.object_store("items")?;
                    store.put_key("a", json!(1))?.await_key(ctx).await?;
                    if attempt == 1 {
                        if let Some(host) = inject {
                            host.expire_transactions();
                        }
                    }
                    store.put_key("b", json!(2))?.await_key(ctx).await?;
                    Ok::<_, IdbError>(())
                }
            })
            .await
            .unwrap();
            calls.load(Ordering::SeqCst)
        }
    };

    assert_eq!(write(clean_db, None).await, 1);
    assert!(write(db, Some(host.clone())).await >= 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(host.records("items").unwrap(), clean_host.records("items").unwrap());
}

#[tokio::test]
async fn test_suspension_inside_unit_is_absorbed() {
    let (host, db) = setup(BridgeConfig::default());
    let ctx = Context::background();
    let calls = AtomicUsize::new(0);

    let count = retry_txn(&db, TransactionMode::ReadWrite, &["items"], |txn| {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = &ctx;
        async move {
            let store = txn.object_store("items")?;
            store.put_key("k", json!(attempt))?.await_key(ctx).await?;
            if attempt == 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            store.count()?.await_count(ctx).await
        }
    })
    .await
    .unwrap();

    assert_eq!(count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(host.records("items").unwrap(), vec![(Key::from("k"), json!(2))]);
}

#[tokio::test]
async fn test_max_attempts_returns_finished_error() {
    let config = BridgeConfig::new().retry(RetryPolicy::unbounded().with_max_attempts(3));
    let (host, db) = setup(config);
    let calls = AtomicUsize::new(0);

    let outcome: idb_durable::Result<u64> =
        retry_txn(&db, TransactionMode::ReadOnly, &["items"], |txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            host.expire_transactions();
            async move {
                let store = txn.object_store("items")?;
                store.count()?.await_count(&Context::background()).await
            }
        })
        .await;

    assert!(is_txn_finished_err(&outcome));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_other_error_aborts_and_propagates() {
    let (host, db) = setup(BridgeConfig::default());
    let ctx = Context::background();
    let seen = std::sync::Mutex::new(None);
    let calls = AtomicUsize::new(0);

    let err = assert_err!(
        retry_txn(&db, TransactionMode::ReadWrite, &["items"], |txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            *seen.lock().unwrap() = Some(txn.clone());
            let ctx = &ctx;
            async move {
                let store = txn.object_store("items")?;
                store.add_key("dup", json!(1))?.await_ack(ctx).await?;
                store.add_key("dup", json!(2))?.await_ack(ctx).await
            }
        })
        .await
    );

    assert_eq!(err.host_error().map(|e| e.name.as_str()), Some("ConstraintError"));
    assert!(!err.is_txn_finished());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let txn = seen.lock().unwrap().take().unwrap();
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert!(host.records("items").unwrap().is_empty());
}

#[tokio::test]
async fn test_unit_error_aborts_pending_writes() {
    let (host, db) = setup(BridgeConfig::default());
    let ctx = Context::background();

    let err = assert_err!(
        db.retry_txn(TransactionMode::ReadWrite, &["items"], |txn| {
            let ctx = &ctx;
            async move {
                let store = txn.object_store("items")?;
                store.put_key("k", json!(1))?.await_key(ctx).await?;
                Err::<(), _>(IdbError::ExecutionError("validation failed".into()))
            }
        })
        .await
    );
    assert!(matches!(err, IdbError::ExecutionError(_)));
    assert!(host.records("items").unwrap().is_empty());
}

#[tokio::test]
async fn test_finished_commit_counts_as_success() {
    let (host, db) = setup(BridgeConfig::default());
    let ctx = Context::background();
    let calls = AtomicUsize::new(0);

    let outcome = retry_txn(&db, TransactionMode::ReadWrite, &["items"], |txn| {
        calls.fetch_add(1, Ordering::SeqCst);
        let host = host.clone();
        let ctx = &ctx;
        async move {
            let store = txn.object_store("items")?;
            store.put_key("k", json!(1))?.await_key(ctx).await?;
            host.expire_transactions();
            Ok::<_, IdbError>("done")
        }
    })
    .await;

    assert_eq!(assert_ok!(outcome), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(host.records("items").unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_store_list_is_config_error() {
    let (_host, db) = setup(BridgeConfig::default());
    let empty: [&str; 0] = [];
    let err = assert_err!(
        retry_txn(&db, TransactionMode::ReadOnly, &empty, |_txn| async { Ok::<_, IdbError>(()) }).await
    );
    assert!(matches!(err, IdbError::Config(_)));
}
