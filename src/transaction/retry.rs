use std::future::Future;

use log::{debug, warn};

use super::Transaction;
use crate::core::{Result, TransactionMode};
use crate::database::Database;

/// Runs `unit_of_work` against a fresh transaction, starting over whenever
/// the transaction finishes before the work is done.
///
/// The host completes a transaction on its own once its requests are
/// satisfied and the program stops issuing new ones, which happens whenever
/// the task suspends on something other than one of its requests. Operations
/// issued after that point fail with [`IdbError::TransactionFinished`]; this
/// wrapper then opens a new transaction and runs the whole unit again.
///
/// On any other error the transaction is aborted and the error returned
/// unchanged. On success the transaction is committed; a commit that lands
/// after the host already completed the transaction counts as success.
///
/// `unit_of_work` may run more than once and must be idempotent.
pub async fn retry_txn<S, F, Fut, T>(
    db: &Database,
    mode: TransactionMode,
    store_names: &[S],
    mut unit_of_work: F,
) -> Result<T>
where
    S: AsRef<str>,
    F: FnMut(Transaction) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = db.config().retry.clone();
    let mut attempt = 1usize;
    loop {
        let txn = db.transaction(mode, store_names)?;

        match unit_of_work(txn.clone()).await {
            Ok(value) => {
                return match txn.commit() {
                    Ok(()) => Ok(value),
                    Err(err) if err.is_txn_finished() => Ok(value),
                    Err(err) => Err(err),
                };
            }
            Err(err) if err.is_txn_finished() => {
                if !policy.allows_retry(attempt) {
                    warn!(
                        "retry_txn giving up after {} attempts: {}",
                        attempt, err
                    );
                    return Err(err);
                }
                debug!(
                    "retry_txn transaction {} finished early (attempt {}): {}",
                    txn.id(),
                    attempt,
                    err
                );
                attempt += 1;
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    debug!("retry_txn abort after failure: {}", abort_err);
                }
                return Err(err);
            }
        }
    }
}

impl Database {
    /// See [`retry_txn`].
    pub async fn retry_txn<S, F, Fut, T>(
        &self,
        mode: TransactionMode,
        store_names: &[S],
        unit_of_work: F,
    ) -> Result<T>
    where
        S: AsRef<str>,
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_txn(self, mode, store_names, unit_of_work).await
    }
}

