// ============================================================================
// Wait Context
// ============================================================================
//
// A cloneable token that ends a wait, either because a caller cancelled it or
// because its deadline passed. Ending a wait never stops the host operation
// being waited on.
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::IdbError;

#[derive(Debug, Clone, Default)]
pub struct Context {
    cancels: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every context derived from the one that produced it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that never ends.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a child that also ends when the returned handle is cancelled.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.cancels.push(rx);
        (child, CancelHandle { tx: Arc::new(tx) })
    }

    /// Derives a child whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The reason this context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<IdbError> {
        if self.cancels.iter().any(|rx| *rx.borrow()) {
            return Some(IdbError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(IdbError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context ends, yielding the reason.
    pub async fn done(&self) -> IdbError {
        let cancelled = async {
            if self.cancels.is_empty() {
                return std::future::pending::<()>().await;
            }
            let waits = self.cancels.iter().cloned().map(|mut rx| {
                Box::pin(async move {
                    // A dropped handle can no longer cancel.
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                })
            });
            select_all(waits).await;
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => IdbError::Cancelled,
            _ = expired => IdbError::DeadlineExceeded,
        }
    }
}
