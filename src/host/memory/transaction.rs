use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use super::events::EventListeners;
use super::handles::MemoryObjectStore;
use super::request::{MemoryRequest, Operation};
use super::store::Undo;
use super::{Engine, lock};
use crate::core::{HostError, TransactionMode, TransactionState};
use crate::host::{
    EventKind, EventTarget, HostObjectStore, HostResult, HostTransaction, Listener, ListenerId,
};

struct TxnInner {
    state: TransactionState,
    queue: VecDeque<Arc<MemoryRequest>>,
    undo: Vec<Undo>,
    error: Option<HostError>,
    /// Requests issued so far, cursor steps included. Lets the driver tell
    /// whether anything was issued while it was yielding.
    issued: u64,
}

pub(crate) struct MemoryTransaction {
    id: u64,
    mode: TransactionMode,
    scope: Vec<String>,
    pub(crate) engine: Arc<Engine>,
    this: Weak<MemoryTransaction>,
    inner: Mutex<TxnInner>,
    events: EventListeners,
}

enum Step {
    Execute(Arc<MemoryRequest>),
    Idle(u64),
    Stop,
}

/// Runs a transaction's requests one per scheduler turn until it reaches a
/// terminal state.
pub(crate) async fn drive(txn: Arc<MemoryTransaction>) {
    loop {
        tokio::task::yield_now().await;
        match txn.next_step() {
            Step::Execute(request) => txn.execute(request),
            Step::Idle(mark) => {
                tokio::task::yield_now().await;
                if txn.finish_if_idle(mark) {
                    break;
                }
            }
            Step::Stop => break,
        }
    }
    tracing::debug!(state = %txn.state_now(), "transaction driver stopped");
}

impl MemoryTransaction {
    pub(crate) fn new(
        id: u64,
        mode: TransactionMode,
        scope: Vec<String>,
        engine: Arc<Engine>,
        this: Weak<MemoryTransaction>,
    ) -> Self {
        Self {
            id,
            mode,
            scope,
            engine,
            this,
            inner: Mutex::new(TxnInner {
                state: TransactionState::Active,
                queue: VecDeque::new(),
                undo: Vec::new(),
                error: None,
                issued: 0,
            }),
            events: EventListeners::default(),
        }
    }

    pub(crate) fn state_now(&self) -> TransactionState {
        lock(&self.inner).state
    }

    pub(crate) fn in_scope(&self, store: &str) -> bool {
        self.scope.iter().any(|name| name == store)
    }

    /// Fails with the host's "transaction has finished" error unless active.
    pub(crate) fn ensure_active(&self, operation: &str, interface: &str) -> HostResult<()> {
        if lock(&self.inner).state.is_active() {
            Ok(())
        } else {
            Err(HostError::transaction_inactive(operation, interface))
        }
    }

    /// Queues a new request. `build` receives a weak handle to the request
    /// being created so cursors can find their way back to it.
    pub(crate) fn issue(
        &self,
        operation: &str,
        interface: &str,
        writes: bool,
        build: impl FnOnce(&Weak<MemoryRequest>) -> Operation,
    ) -> HostResult<Arc<MemoryRequest>> {
        let mut inner = lock(&self.inner);
        if !inner.state.is_active() {
            return Err(HostError::transaction_inactive(operation, interface));
        }
        if writes && !self.mode.is_read_write() {
            return Err(HostError::read_only(operation, interface));
        }
        let request = Arc::new_cyclic(|weak| MemoryRequest::new(build(weak)));
        inner.queue.push_back(request.clone());
        inner.issued += 1;
        Ok(request)
    }

    /// Queues the next step of a cursor request.
    pub(crate) fn requeue(&self, request: Arc<MemoryRequest>, operation: &str) -> HostResult<()> {
        let mut inner = lock(&self.inner);
        if !inner.state.is_active() {
            return Err(HostError::transaction_inactive(operation, "IDBCursor"));
        }
        request.reset_pending();
        inner.queue.push_back(request);
        inner.issued += 1;
        Ok(())
    }

    fn next_step(&self) -> Step {
        let finished = {
            let mut inner = lock(&self.inner);
            match inner.state {
                TransactionState::Active | TransactionState::Committing => {}
                _ => return Step::Stop,
            }
            if let Some(request) = inner.queue.pop_front() {
                return Step::Execute(request);
            }
            if inner.state == TransactionState::Active {
                return Step::Idle(inner.issued);
            }
            inner.state = TransactionState::Committed;
            inner.undo.clear();
            true
        };
        if finished {
            tracing::info!("transaction committed");
            self.events.dispatch(EventKind::Complete);
        }
        Step::Stop
    }

    fn execute(&self, request: Arc<MemoryRequest>) {
        let outcome = {
            let mut inner = lock(&self.inner);
            let mut state = lock(&self.engine.state);
            request.execute(&mut state, &mut inner.undo)
        };
        let failure = outcome.as_ref().err().cloned();
        request.complete(outcome);
        // An unhandled request error aborts the whole transaction.
        if let Some(err) = failure {
            self.abort_with(Some(err));
        }
    }

    /// Moves to `Aborted`, reverting writes and failing queued requests.
    /// Returns false when the transaction had already finished.
    fn abort_with(&self, error: Option<HostError>) -> bool {
        let drained: Vec<Arc<MemoryRequest>> = {
            let mut inner = lock(&self.inner);
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = TransactionState::Aborted;
            inner.error = error;
            let undo = std::mem::take(&mut inner.undo);
            let mut state = lock(&self.engine.state);
            for entry in undo.into_iter().rev() {
                entry.revert(&mut state);
            }
            inner.queue.drain(..).collect()
        };
        tracing::info!(id = self.id, pending = drained.len(), "transaction aborted");
        for request in drained {
            request.complete(Err(HostError::aborted()));
        }
        self.events.dispatch(EventKind::Abort);
        true
    }

    /// Completes the transaction when nothing was issued since `mark`.
    fn finish_if_idle(&self, mark: u64) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.state.is_terminal() {
                return true;
            }
            if inner.state != TransactionState::Active
                || !inner.queue.is_empty()
                || inner.issued != mark
            {
                return false;
            }
            inner.state = TransactionState::Finished;
            inner.undo.clear();
        }
        tracing::info!("transaction finished after going idle");
        self.events.dispatch(EventKind::Complete);
        true
    }

    /// Finishes the transaction now if it has nothing queued.
    pub(crate) fn expire(&self) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.state != TransactionState::Active || !inner.queue.is_empty() {
                return false;
            }
            inner.state = TransactionState::Finished;
            inner.undo.clear();
        }
        tracing::info!(id = self.id, "transaction expired");
        self.events.dispatch(EventKind::Complete);
        true
    }
}

impl EventTarget for MemoryTransaction {
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

impl HostTransaction for MemoryTransaction {
    fn id(&self) -> u64 {
        self.id
    }

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn object_store_names(&self) -> Vec<String> {
        self.scope.clone()
    }

    fn state(&self) -> TransactionState {
        self.state_now()
    }

    fn error(&self) -> Option<HostError> {
        lock(&self.inner).error.clone()
    }

    fn object_store(&self, name: &str) -> HostResult<Arc<dyn HostObjectStore>> {
        if !self.state_now().is_active() {
            return Err(HostError::transaction_finished("objectStore"));
        }
        if !self.in_scope(name) {
            return Err(HostError::not_found(format!(
                "Failed to execute 'objectStore' on 'IDBTransaction': The specified object store '{}' was not found.",
                name
            )));
        }
        let txn = self
            .this
            .upgrade()
            .ok_or_else(|| HostError::transaction_finished("objectStore"))?;
        Ok(Arc::new(MemoryObjectStore::new(txn, name.to_string())))
    }

    fn commit(&self) -> HostResult<()> {
        let mut inner = lock(&self.inner);
        if !inner.state.is_active() {
            return Err(HostError::transaction_finished("commit"));
        }
        inner.state = TransactionState::Committing;
        Ok(())
    }

    fn abort(&self) -> HostResult<()> {
        if !self.state_now().is_active() || !self.abort_with(None) {
            return Err(HostError::transaction_finished("abort"));
        }
        Ok(())
    }
}
