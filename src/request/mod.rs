// ============================================================================
// Outcome Bridge
// ============================================================================
//
// Every host operation hands back a request that completes later by firing
// `success` or `error`. The types here turn that into an awaitable outcome:
//
// - one success and one error listener per wait, removed on every exit path
//   (completion, failure, cancellation, or the future being dropped)
// - a request already settled when awaited resolves immediately
// - a panic inside a listener is caught, aborts the owning transaction and
//   surfaces as `IdbError::ListenerPanic`
// - cursor requests keep their listeners across steps (see `cursor`)
//
// ============================================================================

pub mod cursor;
pub(crate) mod listener;

use std::ops::Deref;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::config::BridgeConfig;
use crate::context::Context;
use crate::core::{IdbError, Key, ReadyState, Result};
use crate::host::{EventKind, HostRequest, HostTransaction, HostValue};
use crate::transaction::Transaction;

pub use cursor::{Cursor, CursorWithValue};

use listener::{FailureFn, SuccessFn, Subscription};

/// One outstanding host operation.
#[derive(Clone)]
pub struct Request {
    host: Arc<dyn HostRequest>,
    txn: Option<Weak<dyn HostTransaction>>,
    config: Arc<BridgeConfig>,
}

/// Callbacks registered through [`Request::listen`]. Dropping it removes them.
#[must_use = "listeners are removed when this guard is dropped"]
pub struct Listening {
    _subscription: Subscription<dyn HostRequest>,
}

impl Request {
    pub(crate) fn new(
        host: Arc<dyn HostRequest>,
        txn: Option<Weak<dyn HostTransaction>>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self { host, txn, config }
    }

    pub(crate) fn config(&self) -> &Arc<BridgeConfig> {
        &self.config
    }

    pub(crate) fn txn_ref(&self) -> Option<Weak<dyn HostTransaction>> {
        self.txn.clone()
    }

    pub(crate) fn host(&self) -> &Arc<dyn HostRequest> {
        &self.host
    }

    pub fn ready_state(&self) -> ReadyState {
        self.host.ready_state()
    }

    /// Result of the request. Fails while it is pending or after it failed.
    pub fn result(&self) -> Result<HostValue> {
        listener::settled_outcome(self.host.as_ref(), &self.config)
    }

    /// Error the request failed with, if any.
    pub fn error(&self) -> Result<Option<IdbError>> {
        self.host
            .error()
            .map(|err| err.map(|err| self.config.classify(err)))
            .map_err(|err| self.config.classify(err))
    }

    /// The transaction this request was issued against.
    pub fn transaction(&self) -> Result<Transaction> {
        let host = self
            .txn
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(IdbError::NotInTransaction)?;
        Ok(Transaction::from_host(host, self.config.clone()))
    }

    /// Number of listeners currently registered on the request for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.host.listener_count(kind)
    }

    /// Waits for success or failure, then returns the result.
    pub async fn await_result(&self, ctx: &Context) -> Result<HostValue> {
        listener::await_once(&self.host, self.txn.clone(), &self.config, ctx).await
    }

    /// Waits for a record value. Missing records resolve to `None`.
    pub async fn await_value(&self, ctx: &Context) -> Result<Option<Value>> {
        match self.await_result(ctx).await? {
            HostValue::Value(value) => Ok(Some(value)),
            HostValue::Undefined | HostValue::Null => Ok(None),
            other => Err(IdbError::TypeMismatch(format!(
                "expected a value, got {}",
                other.kind()
            ))),
        }
    }

    /// Waits for a key. Missing records resolve to `None`.
    pub async fn await_key(&self, ctx: &Context) -> Result<Option<Key>> {
        match self.await_result(ctx).await? {
            HostValue::Key(key) => Ok(Some(key)),
            HostValue::Undefined | HostValue::Null => Ok(None),
            other => Err(IdbError::TypeMismatch(format!(
                "expected a key, got {}",
                other.kind()
            ))),
        }
    }

    /// Invokes `on_success` when the request succeeds and `on_failure` when it
    /// fails. The success callback runs once; nothing runs after `ctx` ends.
    pub fn listen(
        &self,
        ctx: &Context,
        on_success: impl Fn() + Send + Sync + 'static,
        on_failure: impl Fn() + Send + Sync + 'static,
    ) -> Result<Listening> {
        self.listen_with(ctx, Some(Arc::new(on_success)), Some(Arc::new(on_failure)))
    }

    /// Invokes the callback when the request succeeds.
    pub fn listen_success(
        &self,
        ctx: &Context,
        on_success: impl Fn() + Send + Sync + 'static,
    ) -> Result<Listening> {
        self.listen_with(ctx, Some(Arc::new(on_success)), None)
    }

    /// Invokes the callback when the request fails.
    pub fn listen_error(
        &self,
        ctx: &Context,
        on_failure: impl Fn() + Send + Sync + 'static,
    ) -> Result<Listening> {
        self.listen_with(ctx, None, Some(Arc::new(on_failure)))
    }

    fn listen_with(
        &self,
        ctx: &Context,
        on_success: Option<Arc<dyn Fn() + Send + Sync>>,
        on_failure: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Result<Listening> {
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let success: Option<SuccessFn> = on_success.map(|callback| {
            let ctx = ctx.clone();
            let fired = fired.clone();
            let wrapped: SuccessFn = Arc::new(move || {
                if ctx.err().is_none() && !fired.swap(true, std::sync::atomic::Ordering::SeqCst)
                {
                    callback();
                }
            });
            wrapped
        });
        let failure: Option<FailureFn> = on_failure.map(|callback| {
            let ctx = ctx.clone();
            let wrapped: FailureFn = Arc::new(move |_panic: Option<IdbError>| {
                if ctx.err().is_none() {
                    callback();
                }
            });
            wrapped
        });

        let subscription =
            listener::register(&self.host, self.txn.clone(), &self.config, success, failure)?;
        Ok(Listening {
            _subscription: subscription,
        })
    }
}

fn unexpected(expected: &str, got: &HostValue) -> IdbError {
    IdbError::TypeMismatch(format!("expected {}, got {}", expected, got.kind()))
}

macro_rules! typed_request {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name(Request);

        impl $name {
            pub(crate) fn new(request: Request) -> Self {
                Self(request)
            }

            pub fn request(&self) -> &Request {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = Request;

            fn deref(&self) -> &Request {
                &self.0
            }
        }
    };
}

typed_request!(
    /// A request that yields no data; only its failure matters.
    AckRequest
);
typed_request!(
    /// A request resolving to a count.
    CountRequest
);
typed_request!(
    /// A request resolving to a list of primary keys.
    ArrayRequest
);

impl AckRequest {
    pub async fn await_ack(&self, ctx: &Context) -> Result<()> {
        self.0.await_result(ctx).await.map(|_| ())
    }
}

impl CountRequest {
    pub async fn await_count(&self, ctx: &Context) -> Result<u64> {
        match self.0.await_result(ctx).await? {
            HostValue::Count(n) => Ok(n),
            other => Err(unexpected("a count", &other)),
        }
    }
}

impl ArrayRequest {
    pub async fn await_keys(&self, ctx: &Context) -> Result<Vec<Key>> {
        match self.0.await_result(ctx).await? {
            HostValue::Keys(keys) => Ok(keys),
            other => Err(unexpected("a key list", &other)),
        }
    }
}
