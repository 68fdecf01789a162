use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};

use crate::config::BridgeConfig;
use crate::context::Context;
use crate::core::{IdbError, ReadyState, Result};
use crate::host::{EventKind, EventTarget, HostRequest, HostTransaction, HostValue, ListenerId};

/// Listeners registered on an event target, removed when dropped.
pub(crate) struct Subscription<T: EventTarget + ?Sized> {
    target: Arc<T>,
    ids: Vec<(EventKind, ListenerId)>,
}

impl<T: EventTarget + ?Sized> Subscription<T> {
    pub(crate) fn new(target: Arc<T>) -> Self {
        Self {
            target,
            ids: Vec::new(),
        }
    }

    pub(crate) fn add(
        &mut self,
        kind: EventKind,
        listener: impl Fn() + Send + Sync + 'static,
        config: &BridgeConfig,
    ) -> Result<()> {
        let id = self
            .target
            .add_listener(kind, Arc::new(listener))
            .map_err(|err| config.classify(err))?;
        self.ids.push((kind, id));
        Ok(())
    }
}

impl<T: EventTarget + ?Sized> Drop for Subscription<T> {
    fn drop(&mut self) {
        for (kind, id) in self.ids.drain(..) {
            if let Err(err) = self.target.remove_listener(kind, id) {
                log::debug!("Failed removing {} listener: {}", kind, err);
            }
        }
    }
}

pub(crate) type SuccessFn = Arc<dyn Fn() + Send + Sync>;

/// Receives `None` for a host failure, or the error a panicking callback
/// was converted into.
pub(crate) type FailureFn = Arc<dyn Fn(Option<IdbError>) + Send + Sync>;

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Registers success and failure callbacks on a request. Callback panics are
/// caught: the owning transaction is aborted and the failure callback is
/// told about the panic.
pub(crate) fn register(
    host: &Arc<dyn HostRequest>,
    txn: Option<Weak<dyn HostTransaction>>,
    config: &BridgeConfig,
    on_success: Option<SuccessFn>,
    on_failure: Option<FailureFn>,
) -> Result<Subscription<dyn HostRequest>> {
    let on_panic: Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync> = {
        let on_failure = on_failure.clone();
        Arc::new(move |panic: Box<dyn Any + Send>| {
            let message = panic_message(panic.as_ref());
            log::error!("Failed resolving request results: {}", message);
            if let Some(txn) = txn.as_ref().and_then(Weak::upgrade) {
                if let Err(err) = txn.abort() {
                    log::debug!("Abort after listener panic failed: {}", err);
                }
            }
            if let Some(on_failure) = &on_failure {
                let _ = catch_unwind(AssertUnwindSafe(|| {
                    on_failure(Some(IdbError::ListenerPanic(message.clone())))
                }));
            }
        })
    };

    let mut subscription = Subscription::new(host.clone());
    if let Some(on_failure) = on_failure {
        let on_panic = on_panic.clone();
        subscription.add(
            EventKind::Error,
            move || {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| on_failure(None))) {
                    on_panic(panic);
                }
            },
            config,
        )?;
    }
    if let Some(on_success) = on_success {
        subscription.add(
            EventKind::Success,
            move || {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| on_success())) {
                    on_panic(panic);
                }
            },
            config,
        )?;
    }
    Ok(subscription)
}

/// Outcome of the request's latest completion, read from the host.
pub(crate) fn settled_outcome(
    host: &dyn HostRequest,
    config: &BridgeConfig,
) -> Result<HostValue> {
    match host.error() {
        Ok(Some(err)) => Err(config.classify(err)),
        Ok(None) => host.result().map_err(|err| config.classify(err)),
        Err(err) => Err(config.classify(err)),
    }
}

/// Narrows a context by the configured wait timeout.
pub(crate) fn wait_context(ctx: &Context, config: &BridgeConfig) -> Context {
    match config.wait_timeout {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx.clone(),
    }
}

type Slot = Arc<Mutex<Option<oneshot::Sender<Result<HostValue>>>>>;

fn fill(slot: &Slot, outcome: Result<HostValue>) {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(sender) = sender {
        let _ = sender.send(outcome);
    }
}

/// Waits for a single completion of `host`.
pub(crate) async fn await_once(
    host: &Arc<dyn HostRequest>,
    txn: Option<Weak<dyn HostTransaction>>,
    config: &Arc<BridgeConfig>,
    ctx: &Context,
) -> Result<HostValue> {
    if host.ready_state() == ReadyState::Done {
        return settled_outcome(host.as_ref(), config);
    }

    let (tx, rx) = oneshot::channel();
    let slot: Slot = Arc::new(Mutex::new(Some(tx)));
    let weak = Arc::downgrade(host);

    let on_success: SuccessFn = {
        let slot = slot.clone();
        let weak = weak.clone();
        let config = config.clone();
        Arc::new(move || {
            let outcome = match weak.upgrade() {
                Some(host) => host.result().map_err(|err| config.classify(err)),
                None => Err(IdbError::ExecutionError("request dropped".into())),
            };
            fill(&slot, outcome);
        })
    };
    let on_failure: FailureFn = {
        let slot = slot.clone();
        let config = config.clone();
        Arc::new(move |panic: Option<IdbError>| {
            let outcome = match (panic, weak.upgrade()) {
                (Some(err), _) => Err(err),
                (None, Some(host)) => settled_outcome(host.as_ref(), &config),
                (None, None) => Err(IdbError::ExecutionError("request dropped".into())),
            };
            fill(&slot, outcome);
        })
    };

    let _subscription = register(host, txn, config, Some(on_success), Some(on_failure))?;

    // Completed between the first check and registration.
    if host.ready_state() == ReadyState::Done {
        return settled_outcome(host.as_ref(), config);
    }

    let ctx = wait_context(ctx, config);
    tokio::select! {
        outcome = rx => outcome.unwrap_or_else(|_| {
            Err(IdbError::ExecutionError("request listener closed".into()))
        }),
        err = ctx.done() => {
            log::debug!("Request wait ended: {}", err);
            Err(err)
        }
    }
}

/// Keeps listeners registered across the completions of a cursor request,
/// delivering one outcome per step.
pub(crate) struct StepSubscription {
    rx: mpsc::UnboundedReceiver<Result<HostValue>>,
    outstanding: Arc<Mutex<bool>>,
    config: Arc<BridgeConfig>,
    _subscription: Subscription<dyn HostRequest>,
}

/// Sends step outcomes, holding back any that arrive while an earlier one is
/// still unread. The request only completes again once the reader has moved
/// the cursor, so a second outcome in that window repeats the same step.
#[derive(Clone)]
struct StepSender {
    tx: mpsc::UnboundedSender<Result<HostValue>>,
    outstanding: Arc<Mutex<bool>>,
}

impl StepSender {
    fn send(&self, outcome: impl FnOnce() -> Result<HostValue>) {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        if *outstanding {
            return;
        }
        if self.tx.send(outcome()).is_ok() {
            *outstanding = true;
        }
    }
}

impl StepSubscription {
    pub(crate) fn new(
        host: &Arc<dyn HostRequest>,
        txn: Option<Weak<dyn HostTransaction>>,
        config: &Arc<BridgeConfig>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let outstanding = Arc::new(Mutex::new(false));
        let sender = StepSender {
            tx,
            outstanding: outstanding.clone(),
        };
        let weak = Arc::downgrade(host);

        let on_success: SuccessFn = {
            let sender = sender.clone();
            let weak = weak.clone();
            let config = config.clone();
            Arc::new(move || {
                sender.send(|| match weak.upgrade() {
                    Some(host) => host.result().map_err(|err| config.classify(err)),
                    None => Err(IdbError::ExecutionError("request dropped".into())),
                });
            })
        };
        let on_failure: FailureFn = {
            let sender = sender.clone();
            let config = config.clone();
            Arc::new(move |panic: Option<IdbError>| {
                sender.send(|| match (panic, weak.upgrade()) {
                    (Some(err), _) => Err(err),
                    (None, Some(host)) => settled_outcome(host.as_ref(), &config),
                    (None, None) => Err(IdbError::ExecutionError("request dropped".into())),
                });
            })
        };

        let subscription = register(host, txn, config, Some(on_success), Some(on_failure))?;

        // A step that landed before the listeners were in place.
        if host.ready_state() == ReadyState::Done {
            sender.send(|| settled_outcome(host.as_ref(), config));
        }

        Ok(Self {
            rx,
            outstanding,
            config: config.clone(),
            _subscription: subscription,
        })
    }

    pub(crate) async fn next(&mut self, ctx: &Context) -> Result<HostValue> {
        let ctx = wait_context(ctx, &self.config);
        tokio::select! {
            outcome = self.rx.recv() => {
                *self.outstanding.lock().unwrap_or_else(PoisonError::into_inner) = false;
                outcome.unwrap_or_else(|| {
                    Err(IdbError::ExecutionError("cursor listener closed".into()))
                })
            }
            err = ctx.done() => {
                log::debug!("Cursor wait ended: {}", err);
                Err(err)
            }
        }
    }
}
