use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use super::listener::StepSubscription;
use super::{AckRequest, Request};
use crate::context::Context;
use crate::core::{CursorDirection, IdbError, Key, Result};
use crate::host::{CursorSource, HostCursor, HostValue};

/// A position in a traversal of an object store or index.
#[derive(Clone)]
pub struct Cursor {
    host: Arc<dyn HostCursor>,
    request: Request,
    /// Set once a movement was requested for the current step.
    iterated: Arc<AtomicBool>,
}

impl Cursor {
    fn new(host: Arc<dyn HostCursor>, request: Request) -> Self {
        Self {
            host,
            request,
            iterated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Interprets a cursor request's step result.
    pub(crate) fn from_step(value: HostValue, request: &Request) -> Result<Option<Cursor>> {
        match value {
            HostValue::Cursor(host) => Ok(Some(Cursor::new(host, request.clone()))),
            HostValue::Null | HostValue::Undefined => Ok(None),
            other => Err(IdbError::TypeMismatch(format!(
                "expected a cursor, got {}",
                other.kind()
            ))),
        }
    }

    pub fn source(&self) -> CursorSource {
        self.host.source()
    }

    pub fn direction(&self) -> CursorDirection {
        self.host.direction()
    }

    /// Key at the cursor's position; `None` outside its range.
    pub fn key(&self) -> Option<Key> {
        self.host.key()
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.host.primary_key()
    }

    /// The request the cursor was opened by.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Whether a movement was requested since the cursor landed here.
    pub fn iterated(&self) -> bool {
        self.iterated.load(Ordering::SeqCst)
    }

    fn moved(&self, outcome: crate::host::HostResult<()>) -> Result<()> {
        self.iterated.store(true, Ordering::SeqCst);
        outcome.map_err(|err| self.request.config().classify(err))
    }

    /// Moves the cursor `count` positions along its direction.
    pub fn advance(&self, count: u32) -> Result<()> {
        self.moved(self.host.advance(count))
    }

    /// Moves the cursor to the next position along its direction.
    pub fn continue_(&self) -> Result<()> {
        self.moved(self.host.continue_(None))
    }

    /// Moves the cursor to the first position at or past `key`.
    pub fn continue_key(&self, key: impl Into<Key>) -> Result<()> {
        self.moved(self.host.continue_(Some(key.into())))
    }

    /// Moves an index cursor to the given index key and primary key.
    pub fn continue_primary_key(&self, key: impl Into<Key>, primary_key: impl Into<Key>) -> Result<()> {
        self.moved(
            self.host
                .continue_primary_key(key.into(), primary_key.into()),
        )
    }

    /// Deletes the record at the cursor's position without moving it.
    pub fn delete(&self) -> Result<AckRequest> {
        let host = self
            .host
            .delete()
            .map_err(|err| self.request.config().classify(err))?;
        Ok(AckRequest::new(self.sibling(host)))
    }

    /// Replaces the record at the cursor's position.
    pub fn update(&self, value: Value) -> Result<Request> {
        let host = self
            .host
            .update(value)
            .map_err(|err| self.request.config().classify(err))?;
        Ok(self.sibling(host))
    }

    fn sibling(&self, host: Arc<dyn crate::host::HostRequest>) -> Request {
        Request::new(
            host,
            self.request.txn_ref(),
            self.request.config().clone(),
        )
    }
}

/// A cursor that also exposes the record at its position.
#[derive(Clone)]
pub struct CursorWithValue {
    cursor: Cursor,
}

impl CursorWithValue {
    pub(crate) fn new(cursor: Cursor) -> Self {
        Self { cursor }
    }

    pub fn value(&self) -> Option<Value> {
        self.cursor.host.value()
    }

    pub fn into_cursor(self) -> Cursor {
        self.cursor
    }
}

impl Deref for CursorWithValue {
    type Target = Cursor;

    fn deref(&self) -> &Cursor {
        &self.cursor
    }
}

/// Drives a cursor request to its end, invoking `step` at every position.
///
/// `step` may move the cursor itself; when it does not, the cursor is
/// continued once it returns. Returning [`IdbError::StopIteration`] ends the
/// traversal successfully; any other error ends it and is returned. A step
/// that moved the cursor and then failed is not advanced again.
pub(crate) async fn iterate<F, Fut>(request: &Request, ctx: &Context, mut step: F) -> Result<()>
where
    F: FnMut(Cursor) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut steps = StepSubscription::new(request.host(), request.txn_ref(), request.config())?;
    loop {
        let Some(cursor) = Cursor::from_step(steps.next(ctx).await?, request)? else {
            return Ok(());
        };
        match step(cursor.clone()).await {
            Ok(()) => {}
            Err(IdbError::StopIteration) => return Ok(()),
            Err(err) => return Err(err),
        }
        if !cursor.iterated() {
            cursor.continue_()?;
        }
    }
}

macro_rules! cursor_request {
    ($(#[$doc:meta])* $name:ident, $cursor:ty, $wrap:expr) => {
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

            /// Waits for the cursor's current step. `None` once exhausted.
            pub async fn await_cursor(&self, ctx: &Context) -> Result<Option<$cursor>> {
                let value = self.0.await_result(ctx).await?;
                Ok(Cursor::from_step(value, &self.0)?.map($wrap))
            }

            /// Invokes `step` for each position the cursor visits.
            pub async fn iter<F, Fut>(&self, ctx: &Context, mut step: F) -> Result<()>
            where
                F: FnMut($cursor) -> Fut,
                Fut: Future<Output = Result<()>>,
            {
                iterate(&self.0, ctx, |cursor| step($wrap(cursor))).await
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

cursor_request!(
    /// A request resolving to a key-only cursor.
    CursorRequest,
    Cursor,
    std::convert::identity
);
cursor_request!(
    /// A request resolving to a cursor over records.
    CursorWithValueRequest,
    CursorWithValue,
    CursorWithValue::new
);
