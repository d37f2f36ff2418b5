//! Per-request pipeline state.
//!
//! One [`Context`] is created per logical request and threaded through a
//! single [`Dispatcher::execute`](crate::Dispatcher::execute) run. Middleware
//! on both sides of `next` and the error handlers all mutate the same record,
//! so it is handed around as a [`SharedContext`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{Error, Request, Response};

/// Mutable state for one pipeline execution.
///
/// After `execute` returns, exactly one of these holds:
/// - `response` is set and no unhandled error occurred (success),
/// - `error` is set and `error_handled` is `true` (recovered failure;
///   `response` optionally carries the recovery value),
/// - `execute` returned the error itself (unrecovered failure).
#[derive(Debug)]
pub struct Context {
    /// The outbound request descriptor. Mutable by any middleware until the
    /// terminal step snapshots it for the transport.
    pub request: Request,
    /// Result payload; absent until set by the terminal step or by a
    /// short-circuiting middleware.
    pub response: Option<Response>,
    /// Captured failure, if any. The first failure of a recovery round wins;
    /// a failing error handler, or a distinct failure raised after every
    /// handler declined, replaces it.
    pub error: Option<Error>,
    /// Set by an error handler to mark the failure as resolved and stop
    /// further handlers from running.
    pub error_handled: bool,
    extensions: HashMap<String, serde_json::Value>,
}

impl Context {
    /// Creates a fresh context for one request.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
            error: None,
            error_handled: false,
            extensions: HashMap::new(),
        }
    }

    /// Read an extension value attached by a middleware.
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    /// Attach an arbitrary keyed value (e.g. timing annotations) for other
    /// middleware or the caller to read.
    pub fn insert_extension(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extensions.insert(key.into(), value);
    }

    /// Record a failure, keeping an already-captured one (first failure wins).
    pub(crate) fn record_error(&mut self, error: &Error) {
        if self.error.is_none() {
            self.error = Some(error.clone());
        }
    }
}

/// Cheaply clonable handle to a [`Context`].
///
/// The pipeline is strictly sequential, so the inner mutex is never
/// contended; it only lets a middleware frame and its continuation share
/// mutable access. The lock must not be held across an await.
#[derive(Debug, Clone)]
pub struct SharedContext {
    inner: Arc<Mutex<Context>>,
}

impl SharedContext {
    /// Wrap a fresh context for one pipeline run.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Context::new(request))),
        }
    }

    /// Lock the context for inspection or mutation.
    ///
    /// Recovers from poisoning: a panicking middleware must not take the
    /// whole pipeline state down with it.
    #[must_use]
    pub fn lock(&self) -> MutexGuard<'_, Context> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a closure against the locked context, releasing the lock before
    /// returning. Convenient at await boundaries.
    pub fn with<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        f(&mut self.lock())
    }
}

impl From<Request> for SharedContext {
    fn from(request: Request) -> Self {
        Self::new(request)
    }
}
