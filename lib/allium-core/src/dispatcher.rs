//! Middleware dispatch engine.
//!
//! A [`Dispatcher`] owns two ordered lists: regular middleware and error
//! handlers. [`Dispatcher::execute`] composes the middleware plus a
//! caller-supplied terminal step into one onion-model pass over a
//! [`SharedContext`]:
//!
//! - pre-`next` sections run first-registered first, then the terminal step,
//!   then post-`next` sections unwind in reverse;
//! - a middleware that never calls [`Next::run`] short-circuits everything
//!   below it;
//! - any failure, wherever it is raised, is offered to every registered
//!   error handler before it is allowed to escape `execute`.
//!
//! Middleware are plain async closures:
//!
//! ```
//! use allium_core::{Dispatcher, Method, Next, Request, SharedContext};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> allium_core::Result<()> {
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.with(|ctx: SharedContext, next: Next| async move {
//!     ctx.lock().request.headers.insert("X-Trace".into(), "1".into());
//!     next.run().await
//! });
//!
//! let url = "https://api.example.com/users".parse().expect("url");
//! let ctx = SharedContext::new(Request::new(Method::Get, url));
//! dispatcher.execute(ctx, |_ctx, _next| async { Ok(()) }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{Error, Result, SharedContext};

/// Boxed future used by the boxed middleware entries.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type MiddlewareFn = Arc<dyn Fn(SharedContext, Next) -> BoxFuture<Result<()>> + Send + Sync>;
type HandlerFn = Arc<dyn Fn(Error, SharedContext) -> BoxFuture<Result<()>> + Send + Sync>;

/// Ordered middleware pipeline with centralized error recovery.
///
/// Both lists are append-only and belong to the owning client instance; they
/// persist across many per-request contexts. `execute` snapshots them, so
/// registering more middleware while a run is in flight does not affect it.
#[derive(Clone, Default)]
pub struct Dispatcher {
    middleware: Vec<MiddlewareFn>,
    handlers: Vec<HandlerFn>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("middleware", &self.middleware.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the pipeline. Chainable.
    ///
    /// The middleware receives the shared context and a [`Next`] handle;
    /// `next.run()` resolves only once everything downstream (including the
    /// terminal step) has completed or failed.
    pub fn with<F, Fut>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(SharedContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.middleware
            .push(Arc::new(move |ctx, next| Box::pin(middleware(ctx, next))));
        self
    }

    /// Appends an error handler, invoked in registration order when any part
    /// of the pipeline fails. Chainable.
    ///
    /// A handler receives the captured error and the context. It may set
    /// `error_handled` to claim the failure (stopping later handlers) and may
    /// store a recovery `response`. A handler that itself returns `Err`
    /// replaces the tracked error for the handlers after it.
    pub fn catch<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Error, SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .push(Arc::new(move |error, ctx| Box::pin(handler(error, ctx))));
        self
    }

    /// Number of registered middleware.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// Number of registered error handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Structurally merges several dispatchers into a new, independent one.
    ///
    /// Middleware lists are concatenated in argument order, as are the error
    /// handler lists. The merge copies the entries at call time: mutating an
    /// input afterwards does not affect the composed instance.
    #[must_use]
    pub fn compose<'a>(parts: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut composed = Self::new();
        for part in parts {
            composed.middleware.extend(part.middleware.iter().cloned());
            composed.handlers.extend(part.handlers.iter().cloned());
        }
        composed
    }

    /// Runs the full pipeline against `ctx`, with `terminal` logically
    /// appended as the last link in the chain (its `next` is a no-op).
    ///
    /// Returns the same context handle once the chain either completed
    /// normally or had its failure claimed by an error handler.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered error if no handler claimed it (or if
    /// none are registered). Every failure is offered to the handler list
    /// before it escapes here.
    pub async fn execute<F, Fut>(&self, ctx: SharedContext, terminal: F) -> Result<SharedContext>
    where
        F: Fn(SharedContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let chain = Arc::new(Chain {
            middleware: self.middleware.clone(),
            terminal: Arc::new(move |ctx, next| Box::pin(terminal(ctx, next))),
            handlers: self.handlers.clone(),
            ctx: ctx.clone(),
            cursor: AtomicI64::new(-1),
            declined: Mutex::new(None),
        });

        match Chain::dispatch(Arc::clone(&chain), 0).await {
            Ok(()) => Ok(ctx),
            // Guards failures raised outside the per-frame routing (and lets
            // already-declined errors pass through untouched).
            Err(err) => chain.recover(err).await.map(|()| ctx),
        }
    }
}

/// Continuation handle given to each middleware and to the terminal step.
///
/// `run` hands control to the remainder of the chain and resolves once that
/// remainder has fully completed. The handle is `Clone` so a buggy middleware
/// *can* invoke it twice; the second invocation fails with
/// [`Error::ReentrantNext`].
#[derive(Clone)]
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}

impl Next {
    /// Invokes the rest of the chain.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ReentrantNext`] when this position was already
    /// dispatched; otherwise surfaces whatever the downstream chain left
    /// unrecovered.
    pub async fn run(self) -> Result<()> {
        Chain::dispatch(self.chain, self.index).await
    }
}

/// One execution's snapshot of the pipeline: list copies, the terminal step,
/// the shared context, and the dispatch cursor.
struct Chain {
    middleware: Vec<MiddlewareFn>,
    terminal: MiddlewareFn,
    handlers: Vec<HandlerFn>,
    ctx: SharedContext,
    /// Highest position dispatched so far; -1 before the first frame.
    cursor: AtomicI64,
    /// The failure every handler declined, if any. The same error seen again
    /// at an outer frame passes through; a distinct one (e.g. from an
    /// error-mapping middleware on the unwind path) starts a fresh recovery
    /// round.
    declined: Mutex<Option<Error>>,
}

/// Two errors count as the same failure when variant and rendered message
/// both match.
fn same_failure(a: &Error, b: &Error) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && a.to_string() == b.to_string()
}

impl Chain {
    /// Recursive dispatch step. Boxed because the recursion depth follows the
    /// middleware list.
    fn dispatch(chain: Arc<Self>, index: usize) -> BoxFuture<Result<()>> {
        Box::pin(async move {
            let position = i64::try_from(index).unwrap_or(i64::MAX);
            if position <= chain.cursor.load(Ordering::Acquire) {
                return Err(Error::ReentrantNext { index });
            }
            chain.cursor.store(position, Ordering::Release);

            let next = Next {
                chain: Arc::clone(&chain),
                index: index + 1,
            };
            let outcome = match chain.middleware.get(index) {
                Some(entry) => entry(chain.ctx.clone(), next).await,
                // The terminal step is the last link; its continuation is the
                // `None` arm below, which has nothing left to run.
                None if index == chain.middleware.len() => {
                    (chain.terminal)(chain.ctx.clone(), next).await
                }
                None => Ok(()),
            };

            match outcome {
                Ok(()) => Ok(()),
                Err(err) => chain.recover(err).await,
            }
        })
    }

    /// Offers a failure to the error-handler list, in registration order.
    ///
    /// Returns `Ok` when a handler claimed the failure via `error_handled`
    /// (outer frames then unwind normally), `Err` with the final error
    /// otherwise.
    async fn recover(&self, err: Error) -> Result<()> {
        let fresh_round = {
            let mut slot = self.declined.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.take() {
                // Already offered to every handler at an inner frame.
                Some(prior) if same_failure(&prior, &err) => {
                    *slot = Some(prior);
                    return Err(err);
                }
                Some(_) => true,
                None => false,
            }
        };

        if fresh_round {
            // A new failure raised while a declined one unwound; the handlers
            // get a full round against it.
            self.ctx.with(|c| c.error = Some(err.clone()));
        } else {
            self.ctx.with(|c| c.record_error(&err));
        }

        for handler in &self.handlers {
            if self.ctx.with(|c| c.error_handled) {
                break;
            }
            let current = self
                .ctx
                .with(|c| c.error.clone())
                .unwrap_or_else(|| err.clone());
            if let Err(failure) = handler(current, self.ctx.clone()).await {
                // The handler's own failure replaces the tracked error; the
                // remaining handlers still get a chance at recovery.
                self.ctx.with(|c| c.error = Some(failure));
            }
        }

        if self.ctx.with(|c| c.error_handled) {
            Ok(())
        } else {
            let declined = self.ctx.with(|c| c.error.clone()).unwrap_or(err);
            *self.declined.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(declined.clone());
            Err(declined)
        }
    }
}
