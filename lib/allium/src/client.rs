//! HTTP client: one logical call in, one pipeline execution out.
//!
//! [`Client`] owns a [`Dispatcher`] and a [`Transport`]. Each call builds a
//! fresh [`SharedContext`] from merged defaults + call-site options, runs the
//! pipeline with a terminal step that invokes the transport, and exposes the
//! outcome as a [`Dispatched`] pair: the response future plus an independent
//! [`TaskFuture`] for the transport's cancel handle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::transport::{HyperTransport, TaskFuture, TaskSlot, Transport};
use crate::{BoxFuture, Dispatcher, Error, Method, Next, Request, Response, Result, SharedContext};

/// Per-call options, merged over the client defaults (call-site wins).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl CallOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header for this call, overriding any default with the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Override the client timeout for this call.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client with an onion-model middleware pipeline.
///
/// # Example
///
/// ```ignore
/// use allium::Client;
///
/// let mut client = Client::builder()
///     .base_url("https://api.example.com".parse()?)
///     .build();
/// client.with(allium::middleware::logging());
///
/// let user = client.get("/users/1").await?;
/// ```
#[derive(Debug)]
pub struct Client<T: Transport = HyperTransport> {
    transport: Arc<T>,
    dispatcher: Dispatcher,
    config: ClientConfig,
}

// Manual impl: clones share the transport, so `T: Clone` is not required.
impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
        }
    }
}

impl Client<HyperTransport> {
    /// Create a client with default configuration and no middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }
}

impl Default for Client<HyperTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Client<T> {
    /// Create a client over a custom transport.
    #[must_use]
    pub fn with_transport(transport: T, config: ClientConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            dispatcher: Dispatcher::new(),
            config,
        }
    }

    /// Appends a middleware to the pipeline. Chainable.
    ///
    /// Executions already in flight are unaffected.
    pub fn with<F, Fut>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(SharedContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.with(middleware);
        self
    }

    /// Appends an error handler. Chainable.
    pub fn catch<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Error, SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.catch(handler);
        self
    }

    /// The client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The middleware pipeline, e.g. for [`Dispatcher::compose`].
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Start a request through the full pipeline.
    ///
    /// Nothing runs until the returned [`Dispatched`] (or its response half)
    /// is polled. URL resolution or header-merge failures surface through the
    /// response future, like any other rejection.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        options: CallOptions,
    ) -> Dispatched {
        let built = self.build_request(method, path, body, options);
        let dispatcher = self.dispatcher.clone();
        let transport = Arc::clone(&self.transport);
        let (slot, task) = TaskSlot::channel();

        let response: BoxFuture<Result<Option<Response>>> = Box::pin(async move {
            let request = built?;
            let ctx = SharedContext::new(request);

            let terminal = move |ctx: SharedContext, _next: Next| {
                let transport = Arc::clone(&transport);
                let slot = slot.clone();
                async move {
                    let request = ctx.with(|c| c.request.clone());
                    let response = transport.send(request, slot).await?;
                    ctx.with(|c| c.response = Some(response));
                    Ok(())
                }
            };

            let ctx = dispatcher.execute(ctx, terminal).await?;
            ctx.with(|c| {
                if c.error_handled {
                    // Handled failure: resolve with whatever the handlers
                    // left behind, possibly nothing.
                    Ok(c.response.clone())
                } else if let Some(error) = c.error.clone() {
                    Err(error)
                } else {
                    Ok(c.response.clone())
                }
            })
        });

        Dispatched { response, task }
    }

    /// Execute a GET request.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn get(&self, path: &str) -> Result<Option<Response>> {
        self.request(Method::Get, path, None, CallOptions::new())
            .await
    }

    /// Execute a POST request.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn post(&self, path: &str, body: impl Into<Bytes>) -> Result<Option<Response>> {
        self.request(Method::Post, path, Some(body.into()), CallOptions::new())
            .await
    }

    /// Execute a PUT request.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn put(&self, path: &str, body: impl Into<Bytes>) -> Result<Option<Response>> {
        self.request(Method::Put, path, Some(body.into()), CallOptions::new())
            .await
    }

    /// Execute a PATCH request.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn patch(&self, path: &str, body: impl Into<Bytes>) -> Result<Option<Response>> {
        self.request(Method::Patch, path, Some(body.into()), CallOptions::new())
            .await
    }

    /// Execute a DELETE request.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn delete(&self, path: &str) -> Result<Option<Response>> {
        self.request(Method::Delete, path, None, CallOptions::new())
            .await
    }

    /// Execute a HEAD request.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn head(&self, path: &str) -> Result<Option<Response>> {
        self.request(Method::Head, path, None, CallOptions::new())
            .await
    }

    /// Execute an OPTIONS request.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn options(&self, path: &str) -> Result<Option<Response>> {
        self.request(Method::Options, path, None, CallOptions::new())
            .await
    }

    /// Execute a GET request with per-call options.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn get_with(&self, path: &str, options: CallOptions) -> Result<Option<Response>> {
        self.request(Method::Get, path, None, options).await
    }

    /// Execute a POST request with per-call options.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn post_with(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        options: CallOptions,
    ) -> Result<Option<Response>> {
        self.request(Method::Post, path, Some(body.into()), options)
            .await
    }

    /// Execute a PUT request with per-call options.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn put_with(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        options: CallOptions,
    ) -> Result<Option<Response>> {
        self.request(Method::Put, path, Some(body.into()), options)
            .await
    }

    /// Execute a DELETE request with per-call options.
    ///
    /// # Errors
    ///
    /// Returns the final unrecovered pipeline error, if any.
    pub async fn delete_with(&self, path: &str, options: CallOptions) -> Result<Option<Response>> {
        self.request(Method::Delete, path, None, options).await
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        options: CallOptions,
    ) -> Result<Request> {
        let url = self.resolve_url(path)?;

        let mut headers = self.config.default_headers.clone();
        headers.extend(options.headers);

        Ok(Request {
            method,
            url,
            headers,
            body,
            timeout: options.timeout,
        })
    }

    fn resolve_url(&self, path: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(path) {
            return Ok(url);
        }
        match &self.config.base_url {
            Some(base) => base.join(path).map_err(Into::into),
            None => Err(Error::invalid_request(format!(
                "relative path '{path}' requires a base URL"
            ))),
        }
    }
}

/// Builder for [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfigBuilder,
    dispatcher: Dispatcher,
}

impl ClientBuilder {
    /// Set the base URL relative request paths are joined onto.
    #[must_use]
    pub fn base_url(mut self, url: Url) -> Self {
        self.config = self.config.base_url(url);
        self
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config = self.config.default_header(name, value);
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.config = self.config.pool_idle_per_host(count);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.pool_idle_timeout(timeout);
        self
    }

    /// Append a middleware to the pipeline.
    #[must_use]
    pub fn with<F, Fut>(mut self, middleware: F) -> Self
    where
        F: Fn(SharedContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.with(middleware);
        self
    }

    /// Append an error handler.
    #[must_use]
    pub fn catch<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Error, SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.catch(handler);
        self
    }

    /// Build the client over the hyper transport.
    #[must_use]
    pub fn build(self) -> Client<HyperTransport> {
        let config = self.config.build();
        Client {
            transport: Arc::new(HyperTransport::new(&config)),
            dispatcher: self.dispatcher,
            config,
        }
    }

    /// Build the client over a custom transport.
    #[must_use]
    pub fn build_with_transport<T: Transport>(self, transport: T) -> Client<T> {
        Client {
            transport: Arc::new(transport),
            dispatcher: self.dispatcher,
            config: self.config.build(),
        }
    }
}

/// One in-flight request: the response future plus the independently
/// resolvable [`TaskFuture`] for the transport's cancel handle.
///
/// Awaiting `Dispatched` directly awaits the response; use
/// [`Dispatched::into_parts`] to also observe the cancel handle.
pub struct Dispatched {
    response: BoxFuture<Result<Option<Response>>>,
    task: TaskFuture,
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched").finish_non_exhaustive()
    }
}

impl Dispatched {
    /// Split into the response future and the cancel-handle future.
    #[must_use]
    pub fn into_parts(self) -> (BoxFuture<Result<Option<Response>>>, TaskFuture) {
        (self.response, self.task)
    }
}

impl Future for Dispatched {
    type Output = Result<Option<Response>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        self.response.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_default_config() {
        let client = Client::new();
        assert_eq!(client.config().timeout, Duration::from_secs(30));
        assert_eq!(client.dispatcher().middleware_count(), 0);
    }

    #[test]
    fn client_is_clone() {
        let client = Client::new();
        let _cloned = client.clone();
    }

    #[test]
    fn resolve_relative_against_base() {
        let client = Client::builder()
            .base_url("https://api.example.com".parse().expect("url"))
            .build();

        let url = client.resolve_url("/users/1").expect("resolve");
        assert_eq!(url.as_str(), "https://api.example.com/users/1");
    }

    #[test]
    fn resolve_absolute_bypasses_base() {
        let client = Client::builder()
            .base_url("https://api.example.com".parse().expect("url"))
            .build();

        let url = client.resolve_url("https://other.example.com/x").expect("resolve");
        assert_eq!(url.as_str(), "https://other.example.com/x");
    }

    #[test]
    fn resolve_relative_without_base_fails() {
        let client = Client::new();
        let err = client.resolve_url("/users/1").expect_err("must fail");
        assert!(err.to_string().contains("requires a base URL"));
    }

    #[test]
    fn call_options_override_defaults() {
        let client = Client::builder()
            .base_url("https://api.example.com".parse().expect("url"))
            .default_header("X-Api", "default")
            .default_header("Accept", "application/json")
            .build();

        let options = CallOptions::new()
            .header("X-Api", "override")
            .timeout(Duration::from_secs(5));
        let request = client
            .build_request(Method::Get, "/users", None, options)
            .expect("build");

        assert_eq!(request.header("X-Api"), Some("override"));
        assert_eq!(request.header("Accept"), Some("application/json"));
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }
}
