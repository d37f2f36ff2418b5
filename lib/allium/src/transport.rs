//! Transport boundary: how a request descriptor becomes a response.
//!
//! The dispatch engine never talks to the network itself; the client's
//! terminal step calls a [`Transport`]. The built-in [`HyperTransport`] goes
//! over the wire with hyper + rustls; tests substitute their own stubs.
//!
//! A transport may make the in-flight request cancellable by registering a
//! [`CancelHandle`] in the [`TaskSlot`] it is given. Registration happens at
//! most once, at any point before the send future settles; the caller
//! observes the handle through the [`TaskFuture`] paired with the response.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio::sync::oneshot;

use crate::config::ClientConfig;
use crate::{Error, Request, Response, Result};

/// An underlying request primitive.
///
/// Implementations are async-first; the returned future settles with either
/// the buffered response or a transport-level failure, which then flows
/// through the pipeline's normal error path.
pub trait Transport: Send + Sync + 'static {
    /// Send the request over the wire.
    ///
    /// The `task` slot may be used zero or one time to expose a cancel
    /// handle; a transport with nothing cancellable simply ignores it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails for any reason: network errors,
    /// TLS errors, timeouts, cancellation.
    fn send(
        &self,
        request: Request,
        task: TaskSlot,
    ) -> impl Future<Output = Result<Response>> + Send;
}

// ============================================================================
// Cancel handle plumbing
// ============================================================================

/// Write-once slot a transport uses to publish its cancel handle.
///
/// The first registration wins; later calls are ignored. Dropping the slot
/// without registering resolves the paired [`TaskFuture`] with `None`.
#[derive(Debug, Clone)]
pub struct TaskSlot {
    tx: Arc<Mutex<Option<oneshot::Sender<CancelHandle>>>>,
}

impl TaskSlot {
    /// Create a slot plus the future that observes it.
    #[must_use]
    pub fn channel() -> (Self, TaskFuture) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            TaskFuture {
                rx,
                finished: false,
            },
        )
    }

    /// Publish the transport's cancel handle.
    pub fn register(&self, handle: CancelHandle) {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            // The receiver may already be gone; cancellation is then simply
            // unavailable for this request.
            let _ = tx.send(handle);
        }
    }
}

/// Resolves with the transport's [`CancelHandle`] once registered, or `None`
/// when the transport finished without registering one.
///
/// Independent of the response future: it may resolve before or after it.
#[derive(Debug)]
pub struct TaskFuture {
    rx: oneshot::Receiver<CancelHandle>,
    finished: bool,
}

impl Future for TaskFuture {
    type Output = Option<CancelHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.finished {
            return Poll::Pending;
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.finished = true;
                Poll::Ready(result.ok())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cancellation handle created by a transport for one in-flight request.
///
/// `cancel` fires the paired [`CancelSignal`]; the transport races that
/// signal against its own work and fails with [`Error::Cancelled`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: oneshot::Sender<()>,
}

impl CancelHandle {
    /// Create a handle and the signal future the transport listens on.
    #[must_use]
    pub fn channel() -> (Self, CancelSignal) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, CancelSignal { rx: Some(rx) })
    }

    /// Cancel the in-flight request.
    pub fn cancel(self) {
        let _ = self.tx.send(());
    }
}

/// Resolves once [`CancelHandle::cancel`] is called.
///
/// If the handle is dropped without cancelling, the signal stays pending
/// forever, so racing against it is always safe.
#[derive(Debug)]
pub struct CancelSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl Future for CancelSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(())) => {
                self.rx = None;
                Poll::Ready(())
            }
            // Handle dropped without cancelling: never fires.
            Poll::Ready(Err(_)) => {
                self.rx = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ============================================================================
// Hyper transport
// ============================================================================

/// HTTP transport using hyper-util with connection pooling and rustls TLS.
#[derive(Clone)]
pub struct HyperTransport {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    config: ClientConfig,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a transport from client configuration.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_idle_per_host)
            .build(Self::connector());

        Self {
            inner,
            config: config.clone(),
        }
    }

    /// HTTP/1.1 + HTTP/2 connector, TLS via rustls with the Mozilla roots.
    fn connector() -> HttpsConnector<HttpConnector> {
        let roots: rustls::RootCertStore = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build()
    }

    /// Build a hyper request from a request descriptor.
    fn build_hyper_request(request: Request) -> Result<http::Request<Full<Bytes>>> {
        let mut builder = http::Request::builder()
            .method(http::Method::from(request.method))
            .uri(request.url.as_str());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let body = request.body.map_or_else(Full::default, Full::new);
        builder
            .body(body)
            .map_err(|e| Error::invalid_request(e.to_string()))
    }

    /// Extract response headers as a `HashMap`.
    fn extract_headers(headers: &http::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect()
    }

    #[allow(clippy::needless_pass_by_value)]
    fn map_hyper_error(err: hyper_util::client::legacy::Error) -> Error {
        let msg = err.to_string();

        if err.is_connect() {
            return Error::connection(msg);
        }

        if msg.contains("ssl") || msg.contains("tls") || msg.contains("certificate") {
            return Error::tls(msg);
        }

        Error::connection(msg)
    }

    async fn perform(&self, request: Request) -> Result<Response> {
        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let hyper_request = Self::build_hyper_request(request)?;

        let response = tokio::time::timeout(timeout, self.inner.request(hyper_request))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Self::map_hyper_error)?;

        let status = response.status().as_u16();
        let headers = Self::extract_headers(response.headers());

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::connection(e.to_string()))?
            .to_bytes();

        Ok(Response::new(status, headers, body))
    }
}

impl Transport for HyperTransport {
    async fn send(&self, request: Request, task: TaskSlot) -> Result<Response> {
        let (handle, signal) = CancelHandle::channel();
        task.register(handle);

        tokio::select! {
            () = signal => Err(Error::Cancelled),
            result = self.perform(request) => result,
        }
    }
}
