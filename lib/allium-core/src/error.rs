//! Error types for allium.

use std::sync::Arc;

use derive_more::{Display, Error, From};

/// Main error type for allium operations.
///
/// The type is `Clone` because a captured failure lives in the pipeline
/// [`Context`](crate::Context) (where error handlers inspect it) while the
/// same value may also be re-raised to the caller.
#[derive(Debug, Clone, Display, Error, From)]
pub enum Error {
    /// A middleware invoked its continuation more than once for the same
    /// chain position. This is a bug in that middleware, not a transient
    /// fault; it is still offered to the error handlers for consistency.
    #[display("continuation invoked more than once (chain position {index})")]
    #[from(skip)]
    ReentrantNext {
        /// Chain position whose dispatch was attempted a second time.
        index: usize,
    },

    /// Arbitrary failure raised by a middleware or error handler.
    #[display("middleware error: {_0}")]
    #[from(skip)]
    Middleware(#[error(not(source))] Arc<dyn std::error::Error + Send + Sync>),

    /// HTTP-level errors (non-2xx status codes surfaced as failures).
    #[display("HTTP error {status}: {message}")]
    #[from(skip)]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Response body, if available.
        #[error(not(source))]
        body: Option<bytes::Bytes>,
    },

    /// Network/connection errors.
    #[display("connection error: {_0}")]
    #[from(skip)]
    Connection(#[error(not(source))] String),

    /// TLS/SSL errors.
    #[display("TLS error: {_0}")]
    #[from(skip)]
    Tls(#[error(not(source))] String),

    /// Request timeout.
    #[display("request timeout")]
    #[from(skip)]
    Timeout,

    /// Request cancelled through its transport handle.
    #[display("request cancelled")]
    #[from(skip)]
    Cancelled,

    /// Invalid request configuration.
    #[display("invalid request: {_0}")]
    #[from(skip)]
    InvalidRequest(#[error(not(source))] String),

    /// JSON serialization error.
    #[display("JSON serialization error: {_0}")]
    #[from(skip)]
    JsonSerialization(#[error(not(source))] String),

    /// JSON deserialization error with path context.
    #[display("JSON deserialization error at '{path}': {message}")]
    #[from(skip)]
    JsonDeserialization {
        /// JSON path to the error (e.g., "user.address.city").
        path: String,
        /// Error message.
        message: String,
    },

    /// Form URL-encoded serialization error.
    #[display("form serialization error: {_0}")]
    #[from(skip)]
    FormSerialization(#[error(not(source))] String),

    /// URL parsing error.
    #[display("invalid URL: {_0}")]
    #[from]
    InvalidUrl(url::ParseError),
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an arbitrary error raised by a middleware or error handler.
    #[must_use]
    pub fn middleware<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Middleware(Arc::new(err))
    }

    /// Create an HTTP error from status code and message.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: None,
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    #[must_use]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a JSON deserialization error with path context.
    #[must_use]
    pub fn json_deserialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this failure signals a continuation invoked twice.
    #[must_use]
    pub const fn is_reentrant_next(&self) -> bool {
        matches!(self, Self::ReentrantNext { .. })
    }

    /// Returns `true` if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if the request was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the HTTP status code if this is an HTTP error.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    /// Returns `true` if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| (500..600).contains(&s))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonSerialization(err.to_string())
    }
}

impl From<serde_html_form::ser::Error> for Error {
    fn from(err: serde_html_form::ser::Error) -> Self {
        Self::FormSerialization(err.to_string())
    }
}
