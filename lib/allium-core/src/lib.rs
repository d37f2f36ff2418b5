//! Core types and the middleware dispatch engine for the allium HTTP client.
//!
//! This crate provides the foundational pieces used by `allium`:
//! - [`Dispatcher`] - Ordered middleware pipeline with onion-model execution
//! - [`Context`] and [`SharedContext`] - Mutable per-request state threaded
//!   through one pipeline run
//! - [`Next`] - Continuation handle passed to each middleware
//! - [`Method`] - HTTP method enum
//! - [`Request`] and [`RequestBuilder`] - HTTP request descriptor
//! - [`Response`] - Buffered HTTP response
//! - [`Error`] and [`Result`] - Error handling
//!
//! The dispatch engine itself is transport-agnostic: `execute` takes a
//! caller-supplied terminal step, so the same pipeline runs against a real
//! HTTP transport or a test stub.

mod body;
mod context;
mod dispatcher;
mod error;
mod method;
mod request;
mod response;

pub use body::{ContentType, from_json, to_form, to_json};
pub use context::{Context, SharedContext};
pub use dispatcher::{BoxFuture, Dispatcher, Next};
pub use error::{Error, Result};
pub use method::Method;
pub use request::{Request, RequestBuilder};
pub use response::Response;

// Re-export http crate types for status codes and headers
pub use http::{StatusCode, header};
