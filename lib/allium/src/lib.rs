//! HTTP client with an ordered, onion-model middleware pipeline.
//!
//! Each request runs through the registered middleware in order: code before
//! `next.run()` executes outside-in, the transport call sits at the center,
//! and code after `next.run()` unwinds inside-out. Middleware share one
//! mutable [`SharedContext`] per request, and any failure is offered to the
//! registered error handlers before it reaches the caller.
//!
//! # Example
//!
//! ```ignore
//! use allium::{Client, middleware};
//!
//! #[tokio::main]
//! async fn main() -> allium::Result<()> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com".parse().expect("url"))
//!         .with(middleware::logging())
//!         .with(middleware::bearer_auth("token"))
//!         .build();
//!
//!     if let Some(response) = client.get("/users/1").await? {
//!         println!("{}", response.text());
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod config;
pub mod middleware;
pub mod prelude;
mod transport;

pub use client::{CallOptions, Client, ClientBuilder, Dispatched};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use transport::{
    CancelHandle, CancelSignal, HyperTransport, TaskFuture, TaskSlot, Transport,
};

// Re-export the core data model and dispatch engine.
pub use allium_core::{
    BoxFuture, ContentType, Context, Dispatcher, Error, Method, Next, Request, RequestBuilder,
    Response, Result, SharedContext, StatusCode, from_json, header, to_form, to_json,
};
