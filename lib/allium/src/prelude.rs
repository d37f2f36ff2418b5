//! Prelude module for convenient imports.
//!
//! Re-exports the most commonly used types and functions for easy glob
//! importing:
//!
//! ```ignore
//! use allium::prelude::*;
//! ```

pub use crate::{
    CallOptions, Client, ClientConfig, ContentType, Dispatched, Dispatcher, Error, Method, Next,
    Request, RequestBuilder, Response, Result, SharedContext, StatusCode, Transport, from_json,
    header, middleware, to_form, to_json,
};
