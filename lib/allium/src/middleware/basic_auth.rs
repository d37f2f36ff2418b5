//! Basic authentication middleware.
//!
//! Adds an `Authorization: Basic <base64(user:pass)>` header to every
//! outgoing request.

use std::sync::Arc;

use base64::Engine;

use crate::{BoxFuture, Next, Result, SharedContext};

/// Middleware that adds basic authentication to requests.
///
/// # Example
///
/// ```ignore
/// use allium::{Client, middleware};
///
/// let client = Client::builder()
///     .with(middleware::basic_auth("username", "password"))
///     .build();
/// ```
#[must_use]
pub fn basic_auth(
    username: impl AsRef<str>,
    password: impl AsRef<str>,
) -> impl Fn(SharedContext, Next) -> BoxFuture<Result<()>> + Send + Sync + 'static {
    let credentials = format!("{}:{}", username.as_ref(), password.as_ref());
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
    let header_value: Arc<str> = Arc::from(format!("Basic {encoded}"));

    move |ctx, next| {
        let header_value = Arc::clone(&header_value);
        Box::pin(async move {
            ctx.with(|c| {
                c.request
                    .headers
                    .insert("Authorization".to_string(), header_value.to_string());
            });
            next.run().await
        })
    }
}
