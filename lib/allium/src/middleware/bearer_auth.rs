//! Bearer token authentication middleware.
//!
//! Adds an `Authorization: Bearer <token>` header to every outgoing request.

use std::sync::Arc;

use crate::{BoxFuture, Next, Result, SharedContext};

/// Middleware that adds bearer token authentication to requests.
///
/// # Example
///
/// ```ignore
/// use allium::{Client, middleware};
///
/// let client = Client::builder()
///     .with(middleware::bearer_auth("my-api-token"))
///     .build();
/// ```
#[must_use]
pub fn bearer_auth(
    token: impl Into<String>,
) -> impl Fn(SharedContext, Next) -> BoxFuture<Result<()>> + Send + Sync + 'static {
    let header_value: Arc<str> = Arc::from(format!("Bearer {}", token.into()));

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
