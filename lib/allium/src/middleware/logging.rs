//! Request/response logging middleware.
//!
//! Logs each pipeline pass using the `tracing` crate: the request on the way
//! in, the outcome with elapsed time on the way out.

use std::time::Instant;

use tracing::{Instrument, Level, debug, info, span, warn};

use crate::{BoxFuture, Next, Result, SharedContext};

/// Log level for the logging middleware.
#[derive(Debug, Clone, Copy)]
enum LogLevel {
    Debug,
    Info,
}

/// Middleware that logs requests and responses at info level.
#[must_use]
pub fn logging() -> impl Fn(SharedContext, Next) -> BoxFuture<Result<()>> + Send + Sync + 'static {
    logger(LogLevel::Info)
}

/// Middleware that logs request details at debug level.
#[must_use]
pub fn logging_debug()
-> impl Fn(SharedContext, Next) -> BoxFuture<Result<()>> + Send + Sync + 'static {
    logger(LogLevel::Debug)
}

fn logger(
    level: LogLevel,
) -> impl Fn(SharedContext, Next) -> BoxFuture<Result<()>> + Send + Sync + 'static {
    move |ctx, next| {
        let (method, url, headers) = ctx.with(|c| {
            (
                c.request.method,
                c.request.url.to_string(),
                c.request.headers.clone(),
            )
        });

        let span = span!(Level::INFO, "http_request", %method, %url);

        Box::pin(
            async move {
                let start = Instant::now();

                match level {
                    LogLevel::Debug => {
                        debug!(%method, %url, headers = ?headers, "sending request");
                    }
                    LogLevel::Info => {
                        info!(%method, %url, "sending request");
                    }
                }

                let result = next.run().await;
                let elapsed = start.elapsed();

                // Saturating conversion to u64 (truncates after ~584 million years)
                let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                ctx.with(|c| c.insert_extension("elapsed_ms", serde_json::json!(elapsed_ms)));

                match &result {
                    Ok(()) => {
                        let status = ctx.with(|c| c.response.as_ref().map(|r| r.status()));
                        match status {
                            Some(status) if (200..400).contains(&status) => {
                                info!(status, elapsed_ms, "request completed");
                            }
                            Some(status) => {
                                warn!(status, elapsed_ms, "request failed with HTTP error");
                            }
                            None => {
                                info!(elapsed_ms, "pipeline completed without a response");
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, elapsed_ms, "request failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
