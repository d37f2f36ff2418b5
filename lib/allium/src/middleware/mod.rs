//! Built-in middleware.
//!
//! A middleware is any `Fn(SharedContext, Next) -> future` closure; the
//! functions here build common ones. Register them with
//! [`Client::with`](crate::Client::with) or
//! [`Dispatcher::with`](crate::Dispatcher::with):
//!
//! ```ignore
//! let mut client = Client::builder()
//!     .with(middleware::logging())
//!     .with(middleware::bearer_auth("token"))
//!     .build();
//! ```

mod basic_auth;
mod bearer_auth;
mod logging;

pub use basic_auth::basic_auth;
pub use bearer_auth::bearer_auth;
pub use logging::{logging, logging_debug};
