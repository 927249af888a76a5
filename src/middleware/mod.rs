//! Built-in middleware.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. Two are built in:
//!
//! - [`logger`] — one access-log line per request, emitted after the
//!   response has been flushed to the client
//! - [`cache`] — a FIFO-bounded in-memory store of successful responses,
//!   keyed by URL path
//!
//! Both observe the response through an
//! [`Interceptor`](crate::Interceptor): the downstream handler writes into a
//! buffer, the middleware inspects it, then flushes it onward.

mod cache;
mod logger;

pub use cache::cache;
pub use logger::{logger, AccessLog};
