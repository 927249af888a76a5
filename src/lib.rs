//! # capsa
//!
//! A Gemini protocol file server. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! Gemini is deliberately small: a client opens a TLS connection, sends one
//! UTF-8 URL terminated by CR LF, and receives one response, a two-digit
//! status, a space, a META string, CR LF, and (on success) a body. The
//! connection is then closed. No headers, no methods, no keep-alive.
//!
//! capsa implements exactly that, plus the parts a real deployment needs:
//!
//! - **Bounded concurrency** — a semaphore caps in-flight connections, a
//!   bounded queue gives one slot of backpressure before accept stalls
//! - **Read deadlines** — the TLS handshake and the request line share one
//!   hard deadline; slow peers get `41` or a closed socket
//! - **Graceful shutdown** — SIGINT stops the accept loop immediately and
//!   drains in-flight connections within a deadline
//! - **Hot certificate reload** — SIGHUP re-invokes the TLS loader and
//!   rebuilds the listener without dropping the process
//! - **Middleware** — an ordered chain around a terminal handler; the
//!   built-ins are an access logger and a FIFO document cache
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use capsa::fileserver::Files;
//! use capsa::middleware::{self, AccessLog};
//! use capsa::{Mux, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), capsa::Error> {
//!     let mut mux = Mux::new();
//!     mux.use_middleware(middleware::logger(Arc::new(AccessLog::stdout(None))));
//!     mux.use_middleware(middleware::cache(64));
//!     mux.handle(Arc::new(Files::new("public", false)));
//!
//!     Server::new(
//!         "0.0.0.0:1965".parse().expect("invalid socket address"),
//!         "example.org",
//!         || capsa::tls::self_signed("example.org", 7),
//!         Arc::new(mux),
//!     )
//!     .read_timeout(Duration::from_secs(5))
//!     .max_conns(128)
//!     .run()
//!     .await
//! }
//! ```

mod error;
mod handler;
mod interceptor;
mod mux;
mod request;
mod response;
mod server;
mod status;

pub mod fileserver;
pub mod middleware;
pub mod tls;

pub use error::{Error, GeminiError, StatusError};
pub use handler::{ArcHandler, BoxFuture, Handler, HandlerFunc};
pub use interceptor::Interceptor;
pub use mux::{Middleware, Mux};
pub use request::Request;
pub use response::{GeminiWriter, ResponseWriter};
pub use server::{Server, ShutdownHandle};
pub use status::Status;

/// Line terminator for the request line and the response header.
pub const TERMINATION: &str = "\r\n";

/// Maximum permitted length of the request URL in bytes.
pub const URL_MAX_BYTES: usize = 1024;

/// Default document served for a directory request.
pub const INDEX_FILE: &str = "index.gmi";

/// MIME type of the native Gemini hypertext format.
pub const GEMINI_MIME: &str = "text/gemini; charset=utf-8";
