//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The middleware chain needs to hold handlers of *different* concrete types
//! behind one interface: the file server, a cache wrapper, a logging wrapper.
//! Rust trait objects cannot carry `async fn`, so [`Handler::serve`] returns
//! a [`BoxFuture`], a heap-allocated, type-erased future pinned in place so
//! the runtime can poll it without moving it.
//!
//! The chain from registration to dispatch:
//!
//! ```text
//! Files::new(root, autoindex)            ← a concrete Handler
//!        ↓ mux.handle(Arc::new(files))
//! middleware(next) → Arc<dyn Handler>    ← each middleware wraps the next
//!        ↓ stored as ArcHandler
//! handler.serve(w, req)  at request time ← one vtable dispatch per layer
//! ```
//!
//! The only runtime cost per request is one `Arc` clone per connection plus
//! one virtual call and one future allocation per layer, negligible compared
//! to the TLS handshake that preceded it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::ResponseWriter;

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` because the runtime must be able to poll the future
/// in-place; `Send` so tokio may move it across worker threads between polls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A shared, type-erased handler. Cloning is one atomic increment.
pub type ArcHandler = Arc<dyn Handler>;

/// Serves one Gemini request.
///
/// Implementations write the response through `w`: header first, then body.
/// I/O errors bubble up so the engine can log them; they are not reported to
/// the peer (there is no peer left to report to when a write fails).
pub trait Handler: Send + Sync {
    fn serve<'a>(
        &'a self,
        w: &'a mut dyn ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a, io::Result<()>>;
}

/// Adapter to use an ordinary function as a [`Handler`].
///
/// ```rust
/// use std::io;
///
/// use capsa::{BoxFuture, HandlerFunc, Request, ResponseWriter, Status};
///
/// fn hello<'a>(
///     w: &'a mut dyn ResponseWriter,
///     _req: &'a Request,
/// ) -> BoxFuture<'a, io::Result<()>> {
///     Box::pin(async move {
///         w.write_header(Status::Success, capsa::GEMINI_MIME).await?;
///         w.write_body(b"# hello\n").await
///     })
/// }
///
/// let handler = HandlerFunc(hello);
/// ```
pub struct HandlerFunc<F>(pub F);

impl<F> Handler for HandlerFunc<F>
where
    F: for<'a> Fn(&'a mut dyn ResponseWriter, &'a Request) -> BoxFuture<'a, io::Result<()>>
        + Send
        + Sync,
{
    fn serve<'a>(
        &'a self,
        w: &'a mut dyn ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a, io::Result<()>> {
        (self.0)(w, req)
    }
}
