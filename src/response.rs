//! The [`ResponseWriter`] capability and the direct connection-bound writer.
//!
//! A response is framed as `<code> <meta>\r\n` followed by the body. The
//! writer contract is narrow on purpose: one header, then bytes. Middleware
//! that needs to observe a complete response before it reaches the wire wraps
//! the writer in an [`Interceptor`](crate::Interceptor) instead.
//!
//! # Why boxed futures
//!
//! Handlers receive `&mut dyn ResponseWriter`: the same handler must work
//! against the connection-bound writer and against an in-memory interceptor.
//! Trait objects cannot carry `async fn` directly, so each method returns a
//! [`BoxFuture`], a heap-allocated, type-erased future. One allocation per
//! write is noise next to the TLS record it produces.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::handler::BoxFuture;
use crate::status::Status;
use crate::TERMINATION;

/// Capability to write exactly one Gemini response.
///
/// The contract: at most one `write_header` call, then zero or more
/// `write_body` calls. The terminal handler always writes the header first;
/// writing body bytes without a header is malformed at the protocol layer.
pub trait ResponseWriter: Send {
    /// Writes the status line: code, optional META, CR LF.
    fn write_header<'a>(&'a mut self, status: Status, meta: &'a str) -> BoxFuture<'a, io::Result<()>>;

    /// Writes response body bytes.
    fn write_body<'a>(&'a mut self, body: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;
}

/// Frames a response header. An empty META yields `<code>\r\n` with no
/// separating space.
pub(crate) fn format_header(status: Status, meta: &str) -> String {
    if meta.is_empty() {
        format!("{status}{TERMINATION}")
    } else {
        format!("{status} {meta}{TERMINATION}")
    }
}

/// A writer bound directly to the connection. No buffering, no retries:
/// `write_header` puts the status line on the wire immediately.
pub struct GeminiWriter<W> {
    w: W,
}

impl<W: AsyncWrite + Unpin + Send> GeminiWriter<W> {
    pub fn new(w: W) -> Self {
        Self { w }
    }

    /// Flushes buffered TLS records and sends the close-notify alert. Called
    /// by the engine once the response is complete.
    pub async fn close(&mut self) -> io::Result<()> {
        self.w.flush().await?;
        self.w.shutdown().await
    }
}

impl<W: AsyncWrite + Unpin + Send> ResponseWriter for GeminiWriter<W> {
    fn write_header<'a>(&'a mut self, status: Status, meta: &'a str) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let header = format_header(status, meta);
            self.w.write_all(header.as_bytes()).await
        })
    }

    fn write_body<'a>(&'a mut self, body: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move { self.w.write_all(body).await })
    }
}

// ── Test support ──────────────────────────────────────────────────────────────

/// In-memory writer recording header and body, shared by the unit tests of
/// the middleware stack.
#[cfg(test)]
pub(crate) struct RecordingWriter {
    pub header: Option<(Status, String)>,
    pub body: Vec<u8>,
}

#[cfg(test)]
impl RecordingWriter {
    pub fn new() -> Self {
        Self { header: None, body: Vec::new() }
    }
}

#[cfg(test)]
impl ResponseWriter for RecordingWriter {
    fn write_header<'a>(&'a mut self, status: Status, meta: &'a str) -> BoxFuture<'a, io::Result<()>> {
        self.header = Some((status, meta.to_owned()));
        Box::pin(async { Ok(()) })
    }

    fn write_body<'a>(&'a mut self, body: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        self.body.extend_from_slice(body);
        Box::pin(async { Ok(()) })
    }
}
