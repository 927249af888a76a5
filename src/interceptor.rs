//! Buffering [`ResponseWriter`] for middleware.
//!
//! An `Interceptor` stands in for the real writer during a handler
//! invocation: the status line and body land in memory instead of on the
//! wire. Afterwards the middleware inspects what was written, decides what to
//! do with it (cache it, count it, log it), and flushes the buffer to the
//! wrapped writer, which may itself be another interceptor further out in
//! the chain.
//!
//! The cost is the obvious one: the body is held in memory in full and
//! written twice. For a document server whose payloads are small text files
//! that trade is fine.

use std::io;

use crate::handler::BoxFuture;
use crate::response::ResponseWriter;
use crate::status::Status;

/// A [`ResponseWriter`] that records the response instead of sending it.
pub struct Interceptor<'w> {
    w: &'w mut dyn ResponseWriter,
    status: Option<Status>,
    meta: String,
    body: Vec<u8>,
    has_body: bool,
}

impl<'w> Interceptor<'w> {
    /// Wraps `w`; nothing reaches it until [`flush`](Self::flush).
    pub fn new(w: &'w mut dyn ResponseWriter) -> Self {
        Self { w, status: None, meta: String::new(), body: Vec::new(), has_body: false }
    }

    /// Whether the handler wrote a header. Until it did, `status` and `meta`
    /// hold nothing meaningful.
    pub fn has_header(&self) -> bool {
        self.status.is_some()
    }

    /// Whether the handler wrote any body bytes (a written empty body counts).
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// The recorded status, if a header was written. Last write wins, though
    /// well-behaved handlers write exactly one header.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// The recorded META field.
    pub fn meta(&self) -> &str {
        &self.meta
    }

    /// The buffered body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Forwards the recorded header, then the buffered body, to the wrapped
    /// writer.
    pub async fn flush(&mut self) -> io::Result<()> {
        if let Some(status) = self.status {
            self.w.write_header(status, &self.meta).await?;
        }
        if self.has_body {
            self.w.write_body(&self.body).await?;
        }
        Ok(())
    }
}

impl ResponseWriter for Interceptor<'_> {
    fn write_header<'a>(&'a mut self, status: Status, meta: &'a str) -> BoxFuture<'a, io::Result<()>> {
        self.status = Some(status);
        self.meta = meta.to_owned();
        Box::pin(async { Ok(()) })
    }

    fn write_body<'a>(&'a mut self, body: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        self.has_body = true;
        self.body.extend_from_slice(body);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::RecordingWriter;

    #[tokio::test]
    async fn records_without_touching_the_wrapped_writer() {
        let mut inner = RecordingWriter::new();
        let mut buf = Interceptor::new(&mut inner);

        buf.write_header(Status::Success, "text/gemini").await.unwrap();
        buf.write_body(b"hello ").await.unwrap();
        buf.write_body(b"world").await.unwrap();

        assert!(buf.has_header());
        assert!(buf.has_body());
        assert_eq!(buf.status(), Some(Status::Success));
        assert_eq!(buf.meta(), "text/gemini");
        assert_eq!(buf.body(), b"hello world");

        assert!(inner.header.is_none());
        assert!(inner.body.is_empty());
    }

    #[tokio::test]
    async fn flush_forwards_header_then_body() {
        let mut inner = RecordingWriter::new();
        let mut buf = Interceptor::new(&mut inner);

        buf.write_header(Status::NotFound, "nope").await.unwrap();
        buf.write_body(b"ignored by clients").await.unwrap();
        buf.flush().await.unwrap();

        assert_eq!(inner.header, Some((Status::NotFound, "nope".to_owned())));
        assert_eq!(inner.body, b"ignored by clients");
    }

    #[tokio::test]
    async fn flush_of_an_untouched_interceptor_writes_nothing() {
        let mut inner = RecordingWriter::new();
        let mut buf = Interceptor::new(&mut inner);
        buf.flush().await.unwrap();

        assert!(inner.header.is_none());
        assert!(inner.body.is_empty());
    }

    #[tokio::test]
    async fn last_header_wins() {
        let mut inner = RecordingWriter::new();
        let mut buf = Interceptor::new(&mut inner);

        buf.write_header(Status::NotFound, "first").await.unwrap();
        buf.write_header(Status::Success, "second").await.unwrap();

        assert_eq!(buf.status(), Some(Status::Success));
        assert_eq!(buf.meta(), "second");
    }
}
