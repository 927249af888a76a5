//! Response cache with first-in-first-out replacement.
//!
//! The store is two maps (body and MIME, keyed by URL path) plus an
//! integer-indexed ring that remembers insertion order. The ring counter
//! wraps modulo the capacity; when a slot is reused, its previous occupant is
//! evicted from both maps first. Plain FIFO: a cache hit does not refresh an
//! entry's position.
//!
//! Only `20` responses are inserted. Concurrent misses for the same key are
//! not coalesced; both run the handler and the last writer wins, which is
//! harmless for a static file server.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use crate::handler::{ArcHandler, BoxFuture, Handler};
use crate::interceptor::Interceptor;
use crate::mux::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::status::Status;

struct State {
    size: usize,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<String, Bytes>,
    mime_types: HashMap<String, String>,
    tracker: HashMap<usize, String>,
    index: usize,
}

impl State {
    fn new(size: usize) -> Self {
        Self { size, inner: RwLock::new(Inner::default()) }
    }

    fn read(&self, key: &str) -> Option<(Bytes, String)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let doc = inner.documents.get(key)?;
        let mime = inner.mime_types.get(key)?;
        Some((doc.clone(), mime.clone()))
    }

    fn write(&self, key: &str, mime: String, doc: Bytes) {
        // A zero-size cache degenerates to a passthrough.
        if self.size == 0 {
            return;
        }
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;
        inner.housekeeping(self.size);
        inner.tracker.insert(inner.index, key.to_owned());
        inner.index = (inner.index + 1) % self.size;
        inner.documents.insert(key.to_owned(), doc);
        inner.mime_types.insert(key.to_owned(), mime);
    }
}

impl Inner {
    /// Frees the ring slot the counter points at, evicting its occupant.
    fn housekeeping(&mut self, size: usize) {
        if self.tracker.len() >= size {
            if let Some(expired) = self.tracker.remove(&self.index) {
                self.documents.remove(&expired);
                self.mime_types.remove(&expired);
            }
        }
    }
}

struct CacheHandler {
    state: Arc<State>,
    next: ArcHandler,
}

impl Handler for CacheHandler {
    fn serve<'a>(
        &'a self,
        w: &'a mut dyn ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let key = req.path();

            if let Some((body, mime)) = self.state.read(key) {
                w.write_header(Status::Success, &mime).await?;
                return w.write_body(&body).await;
            }

            let mut buffered = Interceptor::new(w);
            self.next.serve(&mut buffered, req).await?;

            if buffered.status() == Some(Status::Success) {
                self.state.write(
                    key,
                    buffered.meta().to_owned(),
                    Bytes::copy_from_slice(buffered.body()),
                );
            }
            buffered.flush().await
        })
    }
}

/// Caching middleware holding at most `size` documents.
pub fn cache(size: usize) -> Middleware {
    let state = Arc::new(State::new(size));
    Box::new(move |next| Arc::new(CacheHandler { state: Arc::clone(&state), next }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::response::RecordingWriter;

    /// Terminal handler counting invocations and echoing the request path.
    struct Counting(AtomicUsize);

    impl Handler for Counting {
        fn serve<'a>(
            &'a self,
            w: &'a mut dyn ResponseWriter,
            req: &'a Request,
        ) -> BoxFuture<'a, io::Result<()>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                w.write_header(Status::Success, "text/plain").await?;
                w.write_body(req.path().as_bytes()).await
            })
        }
    }

    /// Terminal handler that always fails.
    struct Failing;

    impl Handler for Failing {
        fn serve<'a>(
            &'a self,
            w: &'a mut dyn ResponseWriter,
            _req: &'a Request,
        ) -> BoxFuture<'a, io::Result<()>> {
            Box::pin(async move { w.write_header(Status::NotFound, "nope").await })
        }
    }

    fn request(path: &str) -> Request {
        let raw = format!("gemini://h{path}");
        Request::parse(&raw, "127.0.0.1:1965".parse().unwrap()).unwrap()
    }

    async fn get(handler: &dyn Handler, path: &str) -> RecordingWriter {
        let mut w = RecordingWriter::new();
        handler.serve(&mut w, &request(path)).await.unwrap();
        w
    }

    #[tokio::test]
    async fn hit_skips_the_terminal_handler() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let chain = cache(4)(Arc::clone(&counting) as ArcHandler);

        let first = get(chain.as_ref(), "/doc").await;
        let second = get(chain.as_ref(), "/doc").await;

        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(first.header, second.header);
        assert_eq!(first.body, b"/doc");
        assert_eq!(second.body, b"/doc");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let chain = cache(4)(Arc::new(Failing));

        let w = get(chain.as_ref(), "/gone").await;
        assert_eq!(w.header, Some((Status::NotFound, "nope".to_owned())));

        // A failure must reach the handler again, not a cached copy.
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let chain = cache(4)(Arc::clone(&counting) as ArcHandler);
        get(chain.as_ref(), "/doc").await;
        get(chain.as_ref(), "/doc").await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fifo_evicts_the_oldest_entry() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let chain = cache(2)(Arc::clone(&counting) as ArcHandler);

        get(chain.as_ref(), "/a").await; // miss: a
        get(chain.as_ref(), "/b").await; // miss: a b
        get(chain.as_ref(), "/c").await; // miss, evicts a: b c
        assert_eq!(counting.0.load(Ordering::SeqCst), 3);

        get(chain.as_ref(), "/b").await; // hit
        get(chain.as_ref(), "/c").await; // hit
        assert_eq!(counting.0.load(Ordering::SeqCst), 3);

        get(chain.as_ref(), "/a").await; // miss again: evicted
        assert_eq!(counting.0.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn capacity_never_exceeded() {
        let state = Arc::new(State::new(3));
        for i in 0..10 {
            state.write(&format!("/doc{i}"), "text/plain".into(), Bytes::from_static(b"x"));
            let inner = state.inner.read().unwrap();
            assert!(inner.documents.len() <= 3);
            assert!(inner.mime_types.len() <= 3);
            assert!(inner.tracker.len() <= 3);
        }
    }

    #[tokio::test]
    async fn zero_capacity_is_a_passthrough() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let chain = cache(0)(Arc::clone(&counting) as ArcHandler);

        get(chain.as_ref(), "/doc").await;
        get(chain.as_ref(), "/doc").await;

        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }
}
