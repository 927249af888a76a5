//! Ordered middleware chain around a terminal handler.
//!
//! A middleware is a transformation `Handler → Handler`. The [`Mux`] holds a
//! sequence of them plus one terminal handler and composes right-to-left, so
//! the *first* registered middleware sees each request *first* and the
//! response *last*. The recommended stack, outside in: access log, cache,
//! file server.
//!
//! Ownership flows one way: the mux owns the middlewares, each wrapper owns
//! its private state plus the next handler. No back-pointers.

use std::io;

use crate::handler::{ArcHandler, BoxFuture, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::status::Status;

/// A transformation applied around the next handler in the chain.
pub type Middleware = Box<dyn Fn(ArcHandler) -> ArcHandler + Send + Sync>;

/// The request multiplexer: middlewares plus a terminal handler.
pub struct Mux {
    middlewares: Vec<Middleware>,
    handler: Option<ArcHandler>,
}

impl Mux {
    pub fn new() -> Self {
        Self { middlewares: Vec::new(), handler: None }
    }

    /// Appends a middleware to the stack. Order matters: the first appended
    /// middleware becomes the outermost layer.
    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    /// Installs the terminal handler and composes the chain. Must be called
    /// before the mux serves requests.
    pub fn handle(&mut self, terminal: ArcHandler) {
        let composed = self
            .middlewares
            .iter()
            .rev()
            .fold(terminal, |next, middleware| middleware(next));
        self.handler = Some(composed);
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for Mux {
    fn serve<'a>(
        &'a self,
        w: &'a mut dyn ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a, io::Result<()>> {
        match &self.handler {
            Some(handler) => handler.serve(w, req),
            // Serving before `handle` was called is a wiring mistake; answer
            // with a temporary failure rather than panicking mid-connection.
            None => Box::pin(async move { w.write_header(Status::TemporaryFailure, "internal").await }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::response::RecordingWriter;

    /// Terminal handler that records its invocation and answers 20.
    struct Tail(Arc<Mutex<Vec<&'static str>>>);

    impl Handler for Tail {
        fn serve<'a>(
            &'a self,
            w: &'a mut dyn ResponseWriter,
            _req: &'a Request,
        ) -> BoxFuture<'a, io::Result<()>> {
            Box::pin(async move {
                self.0.lock().unwrap().push("terminal");
                w.write_header(Status::Success, "text/plain").await
            })
        }
    }

    /// Middleware layer that records traversal order on the way in and out.
    struct Layer {
        name: &'static str,
        trace: Arc<Mutex<Vec<&'static str>>>,
        next: ArcHandler,
    }

    impl Handler for Layer {
        fn serve<'a>(
            &'a self,
            w: &'a mut dyn ResponseWriter,
            req: &'a Request,
        ) -> BoxFuture<'a, io::Result<()>> {
            Box::pin(async move {
                self.trace.lock().unwrap().push(self.name);
                self.next.serve(w, req).await?;
                self.trace.lock().unwrap().push(self.name);
                Ok(())
            })
        }
    }

    fn layer(name: &'static str, trace: Arc<Mutex<Vec<&'static str>>>) -> Middleware {
        Box::new(move |next| {
            Arc::new(Layer { name, trace: Arc::clone(&trace), next })
        })
    }

    #[tokio::test]
    async fn first_registered_runs_outermost() {
        let trace = Arc::new(Mutex::new(Vec::new()));

        let mut mux = Mux::new();
        mux.use_middleware(layer("outer", Arc::clone(&trace)));
        mux.use_middleware(layer("inner", Arc::clone(&trace)));
        mux.handle(Arc::new(Tail(Arc::clone(&trace))));

        let req = Request::parse("gemini://h/x", "127.0.0.1:1965".parse().unwrap()).unwrap();
        let mut w = RecordingWriter::new();
        mux.serve(&mut w, &req).await.unwrap();

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["outer", "inner", "terminal", "inner", "outer"]
        );
        assert_eq!(w.header, Some((Status::Success, "text/plain".to_owned())));
    }

    #[tokio::test]
    async fn empty_middleware_stack_is_just_the_terminal() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut mux = Mux::new();
        mux.handle(Arc::new(Tail(Arc::clone(&trace))));

        let req = Request::parse("gemini://h/x", "127.0.0.1:1965".parse().unwrap()).unwrap();
        let mut w = RecordingWriter::new();
        mux.serve(&mut w, &req).await.unwrap();

        assert_eq!(*trace.lock().unwrap(), vec!["terminal"]);
    }

    #[tokio::test]
    async fn unwired_mux_answers_temporary_failure() {
        let mux = Mux::new();
        let req = Request::parse("gemini://h/x", "127.0.0.1:1965".parse().unwrap()).unwrap();
        let mut w = RecordingWriter::new();
        mux.serve(&mut w, &req).await.unwrap();

        assert_eq!(w.header, Some((Status::TemporaryFailure, "internal".to_owned())));
    }
}
