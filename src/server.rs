//! The connection engine: TLS accept loop, concurrency limiting, per
//! connection deadlines, graceful shutdown and SIGHUP certificate reload.
//!
//! # Life of a connection
//!
//! accept → bounded queue → semaphore permit → worker task → TLS handshake
//! and request line under one deadline → middleware chain → close. The queue
//! holds at most `max_conns` sockets, so when every permit is taken and the
//! queue is full, backpressure reaches the accept loop itself and the kernel
//! listen backlog absorbs the rest.
//!
//! # Graceful shutdown and certificate reload
//!
//! The accept future is polled inside `select!`, which makes it natively
//! cancellable: a shutdown or reload signal wins the race and the loop
//! breaks without any platform tricks. Reload rebuilds the listener with the
//! freshly loaded TLS config on the next outer-loop turn; shutdown drops the
//! listener, then drains in-flight connections within the caller's deadline.
//!
//! Set the deadline longer than your slowest handler if truncating responses
//! at shutdown is unacceptable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::{Error, StatusError};
use crate::handler::ArcHandler;
use crate::request::Request;
use crate::response::{GeminiWriter, ResponseWriter};
use crate::status::Status;
use crate::tls::TlsError;

type Loader = Arc<dyn Fn() -> Result<rustls::ServerConfig, TlsError> + Send + Sync>;
type ReloadHook = Arc<dyn Fn() + Send + Sync>;
type Conn = (TcpStream, SocketAddr, TlsAcceptor);

/// The Gemini server.
pub struct Server {
    addr: SocketAddr,
    hostname: String,
    loader: Loader,
    handler: ArcHandler,
    read_timeout: Duration,
    max_conns: usize,
    on_reload: Option<ReloadHook>,
    signals: Arc<Signals>,
}

/// Internal lifecycle signals, shared with [`ShutdownHandle`]s.
///
/// All senders use `send_replace`, which succeeds with or without live
/// receivers; handles subscribe on demand.
struct Signals {
    shutdown: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    drained: watch::Sender<bool>,
    sighup_done: watch::Sender<bool>,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl Signals {
    fn new() -> Self {
        Self {
            shutdown: watch::channel(false).0,
            closed: watch::channel(false).0,
            drained: watch::channel(false).0,
            sighup_done: watch::channel(false).0,
            bound: watch::channel(None).0,
        }
    }

    /// Marks every stage finished. Used when startup fails before the
    /// corresponding tasks exist, so a concurrent shutdown cannot hang.
    fn abort(&self) {
        self.shutdown.send_replace(true);
        self.closed.send_replace(true);
        self.drained.send_replace(true);
        self.sighup_done.send_replace(true);
    }
}

impl Server {
    /// Configures a server for `addr`.
    ///
    /// `hostname` names this capsule in absolute redirect targets. `loader`
    /// must produce a *fresh* TLS configuration on every invocation; it is
    /// called once at startup and again on every SIGHUP. `handler` is the
    /// composed chain, usually a [`Mux`](crate::Mux).
    pub fn new(
        addr: SocketAddr,
        hostname: impl Into<String>,
        loader: impl Fn() -> Result<rustls::ServerConfig, TlsError> + Send + Sync + 'static,
        handler: ArcHandler,
    ) -> Self {
        Self {
            addr,
            hostname: hostname.into(),
            loader: Arc::new(loader),
            handler,
            read_timeout: Duration::from_secs(5),
            max_conns: 128,
            on_reload: None,
            signals: Arc::new(Signals::new()),
        }
    }

    /// Hard deadline shared by the TLS handshake and the request-line read.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Caps concurrently served connections. Clamped to at least one.
    pub fn max_conns(mut self, max: usize) -> Self {
        self.max_conns = max.max(1);
        self
    }

    /// Invoked after every successful SIGHUP reload, once the new TLS config
    /// is published. The binary uses this to reopen its log files.
    pub fn on_reload(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reload = Some(Arc::new(hook));
        self
    }

    /// A handle for triggering shutdown and observing the bound address.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle { signals: Arc::clone(&self.signals) }
    }

    /// Accepts and serves connections until shutdown.
    pub async fn run(self) -> Result<(), Error> {
        let initial = match (self.loader)() {
            Ok(config) => config,
            Err(e) => {
                self.signals.abort();
                return Err(e.into());
            }
        };
        let (reload_tx, mut reload_rx) = watch::channel(Arc::new(initial));

        tokio::spawn(sighup_task(
            Arc::clone(&self.loader),
            reload_tx,
            self.on_reload.clone(),
            Arc::clone(&self.signals),
        ));

        let (queue_tx, queue_rx) = mpsc::channel::<Conn>(self.max_conns);
        tokio::spawn(drain_queue(
            queue_rx,
            Arc::new(Worker {
                handler: Arc::clone(&self.handler),
                hostname: self.hostname.clone(),
                read_timeout: self.read_timeout,
            }),
            self.max_conns,
            Arc::clone(&self.signals),
        ));

        let result = self.accept_loop(&mut reload_rx, queue_tx).await;

        // Whatever ended the loop, finish the teardown handshake: the SIGHUP
        // task exits on the shutdown signal, the drain task on queue closure.
        self.signals.shutdown.send_replace(true);
        self.signals.closed.send_replace(true);
        if result.is_ok() {
            info!("listener closed");
        }
        result
    }

    async fn accept_loop(
        &self,
        reload_rx: &mut watch::Receiver<Arc<rustls::ServerConfig>>,
        queue: mpsc::Sender<Conn>,
    ) -> Result<(), Error> {
        let mut shutdown_rx = self.signals.shutdown.subscribe();

        // Outer loop: one iteration per listener. A SIGHUP-driven teardown is
        // not terminal, the next turn rebuilds with the latest TLS config.
        'outer: loop {
            let acceptor = TlsAcceptor::from(Arc::clone(&reload_rx.borrow_and_update()));
            let listener = TcpListener::bind(self.addr).await?;
            let local = listener.local_addr()?;
            self.signals.bound.send_replace(Some(local));
            info!(addr = %local, "accepting connections");

            loop {
                tokio::select! {
                    // Check shutdown first so it wins over a queued accept.
                    biased;

                    _ = async {
                        loop {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                            if shutdown_rx.changed().await.is_err() {
                                break;
                            }
                        }
                    } => {
                        break 'outer;
                    }

                    changed = reload_rx.changed() => {
                        if changed.is_ok() {
                            info!("tls configuration changed, rebuilding listener");
                        }
                        break;
                    }

                    res = listener.accept() => {
                        let (stream, peer) = match res {
                            Ok(pair) => pair,
                            Err(e) => {
                                // Rebuild the listener, as for a reload.
                                error!("accept error: {e}");
                                break;
                            }
                        };
                        debug!(peer = %peer, "connection accepted");
                        if queue.send((stream, peer, acceptor.clone())).await.is_err() {
                            error!("connection queue closed");
                            break 'outer;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Per-connection context shared by all worker tasks.
struct Worker {
    handler: ArcHandler,
    hostname: String,
    read_timeout: Duration,
}

/// Pops accepted sockets off the queue, acquires a concurrency permit per
/// socket and spawns the worker. Exits when the queue closes, then waits for
/// every in-flight worker before signalling drained.
async fn drain_queue(
    mut queue: mpsc::Receiver<Conn>,
    worker: Arc<Worker>,
    max_conns: usize,
    signals: Arc<Signals>,
) {
    let semaphore = Arc::new(Semaphore::new(max_conns));
    let mut tasks = JoinSet::new();

    while let Some((stream, peer, acceptor)) = queue.recv().await {
        // Reap finished workers so the JoinSet does not grow without bound.
        while tasks.try_join_next().is_some() {}

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let worker = Arc::clone(&worker);
        tasks.spawn(async move {
            handle_connection(stream, peer, acceptor, &worker).await;
            drop(permit);
        });
    }

    while tasks.join_next().await.is_some() {}
    debug!("all connections drained");
    signals.drained.send_replace(true);
}

/// Serves one connection: handshake, read, validate, dispatch, close.
///
/// One deadline covers the handshake and the request line. A handshake that
/// misses it gets nothing (there is no channel to answer on); a request line
/// that misses it gets `41`.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, acceptor: TlsAcceptor, worker: &Worker) {
    let deadline = Instant::now() + worker.read_timeout;

    let stream = match timeout_at(deadline, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(peer = %peer, "tls handshake failed: {e}");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "tls handshake timed out");
            return;
        }
    };

    let (reader, writer) = tokio::io::split(stream);
    let mut w = GeminiWriter::new(writer);

    match timeout_at(deadline, Request::read(reader, peer)).await {
        Ok(Ok(req)) => {
            if let Err(e) = worker.handler.serve(&mut w, &req).await {
                debug!(peer = %peer, "response write failed: {e}");
            }
        }
        Ok(Err(err)) => respond_with_error(&mut w, peer, &err, &worker.hostname).await,
        Err(_) => {
            debug!(peer = %peer, "request read timed out");
            if let Err(e) = w.write_header(Status::ServerUnavailable, "").await {
                debug!(peer = %peer, "timeout response failed: {e}");
            }
        }
    }

    if let Err(e) = w.close().await {
        debug!(peer = %peer, "connection close failed: {e}");
    }
    // The stream drops here: every exit path closes the connection once.
}

/// Writes the status line for a failed request.
///
/// Empty requests get no response and no log noise beyond debug: port
/// scanners and TLS probes produce them in bulk. Redirect "errors" carry a
/// relative target; it is made absolute against the configured hostname.
async fn respond_with_error<W>(w: &mut GeminiWriter<W>, peer: SocketAddr, err: &StatusError, hostname: &str)
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    if err.is_empty_request() {
        debug!(peer = %peer, "empty request ignored");
        return;
    }

    let status = err.status();
    let meta = if status.is_redirect() {
        let target = format!("gemini://{hostname}{}", err.meta().trim_start_matches('.'));
        info!(peer = %peer, status = %status, target = %target, "redirect");
        target
    } else {
        warn!(peer = %peer, status = %status, "request error: {err}");
        err.meta()
    };

    if let Err(e) = w.write_header(status, &meta).await {
        debug!(peer = %peer, "error response failed: {e}");
    }
}

/// Waits for SIGHUP and swaps in freshly loaded TLS material.
///
/// A reload failure aborts the process: serving with certificates that can
/// no longer be loaded is worse than a restart. The task exits on the
/// shutdown signal and acks so [`ShutdownHandle::shutdown`] can confirm it.
async fn sighup_task(
    loader: Loader,
    reload_tx: watch::Sender<Arc<rustls::ServerConfig>>,
    on_reload: Option<ReloadHook>,
    signals: Arc<Signals>,
) {
    let mut shutdown_rx = signals.shutdown.subscribe();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hup = match signal(SignalKind::hangup()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("sighup handler unavailable: {e}");
                None
            }
        };

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for(|&stop| stop) => break,

                () = recv_hangup(&mut hup) => {
                    info!("reloading tls configuration");
                    match loader() {
                        Ok(config) => {
                            reload_tx.send_replace(Arc::new(config));
                            if let Some(hook) = &on_reload {
                                hook();
                            }
                        }
                        Err(e) => {
                            error!("critical: failed to reload tls material: {e}");
                            std::process::exit(1);
                        }
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (&loader, &reload_tx, &on_reload);
        let _ = shutdown_rx.wait_for(|&stop| stop).await;
    }

    signals.sighup_done.send_replace(true);
}

#[cfg(unix)]
async fn recv_hangup(hup: &mut Option<tokio::signal::unix::Signal>) {
    match hup {
        Some(stream) => {
            if stream.recv().await.is_none() {
                // Signal stream ended; nothing more will arrive.
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Cloneable handle for stopping a running [`Server`].
#[derive(Clone)]
pub struct ShutdownHandle {
    signals: Arc<Signals>,
}

impl ShutdownHandle {
    /// The address the listener is currently bound to. Waits until the first
    /// bind completes; returns `None` only if the server is gone.
    pub async fn bound_addr(&self) -> Option<SocketAddr> {
        let mut rx = self.signals.bound.subscribe();
        let result = rx.wait_for(|addr| addr.is_some()).await;
        match result {
            Ok(addr) => *addr,
            Err(_) => None,
        }
    }

    /// Stops the server: breaks the accept loop immediately, then waits for
    /// the listener to close and in-flight connections to drain, both
    /// bounded by `deadline`. In-flight handlers still running when the
    /// deadline expires are truncated by process exit, not cancelled here.
    pub async fn shutdown(&self, deadline: Duration) {
        info!("shutdown requested");
        let started = Instant::now();
        self.signals.shutdown.send_replace(true);

        let mut closed = self.signals.closed.subscribe();
        if timeout(deadline, wait_true(&mut closed)).await.is_err() {
            warn!(elapsed = ?started.elapsed(), "shutdown deadline exceeded while closing listener");
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        let mut drained = self.signals.drained.subscribe();
        match timeout(remaining, wait_true(&mut drained)).await {
            Ok(()) => debug!("all clients exited"),
            Err(_) => warn!(
                elapsed = ?started.elapsed(),
                "shutdown deadline exceeded, truncating in-flight connections"
            ),
        }

        // Confirm the SIGHUP task exited; it reacts to the shutdown signal
        // directly, so this never waits long.
        let mut done = self.signals.sighup_done.subscribe();
        wait_true(&mut done).await;
        info!("shutdown complete");
    }
}

async fn wait_true(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|&done| done).await;
}
