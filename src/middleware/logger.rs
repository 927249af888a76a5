//! Access-log middleware.
//!
//! One line per request, written to an [`AccessLog`] sink *after* the
//! response has been flushed to the wrapped writer, so a slow log sink never
//! delays the client. The line carries an optional host prefix, the client
//! IP, a timestamp, the request path, the status code, the body length in
//! bytes and the wall-clock duration of the handler.

use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use time::macros::format_description;
use time::OffsetDateTime;

use crate::handler::{ArcHandler, BoxFuture, Handler};
use crate::interceptor::Interceptor;
use crate::mux::Middleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// `02/Jan/2006:15:04:05 -0700`, the classic access-log timestamp.
const TIMESTAMP: &[time::format_description::FormatItem<'static>] = format_description!(
    "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

type OpenSink = Box<dyn Fn() -> io::Result<Box<dyn Write + Send>> + Send + Sync>;

/// Destination for access-log lines.
///
/// The sink sits behind a mutex: lines from concurrent connections appear
/// whole, never interleaved. When built with [`AccessLog::reopenable`] the
/// sink can be reopened in place, which is how SIGHUP log rotation works.
pub struct AccessLog {
    prefix: Option<String>,
    sink: Mutex<Box<dyn Write + Send>>,
    open: Option<OpenSink>,
}

impl AccessLog {
    /// Logs to standard output, optionally prefixing each line with a host
    /// name.
    pub fn stdout(prefix: Option<String>) -> Self {
        Self::to_writer(Box::new(io::stdout()), prefix)
    }

    /// Logs to an arbitrary writer.
    pub fn to_writer(sink: Box<dyn Write + Send>, prefix: Option<String>) -> Self {
        Self { prefix, sink: Mutex::new(sink), open: None }
    }

    /// Logs to a reopenable sink. `open` is invoked once now and again on
    /// every [`reopen`](Self::reopen) call.
    pub fn reopenable(open: OpenSink, prefix: Option<String>) -> io::Result<Self> {
        let sink = open()?;
        Ok(Self { prefix, sink: Mutex::new(sink), open: Some(open) })
    }

    /// Re-invokes the opener and swaps the sink, keeping the old one on
    /// failure. A no-op for non-reopenable sinks.
    pub fn reopen(&self) {
        let Some(open) = &self.open else { return };
        match open() {
            Ok(new_sink) => {
                *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = new_sink;
            }
            Err(e) => tracing::error!("access log reopen failed: {e}"),
        }
    }

    fn emit(&self, ip: IpAddr, path: &str, status: &str, bytes: usize, elapsed: Duration) {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let ts = now.format(TIMESTAMP).unwrap_or_default();
        let prefix = self
            .prefix
            .as_ref()
            .map(|p| format!("{p} "))
            .unwrap_or_default();

        let line = format!("{prefix}{ip} - - [{ts}] \"{path}\" {status} {bytes} {elapsed:?}\n");

        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        if sink.write_all(line.as_bytes()).and_then(|()| sink.flush()).is_err() {
            tracing::debug!("access log write failed");
        }
    }
}

struct LogHandler {
    log: Arc<AccessLog>,
    next: ArcHandler,
}

impl Handler for LogHandler {
    fn serve<'a>(
        &'a self,
        w: &'a mut dyn ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let start = Instant::now();

            let mut buffered = Interceptor::new(w);
            let served = self.next.serve(&mut buffered, req).await;
            let flushed = buffered.flush().await;

            let status = buffered
                .status()
                .map(|s| s.code().to_string())
                .unwrap_or_else(|| "-".to_owned());

            self.log.emit(
                req.remote_addr().ip(),
                req.path(),
                &status,
                buffered.body().len(),
                start.elapsed(),
            );

            served.and(flushed)
        })
    }
}

/// Access-logging middleware writing to `log`.
pub fn logger(log: Arc<AccessLog>) -> Middleware {
    Box::new(move |next| Arc::new(LogHandler { log: Arc::clone(&log), next }))
}
