//! Error types.
//!
//! Two layers. [`StatusError`] is an application-level failure that maps onto
//! a Gemini status line: the engine unwraps it, writes `<code> <message>` to
//! the peer, and carries on serving. [`Error`] surfaces infrastructure
//! failures that end the server: binding the listener or loading TLS
//! material. Nothing in between: a handler that cannot serve a request
//! expresses that as a status, never as a crash.

use std::io;

use crate::status::Status;
use crate::tls::TlsError;

/// Protocol-level error kinds, shared by the codec and the file handler.
///
/// The display strings are part of the wire surface: they become the META
/// field of error responses.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum GeminiError {
    #[error("gemini: empty request")]
    EmptyRequest,
    #[error("gemini: empty request URL")]
    EmptyRequestUrl,
    #[error("gemini: header too long")]
    HeaderTooLong,
    #[error("gemini: invalid utf-8")]
    InvalidUtf8,
    #[error("gemini: unknown protocol scheme")]
    UnknownScheme,
    #[error("gemini: empty host")]
    InvalidHost,
    #[error("gemini: path error")]
    InvalidPath,
    #[error("gemini: disabled/unsupported file type")]
    UnsupportedFileType,
    #[error("gemini: no index.gmi")]
    DirWithoutIndex,
}

/// A failure carrying the status code it should be reported as.
///
/// Redirects travel this path too: a missing-path request produces a
/// `RedirectPermanent` whose message is the redirect target. The engine
/// treats any `StatusError` uniformly, one status line, then close.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct StatusError {
    status: Status,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl StatusError {
    /// Wraps `err` with the status it maps to.
    pub fn new(status: Status, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self { status, source: err.into() }
    }

    /// A `StatusError` from a plain message, used where the message is
    /// constructed rather than propagated (redirect targets).
    pub fn message(status: Status, message: impl Into<String>) -> Self {
        Self { status, source: message.into().into() }
    }

    /// The status this error is reported as.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The META field of the resulting response line.
    pub fn meta(&self) -> String {
        self.source.to_string()
    }

    /// True for the empty-request marker. The engine suppresses these from
    /// logs and writes no response: port scanners and TLS probes produce them
    /// in bulk.
    pub fn is_empty_request(&self) -> bool {
        matches!(
            self.source.downcast_ref::<GeminiError>(),
            Some(GeminiError::EmptyRequest)
        )
    }
}

/// The error type returned by capsa's fallible setup operations.
///
/// Per-request failures are expressed as [`StatusError`] responses, not as
/// `Error`s. This type surfaces what cannot be answered on the wire: the
/// listener failed to bind, or the TLS material could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("tls: {0}")]
    Tls(#[from] TlsError),
}
