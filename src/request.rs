//! Incoming request type and the request-line codec.
//!
//! A Gemini request is a single absolute URL terminated by CR LF. The codec
//! reads up to the first CR, then validates in a fixed order: non-empty,
//! length, UTF-8, URL shape, scheme, host, path cleanliness. The cleanliness
//! check runs against the path *as transmitted*, before URL normalisation can
//! resolve `..` segments, so traversal attempts are rejected rather than
//! silently rewritten.

use std::net::SocketAddr;

use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use url::Url;

use crate::error::{GeminiError, StatusError};
use crate::status::Status;
use crate::URL_MAX_BYTES;

/// An incoming Gemini request, immutable for the duration of one handler
/// invocation.
#[derive(Debug)]
pub struct Request {
    url: Url,
    path: String,
    raw: String,
    remote_addr: SocketAddr,
}

impl Request {
    /// Reads and validates one request line from `reader`.
    ///
    /// The read is bounded: at most [`URL_MAX_BYTES`] plus the CR LF slack is
    /// consumed, so an endless peer cannot hold the buffer hostage. EOF or an
    /// I/O error before the CR yields the empty-request marker, which the
    /// engine drops without a response.
    pub async fn read<R>(reader: R, remote_addr: SocketAddr) -> Result<Self, StatusError>
    where
        R: AsyncRead + Unpin,
    {
        let limit = (URL_MAX_BYTES + 2) as u64;
        let mut reader = BufReader::new(reader).take(limit);

        let mut buf = Vec::new();
        let n = reader
            .read_until(b'\r', &mut buf)
            .await
            .map_err(|_| StatusError::new(Status::TemporaryFailure, GeminiError::EmptyRequest))?;

        if n == 0 {
            return Err(StatusError::new(Status::TemporaryFailure, GeminiError::EmptyRequest));
        }
        if buf.last() != Some(&b'\r') && (n as u64) < limit {
            // Peer closed before terminating the line.
            return Err(StatusError::new(Status::TemporaryFailure, GeminiError::EmptyRequest));
        }

        Self::from_wire(&buf, remote_addr)
    }

    /// Parses and validates a raw request line (terminator and surrounding
    /// whitespace tolerated).
    pub fn parse(raw: &str, remote_addr: SocketAddr) -> Result<Self, StatusError> {
        Self::from_wire(raw.as_bytes(), remote_addr)
    }

    fn from_wire(buf: &[u8], remote_addr: SocketAddr) -> Result<Self, StatusError> {
        let line = parse_line(buf)?;
        let url = validate(line)?;
        let path = decode_path(url.path())?;

        Ok(Self { url, path, raw: String::from_utf8_lossy(buf).into_owned(), remote_addr })
    }

    /// The parsed request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The percent-decoded URL path. This is the routing and cache key.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The unmodified request line as received from the client.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Address of the peer that sent the request.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

// ── Request-line validation ───────────────────────────────────────────────────

/// Byte-level checks: non-empty, at most [`URL_MAX_BYTES`], valid UTF-8.
/// The order is observable on the wire (a 2000-byte garbage line reports
/// "too long", not "invalid utf-8").
fn parse_line(buf: &[u8]) -> Result<&str, StatusError> {
    let line = buf.trim_ascii();

    if line.is_empty() {
        return Err(StatusError::new(Status::BadRequest, GeminiError::EmptyRequestUrl));
    }
    if line.len() > URL_MAX_BYTES {
        return Err(StatusError::new(Status::BadRequest, GeminiError::HeaderTooLong));
    }

    std::str::from_utf8(line)
        .map_err(|_| StatusError::new(Status::BadRequest, GeminiError::InvalidUtf8))
}

/// URL-level checks, in the order scheme, host, path.
fn validate(line: &str) -> Result<Url, StatusError> {
    let url = match Url::parse(line) {
        Ok(url) => url,
        // A scheme-less request has nowhere to carry a host.
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Err(StatusError::new(Status::BadRequest, GeminiError::InvalidHost));
        }
        Err(e) => return Err(StatusError::new(Status::BadRequest, e)),
    };

    if url.scheme() != "gemini" {
        return Err(StatusError::new(Status::ProxyRequestRefused, GeminiError::UnknownScheme));
    }
    if url.host_str().unwrap_or("").is_empty() {
        return Err(StatusError::new(Status::BadRequest, GeminiError::InvalidHost));
    }

    if url.path().is_empty() {
        // A bare `gemini://host` is redirected to the explicit root form.
        // The message is the relative target; the engine makes it absolute.
        return Err(StatusError::message(Status::RedirectPermanent, "./"));
    }

    // The URL parser resolves dot segments, so the cleanliness check must see
    // the path exactly as the client sent it.
    let sent = decode_path(raw_path(line))?;
    let cleaned = clean(&sent);
    if cleaned != sent && cleaned != sent.trim_end_matches('/') {
        return Err(StatusError::new(Status::BadRequest, GeminiError::InvalidPath));
    }

    Ok(url)
}

/// Extracts the path portion of a request line without parsing it as a URL:
/// everything from the first `/` after the authority up to the query or
/// fragment.
fn raw_path(line: &str) -> &str {
    let rest = line.find("://").map_or(line, |i| &line[i + 3..]);
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    let rest = &rest[..end];
    rest.find('/').map_or("", |i| &rest[i..])
}

fn decode_path(path: &str) -> Result<String, StatusError> {
    percent_decode_str(path)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| StatusError::new(Status::BadRequest, GeminiError::InvalidUtf8))
}

/// Lexically cleans a path: collapses repeated slashes, resolves `.` and
/// `..` segments (a rooted `..` stops at the root), and drops any trailing
/// slash. The empty path cleans to `.`.
fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_owned();
    }
    let rooted = path.starts_with('/');

    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }

    let joined = out.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_owned(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}
