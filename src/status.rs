//! Gemini status codes as a typed enum.
//!
//! The registry is small enough to carry in full. Codes are two digits: the
//! first digit selects the response class (1x input, 2x success, 3x redirect,
//! 4x temporary failure, 5x permanent failure, 6x client certificates), the
//! second refines it. For `20` the META field is a MIME type; for redirects it
//! is the target URL; for everything else it is a human-readable message.

use std::fmt;

/// All registered Gemini status codes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    // ── 1x Input ──────────────────────────────────────────────────────────────
    Input,                     // 10
    SensitiveInput,            // 11

    // ── 2x Success ────────────────────────────────────────────────────────────
    Success,                   // 20

    // ── 3x Redirect ───────────────────────────────────────────────────────────
    RedirectTemporary,         // 30
    RedirectPermanent,         // 31

    // ── 4x Temporary failure ──────────────────────────────────────────────────
    TemporaryFailure,          // 40
    ServerUnavailable,         // 41
    CgiError,                  // 42
    ProxyError,                // 43
    SlowDown,                  // 44

    // ── 5x Permanent failure ──────────────────────────────────────────────────
    PermanentFailure,          // 50
    NotFound,                  // 51
    Gone,                      // 52
    ProxyRequestRefused,       // 53
    BadRequest,                // 59

    // ── 6x Client certificates ────────────────────────────────────────────────
    ClientCertificateRequired, // 60
    CertificateNotAuthorized,  // 61
    CertificateNotValid,       // 62
}

impl Status {
    /// Returns the two-digit wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Input                     => 10,
            Self::SensitiveInput            => 11,
            Self::Success                   => 20,
            Self::RedirectTemporary         => 30,
            Self::RedirectPermanent         => 31,
            Self::TemporaryFailure          => 40,
            Self::ServerUnavailable         => 41,
            Self::CgiError                  => 42,
            Self::ProxyError                => 43,
            Self::SlowDown                  => 44,
            Self::PermanentFailure          => 50,
            Self::NotFound                  => 51,
            Self::Gone                      => 52,
            Self::ProxyRequestRefused       => 53,
            Self::BadRequest                => 59,
            Self::ClientCertificateRequired => 60,
            Self::CertificateNotAuthorized  => 61,
            Self::CertificateNotValid       => 62,
        }
    }

    /// Parses a wire code back into a [`Status`]. Returns `None` for codes
    /// outside the registry.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            10 => Some(Self::Input),
            11 => Some(Self::SensitiveInput),
            20 => Some(Self::Success),
            30 => Some(Self::RedirectTemporary),
            31 => Some(Self::RedirectPermanent),
            40 => Some(Self::TemporaryFailure),
            41 => Some(Self::ServerUnavailable),
            42 => Some(Self::CgiError),
            43 => Some(Self::ProxyError),
            44 => Some(Self::SlowDown),
            50 => Some(Self::PermanentFailure),
            51 => Some(Self::NotFound),
            52 => Some(Self::Gone),
            53 => Some(Self::ProxyRequestRefused),
            59 => Some(Self::BadRequest),
            60 => Some(Self::ClientCertificateRequired),
            61 => Some(Self::CertificateNotAuthorized),
            62 => Some(Self::CertificateNotValid),
            _ => None,
        }
    }

    /// Whether this status belongs to one of the redirect classes.
    pub fn is_redirect(self) -> bool {
        matches!(self, Self::RedirectTemporary | Self::RedirectPermanent)
    }
}

impl From<Status> for u8 {
    fn from(s: Status) -> u8 {
        s.code()
    }
}

/// Formats as the two-digit wire code (e.g. `20`).
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
