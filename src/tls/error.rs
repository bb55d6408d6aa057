//! TLS error types
//!
//! `TlsError` is returned by every session and configuration operation.
//! `FailureCode` is the diagnostic a record engine attaches to a rejected
//! handshake or record; the well-known ones carry human-readable text.

use super::session::SessionState;
use std::fmt;

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailure(FailureCode),

    #[error("Record processing failed: {0}")]
    RecordFailure(FailureCode),

    #[error("No TLS backend available")]
    UnsupportedBackend,

    #[error("Operation not valid in state {0:?}")]
    InvalidState(SessionState),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[cfg(feature = "openssl")]
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

impl TlsError {
    /// Diagnostic code carried by handshake and record failures
    pub fn failure_code(&self) -> Option<&FailureCode> {
        match self {
            TlsError::HandshakeFailure(code) | TlsError::RecordFailure(code) => Some(code),
            _ => None,
        }
    }

    /// Human-readable description for well-known negotiation failures
    pub fn describe(&self) -> Option<&'static str> {
        self.failure_code().and_then(FailureCode::describe)
    }

    /// Whether the error invalidates the session it came from
    pub(crate) fn is_fatal(&self) -> bool {
        !matches!(self, TlsError::InvalidState(_))
    }
}

impl From<TlsError> for std::io::Error {
    fn from(err: TlsError) -> Self {
        use std::io::ErrorKind;

        match err {
            TlsError::Transport(e) => e,
            TlsError::ConnectionClosed => ErrorKind::UnexpectedEof.into(),
            TlsError::ProtocolViolation(_) | TlsError::RecordFailure(_) => {
                std::io::Error::new(ErrorKind::InvalidData, err)
            }
            TlsError::InvalidState(_) => std::io::Error::new(ErrorKind::NotConnected, err),
            TlsError::UnsupportedBackend => std::io::Error::new(ErrorKind::Unsupported, err),
            other => std::io::Error::new(ErrorKind::Other, other),
        }
    }
}

/// Diagnostic code reported by a record engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCode {
    /// Peer certificate chains to an authority that is not trusted
    UntrustedRoot,
    /// Peer certificate is outside its validity period
    CertificateExpired,
    /// Peer certificate signature does not verify
    BadSignature,
    /// No protocol version in common with the peer
    UnsupportedVersion,
    /// Any other engine-specific failure
    Engine { code: u64, reason: String },
}

impl FailureCode {
    /// Get the human-readable text for well-known codes
    pub fn describe(&self) -> Option<&'static str> {
        match self {
            FailureCode::UntrustedRoot => Some(
                "The website's SSL certificate was issued by an authority that is not trusted",
            ),
            FailureCode::CertificateExpired => Some("The website's SSL certificate has expired"),
            FailureCode::BadSignature => {
                Some("The signature of the website's SSL certificate cannot be verified")
            }
            FailureCode::UnsupportedVersion => {
                Some("The website uses an incompatible SSL/TLS version")
            }
            FailureCode::Engine { .. } => None,
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.describe(), self) {
            (Some(text), _) => f.write_str(text),
            (None, FailureCode::Engine { code, reason }) => {
                write!(f, "{} (code {:#x})", reason, code)
            }
            (None, other) => write!(f, "{:?}", other),
        }
    }
}
