//! TLS session adapter
//!
//! This module layers TLS over a socket the caller has already connected. The
//! session never owns the socket: it borrows it, runs the handshake, then
//! turns plain `read`/`write` calls into encrypted records and back.
//!
//! # Architecture
//!
//! 1. `TlsConfig` holds client settings (verification, versions, ALPN, trust)
//! 2. `RecordEngine` does the cryptography, one handshake step or record at a time
//! 3. `TlsSession` owns the buffers and the state machine and drives the engine
//!
//! Exactly one engine is compiled in (OpenSSL, behind the `openssl` feature).
//! Builds without it still compile; every handshake then fails with
//! [`TlsError::UnsupportedBackend`].
//!
//! # Examples
//!
//! ```no_run
//! use tlstream::tls::TlsSession;
//! use std::io::{Read, Write};
//! use std::net::TcpStream;
//!
//! let mut tcp = TcpStream::connect("example.com:443").unwrap();
//! let mut session = TlsSession::init(&mut tcp, "example.com", true).unwrap();
//!
//! session.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
//! let mut buf = [0u8; 4096];
//! let n = session.read(&mut buf).unwrap();
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//!
//! session.close().unwrap();
//! ```
//!
//! ## Custom configuration
//!
//! ```no_run
//! use tlstream::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpStream;
//!
//! let config = TlsConfig::client()
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .alpn(&["http/1.1"])
//!     .ca_file("ca.pem")
//!     .verify_peer(true)
//!     .build()
//!     .unwrap();
//!
//! let mut tcp = TcpStream::connect("internal.test:443").unwrap();
//! let session = config.connect(&mut tcp, "internal.test").unwrap();
//! println!("negotiated {}", session.info().version);
//! ```

pub mod buffer;
pub mod builtin_cert;
pub mod cert;
pub mod config;
pub mod engine;
pub mod error;
mod handshake;
#[cfg(feature = "openssl")]
pub mod openssl_engine;
pub mod session;
pub mod vars;

#[cfg(test)]
pub(crate) mod mock;

pub use cert::CertInfo;
pub use config::{ClientConfigBuilder, TlsConfig, TlsVersion};
pub use engine::{DecryptStatus, DefaultEngine, HandshakeStatus, HandshakeStep, RecordEngine, StreamSizes};
pub use error::{FailureCode, TlsError};
pub use session::{SessionState, TlsSession};
pub use vars::SessionInfo;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
