//! TLS configuration
//!
//! This module provides the client configuration builder. Everything a
//! session needs to know before the handshake (peer verification, protocol
//! versions, ciphers, ALPN, trust anchors) lives in an immutable [`TlsConfig`]
//! that is passed into each session explicitly.

use super::engine;
use super::error::TlsError;
use super::session::TlsSession;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// SSL 3.0 (deprecated, rarely used)
    Ssl3,
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "SSLV3" | "SSL3" => Ok(TlsVersion::Ssl3),
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    #[cfg(feature = "openssl")]
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Ssl3 => SslVersion::SSL3,
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS client configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) verify_peer: bool,
    pub(crate) servername: Option<String>,
    pub(crate) min_version: Option<TlsVersion>,
    pub(crate) max_version: Option<TlsVersion>,
    pub(crate) alpn: Vec<String>,
    #[cfg(feature = "openssl")]
    pub(crate) connector: openssl::ssl::SslConnector,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Whether the peer certificate chain and hostname are verified
    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    /// Name sent in SNI and checked against the certificate
    ///
    /// Falls back to the hostname given to [`connect`](Self::connect).
    pub fn servername<'a>(&'a self, hostname: &'a str) -> &'a str {
        self.servername.as_deref().unwrap_or(hostname)
    }

    /// Negotiated version bounds
    pub fn version_range(&self) -> (Option<TlsVersion>, Option<TlsVersion>) {
        (self.min_version, self.max_version)
    }

    /// Configured ALPN protocols, in preference order
    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn
    }

    /// Run the handshake over an already-connected socket
    ///
    /// The socket stays owned by the caller; neither a failed handshake nor
    /// closing the session closes it.
    pub fn connect<'a, S: Read + Write + ?Sized>(
        &self,
        socket: &'a mut S,
        hostname: &str,
    ) -> Result<TlsSession<'a, S>, TlsError> {
        let engine = engine::begin_handshake(self, hostname)?;
        TlsSession::with_engine(socket, engine)
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("verify_peer", &self.verify_peer)
            .field("servername", &self.servername)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("alpn", &self.alpn)
            .finish()
    }
}

/// Client configuration builder
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    verify_peer: bool,
    servername: Option<String>,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
    ciphersuites: Option<String>,
    alpn: Vec<String>,
    ca_files: Vec<PathBuf>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        // Default: don't verify peer (for testing)
        ClientConfigBuilder::default()
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.min_version = Some(version);
        self.max_version = Some(version);
        self
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Self {
        self.cipher_list = Some(ciphers.to_string());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: &str) -> Self {
        self.ciphersuites = Some(ciphers.to_string());
        self
    }

    /// Set ALPN protocols
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Override the SNI servername (defaults to the connect hostname)
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Trust the certificates in a PEM file in addition to the system store
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ca_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "Minimum version {} is above maximum version {}",
                    min.as_str(),
                    max.as_str()
                )));
            }
        }

        for proto in &self.alpn {
            if proto.is_empty() || proto.len() > 255 {
                return Err(TlsError::InvalidConfig(format!(
                    "ALPN protocol name must be 1-255 bytes: {:?}",
                    proto
                )));
            }
        }

        #[cfg(feature = "openssl")]
        let connector = self.build_connector()?;

        Ok(TlsConfig {
            verify_peer: self.verify_peer,
            servername: self.servername,
            min_version: self.min_version,
            max_version: self.max_version,
            alpn: self.alpn,
            #[cfg(feature = "openssl")]
            connector,
        })
    }

    #[cfg(feature = "openssl")]
    fn build_connector(&self) -> Result<openssl::ssl::SslConnector, TlsError> {
        use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        if let Some(min) = self.min_version {
            builder.set_min_proto_version(Some(min.to_openssl_version()))?;
        }
        if let Some(max) = self.max_version {
            builder.set_max_proto_version(Some(max.to_openssl_version()))?;
        }
        if let Some(ref ciphers) = self.cipher_list {
            builder.set_cipher_list(ciphers)?;
        }
        if let Some(ref ciphers) = self.ciphersuites {
            builder.set_ciphersuites(ciphers)?;
        }

        if !self.alpn.is_empty() {
            // Encode ALPN protocols (length-prefixed)
            let mut alpn_bytes = Vec::new();
            for proto in &self.alpn {
                alpn_bytes.push(proto.len() as u8);
                alpn_bytes.extend_from_slice(proto.as_bytes());
            }
            builder.set_alpn_protos(&alpn_bytes)?;
        }

        for path in &self.ca_files {
            builder.set_ca_file(path).map_err(|e| {
                TlsError::Certificate(format!("Failed to load CA file {}: {}", path.display(), e))
            })?;
        }

        builder.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        Ok(builder.build())
    }
}
