//! Record crypto engine interface
//!
//! The session adapter never touches keys or ciphers itself. Everything
//! cryptographic goes through a [`RecordEngine`]: one handshake step at a time,
//! then one record at a time. Exactly one engine implementation is compiled in
//! as [`DefaultEngine`]; other engines can be plugged in through
//! [`TlsSession::with_engine`](super::TlsSession::with_engine).

use super::config::TlsConfig;
use super::error::{FailureCode, TlsError};
use super::vars::SessionInfo;

/// Record sizes fixed once the handshake completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSizes {
    /// Largest plaintext chunk carried by one record
    pub max_message: usize,
    /// Bytes reserved in front of the plaintext for the record header
    pub header: usize,
    /// Bytes reserved after the plaintext for the MAC/tag/padding
    pub trailer: usize,
}

impl StreamSizes {
    /// Size of the largest record the engine can produce
    pub fn max_record(&self) -> usize {
        self.header + self.max_message + self.trailer
    }
}

/// What the engine wants next during negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Input did not hold a complete message; nothing was consumed.
    /// Read more from the transport, append and present the buffer again.
    Incomplete,
    /// Input was consumed (except `extra`); send `output` and step again
    Continue,
    /// Negotiation finished with these record sizes
    Complete(StreamSizes),
}

/// Outcome of one handshake step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeStep {
    pub status: HandshakeStatus,
    /// Token to transmit in full before the next step (may be empty)
    pub output: Vec<u8>,
    /// Unconsumed bytes at the tail of the input buffer
    pub extra: usize,
}

impl HandshakeStep {
    pub fn incomplete() -> Self {
        HandshakeStep { status: HandshakeStatus::Incomplete, output: Vec::new(), extra: 0 }
    }
}

/// Outcome of one decrypt attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptStatus {
    /// One record was decrypted in place.
    ///
    /// Plaintext lives at `buf[offset..offset + len]`; the last `extra` bytes
    /// of the buffer belong to the next record and were left untouched.
    Decrypted { offset: usize, len: usize, extra: usize },
    /// The buffer does not yet hold a complete record; nothing was consumed
    Incomplete,
    /// The peer sent a close_notify alert
    Closed,
}

/// Single-record crypto engine driven by the session adapter
///
/// Dropping the engine destroys all crypto state.
pub trait RecordEngine {
    /// Advance the handshake with the bytes received so far
    fn step_handshake(&mut self, input: &[u8]) -> Result<HandshakeStep, FailureCode>;

    /// Decrypt the first record of `buf` in place
    ///
    /// A record may make the engine want to answer the peer; the answer is
    /// left for [`take_pending_output`](Self::take_pending_output).
    fn decrypt_record(&mut self, buf: &mut [u8]) -> Result<DecryptStatus, FailureCode>;

    /// Encrypt `record[sizes.header..sizes.header + plaintext_len]` in place
    ///
    /// `record` is exactly `header + plaintext_len + trailer` bytes long. The
    /// finished record is written contiguously from offset 0 and its length
    /// is returned. Anything else produced on the way goes to
    /// [`take_pending_output`](Self::take_pending_output).
    fn encrypt_record(
        &mut self,
        sizes: &StreamSizes,
        record: &mut [u8],
        plaintext_len: usize,
    ) -> Result<usize, FailureCode>;

    /// Take bytes the engine produced outside of `encrypt_record`
    ///
    /// Post-handshake messages such as a TLS 1.3 KeyUpdate reply end up here.
    /// They must reach the peer before any record encrypted afterwards.
    fn take_pending_output(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Produce a close_notify alert, if the engine supports one
    fn close_notify(&mut self) -> Result<Vec<u8>, FailureCode> {
        Ok(Vec::new())
    }

    /// Negotiated connection parameters
    fn info(&self) -> SessionInfo {
        SessionInfo::default()
    }
}

#[cfg(feature = "openssl")]
pub type DefaultEngine = super::openssl_engine::OpensslEngine;

#[cfg(not(feature = "openssl"))]
pub type DefaultEngine = Unavailable;

/// Start a handshake with the compiled-in engine
///
/// Fails with [`TlsError::UnsupportedBackend`] when no engine is compiled in.
/// No I/O happens here.
pub fn begin_handshake(config: &TlsConfig, hostname: &str) -> Result<DefaultEngine, TlsError> {
    #[cfg(feature = "openssl")]
    {
        super::openssl_engine::OpensslEngine::new(config, hostname)
    }

    #[cfg(not(feature = "openssl"))]
    {
        let _ = (config, hostname);
        Err(TlsError::UnsupportedBackend)
    }
}

/// Placeholder engine for builds without a TLS backend; cannot be constructed
#[cfg(not(feature = "openssl"))]
#[derive(Debug)]
pub enum Unavailable {}

#[cfg(not(feature = "openssl"))]
impl RecordEngine for Unavailable {
    fn step_handshake(&mut self, _input: &[u8]) -> Result<HandshakeStep, FailureCode> {
        match *self {}
    }

    fn decrypt_record(&mut self, _buf: &mut [u8]) -> Result<DecryptStatus, FailureCode> {
        match *self {}
    }

    fn encrypt_record(
        &mut self,
        _sizes: &StreamSizes,
        _record: &mut [u8],
        _plaintext_len: usize,
    ) -> Result<usize, FailureCode> {
        match *self {}
    }
}
