//! OpenSSL record engine
//!
//! OpenSSL runs over an in-memory pipe instead of the socket. Each engine call
//! loads exactly the bytes the adapter hands over into the pipe, lets OpenSSL
//! consume them, then reports what is left unread and what was written. This
//! gives OpenSSL the same "whole records in, whole records out" contract as
//! the other engines: a partial record is never fed, so a buffer reported as
//! incomplete has not been consumed.

use super::config::TlsConfig;
use super::engine::{DecryptStatus, HandshakeStatus, HandshakeStep, RecordEngine, StreamSizes};
use super::error::{FailureCode, TlsError};
use super::vars::SessionInfo;
use log::{debug, trace};
use openssl::ssl::{ErrorCode, SslStream, SslVersion};
use openssl::x509::X509VerifyResult;
use std::io::{self, Read, Write};

/// Content type, legacy version and length
const RECORD_HEADER_LEN: usize = 5;

/// Largest plaintext fragment in one record
pub const MAX_FRAGMENT: usize = 16384;

const AEAD_TAG_LEN: usize = 16;
const EXPLICIT_NONCE_LEN: usize = 8;
const CBC_BLOCK_LEN: usize = 16;
const MAX_MAC_LEN: usize = 64;

// X509_V_ERR_* values from x509_vfy.h
const X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT: i32 = 2;
const X509_V_ERR_UNABLE_TO_DECRYPT_CERT_SIGNATURE: i32 = 4;
const X509_V_ERR_UNABLE_TO_DECODE_ISSUER_PUBLIC_KEY: i32 = 6;
const X509_V_ERR_CERT_SIGNATURE_FAILURE: i32 = 7;
const X509_V_ERR_CERT_HAS_EXPIRED: i32 = 10;
const X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT: i32 = 18;
const X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN: i32 = 19;
const X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY: i32 = 20;
const X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE: i32 = 21;
const X509_V_ERR_CERT_UNTRUSTED: i32 = 27;

/// In-memory transport between OpenSSL and the session adapter
#[derive(Debug, Default)]
struct MemoryPipe {
    incoming: Vec<u8>,
    read_pos: usize,
    outgoing: Vec<u8>,
}

impl MemoryPipe {
    /// Replace the readable contents
    fn load(&mut self, bytes: &[u8]) {
        self.incoming.clear();
        self.incoming.extend_from_slice(bytes);
        self.read_pos = 0;
    }

    fn unread(&self) -> usize {
        self.incoming.len() - self.read_pos
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }
}

impl Read for MemoryPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = &self.incoming[self.read_pos..];
        if available.is_empty() {
            // Surfaces as WANT_READ from OpenSSL
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl Write for MemoryPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Total length of the first record in `buf`, if it is complete
fn record_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < RECORD_HEADER_LEN {
        return None;
    }
    let body = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let total = RECORD_HEADER_LEN + body;
    (buf.len() >= total).then_some(total)
}

/// Start of the last complete record in `buf`
fn last_record_start(buf: &[u8]) -> usize {
    let mut pos = 0;
    while let Some(len) = record_len(&buf[pos..]) {
        if pos + len == buf.len() {
            break;
        }
        pos += len;
    }
    pos
}

/// Length of the leading run of complete records in `buf`
fn complete_records_len(buf: &[u8]) -> usize {
    let mut pos = 0;
    while let Some(len) = record_len(&buf[pos..]) {
        pos += len;
    }
    pos
}

fn is_version_mismatch(reason: &str) -> bool {
    reason.contains("protocol version")
        || reason.contains("unsupported protocol")
        || reason.contains("wrong version number")
        || reason.contains("no protocols available")
        || reason.contains("version too low")
}

/// Map an OpenSSL error to a diagnostic code
fn classify(err: &openssl::ssl::Error) -> FailureCode {
    if let Some(stack) = err.ssl_error() {
        let errors = stack.errors();
        if errors.iter().filter_map(|e| e.reason()).any(is_version_mismatch) {
            return FailureCode::UnsupportedVersion;
        }
        if let Some(first) = errors.first() {
            return FailureCode::Engine {
                code: first.code() as u64,
                reason: first.reason().unwrap_or("unknown error").to_string(),
            };
        }
    }

    FailureCode::Engine {
        code: err.code().as_raw() as u64,
        reason: err.to_string(),
    }
}

/// Map a certificate verification result to a diagnostic code
fn verify_failure(result: X509VerifyResult) -> FailureCode {
    match result.as_raw() {
        X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT
        | X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT
        | X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN
        | X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY
        | X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE
        | X509_V_ERR_CERT_UNTRUSTED => FailureCode::UntrustedRoot,
        X509_V_ERR_CERT_HAS_EXPIRED => FailureCode::CertificateExpired,
        X509_V_ERR_UNABLE_TO_DECRYPT_CERT_SIGNATURE
        | X509_V_ERR_UNABLE_TO_DECODE_ISSUER_PUBLIC_KEY
        | X509_V_ERR_CERT_SIGNATURE_FAILURE => FailureCode::BadSignature,
        raw => FailureCode::Engine {
            code: raw as u64,
            reason: result.error_string().to_string(),
        },
    }
}

/// Record engine backed by OpenSSL
pub struct OpensslEngine {
    stream: SslStream<MemoryPipe>,
    verify_peer: bool,
    /// Post-handshake output waiting to be sent
    pending: Vec<u8>,
}

impl OpensslEngine {
    /// Prepare a client handshake for `hostname`
    pub(crate) fn new(config: &TlsConfig, hostname: &str) -> Result<Self, TlsError> {
        let servername = config.servername(hostname);

        let mut connect = config.connector.configure()?;
        if !config.verify_peer {
            connect.set_verify_hostname(false);
        }
        let ssl = connect.into_ssl(servername)?;
        let stream = SslStream::new(ssl, MemoryPipe::default())?;

        debug!(
            "OpenSSL engine ready for {} (verify_peer={})",
            servername, config.verify_peer
        );

        Ok(OpensslEngine {
            stream,
            verify_peer: config.verify_peer,
            pending: Vec::new(),
        })
    }

    fn handshake_failure(&self, err: &openssl::ssl::Error) -> FailureCode {
        if self.verify_peer {
            let verify = self.stream.ssl().verify_result();
            if verify != X509VerifyResult::OK {
                return verify_failure(verify);
            }
        }
        classify(err)
    }

    /// Record overheads for the negotiated version and cipher
    fn stream_sizes(&self) -> StreamSizes {
        let ssl = self.stream.ssl();
        let tls13 = ssl.version2() == Some(SslVersion::TLS1_3);
        let cipher = ssl.current_cipher().map(|c| c.name()).unwrap_or("");

        let explicit_nonce = !tls13 && (cipher.contains("GCM") || cipher.contains("CCM"));
        let aead = tls13 || explicit_nonce || cipher.contains("CHACHA20");

        let header = RECORD_HEADER_LEN
            + if explicit_nonce {
                EXPLICIT_NONCE_LEN
            } else if !aead {
                CBC_BLOCK_LEN
            } else {
                0
            };

        let trailer = if tls13 {
            // inner content type byte
            AEAD_TAG_LEN + 1
        } else if aead {
            AEAD_TAG_LEN
        } else {
            MAX_MAC_LEN + CBC_BLOCK_LEN
        };

        StreamSizes { max_message: MAX_FRAGMENT, header, trailer }
    }
}

impl RecordEngine for OpensslEngine {
    fn step_handshake(&mut self, input: &[u8]) -> Result<HandshakeStep, FailureCode> {
        let fed = complete_records_len(input);
        self.stream.get_mut().load(&input[..fed]);

        let result = self.stream.connect();

        let output = self.stream.get_mut().take_output();
        let extra = self.stream.get_ref().unread() + (input.len() - fed);
        // Unread bytes stay with the caller
        self.stream.get_mut().load(&[]);

        let status = match result {
            Ok(()) => HandshakeStatus::Complete(self.stream_sizes()),
            Err(ref e) if e.code() == ErrorCode::WANT_READ => {
                if fed == 0 && output.is_empty() {
                    return Ok(HandshakeStep::incomplete());
                }
                HandshakeStatus::Continue
            }
            Err(e) => return Err(self.handshake_failure(&e)),
        };

        trace!(
            "handshake step: fed={} output={} extra={} status={:?}",
            fed,
            output.len(),
            extra,
            status
        );

        Ok(HandshakeStep { status, output, extra })
    }

    fn decrypt_record(&mut self, buf: &mut [u8]) -> Result<DecryptStatus, FailureCode> {
        let record = match record_len(buf) {
            Some(len) => len,
            None => return Ok(DecryptStatus::Incomplete),
        };
        let extra = buf.len() - record;

        self.stream.get_mut().load(&buf[..record]);
        // Plaintext is never longer than the record it came from
        let result = self.stream.ssl_read(&mut buf[..record]);
        self.stream.get_mut().load(&[]);

        // e.g. the answer to a KeyUpdate that requested one
        let output = self.stream.get_mut().take_output();
        if !output.is_empty() {
            trace!("record produced {} bytes of engine output", output.len());
            self.pending.extend_from_slice(&output);
        }

        match result {
            Ok(0) => Ok(DecryptStatus::Closed),
            Ok(len) => Ok(DecryptStatus::Decrypted { offset: 0, len, extra }),
            // Record carried no application data (e.g. a session ticket)
            Err(ref e) if e.code() == ErrorCode::WANT_READ => {
                Ok(DecryptStatus::Decrypted { offset: 0, len: 0, extra })
            }
            Err(ref e) if e.code() == ErrorCode::ZERO_RETURN => Ok(DecryptStatus::Closed),
            Err(e) => Err(classify(&e)),
        }
    }

    fn encrypt_record(
        &mut self,
        sizes: &StreamSizes,
        record: &mut [u8],
        plaintext_len: usize,
    ) -> Result<usize, FailureCode> {
        let stale = self.stream.get_mut().take_output();
        self.pending.extend_from_slice(&stale);

        let plaintext = &record[sizes.header..sizes.header + plaintext_len];
        let written = self.stream.ssl_write(plaintext).map_err(|e| classify(&e))?;
        if written != plaintext_len {
            return Err(FailureCode::Engine {
                code: 0,
                reason: format!("short record write: {} of {} bytes", written, plaintext_len),
            });
        }

        let mut output = self.stream.get_mut().take_output();
        // A deferred handshake message may precede the application record
        let start = last_record_start(&output);
        if start > 0 {
            self.pending.extend(output.drain(..start));
        }

        if output.len() > record.len() {
            return Err(FailureCode::Engine {
                code: 0,
                reason: format!(
                    "record of {} bytes exceeds the {} bytes reserved",
                    output.len(),
                    record.len()
                ),
            });
        }

        record[..output.len()].copy_from_slice(&output);
        Ok(output.len())
    }

    fn take_pending_output(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.pending);
        out.extend(self.stream.get_mut().take_output());
        out
    }

    fn close_notify(&mut self) -> Result<Vec<u8>, FailureCode> {
        match self.stream.shutdown() {
            Ok(_) => {}
            // close_notify is written; the peer's reply is not awaited
            Err(ref e) if e.code() == ErrorCode::WANT_READ => {}
            Err(e) => return Err(classify(&e)),
        }
        let mut out = std::mem::take(&mut self.pending);
        out.extend(self.stream.get_mut().take_output());
        Ok(out)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo::from_ssl(self.stream.ssl())
    }
}
