//! TLS handshake negotiation
//!
//! Drives the engine's handshake one step at a time. Everything received so
//! far is presented as a single input token; the engine says whether it needs
//! more bytes, has a token to send back, or is done. Unconsumed bytes the
//! engine reports are kept at the front of the buffer for the next step.

use super::buffer::IncomingBuffer;
use super::engine::{HandshakeStatus, RecordEngine, StreamSizes};
use super::error::TlsError;
use super::session::send_all;
use log::{debug, trace};
use std::io::{Read, Write};

/// Upper bound on handshake rounds without progress from the peer
const MAX_HANDSHAKE_ROUNDS: usize = 64;

/// Run the handshake to completion
///
/// On success the buffer holds any bytes that arrived after the final
/// handshake message; they belong to the first application records.
pub(crate) fn negotiate<S, E>(
    socket: &mut S,
    engine: &mut E,
    incoming: &mut IncomingBuffer,
) -> Result<StreamSizes, TlsError>
where
    S: Read + Write + ?Sized,
    E: RecordEngine + ?Sized,
{
    let mut rounds = 0;

    loop {
        let step = engine
            .step_handshake(incoming.filled())
            .map_err(TlsError::HandshakeFailure)?;

        trace!(
            "handshake round {}: input={} output={} extra={} status={:?}",
            rounds,
            incoming.len(),
            step.output.len(),
            step.extra,
            step.status
        );

        if step.status == HandshakeStatus::Incomplete {
            // Nothing consumed: wait for the rest of the message
            incoming.fill_from(socket)?;
            rounds = 0;
            continue;
        }

        incoming.retain_tail(step.extra)?;

        if !step.output.is_empty() {
            send_all(socket, &step.output)?;
        }

        if let HandshakeStatus::Complete(sizes) = step.status {
            debug!(
                "handshake complete: max_message={} header={} trailer={} pending={}",
                sizes.max_message,
                sizes.header,
                sizes.trailer,
                incoming.len()
            );
            return Ok(sizes);
        }

        rounds += 1;
        if rounds > MAX_HANDSHAKE_ROUNDS {
            return Err(TlsError::ProtocolViolation(format!(
                "handshake made no progress after {} rounds",
                MAX_HANDSHAKE_ROUNDS
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::engine::{DecryptStatus, HandshakeStep};
    use crate::tls::error::FailureCode;
    use crate::tls::mock::{self, MockEngine, ScriptedSocket};

    #[test]
    fn test_handshake_single_round() {
        let mut socket = ScriptedSocket::new(mock::server_welcome());
        let mut engine = MockEngine::new();
        let mut incoming = IncomingBuffer::new();

        let sizes = negotiate(&mut socket, &mut engine, &mut incoming).unwrap();

        assert_eq!(sizes, mock::SIZES);
        assert!(incoming.is_empty());
        // ClientHello then Finished
        let sent = mock::parse_records(socket.written());
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (mock::HANDSHAKE, b"hello".to_vec()));
        assert_eq!(sent[1], (mock::HANDSHAKE, b"finished".to_vec()));
    }

    #[test]
    fn test_handshake_multi_round() {
        let mut wire = mock::record(mock::HANDSHAKE, b"retry");
        wire.extend(mock::server_welcome());
        let mut socket = ScriptedSocket::new(wire).with_read_chunk(3);
        let mut engine = MockEngine::new();
        let mut incoming = IncomingBuffer::new();

        negotiate(&mut socket, &mut engine, &mut incoming).unwrap();

        let sent: Vec<_> = mock::parse_records(socket.written())
            .into_iter()
            .map(|(_, payload)| payload)
            .collect();
        assert_eq!(sent, vec![b"hello".to_vec(), b"hello again".to_vec(), b"finished".to_vec()]);
    }

    #[test]
    fn test_handshake_output_survives_partial_writes() {
        let mut wire = mock::record(mock::HANDSHAKE, b"retry");
        wire.extend(mock::server_welcome());
        let mut socket = ScriptedSocket::new(wire).with_write_chunk(1);
        let mut engine = MockEngine::new();
        let mut incoming = IncomingBuffer::new();

        negotiate(&mut socket, &mut engine, &mut incoming).unwrap();

        let mut expected = mock::record(mock::HANDSHAKE, b"hello");
        expected.extend(mock::record(mock::HANDSHAKE, b"hello again"));
        expected.extend(mock::record(mock::HANDSHAKE, b"finished"));
        assert_eq!(socket.written(), &expected[..]);
    }

    #[test]
    fn test_handshake_keeps_extra_bytes() {
        let mut wire = mock::server_welcome();
        let app = mock::record(mock::APPLICATION_DATA, b"early");
        wire.extend_from_slice(&app);
        let mut socket = ScriptedSocket::new(wire);
        let mut engine = MockEngine::new();
        let mut incoming = IncomingBuffer::new();

        negotiate(&mut socket, &mut engine, &mut incoming).unwrap();

        assert_eq!(incoming.filled(), &app[..]);
        assert_eq!(
            engine.decrypt_record(incoming.filled_mut()).unwrap(),
            DecryptStatus::Decrypted { offset: mock::HEADER_LEN, len: 5, extra: 0 }
        );
    }

    #[test]
    fn test_handshake_rejected() {
        let mut socket = ScriptedSocket::new(mock::record(mock::HANDSHAKE, b"reject"));
        let mut engine = MockEngine::new();
        let mut incoming = IncomingBuffer::new();

        let err = negotiate(&mut socket, &mut engine, &mut incoming).unwrap_err();
        assert!(matches!(err, TlsError::HandshakeFailure(FailureCode::UntrustedRoot)));
    }

    #[test]
    fn test_handshake_peer_closes() {
        let mut socket = ScriptedSocket::new(mock::server_welcome()[..4].to_vec());
        let mut engine = MockEngine::new();
        let mut incoming = IncomingBuffer::new();

        let err = negotiate(&mut socket, &mut engine, &mut incoming).unwrap_err();
        assert!(matches!(err, TlsError::ConnectionClosed));
    }

    #[test]
    fn test_handshake_overflow() {
        // Header announces a record larger than the buffer can ever hold
        let mut wire = vec![mock::HANDSHAKE, 0xff, 0xff];
        wire.extend(vec![0u8; 64]);
        let mut socket = ScriptedSocket::new(wire);
        let mut engine = MockEngine::new();
        let mut incoming = IncomingBuffer::with_capacity(32);

        let err = negotiate(&mut socket, &mut engine, &mut incoming).unwrap_err();
        assert!(matches!(err, TlsError::ProtocolViolation(_)));
        assert_eq!(incoming.len(), 32);
    }

    /// Engine that keeps asking to continue without ever finishing
    struct Chatty;

    impl RecordEngine for Chatty {
        fn step_handshake(&mut self, _input: &[u8]) -> Result<HandshakeStep, FailureCode> {
            Ok(HandshakeStep { status: HandshakeStatus::Continue, output: b"?".to_vec(), extra: 0 })
        }

        fn decrypt_record(&mut self, _buf: &mut [u8]) -> Result<DecryptStatus, FailureCode> {
            Ok(DecryptStatus::Incomplete)
        }

        fn encrypt_record(
            &mut self,
            _sizes: &StreamSizes,
            _record: &mut [u8],
            _plaintext_len: usize,
        ) -> Result<usize, FailureCode> {
            Ok(0)
        }
    }

    #[test]
    fn test_handshake_without_progress() {
        let mut socket = ScriptedSocket::new(Vec::new());
        let mut incoming = IncomingBuffer::new();

        let err = negotiate(&mut socket, &mut Chatty, &mut incoming).unwrap_err();
        assert!(matches!(err, TlsError::ProtocolViolation(_)));
    }
}
