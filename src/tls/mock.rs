//! Scripted engine and socket for unit tests
//!
//! `MockEngine` frames records as `[type, len_hi, len_lo] payload checksum`,
//! with the payload XOR-masked and a 16-bit sum of the plaintext as trailer.
//! Its handshake is a fixed script: send "hello", accept "welcome" (answer
//! "finished"), "retry" (answer "hello again") or "reject" (fail).
//!
//! Once established, a handshake record "ping" queues a "pong" reply at once,
//! and "rekey" makes the next encryption queue a "rekeyed" message, the way
//! OpenSSL defers a KeyUpdate until it writes.

use super::engine::{DecryptStatus, HandshakeStatus, HandshakeStep, RecordEngine, StreamSizes};
use super::error::FailureCode;
use std::cell::Cell;
use std::io::{self, Read, Write};
use std::rc::Rc;

pub const HANDSHAKE: u8 = 0x16;
pub const APPLICATION_DATA: u8 = 0x17;
pub const ALERT: u8 = 0x15;

pub const HEADER_LEN: usize = 3;
pub const TRAILER_LEN: usize = 2;
pub const SIZES: StreamSizes = StreamSizes { max_message: 16, header: HEADER_LEN, trailer: TRAILER_LEN };

const MASK: u8 = 0x5a;

fn checksum(plaintext: &[u8]) -> [u8; 2] {
    plaintext
        .iter()
        .fold(0u16, |sum, b| sum.wrapping_add(*b as u16))
        .to_be_bytes()
}

/// Encode one record the way the peer would
pub fn record(kind: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut out = vec![kind, (len >> 8) as u8, len as u8];
    out.extend(payload.iter().map(|b| b ^ MASK));
    out.extend_from_slice(&checksum(payload));
    out
}

/// Server's handshake acceptance
pub fn server_welcome() -> Vec<u8> {
    record(HANDSHAKE, b"welcome")
}

/// Decode the first record without touching the input
fn parse_first(buf: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
    let total = HEADER_LEN + len + TRAILER_LEN;
    if buf.len() < total {
        return None;
    }
    let payload = buf[HEADER_LEN..HEADER_LEN + len].iter().map(|b| b ^ MASK).collect();
    Some((buf[0], payload, total))
}

/// Decode every record in `wire`; panics on trailing garbage
pub fn parse_records(wire: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < wire.len() {
        let (kind, payload, total) = parse_first(&wire[pos..]).expect("truncated record on the wire");
        records.push((kind, payload));
        pos += total;
    }
    records
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    AwaitServer,
    Established,
}

#[derive(Debug)]
pub struct MockEngine {
    stage: Stage,
    drops: Rc<Cell<usize>>,
    pending: Vec<u8>,
    rekey_on_write: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_drop_counter(Rc::new(Cell::new(0)))
    }

    /// Engine that bumps `drops` when destroyed
    pub fn with_drop_counter(drops: Rc<Cell<usize>>) -> Self {
        MockEngine { stage: Stage::Start, drops, pending: Vec::new(), rekey_on_write: false }
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl RecordEngine for MockEngine {
    fn step_handshake(&mut self, input: &[u8]) -> Result<HandshakeStep, FailureCode> {
        match self.stage {
            Stage::Start => {
                self.stage = Stage::AwaitServer;
                Ok(HandshakeStep {
                    status: HandshakeStatus::Continue,
                    output: record(HANDSHAKE, b"hello"),
                    extra: input.len(),
                })
            }
            Stage::AwaitServer => {
                let (kind, payload, total) = match parse_first(input) {
                    Some(parsed) => parsed,
                    None => return Ok(HandshakeStep::incomplete()),
                };
                let extra = input.len() - total;

                match (kind, payload.as_slice()) {
                    (HANDSHAKE, b"welcome") => {
                        self.stage = Stage::Established;
                        Ok(HandshakeStep {
                            status: HandshakeStatus::Complete(SIZES),
                            output: record(HANDSHAKE, b"finished"),
                            extra,
                        })
                    }
                    (HANDSHAKE, b"retry") => Ok(HandshakeStep {
                        status: HandshakeStatus::Continue,
                        output: record(HANDSHAKE, b"hello again"),
                        extra,
                    }),
                    (HANDSHAKE, b"reject") => Err(FailureCode::UntrustedRoot),
                    _ => Err(FailureCode::Engine {
                        code: 1,
                        reason: "unexpected handshake message".to_string(),
                    }),
                }
            }
            Stage::Established => Err(FailureCode::Engine {
                code: 2,
                reason: "handshake already complete".to_string(),
            }),
        }
    }

    fn decrypt_record(&mut self, buf: &mut [u8]) -> Result<DecryptStatus, FailureCode> {
        let (kind, payload, total) = match parse_first(buf) {
            Some(parsed) => parsed,
            None => return Ok(DecryptStatus::Incomplete),
        };
        let extra = buf.len() - total;
        let len = payload.len();

        if buf[HEADER_LEN + len..total] != checksum(&payload) {
            return Err(FailureCode::Engine { code: 3, reason: "bad record checksum".to_string() });
        }

        match kind {
            ALERT => Ok(DecryptStatus::Closed),
            HANDSHAKE => {
                match payload.as_slice() {
                    b"ping" => self.pending.extend(record(HANDSHAKE, b"pong")),
                    b"rekey" => self.rekey_on_write = true,
                    _ => {}
                }
                Ok(DecryptStatus::Decrypted { offset: HEADER_LEN, len: 0, extra })
            }
            _ => {
                buf[HEADER_LEN..HEADER_LEN + len].copy_from_slice(&payload);
                Ok(DecryptStatus::Decrypted { offset: HEADER_LEN, len, extra })
            }
        }
    }

    fn encrypt_record(
        &mut self,
        sizes: &StreamSizes,
        record: &mut [u8],
        plaintext_len: usize,
    ) -> Result<usize, FailureCode> {
        assert_eq!(record.len(), sizes.header + plaintext_len + sizes.trailer);

        if std::mem::take(&mut self.rekey_on_write) {
            self.pending.extend(crate::tls::mock::record(HANDSHAKE, b"rekeyed"));
        }

        let body = HEADER_LEN..HEADER_LEN + plaintext_len;
        let sum = checksum(&record[body.clone()]);
        record[0] = APPLICATION_DATA;
        record[1..HEADER_LEN].copy_from_slice(&(plaintext_len as u16).to_be_bytes());
        record[body.clone()].iter_mut().for_each(|b| *b ^= MASK);
        record[body.end..body.end + TRAILER_LEN].copy_from_slice(&sum);

        Ok(HEADER_LEN + plaintext_len + TRAILER_LEN)
    }

    fn take_pending_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    fn close_notify(&mut self) -> Result<Vec<u8>, FailureCode> {
        Ok(record(ALERT, b"close"))
    }
}

/// In-memory socket replaying a fixed byte stream
#[derive(Debug, Default)]
pub struct ScriptedSocket {
    incoming: Vec<u8>,
    pos: usize,
    read_chunk: Option<usize>,
    write_chunk: Option<usize>,
    refuse_writes: bool,
    reads: usize,
    written: Vec<u8>,
}

impl ScriptedSocket {
    pub fn new(incoming: Vec<u8>) -> Self {
        ScriptedSocket { incoming, ..Default::default() }
    }

    /// Return at most `n` bytes per read
    pub fn with_read_chunk(mut self, n: usize) -> Self {
        self.read_chunk = Some(n);
        self
    }

    /// Accept at most `n` bytes per write
    pub fn with_write_chunk(mut self, n: usize) -> Self {
        self.write_chunk = Some(n);
        self
    }

    /// Every write returns 0
    pub fn refusing_writes(mut self) -> Self {
        self.refuse_writes = true;
        self
    }

    /// Number of read calls so far
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }
}

impl Read for ScriptedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        let remaining = &self.incoming[self.pos..];
        let n = remaining
            .len()
            .min(buf.len())
            .min(self.read_chunk.unwrap_or(usize::MAX));
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for ScriptedSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.refuse_writes {
            return Ok(0);
        }
        let n = buf.len().min(self.write_chunk.unwrap_or(usize::MAX));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
