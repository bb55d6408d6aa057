//! TLS session over a borrowed byte stream
//!
//! A [`TlsSession`] turns an already-connected, blocking, reliable byte stream
//! into an encrypted one. It borrows the socket for its whole life and never
//! closes it; the caller owns the connection before, during and after.
//!
//! ```text
//! Uninitialized -> Negotiating -> Established -> Closed
//!                       |              |
//!                       +--> Failed <--+
//! ```

use super::buffer::IncomingBuffer;
use super::config::TlsConfig;
use super::engine::{DecryptStatus, DefaultEngine, RecordEngine, StreamSizes};
use super::error::TlsError;
use super::handshake::negotiate;
use super::vars::SessionInfo;
use log::{debug, trace};
use std::io::{self, Read, Write};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Negotiating,
    Established,
    Closed,
    Failed,
}

/// Write all of `data`, retrying partial writes
///
/// A write of zero bytes means the peer is gone.
pub(crate) fn send_all<W: Write + ?Sized>(dst: &mut W, mut data: &[u8]) -> Result<(), TlsError> {
    while !data.is_empty() {
        match dst.write(data)? {
            0 => return Err(TlsError::ConnectionClosed),
            n => data = &data[n..],
        }
    }
    dst.flush()?;
    Ok(())
}

/// Send whatever the engine produced outside of a record encryption
fn send_pending<S, E>(socket: &mut S, engine: &mut E) -> Result<(), TlsError>
where
    S: Write + ?Sized,
    E: RecordEngine,
{
    let pending = engine.take_pending_output();
    if pending.is_empty() {
        return Ok(());
    }
    trace!("sending {} bytes of engine output", pending.len());
    send_all(socket, &pending)
}

/// Encrypted session bound to one socket
pub struct TlsSession<'a, S: Read + Write + ?Sized, E: RecordEngine = DefaultEngine> {
    socket: &'a mut S,
    engine: Option<E>,
    state: SessionState,
    sizes: Option<StreamSizes>,
    incoming: IncomingBuffer,
    outgoing: Vec<u8>,
    peer_closed: bool,
}

impl<'a, S: Read + Write + ?Sized> TlsSession<'a, S> {
    /// Negotiate TLS with the compiled-in engine
    ///
    /// `hostname` is sent as SNI and, when `verify_peer` is set, checked
    /// against the peer certificate. Use [`TlsConfig`] for anything beyond
    /// these two knobs.
    pub fn init(socket: &'a mut S, hostname: &str, verify_peer: bool) -> Result<Self, TlsError> {
        let config = TlsConfig::client().verify_peer(verify_peer).build()?;
        config.connect(socket, hostname)
    }
}

impl<'a, S, E> TlsSession<'a, S, E>
where
    S: Read + Write + ?Sized,
    E: RecordEngine,
{
    /// Negotiate TLS using a caller-supplied engine
    ///
    /// On failure the engine is dropped and nothing is left to clean up.
    pub fn with_engine(socket: &'a mut S, engine: E) -> Result<Self, TlsError> {
        let mut session = TlsSession {
            socket,
            engine: Some(engine),
            state: SessionState::Uninitialized,
            sizes: None,
            incoming: IncomingBuffer::new(),
            outgoing: Vec::new(),
            peer_closed: false,
        };
        session.handshake()?;
        Ok(session)
    }

    fn handshake(&mut self) -> Result<(), TlsError> {
        self.state = SessionState::Negotiating;

        let result = match self.engine.as_mut() {
            Some(engine) => negotiate(&mut *self.socket, engine, &mut self.incoming),
            None => Err(TlsError::InvalidState(self.state)),
        };

        let sizes = match result.and_then(validate_sizes) {
            Ok(sizes) => sizes,
            Err(e) => {
                debug!("handshake failed: {}", e);
                self.state = SessionState::Failed;
                self.engine = None;
                self.incoming.clear();
                return Err(e);
            }
        };

        self.outgoing = vec![0u8; sizes.max_record()];
        self.sizes = Some(sizes);
        self.state = SessionState::Established;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Record sizes fixed by the handshake
    pub fn sizes(&self) -> Option<StreamSizes> {
        self.sizes
    }

    /// Negotiated parameters; defaults once the engine is gone
    pub fn info(&self) -> SessionInfo {
        self.engine.as_ref().map(RecordEngine::info).unwrap_or_default()
    }

    /// Decrypted bytes buffered and not yet read
    pub fn pending_plaintext(&self) -> usize {
        self.incoming.plaintext_len()
    }

    /// Get reference to the underlying socket
    pub fn get_ref(&self) -> &S {
        &*self.socket
    }

    /// Get mutable reference to the underlying socket
    ///
    /// Reading or writing through it desynchronizes the record stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut *self.socket
    }

    fn ensure_established(&self) -> Result<(), TlsError> {
        match self.state {
            SessionState::Established => Ok(()),
            state => Err(TlsError::InvalidState(state)),
        }
    }

    /// Move to Failed on anything but a misuse error
    fn check<T>(&mut self, result: Result<T, TlsError>) -> Result<T, TlsError> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                debug!("session failed: {}", e);
                self.state = SessionState::Failed;
            }
        }
        result
    }

    /// Read decrypted application data
    ///
    /// Blocks until at least one byte is available. Returns at most one
    /// record's worth of plaintext; leftover plaintext and ciphertext are
    /// served by later calls before the socket is read again. A peer
    /// close_notify is reported as [`TlsError::ConnectionClosed`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        self.ensure_established()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let result = self.read_record(buf);
        if matches!(result, Err(TlsError::ConnectionClosed)) {
            self.peer_closed = true;
        }
        self.check(result)
    }

    fn read_record(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or(TlsError::InvalidState(self.state))?;

        loop {
            if self.incoming.has_plaintext() {
                return Ok(self.incoming.take_plaintext(buf));
            }

            if !self.incoming.is_empty() {
                let status = engine
                    .decrypt_record(self.incoming.filled_mut())
                    .map_err(TlsError::RecordFailure)?;
                send_pending(&mut *self.socket, engine)?;

                match status {
                    DecryptStatus::Decrypted { offset, len, extra } => {
                        trace!("decrypted record: plaintext={} extra={}", len, extra);
                        self.incoming.set_plaintext(offset, len, extra)?;
                        continue;
                    }
                    DecryptStatus::Closed => {
                        debug!("peer sent close_notify");
                        return Err(TlsError::ConnectionClosed);
                    }
                    DecryptStatus::Incomplete => {}
                }
            }

            self.incoming.fill_from(&mut *self.socket)?;
        }
    }

    /// Encrypt and send application data
    ///
    /// Data larger than one record is split; every record is fully written
    /// before the next is built. Returns `buf.len()` on success.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, TlsError> {
        self.ensure_established()?;
        let result = self.write_records(buf);
        self.check(result)
    }

    fn write_records(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        let sizes = self.sizes.ok_or(TlsError::InvalidState(self.state))?;
        let engine = self
            .engine
            .as_mut()
            .ok_or(TlsError::InvalidState(self.state))?;

        for chunk in data.chunks(sizes.max_message) {
            let record = &mut self.outgoing[..sizes.header + chunk.len() + sizes.trailer];
            record[sizes.header..sizes.header + chunk.len()].copy_from_slice(chunk);

            let total = engine
                .encrypt_record(&sizes, record, chunk.len())
                .map_err(TlsError::RecordFailure)?;
            if total > record.len() {
                return Err(TlsError::ProtocolViolation(format!(
                    "engine produced a {} byte record in a {} byte slot",
                    total,
                    record.len()
                )));
            }

            // Engine output from earlier reads or this encryption goes first
            send_pending(&mut *self.socket, engine)?;
            trace!("sending record: plaintext={} wire={}", chunk.len(), total);
            send_all(&mut *self.socket, &record[..total])?;
        }

        Ok(data.len())
    }

    /// Shut the session down
    ///
    /// Sends a close_notify when the session is established, ignoring any
    /// failure to do so, then releases the engine. Safe to call repeatedly;
    /// the socket stays open.
    pub fn close(&mut self) -> Result<(), TlsError> {
        if let Some(mut engine) = self.engine.take() {
            if self.state == SessionState::Established {
                let sent = engine
                    .close_notify()
                    .map_err(TlsError::RecordFailure)
                    .and_then(|alert| send_all(&mut *self.socket, &alert));
                if let Err(e) = sent {
                    debug!("close_notify not sent: {}", e);
                }
            }
            debug!("session closed from state {:?}", self.state);
        }

        self.incoming.clear();
        self.state = SessionState::Closed;
        Ok(())
    }
}

#[cfg(unix)]
impl<'a, S, E> TlsSession<'a, S, E>
where
    S: Read + Write + std::os::fd::AsRawFd + ?Sized,
    E: RecordEngine,
{
    /// Wait until a read would make progress
    ///
    /// Buffered plaintext or ciphertext answers immediately; otherwise the
    /// socket is polled for readability. `None` waits forever.
    pub fn poll_read(&self, timeout: Option<std::time::Duration>) -> Result<bool, TlsError> {
        use libc::{poll, pollfd, POLLIN};

        if !self.incoming.is_empty() {
            return Ok(true);
        }

        let mut pfd = pollfd {
            fd: self.socket.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            return Err(TlsError::Transport(io::Error::last_os_error()));
        }

        Ok(result > 0)
    }
}

fn validate_sizes(sizes: StreamSizes) -> Result<StreamSizes, TlsError> {
    if sizes.max_message == 0 {
        return Err(TlsError::ProtocolViolation(
            "engine negotiated a zero-length record size".to_string(),
        ));
    }
    Ok(sizes)
}

impl<S, E> Read for TlsSession<'_, S, E>
where
    S: Read + Write + ?Sized,
    E: RecordEngine,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.peer_closed {
            return Ok(0);
        }
        match TlsSession::read(self, buf) {
            Ok(n) => Ok(n),
            Err(TlsError::ConnectionClosed) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl<S, E> Write for TlsSession<'_, S, E>
where
    S: Read + Write + ?Sized,
    E: RecordEngine,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TlsSession::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Records are flushed as they are sent
        self.socket.flush()
    }
}
