//! Incoming ciphertext buffer
//!
//! One fixed allocation holds ciphertext as it arrives from the transport.
//! Records are decrypted in place, so after a successful decrypt the buffer
//! contains, in order: consumed record bytes, the plaintext window somewhere
//! inside them, and `leftover` bytes of the next record at the very end.
//!
//! ```text
//! 0                                          len - leftover        len   capacity
//! | header | plaintext window | trailer ...  | next record bytes |  spare  |
//! ```

use super::error::TlsError;
use log::warn;
use std::io::Read;

/// Capacity of the incoming buffer: maximum record plus header/MAC/padding
pub const INCOMING_CAPACITY: usize = 16384 + 512;

#[derive(Debug)]
pub(crate) struct IncomingBuffer {
    data: Box<[u8]>,
    len: usize,
    plain_start: usize,
    plain_len: usize,
    leftover: usize,
}

impl IncomingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INCOMING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        IncomingBuffer {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            plain_start: 0,
            plain_len: 0,
            leftover: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently held (ciphertext, or plaintext window plus leftover)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn filled_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Decrypted bytes not yet handed to the caller
    pub fn plaintext_len(&self) -> usize {
        self.plain_len
    }

    pub fn has_plaintext(&self) -> bool {
        self.plain_len > 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.plain_start = 0;
        self.plain_len = 0;
        self.leftover = 0;
    }

    /// Keep only the last `n` bytes, moved to the front
    pub fn retain_tail(&mut self, n: usize) -> Result<(), TlsError> {
        if n > self.len {
            return Err(TlsError::ProtocolViolation(format!(
                "engine reported {} unconsumed bytes but only {} are buffered",
                n, self.len
            )));
        }

        self.data.copy_within(self.len - n..self.len, 0);
        self.len = n;
        self.plain_start = 0;
        self.plain_len = 0;
        self.leftover = 0;
        Ok(())
    }

    /// Record the result of an in-place decrypt
    ///
    /// A record with no plaintext is dropped right away, leaving only the
    /// `extra` bytes of the next record.
    pub fn set_plaintext(&mut self, offset: usize, len: usize, extra: usize) -> Result<(), TlsError> {
        let record_end = self.len.checked_sub(extra).ok_or_else(|| {
            TlsError::ProtocolViolation(format!(
                "engine reported {} extra bytes but only {} are buffered",
                extra, self.len
            ))
        })?;

        if offset.checked_add(len).map_or(true, |end| end > record_end) {
            return Err(TlsError::ProtocolViolation(format!(
                "plaintext window {}+{} lies outside the {} byte record",
                offset, len, record_end
            )));
        }

        if len == 0 {
            return self.retain_tail(extra);
        }

        self.plain_start = offset;
        self.plain_len = len;
        self.leftover = extra;
        Ok(())
    }

    /// Copy plaintext into `dst`, sliding the window forward
    ///
    /// Once the window is drained the leftover ciphertext moves to the front.
    pub fn take_plaintext(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.plain_len);
        dst[..n].copy_from_slice(&self.data[self.plain_start..self.plain_start + n]);

        if n == self.plain_len {
            let leftover = self.leftover;
            self.data.copy_within(self.len - leftover..self.len, 0);
            self.len = leftover;
            self.plain_start = 0;
            self.plain_len = 0;
            self.leftover = 0;
        } else {
            self.plain_start += n;
            self.plain_len -= n;
        }

        n
    }

    /// Append whatever one transport read returns
    ///
    /// A full buffer means the peer sent more than one maximum-size record
    /// without completing it, which is fatal rather than a reason to grow.
    pub fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<usize, TlsError> {
        debug_assert!(!self.has_plaintext(), "ciphertext appended beneath unread plaintext");

        if self.len == self.data.len() {
            warn!(
                "incoming buffer full ({} bytes) without a complete record",
                self.capacity()
            );
            return Err(TlsError::ProtocolViolation(format!(
                "{} bytes buffered without a complete record",
                self.len
            )));
        }

        let n = src.read(&mut self.data[self.len..])?;
        if n == 0 {
            return Err(TlsError::ConnectionClosed);
        }

        self.len += n;
        Ok(n)
    }
}
