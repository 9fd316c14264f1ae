//! Line buffer for CR/LF framed text protocols.
//!
//! Modems and gateways terminate lines with `\r`, `\n` or both. Bytes are
//! accumulated until a terminator arrives; complete lines are handed out
//! without their terminators and blank lines between `\r\n` pairs are
//! skipped.

use bytes::{Buf, BytesMut};
use memchr::memchr2;

/// Buffer accumulating raw input and splitting it into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Bytes not yet terminated by `\r` or `\n`.
    buffer: BytesMut,
}

impl LineBuffer {
    /// Create an empty line buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Append raw input.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete, non-empty line.
    ///
    /// Returns `None` once only an unterminated remnant (or nothing) is left.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = memchr2(b'\r', b'\n', &self.buffer)?;
            let line = self.buffer.split_to(end);
            self.buffer.advance(1);
            if !line.is_empty() {
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
        }
    }

    /// Drain every complete line currently buffered.
    pub fn lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// The unterminated remnant.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the unterminated remnant and reset.
    pub fn take(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
